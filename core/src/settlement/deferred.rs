//! Deferred-credit ledger.
//!
//! Under deferred crediting, a settlement debits the sender immediately
//! but parks the receiver's credit here; everything parked is applied in
//! one batch at end of tick. This is the discipline that stops within-tick
//! recycling: money received in tick k is only spendable in tick k+1.

use crate::models::event::Event;
use crate::models::state::SimulationState;
use std::collections::BTreeMap;

/// Per-tick accumulator of incoming credits.
#[derive(Debug, Default)]
pub struct DeferredLedger {
    /// agent id → (total pending, source transaction ids).
    /// BTreeMap so application order is sorted and deterministic.
    pending: BTreeMap<String, (i64, Vec<String>)>,
}

impl DeferredLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a credit for `agent_id`, remembering the source obligation.
    pub fn accumulate(&mut self, agent_id: &str, amount: i64, tx_id: &str) {
        let entry = self
            .pending
            .entry(agent_id.to_string())
            .or_insert((0, Vec::new()));
        entry.0 = entry.0.saturating_add(amount);
        entry.1.push(tx_id.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn total_for_agent(&self, agent_id: &str) -> i64 {
        self.pending.get(agent_id).map(|(amt, _)| *amt).unwrap_or(0)
    }

    /// Apply every parked credit in sorted agent order, emptying the
    /// ledger. Returns one `DeferredCreditApplied` event per agent.
    pub fn apply_all(&mut self, state: &mut SimulationState, tick: usize) -> Vec<Event> {
        let mut events = Vec::new();
        let pending = std::mem::take(&mut self.pending);
        for (agent_id, (amount, source_tx_ids)) in pending {
            if let Some(agent) = state.get_agent_mut(&agent_id) {
                agent.credit(amount);
                events.push(Event::DeferredCreditApplied {
                    tick,
                    agent_id,
                    amount,
                    source_tx_ids,
                });
            }
        }
        events
    }
}

/// Route a settlement credit: park it when a ledger is active (deferred
/// mode), otherwise credit the receiver's balance immediately.
pub fn credit_receiver(
    state: &mut SimulationState,
    ledger: &mut Option<&mut DeferredLedger>,
    receiver_id: &str,
    amount: i64,
    tx_id: &str,
) {
    match ledger {
        Some(ledger) => ledger.accumulate(receiver_id, amount, tx_id),
        None => {
            if let Some(receiver) = state.get_agent_mut(receiver_id) {
                receiver.credit(amount);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Agent;

    fn state() -> SimulationState {
        SimulationState::new(vec![
            Agent::new("BANK_A".to_string(), 0, 0),
            Agent::new("BANK_B".to_string(), 0, 0),
        ])
    }

    #[test]
    fn test_accumulate_and_apply() {
        let mut ledger = DeferredLedger::new();
        ledger.accumulate("BANK_A", 100_000, "tx_1");
        ledger.accumulate("BANK_A", 50_000, "tx_2");
        ledger.accumulate("BANK_B", 75_000, "tx_3");
        assert_eq!(ledger.total_for_agent("BANK_A"), 150_000);

        let mut state = state();
        let events = ledger.apply_all(&mut state, 3);

        assert!(ledger.is_empty());
        assert_eq!(state.get_agent("BANK_A").unwrap().balance(), 150_000);
        assert_eq!(state.get_agent("BANK_B").unwrap().balance(), 75_000);
        assert_eq!(events.len(), 2);
        // Sorted agent order.
        assert_eq!(events[0].agent_id(), Some("BANK_A"));
        assert_eq!(events[1].agent_id(), Some("BANK_B"));
    }

    #[test]
    fn test_immediate_mode_credits_directly() {
        let mut state = state();
        let mut none: Option<&mut DeferredLedger> = None;
        credit_receiver(&mut state, &mut none, "BANK_B", 40_000, "tx_1");
        assert_eq!(state.get_agent("BANK_B").unwrap().balance(), 40_000);
    }

    #[test]
    fn test_deferred_mode_leaves_balance_untouched() {
        let mut state = state();
        let mut ledger = DeferredLedger::new();
        let mut some = Some(&mut ledger);
        credit_receiver(&mut state, &mut some, "BANK_B", 40_000, "tx_1");
        assert_eq!(state.get_agent("BANK_B").unwrap().balance(), 0);
        assert_eq!(ledger.total_for_agent("BANK_B"), 40_000);
    }
}
