//! Immediate gross settlement over the central queue.
//!
//! One pass per tick: the queue is ordered by (declared priority,
//! submission tick, tx id) and every obligation whose sender can cover it
//! settles gross — debit now, credit via the deferred ledger. Obligations
//! that cannot settle simply stay queued; the priority scan means an
//! unfunded head never blocks the rest of its band.

use crate::models::state::SimulationState;
use crate::settlement::deferred::{credit_receiver, DeferredLedger};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SettlementError {
    #[error("insufficient liquidity: required {required}, available {available}")]
    InsufficientLiquidity { required: i64, available: i64 },

    #[error("transaction {0} not found")]
    TransactionNotFound(String),

    #[error("agent {0} not found")]
    AgentNotFound(String),
}

/// One settlement produced by the pass, with the audit fields the event
/// log carries.
#[derive(Debug, Clone, PartialEq)]
pub struct SettledTx {
    pub tx_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub amount: i64,
    pub sender_balance_before: i64,
    pub sender_balance_after: i64,
    /// Obligation was past deadline when it finally settled
    pub was_overdue: bool,
}

/// Statistics and settlements from one queue pass.
#[derive(Debug, Clone, Default)]
pub struct RtgsPassResult {
    pub settlements: Vec<SettledTx>,
    pub settled_value: i64,
    pub remaining_queue_size: usize,
}

/// Process the central queue once.
///
/// The queue is sorted before scanning so iteration order is a pure
/// function of its membership. Sender liquidity is re-read per obligation:
/// an agent funded at the start of the pass may run dry half-way through.
pub fn process_queue(
    state: &mut SimulationState,
    tick: usize,
    mut deferred: Option<&mut DeferredLedger>,
) -> RtgsPassResult {
    state.sort_rtgs_queue();

    let mut result = RtgsPassResult::default();
    let mut still_pending = Vec::new();

    let queue: Vec<String> = state.rtgs_queue_mut().drain(..).collect();
    for tx_id in queue {
        let (sender_id, receiver_id, amount, was_overdue) = {
            let tx = match state.get_transaction(&tx_id) {
                Some(tx) => tx,
                None => continue,
            };
            if tx.is_fully_settled() || tx.is_cancelled() {
                continue;
            }
            (
                tx.sender_id().to_string(),
                tx.receiver_id().to_string(),
                tx.remaining_amount(),
                tx.is_overdue(),
            )
        };

        let can_cover = state
            .get_agent(&sender_id)
            .map(|sender| sender.can_cover(amount))
            .unwrap_or(false);

        if !can_cover {
            still_pending.push(tx_id);
            continue;
        }

        let sender = state
            .get_agent_mut(&sender_id)
            .expect("sender existence checked above");
        let sender_balance_before = sender.balance();
        sender
            .debit(amount)
            .expect("can_cover checked immediately before debit");
        sender.record_outflow(&receiver_id, amount);
        let sender_balance_after = sender.balance();

        credit_receiver(state, &mut deferred, &receiver_id, amount, &tx_id);

        state
            .get_transaction_mut(&tx_id)
            .expect("transaction presence checked above")
            .settle(amount, tick)
            .expect("full remaining amount always settles");

        result.settled_value += amount;
        result.settlements.push(SettledTx {
            tx_id,
            sender_id,
            receiver_id,
            amount,
            sender_balance_before,
            sender_balance_after,
            was_overdue,
        });
    }

    *state.rtgs_queue_mut() = still_pending;
    result.remaining_queue_size = state.rtgs_queue_size();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Agent, Transaction};

    fn setup(balance_a: i64) -> SimulationState {
        SimulationState::new(vec![
            Agent::new("BANK_A".to_string(), balance_a, 0),
            Agent::new("BANK_B".to_string(), 0, 0),
        ])
    }

    fn queue_tx(state: &mut SimulationState, id: &str, sender: &str, amount: i64, tick: usize) {
        let mut tx = Transaction::new(
            id.to_string(),
            sender.to_string(),
            if sender == "BANK_A" { "BANK_B" } else { "BANK_A" }.to_string(),
            amount,
            tick,
            tick + 50,
        );
        tx.mark_submitted(None, tick);
        state.add_transaction(tx);
        state.queue_in_rtgs(id.to_string());
    }

    #[test]
    fn test_settles_when_funded() {
        let mut state = setup(1_000_000);
        queue_tx(&mut state, "tx_1", "BANK_A", 500_000, 0);

        let result = process_queue(&mut state, 0, None);
        assert_eq!(result.settlements.len(), 1);
        assert_eq!(result.settled_value, 500_000);
        assert_eq!(state.get_agent("BANK_A").unwrap().balance(), 500_000);
        assert_eq!(state.get_agent("BANK_B").unwrap().balance(), 500_000);
        assert_eq!(state.rtgs_queue_size(), 0);
    }

    #[test]
    fn test_unfunded_obligation_stays_queued() {
        let mut state = setup(100_000);
        queue_tx(&mut state, "tx_1", "BANK_A", 500_000, 0);

        let result = process_queue(&mut state, 0, None);
        assert!(result.settlements.is_empty());
        assert_eq!(state.rtgs_queue_size(), 1);
        assert_eq!(state.get_agent("BANK_A").unwrap().balance(), 100_000);
    }

    #[test]
    fn test_priority_scan_skips_blocked_head() {
        // Large high-priority obligation cannot settle; smaller one behind
        // it still does.
        let mut state = setup(100_000);
        let mut big = Transaction::new(
            "tx_1".to_string(),
            "BANK_A".to_string(),
            "BANK_B".to_string(),
            500_000,
            0,
            50,
        );
        big.mark_submitted(Some(9), 0);
        state.add_transaction(big);
        state.queue_in_rtgs("tx_1".to_string());
        queue_tx(&mut state, "tx_2", "BANK_A", 80_000, 0);

        let result = process_queue(&mut state, 0, None);
        assert_eq!(result.settlements.len(), 1);
        assert_eq!(result.settlements[0].tx_id, "tx_2");
        assert_eq!(state.rtgs_queue(), &["tx_1"]);
    }

    #[test]
    fn test_deferred_mode_buffers_credit() {
        let mut state = setup(1_000_000);
        queue_tx(&mut state, "tx_1", "BANK_A", 500_000, 0);

        let mut ledger = DeferredLedger::new();
        process_queue(&mut state, 0, Some(&mut ledger));

        // Sender debited, receiver untouched until the ledger applies.
        assert_eq!(state.get_agent("BANK_A").unwrap().balance(), 500_000);
        assert_eq!(state.get_agent("BANK_B").unwrap().balance(), 0);
        assert_eq!(ledger.total_for_agent("BANK_B"), 500_000);
    }

    #[test]
    fn test_no_recycling_within_pass_under_deferral() {
        // B owes A but only becomes funded by A's payment; with deferral
        // the credit is invisible this tick, so B stays queued.
        let mut state = SimulationState::new(vec![
            Agent::new("BANK_A".to_string(), 500_000, 0),
            Agent::new("BANK_B".to_string(), 0, 0),
        ]);
        queue_tx(&mut state, "tx_1", "BANK_A", 500_000, 0);
        queue_tx(&mut state, "tx_2", "BANK_B", 400_000, 0);

        let mut ledger = DeferredLedger::new();
        let result = process_queue(&mut state, 0, Some(&mut ledger));
        assert_eq!(result.settlements.len(), 1);
        assert_eq!(result.settlements[0].tx_id, "tx_1");
        assert!(state.rtgs_queue_contains("tx_2"));
    }

    #[test]
    fn test_outflow_recorded() {
        let mut state = setup(1_000_000);
        queue_tx(&mut state, "tx_1", "BANK_A", 300_000, 0);
        process_queue(&mut state, 0, None);
        assert_eq!(state.get_agent("BANK_A").unwrap().total_outflow(), 300_000);
    }
}
