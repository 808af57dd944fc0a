//! Evaluation context: the read-only field view a policy tree sees.
//!
//! All fields are f64 for uniform comparison. The field set is a closed
//! whitelist — referencing anything else is a validation error, never a
//! silent zero.

use crate::clock::SimClock;
use crate::models::{Agent, SimulationState, Transaction};
use std::collections::BTreeMap;

/// Fraction of the day after which `is_eod_rush` reads 1.0.
pub const EOD_RUSH_THRESHOLD: f64 = 0.8;

/// Whitelisted context field names, sorted.
///
/// Per-obligation fields read 0 in bank- and collateral-tree contexts.
pub const CONTEXT_FIELDS: &[&str] = &[
    "amount",
    "arrival_tick",
    "balance",
    "collateral_utilization",
    "current_tick",
    "day_progress",
    "deadline_tick",
    "effective_liquidity",
    "headroom",
    "is_divisible",
    "is_eod_rush",
    "is_overdue",
    "max_collateral_capacity",
    "outgoing_queue_size",
    "overdue_duration",
    "posted_collateral",
    "priority",
    "queue1_total_value",
    "queue2_count_for_agent",
    "queue2_size",
    "remaining_amount",
    "system_tick_in_day",
    "ticks_remaining_in_day",
    "ticks_to_deadline",
    "unsecured_cap",
];

/// Field values for one tree evaluation.
#[derive(Debug, Clone)]
pub struct EvalContext {
    fields: BTreeMap<&'static str, f64>,
}

impl EvalContext {
    /// Context for a payment-tree evaluation of one obligation.
    pub fn for_transaction(
        tx: &Transaction,
        agent: &Agent,
        state: &SimulationState,
        clock: &SimClock,
    ) -> Self {
        let mut ctx = Self::for_agent(agent, state, clock);
        let tick = clock.current_tick();

        ctx.set("amount", tx.amount() as f64);
        ctx.set("remaining_amount", tx.remaining_amount() as f64);
        ctx.set("priority", tx.priority() as f64);
        ctx.set("arrival_tick", tx.arrival_tick() as f64);
        ctx.set("deadline_tick", tx.deadline_tick() as f64);
        ctx.set(
            "ticks_to_deadline",
            tx.deadline_tick() as f64 - tick as f64,
        );
        ctx.set("is_divisible", bool_field(tx.is_divisible()));
        ctx.set("is_overdue", bool_field(tx.is_overdue()));
        ctx.set(
            "overdue_duration",
            tx.overdue_since()
                .map(|since| tick.saturating_sub(since) as f64)
                .unwrap_or(0.0),
        );
        ctx
    }

    /// Context for a bank- or collateral-tree evaluation (no obligation in
    /// scope; per-obligation fields read 0).
    pub fn for_agent(agent: &Agent, state: &SimulationState, clock: &SimClock) -> Self {
        let mut fields = BTreeMap::new();
        for name in CONTEXT_FIELDS {
            fields.insert(*name, 0.0);
        }
        let mut ctx = Self { fields };
        let tick = clock.current_tick();

        ctx.set("balance", agent.balance() as f64);
        ctx.set("unsecured_cap", agent.unsecured_cap() as f64);
        ctx.set("effective_liquidity", agent.available_liquidity() as f64);
        ctx.set("posted_collateral", agent.posted_collateral() as f64);
        ctx.set(
            "max_collateral_capacity",
            agent.max_collateral_capacity() as f64,
        );
        let max_cap = agent.max_collateral_capacity();
        ctx.set(
            "collateral_utilization",
            if max_cap > 0 {
                agent.posted_collateral() as f64 / max_cap as f64
            } else {
                0.0
            },
        );
        ctx.set("outgoing_queue_size", agent.outgoing_queue_size() as f64);

        let queue1_value = state.agent_queue_value(agent.id());
        ctx.set("queue1_total_value", queue1_value as f64);
        ctx.set(
            "headroom",
            (agent.available_liquidity() - queue1_value) as f64,
        );

        ctx.set("queue2_size", state.rtgs_queue_size() as f64);
        ctx.set(
            "queue2_count_for_agent",
            state.agent_rtgs_queue_count(agent.id()) as f64,
        );

        ctx.set("current_tick", tick as f64);
        ctx.set("system_tick_in_day", clock.tick_within_day() as f64);
        ctx.set(
            "ticks_remaining_in_day",
            clock.ticks_remaining_in_day() as f64,
        );
        let day_progress = clock.tick_within_day() as f64 / clock.ticks_per_day() as f64;
        ctx.set("day_progress", day_progress);
        ctx.set("is_eod_rush", bool_field(day_progress >= EOD_RUSH_THRESHOLD));

        ctx
    }

    fn set(&mut self, name: &'static str, value: f64) {
        debug_assert!(CONTEXT_FIELDS.contains(&name));
        self.fields.insert(name, value);
    }

    /// Look up a field. `None` means the name is outside the whitelist —
    /// validation rejects such trees before tick 0.
    pub fn get(&self, field: &str) -> Option<f64> {
        self.fields.get(field).copied()
    }

    /// Whether `field` is a whitelisted context field.
    pub fn is_known_field(field: &str) -> bool {
        CONTEXT_FIELDS.binary_search(&field).is_ok()
    }
}

fn bool_field(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Agent;

    fn fixture() -> (Transaction, Agent, SimulationState, SimClock) {
        let agent = Agent::new("BANK_A".to_string(), 1_000_000, 200_000);
        let tx = Transaction::new(
            "tx_00000000".to_string(),
            "BANK_A".to_string(),
            "BANK_B".to_string(),
            150_000,
            0,
            20,
        );
        let state = SimulationState::new(vec![agent.clone()]);
        let clock = SimClock::new(100, 1);
        (tx, agent, state, clock)
    }

    #[test]
    fn test_whitelist_is_sorted() {
        let mut sorted = CONTEXT_FIELDS.to_vec();
        sorted.sort();
        assert_eq!(sorted, CONTEXT_FIELDS, "CONTEXT_FIELDS must stay sorted");
    }

    #[test]
    fn test_transaction_fields() {
        let (tx, agent, state, clock) = fixture();
        let ctx = EvalContext::for_transaction(&tx, &agent, &state, &clock);
        assert_eq!(ctx.get("amount"), Some(150_000.0));
        assert_eq!(ctx.get("ticks_to_deadline"), Some(20.0));
        assert_eq!(ctx.get("balance"), Some(1_000_000.0));
        assert_eq!(ctx.get("effective_liquidity"), Some(1_200_000.0));
        assert_eq!(ctx.get("is_overdue"), Some(0.0));
    }

    #[test]
    fn test_agent_context_zeroes_transaction_fields() {
        let (_, agent, state, clock) = fixture();
        let ctx = EvalContext::for_agent(&agent, &state, &clock);
        assert_eq!(ctx.get("amount"), Some(0.0));
        assert_eq!(ctx.get("balance"), Some(1_000_000.0));
    }

    #[test]
    fn test_unknown_field_is_none() {
        let (_, agent, state, clock) = fixture();
        let ctx = EvalContext::for_agent(&agent, &state, &clock);
        assert_eq!(ctx.get("no_such_field"), None);
        assert!(!EvalContext::is_known_field("no_such_field"));
        assert!(EvalContext::is_known_field("balance"));
    }

    #[test]
    fn test_eod_rush_flag() {
        let (_, agent, state, _) = fixture();
        let mut clock = SimClock::new(10, 1);
        for _ in 0..8 {
            clock.advance();
        }
        let ctx = EvalContext::for_agent(&agent, &state, &clock);
        assert_eq!(ctx.get("is_eod_rush"), Some(1.0));
        assert_eq!(ctx.get("ticks_remaining_in_day"), Some(2.0));
    }
}
