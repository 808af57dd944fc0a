//! Append-only event log.
//!
//! Every observable state change appends one record. Records carry a
//! globally monotone sequence number; within a tick their relative order
//! is fixed by the phase schedule, which is the contract downstream
//! consumers (persistence, replay, UIs) depend on.
//!
//! The wire format is a serde-tagged JSON object with an `event_type`
//! discriminator; consumers must tolerate added fields.

use crate::costs::CostBreakdown;
use serde::{Deserialize, Serialize};

/// One observable state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum Event {
    /// New obligation entered the system (generated, scheduled, or
    /// externally submitted)
    Arrival {
        tick: usize,
        tx_id: String,
        sender_id: String,
        receiver_id: String,
        amount: i64,
        deadline_tick: usize,
        priority: u8,
        is_divisible: bool,
    },

    /// Outcome of one policy-tree evaluation
    PolicyDecision {
        tick: usize,
        agent_id: String,
        /// Absent for bank-level (once-per-tick) decisions
        tx_id: Option<String>,
        /// Action name as declared in the tree
        decision: String,
    },

    /// Obligation released into the central RTGS queue
    QueuedInRtgs {
        tick: usize,
        tx_id: String,
        sender_id: String,
        receiver_id: String,
        amount: i64,
        declared_priority: u8,
    },

    /// Obligation settled gross against the sender's liquidity
    RtgsImmediateSettlement {
        tick: usize,
        tx_id: String,
        sender_id: String,
        receiver_id: String,
        amount: i64,
        sender_balance_before: i64,
        sender_balance_after: i64,
    },

    /// Two opposite obligations netted bilaterally by Δ = min(remaining)
    LsmBilateralOffset {
        tick: usize,
        agent_a: String,
        agent_b: String,
        tx_id_a: String,
        tx_id_b: String,
        /// Remaining amounts before the offset
        amount_a: i64,
        amount_b: i64,
        /// Δ applied to both obligations
        offset: i64,
    },

    /// A payment cycle netted by Δ = min edge weight
    LsmCycleSettlement {
        tick: usize,
        /// Agents in canonical cycle order (first repeated at the end)
        cycle: Vec<String>,
        /// Obligations reduced, in cycle-edge order
        tx_ids: Vec<String>,
        /// Δ applied around the cycle
        amount: i64,
    },

    /// Buffered incoming credits applied at end of tick
    DeferredCreditApplied {
        tick: usize,
        agent_id: String,
        amount: i64,
        source_tx_ids: Vec<String>,
    },

    /// Per-agent cost accrual for this tick
    CostAccrual {
        tick: usize,
        agent_id: String,
        costs: CostBreakdown,
    },

    CollateralPosted {
        tick: usize,
        agent_id: String,
        amount: i64,
        new_total: i64,
    },

    CollateralReleased {
        tick: usize,
        agent_id: String,
        amount: i64,
        new_total: i64,
    },

    /// First tick past the deadline of an unsettled obligation
    TransactionWentOverdue {
        tick: usize,
        tx_id: String,
        sender_id: String,
        receiver_id: String,
        amount: i64,
        remaining_amount: i64,
        deadline_tick: usize,
        deadline_penalty: i64,
    },

    TransactionCancelled {
        tick: usize,
        tx_id: String,
        sender_id: String,
        reason: String,
    },

    /// Parent obligation replaced by split children
    Split {
        tick: usize,
        agent_id: String,
        parent_id: String,
        child_ids: Vec<String>,
        child_amounts: Vec<i64>,
        friction_cost: i64,
    },

    /// End-of-day marker
    EndOfDay {
        tick: usize,
        day: usize,
        unsettled_count: usize,
        total_penalties: i64,
    },
}

impl Event {
    /// Tick this event belongs to.
    pub fn tick(&self) -> usize {
        match self {
            Event::Arrival { tick, .. }
            | Event::PolicyDecision { tick, .. }
            | Event::QueuedInRtgs { tick, .. }
            | Event::RtgsImmediateSettlement { tick, .. }
            | Event::LsmBilateralOffset { tick, .. }
            | Event::LsmCycleSettlement { tick, .. }
            | Event::DeferredCreditApplied { tick, .. }
            | Event::CostAccrual { tick, .. }
            | Event::CollateralPosted { tick, .. }
            | Event::CollateralReleased { tick, .. }
            | Event::TransactionWentOverdue { tick, .. }
            | Event::TransactionCancelled { tick, .. }
            | Event::Split { tick, .. }
            | Event::EndOfDay { tick, .. } => *tick,
        }
    }

    /// Wire discriminator of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Arrival { .. } => "Arrival",
            Event::PolicyDecision { .. } => "PolicyDecision",
            Event::QueuedInRtgs { .. } => "QueuedInRtgs",
            Event::RtgsImmediateSettlement { .. } => "RtgsImmediateSettlement",
            Event::LsmBilateralOffset { .. } => "LsmBilateralOffset",
            Event::LsmCycleSettlement { .. } => "LsmCycleSettlement",
            Event::DeferredCreditApplied { .. } => "DeferredCreditApplied",
            Event::CostAccrual { .. } => "CostAccrual",
            Event::CollateralPosted { .. } => "CollateralPosted",
            Event::CollateralReleased { .. } => "CollateralReleased",
            Event::TransactionWentOverdue { .. } => "TransactionWentOverdue",
            Event::TransactionCancelled { .. } => "TransactionCancelled",
            Event::Split { .. } => "Split",
            Event::EndOfDay { .. } => "EndOfDay",
        }
    }

    /// Transaction id, when the event concerns one obligation.
    pub fn tx_id(&self) -> Option<&str> {
        match self {
            Event::Arrival { tx_id, .. }
            | Event::QueuedInRtgs { tx_id, .. }
            | Event::RtgsImmediateSettlement { tx_id, .. }
            | Event::TransactionWentOverdue { tx_id, .. }
            | Event::TransactionCancelled { tx_id, .. } => Some(tx_id),
            Event::PolicyDecision { tx_id, .. } => tx_id.as_deref(),
            Event::Split { parent_id, .. } => Some(parent_id),
            _ => None,
        }
    }

    /// Agent id, when the event concerns one agent.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Event::Arrival { sender_id, .. }
            | Event::QueuedInRtgs { sender_id, .. }
            | Event::RtgsImmediateSettlement { sender_id, .. }
            | Event::TransactionWentOverdue { sender_id, .. }
            | Event::TransactionCancelled { sender_id, .. } => Some(sender_id),
            Event::PolicyDecision { agent_id, .. }
            | Event::DeferredCreditApplied { agent_id, .. }
            | Event::CostAccrual { agent_id, .. }
            | Event::CollateralPosted { agent_id, .. }
            | Event::CollateralReleased { agent_id, .. }
            | Event::Split { agent_id, .. } => Some(agent_id),
            _ => None,
        }
    }
}

/// An event together with its global sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Globally monotone sequence, unique across the whole run
    pub seq: u64,
    #[serde(flatten)]
    pub event: Event,
}

/// The run's single, totally ordered event stream.
///
/// Events for a tick are contiguous because the engine only ever appends
/// while processing that tick; `records_for_tick` exploits this with a
/// binary search over the sorted tick column.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    records: Vec<EventRecord>,
    next_seq: u64,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume a log at a given sequence (checkpoint load). The loaded
    /// orchestrator replays only future events; earlier records live in
    /// the original run's log.
    pub(crate) fn resume_at(next_seq: u64) -> Self {
        Self {
            records: Vec::new(),
            next_seq,
        }
    }

    /// Append an event, assigning the next sequence number.
    pub fn log(&mut self, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.push(EventRecord { seq, event });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// All records for one tick, as a contiguous slice.
    pub fn records_for_tick(&self, tick: usize) -> &[EventRecord] {
        let start = self.records.partition_point(|r| r.event.tick() < tick);
        let end = self.records.partition_point(|r| r.event.tick() <= tick);
        &self.records[start..end]
    }

    pub fn records_of_type(&self, event_type: &str) -> Vec<&EventRecord> {
        self.records
            .iter()
            .filter(|r| r.event.event_type() == event_type)
            .collect()
    }

    pub fn records_for_tx(&self, tx_id: &str) -> Vec<&EventRecord> {
        self.records
            .iter()
            .filter(|r| r.event.tx_id() == Some(tx_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrival(tick: usize, tx: &str) -> Event {
        Event::Arrival {
            tick,
            tx_id: tx.to_string(),
            sender_id: "BANK_A".to_string(),
            receiver_id: "BANK_B".to_string(),
            amount: 100_000,
            deadline_tick: tick + 10,
            priority: 5,
            is_divisible: false,
        }
    }

    #[test]
    fn test_sequence_is_monotone() {
        let mut log = EventLog::new();
        log.log(arrival(0, "tx_1"));
        log.log(arrival(0, "tx_2"));
        log.log(arrival(1, "tx_3"));
        let seqs: Vec<u64> = log.records().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_records_for_tick_is_contiguous_slice() {
        let mut log = EventLog::new();
        log.log(arrival(0, "tx_1"));
        log.log(arrival(1, "tx_2"));
        log.log(arrival(1, "tx_3"));
        log.log(arrival(2, "tx_4"));

        let tick1 = log.records_for_tick(1);
        assert_eq!(tick1.len(), 2);
        assert_eq!(tick1[0].event.tx_id(), Some("tx_2"));
        assert_eq!(tick1[1].event.tx_id(), Some("tx_3"));
        assert!(log.records_for_tick(7).is_empty());
    }

    #[test]
    fn test_wire_format_carries_event_type_tag() {
        let json = serde_json::to_value(&EventRecord {
            seq: 3,
            event: arrival(5, "tx_9"),
        })
        .unwrap();
        assert_eq!(json["event_type"], "Arrival");
        assert_eq!(json["seq"], 3);
        assert_eq!(json["tick"], 5);
        assert_eq!(json["tx_id"], "tx_9");
    }

    #[test]
    fn test_query_by_tx() {
        let mut log = EventLog::new();
        log.log(arrival(0, "tx_1"));
        log.log(arrival(0, "tx_2"));
        assert_eq!(log.records_for_tx("tx_1").len(), 1);
    }
}
