//! Checkpointing: save and restore complete orchestrator state.
//!
//! A snapshot captures everything future behavior depends on — clock
//! position, RNG stream states, agents, obligations, queues, cost
//! accumulators, id and sequence counters, and the scenario cursor — so
//! a restored orchestrator's future event stream is identical to the
//! original's. Snapshots embed the full configuration plus its SHA-256
//! hash; a tampered or mismatched snapshot is rejected at load.

use crate::arrivals::{ScenarioSchedule, TxIdSource};
use crate::clock::SimClock;
use crate::costs::CostAccumulator;
use crate::models::event::EventLog;
use crate::models::state::SimulationState;
use crate::models::{Agent, Transaction};
use crate::orchestrator::config::{OrchestratorConfig, SimulationError};
use crate::orchestrator::engine::Orchestrator;
use crate::rng::{RngManager, RngStream};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Serialized orchestrator state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Full configuration, embedded so a snapshot is self-describing
    pub config: OrchestratorConfig,

    /// SHA-256 over the canonicalized config JSON
    pub config_hash: String,

    pub current_tick: usize,
    pub rng_streams: BTreeMap<String, RngStream>,
    pub agents: BTreeMap<String, Agent>,
    pub transactions: BTreeMap<String, Transaction>,
    pub rtgs_queue: Vec<String>,
    pub accumulated_costs: BTreeMap<String, CostAccumulator>,
    pub tx_ids: TxIdSource,
    pub next_event_seq: u64,
    pub pending_arrivals: Vec<(String, String)>,
    pub scenario_entries: Option<Vec<crate::arrivals::ScheduledArrival>>,
    pub scenario_cursor: usize,
    pub total_arrivals: usize,
    pub total_lsm_releases: usize,
    pub opening_total_balance: i64,
}

/// Deterministic SHA-256 of a serializable value, hashing canonical JSON
/// with recursively sorted object keys.
pub fn compute_config_hash<T: Serialize>(config: &T) -> Result<String, SimulationError> {
    use serde_json::Value;

    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let value = serde_json::to_value(config).map_err(|e| {
        SimulationError::OperationInvalid(format!("config serialization failed: {}", e))
    })?;
    let json = serde_json::to_string(&canonicalize(value)).map_err(|e| {
        SimulationError::OperationInvalid(format!("config serialization failed: {}", e))
    })?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

impl Orchestrator {
    /// Serialize the complete state to opaque bytes.
    pub fn save_state(&self) -> Result<Vec<u8>, SimulationError> {
        let snapshot = StateSnapshot {
            config_hash: compute_config_hash(&self.config)?,
            config: self.config.clone(),
            current_tick: self.clock.current_tick(),
            rng_streams: self.rng.streams().clone(),
            agents: self.state.agents().clone(),
            transactions: self.state.transactions().clone(),
            rtgs_queue: self.state.rtgs_queue().to_vec(),
            accumulated_costs: self.accumulated_costs.clone(),
            tx_ids: self.tx_ids.clone(),
            next_event_seq: self.event_log.next_seq(),
            pending_arrivals: self.pending_arrivals.clone(),
            scenario_entries: self
                .scenario
                .as_ref()
                .map(|s| s.entries().to_vec()),
            scenario_cursor: self.scenario.as_ref().map(|s| s.cursor()).unwrap_or(0),
            total_arrivals: self.total_arrivals,
            total_lsm_releases: self.total_lsm_releases,
            opening_total_balance: self.opening_total_balance,
        };
        serde_json::to_vec(&snapshot).map_err(|e| {
            SimulationError::OperationInvalid(format!("checkpoint encode failed: {}", e))
        })
    }

    /// Rebuild an orchestrator from checkpoint bytes.
    ///
    /// Verifies the embedded config hash and the snapshot's structural
    /// integrity (queue references, balance conservation) before any
    /// state is accepted.
    pub fn load_state(bytes: &[u8]) -> Result<Self, SimulationError> {
        let snapshot: StateSnapshot = serde_json::from_slice(bytes).map_err(|e| {
            SimulationError::OperationInvalid(format!("checkpoint decode failed: {}", e))
        })?;

        let expected_hash = compute_config_hash(&snapshot.config)?;
        if expected_hash != snapshot.config_hash {
            return Err(SimulationError::OperationInvalid(format!(
                "checkpoint config hash mismatch: expected {}, got {}",
                expected_hash, snapshot.config_hash
            )));
        }
        validate_snapshot(&snapshot)?;

        // Rebuild the derived machinery from configuration, then overlay
        // the checkpointed state.
        let mut orchestrator = Orchestrator::new(snapshot.config.clone())?;

        orchestrator.state = SimulationState::from_parts(
            snapshot.agents,
            snapshot.transactions,
            snapshot.rtgs_queue,
        )
        .map_err(SimulationError::OperationInvalid)?;
        orchestrator.clock = SimClock::restore(
            snapshot.config.ticks_per_day,
            snapshot.config.num_days,
            snapshot.current_tick,
        );
        orchestrator.rng = RngManager::restore(snapshot.config.rng_seed, snapshot.rng_streams);
        orchestrator.accumulated_costs = snapshot.accumulated_costs;
        orchestrator.tx_ids = snapshot.tx_ids;
        orchestrator.event_log = EventLog::resume_at(snapshot.next_event_seq);
        orchestrator.pending_arrivals = snapshot.pending_arrivals;
        orchestrator.scenario = snapshot
            .scenario_entries
            .map(|entries| ScenarioSchedule::restore(entries, snapshot.scenario_cursor));
        orchestrator.total_arrivals = snapshot.total_arrivals;
        orchestrator.total_lsm_releases = snapshot.total_lsm_releases;
        orchestrator.opening_total_balance = snapshot.opening_total_balance;

        Ok(orchestrator)
    }
}

/// Structural integrity checks over a decoded snapshot.
fn validate_snapshot(snapshot: &StateSnapshot) -> Result<(), SimulationError> {
    // Balance conservation: between ticks the deferred ledger is empty,
    // so agent balances must sum to the opening total.
    let total: i64 = snapshot.agents.values().map(|a| a.balance()).sum();
    if total != snapshot.opening_total_balance {
        return Err(SimulationError::OperationInvalid(format!(
            "checkpoint balance conservation violated: expected {}, got {}",
            snapshot.opening_total_balance, total
        )));
    }

    // Queue references resolve and no obligation sits in two queues.
    let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
    for (agent_id, agent) in &snapshot.agents {
        for tx_id in agent.outgoing_queue() {
            if !snapshot.transactions.contains_key(tx_id) {
                return Err(SimulationError::OperationInvalid(format!(
                    "checkpoint references unknown transaction {} in agent {} queue",
                    tx_id, agent_id
                )));
            }
            if seen.insert(tx_id, agent_id).is_some() {
                return Err(SimulationError::OperationInvalid(format!(
                    "transaction {} appears in multiple queues",
                    tx_id
                )));
            }
        }
    }
    for tx_id in &snapshot.rtgs_queue {
        if !snapshot.transactions.contains_key(tx_id.as_str()) {
            return Err(SimulationError::OperationInvalid(format!(
                "checkpoint references unknown transaction {} in RTGS queue",
                tx_id
            )));
        }
        if seen.insert(tx_id, "rtgs").is_some() {
            return Err(SimulationError::OperationInvalid(format!(
                "transaction {} appears in multiple queues",
                tx_id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_hash_deterministic() {
        #[derive(Serialize)]
        struct TestConfig {
            b: i64,
            a: String,
        }
        let one = TestConfig {
            b: 42,
            a: "x".to_string(),
        };
        let two = TestConfig {
            b: 42,
            a: "x".to_string(),
        };
        assert_eq!(
            compute_config_hash(&one).unwrap(),
            compute_config_hash(&two).unwrap()
        );
    }

    #[test]
    fn test_config_hash_differs() {
        #[derive(Serialize)]
        struct TestConfig {
            v: i64,
        }
        assert_ne!(
            compute_config_hash(&TestConfig { v: 1 }).unwrap(),
            compute_config_hash(&TestConfig { v: 2 }).unwrap()
        );
    }

    #[test]
    fn test_load_rejects_garbage() {
        assert!(matches!(
            Orchestrator::load_state(b"not json"),
            Err(SimulationError::OperationInvalid(_))
        ));
    }
}
