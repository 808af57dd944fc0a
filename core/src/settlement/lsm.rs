//! Liquidity-saving mechanisms: bilateral offsetting and multilateral
//! cycle netting over the central queue.
//!
//! Both algorithms work by Δ-netting: a bilateral pair is reduced by
//! Δ = min of the two remaining amounts, a cycle by Δ = min edge weight.
//! Senders are debited Δ and receivers credited Δ through the deferred
//! ledger, so each application is balance-neutral per participant once
//! credits apply; only the configured bilateral/multilateral exposure
//! limits gate an application, not current balances.
//!
//! Determinism: bilateral candidates are visited in lexicographic
//! (agent_a, agent_b, tx_id_a, tx_id_b) order; cycles are enumerated by a
//! bounded DFS that roots each cycle at its minimum agent id, which makes
//! the canonical representation also the discovery order.

use crate::models::event::Event;
use crate::models::state::SimulationState;
use crate::settlement::deferred::{credit_receiver, DeferredLedger};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// LSM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LsmConfig {
    /// Enable bilateral offsetting (A⇄B netting)
    pub enable_bilateral: bool,

    /// Enable multilateral cycle netting
    pub enable_cycles: bool,

    /// Maximum cycle length to enumerate (edges)
    pub max_cycle_length: usize,

    /// Maximum cycles applied per tick
    pub max_cycles_per_tick: usize,

    /// Fixed-point iteration bound for the whole pass
    pub max_iterations: usize,
}

impl Default for LsmConfig {
    fn default() -> Self {
        Self {
            enable_bilateral: true,
            enable_cycles: true,
            max_cycle_length: 4,
            max_cycles_per_tick: 10,
            max_iterations: 10,
        }
    }
}

/// Result of a complete LSM pass for one tick.
#[derive(Debug, Clone, Default)]
pub struct LsmPassResult {
    /// Bilateral offsets applied
    pub bilateral_offsets: usize,

    /// Cycles applied
    pub cycles_settled: usize,

    /// Total Δ value released (gross across both legs / all edges)
    pub released_value: i64,

    /// Fixed-point iterations run
    pub iterations_run: usize,

    /// Events to append, in application order
    pub events: Vec<Event>,
}

/// Run the LSM over whatever remains queued after immediate settlement.
///
/// Iterates bilateral-then-cycles until a full iteration makes no
/// progress or `max_iterations` is reached. The per-tick cycle cap spans
/// all iterations.
pub fn run_lsm_pass(
    state: &mut SimulationState,
    config: &LsmConfig,
    tick: usize,
    deferred: &mut Option<&mut DeferredLedger>,
) -> LsmPassResult {
    let mut result = LsmPassResult::default();
    let mut cycles_budget = config.max_cycles_per_tick;

    while result.iterations_run < config.max_iterations {
        result.iterations_run += 1;
        let mut progress = false;

        if config.enable_bilateral {
            progress |= bilateral_pass(state, tick, deferred, &mut result);
        }
        if config.enable_cycles && cycles_budget > 0 {
            progress |= cycle_pass(state, config, tick, deferred, &mut cycles_budget, &mut result);
        }

        if !progress {
            break;
        }
    }

    debug!(
        tick,
        bilateral = result.bilateral_offsets,
        cycles = result.cycles_settled,
        released = result.released_value,
        iterations = result.iterations_run,
        queue_after = state.rtgs_queue_size(),
        "lsm pass complete"
    );

    result
}

// ----------------------------------------------------------------------
// Bilateral offsetting
// ----------------------------------------------------------------------

/// One pass over all opposite-direction obligation pairs.
///
/// Candidates are scanned in lexicographic (sender, receiver, tx id)
/// order; for each live obligation the lexicographically first live
/// reverse obligation is offset against it by Δ = min(remaining).
fn bilateral_pass(
    state: &mut SimulationState,
    tick: usize,
    deferred: &mut Option<&mut DeferredLedger>,
    result: &mut LsmPassResult,
) -> bool {
    // Snapshot of the queue in canonical order.
    let mut entries: Vec<(String, String, String)> = state
        .rtgs_queue()
        .iter()
        .filter_map(|id| state.get_transaction(id))
        .map(|tx| {
            (
                tx.sender_id().to_string(),
                tx.receiver_id().to_string(),
                tx.id().to_string(),
            )
        })
        .collect();
    entries.sort();

    let mut progress = false;

    for (sender, receiver, tx_id) in entries.clone() {
        let rem_a = match live_remaining(state, &tx_id) {
            Some(v) => v,
            None => continue,
        };

        // Lexicographically first live reverse obligation.
        let reverse = entries
            .iter()
            .filter(|(s, r, id)| *s == receiver && *r == sender && *id != tx_id)
            .find_map(|(_, _, id)| live_remaining(state, id).map(|rem| (id.clone(), rem)));
        let (rev_id, rem_b) = match reverse {
            Some(pair) => pair,
            None => continue,
        };

        let delta = rem_a.min(rem_b);

        let a_ok = state
            .get_agent(&sender)
            .map(|a| a.within_limits(&receiver, delta))
            .unwrap_or(false);
        let b_ok = state
            .get_agent(&receiver)
            .map(|b| b.within_limits(&sender, delta))
            .unwrap_or(false);
        if !a_ok || !b_ok {
            debug!(tick, %sender, %receiver, delta, "bilateral offset blocked by limits");
            continue;
        }

        apply_leg(state, deferred, &sender, &receiver, &tx_id, delta, tick);
        apply_leg(state, deferred, &receiver, &sender, &rev_id, delta, tick);

        result.bilateral_offsets += 1;
        result.released_value += delta * 2;
        result.events.push(Event::LsmBilateralOffset {
            tick,
            agent_a: sender,
            agent_b: receiver,
            tx_id_a: tx_id,
            tx_id_b: rev_id,
            amount_a: rem_a,
            amount_b: rem_b,
            offset: delta,
        });
        progress = true;
    }

    progress
}

/// Remaining amount of a still-queued, still-pending obligation.
fn live_remaining(state: &SimulationState, tx_id: &str) -> Option<i64> {
    if !state.rtgs_queue_contains(tx_id) {
        return None;
    }
    state
        .get_transaction(tx_id)
        .filter(|tx| tx.is_pending() && tx.remaining_amount() > 0)
        .map(|tx| tx.remaining_amount())
}

/// Apply one netting leg: debit the sender, credit the receiver through
/// the ledger, shrink the obligation, and drop it from the queue when it
/// reaches zero.
fn apply_leg(
    state: &mut SimulationState,
    deferred: &mut Option<&mut DeferredLedger>,
    sender: &str,
    receiver: &str,
    tx_id: &str,
    delta: i64,
    tick: usize,
) {
    if let Some(agent) = state.get_agent_mut(sender) {
        agent.apply_net_adjustment(-delta);
        agent.record_outflow(receiver, delta);
    }
    credit_receiver(state, deferred, receiver, delta, tx_id);
    let settled = match state.get_transaction_mut(tx_id) {
        Some(tx) => {
            tx.apply_offset(delta, tick)
                .expect("offset bounded by remaining amount");
            tx.is_fully_settled()
        }
        None => false,
    };
    if settled {
        state.remove_from_rtgs_queue(tx_id);
    }
}

// ----------------------------------------------------------------------
// Multilateral cycle netting
// ----------------------------------------------------------------------

/// Aggregated payment graph over the queue: ordered pair → obligations,
/// sorted by tx id.
fn build_graph(state: &SimulationState) -> BTreeMap<(String, String), Vec<String>> {
    let mut edges: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
    for tx_id in state.rtgs_queue() {
        if let Some(tx) = state.get_transaction(tx_id) {
            if tx.is_pending() && tx.remaining_amount() > 0 {
                edges
                    .entry((tx.sender_id().to_string(), tx.receiver_id().to_string()))
                    .or_default()
                    .push(tx_id.clone());
            }
        }
    }
    for txs in edges.values_mut() {
        txs.sort();
    }
    edges
}

/// Enumerate simple cycles of length ≤ `max_len` edges.
///
/// Each cycle is discovered exactly once, rooted at its minimum agent id
/// (the DFS never descends to a node below the root), so the returned
/// node paths are already canonical and in lexicographic order.
fn find_cycles(
    edges: &BTreeMap<(String, String), Vec<String>>,
    max_len: usize,
) -> Vec<Vec<String>> {
    // Adjacency in sorted order.
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (from, to) in edges.keys() {
        adjacency.entry(from.as_str()).or_default().push(to.as_str());
    }
    for neighbors in adjacency.values_mut() {
        neighbors.sort();
        neighbors.dedup();
    }

    let mut cycles = Vec::new();
    let roots: Vec<&str> = adjacency.keys().copied().collect();

    for root in roots {
        let mut path = vec![root];
        let mut visited: BTreeSet<&str> = [root].into_iter().collect();
        dfs(root, root, &adjacency, max_len, &mut path, &mut visited, &mut cycles);
    }

    cycles
}

fn dfs<'a>(
    root: &'a str,
    current: &'a str,
    adjacency: &BTreeMap<&'a str, Vec<&'a str>>,
    max_len: usize,
    path: &mut Vec<&'a str>,
    visited: &mut BTreeSet<&'a str>,
    cycles: &mut Vec<Vec<String>>,
) {
    let neighbors = match adjacency.get(current) {
        Some(n) => n,
        None => return,
    };
    for &next in neighbors {
        if next == root {
            // Closing edge; cycles of length 2 belong to the bilateral pass.
            if path.len() >= 3 {
                cycles.push(path.iter().map(|s| s.to_string()).collect());
            }
            continue;
        }
        // Rooting at the minimum agent: never descend below the root.
        if next < root || visited.contains(next) || path.len() >= max_len {
            continue;
        }
        path.push(next);
        visited.insert(next);
        dfs(root, next, adjacency, max_len, path, visited, cycles);
        visited.remove(next);
        path.pop();
    }
}

/// Find and apply cycles until the per-tick budget runs out.
fn cycle_pass(
    state: &mut SimulationState,
    config: &LsmConfig,
    tick: usize,
    deferred: &mut Option<&mut DeferredLedger>,
    cycles_budget: &mut usize,
    result: &mut LsmPassResult,
) -> bool {
    let edges = build_graph(state);
    let cycles = find_cycles(&edges, config.max_cycle_length);
    let mut progress = false;

    for cycle in cycles {
        if *cycles_budget == 0 {
            break;
        }
        if apply_cycle(state, tick, deferred, &cycle, result) {
            *cycles_budget -= 1;
            progress = true;
        }
    }

    progress
}

/// Apply Δ = min edge weight around one cycle. Returns false when the
/// cycle is stale (an edge drained since enumeration) or a limit blocks
/// it.
fn apply_cycle(
    state: &mut SimulationState,
    tick: usize,
    deferred: &mut Option<&mut DeferredLedger>,
    cycle: &[String],
    result: &mut LsmPassResult,
) -> bool {
    let edge_pairs: Vec<(String, String)> = cycle
        .iter()
        .zip(cycle.iter().cycle().skip(1))
        .map(|(a, b)| (a.clone(), b.clone()))
        .collect();

    // Re-read live obligations per edge; the queue has moved since the
    // graph was built.
    let mut edge_txs: Vec<Vec<(String, i64)>> = Vec::with_capacity(edge_pairs.len());
    let mut delta = i64::MAX;
    for (from, to) in &edge_pairs {
        let mut txs: Vec<(String, i64)> = state
            .rtgs_queue()
            .iter()
            .filter_map(|id| state.get_transaction(id))
            .filter(|tx| {
                tx.sender_id() == from
                    && tx.receiver_id() == to
                    && tx.is_pending()
                    && tx.remaining_amount() > 0
            })
            .map(|tx| (tx.id().to_string(), tx.remaining_amount()))
            .collect();
        txs.sort();
        let weight: i64 = txs.iter().map(|(_, rem)| rem).sum();
        if weight == 0 {
            return false;
        }
        delta = delta.min(weight);
        edge_txs.push(txs);
    }

    // Exposure limits: every edge sender sends Δ to its receiver.
    for (from, to) in &edge_pairs {
        let ok = state
            .get_agent(from)
            .map(|a| a.within_limits(to, delta))
            .unwrap_or(false);
        if !ok {
            debug!(tick, %from, %to, delta, "cycle blocked by limits");
            return false;
        }
    }

    // Apply Δ edge by edge, consuming obligations in tx-id order.
    let mut touched_tx_ids = Vec::new();
    for ((from, to), txs) in edge_pairs.iter().zip(edge_txs.iter()) {
        if let Some(agent) = state.get_agent_mut(from) {
            agent.apply_net_adjustment(-delta);
            agent.record_outflow(to, delta);
        }
        let mut left = delta;
        for (tx_id, remaining) in txs {
            if left == 0 {
                break;
            }
            let take = left.min(*remaining);
            credit_receiver(state, deferred, to, take, tx_id);
            let settled = match state.get_transaction_mut(tx_id) {
                Some(tx) => {
                    tx.apply_offset(take, tick)
                        .expect("offset bounded by remaining amount");
                    tx.is_fully_settled()
                }
                None => false,
            };
            if settled {
                state.remove_from_rtgs_queue(tx_id);
            }
            touched_tx_ids.push(tx_id.clone());
            left -= take;
        }
    }

    let mut closed = cycle.to_vec();
    closed.push(cycle[0].clone());

    result.cycles_settled += 1;
    result.released_value += delta * edge_pairs.len() as i64;
    result.events.push(Event::LsmCycleSettlement {
        tick,
        cycle: closed,
        tx_ids: touched_tx_ids,
        amount: delta,
    });

    true
}
