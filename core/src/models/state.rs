//! Complete simulation state: agents, obligations, and the central queue.
//!
//! # Critical invariants
//!
//! 1. Transaction ids are unique; every queued id resolves to a stored
//!    transaction.
//! 2. An obligation sits in at most one queue (a sender's Q1 or the
//!    central Q2) at a time.
//! 3. Iteration over agents is by sorted id (BTreeMap), so every scan is
//!    deterministic.

use crate::models::agent::Agent;
use crate::models::transaction::Transaction;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct SimulationState {
    /// All agents, keyed by id
    agents: BTreeMap<String, Agent>,

    /// All obligations ever created, keyed by id
    transactions: BTreeMap<String, Transaction>,

    /// Queue 2: released obligations awaiting settlement.
    /// Kept sorted by the (declared priority desc, submission tick,
    /// tx id) key before each settlement pass.
    rtgs_queue: Vec<String>,
}

impl SimulationState {
    pub fn new(agents: Vec<Agent>) -> Self {
        let agents = agents
            .into_iter()
            .map(|a| (a.id().to_string(), a))
            .collect();
        Self {
            agents,
            transactions: BTreeMap::new(),
            rtgs_queue: Vec::new(),
        }
    }

    /// Rebuild from checkpointed parts, validating queue references.
    pub fn from_parts(
        agents: BTreeMap<String, Agent>,
        transactions: BTreeMap<String, Transaction>,
        rtgs_queue: Vec<String>,
    ) -> Result<Self, String> {
        for tx_id in &rtgs_queue {
            if !transactions.contains_key(tx_id) {
                return Err(format!("RTGS queue references unknown transaction {}", tx_id));
            }
        }
        for (agent_id, agent) in &agents {
            for tx_id in agent.outgoing_queue() {
                if !transactions.contains_key(tx_id) {
                    return Err(format!(
                        "agent {} queue references unknown transaction {}",
                        agent_id, tx_id
                    ));
                }
            }
        }
        Ok(Self {
            agents,
            transactions,
            rtgs_queue,
        })
    }

    // ------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------

    pub fn get_agent(&self, id: &str) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn get_agent_mut(&mut self, id: &str) -> Option<&mut Agent> {
        self.agents.get_mut(id)
    }

    pub fn agents(&self) -> &BTreeMap<String, Agent> {
        &self.agents
    }

    /// Agent ids in sorted order.
    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    pub fn total_balance(&self) -> i64 {
        self.agents.values().map(|a| a.balance()).sum()
    }

    /// Ids of agents with a non-empty Q1, in sorted order.
    pub fn agents_with_queued_transactions(&self) -> Vec<String> {
        self.agents
            .iter()
            .filter(|(_, a)| a.outgoing_queue_size() > 0)
            .map(|(id, _)| id.clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub fn get_transaction(&self, id: &str) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    pub fn get_transaction_mut(&mut self, id: &str) -> Option<&mut Transaction> {
        self.transactions.get_mut(id)
    }

    pub fn transactions(&self) -> &BTreeMap<String, Transaction> {
        &self.transactions
    }

    pub fn num_transactions(&self) -> usize {
        self.transactions.len()
    }

    /// Store a new obligation.
    ///
    /// # Panics
    /// Panics on a duplicate id; ids come from a monotone counter so a
    /// duplicate means a kernel bug, not bad input.
    pub fn add_transaction(&mut self, tx: Transaction) {
        let id = tx.id().to_string();
        assert!(
            !self.transactions.contains_key(&id),
            "transaction id {} already exists",
            id
        );
        self.transactions.insert(id, tx);
    }

    // ------------------------------------------------------------------
    // Queue 2
    // ------------------------------------------------------------------

    pub fn rtgs_queue(&self) -> &[String] {
        &self.rtgs_queue
    }

    pub fn rtgs_queue_mut(&mut self) -> &mut Vec<String> {
        &mut self.rtgs_queue
    }

    pub fn rtgs_queue_size(&self) -> usize {
        self.rtgs_queue.len()
    }

    pub fn rtgs_queue_contains(&self, tx_id: &str) -> bool {
        self.rtgs_queue.iter().any(|id| id == tx_id)
    }

    /// Push into Q2.
    ///
    /// # Panics
    /// Panics if the id is unknown (kernel bug).
    pub fn queue_in_rtgs(&mut self, tx_id: String) {
        assert!(
            self.transactions.contains_key(&tx_id),
            "cannot queue unknown transaction {}",
            tx_id
        );
        self.rtgs_queue.push(tx_id);
    }

    pub fn remove_from_rtgs_queue(&mut self, tx_id: &str) -> bool {
        let before = self.rtgs_queue.len();
        self.rtgs_queue.retain(|id| id != tx_id);
        self.rtgs_queue.len() < before
    }

    /// Order Q2 by (declared priority descending, submission tick
    /// ascending, tx id ascending). The key is total, so the result is a
    /// pure function of the queue's membership.
    pub fn sort_rtgs_queue(&mut self) {
        let mut keyed: Vec<(u8, usize, String)> = self
            .rtgs_queue
            .drain(..)
            .map(|tx_id| {
                let tx = self
                    .transactions
                    .get(&tx_id)
                    .expect("queued transaction must exist");
                (
                    tx.declared_priority(),
                    tx.submission_tick().unwrap_or(usize::MAX),
                    tx_id,
                )
            })
            .collect();
        keyed.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
        self.rtgs_queue = keyed.into_iter().map(|(_, _, id)| id).collect();
    }

    /// Total remaining value queued in Q2 (cents).
    pub fn rtgs_queue_value(&self) -> i64 {
        self.rtgs_queue
            .iter()
            .filter_map(|id| self.transactions.get(id))
            .map(|tx| tx.remaining_amount())
            .sum()
    }

    // ------------------------------------------------------------------
    // Queue 1 aggregates
    // ------------------------------------------------------------------

    pub fn total_internal_queue_size(&self) -> usize {
        self.agents.values().map(|a| a.outgoing_queue_size()).sum()
    }

    /// Total remaining value in one agent's Q1 (cents).
    pub fn agent_queue_value(&self, agent_id: &str) -> i64 {
        self.agents
            .get(agent_id)
            .map(|agent| {
                agent
                    .outgoing_queue()
                    .iter()
                    .filter_map(|id| self.transactions.get(id))
                    .map(|tx| tx.remaining_amount())
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Number of this agent's obligations sitting in Q2.
    pub fn agent_rtgs_queue_count(&self, agent_id: &str) -> usize {
        self.rtgs_queue
            .iter()
            .filter_map(|id| self.transactions.get(id))
            .filter(|tx| tx.sender_id() == agent_id)
            .count()
    }

    /// All unsettled obligation ids currently queued anywhere, sorted.
    pub fn all_queued_tx_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .agents
            .values()
            .flat_map(|a| a.outgoing_queue().iter().cloned())
            .chain(self.rtgs_queue.iter().cloned())
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank(id: &str, balance: i64) -> Agent {
        Agent::new(id.to_string(), balance, 0)
    }

    fn tx(id: &str, sender: &str, receiver: &str, amount: i64) -> Transaction {
        Transaction::new(
            id.to_string(),
            sender.to_string(),
            receiver.to_string(),
            amount,
            0,
            100,
        )
    }

    #[test]
    fn test_total_balance() {
        let state = SimulationState::new(vec![bank("A", 1_000), bank("B", 2_000)]);
        assert_eq!(state.total_balance(), 3_000);
    }

    #[test]
    fn test_queue_ordering_key() {
        let mut state = SimulationState::new(vec![bank("A", 0), bank("B", 0)]);

        let mut t1 = tx("tx_3", "A", "B", 100);
        t1.mark_submitted(Some(5), 2);
        let mut t2 = tx("tx_1", "A", "B", 100);
        t2.mark_submitted(Some(9), 3);
        let mut t3 = tx("tx_2", "A", "B", 100);
        t3.mark_submitted(Some(5), 2);

        for t in [t1, t2, t3] {
            let id = t.id().to_string();
            state.add_transaction(t);
            state.queue_in_rtgs(id);
        }
        state.sort_rtgs_queue();

        // Priority 9 first; then priority 5 at tick 2 tie-broken by id.
        assert_eq!(state.rtgs_queue(), &["tx_1", "tx_2", "tx_3"]);
    }

    #[test]
    fn test_queue_value() {
        let mut state = SimulationState::new(vec![bank("A", 0)]);
        for (id, amount) in [("tx_1", 1_000), ("tx_2", 2_500)] {
            let mut t = tx(id, "A", "B", amount);
            t.mark_submitted(None, 0);
            let id = t.id().to_string();
            state.add_transaction(t);
            state.queue_in_rtgs(id);
        }
        assert_eq!(state.rtgs_queue_value(), 3_500);
    }

    #[test]
    fn test_from_parts_rejects_orphans() {
        let agents: BTreeMap<String, Agent> =
            [("A".to_string(), bank("A", 0))].into_iter().collect();
        let result = SimulationState::from_parts(
            agents,
            BTreeMap::new(),
            vec!["tx_missing".to_string()],
        );
        assert!(result.is_err());
    }

    #[test]
    #[should_panic(expected = "already exists")]
    fn test_duplicate_transaction_panics() {
        let mut state = SimulationState::new(vec![bank("A", 0)]);
        state.add_transaction(tx("tx_1", "A", "B", 100));
        state.add_transaction(tx("tx_1", "A", "B", 100));
    }
}
