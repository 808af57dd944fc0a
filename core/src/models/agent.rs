//! Bank agent model.
//!
//! An agent holds a settlement account at the central bank:
//! - Balance (i64 cents; negative means intraday overdraft)
//! - Unsecured credit cap (overdraft allowed without collateral)
//! - Posted collateral with a haircut; backing value extends the overdraft
//! - An internal queue (Q1) of withheld outgoing obligations
//! - Optional bilateral/multilateral outflow limits with daily counters
//!
//! CRITICAL: all money values are i64 (cents).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AgentError {
    #[error("insufficient liquidity: required {required}, available {available}")]
    InsufficientLiquidity { required: i64, available: i64 },
}

/// Default collateral haircut (2%), in line with T2/CLM practice.
pub const DEFAULT_COLLATERAL_HAIRCUT: f64 = 0.02;

/// A bank participating in the payment system.
///
/// # Example
/// ```
/// use clearsim_core::models::Agent;
///
/// let mut agent = Agent::new("BANK_A".to_string(), 1_000_000, 500_000);
/// assert_eq!(agent.available_liquidity(), 1_500_000);
/// agent.debit(1_200_000).unwrap();
/// assert_eq!(agent.balance(), -200_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    id: String,

    /// Settlement account balance (cents); negative = drawing credit
    balance: i64,

    /// Unsecured intraday overdraft cap (cents, non-negative)
    unsecured_cap: i64,

    /// Collateral currently posted (cents, non-negative)
    posted_collateral: i64,

    /// Haircut applied when converting collateral to credit capacity
    collateral_haircut: f64,

    /// Total collateralizable assets; None = 10 × unsecured_cap heuristic
    max_collateral_capacity: Option<i64>,

    /// Queue 1: ids of withheld outgoing obligations
    outgoing_queue: Vec<String>,

    /// Per-counterparty daily outflow caps (cents); empty = unlimited
    bilateral_limits: BTreeMap<String, i64>,

    /// Total daily outflow cap across all counterparties
    multilateral_limit: Option<i64>,

    /// Daily outflow already recorded per counterparty
    bilateral_outflows: BTreeMap<String, i64>,

    /// Daily total outflow already recorded
    total_outflow: i64,
}

impl Agent {
    /// Create a new agent.
    ///
    /// # Panics
    /// Panics if `unsecured_cap` is negative; configuration validation
    /// rejects such configs before agents are built.
    pub fn new(id: String, balance: i64, unsecured_cap: i64) -> Self {
        assert!(unsecured_cap >= 0, "unsecured_cap must be non-negative");
        Self {
            id,
            balance,
            unsecured_cap,
            posted_collateral: 0,
            collateral_haircut: DEFAULT_COLLATERAL_HAIRCUT,
            max_collateral_capacity: None,
            outgoing_queue: Vec::new(),
            bilateral_limits: BTreeMap::new(),
            multilateral_limit: None,
            bilateral_outflows: BTreeMap::new(),
            total_outflow: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn unsecured_cap(&self) -> i64 {
        self.unsecured_cap
    }

    pub fn set_unsecured_cap(&mut self, cap: i64) {
        assert!(cap >= 0, "unsecured_cap must be non-negative");
        self.unsecured_cap = cap;
    }

    // ------------------------------------------------------------------
    // Collateral
    // ------------------------------------------------------------------

    pub fn posted_collateral(&self) -> i64 {
        self.posted_collateral
    }

    pub fn collateral_haircut(&self) -> f64 {
        self.collateral_haircut
    }

    pub fn set_collateral_haircut(&mut self, haircut: f64) {
        assert!((0.0..=1.0).contains(&haircut), "haircut must be in [0, 1]");
        self.collateral_haircut = haircut;
    }

    pub fn set_posted_collateral(&mut self, amount: i64) {
        assert!(amount >= 0, "posted collateral must be non-negative");
        self.posted_collateral = amount;
    }

    pub fn set_max_collateral_capacity(&mut self, capacity: Option<i64>) {
        self.max_collateral_capacity = capacity;
    }

    /// Total collateral this agent could ever post.
    pub fn max_collateral_capacity(&self) -> i64 {
        self.max_collateral_capacity
            .unwrap_or(self.unsecured_cap.saturating_mul(10))
    }

    pub fn max_collateral_capacity_setting(&self) -> Option<i64> {
        self.max_collateral_capacity
    }

    pub fn remaining_collateral_capacity(&self) -> i64 {
        (self.max_collateral_capacity() - self.posted_collateral).max(0)
    }

    /// Credit capacity the posted collateral backs after the haircut:
    /// `floor(posted × (1 − haircut))`.
    pub fn collateral_backing(&self) -> i64 {
        ((self.posted_collateral as f64) * (1.0 - self.collateral_haircut)).floor() as i64
    }

    /// Post collateral, clamped to remaining capacity. Returns the amount
    /// actually posted.
    pub fn post_collateral(&mut self, amount: i64) -> i64 {
        let actual = amount.max(0).min(self.remaining_collateral_capacity());
        self.posted_collateral += actual;
        actual
    }

    /// Release collateral, clamped so the remaining backing still covers
    /// any overdraft in excess of the unsecured cap. Returns the amount
    /// actually released.
    pub fn release_collateral(&mut self, amount: i64) -> i64 {
        let secured_drawn = ((-self.balance) - self.unsecured_cap).max(0);
        let releasable = if secured_drawn > 0 {
            // Keep enough posted that backing >= secured_drawn.
            let haircut_factor = 1.0 - self.collateral_haircut;
            let required_posted = if haircut_factor > 0.0 {
                ((secured_drawn as f64) / haircut_factor).ceil() as i64
            } else {
                i64::MAX
            };
            (self.posted_collateral - required_posted).max(0)
        } else {
            self.posted_collateral
        };
        let actual = amount.max(0).min(releasable);
        self.posted_collateral -= actual;
        actual
    }

    // ------------------------------------------------------------------
    // Liquidity
    // ------------------------------------------------------------------

    /// Maximum the balance may go negative: unsecured cap plus
    /// collateral backing.
    pub fn allowed_overdraft(&self) -> i64 {
        self.unsecured_cap + self.collateral_backing()
    }

    /// Liquidity available for the next outgoing payment:
    /// balance + unsecured cap + collateral backing.
    pub fn available_liquidity(&self) -> i64 {
        self.balance + self.allowed_overdraft()
    }

    pub fn can_cover(&self, amount: i64) -> bool {
        amount <= self.available_liquidity()
    }

    /// Debit the account for an outgoing settlement.
    pub fn debit(&mut self, amount: i64) -> Result<(), AgentError> {
        assert!(amount >= 0, "debit amount must be non-negative");
        if !self.can_cover(amount) {
            return Err(AgentError::InsufficientLiquidity {
                required: amount,
                available: self.available_liquidity(),
            });
        }
        self.balance -= amount;
        Ok(())
    }

    /// Credit the account for an incoming settlement.
    pub fn credit(&mut self, amount: i64) {
        assert!(amount >= 0, "credit amount must be non-negative");
        self.balance += amount;
    }

    /// Apply a signed balance adjustment without a liquidity check.
    ///
    /// Used by the netting paths, whose feasibility is established over
    /// net positions before any balance moves.
    pub fn apply_net_adjustment(&mut self, delta: i64) {
        self.balance += delta;
    }

    pub fn is_in_overdraft(&self) -> bool {
        self.balance < 0
    }

    // ------------------------------------------------------------------
    // Queue 1
    // ------------------------------------------------------------------

    pub fn outgoing_queue(&self) -> &[String] {
        &self.outgoing_queue
    }

    pub fn outgoing_queue_size(&self) -> usize {
        self.outgoing_queue.len()
    }

    pub fn queue_outgoing(&mut self, tx_id: String) {
        self.outgoing_queue.push(tx_id);
    }

    pub fn remove_from_queue(&mut self, tx_id: &str) -> bool {
        let before = self.outgoing_queue.len();
        self.outgoing_queue.retain(|id| id != tx_id);
        self.outgoing_queue.len() < before
    }

    pub fn replace_outgoing_queue(&mut self, queue: Vec<String>) {
        self.outgoing_queue = queue;
    }

    // ------------------------------------------------------------------
    // Exposure limits
    // ------------------------------------------------------------------

    pub fn set_bilateral_limits(&mut self, limits: BTreeMap<String, i64>) {
        self.bilateral_limits = limits;
    }

    pub fn bilateral_limits(&self) -> &BTreeMap<String, i64> {
        &self.bilateral_limits
    }

    pub fn set_multilateral_limit(&mut self, limit: Option<i64>) {
        self.multilateral_limit = limit;
    }

    pub fn multilateral_limit(&self) -> Option<i64> {
        self.multilateral_limit
    }

    pub fn bilateral_outflows(&self) -> &BTreeMap<String, i64> {
        &self.bilateral_outflows
    }

    pub fn total_outflow(&self) -> i64 {
        self.total_outflow
    }

    /// Would sending `amount` more to `counterparty` stay within both the
    /// bilateral and the multilateral limit?
    pub fn within_limits(&self, counterparty: &str, amount: i64) -> bool {
        if let Some(cap) = self.bilateral_limits.get(counterparty) {
            let sent = self.bilateral_outflows.get(counterparty).copied().unwrap_or(0);
            if sent + amount > *cap {
                return false;
            }
        }
        if let Some(cap) = self.multilateral_limit {
            if self.total_outflow + amount > cap {
                return false;
            }
        }
        true
    }

    /// Record a settled outflow against the daily counters.
    pub fn record_outflow(&mut self, counterparty: &str, amount: i64) {
        *self
            .bilateral_outflows
            .entry(counterparty.to_string())
            .or_insert(0) += amount;
        self.total_outflow += amount;
    }

    /// Reset daily outflow counters (end of day).
    pub fn reset_daily_outflows(&mut self) {
        self.bilateral_outflows.clear();
        self.total_outflow = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_liquidity_includes_collateral_backing() {
        let mut agent = Agent::new("BANK_A".to_string(), 100_000, 50_000);
        agent.set_posted_collateral(100_000);
        // backing = floor(100_000 * 0.98) = 98_000
        assert_eq!(agent.collateral_backing(), 98_000);
        assert_eq!(agent.available_liquidity(), 248_000);
    }

    #[test]
    fn test_debit_into_overdraft() {
        let mut agent = Agent::new("BANK_A".to_string(), 100_000, 50_000);
        agent.debit(120_000).unwrap();
        assert_eq!(agent.balance(), -20_000);
        assert!(agent.is_in_overdraft());
    }

    #[test]
    fn test_debit_beyond_liquidity_rejected() {
        let mut agent = Agent::new("BANK_A".to_string(), 100_000, 0);
        let err = agent.debit(100_001).unwrap_err();
        assert_eq!(
            err,
            AgentError::InsufficientLiquidity {
                required: 100_001,
                available: 100_000,
            }
        );
        assert_eq!(agent.balance(), 100_000);
    }

    #[test]
    fn test_post_collateral_clamped_to_capacity() {
        let mut agent = Agent::new("BANK_A".to_string(), 0, 10_000);
        // Heuristic capacity: 10 × 10_000 = 100_000
        assert_eq!(agent.post_collateral(150_000), 100_000);
        assert_eq!(agent.posted_collateral(), 100_000);
        assert_eq!(agent.remaining_collateral_capacity(), 0);
    }

    #[test]
    fn test_release_collateral_keeps_overdraft_backed() {
        let mut agent = Agent::new("BANK_A".to_string(), 0, 0);
        agent.set_collateral_haircut(0.0);
        agent.set_max_collateral_capacity(Some(200_000));
        agent.post_collateral(100_000);
        agent.debit(60_000).unwrap(); // balance -60_000, fully secured

        // Only 40_000 of the posted 100_000 is releasable.
        assert_eq!(agent.release_collateral(100_000), 40_000);
        assert_eq!(agent.posted_collateral(), 60_000);
    }

    #[test]
    fn test_limits_checked_and_recorded() {
        let mut agent = Agent::new("BANK_A".to_string(), 1_000_000, 0);
        let mut limits = BTreeMap::new();
        limits.insert("BANK_B".to_string(), 100_000);
        agent.set_bilateral_limits(limits);
        agent.set_multilateral_limit(Some(150_000));

        assert!(agent.within_limits("BANK_B", 100_000));
        agent.record_outflow("BANK_B", 80_000);
        assert!(!agent.within_limits("BANK_B", 30_000));
        assert!(agent.within_limits("BANK_C", 70_000));
        assert!(!agent.within_limits("BANK_C", 80_000)); // multilateral

        agent.reset_daily_outflows();
        assert!(agent.within_limits("BANK_B", 100_000));
    }

    #[test]
    #[should_panic(expected = "unsecured_cap must be non-negative")]
    fn test_negative_cap_panics() {
        Agent::new("BANK_A".to_string(), 0, -1);
    }
}
