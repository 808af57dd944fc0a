//! Payment obligation model.
//!
//! An obligation is a time-bounded payment from one agent to another:
//! - Amounts are i64 cents, original and remaining
//! - Arrival and deadline ticks bound its life
//! - Dual priority: the internal priority the owning agent reasons with,
//!   and the declared priority fixed when the obligation is submitted to
//!   the central queue
//! - A divisible obligation may be split by policy into child obligations
//!
//! CRITICAL: all money values are i64 (cents).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal/lifecycle status of an obligation.
///
/// Queue membership (agent queue vs. central RTGS queue) is tracked by the
/// queues themselves; overdue is an orthogonal marker (`overdue_since`),
/// observable by policies while the obligation keeps waiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    /// Waiting to settle (in the sender's queue or the central queue).
    Pending,

    /// Fully settled.
    Settled {
        /// Tick of final settlement
        tick: usize,
    },

    /// Cancelled by an external operation.
    Cancelled { tick: usize },

    /// Replaced by split children; the parent never settles itself.
    Replaced {
        /// Ids of the child obligations that carry the value forward
        child_ids: Vec<String>,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum TransactionError {
    #[error("cannot partially settle indivisible transaction")]
    IndivisibleTransaction,

    #[error("settlement amount {amount} exceeds remaining amount {remaining}")]
    AmountExceedsRemaining { amount: i64, remaining: i64 },

    #[error("transaction already fully settled")]
    AlreadySettled,

    #[error("transaction is not pending")]
    NotPending,

    #[error("settlement amount must be positive")]
    InvalidAmount,
}

/// A payment obligation between two agents.
///
/// # Example
/// ```
/// use clearsim_core::models::Transaction;
///
/// let tx = Transaction::new(
///     "tx_00000001".to_string(),
///     "BANK_A".to_string(),
///     "BANK_B".to_string(),
///     100_000, // $1,000.00
///     10,
///     50,
/// )
/// .with_priority(8)
/// .divisible();
/// assert_eq!(tx.remaining_amount(), 100_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    id: String,
    sender_id: String,
    receiver_id: String,

    /// Original amount (cents)
    amount: i64,
    /// Amount still owed (cents)
    remaining_amount: i64,

    arrival_tick: usize,
    deadline_tick: usize,

    /// Internal priority the owning agent reasons with (0-10)
    priority: u8,
    /// Priority declared on submission to the central queue; fixed until
    /// withdrawn and resubmitted
    declared_priority: Option<u8>,
    /// Tick of the most recent submission to the central queue
    submission_tick: Option<usize>,

    is_divisible: bool,

    /// Parent obligation id when this is a split child
    parent_id: Option<String>,

    status: TxStatus,

    /// First tick at which current_tick exceeded the deadline
    overdue_since: Option<usize>,
}

impl Transaction {
    /// Create a new pending obligation.
    ///
    /// # Panics
    /// Panics if `amount <= 0` or `deadline_tick <= arrival_tick`; both are
    /// validated at the submission boundary before construction.
    pub fn new(
        id: String,
        sender_id: String,
        receiver_id: String,
        amount: i64,
        arrival_tick: usize,
        deadline_tick: usize,
    ) -> Self {
        assert!(amount > 0, "amount must be positive");
        assert!(
            deadline_tick > arrival_tick,
            "deadline must be after arrival"
        );
        Self {
            id,
            sender_id,
            receiver_id,
            amount,
            remaining_amount: amount,
            arrival_tick,
            deadline_tick,
            priority: 5,
            declared_priority: None,
            submission_tick: None,
            is_divisible: false,
            parent_id: None,
            status: TxStatus::Pending,
            overdue_since: None,
        }
    }

    /// Create a split child. Children inherit counterparty, deadline and
    /// (by construction at the call site) priority; they are never
    /// themselves divisible.
    pub fn new_child(
        id: String,
        parent: &Transaction,
        amount: i64,
        arrival_tick: usize,
    ) -> Self {
        let mut child = Self::new(
            id,
            parent.sender_id.clone(),
            parent.receiver_id.clone(),
            amount,
            arrival_tick,
            parent.deadline_tick,
        );
        child.priority = parent.priority;
        child.parent_id = Some(parent.id.clone());
        child
    }

    /// Set internal priority (builder). Capped at 10.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(10);
        self
    }

    /// Mark divisible (builder).
    pub fn divisible(mut self) -> Self {
        self.is_divisible = true;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn receiver_id(&self) -> &str {
        &self.receiver_id
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn remaining_amount(&self) -> i64 {
        self.remaining_amount
    }

    pub fn settled_amount(&self) -> i64 {
        self.amount - self.remaining_amount
    }

    pub fn arrival_tick(&self) -> usize {
        self.arrival_tick
    }

    pub fn deadline_tick(&self) -> usize {
        self.deadline_tick
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority.min(10);
    }

    /// Priority declared at submission; falls back to the internal
    /// priority while the obligation has never been submitted.
    pub fn declared_priority(&self) -> u8 {
        self.declared_priority.unwrap_or(self.priority)
    }

    pub fn submission_tick(&self) -> Option<usize> {
        self.submission_tick
    }

    pub fn is_divisible(&self) -> bool {
        self.is_divisible
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn status(&self) -> &TxStatus {
        &self.status
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, TxStatus::Pending)
    }

    pub fn is_fully_settled(&self) -> bool {
        matches!(self.status, TxStatus::Settled { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.status, TxStatus::Cancelled { .. })
    }

    pub fn is_overdue(&self) -> bool {
        self.overdue_since.is_some()
    }

    pub fn overdue_since(&self) -> Option<usize> {
        self.overdue_since
    }

    /// True once `current_tick` is strictly past the deadline.
    pub fn is_past_deadline(&self, current_tick: usize) -> bool {
        current_tick > self.deadline_tick
    }

    /// Record the submission to the central queue, fixing the declared
    /// priority for ordering. `None` declares the internal priority.
    pub fn mark_submitted(&mut self, declared_priority: Option<u8>, tick: usize) {
        self.declared_priority = Some(declared_priority.unwrap_or(self.priority).min(10));
        self.submission_tick = Some(tick);
    }

    /// Clear submission state on withdrawal back to the agent's queue.
    pub fn clear_submission(&mut self) {
        self.declared_priority = None;
        self.submission_tick = None;
    }

    /// Mark the first tick past the deadline. Returns false if already
    /// marked (the deadline penalty must fire exactly once).
    pub fn mark_overdue(&mut self, tick: usize) -> bool {
        if self.overdue_since.is_some() {
            return false;
        }
        self.overdue_since = Some(tick);
        true
    }

    /// Settle `amount` cents at `tick`.
    ///
    /// Partial settlement requires the divisible flag; netting reductions
    /// go through [`Transaction::apply_offset`] instead, which is not
    /// gated on divisibility.
    pub fn settle(&mut self, amount: i64, tick: usize) -> Result<(), TransactionError> {
        if amount < self.remaining_amount && !self.is_divisible {
            return Err(TransactionError::IndivisibleTransaction);
        }
        self.reduce(amount, tick)
    }

    /// Reduce the remaining amount by a netting offset of `amount` cents.
    ///
    /// LSM offsets shrink obligations regardless of divisibility; the
    /// divisible flag only governs the policy Split action.
    pub fn apply_offset(&mut self, amount: i64, tick: usize) -> Result<(), TransactionError> {
        self.reduce(amount, tick)
    }

    fn reduce(&mut self, amount: i64, tick: usize) -> Result<(), TransactionError> {
        if amount <= 0 {
            return Err(TransactionError::InvalidAmount);
        }
        match self.status {
            TxStatus::Settled { .. } => return Err(TransactionError::AlreadySettled),
            TxStatus::Cancelled { .. } | TxStatus::Replaced { .. } => {
                return Err(TransactionError::NotPending)
            }
            TxStatus::Pending => {}
        }
        if amount > self.remaining_amount {
            return Err(TransactionError::AmountExceedsRemaining {
                amount,
                remaining: self.remaining_amount,
            });
        }

        self.remaining_amount -= amount;
        if self.remaining_amount == 0 {
            self.status = TxStatus::Settled { tick };
        }
        Ok(())
    }

    /// Cancel the obligation. Returns false when it is no longer pending.
    pub fn cancel(&mut self, tick: usize) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = TxStatus::Cancelled { tick };
        true
    }

    /// Retire the parent of a split, pointing at the children that carry
    /// its value forward.
    pub fn mark_replaced(&mut self, child_ids: Vec<String>) {
        self.status = TxStatus::Replaced { child_ids };
    }
}
