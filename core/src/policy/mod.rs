//! Agent decision policies.
//!
//! Each agent carries a [`tree::PolicyBundle`]: a payment tree evaluated
//! per obligation, and optional bank/collateral trees evaluated once per
//! tick. The engine turns tree evaluations into the typed decisions below
//! and applies them; policies themselves never mutate state.

pub mod tree;

pub use tree::eval::PolicyError;
pub use tree::types::{ActionKind, PolicyBundle, TreeKind, TreeNode};
pub use tree::validate::{validate_policy, ParamSpec, PolicyViolation, ScenarioConstraints, ValidationResult};

/// How a Hold-family action was phrased, kept for the decision record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldKind {
    Hold,
    Queue,
    Defer,
}

impl HoldKind {
    pub fn name(self) -> &'static str {
        match self {
            HoldKind::Hold => "Hold",
            HoldKind::Queue => "Queue",
            HoldKind::Defer => "Defer",
        }
    }
}

/// Decision for one obligation in an agent's internal queue.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentDecision {
    /// Move to the central RTGS queue, optionally declaring a priority
    Release {
        tx_id: String,
        declared_priority: Option<u8>,
    },

    /// Keep in the internal queue; re-evaluated next tick
    Hold { tx_id: String, kind: HoldKind },

    /// Replace with `parts` child obligations
    Split { tx_id: String, parts: usize },

    /// Pull the obligation out of the central queue back into Q1
    WithdrawFromRtgs { tx_id: String },

    /// Re-release a Q1 obligation with a new declared priority
    ResubmitToRtgs { tx_id: String, new_priority: u8 },
}

impl PaymentDecision {
    /// Action name recorded in the `PolicyDecision` event.
    pub fn name(&self) -> &'static str {
        match self {
            PaymentDecision::Release { .. } => "Release",
            PaymentDecision::Hold { kind, .. } => kind.name(),
            PaymentDecision::Split { .. } => "Split",
            PaymentDecision::WithdrawFromRtgs { .. } => "WithdrawFromRtgs",
            PaymentDecision::ResubmitToRtgs { .. } => "ResubmitToRtgs",
        }
    }
}

/// Once-per-tick agent-level decision.
#[derive(Debug, Clone, PartialEq)]
pub enum BankDecision {
    NoAction,
    PostCollateral { amount: i64 },
    ReleaseCollateral { amount: i64 },
}

impl BankDecision {
    pub fn name(&self) -> &'static str {
        match self {
            BankDecision::NoAction => "NoAction",
            BankDecision::PostCollateral { .. } => "PostCollateral",
            BankDecision::ReleaseCollateral { .. } => "ReleaseCollateral",
        }
    }
}

/// Once-per-tick collateral decision.
#[derive(Debug, Clone, PartialEq)]
pub enum CollateralDecision {
    PostCollateral { amount: i64 },
    HoldCollateral,
}

impl CollateralDecision {
    pub fn name(&self) -> &'static str {
        match self {
            CollateralDecision::PostCollateral { .. } => "PostCollateral",
            CollateralDecision::HoldCollateral => "HoldCollateral",
        }
    }
}
