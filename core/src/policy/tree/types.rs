//! Decision-tree policy definitions.
//!
//! A policy is data, not code: a bundle of up to three trees deserialized
//! from JSON. Each tree is a recursive structure of condition nodes
//! (field ⋈ value) and terminal action nodes. Values are literals or
//! references into the bundle's parameter map, which is what lets an
//! external optimizer mutate thresholds without touching tree shape.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Comparison operators available in condition nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl CompareOp {
    /// Apply the comparison. Equality uses an epsilon tolerance because
    /// context fields are carried as f64.
    pub fn apply(self, left: f64, right: f64) -> bool {
        const EPSILON: f64 = 1e-9;
        match self {
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Eq => (left - right).abs() <= EPSILON,
            CompareOp::Ne => (left - right).abs() > EPSILON,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

/// A literal number, a named parameter reference, or another context
/// field (for field-to-field comparisons like
/// `effective_liquidity < amount`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueRef {
    /// `{"param": "urgency_threshold"}`
    Param { param: String },
    /// `{"field": "amount"}`
    Field { field: String },
    /// Bare number, e.g. `150000`
    Literal(f64),
}

/// Every action any tree type may name. Which subset is legal depends on
/// the tree type; see [`TreeKind::allowed_actions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionKind {
    // Payment tree
    /// Move the obligation to the central RTGS queue
    Release,
    /// Synonym of Release that may carry a declared `priority` arg
    Submit,
    /// Keep the obligation in the agent's internal queue
    Hold,
    /// Synonym of Hold
    Queue,
    /// Hold, recorded as an explicit deferral
    Defer,
    /// Replace the obligation with `parts` children
    Split,
    /// Pull the obligation out of the central queue back into Q1
    WithdrawFromRtgs,
    /// Push a withdrawn obligation back with a new declared `priority`
    ResubmitToRtgs,

    // Bank tree
    NoAction,
    PostCollateral,
    ReleaseCollateral,

    // Collateral tree
    HoldCollateral,
}

impl ActionKind {
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Release => "Release",
            ActionKind::Submit => "Submit",
            ActionKind::Hold => "Hold",
            ActionKind::Queue => "Queue",
            ActionKind::Defer => "Defer",
            ActionKind::Split => "Split",
            ActionKind::WithdrawFromRtgs => "WithdrawFromRtgs",
            ActionKind::ResubmitToRtgs => "ResubmitToRtgs",
            ActionKind::NoAction => "NoAction",
            ActionKind::PostCollateral => "PostCollateral",
            ActionKind::ReleaseCollateral => "ReleaseCollateral",
            ActionKind::HoldCollateral => "HoldCollateral",
        }
    }
}

/// Which of the three trees a node belongs to. Determines the action
/// whitelist and which context fields are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeKind {
    Payment,
    Bank,
    Collateral,
}

impl TreeKind {
    pub fn allowed_actions(self) -> &'static [ActionKind] {
        match self {
            TreeKind::Payment => &[
                ActionKind::Release,
                ActionKind::Submit,
                ActionKind::Hold,
                ActionKind::Queue,
                ActionKind::Defer,
                ActionKind::Split,
                ActionKind::WithdrawFromRtgs,
                ActionKind::ResubmitToRtgs,
            ],
            TreeKind::Bank => &[
                ActionKind::NoAction,
                ActionKind::PostCollateral,
                ActionKind::ReleaseCollateral,
            ],
            TreeKind::Collateral => &[ActionKind::PostCollateral, ActionKind::HoldCollateral],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TreeKind::Payment => "payment_tree",
            TreeKind::Bank => "bank_tree",
            TreeKind::Collateral => "collateral_tree",
        }
    }
}

/// A node in a decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeNode {
    /// Branch on `field ⋈ value`
    Condition {
        field: String,
        op: CompareOp,
        value: ValueRef,
        if_true: Box<TreeNode>,
        if_false: Box<TreeNode>,
    },

    /// Terminal: take `action` with optional arguments
    Action {
        action: ActionKind,
        #[serde(default)]
        args: BTreeMap<String, ValueRef>,
    },
}

impl TreeNode {
    /// Maximum nesting depth of this tree.
    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Action { .. } => 1,
            TreeNode::Condition {
                if_true, if_false, ..
            } => 1 + if_true.depth().max(if_false.depth()),
        }
    }
}

/// A complete policy: up to three trees plus the shared parameter map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyBundle {
    pub policy_id: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Per-obligation release decisions (Q1 → Q2)
    #[serde(default)]
    pub payment_tree: Option<TreeNode>,

    /// Agent-level decision, evaluated once per tick
    #[serde(default)]
    pub bank_tree: Option<TreeNode>,

    /// Collateral posting/holding, evaluated once per tick
    #[serde(default)]
    pub collateral_tree: Option<TreeNode>,

    /// Named parameters referenced by `{"param": …}` values
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
}

impl PolicyBundle {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The trees present in this bundle, with their kinds.
    pub fn trees(&self) -> Vec<(TreeKind, &TreeNode)> {
        let mut out = Vec::new();
        if let Some(tree) = &self.payment_tree {
            out.push((TreeKind::Payment, tree));
        }
        if let Some(tree) = &self.bank_tree {
            out.push((TreeKind::Bank, tree));
        }
        if let Some(tree) = &self.collateral_tree {
            out.push((TreeKind::Collateral, tree));
        }
        out
    }
}
