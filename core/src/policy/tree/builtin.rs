//! Built-in policy bundles.
//!
//! The baseline policies every scenario reaches for, constructed in code
//! with parameters injected from configuration. Custom policies arrive as
//! full JSON bundles instead.

use crate::policy::tree::types::{ActionKind, CompareOp, PolicyBundle, TreeNode, ValueRef};
use std::collections::BTreeMap;

fn action(kind: ActionKind) -> TreeNode {
    TreeNode::Action {
        action: kind,
        args: BTreeMap::new(),
    }
}

fn condition(
    field: &str,
    op: CompareOp,
    value: ValueRef,
    if_true: TreeNode,
    if_false: TreeNode,
) -> TreeNode {
    TreeNode::Condition {
        field: field.to_string(),
        op,
        value,
        if_true: Box::new(if_true),
        if_false: Box::new(if_false),
    }
}

fn param(name: &str) -> ValueRef {
    ValueRef::Param {
        param: name.to_string(),
    }
}

/// FIFO baseline: release everything immediately.
pub fn fifo() -> PolicyBundle {
    PolicyBundle {
        policy_id: "fifo".to_string(),
        description: Some("Release every obligation as soon as it is seen".to_string()),
        payment_tree: Some(action(ActionKind::Release)),
        bank_tree: None,
        collateral_tree: None,
        parameters: BTreeMap::new(),
    }
}

/// Deadline-driven: release once the deadline is near, otherwise hold.
pub fn deadline(urgency_threshold: usize) -> PolicyBundle {
    PolicyBundle {
        policy_id: "deadline".to_string(),
        description: Some("Hold until the deadline approaches".to_string()),
        payment_tree: Some(condition(
            "ticks_to_deadline",
            CompareOp::Le,
            param("urgency_threshold"),
            action(ActionKind::Release),
            action(ActionKind::Hold),
        )),
        bank_tree: None,
        collateral_tree: None,
        parameters: [("urgency_threshold".to_string(), urgency_threshold as f64)]
            .into_iter()
            .collect(),
    }
}

/// Liquidity-aware: keep a balance buffer, overridden by urgency.
pub fn liquidity_aware(target_buffer: i64, urgency_threshold: usize) -> PolicyBundle {
    // Urgent obligations always go out; otherwise only when the release
    // leaves the buffer intact.
    let release_if_buffered = condition(
        "effective_liquidity",
        CompareOp::Ge,
        param("release_floor"),
        action(ActionKind::Release),
        action(ActionKind::Hold),
    );
    PolicyBundle {
        policy_id: "liquidity_aware".to_string(),
        description: Some("Preserve a liquidity buffer, override on urgency".to_string()),
        payment_tree: Some(condition(
            "ticks_to_deadline",
            CompareOp::Le,
            param("urgency_threshold"),
            action(ActionKind::Release),
            release_if_buffered,
        )),
        bank_tree: None,
        collateral_tree: None,
        parameters: [
            ("urgency_threshold".to_string(), urgency_threshold as f64),
            ("release_floor".to_string(), target_buffer as f64),
        ]
        .into_iter()
        .collect(),
    }
}
