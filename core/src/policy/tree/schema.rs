//! Machine-readable policy schema.
//!
//! External policy generators and validators (the LLM optimization loop
//! among them) consume this to learn which fields, operators and actions
//! a tree may reference without reading kernel source.

use crate::policy::tree::context::CONTEXT_FIELDS;
use crate::policy::tree::types::TreeKind;
use crate::policy::tree::validate::MAX_TREE_DEPTH;
use serde_json::json;

/// Render the policy schema as a JSON string.
pub fn policy_schema_json() -> String {
    let tree_schemas: Vec<_> = [TreeKind::Payment, TreeKind::Bank, TreeKind::Collateral]
        .iter()
        .map(|kind| {
            json!({
                "tree": kind.name(),
                "allowed_actions": kind
                    .allowed_actions()
                    .iter()
                    .map(|a| a.name())
                    .collect::<Vec<_>>(),
            })
        })
        .collect();

    let schema = json!({
        "version": "1.0",
        "fields": CONTEXT_FIELDS,
        "operators": ["<", "<=", ">", ">=", "==", "!="],
        "value_forms": [
            {"form": "literal", "example": 150000},
            {"form": "parameter", "example": {"param": "urgency_threshold"}},
            {"form": "field", "example": {"field": "amount"}},
        ],
        "trees": tree_schemas,
        "action_arguments": {
            "Submit": {"priority": "optional, integer 0-10"},
            "Split": {"parts": "optional, integer 2-64, default 2"},
            "ResubmitToRtgs": {"priority": "required, integer 0-10"},
            "PostCollateral": {"amount": "required, cents >= 0"},
            "ReleaseCollateral": {"amount": "required, cents >= 0"},
        },
        "max_tree_depth": MAX_TREE_DEPTH,
        "node_forms": {
            "condition": {
                "type": "condition",
                "field": "<context field>",
                "op": "<operator>",
                "value": "<literal or {param}>",
                "if_true": "<node>",
                "if_false": "<node>",
            },
            "action": {
                "type": "action",
                "action": "<action name>",
                "args": "<optional map of literal or {param}>",
            },
        },
    });

    serde_json::to_string_pretty(&schema).expect("static schema serializes")
}
