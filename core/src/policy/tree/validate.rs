//! Static policy validation.
//!
//! Runs once at construction, before tick 0. Violations are collected
//! into a single list so a policy author (human or optimizer) sees every
//! problem at once instead of fixing them one compile at a time.

use crate::policy::tree::context::EvalContext;
use crate::policy::tree::types::{ActionKind, PolicyBundle, TreeKind, TreeNode, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Trees deeper than this are rejected; evaluation is recursive.
pub const MAX_TREE_DEPTH: usize = 64;

/// Declared range for one tunable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub min: f64,
    pub max: f64,
}

/// What a scenario allows a policy to reference.
///
/// Empty collections mean "no additional restriction": the built-in field
/// and per-tree action whitelists always apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioConstraints {
    /// When non-empty, trees may only reference these context fields
    #[serde(default)]
    pub allowed_fields: BTreeSet<String>,

    /// When non-empty, payment trees may only use these actions
    #[serde(default)]
    pub allowed_payment_actions: BTreeSet<ActionKind>,

    /// When non-empty, bank trees may only use these actions
    #[serde(default)]
    pub allowed_bank_actions: BTreeSet<ActionKind>,

    /// When non-empty, collateral trees may only use these actions
    #[serde(default)]
    pub allowed_collateral_actions: BTreeSet<ActionKind>,

    /// When non-empty, every bundle parameter must be declared here and
    /// sit inside its range
    #[serde(default)]
    pub parameter_specs: BTreeMap<String, ParamSpec>,
}

/// One rule breach found during validation.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum PolicyViolation {
    #[error("{tree}: unknown context field '{field}'")]
    UnknownField { tree: String, field: String },

    #[error("{tree}: field '{field}' not allowed by scenario constraints")]
    FieldNotAllowed { tree: String, field: String },

    #[error("{tree}: action {action} is not valid for this tree type")]
    ActionNotAllowedForTree { tree: String, action: String },

    #[error("{tree}: action {action} not allowed by scenario constraints")]
    ActionNotAllowed { tree: String, action: String },

    #[error("{tree}: reference to undeclared parameter '{param}'")]
    UnknownParameterReference { tree: String, param: String },

    #[error("parameter '{param}' not allowed by scenario constraints")]
    ParameterNotAllowed { param: String },

    #[error("parameter '{param}' = {value} outside declared range [{min}, {max}]")]
    ParameterOutOfRange {
        param: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("parameter '{param}' = {value} is not finite")]
    ParameterNotFinite { param: String, value: f64 },

    #[error("{tree}: action {action} missing required argument '{arg}'")]
    MissingActionArgument {
        tree: String,
        action: String,
        arg: String,
    },

    #[error("{tree}: depth {depth} exceeds maximum {max}")]
    ExcessiveDepth { tree: String, depth: usize, max: usize },

    #[error("policy defines no trees")]
    EmptyPolicy,
}

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub violations: Vec<PolicyViolation>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Statically check a policy bundle against scenario constraints.
///
/// Pure: inspects only the bundle and the constraints record, touching no
/// simulation state. Returns every violation found.
pub fn validate_policy(
    policy: &PolicyBundle,
    constraints: &ScenarioConstraints,
) -> ValidationResult {
    let mut violations = Vec::new();

    if policy.trees().is_empty() {
        violations.push(PolicyViolation::EmptyPolicy);
    }

    // Parameter values against declared specs.
    for (name, value) in &policy.parameters {
        if !value.is_finite() {
            violations.push(PolicyViolation::ParameterNotFinite {
                param: name.clone(),
                value: *value,
            });
        }
        if !constraints.parameter_specs.is_empty() {
            match constraints.parameter_specs.get(name) {
                None => violations.push(PolicyViolation::ParameterNotAllowed {
                    param: name.clone(),
                }),
                Some(spec) => {
                    if *value < spec.min || *value > spec.max {
                        violations.push(PolicyViolation::ParameterOutOfRange {
                            param: name.clone(),
                            value: *value,
                            min: spec.min,
                            max: spec.max,
                        });
                    }
                }
            }
        }
    }

    for (kind, tree) in policy.trees() {
        let depth = tree.depth();
        if depth > MAX_TREE_DEPTH {
            violations.push(PolicyViolation::ExcessiveDepth {
                tree: kind.name().to_string(),
                depth,
                max: MAX_TREE_DEPTH,
            });
        }
        validate_node(tree, kind, policy, constraints, &mut violations);
    }

    ValidationResult { violations }
}

fn validate_node(
    node: &TreeNode,
    kind: TreeKind,
    policy: &PolicyBundle,
    constraints: &ScenarioConstraints,
    violations: &mut Vec<PolicyViolation>,
) {
    let tree = kind.name().to_string();
    match node {
        TreeNode::Condition {
            field,
            value,
            if_true,
            if_false,
            ..
        } => {
            if !EvalContext::is_known_field(field) {
                violations.push(PolicyViolation::UnknownField {
                    tree: tree.clone(),
                    field: field.clone(),
                });
            } else if !constraints.allowed_fields.is_empty()
                && !constraints.allowed_fields.contains(field)
            {
                violations.push(PolicyViolation::FieldNotAllowed {
                    tree: tree.clone(),
                    field: field.clone(),
                });
            }
            check_param_ref(value, &tree, policy, violations);
            validate_node(if_true, kind, policy, constraints, violations);
            validate_node(if_false, kind, policy, constraints, violations);
        }
        TreeNode::Action { action, args } => {
            if !kind.allowed_actions().contains(action) {
                violations.push(PolicyViolation::ActionNotAllowedForTree {
                    tree: tree.clone(),
                    action: action.name().to_string(),
                });
            } else {
                let scenario_set = match kind {
                    TreeKind::Payment => &constraints.allowed_payment_actions,
                    TreeKind::Bank => &constraints.allowed_bank_actions,
                    TreeKind::Collateral => &constraints.allowed_collateral_actions,
                };
                if !scenario_set.is_empty() && !scenario_set.contains(action) {
                    violations.push(PolicyViolation::ActionNotAllowed {
                        tree: tree.clone(),
                        action: action.name().to_string(),
                    });
                }
            }

            for arg in required_args(*action) {
                if !args.contains_key(*arg) {
                    violations.push(PolicyViolation::MissingActionArgument {
                        tree: tree.clone(),
                        action: action.name().to_string(),
                        arg: (*arg).to_string(),
                    });
                }
            }
            for value in args.values() {
                check_param_ref(value, &tree, policy, violations);
            }
        }
    }
}

fn required_args(action: ActionKind) -> &'static [&'static str] {
    match action {
        ActionKind::ResubmitToRtgs => &["priority"],
        ActionKind::PostCollateral | ActionKind::ReleaseCollateral => &["amount"],
        _ => &[],
    }
}

fn check_param_ref(
    value: &ValueRef,
    tree: &str,
    policy: &PolicyBundle,
    violations: &mut Vec<PolicyViolation>,
) {
    match value {
        ValueRef::Param { param } => {
            if !policy.parameters.contains_key(param) {
                violations.push(PolicyViolation::UnknownParameterReference {
                    tree: tree.to_string(),
                    param: param.clone(),
                });
            }
        }
        ValueRef::Field { field } => {
            if !EvalContext::is_known_field(field) {
                violations.push(PolicyViolation::UnknownField {
                    tree: tree.to_string(),
                    field: field.clone(),
                });
            }
        }
        ValueRef::Literal(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::tree::types::CompareOp;

    fn release() -> TreeNode {
        TreeNode::Action {
            action: ActionKind::Release,
            args: BTreeMap::new(),
        }
    }

    fn bundle_with_tree(tree: TreeNode) -> PolicyBundle {
        PolicyBundle {
            policy_id: "test".to_string(),
            description: None,
            payment_tree: Some(tree),
            bank_tree: None,
            collateral_tree: None,
            parameters: BTreeMap::new(),
        }
    }

    #[test]
    fn test_valid_policy_passes() {
        let result = validate_policy(&bundle_with_tree(release()), &ScenarioConstraints::default());
        assert!(result.is_valid(), "{:?}", result.violations);
    }

    #[test]
    fn test_empty_policy_rejected() {
        let bundle = PolicyBundle {
            policy_id: "empty".to_string(),
            description: None,
            payment_tree: None,
            bank_tree: None,
            collateral_tree: None,
            parameters: BTreeMap::new(),
        };
        let result = validate_policy(&bundle, &ScenarioConstraints::default());
        assert_eq!(result.violations, vec![PolicyViolation::EmptyPolicy]);
    }

    #[test]
    fn test_unknown_field_and_param_both_reported() {
        let tree = TreeNode::Condition {
            field: "nonsense".to_string(),
            op: CompareOp::Gt,
            value: ValueRef::Param {
                param: "ghost".to_string(),
            },
            if_true: Box::new(release()),
            if_false: Box::new(release()),
        };
        let result = validate_policy(&bundle_with_tree(tree), &ScenarioConstraints::default());
        assert_eq!(result.violations.len(), 2, "{:?}", result.violations);
        assert!(result
            .violations
            .iter()
            .any(|v| matches!(v, PolicyViolation::UnknownField { .. })));
        assert!(result
            .violations
            .iter()
            .any(|v| matches!(v, PolicyViolation::UnknownParameterReference { .. })));
    }

    #[test]
    fn test_wrong_tree_action_rejected() {
        let bundle = PolicyBundle {
            policy_id: "bad".to_string(),
            description: None,
            payment_tree: None,
            bank_tree: Some(release()), // Release is a payment action
            collateral_tree: None,
            parameters: BTreeMap::new(),
        };
        let result = validate_policy(&bundle, &ScenarioConstraints::default());
        assert!(matches!(
            result.violations[0],
            PolicyViolation::ActionNotAllowedForTree { .. }
        ));
    }

    #[test]
    fn test_parameter_range_enforced() {
        let mut bundle = bundle_with_tree(release());
        bundle
            .parameters
            .insert("urgency_threshold".to_string(), 500.0);

        let mut constraints = ScenarioConstraints::default();
        constraints.parameter_specs.insert(
            "urgency_threshold".to_string(),
            ParamSpec {
                min: 0.0,
                max: 100.0,
            },
        );

        let result = validate_policy(&bundle, &constraints);
        assert!(matches!(
            result.violations[0],
            PolicyViolation::ParameterOutOfRange { .. }
        ));
    }

    #[test]
    fn test_undeclared_parameter_rejected_under_specs() {
        let mut bundle = bundle_with_tree(release());
        bundle.parameters.insert("rogue".to_string(), 1.0);

        let mut constraints = ScenarioConstraints::default();
        constraints
            .parameter_specs
            .insert("allowed".to_string(), ParamSpec { min: 0.0, max: 1.0 });

        let result = validate_policy(&bundle, &constraints);
        assert!(matches!(
            result.violations[0],
            PolicyViolation::ParameterNotAllowed { .. }
        ));
    }

    #[test]
    fn test_scenario_action_restriction() {
        let mut constraints = ScenarioConstraints::default();
        constraints.allowed_payment_actions.insert(ActionKind::Hold);

        let result = validate_policy(&bundle_with_tree(release()), &constraints);
        assert!(matches!(
            result.violations[0],
            PolicyViolation::ActionNotAllowed { .. }
        ));
    }

    #[test]
    fn test_missing_required_arg() {
        let tree = TreeNode::Action {
            action: ActionKind::ResubmitToRtgs,
            args: BTreeMap::new(),
        };
        let result = validate_policy(&bundle_with_tree(tree), &ScenarioConstraints::default());
        assert!(matches!(
            result.violations[0],
            PolicyViolation::MissingActionArgument { .. }
        ));
    }

    #[test]
    fn test_excessive_depth() {
        let mut tree = release();
        for _ in 0..(MAX_TREE_DEPTH + 1) {
            tree = TreeNode::Condition {
                field: "balance".to_string(),
                op: CompareOp::Gt,
                value: ValueRef::Literal(0.0),
                if_true: Box::new(tree),
                if_false: Box::new(release()),
            };
        }
        let result = validate_policy(&bundle_with_tree(tree), &ScenarioConstraints::default());
        assert!(result
            .violations
            .iter()
            .any(|v| matches!(v, PolicyViolation::ExcessiveDepth { .. })));
    }
}
