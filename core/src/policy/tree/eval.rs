//! Pure tree evaluation.
//!
//! Walking a tree is O(depth) with no I/O and no mutation: look up the
//! field, resolve the comparison value, branch, repeat until an action
//! node. Static validation guarantees every field and parameter resolves,
//! so runtime errors here indicate a kernel bug rather than bad input.

use crate::policy::tree::context::EvalContext;
use crate::policy::tree::types::{ActionKind, TreeNode, ValueRef};
use crate::policy::{BankDecision, CollateralDecision, HoldKind, PaymentDecision};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("unknown context field '{0}'")]
    UnknownField(String),

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("action {action} missing argument '{arg}'")]
    MissingArgument { action: &'static str, arg: &'static str },

    #[error("action {action} argument '{arg}' out of range: {value}")]
    ArgumentOutOfRange {
        action: &'static str,
        arg: &'static str,
        value: f64,
    },

    #[error("action {0} is not valid for this tree type")]
    WrongTreeType(&'static str),
}

/// Terminal action of one tree walk, with arguments resolved to numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub action: ActionKind,
    pub args: BTreeMap<String, f64>,
}

/// Walk the tree against a context and parameter map.
pub fn evaluate_tree(
    node: &TreeNode,
    ctx: &EvalContext,
    params: &BTreeMap<String, f64>,
) -> Result<Evaluation, PolicyError> {
    match node {
        TreeNode::Condition {
            field,
            op,
            value,
            if_true,
            if_false,
        } => {
            let left = ctx
                .get(field)
                .ok_or_else(|| PolicyError::UnknownField(field.clone()))?;
            let right = resolve(value, ctx, params)?;
            let branch = if op.apply(left, right) {
                if_true
            } else {
                if_false
            };
            evaluate_tree(branch, ctx, params)
        }
        TreeNode::Action { action, args } => {
            let mut resolved = BTreeMap::new();
            for (name, value) in args {
                resolved.insert(name.clone(), resolve(value, ctx, params)?);
            }
            Ok(Evaluation {
                action: *action,
                args: resolved,
            })
        }
    }
}

fn resolve(
    value: &ValueRef,
    ctx: &EvalContext,
    params: &BTreeMap<String, f64>,
) -> Result<f64, PolicyError> {
    match value {
        ValueRef::Literal(v) => Ok(*v),
        ValueRef::Param { param } => params
            .get(param)
            .copied()
            .ok_or_else(|| PolicyError::UnknownParameter(param.clone())),
        ValueRef::Field { field } => ctx
            .get(field)
            .ok_or_else(|| PolicyError::UnknownField(field.clone())),
    }
}

/// Interpret a payment-tree evaluation for one obligation.
pub fn payment_decision(eval: &Evaluation, tx_id: &str) -> Result<PaymentDecision, PolicyError> {
    let tx_id = tx_id.to_string();
    match eval.action {
        ActionKind::Release => Ok(PaymentDecision::Release {
            tx_id,
            declared_priority: None,
        }),
        ActionKind::Submit => {
            let declared_priority = match eval.args.get("priority") {
                Some(&p) => Some(arg_priority(eval.action, p)?),
                None => None,
            };
            Ok(PaymentDecision::Release {
                tx_id,
                declared_priority,
            })
        }
        ActionKind::Hold => Ok(PaymentDecision::Hold {
            tx_id,
            kind: HoldKind::Hold,
        }),
        ActionKind::Queue => Ok(PaymentDecision::Hold {
            tx_id,
            kind: HoldKind::Queue,
        }),
        ActionKind::Defer => Ok(PaymentDecision::Hold {
            tx_id,
            kind: HoldKind::Defer,
        }),
        ActionKind::Split => {
            let parts = eval.args.get("parts").copied().unwrap_or(2.0);
            if !(2.0..=64.0).contains(&parts) || parts.fract() != 0.0 {
                return Err(PolicyError::ArgumentOutOfRange {
                    action: "Split",
                    arg: "parts",
                    value: parts,
                });
            }
            Ok(PaymentDecision::Split {
                tx_id,
                parts: parts as usize,
            })
        }
        ActionKind::WithdrawFromRtgs => Ok(PaymentDecision::WithdrawFromRtgs { tx_id }),
        ActionKind::ResubmitToRtgs => {
            let priority = eval
                .args
                .get("priority")
                .copied()
                .ok_or(PolicyError::MissingArgument {
                    action: "ResubmitToRtgs",
                    arg: "priority",
                })?;
            Ok(PaymentDecision::ResubmitToRtgs {
                tx_id,
                new_priority: arg_priority(eval.action, priority)?,
            })
        }
        other => Err(PolicyError::WrongTreeType(other.name())),
    }
}

/// Interpret a bank-tree evaluation.
pub fn bank_decision(eval: &Evaluation) -> Result<BankDecision, PolicyError> {
    match eval.action {
        ActionKind::NoAction => Ok(BankDecision::NoAction),
        ActionKind::PostCollateral => Ok(BankDecision::PostCollateral {
            amount: arg_amount(eval, "PostCollateral")?,
        }),
        ActionKind::ReleaseCollateral => Ok(BankDecision::ReleaseCollateral {
            amount: arg_amount(eval, "ReleaseCollateral")?,
        }),
        other => Err(PolicyError::WrongTreeType(other.name())),
    }
}

/// Interpret a collateral-tree evaluation.
pub fn collateral_decision(eval: &Evaluation) -> Result<CollateralDecision, PolicyError> {
    match eval.action {
        ActionKind::PostCollateral => Ok(CollateralDecision::PostCollateral {
            amount: arg_amount(eval, "PostCollateral")?,
        }),
        ActionKind::HoldCollateral => Ok(CollateralDecision::HoldCollateral),
        other => Err(PolicyError::WrongTreeType(other.name())),
    }
}

fn arg_amount(eval: &Evaluation, action: &'static str) -> Result<i64, PolicyError> {
    let amount = eval
        .args
        .get("amount")
        .copied()
        .ok_or(PolicyError::MissingArgument {
            action,
            arg: "amount",
        })?;
    if !amount.is_finite() || amount < 0.0 || amount > i64::MAX as f64 {
        return Err(PolicyError::ArgumentOutOfRange {
            action,
            arg: "amount",
            value: amount,
        });
    }
    Ok(amount.floor() as i64)
}

fn arg_priority(action: ActionKind, value: f64) -> Result<u8, PolicyError> {
    if !(0.0..=10.0).contains(&value) || value.fract() != 0.0 {
        return Err(PolicyError::ArgumentOutOfRange {
            action: action.name(),
            arg: "priority",
            value,
        });
    }
    Ok(value as u8)
}
