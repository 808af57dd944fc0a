//! JSON decision-tree policy DSL.

pub mod builtin;
pub mod context;
pub mod eval;
pub mod schema;
pub mod types;
pub mod validate;

pub use context::{EvalContext, CONTEXT_FIELDS};
pub use eval::{evaluate_tree, Evaluation, PolicyError};
pub use schema::policy_schema_json;
pub use types::{ActionKind, CompareOp, PolicyBundle, TreeKind, TreeNode, ValueRef};
pub use validate::{validate_policy, ScenarioConstraints, ValidationResult};
