//! Orchestrator configuration and construction-time validation.

use crate::arrivals::{ArrivalConfig, ScheduledArrival};
use crate::costs::CostRates;
use crate::policy::tree::builtin;
use crate::policy::tree::validate::PolicyViolation;
use crate::policy::{PolicyBundle, ScenarioConstraints};
use crate::settlement::LsmConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Top-level error taxonomy of the kernel.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimulationError {
    /// Bad configuration; detected at construction, fatal.
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),

    /// Policy failed static validation; all violations reported at once.
    #[error("policy invalid for agent {agent_id}: {} violation(s)", violations.len())]
    PolicyInvalid {
        agent_id: String,
        violations: Vec<PolicyViolation>,
    },

    /// Bad submission; the transaction is rejected, the run continues.
    #[error("transaction invalid: {0}")]
    TransactionInvalid(String),

    /// Bad per-call operation; rejected, the run continues.
    #[error("operation invalid: {0}")]
    OperationInvalid(String),

    /// Internal check failed; signals a kernel bug, the tick aborts.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
}

/// Which policy an agent runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PolicySpec {
    /// Release everything immediately (baseline)
    Fifo,

    /// Hold until the deadline is within `urgency_threshold` ticks
    Deadline { urgency_threshold: usize },

    /// Preserve a liquidity buffer, overridden by urgency
    LiquidityAware {
        target_buffer: i64,
        urgency_threshold: usize,
    },

    /// A fully specified bundle
    Tree(PolicyBundle),

    /// A bundle as JSON text (external policy generators hand these over)
    FromJson { json: String },
}

impl PolicySpec {
    /// Materialize the bundle this spec describes.
    pub fn resolve(&self) -> Result<PolicyBundle, SimulationError> {
        match self {
            PolicySpec::Fifo => Ok(builtin::fifo()),
            PolicySpec::Deadline { urgency_threshold } => Ok(builtin::deadline(*urgency_threshold)),
            PolicySpec::LiquidityAware {
                target_buffer,
                urgency_threshold,
            } => Ok(builtin::liquidity_aware(*target_buffer, *urgency_threshold)),
            PolicySpec::Tree(bundle) => Ok(bundle.clone()),
            PolicySpec::FromJson { json } => PolicyBundle::from_json(json).map_err(|e| {
                SimulationError::ConfigurationInvalid(format!("policy JSON parse failed: {}", e))
            }),
        }
    }
}

/// Outflow limit configuration for one agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentLimitsConfig {
    /// Per-counterparty daily outflow caps (cents); empty = unlimited
    #[serde(default)]
    pub bilateral_limits: BTreeMap<String, i64>,

    /// Total daily outflow cap (cents); None = unlimited
    #[serde(default)]
    pub multilateral_limit: Option<i64>,
}

/// Per-agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,

    /// Opening settlement balance (cents; may be negative)
    pub opening_balance: i64,

    /// Unsecured intraday overdraft cap (cents, non-negative)
    pub unsecured_cap: i64,

    pub policy: PolicySpec,

    /// Stochastic arrival configuration; None = no generated arrivals
    #[serde(default)]
    pub arrival_config: Option<ArrivalConfig>,

    /// Collateral posted at start (cents)
    #[serde(default)]
    pub posted_collateral: Option<i64>,

    /// Collateral haircut; defaults to 2%
    #[serde(default)]
    pub collateral_haircut: Option<f64>,

    /// Total collateralizable assets; None = 10 × unsecured_cap
    #[serde(default)]
    pub max_collateral_capacity: Option<i64>,

    /// Bilateral/multilateral outflow limits
    #[serde(default)]
    pub limits: Option<AgentLimitsConfig>,
}

/// Feature flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Buffer settlement credits and apply them at end of tick (default
    /// on); off means receivers may recycle funds within the tick
    #[serde(default = "default_true")]
    pub deferred_crediting: bool,

    /// Cap every deadline at the arrival day's last tick
    #[serde(default)]
    pub deadline_cap_at_eod: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            deferred_crediting: true,
            deadline_cap_at_eod: false,
        }
    }
}

/// Complete orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub ticks_per_day: usize,
    pub num_days: usize,
    pub rng_seed: u64,
    pub agent_configs: Vec<AgentConfig>,

    #[serde(default)]
    pub lsm_config: LsmConfig,

    #[serde(default)]
    pub cost_rates: CostRates,

    /// Scenario-mode schedule; mutually exclusive with any agent
    /// `arrival_config`
    #[serde(default)]
    pub scenario_schedule: Option<Vec<ScheduledArrival>>,

    /// Constraints policies are validated against at construction
    #[serde(default)]
    pub scenario_constraints: Option<ScenarioConstraints>,

    #[serde(default)]
    pub flags: FeatureFlags,
}

impl OrchestratorConfig {
    /// Validate everything checkable before any state is built.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.ticks_per_day == 0 {
            return Err(SimulationError::ConfigurationInvalid(
                "ticks_per_day must be > 0".to_string(),
            ));
        }
        if self.num_days == 0 {
            return Err(SimulationError::ConfigurationInvalid(
                "num_days must be > 0".to_string(),
            ));
        }
        if self.agent_configs.is_empty() {
            return Err(SimulationError::ConfigurationInvalid(
                "at least one agent is required".to_string(),
            ));
        }

        self.cost_rates
            .validate()
            .map_err(SimulationError::ConfigurationInvalid)?;

        let mut ids = BTreeSet::new();
        for agent in &self.agent_configs {
            if !ids.insert(agent.id.as_str()) {
                return Err(SimulationError::ConfigurationInvalid(format!(
                    "duplicate agent id: {}",
                    agent.id
                )));
            }
            if agent.unsecured_cap < 0 {
                return Err(SimulationError::ConfigurationInvalid(format!(
                    "agent {}: unsecured_cap must be non-negative",
                    agent.id
                )));
            }
            if let Some(posted) = agent.posted_collateral {
                if posted < 0 {
                    return Err(SimulationError::ConfigurationInvalid(format!(
                        "agent {}: posted_collateral must be non-negative",
                        agent.id
                    )));
                }
            }
            if let Some(haircut) = agent.collateral_haircut {
                if !(0.0..=1.0).contains(&haircut) {
                    return Err(SimulationError::ConfigurationInvalid(format!(
                        "agent {}: collateral_haircut must be in [0, 1]",
                        agent.id
                    )));
                }
            }
        }

        // Cross-references into the agent table.
        for agent in &self.agent_configs {
            if let Some(arrivals) = &agent.arrival_config {
                if arrivals.rate_per_tick < 0.0 || !arrivals.rate_per_tick.is_finite() {
                    return Err(SimulationError::ConfigurationInvalid(format!(
                        "agent {}: rate_per_tick must be finite and non-negative",
                        agent.id
                    )));
                }
                // Arrival generation samples a counterparty from the
                // other agents; a lone agent has none to pay.
                if self.agent_configs.len() == 1 && arrivals.rate_per_tick > 0.0 {
                    return Err(SimulationError::ConfigurationInvalid(format!(
                        "agent {}: arrival_config requires at least one other agent as counterparty",
                        agent.id
                    )));
                }
                for counterparty in arrivals.counterparty_weights.keys() {
                    if !ids.contains(counterparty.as_str()) {
                        return Err(SimulationError::ConfigurationInvalid(format!(
                            "agent {}: counterparty weight references unknown agent {}",
                            agent.id, counterparty
                        )));
                    }
                }
            }
        }

        // Scenario mode excludes stochastic arrivals.
        if self.scenario_schedule.is_some()
            && self.agent_configs.iter().any(|a| a.arrival_config.is_some())
        {
            return Err(SimulationError::ConfigurationInvalid(
                "scenario_schedule and per-agent arrival_config are mutually exclusive"
                    .to_string(),
            ));
        }

        Ok(())
    }
}
