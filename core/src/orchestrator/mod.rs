//! Simulation orchestration: configuration, the tick engine, and
//! checkpointing.

pub mod checkpoint;
pub mod config;
pub mod engine;

pub use checkpoint::{compute_config_hash, StateSnapshot};
pub use config::{
    AgentConfig, AgentLimitsConfig, FeatureFlags, OrchestratorConfig, PolicySpec, SimulationError,
};
pub use engine::{Orchestrator, SystemMetrics, TickResult, TickTiming, TransactionRecord};
