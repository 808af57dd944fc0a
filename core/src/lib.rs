//! ClearSim core — deterministic RTGS + LSM settlement simulation kernel.
//!
//! A tick-driven simulator of an interbank payment network: bank agents
//! submit time-bounded payment obligations, per-agent decision-tree
//! policies choose when to release them, and a central settlement engine
//! clears what it can gross (RTGS) and nets what it cannot
//! (liquidity-saving mechanisms), accruing liquidity and delay costs and
//! emitting a totally ordered event stream.
//!
//! # Architecture
//!
//! - **clock**: discrete tick/day time
//! - **rng**: seeded xorshift64* streams behind a hash-based derivation
//!   hierarchy
//! - **models**: domain types (Agent, Transaction, SimulationState, Event)
//! - **arrivals**: stochastic and scenario-mode obligation generation
//! - **policy**: decision-tree DSL (types, context, evaluation, validation)
//! - **settlement**: RTGS gross settlement, LSM netting, deferred credits
//! - **costs**: integer cost accrual
//! - **orchestrator**: the tick loop, external API, and checkpointing
//!
//! # Critical invariants
//!
//! 1. All money values are i64 cents; no float touches a balance.
//! 2. Same seed + same config ⇒ bit-identical event stream.
//! 3. System balance is conserved at the end of every tick.
//! 4. The event log's within-tick order follows the fixed phase schedule.

pub mod arrivals;
pub mod clock;
pub mod costs;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod rng;
pub mod settlement;

pub use arrivals::{AmountDistribution, ArrivalConfig, PriorityDistribution, ScheduledArrival};
pub use clock::SimClock;
pub use costs::{CostAccumulator, CostBreakdown, CostRates, PriorityDelayMultipliers};
pub use models::{Agent, Event, EventLog, EventRecord, SimulationState, Transaction, TxStatus};
pub use orchestrator::{
    AgentConfig, AgentLimitsConfig, FeatureFlags, Orchestrator, OrchestratorConfig, PolicySpec,
    SimulationError, SystemMetrics, TickResult, TransactionRecord,
};
pub use policy::{PolicyBundle, ScenarioConstraints, ValidationResult};
pub use rng::{RngManager, RngStream};
pub use settlement::LsmConfig;
