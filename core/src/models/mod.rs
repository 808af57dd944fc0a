//! Domain types: agents, obligations, state, and events.

pub mod agent;
pub mod event;
pub mod state;
pub mod transaction;

pub use agent::{Agent, AgentError};
pub use event::{Event, EventLog, EventRecord};
pub use state::SimulationState;
pub use transaction::{Transaction, TransactionError, TxStatus};
