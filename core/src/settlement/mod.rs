//! Settlement engines: immediate RTGS, LSM netting, deferred credits.

pub mod deferred;
pub mod lsm;
pub mod rtgs;

pub use deferred::DeferredLedger;
pub use lsm::{run_lsm_pass, LsmConfig, LsmPassResult};
pub use rtgs::{process_queue, RtgsPassResult, SettlementError};
