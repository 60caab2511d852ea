//! Signal generation engine and the pending-signal expiry sweep.

mod engine;
mod expiry;

pub use engine::{
    accept_result, AutoTrigger, GenerateReport, RegistryHandle, SignalEngine, SymbolOutcome,
};
pub use expiry::run_expiry_sweep;
