//! Pluggable strategy evaluators and the registry that loads them from
//! approved artifacts.

pub mod indicators;
mod registry;
mod strategies;
mod types;

pub use registry::{bind_evaluator, RegisteredStrategy, RegistryError, StrategyRegistry};
pub use strategies::{MaCrossover, MacdCrossover, RsiMomentum};
pub use types::{
    param_f64, param_usize, validate_params, ParamKind, ParamSpec, Strategy, StrategyError,
    StrategyResult,
};
