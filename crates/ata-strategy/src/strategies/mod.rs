//! Built-in evaluators. New variants plug in by implementing [`Strategy`]
//! and getting linked into [`crate::registry::bind_evaluator`].

mod ma_crossover;
mod macd_crossover;
mod rsi_momentum;

pub use ma_crossover::MaCrossover;
pub use macd_crossover::MacdCrossover;
pub use rsi_momentum::RsiMomentum;
