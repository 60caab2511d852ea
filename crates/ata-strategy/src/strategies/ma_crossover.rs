//! Moving-average crossover: fast SMA crossing the slow SMA.

use ata_schemas::{Candle, SignalType};
use serde_json::Value;

use crate::indicators::{atr, sma};
use crate::types::{
    param_usize, ParamKind, ParamSpec, Strategy, StrategyError, StrategyResult,
};

const ATR_PERIOD: usize = 14;

const SCHEMA: &[ParamSpec] = &[
    ParamSpec::optional("fast_period", ParamKind::Integer),
    ParamSpec::optional("slow_period", ParamKind::Integer),
];

#[derive(Debug, Default)]
pub struct MaCrossover;

impl Strategy for MaCrossover {
    fn id(&self) -> &'static str {
        "ma_crossover"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        SCHEMA
    }

    fn analyze(&self, candles: &[Candle], params: &Value) -> Result<StrategyResult, StrategyError> {
        let fast_n = param_usize(params, "fast_period", 10);
        let slow_n = param_usize(params, "slow_period", 30);

        // One extra bar so the previous bar's averages are computable.
        let needed = (slow_n + 1).max(ATR_PERIOD + 1);
        if candles.len() < needed || fast_n >= slow_n {
            return Err(StrategyError::InsufficientHistory {
                needed,
                got: candles.len(),
            });
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let prev = &closes[..closes.len() - 1];

        let fast_now = sma(&closes, fast_n).expect("history checked above");
        let slow_now = sma(&closes, slow_n).expect("history checked above");
        let fast_prev = sma(prev, fast_n).expect("history checked above");
        let slow_prev = sma(prev, slow_n).expect("history checked above");

        let atr_now = atr(candles, ATR_PERIOD).expect("history checked above");
        let entry = *closes.last().expect("non-empty");

        // Conviction from post-cross separation, capped well under 1.0.
        let separation = ((fast_now - slow_now).abs() / slow_now).min(0.01);
        let confidence = 0.6 + separation * 30.0;

        let crossed_up = fast_prev <= slow_prev && fast_now > slow_now;
        let crossed_down = fast_prev >= slow_prev && fast_now < slow_now;

        if crossed_up {
            return Ok(StrategyResult {
                signal_type: SignalType::Buy,
                confidence,
                entry,
                stop: entry - atr_now,
                targets: vec![entry + 2.0 * atr_now],
                reasoning: format!(
                    "SMA({fast_n}) {fast_now:.2} crossed above SMA({slow_n}) {slow_now:.2}"
                ),
            });
        }

        if crossed_down {
            return Ok(StrategyResult {
                signal_type: SignalType::Sell,
                confidence,
                entry,
                stop: entry + atr_now,
                targets: vec![entry - 2.0 * atr_now],
                reasoning: format!(
                    "SMA({fast_n}) {fast_now:.2} crossed below SMA({slow_n}) {slow_now:.2}"
                ),
            });
        }

        Ok(StrategyResult::hold(
            entry,
            0.5,
            format!("SMA({fast_n}) {fast_now:.2} vs SMA({slow_n}) {slow_now:.2}, no crossover"),
        ))
    }
}
