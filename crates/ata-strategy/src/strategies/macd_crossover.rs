//! MACD signal-line crossover.
//!
//! A bullish cross (histogram turning positive) emits BUY, a bearish cross
//! emits SELL. Conviction scales with histogram magnitude relative to ATR.

use ata_schemas::{Candle, SignalType};
use serde_json::Value;

use crate::indicators::{atr, macd_series};
use crate::types::{
    param_usize, ParamKind, ParamSpec, Strategy, StrategyError, StrategyResult,
};

const ATR_PERIOD: usize = 14;

const SCHEMA: &[ParamSpec] = &[
    ParamSpec::optional("fast", ParamKind::Integer),
    ParamSpec::optional("slow", ParamKind::Integer),
    ParamSpec::optional("signal", ParamKind::Integer),
];

#[derive(Debug, Default)]
pub struct MacdCrossover;

impl Strategy for MacdCrossover {
    fn id(&self) -> &'static str {
        "macd_crossover"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        SCHEMA
    }

    fn analyze(&self, candles: &[Candle], params: &Value) -> Result<StrategyResult, StrategyError> {
        let fast = param_usize(params, "fast", 12);
        let slow = param_usize(params, "slow", 26);
        let signal_n = param_usize(params, "signal", 9);

        // One extra bar so a crossover (prev vs current) is observable.
        let needed = (slow + signal_n).max(ATR_PERIOD + 1);
        if candles.len() < needed {
            return Err(StrategyError::InsufficientHistory {
                needed,
                got: candles.len(),
            });
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let series = macd_series(&closes, fast, slow, signal_n);
        let (prev, cur) = match series.as_slice() {
            [.., prev, cur] => (*prev, *cur),
            _ => {
                return Err(StrategyError::InsufficientHistory {
                    needed,
                    got: candles.len(),
                })
            }
        };

        let atr_now = atr(candles, ATR_PERIOD).expect("history checked above");
        let entry = *closes.last().expect("non-empty");
        let strength = if atr_now > 0.0 {
            (cur.histogram.abs() / (0.1 * atr_now)).min(1.0)
        } else {
            0.0
        };

        let crossed_up = prev.histogram <= 0.0 && cur.histogram > 0.0;
        let crossed_down = prev.histogram >= 0.0 && cur.histogram < 0.0;

        if crossed_up {
            return Ok(StrategyResult {
                signal_type: SignalType::Buy,
                confidence: 0.65 + 0.25 * strength,
                entry,
                stop: entry - 1.5 * atr_now,
                targets: vec![entry + 3.0 * atr_now],
                reasoning: format!(
                    "MACD({fast},{slow},{signal_n}) crossed above signal line; \
                     histogram {hist:.4}, ATR({ATR_PERIOD}) {atr_now:.2}",
                    hist = cur.histogram
                ),
            });
        }

        if crossed_down {
            return Ok(StrategyResult {
                signal_type: SignalType::Sell,
                confidence: 0.65 + 0.25 * strength,
                entry,
                stop: entry + 1.5 * atr_now,
                targets: vec![entry - 3.0 * atr_now],
                reasoning: format!(
                    "MACD({fast},{slow},{signal_n}) crossed below signal line; \
                     histogram {hist:.4}, ATR({ATR_PERIOD}) {atr_now:.2}",
                    hist = cur.histogram
                ),
            });
        }

        Ok(StrategyResult::hold(
            entry,
            0.5,
            format!(
                "MACD({fast},{slow},{signal_n}) histogram {hist:.4}, no crossover",
                hist = cur.histogram
            ),
        ))
    }
}
