//! RSI mean-reversion: buy deep oversold, sell deep overbought.
//!
//! Levels are ATR-based: stop one ATR(14) beyond entry, target two ATRs in
//! the trade direction (2:1 reward-to-risk).

use ata_schemas::{Candle, SignalType};
use serde_json::Value;

use crate::indicators::{atr, rsi};
use crate::types::{
    param_f64, param_usize, ParamKind, ParamSpec, Strategy, StrategyError, StrategyResult,
};

const ATR_PERIOD: usize = 14;

const SCHEMA: &[ParamSpec] = &[
    ParamSpec::optional("period", ParamKind::Integer),
    ParamSpec::optional("oversold", ParamKind::Float),
    ParamSpec::optional("overbought", ParamKind::Float),
];

#[derive(Debug, Default)]
pub struct RsiMomentum;

impl Strategy for RsiMomentum {
    fn id(&self) -> &'static str {
        "rsi_momentum"
    }

    fn param_schema(&self) -> &'static [ParamSpec] {
        SCHEMA
    }

    fn analyze(&self, candles: &[Candle], params: &Value) -> Result<StrategyResult, StrategyError> {
        let period = param_usize(params, "period", 14);
        let oversold = param_f64(params, "oversold", 30.0);
        let overbought = param_f64(params, "overbought", 70.0);

        let needed = period.max(ATR_PERIOD) + 1;
        if candles.len() < needed {
            return Err(StrategyError::InsufficientHistory {
                needed,
                got: candles.len(),
            });
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let rsi_now = rsi(&closes, period).expect("history checked above");
        let atr_now = atr(candles, ATR_PERIOD).expect("history checked above");
        let entry = *closes.last().expect("non-empty");

        if rsi_now < oversold {
            // Deeper oversold reads as stronger conviction.
            let depth = ((oversold - rsi_now) / oversold).min(1.0);
            return Ok(StrategyResult {
                signal_type: SignalType::Buy,
                confidence: 0.7 + 0.25 * depth,
                entry,
                stop: entry - atr_now,
                targets: vec![entry + 2.0 * atr_now],
                reasoning: format!(
                    "RSI({period}) at {rsi_now:.1} below oversold threshold {oversold:.1}; \
                     ATR({ATR_PERIOD}) {atr_now:.2} sets stop/target"
                ),
            });
        }

        if rsi_now > overbought {
            let depth = ((rsi_now - overbought) / (100.0 - overbought)).min(1.0);
            return Ok(StrategyResult {
                signal_type: SignalType::Sell,
                confidence: 0.7 + 0.25 * depth,
                entry,
                stop: entry + atr_now,
                targets: vec![entry - 2.0 * atr_now],
                reasoning: format!(
                    "RSI({period}) at {rsi_now:.1} above overbought threshold {overbought:.1}; \
                     ATR({ATR_PERIOD}) {atr_now:.2} sets stop/target"
                ),
            });
        }

        Ok(StrategyResult::hold(
            entry,
            0.5,
            format!("RSI({period}) at {rsi_now:.1} inside neutral band"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                symbol: "TEST".to_string(),
                ts: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::days(i as i64),
                open: c + 0.2,
                high: c + 0.5,
                low: c - 0.5,
                close: c,
                volume: 10_000,
            })
            .collect()
    }

    /// Fifty closes stepping 100 -> 70 leave RSI(14) deep oversold.
    fn oversold_series() -> Vec<Candle> {
        candles(&(0..50).map(|i| 100.0 - i as f64 * (30.0 / 49.0)).collect::<Vec<_>>())
    }

    #[test]
    fn oversold_descent_emits_buy_at_last_close() {
        let series = oversold_series();
        let out = RsiMomentum
            .analyze(&series, &serde_json::json!({}))
            .unwrap();

        assert_eq!(out.signal_type, SignalType::Buy);
        assert!(out.confidence >= 0.7, "confidence = {}", out.confidence);

        let entry = series.last().unwrap().close;
        let atr_now = atr(&series, ATR_PERIOD).unwrap();
        assert_eq!(out.entry, entry);
        assert_eq!(out.stop, entry - atr_now);
        assert_eq!(out.targets, vec![entry + 2.0 * atr_now]);
        assert!(out.stop < out.entry && out.entry < out.targets[0]);
    }

    #[test]
    fn overbought_ascent_emits_sell() {
        let series = candles(&(0..50).map(|i| 70.0 + i as f64 * 0.6).collect::<Vec<_>>());
        let out = RsiMomentum
            .analyze(&series, &serde_json::json!({}))
            .unwrap();
        assert_eq!(out.signal_type, SignalType::Sell);
        assert!(out.targets[0] < out.entry && out.entry < out.stop);
    }

    #[test]
    fn neutral_band_holds() {
        let closes: Vec<f64> = (0..50)
            .map(|i| 100.0 + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let out = RsiMomentum
            .analyze(&candles(&closes), &serde_json::json!({}))
            .unwrap();
        assert_eq!(out.signal_type, SignalType::Hold);
        assert!(out.targets.is_empty());
    }

    #[test]
    fn custom_threshold_is_honored() {
        let series = oversold_series();
        // Threshold below the observed RSI: no buy.
        let out = RsiMomentum
            .analyze(&series, &serde_json::json!({"oversold": 1.0}))
            .unwrap();
        assert_eq!(out.signal_type, SignalType::Hold);
    }

    #[test]
    fn short_history_is_rejected() {
        let series = oversold_series();
        let err = RsiMomentum
            .analyze(&series[..10], &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, StrategyError::InsufficientHistory { .. }));
    }

    #[test]
    fn analysis_is_deterministic() {
        let series = oversold_series();
        let a = RsiMomentum.analyze(&series, &serde_json::json!({})).unwrap();
        let b = RsiMomentum.analyze(&series, &serde_json::json!({})).unwrap();
        assert_eq!(a, b);
    }
}
