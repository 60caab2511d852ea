//! Strategy capability set and evaluator output.

use ata_schemas::{Candle, SignalType};
use serde_json::Value;

/// Result of one strategy evaluation over a candle series.
///
/// `targets` is ordered nearest-first; the signal engine persists the first
/// target as `take_profit`.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyResult {
    pub signal_type: SignalType,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub entry: f64,
    pub stop: f64,
    pub targets: Vec<f64>,
    pub reasoning: String,
}

impl StrategyResult {
    /// A low-conviction HOLD with no actionable levels.
    pub fn hold(entry: f64, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            signal_type: SignalType::Hold,
            confidence,
            entry,
            stop: entry,
            targets: Vec::new(),
            reasoning: reasoning.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Integer,
    Float,
}

/// One entry in an evaluator's parameter schema. The registry loader checks
/// an artifact's `params` against this before registering it.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub key: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub const fn required(key: &'static str, kind: ParamKind) -> Self {
        Self {
            key,
            kind,
            required: true,
        }
    }

    pub const fn optional(key: &'static str, kind: ParamKind) -> Self {
        Self {
            key,
            kind,
            required: false,
        }
    }
}

/// Validate `params` against a schema: required keys present, all values of
/// the declared kind, no unknown keys.
pub fn validate_params(schema: &[ParamSpec], params: &Value) -> Result<(), String> {
    let obj = match params {
        Value::Object(m) => m,
        Value::Null => {
            if let Some(missing) = schema.iter().find(|s| s.required) {
                return Err(format!("missing required param {:?}", missing.key));
            }
            return Ok(());
        }
        other => return Err(format!("params must be an object, got {other}")),
    };

    for spec in schema {
        match obj.get(spec.key) {
            None if spec.required => return Err(format!("missing required param {:?}", spec.key)),
            None => {}
            Some(v) => {
                let ok = match spec.kind {
                    ParamKind::Integer => v.as_i64().is_some(),
                    ParamKind::Float => v.as_f64().is_some(),
                };
                if !ok {
                    return Err(format!(
                        "param {:?} must be a {}, got {v}",
                        spec.key,
                        match spec.kind {
                            ParamKind::Integer => "whole number",
                            ParamKind::Float => "number",
                        }
                    ));
                }
            }
        }
    }

    for key in obj.keys() {
        if !schema.iter().any(|s| s.key == key) {
            return Err(format!("unknown param {key:?}"));
        }
    }
    Ok(())
}

/// Typed param readers with defaults; values were shape-checked at load time.
pub fn param_usize(params: &Value, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

pub fn param_f64(params: &Value, key: &str, default: f64) -> f64 {
    params.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Strategy trait
// ---------------------------------------------------------------------------

/// Errors an evaluator may return. Evaluation failures never abort a tick;
/// the signal engine logs and moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    /// The candle series is shorter than the evaluator needs.
    InsufficientHistory { needed: usize, got: usize },
}

impl std::fmt::Display for StrategyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyError::InsufficientHistory { needed, got } => {
                write!(f, "insufficient history: need {needed} candles, got {got}")
            }
        }
    }
}

impl std::error::Error for StrategyError {}

/// The strategy capability set. Evaluators are pure: same candles + params in,
/// same result out. No IO handles, no clock, no RNG.
pub trait Strategy: Send + Sync {
    /// Stable evaluator name referenced by artifacts (e.g. `"rsi_momentum"`).
    fn id(&self) -> &'static str;

    /// Parameter schema the loader validates artifact params against.
    fn param_schema(&self) -> &'static [ParamSpec];

    /// Evaluate the series oldest-first and emit an intent.
    fn analyze(&self, candles: &[Candle], params: &Value) -> Result<StrategyResult, StrategyError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMA: &[ParamSpec] = &[
        ParamSpec::optional("period", ParamKind::Integer),
        ParamSpec::required("threshold", ParamKind::Float),
    ];

    #[test]
    fn valid_params_pass() {
        assert!(validate_params(SCHEMA, &json!({"period": 14, "threshold": 30.0})).is_ok());
        // Integer-valued JSON numbers satisfy Float kind.
        assert!(validate_params(SCHEMA, &json!({"threshold": 30})).is_ok());
    }

    #[test]
    fn missing_required_param_fails() {
        let err = validate_params(SCHEMA, &json!({"period": 14})).unwrap_err();
        assert!(err.contains("threshold"));
    }

    #[test]
    fn wrong_kind_fails() {
        let err = validate_params(SCHEMA, &json!({"period": 14.5, "threshold": 30.0})).unwrap_err();
        assert!(err.contains("period"));
    }

    #[test]
    fn unknown_key_fails() {
        let err = validate_params(SCHEMA, &json!({"threshold": 30.0, "bogus": 1})).unwrap_err();
        assert!(err.contains("bogus"));
    }

    #[test]
    fn null_params_need_no_required_keys() {
        const OPTIONAL_ONLY: &[ParamSpec] = &[ParamSpec::optional("period", ParamKind::Integer)];
        assert!(validate_params(OPTIONAL_ONLY, &Value::Null).is_ok());
        assert!(validate_params(SCHEMA, &Value::Null).is_err());
    }
}
