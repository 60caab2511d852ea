//! Position sizing from account state and signal stop distance.
//!
//! Deterministic and pure. Order of operations:
//! 1. risk budget = net_liquidation * max_risk_per_trade
//! 2. raw shares  = floor(risk budget / stop distance)
//! 3. clamp to [min_position_size, max_position_size]
//! 4. cap by position value (max_position_value_pct of net liquidation)
//! 5. verify buying power
//!
//! Recorded risk metrics use the post-clamp quantity, so
//! `risk_amount = quantity * stop_distance`.

use crate::error::ExecError;

#[derive(Debug, Clone, Copy)]
pub struct SizingInputs {
    pub net_liquidation: f64,
    pub buying_power: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub max_risk_per_trade: f64,
    pub max_position_value_pct: f64,
    pub min_position_size: i64,
    pub max_position_size: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSize {
    pub quantity: i64,
    /// `quantity * stop_distance`.
    pub risk_amount: f64,
    /// `risk_amount / net_liquidation`.
    pub risk_percent: f64,
    /// `quantity * entry_price`.
    pub position_value: f64,
}

pub fn compute_position_size(inp: &SizingInputs) -> Result<PositionSize, ExecError> {
    if inp.entry_price <= 0.0 || inp.net_liquidation <= 0.0 {
        return Err(ExecError::Validation(format!(
            "non-positive entry price ({}) or net liquidation ({})",
            inp.entry_price, inp.net_liquidation
        )));
    }

    let stop_distance = (inp.entry_price - inp.stop_loss).abs();
    if stop_distance == 0.0 {
        return Err(ExecError::ZeroStopDistance);
    }

    let risk_budget = inp.net_liquidation * inp.max_risk_per_trade;
    let mut quantity = (risk_budget / stop_distance).floor() as i64;

    quantity = quantity.clamp(inp.min_position_size, inp.max_position_size);

    // Value cap: never let one position exceed its share of the portfolio.
    let max_value = inp.net_liquidation * inp.max_position_value_pct;
    if quantity as f64 * inp.entry_price > max_value {
        quantity = (max_value / inp.entry_price).floor() as i64;
    }

    if quantity < inp.min_position_size {
        return Err(ExecError::Validation(format!(
            "sized quantity {quantity} below minimum {}",
            inp.min_position_size
        )));
    }

    let position_value = quantity as f64 * inp.entry_price;
    if position_value > inp.buying_power {
        return Err(ExecError::InsufficientBuyingPower {
            required: position_value,
            available: inp.buying_power,
        });
    }

    let risk_amount = quantity as f64 * stop_distance;
    Ok(PositionSize {
        quantity,
        risk_amount,
        risk_percent: risk_amount / inp.net_liquidation,
        position_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> SizingInputs {
        SizingInputs {
            net_liquidation: 100_000.0,
            buying_power: 200_000.0,
            entry_price: 150.0,
            stop_loss: 145.0,
            max_risk_per_trade: 0.01,
            max_position_value_pct: 0.20,
            min_position_size: 1,
            max_position_size: 10_000,
        }
    }

    /// The worked example: 100k account, 1% risk, entry 150 stop 145.
    /// Raw 200 shares is value-capped at 20% -> 133 shares, 19 950 value,
    /// 665 risk.
    #[test]
    fn value_cap_shrinks_raw_risk_sizing() {
        let size = compute_position_size(&base()).unwrap();
        assert_eq!(size.quantity, 133);
        assert!((size.position_value - 19_950.0).abs() < 1e-9);
        assert!((size.risk_amount - 665.0).abs() < 1e-9);
        assert!((size.risk_percent - 0.00665).abs() < 1e-9);
    }

    #[test]
    fn uncapped_sizing_uses_full_risk_budget() {
        // Wider stop: raw shares = floor(1000 / 25) = 40, value 6000 < cap.
        let inp = SizingInputs {
            stop_loss: 125.0,
            ..base()
        };
        let size = compute_position_size(&inp).unwrap();
        assert_eq!(size.quantity, 40);
        assert!((size.risk_amount - 1_000.0).abs() < 1e-9);
        assert!((size.position_value - 6_000.0).abs() < 1e-9);
    }

    #[test]
    fn zero_stop_distance_is_refused() {
        let inp = SizingInputs {
            stop_loss: 150.0,
            ..base()
        };
        assert_eq!(
            compute_position_size(&inp).unwrap_err(),
            ExecError::ZeroStopDistance
        );
    }

    #[test]
    fn sell_side_stop_above_entry_sizes_identically() {
        let inp = SizingInputs {
            stop_loss: 155.0,
            ..base()
        };
        let size = compute_position_size(&inp).unwrap();
        assert_eq!(size.quantity, 133); // same 5-point distance, same cap
    }

    #[test]
    fn max_position_size_clamps_before_value_cap() {
        let inp = SizingInputs {
            max_position_size: 50,
            ..base()
        };
        let size = compute_position_size(&inp).unwrap();
        assert_eq!(size.quantity, 50);
        assert!((size.risk_amount - 250.0).abs() < 1e-9);
    }

    #[test]
    fn min_position_size_floors_tiny_budgets() {
        // Risk budget 10, stop distance 5 -> raw 2 shares; min 5 lifts it.
        let inp = SizingInputs {
            net_liquidation: 1_000.0,
            buying_power: 1_000.0,
            min_position_size: 5,
            max_position_value_pct: 1.0,
            ..base()
        };
        let size = compute_position_size(&inp).unwrap();
        assert_eq!(size.quantity, 5);
    }

    #[test]
    fn insufficient_buying_power_is_refused() {
        let inp = SizingInputs {
            buying_power: 1_000.0,
            ..base()
        };
        match compute_position_size(&inp).unwrap_err() {
            ExecError::InsufficientBuyingPower {
                required,
                available,
            } => {
                assert!((required - 19_950.0).abs() < 1e-9);
                assert_eq!(available, 1_000.0);
            }
            other => panic!("expected buying-power refusal, got {other:?}"),
        }
    }

    #[test]
    fn value_cap_below_minimum_is_a_validation_failure() {
        // Cap allows 0 shares of a 150 stock: 10 * 0.002 = value cap 20.
        let inp = SizingInputs {
            net_liquidation: 10_000.0,
            max_position_value_pct: 0.002,
            ..base()
        };
        assert!(matches!(
            compute_position_size(&inp).unwrap_err(),
            ExecError::Validation(_)
        ));
    }

    /// Portfolio-cap property: quantity * entry <= nl * pct + epsilon, and
    /// risk_amount <= nl * risk + epsilon, across a parameter sweep.
    #[test]
    fn caps_hold_across_sweep() {
        for nl in [10_000.0, 50_000.0, 100_000.0, 1_000_000.0] {
            for (entry, stop) in [(10.0, 9.5), (150.0, 145.0), (3_000.0, 2_900.0)] {
                let inp = SizingInputs {
                    net_liquidation: nl,
                    buying_power: nl * 4.0,
                    entry_price: entry,
                    stop_loss: stop,
                    ..base()
                };
                let Ok(size) = compute_position_size(&inp) else {
                    continue;
                };
                assert!(
                    size.position_value <= nl * inp.max_position_value_pct + 1e-6,
                    "value cap violated: {size:?} for nl={nl} entry={entry}"
                );
                assert!(
                    size.risk_amount <= nl * inp.max_risk_per_trade + 1e-6,
                    "risk cap violated: {size:?} for nl={nl} entry={entry}"
                );
            }
        }
    }
}
