//! Deterministic technical indicators.
//!
//! Contracts (fixed, do not "improve"):
//! - SMA(n): arithmetic mean of the last n values.
//! - EMA(n): seeded with SMA(n), then `ema = alpha*x + (1-alpha)*ema`,
//!   alpha = 2/(n+1).
//! - RSI(n): Wilder smoothing of gains/losses, `100 - 100/(1+RS)`.
//! - MACD: EMA(12) - EMA(26); signal line = EMA(9) of the MACD series.
//! - ATR(n): Wilder smoothing of true range,
//!   TR = max(high-low, |high-prev_close|, |low-prev_close|).
//! - Bollinger(n, k): mid = SMA(n); bands = mid ± k * population stdev.
//!
//! All functions return `None` when the series is too short.

use ata_schemas::Candle;

/// Arithmetic mean of the last `n` values.
pub fn sma(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 || values.len() < n {
        return None;
    }
    let tail = &values[values.len() - n..];
    Some(tail.iter().sum::<f64>() / n as f64)
}

/// Full EMA series: element 0 is the SMA seed over `values[..n]`, element i
/// corresponds to `values[n - 1 + i]`. Empty when the input is too short.
pub fn ema_series(values: &[f64], n: usize) -> Vec<f64> {
    if n == 0 || values.len() < n {
        return Vec::new();
    }
    let alpha = 2.0 / (n as f64 + 1.0);
    let seed = values[..n].iter().sum::<f64>() / n as f64;

    let mut out = Vec::with_capacity(values.len() - n + 1);
    out.push(seed);
    let mut ema = seed;
    for &x in &values[n..] {
        ema = alpha * x + (1.0 - alpha) * ema;
        out.push(ema);
    }
    out
}

/// Final EMA(n) over the whole series.
pub fn ema(values: &[f64], n: usize) -> Option<f64> {
    ema_series(values, n).last().copied()
}

/// Wilder RSI over `period` deltas. Needs `period + 1` values.
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for w in values[..period + 1].windows(2) {
        let delta = w[1] - w[0];
        if delta > 0.0 {
            avg_gain += delta;
        } else {
            avg_loss -= delta;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for w in values[period..].windows(2) {
        let delta = w[1] - w[0];
        let (gain, loss) = if delta > 0.0 {
            (delta, 0.0)
        } else {
            (0.0, -delta)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD(fast, slow, signal) series; element i of the returned Vec is aligned
/// to `values[slow - 1 + i]`. Needs `slow + signal_n - 1` values for a
/// populated signal line.
pub fn macd_series(values: &[f64], fast: usize, slow: usize, signal_n: usize) -> Vec<Macd> {
    if fast >= slow || values.len() < slow + signal_n - 1 {
        return Vec::new();
    }

    let fast_series = ema_series(values, fast); // starts at index fast-1
    let slow_series = ema_series(values, slow); // starts at index slow-1

    // Align both to index slow-1.
    let offset = slow - fast;
    let macd_line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, s)| fast_series[i + offset] - s)
        .collect();

    let signal_series = ema_series(&macd_line, signal_n); // starts at macd_line[signal_n-1]

    signal_series
        .iter()
        .enumerate()
        .map(|(i, &sig)| {
            let m = macd_line[i + signal_n - 1];
            Macd {
                macd: m,
                signal: sig,
                histogram: m - sig,
            }
        })
        .collect()
}

/// Latest MACD(12, 26, 9) per the indicator contract.
pub fn macd(values: &[f64]) -> Option<Macd> {
    macd_series(values, 12, 26, 9).last().copied()
}

/// Wilder ATR over `period` true ranges. Needs `period + 1` candles.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let tr = |prev: &Candle, cur: &Candle| -> f64 {
        let hl = cur.high - cur.low;
        let hc = (cur.high - prev.close).abs();
        let lc = (cur.low - prev.close).abs();
        hl.max(hc).max(lc)
    };

    let mut atr = 0.0;
    for w in candles[..period + 1].windows(2) {
        atr += tr(&w[0], &w[1]);
    }
    atr /= period as f64;

    for w in candles[period..].windows(2) {
        atr = (atr * (period as f64 - 1.0) + tr(&w[0], &w[1])) / period as f64;
    }
    Some(atr)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bollinger {
    pub upper: f64,
    pub mid: f64,
    pub lower: f64,
}

/// Bollinger Bands over the last `n` values with `k` standard deviations
/// (population stdev).
pub fn bollinger(values: &[f64], n: usize, k: f64) -> Option<Bollinger> {
    let mid = sma(values, n)?;
    let tail = &values[values.len() - n..];
    let var = tail.iter().map(|v| (v - mid) * (v - mid)).sum::<f64>() / n as f64;
    let dev = var.sqrt();
    Some(Bollinger {
        upper: mid + k * dev,
        mid,
        lower: mid - k * dev,
    })
}
