//! Periodic signal generation over the registry snapshot.
//!
//! Per symbol and tick: load candles, run every registered strategy in
//! deterministic order, filter by confidence and price invariants, dedup,
//! persist, and hand high-confidence signals to the orchestration
//! auto-trigger channel. A strategy panic is caught and logged per symbol;
//! it never aborts the tick.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use ata_config::SignalConfig;
use ata_schemas::{Signal, SignalStatus, SignalType};
use ata_strategy::{StrategyRegistry, StrategyResult};
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Shared handle to the current registry snapshot. Reloads publish a new
/// `Arc<StrategyRegistry>`; readers clone the Arc and never observe a torn
/// catalog.
pub type RegistryHandle = Arc<RwLock<Arc<StrategyRegistry>>>;

/// Hand-off to the orchestration engine for signals at or above the
/// auto-trigger threshold.
#[derive(Debug, Clone)]
pub struct AutoTrigger {
    pub signal_id: Uuid,
    pub symbol: String,
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Per-symbol outcome; a failing symbol never aborts a multi-symbol batch.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub signals: Vec<Signal>,
    /// Set when the symbol was skipped (e.g. insufficient history).
    pub skipped: Option<String>,
    pub suppressed_duplicates: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateReport {
    pub outcomes: Vec<SymbolOutcome>,
    pub count: usize,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Result filter
// ---------------------------------------------------------------------------

/// Decide whether a strategy result may be persisted.
///
/// HOLD survives only at confidence >= 0.7; actionable signals need at least
/// `min_confidence`. Returns the rejection reason otherwise.
pub fn accept_result(result: &StrategyResult, cfg: &SignalConfig) -> Result<(), &'static str> {
    if !(0.0..=1.0).contains(&result.confidence) {
        return Err("confidence out of range");
    }
    match result.signal_type {
        SignalType::Hold => {
            if result.confidence < 0.7 {
                Err("low-confidence hold")
            } else {
                Ok(())
            }
        }
        SignalType::Buy | SignalType::Sell => {
            if result.confidence < cfg.min_confidence {
                Err("below minimum confidence")
            } else {
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SignalEngine {
    pool: PgPool,
    cfg: SignalConfig,
    registry: RegistryHandle,
    auto_trigger_tx: Option<mpsc::Sender<AutoTrigger>>,
}

impl SignalEngine {
    pub fn new(
        pool: PgPool,
        cfg: SignalConfig,
        registry: RegistryHandle,
        auto_trigger_tx: Option<mpsc::Sender<AutoTrigger>>,
    ) -> Self {
        Self {
            pool,
            cfg,
            registry,
            auto_trigger_tx,
        }
    }

    /// Evaluate one batch of symbols. Per-symbol failures are captured in
    /// the outcome list, never propagated.
    pub async fn generate_for_symbols(&self, symbols: &[String]) -> GenerateReport {
        let started = std::time::Instant::now();
        let registry = self.registry.read().await.clone();

        let mut outcomes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            outcomes.push(self.generate_for_symbol(symbol, &registry).await);
        }

        let count = outcomes.iter().map(|o| o.signals.len()).sum();
        GenerateReport {
            outcomes,
            count,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn generate_for_symbol(
        &self,
        symbol: &str,
        registry: &StrategyRegistry,
    ) -> SymbolOutcome {
        let mut outcome = SymbolOutcome {
            symbol: symbol.to_string(),
            signals: Vec::new(),
            skipped: None,
            suppressed_duplicates: 0,
        };

        let fetch_n = (self.cfg.min_candles as i64).max(250);
        let candles = match ata_db::md::fetch_recent_candles(&self.pool, symbol, fetch_n).await {
            Ok(c) => c,
            Err(e) => {
                warn!(symbol, error = %e, "candle load failed");
                outcome.skipped = Some(format!("candle load failed: {e}"));
                return outcome;
            }
        };

        if candles.len() < self.cfg.min_candles {
            warn!(
                symbol,
                got = candles.len(),
                need = self.cfg.min_candles,
                "insufficient candle history, skipping symbol"
            );
            outcome.skipped = Some(format!(
                "insufficient history: {} of {} candles",
                candles.len(),
                self.cfg.min_candles
            ));
            return outcome;
        }

        // Stale quotes are advisory only; candles drive the analysis.
        match ata_db::md::fetch_quote(&self.pool, symbol).await {
            Ok(Some(_)) => {}
            Ok(None) => debug!(symbol, "no quote row yet"),
            Err(e) => warn!(symbol, error = %e, "quote load failed"),
        }

        for entry in registry.entries() {
            // A panicking evaluator is a bug in that strategy, not a reason
            // to lose the rest of the tick.
            let analysis = std::panic::catch_unwind(AssertUnwindSafe(|| {
                entry.evaluator.analyze(&candles, &entry.params)
            }));

            let result = match analysis {
                Ok(Ok(r)) => r,
                Ok(Err(e)) => {
                    debug!(symbol, strategy = %entry.strategy_id, error = %e, "strategy declined");
                    continue;
                }
                Err(_) => {
                    error!(symbol, strategy = %entry.strategy_id, "strategy panicked");
                    continue;
                }
            };

            if let Err(reason) = accept_result(&result, &self.cfg) {
                debug!(symbol, strategy = %entry.strategy_id, reason, "result discarded");
                continue;
            }

            let now = Utc::now();
            let signal = Signal {
                id: Uuid::new_v4(),
                symbol: symbol.to_string(),
                strategy_id: entry.strategy_id.clone(),
                signal_type: result.signal_type,
                confidence: result.confidence,
                entry_price: result.entry,
                stop_loss: result.stop,
                take_profit: result.targets.first().copied().unwrap_or(result.entry),
                reasoning: result.reasoning.clone(),
                status: SignalStatus::Pending,
                generated_at: now,
                expires_at: now + chrono::Duration::seconds(self.cfg.ttl_secs),
                orchestration_run_id: None,
                created_at: now,
            };

            if !signal.price_levels_valid() {
                warn!(
                    symbol, strategy = %entry.strategy_id,
                    entry = signal.entry_price, stop = signal.stop_loss, target = signal.take_profit,
                    "price invariant violated, signal discarded"
                );
                continue;
            }

            match ata_db::signals::has_active_duplicate(
                &self.pool,
                symbol,
                &entry.strategy_id,
                signal.signal_type,
                now,
                self.cfg.dedup_window_secs,
            )
            .await
            {
                Ok(true) => {
                    debug!(symbol, strategy = %entry.strategy_id, "duplicate suppressed");
                    outcome.suppressed_duplicates += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(symbol, error = %e, "dedup probe failed, skipping strategy");
                    continue;
                }
            }

            match ata_db::signals::insert_signal(&self.pool, &signal).await {
                Ok(true) => {
                    info!(
                        symbol,
                        strategy = %entry.strategy_id,
                        signal_id = %signal.id,
                        signal_type = signal.signal_type.as_str(),
                        confidence = signal.confidence,
                        "signal persisted"
                    );
                    self.maybe_auto_trigger(&signal).await;
                    outcome.signals.push(signal);
                }
                Ok(false) => {
                    // Lost the insert race inside the same hour bucket.
                    debug!(symbol, strategy = %entry.strategy_id, "bucket conflict suppressed");
                    outcome.suppressed_duplicates += 1;
                }
                Err(e) => warn!(symbol, error = %e, "signal persist failed"),
            }
        }

        outcome
    }

    async fn maybe_auto_trigger(&self, signal: &Signal) {
        if !self.cfg.auto_orchestration_enabled
            || signal.signal_type == SignalType::Hold
            || signal.confidence < self.cfg.auto_trigger_threshold
        {
            return;
        }
        let Some(tx) = &self.auto_trigger_tx else {
            return;
        };

        let trigger = AutoTrigger {
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            confidence: signal.confidence,
        };
        // Bounded channel: a full queue means orchestration is saturated;
        // dropping here is the documented coalescing behavior.
        if let Err(e) = tx.try_send(trigger) {
            debug!(symbol = %signal.symbol, error = %e, "auto-trigger coalesced");
        }
    }

    /// Drive the periodic tick until `shutdown` flips true. Takes an `Arc`
    /// so the manual generate endpoint can share the same engine.
    pub async fn run(self: Arc<Self>, symbols: Vec<String>, mut shutdown: watch::Receiver<bool>) {
        if symbols.is_empty() {
            info!("signal engine disabled: empty watchlist");
            return;
        }

        info!(
            symbols = symbols.len(),
            interval_secs = self.cfg.interval_secs,
            "signal engine starting"
        );

        let mut ticker = tokio::time::interval(Duration::from_secs(self.cfg.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("signal engine stopping");
                        return;
                    }
                    continue;
                }
            }

            let report = self.generate_for_symbols(&symbols).await;
            debug!(
                count = report.count,
                duration_ms = report.duration_ms,
                "signal tick complete"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
