//! Environment-driven configuration.
//!
//! Every recognized variable has a hard default except `DATABASE_URL`, which
//! is required. `main.rs` loads `.env.local` via dotenvy before calling
//! [`AppConfig::from_env`]; production injects env vars directly.

use anyhow::{anyhow, Context, Result};
use ata_schemas::OrderType;

pub const ENV_DB_URL: &str = "DATABASE_URL";

// ---------------------------------------------------------------------------
// Config sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// HTTP bind port for the daemon.
    pub port: u16,
    pub broker: BrokerConfig,
    pub market: MarketDataConfig,
    pub signals: SignalConfig,
    pub orchestration: OrchestrationConfig,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Base URL of the broker bridge (account / orders / quotes / candles).
    pub base_url: String,
    /// Per-call deadline for broker HTTP requests.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct MarketDataConfig {
    /// Watchlist; empty disables the ingester.
    pub symbols: Vec<String>,
    pub ingest_interval_secs: u64,
    /// Daily candles backfilled per symbol at startup and every 24 h.
    pub candle_backfill: u32,
    /// Quotes older than this are considered stale by readers.
    pub stale_quote_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub interval_secs: u64,
    /// Minimum candle history required before a symbol is evaluated.
    pub min_candles: usize,
    /// Signals below this confidence are discarded (HOLD exempt up to 0.7).
    pub min_confidence: f64,
    /// At or above this confidence, auto-orchestration fires.
    pub auto_trigger_threshold: f64,
    pub auto_orchestration_enabled: bool,
    /// Window for suppressing duplicate (symbol, strategy, type) emissions.
    pub dedup_window_secs: i64,
    /// Pending signals expire this long after generation.
    pub ttl_secs: i64,
    /// Cadence of the idempotent expiration sweep.
    pub expire_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct OrchestrationConfig {
    pub memory_url: Option<String>,
    pub planner_url: Option<String>,
    pub research_url: Option<String>,
    /// Max memories recalled per run.
    pub recall_limit: u32,
    /// Max recent pending signals gathered per run.
    pub gather_limit: i64,
    pub memory_timeout_secs: u64,
    pub planner_timeout_secs: u64,
    pub research_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Fail-closed kill switch: false refuses every execute request.
    pub enabled: bool,
    pub max_risk_per_trade: f64,
    pub max_position_value_pct: f64,
    pub max_open_positions: i64,
    pub max_daily_loss: f64,
    pub default_order_type: OrderType,
    pub min_position_size: i64,
    pub max_position_size: i64,
    pub reconcile_interval_secs: u64,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Read the full configuration from the process environment.
    ///
    /// Fails only on a missing `DATABASE_URL` or an unparseable value; an
    /// unset optional variable falls back to its documented default.
    pub fn from_env() -> Result<Self> {
        let database_url =
            std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

        let default_order_type = {
            let raw = env_string("DEFAULT_ORDER_TYPE", "LMT");
            OrderType::parse(&raw)
                .ok_or_else(|| anyhow!("DEFAULT_ORDER_TYPE must be LMT or MKT, got {raw:?}"))?
        };

        Ok(Self {
            database_url,
            port: env_parse("PORT", 8080)?,
            broker: BrokerConfig {
                base_url: env_string("IB_BRIDGE_URL", "http://127.0.0.1:5000"),
                timeout_secs: env_parse("BROKER_TIMEOUT_SECS", 10)?,
            },
            market: MarketDataConfig {
                symbols: env_symbol_list("MARKET_SYMBOLS"),
                ingest_interval_secs: env_parse("INGEST_INTERVAL_SECS", 60)?,
                candle_backfill: env_parse("CANDLE_BACKFILL", 250)?,
                stale_quote_secs: env_parse("STALE_QUOTE_SECONDS", 120)?,
            },
            signals: SignalConfig {
                interval_secs: env_parse("SIGNAL_INTERVAL_SECS", 300)?,
                min_candles: env_parse("SIGNAL_MIN_CANDLES", 50)?,
                min_confidence: env_parse("SIGNAL_MIN_CONFIDENCE", 0.6)?,
                auto_trigger_threshold: env_parse("AUTO_TRIGGER_THRESHOLD", 0.75)?,
                auto_orchestration_enabled: env_bool("AUTO_ORCHESTRATION_ENABLED", true),
                dedup_window_secs: env_parse("SIGNAL_DEDUP_WINDOW_SECS", 3_600)?,
                ttl_secs: env_parse("SIGNAL_TTL_SECS", 86_400)?,
                expire_interval_secs: env_parse("SIGNAL_EXPIRE_INTERVAL_SECS", 60)?,
            },
            orchestration: OrchestrationConfig {
                memory_url: env_opt_string("MEMORY_SERVICE_URL"),
                planner_url: env_opt_string("PLANNER_URL"),
                research_url: env_opt_string("RESEARCH_URL"),
                recall_limit: env_parse("ORCH_RECALL_LIMIT", 8)?,
                gather_limit: env_parse("ORCH_GATHER_LIMIT", 5)?,
                memory_timeout_secs: env_parse("MEMORY_TIMEOUT_SECS", 5)?,
                planner_timeout_secs: env_parse("PLANNER_TIMEOUT_SECS", 30)?,
                research_timeout_secs: env_parse("RESEARCH_TIMEOUT_SECS", 30)?,
            },
            execution: ExecutionConfig {
                enabled: env_bool("EXECUTION_ENABLED", false),
                max_risk_per_trade: env_parse("MAX_RISK_PER_TRADE", 0.01)?,
                max_position_value_pct: env_parse("MAX_POSITION_VALUE_PCT", 0.20)?,
                max_open_positions: env_parse("MAX_OPEN_POSITIONS", 5)?,
                max_daily_loss: env_parse("MAX_DAILY_LOSS", 1_000.0)?,
                default_order_type,
                min_position_size: env_parse("MIN_POSITION_SIZE", 1)?,
                max_position_size: env_parse("MAX_POSITION_SIZE", 10_000)?,
                reconcile_interval_secs: env_parse("RECONCILE_INTERVAL_SECS", 30)?,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => v == "1" || v.eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow!("invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}

/// Comma-separated symbol list; entries are trimmed and upper-cased.
fn env_symbol_list(key: &str) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
