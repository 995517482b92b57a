use std::env;

/// Engine configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier of the owning strategy (keys events and snapshots).
    pub strategy_id: String,
    /// SQLite database path for snapshots and closed-trade history.
    pub db_path: String,
    /// Paper/simulation mode: closed trades are not persisted to history.
    pub paper_mode: bool,
    /// Tick period for the processing loop, in milliseconds.
    pub tick_interval_ms: u64,
    /// Capacity of the trader event broadcast channel.
    pub event_capacity: usize,
    /// Closed trades kept per history bucket before eviction.
    pub history_retention: usize,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        Self {
            strategy_id: env::var("SPECTRE_STRATEGY_ID").unwrap_or_else(|_| "default".to_string()),
            db_path: env::var("SPECTRE_DB_PATH").unwrap_or_else(|_| "spectre.db".to_string()),
            paper_mode: env::var("SPECTRE_PAPER_MODE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
            tick_interval_ms: env::var("SPECTRE_TICK_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1_000),
            event_capacity: env::var("SPECTRE_EVENT_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1_024),
            history_retention: env::var("SPECTRE_HISTORY_RETENTION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy_id: "default".to_string(),
            db_path: "spectre.db".to_string(),
            paper_mode: true,
            tick_interval_ms: 1_000,
            event_capacity: 1_024,
            history_retention: 500,
        }
    }
}
