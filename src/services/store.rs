//! SQLite persistence gateway.
//!
//! Narrow save/load contract: the trader dumps a versioned snapshot record
//! (trades, regions, alerts, id counters) and appends closed-trade history
//! rows. The storage engine itself is not part of the core.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::types::TradeRecord;

use super::trader::TraderSnapshot;

/// SQLite store for trader snapshots and closed-trade history.
pub struct SnapshotStore {
    conn: Mutex<Connection>,
}

impl SnapshotStore {
    /// Open (or create) a store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("Snapshot store initialized");
        Ok(store)
    }

    /// In-memory store (for testing and paper mode).
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory snapshot store initialized");
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trader_snapshots (
                strategy_id TEXT NOT NULL,
                market_id TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                snapshot_json TEXT NOT NULL,
                PRIMARY KEY (strategy_id, market_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trade_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                strategy_id TEXT NOT NULL,
                market_id TEXT NOT NULL,
                trade_id INTEGER NOT NULL,
                exit_reason TEXT NOT NULL,
                pnl_pct REAL NOT NULL,
                closed_at INTEGER NOT NULL,
                record_json TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trade_history_market
             ON trade_history(strategy_id, market_id, closed_at DESC)",
            [],
        )?;

        Ok(())
    }

    /// Persist the trader snapshot, replacing any previous one.
    pub fn save_snapshot(&self, snapshot: &TraderSnapshot) -> Result<(), StoreError> {
        let json = serde_json::to_string(snapshot)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO trader_snapshots (strategy_id, market_id, updated_at, snapshot_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(strategy_id, market_id)
             DO UPDATE SET updated_at = ?3, snapshot_json = ?4",
            params![
                snapshot.strategy_id,
                snapshot.market_id,
                chrono::Utc::now().timestamp_millis(),
                json
            ],
        )?;
        debug!(
            "Saved snapshot for {}/{} ({} trades)",
            snapshot.strategy_id,
            snapshot.market_id,
            snapshot.trades.len()
        );
        Ok(())
    }

    /// Load a previously saved snapshot.
    pub fn load_snapshot(
        &self,
        strategy_id: &str,
        market_id: &str,
    ) -> Result<TraderSnapshot, StoreError> {
        let conn = self.conn.lock().unwrap();
        let json: Option<String> = conn
            .query_row(
                "SELECT snapshot_json FROM trader_snapshots
                 WHERE strategy_id = ?1 AND market_id = ?2",
                params![strategy_id, market_id],
                |row| row.get(0),
            )
            .optional()?;

        let json = json.ok_or_else(|| {
            StoreError::SnapshotNotFound(format!("{}/{}", strategy_id, market_id))
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn delete_snapshot(&self, strategy_id: &str, market_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM trader_snapshots WHERE strategy_id = ?1 AND market_id = ?2",
            params![strategy_id, market_id],
        )?;
        Ok(())
    }

    /// Append a closed-trade record to the history.
    pub fn save_closed_trade(
        &self,
        strategy_id: &str,
        market_id: &str,
        record: &TradeRecord,
        closed_at: i64,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let exit_reason = serde_json::to_string(&record.exit_reason)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO trade_history
             (strategy_id, market_id, trade_id, exit_reason, pnl_pct, closed_at, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                strategy_id,
                market_id,
                record.id as i64,
                exit_reason.trim_matches('"'),
                record.realized_profit_loss_pct(),
                closed_at,
                json
            ],
        )?;
        Ok(())
    }

    /// Most recent closed trades for a market, newest first.
    pub fn closed_trades(
        &self,
        strategy_id: &str,
        market_id: &str,
        limit: usize,
    ) -> Result<Vec<TradeRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT record_json FROM trade_history
             WHERE strategy_id = ?1 AND market_id = ?2
             ORDER BY closed_at DESC LIMIT ?3",
        )?;

        let rows = stmt.query_map(params![strategy_id, market_id, limit as i64], |row| {
            row.get::<_, String>(0)
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str(&row?)?);
        }
        Ok(records)
    }
}
