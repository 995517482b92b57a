use serde::{Deserialize, Serialize};

use super::alert::AlertResult;
use super::trade::TradeRecord;

/// Events published on the trader stream, keyed by (strategy, market).
/// The transport is out of scope; the core only ever calls `publish`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TraderEvent {
    TradeEntry {
        strategy_id: String,
        market_id: String,
        trade: TradeRecord,
        timestamp: i64,
    },
    TradeUpdate {
        strategy_id: String,
        market_id: String,
        trade: TradeRecord,
        timestamp: i64,
    },
    TradeExit {
        strategy_id: String,
        market_id: String,
        trade: TradeRecord,
        timestamp: i64,
    },
    AlertFired {
        strategy_id: String,
        market_id: String,
        alert: AlertResult,
        timestamp: i64,
    },
    RegionAdded {
        strategy_id: String,
        market_id: String,
        region_id: u64,
        timestamp: i64,
    },
    RegionRemoved {
        strategy_id: String,
        market_id: String,
        region_id: u64,
        timestamp: i64,
    },
}

impl TraderEvent {
    pub fn market_id(&self) -> &str {
        match self {
            TraderEvent::TradeEntry { market_id, .. }
            | TraderEvent::TradeUpdate { market_id, .. }
            | TraderEvent::TradeExit { market_id, .. }
            | TraderEvent::AlertFired { market_id, .. }
            | TraderEvent::RegionAdded { market_id, .. }
            | TraderEvent::RegionRemoved { market_id, .. } => market_id,
        }
    }
}
