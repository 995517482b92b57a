use serde::{Deserialize, Serialize};

use super::trade::Direction;

/// Market/quote state for one traded instrument.
///
/// Updated by the market-data path, read by the tick loop. The trader keeps
/// it under its outer lock; collaborators receive cheap clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    /// Market identifier (e.g. "BTCUSDT").
    pub market_id: String,
    /// Human symbol (e.g. "BTC").
    pub symbol: String,
    /// Best bid.
    pub bid: f64,
    /// Best ask.
    pub ask: f64,
    /// Whether orders may currently be submitted for this market.
    pub tradeable: bool,
    /// Last quote update (ms).
    pub last_update: i64,
}

impl Instrument {
    pub fn new(market_id: String, symbol: String) -> Self {
        Self {
            market_id,
            symbol,
            bid: 0.0,
            ask: 0.0,
            tradeable: false,
            last_update: 0,
        }
    }

    /// Apply a new quote.
    pub fn update_quote(&mut self, bid: f64, ask: f64, timestamp: i64) {
        self.bid = bid;
        self.ask = ask;
        self.last_update = timestamp;
    }

    /// Mid price.
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) * 0.5
    }

    /// Absolute bid/ask spread.
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    /// The realistic fill price for an immediate market exit of a position
    /// in the given direction: ask for long exits, bid for short exits.
    pub fn closable_exec_price(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Long => self.ask,
            Direction::Short => self.bid,
        }
    }

    /// The realistic fill price for an immediate market entry.
    pub fn open_exec_price(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Long => self.ask,
            Direction::Short => self.bid,
        }
    }
}
