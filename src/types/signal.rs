use serde::{Deserialize, Serialize};

use super::trade::Direction;

/// Candidate entry produced by the signal-generation layer. The trader only
/// consumes it; how it was computed is out of scope here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySignal {
    pub direction: Direction,
    /// Requested entry price, 0.0 = market.
    #[serde(default)]
    pub order_price: f64,
    /// Explicit stop-loss, 0.0 = derive from the context rule.
    #[serde(default)]
    pub stop_loss: f64,
    /// Explicit take-profit, 0.0 = derive from the context rule.
    #[serde(default)]
    pub take_profit: f64,
    pub timestamp: i64,
    /// Name of the context to trade under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub label: String,
    /// Entry timeout override in ms (0 = use the context rule).
    #[serde(default)]
    pub entry_timeout_ms: i64,
    /// Trade expiry (ms), 0 = never.
    #[serde(default)]
    pub expiry: i64,
}

impl EntrySignal {
    pub fn new(direction: Direction, timestamp: i64) -> Self {
        Self {
            direction,
            order_price: 0.0,
            stop_loss: 0.0,
            take_profit: 0.0,
            timestamp,
            context: None,
            label: String::new(),
            entry_timeout_ms: 0,
            expiry: 0,
        }
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context = Some(context.to_string());
        self
    }

    pub fn with_levels(mut self, stop_loss: f64, take_profit: f64) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    pub fn with_order_price(mut self, order_price: f64) -> Self {
        self.order_price = order_price;
        self
    }
}
