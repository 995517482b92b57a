use serde::{Deserialize, Serialize};

use super::trade::{Direction, TradeKind};

/// How the distance of an exit rule is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceKind {
    /// Percentage of the entry price.
    Percent,
    /// Absolute price delta.
    Price,
}

/// Quantity sizing mode for trades opened under a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityMode {
    /// Fixed quantity per trade.
    Fixed,
    /// Size from the risk budget and the stop distance.
    RiskPct,
    /// Quantity owned by an installed handler; external option edits on the
    /// sizing parameters are rejected.
    Managed,
}

/// One exit rule: stop-loss, take-profit, or their dynamic variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitRule {
    /// Distance from entry.
    pub distance: f64,
    pub distance_kind: DistanceKind,
    /// Timeout in ms after which the timeout-distance condition is checked
    /// (0 = no timeout).
    #[serde(default)]
    pub timeout_ms: i64,
    /// Minimum profit percentage that must be exceeded within the timeout,
    /// otherwise the trade is force-closed.
    #[serde(default)]
    pub timeout_distance_pct: f64,
}

impl ExitRule {
    pub fn new(distance: f64, distance_kind: DistanceKind) -> Self {
        Self {
            distance,
            distance_kind,
            timeout_ms: 0,
            timeout_distance_pct: 0.0,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: i64, timeout_distance_pct: f64) -> Self {
        self.timeout_ms = timeout_ms;
        self.timeout_distance_pct = timeout_distance_pct;
        self
    }

    /// Stop-loss price for an entry in the given direction.
    pub fn stop_price(&self, entry_price: f64, direction: Direction) -> f64 {
        let delta = match self.distance_kind {
            DistanceKind::Percent => entry_price * self.distance / 100.0,
            DistanceKind::Price => self.distance,
        };
        entry_price - direction.factor() * delta
    }

    /// Take-profit price for an entry in the given direction.
    pub fn target_price(&self, entry_price: f64, direction: Direction) -> f64 {
        let delta = match self.distance_kind {
            DistanceKind::Percent => entry_price * self.distance / 100.0,
            DistanceKind::Price => self.distance,
        };
        entry_price + direction.factor() * delta
    }
}

/// Entry admission rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EntryRule {
    /// Cancel the unfilled entry after this many ms (0 = none).
    #[serde(default)]
    pub timeout_ms: i64,
    /// Reject entries when the relative spread exceeds this (0 = no check).
    #[serde(default)]
    pub max_spread_pct: f64,
}

/// Named, reusable configuration bundle attachable to trades. Compiled once
/// (built, then registered behind an `Arc`), referenced by many trades
/// through its name key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub name: String,
    pub trade_kind: TradeKind,
    /// Max concurrent trades opened under this context.
    pub max_trades: u32,
    pub quantity_mode: QuantityMode,
    /// Base quantity (Fixed/Managed) or risk budget percentage (RiskPct).
    pub quantity: f64,
    #[serde(default)]
    pub entry: EntryRule,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<ExitRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<ExitRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_stop_loss: Option<ExitRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_take_profit: Option<ExitRule>,
}

impl Context {
    pub fn new(name: &str, trade_kind: TradeKind) -> Self {
        Self {
            name: name.to_string(),
            trade_kind,
            max_trades: 1,
            quantity_mode: QuantityMode::Fixed,
            quantity: 0.0,
            entry: EntryRule::default(),
            stop_loss: None,
            take_profit: None,
            dynamic_stop_loss: None,
            dynamic_take_profit: None,
        }
    }

    pub fn with_max_trades(mut self, max_trades: u32) -> Self {
        self.max_trades = max_trades;
        self
    }

    pub fn with_quantity(mut self, mode: QuantityMode, quantity: f64) -> Self {
        self.quantity_mode = mode;
        self.quantity = quantity;
        self
    }

    pub fn with_entry(mut self, entry: EntryRule) -> Self {
        self.entry = entry;
        self
    }

    pub fn with_stop_loss(mut self, rule: ExitRule) -> Self {
        self.stop_loss = Some(rule);
        self
    }

    pub fn with_take_profit(mut self, rule: ExitRule) -> Self {
        self.take_profit = Some(rule);
        self
    }

    /// Size a new trade for an entry at the given price with the given stop
    /// distance. RiskPct mode spends `quantity` percent of the account on
    /// the stop distance; the account value comes from the caller.
    pub fn size_quantity(&self, entry_price: f64, stop_price: f64, account_value: f64) -> f64 {
        match self.quantity_mode {
            QuantityMode::Fixed | QuantityMode::Managed => self.quantity,
            QuantityMode::RiskPct => {
                let risk_budget = account_value * self.quantity / 100.0;
                let stop_distance = (entry_price - stop_price).abs();
                if stop_distance > 0.0 {
                    risk_budget / stop_distance
                } else {
                    0.0
                }
            }
        }
    }
}
