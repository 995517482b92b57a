use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::BrokerError;
use crate::services::broker::Broker;

use super::instrument::Instrument;
use super::operations::TradeOperation;

/// Trade direction. Long buys to open, short sells to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Signed factor: +1 for long, -1 for short.
    pub fn factor(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Trade variant. Dispatch is by tag, not inheritance: the capability set
/// is small (`close`, `cancel_open`, `update_dirty`, `estimate_profit_loss`)
/// and each variant adjusts only the parts that differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeKind {
    /// Spot asset trade: buys the asset itself, long only.
    Asset,
    /// Leveraged margin trade sharing account margin.
    Margin,
    /// Broker-side position trade, reconciled through position events.
    Position,
    /// Margin trade with isolated (independent) margin.
    IndMargin,
}

impl TradeKind {
    /// Whether this variant is reconciled through position events in
    /// addition to order events.
    pub fn uses_position_events(&self) -> bool {
        !matches!(self, TradeKind::Asset)
    }

    pub fn is_spot(&self) -> bool {
        matches!(self, TradeKind::Asset)
    }
}

impl std::fmt::Display for TradeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeKind::Asset => write!(f, "asset"),
            TradeKind::Margin => write!(f, "margin"),
            TradeKind::Position => write!(f, "position"),
            TradeKind::IndMargin => write!(f, "ind_margin"),
        }
    }
}

/// Lifecycle state. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeState {
    /// Entry order submitted, nothing filled yet.
    Pending,
    /// At least one entry fill realized.
    Active,
    /// Exit order submitted.
    Closing,
    /// Exit fully filled.
    Closed,
    /// Entry pulled before any fill.
    Canceled,
    /// Broker reconciliation irrecoverable; held for operator inspection.
    Error,
}

impl std::fmt::Display for TradeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeState::Pending => write!(f, "pending"),
            TradeState::Active => write!(f, "active"),
            TradeState::Closing => write!(f, "closing"),
            TradeState::Closed => write!(f, "closed"),
            TradeState::Canceled => write!(f, "canceled"),
            TradeState::Error => write!(f, "error"),
        }
    }
}

/// Why a trade left the active list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    #[default]
    None,
    /// Force-closed by the profit-conditioned trade timeout.
    MarketTimeout,
    /// Closed manually or by a handler.
    Closed,
    /// Stop-loss hit, closed by market order.
    StopLossMarket,
    /// Stop-loss covered by a resting limit order.
    StopLossLimit,
    /// Take-profit covered by a resting limit order.
    TakeProfitLimit,
    /// Take-profit hit, closed by market order.
    TakeProfitMarket,
    /// Pending entry canceled after the entry timeout elapsed.
    CanceledTimeout,
    /// Pending entry canceled because the target was reached before any fill.
    CanceledTargeted,
    /// Pending entry canceled by operator command.
    CanceledManually,
}

impl ExitReason {
    /// True for the cancel family: nothing was realized, statistics skip it.
    pub fn is_canceled(&self) -> bool {
        matches!(
            self,
            ExitReason::CanceledTimeout
                | ExitReason::CanceledTargeted
                | ExitReason::CanceledManually
        )
    }
}

/// One order/position lifecycle instance for an instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Trader-local monotonic id, assigned on creation.
    pub id: u64,
    pub kind: TradeKind,
    pub state: TradeState,
    pub direction: Direction,

    /// Requested entry price (0.0 for market entries).
    pub order_price: f64,
    /// Volume-weighted average of realized entry fills.
    pub entry_price: f64,
    /// Volume-weighted average of realized exit fills.
    pub exit_price: f64,
    /// Stop-loss price, 0.0 = no stop.
    pub stop_loss: f64,
    /// Take-profit price, 0.0 = no target.
    pub take_profit: f64,

    pub order_quantity: f64,
    pub exec_entry_qty: f64,
    pub exec_exit_qty: f64,
    /// A partial fill changed the entry quantity since dependent exit
    /// orders were last synchronized.
    pub is_dirty: bool,

    /// When the entry order was submitted (ms).
    pub entry_open_time: i64,
    /// First realized entry fill (ms).
    pub first_realized_entry_time: i64,
    /// Last realized exit fill (ms).
    pub last_realized_exit_time: i64,
    /// Entry timeout in ms, 0 = none.
    pub entry_timeout: i64,
    /// Trade expiry timestamp (ms), 0 = never.
    pub expiry: i64,

    pub label: String,
    /// Key into the trader's context registry; never an owning reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub exit_reason: ExitReason,
    /// Ordered conditional micro-actions evaluated every tick.
    #[serde(default)]
    pub operations: Vec<TradeOperation>,

    /// Best (most profitable) execution price seen while active.
    pub best_price: f64,
    /// Worst execution price seen while active.
    pub worst_price: f64,

    // Broker linkage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_id: Option<String>,
    /// Client reference id sent with the entry order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_ref_id: Option<String>,
}

impl Trade {
    pub fn new(
        id: u64,
        kind: TradeKind,
        direction: Direction,
        order_price: f64,
        order_quantity: f64,
        timestamp: i64,
    ) -> Self {
        Self {
            id,
            kind,
            state: TradeState::Pending,
            direction,
            order_price,
            entry_price: 0.0,
            exit_price: 0.0,
            stop_loss: 0.0,
            take_profit: 0.0,
            order_quantity,
            exec_entry_qty: 0.0,
            exec_exit_qty: 0.0,
            is_dirty: false,
            entry_open_time: timestamp,
            first_realized_entry_time: 0,
            last_realized_exit_time: 0,
            entry_timeout: 0,
            expiry: 0,
            label: String::new(),
            context: None,
            exit_reason: ExitReason::None,
            operations: Vec::new(),
            best_price: 0.0,
            worst_price: 0.0,
            open_order_id: None,
            stop_order_id: None,
            limit_order_id: None,
            position_id: None,
            open_ref_id: None,
        }
    }

    // ==========================================================================
    // State queries
    // ==========================================================================

    pub fn is_pending(&self) -> bool {
        self.state == TradeState::Pending
    }

    /// Entry quantity realized and the trade is still in the market.
    pub fn is_active(&self) -> bool {
        matches!(self.state, TradeState::Active | TradeState::Closing) && self.exec_entry_qty > 0.0
    }

    pub fn is_closing(&self) -> bool {
        self.state == TradeState::Closing
    }

    pub fn is_closed(&self) -> bool {
        self.state == TradeState::Closed
    }

    pub fn is_error(&self) -> bool {
        self.state == TradeState::Error
    }

    /// Removable from the active list. Never true for pending, active or
    /// closing trades; `Error` trades require explicit operator removal.
    pub fn can_delete(&self) -> bool {
        matches!(self.state, TradeState::Closed | TradeState::Canceled)
    }

    /// Quantity still in the market.
    pub fn remaining_quantity(&self) -> f64 {
        self.exec_entry_qty - self.exec_exit_qty
    }

    // ==========================================================================
    // Fill bookkeeping
    // ==========================================================================

    /// Apply a realized entry fill. Maintains the VWAP entry price and the
    /// quantity invariant `exec_entry_qty <= order_quantity`.
    pub fn add_entry_fill(&mut self, quantity: f64, price: f64, timestamp: i64) {
        if quantity <= 0.0 || !matches!(self.state, TradeState::Pending | TradeState::Active) {
            return;
        }

        let applied = quantity.min(self.order_quantity - self.exec_entry_qty);
        if applied <= 0.0 {
            warn!(
                "Trade {} entry overfill ignored: {} beyond order quantity {}",
                self.id, quantity, self.order_quantity
            );
            return;
        }

        let prev_qty = self.exec_entry_qty;
        self.exec_entry_qty += applied;
        self.entry_price =
            (self.entry_price * prev_qty + price * applied) / self.exec_entry_qty;

        if self.first_realized_entry_time == 0 {
            self.first_realized_entry_time = timestamp;
        }

        if self.state == TradeState::Pending {
            self.state = TradeState::Active;
            self.best_price = price;
            self.worst_price = price;
        }

        // Exit orders sized on the previous quantity must be resynchronized.
        if self.stop_order_id.is_some() || self.limit_order_id.is_some() || prev_qty > 0.0 {
            self.is_dirty = true;
        }

        debug!(
            "Trade {} entry fill {} @ {} -> qty {}/{}",
            self.id, applied, price, self.exec_entry_qty, self.order_quantity
        );
    }

    /// Apply a realized exit fill. Maintains the VWAP exit price and the
    /// invariant `exec_exit_qty <= exec_entry_qty`.
    pub fn add_exit_fill(&mut self, quantity: f64, price: f64, timestamp: i64) {
        if quantity <= 0.0 || !self.is_active() {
            return;
        }

        let applied = quantity.min(self.exec_entry_qty - self.exec_exit_qty);
        if applied <= 0.0 {
            warn!(
                "Trade {} exit overfill ignored: {} beyond entry quantity {}",
                self.id, quantity, self.exec_entry_qty
            );
            return;
        }

        let prev_qty = self.exec_exit_qty;
        self.exec_exit_qty += applied;
        self.exit_price = (self.exit_price * prev_qty + price * applied) / self.exec_exit_qty;
        self.last_realized_exit_time = timestamp;

        if self.exec_exit_qty >= self.exec_entry_qty {
            self.state = TradeState::Closed;
            if self.exit_reason == ExitReason::None {
                self.exit_reason = ExitReason::Closed;
            }
        }

        debug!(
            "Trade {} exit fill {} @ {} -> qty {}/{}",
            self.id, applied, price, self.exec_exit_qty, self.exec_entry_qty
        );
    }

    /// Track the best/worst execution price reached while active.
    pub fn update_extremes(&mut self, exec_price: f64) {
        if exec_price <= 0.0 || !self.is_active() {
            return;
        }
        match self.direction {
            Direction::Long => {
                self.best_price = self.best_price.max(exec_price);
                self.worst_price = if self.worst_price > 0.0 {
                    self.worst_price.min(exec_price)
                } else {
                    exec_price
                };
            }
            Direction::Short => {
                self.best_price = if self.best_price > 0.0 {
                    self.best_price.min(exec_price)
                } else {
                    exec_price
                };
                self.worst_price = self.worst_price.max(exec_price);
            }
        }
    }

    // ==========================================================================
    // Profit/loss estimation
    // ==========================================================================

    /// Direction-signed profit/loss percentage at the given price.
    pub fn profit_loss_pct_at(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 || price <= 0.0 {
            return 0.0;
        }
        self.direction.factor() * (price - self.entry_price) / self.entry_price * 100.0
    }

    /// Unrealized profit/loss percentage at the closable execution price.
    pub fn estimate_profit_loss(&self, instrument: &Instrument) -> f64 {
        if !self.is_active() {
            return 0.0;
        }
        self.profit_loss_pct_at(instrument.closable_exec_price(self.direction))
    }

    /// Realized profit/loss percentage over entry/exit fill VWAPs.
    pub fn realized_profit_loss_pct(&self) -> f64 {
        if self.exec_exit_qty <= 0.0 {
            return 0.0;
        }
        self.profit_loss_pct_at(self.exit_price)
    }

    // ==========================================================================
    // Broker-facing capabilities (variant dispatch by tag)
    // ==========================================================================

    /// Issue a market exit for the remaining quantity. On acceptance the
    /// trade moves to `Closing`; confirmation arrives later via order or
    /// position events. A terminal broker rejection moves it to `Error`,
    /// anything else keeps the prior state for retry next tick.
    pub fn close(
        &mut self,
        broker: &dyn Broker,
        instrument: &Instrument,
    ) -> Result<f64, BrokerError> {
        if !self.is_active() || self.is_closing() {
            return Ok(0.0);
        }

        // Spot exits sell the asset itself; make sure we still hold it.
        if self.kind.is_spot() {
            let remaining = self.remaining_quantity();
            if !broker.has_asset(instrument, remaining) {
                return Err(BrokerError::InsufficientAsset {
                    symbol: instrument.symbol.clone(),
                    needed: remaining,
                    available: 0.0,
                });
            }
        }

        match broker.close(self, instrument) {
            Ok(quantity) => {
                if quantity > 0.0 {
                    self.state = TradeState::Closing;
                }
                Ok(quantity)
            }
            Err(e) => {
                if e.is_terminal() {
                    warn!("Trade {} close rejected, entering error state: {}", self.id, e);
                    self.state = TradeState::Error;
                }
                Err(e)
            }
        }
    }

    /// Cancel the unfilled entry order. With zero realized quantity the
    /// trade becomes `Canceled`; with a partial entry it is closed instead.
    pub fn cancel_open(
        &mut self,
        broker: &dyn Broker,
        instrument: &Instrument,
    ) -> Result<u32, BrokerError> {
        if !matches!(self.state, TradeState::Pending | TradeState::Active) {
            return Ok(0);
        }

        match broker.cancel_open(self, instrument) {
            Ok(count) => {
                self.open_order_id = None;
                if self.exec_entry_qty <= 0.0 {
                    self.state = TradeState::Canceled;
                } else {
                    // Entry partially realized: exit what we hold.
                    self.close(broker, instrument)?;
                }
                Ok(count)
            }
            Err(e) => {
                if e.is_terminal() {
                    warn!(
                        "Trade {} cancel rejected, entering error state: {}",
                        self.id, e
                    );
                    self.state = TradeState::Error;
                }
                Err(e)
            }
        }
    }

    /// Resynchronize dependent exit orders after a partial entry fill
    /// changed the realized quantity.
    pub fn update_dirty(
        &mut self,
        broker: &dyn Broker,
        instrument: &Instrument,
    ) -> Result<(), BrokerError> {
        if !self.is_dirty {
            return Ok(());
        }

        let quantity = self.remaining_quantity();
        if let Some(ref order_id) = self.stop_order_id {
            broker.update_order_quantity(order_id, instrument, quantity)?;
        }
        if let Some(ref order_id) = self.limit_order_id {
            broker.update_order_quantity(order_id, instrument, quantity)?;
        }

        self.is_dirty = false;
        Ok(())
    }

    // ==========================================================================
    // Persistence form
    // ==========================================================================

    pub fn record(&self) -> TradeRecord {
        TradeRecord {
            id: self.id,
            kind: self.kind,
            state: self.state,
            direction: self.direction,
            order_price: self.order_price,
            entry_price: self.entry_price,
            exit_price: self.exit_price,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            order_quantity: self.order_quantity,
            exec_entry_qty: self.exec_entry_qty,
            exec_exit_qty: self.exec_exit_qty,
            entry_open_time: self.entry_open_time,
            first_realized_entry_time: self.first_realized_entry_time,
            last_realized_exit_time: self.last_realized_exit_time,
            entry_timeout: self.entry_timeout,
            expiry: self.expiry,
            label: self.label.clone(),
            context: self.context.clone(),
            exit_reason: self.exit_reason,
            operations: self.operations.clone(),
            best_price: self.best_price,
            worst_price: self.worst_price,
            open_order_id: self.open_order_id.clone(),
            stop_order_id: self.stop_order_id.clone(),
            limit_order_id: self.limit_order_id.clone(),
            position_id: self.position_id.clone(),
            open_ref_id: self.open_ref_id.clone(),
        }
    }

    pub fn from_record(record: TradeRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            state: record.state,
            direction: record.direction,
            order_price: record.order_price,
            entry_price: record.entry_price,
            exit_price: record.exit_price,
            stop_loss: record.stop_loss,
            take_profit: record.take_profit,
            order_quantity: record.order_quantity,
            exec_entry_qty: record.exec_entry_qty,
            exec_exit_qty: record.exec_exit_qty,
            is_dirty: false,
            entry_open_time: record.entry_open_time,
            first_realized_entry_time: record.first_realized_entry_time,
            last_realized_exit_time: record.last_realized_exit_time,
            entry_timeout: record.entry_timeout,
            expiry: record.expiry,
            label: record.label,
            context: record.context,
            exit_reason: record.exit_reason,
            operations: record.operations,
            best_price: record.best_price,
            worst_price: record.worst_price,
            open_order_id: record.open_order_id,
            stop_order_id: record.stop_order_id,
            limit_order_id: record.limit_order_id,
            position_id: record.position_id,
            open_ref_id: record.open_ref_id,
        }
    }
}

/// Serializable snapshot of a trade, used for persistence, events and the
/// closed-trade history buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub id: u64,
    pub kind: TradeKind,
    pub state: TradeState,
    pub direction: Direction,
    pub order_price: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub order_quantity: f64,
    pub exec_entry_qty: f64,
    pub exec_exit_qty: f64,
    pub entry_open_time: i64,
    pub first_realized_entry_time: i64,
    pub last_realized_exit_time: i64,
    pub entry_timeout: i64,
    pub expiry: i64,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub exit_reason: ExitReason,
    #[serde(default)]
    pub operations: Vec<TradeOperation>,
    pub best_price: f64,
    pub worst_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_ref_id: Option<String>,
}

impl TradeRecord {
    /// Realized profit/loss percentage over entry/exit fill VWAPs.
    pub fn realized_profit_loss_pct(&self) -> f64 {
        if self.exec_exit_qty <= 0.0 || self.entry_price <= 0.0 {
            return 0.0;
        }
        self.direction.factor() * (self.exit_price - self.entry_price) / self.entry_price * 100.0
    }
}
