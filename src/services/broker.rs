//! Broker collaborator boundary.
//!
//! The core treats broker calls as bounded, non-blocking submissions whose
//! confirmations arrive later through order/position events. `PaperBroker`
//! is the simulation implementation: it accepts every dispatch and queues
//! the matching fill/cancel events for the driver to feed back through
//! `order_signal`/`position_signal`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BrokerError;
use crate::types::{Direction, Instrument, Trade, TradeKind};

/// Acknowledgment of an accepted entry order submission.
#[derive(Debug, Clone)]
pub struct OrderAck {
    /// Broker-assigned order id.
    pub order_id: String,
}

/// Whether a fill opens or reduces the trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderExec {
    Entry,
    Exit,
}

/// Asynchronous order event delivered by the broker/watcher layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum OrderEvent {
    Opened {
        order_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ref_id: Option<String>,
        timestamp: i64,
    },
    Filled {
        order_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ref_id: Option<String>,
        exec: OrderExec,
        quantity: f64,
        price: f64,
        timestamp: i64,
    },
    Canceled {
        order_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ref_id: Option<String>,
        timestamp: i64,
    },
    Rejected {
        order_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ref_id: Option<String>,
        reason: String,
        timestamp: i64,
    },
}

/// What happened to a broker-side position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionEventKind {
    Opened,
    Amended,
    Closed,
}

/// Asynchronous position event. May match several trades sharing the same
/// broker position (hedging/aggregation).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionEvent {
    pub position_id: String,
    pub kind: PositionEventKind,
    /// Remaining position quantity after the event.
    pub quantity: f64,
    /// Average execution price of the event.
    pub avg_price: f64,
    pub timestamp: i64,
}

/// A broker signal as delivered to the reconciliation channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "channel")]
pub enum BrokerSignal {
    Order(OrderEvent),
    Position(PositionEvent),
}

/// Synchronous submission surface of the broker/trader collaborator.
/// No call here may block on network I/O while the trader holds a lock;
/// implementations dispatch and return, confirmations come back as signals.
pub trait Broker: Send + Sync {
    /// Submit the entry order for a new trade. Returns the broker order id.
    fn open(&self, trade: &Trade, instrument: &Instrument) -> Result<OrderAck, BrokerError>;

    /// Submit a market exit for the remaining quantity.
    /// Returns the submitted quantity, or 0 if there was nothing to close.
    fn close(&self, trade: &Trade, instrument: &Instrument) -> Result<f64, BrokerError>;

    /// Submit a partial market exit.
    fn reduce(
        &self,
        trade: &Trade,
        instrument: &Instrument,
        quantity: f64,
    ) -> Result<f64, BrokerError>;

    /// Cancel the unfilled entry order. Returns the number of orders pulled.
    fn cancel_open(&self, trade: &Trade, instrument: &Instrument) -> Result<u32, BrokerError>;

    /// Cancel a leftover child order by id (finalization cleanup).
    fn cancel_order(&self, order_id: &str, instrument: &Instrument) -> Result<(), BrokerError>;

    /// Current account value, used for risk-based sizing.
    fn account_value(&self) -> f64;

    /// Amend the quantity of a resting child order (exit resync after a
    /// partial entry fill).
    fn update_order_quantity(
        &self,
        order_id: &str,
        instrument: &Instrument,
        quantity: f64,
    ) -> Result<(), BrokerError>;

    /// Whether the account can carry a new margin exposure.
    fn has_margin(&self, instrument: &Instrument, quantity: f64, price: f64) -> bool;

    /// Whether the account holds enough of the asset to sell.
    fn has_asset(&self, instrument: &Instrument, quantity: f64) -> bool;
}

/// Simulation broker backed by in-memory balances. Every accepted dispatch
/// queues the confirmation signals a live connector would deliver
/// asynchronously; the driver drains them into the trader.
pub struct PaperBroker {
    cash: Mutex<f64>,
    assets: DashMap<String, f64>,
    queue: Mutex<VecDeque<BrokerSignal>>,
    next_order: AtomicU64,
    market_open: AtomicBool,
    auto_fill: AtomicBool,
    /// Fraction of the entry quantity filled per dispatch (partial fills).
    entry_fill_fraction: Mutex<f64>,
}

impl PaperBroker {
    pub fn new(cash: f64) -> Self {
        Self {
            cash: Mutex::new(cash),
            assets: DashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            next_order: AtomicU64::new(1),
            market_open: AtomicBool::new(true),
            auto_fill: AtomicBool::new(true),
            entry_fill_fraction: Mutex::new(1.0),
        }
    }

    /// Disable/enable immediate fill events (to exercise pending states).
    pub fn set_auto_fill(&self, auto_fill: bool) {
        self.auto_fill.store(auto_fill, Ordering::SeqCst);
    }

    pub fn set_market_open(&self, open: bool) {
        self.market_open.store(open, Ordering::SeqCst);
    }

    /// Emit entry fills as this fraction of the order quantity.
    pub fn set_entry_fill_fraction(&self, fraction: f64) {
        *self.entry_fill_fraction.lock().unwrap() = fraction.clamp(0.0, 1.0);
    }

    pub fn cash(&self) -> f64 {
        *self.cash.lock().unwrap()
    }

    /// Drain queued confirmation signals in delivery order.
    pub fn drain_signals(&self) -> Vec<BrokerSignal> {
        self.queue.lock().unwrap().drain(..).collect()
    }

    /// Queue a signal as if it came from the exchange (test hook).
    pub fn push_signal(&self, signal: BrokerSignal) {
        self.queue.lock().unwrap().push_back(signal);
    }

    fn next_order_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_order.fetch_add(1, Ordering::SeqCst))
    }

    fn ensure_open(&self, instrument: &Instrument) -> Result<(), BrokerError> {
        if !self.market_open.load(Ordering::SeqCst) {
            return Err(BrokerError::MarketClosed(instrument.market_id.clone()));
        }
        Ok(())
    }

    fn entry_exec_price(trade: &Trade, instrument: &Instrument) -> f64 {
        if trade.order_price > 0.0 {
            trade.order_price
        } else {
            instrument.open_exec_price(trade.direction)
        }
    }
}

impl Broker for PaperBroker {
    fn open(&self, trade: &Trade, instrument: &Instrument) -> Result<OrderAck, BrokerError> {
        self.ensure_open(instrument)?;

        let price = Self::entry_exec_price(trade, instrument);
        let notional = trade.order_quantity * price;

        match trade.kind {
            TradeKind::Asset => {
                let mut cash = self.cash.lock().unwrap();
                if *cash < notional {
                    return Err(BrokerError::InsufficientMargin {
                        needed: notional,
                        available: *cash,
                    });
                }
                *cash -= notional;
                *self.assets.entry(instrument.symbol.clone()).or_insert(0.0) +=
                    trade.order_quantity;
            }
            TradeKind::Margin | TradeKind::Position | TradeKind::IndMargin => {
                let cash = self.cash.lock().unwrap();
                if *cash < notional {
                    return Err(BrokerError::InsufficientMargin {
                        needed: notional,
                        available: *cash,
                    });
                }
            }
        }

        let order_id = self.next_order_id("po");
        debug!("Paper open {} {} @ {}", order_id, trade.order_quantity, price);

        let mut queue = self.queue.lock().unwrap();
        queue.push_back(BrokerSignal::Order(OrderEvent::Opened {
            order_id: order_id.clone(),
            ref_id: trade.open_ref_id.clone(),
            timestamp: instrument.last_update,
        }));
        if self.auto_fill.load(Ordering::SeqCst) {
            let fraction = *self.entry_fill_fraction.lock().unwrap();
            let quantity = trade.order_quantity * fraction;
            if quantity > 0.0 {
                queue.push_back(BrokerSignal::Order(OrderEvent::Filled {
                    order_id: order_id.clone(),
                    ref_id: trade.open_ref_id.clone(),
                    exec: OrderExec::Entry,
                    quantity,
                    price,
                    timestamp: instrument.last_update,
                }));
            }
        }

        Ok(OrderAck { order_id })
    }

    fn close(&self, trade: &Trade, instrument: &Instrument) -> Result<f64, BrokerError> {
        self.ensure_open(instrument)?;

        let remaining = trade.remaining_quantity();
        if remaining <= 0.0 {
            return Ok(0.0);
        }
        self.reduce(trade, instrument, remaining)
    }

    fn reduce(
        &self,
        trade: &Trade,
        instrument: &Instrument,
        quantity: f64,
    ) -> Result<f64, BrokerError> {
        self.ensure_open(instrument)?;

        let quantity = quantity.min(trade.remaining_quantity());
        if quantity <= 0.0 {
            return Ok(0.0);
        }

        let price = instrument.closable_exec_price(trade.direction);
        let order_id = self.next_order_id("pc");

        if trade.kind.is_spot() {
            if let Some(mut held) = self.assets.get_mut(&instrument.symbol) {
                *held = (*held - quantity).max(0.0);
            }
            *self.cash.lock().unwrap() += quantity * price;
        } else {
            let pnl = trade.direction.factor() * (price - trade.entry_price) * quantity;
            *self.cash.lock().unwrap() += pnl;
        }

        debug!("Paper close {} {} @ {}", order_id, quantity, price);

        self.queue
            .lock()
            .unwrap()
            .push_back(BrokerSignal::Order(OrderEvent::Filled {
                order_id,
                ref_id: trade.open_ref_id.clone(),
                exec: OrderExec::Exit,
                quantity,
                price,
                timestamp: instrument.last_update,
            }));

        Ok(quantity)
    }

    fn cancel_open(&self, trade: &Trade, instrument: &Instrument) -> Result<u32, BrokerError> {
        self.ensure_open(instrument)?;

        let Some(ref order_id) = trade.open_order_id else {
            return Ok(0);
        };

        // Refund the unfilled spot reservation.
        if trade.kind.is_spot() {
            let price = Self::entry_exec_price(trade, instrument);
            let unfilled = trade.order_quantity - trade.exec_entry_qty;
            *self.cash.lock().unwrap() += unfilled * price;
            if let Some(mut held) = self.assets.get_mut(&instrument.symbol) {
                *held = (*held - unfilled).max(0.0);
            }
        }

        self.queue
            .lock()
            .unwrap()
            .push_back(BrokerSignal::Order(OrderEvent::Canceled {
                order_id: order_id.clone(),
                ref_id: trade.open_ref_id.clone(),
                timestamp: instrument.last_update,
            }));

        Ok(1)
    }

    fn cancel_order(&self, order_id: &str, instrument: &Instrument) -> Result<(), BrokerError> {
        self.ensure_open(instrument)?;
        debug!("Paper cancel child order {}", order_id);
        Ok(())
    }

    fn account_value(&self) -> f64 {
        self.cash()
    }

    fn update_order_quantity(
        &self,
        order_id: &str,
        instrument: &Instrument,
        quantity: f64,
    ) -> Result<(), BrokerError> {
        self.ensure_open(instrument)?;
        debug!("Paper amend {} quantity -> {}", order_id, quantity);
        Ok(())
    }

    fn has_margin(&self, _instrument: &Instrument, quantity: f64, price: f64) -> bool {
        *self.cash.lock().unwrap() >= quantity * price
    }

    fn has_asset(&self, instrument: &Instrument, quantity: f64) -> bool {
        self.assets
            .get(&instrument.symbol)
            .map(|held| *held >= quantity)
            .unwrap_or(false)
    }
}

/// Long-only check used before dispatching spot entries.
pub fn validate_direction(kind: TradeKind, direction: Direction) -> bool {
    !(kind.is_spot() && direction == Direction::Short)
}
