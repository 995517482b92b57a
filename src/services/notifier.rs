//! Outbound notification seams.
//!
//! `EventBus` streams structured trader events to subscribers; `Notifier`
//! is the human-facing sink (terminal, chat, push). Both are fire-and-forget:
//! failures are logged and never propagate back into the tick loop.

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::types::{AlertResult, TradeRecord, TraderEvent};

/// Broadcast stream of trader events keyed by (strategy, market).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TraderEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. A send with no live receivers is not an error.
    pub fn publish(&self, event: TraderEvent) {
        if self.tx.send(event).is_err() {
            debug!("Trader event dropped: no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TraderEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1_024)
    }
}

/// Human-facing notification sink.
pub trait Notifier: Send + Sync {
    fn notify_trade_entry(&self, timestamp: i64, market_id: &str, trade: &TradeRecord);
    fn notify_trade_update(&self, timestamp: i64, market_id: &str, trade: &TradeRecord);
    fn notify_trade_exit(&self, timestamp: i64, market_id: &str, trade: &TradeRecord);
    fn notify_alert(&self, timestamp: i64, market_id: &str, alert: &AlertResult);
}

/// Default sink: structured log lines only.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_trade_entry(&self, _timestamp: i64, market_id: &str, trade: &TradeRecord) {
        info!(
            "ENTRY {} #{} {} {} @ {} sl={} tp={}",
            market_id,
            trade.id,
            trade.direction,
            trade.order_quantity,
            trade.order_price,
            trade.stop_loss,
            trade.take_profit
        );
    }

    fn notify_trade_update(&self, _timestamp: i64, market_id: &str, trade: &TradeRecord) {
        debug!(
            "UPDATE {} #{} qty {}/{}",
            market_id, trade.id, trade.exec_entry_qty, trade.order_quantity
        );
    }

    fn notify_trade_exit(&self, _timestamp: i64, market_id: &str, trade: &TradeRecord) {
        info!(
            "EXIT {} #{} {} @ {} | {:?} | P/L {:.2}%",
            market_id,
            trade.id,
            trade.direction,
            trade.exit_price,
            trade.exit_reason,
            trade.realized_profit_loss_pct()
        );
    }

    fn notify_alert(&self, _timestamp: i64, market_id: &str, alert: &AlertResult) {
        info!(
            "ALERT {} #{} @ {} {}",
            market_id, alert.alert_id, alert.price, alert.message
        );
    }
}
