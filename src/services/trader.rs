//! Per-instrument trade lifecycle manager.
//!
//! `StrategyTrader` owns every live trade for one market: admission through
//! regions and contexts, the per-tick policy pass (operations, timeouts,
//! stop-loss/take-profit triggers), broker reconciliation through order and
//! position signals, finalization with statistics, and snapshot persistence.
//!
//! Lock order is fixed: outer state `RwLock`, then the trade list `Mutex`,
//! then the statistics `Mutex`. Broker dispatch under a lock is bounded and
//! non-blocking; notifications and handler callbacks run with no lock held.

use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Result, StoreError, TradeError};
use crate::types::{
    Alert, AlertResult, Context, EntrySignal, ExitReason, Instrument, OperationResult,
    QuantityMode, Region, RegionStage, Trade, TradeOperation, TradeRecord, TradeState, TraderEvent,
};

use super::broker::{
    validate_direction, Broker, OrderEvent, OrderExec, PositionEvent, PositionEventKind,
};
use super::handlers::TradeHandler;
use super::notifier::{EventBus, LogNotifier, Notifier};
use super::store::SnapshotStore;

/// Realized percentages inside this band count as break-even.
const BREAKEVEN_BAND_PCT: f64 = 0.05;

/// Fraction of the remaining quantity closed by a dynamic take-profit step.
const DYNAMIC_SCALE_OUT_FRACTION: f64 = 0.5;

/// Multi-tick bookkeeping flag: `Waiting` is requested, `Progressing` is in
/// flight, `Normal` is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Normal,
    Waiting,
    Progressing,
}

/// Mutable trader state guarded by the outer lock.
struct TraderState {
    instrument: Instrument,
    activity: bool,
    affinity: u8,
    initialized: ProcessState,
    checked: ProcessState,
    bootstrapping: ProcessState,
    regions: Vec<Region>,
    alerts: Vec<Alert>,
    next_trade_id: u64,
    next_region_id: u64,
    next_alert_id: u64,
}

/// Aggregate statistics over finalized trades.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraderStats {
    pub closed_count: u64,
    pub canceled_count: u64,
    /// Cumulative realized profit/loss percentage.
    pub performance_pct: f64,
    pub best_trade_pct: f64,
    pub worst_trade_pct: f64,
    /// Best as-if-closed percentage any trade reached while active.
    pub best_potential_pct: f64,
    /// Worst as-if-closed percentage any trade reached while active.
    pub worst_potential_pct: f64,
    pub win_streak: u32,
    pub loss_streak: u32,
    pub max_win_streak: u32,
    pub max_loss_streak: u32,
    pub tp_win: u64,
    pub tp_loss: u64,
    pub sl_win: u64,
    pub sl_loss: u64,
    /// Break-even finishes, bounded by the history retention.
    pub roe_trades: Vec<TradeRecord>,
    /// Profitable finishes, bounded by the history retention.
    pub success_trades: Vec<TradeRecord>,
    /// Losing finishes, bounded by the history retention.
    pub failed_trades: Vec<TradeRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_trade: Option<TradeRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_trade: Option<TradeRecord>,
}

impl TraderStats {
    fn pct_at(record: &TradeRecord, price: f64) -> f64 {
        if record.entry_price <= 0.0 || price <= 0.0 {
            return 0.0;
        }
        record.direction.factor() * (price - record.entry_price) / record.entry_price * 100.0
    }

    /// Fold one finalized trade. Cancels count separately and touch nothing
    /// else.
    fn fold(&mut self, record: &TradeRecord, retention: usize) {
        if record.state != TradeState::Closed || record.exit_reason.is_canceled() {
            self.canceled_count += 1;
            return;
        }

        let pnl = record.realized_profit_loss_pct();
        self.closed_count += 1;
        self.performance_pct += pnl;
        self.best_trade_pct = self.best_trade_pct.max(pnl);
        self.worst_trade_pct = self.worst_trade_pct.min(pnl);
        self.best_potential_pct = self
            .best_potential_pct
            .max(Self::pct_at(record, record.best_price));
        self.worst_potential_pct = self
            .worst_potential_pct
            .min(Self::pct_at(record, record.worst_price));

        if pnl > 0.0 {
            self.win_streak += 1;
            self.loss_streak = 0;
            self.max_win_streak = self.max_win_streak.max(self.win_streak);
        } else if pnl < 0.0 {
            self.loss_streak += 1;
            self.win_streak = 0;
            self.max_loss_streak = self.max_loss_streak.max(self.loss_streak);
        }

        match record.exit_reason {
            ExitReason::TakeProfitMarket | ExitReason::TakeProfitLimit => {
                if pnl > 0.0 {
                    self.tp_win += 1;
                } else {
                    self.tp_loss += 1;
                }
            }
            ExitReason::StopLossMarket | ExitReason::StopLossLimit => {
                if pnl >= 0.0 {
                    self.sl_win += 1;
                } else {
                    self.sl_loss += 1;
                }
            }
            _ => {}
        }

        let bucket = if pnl.abs() <= BREAKEVEN_BAND_PCT {
            &mut self.roe_trades
        } else if pnl > 0.0 {
            &mut self.success_trades
        } else {
            &mut self.failed_trades
        };
        bucket.push(record.clone());
        if bucket.len() > retention {
            bucket.remove(0);
        }

        self.prev_trade = self.last_trade.take();
        self.last_trade = Some(record.clone());
    }
}

/// Serializable snapshot of the trader for persistence and restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraderSnapshot {
    pub strategy_id: String,
    pub market_id: String,
    pub activity: bool,
    pub affinity: u8,
    pub next_trade_id: u64,
    pub next_region_id: u64,
    pub next_alert_id: u64,
    pub trades: Vec<TradeRecord>,
    pub regions: Vec<Region>,
    pub alerts: Vec<Alert>,
}

/// Result of an operator command. Commands never panic the tick loop; they
/// report what happened as messages plus an error flag.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub messages: Vec<String>,
    pub error: bool,
}

impl CommandOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
            error: false,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
            error: true,
        }
    }
}

/// The per-instrument trade lifecycle manager.
pub struct StrategyTrader {
    strategy_id: String,
    config: Arc<Config>,
    broker: Arc<dyn Broker>,
    bus: EventBus,
    notifier: Arc<dyn Notifier>,
    store: Option<Arc<SnapshotStore>>,
    contexts: DashMap<String, Arc<Context>>,
    handlers: DashMap<String, Arc<dyn TradeHandler>>,
    global_handler: RwLock<Option<Arc<dyn TradeHandler>>>,
    state: RwLock<TraderState>,
    trades: Mutex<Vec<Trade>>,
    stats: Mutex<TraderStats>,
}

impl StrategyTrader {
    pub fn new(
        strategy_id: &str,
        instrument: Instrument,
        broker: Arc<dyn Broker>,
        config: Arc<Config>,
    ) -> Self {
        let bus = EventBus::new(config.event_capacity);
        Self {
            strategy_id: strategy_id.to_string(),
            config,
            broker,
            bus,
            notifier: Arc::new(LogNotifier),
            store: None,
            contexts: DashMap::new(),
            handlers: DashMap::new(),
            global_handler: RwLock::new(None),
            state: RwLock::new(TraderState {
                instrument,
                activity: true,
                affinity: 0,
                initialized: ProcessState::Waiting,
                checked: ProcessState::Normal,
                bootstrapping: ProcessState::Normal,
                regions: Vec::new(),
                alerts: Vec::new(),
                next_trade_id: 1,
                next_region_id: 1,
                next_alert_id: 1,
            }),
            trades: Mutex::new(Vec::new()),
            stats: Mutex::new(TraderStats::default()),
        }
    }

    pub fn with_store(mut self, store: Arc<SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    // ==========================================================================
    // Accessors
    // ==========================================================================

    pub fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    pub fn market_id(&self) -> String {
        self.state.read().unwrap().instrument.market_id.clone()
    }

    pub fn instrument(&self) -> Instrument {
        self.state.read().unwrap().instrument.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn activity(&self) -> bool {
        self.state.read().unwrap().activity
    }

    pub fn set_activity(&self, activity: bool) {
        self.state.write().unwrap().activity = activity;
    }

    pub fn affinity(&self) -> u8 {
        self.state.read().unwrap().affinity
    }

    pub fn set_affinity(&self, affinity: u8) {
        self.state.write().unwrap().affinity = affinity;
    }

    pub fn update_quote(&self, bid: f64, ask: f64, timestamp: i64) {
        self.state
            .write()
            .unwrap()
            .instrument
            .update_quote(bid, ask, timestamp);
    }

    pub fn set_tradeable(&self, tradeable: bool) {
        self.state.write().unwrap().instrument.tradeable = tradeable;
    }

    pub fn trade_count(&self) -> usize {
        self.trades.lock().unwrap().len()
    }

    pub fn trades_snapshot(&self) -> Vec<TradeRecord> {
        self.trades.lock().unwrap().iter().map(Trade::record).collect()
    }

    pub fn stats(&self) -> TraderStats {
        self.stats.lock().unwrap().clone()
    }

    /// Sum of unrealized profit/loss percentages over active trades.
    pub fn unrealized_profit_loss_pct(&self) -> f64 {
        let instrument = self.instrument();
        self.trades
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.is_active())
            .map(|t| t.estimate_profit_loss(&instrument))
            .sum()
    }

    // ==========================================================================
    // Context registry
    // ==========================================================================

    pub fn register_context(&self, context: Context) {
        self.contexts
            .insert(context.name.clone(), Arc::new(context));
    }

    pub fn context(&self, name: &str) -> Option<Arc<Context>> {
        self.contexts.get(name).map(|e| e.value().clone())
    }

    /// Apply an external option edit to a context. Quantity edits are
    /// rejected while a handler owns the sizing.
    pub fn set_context_option(&self, name: &str, key: &str, value: f64) -> Result<()> {
        let current = self
            .contexts
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| TradeError::ContextNotFound(name.to_string()))?;
        let mut context = (*current).clone();

        match key {
            "quantity" => {
                if context.quantity_mode == QuantityMode::Managed {
                    return Err(TradeError::OptionRejected(format!(
                        "quantity of {} is handler-managed",
                        name
                    )));
                }
                context.quantity = value;
            }
            "max_trades" => context.max_trades = value as u32,
            "entry_timeout_ms" => context.entry.timeout_ms = value as i64,
            "max_spread_pct" => context.entry.max_spread_pct = value,
            "stop_loss_distance" => match context.stop_loss.as_mut() {
                Some(rule) => rule.distance = value,
                None => {
                    return Err(TradeError::InvalidParameter(format!(
                        "{} has no stop-loss rule",
                        name
                    )))
                }
            },
            "take_profit_distance" => match context.take_profit.as_mut() {
                Some(rule) => rule.distance = value,
                None => {
                    return Err(TradeError::InvalidParameter(format!(
                        "{} has no take-profit rule",
                        name
                    )))
                }
            },
            _ => {
                return Err(TradeError::InvalidParameter(format!(
                    "unknown option {}",
                    key
                )))
            }
        }

        self.contexts.insert(name.to_string(), Arc::new(context));
        Ok(())
    }

    /// Handler-owned sizing path; bypasses the managed-quantity guard.
    pub fn set_managed_quantity(&self, name: &str, quantity: f64) -> Result<()> {
        let current = self
            .contexts
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| TradeError::ContextNotFound(name.to_string()))?;
        let mut context = (*current).clone();
        context.quantity = quantity;
        self.contexts.insert(name.to_string(), Arc::new(context));
        Ok(())
    }

    // ==========================================================================
    // Handler registry
    // ==========================================================================

    pub fn install_handler(&self, handler: Arc<dyn TradeHandler>) {
        self.handlers
            .insert(handler.context_id().to_string(), handler);
    }

    pub fn install_global_handler(&self, handler: Arc<dyn TradeHandler>) {
        *self.global_handler.write().unwrap() = Some(handler);
    }

    pub fn remove_handler(&self, context_id: &str) -> bool {
        self.handlers.remove(context_id).is_some()
    }

    /// Run every installed handler. A failing handler is logged and skipped;
    /// it never poisons the tick or its peers.
    fn process_handlers(&self, timestamp: i64) {
        let handlers: Vec<Arc<dyn TradeHandler>> =
            self.handlers.iter().map(|e| e.value().clone()).collect();
        for handler in handlers {
            if let Err(e) = handler.process(self, timestamp) {
                warn!("Handler {} failed: {}", handler.context_id(), e);
            }
        }
        let global = self.global_handler.read().unwrap().clone();
        if let Some(handler) = global {
            if let Err(e) = handler.process(self, timestamp) {
                warn!("Global handler failed: {}", e);
            }
        }
    }

    // ==========================================================================
    // Regions and alerts
    // ==========================================================================

    /// Register a region under a fresh id. The id on the passed region is
    /// overwritten.
    pub fn add_region(&self, mut region: Region) -> u64 {
        let (id, timestamp, market_id) = {
            let mut st = self.state.write().unwrap();
            let id = st.next_region_id;
            st.next_region_id += 1;
            region.id = id;
            st.regions.push(region);
            (id, st.instrument.last_update, st.instrument.market_id.clone())
        };
        self.bus.publish(TraderEvent::RegionAdded {
            strategy_id: self.strategy_id.clone(),
            market_id,
            region_id: id,
            timestamp,
        });
        id
    }

    pub fn remove_region(&self, region_id: u64) -> bool {
        let (removed, timestamp, market_id) = {
            let mut st = self.state.write().unwrap();
            let before = st.regions.len();
            st.regions.retain(|r| r.id != region_id);
            (
                st.regions.len() != before,
                st.instrument.last_update,
                st.instrument.market_id.clone(),
            )
        };
        if removed {
            self.bus.publish(TraderEvent::RegionRemoved {
                strategy_id: self.strategy_id.clone(),
                market_id,
                region_id,
                timestamp,
            });
        }
        removed
    }

    pub fn regions(&self) -> Vec<Region> {
        self.state.read().unwrap().regions.clone()
    }

    /// Register an alert under a fresh id.
    pub fn add_alert(&self, mut alert: Alert) -> u64 {
        let mut st = self.state.write().unwrap();
        let id = st.next_alert_id;
        st.next_alert_id += 1;
        alert.id = id;
        st.alerts.push(alert);
        id
    }

    pub fn remove_alert(&self, alert_id: u64) -> bool {
        let mut st = self.state.write().unwrap();
        let before = st.alerts.len();
        st.alerts.retain(|a| a.id != alert_id);
        st.alerts.len() != before
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.state.read().unwrap().alerts.clone()
    }

    /// Region admission for a candidate signal. Expired regions are purged
    /// first; with no regions left the gate fails open and returns
    /// `allow_default`. One admitting region is enough.
    pub fn check_regions(
        &self,
        timestamp: i64,
        bid: f64,
        ask: f64,
        signal: &EntrySignal,
        allow_default: bool,
    ) -> bool {
        let (admitted, purged, market_id) = {
            let mut st = self.state.write().unwrap();
            let mut purged = Vec::new();
            st.regions.retain(|r| {
                if r.can_delete(timestamp, bid, ask) {
                    purged.push(r.id);
                    false
                } else {
                    true
                }
            });

            // Exit-stage regions do not gate entries.
            let entry_regions: Vec<&Region> = st
                .regions
                .iter()
                .filter(|r| r.stage != RegionStage::Exit)
                .collect();
            let admitted = if entry_regions.is_empty() {
                allow_default
            } else {
                entry_regions.iter().any(|r| r.test(timestamp, signal))
            };
            (admitted, purged, st.instrument.market_id.clone())
        };

        for region_id in purged {
            self.bus.publish(TraderEvent::RegionRemoved {
                strategy_id: self.strategy_id.clone(),
                market_id: market_id.clone(),
                region_id,
                timestamp,
            });
        }
        admitted
    }

    /// Evaluate all alerts against the quote, purge dead ones, and publish
    /// what fired. Firing has no trade side effect.
    pub fn check_alerts(&self, timestamp: i64, bid: f64, ask: f64) -> Vec<AlertResult> {
        let (fired, market_id) = {
            let mut st = self.state.write().unwrap();
            let mut fired = Vec::new();
            for alert in st.alerts.iter_mut() {
                if let Some(result) = alert.test(timestamp, bid, ask) {
                    fired.push(result);
                }
            }
            st.alerts.retain(|a| !a.can_delete(timestamp));
            (fired, st.instrument.market_id.clone())
        };

        for result in &fired {
            self.notifier.notify_alert(timestamp, &market_id, result);
            self.bus.publish(TraderEvent::AlertFired {
                strategy_id: self.strategy_id.clone(),
                market_id: market_id.clone(),
                alert: result.clone(),
                timestamp,
            });
        }
        fired
    }

    // ==========================================================================
    // Entry path
    // ==========================================================================

    /// Admit a candidate entry signal and dispatch its entry order. Returns
    /// the new trade id.
    pub fn on_entry_signal(&self, timestamp: i64, signal: &EntrySignal) -> Result<u64> {
        let instrument = {
            let st = self.state.read().unwrap();
            if !st.activity {
                return Err(TradeError::Inactive);
            }
            st.instrument.clone()
        };
        if !instrument.tradeable {
            return Err(TradeError::NotTradeable(instrument.market_id.clone()));
        }

        let context_name = signal
            .context
            .as_deref()
            .ok_or_else(|| TradeError::InvalidParameter("signal carries no context".into()))?;
        let context = self
            .contexts
            .get(context_name)
            .map(|e| e.value().clone())
            .ok_or_else(|| TradeError::ContextNotFound(context_name.to_string()))?;

        if !validate_direction(context.trade_kind, signal.direction) {
            return Err(TradeError::InvalidParameter(
                "spot trades are long only".into(),
            ));
        }

        if context.entry.max_spread_pct > 0.0 && instrument.mid() > 0.0 {
            let spread_pct = instrument.spread() / instrument.mid() * 100.0;
            if spread_pct > context.entry.max_spread_pct {
                return Err(TradeError::InvalidParameter(format!(
                    "spread {:.3}% above limit {:.3}%",
                    spread_pct, context.entry.max_spread_pct
                )));
            }
        }

        // Market entries are tested against the current execution price.
        let mut priced = signal.clone();
        if priced.order_price <= 0.0 {
            priced.order_price = instrument.open_exec_price(signal.direction);
        }
        if !self.check_regions(timestamp, instrument.bid, instrument.ask, &priced, true) {
            return Err(TradeError::RegionRejected);
        }

        let entry_price = priced.order_price;
        let stop_loss = if signal.stop_loss > 0.0 {
            signal.stop_loss
        } else {
            context
                .stop_loss
                .as_ref()
                .map(|r| r.stop_price(entry_price, signal.direction))
                .unwrap_or(0.0)
        };
        let take_profit = if signal.take_profit > 0.0 {
            signal.take_profit
        } else {
            context
                .take_profit
                .as_ref()
                .map(|r| r.target_price(entry_price, signal.direction))
                .unwrap_or(0.0)
        };

        let quantity =
            context.size_quantity(entry_price, stop_loss, self.broker.account_value());
        if quantity <= 0.0 {
            return Err(TradeError::InvalidParameter(
                "sized quantity is zero".into(),
            ));
        }

        let id = {
            let mut st = self.state.write().unwrap();
            let id = st.next_trade_id;
            st.next_trade_id += 1;
            id
        };

        let mut trade = Trade::new(
            id,
            context.trade_kind,
            signal.direction,
            signal.order_price,
            quantity,
            timestamp,
        );
        trade.context = Some(context_name.to_string());
        trade.label = signal.label.clone();
        trade.stop_loss = stop_loss;
        trade.take_profit = take_profit;
        trade.entry_timeout = if signal.entry_timeout_ms > 0 {
            signal.entry_timeout_ms
        } else {
            context.entry.timeout_ms
        };
        trade.expiry = signal.expiry;
        trade.open_ref_id = Some(Uuid::new_v4().to_string());

        if let Some(rule) = &context.dynamic_stop_loss {
            trade.operations.push(TradeOperation::StepStopLoss {
                trigger_price: rule.target_price(entry_price, signal.direction),
                stop_price: entry_price,
            });
        }
        if let Some(rule) = &context.dynamic_take_profit {
            trade.operations.push(TradeOperation::ScaleOut {
                trigger_price: rule.target_price(entry_price, signal.direction),
                fraction: DYNAMIC_SCALE_OUT_FRACTION,
            });
        }

        // The count and the insert are one atomic step so the limit holds
        // under concurrent signals. Broker dispatch is bounded by contract.
        let record = {
            let mut trades = self.trades.lock().unwrap();
            let live = trades
                .iter()
                .filter(|t| t.context.as_deref() == Some(context_name) && !t.can_delete())
                .count();
            if live >= context.max_trades as usize {
                return Err(TradeError::MaxTradesReached {
                    context: context_name.to_string(),
                    max: context.max_trades,
                });
            }

            let ack = self.broker.open(&trade, &instrument)?;
            trade.open_order_id = Some(ack.order_id);
            let record = trade.record();
            trades.push(trade);
            record
        };

        info!(
            "Trade {} opened on {}: {} {} @ {}",
            id, instrument.market_id, signal.direction, quantity, entry_price
        );

        let handler = self.handlers.get(context_name).map(|e| e.value().clone());
        if let Some(handler) = handler {
            if let Err(e) = handler.on_trade_opened(self, &record) {
                warn!("Handler {} open callback failed: {}", context_name, e);
            }
        }
        self.notifier
            .notify_trade_entry(timestamp, &instrument.market_id, &record);
        self.bus.publish(TraderEvent::TradeEntry {
            strategy_id: self.strategy_id.clone(),
            market_id: instrument.market_id,
            trade: record,
            timestamp,
        });

        Ok(id)
    }

    /// Inject a prebuilt trade, assigning it a fresh id. Used by recovery
    /// paths and tests; normal entries go through `on_entry_signal`.
    pub fn add_trade(&self, mut trade: Trade) -> u64 {
        let id = {
            let mut st = self.state.write().unwrap();
            let id = st.next_trade_id;
            st.next_trade_id += 1;
            id
        };
        trade.id = id;
        self.trades.lock().unwrap().push(trade);
        id
    }

    // ==========================================================================
    // Tick pass
    // ==========================================================================

    /// Full per-tick pass: lifecycle flags, trade policy, alerts.
    pub fn process(&self, timestamp: i64) {
        {
            let mut st = self.state.write().unwrap();
            if st.initialized == ProcessState::Waiting {
                st.initialized = ProcessState::Progressing;
            }
            if st.bootstrapping == ProcessState::Waiting {
                st.bootstrapping = ProcessState::Progressing;
            }
            if !st.activity {
                return;
            }
        }

        self.update_trades(timestamp);

        let (bid, ask) = {
            let st = self.state.read().unwrap();
            (st.instrument.bid, st.instrument.ask)
        };
        self.check_alerts(timestamp, bid, ask);

        let mut st = self.state.write().unwrap();
        if st.initialized == ProcessState::Progressing {
            st.initialized = ProcessState::Normal;
        }
        if st.bootstrapping == ProcessState::Progressing {
            st.bootstrapping = ProcessState::Normal;
            st.checked = ProcessState::Normal;
        }
    }

    /// Apply the per-tick trade policy: operations, extremes, timeouts,
    /// exit triggers, then removal and finalization of terminal trades.
    pub fn update_trades(&self, timestamp: i64) {
        let instrument = self.instrument();
        let tradeable = instrument.tradeable;

        let mut finalized: Vec<Trade> = Vec::new();
        let mut updates: Vec<TradeRecord> = Vec::new();
        {
            let mut trades = self.trades.lock().unwrap();
            for trade in trades.iter_mut() {
                if trade.is_error() || trade.can_delete() {
                    continue;
                }

                if trade.is_active() && !trade.is_closing() {
                    let operations = std::mem::take(&mut trade.operations);
                    let mut kept = Vec::with_capacity(operations.len());
                    for op in operations {
                        let fired = op.test_and_operate(trade, &instrument, self.broker.as_ref())
                            == OperationResult::Triggered;
                        if !fired || op.is_persistent() {
                            kept.push(op);
                        }
                    }
                    trade.operations = kept;
                }

                if trade.is_active() {
                    trade.update_extremes(instrument.closable_exec_price(trade.direction));
                    updates.push(trade.record());
                }

                if trade.is_pending() {
                    self.check_entry_canceled(trade, &instrument);
                    if trade.is_pending() {
                        self.check_entry_timeout(trade, &instrument, timestamp);
                    }
                    continue;
                }

                if !tradeable || trade.is_closing() {
                    continue;
                }

                if trade.is_dirty {
                    if let Err(e) = trade.update_dirty(self.broker.as_ref(), &instrument) {
                        warn!("Trade {} exit resync failed: {}", trade.id, e);
                        continue;
                    }
                }

                self.check_trade_timeout(trade, &instrument, timestamp);
                if trade.is_closing() {
                    continue;
                }
                self.check_exit_triggers(trade, &instrument);
            }

            let mut i = 0;
            while i < trades.len() {
                if trades[i].can_delete() {
                    finalized.push(trades.remove(i));
                } else {
                    i += 1;
                }
            }
        }

        for record in updates {
            self.notifier
                .notify_trade_update(timestamp, &instrument.market_id, &record);
            self.bus.publish(TraderEvent::TradeUpdate {
                strategy_id: self.strategy_id.clone(),
                market_id: instrument.market_id.clone(),
                trade: record,
                timestamp,
            });
        }
        for trade in finalized {
            self.finalize_trade(timestamp, trade);
        }

        self.process_handlers(timestamp);
    }

    /// A pending entry whose target is already reached has missed its move;
    /// cancel it instead of chasing.
    fn check_entry_canceled(&self, trade: &mut Trade, instrument: &Instrument) {
        if !trade.is_pending() || trade.exec_entry_qty > 0.0 || trade.take_profit <= 0.0 {
            return;
        }
        let exec_price = instrument.closable_exec_price(trade.direction);
        if exec_price <= 0.0 {
            return;
        }
        if trade.direction.factor() * (exec_price - trade.take_profit) >= 0.0 {
            info!(
                "Trade {} target {} reached before entry, canceling",
                trade.id, trade.take_profit
            );
            self.cancel_with_reason(trade, instrument, ExitReason::CanceledTargeted);
        }
    }

    fn check_entry_timeout(&self, trade: &mut Trade, instrument: &Instrument, timestamp: i64) {
        if !trade.is_pending() || trade.entry_timeout <= 0 {
            return;
        }
        if timestamp - trade.entry_open_time >= trade.entry_timeout {
            info!("Trade {} entry timed out, canceling", trade.id);
            self.cancel_with_reason(trade, instrument, ExitReason::CanceledTimeout);
        }
    }

    /// Expiry and the profit-conditioned trade timeout: a trade that has not
    /// cleared the required profit within the window is force-closed.
    fn check_trade_timeout(&self, trade: &mut Trade, instrument: &Instrument, timestamp: i64) {
        if !trade.is_active() || trade.is_closing() {
            return;
        }

        if trade.expiry > 0 && timestamp > trade.expiry {
            info!("Trade {} expired, closing", trade.id);
            self.close_with_reason(trade, instrument, ExitReason::MarketTimeout);
            return;
        }

        let Some(context_name) = trade.context.as_deref() else {
            return;
        };
        let Some(context) = self.contexts.get(context_name).map(|e| e.value().clone()) else {
            return;
        };
        let Some(rule) = context.take_profit.as_ref() else {
            return;
        };
        if rule.timeout_ms <= 0 || trade.first_realized_entry_time <= 0 {
            return;
        }
        if timestamp - trade.first_realized_entry_time >= rule.timeout_ms
            && trade.estimate_profit_loss(instrument) < rule.timeout_distance_pct
        {
            info!(
                "Trade {} below {}% after timeout, closing",
                trade.id, rule.timeout_distance_pct
            );
            self.close_with_reason(trade, instrument, ExitReason::MarketTimeout);
        }
    }

    /// Take-profit first, then stop-loss, at most one dispatch per tick.
    /// Levels covered by resting broker-side orders are not market-closed
    /// here; their fills arrive through order events.
    fn check_exit_triggers(&self, trade: &mut Trade, instrument: &Instrument) {
        if !trade.is_active() || trade.is_closing() {
            return;
        }
        let exec_price = instrument.closable_exec_price(trade.direction);
        if exec_price <= 0.0 {
            return;
        }
        let factor = trade.direction.factor();

        if trade.take_profit > 0.0
            && trade.limit_order_id.is_none()
            && factor * (exec_price - trade.take_profit) >= 0.0
        {
            info!(
                "Trade {} take-profit {} reached @ {}",
                trade.id, trade.take_profit, exec_price
            );
            self.close_with_reason(trade, instrument, ExitReason::TakeProfitMarket);
            return;
        }

        if trade.stop_loss > 0.0
            && trade.stop_order_id.is_none()
            && factor * (exec_price - trade.stop_loss) <= 0.0
        {
            info!(
                "Trade {} stop-loss {} hit @ {}",
                trade.id, trade.stop_loss, exec_price
            );
            self.close_with_reason(trade, instrument, ExitReason::StopLossMarket);
        }
    }

    /// Dispatch a close with the given reason. A failed non-terminal
    /// dispatch resets the reason so the next tick retries cleanly.
    fn close_with_reason(&self, trade: &mut Trade, instrument: &Instrument, reason: ExitReason) {
        trade.exit_reason = reason;
        if let Err(e) = trade.close(self.broker.as_ref(), instrument) {
            warn!("Trade {} close dispatch failed: {}", trade.id, e);
            if !trade.is_error() {
                trade.exit_reason = ExitReason::None;
            }
        }
    }

    fn cancel_with_reason(&self, trade: &mut Trade, instrument: &Instrument, reason: ExitReason) {
        trade.exit_reason = reason;
        if let Err(e) = trade.cancel_open(self.broker.as_ref(), instrument) {
            warn!("Trade {} cancel dispatch failed: {}", trade.id, e);
            if !trade.is_error() {
                trade.exit_reason = ExitReason::None;
            }
        }
    }

    // ==========================================================================
    // Broker reconciliation
    // ==========================================================================

    /// Reconcile an asynchronous order event against the trade list. Events
    /// that match no live trade are ignored; they belong to trades already
    /// finalized or to foreign orders.
    pub fn order_signal(&self, event: &OrderEvent) {
        let mut finalized: Vec<Trade> = Vec::new();
        let mut updated: Option<TradeRecord> = None;
        let timestamp = match event {
            OrderEvent::Opened { timestamp, .. }
            | OrderEvent::Filled { timestamp, .. }
            | OrderEvent::Canceled { timestamp, .. }
            | OrderEvent::Rejected { timestamp, .. } => *timestamp,
        };

        {
            let mut trades = self.trades.lock().unwrap();
            match event {
                OrderEvent::Opened { order_id, ref_id, .. } => {
                    if let Some(trade) = Self::find_order_trade(&mut trades, order_id, ref_id) {
                        if trade.open_order_id.is_none() {
                            trade.open_order_id = Some(order_id.clone());
                        }
                        debug!("Trade {} entry order {} confirmed", trade.id, order_id);
                    }
                }
                OrderEvent::Filled {
                    order_id,
                    ref_id,
                    exec,
                    quantity,
                    price,
                    timestamp,
                } => {
                    if let Some(trade) = Self::find_order_trade(&mut trades, order_id, ref_id) {
                        match exec {
                            OrderExec::Entry => {
                                trade.add_entry_fill(*quantity, *price, *timestamp);
                            }
                            OrderExec::Exit => {
                                if trade.exit_reason == ExitReason::None {
                                    if trade.stop_order_id.as_deref() == Some(order_id.as_str()) {
                                        trade.exit_reason = ExitReason::StopLossLimit;
                                    } else if trade.limit_order_id.as_deref()
                                        == Some(order_id.as_str())
                                    {
                                        trade.exit_reason = ExitReason::TakeProfitLimit;
                                    }
                                }
                                trade.add_exit_fill(*quantity, *price, *timestamp);
                            }
                        }
                        if !trade.can_delete() {
                            updated = Some(trade.record());
                        }
                    } else {
                        debug!("Unmatched fill for order {}", order_id);
                    }
                }
                OrderEvent::Canceled { order_id, ref_id, .. } => {
                    if let Some(trade) = Self::find_order_trade(&mut trades, order_id, ref_id) {
                        if trade.stop_order_id.as_deref() == Some(order_id.as_str()) {
                            trade.stop_order_id = None;
                        } else if trade.limit_order_id.as_deref() == Some(order_id.as_str()) {
                            trade.limit_order_id = None;
                        } else {
                            trade.open_order_id = None;
                            if trade.is_pending() && trade.exec_entry_qty <= 0.0 {
                                trade.state = TradeState::Canceled;
                                if trade.exit_reason == ExitReason::None {
                                    trade.exit_reason = ExitReason::CanceledManually;
                                }
                            }
                        }
                    }
                }
                OrderEvent::Rejected {
                    order_id,
                    ref_id,
                    reason,
                    ..
                } => {
                    if let Some(trade) = Self::find_order_trade(&mut trades, order_id, ref_id) {
                        warn!(
                            "Trade {} order {} rejected ({}), entering error state",
                            trade.id, order_id, reason
                        );
                        trade.state = TradeState::Error;
                    }
                }
            }

            let mut i = 0;
            while i < trades.len() {
                if trades[i].can_delete() {
                    finalized.push(trades.remove(i));
                } else {
                    i += 1;
                }
            }
        }

        if let Some(record) = updated {
            self.bus.publish(TraderEvent::TradeUpdate {
                strategy_id: self.strategy_id.clone(),
                market_id: self.market_id(),
                trade: record,
                timestamp,
            });
        }
        for trade in finalized {
            self.finalize_trade(timestamp, trade);
        }
    }

    fn find_order_trade<'a>(
        trades: &'a mut [Trade],
        order_id: &str,
        ref_id: &Option<String>,
    ) -> Option<&'a mut Trade> {
        trades.iter_mut().find(|t| {
            t.open_order_id.as_deref() == Some(order_id)
                || t.stop_order_id.as_deref() == Some(order_id)
                || t.limit_order_id.as_deref() == Some(order_id)
                || (ref_id.is_some() && t.open_ref_id == *ref_id)
        })
    }

    /// Reconcile a position event. A broker position may aggregate several
    /// trades; a reduction is distributed over them oldest first.
    pub fn position_signal(&self, event: &PositionEvent) {
        let mut finalized: Vec<Trade> = Vec::new();
        {
            let mut trades = self.trades.lock().unwrap();
            let matched: Vec<usize> = trades
                .iter()
                .enumerate()
                .filter(|(_, t)| {
                    t.kind.uses_position_events()
                        && t.position_id.as_deref() == Some(event.position_id.as_str())
                })
                .map(|(i, _)| i)
                .collect();
            if matched.is_empty() {
                debug!("Unmatched position event {}", event.position_id);
                return;
            }

            match event.kind {
                PositionEventKind::Opened => {
                    debug!("Position {} linkage confirmed", event.position_id);
                }
                PositionEventKind::Amended => {
                    let total: f64 = matched
                        .iter()
                        .map(|&i| trades[i].remaining_quantity())
                        .sum();
                    let mut reduction = (total - event.quantity).max(0.0);
                    for &i in &matched {
                        if reduction <= 0.0 {
                            break;
                        }
                        let trade = &mut trades[i];
                        let take = reduction.min(trade.remaining_quantity());
                        trade.add_exit_fill(take, event.avg_price, event.timestamp);
                        reduction -= take;
                    }
                }
                PositionEventKind::Closed => {
                    for &i in &matched {
                        let trade = &mut trades[i];
                        let remaining = trade.remaining_quantity();
                        if remaining > 0.0 {
                            trade.add_exit_fill(remaining, event.avg_price, event.timestamp);
                        }
                    }
                }
            }

            let mut i = 0;
            while i < trades.len() {
                if trades[i].can_delete() {
                    finalized.push(trades.remove(i));
                } else {
                    i += 1;
                }
            }
        }

        for trade in finalized {
            self.finalize_trade(event.timestamp, trade);
        }
    }

    // ==========================================================================
    // Finalization
    // ==========================================================================

    /// Tear down a terminal trade already removed from the list: cancel
    /// leftover child orders, fold statistics, persist the history row, and
    /// fan out notifications. Must be called without the trade list held.
    fn finalize_trade(&self, timestamp: i64, mut trade: Trade) {
        let instrument = self.instrument();

        for order_id in [trade.stop_order_id.take(), trade.limit_order_id.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = self.broker.cancel_order(&order_id, &instrument) {
                warn!(
                    "Trade {} leftover order {} cancel failed: {}",
                    trade.id, order_id, e
                );
            }
        }

        let record = trade.record();
        self.stats
            .lock()
            .unwrap()
            .fold(&record, self.config.history_retention);

        let countable = trade.is_closed() && !trade.exit_reason.is_canceled();
        if countable && !self.config.paper_mode {
            if let Some(store) = &self.store {
                if let Err(e) =
                    store.save_closed_trade(&self.strategy_id, &instrument.market_id, &record, timestamp)
                {
                    warn!("Trade {} history write failed: {}", trade.id, e);
                }
            }
        }

        if let Some(context_name) = record.context.as_deref() {
            let handler = self.handlers.get(context_name).map(|e| e.value().clone());
            if let Some(handler) = handler {
                if let Err(e) = handler.on_trade_exited(self, &record) {
                    warn!("Handler {} exit callback failed: {}", context_name, e);
                }
            }
        }
        let global = self.global_handler.read().unwrap().clone();
        if let Some(handler) = global {
            if let Err(e) = handler.on_trade_exited(self, &record) {
                warn!("Global handler exit callback failed: {}", e);
            }
        }

        self.notifier
            .notify_trade_exit(timestamp, &instrument.market_id, &record);
        self.bus.publish(TraderEvent::TradeExit {
            strategy_id: self.strategy_id.clone(),
            market_id: instrument.market_id.clone(),
            trade: record,
            timestamp,
        });
    }

    // ==========================================================================
    // Operator commands
    // ==========================================================================

    /// Close a trade on demand: active trades are market-closed, pending
    /// entries are canceled.
    pub fn cmd_trade_exit(&self, timestamp: i64, trade_id: u64) -> CommandOutcome {
        let instrument = self.instrument();
        let mut finalized: Vec<Trade> = Vec::new();
        let outcome = {
            let mut trades = self.trades.lock().unwrap();
            let Some(trade) = trades.iter_mut().find(|t| t.id == trade_id) else {
                return CommandOutcome::err(format!("trade {} not found", trade_id));
            };

            let outcome = if trade.is_closing() {
                CommandOutcome::ok(format!("trade {} already closing", trade_id))
            } else if trade.is_pending() && trade.exec_entry_qty <= 0.0 {
                self.cancel_with_reason(trade, &instrument, ExitReason::CanceledManually);
                CommandOutcome::ok(format!("trade {} entry canceled", trade_id))
            } else if trade.is_active() {
                self.close_with_reason(trade, &instrument, ExitReason::Closed);
                if trade.is_closing() {
                    CommandOutcome::ok(format!("trade {} closing", trade_id))
                } else {
                    CommandOutcome::err(format!("trade {} close dispatch failed", trade_id))
                }
            } else {
                CommandOutcome::err(format!(
                    "trade {} not closable in state {}",
                    trade_id, trade.state
                ))
            };

            let mut i = 0;
            while i < trades.len() {
                if trades[i].can_delete() {
                    finalized.push(trades.remove(i));
                } else {
                    i += 1;
                }
            }
            outcome
        };

        for trade in finalized {
            self.finalize_trade(timestamp, trade);
        }
        outcome
    }

    /// Cancel one pending entry by id.
    pub fn cmd_trade_cancel_pending(&self, timestamp: i64, trade_id: u64) -> CommandOutcome {
        let instrument = self.instrument();
        let mut finalized: Vec<Trade> = Vec::new();
        let outcome = {
            let mut trades = self.trades.lock().unwrap();
            let Some(trade) = trades.iter_mut().find(|t| t.id == trade_id) else {
                return CommandOutcome::err(format!("trade {} not found", trade_id));
            };
            if !trade.is_pending() {
                return CommandOutcome::err(format!("trade {} is not pending", trade_id));
            }

            self.cancel_with_reason(trade, &instrument, ExitReason::CanceledManually);
            let outcome = CommandOutcome::ok(format!("trade {} canceled", trade_id));

            let mut i = 0;
            while i < trades.len() {
                if trades[i].can_delete() {
                    finalized.push(trades.remove(i));
                } else {
                    i += 1;
                }
            }
            outcome
        };

        for trade in finalized {
            self.finalize_trade(timestamp, trade);
        }
        outcome
    }

    /// Adjust stop-loss/take-profit of a live trade.
    pub fn cmd_trade_modify(
        &self,
        trade_id: u64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> CommandOutcome {
        if stop_loss.map(|v| v < 0.0).unwrap_or(false)
            || take_profit.map(|v| v < 0.0).unwrap_or(false)
        {
            return CommandOutcome::err("levels must be non-negative".to_string());
        }

        let mut trades = self.trades.lock().unwrap();
        let Some(trade) = trades.iter_mut().find(|t| t.id == trade_id) else {
            return CommandOutcome::err(format!("trade {} not found", trade_id));
        };
        if trade.is_closing() || trade.can_delete() || trade.is_error() {
            return CommandOutcome::err(format!(
                "trade {} not modifiable in state {}",
                trade_id, trade.state
            ));
        }

        let mut outcome = CommandOutcome::default();
        if let Some(stop_loss) = stop_loss {
            trade.stop_loss = stop_loss;
            if trade.stop_order_id.is_some() {
                trade.is_dirty = true;
            }
            outcome
                .messages
                .push(format!("trade {} stop-loss set to {}", trade_id, stop_loss));
        }
        if let Some(take_profit) = take_profit {
            trade.take_profit = take_profit;
            if trade.limit_order_id.is_some() {
                trade.is_dirty = true;
            }
            outcome.messages.push(format!(
                "trade {} take-profit set to {}",
                trade_id, take_profit
            ));
        }
        if outcome.messages.is_empty() {
            outcome.messages.push("nothing to modify".to_string());
        }
        outcome
    }

    /// Remove one error-state trade after operator inspection. The only way
    /// an `Error` trade leaves the list.
    pub fn cmd_trade_clean(&self, timestamp: i64, trade_id: u64) -> CommandOutcome {
        let trade = {
            let mut trades = self.trades.lock().unwrap();
            let Some(index) = trades.iter().position(|t| t.id == trade_id) else {
                return CommandOutcome::err(format!("trade {} not found", trade_id));
            };
            if !trades[index].is_error() {
                return CommandOutcome::err(format!(
                    "trade {} is not in error state",
                    trade_id
                ));
            }
            trades.remove(index)
        };

        self.finalize_trade(timestamp, trade);
        CommandOutcome::ok(format!("trade {} removed", trade_id))
    }

    /// Market-close every active trade opened under a context. Returns the
    /// number of close dispatches.
    pub fn close_context_trades(&self, context_name: &str) -> usize {
        let instrument = self.instrument();
        let mut trades = self.trades.lock().unwrap();
        let mut closed = 0;
        for trade in trades.iter_mut() {
            if trade.context.as_deref() == Some(context_name)
                && trade.is_active()
                && !trade.is_closing()
            {
                self.close_with_reason(trade, &instrument, ExitReason::Closed);
                if trade.is_closing() {
                    closed += 1;
                }
            }
        }
        closed
    }

    /// Market-close every active trade and cancel every pending entry.
    pub fn close_all(&self, timestamp: i64) -> usize {
        let instrument = self.instrument();
        let mut finalized: Vec<Trade> = Vec::new();
        let dispatched = {
            let mut trades = self.trades.lock().unwrap();
            let mut dispatched = 0;
            for trade in trades.iter_mut() {
                if trade.is_pending() && trade.exec_entry_qty <= 0.0 {
                    self.cancel_with_reason(trade, &instrument, ExitReason::CanceledManually);
                    dispatched += 1;
                } else if trade.is_active() && !trade.is_closing() {
                    self.close_with_reason(trade, &instrument, ExitReason::Closed);
                    if trade.is_closing() {
                        dispatched += 1;
                    }
                }
            }

            let mut i = 0;
            while i < trades.len() {
                if trades[i].can_delete() {
                    finalized.push(trades.remove(i));
                } else {
                    i += 1;
                }
            }
            dispatched
        };

        for trade in finalized {
            self.finalize_trade(timestamp, trade);
        }
        dispatched
    }

    /// Cancel every pending entry while leaving active trades running.
    pub fn cancel_all_pending(&self, timestamp: i64) -> usize {
        let instrument = self.instrument();
        let mut finalized: Vec<Trade> = Vec::new();
        let dispatched = {
            let mut trades = self.trades.lock().unwrap();
            let mut dispatched = 0;
            for trade in trades.iter_mut() {
                if trade.is_pending() && trade.exec_entry_qty <= 0.0 {
                    self.cancel_with_reason(trade, &instrument, ExitReason::CanceledManually);
                    dispatched += 1;
                }
            }

            let mut i = 0;
            while i < trades.len() {
                if trades[i].can_delete() {
                    finalized.push(trades.remove(i));
                } else {
                    i += 1;
                }
            }
            dispatched
        };

        for trade in finalized {
            self.finalize_trade(timestamp, trade);
        }
        dispatched
    }

    // ==========================================================================
    // Persistence
    // ==========================================================================

    /// Serialize the full trader state.
    pub fn dumps(&self) -> TraderSnapshot {
        let st = self.state.read().unwrap();
        let trades = self.trades.lock().unwrap();
        TraderSnapshot {
            strategy_id: self.strategy_id.clone(),
            market_id: st.instrument.market_id.clone(),
            activity: st.activity,
            affinity: st.affinity,
            next_trade_id: st.next_trade_id,
            next_region_id: st.next_region_id,
            next_alert_id: st.next_alert_id,
            trades: trades.iter().map(Trade::record).collect(),
            regions: st.regions.clone(),
            alerts: st.alerts.clone(),
        }
    }

    /// Restore from a snapshot, replacing current trades, regions and
    /// alerts. With `force_id` the saved ids and counters are kept verbatim;
    /// otherwise everything is re-keyed under fresh ids.
    pub fn loads(&self, snapshot: TraderSnapshot, force_id: bool) {
        let mut st = self.state.write().unwrap();
        let mut trades = self.trades.lock().unwrap();

        st.activity = snapshot.activity;
        st.affinity = snapshot.affinity;

        if force_id {
            st.next_trade_id = snapshot.next_trade_id;
            st.next_region_id = snapshot.next_region_id;
            st.next_alert_id = snapshot.next_alert_id;
            *trades = snapshot.trades.into_iter().map(Trade::from_record).collect();
            st.regions = snapshot.regions;
            st.alerts = snapshot.alerts;
        } else {
            let mut next_trade_id = st.next_trade_id;
            *trades = snapshot
                .trades
                .into_iter()
                .map(|record| {
                    let mut trade = Trade::from_record(record);
                    trade.id = next_trade_id;
                    next_trade_id += 1;
                    trade
                })
                .collect();
            st.next_trade_id = next_trade_id;

            let mut next_region_id = st.next_region_id;
            let regions = snapshot
                .regions
                .into_iter()
                .map(|mut region| {
                    region.id = next_region_id;
                    next_region_id += 1;
                    region
                })
                .collect();
            st.next_region_id = next_region_id;
            st.regions = regions;

            let mut next_alert_id = st.next_alert_id;
            let alerts = snapshot
                .alerts
                .into_iter()
                .map(|mut alert| {
                    alert.id = next_alert_id;
                    next_alert_id += 1;
                    alert
                })
                .collect();
            st.next_alert_id = next_alert_id;
            st.alerts = alerts;
        }

        st.bootstrapping = ProcessState::Waiting;
        st.checked = ProcessState::Waiting;
        info!(
            "Trader {} restored: {} trades, {} regions, {} alerts",
            st.instrument.market_id,
            trades.len(),
            st.regions.len(),
            st.alerts.len()
        );
    }

    /// Save the snapshot to the attached store.
    pub fn save(&self) -> Result<()> {
        if let Some(store) = &self.store {
            store.save_snapshot(&self.dumps())?;
        }
        Ok(())
    }

    /// Restore from the attached store. Returns false when no snapshot
    /// exists yet.
    pub fn restore(&self) -> Result<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let market_id = self.market_id();
        match store.load_snapshot(&self.strategy_id, &market_id) {
            Ok(snapshot) => {
                self.loads(snapshot, true);
                Ok(true)
            }
            Err(StoreError::SnapshotNotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
