//! Multi-market orchestration.
//!
//! `TradingEngine` owns one `StrategyTrader` per market, fans the tick out
//! to all of them, routes broker signals to the right trader, and batches
//! persistence. All traders share one event bus and one broker.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::types::Instrument;

use super::broker::{Broker, BrokerSignal};
use super::notifier::EventBus;
use super::store::SnapshotStore;
use super::trader::{CommandOutcome, StrategyTrader};

pub struct TradingEngine {
    config: Arc<Config>,
    broker: Arc<dyn Broker>,
    store: Option<Arc<SnapshotStore>>,
    bus: EventBus,
    traders: DashMap<String, Arc<StrategyTrader>>,
}

impl TradingEngine {
    pub fn new(config: Arc<Config>, broker: Arc<dyn Broker>) -> Self {
        let bus = EventBus::new(config.event_capacity);
        Self {
            config,
            broker,
            store: None,
            bus,
            traders: DashMap::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Create and register the trader for a market. Replaces any previous
    /// trader under the same market id.
    pub fn register_instrument(&self, instrument: Instrument) -> Arc<StrategyTrader> {
        let market_id = instrument.market_id.clone();
        let mut trader = StrategyTrader::new(
            &self.config.strategy_id,
            instrument,
            self.broker.clone(),
            self.config.clone(),
        )
        .with_bus(self.bus.clone());
        if let Some(store) = &self.store {
            trader = trader.with_store(store.clone());
        }

        let trader = Arc::new(trader);
        self.traders.insert(market_id.clone(), trader.clone());
        info!("Registered trader for {}", market_id);
        trader
    }

    pub fn trader(&self, market_id: &str) -> Option<Arc<StrategyTrader>> {
        self.traders.get(market_id).map(|e| e.value().clone())
    }

    pub fn remove_trader(&self, market_id: &str) -> bool {
        self.traders.remove(market_id).is_some()
    }

    pub fn market_ids(&self) -> Vec<String> {
        self.traders.iter().map(|e| e.key().clone()).collect()
    }

    /// Run one tick pass over every registered trader.
    pub fn process_all(&self, timestamp: i64) {
        let traders: Vec<Arc<StrategyTrader>> =
            self.traders.iter().map(|e| e.value().clone()).collect();
        for trader in traders {
            trader.process(timestamp);
        }
    }

    /// Route one broker signal to the trader of its market.
    pub fn dispatch(&self, market_id: &str, signal: &BrokerSignal) {
        let Some(trader) = self.trader(market_id) else {
            warn!("Broker signal for unknown market {}", market_id);
            return;
        };
        match signal {
            BrokerSignal::Order(event) => trader.order_signal(event),
            BrokerSignal::Position(event) => trader.position_signal(event),
        }
    }

    /// Market-close all active trades and cancel all pending entries across
    /// markets. Returns the number of dispatches.
    pub fn close_all(&self, timestamp: i64) -> usize {
        let traders: Vec<Arc<StrategyTrader>> =
            self.traders.iter().map(|e| e.value().clone()).collect();
        traders.iter().map(|t| t.close_all(timestamp)).sum()
    }

    /// Operator close-all, optionally scoped to one market. Unknown markets
    /// are reported as an error outcome.
    pub fn cmd_close_all(&self, timestamp: i64, market_id: Option<&str>) -> CommandOutcome {
        self.fan_out_command(market_id, |trader| {
            let dispatched = trader.close_all(timestamp);
            format!("{}: closed {} trade(s)", trader.market_id(), dispatched)
        })
    }

    /// Operator cancel of pending entries, optionally scoped to one market.
    pub fn cmd_cancel_all_pending(
        &self,
        timestamp: i64,
        market_id: Option<&str>,
    ) -> CommandOutcome {
        self.fan_out_command(market_id, |trader| {
            let dispatched = trader.cancel_all_pending(timestamp);
            format!("{}: canceled {} pending trade(s)", trader.market_id(), dispatched)
        })
    }

    fn fan_out_command(
        &self,
        market_id: Option<&str>,
        run: impl Fn(&StrategyTrader) -> String,
    ) -> CommandOutcome {
        let targets: Vec<Arc<StrategyTrader>> = match market_id {
            Some(market) => match self.trader(market) {
                Some(trader) => vec![trader],
                None => {
                    return CommandOutcome {
                        messages: vec![format!("unknown market {}", market)],
                        error: true,
                    }
                }
            },
            None => self.traders.iter().map(|e| e.value().clone()).collect(),
        };

        let mut outcome = CommandOutcome::default();
        for trader in targets {
            outcome.messages.push(run(&trader));
        }
        outcome
    }

    /// Snapshot every trader to the store.
    pub fn save_all(&self) -> Result<()> {
        for entry in self.traders.iter() {
            entry.value().save()?;
        }
        Ok(())
    }

    /// Restore every registered trader from the store. Markets without a
    /// snapshot start fresh.
    pub fn restore_all(&self) -> Result<usize> {
        let mut restored = 0;
        for entry in self.traders.iter() {
            if entry.value().restore()? {
                restored += 1;
            }
        }
        Ok(restored)
    }
}
