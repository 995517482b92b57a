//! Pluggable per-context strategy handlers.
//!
//! A handler is attached to one context (or installed globally) and is run
//! at the end of every tick pass plus on trade open/exit. Handlers observe
//! the trader through its public surface; a failing handler is logged and
//! skipped, it never poisons the tick or its peers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{info, warn};

use crate::error::Result;
use crate::types::TradeRecord;

use super::trader::StrategyTrader;

/// Strategy callback surface invoked by the tick loop.
pub trait TradeHandler: Send + Sync {
    /// Context this handler is bound to.
    fn context_id(&self) -> &str;

    /// Called at the end of every tick pass, with no trader lock held.
    fn process(&self, trader: &StrategyTrader, timestamp: i64) -> Result<()>;

    fn on_trade_opened(&self, _trader: &StrategyTrader, _trade: &TradeRecord) -> Result<()> {
        Ok(())
    }

    fn on_trade_exited(&self, _trader: &StrategyTrader, _trade: &TradeRecord) -> Result<()> {
        Ok(())
    }
}

/// Flattens every trade under its context once the summed unrealized loss
/// breaches a drawdown limit, then halts further entries by deactivating
/// the trader until an operator re-arms it.
pub struct DrawdownGuardHandler {
    context_id: String,
    /// Maximum tolerated unrealized loss, in percent (positive number).
    max_drawdown_pct: f64,
    tripped: AtomicBool,
}

impl DrawdownGuardHandler {
    pub fn new(context_id: &str, max_drawdown_pct: f64) -> Self {
        Self {
            context_id: context_id.to_string(),
            max_drawdown_pct: max_drawdown_pct.abs(),
            tripped: AtomicBool::new(false),
        }
    }

    pub fn tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Re-arm after an operator has reviewed the halt.
    pub fn reset(&self) {
        self.tripped.store(false, Ordering::SeqCst);
    }
}

impl TradeHandler for DrawdownGuardHandler {
    fn context_id(&self) -> &str {
        &self.context_id
    }

    fn process(&self, trader: &StrategyTrader, _timestamp: i64) -> Result<()> {
        if self.tripped() {
            return Ok(());
        }

        let unrealized = trader.unrealized_profit_loss_pct();
        if unrealized <= -self.max_drawdown_pct {
            warn!(
                "Drawdown guard tripped on {}: {:.2}% <= -{:.2}%",
                trader.market_id(),
                unrealized,
                self.max_drawdown_pct
            );
            self.tripped.store(true, Ordering::SeqCst);
            let closed = trader.close_context_trades(&self.context_id);
            info!("Drawdown guard closed {} trades", closed);
            trader.set_activity(false);
        }
        Ok(())
    }
}

/// Grows the context quantity with realized gains: after each profitable
/// exit a share of the realized profit is folded back into the managed
/// sizing, losses shrink it symmetrically. The sizing never drops below
/// the configured floor.
pub struct ReinvestGainHandler {
    context_id: String,
    /// Share of the realized percentage folded into the quantity, 0..=1.
    reinvest_fraction: f64,
    floor_quantity: f64,
    quantity: Mutex<f64>,
}

impl ReinvestGainHandler {
    pub fn new(context_id: &str, base_quantity: f64, reinvest_fraction: f64) -> Self {
        Self {
            context_id: context_id.to_string(),
            reinvest_fraction: reinvest_fraction.clamp(0.0, 1.0),
            floor_quantity: base_quantity,
            quantity: Mutex::new(base_quantity),
        }
    }

    pub fn quantity(&self) -> f64 {
        *self.quantity.lock().unwrap()
    }
}

impl TradeHandler for ReinvestGainHandler {
    fn context_id(&self) -> &str {
        &self.context_id
    }

    fn process(&self, _trader: &StrategyTrader, _timestamp: i64) -> Result<()> {
        Ok(())
    }

    fn on_trade_exited(&self, trader: &StrategyTrader, trade: &TradeRecord) -> Result<()> {
        if trade.context.as_deref() != Some(self.context_id.as_str()) {
            return Ok(());
        }
        let pnl_pct = trade.realized_profit_loss_pct();
        if pnl_pct == 0.0 {
            return Ok(());
        }

        let updated = {
            let mut quantity = self.quantity.lock().unwrap();
            let scaled = *quantity * (1.0 + pnl_pct / 100.0 * self.reinvest_fraction);
            *quantity = scaled.max(self.floor_quantity);
            *quantity
        };
        info!(
            "Reinvest sizing for {} -> {:.6} after {:.2}%",
            self.context_id, updated, pnl_pct
        );
        trader.set_managed_quantity(&self.context_id, updated)
    }
}
