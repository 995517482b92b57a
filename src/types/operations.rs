use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::services::broker::Broker;

use super::instrument::Instrument;
use super::trade::{Direction, Trade};

/// Outcome of evaluating one operation on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    /// Condition not met, keep the operation.
    Nothing,
    /// Condition met and the action was applied; non-repeating operations
    /// are removed by the caller.
    Triggered,
}

/// A conditional micro-action attached to a trade, evaluated in order on
/// every tick while the trade is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum TradeOperation {
    /// Move the stop-loss once price reaches a trigger (e.g. breakeven).
    StepStopLoss { trigger_price: f64, stop_price: f64 },
    /// Close a fraction of the remaining quantity once price reaches a
    /// trigger (partial take-profit).
    ScaleOut { trigger_price: f64, fraction: f64 },
}

impl TradeOperation {
    /// Whether the operation survives after firing.
    pub fn is_persistent(&self) -> bool {
        false
    }

    /// Whether the trigger price has been reached in the profitable
    /// direction for this trade.
    fn trigger_reached(trade: &Trade, trigger_price: f64, exec_price: f64) -> bool {
        match trade.direction {
            Direction::Long => exec_price >= trigger_price,
            Direction::Short => exec_price <= trigger_price,
        }
    }

    /// Evaluate the condition and apply the action. May itself transition
    /// trade fields. Broker dispatch is bounded fire-and-forget; a failed
    /// dispatch leaves the operation in place for the next tick.
    pub fn test_and_operate(
        &self,
        trade: &mut Trade,
        instrument: &Instrument,
        broker: &dyn Broker,
    ) -> OperationResult {
        if !trade.is_active() || trade.is_closing() {
            return OperationResult::Nothing;
        }

        let exec_price = instrument.closable_exec_price(trade.direction);
        if exec_price <= 0.0 {
            return OperationResult::Nothing;
        }

        match self {
            TradeOperation::StepStopLoss {
                trigger_price,
                stop_price,
            } => {
                if !Self::trigger_reached(trade, *trigger_price, exec_price) {
                    return OperationResult::Nothing;
                }
                info!(
                    "Trade {} step stop-loss {} -> {} (trigger {})",
                    trade.id, trade.stop_loss, stop_price, trigger_price
                );
                trade.stop_loss = *stop_price;
                OperationResult::Triggered
            }
            TradeOperation::ScaleOut {
                trigger_price,
                fraction,
            } => {
                if !Self::trigger_reached(trade, *trigger_price, exec_price) {
                    return OperationResult::Nothing;
                }
                let quantity = trade.remaining_quantity() * fraction.clamp(0.0, 1.0);
                if quantity <= 0.0 {
                    return OperationResult::Triggered;
                }
                match broker.reduce(trade, instrument, quantity) {
                    Ok(filled) => {
                        info!(
                            "Trade {} scale-out {} of {} (trigger {})",
                            trade.id, filled, quantity, trigger_price
                        );
                        OperationResult::Triggered
                    }
                    Err(e) => {
                        warn!("Trade {} scale-out dispatch failed: {}", trade.id, e);
                        OperationResult::Nothing
                    }
                }
            }
        }
    }
}
