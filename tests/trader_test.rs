//! Behavioral tests for the per-instrument trader
//!
//! Tests cover:
//! - Entry admission (contexts, regions, activity, spread, max trades)
//! - The per-tick policy pass (stop-loss, take-profit, timeouts)
//! - Broker reconciliation through order and position signals
//! - Operator commands
//! - Handlers and their failure isolation
//! - Statistics folding

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use spectre::config::Config;
use spectre::error::{Result, TradeError};
use spectre::services::{
    BrokerSignal, DrawdownGuardHandler, OrderEvent, OrderExec, PaperBroker, PositionEvent,
    PositionEventKind, ReinvestGainHandler, StrategyTrader, TradeHandler,
};
use spectre::types::*;

fn instrument(bid: f64, ask: f64) -> Instrument {
    let mut instrument = Instrument::new("BTCUSDT".to_string(), "BTC".to_string());
    instrument.tradeable = true;
    instrument.update_quote(bid, ask, 1_000);
    instrument
}

fn setup() -> (Arc<PaperBroker>, StrategyTrader) {
    let broker = Arc::new(PaperBroker::new(1_000_000.0));
    let trader = StrategyTrader::new(
        "test",
        instrument(100.0, 101.0),
        broker.clone(),
        Arc::new(Config::default()),
    );
    (broker, trader)
}

/// Feed queued broker confirmations back through reconciliation.
fn pump(trader: &StrategyTrader, broker: &PaperBroker) {
    for signal in broker.drain_signals() {
        match signal {
            BrokerSignal::Order(event) => trader.order_signal(&event),
            BrokerSignal::Position(event) => trader.position_signal(&event),
        }
    }
}

fn margin_context() -> Context {
    Context::new("momentum", TradeKind::Margin)
        .with_max_trades(2)
        .with_quantity(QuantityMode::Fixed, 1.0)
        .with_stop_loss(ExitRule::new(2.0, DistanceKind::Percent))
        .with_take_profit(ExitRule::new(4.0, DistanceKind::Percent))
}

fn momentum_signal(timestamp: i64) -> EntrySignal {
    EntrySignal::new(Direction::Long, timestamp).with_context("momentum")
}

// =============================================================================
// Entry Admission Tests
// =============================================================================

mod admission_tests {
    use super::*;

    #[test]
    fn test_entry_signal_opens_active_trade() {
        let (broker, trader) = setup();
        trader.register_context(margin_context());

        let id = trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);

        let trades = trader.trades_snapshot();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].id, id);
        assert_eq!(trades[0].state, TradeState::Active);
        // Market entry fills at the ask.
        assert_eq!(trades[0].entry_price, 101.0);
        // Levels derived from the context rules off the entry reference.
        assert!((trades[0].stop_loss - 101.0 * 0.98).abs() < 1e-9);
        assert!((trades[0].take_profit - 101.0 * 1.04).abs() < 1e-9);
    }

    #[test]
    fn test_signal_without_context_is_rejected() {
        let (_broker, trader) = setup();
        let signal = EntrySignal::new(Direction::Long, 1_000);

        assert!(matches!(
            trader.on_entry_signal(1_000, &signal),
            Err(TradeError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_unknown_context_is_rejected() {
        let (_broker, trader) = setup();

        assert!(matches!(
            trader.on_entry_signal(1_000, &momentum_signal(1_000)),
            Err(TradeError::ContextNotFound(_))
        ));
    }

    #[test]
    fn test_inactive_trader_rejects_entries() {
        let (_broker, trader) = setup();
        trader.register_context(margin_context());
        trader.set_activity(false);

        assert!(matches!(
            trader.on_entry_signal(1_000, &momentum_signal(1_000)),
            Err(TradeError::Inactive)
        ));
    }

    #[test]
    fn test_untradeable_instrument_rejects_entries() {
        let (_broker, trader) = setup();
        trader.register_context(margin_context());
        trader.set_tradeable(false);

        assert!(matches!(
            trader.on_entry_signal(1_000, &momentum_signal(1_000)),
            Err(TradeError::NotTradeable(_))
        ));
    }

    #[test]
    fn test_spot_entries_are_long_only() {
        let (_broker, trader) = setup();
        trader.register_context(
            Context::new("spot", TradeKind::Asset).with_quantity(QuantityMode::Fixed, 1.0),
        );
        let signal = EntrySignal::new(Direction::Short, 1_000).with_context("spot");

        assert!(matches!(
            trader.on_entry_signal(1_000, &signal),
            Err(TradeError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_max_trades_is_enforced() {
        let (broker, trader) = setup();
        broker.set_auto_fill(false);
        trader.register_context(margin_context());

        trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        trader.on_entry_signal(1_100, &momentum_signal(1_100)).unwrap();
        assert!(matches!(
            trader.on_entry_signal(1_200, &momentum_signal(1_200)),
            Err(TradeError::MaxTradesReached { .. })
        ));
    }

    #[test]
    fn test_wide_spread_rejects_entry() {
        let (_broker, trader) = setup();
        let mut context = margin_context();
        context.entry.max_spread_pct = 0.5;
        trader.register_context(context);
        trader.update_quote(100.0, 103.0, 1_000);

        assert!(matches!(
            trader.on_entry_signal(1_000, &momentum_signal(1_000)),
            Err(TradeError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_no_regions_fails_open() {
        let (broker, trader) = setup();
        trader.register_context(margin_context());

        assert!(trader.on_entry_signal(1_000, &momentum_signal(1_000)).is_ok());
        pump(&trader, &broker);
        assert_eq!(trader.trade_count(), 1);
    }

    #[test]
    fn test_non_matching_region_rejects() {
        let (_broker, trader) = setup();
        trader.register_context(margin_context());
        trader.add_region(Region::range(0, 0, 200.0, 210.0));

        assert!(matches!(
            trader.on_entry_signal(1_000, &momentum_signal(1_000)),
            Err(TradeError::RegionRejected)
        ));
    }

    #[test]
    fn test_one_admitting_region_is_enough() {
        let (_broker, trader) = setup();
        trader.register_context(margin_context());
        trader.add_region(Region::range(0, 0, 200.0, 210.0));
        trader.add_region(Region::range(0, 0, 95.0, 105.0));

        assert!(trader.on_entry_signal(1_000, &momentum_signal(1_000)).is_ok());
    }

    #[test]
    fn test_expired_regions_are_purged_and_gate_fails_open() {
        let (_broker, trader) = setup();
        trader.register_context(margin_context());
        trader.add_region(Region::range(0, 0, 200.0, 210.0).with_expiry(5_000));

        assert!(matches!(
            trader.on_entry_signal(1_000, &momentum_signal(1_000)),
            Err(TradeError::RegionRejected)
        ));
        // Past the expiry the region is purged and the gate opens again.
        assert!(trader.on_entry_signal(6_000, &momentum_signal(6_000)).is_ok());
        assert!(trader.regions().is_empty());
    }

    #[test]
    fn test_exit_stage_region_does_not_gate_entry() {
        let (_broker, trader) = setup();
        trader.register_context(margin_context());
        trader.add_region(
            Region::range(0, 0, 200.0, 210.0).with_stage(RegionStage::Exit),
        );

        // Only exit-stage regions exist, so entry admission fails open.
        assert!(trader.on_entry_signal(1_000, &momentum_signal(1_000)).is_ok());
    }
}

// =============================================================================
// Tick Policy Tests
// =============================================================================

mod policy_tests {
    use super::*;

    #[test]
    fn test_take_profit_market_close() {
        let (broker, trader) = setup();
        trader.register_context(margin_context());
        trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);

        // Take-profit sits at 105.04; drive the exit side through it.
        trader.update_quote(105.2, 105.5, 2_000);
        trader.update_trades(2_000);
        pump(&trader, &broker);

        assert_eq!(trader.trade_count(), 0);
        let stats = trader.stats();
        assert_eq!(stats.closed_count, 1);
        assert_eq!(stats.tp_win, 1);
        assert_eq!(stats.success_trades.len(), 1);
        assert_eq!(
            stats.success_trades[0].exit_reason,
            ExitReason::TakeProfitMarket
        );
        assert!(stats.performance_pct > 0.0);
    }

    #[test]
    fn test_stop_loss_market_close() {
        let (broker, trader) = setup();
        trader.register_context(margin_context());
        trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);

        // Stop sits at 98.98.
        trader.update_quote(98.0, 98.3, 2_000);
        trader.update_trades(2_000);
        pump(&trader, &broker);

        assert_eq!(trader.trade_count(), 0);
        let stats = trader.stats();
        assert_eq!(stats.closed_count, 1);
        assert_eq!(stats.sl_loss, 1);
        assert_eq!(stats.failed_trades.len(), 1);
        assert_eq!(
            stats.failed_trades[0].exit_reason,
            ExitReason::StopLossMarket
        );
        assert!(stats.performance_pct < 0.0);
    }

    #[test]
    fn test_entry_timeout_cancels_pending() {
        let (broker, trader) = setup();
        broker.set_auto_fill(false);
        trader.register_context(margin_context());
        let mut signal = momentum_signal(1_000);
        signal.entry_timeout_ms = 60_000;
        trader.on_entry_signal(1_000, &signal).unwrap();
        pump(&trader, &broker);

        trader.update_trades(60_999);
        assert_eq!(trader.trade_count(), 1);

        trader.update_trades(61_000);
        assert_eq!(trader.trade_count(), 0);
        assert_eq!(trader.stats().canceled_count, 1);
        assert_eq!(trader.stats().closed_count, 0);
    }

    #[test]
    fn test_target_reached_before_fill_cancels_entry() {
        let (broker, trader) = setup();
        broker.set_auto_fill(false);
        trader.register_context(margin_context());
        let signal = momentum_signal(1_000)
            .with_order_price(100.0)
            .with_levels(0.0, 103.0);
        trader.on_entry_signal(1_000, &signal).unwrap();
        pump(&trader, &broker);

        trader.update_quote(103.0, 103.5, 2_000);
        trader.update_trades(2_000);

        assert_eq!(trader.trade_count(), 0);
        assert_eq!(trader.stats().canceled_count, 1);
    }

    #[test]
    fn test_trade_timeout_force_closes_flat_trade() {
        let (broker, trader) = setup();
        let mut context = margin_context();
        context.take_profit = Some(
            ExitRule::new(4.0, DistanceKind::Percent).with_timeout(60_000, 0.5),
        );
        trader.register_context(context);
        trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);

        // Barely above water, below the 0.5% bar: timeout closes it.
        trader.update_quote(100.9, 101.1, 61_000);
        trader.update_trades(61_000);
        pump(&trader, &broker);

        assert_eq!(trader.trade_count(), 0);
        let stats = trader.stats();
        assert_eq!(stats.closed_count, 1);
        let record = stats
            .success_trades
            .iter()
            .chain(stats.roe_trades.iter())
            .chain(stats.failed_trades.iter())
            .next()
            .unwrap();
        assert_eq!(record.exit_reason, ExitReason::MarketTimeout);
    }

    #[test]
    fn test_expired_trade_is_closed() {
        let (broker, trader) = setup();
        trader.register_context(margin_context());
        let mut signal = momentum_signal(1_000);
        signal.expiry = 50_000;
        trader.on_entry_signal(1_000, &signal).unwrap();
        pump(&trader, &broker);

        trader.update_quote(100.0, 101.0, 50_001);
        trader.update_trades(50_001);
        pump(&trader, &broker);

        assert_eq!(trader.trade_count(), 0);
        assert_eq!(trader.stats().closed_count, 1);
    }

    #[test]
    fn test_untradeable_market_suppresses_exit_triggers() {
        let (broker, trader) = setup();
        trader.register_context(margin_context());
        trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);

        trader.set_tradeable(false);
        trader.update_quote(98.0, 98.3, 2_000);
        trader.update_trades(2_000);

        // Stop level is hit but no dispatch happens while untradeable.
        assert_eq!(trader.trade_count(), 1);
        assert_eq!(trader.trades_snapshot()[0].state, TradeState::Active);
    }

    #[test]
    fn test_partial_entry_fill_keeps_trade_active() {
        let (broker, trader) = setup();
        broker.set_entry_fill_fraction(0.5);
        trader.register_context(margin_context());
        trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);

        let trades = trader.trades_snapshot();
        assert_eq!(trades[0].state, TradeState::Active);
        assert_eq!(trades[0].exec_entry_qty, 0.5);
        assert_eq!(trades[0].order_quantity, 1.0);
    }

    #[test]
    fn test_step_stop_loss_operation_fires_on_tick() {
        let (broker, trader) = setup();
        let mut context = margin_context();
        context.dynamic_stop_loss = Some(ExitRule::new(1.0, DistanceKind::Percent));
        trader.register_context(context);
        trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);

        // +1% off the 101 entry reference arms the breakeven step.
        trader.update_quote(102.1, 102.2, 2_000);
        trader.update_trades(2_000);

        let trades = trader.trades_snapshot();
        assert!((trades[0].stop_loss - 101.0).abs() < 1e-9);
        assert!(trades[0].operations.is_empty());
    }
}

// =============================================================================
// Reconciliation Tests
// =============================================================================

mod reconciliation_tests {
    use super::*;

    #[test]
    fn test_rejected_order_moves_trade_to_error() {
        let (broker, trader) = setup();
        broker.set_auto_fill(false);
        trader.register_context(margin_context());
        trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);

        trader.order_signal(&OrderEvent::Rejected {
            order_id: "po-1".to_string(),
            ref_id: None,
            reason: "margin call".to_string(),
            timestamp: 2_000,
        });

        let trades = trader.trades_snapshot();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].state, TradeState::Error);

        // Error trades survive the tick pass until an operator removes them.
        trader.update_trades(3_000);
        assert_eq!(trader.trade_count(), 1);
    }

    #[test]
    fn test_unmatched_events_are_ignored() {
        let (_broker, trader) = setup();

        trader.order_signal(&OrderEvent::Filled {
            order_id: "foreign-1".to_string(),
            ref_id: None,
            exec: OrderExec::Exit,
            quantity: 1.0,
            price: 100.0,
            timestamp: 1_000,
        });
        trader.position_signal(&PositionEvent {
            position_id: "foreign-pos".to_string(),
            kind: PositionEventKind::Closed,
            quantity: 0.0,
            avg_price: 100.0,
            timestamp: 1_000,
        });

        assert_eq!(trader.trade_count(), 0);
        assert_eq!(trader.stats().closed_count, 0);
    }

    #[test]
    fn test_resting_stop_fill_sets_exit_reason() {
        let (_broker, trader) = setup();
        let mut trade = Trade::new(0, TradeKind::Margin, Direction::Long, 0.0, 1.0, 1_000);
        trade.add_entry_fill(1.0, 100.0, 1_000);
        trade.stop_order_id = Some("so-9".to_string());
        trader.add_trade(trade);

        trader.order_signal(&OrderEvent::Filled {
            order_id: "so-9".to_string(),
            ref_id: None,
            exec: OrderExec::Exit,
            quantity: 1.0,
            price: 98.0,
            timestamp: 2_000,
        });

        assert_eq!(trader.trade_count(), 0);
        let stats = trader.stats();
        assert_eq!(stats.sl_loss, 1);
        assert_eq!(
            stats.failed_trades[0].exit_reason,
            ExitReason::StopLossLimit
        );
    }

    #[test]
    fn test_position_close_finalizes_all_matching_trades() {
        let (_broker, trader) = setup();
        for _ in 0..2 {
            let mut trade = Trade::new(0, TradeKind::Position, Direction::Long, 0.0, 1.0, 1_000);
            trade.add_entry_fill(1.0, 100.0, 1_000);
            trade.position_id = Some("pos-1".to_string());
            trader.add_trade(trade);
        }

        trader.position_signal(&PositionEvent {
            position_id: "pos-1".to_string(),
            kind: PositionEventKind::Closed,
            quantity: 0.0,
            avg_price: 103.0,
            timestamp: 2_000,
        });

        assert_eq!(trader.trade_count(), 0);
        assert_eq!(trader.stats().closed_count, 2);
    }

    #[test]
    fn test_position_amend_distributes_reduction_oldest_first() {
        let (_broker, trader) = setup();
        for _ in 0..2 {
            let mut trade = Trade::new(0, TradeKind::Position, Direction::Long, 0.0, 1.0, 1_000);
            trade.add_entry_fill(1.0, 100.0, 1_000);
            trade.position_id = Some("pos-1".to_string());
            trader.add_trade(trade);
        }

        // 2.0 held, 0.5 remaining after the amend: 1.5 reduced.
        trader.position_signal(&PositionEvent {
            position_id: "pos-1".to_string(),
            kind: PositionEventKind::Amended,
            quantity: 0.5,
            avg_price: 102.0,
            timestamp: 2_000,
        });

        // Oldest trade fully closed, second partially.
        assert_eq!(trader.trade_count(), 1);
        assert_eq!(trader.stats().closed_count, 1);
        let remaining = trader.trades_snapshot();
        assert!((remaining[0].exec_exit_qty - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_spot_trades_ignore_position_events() {
        let (_broker, trader) = setup();
        let mut trade = Trade::new(0, TradeKind::Asset, Direction::Long, 0.0, 1.0, 1_000);
        trade.add_entry_fill(1.0, 100.0, 1_000);
        trade.position_id = Some("pos-1".to_string());
        trader.add_trade(trade);

        trader.position_signal(&PositionEvent {
            position_id: "pos-1".to_string(),
            kind: PositionEventKind::Closed,
            quantity: 0.0,
            avg_price: 103.0,
            timestamp: 2_000,
        });

        assert_eq!(trader.trade_count(), 1);
    }
}

// =============================================================================
// Command Tests
// =============================================================================

mod command_tests {
    use super::*;

    #[test]
    fn test_cmd_trade_exit_closes_active_trade() {
        let (broker, trader) = setup();
        trader.register_context(margin_context());
        let id = trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);

        let outcome = trader.cmd_trade_exit(2_000, id);
        assert!(!outcome.error);
        pump(&trader, &broker);

        assert_eq!(trader.trade_count(), 0);
        assert_eq!(trader.stats().closed_count, 1);
    }

    #[test]
    fn test_cmd_trade_exit_cancels_pending_entry() {
        let (broker, trader) = setup();
        broker.set_auto_fill(false);
        trader.register_context(margin_context());
        let id = trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);

        let outcome = trader.cmd_trade_exit(2_000, id);
        assert!(!outcome.error);
        assert_eq!(trader.trade_count(), 0);
        assert_eq!(trader.stats().canceled_count, 1);
    }

    #[test]
    fn test_cmd_trade_exit_unknown_trade_errors() {
        let (_broker, trader) = setup();
        let outcome = trader.cmd_trade_exit(1_000, 42);
        assert!(outcome.error);
    }

    #[test]
    fn test_cmd_trade_modify_updates_levels() {
        let (broker, trader) = setup();
        trader.register_context(margin_context());
        let id = trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);

        let outcome = trader.cmd_trade_modify(id, Some(97.0), Some(110.0));
        assert!(!outcome.error);

        let trades = trader.trades_snapshot();
        assert_eq!(trades[0].stop_loss, 97.0);
        assert_eq!(trades[0].take_profit, 110.0);
    }

    #[test]
    fn test_cmd_trade_modify_rejects_negative_levels() {
        let (_broker, trader) = setup();
        let outcome = trader.cmd_trade_modify(1, Some(-1.0), None);
        assert!(outcome.error);
    }

    #[test]
    fn test_cmd_trade_clean_removes_error_trade() {
        let (_broker, trader) = setup();
        let mut trade = Trade::new(0, TradeKind::Margin, Direction::Long, 0.0, 1.0, 1_000);
        trade.state = TradeState::Error;
        let id = trader.add_trade(trade);

        let outcome = trader.cmd_trade_clean(2_000, id);
        assert!(!outcome.error);
        assert_eq!(trader.trade_count(), 0);
        // An error teardown is not a realized close.
        assert_eq!(trader.stats().closed_count, 0);
    }

    #[test]
    fn test_cmd_trade_clean_rejects_live_trade() {
        let (broker, trader) = setup();
        trader.register_context(margin_context());
        let id = trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);

        let outcome = trader.cmd_trade_clean(2_000, id);
        assert!(outcome.error);
        assert_eq!(trader.trade_count(), 1);
    }

    #[test]
    fn test_close_all_flattens_everything() {
        let (broker, trader) = setup();
        trader.register_context(margin_context());
        trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);
        broker.set_auto_fill(false);
        trader.on_entry_signal(1_100, &momentum_signal(1_100)).unwrap();
        pump(&trader, &broker);

        let dispatched = trader.close_all(2_000);
        assert_eq!(dispatched, 2);
        pump(&trader, &broker);
        assert_eq!(trader.trade_count(), 0);
    }

    #[test]
    fn test_cancel_all_pending_leaves_active_trades() {
        let (broker, trader) = setup();
        trader.register_context(margin_context());
        trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);
        broker.set_auto_fill(false);
        trader.on_entry_signal(1_100, &momentum_signal(1_100)).unwrap();
        pump(&trader, &broker);

        let dispatched = trader.cancel_all_pending(2_000);
        assert_eq!(dispatched, 1);
        pump(&trader, &broker);

        let trades = trader.trades_snapshot();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].state, TradeState::Active);
        assert_eq!(trader.stats().canceled_count, 1);
    }

    #[test]
    fn test_stats_track_last_and_prev_trade() {
        let (broker, trader) = setup();
        trader.register_context(margin_context());
        let first = trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);
        trader.cmd_trade_exit(2_000, first);
        pump(&trader, &broker);

        let second = trader.on_entry_signal(3_000, &momentum_signal(3_000)).unwrap();
        pump(&trader, &broker);
        trader.cmd_trade_exit(4_000, second);
        pump(&trader, &broker);

        let stats = trader.stats();
        assert_eq!(stats.last_trade.unwrap().id, second);
        assert_eq!(stats.prev_trade.unwrap().id, first);
    }

    #[test]
    fn test_managed_quantity_edit_is_rejected() {
        let (_broker, trader) = setup();
        trader.register_context(
            Context::new("managed", TradeKind::Margin).with_quantity(QuantityMode::Managed, 1.0),
        );

        assert!(matches!(
            trader.set_context_option("managed", "quantity", 2.0),
            Err(TradeError::OptionRejected(_))
        ));
        // The handler-owned path still works.
        trader.set_managed_quantity("managed", 2.0).unwrap();
        assert_eq!(trader.context("managed").unwrap().quantity, 2.0);
    }

    #[test]
    fn test_context_option_edits() {
        let (_broker, trader) = setup();
        trader.register_context(margin_context());

        trader.set_context_option("momentum", "quantity", 3.0).unwrap();
        trader.set_context_option("momentum", "max_trades", 5.0).unwrap();
        trader
            .set_context_option("momentum", "stop_loss_distance", 1.5)
            .unwrap();

        let context = trader.context("momentum").unwrap();
        assert_eq!(context.quantity, 3.0);
        assert_eq!(context.max_trades, 5);
        assert_eq!(context.stop_loss.as_ref().unwrap().distance, 1.5);

        assert!(matches!(
            trader.set_context_option("momentum", "bogus", 1.0),
            Err(TradeError::InvalidParameter(_))
        ));
    }
}

// =============================================================================
// Engine Command Tests
// =============================================================================

mod engine_command_tests {
    use super::*;
    use spectre::services::TradingEngine;

    fn engine() -> (Arc<PaperBroker>, TradingEngine) {
        let broker = Arc::new(PaperBroker::new(1_000_000.0));
        let engine = TradingEngine::new(Arc::new(Config::default()), broker.clone());
        (broker, engine)
    }

    #[test]
    fn test_cmd_close_all_scoped_to_market() {
        let (broker, engine) = engine();
        let trader = engine.register_instrument(instrument(100.0, 101.0));
        trader.register_context(margin_context());
        trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);

        let outcome = engine.cmd_close_all(2_000, Some("BTCUSDT"));
        assert!(!outcome.error);
        assert_eq!(outcome.messages.len(), 1);
        pump(&trader, &broker);
        assert_eq!(trader.trade_count(), 0);
    }

    #[test]
    fn test_cmd_close_all_unknown_market_errors() {
        let (_broker, engine) = engine();
        let outcome = engine.cmd_close_all(2_000, Some("NOPE"));
        assert!(outcome.error);
    }

    #[test]
    fn test_cmd_cancel_all_pending_across_markets() {
        let (broker, engine) = engine();
        let trader = engine.register_instrument(instrument(100.0, 101.0));
        trader.register_context(margin_context());
        broker.set_auto_fill(false);
        trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);

        let outcome = engine.cmd_cancel_all_pending(2_000, None);
        assert!(!outcome.error);
        pump(&trader, &broker);
        assert_eq!(trader.trade_count(), 0);
    }
}

// =============================================================================
// Handler Tests
// =============================================================================

mod handler_tests {
    use super::*;

    struct CountingHandler {
        context_id: String,
        calls: AtomicUsize,
    }

    impl TradeHandler for CountingHandler {
        fn context_id(&self) -> &str {
            &self.context_id
        }

        fn process(&self, _trader: &StrategyTrader, _timestamp: i64) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHandler;

    impl TradeHandler for FailingHandler {
        fn context_id(&self) -> &str {
            "failing"
        }

        fn process(&self, _trader: &StrategyTrader, _timestamp: i64) -> Result<()> {
            Err(TradeError::InvalidParameter("boom".to_string()))
        }
    }

    #[test]
    fn test_failing_handler_does_not_poison_the_tick() {
        let (_broker, trader) = setup();
        let counting = Arc::new(CountingHandler {
            context_id: "counting".to_string(),
            calls: AtomicUsize::new(0),
        });
        trader.install_handler(Arc::new(FailingHandler));
        trader.install_handler(counting.clone());

        trader.update_trades(1_000);
        trader.update_trades(2_000);

        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_drawdown_guard_trips_and_deactivates() {
        let (broker, trader) = setup();
        // No stop rule: the guard is the only protection here.
        trader.register_context(
            Context::new("momentum", TradeKind::Margin).with_quantity(QuantityMode::Fixed, 1.0),
        );
        let guard = Arc::new(DrawdownGuardHandler::new("momentum", 3.0));
        trader.install_handler(guard.clone());

        trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);

        trader.update_quote(94.5, 95.0, 2_000);
        trader.update_trades(2_000);
        pump(&trader, &broker);

        assert!(guard.tripped());
        assert!(!trader.activity());
        assert_eq!(trader.trade_count(), 0);
    }

    #[test]
    fn test_reinvest_handler_grows_managed_quantity() {
        let (broker, trader) = setup();
        trader.register_context(
            Context::new("managed", TradeKind::Margin).with_quantity(QuantityMode::Managed, 1.0),
        );
        trader.install_handler(Arc::new(ReinvestGainHandler::new("managed", 1.0, 1.0)));

        let signal = EntrySignal::new(Direction::Long, 1_000).with_context("managed");
        let id = trader.on_entry_signal(1_000, &signal).unwrap();
        pump(&trader, &broker);

        // Profitable manual exit at a higher quote.
        trader.update_quote(106.0, 106.5, 2_000);
        trader.cmd_trade_exit(2_000, id);
        pump(&trader, &broker);

        assert!(trader.context("managed").unwrap().quantity > 1.0);
    }
}

// =============================================================================
// Alert and Event Tests
// =============================================================================

mod alert_event_tests {
    use super::*;

    #[test]
    fn test_one_shot_alert_fires_once_and_is_purged() {
        let (_broker, trader) = setup();
        trader.add_alert(
            Alert::price_cross(0, 0, CrossDirection::Up, 100.5)
                .one_shot()
                .with_message("level"),
        );

        let fired = trader.check_alerts(1_000, 100.0, 101.0);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].message, "level");
        assert!(trader.alerts().is_empty());

        assert!(trader.check_alerts(2_000, 100.0, 101.0).is_empty());
    }

    #[tokio::test]
    async fn test_trade_entry_event_is_published() {
        let (broker, trader) = setup();
        trader.register_context(margin_context());
        let mut events = trader.events().subscribe();

        let id = trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);

        let event = events.recv().await.unwrap();
        match event {
            TraderEvent::TradeEntry {
                strategy_id,
                market_id,
                trade,
                ..
            } => {
                assert_eq!(strategy_id, "test");
                assert_eq!(market_id, "BTCUSDT");
                assert_eq!(trade.id, id);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_trade_exit_event_is_published() {
        let (broker, trader) = setup();
        trader.register_context(margin_context());
        let id = trader.on_entry_signal(1_000, &momentum_signal(1_000)).unwrap();
        pump(&trader, &broker);

        let mut events = trader.events().subscribe();
        trader.cmd_trade_exit(2_000, id);
        pump(&trader, &broker);

        loop {
            match events.recv().await.unwrap() {
                TraderEvent::TradeExit { trade, .. } => {
                    assert_eq!(trade.id, id);
                    assert_eq!(trade.state, TradeState::Closed);
                    break;
                }
                _ => continue,
            }
        }
    }
}
