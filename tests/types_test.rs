//! Tests for the core trade lifecycle types
//!
//! Tests cover:
//! - Trade state queries and fill bookkeeping
//! - Quantity invariants under over-fills
//! - Profit/loss estimation
//! - Regions (range, trend, expiry, direction filter)
//! - Alerts (price cross, cooldown, countdown)
//! - Context exit rules and sizing
//! - Trade operations

use spectre::types::*;

fn instrument(bid: f64, ask: f64) -> Instrument {
    let mut instrument = Instrument::new("BTCUSDT".to_string(), "BTC".to_string());
    instrument.tradeable = true;
    instrument.update_quote(bid, ask, 1_000);
    instrument
}

// =============================================================================
// Trade Tests
// =============================================================================

mod trade_tests {
    use super::*;

    #[test]
    fn test_new_trade_is_pending() {
        let trade = Trade::new(1, TradeKind::Margin, Direction::Long, 0.0, 2.0, 1_000);

        assert!(trade.is_pending());
        assert!(!trade.is_active());
        assert!(!trade.can_delete());
        assert_eq!(trade.exit_reason, ExitReason::None);
        assert_eq!(trade.remaining_quantity(), 0.0);
    }

    #[test]
    fn test_entry_fill_activates_trade() {
        let mut trade = Trade::new(1, TradeKind::Margin, Direction::Long, 0.0, 2.0, 1_000);
        trade.add_entry_fill(1.0, 100.0, 2_000);

        assert!(trade.is_active());
        assert_eq!(trade.state, TradeState::Active);
        assert_eq!(trade.exec_entry_qty, 1.0);
        assert_eq!(trade.entry_price, 100.0);
        assert_eq!(trade.first_realized_entry_time, 2_000);
        assert_eq!(trade.best_price, 100.0);
        assert_eq!(trade.worst_price, 100.0);
    }

    #[test]
    fn test_entry_fill_vwap() {
        let mut trade = Trade::new(1, TradeKind::Margin, Direction::Long, 0.0, 3.0, 1_000);
        trade.add_entry_fill(1.0, 100.0, 2_000);
        trade.add_entry_fill(2.0, 103.0, 3_000);

        assert_eq!(trade.exec_entry_qty, 3.0);
        assert!((trade.entry_price - 102.0).abs() < 1e-9);
        // Second partial fill marks the exit orders dirty.
        assert!(trade.is_dirty);
    }

    #[test]
    fn test_entry_overfill_is_clamped() {
        let mut trade = Trade::new(1, TradeKind::Margin, Direction::Long, 0.0, 2.0, 1_000);
        trade.add_entry_fill(5.0, 100.0, 2_000);

        assert_eq!(trade.exec_entry_qty, 2.0);
        trade.add_entry_fill(1.0, 110.0, 3_000);
        assert_eq!(trade.exec_entry_qty, 2.0);
        assert_eq!(trade.entry_price, 100.0);
    }

    #[test]
    fn test_exit_fill_closes_trade() {
        let mut trade = Trade::new(1, TradeKind::Margin, Direction::Long, 0.0, 2.0, 1_000);
        trade.add_entry_fill(2.0, 100.0, 2_000);
        trade.add_exit_fill(2.0, 105.0, 3_000);

        assert!(trade.is_closed());
        assert!(trade.can_delete());
        assert_eq!(trade.exit_price, 105.0);
        assert_eq!(trade.exit_reason, ExitReason::Closed);
        assert_eq!(trade.last_realized_exit_time, 3_000);
    }

    #[test]
    fn test_exit_fill_keeps_explicit_reason() {
        let mut trade = Trade::new(1, TradeKind::Margin, Direction::Long, 0.0, 1.0, 1_000);
        trade.add_entry_fill(1.0, 100.0, 2_000);
        trade.exit_reason = ExitReason::TakeProfitMarket;
        trade.add_exit_fill(1.0, 104.0, 3_000);

        assert_eq!(trade.exit_reason, ExitReason::TakeProfitMarket);
    }

    #[test]
    fn test_exit_overfill_is_clamped() {
        let mut trade = Trade::new(1, TradeKind::Margin, Direction::Long, 0.0, 2.0, 1_000);
        trade.add_entry_fill(1.0, 100.0, 2_000);
        trade.add_exit_fill(5.0, 105.0, 3_000);

        assert_eq!(trade.exec_exit_qty, 1.0);
        assert!(trade.exec_exit_qty <= trade.exec_entry_qty);
    }

    #[test]
    fn test_partial_exit_stays_active() {
        let mut trade = Trade::new(1, TradeKind::Margin, Direction::Long, 0.0, 2.0, 1_000);
        trade.add_entry_fill(2.0, 100.0, 2_000);
        trade.add_exit_fill(1.0, 104.0, 3_000);

        assert!(trade.is_active());
        assert!(!trade.is_closed());
        assert_eq!(trade.remaining_quantity(), 1.0);
    }

    #[test]
    fn test_extremes_tracking_long() {
        let mut trade = Trade::new(1, TradeKind::Margin, Direction::Long, 0.0, 1.0, 1_000);
        trade.add_entry_fill(1.0, 100.0, 2_000);
        trade.update_extremes(104.0);
        trade.update_extremes(97.0);
        trade.update_extremes(101.0);

        assert_eq!(trade.best_price, 104.0);
        assert_eq!(trade.worst_price, 97.0);
    }

    #[test]
    fn test_extremes_tracking_short() {
        let mut trade = Trade::new(1, TradeKind::Margin, Direction::Short, 0.0, 1.0, 1_000);
        trade.add_entry_fill(1.0, 100.0, 2_000);
        trade.update_extremes(95.0);
        trade.update_extremes(103.0);

        assert_eq!(trade.best_price, 95.0);
        assert_eq!(trade.worst_price, 103.0);
    }

    #[test]
    fn test_profit_loss_estimation() {
        let mut trade = Trade::new(1, TradeKind::Margin, Direction::Short, 0.0, 1.0, 1_000);
        trade.add_entry_fill(1.0, 100.0, 2_000);

        // Short exit buys back at the bid.
        let quote = instrument(95.0, 96.0);
        assert!((trade.estimate_profit_loss(&quote) - 5.0).abs() < 1e-9);

        trade.add_exit_fill(1.0, 95.0, 3_000);
        assert!((trade.realized_profit_loss_pct() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_state_is_not_deletable() {
        let mut trade = Trade::new(1, TradeKind::Margin, Direction::Long, 0.0, 1.0, 1_000);
        trade.state = TradeState::Error;

        assert!(trade.is_error());
        assert!(!trade.can_delete());
    }

    #[test]
    fn test_record_round_trip() {
        let mut trade = Trade::new(7, TradeKind::Position, Direction::Short, 99.0, 2.0, 1_000);
        trade.add_entry_fill(2.0, 99.0, 2_000);
        trade.stop_loss = 101.0;
        trade.take_profit = 95.0;
        trade.position_id = Some("pos-1".to_string());
        trade.label = "swing".to_string();

        let restored = Trade::from_record(trade.record());
        assert_eq!(restored.id, 7);
        assert_eq!(restored.state, TradeState::Active);
        assert_eq!(restored.stop_loss, 101.0);
        assert_eq!(restored.position_id.as_deref(), Some("pos-1"));
        assert!(!restored.is_dirty);
    }

    #[test]
    fn test_exit_reason_cancel_family() {
        assert!(ExitReason::CanceledTimeout.is_canceled());
        assert!(ExitReason::CanceledTargeted.is_canceled());
        assert!(ExitReason::CanceledManually.is_canceled());
        assert!(!ExitReason::StopLossMarket.is_canceled());
        assert!(!ExitReason::Closed.is_canceled());
    }

    #[test]
    fn test_trade_kind_capabilities() {
        assert!(TradeKind::Asset.is_spot());
        assert!(!TradeKind::Asset.uses_position_events());
        assert!(TradeKind::Margin.uses_position_events());
        assert!(TradeKind::Position.uses_position_events());
    }
}

// =============================================================================
// Instrument Tests
// =============================================================================

mod instrument_tests {
    use super::*;

    #[test]
    fn test_closable_exec_price_sides() {
        let quote = instrument(100.0, 101.0);

        assert_eq!(quote.closable_exec_price(Direction::Long), 101.0);
        assert_eq!(quote.closable_exec_price(Direction::Short), 100.0);
        assert_eq!(quote.mid(), 100.5);
        assert_eq!(quote.spread(), 1.0);
    }
}

// =============================================================================
// Region Tests
// =============================================================================

mod region_tests {
    use super::*;

    fn priced_signal(direction: Direction, price: f64) -> EntrySignal {
        EntrySignal::new(direction, 1_000).with_order_price(price)
    }

    #[test]
    fn test_range_region_admission() {
        let region = Region::range(1, 0, 95.0, 105.0);

        assert!(region.test(1_000, &priced_signal(Direction::Long, 100.0)));
        assert!(region.test(1_000, &priced_signal(Direction::Long, 95.0)));
        assert!(!region.test(1_000, &priced_signal(Direction::Long, 110.0)));
    }

    #[test]
    fn test_region_direction_filter() {
        let region = Region::range(1, 0, 95.0, 105.0).with_direction(Direction::Long);

        assert!(region.test(1_000, &priced_signal(Direction::Long, 100.0)));
        assert!(!region.test(1_000, &priced_signal(Direction::Short, 100.0)));
    }

    #[test]
    fn test_region_expiry() {
        let region = Region::range(1, 0, 95.0, 105.0).with_expiry(5_000);

        assert!(region.test(5_000, &priced_signal(Direction::Long, 100.0)));
        assert!(!region.test(5_001, &priced_signal(Direction::Long, 100.0)));
        assert!(region.can_delete(5_001, 100.0, 101.0));
    }

    #[test]
    fn test_trend_region_interpolates() {
        let region = Region::trend(1, 0, (100.0, 110.0), (200.0, 210.0), 0, 1_000);

        // Midpoint of the trend: band is (150, 160).
        assert!(region.test(500, &priced_signal(Direction::Long, 155.0)));
        assert!(!region.test(500, &priced_signal(Direction::Long, 120.0)));
        assert!(region.test(0, &priced_signal(Direction::Long, 105.0)));
    }

    #[test]
    fn test_trend_region_expires_past_end() {
        let region = Region::trend(1, 0, (100.0, 110.0), (200.0, 210.0), 0, 1_000);
        assert!(region.can_delete(1_001, 0.0, 0.0));
    }

    #[test]
    fn test_unpriced_signal_passes() {
        let region = Region::range(1, 0, 95.0, 105.0);
        let signal = EntrySignal::new(Direction::Long, 1_000);

        assert!(region.test(1_000, &signal));
    }
}

// =============================================================================
// Alert Tests
// =============================================================================

mod alert_tests {
    use super::*;

    #[test]
    fn test_price_cross_up_fires_on_ask() {
        let mut alert = Alert::price_cross(1, 0, CrossDirection::Up, 105.0);

        assert!(alert.test(1_000, 100.0, 101.0).is_none());
        let fired = alert.test(2_000, 104.5, 105.5).unwrap();
        assert_eq!(fired.price, 105.5);
        assert_eq!(fired.alert_id, 1);
    }

    #[test]
    fn test_price_cross_down_fires_on_bid() {
        let mut alert = Alert::price_cross(1, 0, CrossDirection::Down, 95.0);

        assert!(alert.test(1_000, 96.0, 97.0).is_none());
        assert!(alert.test(2_000, 94.0, 95.0).is_some());
    }

    #[test]
    fn test_cooldown_throttles_refiring() {
        let mut alert =
            Alert::price_cross(1, 0, CrossDirection::Up, 100.0).with_cooldown(10_000);

        assert!(alert.test(1_000, 100.0, 101.0).is_some());
        assert!(alert.test(5_000, 100.0, 101.0).is_none());
        assert!(alert.test(11_000, 100.0, 101.0).is_some());
    }

    #[test]
    fn test_one_shot_exhausts() {
        let mut alert = Alert::price_cross(1, 0, CrossDirection::Up, 100.0).one_shot();

        assert!(alert.test(1_000, 100.0, 101.0).is_some());
        assert!(alert.can_delete(1_001));
        assert!(alert.test(2_000, 100.0, 101.0).is_none());
    }

    #[test]
    fn test_unlimited_countdown_survives() {
        let mut alert = Alert::price_cross(1, 0, CrossDirection::Up, 100.0);

        for t in 1..10 {
            assert!(alert.test(t * 1_000, 100.0, 101.0).is_some());
        }
        assert!(!alert.can_delete(100_000));
    }
}

// =============================================================================
// Context Tests
// =============================================================================

mod context_tests {
    use super::*;

    #[test]
    fn test_exit_rule_percent_levels() {
        let rule = ExitRule::new(2.0, DistanceKind::Percent);

        assert!((rule.stop_price(100.0, Direction::Long) - 98.0).abs() < 1e-9);
        assert!((rule.target_price(100.0, Direction::Long) - 102.0).abs() < 1e-9);
        assert!((rule.stop_price(100.0, Direction::Short) - 102.0).abs() < 1e-9);
        assert!((rule.target_price(100.0, Direction::Short) - 98.0).abs() < 1e-9);
    }

    #[test]
    fn test_exit_rule_price_levels() {
        let rule = ExitRule::new(5.0, DistanceKind::Price);

        assert_eq!(rule.stop_price(100.0, Direction::Long), 95.0);
        assert_eq!(rule.target_price(100.0, Direction::Short), 95.0);
    }

    #[test]
    fn test_fixed_sizing() {
        let context = Context::new("c", TradeKind::Margin).with_quantity(QuantityMode::Fixed, 1.5);
        assert_eq!(context.size_quantity(100.0, 98.0, 10_000.0), 1.5);
    }

    #[test]
    fn test_risk_pct_sizing() {
        let context =
            Context::new("c", TradeKind::Margin).with_quantity(QuantityMode::RiskPct, 1.0);

        // 1% of 10k = 100 at risk over a 2.0 stop distance.
        assert!((context.size_quantity(100.0, 98.0, 10_000.0) - 50.0).abs() < 1e-9);
        // Degenerate stop distance sizes to zero.
        assert_eq!(context.size_quantity(100.0, 100.0, 10_000.0), 0.0);
    }
}

// =============================================================================
// Operation Tests
// =============================================================================

mod operation_tests {
    use super::*;
    use spectre::services::PaperBroker;

    #[test]
    fn test_step_stop_loss_waits_for_trigger() {
        let broker = PaperBroker::new(10_000.0);
        let quote = instrument(100.0, 101.0);
        let mut trade = Trade::new(1, TradeKind::Margin, Direction::Long, 0.0, 1.0, 1_000);
        trade.add_entry_fill(1.0, 100.0, 2_000);
        trade.stop_loss = 98.0;

        let op = TradeOperation::StepStopLoss {
            trigger_price: 103.0,
            stop_price: 100.0,
        };
        assert_eq!(
            op.test_and_operate(&mut trade, &quote, &broker),
            OperationResult::Nothing
        );
        assert_eq!(trade.stop_loss, 98.0);
    }

    #[test]
    fn test_step_stop_loss_moves_stop() {
        let broker = PaperBroker::new(10_000.0);
        let quote = instrument(103.0, 104.0);
        let mut trade = Trade::new(1, TradeKind::Margin, Direction::Long, 0.0, 1.0, 1_000);
        trade.add_entry_fill(1.0, 100.0, 2_000);
        trade.stop_loss = 98.0;

        let op = TradeOperation::StepStopLoss {
            trigger_price: 103.0,
            stop_price: 100.0,
        };
        assert_eq!(
            op.test_and_operate(&mut trade, &quote, &broker),
            OperationResult::Triggered
        );
        assert_eq!(trade.stop_loss, 100.0);
    }

    #[test]
    fn test_scale_out_reduces_remaining() {
        let broker = PaperBroker::new(10_000.0);
        let quote = instrument(104.0, 105.0);
        let mut trade = Trade::new(1, TradeKind::Margin, Direction::Long, 0.0, 2.0, 1_000);
        trade.add_entry_fill(2.0, 100.0, 2_000);

        let op = TradeOperation::ScaleOut {
            trigger_price: 104.0,
            fraction: 0.5,
        };
        assert_eq!(
            op.test_and_operate(&mut trade, &quote, &broker),
            OperationResult::Triggered
        );
        // The fill itself arrives through the queued broker signal.
        assert_eq!(broker.drain_signals().len(), 1);
    }
}
