//! Paper-trading simulation driver.
//!
//! Runs one trader over a synthetic quote stream against the paper broker:
//! quotes tick in, entry signals fire on momentum flips, broker confirmation
//! signals are pumped back through reconciliation, and the snapshot is saved
//! on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use spectre::config::Config;
use spectre::services::{PaperBroker, SnapshotStore, TradingEngine};
use spectre::types::{
    Alert, Context, CrossDirection, Direction, DistanceKind, EntrySignal, ExitRule, Instrument,
    QuantityMode, Region, TradeKind, TraderEvent,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env());
    info!(
        "Starting spectre (strategy {}, paper mode {})",
        config.strategy_id, config.paper_mode
    );

    let store = Arc::new(SnapshotStore::new(&config.db_path)?);
    let broker = Arc::new(PaperBroker::new(100_000.0));
    let engine = TradingEngine::new(config.clone(), broker.clone()).with_store(store);

    let mut instrument = Instrument::new("BTCUSDT".to_string(), "BTC".to_string());
    instrument.tradeable = true;
    let trader = engine.register_instrument(instrument);

    trader.register_context(
        Context::new("momentum", TradeKind::Margin)
            .with_max_trades(2)
            .with_quantity(QuantityMode::Fixed, 0.5)
            .with_stop_loss(ExitRule::new(1.0, DistanceKind::Percent))
            .with_take_profit(
                ExitRule::new(2.0, DistanceKind::Percent).with_timeout(120_000, 0.25),
            ),
    );

    // Only admit entries inside a wide band around the synthetic base price.
    trader.add_region(Region::range(0, 0, 40_000.0, 60_000.0));
    trader.add_alert(
        Alert::price_cross(0, 0, CrossDirection::Up, 52_000.0)
            .with_cooldown(60_000)
            .with_message("price above 52k"),
    );

    if engine.restore_all()? > 0 {
        info!("Restored previous session state");
    }

    let mut events = engine.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let TraderEvent::TradeExit { trade, .. } = event {
                info!(
                    "Session P/L update: trade {} finished at {:.2}%",
                    trade.id,
                    trade.realized_profit_loss_pct()
                );
            }
        }
    });

    let mut ticker = tokio::time::interval(Duration::from_millis(config.tick_interval_ms));
    let mut timestamp: i64 = chrono::Utc::now().timestamp_millis();
    let mut phase: f64 = 0.0;
    let mut last_mid = 50_000.0;
    let mut trend_up = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                timestamp += config.tick_interval_ms as i64;
                phase += 0.05;

                // Synthetic drifting quote.
                let mid = 50_000.0 + 1_500.0 * phase.sin() + 400.0 * (3.1 * phase).sin();
                let spread = 10.0;
                trader.update_quote(mid - spread / 2.0, mid + spread / 2.0, timestamp);

                // Momentum flip heuristic: enter with the new swing.
                let rising = mid > last_mid;
                if rising != trend_up && trader.trade_count() < 2 {
                    let direction = if rising { Direction::Long } else { Direction::Short };
                    let signal = EntrySignal::new(direction, timestamp).with_context("momentum");
                    match trader.on_entry_signal(timestamp, &signal) {
                        Ok(id) => info!("Signal admitted as trade {}", id),
                        Err(e) => warn!("Signal rejected: {}", e),
                    }
                }
                trend_up = rising;
                last_mid = mid;

                // Pump broker confirmations back through reconciliation.
                for signal in broker.drain_signals() {
                    engine.dispatch("BTCUSDT", &signal);
                }

                engine.process_all(timestamp);
            }
        }
    }

    engine.close_all(timestamp);
    for signal in broker.drain_signals() {
        engine.dispatch("BTCUSDT", &signal);
    }
    engine.save_all()?;
    info!("Final cash balance: {:.2}", broker.cash());
    Ok(())
}
