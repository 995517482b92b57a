pub mod broker;
pub mod engine;
pub mod handlers;
pub mod notifier;
pub mod store;
pub mod trader;

pub use broker::{
    Broker, BrokerSignal, OrderAck, OrderEvent, OrderExec, PaperBroker, PositionEvent,
    PositionEventKind,
};
pub use engine::TradingEngine;
pub use handlers::{DrawdownGuardHandler, ReinvestGainHandler, TradeHandler};
pub use notifier::{EventBus, LogNotifier, Notifier};
pub use store::SnapshotStore;
pub use trader::{CommandOutcome, StrategyTrader, TraderSnapshot, TraderStats};
