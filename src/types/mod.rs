pub mod alert;
pub mod context;
pub mod event;
pub mod instrument;
pub mod operations;
pub mod region;
pub mod signal;
pub mod trade;

pub use alert::*;
pub use context::*;
pub use event::*;
pub use instrument::*;
pub use operations::*;
pub use region::*;
pub use signal::*;
pub use trade::*;
