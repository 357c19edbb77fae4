//! Domain types: bars, instruments, orders, fills, positions.

pub mod bar;
pub mod fill;
pub mod ids;
pub mod instrument;
pub mod order;
pub mod position;

pub use bar::{Bar, BarError, Bars};
pub use fill::Fill;
pub use ids::OrderId;
pub use instrument::{Instrument, OrderSide};
pub use order::{Order, OrderRequest, OrderState, OrderStateError, OrderType, OrderTypeKind};
pub use position::Position;

/// Timestamp type used throughout the engine.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
