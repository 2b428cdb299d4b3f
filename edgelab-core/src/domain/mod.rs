//! Domain types: candles, strategy configuration, trades and equity points.

pub mod candle;
pub mod config;
pub mod ids;
pub mod trade;

pub use candle::{Candle, CandleError, CandleStore};
pub use config::{
    ConfigError, DcaGrid, Direction, FillPolicy, OrderSizing, StrategyConfig, TakeProfitLevel,
    TrailingStop,
};
pub use ids::{ConfigHash, PositionId, RangeHash};
pub use trade::{EquityPoint, ExitReason, Side, Trade};
