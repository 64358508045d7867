// Technical indicators module
// Weighted moving averages, a high/low volatility proxy, trend levels and range position

pub mod atr;
pub mod moving_average;
pub mod range;
pub mod trend;

pub use atr::calculate_atr;
pub use moving_average::{calculate_wma, last_wma};
pub use range::{highest_high, hl_ratio, lowest_low};
pub use trend::{classify_trend, Trend, TrendThresholds};
