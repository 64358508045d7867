// Volatility proxy: weighted-average high minus weighted-average low over one period

use crate::indicators::moving_average::last_wma;
use crate::models::HistoricalPrice;

/// Returns `WMA(highs)[last] - WMA(lows)[last]`, or None if there are fewer bars than `period`
pub fn calculate_atr(bars: &[HistoricalPrice], period: usize) -> Option<f64> {
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();

    let hma = last_wma(&highs, period)?;
    let lma = last_wma(&lows, period)?;
    Some(hma - lma)
}
