use crate::models::HistoricalPrice;

pub fn highest_high(bars: &[HistoricalPrice]) -> Option<f64> {
    bars.iter().map(|b| b.high).reduce(f64::max)
}

pub fn lowest_low(bars: &[HistoricalPrice]) -> Option<f64> {
    bars.iter().map(|b| b.low).reduce(f64::min)
}

/// Where `price` sits inside the high/low range of `bars`: 0 at the low, 1 at the high.
///
/// A flat range reads as the midpoint. Prices outside the range fall outside [0, 1].
pub fn hl_ratio(bars: &[HistoricalPrice], price: f64) -> Option<f64> {
    let high = highest_high(bars)?;
    let low = lowest_low(bars)?;
    if high <= low {
        return Some(0.5);
    }
    Some((price - low) / (high - low))
}
