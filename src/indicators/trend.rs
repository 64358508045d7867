use serde::{Deserialize, Serialize};

/// Discrete trend level, ordered from strongest down to strongest up
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Trend {
    StrongDown,
    Down,
    Neutral,
    Up,
    StrongUp,
}

/// Thresholds for [`classify_trend`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendThresholds {
    /// Number of smoothed samples between the reference point and now
    pub lookback: usize,
    /// Percent move that makes a trend
    pub weak_pct: f64,
    /// Percent move that makes a strong trend
    pub strong_pct: f64,
}

impl Default for TrendThresholds {
    fn default() -> Self {
        Self {
            lookback: 5,
            weak_pct: 0.5,
            strong_pct: 2.0,
        }
    }
}

/// Classify the trajectory of a smoothed close series.
///
/// Compares the newest value against the one `lookback` samples earlier as a
/// percent change. Returns None when the series is too short or the reference is zero.
pub fn classify_trend(smoothed: &[f64], thresholds: &TrendThresholds) -> Option<Trend> {
    if thresholds.lookback == 0 || smoothed.len() <= thresholds.lookback {
        return None;
    }
    let last = *smoothed.last()?;
    let reference = smoothed[smoothed.len() - 1 - thresholds.lookback];
    if reference == 0.0 {
        return None;
    }

    let change_pct = (last - reference) / reference * 100.0;
    let trend = if change_pct >= thresholds.strong_pct {
        Trend::StrongUp
    } else if change_pct >= thresholds.weak_pct {
        Trend::Up
    } else if change_pct <= -thresholds.strong_pct {
        Trend::StrongDown
    } else if change_pct <= -thresholds.weak_pct {
        Trend::Down
    } else {
        Trend::Neutral
    };

    Some(trend)
}
