use yata::core::{Method, PeriodType};
use yata::methods::WMA;

/// Weighted Moving Average series.
///
/// Weights run linearly from `period` for the newest sample down to 1 for the
/// oldest. One output is produced per input index that has a full window, so the
/// result has `values.len() - period + 1` entries, aligned to the tail of `values`.
///
/// Returns None when the input is shorter than the window or the period is not
/// representable.
pub fn calculate_wma(values: &[f64], period: usize) -> Option<Vec<f64>> {
    if period == 0 || values.len() < period {
        return None;
    }
    let length = PeriodType::try_from(period).ok()?;

    let mut wma = WMA::new(length, &values[0]).ok()?;
    let mut series = Vec::with_capacity(values.len() - period + 1);
    for (i, value) in values.iter().enumerate() {
        let out = wma.next(value);
        if i + 1 >= period {
            series.push(out);
        }
    }

    Some(series)
}

/// Last value of the WMA series
pub fn last_wma(values: &[f64], period: usize) -> Option<f64> {
    calculate_wma(values, period)?.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close_to(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_wma_weights_newest_highest() {
        // (1*1 + 2*2 + 3*3) / 6
        let series = calculate_wma(&[1.0, 2.0, 3.0], 3).unwrap();
        assert_eq!(series.len(), 1);
        assert!(close_to(series[0], 14.0 / 6.0));
    }

    #[test]
    fn test_wma_series_alignment() {
        let values = vec![10.0, 11.0, 12.0, 13.0, 14.0];
        let series = calculate_wma(&values, 2).unwrap();
        assert_eq!(series.len(), 4);
        // (10 + 2*11) / 3, then (11 + 2*12) / 3, ...
        assert!(close_to(series[0], 32.0 / 3.0));
        assert!(close_to(series[3], 41.0 / 3.0));
    }

    #[test]
    fn test_wma_constant_input() {
        let series = calculate_wma(&[5.0; 20], 7).unwrap();
        assert!(series.iter().all(|v| close_to(*v, 5.0)));
    }

    #[test]
    fn test_wma_insufficient_data() {
        assert!(calculate_wma(&[1.0, 2.0], 3).is_none());
        assert!(calculate_wma(&[1.0, 2.0], 0).is_none());
        assert!(last_wma(&[], 1).is_none());
    }
}
