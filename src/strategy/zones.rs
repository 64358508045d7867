/// A grid zone produced by [`grid_range`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Zone {
    pub lower: f64,
    pub upper: f64,
    pub width: f64,
}

/// Partition `[lower, upper]` into `grids` equal zones and return the one holding `price`.
///
/// A price sitting exactly on a grid line belongs to neither neighbour, so the
/// zone straddles it: `(price - width, price + width)`. Prices outside the range
/// are not clamped; the arithmetic runs as-is and the caller owns the bounds.
pub fn grid_range(price: f64, lower: f64, upper: f64, grids: u32) -> Zone {
    let width = (upper - lower) / grids as f64;
    let offset = price - lower;

    // Remainders within this tolerance of a line count as on the line
    let eps = width.abs() * 1e-9;
    let rem = offset.rem_euclid(width);
    if rem < eps || width - rem < eps {
        return Zone {
            lower: price - width,
            upper: price + width,
            width,
        };
    }

    let index = (offset / width).floor();
    Zone {
        lower: lower + index * width,
        upper: lower + (index + 1.0) * width,
        width,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_zone(zone: Zone, lower: f64, upper: f64) {
        assert!(
            (zone.lower - lower).abs() < 1e-9 && (zone.upper - upper).abs() < 1e-9,
            "expected ({}, {}), got ({}, {})",
            lower,
            upper,
            zone.lower,
            zone.upper
        );
    }

    #[test]
    fn test_price_inside_zone() {
        let zone = grid_range(554.0, 500.0, 800.0, 60);
        assert_zone(zone, 550.0, 555.0);
        assert_eq!(zone.width, 5.0);

        assert_zone(grid_range(556.0, 500.0, 800.0, 60), 555.0, 560.0);
        assert_zone(grid_range(22.0, 10.0, 110.0, 10), 20.0, 30.0);
    }

    #[test]
    fn test_price_on_grid_line_straddles() {
        let zone = grid_range(555.0, 500.0, 800.0, 60);
        assert_zone(zone, 550.0, 560.0);
        assert_eq!(zone.upper - zone.lower, 2.0 * zone.width);
    }

    #[test]
    fn test_uneven_ranges() {
        assert_zone(grid_range(164.0, 10.0, 202.0, 24), 162.0, 170.0);
        assert_zone(grid_range(71.0, 10.0, 136.0, 18), 66.0, 73.0);
        assert_zone(grid_range(90.0, 10.0, 94.0, 14), 88.0, 94.0);
    }

    #[test]
    fn test_fractional_width_boundary() {
        // width 0.1 is not exact in binary; 0.3 must still read as a line
        let zone = grid_range(0.3, 0.0, 1.0, 10);
        assert_zone(zone, 0.2, 0.4);
    }

    #[test]
    fn test_zone_contains_price() {
        for i in 0..300 {
            let price = 500.3 + i as f64;
            let zone = grid_range(price, 500.0, 800.0, 60);
            assert!(zone.lower <= price && price < zone.upper);
            assert!((zone.upper - zone.lower - zone.width).abs() < 1e-9);
        }
    }

    #[test]
    fn test_lower_bound_is_literal() {
        // The bottom line is a boundary too, so the zone reaches below `lower`
        let zone = grid_range(500.0, 500.0, 800.0, 60);
        assert_zone(zone, 495.0, 505.0);
    }

    #[test]
    fn test_out_of_range_is_not_clamped() {
        assert_zone(grid_range(497.0, 500.0, 800.0, 60), 495.0, 500.0);
        assert_zone(grid_range(812.0, 500.0, 800.0, 60), 810.0, 815.0);
    }
}
