//! Ballast module.
//! Works out which physical ballast plates bring a driver up to the class minimum weight.
//! Plates only exist as 20kg, 10kg and 2.5kg, so the breakdown is a greedy coin-change
//! over those sizes. The last (smallest) plate is rounded to the nearest count instead of
//! floored, which means the total can land up to 1.25kg either side of the exact gap.

use serde::{Deserialize, Serialize};

/// Plate sizes in kg, largest first.
pub const DENOMINATIONS: [f64; 3] = [20.0, 10.0, 2.5];

/// Shown when a driver needs no ballast at all.
pub const NO_BALLAST_LABEL: &str = "No ballast";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BallastWeight {
    pub size: f64,
    pub count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BallastBreakdown {
    /// Sum of `size * count` over `weights`, in kg.
    pub total: f64,
    /// Non-zero plate counts, largest plate first.
    pub weights: Vec<BallastWeight>,
}

/// Computes the plates needed to raise `driver_weight` to `target_weight`.
///
/// Overweight drivers get an empty breakdown, never negative ballast.
pub fn compute_ballast(driver_weight: f64, target_weight: f64) -> BallastBreakdown {
    if driver_weight >= target_weight {
        return BallastBreakdown::default();
    }

    // Work in whole grams so decimal weights like 64.1 - 4.1 don't land a hair under a plate
    let mut remaining = ((target_weight - driver_weight) * 1000.0).round() as u64;
    let mut weights = Vec::with_capacity(DENOMINATIONS.len());
    let last = DENOMINATIONS.len() - 1;

    for (idx, &size) in DENOMINATIONS.iter().enumerate() {
        let grams = (size * 1000.0) as u64;
        let plates = if idx == last {
            // Half a plate or more rounds up
            (remaining + grams / 2) / grams
        } else {
            remaining / grams
        };
        if plates > 0 {
            remaining = remaining.saturating_sub(plates * grams);
            weights.push(BallastWeight {
                size,
                count: plates as u32,
            });
        }
    }

    let total = weights.iter().map(|w| w.size * f64::from(w.count)).sum();
    BallastBreakdown { total, weights }
}

/// Human-readable label, e.g. `32.5kg (20×1kg + 10×1kg + 2.5×1kg)`.
pub fn format_ballast(breakdown: &BallastBreakdown) -> String {
    if breakdown.total == 0.0 {
        return NO_BALLAST_LABEL.to_string();
    }

    let parts: Vec<String> = breakdown
        .weights
        .iter()
        .map(|w| format!("{}×{}kg", w.size, w.count))
        .collect();

    format!("{}kg ({})", breakdown.total, parts.join(" + "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plate(size: f64, count: u32) -> BallastWeight {
        BallastWeight { size, count }
    }

    #[test]
    fn test_no_ballast_at_zero() {
        assert_eq!(compute_ballast(0.0, 0.0), BallastBreakdown::default());
    }

    #[test]
    fn test_no_ballast_when_at_or_over_target() {
        assert_eq!(compute_ballast(50.0, 50.0), BallastBreakdown::default());
        assert_eq!(compute_ballast(95.0, 80.0), BallastBreakdown::default());
    }

    #[test]
    fn test_exact_decomposition() {
        let result = compute_ballast(40.0, 72.5);
        assert_eq!(result.total, 32.5);
        assert_eq!(result.weights, vec![plate(20.0, 1), plate(10.0, 1), plate(2.5, 1)]);
    }

    #[test]
    fn test_final_plate_rounds_down() {
        // 31kg needed: 20 + 10, then 1kg left rounds to zero 2.5kg plates
        let result = compute_ballast(40.0, 71.0);
        assert_eq!(result.total, 30.0);
        assert_eq!(result.weights, vec![plate(20.0, 1), plate(10.0, 1)]);
    }

    #[test]
    fn test_final_plate_rounds_up() {
        // 9kg needed: no 20/10 plates, 9 / 2.5 = 3.6 rounds to 4 plates
        let result = compute_ballast(71.0, 80.0);
        assert_eq!(result.total, 10.0);
        assert_eq!(result.weights, vec![plate(2.5, 4)]);
    }

    #[test]
    fn test_multiple_large_plates() {
        let result = compute_ballast(10.0, 75.0);
        assert_eq!(result.total, 65.0);
        assert_eq!(result.weights, vec![plate(20.0, 3), plate(2.5, 2)]);
    }

    #[test]
    fn test_total_matches_plates_and_no_zero_counts() {
        let mut driver = 0.0;
        while driver <= 100.0 {
            let mut target = 0.0;
            while target <= 120.0 {
                let result = compute_ballast(driver, target);
                let sum: f64 = result.weights.iter().map(|w| w.size * f64::from(w.count)).sum();
                assert_eq!(result.total, sum, "driver {} target {}", driver, target);
                assert!(result.weights.iter().all(|w| w.count > 0));
                assert!(result.weights.windows(2).all(|pair| pair[0].size > pair[1].size));
                if target > driver {
                    assert!((result.total - (target - driver)).abs() <= 1.25 + 1e-9);
                }
                target += 0.5;
            }
            driver += 3.5;
        }
    }

    #[test]
    fn test_decimal_weights_use_largest_plates() {
        assert_eq!(compute_ballast(4.1, 64.1).weights, vec![plate(20.0, 3)]);
        assert_eq!(compute_ballast(2.3, 32.3).weights, vec![plate(20.0, 1), plate(10.0, 1)]);
        assert_eq!(compute_ballast(61.7, 64.2).weights, vec![plate(2.5, 1)]);
    }

    #[test]
    fn test_greedy_matches_tenth_kg_grid() {
        // Exact greedy in tenths of a kg: 200, 100 and 25 tenths
        for driver in 0..=1500u32 {
            for target in (driver + 1..=1500u32).step_by(7) {
                let mut left = target - driver;
                let mut expected = Vec::new();
                for (size, tenths) in [(20.0, 200), (10.0, 100)] {
                    let n = left / tenths;
                    if n > 0 {
                        expected.push(plate(size, n));
                        left -= n * tenths;
                    }
                }
                let n = (left * 2 + 25) / 50;
                if n > 0 {
                    expected.push(plate(2.5, n));
                }
                let got = compute_ballast(f64::from(driver) / 10.0, f64::from(target) / 10.0);
                assert_eq!(got.weights, expected, "driver {} target {}", driver, target);
            }
        }
    }

    #[test]
    fn test_format_no_ballast() {
        assert_eq!(format_ballast(&compute_ballast(80.0, 80.0)), "No ballast");
    }

    #[test]
    fn test_format_breakdown() {
        assert_eq!(
            format_ballast(&compute_ballast(40.0, 72.5)),
            "32.5kg (20×1kg + 10×1kg + 2.5×1kg)"
        );
        assert_eq!(format_ballast(&compute_ballast(10.0, 75.0)), "65kg (20×3kg + 2.5×2kg)");
    }
}
