//! Region brightness reduction.
//!
//! Regions are reduced to `{min, max, mean}` in one pass; `sum` is then
//! *derived* as `mean * width * height` rather than accumulated. That identity
//! is part of the telemetry contract (downstream tooling reconstructs means
//! from sums), which is why rectangles must be projected and clamped before
//! measuring: the derived sum always refers to the clamped area actually
//! averaged.

use crate::core::{BrightnessResult, Frame, RoiRect};

/// Reduces one region of `frame` to brightness statistics.
///
/// `rect` must already be in frame coordinates ([`RoiRect::project`]); rows
/// or columns that still fall outside the frame are skipped rather than
/// panicking. An empty rectangle yields an all-zero result.
pub fn measure(frame: &Frame, rect: &RoiRect) -> BrightnessResult {
    if rect.is_empty() {
        return BrightnessResult::default();
    }

    let mut min = u16::MAX;
    let mut max = u16::MIN;
    let mut total: u64 = 0;
    let mut sampled: u64 = 0;
    let x0 = rect.x as usize;
    let x1 = x0 + rect.width as usize;
    for y in rect.y..rect.y.saturating_add(rect.height) {
        let Some(row) = frame.row(y) else {
            break;
        };
        let Some(slice) = row.get(x0..x1) else {
            break;
        };
        for &px in slice {
            min = min.min(px);
            max = max.max(px);
            total += u64::from(px);
        }
        sampled += rect.width as u64;
    }
    if sampled == 0 {
        return BrightnessResult::default();
    }

    let mean = total as f64 / sampled as f64;
    BrightnessResult {
        min: f64::from(min),
        max: f64::from(max),
        mean,
        sum: mean * f64::from(rect.width) * f64::from(rect.height),
    }
}

/// Measures several regions of one frame.
pub fn measure_all(frame: &Frame, rects: &[RoiRect]) -> Vec<BrightnessResult> {
    rects.iter().map(|r| measure(frame, r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_sum_invariant(result: &BrightnessResult, rect: &RoiRect) {
        let expected = result.mean * f64::from(rect.width) * f64::from(rect.height);
        assert!(
            (result.sum - expected).abs() <= f64::EPSILON * expected.abs().max(1.0),
            "sum {} != mean*area {}",
            result.sum,
            expected
        );
    }

    #[test]
    fn test_known_region_statistics() {
        // 4x4 frame, 2x2 region holding 1,2,3,4.
        let mut pixels = vec![0u16; 16];
        pixels[5] = 1;
        pixels[6] = 2;
        pixels[9] = 3;
        pixels[10] = 4;
        let frame = Frame::new(4, 4, pixels, 0.0).unwrap();
        let rect = RoiRect::new(1, 1, 2, 2);

        let result = measure(&frame, &rect);
        assert_eq!(result.min, 1.0);
        assert_eq!(result.max, 4.0);
        assert_eq!(result.mean, 2.5);
        assert_eq!(result.sum, 10.0);
    }

    #[test]
    fn test_region_ignores_outside_pixels() {
        let mut frame = Frame::filled(4, 4, 1000, 0.0);
        // Perturb a pixel outside the region.
        frame.pixels[0] = 0;
        let result = measure(&frame, &RoiRect::new(2, 2, 2, 2));
        assert_eq!(result.min, 1000.0);
        assert_eq!(result.max, 1000.0);
    }

    #[test]
    fn test_sum_invariant_all_zero() {
        let frame = Frame::filled(8, 8, 0, 0.0);
        let rect = RoiRect::new(1, 1, 5, 3);
        let result = measure(&frame, &rect);
        assert_eq!(result.sum, 0.0);
        assert_sum_invariant(&result, &rect);
    }

    #[test]
    fn test_sum_invariant_all_equal() {
        let frame = Frame::filled(8, 8, 37, 0.0);
        let rect = RoiRect::new(0, 0, 8, 8);
        let result = measure(&frame, &rect);
        assert_eq!(result.mean, 37.0);
        assert_eq!(result.sum, 37.0 * 64.0);
        assert_sum_invariant(&result, &rect);
    }

    #[test]
    fn test_sum_invariant_random() {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let pixels: Vec<u16> = (0..32 * 32).map(|_| rng.gen()).collect();
        let frame = Frame::new(32, 32, pixels, 0.0).unwrap();
        let rect = RoiRect::new(3, 7, 20, 11);

        let result = measure(&frame, &rect);
        assert_sum_invariant(&result, &rect);

        // Cross-check the mean against a direct accumulation.
        let mut total = 0u64;
        for y in 7..18u32 {
            let row = frame.row(y).unwrap();
            for &px in &row[3..23] {
                total += u64::from(px);
            }
        }
        let expected_mean = total as f64 / (20.0 * 11.0);
        assert!((result.mean - expected_mean).abs() < 1e-9);
    }

    #[test]
    fn test_empty_region_is_all_zero() {
        let frame = Frame::filled(4, 4, 9, 0.0);
        assert_eq!(
            measure(&frame, &RoiRect::new(0, 0, 0, 5)),
            BrightnessResult::default()
        );
    }

    #[test]
    fn test_measure_all_preserves_order() {
        let frame = Frame::filled(4, 4, 2, 0.0);
        let rects = [RoiRect::new(0, 0, 1, 1), RoiRect::new(0, 0, 2, 2)];
        let results = measure_all(&frame, &rects);
        assert_eq!(results[0].sum, 2.0);
        assert_eq!(results[1].sum, 8.0);
    }
}
