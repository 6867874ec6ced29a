//! Window statistics
//!
//! Small reductions over raw sample streams. All of them take an iterator
//! so they work directly on any feature storage format.

#[cfg(feature = "embedded")]
use micromath::F32Ext;

/// Arithmetic mean, `0.0` for an empty stream
pub fn mean<I: IntoIterator<Item = f32>>(values: I) -> f32 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0f32, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// Sum of the values
pub fn sum<I: IntoIterator<Item = f32>>(values: I) -> f32 {
    values.into_iter().sum()
}

/// Sum of squared deviations from `offset`, with the sample count
pub fn sum_of_squares<I: IntoIterator<Item = f32>>(values: I, offset: f32) -> (f32, usize) {
    values.into_iter().fold((0.0f32, 0usize), |(s, c), v| {
        let d = v - offset;
        (s + d * d, c + 1)
    })
}

/// Root mean square around `offset`
pub fn rms<I: IntoIterator<Item = f32>>(values: I, offset: f32) -> f32 {
    let (total, count) = sum_of_squares(values, offset);
    if count == 0 {
        0.0
    } else {
        (total / count as f32).sqrt()
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_mean_of_empty_is_zero() {
        assert_eq!(mean(core::iter::empty()), 0.0);
    }

    #[test]
    fn test_rms_of_square_wave() {
        let values = [1.0, -1.0, 1.0, -1.0];
        assert!((rms(values, 0.0) - 1.0).abs() < 1e-6);
        // Around the mean of a constant the RMS vanishes
        assert!(rms([4.0; 8], 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_sum_of_squares_counts_values() {
        let (total, count) = sum_of_squares([1.0, 2.0, 3.0], 0.0);
        assert!((total - 14.0).abs() < 1e-6);
        assert_eq!(count, 3);
        assert!((sum([1.0, 2.0, 3.0]) - 6.0).abs() < 1e-6);
    }
}
