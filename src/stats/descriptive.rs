//! Descriptive statistics over one field's repetitions.

use crate::core::FieldStats;

/// Percentile with linear interpolation between nearest ranks.
///
/// `sorted` must be ascending and non-empty.
pub fn percentile(sorted: &[f64], percentile: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = (percentile / 100.0) * (n - 1) as f64;
    let lower_idx = rank.floor() as usize;
    let upper_idx = (lower_idx + 1).min(n - 1);
    let fraction = rank - lower_idx as f64;
    sorted[lower_idx] + fraction * (sorted[upper_idx] - sorted[lower_idx])
}

/// Statistics of `data` in repetition order. `None` for an empty slice.
///
/// Any NaN in the data propagates: every statistic becomes NaN and no value
/// is flagged as an outlier.
pub fn describe(data: &[f64]) -> Option<FieldStats> {
    let n = data.len();
    if n == 0 {
        return None;
    }

    if data.iter().any(|v| v.is_nan()) {
        let nan = f64::NAN;
        return Some(FieldStats {
            min: nan,
            max: nan,
            mean: nan,
            median: nan,
            std: nan,
            std_perc: nan,
            lower_quartile: nan,
            upper_quartile: nan,
            lower_whisker: nan,
            upper_whisker: nan,
            outliers: Vec::new(),
        });
    }

    let mut sorted = data.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mean = data.iter().sum::<f64>() / n as f64;
    // Bessel-corrected; undefined for a single sample
    let std = if n < 2 {
        f64::NAN
    } else {
        let variance = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        variance.sqrt()
    };

    let lower_quartile = percentile(&sorted, 25.0);
    let upper_quartile = percentile(&sorted, 75.0);
    let iqr = upper_quartile - lower_quartile;
    // one IQR beyond each quartile, not 1.5
    let lower_whisker = lower_quartile - iqr;
    let upper_whisker = upper_quartile + iqr;

    let outliers = data
        .iter()
        .copied()
        .filter(|&d| d > upper_whisker || d < lower_whisker)
        .collect();

    Some(FieldStats {
        min: sorted[0],
        max: sorted[n - 1],
        mean,
        median: percentile(&sorted, 50.0),
        std,
        std_perc: std / mean,
        lower_quartile,
        upper_quartile,
        lower_whisker,
        upper_whisker,
        outliers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_one_to_ten() {
        let data: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let s = describe(&data).unwrap();

        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 10.0);
        assert!(close(s.mean, 5.5));
        assert!(close(s.median, 5.5));
        assert!(close(s.std, 3.0277));
        assert!(close(s.lower_quartile, 3.25));
        assert!(close(s.upper_quartile, 7.75));
        assert!(close(s.lower_whisker, -1.25));
        assert!(close(s.upper_whisker, 12.25));
        assert!(s.outliers.is_empty());
        assert!(close(s.std_perc, 3.0277 / 5.5));
    }

    #[test]
    fn test_outliers_outside_one_iqr() {
        // q1 = 2.25, q3 = 4 -> whiskers [0.5, 5.75]; 1.5*IQR would keep 6.5
        let data = [2.0, 2.0, 3.0, 4.0, 4.0, 6.5];
        let s = describe(&data).unwrap();
        assert!(close(s.lower_quartile, 2.25));
        assert!(close(s.upper_quartile, 4.0));
        assert_eq!(s.outliers, vec![6.5]);
    }

    #[test]
    fn test_single_sample_has_undefined_std() {
        let s = describe(&[42.0]).unwrap();
        assert_eq!(s.mean, 42.0);
        assert_eq!(s.median, 42.0);
        assert!(s.std.is_nan());
        assert!(s.outliers.is_empty());
    }

    #[test]
    fn test_nan_propagates() {
        let s = describe(&[1.0, f64::NAN, 3.0]).unwrap();
        assert!(s.mean.is_nan());
        assert!(s.min.is_nan());
        assert!(s.outliers.is_empty());
    }

    #[test]
    fn test_empty_is_none() {
        assert!(describe(&[]).is_none());
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!(close(percentile(&sorted, 50.0), 3.0));
        assert!(close(percentile(&sorted, 10.0), 1.4));
    }
}
