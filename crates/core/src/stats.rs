//! Small numeric helpers used by the baselining and learning code.

/// Arithmetic mean (0.0 for an empty slice).
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (0.0 for fewer than two values).
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Median (0.0 for an empty slice).
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Threshold re-tuning target: 0.6 × mean + 0.4 × median.
///
/// Returns `None` when there is no history to tune against.
pub fn optimal_threshold(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(0.6 * mean(values) + 0.4 * median(values))
}

/// Clamp into [0, 1], mapping NaN to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Overlap ratio |a ∩ b| / max(|a|, |b|) between two key sets.
pub fn overlap_ratio<T: Eq + std::hash::Hash>(
    a: &std::collections::HashSet<T>,
    b: &std::collections::HashSet<T>,
) -> f64 {
    let largest = a.len().max(b.len());
    if largest == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / largest as f64
}

/// Jaccard similarity |a ∩ b| / |a ∪ b|.
pub fn jaccard<T: Eq + std::hash::Hash>(
    a: &std::collections::HashSet<T>,
    b: &std::collections::HashSet<T>,
) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_mean_and_std_dev() {
        let values = [9.0, 11.0, 9.0, 11.0];
        assert_eq!(mean(&values), 10.0);
        assert!((std_dev(&values) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_optimal_threshold_blend() {
        // mean = 4, median = 2 -> 0.6*4 + 0.4*2 = 3.2
        let t = optimal_threshold(&[1.0, 2.0, 9.0]).unwrap();
        assert!((t - 3.2).abs() < 1e-12);
        assert!(optimal_threshold(&[]).is_none());
    }

    #[test]
    fn test_overlap_ratio_three_of_four() {
        let a: HashSet<_> = ["a", "b", "c", "d"].into_iter().collect();
        let b: HashSet<_> = ["a", "b", "c", "e"].into_iter().collect();
        assert_eq!(overlap_ratio(&a, &b), 0.75);
        assert_eq!(jaccard(&a, &b), 0.6);
    }

    #[test]
    fn test_clamp_unit_handles_nan() {
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(1.5), 1.0);
        assert_eq!(clamp_unit(-0.1), 0.0);
    }
}
