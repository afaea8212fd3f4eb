//! Population stability index

/// PSI between a reference and a current sample.
///
/// Both samples are binned into `bins` equal-width buckets spanning their
/// combined range. Bucket proportions are floored at `epsilon` so empty
/// buckets stay finite. Returns 0 when either sample is empty or the combined
/// range is degenerate.
pub fn population_stability_index(
    reference: &[f64],
    current: &[f64],
    bins: usize,
    epsilon: f64,
) -> f64 {
    if reference.is_empty() || current.is_empty() || bins == 0 {
        return 0.0;
    }

    let (min_val, max_val) = reference
        .iter()
        .chain(current.iter())
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    if !min_val.is_finite() || (max_val - min_val).abs() < epsilon {
        return 0.0;
    }

    let bin_width = (max_val - min_val) / bins as f64;
    let histogram = |values: &[f64]| {
        let mut counts = vec![0usize; bins];
        for value in values.iter().filter(|v| v.is_finite()) {
            let bin = ((value - min_val) / bin_width) as usize;
            counts[bin.min(bins - 1)] += 1;
        }
        counts
    };

    let ref_counts = histogram(reference);
    let cur_counts = histogram(current);
    let ref_total = ref_counts.iter().sum::<usize>().max(1) as f64;
    let cur_total = cur_counts.iter().sum::<usize>().max(1) as f64;

    ref_counts
        .iter()
        .zip(cur_counts.iter())
        .map(|(&r, &c)| {
            let ref_pct = (r as f64 / ref_total).max(epsilon);
            let cur_pct = (c as f64 / cur_total).max(epsilon);
            (cur_pct - ref_pct) * (cur_pct / ref_pct).ln()
        })
        .sum::<f64>()
        .abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_samples_score_zero() {
        let values: Vec<f64> = (0..100).map(|i| i as f64).collect();
        assert!(population_stability_index(&values, &values, 10, 1e-4) < 1e-12);
    }

    #[test]
    fn test_disjoint_samples_score_high() {
        let reference: Vec<f64> = (0..100).map(|i| i as f64 / 100.0).collect();
        let current: Vec<f64> = (0..100).map(|i| 10.0 + i as f64 / 100.0).collect();
        assert!(population_stability_index(&reference, &current, 10, 1e-4) > 1.0);
    }

    #[test]
    fn test_degenerate_range() {
        assert_eq!(population_stability_index(&[3.0; 10], &[3.0; 10], 10, 1e-4), 0.0);
        assert_eq!(population_stability_index(&[], &[1.0], 10, 1e-4), 0.0);
    }
}
