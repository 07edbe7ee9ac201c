//! Turn a weighted particle set into an equally weighted one.

use rand::Rng;

/// How the selection points of a resampling step are drawn.
///
/// All schemes are unbiased: index `i` is selected `n wᵢ` times in
/// expectation. They differ in the variance of the selection counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplingScheme {
    /// `n` independent uniforms.
    #[default]
    Multinomial,
    /// One uniform in each of the `n` strata `[i/n, (i+1)/n)`.
    Stratified,
    /// A single uniform shifted into each stratum.
    Systematic,
}

impl ResamplingScheme {
    /// `n` sorted points in `[0, 1)`.
    fn sorted_points<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Vec<f64> {
        let n_f = n as f64;
        match self {
            ResamplingScheme::Multinomial => {
                // Sorted uniforms from normalized exponential spacings.
                let mut points = Vec::with_capacity(n);
                let mut total = 0f64;
                for _ in 0..n {
                    total += exponential(rng);
                    points.push(total);
                }
                total += exponential(rng);
                for point in points.iter_mut() {
                    *point /= total;
                }
                points
            }
            ResamplingScheme::Stratified => (0..n)
                .map(|i| (i as f64 + rng.random::<f64>()) / n_f)
                .collect(),
            ResamplingScheme::Systematic => {
                let shift = rng.random::<f64>();
                (0..n).map(|i| (i as f64 + shift) / n_f).collect()
            }
        }
    }
}

fn exponential<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // 1 - U lies in (0, 1], so the log is finite.
    -(1. - rng.random::<f64>()).ln()
}

/// Draw `weights.len()` indices, index `i` being selected `n wᵢ` times in
/// expectation. The result is sorted.
///
/// Weights must be non-negative; they are normalized here, so rounding in
/// their sum does not bias the selection.
pub fn resample_indices<R: Rng + ?Sized>(
    weights: &[f64],
    scheme: ResamplingScheme,
    rng: &mut R,
) -> Vec<usize> {
    let n = weights.len();
    if n == 0 {
        return vec![];
    }
    let total: f64 = weights.iter().sum();
    let points = scheme.sorted_points(rng, n);

    let mut indices = Vec::with_capacity(n);
    let mut idx = 0;
    let mut cumulative = 0f64;
    for point in points {
        let target = point * total;
        while idx + 1 < n && cumulative + weights[idx] <= target {
            cumulative += weights[idx];
            idx += 1;
        }
        indices.push(idx);
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const SCHEMES: [ResamplingScheme; 3] = [
        ResamplingScheme::Multinomial,
        ResamplingScheme::Stratified,
        ResamplingScheme::Systematic,
    ];

    #[test]
    fn preserves_count_and_skips_zero_weights() {
        let weights = [0.0, 0.5, 0.0, 0.25, 0.25, 0.0];
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for scheme in SCHEMES {
            for _ in 0..100 {
                let indices = resample_indices(&weights, scheme, &mut rng);
                assert_eq!(indices.len(), weights.len());
                assert!(indices.iter().all(|&i| weights[i] > 0.));
                assert!(indices.windows(2).all(|w| w[0] <= w[1]));
            }
        }
    }

    #[test]
    fn degenerate_weights_select_one_index() {
        let weights = [0.0, 0.0, 1.0, 0.0];
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for scheme in SCHEMES {
            assert_eq!(resample_indices(&weights, scheme, &mut rng), vec![2; 4]);
        }
    }

    #[test]
    fn selection_counts_are_unbiased() {
        let weights = [0.1, 0.2, 0.3, 0.4];
        let n_reps = 20_000;
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for scheme in SCHEMES {
            let mut counts = [0usize; 4];
            for _ in 0..n_reps {
                for idx in resample_indices(&weights, scheme, &mut rng) {
                    counts[idx] += 1;
                }
            }
            for (count, w) in counts.iter().zip(weights) {
                let mean = *count as f64 / n_reps as f64;
                assert!(
                    (mean - 4. * w).abs() < 0.05,
                    "{:?}: mean count {} for weight {}",
                    scheme,
                    mean,
                    w
                );
            }
        }
    }

    #[test]
    fn systematic_is_exact_on_multiples_of_one_over_n() {
        let weights = [0.5, 0.25, 0.25, 0.0];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            resample_indices(&weights, ResamplingScheme::Systematic, &mut rng),
            vec![0, 0, 1, 2]
        );
    }

    #[test]
    fn empty_weights() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(resample_indices(&[], ResamplingScheme::Multinomial, &mut rng).is_empty());
    }
}
