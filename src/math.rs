//! Log-space numerics shared by both engines.

/// Compute `ln(exp(a) + exp(b))` without leaving log-space.
#[inline]
pub fn logaddexp(a: f64, b: f64) -> f64 {
    if a == b {
        // Also covers -inf + -inf, where the difference below would be NaN.
        return a + 2f64.ln();
    }
    let diff = a - b;
    if diff > 0. {
        a + (-diff).exp().ln_1p()
    } else if diff < 0. {
        b + diff.exp().ln_1p()
    } else {
        // diff is NAN
        diff
    }
}

/// Running total of values given in log-space.
///
/// Each call to [`LogSumAccumulator::add`] folds a new term `ln(x)` into
/// `ln(Σ x)`. Nothing is ever exponentiated on its own, so terms spanning
/// hundreds of orders of magnitude combine without overflow or underflow.
/// There is no removal; start over with a new accumulator.
#[derive(Debug, Clone, Copy)]
pub struct LogSumAccumulator {
    log_sum: f64,
}

impl Default for LogSumAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSumAccumulator {
    pub fn new() -> Self {
        Self {
            log_sum: f64::NEG_INFINITY,
        }
    }

    pub fn add(&mut self, log_value: f64) {
        self.log_sum = logaddexp(self.log_sum, log_value);
    }

    /// The accumulated `ln(Σ x)`, or `-inf` if nothing was added.
    pub fn log_sum(&self) -> f64 {
        self.log_sum
    }
}

impl Extend<f64> for LogSumAccumulator {
    fn extend<T: IntoIterator<Item = f64>>(&mut self, iter: T) {
        for value in iter {
            self.add(value);
        }
    }
}

impl FromIterator<f64> for LogSumAccumulator {
    fn from_iter<T: IntoIterator<Item = f64>>(iter: T) -> Self {
        let mut acc = Self::new();
        acc.extend(iter);
        acc
    }
}

/// `ln(Σ exp(v))` over a slice.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    values.iter().copied().collect::<LogSumAccumulator>().log_sum()
}

/// Normalize log-weights into probabilities written to `out`.
///
/// Returns `ln(Σ exp(w))` of the input. If every weight is `-inf` the
/// result is `-inf` and the weights are left as NaN; callers treat that
/// as a degenerate population.
pub(crate) fn normalize_log_weights(log_weights: &[f64], out: &mut [f64]) -> f64 {
    assert!(log_weights.len() == out.len());
    let log_total = log_sum_exp(log_weights);
    for (w, &lw) in out.iter_mut().zip(log_weights) {
        *w = (lw - log_total).exp();
    }
    log_total
}

/// Effective sample size `1 / Σ w²` of normalized weights.
pub fn ess(weights: &[f64]) -> f64 {
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    1. / sum_sq
}

/// Conditional effective sample size of incremental log-weights, relative
/// to the population size.
///
/// `(Σ Wᵢ Gᵢ)² / Σ Wᵢ Gᵢ²` where `W` are the current normalized weights
/// and `ln G` the incremental log-weights. Evaluated with the largest
/// increment factored out.
pub fn relative_conditional_ess(weights: &[f64], log_increments: &[f64]) -> f64 {
    assert!(weights.len() == log_increments.len());
    let max = log_increments
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return 0.;
    }
    let (num, den) = weights
        .iter()
        .zip(log_increments)
        .fold((0f64, 0f64), |(num, den), (&w, &lg)| {
            let g = (lg - max).exp();
            (num + w * g, den + w * g * g)
        });
    if den == 0. {
        return 0.;
    }
    num * num / den
}
