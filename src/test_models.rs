//! Small models with known answers, for tests and benchmarks.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::model::AnnealedModel;
use crate::storage::Value;

/// Unknown mean of normal observations with known noise.
///
/// `mu ~ N(0, 1)`, `y_i ~ N(mu, sigma²)`. Local updates are random walk
/// Metropolis steps on `mu` at the current exponent.
#[derive(Debug, Clone)]
pub struct NormalMeanModel {
    data: Arc<Vec<f64>>,
    sigma: f64,
    step_size: f64,
    mu: f64,
    exponent: f64,
    forward_samples: Arc<AtomicUsize>,
}

impl NormalMeanModel {
    pub fn new(data: Vec<f64>, sigma: f64, step_size: f64) -> NormalMeanModel {
        NormalMeanModel {
            data: Arc::new(data),
            sigma,
            step_size,
            mu: 0.,
            exponent: 1.,
            forward_samples: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn set_mu(&mut self, mu: f64) {
        self.mu = mu;
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Number of `forward_sample` calls across this model and all of its
    /// clones.
    pub fn n_forward_samples(&self) -> usize {
        self.forward_samples.load(Ordering::Relaxed)
    }

    fn log_prior(&self) -> f64 {
        -0.5 * (2. * PI).ln() - 0.5 * self.mu * self.mu
    }

    fn log_likelihood(&self) -> f64 {
        let var = self.sigma * self.sigma;
        self.data
            .iter()
            .map(|y| {
                let diff = y - self.mu;
                -0.5 * (2. * PI * var).ln() - diff * diff / (2. * var)
            })
            .sum()
    }

    fn posterior_precision(&self) -> f64 {
        1. + self.data.len() as f64 / (self.sigma * self.sigma)
    }

    pub fn posterior_mean(&self) -> f64 {
        let sum: f64 = self.data.iter().sum();
        sum / (self.sigma * self.sigma) / self.posterior_precision()
    }

    pub fn posterior_variance(&self) -> f64 {
        1. / self.posterior_precision()
    }

    /// Log marginal likelihood of the data.
    pub fn log_evidence(&self) -> f64 {
        let n = self.data.len() as f64;
        let var = self.sigma * self.sigma;
        let sum: f64 = self.data.iter().sum();
        let sum_sq: f64 = self.data.iter().map(|y| y * y).sum();
        -0.5 * n * (2. * PI * var).ln()
            - 0.5 * (1. + n / var).ln()
            - (sum_sq - sum * sum / (var + n)) / (2. * var)
    }

    /// `ln ∫ π²/p` for the posterior `π` and the prior `p`.
    ///
    /// Infinite when the posterior is more than twice as wide as the prior.
    pub fn log_chi_square_integral(&self) -> f64 {
        let mean = self.posterior_mean();
        let var = self.posterior_variance();
        let a = 2. / var - 1.;
        if a <= 0. {
            return f64::INFINITY;
        }
        let b = 2. * mean / var;
        -var.ln() - 0.5 * a.ln() + b * b / (2. * a) - mean * mean / var
    }
}

impl AnnealedModel for NormalMeanModel {
    fn log_density_at(&self, exponent: f64) -> Result<f64> {
        if exponent == 0. {
            return Ok(self.log_prior());
        }
        Ok(self.log_prior() + exponent * self.log_likelihood())
    }

    fn exponent(&self) -> f64 {
        self.exponent
    }

    fn set_exponent(&mut self, exponent: f64) {
        self.exponent = exponent;
    }

    fn forward_sample<R: Rng + ?Sized>(&mut self, rng: &mut R, force: bool) -> Result<()> {
        self.forward_samples.fetch_add(1, Ordering::Relaxed);
        self.mu = rng.sample(StandardNormal);
        if force {
            let (mu, sigma) = (self.mu, self.sigma);
            for y in Arc::make_mut(&mut self.data).iter_mut() {
                let noise: f64 = rng.sample(StandardNormal);
                *y = mu + sigma * noise;
            }
        }
        Ok(())
    }

    fn posterior_sampling_scan<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        let current = self.log_density_at(self.exponent)?;
        let previous = self.mu;
        let step: f64 = rng.sample(StandardNormal);
        self.mu = previous + self.step_size * step;
        let proposed = self.log_density_at(self.exponent)?;
        let u: f64 = rng.random();
        if u.ln() >= proposed - current {
            self.mu = previous;
        }
        Ok(())
    }

    fn sample_row(&self) -> Vec<(String, Value)> {
        vec![("mu".to_string(), self.mu.into())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn evidence_matches_quadrature() {
        let model = NormalMeanModel::new(vec![0.5, 1.0, 0.2], 1.3, 0.5);
        let width = 1e-3;
        let integral: f64 = (-10_000..10_000)
            .map(|i| {
                let mut m = model.clone();
                m.set_mu(i as f64 * width);
                m.log_density().unwrap().exp() * width
            })
            .sum();
        assert_relative_eq!(model.log_evidence(), integral.ln(), epsilon = 1e-6);
    }

    #[test]
    fn chi_square_integral_matches_quadrature() {
        let model = NormalMeanModel::new(vec![0.5, 1.0, 0.2], 1.0, 0.5);
        assert_relative_eq!(model.posterior_mean(), 0.425, epsilon = 1e-12);
        let log_z = model.log_evidence();
        let width = 1e-3;
        let integral: f64 = (-10_000..10_000)
            .map(|i| {
                let mut m = model.clone();
                m.set_mu(i as f64 * width);
                let log_post = m.log_density().unwrap() - log_z;
                let log_prior = m.log_density_at(0.).unwrap();
                (2. * log_post - log_prior).exp() * width
            })
            .sum();
        assert_relative_eq!(model.log_chi_square_integral(), integral.ln(), epsilon = 1e-6);
    }

    #[test]
    fn forced_forward_sample_replaces_data() {
        let model = NormalMeanModel::new(vec![0.; 5], 1.0, 0.5);
        let mut copy = model.clone();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        copy.forward_sample(&mut rng, true).unwrap();
        assert!(copy.data().iter().all(|&y| y != 0.));
        assert!(model.data().iter().all(|&y| y == 0.));
        assert_eq!(model.n_forward_samples(), 1);
    }

    #[test]
    fn scan_targets_tempered_density() {
        let mut model = NormalMeanModel::new(vec![2.0; 4], 1.0, 1.0);
        model.set_exponent(0.5);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let draws: Vec<f64> = (0..40_000)
            .map(|_| {
                model.posterior_sampling_scan(&mut rng).unwrap();
                model.mu()
            })
            .collect();
        let mean = draws[1_000..].iter().sum::<f64>() / (draws.len() - 1_000) as f64;
        // Tempered posterior: precision 1 + 0.5 * 4, mean 0.5 * 8 / 3.
        assert_relative_eq!(mean, 4. / 3., epsilon = 0.05);
    }
}
