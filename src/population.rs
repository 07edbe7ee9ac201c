use std::sync::Arc;

use anyhow::{bail, Result};
use itertools::Itertools;
use rand::Rng;

use crate::math::{self, normalize_log_weights};
use crate::resampling::{resample_indices, ResamplingScheme};

/// A fixed-size set of weighted particles plus the running estimate of the
/// log normalization constant.
///
/// Particles are shared behind `Arc`s: resampling hands out the same replica
/// to every slot that selected it. Call
/// [`ParticlePopulation::deep_copy_particles`] (or go through
/// `Arc::make_mut`) before updating particles independently.
#[derive(Debug)]
pub struct ParticlePopulation<M> {
    particles: Vec<Arc<M>>,
    normalized_weights: Vec<f64>,
    log_norm_estimate: f64,
}

impl<M> Clone for ParticlePopulation<M> {
    fn clone(&self) -> Self {
        Self {
            particles: self.particles.clone(),
            normalized_weights: self.normalized_weights.clone(),
            log_norm_estimate: self.log_norm_estimate,
        }
    }
}

impl<M> ParticlePopulation<M> {
    /// Equally weighted particles.
    pub fn uniform(particles: Vec<Arc<M>>, log_norm_estimate: f64) -> Self {
        let n = particles.len();
        Self {
            particles,
            normalized_weights: vec![1. / n as f64; n],
            log_norm_estimate,
        }
    }

    /// Build a population from unnormalized log-weights.
    ///
    /// The log-weights must already include the log of each particle's
    /// previous normalized weight. The new log normalization estimate is
    /// `log_scaling + ln Σ exp(log_weights)`.
    pub fn from_log_weights(
        log_weights: &[f64],
        particles: Vec<Arc<M>>,
        log_scaling: f64,
    ) -> Result<Self> {
        if log_weights.len() != particles.len() {
            bail!(
                "Got {} log-weights for {} particles",
                log_weights.len(),
                particles.len()
            );
        }
        if particles.is_empty() {
            bail!("A particle population cannot be empty");
        }
        if log_weights.iter().any(|w| w.is_nan()) {
            bail!("Particle log-weights contain NaN");
        }
        let mut normalized_weights = vec![0.; log_weights.len()];
        let log_sum = normalize_log_weights(log_weights, &mut normalized_weights);
        if !log_sum.is_finite() {
            bail!("Particle weights are degenerate (log of total weight is {})", log_sum);
        }
        Ok(Self {
            particles,
            normalized_weights,
            log_norm_estimate: log_scaling + log_sum,
        })
    }

    pub fn n_particles(&self) -> usize {
        self.particles.len()
    }

    pub fn log_norm_estimate(&self) -> f64 {
        self.log_norm_estimate
    }

    pub fn normalized_weight(&self, index: usize) -> f64 {
        self.normalized_weights[index]
    }

    pub fn normalized_weights(&self) -> &[f64] {
        &self.normalized_weights
    }

    pub fn particle(&self, index: usize) -> &M {
        &self.particles[index]
    }

    pub fn particles(&self) -> &[Arc<M>] {
        &self.particles
    }

    pub(crate) fn particles_mut(&mut self) -> &mut [Arc<M>] {
        &mut self.particles
    }

    pub fn into_particles(self) -> Vec<Arc<M>> {
        self.particles
    }

    pub fn ess(&self) -> f64 {
        math::ess(&self.normalized_weights)
    }

    /// Effective sample size divided by the number of particles.
    pub fn relative_ess(&self) -> f64 {
        self.ess() / self.n_particles() as f64
    }

    /// Whether every weight is exactly `1/n`.
    ///
    /// No tolerance is applied: a population that went through
    /// [`ParticlePopulation::resample`] or [`ParticlePopulation::uniform`] is
    /// uniform, one that was reweighted generally is not.
    pub fn is_uniform(&self) -> bool {
        let uniform = 1. / self.n_particles() as f64;
        self.normalized_weights.iter().all(|&w| w == uniform)
    }

    /// Draw an equally weighted population.
    ///
    /// Duplicated particles share their replica. The log normalization
    /// estimate carries over. An already uniform population is returned as
    /// is, without adding resampling noise.
    pub fn resample<R: Rng + ?Sized>(&self, rng: &mut R, scheme: ResamplingScheme) -> Self {
        if self.is_uniform() {
            return self.clone();
        }
        let particles = resample_indices(&self.normalized_weights, scheme, rng)
            .into_iter()
            .map(|idx| self.particles[idx].clone())
            .collect();
        Self::uniform(particles, self.log_norm_estimate)
    }

    /// Whether any replica is currently held by more than one slot of this
    /// population. Handles held elsewhere, such as by an earlier population,
    /// do not count.
    pub fn has_shared_particles(&self) -> bool {
        !self.particles.iter().map(Arc::as_ptr).all_unique()
    }
}

impl<M: Clone> ParticlePopulation<M> {
    /// Give every slot its own copy of its replica.
    pub fn deep_copy_particles(&mut self) {
        for particle in self.particles.iter_mut() {
            *particle = Arc::new(M::clone(particle));
        }
    }
}
