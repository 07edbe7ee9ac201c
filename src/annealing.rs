//! Adaptive annealed sequential Monte Carlo ("sequential change of measure").
//!
//! A population of particles drawn from the prior is carried to the
//! posterior through a sequence of annealing exponents chosen on the fly.
//! Each step reweights the population, resamples it when it degenerates and
//! moves every particle with local MCMC updates at the new exponent. The
//! product of the mean incremental weights estimates the normalizing constant.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use itertools::Itertools;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, instrument};

use crate::engine::InferenceEngine;
use crate::error::EngineError;
use crate::math::{self, logaddexp, normalize_log_weights, relative_conditional_ess};
use crate::model::AnnealedModel;
use crate::parallel::{main_stream, slot_streams, WorkerPool};
use crate::population::ParticlePopulation;
use crate::settings::{ScheduleCriterion, ScmSettings};
use crate::storage::{Namespace, ResultSink};
use crate::tables::{
    write_estimate, write_sample, ANNEALING_PARAMETER_COLUMN, ESS_COLUMN, ITERATION_COLUMN,
    LOG_CHI_SQUARE_TABLE, LOG_NORMALIZATION_COLUMN, LOG_NORMALIZATION_TABLE, PROPAGATION_TABLE,
    RESAMPLING_TABLE,
};

const ESTIMATOR_NAME: &str = "SCM";

/// Chooses the next annealing exponent by bisection on an adaptation
/// criterion.
#[derive(Debug, Clone, Copy)]
pub struct AnnealingSchedule {
    criterion: ScheduleCriterion,
    tolerance: f64,
    max_halvings: usize,
}

impl AnnealingSchedule {
    pub fn new(criterion: ScheduleCriterion) -> Self {
        Self {
            criterion,
            tolerance: 1e-10,
            max_halvings: 100,
        }
    }

    pub fn criterion(&self) -> ScheduleCriterion {
        self.criterion
    }

    /// Value of the criterion for the given normalized weights and
    /// incremental log-weights.
    ///
    /// Conditional ESS is relative to the population size. Plain ESS is
    /// relative to the ESS of `weights`, so that a population which already
    /// lost part of its ESS can still move on.
    pub fn criterion_value(&self, weights: &[f64], log_increments: &[f64]) -> f64 {
        match self.criterion {
            ScheduleCriterion::ConditionalEss { .. } => {
                relative_conditional_ess(weights, log_increments)
            }
            ScheduleCriterion::Ess { .. } => {
                let log_weights: Vec<f64> = weights
                    .iter()
                    .zip_eq(log_increments)
                    .map(|(w, lg)| w.ln() + lg)
                    .collect();
                let mut updated = vec![0.; weights.len()];
                let log_total = normalize_log_weights(&log_weights, &mut updated);
                if !log_total.is_finite() {
                    return 0.;
                }
                math::ess(&updated) / math::ess(weights)
            }
        }
    }

    /// The largest exponent in `(current, 1]` at which the criterion still
    /// meets its target, together with the incremental log-weights for that
    /// exponent.
    ///
    /// `log_increments(next)` returns the incremental log-weight of every
    /// particle for a move from `current` to `next`. The result always makes
    /// progress: if even the smallest resolvable step misses the target, that
    /// step is taken anyway.
    pub fn next_exponent<F>(
        &self,
        current: f64,
        weights: &[f64],
        mut log_increments: F,
    ) -> Result<(f64, Vec<f64>)>
    where
        F: FnMut(f64) -> Result<Vec<f64>>,
    {
        let target = self.criterion.target();
        let mut evaluate = |exponent: f64| -> Result<(bool, Vec<f64>)> {
            let increments = log_increments(exponent)?;
            if increments.iter().any(|lg| lg.is_nan()) {
                bail!("Incremental log-weights at exponent {} contain NaN", exponent);
            }
            let admissible = self.criterion_value(weights, &increments) >= target;
            Ok((admissible, increments))
        };

        let (admissible, increments) = evaluate(1.)?;
        if admissible || current >= 1. {
            return Ok((1., increments));
        }
        let (mut low, mut high) = (current, 1.);
        let mut accepted = None;
        for _ in 0..self.max_halvings {
            if high - low <= self.tolerance {
                break;
            }
            let mid = 0.5 * (low + high);
            let (admissible, increments) = evaluate(mid)?;
            if admissible {
                low = mid;
                accepted = Some(increments);
            } else {
                high = mid;
            }
        }
        match accepted {
            Some(increments) => Ok((low, increments)),
            None => {
                let (_, increments) = evaluate(high)?;
                Ok((high, increments))
            }
        }
    }
}

/// Log density of every particle at `exponent`, in particle order.
pub fn log_densities_at<M: AnnealedModel>(
    population: &ParticlePopulation<M>,
    exponent: f64,
    pool: &WorkerPool,
) -> Result<Vec<f64>> {
    pool.map_slots(population.particles(), |_, particle| {
        particle.log_density_at(exponent)
    })
}

/// Reweight a population by its incremental log-weights.
///
/// The new log normalization estimate adds `ln Σ Wᵢ Gᵢ` to the previous one.
/// Particles are shared with the input population.
pub fn propagate<M>(
    population: &ParticlePopulation<M>,
    log_increments: &[f64],
) -> Result<ParticlePopulation<M>> {
    let log_weights: Vec<f64> = population
        .normalized_weights()
        .iter()
        .zip_eq(log_increments)
        .map(|(w, lg)| w.ln() + lg)
        .collect();
    ParticlePopulation::from_log_weights(
        &log_weights,
        population.particles().to_vec(),
        population.log_norm_estimate(),
    )
    .context("Could not reweight particle population")
}

/// Set every particle to `exponent` and run `n_sweeps` local update sweeps
/// on each, one random stream per particle.
///
/// A replica shared with other particles is copied before it is updated.
pub fn move_particles<M: AnnealedModel>(
    population: &mut ParticlePopulation<M>,
    exponent: f64,
    n_sweeps: usize,
    rngs: &mut [ChaCha8Rng],
    pool: &WorkerPool,
) -> Result<()> {
    let mut slots: Vec<_> = population
        .particles_mut()
        .iter_mut()
        .zip_eq(rngs.iter_mut())
        .collect();
    pool.for_each_slot(&mut slots, |_, (particle, rng)| {
        let particle = Arc::make_mut(particle);
        particle.set_exponent(exponent);
        for _ in 0..n_sweeps {
            particle.posterior_sampling_scan(&mut **rng)?;
        }
        Ok(())
    })
}

/// Redraw every particle from the prior, in place.
fn forward_sample_particles<M: AnnealedModel>(
    population: &mut ParticlePopulation<M>,
    rngs: &mut [ChaCha8Rng],
    pool: &WorkerPool,
) -> Result<()> {
    let mut slots: Vec<_> = population
        .particles_mut()
        .iter_mut()
        .zip_eq(rngs.iter_mut())
        .collect();
    pool.for_each_slot(&mut slots, |_, (particle, rng)| {
        let particle = Arc::make_mut(particle);
        particle.set_exponent(0.);
        particle.forward_sample(&mut **rng, false)
    })
}

/// One half of the balance heuristic estimate of `ln ∫ π²/p`.
///
/// `log_target` and `log_proposal` are the normalized log densities of the
/// posterior and the prior at the same `n` draws, all taken from one of the
/// two distributions. Returns `ln( (1/n) Σ π²/(p (π + p)) )`.
pub fn log_chi_square_half(log_target: &[f64], log_proposal: &[f64]) -> f64 {
    let terms: Vec<f64> = log_target
        .iter()
        .zip_eq(log_proposal)
        .map(|(&lt, &lp)| 2. * lt - lp - logaddexp(lt, lp))
        .collect();
    math::log_sum_exp(&terms) - (terms.len() as f64).ln()
}

/// Summary of an annealing run.
#[derive(Debug, Clone)]
pub struct AnnealingReport<M> {
    pub log_normalization: f64,
    pub log_chi_square_divergence: Option<f64>,
    /// Number of adaptation steps from the prior to the posterior.
    pub n_iterations: usize,
    /// The final particles. They are prior draws if the divergence was
    /// estimated, rejuvenated posterior draws otherwise.
    pub population: ParticlePopulation<M>,
}

/// Adaptive annealing engine.
pub struct SequentialChangeOfMeasure<M> {
    settings: ScmSettings,
    model: Option<M>,
}

impl<M: AnnealedModel> SequentialChangeOfMeasure<M> {
    pub fn new(settings: ScmSettings) -> Self {
        Self {
            settings,
            model: None,
        }
    }

    pub fn settings(&self) -> &ScmSettings {
        &self.settings
    }

    fn initial_population(
        &self,
        model: &M,
        rngs: &mut [ChaCha8Rng],
        pool: &WorkerPool,
    ) -> Result<ParticlePopulation<M>> {
        let mut particles: Vec<M> = (0..self.settings.n_particles).map(|_| model.clone()).collect();
        {
            let mut slots: Vec<_> = particles.iter_mut().zip_eq(rngs.iter_mut()).collect();
            pool.for_each_slot(&mut slots, |_, (particle, rng)| {
                particle.set_exponent(0.);
                particle.forward_sample(&mut **rng, false)
            })
            .context("Failed to draw the initial particles from the prior")?;
        }
        Ok(ParticlePopulation::uniform(
            particles.into_iter().map(Arc::new).collect(),
            0.,
        ))
    }

    /// Anneal from the prior to the posterior. Returns the population at
    /// exponent one and the number of adaptation steps.
    fn anneal(
        &self,
        mut population: ParticlePopulation<M>,
        rngs: &mut [ChaCha8Rng],
        main_rng: &mut ChaCha8Rng,
        pool: &WorkerPool,
        sink: &mut impl ResultSink,
    ) -> Result<(ParticlePopulation<M>, usize)> {
        let settings = &self.settings;
        let schedule = AnnealingSchedule::new(settings.schedule);
        let mut exponent = 0.;
        let mut iteration = 0;

        while exponent < 1. {
            let current = log_densities_at(&population, exponent, pool)?;
            let (next, log_increments) =
                schedule.next_exponent(exponent, population.normalized_weights(), |next| {
                    let proposed = log_densities_at(&population, next, pool)?;
                    Ok(proposed.iter().zip_eq(&current).map(|(a, b)| a - b).collect())
                })?;
            population = propagate(&population, &log_increments)
                .with_context(|| format!("Propagation to exponent {} failed", next))?;
            exponent = next;

            let relative_ess = population.relative_ess();
            debug!(iteration, exponent, relative_ess, "Propagated");
            sink.write(
                Namespace::Monitoring,
                PROPAGATION_TABLE,
                vec![
                    (ITERATION_COLUMN, iteration.into()),
                    (ANNEALING_PARAMETER_COLUMN, exponent.into()),
                    (ESS_COLUMN, relative_ess.into()),
                ],
            )?;

            if relative_ess < settings.resampling_ess_threshold || exponent >= 1. {
                population = population.resample(&mut *main_rng, settings.resampling_scheme);
                sink.write(
                    Namespace::Monitoring,
                    RESAMPLING_TABLE,
                    vec![
                        (ITERATION_COLUMN, iteration.into()),
                        (ANNEALING_PARAMETER_COLUMN, exponent.into()),
                        (LOG_NORMALIZATION_COLUMN, population.log_norm_estimate().into()),
                    ],
                )?;
            }

            if exponent < 1. {
                move_particles(&mut population, exponent, 1, rngs, pool)
                    .with_context(|| format!("Moving particles at exponent {} failed", exponent))?;
            }
            iteration += 1;
        }
        Ok((population, iteration))
    }

    /// `ln ∫ π²/p` from posterior draws and fresh prior draws. The
    /// population is redrawn from the prior in place.
    fn estimate_chi_square(
        &self,
        population: &mut ParticlePopulation<M>,
        log_normalization: f64,
        rngs: &mut [ChaCha8Rng],
        pool: &WorkerPool,
    ) -> Result<f64> {
        let half = |population: &ParticlePopulation<M>| -> Result<f64> {
            let densities = pool.map_slots(population.particles(), |_, particle| {
                Ok((
                    particle.log_density_at(1.)? - log_normalization,
                    particle.log_density_at(0.)?,
                ))
            })?;
            let (log_target, log_proposal): (Vec<f64>, Vec<f64>) = densities.into_iter().unzip();
            Ok(log_chi_square_half(&log_target, &log_proposal))
        };

        let posterior_half = half(&*population)?;
        forward_sample_particles(population, rngs, pool)
            .context("Failed to draw the prior particles")?;
        let prior_half = half(&*population)?;
        debug!(posterior_half, prior_half, "Chi-square halves");
        Ok(logaddexp(posterior_half, prior_half))
    }
}

impl<M: AnnealedModel> InferenceEngine<M> for SequentialChangeOfMeasure<M> {
    type Report = AnnealingReport<M>;

    fn bind_model(&mut self, model: M) {
        self.model = Some(model);
    }

    fn validate(&self) -> Result<(), EngineError> {
        self.settings.validate()
    }

    #[instrument(name = "sequential_change_of_measure", skip_all)]
    fn run(&mut self, sink: &mut impl ResultSink) -> Result<AnnealingReport<M>> {
        self.validate()?;
        let Some(model) = self.model.as_ref() else {
            return Err(EngineError::ModelNotBound.into());
        };
        let settings = &self.settings;
        let pool = WorkerPool::new(settings.num_threads)?;
        let mut rngs = slot_streams(settings.seed, settings.n_particles);
        let mut main_rng = main_stream(settings.seed);
        info!(
            n_particles = settings.n_particles,
            n_threads = pool.num_threads(),
            "Annealing started"
        );

        let population = self.initial_population(model, &mut rngs, &pool)?;
        let (population, n_iterations) =
            self.anneal(population, &mut rngs, &mut main_rng, &pool, sink)?;

        let log_normalization = population.log_norm_estimate();
        info!(log_normalization, n_iterations, "Log normalization constant estimate");
        write_estimate(sink, LOG_NORMALIZATION_TABLE, ESTIMATOR_NAME, log_normalization)?;

        let mut population = population.resample(&mut main_rng, settings.resampling_scheme);
        population.deep_copy_particles();
        info!(n_sweeps = settings.rejuvenation_sweeps(), "Final rejuvenation started");
        move_particles(&mut population, 1., settings.rejuvenation_sweeps(), &mut rngs, &pool)
            .context("Final rejuvenation failed")?;

        let snapshot = pool.map_slots(population.particles(), |_, particle| {
            Ok((particle.sample_row(), particle.log_density()?))
        })?;

        let log_chi_square_divergence = if settings.approximate_chi_square_divergence {
            let value =
                self.estimate_chi_square(&mut population, log_normalization, &mut rngs, &pool)?;
            info!(value, "Log chi-square divergence estimate");
            write_estimate(sink, LOG_CHI_SQUARE_TABLE, ESTIMATOR_NAME, value)?;
            Some(value)
        } else {
            None
        };

        for (sample, (fields, log_density)) in snapshot.iter().enumerate() {
            write_sample(sink, sample, None, fields, *log_density)?;
        }
        sink.flush()?;

        Ok(AnnealingReport {
            log_normalization,
            log_chi_square_divergence,
            n_iterations,
            population,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySink;
    use crate::test_models::NormalMeanModel;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn schedule_jumps_to_one_when_flat() {
        let schedule = AnnealingSchedule::new(ScheduleCriterion::default());
        let weights = [0.25; 4];
        let (next, increments) = schedule
            .next_exponent(0., &weights, |_| Ok(vec![0.3; 4]))
            .unwrap();
        assert_eq!(next, 1.);
        assert_eq!(increments, vec![0.3; 4]);
    }

    #[test]
    fn schedule_hits_target() {
        // Increments linear in the step, so the criterion is monotone.
        let schedule = AnnealingSchedule::new(ScheduleCriterion::ConditionalEss { target: 0.9 });
        let weights = [0.25; 4];
        let slopes = [0., 1., 2., 8.];
        let increments = |next: f64| -> Result<Vec<f64>> { Ok(slopes.iter().map(|s| s * next).collect()) };
        let (next, accepted) = schedule.next_exponent(0., &weights, increments).unwrap();
        assert!(next > 0. && next < 1.);
        assert_eq!(accepted, increments(next).unwrap());
        let value = schedule.criterion_value(&weights, &accepted);
        assert_relative_eq!(value, 0.9, epsilon = 1e-6);
    }

    #[test]
    fn schedule_always_progresses() {
        let schedule = AnnealingSchedule::new(ScheduleCriterion::Ess { target: 0.99 });
        let weights = [0.5, 0.5];
        let (next, _) = schedule
            .next_exponent(0.3, &weights, |_| Ok(vec![0., -1e6]))
            .unwrap();
        assert!(next > 0.3);
        assert!(next - 0.3 < 1e-9);
    }

    #[test]
    fn ess_criterion_is_relative_to_current_weights() {
        let schedule = AnnealingSchedule::new(ScheduleCriterion::Ess { target: 0.9 });
        // Already degenerate weights: a flat increment keeps the full ESS.
        let weights = [0.7, 0.1, 0.1, 0.1];
        assert_relative_eq!(
            schedule.criterion_value(&weights, &[0.2; 4]),
            1.,
            epsilon = 1e-12
        );
        let slopes = [0., -1., -2., -3.];
        let (next, accepted) = schedule
            .next_exponent(0., &weights, |next| Ok(slopes.iter().map(|s| s * next).collect()))
            .unwrap();
        assert!(next > 1e-3 && next < 1.);
        assert_relative_eq!(schedule.criterion_value(&weights, &accepted), 0.9, epsilon = 1e-6);
    }

    #[test]
    fn schedule_rejects_nan() {
        let schedule = AnnealingSchedule::new(ScheduleCriterion::default());
        assert!(schedule
            .next_exponent(0., &[1.], |_| Ok(vec![f64::NAN]))
            .is_err());
    }

    #[test]
    fn propagate_accumulates_normalization() {
        let population = ParticlePopulation::uniform((0..4).map(Arc::new).collect(), 1.);
        let increments = [0., 0., 0., 5f64.ln()];
        let propagated = propagate(&population, &increments).unwrap();
        // Mean incremental weight is 2.
        assert_relative_eq!(propagated.log_norm_estimate(), 1. + 2f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(propagated.normalized_weight(3), 5. / 8., epsilon = 1e-12);
        assert!(Arc::ptr_eq(&population.particles()[2], &propagated.particles()[2]));
    }

    #[test]
    fn chi_square_half_of_identical_densities() {
        // π = p gives π²/(p (π + p)) = 1/2.
        let log_density = [-1.3, -0.2, -4.0];
        assert_relative_eq!(
            log_chi_square_half(&log_density, &log_density),
            0.5f64.ln(),
            epsilon = 1e-12
        );
    }

    proptest! {
        #[test]
        fn chi_square_half_ignores_order(
            pairs in prop::collection::vec((-20f64..5., -20f64..5.), 1..40),
            rotation in 0usize..40,
        ) {
            let (target, proposal): (Vec<f64>, Vec<f64>) = pairs.iter().copied().unzip();
            let mut rotated = pairs.clone();
            let len = rotated.len();
            rotated.rotate_left(rotation % len);
            rotated.reverse();
            let (target_r, proposal_r): (Vec<f64>, Vec<f64>) = rotated.into_iter().unzip();
            let a = log_chi_square_half(&target, &proposal);
            let b = log_chi_square_half(&target_r, &proposal_r);
            prop_assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn run_writes_tables() {
        let model = NormalMeanModel::new(vec![0.5, 1.0, 0.2], 1.0, 0.8);
        let mut engine = SequentialChangeOfMeasure::new(ScmSettings {
            n_particles: 50,
            num_threads: 2,
            ..Default::default()
        });
        engine.bind_model(model);
        let mut sink = MemorySink::new();
        let report = engine.run(&mut sink).unwrap();

        assert!(report.n_iterations >= 1);
        assert!(report.log_normalization.is_finite());
        assert!(report.log_chi_square_divergence.is_some());
        assert_eq!(sink.n_rows(Namespace::Samples, "samples"), 50);
        assert_eq!(sink.n_rows(Namespace::Samples, "logDensity"), 50);
        assert_eq!(sink.n_rows(Namespace::Monitoring, "propagation"), report.n_iterations);
        assert!(sink.n_rows(Namespace::Monitoring, "resampling") >= 1);
        assert_eq!(sink.n_rows(Namespace::Root, "logNormEstimate"), 1);
        assert_eq!(sink.n_rows(Namespace::Root, "logChiSquareDivergence"), 1);

        let exponents = sink
            .table(Namespace::Monitoring, "propagation")
            .and_then(|table| table.column("annealingParameter"))
            .and_then(|column| column.as_f64())
            .unwrap();
        assert!(exponents.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(exponents.last(), Some(&1.));
    }

    #[test]
    fn run_without_model_fails() {
        let mut engine = SequentialChangeOfMeasure::<NormalMeanModel>::new(ScmSettings::default());
        let err = engine.run(&mut MemorySink::new()).unwrap_err();
        assert_eq!(err.downcast_ref::<EngineError>(), Some(&EngineError::ModelNotBound));
    }
}
