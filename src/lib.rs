//! Posterior inference by annealing from the prior to the posterior.
//!
//! Two engines share one architecture: [`ParallelTempering`] runs
//! interacting MCMC chains along a fixed ladder of annealing exponents, and
//! [`SequentialChangeOfMeasure`] carries a weighted particle population from
//! the prior to the posterior along an adaptively chosen schedule, estimating
//! the normalizing constant on the way.
//!
//! Models plug in through [`AnnealedModel`]; results are written as tables
//! to any [`ResultSink`].

pub(crate) mod annealing;
pub(crate) mod engine;
pub(crate) mod error;
pub(crate) mod math;
pub(crate) mod model;
pub(crate) mod parallel;
pub(crate) mod population;
pub(crate) mod resampling;
pub(crate) mod settings;
pub(crate) mod storage;
pub(crate) mod tables;
pub(crate) mod tempering;

pub mod test_models;

pub use annealing::{
    log_chi_square_half, log_densities_at, move_particles, propagate, AnnealingReport,
    AnnealingSchedule, SequentialChangeOfMeasure,
};
pub use engine::InferenceEngine;
pub use error::EngineError;
pub use math::{ess, log_sum_exp, logaddexp, relative_conditional_ess, LogSumAccumulator};
pub use model::AnnealedModel;
pub use parallel::{main_stream, process, slot_streams, WorkerPool};
pub use population::ParticlePopulation;
pub use resampling::{resample_indices, ResamplingScheme};
pub use settings::{PtSettings, ScheduleCriterion, ScmSettings, TemperatureLadder};
pub use storage::{
    Column, CsvSink, ItemType, MemorySink, Namespace, NullSink, ResultSink, Table, Value,
};
pub use tables::{
    LOG_CHI_SQUARE_TABLE, LOG_DENSITY_TABLE, LOG_NORMALIZATION_TABLE, PROPAGATION_TABLE,
    RESAMPLING_TABLE, SAMPLES_TABLE, SWAP_TABLE,
};
pub use tempering::{
    move_kernel, swap_kernel, swap_log_ratio, AcceptanceAccumulator, ParallelTempering,
    ReplicaGrid, TemperingReport,
};
