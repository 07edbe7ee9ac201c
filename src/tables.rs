//! Names of the emitted tables and columns.

use anyhow::Result;

use crate::storage::{Namespace, ResultSink, Value};

pub const SAMPLES_TABLE: &str = "samples";
pub const LOG_DENSITY_TABLE: &str = "logDensity";
pub const SWAP_TABLE: &str = "swapPrs";
pub const PROPAGATION_TABLE: &str = "propagation";
pub const RESAMPLING_TABLE: &str = "resampling";
pub const LOG_NORMALIZATION_TABLE: &str = "logNormEstimate";
pub const LOG_CHI_SQUARE_TABLE: &str = "logChiSquareDivergence";

pub const SAMPLE_COLUMN: &str = "sample";
pub const TEMPERATURE_COLUMN: &str = "temperature";
pub const VALUE_COLUMN: &str = "value";
pub const CHAIN_COLUMN: &str = "chain";
pub const PARAMETER_COLUMN: &str = "parameter";
pub const PR_COLUMN: &str = "pr";
pub const ITERATION_COLUMN: &str = "iteration";
pub const ANNEALING_PARAMETER_COLUMN: &str = "annealingParameter";
pub const ESS_COLUMN: &str = "ess";
pub const LOG_NORMALIZATION_COLUMN: &str = "logNormalization";
pub const ESTIMATOR_COLUMN: &str = "estimator";

/// Write one replica's fields to the samples table and its log density to
/// the log density table.
pub(crate) fn write_sample(
    sink: &mut impl ResultSink,
    sample: usize,
    temperature: Option<f64>,
    fields: &[(String, Value)],
    log_density: f64,
) -> Result<()> {
    let mut keys: Vec<(&str, Value)> = Vec::with_capacity(2);
    keys.push((SAMPLE_COLUMN, sample.into()));
    if let Some(temperature) = temperature {
        keys.push((TEMPERATURE_COLUMN, temperature.into()));
    }

    let mut row = keys.clone();
    row.extend(
        fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.clone())),
    );
    sink.write(Namespace::Samples, SAMPLES_TABLE, row)?;

    let mut density_row = keys;
    density_row.push((VALUE_COLUMN, log_density.into()));
    sink.write(Namespace::Samples, LOG_DENSITY_TABLE, density_row)
}

/// Write a single named estimate to a root table.
pub(crate) fn write_estimate(
    sink: &mut impl ResultSink,
    table: &str,
    estimator: &str,
    value: f64,
) -> Result<()> {
    sink.write(
        Namespace::Root,
        table,
        vec![
            (ESTIMATOR_COLUMN, estimator.into()),
            (VALUE_COLUMN, value.into()),
        ],
    )
}
