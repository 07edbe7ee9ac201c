use anyhow::Result;

use crate::error::EngineError;
use crate::model::AnnealedModel;
use crate::storage::ResultSink;

/// A posterior inference procedure driven once per run.
pub trait InferenceEngine<M: AnnealedModel> {
    /// Summary returned by a successful run.
    type Report;

    /// Hand the engine the model to infer. The engine keeps it as the
    /// template from which every replica is initialized.
    fn bind_model(&mut self, model: M);

    /// Check the configuration without touching the model.
    fn validate(&self) -> Result<(), EngineError>;

    /// Validate, then run the whole procedure, writing tables to `sink`.
    fn run(&mut self, sink: &mut impl ResultSink) -> Result<Self::Report>;
}
