use thiserror::Error;

/// Configuration problems detected before an engine touches the model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid temperature ladder: {0}")]
    InvalidLadder(String),
    #[error("n_scans must be positive, got {0}")]
    NonPositiveScans(usize),
    #[error("The number of particles must be positive, got {0}")]
    NonPositiveParticles(usize),
    #[error("{name} must lie in {range}, got {value}")]
    OutOfRange {
        name: &'static str,
        range: &'static str,
        value: f64,
    },
    #[error("n_final_rejuvenations must be non-negative, got {0}")]
    NegativeRejuvenations(i64),
    #[error("Zero-valued n_final_rejuvenations is currently unsupported")]
    ZeroRejuvenationsUnsupported,
    #[error("Chi-square approximation without final rejuvenation is currently unsupported")]
    ChiSquareWithoutRejuvenation,
    #[error("No model was bound to the engine before running it")]
    ModelNotBound,
}

impl EngineError {
    /// Whether the configuration is well-formed but asks for something the
    /// engines do not implement.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            EngineError::ZeroRejuvenationsUnsupported | EngineError::ChiSquareWithoutRejuvenation
        )
    }
}
