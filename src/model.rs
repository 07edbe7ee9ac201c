//! The capability a model must expose to be annealed.

use anyhow::Result;
use rand::Rng;

use crate::storage::Value;

/// One replica of a model's latent state, tempered by an annealing exponent.
///
/// The tempered density interpolates between the prior (exponent 0) and the
/// posterior (exponent 1). The engines never look inside a replica; they
/// only evaluate densities, move the state with MCMC sweeps, draw it from
/// the prior and ask for a row describing it.
///
/// `Clone` must produce a deep copy: after cloning, updating one replica must
/// never affect the other.
///
/// The trait is thread-safe so that replicas can be updated in parallel,
/// one worker per replica.
pub trait AnnealedModel: Clone + Send + Sync {
    /// Log density of the current state tempered with `exponent`.
    ///
    /// The prior part must be normalized, the likelihood part may be
    /// unnormalized.
    fn log_density_at(&self, exponent: f64) -> Result<f64>;

    /// Log density of the current state under the posterior.
    fn log_density(&self) -> Result<f64> {
        self.log_density_at(1.)
    }

    /// The exponent that local updates currently target.
    fn exponent(&self) -> f64;

    fn set_exponent(&mut self, exponent: f64);

    /// Draw every latent variable from the generative model.
    ///
    /// With `force` set, variables that are normally held fixed (such as
    /// observations) are simulated as well.
    fn forward_sample<R: Rng + ?Sized>(&mut self, rng: &mut R, force: bool) -> Result<()>;

    /// One sweep of local MCMC updates in place, leaving the density at the
    /// current exponent invariant.
    fn posterior_sampling_scan<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()>;

    /// An ordered list of `(field, value)` pairs describing the state.
    fn sample_row(&self) -> Vec<(String, Value)>;
}
