use crate::error::EngineError;
use crate::resampling::ResamplingScheme;

/// Annealing exponents of the chains of a parallel tempering run.
///
/// Strictly increasing values in `[0, 1]`. The last chain targets the
/// posterior (exponent 1); with more than one chain the first one targets the
/// prior (exponent 0).
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureLadder {
    exponents: Vec<f64>,
}

impl TemperatureLadder {
    pub fn new(exponents: Vec<f64>) -> Result<Self, EngineError> {
        let ladder = Self { exponents };
        ladder.validate()?;
        Ok(ladder)
    }

    /// `n_chains` exponents equally spaced between 0 and 1.
    pub fn equally_spaced(n_chains: usize) -> Result<Self, EngineError> {
        match n_chains {
            0 => Err(EngineError::InvalidLadder("at least one chain is needed".into())),
            1 => Self::new(vec![1.]),
            n => Self::new(
                (0..n)
                    .map(|i| i as f64 / (n - 1) as f64)
                    .collect(),
            ),
        }
    }

    /// Geometrically spaced exponents `ratio^j` counted down from the
    /// posterior, with the first chain pinned at the prior.
    pub fn geometric(n_chains: usize, ratio: f64) -> Result<Self, EngineError> {
        if !(ratio > 0. && ratio < 1.) {
            return Err(EngineError::OutOfRange {
                name: "ratio",
                range: "(0, 1)",
                value: ratio,
            });
        }
        match n_chains {
            0 => Err(EngineError::InvalidLadder("at least one chain is needed".into())),
            1 => Self::new(vec![1.]),
            n => {
                let mut exponents: Vec<f64> =
                    (0..n).map(|i| ratio.powi((n - 1 - i) as i32)).collect();
                exponents[0] = 0.;
                Self::new(exponents)
            }
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let exponents = &self.exponents;
        let Some(&last) = exponents.last() else {
            return Err(EngineError::InvalidLadder("at least one chain is needed".into()));
        };
        if last != 1. {
            return Err(EngineError::InvalidLadder(format!(
                "the last exponent must be 1, got {}",
                last
            )));
        }
        if exponents.len() > 1 && exponents[0] != 0. {
            return Err(EngineError::InvalidLadder(format!(
                "the first exponent must be 0, got {}",
                exponents[0]
            )));
        }
        if exponents.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(EngineError::InvalidLadder(
                "exponents must be strictly increasing".into(),
            ));
        }
        Ok(())
    }

    pub fn n_chains(&self) -> usize {
        self.exponents.len()
    }

    pub fn exponent(&self, chain: usize) -> f64 {
        self.exponents[chain]
    }

    pub fn exponents(&self) -> &[f64] {
        &self.exponents
    }

    /// Index of the chain targeting the posterior.
    pub fn target_chain(&self) -> usize {
        self.exponents.len() - 1
    }
}

impl Default for TemperatureLadder {
    fn default() -> Self {
        Self {
            exponents: vec![0., 1. / 3., 2. / 3., 1.],
        }
    }
}

/// Settings for parallel tempering
#[derive(Debug, Clone)]
pub struct PtSettings {
    /// The number of scans. Each scan is a move phase, one recorded sample
    /// per slot and a swap phase.
    pub n_scans: usize,
    /// The number of local update sweeps per chain in each move phase.
    pub n_passes_per_scan: usize,
    pub seed: u64,
    /// Record every chain instead of only the one targeting the posterior.
    pub print_all_temperatures: bool,
    pub ladder: TemperatureLadder,
    /// Independent replicas run at each temperature.
    pub n_particles_per_temperature: usize,
    /// Upper bound on worker threads, zero lets rayon decide.
    pub num_threads: usize,
}

impl Default for PtSettings {
    fn default() -> Self {
        Self {
            n_scans: 1_000,
            n_passes_per_scan: 3,
            seed: 1,
            print_all_temperatures: false,
            ladder: TemperatureLadder::default(),
            n_particles_per_temperature: 1,
            num_threads: 0,
        }
    }
}

impl PtSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.n_scans == 0 {
            return Err(EngineError::NonPositiveScans(self.n_scans));
        }
        if self.n_particles_per_temperature == 0 {
            return Err(EngineError::NonPositiveParticles(
                self.n_particles_per_temperature,
            ));
        }
        self.ladder.validate()
    }
}

/// How the next annealing exponent is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleCriterion {
    /// Keep the relative conditional ESS of the incremental weights at
    /// `target`.
    ConditionalEss { target: f64 },
    /// Keep the relative ESS of the reweighted population at `target`.
    Ess { target: f64 },
}

impl ScheduleCriterion {
    pub fn target(&self) -> f64 {
        match self {
            ScheduleCriterion::ConditionalEss { target } | ScheduleCriterion::Ess { target } => {
                *target
            }
        }
    }
}

impl Default for ScheduleCriterion {
    fn default() -> Self {
        ScheduleCriterion::ConditionalEss { target: 0.999 }
    }
}

/// Settings for the sequential change of measure
#[derive(Debug, Clone)]
pub struct ScmSettings {
    pub n_particles: usize,
    pub seed: u64,
    /// Local update sweeps applied to every particle once the posterior is
    /// reached.
    pub n_final_rejuvenations: i64,
    /// Estimate the chi-square divergence between prior and posterior after
    /// the final rejuvenation.
    pub approximate_chi_square_divergence: bool,
    pub resampling_scheme: ResamplingScheme,
    /// Resample when the relative ESS drops below this value.
    pub resampling_ess_threshold: f64,
    pub schedule: ScheduleCriterion,
    /// Upper bound on worker threads, zero lets rayon decide.
    pub num_threads: usize,
}

impl Default for ScmSettings {
    fn default() -> Self {
        Self {
            n_particles: 1_000,
            seed: 1,
            n_final_rejuvenations: 5,
            approximate_chi_square_divergence: true,
            resampling_scheme: ResamplingScheme::default(),
            resampling_ess_threshold: 0.5,
            schedule: ScheduleCriterion::default(),
            num_threads: 0,
        }
    }
}

impl ScmSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.n_final_rejuvenations < 0 {
            return Err(EngineError::NegativeRejuvenations(self.n_final_rejuvenations));
        }
        if self.n_final_rejuvenations == 0 && self.approximate_chi_square_divergence {
            return Err(EngineError::ChiSquareWithoutRejuvenation);
        }
        if self.n_final_rejuvenations == 0 {
            return Err(EngineError::ZeroRejuvenationsUnsupported);
        }
        if self.n_particles == 0 {
            return Err(EngineError::NonPositiveParticles(self.n_particles));
        }
        if !(self.resampling_ess_threshold >= 0. && self.resampling_ess_threshold <= 1.) {
            return Err(EngineError::OutOfRange {
                name: "resampling_ess_threshold",
                range: "[0, 1]",
                value: self.resampling_ess_threshold,
            });
        }
        let target = self.schedule.target();
        if !(target > 0. && target < 1.) {
            return Err(EngineError::OutOfRange {
                name: "schedule target",
                range: "(0, 1)",
                value: target,
            });
        }
        Ok(())
    }

    /// The validated number of final rejuvenation sweeps.
    pub(crate) fn rejuvenation_sweeps(&self) -> usize {
        self.n_final_rejuvenations.max(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ladders() {
        assert_eq!(TemperatureLadder::equally_spaced(1).unwrap().exponents(), &[1.]);
        assert_eq!(
            TemperatureLadder::equally_spaced(3).unwrap().exponents(),
            &[0., 0.5, 1.]
        );
        assert_eq!(
            TemperatureLadder::geometric(4, 0.5).unwrap().exponents(),
            &[0., 0.25, 0.5, 1.]
        );
        assert!(TemperatureLadder::equally_spaced(0).is_err());
        assert!(TemperatureLadder::new(vec![0., 0.5, 0.5, 1.]).is_err());
        assert!(TemperatureLadder::new(vec![0.1, 1.]).is_err());
        assert!(TemperatureLadder::new(vec![0., 0.9]).is_err());
        assert!(TemperatureLadder::new(vec![0.5]).is_err());
        assert!(TemperatureLadder::default().validate().is_ok());
    }

    #[test]
    fn pt_defaults() {
        let settings = PtSettings::default();
        assert_eq!(settings.n_scans, 1000);
        assert_eq!(settings.n_passes_per_scan, 3);
        assert!(!settings.print_all_temperatures);
        assert!(settings.validate().is_ok());

        let settings = PtSettings {
            n_scans: 0,
            ..Default::default()
        };
        assert_eq!(settings.validate(), Err(EngineError::NonPositiveScans(0)));
    }

    #[test]
    fn scm_rejuvenation_checks() {
        let settings = ScmSettings::default();
        assert_eq!(settings.n_final_rejuvenations, 5);
        assert!(settings.approximate_chi_square_divergence);
        assert!(settings.validate().is_ok());

        let negative = ScmSettings {
            n_final_rejuvenations: -1,
            ..Default::default()
        };
        assert_eq!(negative.validate(), Err(EngineError::NegativeRejuvenations(-1)));

        let zero = ScmSettings {
            n_final_rejuvenations: 0,
            approximate_chi_square_divergence: false,
            ..Default::default()
        };
        assert_eq!(zero.validate(), Err(EngineError::ZeroRejuvenationsUnsupported));

        let zero_with_chi = ScmSettings {
            n_final_rejuvenations: 0,
            approximate_chi_square_divergence: true,
            ..Default::default()
        };
        assert_eq!(
            zero_with_chi.validate(),
            Err(EngineError::ChiSquareWithoutRejuvenation)
        );
        assert!(zero_with_chi.validate().unwrap_err().is_unsupported());
    }

    #[test]
    fn scm_thresholds() {
        let bad = ScmSettings {
            resampling_ess_threshold: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = ScmSettings {
            schedule: ScheduleCriterion::Ess { target: 1. },
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
