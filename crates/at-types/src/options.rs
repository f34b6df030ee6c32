//! Session configuration.

use serde::{Deserialize, Serialize};

use crate::errors::TuneResult;
use crate::config_error;

/// Acquisition criterion used by the searcher to rank candidates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Acquisition {
    /// Expected Improvement over the task's best observed value.
    ExpectedImprovement,
    /// Lower Confidence Bound `mean - kappa * std`.
    LowerConfidenceBound { kappa: f64 },
}

impl Default for Acquisition {
    fn default() -> Self {
        Self::ExpectedImprovement
    }
}

/// Every recognized tuning option. Validated once when a tuner is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningOptions {
    /// Registry name of the raw draw strategy: "lhs" or "random".
    pub sampler: String,

    /// Registry name of the surrogate model: "gp_joint" or "gp_independent".
    pub model: String,

    /// Registry name of the acquisition search: "candidate".
    pub searcher: String,

    /// Scales the default initial sample count `min(NS - 1, multiplier * DP)`.
    pub initial_design_multiplier: usize,

    /// Retry bound (in batches) for constrained sampling.
    pub sample_max_iterations: usize,

    /// Random length-scale restarts when fitting GP hyperparameters.
    pub model_restarts: usize,

    /// Diagonal jitter added to kernel matrices.
    pub model_nugget: f64,

    /// Random feasible candidates scored per task per search.
    pub search_candidates: usize,

    /// Perturbations of the task incumbent scored per search.
    pub search_local_candidates: usize,

    pub acquisition: Acquisition,

    /// Session RNG seed. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for TuningOptions {
    fn default() -> Self {
        Self {
            sampler: "lhs".to_string(),
            model: "gp_joint".to_string(),
            searcher: "candidate".to_string(),
            initial_design_multiplier: 3,
            sample_max_iterations: 10_000,
            model_restarts: 4,
            model_nugget: 1e-6,
            search_candidates: 256,
            search_local_candidates: 64,
            acquisition: Acquisition::ExpectedImprovement,
            seed: None,
        }
    }
}

impl TuningOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sampler(mut self, name: &str) -> Self {
        self.sampler = name.to_string();
        self
    }

    pub fn with_model(mut self, name: &str) -> Self {
        self.model = name.to_string();
        self
    }

    pub fn with_searcher(mut self, name: &str) -> Self {
        self.searcher = name.to_string();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_sample_max_iterations(mut self, n: usize) -> Self {
        self.sample_max_iterations = n;
        self
    }

    pub fn with_initial_design_multiplier(mut self, n: usize) -> Self {
        self.initial_design_multiplier = n;
        self
    }

    pub fn with_search_candidates(mut self, random: usize, local: usize) -> Self {
        self.search_candidates = random;
        self.search_local_candidates = local;
        self
    }

    pub fn with_acquisition(mut self, acquisition: Acquisition) -> Self {
        self.acquisition = acquisition;
        self
    }

    pub fn with_model_restarts(mut self, n: usize) -> Self {
        self.model_restarts = n;
        self
    }

    /// Default initial sample count for a target of `target_samples` and `dp`
    /// tunable parameters. Never below one so the first model has data.
    pub fn initial_samples(&self, target_samples: usize, dp: usize) -> usize {
        target_samples
            .saturating_sub(1)
            .min(self.initial_design_multiplier.saturating_mul(dp))
            .max(1)
    }

    pub fn validate(&self) -> TuneResult<()> {
        if self.initial_design_multiplier == 0 {
            return Err(config_error!("initial_design_multiplier must be at least 1"));
        }
        if self.sample_max_iterations == 0 {
            return Err(config_error!("sample_max_iterations must be at least 1"));
        }
        if self.search_candidates == 0 {
            return Err(config_error!("search_candidates must be at least 1"));
        }
        if !(self.model_nugget.is_finite() && self.model_nugget >= 0.0) {
            return Err(config_error!(
                "model_nugget must be finite and non-negative, got {}",
                self.model_nugget
            ));
        }
        if let Acquisition::LowerConfidenceBound { kappa } = self.acquisition {
            if !(kappa.is_finite() && kappa > 0.0) {
                return Err(config_error!("LCB kappa must be positive, got {kappa}"));
            }
        }
        Ok(())
    }
}
