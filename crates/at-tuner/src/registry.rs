//! Name-to-factory registry for pluggable strategies.
//!
//! Strategies are resolved once when a [`crate::Tuner`] is built, never per call.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use at_types::{config_error, TuneResult, TuningOptions};

use crate::model::{GpConfig, IndependentGp, JointGp, SurrogateModel};
use crate::sample::{ConstrainedSampler, LhsSampler, RandomSampler, Sampler};
use crate::search::{CandidateSearch, Searcher};

pub type SamplerFactory = Arc<dyn Fn(&TuningOptions) -> Box<dyn Sampler> + Send + Sync>;
pub type ModelFactory = Arc<dyn Fn(&TuningOptions) -> Box<dyn SurrogateModel> + Send + Sync>;
pub type SearcherFactory = Arc<dyn Fn(&TuningOptions) -> Box<dyn Searcher> + Send + Sync>;

/// The strategies one tuner runs with.
pub struct Strategies {
    pub sampler: ConstrainedSampler,
    pub model: Box<dyn SurrogateModel>,
    pub searcher: Box<dyn Searcher>,
}

impl std::fmt::Debug for Strategies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategies")
            .field("sampler", &self.sampler)
            .field("model", &self.model.name())
            .field("searcher", &self.searcher.name())
            .finish()
    }
}

#[derive(Clone)]
pub struct StrategyRegistry {
    samplers: HashMap<String, SamplerFactory>,
    models: HashMap<String, ModelFactory>,
    searchers: HashMap<String, SearcherFactory>,
}

impl StrategyRegistry {
    /// An empty registry. Use [`StrategyRegistry::default`] for the built-ins.
    pub fn empty() -> Self {
        Self {
            samplers: HashMap::new(),
            models: HashMap::new(),
            searchers: HashMap::new(),
        }
    }

    pub fn register_sampler(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&TuningOptions) -> Box<dyn Sampler> + Send + Sync + 'static,
    ) -> &mut Self {
        self.samplers.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn register_model(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&TuningOptions) -> Box<dyn SurrogateModel> + Send + Sync + 'static,
    ) -> &mut Self {
        self.models.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn register_searcher(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&TuningOptions) -> Box<dyn Searcher> + Send + Sync + 'static,
    ) -> &mut Self {
        self.searchers.insert(name.into(), Arc::new(factory));
        self
    }

    /// Registered names per kind, sorted.
    pub fn names(&self) -> (Vec<&str>, Vec<&str>, Vec<&str>) {
        fn sorted<'a>(mut keys: Vec<&'a str>) -> Vec<&'a str> {
            keys.sort_unstable();
            keys
        }
        (
            sorted(self.samplers.keys().map(String::as_str).collect()),
            sorted(self.models.keys().map(String::as_str).collect()),
            sorted(self.searchers.keys().map(String::as_str).collect()),
        )
    }

    /// Build the strategies named by `options`.
    pub fn resolve(&self, options: &TuningOptions) -> TuneResult<Strategies> {
        let sampler = self
            .samplers
            .get(&options.sampler)
            .ok_or_else(|| config_error!("Unknown sampler: {}", options.sampler))?;
        let model = self
            .models
            .get(&options.model)
            .ok_or_else(|| config_error!("Unknown model: {}", options.model))?;
        let searcher = self
            .searchers
            .get(&options.searcher)
            .ok_or_else(|| config_error!("Unknown searcher: {}", options.searcher))?;

        info!(
            "Resolved strategies: sampler={}, model={}, searcher={}",
            options.sampler, options.model, options.searcher
        );
        Ok(Strategies {
            sampler: ConstrainedSampler::new(sampler(options), options.sample_max_iterations),
            model: model(options),
            searcher: searcher(options),
        })
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register_sampler("lhs", |_| Box::new(LhsSampler))
            .register_sampler("random", |_| Box::new(RandomSampler))
            .register_model("gp_joint", |o| Box::new(JointGp::new(GpConfig::from_options(o))))
            .register_model("gp_independent", |o| {
                Box::new(IndependentGp::new(GpConfig::from_options(o)))
            })
            .register_searcher("candidate", |o| Box::new(CandidateSearch::from_options(o)));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use at_types::TuneError;

    #[test]
    fn defaults_resolve() {
        let registry = StrategyRegistry::default();
        let strategies = registry.resolve(&TuningOptions::default()).unwrap();
        assert_eq!(strategies.sampler.inner().name(), "lhs");
        assert_eq!(strategies.sampler.max_iterations(), 10_000);
        assert_eq!(strategies.model.name(), "gp_joint");
        assert_eq!(strategies.searcher.name(), "candidate");

        let (samplers, models, searchers) = registry.names();
        assert_eq!(samplers, vec!["lhs", "random"]);
        assert_eq!(models, vec!["gp_independent", "gp_joint"]);
        assert_eq!(searchers, vec!["candidate"]);
    }

    #[test]
    fn unknown_name_is_configuration_error() {
        let registry = StrategyRegistry::default();
        let err = registry
            .resolve(&TuningOptions::default().with_model("random_forest"))
            .unwrap_err();
        assert!(matches!(err, TuneError::Config(ref m) if m.contains("random_forest")));
    }

    #[test]
    fn custom_strategies_can_be_registered() {
        let mut registry = StrategyRegistry::default();
        registry.register_sampler("uniform", |_| Box::new(RandomSampler));
        let strategies = registry
            .resolve(&TuningOptions::default().with_sampler("uniform"))
            .unwrap();
        assert_eq!(strategies.sampler.inner().name(), "random");
    }
}
