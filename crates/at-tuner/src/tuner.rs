//! Multi-task learning autotuning (MLA).
//!
//! The [`Tuner`] owns one session: the problem, its resolved strategies, the
//! evaluator and the tuning history. [`Tuner::mla`] drives the
//! evaluate-refit-search cycle. Everything between the public boundary and the
//! strategies happens in the normalized domain.

use std::time::Instant;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use at_types::{
    config_error, DataStore, EvaluationError, NormalizedData, Observation, Point, TuneResult,
    TuningOptions, TuningProblem,
};

use crate::evaluator::Evaluator;
use crate::model::FittedModel;
use crate::registry::{Strategies, StrategyRegistry};
use crate::search::SearchContext;
use crate::TuneRng;

/// Arguments of one MLA call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MlaRequest {
    /// Total parameter sets wanted per task (NS).
    pub target_samples: usize,
    /// Initial design size (NS1). Defaults to `min(NS - 1, multiplier * DP)`.
    pub initial_samples: Option<usize>,
    /// Number of tasks to draw when the session has none (NI).
    pub task_count: Option<usize>,
    /// Tasks to tune when the session has none.
    pub given_tasks: Option<Vec<Point>>,
}

impl MlaRequest {
    pub fn new(target_samples: usize) -> Self {
        Self {
            target_samples,
            ..Self::default()
        }
    }

    pub fn with_initial_samples(mut self, n: usize) -> Self {
        self.initial_samples = Some(n);
        self
    }

    pub fn with_task_count(mut self, n: usize) -> Self {
        self.task_count = Some(n);
        self
    }

    pub fn with_tasks(mut self, tasks: Vec<Point>) -> Self {
        self.given_tasks = Some(tasks);
        self
    }
}

/// Timing of one MLA or TLA1 call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningStats {
    /// Wall-clock time of the whole call.
    pub total_tuning_seconds: f64,
    /// Wall-clock time spent strictly inside the evaluator.
    pub objective_evaluation_seconds: f64,
    /// Number of (task, parameter set) evaluations performed.
    pub evaluations: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Result of [`Tuner::mla`].
#[derive(Debug)]
pub struct MlaOutcome {
    pub data: DataStore,
    /// The last fitted model; `None` when no refinement iteration ran.
    pub model: Option<Box<dyn FittedModel>>,
    pub stats: TuningStats,
}

/// Accumulates timing for one call.
pub(crate) struct StatsClock {
    started: Instant,
    started_at: DateTime<Utc>,
    evaluation_seconds: f64,
    evaluations: usize,
}

impl StatsClock {
    pub(crate) fn start() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            evaluation_seconds: 0.0,
            evaluations: 0,
        }
    }

    pub(crate) fn finish(self) -> TuningStats {
        TuningStats {
            total_tuning_seconds: self.started.elapsed().as_secs_f64(),
            objective_evaluation_seconds: self.evaluation_seconds,
            evaluations: self.evaluations,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// One tuning session.
pub struct Tuner {
    pub(crate) problem: TuningProblem,
    pub(crate) options: TuningOptions,
    pub(crate) strategies: Strategies,
    pub(crate) evaluator: Box<dyn Evaluator>,
    pub(crate) data: DataStore,
    pub(crate) rng: TuneRng,
}

impl Tuner {
    /// Create a tuner with the built-in strategies.
    pub fn new(
        problem: TuningProblem,
        evaluator: impl Evaluator + 'static,
        options: TuningOptions,
    ) -> TuneResult<Self> {
        Self::with_registry(problem, evaluator, options, &StrategyRegistry::default())
    }

    /// Create a tuner resolving strategy names against `registry`.
    pub fn with_registry(
        problem: TuningProblem,
        evaluator: impl Evaluator + 'static,
        options: TuningOptions,
        registry: &StrategyRegistry,
    ) -> TuneResult<Self> {
        problem.validate()?;
        options.validate()?;
        let strategies = registry.resolve(&options)?;
        let rng = match options.seed {
            Some(seed) => TuneRng::seed_from_u64(seed),
            None => TuneRng::from_entropy(),
        };

        Ok(Self {
            problem,
            options,
            strategies,
            evaluator: Box::new(evaluator),
            data: DataStore::default(),
            rng,
        })
    }

    /// Seed the session with a prior history.
    pub fn with_data(mut self, data: DataStore) -> TuneResult<Self> {
        data.validate()?;
        check_even_samples(&data)?;
        data.normalize(&self.problem.input_space, &self.problem.parameter_space)?;
        self.data = data;
        Ok(self)
    }

    /// The session history in the user-facing domain.
    pub fn data(&self) -> &DataStore {
        &self.data
    }

    pub fn into_data(self) -> DataStore {
        self.data
    }

    pub fn problem(&self) -> &TuningProblem {
        &self.problem
    }

    pub fn options(&self) -> &TuningOptions {
        &self.options
    }

    /// Run multi-task learning autotuning until every task holds
    /// `request.target_samples` evaluated parameter sets.
    ///
    /// If the history already holds that many samples per task nothing is
    /// evaluated and the history is returned unchanged with no model.
    pub fn mla(&mut self, request: MlaRequest) -> TuneResult<MlaOutcome> {
        let mut clock = StatsClock::start();
        let target = request.target_samples;
        if target == 0 {
            return Err(config_error!("target_samples must be at least 1"));
        }
        check_even_samples(&self.data)?;

        if self.data.is_complete() && self.data.min_samples() >= target {
            info!(
                "History already holds {} samples per task (target {}), skipping MLA",
                self.data.min_samples(),
                target
            );
            return Ok(MlaOutcome {
                data: self.data.clone(),
                model: None,
                stats: clock.finish(),
            });
        }

        let mut norm = self.resolve_tasks(&request)?;
        info!(
            "Starting MLA with {} tasks and {} prior observations",
            norm.num_tasks(),
            norm.total_observations()
        );

        if norm.parameters().is_none() {
            let initial = match request.initial_samples {
                Some(n) if n > target => {
                    return Err(config_error!(
                        "initial_samples ({n}) exceeds target_samples ({target})"
                    ))
                }
                Some(0) => return Err(config_error!("initial_samples must be at least 1")),
                Some(n) => n,
                None => self.options.initial_samples(target, self.problem.dp()),
            };
            debug!("Drawing {} initial parameter sets per task", initial);
            let params = self.strategies.sampler.sample_parameters(
                initial,
                norm.tasks(),
                &self.problem,
                &mut self.rng,
            )?;
            norm = norm.with_parameters(params)?;
        }

        if norm.observations().is_none() {
            let params = norm.parameters().unwrap_or_default().to_vec();
            let observations = self.evaluate_normalized(norm.tasks(), &params, &mut clock)?;
            norm = norm.with_observations(observations)?;
            self.publish(&norm)?;
        }

        let iterations = target.saturating_sub(norm.min_samples());
        let mut model = None;
        for iteration in 0..iterations {
            let fitted = self.strategies.model.train(&norm, &mut self.rng)?;

            let ctx = SearchContext {
                data: &norm,
                model: fitted.as_ref(),
                problem: &self.problem,
                sampler: &self.strategies.sampler,
            };
            let proposals = self.strategies.searcher.search(&ctx, &mut self.rng)?;
            if proposals.len() != norm.num_tasks() {
                return Err(config_error!(
                    "Searcher proposed {} parameter sets for {} tasks",
                    proposals.len(),
                    norm.num_tasks()
                ));
            }

            let batch_params: Vec<Vec<Vec<f64>>> = proposals.into_iter().map(|p| vec![p]).collect();
            let observations = self.evaluate_normalized(norm.tasks(), &batch_params, &mut clock)?;
            let batch = NormalizedData::new(norm.tasks().to_vec())
                .with_parameters(batch_params)?
                .with_observations(observations)?;

            norm = norm.merge(&batch)?;
            self.publish(&norm)?;
            model = Some(fitted);

            debug!(
                "MLA iteration {}/{}: best per task {:?}",
                iteration + 1,
                iterations,
                (0..norm.num_tasks())
                    .map(|t| norm.best(t).and_then(|(_, o)| o.first().copied()))
                    .collect::<Vec<_>>()
            );
        }

        let stats = clock.finish();
        info!(
            "MLA completed: {} evaluations, {:.3}s total, {:.3}s in objective",
            stats.evaluations, stats.total_tuning_seconds, stats.objective_evaluation_seconds
        );
        Ok(MlaOutcome {
            data: self.data.clone(),
            model,
            stats,
        })
    }

    /// Normalized history with tasks, drawing or adopting tasks if needed.
    fn resolve_tasks(&mut self, request: &MlaRequest) -> TuneResult<NormalizedData> {
        let mut data = self.data.clone();
        if data.is_empty() {
            if let Some(given) = &request.given_tasks {
                data = DataStore::new(given.clone());
            }
        } else if request.given_tasks.is_some() {
            debug!("Session already has tasks, ignoring given tasks");
        }

        let norm = data.normalize(&self.problem.input_space, &self.problem.parameter_space)?;
        if !norm.is_empty() {
            return Ok(norm);
        }

        let count = request
            .task_count
            .ok_or_else(|| config_error!("Number of tasks to generate is not defined and no tasks were given"))?;
        if count == 0 {
            return Err(config_error!("task_count must be at least 1"));
        }
        let tasks = self
            .strategies
            .sampler
            .sample_inputs(count, &self.problem, &mut self.rng)?;
        Ok(NormalizedData::new(tasks))
    }

    /// Replace the session history with the denormalized snapshot.
    fn publish(&mut self, norm: &NormalizedData) -> TuneResult<()> {
        self.data = norm.denormalize(&self.problem.input_space, &self.problem.parameter_space)?;
        Ok(())
    }

    /// Denormalize a batch, run the evaluator and check the returned shape.
    pub(crate) fn evaluate_normalized(
        &self,
        tasks: &[Vec<f64>],
        parameters: &[Vec<Vec<f64>>],
        clock: &mut StatsClock,
    ) -> TuneResult<Vec<Vec<Observation>>> {
        let tasks_orig = self.problem.input_space.inverse_transform(tasks)?;
        let params_orig = parameters
            .iter()
            .map(|p| self.problem.parameter_space.inverse_transform(p))
            .collect::<Result<Vec<_>, _>>()?;

        let started = Instant::now();
        let result = self.evaluator.evaluate(&tasks_orig, &params_orig);
        clock.evaluation_seconds += started.elapsed().as_secs_f64();
        let observations = result?;

        if observations.len() != parameters.len() {
            return Err(EvaluationError::TaskCountMismatch {
                expected: parameters.len(),
                found: observations.len(),
            }
            .into());
        }
        for (task, (obs, params)) in observations.iter().zip(parameters).enumerate() {
            if obs.len() != params.len() {
                return Err(EvaluationError::ShapeMismatch {
                    task,
                    expected: params.len(),
                    found: obs.len(),
                }
                .into());
            }
            let expected = self.problem.objectives.len();
            if let Some(o) = obs.iter().find(|o| o.len() != expected) {
                return Err(EvaluationError::ObjectiveCountMismatch {
                    task,
                    expected,
                    found: o.len(),
                }
                .into());
            }
        }

        clock.evaluations += parameters.iter().map(Vec::len).sum::<usize>();
        Ok(observations)
    }
}

/// Every refinement iteration adds one sample to each task, so tasks must
/// start level for all of them to end at the target.
fn check_even_samples(data: &DataStore) -> TuneResult<()> {
    let counts: Vec<usize> = (0..data.num_tasks()).map(|t| data.samples_for(t)).collect();
    if counts.windows(2).any(|w| w[0] != w[1]) {
        return Err(config_error!(
            "Tasks hold unequal numbers of parameter sets {counts:?}; MLA needs the same count for every task"
        ));
    }
    Ok(())
}

impl std::fmt::Debug for Tuner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tuner")
            .field("problem", &self.problem)
            .field("options", &self.options)
            .field("strategies", &self.strategies)
            .field("tasks", &self.data.num_tasks())
            .finish()
    }
}
