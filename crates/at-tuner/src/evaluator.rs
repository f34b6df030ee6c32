//! Objective evaluation.
//!
//! An [`Evaluator`] runs the black-box objective for a whole batch of
//! (task, parameter set) pairs in the user-facing domain and returns results
//! aligned positionally with the batch. Calls are blocking and all-or-nothing.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use at_types::{Assignment, EvaluationError, Observation, Point, Space};

/// Runs the objective for a batch.
pub trait Evaluator: Send + Sync {
    /// `parameters[t]` holds the parameter sets to evaluate for `tasks[t]`.
    /// The result has the same shape as `parameters`.
    fn evaluate(
        &self,
        tasks: &[Point],
        parameters: &[Vec<Point>],
    ) -> Result<Vec<Vec<Observation>>, EvaluationError>;
}

/// User objective over the merged task and parameter assignment.
pub type Objective = dyn Fn(&Assignment) -> Result<Observation, EvaluationError> + Send + Sync;

/// Binds task and parameter points to names before calling the objective.
#[derive(Clone)]
struct Binder {
    input_space: Space,
    parameter_space: Space,
    objective: Arc<Objective>,
}

impl Binder {
    fn call(&self, task: &Point, params: &Point) -> Result<Observation, EvaluationError> {
        let bind_err = |e: at_types::SpaceError| EvaluationError::failed(e.to_string());
        let mut assignment = self.input_space.bind(task).map_err(bind_err)?;
        assignment.extend(self.parameter_space.bind(params).map_err(bind_err)?);
        (self.objective)(&assignment)
    }
}

fn check_batch(tasks: &[Point], parameters: &[Vec<Point>]) -> Result<(), EvaluationError> {
    if tasks.len() != parameters.len() {
        return Err(EvaluationError::TaskCountMismatch {
            expected: tasks.len(),
            found: parameters.len(),
        });
    }
    Ok(())
}

/// Sequential evaluator.
#[derive(Clone)]
pub struct FnEvaluator {
    binder: Binder,
}

impl FnEvaluator {
    pub fn new(
        input_space: Space,
        parameter_space: Space,
        objective: impl Fn(&Assignment) -> Result<Observation, EvaluationError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            binder: Binder {
                input_space,
                parameter_space,
                objective: Arc::new(objective),
            },
        }
    }
}

impl Evaluator for FnEvaluator {
    fn evaluate(
        &self,
        tasks: &[Point],
        parameters: &[Vec<Point>],
    ) -> Result<Vec<Vec<Observation>>, EvaluationError> {
        check_batch(tasks, parameters)?;
        tasks
            .iter()
            .zip(parameters)
            .map(|(task, params)| params.iter().map(|p| self.binder.call(task, p)).collect())
            .collect()
    }
}

/// Fans the batch out over a rayon thread pool.
///
/// The batch is flattened so every (task, parameter set) pair is an
/// independent job. The first failure aborts the batch.
pub struct ParallelEvaluator {
    binder: Binder,
    pool: Option<rayon::ThreadPool>,
}

impl ParallelEvaluator {
    /// Evaluate on rayon's global pool.
    pub fn new(
        input_space: Space,
        parameter_space: Space,
        objective: impl Fn(&Assignment) -> Result<Observation, EvaluationError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            binder: Binder {
                input_space,
                parameter_space,
                objective: Arc::new(objective),
            },
            pool: None,
        }
    }

    /// Evaluate on a dedicated pool of `threads` workers.
    pub fn with_threads(mut self, threads: usize) -> Result<Self, EvaluationError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("at-eval-{i}"))
            .build()
            .map_err(|e| EvaluationError::ThreadPool {
                message: e.to_string(),
            })?;
        self.pool = Some(pool);
        Ok(self)
    }

    fn run(&self, jobs: &[(usize, &Point, &Point)]) -> Result<Vec<Observation>, EvaluationError> {
        jobs.par_iter()
            .map(|(_, task, params)| self.binder.call(task, params))
            .collect()
    }
}

impl Evaluator for ParallelEvaluator {
    fn evaluate(
        &self,
        tasks: &[Point],
        parameters: &[Vec<Point>],
    ) -> Result<Vec<Vec<Observation>>, EvaluationError> {
        check_batch(tasks, parameters)?;

        let jobs: Vec<(usize, &Point, &Point)> = tasks
            .iter()
            .zip(parameters)
            .enumerate()
            .flat_map(|(t, (task, params))| params.iter().map(move |p| (t, task, p)))
            .collect();
        debug!("Dispatching {} evaluations", jobs.len());

        let flat = match &self.pool {
            Some(pool) => pool.install(|| self.run(&jobs))?,
            None => self.run(&jobs)?,
        };

        let mut results: Vec<Vec<Observation>> = parameters
            .iter()
            .map(|p| Vec::with_capacity(p.len()))
            .collect();
        for ((t, _, _), obs) in jobs.iter().zip(flat) {
            results[*t].push(obs);
        }
        Ok(results)
    }
}
