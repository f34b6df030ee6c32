//! Transfer learning to new tasks (TLA1).
//!
//! One Gaussian process per parameter dimension is fitted on
//! `normalized task -> normalized optimal parameter value` over the tuned
//! history and used to predict optima for unseen tasks, which are then
//! evaluated once each.

use tracing::info;

use at_types::{config_error, DataStore, Observation, Point, TuneResult, TuningProblem};

use crate::model::{GaussianProcess, GpConfig};
use crate::tuner::{StatsClock, Tuner, TuningStats};
use crate::TuneRng;

/// Predictions are kept this far inside the unit interval.
pub const EXTRAPOLATION_EPSILON: f64 = 1e-12;

// Clamp bound, strictly inside (EPSILON, 1 - EPSILON).
const CLAMP_LOW: f64 = 2.0 * EXTRAPOLATION_EPSILON;
const CLAMP_HIGH: f64 = 1.0 - 2.0 * EXTRAPOLATION_EPSILON;

/// Result of [`Tuner::extrapolate`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    /// Predicted parameter set per new task, in the user-facing domain.
    pub parameters: Vec<Point>,
    /// The single observation recorded for each new task.
    pub observations: Vec<Observation>,
    pub stats: TuningStats,
}

/// Predicts optimal parameters for new tasks from a tuned history.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferExtrapolator {
    config: GpConfig,
}

impl TransferExtrapolator {
    pub fn new(config: GpConfig) -> Self {
        Self { config }
    }

    /// Normalized parameter predictions, one row per entry of `new_tasks`.
    ///
    /// The optimum of each tuned task is its first observation with the
    /// smallest first objective.
    pub fn predict(
        &self,
        problem: &TuningProblem,
        history: &DataStore,
        new_tasks: &[Point],
        rng: &mut TuneRng,
    ) -> TuneResult<Vec<Vec<f64>>> {
        if history.is_empty() || !history.is_complete() {
            return Err(config_error!("Transfer requires a tuned history with observations"));
        }
        if new_tasks.is_empty() {
            return Ok(Vec::new());
        }

        let optima = (0..history.num_tasks())
            .map(|t| {
                history
                    .best(t)
                    .map(|(p, _)| p.clone())
                    .ok_or_else(|| config_error!("Task {t} has no usable observation"))
            })
            .collect::<TuneResult<Vec<Point>>>()?;

        let tasks = problem.input_space.transform(history.tasks())?;
        let targets = problem.parameter_space.transform(&optima)?;
        let new_norm = problem.input_space.transform(new_tasks)?;

        let mut predictions = vec![vec![0.0; problem.dp()]; new_tasks.len()];
        for k in 0..problem.dp() {
            let y: Vec<f64> = targets.iter().map(|row| row[k]).collect();
            let gp = GaussianProcess::fit(&tasks, &y, self.config, rng)?;
            for (row, task) in predictions.iter_mut().zip(&new_norm) {
                row[k] = gp.predict(task).mean.clamp(CLAMP_LOW, CLAMP_HIGH);
            }
        }
        Ok(predictions)
    }
}

impl Tuner {
    /// Predict and evaluate one parameter set for each of `new_tasks` using
    /// the session history. The history itself is left unchanged.
    pub fn extrapolate(&mut self, new_tasks: &[Point]) -> TuneResult<TransferOutcome> {
        let mut clock = StatsClock::start();
        for task in new_tasks {
            self.problem.input_space.transform_point(task)?;
        }

        let extrapolator = TransferExtrapolator::new(GpConfig::from_options(&self.options));
        let predictions = extrapolator.predict(&self.problem, &self.data, new_tasks, &mut self.rng)?;
        info!(
            "Extrapolating to {} new tasks from {} tuned tasks",
            new_tasks.len(),
            self.data.num_tasks()
        );

        let tasks_norm = self.problem.input_space.transform(new_tasks)?;
        let batch: Vec<Vec<Vec<f64>>> = predictions.iter().map(|p| vec![p.clone()]).collect();
        let observations = self
            .evaluate_normalized(&tasks_norm, &batch, &mut clock)?
            .into_iter()
            .flatten()
            .collect();
        let parameters = self.problem.parameter_space.inverse_transform(&predictions)?;

        Ok(TransferOutcome {
            parameters,
            observations,
            stats: clock.finish(),
        })
    }
}
