//! Per-task tuning history.
//!
//! A [`Dataset`] holds three parallel sequences indexed by task position:
//! task descriptors, the parameter sets drawn for each task and the observed
//! objective values for each parameter set. The same container is used in the
//! user-facing domain ([`DataStore`]) and in the normalized domain
//! ([`NormalizedData`]).
//!
//! Datasets are append-only: [`Dataset::merge`] produces a new validated
//! snapshot and never rewrites existing task histories.

use serde::{Deserialize, Serialize};

use crate::errors::TuneResult;
use crate::space::{Point, Space};
use crate::config_error;

/// One evaluation result: one value per objective. Lower is better.
pub type Observation = Vec<f64>;

/// History in the user-facing domain.
pub type DataStore = Dataset<Point>;

/// History in the normalized domain, as seen by models and searchers.
pub type NormalizedData = Dataset<Vec<f64>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset<X> {
    tasks: Vec<X>,
    parameters: Option<Vec<Vec<X>>>,
    observations: Option<Vec<Vec<Observation>>>,
}

impl<X> Default for Dataset<X> {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            parameters: None,
            observations: None,
        }
    }
}

impl<X: Clone + PartialEq> Dataset<X> {
    /// A dataset holding task descriptors only.
    pub fn new(tasks: Vec<X>) -> Self {
        Self {
            tasks,
            parameters: None,
            observations: None,
        }
    }

    /// Build a dataset from all three sequences, checking alignment.
    pub fn from_parts(
        tasks: Vec<X>,
        parameters: Option<Vec<Vec<X>>>,
        observations: Option<Vec<Vec<Observation>>>,
    ) -> TuneResult<Self> {
        let data = Self {
            tasks,
            parameters,
            observations,
        };
        data.validate()?;
        Ok(data)
    }

    pub fn with_parameters(mut self, parameters: Vec<Vec<X>>) -> TuneResult<Self> {
        self.parameters = Some(parameters);
        self.validate()?;
        Ok(self)
    }

    pub fn with_observations(mut self, observations: Vec<Vec<Observation>>) -> TuneResult<Self> {
        self.observations = Some(observations);
        self.validate()?;
        Ok(self)
    }

    pub fn tasks(&self) -> &[X] {
        &self.tasks
    }

    pub fn parameters(&self) -> Option<&[Vec<X>]> {
        self.parameters.as_deref()
    }

    pub fn observations(&self) -> Option<&[Vec<Observation>]> {
        self.observations.as_deref()
    }

    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Whether every task has parameters and matching observations.
    pub fn is_complete(&self) -> bool {
        !self.tasks.is_empty() && self.parameters.is_some() && self.observations.is_some()
    }

    /// Number of parameter sets recorded for `task`.
    pub fn samples_for(&self, task: usize) -> usize {
        self.parameters
            .as_ref()
            .and_then(|p| p.get(task))
            .map_or(0, Vec::len)
    }

    /// Smallest per-task sample count, 0 when nothing has been drawn yet.
    pub fn min_samples(&self) -> usize {
        match &self.parameters {
            Some(p) if !p.is_empty() => p.iter().map(Vec::len).min().unwrap_or(0),
            _ => 0,
        }
    }

    /// Total number of recorded observations across tasks.
    pub fn total_observations(&self) -> usize {
        self.observations
            .as_ref()
            .map_or(0, |o| o.iter().map(Vec::len).sum())
    }

    /// Position of the best observation for `task` by the first objective.
    ///
    /// Ties go to the first occurrence in stored order; NaN values never win.
    pub fn best_index(&self, task: usize) -> Option<usize> {
        let history = self.observations.as_ref()?.get(task)?;
        let mut best: Option<(usize, f64)> = None;
        for (idx, obs) in history.iter().enumerate() {
            let Some(&value) = obs.first() else { continue };
            if value.is_nan() {
                continue;
            }
            match best {
                Some((_, current)) if value >= current => {}
                _ => best = Some((idx, value)),
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Best parameter set and its observation for `task`.
    pub fn best(&self, task: usize) -> Option<(&X, &Observation)> {
        let idx = self.best_index(task)?;
        let params = self.parameters.as_ref()?.get(task)?.get(idx)?;
        let obs = self.observations.as_ref()?.get(task)?.get(idx)?;
        Some((params, obs))
    }

    /// Check the alignment invariants.
    ///
    /// `len(P) == len(I)`, `len(O) == len(I)` and `len(P[t]) == len(O[t])`
    /// for every task once both are populated. Observations without parameter
    /// sets are rejected as well.
    pub fn validate(&self) -> TuneResult<()> {
        let n = self.tasks.len();
        if let Some(p) = &self.parameters {
            if p.len() != n {
                return Err(config_error!(
                    "len(P) = {} does not match len(I) = {}",
                    p.len(),
                    n
                ));
            }
        }
        if let Some(o) = &self.observations {
            if o.len() != n {
                return Err(config_error!(
                    "len(O) = {} does not match len(I) = {}",
                    o.len(),
                    n
                ));
            }
            let p = self
                .parameters
                .as_ref()
                .ok_or_else(|| config_error!("Observations recorded without parameter sets"))?;
            for (t, (params, obs)) in p.iter().zip(o).enumerate() {
                if params.len() != obs.len() {
                    return Err(config_error!(
                        "Task {t}: {} parameter sets but {} observations",
                        params.len(),
                        obs.len()
                    ));
                }
            }
        }
        Ok(())
    }

    /// Append a batch of new (parameter, observation) pairs per task.
    ///
    /// The batch must carry the same tasks in the same order, with parameters
    /// and observations for each. Returns a new snapshot; `self` is unchanged.
    pub fn merge(&self, batch: &Dataset<X>) -> TuneResult<Self> {
        self.validate()?;
        batch.validate()?;

        if batch.tasks != self.tasks {
            return Err(config_error!(
                "Cannot merge a batch of {} tasks into a store of {} different tasks",
                batch.tasks.len(),
                self.tasks.len()
            ));
        }
        let (Some(new_params), Some(new_obs)) = (&batch.parameters, &batch.observations) else {
            return Err(config_error!(
                "Merged batch must carry both parameter sets and observations"
            ));
        };

        let mut parameters = self
            .parameters
            .clone()
            .unwrap_or_else(|| vec![Vec::new(); self.tasks.len()]);
        let mut observations = self
            .observations
            .clone()
            .unwrap_or_else(|| vec![Vec::new(); self.tasks.len()]);

        // Stored parameter sets that were never evaluated cannot be followed
        // by new samples without breaking per-task ordering.
        for (t, (p, o)) in parameters.iter().zip(&observations).enumerate() {
            if p.len() != o.len() {
                return Err(config_error!(
                    "Task {t} has {} unevaluated parameter sets; evaluate them before merging",
                    p.len() - o.len()
                ));
            }
        }

        for (t, (p, o)) in new_params.iter().zip(new_obs).enumerate() {
            parameters[t].extend(p.iter().cloned());
            observations[t].extend(o.iter().cloned());
        }

        Self::from_parts(self.tasks.clone(), Some(parameters), Some(observations))
    }

    /// Apply `f` to every task descriptor and parameter set.
    pub fn try_map<Y, E>(
        &self,
        mut task_fn: impl FnMut(&X) -> Result<Y, E>,
        mut param_fn: impl FnMut(&X) -> Result<Y, E>,
    ) -> Result<Dataset<Y>, E> {
        let tasks = self.tasks.iter().map(&mut task_fn).collect::<Result<Vec<_>, E>>()?;
        let parameters = match &self.parameters {
            Some(p) => Some(
                p.iter()
                    .map(|per_task| per_task.iter().map(&mut param_fn).collect::<Result<Vec<_>, E>>())
                    .collect::<Result<Vec<_>, E>>()?,
            ),
            None => None,
        };
        Ok(Dataset {
            tasks,
            parameters,
            observations: self.observations.clone(),
        })
    }
}

impl DataStore {
    /// Convert into the normalized domain.
    pub fn normalize(&self, input_space: &Space, parameter_space: &Space) -> TuneResult<NormalizedData> {
        Ok(self.try_map(
            |t| input_space.transform_point(t),
            |p| parameter_space.transform_point(p),
        )?)
    }
}

impl NormalizedData {
    /// Convert back into the user-facing domain.
    pub fn denormalize(&self, input_space: &Space, parameter_space: &Space) -> TuneResult<DataStore> {
        Ok(self.try_map(
            |t| input_space.inverse_transform_point(t),
            |p| parameter_space.inverse_transform_point(p),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TuneError;
    use crate::space::Value;

    fn two_task_store() -> NormalizedData {
        NormalizedData::from_parts(
            vec![vec![0.1], vec![0.9]],
            Some(vec![vec![vec![0.2], vec![0.4]], vec![vec![0.6], vec![0.8]]]),
            Some(vec![vec![vec![3.0], vec![1.0]], vec![vec![2.0], vec![5.0]]]),
        )
        .unwrap()
    }

    fn batch_for(data: &NormalizedData, p: f64, o: f64) -> NormalizedData {
        let n = data.num_tasks();
        NormalizedData::new(data.tasks().to_vec())
            .with_parameters(vec![vec![vec![p]]; n])
            .unwrap()
            .with_observations(vec![vec![vec![o]]; n])
            .unwrap()
    }

    #[test]
    fn misaligned_lengths_are_configuration_errors() {
        let err = NormalizedData::from_parts(
            vec![vec![0.1], vec![0.9]],
            Some(vec![vec![vec![0.2]]]),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TuneError::Config(_)));

        let err = NormalizedData::from_parts(
            vec![vec![0.1]],
            Some(vec![vec![vec![0.2], vec![0.3]]]),
            Some(vec![vec![vec![1.0]]]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("2 parameter sets but 1 observations"));

        let err = NormalizedData::from_parts(vec![vec![0.1]], None, Some(vec![vec![]])).unwrap_err();
        assert!(matches!(err, TuneError::Config(_)));
    }

    #[test]
    fn merge_appends_and_keeps_alignment() {
        let data = two_task_store();
        let merged = data.merge(&batch_for(&data, 0.5, 0.5)).unwrap();

        assert_eq!(merged.samples_for(0), 3);
        assert_eq!(merged.samples_for(1), 3);
        assert_eq!(merged.total_observations(), 6);
        assert_eq!(merged.parameters().unwrap()[0][2], vec![0.5]);
        // the original snapshot is untouched
        assert_eq!(data.samples_for(0), 2);
        merged.validate().unwrap();
    }

    #[test]
    fn merge_into_task_only_store() {
        let data = NormalizedData::new(vec![vec![0.3]]);
        let merged = data.merge(&batch_for(&data, 0.1, 7.0)).unwrap();
        assert_eq!(merged.min_samples(), 1);
        assert!(merged.is_complete());
    }

    #[test]
    fn merge_rejects_foreign_tasks() {
        let data = two_task_store();
        let foreign = NormalizedData::new(vec![vec![0.1], vec![0.7]])
            .with_parameters(vec![vec![vec![0.5]]; 2])
            .unwrap()
            .with_observations(vec![vec![vec![0.5]]; 2])
            .unwrap();
        assert!(data.merge(&foreign).is_err());
    }

    #[test]
    fn merge_rejects_batch_without_observations() {
        let data = two_task_store();
        let batch = NormalizedData::new(data.tasks().to_vec())
            .with_parameters(vec![vec![vec![0.5]]; 2])
            .unwrap();
        assert!(data.merge(&batch).is_err());
    }

    #[test]
    fn best_breaks_ties_by_first_occurrence() {
        let data = NormalizedData::from_parts(
            vec![vec![0.5]],
            Some(vec![vec![vec![0.1], vec![0.2], vec![0.3], vec![0.4]]]),
            Some(vec![vec![vec![2.0], vec![f64::NAN], vec![1.0], vec![1.0]]]),
        )
        .unwrap();
        assert_eq!(data.best_index(0), Some(2));
        let (params, obs) = data.best(0).unwrap();
        assert_eq!(params, &vec![0.3]);
        assert_eq!(obs, &vec![1.0]);
    }

    #[test]
    fn normalize_round_trip() {
        let input = Space::new().add_integer("m", 1, 10);
        let params = Space::new().add_categorical("alg", ["lu", "qr"]);
        let store = DataStore::new(vec![vec![Value::Integer(4)]])
            .with_parameters(vec![vec![vec![Value::from("qr")], vec![Value::from("lu")]]])
            .unwrap()
            .with_observations(vec![vec![vec![1.0], vec![2.0]]])
            .unwrap();

        let norm = store.normalize(&input, &params).unwrap();
        assert_eq!(norm.parameters().unwrap()[0][0], vec![0.75]);
        let back = norm.denormalize(&input, &params).unwrap();
        assert_eq!(back, store);
    }

    #[test]
    fn store_serializes() {
        let store = DataStore::new(vec![vec![Value::Integer(4)]])
            .with_parameters(vec![vec![vec![Value::Real(0.5)]]])
            .unwrap()
            .with_observations(vec![vec![vec![1.5]]])
            .unwrap();
        let json = serde_json::to_string(&store).unwrap();
        let back: DataStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, store);
    }
}
