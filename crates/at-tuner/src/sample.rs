//! Raw draw strategies and constrained rejection sampling.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use at_types::{
    Assignment, Predicate, Space, TuneError, TuneResult, TuningProblem,
};

use crate::TuneRng;

/// Emit a progress notice every this many rejection-sampling batches.
const PROGRESS_INTERVAL: usize = 1000;

/// Unconstrained draw strategy over the normalized unit hypercube.
pub trait Sampler: Send + Sync {
    /// Draw `n` points with `space.len()` coordinates each, all in `[0, 1]`.
    fn sample(&self, n: usize, space: &Space, rng: &mut TuneRng) -> Vec<Vec<f64>>;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

// ---- Uniform ----

/// Independent uniform draws per coordinate.
#[derive(Debug, Clone, Default)]
pub struct RandomSampler;

impl Sampler for RandomSampler {
    fn sample(&self, n: usize, space: &Space, rng: &mut TuneRng) -> Vec<Vec<f64>> {
        (0..n)
            .map(|_| (0..space.len()).map(|_| rng.gen::<f64>()).collect())
            .collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Latin hypercube ----

/// Latin hypercube design: each coordinate axis is cut into `n` strata and
/// every stratum receives exactly one point, jittered inside the stratum.
#[derive(Debug, Clone, Default)]
pub struct LhsSampler;

impl Sampler for LhsSampler {
    fn sample(&self, n: usize, space: &Space, rng: &mut TuneRng) -> Vec<Vec<f64>> {
        let mut points = vec![vec![0.0; space.len()]; n];
        if n == 0 {
            return points;
        }

        let mut strata: Vec<usize> = (0..n).collect();
        for d in 0..space.len() {
            strata.shuffle(rng);
            for (point, &stratum) in points.iter_mut().zip(&strata) {
                let jitter: f64 = rng.gen();
                point[d] = (stratum as f64 + jitter) / n as f64;
            }
        }
        points
    }

    fn name(&self) -> &str {
        "lhs"
    }
}

// ---------------------------------------------------------------------------
// Constrained sampling
// ---------------------------------------------------------------------------

/// Rejection sampler over a pluggable raw draw strategy.
pub struct ConstrainedSampler {
    inner: Box<dyn Sampler>,
    max_iterations: usize,
}

impl ConstrainedSampler {
    pub fn new(inner: Box<dyn Sampler>, max_iterations: usize) -> Self {
        Self {
            inner,
            max_iterations,
        }
    }

    pub fn inner(&self) -> &dyn Sampler {
        self.inner.as_ref()
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Draw `n` normalized points from `space` that satisfy `predicate`.
    ///
    /// Each candidate is denormalized, bound to the space's dimension names,
    /// extended with `context` and handed to the predicate. Without a
    /// predicate the raw strategy is used directly. Fails with
    /// [`TuneError::ConstraintSaturation`] when `max_iterations` batches do not
    /// yield `n` valid points.
    pub fn sample(
        &self,
        n: usize,
        space: &Space,
        predicate: Option<&Predicate>,
        context: &Assignment,
        rng: &mut TuneRng,
    ) -> TuneResult<Vec<Vec<f64>>> {
        let Some(predicate) = predicate else {
            return Ok(self.inner.sample(n, space, rng));
        };

        let mut accepted = Vec::with_capacity(n);
        let mut iterations = 0;
        while accepted.len() < n && iterations < self.max_iterations {
            for candidate in self.inner.sample(n, space, rng) {
                if self.is_feasible(space, &candidate, predicate, context)? {
                    accepted.push(candidate);
                    if accepted.len() >= n {
                        break;
                    }
                }
            }

            iterations += 1;
            if iterations % PROGRESS_INTERVAL == 0 {
                info!(
                    "Constrained sampling: {} of {} valid samples after {} iterations, still trying",
                    accepted.len(),
                    n,
                    iterations
                );
            }
        }

        if accepted.len() < n {
            return Err(TuneError::ConstraintSaturation {
                found: accepted.len(),
                requested: n,
            });
        }
        debug!("Drew {} constrained samples in {} iterations", n, iterations);
        Ok(accepted)
    }

    /// Whether a normalized point satisfies `predicate` once denormalized.
    pub fn is_feasible(
        &self,
        space: &Space,
        point: &[f64],
        predicate: &Predicate,
        context: &Assignment,
    ) -> TuneResult<bool> {
        let original = space.inverse_transform_point(point)?;
        let mut assignment = space.bind(&original)?;
        for (name, value) in context {
            assignment.insert(name.clone(), value.clone());
        }
        Ok(predicate(&assignment))
    }

    /// Draw `n` feasible task descriptors from the Input Space.
    pub fn sample_inputs(
        &self,
        n: usize,
        problem: &TuningProblem,
        rng: &mut TuneRng,
    ) -> TuneResult<Vec<Vec<f64>>> {
        let predicate = problem.task_predicate();
        self.sample(
            n,
            &problem.input_space,
            predicate.as_deref(),
            &Assignment::new(),
            rng,
        )
    }

    /// Draw `n` feasible parameter sets for every normalized task.
    ///
    /// Each task is denormalized and its named values are bound into the
    /// predicate context, so parameter constraints can depend on the task.
    pub fn sample_parameters(
        &self,
        n: usize,
        tasks: &[Vec<f64>],
        problem: &TuningProblem,
        rng: &mut TuneRng,
    ) -> TuneResult<Vec<Vec<Vec<f64>>>> {
        let predicate = problem.parameter_predicate();
        tasks
            .iter()
            .map(|task| {
                let task_orig = problem.input_space.inverse_transform_point(task)?;
                let context = problem.input_space.bind(&task_orig)?;
                self.sample(n, &problem.parameter_space, predicate.as_deref(), &context, rng)
            })
            .collect()
    }
}

impl std::fmt::Debug for ConstrainedSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstrainedSampler")
            .field("inner", &self.inner.name())
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use at_types::Value;
    use rand::SeedableRng;

    fn rng() -> TuneRng {
        TuneRng::seed_from_u64(42)
    }

    fn sample_space() -> Space {
        Space::new().add_real("x", 0.0, 10.0).add_integer("k", 1, 4)
    }

    #[test]
    fn lhs_fills_every_stratum() {
        let space = sample_space();
        let n = 8;
        let points = LhsSampler.sample(n, &space, &mut rng());
        assert_eq!(points.len(), n);
        for d in 0..space.len() {
            let mut strata: Vec<usize> = points
                .iter()
                .map(|p| (p[d] * n as f64).floor() as usize)
                .collect();
            strata.sort_unstable();
            assert_eq!(strata, (0..n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn raw_draws_stay_in_unit_interval() {
        let space = sample_space();
        let mut rng = rng();
        let samplers: [&dyn Sampler; 2] = [&LhsSampler, &RandomSampler];
        for sampler in samplers {
            for p in sampler.sample(64, &space, &mut rng) {
                assert!(p.iter().all(|x| (0.0..=1.0).contains(x)), "{} drew {p:?}", sampler.name());
                space.inverse_transform_point(&p).unwrap();
            }
        }
    }

    #[test]
    fn random_sampler_stays_in_unit_cube() {
        let points = RandomSampler.sample(100, &sample_space(), &mut rng());
        assert_eq!(points.len(), 100);
        assert!(points.iter().flatten().all(|x| (0.0..1.0).contains(x)));
    }

    #[test]
    fn unconstrained_sampling_delegates() {
        let sampler = ConstrainedSampler::new(Box::new(RandomSampler), 1);
        let points = sampler
            .sample(7, &sample_space(), None, &Assignment::new(), &mut rng())
            .unwrap();
        assert_eq!(points.len(), 7);
    }

    #[test]
    fn constrained_points_satisfy_predicate() {
        let space = sample_space();
        let sampler = ConstrainedSampler::new(Box::new(LhsSampler), 1000);
        let predicate = |a: &Assignment| a["x"].as_f64().unwrap() < 2.5 && a["k"] != Value::Integer(4);

        let points = sampler
            .sample(20, &space, Some(&predicate), &Assignment::new(), &mut rng())
            .unwrap();
        assert_eq!(points.len(), 20);
        for p in &points {
            assert!(sampler.is_feasible(&space, p, &predicate, &Assignment::new()).unwrap());
        }
    }

    #[test]
    fn always_false_predicate_saturates() {
        let space = sample_space();
        let sampler = ConstrainedSampler::new(Box::new(RandomSampler), 3);
        let never = |_: &Assignment| false;
        let err = sampler
            .sample(5, &space, Some(&never), &Assignment::new(), &mut rng())
            .unwrap_err();
        match err {
            TuneError::ConstraintSaturation { found, requested } => {
                assert_eq!(found, 0);
                assert_eq!(requested, 5);
            }
            other => panic!("Expected ConstraintSaturation, got {other:?}"),
        }
        assert!(err_message(3).contains("only 0 valid samples"));
    }

    fn err_message(max_iterations: usize) -> String {
        let sampler = ConstrainedSampler::new(Box::new(RandomSampler), max_iterations);
        let never = |_: &Assignment| false;
        sampler
            .sample(5, &sample_space(), Some(&never), &Assignment::new(), &mut rng())
            .unwrap_err()
            .to_string()
    }

    #[test]
    fn sample_parameters_binds_task_context() {
        let problem = TuningProblem::new(
            Space::new().add_integer("m", 1, 8),
            Space::new().add_integer("mb", 1, 8),
        )
        .with_parameter_constraint("mb_le_m", |a| {
            a["mb"].as_i64().unwrap() <= a["m"].as_i64().unwrap()
        });
        let tasks = problem
            .input_space
            .transform(&[vec![Value::Integer(2)], vec![Value::Integer(6)]])
            .unwrap();

        let sampler = ConstrainedSampler::new(Box::new(LhsSampler), 1000);
        let per_task = sampler.sample_parameters(5, &tasks, &problem, &mut rng()).unwrap();
        assert_eq!(per_task.len(), 2);

        for (limit, points) in [2, 6].iter().zip(&per_task) {
            assert_eq!(points.len(), 5);
            for p in problem.parameter_space.inverse_transform(points).unwrap() {
                assert!(p[0].as_i64().unwrap() <= *limit);
            }
        }
    }

    #[test]
    fn sample_inputs_uses_task_constraints() {
        let problem = TuningProblem::new(
            Space::new().add_integer("m", 1, 100),
            Space::new().add_real("x", 0.0, 1.0),
        )
        .with_task_constraint("even", |a| a["m"].as_i64().unwrap() % 2 == 0);
        let sampler = ConstrainedSampler::new(Box::new(RandomSampler), 100);
        let tasks = sampler.sample_inputs(10, &problem, &mut rng()).unwrap();
        for t in problem.input_space.inverse_transform(&tasks).unwrap() {
            assert_eq!(t[0].as_i64().unwrap() % 2, 0);
        }
    }
}
