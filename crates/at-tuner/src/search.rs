//! Acquisition search: propose the next parameter set for every task.

use rand::Rng;
use tracing::{debug, warn};

use at_types::{Acquisition, NormalizedData, Point, TuneResult, TuningOptions, TuningProblem};

use crate::model::{FittedModel, Prediction};
use crate::sample::ConstrainedSampler;
use crate::TuneRng;

/// Everything a searcher may consult for one proposal round.
pub struct SearchContext<'a> {
    pub data: &'a NormalizedData,
    pub model: &'a dyn FittedModel,
    pub problem: &'a TuningProblem,
    pub sampler: &'a ConstrainedSampler,
}

/// Common trait for all acquisition searches.
pub trait Searcher: Send + Sync {
    /// Propose exactly one normalized parameter set per task, in task order.
    fn search(&self, ctx: &SearchContext<'_>, rng: &mut TuneRng) -> TuneResult<Vec<Vec<f64>>>;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Scores random feasible candidates and perturbations of the incumbent with
/// the configured acquisition, and keeps the best unseen one per task.
#[derive(Debug, Clone)]
pub struct CandidateSearch {
    acquisition: Acquisition,
    random_candidates: usize,
    local_candidates: usize,
    /// Half-width of the uniform perturbation around the incumbent.
    local_radius: f64,
}

impl CandidateSearch {
    pub fn new(acquisition: Acquisition, random_candidates: usize, local_candidates: usize) -> Self {
        Self {
            acquisition,
            random_candidates,
            local_candidates,
            local_radius: 0.1,
        }
    }

    pub fn from_options(options: &TuningOptions) -> Self {
        Self::new(
            options.acquisition,
            options.search_candidates,
            options.search_local_candidates,
        )
    }

    fn search_task(&self, ctx: &SearchContext<'_>, task: usize, rng: &mut TuneRng) -> TuneResult<Vec<f64>> {
        let problem = ctx.problem;
        let space = &problem.parameter_space;
        let task_norm = &ctx.data.tasks()[task];
        let task_orig = problem.input_space.inverse_transform_point(task_norm)?;
        let context = problem.input_space.bind(&task_orig)?;
        let predicate = problem.parameter_predicate();

        let mut candidates = ctx.sampler.sample(
            self.random_candidates,
            space,
            predicate.as_deref(),
            &context,
            rng,
        )?;

        if let Some((incumbent, _)) = ctx.data.best(task) {
            for _ in 0..self.local_candidates {
                let perturbed: Vec<f64> = incumbent
                    .iter()
                    .map(|x| (x + rng.gen_range(-self.local_radius..self.local_radius)).clamp(0.0, 1.0))
                    .collect();
                let feasible = match predicate.as_deref() {
                    Some(p) => ctx.sampler.is_feasible(space, &perturbed, p, &context)?,
                    None => true,
                };
                if feasible {
                    candidates.push(perturbed);
                }
            }
        }

        let evaluated: Vec<Point> = match ctx.data.parameters() {
            Some(p) => space.inverse_transform(&p[task])?,
            None => Vec::new(),
        };
        let best_observed = best_finite(ctx.data, task);

        let mut best_fresh: Option<(f64, Vec<f64>)> = None;
        let mut best_any: Option<(f64, Vec<f64>)> = None;
        for candidate in candidates {
            let prediction = ctx.model.predict(task, &candidate)?;
            let score = self.score(prediction, best_observed);
            let seen = evaluated.contains(&space.inverse_transform_point(&candidate)?);

            if best_any.as_ref().map_or(true, |(s, _)| score > *s) {
                best_any = Some((score, candidate.clone()));
            }
            if !seen && best_fresh.as_ref().map_or(true, |(s, _)| score > *s) {
                best_fresh = Some((score, candidate));
            }
        }

        match (best_fresh, best_any) {
            (Some((score, x)), _) => {
                debug!("Task {task}: proposing candidate with acquisition {score:.6}");
                Ok(x)
            }
            (None, Some((_, x))) => {
                warn!("Task {task}: every candidate was already evaluated, re-proposing the best one");
                Ok(x)
            }
            (None, None) => Err(at_types::model_error!("Task {task}: no candidates to score")),
        }
    }

    /// Larger is better.
    fn score(&self, prediction: Prediction, best_observed: Option<f64>) -> f64 {
        let mean = prediction.mean;
        let sigma = prediction.std_dev();
        match self.acquisition {
            Acquisition::ExpectedImprovement => match best_observed {
                Some(best) => expected_improvement(mean, sigma, best),
                None => -mean,
            },
            Acquisition::LowerConfidenceBound { kappa } => -(mean - kappa * sigma),
        }
    }
}

impl Searcher for CandidateSearch {
    fn search(&self, ctx: &SearchContext<'_>, rng: &mut TuneRng) -> TuneResult<Vec<Vec<f64>>> {
        (0..ctx.data.num_tasks())
            .map(|task| self.search_task(ctx, task, rng))
            .collect()
    }

    fn name(&self) -> &str {
        "candidate"
    }
}

fn best_finite(data: &NormalizedData, task: usize) -> Option<f64> {
    data.best(task)
        .and_then(|(_, obs)| obs.first().copied())
        .filter(|v| v.is_finite())
}

/// Expected improvement below `best` for a normal predictive distribution.
pub fn expected_improvement(mean: f64, sigma: f64, best: f64) -> f64 {
    if sigma <= 1e-12 {
        return (best - mean).max(0.0);
    }
    let z = (best - mean) / sigma;
    (best - mean) * normal_cdf(z) + sigma * normal_pdf(z)
}

fn normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Abramowitz and Stegun 7.1.26, absolute error below 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JointGp, SurrogateModel};
    use crate::sample::{LhsSampler, RandomSampler};
    use at_types::Space;
    use rand::SeedableRng;

    fn rng() -> TuneRng {
        TuneRng::seed_from_u64(11)
    }

    fn sample_problem() -> TuningProblem {
        TuningProblem::new(
            Space::new().add_real("t", 0.0, 1.0),
            Space::new().add_real("x", 0.0, 1.0),
        )
    }

    fn quadratic_data() -> NormalizedData {
        let xs = [0.0, 0.25, 0.5, 0.75, 1.0];
        let params: Vec<Vec<f64>> = xs.iter().map(|x| vec![*x]).collect();
        let obs = xs.iter().map(|x| vec![(x - 0.6f64).powi(2)]).collect();
        NormalizedData::new(vec![vec![0.5]])
            .with_parameters(vec![params])
            .unwrap()
            .with_observations(vec![obs])
            .unwrap()
    }

    #[test]
    fn normal_helpers_are_accurate() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((erf(-0.5) + erf(0.5)).abs() < 1e-12);
    }

    #[test]
    fn expected_improvement_prefers_low_mean_and_high_sigma() {
        let best = 1.0;
        assert!(expected_improvement(0.5, 0.1, best) > expected_improvement(0.9, 0.1, best));
        assert!(expected_improvement(1.0, 0.5, best) > expected_improvement(1.0, 0.1, best));
        assert_eq!(expected_improvement(2.0, 0.0, best), 0.0);
    }

    #[test]
    fn proposes_one_fresh_point_per_task_near_optimum() {
        let problem = sample_problem();
        let data = quadratic_data();
        let mut rng = rng();
        let model = JointGp::default().train(&data, &mut rng).unwrap();
        let sampler = ConstrainedSampler::new(Box::new(LhsSampler), 100);
        let ctx = SearchContext {
            data: &data,
            model: model.as_ref(),
            problem: &problem,
            sampler: &sampler,
        };

        let search = CandidateSearch::new(Acquisition::LowerConfidenceBound { kappa: 0.1 }, 128, 32);
        let proposals = search.search(&ctx, &mut rng).unwrap();
        assert_eq!(proposals.len(), 1);
        let x = proposals[0][0];
        assert!((x - 0.6).abs() < 0.2, "proposal {x} far from optimum");
        assert!(!data.parameters().unwrap()[0].contains(&proposals[0]));
    }

    #[test]
    fn proposals_respect_parameter_constraints() {
        let problem = sample_problem().with_parameter_constraint("left_half", |a| a["x"].as_f64().unwrap() < 0.4);
        let data = quadratic_data();
        let mut rng = rng();
        let model = JointGp::default().train(&data, &mut rng).unwrap();
        let sampler = ConstrainedSampler::new(Box::new(RandomSampler), 1000);
        let ctx = SearchContext {
            data: &data,
            model: model.as_ref(),
            problem: &problem,
            sampler: &sampler,
        };

        let search = CandidateSearch::from_options(&TuningOptions::default());
        for _ in 0..5 {
            let proposals = search.search(&ctx, &mut rng).unwrap();
            assert!(proposals[0][0] < 0.4);
        }
    }

    #[test]
    fn exhausted_discrete_space_reproposes() {
        let problem = TuningProblem::new(Space::new(), Space::new().add_categorical("alg", ["lu", "qr"]));
        let data = NormalizedData::new(vec![vec![]])
            .with_parameters(vec![vec![vec![0.25], vec![0.75]]])
            .unwrap()
            .with_observations(vec![vec![vec![1.0], vec![2.0]]])
            .unwrap();
        let mut rng = rng();
        let model = JointGp::default().train(&data, &mut rng).unwrap();
        let sampler = ConstrainedSampler::new(Box::new(RandomSampler), 10);
        let ctx = SearchContext {
            data: &data,
            model: model.as_ref(),
            problem: &problem,
            sampler: &sampler,
        };
        let proposals = CandidateSearch::from_options(&TuningOptions::default())
            .search(&ctx, &mut rng)
            .unwrap();
        assert_eq!(proposals.len(), 1);
    }
}
