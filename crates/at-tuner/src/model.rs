//! Gaussian-process surrogate models.
//!
//! [`SurrogateModel`] is the pluggable training strategy; each call to
//! [`SurrogateModel::train`] produces a fresh [`FittedModel`] from the current
//! normalized snapshot. Nothing is carried over between fits.

use std::f64::consts::PI;

use rand::Rng;
use tracing::debug;

use at_types::{model_error, NormalizedData, TuneResult, TuningOptions};

use crate::linalg::Cholesky;
use crate::TuneRng;

/// Predictive distribution of the objective at one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub mean: f64,
    pub variance: f64,
}

impl Prediction {
    pub fn std_dev(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }
}

/// Training strategy for a surrogate of the objective.
pub trait SurrogateModel: Send + Sync {
    /// Fit to every task of `data` jointly or per task, depending on the strategy.
    fn train(&self, data: &NormalizedData, rng: &mut TuneRng) -> TuneResult<Box<dyn FittedModel>>;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// A model fitted to one snapshot.
pub trait FittedModel: Send + Sync {
    /// Predict the first objective for normalized parameters `x` of task `task`.
    fn predict(&self, task: usize, x: &[f64]) -> TuneResult<Prediction>;

    fn num_tasks(&self) -> usize;

    fn name(&self) -> &str;
}

impl std::fmt::Debug for dyn FittedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FittedModel")
            .field("name", &self.name())
            .field("num_tasks", &self.num_tasks())
            .finish()
    }
}

/// Hyperparameter search settings shared by the GP strategies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpConfig {
    /// Random (length scale, noise) candidates tried besides the default.
    pub restarts: usize,
    /// Jitter added to the kernel diagonal.
    pub nugget: f64,
}

impl GpConfig {
    pub fn from_options(options: &TuningOptions) -> Self {
        Self {
            restarts: options.model_restarts,
            nugget: options.model_nugget,
        }
    }
}

impl Default for GpConfig {
    fn default() -> Self {
        Self::from_options(&TuningOptions::default())
    }
}

// ---------------------------------------------------------------------------
// Single-output GP
// ---------------------------------------------------------------------------

const DEFAULT_LENGTH_SCALE: f64 = 0.5;
const DEFAULT_NOISE: f64 = 1e-4;
const LENGTH_SCALE_RANGE: (f64, f64) = (0.05, 3.0);
const NOISE_RANGE: (f64, f64) = (1e-8, 1e-1);

/// Gaussian process regression with an isotropic squared-exponential kernel.
///
/// Targets are standardized before fitting. The length scale and noise level
/// are picked by maximizing the log marginal likelihood over a default pair
/// and `restarts` random log-uniform draws.
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    x: Vec<Vec<f64>>,
    alpha: Vec<f64>,
    chol: Cholesky,
    length_scale: f64,
    y_mean: f64,
    y_scale: f64,
    log_likelihood: f64,
}

impl GaussianProcess {
    pub fn fit(x: &[Vec<f64>], y: &[f64], config: GpConfig, rng: &mut TuneRng) -> TuneResult<Self> {
        if x.is_empty() {
            return Err(model_error!("Cannot fit a Gaussian process to zero observations"));
        }
        if x.len() != y.len() {
            return Err(model_error!(
                "{} inputs but {} targets",
                x.len(),
                y.len()
            ));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(model_error!("Targets must be finite"));
        }

        let n = y.len() as f64;
        let y_mean = y.iter().sum::<f64>() / n;
        let var = y.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>() / n;
        let y_scale = if var.sqrt() > 1e-12 { var.sqrt() } else { 1.0 };
        let y_std: Vec<f64> = y.iter().map(|v| (v - y_mean) / y_scale).collect();

        let mut candidates = vec![(DEFAULT_LENGTH_SCALE, DEFAULT_NOISE)];
        for _ in 0..config.restarts {
            candidates.push((
                log_uniform(rng, LENGTH_SCALE_RANGE),
                log_uniform(rng, NOISE_RANGE),
            ));
        }

        let mut best: Option<Self> = None;
        for (length_scale, noise) in candidates {
            let Some(gp) = Self::fit_fixed(x, &y_std, length_scale, noise + config.nugget, y_mean, y_scale) else {
                continue;
            };
            if best.as_ref().map_or(true, |b| gp.log_likelihood > b.log_likelihood) {
                best = Some(gp);
            }
        }

        let gp = best.ok_or_else(|| model_error!("Kernel matrix is singular for every hyperparameter candidate"))?;
        debug!(
            "GP fitted on {} points: length_scale={:.4}, log_likelihood={:.4}",
            x.len(),
            gp.length_scale,
            gp.log_likelihood
        );
        Ok(gp)
    }

    fn fit_fixed(
        x: &[Vec<f64>],
        y_std: &[f64],
        length_scale: f64,
        noise: f64,
        y_mean: f64,
        y_scale: f64,
    ) -> Option<Self> {
        let n = x.len();
        let mut k = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..=i {
                let v = rbf(&x[i], &x[j], length_scale);
                k[i * n + j] = v;
                k[j * n + i] = v;
            }
            k[i * n + i] += noise;
        }

        let chol = Cholesky::factor(&k, n)?;
        let alpha = chol.solve(y_std);
        let fit_term: f64 = y_std.iter().zip(&alpha).map(|(a, b)| a * b).sum();
        let log_likelihood = -0.5 * fit_term - 0.5 * chol.log_det() - 0.5 * n as f64 * (2.0 * PI).ln();
        if !log_likelihood.is_finite() {
            return None;
        }

        Some(Self {
            x: x.to_vec(),
            alpha,
            chol,
            length_scale,
            y_mean,
            y_scale,
            log_likelihood,
        })
    }

    /// Noiseless predictive mean and variance at `x`.
    pub fn predict(&self, x: &[f64]) -> Prediction {
        let k_star: Vec<f64> = self.x.iter().map(|xi| rbf(xi, x, self.length_scale)).collect();
        let mean_std: f64 = k_star.iter().zip(&self.alpha).map(|(a, b)| a * b).sum();
        let v = self.chol.solve_lower(&k_star);
        let var_std = (1.0 - v.iter().map(|a| a * a).sum::<f64>()).max(1e-12);
        Prediction {
            mean: self.y_mean + self.y_scale * mean_std,
            variance: var_std * self.y_scale * self.y_scale,
        }
    }

    pub fn length_scale(&self) -> f64 {
        self.length_scale
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

fn rbf(a: &[f64], b: &[f64], length_scale: f64) -> f64 {
    let d2: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    (-0.5 * d2 / (length_scale * length_scale)).exp()
}

fn log_uniform(rng: &mut TuneRng, (low, high): (f64, f64)) -> f64 {
    rng.gen_range(low.ln()..high.ln()).exp()
}

/// Training rows for one task: normalized parameters paired with the first
/// objective. Non-finite observations are dropped.
fn finite_rows(data: &NormalizedData, task: usize) -> (Vec<&Vec<f64>>, Vec<f64>) {
    let (Some(params), Some(obs)) = (data.parameters(), data.observations()) else {
        return (Vec::new(), Vec::new());
    };
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for (p, o) in params[task].iter().zip(&obs[task]) {
        match o.first() {
            Some(v) if v.is_finite() => {
                xs.push(p);
                ys.push(*v);
            }
            _ => debug!("Dropping non-finite observation for task {task}"),
        }
    }
    (xs, ys)
}

// ---------------------------------------------------------------------------
// Multi-task strategies
// ---------------------------------------------------------------------------

/// One GP over concatenated `[task ++ parameters]` inputs.
///
/// Tasks with nearby descriptors share statistical strength through the
/// kernel; a single fit sees every task's data.
#[derive(Debug, Clone, Default)]
pub struct JointGp {
    config: GpConfig,
}

impl JointGp {
    pub fn new(config: GpConfig) -> Self {
        Self { config }
    }
}

impl SurrogateModel for JointGp {
    fn train(&self, data: &NormalizedData, rng: &mut TuneRng) -> TuneResult<Box<dyn FittedModel>> {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for (t, task) in data.tasks().iter().enumerate() {
            let (params, values) = finite_rows(data, t);
            for p in params {
                let mut row = task.clone();
                row.extend_from_slice(p);
                xs.push(row);
            }
            ys.extend(values);
        }

        let gp = GaussianProcess::fit(&xs, &ys, self.config, rng)?;
        Ok(Box::new(FittedJointGp {
            tasks: data.tasks().to_vec(),
            gp,
        }))
    }

    fn name(&self) -> &str {
        "gp_joint"
    }
}

#[derive(Debug)]
struct FittedJointGp {
    tasks: Vec<Vec<f64>>,
    gp: GaussianProcess,
}

impl FittedModel for FittedJointGp {
    fn predict(&self, task: usize, x: &[f64]) -> TuneResult<Prediction> {
        let descriptor = self
            .tasks
            .get(task)
            .ok_or_else(|| model_error!("Task {task} is not part of the fitted data"))?;
        let mut row = descriptor.clone();
        row.extend_from_slice(x);
        Ok(self.gp.predict(&row))
    }

    fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    fn name(&self) -> &str {
        "gp_joint"
    }
}

/// One GP per task, over parameters only.
#[derive(Debug, Clone, Default)]
pub struct IndependentGp {
    config: GpConfig,
}

impl IndependentGp {
    pub fn new(config: GpConfig) -> Self {
        Self { config }
    }
}

impl SurrogateModel for IndependentGp {
    fn train(&self, data: &NormalizedData, rng: &mut TuneRng) -> TuneResult<Box<dyn FittedModel>> {
        let mut models = Vec::with_capacity(data.num_tasks());
        for t in 0..data.num_tasks() {
            let (params, values) = finite_rows(data, t);
            let xs: Vec<Vec<f64>> = params.into_iter().cloned().collect();
            models.push(GaussianProcess::fit(&xs, &values, self.config, rng)?);
        }
        Ok(Box::new(FittedIndependentGp { models }))
    }

    fn name(&self) -> &str {
        "gp_independent"
    }
}

#[derive(Debug)]
struct FittedIndependentGp {
    models: Vec<GaussianProcess>,
}

impl FittedModel for FittedIndependentGp {
    fn predict(&self, task: usize, x: &[f64]) -> TuneResult<Prediction> {
        let gp = self
            .models
            .get(task)
            .ok_or_else(|| model_error!("Task {task} is not part of the fitted data"))?;
        Ok(gp.predict(x))
    }

    fn num_tasks(&self) -> usize {
        self.models.len()
    }

    fn name(&self) -> &str {
        "gp_independent"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> TuneRng {
        TuneRng::seed_from_u64(7)
    }

    fn quadratic_data(tasks: &[f64], points: usize) -> NormalizedData {
        let params: Vec<Vec<Vec<f64>>> = tasks
            .iter()
            .map(|_| (0..points).map(|i| vec![i as f64 / (points - 1) as f64]).collect())
            .collect();
        let obs = tasks
            .iter()
            .zip(&params)
            .map(|(t, ps)| ps.iter().map(|p| vec![(p[0] - t).powi(2)]).collect())
            .collect();
        NormalizedData::new(tasks.iter().map(|t| vec![*t]).collect())
            .with_parameters(params)
            .unwrap()
            .with_observations(obs)
            .unwrap()
    }

    #[test]
    fn gp_interpolates_training_points() {
        let xs: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64 / 5.0]).collect();
        let ys: Vec<f64> = xs.iter().map(|x| (3.0 * x[0]).sin()).collect();
        let gp = GaussianProcess::fit(&xs, &ys, GpConfig::default(), &mut rng()).unwrap();

        for (x, y) in xs.iter().zip(&ys) {
            let pred = gp.predict(x);
            assert!((pred.mean - y).abs() < 0.1, "{} vs {}", pred.mean, y);
            assert!(pred.variance >= 0.0);
        }
        let far = gp.predict(&[0.5]);
        assert!((far.mean - 1.5f64.sin()).abs() < 0.3);
    }

    #[test]
    fn variance_grows_away_from_data() {
        let xs = vec![vec![0.0], vec![0.1], vec![0.2]];
        let ys = vec![1.0, 2.0, 1.5];
        let gp = GaussianProcess::fit(&xs, &ys, GpConfig::default(), &mut rng()).unwrap();
        assert!(gp.predict(&[1.0]).variance > gp.predict(&[0.1]).variance);
    }

    #[test]
    fn constant_targets_do_not_break_fit() {
        let xs = vec![vec![0.2], vec![0.8]];
        let gp = GaussianProcess::fit(&xs, &[4.0, 4.0], GpConfig::default(), &mut rng()).unwrap();
        assert!((gp.predict(&[0.5]).mean - 4.0).abs() < 1e-6);
    }

    #[test]
    fn gp_rejects_empty_or_non_finite_data() {
        assert!(GaussianProcess::fit(&[], &[], GpConfig::default(), &mut rng()).is_err());
        let err = GaussianProcess::fit(&[vec![0.0]], &[f64::NAN], GpConfig::default(), &mut rng());
        assert!(err.is_err());
    }

    #[test]
    fn joint_model_predicts_per_task() {
        let data = quadratic_data(&[0.2, 0.8], 6);
        let model = JointGp::default().train(&data, &mut rng()).unwrap();
        assert_eq!(model.num_tasks(), 2);

        let low = model.predict(0, &[0.2]).unwrap();
        let high = model.predict(0, &[0.8]).unwrap();
        assert!(low.mean < high.mean);
        let other = model.predict(1, &[0.8]).unwrap();
        assert!(other.mean < model.predict(1, &[0.2]).unwrap().mean);
        assert!(model.predict(5, &[0.5]).is_err());
    }

    #[test]
    fn independent_model_skips_non_finite_rows() {
        let data = NormalizedData::new(vec![vec![0.5]])
            .with_parameters(vec![vec![vec![0.1], vec![0.5], vec![0.9]]])
            .unwrap()
            .with_observations(vec![vec![vec![1.0], vec![f64::INFINITY], vec![3.0]]])
            .unwrap();
        let model = IndependentGp::default().train(&data, &mut rng()).unwrap();
        let pred = model.predict(0, &[0.1]).unwrap();
        assert!(pred.mean.is_finite());
        assert_eq!(model.name(), "gp_independent");
    }
}
