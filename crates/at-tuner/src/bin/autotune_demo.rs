use std::path::PathBuf;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use at_data::{SessionSnapshot, SnapshotStore};
use at_tuner::{MlaRequest, ParallelEvaluator, Tuner};
use at_types::{Assignment, EvaluationError, Observation, Space, TuningOptions, TuningProblem, Value};

/// Synthetic solver runtime: the best block fraction drifts with the matrix
/// size and QR pays a fixed overhead.
fn solver_runtime(a: &Assignment) -> Result<Observation, EvaluationError> {
    let m = a["m"].as_f64().ok_or_else(|| EvaluationError::failed("m is not numeric"))?;
    let block = a["block"]
        .as_f64()
        .ok_or_else(|| EvaluationError::failed("block is not numeric"))?;
    let overhead = match a["alg"].as_str() {
        Some("qr") => 0.05,
        _ => 0.0,
    };
    let optimum = 0.2 + 0.6 * (m - 100.0) / 900.0;
    Ok(vec![(block - optimum).powi(2) + overhead])
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let samples: usize = std::env::var("AUTOTUNE_SAMPLES")
        .unwrap_or_else(|_| "12".to_string())
        .parse()
        .context("AUTOTUNE_SAMPLES must be a positive integer")?;
    let data_dir = std::env::var("AUTOTUNE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("autotune"));

    let problem = TuningProblem::new(
        Space::new().add_integer("m", 100, 1000),
        Space::new()
            .add_real("block", 0.0, 1.0)
            .add_categorical("alg", ["lu", "qr"]),
    )
    .with_objectives(["runtime"])
    .with_task_constraint("multiple_of_ten", |a| a["m"].as_i64().is_some_and(|m| m % 10 == 0))
    .with_parameter_constraint("block_below_cap", |a| {
        a["block"].as_f64().is_some_and(|b| b <= 0.95)
    });

    let evaluator = ParallelEvaluator::new(
        problem.input_space.clone(),
        problem.parameter_space.clone(),
        solver_runtime,
    )
    .with_threads(4)?;
    let options = TuningOptions::default().with_seed(42);
    let mut tuner = Tuner::new(problem, evaluator, options.clone())?;

    let outcome = tuner.mla(MlaRequest::new(samples).with_task_count(4))?;
    for (t, task) in outcome.data.tasks().iter().enumerate() {
        if let Some((params, obs)) = outcome.data.best(t) {
            let rendered: Vec<String> = params.iter().map(Value::to_string).collect();
            info!("Task {}: best [{}] -> {:.6}", task[0], rendered.join(", "), obs[0]);
        }
    }
    info!(
        "MLA: {} evaluations in {:.3}s ({:.3}s in objective)",
        outcome.stats.evaluations,
        outcome.stats.total_tuning_seconds,
        outcome.stats.objective_evaluation_seconds
    );

    let transfer = tuner.extrapolate(&[vec![Value::Integer(250)], vec![Value::Integer(850)]])?;
    for (params, obs) in transfer.parameters.iter().zip(&transfer.observations) {
        let rendered: Vec<String> = params.iter().map(Value::to_string).collect();
        info!("TLA1: [{}] -> {:.6}", rendered.join(", "), obs[0]);
    }

    let store = SnapshotStore::new(&data_dir)?;
    let snapshot = SessionSnapshot::new("autotune-demo", options, tuner.into_data());
    let path = store.save(&snapshot)?;
    info!("Snapshot written to {}", path.display());

    Ok(())
}
