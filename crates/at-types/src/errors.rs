use thiserror::Error;

/// Main error type for the Autotune system
#[derive(Error, Debug)]
pub enum TuneError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(
        "Constraint saturation: only {found} valid samples were generated while {requested} were requested; \
         consider increasing sample_max_iterations or relaxing the constraints"
    )]
    ConstraintSaturation { found: usize, requested: usize },

    #[error("Evaluation failure: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Space error: {0}")]
    Space(#[from] SpaceError),

    #[error("Model error: {0}")]
    Model(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors raised while converting between the user-facing and normalized domains
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpaceError {
    #[error("Point has {found} coordinates, space has {expected} dimensions")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Value {value} is outside the domain of dimension {dimension}")]
    OutOfDomain { dimension: String, value: String },

    #[error("Dimension {dimension} expects a {expected} value, got {found}")]
    KindMismatch {
        dimension: String,
        expected: &'static str,
        found: String,
    },

    #[error("Unknown category {value} for dimension {dimension}")]
    UnknownCategory { dimension: String, value: String },

    #[error("Invalid bounds for dimension {dimension}: {message}")]
    InvalidBounds { dimension: String, message: String },

    #[error("Normalized coordinate {value} of dimension {dimension} is not finite")]
    NonFiniteCoordinate { dimension: String, value: f64 },
}

/// Errors surfaced by objective evaluation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Objective evaluation failed: {message}")]
    Failed { message: String },

    #[error("Evaluator returned {found} results for task {task}, expected {expected}")]
    ShapeMismatch {
        task: usize,
        expected: usize,
        found: usize,
    },

    #[error("Evaluator returned results for {found} tasks, expected {expected}")]
    TaskCountMismatch { expected: usize, found: usize },

    #[error("Objective returned {found} values for task {task}, the problem declares {expected} objectives")]
    ObjectiveCountMismatch {
        task: usize,
        expected: usize,
        found: usize,
    },

    #[error("Evaluator thread pool could not be built: {message}")]
    ThreadPool { message: String },
}

impl EvaluationError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Result type alias for Autotune operations
pub type TuneResult<T> = Result<T, TuneError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Config(format!($($arg)*))
    };
}

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Validation(format!($($arg)*))
    };
}

/// Macro for creating model errors
#[macro_export]
macro_rules! model_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Model(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturation_reports_counts() {
        let error = TuneError::ConstraintSaturation {
            found: 0,
            requested: 5,
        };
        let text = error.to_string();
        assert!(text.contains("only 0 valid samples"));
        assert!(text.contains("5 were requested"));
    }

    #[test]
    fn evaluation_error_converts() {
        let tune_error: TuneError = EvaluationError::failed("worker crashed").into();
        match tune_error {
            TuneError::Evaluation(EvaluationError::Failed { message }) => {
                assert_eq!(message, "worker crashed")
            }
            other => panic!("Expected Evaluation error, got {other:?}"),
        }
    }

    #[test]
    fn test_macros() {
        let config_err = config_error!("Missing required count: {}", "task_count");
        assert!(matches!(config_err, TuneError::Config(_)));
        let validation_err = validation_error!("Invalid value: {}", 42);
        assert!(matches!(validation_err, TuneError::Validation(_)));
        let model_err = model_error!("singular kernel");
        assert!(matches!(model_err, TuneError::Model(_)));
    }
}
