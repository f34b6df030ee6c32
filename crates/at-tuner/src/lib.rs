//! # at-tuner
//!
//! Multi-task learning autotuning (MLA) and transfer learning to new tasks
//! (TLA1) for black-box objectives.
//!
//! A [`Tuner`] couples a [`at_types::TuningProblem`] with an [`Evaluator`] and
//! the strategies named in [`at_types::TuningOptions`]: a constrained sampler
//! for initial designs, a surrogate model and an acquisition search. All
//! strategies work on the normalized unit hypercube; the tuner converts at the
//! evaluator boundary.

mod evaluator;
mod linalg;
mod model;
mod registry;
mod sample;
mod search;
mod transfer;
mod tuner;

pub use evaluator::{Evaluator, FnEvaluator, Objective, ParallelEvaluator};
pub use linalg::Cholesky;
pub use model::{
    FittedModel, GaussianProcess, GpConfig, IndependentGp, JointGp, Prediction, SurrogateModel,
};
pub use registry::{ModelFactory, SamplerFactory, SearcherFactory, Strategies, StrategyRegistry};
pub use sample::{ConstrainedSampler, LhsSampler, RandomSampler, Sampler};
pub use search::{expected_improvement, CandidateSearch, SearchContext, Searcher};
pub use transfer::{TransferExtrapolator, TransferOutcome, EXTRAPOLATION_EPSILON};
pub use tuner::{MlaOutcome, MlaRequest, Tuner, TuningStats};

/// Random number generator threaded through every stochastic strategy.
pub type TuneRng = rand_chacha::ChaCha8Rng;
