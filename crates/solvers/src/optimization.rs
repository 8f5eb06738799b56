//! Solvers that minimize or maximize a scalar objective.
//!
//! An [`OptimizationProblem`] turns solver variables `x: [f64; N]` into a
//! model input, the [`Model`] runs, and the problem scores the result. The
//! solvers here only ever look at the score, never at a gradient.
//!
//! # Solvers
//!
//! - [`bobyqa`] — trust-region search over a box using quadratic interpolation
//!   models, for smooth objectives of two or more variables (a bracketing line
//!   search handles the single-variable case)
//!
//! [`Model`]: boxmin_core::Model
//! [`OptimizationProblem`]: boxmin_core::OptimizationProblem

mod evaluate;

pub use evaluate::{EvalError, EvaluateResult, Evaluation, evaluate};

pub mod bobyqa;
