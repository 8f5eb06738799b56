//! Core traits and types shared by the boxmin solvers and observers.
//!
//! - [`Model`] — a fallible callable mapping a typed input to a typed output
//! - [`Snapshot`] — the input/output pair captured from one model call
//! - [`Observer`] — watches solver events and may return a control action
//! - [`OptimizationProblem`] — adapts a solver vector to a model input and
//!   reduces the model's output to a scalar objective

mod model;
mod observer;
mod problems;

pub use model::{Model, Snapshot};
pub use observer::Observer;
pub use problems::OptimizationProblem;
