//! Capability traits for cross-solver observers.
//!
//! These traits abstract over solver-specific event and action types, so an
//! observer written against them works with any solver that implements them.
//!
//! # Event traits
//!
//! - [`HasObjective`] — events that carry an objective value
//! - [`HasPoint`] — events that carry the evaluated (or attempted) point
//!
//! # Action traits
//!
//! - [`CanStopEarly`] — actions that can signal early termination
//!
//! # Example
//!
//! ```rust
//! use boxmin_core::Observer;
//! use boxmin_observers::traits::{CanStopEarly, HasObjective};
//!
//! struct GoodEnough {
//!     threshold: f64,
//! }
//!
//! impl<E: HasObjective, A: CanStopEarly> Observer<E, A> for GoodEnough {
//!     fn observe(&mut self, event: &E) -> Option<A> {
//!         (event.objective() < self.threshold).then(A::stop_early)
//!     }
//! }
//! ```

use boxmin_core::{Model, OptimizationProblem};

use boxmin_solvers::optimization::bobyqa;

/// An event that carries an objective value.
pub trait HasObjective {
    /// Returns the objective for this event.
    ///
    /// Returns `f64::NAN` when the event represents an error and no objective
    /// is available.
    fn objective(&self) -> f64;
}

/// An event tied to one point of an `N`-dimensional search.
pub trait HasPoint<const N: usize> {
    /// Returns the point that was evaluated or attempted.
    fn point(&self) -> [f64; N];
}

/// An action type that can signal early termination.
pub trait CanStopEarly {
    /// Returns the action that stops the solver early.
    fn stop_early() -> Self;
}

// --- bobyqa::Event ---

impl<M, P, const N: usize> HasObjective for bobyqa::Event<'_, M, P, N>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
{
    fn objective(&self) -> f64 {
        match self {
            bobyqa::Event::Evaluated { point, .. } => point.objective,
            bobyqa::Event::ModelFailed { .. } | bobyqa::Event::ProblemFailed { .. } => f64::NAN,
        }
    }
}

impl<M, P, const N: usize> HasPoint<N> for bobyqa::Event<'_, M, P, N>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
{
    fn point(&self) -> [f64; N] {
        self.x()
    }
}

// --- bobyqa::Action ---

impl CanStopEarly for bobyqa::Action {
    fn stop_early() -> Self {
        Self::StopEarly
    }
}
