//! BOBYQA: bound-constrained optimization by quadratic approximation.
//!
//! # Algorithm
//!
//! BOBYQA keeps a set of `npt` interpolation points (by default `2n + 1`)
//! and a quadratic model that matches the objective at all of them. The
//! remaining freedom in the model is taken up by keeping the change of the
//! Hessian as small as possible in the Frobenius norm. Each iteration
//! minimizes the model inside a trust region intersected with the box,
//! evaluates the objective there, and swaps the new point into the set.
//!
//! Two radii drive the search. `delta` is the trust-region radius and adapts
//! to how well the model predicted each step. `rho` is a lower bound on
//! `delta` that only ever shrinks, from its initial value down to `rho_end`.
//! When points drift too far from the best one, a geometry step replaces the
//! farthest point with one chosen to keep the interpolation well posed.
//!
//! All internal work happens in scaled coordinates in which each free
//! variable's initial step has length one.
//!
//! # When to Use
//!
//! BOBYQA is appropriate when:
//! - The objective is smooth but derivatives are unavailable
//! - Every evaluation is expensive compared to a few dense linear algebra
//!   updates of size `npt + n`
//! - Variables have simple bounds that must never be violated
//!
//! # Limitations
//!
//! - **Local only**: converges to a local minimum near the start point
//! - **Moderate dimension**: memory and per-iteration work grow with
//!   `(npt + n)²`
//! - **Single variable**: with one free variable a bracketing line search
//!   runs instead, since a quadratic model brings nothing there
//!
//! # Observer Events
//!
//! The solver emits one [`Event`] per evaluation:
//!
//! - [`Event::Evaluated`] — evaluation succeeded
//! - [`Event::ModelFailed`] — model returned an error
//! - [`Event::ProblemFailed`] — problem returned an error (input or objective)
//!
//! Each event includes `best`, the best point before this evaluation, and
//! successful evaluations carry the [`Phase`] that requested them.
//!
//! Observers can return [`Action::StopEarly`] to halt immediately. The run
//! then ends with [`Status::StoppedByObserver`] and the best point so far.

mod action;
mod altmov;
mod config;
mod engine;
mod error;
mod event;
mod factor;
mod init;
mod interp;
mod line;
mod numeric;
mod objective;
mod point;
mod quadratic;
mod rescue;
mod search;
mod setup;
mod solution;
mod state;
mod trsbox;
mod update;


pub use action::Action;
pub use config::{Config, ConfigError};
pub use error::Error;
pub use event::{Event, Phase};
pub use point::Point;
pub use setup::{Bounds, SetupError};
pub use solution::{Solution, Status};

use boxmin_core::{Model, Observer, OptimizationProblem};

use search::search;

/// Finds a minimum of the objective inside `bounds`, starting from `x0`.
///
/// The observer receives an [`Event`] for each evaluation.
/// See the [module docs](self) for details on phases and observer actions.
///
/// # Errors
///
/// Returns an error if the setup is invalid, the workspace cannot be
/// allocated, or the model or problem fails during evaluation and the
/// observer does not stop the run.
pub fn minimize<M, P, Obs, const N: usize>(
    model: &M,
    problem: &P,
    bounds: &Bounds<N>,
    x0: [f64; N],
    config: &Config,
    observer: Obs,
) -> Result<Solution<M::Input, M::Output, N>, Error>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
    Obs: for<'a> Observer<Event<'a, M, P, N>, Action>,
{
    search(model, problem, bounds, x0, config, observer, |v| v)
}

/// Finds a minimum of the objective without observer support.
///
/// This is a convenience wrapper around [`minimize`] that uses a no-op observer.
///
/// # Errors
///
/// Returns an error if the setup is invalid, the workspace cannot be
/// allocated, or the model or problem fails during evaluation.
pub fn minimize_unobserved<M, P, const N: usize>(
    model: &M,
    problem: &P,
    bounds: &Bounds<N>,
    x0: [f64; N],
    config: &Config,
) -> Result<Solution<M::Input, M::Output, N>, Error>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
{
    minimize(model, problem, bounds, x0, config, ())
}

/// Finds a maximum of the objective inside `bounds`, starting from `x0`.
///
/// Objectives in events and in the returned [`Solution`] are the values
/// being maximized. A configured target is reached once an objective rises
/// above it.
///
/// # Errors
///
/// Returns an error if the setup is invalid, the workspace cannot be
/// allocated, or the model or problem fails during evaluation and the
/// observer does not stop the run.
pub fn maximize<M, P, Obs, const N: usize>(
    model: &M,
    problem: &P,
    bounds: &Bounds<N>,
    x0: [f64; N],
    config: &Config,
    observer: Obs,
) -> Result<Solution<M::Input, M::Output, N>, Error>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
    Obs: for<'a> Observer<Event<'a, M, P, N>, Action>,
{
    search(model, problem, bounds, x0, config, observer, |v| -v)
}

/// Finds a maximum of the objective without observer support.
///
/// This is a convenience wrapper around [`maximize`] that uses a no-op observer.
///
/// # Errors
///
/// Returns an error if the setup is invalid, the workspace cannot be
/// allocated, or the model or problem fails during evaluation.
pub fn maximize_unobserved<M, P, const N: usize>(
    model: &M,
    problem: &P,
    bounds: &Bounds<N>,
    x0: [f64; N],
    config: &Config,
) -> Result<Solution<M::Input, M::Output, N>, Error>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
{
    maximize(model, problem, bounds, x0, config, ())
}
