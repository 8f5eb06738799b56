use boxmin_core::{Model, Observer, OptimizationProblem};

use crate::optimization::evaluate::EvalError;

use super::{Action, Point};

/// The stage of the algorithm that asked for an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Building the first interpolation set.
    Initialization,

    /// A step from the trust-region subproblem.
    TrustRegion,

    /// A step chosen to improve the geometry of the interpolation set.
    Alternative,

    /// A replacement point placed while rebuilding the factorization.
    Rescue,

    /// The bracketing search used when only one variable is free.
    LineSearch,
}

/// Events emitted by the BOBYQA solver, one per objective evaluation.
///
/// Each event carries `best`, the lowest-objective point seen before this
/// evaluation (`None` until something has succeeded). Objectives are always
/// reported in the caller's sign, so a maximization run shows the values
/// being maximized.
pub enum Event<'a, M, P, const N: usize>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
{
    /// Successful evaluation.
    Evaluated {
        /// The evaluated point (x and objective).
        point: Point<N>,

        /// The model input at this point.
        input: &'a M::Input,

        /// The model output at this point.
        output: &'a M::Output,

        /// The best point before this evaluation.
        best: Option<Point<N>>,

        /// The stage that requested the evaluation.
        phase: Phase,
    },

    /// Model evaluation failed.
    ModelFailed {
        /// The point where evaluation failed.
        x: [f64; N],

        /// The best point so far.
        best: Option<Point<N>>,

        /// The model error.
        error: &'a M::Error,
    },

    /// Problem method failed (input construction or objective computation).
    ProblemFailed {
        /// The point where evaluation failed.
        x: [f64; N],

        /// The best point so far.
        best: Option<Point<N>>,

        /// The problem error.
        error: &'a P::Error,
    },
}

impl<M, P, const N: usize> Event<'_, M, P, N>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
{
    /// Returns the point that was evaluated (or attempted).
    #[must_use]
    pub fn x(&self) -> [f64; N] {
        match self {
            Self::Evaluated { point, .. } => point.x,
            Self::ModelFailed { x, .. } | Self::ProblemFailed { x, .. } => *x,
        }
    }

    /// Returns the best point seen before this event.
    #[must_use]
    pub fn best(&self) -> Option<Point<N>> {
        match self {
            Self::Evaluated { best, .. }
            | Self::ModelFailed { best, .. }
            | Self::ProblemFailed { best, .. } => *best,
        }
    }

    /// Emits a failure event and returns the observer's action.
    pub(super) fn emit_failure<Obs>(
        x: [f64; N],
        best: Option<Point<N>>,
        error: &EvalError<M::Error, P::Error>,
        observer: &mut Obs,
    ) -> Option<Action>
    where
        Obs: for<'a> Observer<Event<'a, M, P, N>, Action>,
    {
        match error {
            EvalError::Model(e) => {
                let event = Event::ModelFailed { x, best, error: e };
                observer.observe(&event)
            }
            EvalError::Problem(e) => {
                let event = Event::ProblemFailed { x, best, error: e };
                observer.observe(&event)
            }
        }
    }
}
