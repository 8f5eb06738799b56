use std::fmt;

use boxmin_core::Snapshot;

/// Why the solver stopped.
///
/// Every status comes with the best point found; [`Status::is_failure`]
/// marks the ones where that point is only the best available, not a
/// converged answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// An objective value fell below the configured target.
    TargetReached,

    /// An improving step changed the objective by less than `f_abs_tol`.
    AbsoluteFunctionTolerance,

    /// An improving step changed the objective by less than `f_rel_tol`
    /// relative to its magnitude.
    RelativeFunctionTolerance,

    /// The trust region shrank to its final radius.
    ParameterTolerance,

    /// The evaluation budget ran out.
    MaxEvals,

    /// Rounding errors prevent further progress.
    RoundoffLimited,

    /// The model data became non-finite and could not be recovered.
    Failed,

    /// An observer asked the solver to stop.
    StoppedByObserver,
}

impl Status {
    /// Returns `true` for stops caused by numerical trouble.
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::RoundoffLimited | Self::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::TargetReached => "requested function value reached",
            Self::AbsoluteFunctionTolerance => "absolute function tolerance reached",
            Self::RelativeFunctionTolerance => "relative function tolerance reached",
            Self::ParameterTolerance => "parameter tolerance reached",
            Self::MaxEvals => "maximum number of function evaluations reached",
            Self::RoundoffLimited => "round-off limited",
            Self::Failed => "generic failure",
            Self::StoppedByObserver => "stopped by observer",
        };
        f.write_str(message)
    }
}

/// The result of a BOBYQA run.
#[derive(Debug, Clone)]
pub struct Solution<I, O, const N: usize> {
    /// Final solver status.
    pub status: Status,

    /// Best point found, fixed variables included.
    pub x: [f64; N],

    /// Objective value at `x`, in the caller's sign.
    pub objective: f64,

    /// Snapshot at `x`.
    pub snapshot: Snapshot<I, O>,

    /// Objective evaluations made, failed ones included.
    pub evals: usize,
}
