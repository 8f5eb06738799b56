/// Defines an objective to be minimized (or maximized) over `N` variables.
///
/// A problem turns the solver vector `x` into a model input, and after the
/// model has run, reduces the input/output pair to one scalar objective.
/// Keeping the mapping separate from the model lets one model serve several
/// problems, for example by pinning some inputs and exposing others.
///
/// Bound-constrained solvers only ever pass points that satisfy the bounds
/// they were given, so `input` may assume that.
pub trait OptimizationProblem<const N: usize> {
    type Input;
    type Output;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Builds the model input for the solver variables `x`.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if no valid input corresponds to `x`.
    fn input(&self, x: &[f64; N]) -> Result<Self::Input, Self::Error>;

    /// Scores a model input/output pair.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the objective cannot be computed.
    fn objective(&self, input: &Self::Input, output: &Self::Output) -> Result<f64, Self::Error>;
}
