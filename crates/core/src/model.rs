/// A deterministic computation from a typed input to a typed output.
///
/// Solvers treat a model as a black box: they build inputs through a problem
/// definition, call the model, and hand the output back to the problem to
/// score it. The same input must always produce the same output, otherwise a
/// derivative-free solver cannot build a consistent surrogate.
pub trait Model {
    type Input;
    type Output;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Runs the model on `input`.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] when the model cannot produce an output.
    fn call(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// The input and output of one model call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot<I, O> {
    pub input: I,
    pub output: O,
}

impl<I, O> Snapshot<I, O> {
    /// Captures an input/output pair.
    pub fn new(input: I, output: O) -> Self {
        Self { input, output }
    }
}
