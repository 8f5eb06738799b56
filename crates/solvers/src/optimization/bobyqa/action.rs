/// Actions an observer can take during a BOBYQA run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Stop the solver early and return the best solution found so far.
    ///
    /// When returned after a failed evaluation before any point succeeded,
    /// the run ends with the original error instead.
    StopEarly,
}
