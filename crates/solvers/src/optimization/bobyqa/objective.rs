use ndarray::ArrayView1;

use super::{Error, Phase};

/// Why an objective call did not return a value.
#[derive(Debug)]
pub(super) enum Halt {
    /// An observer asked the run to stop.
    Stopped,

    /// The model or problem failed and nobody recovered.
    Failed(Error),
}

/// The objective in scaled free coordinates, as the kernels call it.
pub(super) trait Objective {
    /// Evaluates the objective at the scaled point `x`.
    fn evaluate(&mut self, x: ArrayView1<'_, f64>, phase: Phase) -> Result<f64, Halt>;

    /// Number of evaluations made so far, failed ones included.
    fn evals(&self) -> usize;
}

/// A closure-backed objective for exercising the kernels directly.
#[cfg(test)]
pub(super) struct FnObjective<F> {
    f: F,
    evals: usize,
}

#[cfg(test)]
impl<F: FnMut(ArrayView1<'_, f64>) -> f64> FnObjective<F> {
    pub(super) fn new(f: F) -> Self {
        Self { f, evals: 0 }
    }
}

#[cfg(test)]
impl<F: FnMut(ArrayView1<'_, f64>) -> f64> Objective for FnObjective<F> {
    fn evaluate(&mut self, x: ArrayView1<'_, f64>, _phase: Phase) -> Result<f64, Halt> {
        self.evals += 1;
        Ok((self.f)(x))
    }

    fn evals(&self) -> usize {
        self.evals
    }
}
