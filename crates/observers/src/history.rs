//! Recording observer for optimization runs.

use boxmin_core::Observer;

use crate::traits::{CanStopEarly, HasObjective, HasPoint};

/// One observed evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record<const N: usize> {
    /// The point that was evaluated or attempted.
    pub x: [f64; N],

    /// The objective, or `NaN` if the evaluation failed.
    pub objective: f64,

    /// The lowest objective recorded up to and including this evaluation.
    pub best: f64,
}

/// An observer that records every evaluation and the running best objective.
///
/// Pass `&mut History` as the solver observer to inspect the records after
/// the run. An optional evaluation limit makes the observer stop the solver
/// once that many events have been recorded.
///
/// The running best is the lowest objective. For a maximization run, where
/// events carry the values being maximized, use [`History::max_objective`]
/// rather than the `best` column.
///
/// # Example
///
/// ```ignore
/// let mut history = History::<2>::new();
/// bobyqa::minimize(&model, &problem, &bounds, x0, &config, &mut history)?;
/// println!("{} evaluations, best {}", history.len(), history.best());
/// ```
#[derive(Debug, Clone, Default)]
pub struct History<const N: usize> {
    records: Vec<Record<N>>,
    limit: Option<usize>,
}

impl<const N: usize> History<N> {
    /// Creates an empty history with no evaluation limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            limit: None,
        }
    }

    /// Stops the solver once `limit` evaluations have been recorded.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn records(&self) -> &[Record<N>] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the lowest recorded objective, or `NaN` if nothing succeeded.
    #[must_use]
    pub fn best(&self) -> f64 {
        self.records.last().map_or(f64::NAN, |r| r.best)
    }

    /// Returns the highest recorded objective, or `NaN` if nothing succeeded.
    #[must_use]
    pub fn max_objective(&self) -> f64 {
        self.records.iter().map(|r| r.objective).fold(f64::NAN, f64::max)
    }

    /// Records an evaluation and returns whether the limit has been reached.
    pub fn record(&mut self, x: [f64; N], objective: f64) -> bool {
        let best = self.best().min(objective);
        self.records.push(Record { x, objective, best });
        self.limit.is_some_and(|limit| self.records.len() >= limit)
    }
}

impl<E, A, const N: usize> Observer<E, A> for History<N>
where
    E: HasObjective + HasPoint<N>,
    A: CanStopEarly,
{
    fn observe(&mut self, event: &E) -> Option<A> {
        self.record(event.point(), event.objective()).then(A::stop_early)
    }
}

/// Allows `&mut History<N>` to be passed to solvers that take an observer by
/// value, so the records can be read after the solve completes.
impl<E, A, const N: usize> Observer<E, A> for &mut History<N>
where
    E: HasObjective + HasPoint<N>,
    A: CanStopEarly,
{
    fn observe(&mut self, event: &E) -> Option<A> {
        (**self).observe(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::convert::Infallible;

    use approx::assert_relative_eq;
    use boxmin_core::{Model, OptimizationProblem};
    use boxmin_solvers::optimization::bobyqa::{self, Bounds, Config, Status};

    struct Square;

    impl Model for Square {
        type Input = [f64; 2];
        type Output = f64;
        type Error = Infallible;

        fn call(&self, x: &[f64; 2]) -> Result<f64, Self::Error> {
            Ok((x[0] - 0.5).powi(2) + (x[1] + 1.0).powi(2))
        }
    }

    struct Direct;

    impl OptimizationProblem<2> for Direct {
        type Input = [f64; 2];
        type Output = f64;
        type Error = Infallible;

        fn input(&self, x: &[f64; 2]) -> Result<[f64; 2], Self::Error> {
            Ok(*x)
        }

        fn objective(&self, _input: &[f64; 2], output: &f64) -> Result<f64, Self::Error> {
            Ok(*output)
        }
    }

    #[test]
    fn running_best_never_increases() {
        let mut history = History::<1>::new();
        for v in [3.0, 1.0, f64::NAN, 2.0, 0.5] {
            assert!(!history.record([v], v));
        }
        let best: Vec<f64> = history.records().iter().map(|r| r.best).collect();
        assert_eq!(best, vec![3.0, 1.0, 1.0, 1.0, 0.5]);
        assert_eq!(history.max_objective(), 3.0);
    }

    #[test]
    fn records_a_bobyqa_run() {
        let bounds = Bounds::unbounded([1.0, 1.0]).unwrap();
        let mut history = History::<2>::new();
        let solution = bobyqa::minimize(&Square, &Direct, &bounds, [2.0, 2.0], &Config::default(), &mut history)
            .expect("should converge");

        assert_eq!(history.len(), solution.evals);
        assert_eq!(history.best(), solution.objective);
        assert_eq!(history.records()[0].x, [2.0, 2.0]);
        assert_relative_eq!(solution.x[0], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn limit_stops_the_solver() {
        let bounds = Bounds::unbounded([1.0, 1.0]).unwrap();
        let mut history = History::<2>::new().with_limit(8);
        let solution = bobyqa::minimize(&Square, &Direct, &bounds, [2.0, 2.0], &Config::default(), &mut history)
            .expect("should stop cleanly");

        assert_eq!(solution.status, Status::StoppedByObserver);
        assert_eq!(history.len(), 8);
        assert_eq!(solution.evals, 8);
    }
}
