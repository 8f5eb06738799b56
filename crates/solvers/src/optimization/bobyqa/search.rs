use boxmin_core::{Model, Observer, OptimizationProblem, Snapshot};
use ndarray::ArrayView1;

use crate::optimization::evaluate::evaluate;

use super::{
    Action, Config, Error, Event, Phase, Point, Solution, engine, line,
    objective::{Halt, Objective},
    setup::{Bounds, FreeParameterMap, prepare},
    solution::Status,
    state::{Limits, Workspace},
};

/// Core BOBYQA driver shared by minimization and maximization.
///
/// The `transform` function maps caller objectives onto the scale
/// that gets minimized (identity or negation). Events and the returned
/// solution keep the caller's sign.
pub(super) fn search<M, P, Obs, F, const N: usize>(
    model: &M,
    problem: &P,
    bounds: &Bounds<N>,
    x0: [f64; N],
    config: &Config,
    observer: Obs,
    transform: F,
) -> Result<Solution<M::Input, M::Output, N>, Error>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
    Obs: for<'a> Observer<Event<'a, M, P, N>, Action>,
    F: Fn(f64) -> f64,
{
    let (map, scaled) = prepare(bounds, &x0, config)?;
    let target = config.target().map_or(f64::NEG_INFINITY, &transform);
    let limits = Limits::new(config, &scaled, target);

    let mut tracker = Tracker {
        model,
        problem,
        map: &map,
        observer,
        transform: &transform,
        evals: 0,
        best: None,
    };

    let outcome = if map.len() == 1 {
        line::minimize(&mut tracker, &scaled, &limits)
    } else {
        let mut ws = Workspace::new(&scaled)?;
        engine::run(&mut ws, &mut tracker, &limits)
    };

    let status = match outcome {
        Ok(status) => status,
        Err(Halt::Stopped) => Status::StoppedByObserver,
        Err(Halt::Failed(error)) => return Err(error),
    };

    let evals = tracker.evals;
    let best = tracker.best.ok_or(Error::NoSuccessfulEvaluation)?;
    log::debug!(
        "bobyqa: {status} after {evals} evaluations, best objective {}",
        best.point.objective
    );

    Ok(Solution {
        status,
        x: best.point.x,
        objective: best.point.objective,
        snapshot: best.snapshot,
        evals,
    })
}

/// The lowest transformed objective seen so far.
struct Best<I, O, const N: usize> {
    point: Point<N>,
    value: f64,
    snapshot: Snapshot<I, O>,
}

/// Bridges the kernels to the caller's model, problem, and observer.
///
/// Every evaluation is mapped to full caller coordinates, reported to the
/// observer, and compared against the best point so far.
struct Tracker<'r, M, P, Obs, F, const N: usize>
where
    M: Model,
{
    model: &'r M,
    problem: &'r P,
    map: &'r FreeParameterMap<N>,
    observer: Obs,
    transform: &'r F,
    evals: usize,
    best: Option<Best<M::Input, M::Output, N>>,
}

impl<M, P, Obs, F, const N: usize> Objective for Tracker<'_, M, P, Obs, F, N>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
    Obs: for<'a> Observer<Event<'a, M, P, N>, Action>,
    F: Fn(f64) -> f64,
{
    fn evaluate(&mut self, x: ArrayView1<'_, f64>, phase: Phase) -> Result<f64, Halt> {
        self.evals += 1;
        let full = self.map.to_full(x);
        let best = self.best.as_ref().map(|b| b.point);

        match evaluate(self.model, self.problem, full) {
            Ok(eval) => {
                let point = Point::from(&eval);
                let event = Event::Evaluated {
                    point,
                    input: &eval.snapshot.input,
                    output: &eval.snapshot.output,
                    best,
                    phase,
                };
                let action = self.observer.observe(&event);

                let value = (self.transform)(eval.objective);
                let improved = self
                    .best
                    .as_ref()
                    .is_none_or(|b| value < b.value || b.value.is_nan());
                if improved {
                    self.best = Some(Best {
                        point,
                        value,
                        snapshot: eval.snapshot,
                    });
                }

                match action {
                    Some(Action::StopEarly) => Err(Halt::Stopped),
                    None => Ok(value),
                }
            }
            Err(e) => match Event::emit_failure(full, best, &e, &mut self.observer) {
                Some(Action::StopEarly) if best.is_some() => Err(Halt::Stopped),
                Some(Action::StopEarly) | None => Err(Halt::Failed(e.into())),
            },
        }
    }

    fn evals(&self) -> usize {
        self.evals
    }
}
