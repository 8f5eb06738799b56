//! Bracketing line search for problems with one free variable.
//!
//! A quadratic model needs at least two dimensions to be worth the
//! bookkeeping, so a single free variable is handled by bracketing a
//! minimum (`f1 > f2 < f3`) with steps that double in length, then
//! shrinking the bracket with safeguarded parabolic interpolation.

use ndarray::aview1;

use super::{
    Phase,
    objective::{Halt, Objective},
    setup::ScaledProblem,
    solution::Status,
    state::Limits,
};

/// Relative distance kept between a trial point and the bracket points.
const TAU: f64 = 0.1;

/// Why the search stopped between two evaluations.
enum Exit {
    Done(Status),
    Halt(Halt),
}

impl From<Halt> for Exit {
    fn from(halt: Halt) -> Self {
        Self::Halt(halt)
    }
}

/// Minimizes over the single scaled variable of `scaled`.
///
/// The best point is recorded by the objective, so only the reason for
/// stopping is returned.
pub(super) fn minimize<O: Objective>(obj: &mut O, scaled: &ScaledProblem, limits: &Limits) -> Result<Status, Halt> {
    log::debug!("bobyqa: one free variable, using a bracketing line search");
    match search(obj, scaled, limits) {
        Ok(status) | Err(Exit::Done(status)) => Ok(status),
        Err(Exit::Halt(halt)) => Err(halt),
    }
}

fn probe<O: Objective>(obj: &mut O, limits: &Limits, p: f64) -> Result<f64, Exit> {
    if obj.evals() >= limits.max_evals {
        return Err(Exit::Done(Status::MaxEvals));
    }
    let f = obj.evaluate(aview1(&[p]), Phase::LineSearch)?;
    if f < limits.target {
        return Err(Exit::Done(Status::TargetReached));
    }
    // NaN ranks above every value so the bracket stays ordered.
    Ok(if f.is_nan() { f64::INFINITY } else { f })
}

/// Status for a bracket that has shrunk below `rho_end`.
fn converged<O: Objective>(obj: &O, limits: &Limits) -> Status {
    if obj.evals() >= limits.max_evals {
        Status::MaxEvals
    } else {
        Status::ParameterTolerance
    }
}

fn search<O: Objective>(obj: &mut O, scaled: &ScaledProblem, limits: &Limits) -> Result<Status, Exit> {
    let (begin, end) = (scaled.lower[0], scaled.upper[0]);
    let rho_end = limits.rho_end;

    let mut p2 = scaled.x0[0];
    let mut f2 = probe(obj, limits, p2)?;
    let mut p1 = (p2 - 1.0).max(begin);
    let mut p3 = (p2 + 1.0).min(end);
    let mut f1 = probe(obj, limits, p1)?;
    let mut f3 = probe(obj, limits, p3)?;
    if p2 == p1 || p2 == p3 {
        p2 = 0.5 * (p1 + p3);
        f2 = probe(obj, limits, p2)?;
    }

    // Expand or shift until the middle value is the lowest.
    let mut jump = 1.0;
    while !(f1 > f2 && f2 < f3) {
        if p3 - p1 < rho_end {
            return Ok(converged(obj, limits));
        }
        if f1 < f3 {
            if p1 == begin || (f1 == f2 && end - begin < jump) {
                (p3, f3) = (p2, f2);
                p2 = 0.5 * (p1 + p2);
                f2 = probe(obj, limits, p2)?;
            } else {
                (p3, f3) = (p2, f2);
                (p2, f2) = (p1, f1);
                p1 = (p1 - jump).max(begin);
                f1 = probe(obj, limits, p1)?;
                jump *= 2.0;
            }
        } else if p3 == end || (f2 == f3 && end - begin < jump) {
            (p1, f1) = (p2, f2);
            p2 = 0.5 * (p3 + p2);
            f2 = probe(obj, limits, p2)?;
        } else {
            (p1, f1) = (p2, f2);
            (p2, f2) = (p3, f3);
            p3 = (p3 + jump).min(end);
            f3 = probe(obj, limits, p3)?;
            jump *= 2.0;
        }
    }
    log::trace!("bobyqa: bracket [{p1}, {p3}] around {p2}");

    while p3 - p1 > rho_end {
        let p = trial_point(p1, p2, p3, f1, f2, f3);
        let f = probe(obj, limits, p)?;
        if p < p2 {
            if f1 > f && f < f2 {
                (p3, f3) = (p2, f2);
                (p2, f2) = (p, f);
            } else {
                (p1, f1) = (p, f);
            }
        } else if f2 > f && f < f3 {
            (p1, f1) = (p2, f2);
            (p2, f2) = (p, f);
        } else {
            (p3, f3) = (p, f);
        }
    }
    Ok(converged(obj, limits))
}

/// The next point to evaluate inside the bracket `p1 < p2 < p3`.
fn trial_point(p1: f64, p2: f64, p3: f64, f1: f64, f2: f64, f3: f64) -> f64 {
    // Minimizer of the parabola through the three points.
    let num = f1 * (p3 * p3 - p2 * p2) + f2 * (p1 * p1 - p3 * p3) + f3 * (p2 * p2 - p1 * p1);
    let den = 2.0 * (f1 * (p3 - p2) + f2 * (p1 - p3) + f3 * (p2 - p1));
    let vertex = num / den;
    let mut p = if den == 0.0 || !vertex.is_finite() {
        p2
    } else {
        vertex.clamp(p1, p3)
    };

    if p < p2 {
        let gap = (p2 - p1) * TAU;
        if (p1 - p).abs() < gap {
            p = p1 + gap;
        } else if (p2 - p).abs() < gap {
            p = p2 - gap;
        }
    } else {
        let gap = (p3 - p2) * TAU;
        if (p2 - p).abs() < gap {
            p = p2 + gap;
        } else if (p3 - p).abs() < gap {
            p = p3 - gap;
        }
    }

    // Bisect the longer side when the bracket is badly lopsided.
    let ratio = (p1 - p2).abs() / (p2 - p3).abs();
    if !(ratio < 100.0 && ratio > 0.01) {
        if ratio > 1.0 && p > p2 {
            p = 0.5 * (p1 + p2);
        } else if p < p2 {
            p = 0.5 * (p2 + p3);
        }
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::ArrayView1;

    use crate::optimization::bobyqa::{
        config::Config,
        objective::FnObjective,
        setup::{Bounds, prepare},
    };

    /// Runs the search and returns the status, best point, and evaluation count.
    fn run(
        lower: f64,
        upper: f64,
        x0: f64,
        config: &Config,
        target: f64,
        f: impl Fn(f64) -> f64,
    ) -> (Status, f64, usize) {
        let bounds = Bounds::new([lower], [upper], [1.0]).unwrap();
        let (_, scaled) = prepare(&bounds, &[x0], config).unwrap();
        let limits = Limits::new(config, &scaled, target);

        let mut best = (f64::INFINITY, f64::NAN);
        let mut obj = FnObjective::new(|x: ArrayView1<'_, f64>| {
            let value = f(x[0]);
            if value < best.0 {
                best = (value, x[0]);
            }
            value
        });
        let status = minimize(&mut obj, &scaled, &limits).unwrap();
        let evals = obj.evals();
        drop(obj);
        (status, best.1, evals)
    }

    #[test]
    fn finds_interior_minimum() {
        let config = Config::default();
        let (status, x, _) = run(-5.0, 5.0, 2.0, &config, f64::NEG_INFINITY, |x| (x - 0.3).powi(2));
        assert_eq!(status, Status::ParameterTolerance);
        assert_relative_eq!(x, 0.3, epsilon = 1e-6);
    }

    #[test]
    fn walks_down_to_a_bound() {
        let config = Config::default();
        let (status, x, _) = run(-1.0, 4.0, 2.0, &config, f64::NEG_INFINITY, |x| x);
        assert_eq!(status, Status::ParameterTolerance);
        assert_eq!(x, -1.0);
    }

    #[test]
    fn respects_budget() {
        let config = Config::new(5, None).unwrap();
        let (status, _, evals) = run(-5.0, 5.0, 2.0, &config, f64::NEG_INFINITY, |x| (x - 0.3).powi(2));
        assert_eq!(status, Status::MaxEvals);
        assert_eq!(evals, 5);
    }

    #[test]
    fn stops_at_target() {
        let config = Config::default();
        let (status, x, evals) = run(-5.0, 5.0, 2.0, &config, 1.0, |x| (x - 0.3).powi(2));
        assert_eq!(status, Status::TargetReached);
        assert_eq!(evals, 2);
        assert_eq!(x, 1.0);
    }

    #[test]
    fn nan_values_bound_the_bracket() {
        let config = Config::default();
        let (status, x, evals) = run(-2.0, 2.0, 0.4, &config, f64::NEG_INFINITY, |x| {
            if x > 0.9 { f64::NAN } else { (x - 0.25).powi(2) }
        });
        assert_eq!(status, Status::ParameterTolerance);
        assert_relative_eq!(x, 0.25, epsilon = 1e-6);
        assert!(evals < 200, "used {evals} evaluations");
    }

    #[test]
    fn budget_spent_on_the_last_step_is_reported() {
        let f = |x: f64| (x - 0.3).powi(2);
        let (status, _, evals) = run(-5.0, 5.0, 2.0, &Config::default(), f64::NEG_INFINITY, f);
        assert_eq!(status, Status::ParameterTolerance);

        let exact = Config::new(evals, None).unwrap();
        let (status, _, used) = run(-5.0, 5.0, 2.0, &exact, f64::NEG_INFINITY, f);
        assert_eq!(status, Status::MaxEvals);
        assert_eq!(used, evals);
    }

    #[test]
    fn lopsided_bracket_is_bisected() {
        let p = trial_point(0.0, 0.001, 1.0, 1.0, 0.0, 1e6);
        assert_relative_eq!(p, 0.5005, epsilon = 1e-12);
    }
}
