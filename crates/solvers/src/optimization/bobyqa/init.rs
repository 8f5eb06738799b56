//! Building the first interpolation set, model, and factorization.
//!
//! The first `2n + 1` points step along the coordinate axes by `±rho_beg`
//! (one-sided next to a bound), and any further points combine two of those
//! steps. With such a simple geometry every entry of the model and of `H`
//! has a closed form, so no general update is needed.

use std::f64::consts::{FRAC_1_SQRT_2, SQRT_2};

use super::{
    Phase,
    objective::{Halt, Objective},
    solution::Status,
    state::{Limits, Workspace},
};

/// Outcome of building the initial set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum InitResult {
    Continue,
    Terminated(Status),
}

/// Evaluates the initial points and fills in `ws`.
///
/// Stops early when a value falls below the target, or when the budget runs
/// out before all points are placed.
pub(super) fn init<O: Objective>(ws: &mut Workspace, obj: &mut O, limits: &Limits) -> Result<InitResult, Halt> {
    let (n, npt) = (ws.n(), ws.npt());
    let rhobeg = ws.region.rho;
    let rhosq = rhobeg * rhobeg;
    let recip = 1.0 / rhosq;

    let mut fbeg = 0.0;
    let mut stepa = 0.0;
    let mut stepb = 0.0;

    for row in 0..npt {
        let mut pair = (0, 0);
        if row <= 2 * n {
            if (1..=n).contains(&row) {
                let c = row - 1;
                stepa = if ws.region.su[c] == 0.0 { -rhobeg } else { rhobeg };
                ws.set.xpt[[row, c]] = stepa;
            } else if row > n {
                let c = row - n - 1;
                stepa = ws.set.xpt[[row - n, c]];
                stepb = -rhobeg;
                if ws.region.sl[c] == 0.0 {
                    stepb = f64::min(2.0 * rhobeg, ws.region.su[c]);
                }
                if ws.region.su[c] == 0.0 {
                    stepb = f64::max(-2.0 * rhobeg, ws.region.sl[c]);
                }
                ws.set.xpt[[row, c]] = stepb;
            }
        } else {
            // Coordinates are 1-based here so that they double as the row
            // index of the matching axis point.
            let shift = (row - n - 1) / n;
            let mut jpt = row - shift * n - n;
            let mut ipt = jpt + shift;
            if ipt > n {
                (ipt, jpt) = (jpt, ipt - n);
            }
            ws.set.xpt[[row, ipt - 1]] = ws.set.xpt[[ipt, ipt - 1]];
            ws.set.xpt[[row, jpt - 1]] = ws.set.xpt[[jpt, jpt - 1]];
            pair = (ipt, jpt);
        }

        let x = ws.point_at(ws.set.xpt.row(row));
        let f = obj.evaluate(x.view(), Phase::Initialization)?;
        ws.set.fval[row] = f;
        if row == 0 {
            fbeg = f;
            ws.set.kopt = 0;
        } else if f < ws.set.fval[ws.set.kopt] {
            ws.set.kopt = row;
        }

        let fact = &mut ws.fact;
        if row == 0 {
            // The base point only sets `fbeg`.
        } else if row <= n {
            let c = row - 1;
            ws.model.gopt[c] = (f - fbeg) / stepa;
            if npt < row + 1 + n {
                fact.bmat[[0, c]] = -1.0 / stepa;
                fact.bmat[[row, c]] = 1.0 / stepa;
                fact.bmat[[npt + c, c]] = -0.5 * rhosq;
            }
        } else if row <= 2 * n {
            let c = row - n - 1;
            let partner = row - n;
            let temp = (f - fbeg) / stepb;
            let diff = stepb - stepa;
            ws.model.hq.set(c, c, 2.0 * (temp - ws.model.gopt[c]) / diff);
            ws.model.gopt[c] = (ws.model.gopt[c] * stepb - temp * stepa) / diff;

            if stepa * stepb < 0.0 && f < ws.set.fval[partner] {
                ws.set.fval[row] = ws.set.fval[partner];
                ws.set.fval[partner] = f;
                if ws.set.kopt == row {
                    ws.set.kopt = partner;
                }
                ws.set.xpt[[partner, c]] = stepb;
                ws.set.xpt[[row, c]] = stepa;
            }

            fact.bmat[[0, c]] = -(stepa + stepb) / (stepa * stepb);
            fact.bmat[[row, c]] = -0.5 / ws.set.xpt[[partner, c]];
            fact.bmat[[partner, c]] = -fact.bmat[[0, c]] - fact.bmat[[row, c]];
            fact.zmat[[0, c]] = SQRT_2 / (stepa * stepb);
            fact.zmat[[row, c]] = FRAC_1_SQRT_2 / rhosq;
            fact.zmat[[partner, c]] = -fact.zmat[[0, c]] - fact.zmat[[row, c]];
        } else {
            let (ipt, jpt) = pair;
            let col = row - n - 1;
            fact.zmat[[0, col]] = recip;
            fact.zmat[[row, col]] = recip;
            fact.zmat[[ipt, col]] = -recip;
            fact.zmat[[jpt, col]] = -recip;
            let temp = ws.set.xpt[[row, ipt - 1]] * ws.set.xpt[[row, jpt - 1]];
            let value = (fbeg - ws.set.fval[ipt] - ws.set.fval[jpt] + f) / temp;
            ws.model.hq.set(ipt - 1, jpt - 1, value);
        }

        if f < limits.target {
            return Ok(InitResult::Terminated(Status::TargetReached));
        }
        if row + 1 < npt && obj.evals() >= limits.max_evals {
            return Ok(InitResult::Terminated(Status::MaxEvals));
        }
    }

    ws.set.refresh_xopt();
    Ok(InitResult::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::array;

    use crate::optimization::bobyqa::{
        config::Config,
        objective::FnObjective,
        setup::{Bounds, prepare},
        tests::{initialized, interpolation_residual, wavy},
    };

    #[test]
    fn model_interpolates_initial_points() {
        for npt in [6, 8, 10] {
            let bounds = Bounds::new([-1.0, -2.0, 0.0], [3.0, 2.0, 0.5], [0.5, 0.5, 0.5]).unwrap();
            let ws = initialized(&bounds, [0.0, 1.9, 0.2], npt);
            assert!(interpolation_residual(&ws) < 1e-10, "npt = {npt}");
        }
    }

    #[test]
    fn factorization_satisfies_lagrange_conditions() {
        for npt in [5, 6, 7, 10] {
            let bounds = Bounds::unbounded([1.0, 1.0, 1.0]).unwrap();
            let ws = initialized(&bounds, [0.4, -0.2, 1.0], npt);
            assert!(ws.fact.lagrange_residual(&ws.set) < 1e-10, "npt = {npt}");
        }
    }

    #[test]
    fn best_point_is_tracked() {
        let bounds = Bounds::unbounded([1.0, 1.0]).unwrap();
        let ws = initialized(&bounds, [2.0, 2.0], 5);
        let fmin = ws.set.fval.iter().copied().fold(f64::INFINITY, f64::min);
        assert_eq!(ws.set.fopt(), fmin);
        assert_eq!(ws.set.xopt, ws.set.xpt.row(ws.set.kopt));
    }

    #[test]
    fn steps_respect_nearby_bounds() {
        // The start sits on the upper bound of the first variable.
        let bounds = Bounds::new([0.0, 0.0], [1.0, 10.0], [0.25, 1.0]).unwrap();
        let ws = initialized(&bounds, [1.0, 5.0], 5);

        for k in 0..5 {
            let row = ws.set.xpt.row(k);
            for j in 0..2 {
                assert!(row[j] >= ws.region.sl[j] && row[j] <= ws.region.su[j]);
            }
        }
        assert_eq!(ws.set.xpt.row(1), array![-1.0, 0.0]);
    }

    #[test]
    fn stops_on_target_and_budget() {
        let bounds = Bounds::unbounded([1.0, 1.0]).unwrap();
        let config = Config::new(3, None).unwrap();
        let (_, scaled) = prepare(&bounds, &[0.0, 0.0], &config).unwrap();

        let limits = Limits::new(&config, &scaled, f64::NEG_INFINITY);
        let mut ws = Workspace::new(&scaled).unwrap();
        let mut obj = FnObjective::new(wavy);
        let result = init(&mut ws, &mut obj, &limits).unwrap();
        assert_eq!(result, InitResult::Terminated(Status::MaxEvals));
        assert_eq!(obj.evals(), 3);

        let limits = Limits::new(&config, &scaled, 10.0);
        let mut ws = Workspace::new(&scaled).unwrap();
        let mut obj = FnObjective::new(wavy);
        let result = init(&mut ws, &mut obj, &limits).unwrap();
        assert_eq!(result, InitResult::Terminated(Status::TargetReached));
        assert_eq!(obj.evals(), 1);
    }
}
