//! Rebuilding the factorization when round-off has spoilt it.
//!
//! The base point moves to `xopt` and the factorization is rebuilt from
//! scratch for a set of provisional points along the coordinate axes, where
//! it has a closed form. The original points are then swapped back in one
//! at a time, nearest first, as long as each swap has a safe denominator.
//! Provisional points that are never swapped out get evaluated and join the
//! model through their Lagrange functions.

use std::f64::consts::SQRT_2;

use ndarray::Array1;

use super::{
    Phase,
    factor::LagrangeValues,
    objective::{Halt, Objective},
    solution::Status,
    state::{Limits, Workspace},
    update::update_factorization,
};

/// Outcome of a rescue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RescueResult {
    Rebuilt,
    Terminated(Status),
}

/// What row `k` of the factorization currently describes.
#[derive(Debug, Clone, PartialEq)]
enum Slot {
    /// The interpolation point stored in `xpt`.
    Original,

    /// A provisional point at this offset from `xopt`.
    Provisional(Array1<f64>),
}

/// Rebuilds `bmat` and `zmat` for the current points, evaluating
/// replacements for any that cannot be kept.
///
/// On return `xopt` is the origin of the new base point, but `kopt` may
/// point elsewhere if a replacement improved on it; the caller refreshes
/// `xopt` and shifts the gradient.
pub(super) fn rescue<O: Objective>(ws: &mut Workspace, obj: &mut O, limits: &Limits) -> Result<RescueResult, Halt> {
    let fbase = ws.set.fopt();
    let mut dist = recentre(ws);
    let winc = dist.fold(0.0_f64, |m, &d| m.max(d));

    let mut slots = provisional_set(ws);
    if exchange(ws, &mut slots, &mut dist, winc) {
        return Ok(checked(ws));
    }

    for kpt in 0..ws.npt() {
        let Slot::Provisional(p) = slots[kpt].clone() else {
            continue;
        };
        if obj.evals() >= limits.max_evals {
            return Ok(RescueResult::Terminated(Status::MaxEvals));
        }

        let old = ws.set.xpt.row(kpt).to_owned();
        ws.model.fold_point(kpt, old.view());
        ws.set.xpt.row_mut(kpt).assign(&p);

        // The gradient is still taken at the origin.
        let vquad = fbase + ws.model.predicted_change(&ws.set.xpt, p.view());

        let x = ws.point_at(p.view());
        let f = obj.evaluate(x.view(), Phase::Rescue)?;
        ws.set.fval[kpt] = f;
        if f < ws.set.fopt() {
            ws.set.kopt = kpt;
        }
        if f < limits.target {
            return Ok(RescueResult::Terminated(Status::TargetReached));
        }

        let diff = f - vquad;
        ws.model.gopt.scaled_add(diff, &ws.fact.bmat.row(kpt));
        let zk = ws.fact.zmat.row(kpt).to_owned();
        for (k, slot) in slots.iter().enumerate() {
            let temp = diff * ws.fact.zmat.row(k).dot(&zk);
            match slot {
                Slot::Original => ws.model.pq[k] += temp,
                Slot::Provisional(q) => ws.model.hq.add_outer(temp, q.view()),
            }
        }
        slots[kpt] = Slot::Original;
    }

    Ok(checked(ws))
}

fn checked(ws: &Workspace) -> RescueResult {
    if ws.fact.is_finite() && ws.model.is_finite() {
        RescueResult::Rebuilt
    } else {
        RescueResult::Terminated(Status::Failed)
    }
}

/// Moves `xbase` onto `xopt`, keeping the model's second derivatives, and
/// clears the factorization.
///
/// Returns the squared distance of every point from `xopt`.
fn recentre(ws: &mut Workspace) -> Array1<f64> {
    let n = ws.n();
    let xopt = ws.set.xopt.clone();
    let sumpq = ws.model.pq.sum();

    for mut row in ws.set.xpt.rows_mut() {
        row -= &xopt;
    }
    let dist: Array1<f64> = ws.set.xpt.rows().into_iter().map(|r| r.dot(&r)).collect();

    let mut w = &xopt * (0.5 * sumpq);
    for (k, row) in ws.set.xpt.outer_iter().enumerate() {
        w.scaled_add(ws.model.pq[k], &row);
    }
    for j in 0..n {
        for i in 0..=j {
            ws.model.hq.add(i, j, w[i] * xopt[j] + w[j] * xopt[i]);
        }
    }

    ws.set.xbase += &xopt;
    ws.region.sl -= &xopt;
    ws.region.su -= &xopt;
    ws.set.xopt.fill(0.0);
    ws.set.xoptsq = 0.0;
    ws.fact.bmat.fill(0.0);
    ws.fact.zmat.fill(0.0);
    dist
}

/// Chooses the provisional points and writes their factorization.
///
/// Row 0 is the origin, rows `1..=n` and `n+1..=2n` step along each axis
/// (the second step only where there is room for it in `npt`), and any
/// further rows combine steps along two axes.
fn provisional_set(ws: &mut Workspace) -> Vec<Slot> {
    let (n, npt) = (ws.n(), ws.npt());
    let delta = ws.region.delta;
    let fact = &mut ws.fact;

    let steps: Vec<(f64, f64)> = (0..n)
        .map(|j| {
            let mut p = delta.min(ws.region.su[j]);
            let mut q = (-delta).max(ws.region.sl[j]);
            if p + q < 0.0 {
                (p, q) = (q, p);
            }
            if q.abs() < 0.5 * p.abs() {
                q = 0.5 * p;
            }
            (p, q)
        })
        .collect();

    let axis = |j: usize, v: f64| {
        let mut x = Array1::zeros(n);
        x[j] = v;
        x
    };

    let mut slots = vec![Slot::Provisional(Array1::zeros(n)); npt];
    for (j, &(p, q)) in steps.iter().enumerate() {
        let jp = j + 1;
        let jpn = jp + n;
        slots[jp] = Slot::Provisional(axis(j, p));
        if jpn < npt {
            slots[jpn] = Slot::Provisional(axis(j, q));
            let temp = 1.0 / (p - q);
            fact.bmat[[jp, j]] = -temp + 1.0 / p;
            fact.bmat[[jpn, j]] = temp + 1.0 / q;
            fact.bmat[[0, j]] = -fact.bmat[[jp, j]] - fact.bmat[[jpn, j]];
            let z0 = SQRT_2 / (p * q).abs();
            fact.zmat[[0, j]] = z0;
            fact.zmat[[jp, j]] = z0 * q * temp;
            fact.zmat[[jpn, j]] = -z0 * p * temp;
        } else {
            fact.bmat[[0, j]] = -1.0 / p;
            fact.bmat[[jp, j]] = 1.0 / p;
            fact.bmat[[j + npt, j]] = -0.5 * p * p;
        }
    }

    for (k, slot) in slots.iter_mut().enumerate().skip(2 * n + 1) {
        // Axes are 1-based here so that they double as row indices.
        let kk = k - n;
        let iw = ((kk as f64 - 0.5) / n as f64) as usize;
        let ip = kk - iw * n;
        let mut iq = ip + iw;
        if iq > n {
            iq -= n;
        }
        let (p, q) = (steps[ip - 1].0, steps[iq - 1].0);
        let mut x = axis(ip - 1, p);
        x[iq - 1] += q;
        *slot = Slot::Provisional(x);

        let temp = 1.0 / (p * q);
        let col = kk - 1;
        fact.zmat[[0, col]] = temp;
        fact.zmat[[ip, col]] = -temp;
        fact.zmat[[iq, col]] = -temp;
        fact.zmat[[k, col]] = temp;
    }
    slots
}

/// Swaps original points back in for provisional ones.
///
/// `dist` holds squared distances from `xopt`; an entry is zero once its
/// point is back and negative while its swap is deferred. Returns `true`
/// when every original point was reinstated.
fn exchange(ws: &mut Workspace, slots: &mut [Slot], dist: &mut Array1<f64>, winc: f64) -> bool {
    let npt = ws.npt();
    let kopt = ws.set.kopt;
    let mut kold = 0;
    let mut knew = kopt;
    let mut pending: Option<(LagrangeValues, f64)> = None;
    let mut nrem = npt;

    loop {
        swap_rows(ws, kold, knew);
        let moved = std::mem::replace(&mut slots[knew], Slot::Original);
        if kold != knew {
            slots[kold] = moved;
        }
        dist[knew] = 0.0;
        nrem -= 1;

        if let Some((mut lag, denom)) = pending.take() {
            lag.vlag.swap(kold, knew);
            update_factorization(&mut ws.fact, lag.vlag.view(), lag.beta, denom, knew);
            if nrem == 0 {
                return true;
            }
            dist.mapv_inplace(f64::abs);
        }

        // Nearest remaining original point whose swap has a safe denominator.
        let chosen = loop {
            let Some(k) = dist
                .iter()
                .enumerate()
                .filter(|(_, d)| **d > 0.0)
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(k, _)| k)
            else {
                break None;
            };

            let xk = ws.set.xpt.row(k).to_owned();
            let w: Array1<f64> = slots
                .iter()
                .enumerate()
                .map(|(j, slot)| {
                    let sum = match slot {
                        _ if j == kopt => 0.0,
                        Slot::Original => xk.dot(&ws.set.xpt.row(j)),
                        Slot::Provisional(p) => xk.dot(p),
                    };
                    0.5 * sum * sum
                })
                .collect();
            let distsq = xk.dot(&xk);
            let lag = ws
                .fact
                .weighted_values(w.view(), xk.view(), kopt, 0.5 * distsq * distsq);

            let mut denom = 0.0;
            let mut vlmxsq: f64 = 0.0;
            let mut candidate = None;
            for (j, slot) in slots.iter().enumerate() {
                if matches!(slot, Slot::Provisional(_)) {
                    let den = lag.beta * ws.fact.hdiag(j) + lag.vlag[j] * lag.vlag[j];
                    if den > denom {
                        denom = den;
                        candidate = Some(j);
                    }
                }
                vlmxsq = vlmxsq.max(lag.vlag[j] * lag.vlag[j]);
            }
            match candidate {
                Some(j) if denom > 0.01 * vlmxsq => break Some((k, j, lag, denom)),
                _ => dist[k] = -dist[k] - winc,
            }
        };

        let Some((k, j, lag, denom)) = chosen else {
            return false;
        };
        knew = k;
        kold = j;
        pending = Some((lag, denom));
    }
}

/// Exchanges rows `a` and `b` of `zmat` and of the leading block of `bmat`.
fn swap_rows(ws: &mut Workspace, a: usize, b: usize) {
    if a == b {
        return;
    }
    for mut column in ws.fact.bmat.columns_mut() {
        column.swap(a, b);
    }
    for mut column in ws.fact.zmat.columns_mut() {
        column.swap(a, b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::optimization::bobyqa::{
        config::Config,
        objective::FnObjective,
        setup::{Bounds, prepare},
        tests::{initialized, interpolation_residual, replace_point, wavy},
    };

    fn limits(ws: &Workspace) -> Limits {
        Limits {
            max_evals: 1000,
            target: f64::NEG_INFINITY,
            f_abs_tol: 0.0,
            f_rel_tol: 0.0,
            rho_end: 1e-8 * ws.region.rho,
        }
    }

    fn settle(ws: &mut Workspace, kbase: usize) {
        ws.set.refresh_xopt();
        if ws.set.kopt != kbase {
            let xopt = ws.set.xopt.clone();
            ws.model.shift_gradient(&ws.set.xpt, xopt.view(), true);
        }
    }

    #[test]
    fn healthy_set_is_rebuilt_without_evaluations() {
        let bounds = Bounds::unbounded([1.0, 1.0, 1.0]).unwrap();
        let mut ws = initialized(&bounds, [0.3, -0.2, 0.1], 7);
        replace_point(&mut ws, ndarray::array![0.4, 0.2, -0.3].view());
        let before: Vec<f64> = ws.set.fval.to_vec();

        let mut obj = FnObjective::new(wavy);
        let kbase = ws.set.kopt;
        let lim = limits(&ws);
        let result = rescue(&mut ws, &mut obj, &lim).unwrap();
        settle(&mut ws, kbase);

        assert_eq!(result, RescueResult::Rebuilt);
        assert_eq!(obj.evals(), 0);
        assert_eq!(ws.set.fval.to_vec(), before);
        assert!(ws.fact.lagrange_residual(&ws.set) < 1e-8);
        assert!(interpolation_residual(&ws) < 1e-8);
    }

    #[test]
    fn duplicated_point_is_replaced_by_an_evaluation() {
        let bounds = Bounds::unbounded([1.0, 1.0]).unwrap();
        let mut ws = initialized(&bounds, [0.0, 0.0], 6);
        let kopt = ws.set.kopt;
        let (a, b) = {
            let mut others = (0..ws.npt()).filter(|&k| k != kopt);
            (others.next().unwrap(), others.next().unwrap())
        };

        // Point b collapses onto point a, keeping the model unchanged.
        let old = ws.set.xpt.row(b).to_owned();
        ws.model.fold_point(b, old.view());
        let copy = ws.set.xpt.row(a).to_owned();
        ws.set.xpt.row_mut(b).assign(&copy);
        ws.set.fval[b] = ws.set.fval[a];

        let mut obj = FnObjective::new(wavy);
        let kbase = ws.set.kopt;
        let lim = limits(&ws);
        let result = rescue(&mut ws, &mut obj, &lim).unwrap();
        settle(&mut ws, kbase);

        assert_eq!(result, RescueResult::Rebuilt);
        assert!(obj.evals() >= 1);
        assert!(ws.fact.lagrange_residual(&ws.set) < 1e-8);
        assert!(interpolation_residual(&ws) < 1e-8);
        for k in 0..ws.npt() {
            let x = ws.point_at(ws.set.xpt.row(k));
            approx::assert_relative_eq!(ws.set.fval[k], wavy(x.view()), epsilon = 1e-12);
        }
    }

    #[test]
    fn extra_points_use_two_axis_steps() {
        let bounds = Bounds::unbounded([1.0, 1.0]).unwrap();
        let config = Config::default().with_interpolation_points(6);
        let (_, scaled) = prepare(&bounds, &[0.0, 0.0], &config).unwrap();
        let mut ws = Workspace::new(&scaled).unwrap();

        let slots = provisional_set(&mut ws);
        assert_eq!(slots[5], Slot::Provisional(ndarray::array![1.0, 1.0]));
        assert_eq!(ws.fact.zmat[[5, 2]], 1.0);
    }

    #[test]
    fn exhausted_budget_stops_before_evaluating() {
        let bounds = Bounds::unbounded([1.0, 1.0]).unwrap();
        let mut ws = initialized(&bounds, [0.0, 0.0], 5);
        let kopt = ws.set.kopt;
        let mut others = (0..ws.npt()).filter(|&k| k != kopt);
        let (a, b) = (others.next().unwrap(), others.next().unwrap());
        let old = ws.set.xpt.row(b).to_owned();
        ws.model.fold_point(b, old.view());
        let copy = ws.set.xpt.row(a).to_owned();
        ws.set.xpt.row_mut(b).assign(&copy);
        ws.set.fval[b] = ws.set.fval[a];

        let mut obj = FnObjective::new(wavy);
        let mut limits = limits(&ws);
        limits.max_evals = 0;
        let result = rescue(&mut ws, &mut obj, &limits).unwrap();
        assert_eq!(result, RescueResult::Terminated(Status::MaxEvals));
        assert_eq!(obj.evals(), 0);
    }
}
