//! Replacing one interpolation point and keeping `H` and the model in step.

use ndarray::{Array1, ArrayView1};

use super::{
    factor::{InverseFactorization, LagrangeValues},
    interp::InterpolationSet,
    numeric::{DENOM_BOOST, DENOM_FLOOR, ROTATION_SKIP, clamp_rotation, finite_or},
    quadratic::QuadraticModel,
};

/// The point chosen to leave the interpolation set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Replacement {
    pub(super) knew: usize,
    pub(super) denom: f64,
}

/// The model update produced a non-finite coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Roundoff;

/// Rewrites `bmat` and `zmat` for moving point `knew` to the trial point
/// whose Lagrange values are `vlag`.
///
/// `beta` and `denom` come from the same evaluation of the Lagrange
/// functions; `denom` is `α β + τ²` for the chosen `knew`.
pub(super) fn update_factorization(
    fact: &mut InverseFactorization,
    vlag: ArrayView1<'_, f64>,
    beta: f64,
    denom: f64,
    knew: usize,
) {
    let npt = fact.npt();
    let n = fact.bmat.ncols();
    let mut vlag = vlag.to_owned();

    let ztest = ROTATION_SKIP * fact.zmat.iter().fold(0.0_f64, |m, v| m.max(v.abs()));

    // Givens rotations that zero row `knew` of Z beyond its first column.
    for j in 1..fact.zmat.ncols() {
        if fact.zmat[[knew, j]].abs() > ztest {
            let a = fact.zmat[[knew, 0]];
            let b = fact.zmat[[knew, j]];
            let r = a.hypot(b);
            let (ca, cb) = (a / r, b / r);
            for i in 0..npt {
                let zi0 = fact.zmat[[i, 0]];
                let zij = fact.zmat[[i, j]];
                fact.zmat[[i, j]] = clamp_rotation(ca * zij - cb * zi0);
                fact.zmat[[i, 0]] = clamp_rotation(ca * zi0 + cb * zij);
            }
        }
        fact.zmat[[knew, j]] = 0.0;
    }

    let mut w = Array1::zeros(npt + n);
    let zk = fact.zmat[[knew, 0]];
    for i in 0..npt {
        w[i] = zk * fact.zmat[[i, 0]];
    }
    let alpha = w[knew];
    let tau = vlag[knew];
    vlag[knew] -= 1.0;

    let root = finite_or(denom.sqrt(), DENOM_FLOOR);
    let tempa = finite_or(tau / root, tau * DENOM_BOOST);
    let tempb = finite_or(zk / root, zk * DENOM_BOOST);
    for i in 0..npt {
        fact.zmat[[i, 0]] = tempa * fact.zmat[[i, 0]] - tempb * vlag[i];
    }

    for j in 0..n {
        let jp = npt + j;
        w[jp] = fact.bmat[[knew, j]];
        let ta = (alpha * vlag[jp] - tau * w[jp]) / denom;
        let tb = (-beta * w[jp] - tau * vlag[jp]) / denom;
        for i in 0..=jp {
            fact.bmat[[i, j]] += ta * vlag[i] + tb * w[i];
            if i >= npt {
                fact.bmat[[jp, i - npt]] = fact.bmat[[i, j]];
            }
        }
    }
}

/// Picks the point to drop so that `centre + step` can join the set.
///
/// Each candidate is weighted by its distance from `centre` relative to the
/// trust-region radius, which favours removing far points. Returns `None`
/// when cancellation has made every denominator unreliable.
pub(super) fn select_replacement(
    set: &InterpolationSet,
    fact: &InverseFactorization,
    lag: &LagrangeValues,
    centre: ArrayView1<'_, f64>,
    delta: f64,
    exclude: Option<usize>,
) -> Option<Replacement> {
    let delsq = delta * delta;
    let mut scaden = 0.0;
    let mut biglsq: f64 = 0.0;
    let mut best = None;

    for k in 0..set.npt() {
        if Some(k) == exclude {
            continue;
        }
        let den = lag.beta * fact.hdiag(k) + lag.vlag[k] * lag.vlag[k];
        let ratio = set.dist_sq(k, centre) / delsq;
        let temp = f64::max(1.0, ratio * ratio);
        if temp * den > scaden {
            scaden = temp * den;
            best = Some(Replacement { knew: k, denom: den });
        }
        biglsq = biglsq.max(temp * lag.vlag[k] * lag.vlag[k]);
    }

    if scaden <= 0.5 * biglsq { None } else { best }
}

/// Moves row `knew` to `xnew` with value `f` and corrects the model by
/// `diff` times the `knew`-th Lagrange function.
///
/// Must run after [`update_factorization`] and before `kopt` changes, since
/// the gradient correction is taken at the current `xopt`.
pub(super) fn absorb_point(
    set: &mut InterpolationSet,
    model: &mut QuadraticModel,
    fact: &InverseFactorization,
    knew: usize,
    xnew: ArrayView1<'_, f64>,
    f: f64,
    diff: f64,
) -> Result<(), Roundoff> {
    let old = set.xpt.row(knew).to_owned();
    model.fold_point(knew, old.view());
    let hcol = fact.lagrange_column(knew);
    model.pq.scaled_add(diff, &hcol);

    set.fval[knew] = f;
    set.xpt.row_mut(knew).assign(&xnew);

    let mut grad = fact.bmat.row(knew).to_owned();
    let zk = fact.zmat.row(knew);
    for (k, row) in set.xpt.outer_iter().enumerate() {
        let suma: f64 = zk
            .iter()
            .zip(fact.zmat.row(k))
            .map(|(a, b)| a * b)
            .filter(|v| v.is_finite())
            .sum();
        if !suma.is_finite() {
            return Err(Roundoff);
        }
        let temp = suma * row.dot(&set.xopt);
        grad.scaled_add(temp, &row);
    }
    model.gopt.scaled_add(diff, &grad);
    Ok(())
}

/// Replaces the model by the least Frobenius norm interpolant of the
/// current values when that interpolant's gradient has been much smaller
/// for three consecutive trust-region iterations.
///
/// `strikes` counts those iterations across calls.
pub(super) fn maybe_reset_model(
    set: &InterpolationSet,
    model: &mut QuadraticModel,
    fact: &InverseFactorization,
    sl: ArrayView1<'_, f64>,
    su: ArrayView1<'_, f64>,
    strikes: &mut usize,
) {
    let npt = set.npt();
    let fopt = set.fopt();
    let residual = set.fval.mapv(|f| f - fopt);

    let mut coeff: Array1<f64> = Array1::zeros(npt);
    for column in fact.zmat.columns() {
        coeff.scaled_add(column.dot(&residual), &column);
    }
    let weights: Array1<f64> = coeff
        .iter()
        .zip(set.xpt.outer_iter())
        .map(|(c, row)| c * row.dot(&set.xopt))
        .collect();

    let n = set.n();
    let mut grad = Array1::zeros(n);
    let (mut gqsq, mut gisq) = (0.0, 0.0);
    for i in 0..n {
        let g = fact.bmat.column(i).slice(ndarray::s![..npt]).dot(&residual)
            + set.xpt.column(i).dot(&weights);
        let (q, p) = if set.xopt[i] == sl[i] {
            (model.gopt[i].min(0.0), g.min(0.0))
        } else if set.xopt[i] == su[i] {
            (model.gopt[i].max(0.0), g.max(0.0))
        } else {
            (model.gopt[i], g)
        };
        gqsq += q * q;
        gisq += p * p;
        grad[i] = g;
    }

    *strikes += 1;
    if gqsq < 10.0 * gisq {
        *strikes = 0;
    }
    if *strikes >= 3 {
        model.gopt = grad;
        model.pq = coeff;
        model.hq.fill(0.0);
        *strikes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::array;

    use crate::optimization::bobyqa::{
        setup::Bounds,
        tests::{initialized, interpolation_residual, replace_point},
    };

    #[test]
    fn replacement_keeps_interpolation_exact() {
        let bounds = Bounds::unbounded([1.0, 1.0, 1.0]).unwrap();
        let mut ws = initialized(&bounds, [0.5, 0.0, -0.5], 7);

        for d in [array![0.3, -0.2, 0.1], array![-0.4, 0.5, 0.2], array![0.1, 0.1, -0.6]] {
            replace_point(&mut ws, d.view());
            assert!(ws.fact.lagrange_residual(&ws.set) < 1e-9);
            assert!(interpolation_residual(&ws) < 1e-9);
        }
    }

    #[test]
    fn bottom_block_of_bmat_stays_symmetric() {
        let bounds = Bounds::unbounded([1.0, 1.0]).unwrap();
        let mut ws = initialized(&bounds, [0.0, 0.0], 5);
        replace_point(&mut ws, array![0.7, -0.3].view());

        let npt = ws.npt();
        assert_relative_eq!(ws.fact.bmat[[npt, 1]], ws.fact.bmat[[npt + 1, 0]], epsilon = 1e-14);
    }

    #[test]
    fn far_points_are_preferred_for_removal() {
        let bounds = Bounds::unbounded([1.0, 1.0]).unwrap();
        let ws = initialized(&bounds, [0.0, 0.0], 5);
        let d = array![0.1, 0.1];
        let lag = ws.fact.lagrange_values(&ws.set, d.view());

        let near = select_replacement(&ws.set, &ws.fact, &lag, ws.set.xopt.view(), 10.0, None);
        let far = select_replacement(&ws.set, &ws.fact, &lag, ws.set.xopt.view(), 0.1, None);
        assert!(near.is_some() && far.is_some());
        let chosen = far.unwrap().knew;
        assert_ne!(chosen, ws.set.kopt);
    }
}
