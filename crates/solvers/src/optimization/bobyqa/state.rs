//! Mutable run state: stopping limits, trust-region radii, and the workspace
//! that owns the interpolation set, model, and factorization.

use std::collections::TryReserveError;

use ndarray::{Array1, ArrayView1, Axis};

use super::{
    config::Config,
    factor::InverseFactorization,
    interp::InterpolationSet,
    quadratic::QuadraticModel,
    setup::ScaledProblem,
};

/// Stopping thresholds, in scaled units where that matters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Limits {
    pub(super) max_evals: usize,
    pub(super) target: f64,
    pub(super) f_abs_tol: f64,
    pub(super) f_rel_tol: f64,
    pub(super) rho_end: f64,
}

impl Limits {
    /// Builds the limits for a minimization run.
    ///
    /// `target` must already be expressed on the minimized scale.
    pub(super) fn new(config: &Config, scaled: &ScaledProblem, target: f64) -> Self {
        Self {
            max_evals: config.max_evals(),
            target,
            f_abs_tol: config.f_abs_tol(),
            f_rel_tol: config.f_rel_tol(),
            rho_end: scaled.rho_end,
        }
    }
}

/// Radii and move bounds of the trust-region iteration.
#[derive(Debug, Clone)]
pub(super) struct TrustRegion {
    /// Lower bound on the radius; only ever decreases.
    pub(super) rho: f64,
    pub(super) delta: f64,

    /// Trust-region steps since the last alternative step; `-1` marks a
    /// step that came out shorter than `rho / 2`.
    pub(super) ntrits: isize,

    /// Box bounds relative to `xbase`.
    pub(super) sl: Array1<f64>,
    pub(super) su: Array1<f64>,
}

/// Everything one run mutates, owned by that run alone.
#[derive(Debug, Clone)]
pub(super) struct Workspace {
    pub(super) set: InterpolationSet,
    pub(super) model: QuadraticModel,
    pub(super) fact: InverseFactorization,
    pub(super) region: TrustRegion,

    /// Scaled absolute bounds.
    pub(super) lower: Array1<f64>,
    pub(super) upper: Array1<f64>,
}

impl Workspace {
    pub(super) fn new(scaled: &ScaledProblem) -> Result<Self, TryReserveError> {
        let (n, npt) = (scaled.n(), scaled.npt);
        Ok(Self {
            set: InterpolationSet::new(scaled.x0.clone(), npt)?,
            model: QuadraticModel::zeros(n, npt)?,
            fact: InverseFactorization::zeros(n, npt)?,
            region: TrustRegion {
                rho: scaled.rho_beg,
                delta: scaled.rho_beg,
                ntrits: 0,
                sl: scaled.sl.clone(),
                su: scaled.su.clone(),
            },
            lower: scaled.lower.clone(),
            upper: scaled.upper.clone(),
        })
    }

    pub(super) fn n(&self) -> usize {
        self.set.n()
    }

    pub(super) fn npt(&self) -> usize {
        self.set.npt()
    }

    /// The scaled absolute point at `xbase + offset`, kept inside the box.
    ///
    /// Offsets sitting exactly on `sl` or `su` map to the exact bound, so
    /// round-off in `xbase + offset` never leaves a bound slightly missed.
    pub(super) fn point_at(&self, offset: ArrayView1<'_, f64>) -> Array1<f64> {
        let TrustRegion { sl, su, .. } = &self.region;
        Array1::from_shape_fn(self.n(), |i| {
            if offset[i] == sl[i] {
                self.lower[i]
            } else if offset[i] == su[i] {
                self.upper[i]
            } else {
                (self.set.xbase[i] + offset[i]).max(self.lower[i]).min(self.upper[i])
            }
        })
    }

    /// Moves `xbase` to `xbase + xopt` and rewrites every quantity that
    /// depends on it, so that offsets stay small.
    ///
    /// `xnew` is an offset from the old base and is shifted along with the
    /// interpolation points.
    pub(super) fn shift_base(&mut self, xnew: &mut Array1<f64>) {
        let (n, npt) = (self.n(), self.npt());
        let xopt = self.set.xopt.clone();
        let xoptsq = self.set.xoptsq;
        let fracsq = 0.25 * xoptsq;
        let fact = &mut self.fact;
        let xpt = &mut self.set.xpt;

        let mut shifted = Array1::zeros(npt);
        for k in 0..npt {
            let row = xpt.row(k);
            let sum = row.dot(&xopt) - 0.5 * xoptsq;
            shifted[k] = sum;
            let temp = fracsq - 0.5 * sum;
            let b = fact.bmat.row(k).to_owned();
            let v = &row * sum + &xopt * temp;
            for i in 0..n {
                for j in 0..=i {
                    fact.bmat[[npt + i, j]] += b[i] * v[j] + v[i] * b[j];
                }
            }
        }

        for jj in 0..fact.zmat.ncols() {
            let z = fact.zmat.column(jj);
            let sumz = z.sum();
            let weighted = &shifted * &z;
            let sumw = weighted.sum();
            let mut wn = Array1::zeros(n);
            for i in 0..n {
                let sum = (fracsq * sumz - 0.5 * sumw) * xopt[i] + weighted.dot(&xpt.column(i));
                wn[i] = sum;
                for k in 0..npt {
                    fact.bmat[[k, i]] += sum * z[k];
                }
            }
            for i in 0..n {
                for j in 0..=i {
                    fact.bmat[[npt + i, j]] += wn[i] * wn[j];
                }
            }
        }

        let sumpq = self.model.pq.sum();
        let mut w = &xopt * (-0.5 * sumpq);
        for (k, row) in xpt.outer_iter().enumerate() {
            w.scaled_add(self.model.pq[k], &row);
        }
        for mut row in xpt.axis_iter_mut(Axis(0)) {
            row -= &xopt;
        }
        for i in 0..n {
            for j in 0..=i {
                self.model.hq.add(j, i, w[j] * xopt[i] + xopt[j] * w[i]);
                fact.bmat[[npt + j, i]] = fact.bmat[[npt + i, j]];
            }
        }

        self.set.xbase += &xopt;
        *xnew -= &xopt;
        self.region.sl -= &xopt;
        self.region.su -= &xopt;
        self.set.xopt.fill(0.0);
        self.set.xoptsq = 0.0;
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
    fn shifting_the_base_keeps_points_and_model() {
        let bounds = Bounds::new([-3.0; 3], [3.0; 3], [0.5; 3]).unwrap();
        let mut ws = initialized(&bounds, [1.0, -1.0, 0.5], 7);
        replace_point(&mut ws, array![0.6, 0.3, -0.4].view());
        replace_point(&mut ws, array![-0.2, 0.5, 0.3].view());

        let points: Vec<Array1<f64>> = ws.set.xpt.outer_iter().map(|row| ws.point_at(row)).collect();
        let xopt = ws.set.xopt.clone();
        let mut xnew = &xopt + &array![0.1, 0.1, 0.1];
        let target = ws.point_at(xnew.view());

        ws.shift_base(&mut xnew);

        assert_eq!(ws.set.xopt, Array1::<f64>::zeros(3));
        assert_eq!(ws.set.xoptsq, 0.0);
        for (row, before) in ws.set.xpt.outer_iter().zip(&points) {
            let after = ws.point_at(row);
            for i in 0..3 {
                assert_relative_eq!(after[i], before[i], epsilon = 1e-12);
            }
        }
        let moved = ws.point_at(xnew.view());
        for i in 0..3 {
            assert_relative_eq!(moved[i], target[i], epsilon = 1e-12);
        }
        assert!(ws.fact.lagrange_residual(&ws.set) < 1e-9);
        assert!(interpolation_residual(&ws) < 1e-9);
    }
}
