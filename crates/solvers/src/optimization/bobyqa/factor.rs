//! The factored inverse of the interpolation KKT matrix.
//!
//! With `npt` points in `n` dimensions the inverse `H` of the KKT matrix of
//! the minimum-Frobenius-norm interpolation problem is held as:
//!
//! - `bmat`, the last `n` columns of `H` (size `(npt + n) × n`), whose bottom
//!   `n × n` block is symmetric
//! - `zmat`, a factor of the leading `npt × npt` block, `Ω = Z Zᵀ`
//!
//! Everything here is relative to the best interpolation point `xopt`.

use std::collections::TryReserveError;

use ndarray::{Array1, Array2, ArrayView1};

use super::{
    interp::InterpolationSet,
    numeric::{all_finite, try_zeros_2d},
};

#[derive(Debug, Clone)]
pub(super) struct InverseFactorization {
    pub(super) bmat: Array2<f64>,
    pub(super) zmat: Array2<f64>,
}

/// Lagrange function values at a trial point, plus the `beta` term of the
/// updating formula.
///
/// The first `npt` entries of `vlag` are the Lagrange functions evaluated at
/// the trial point; the last `n` are the matching entries of `H w`.
#[derive(Debug, Clone)]
pub(super) struct LagrangeValues {
    pub(super) vlag: Array1<f64>,
    pub(super) beta: f64,
}

impl InverseFactorization {
    pub(super) fn zeros(n: usize, npt: usize) -> Result<Self, TryReserveError> {
        Ok(Self {
            bmat: try_zeros_2d(npt + n, n)?,
            zmat: try_zeros_2d(npt, npt - n - 1)?,
        })
    }

    pub(super) fn npt(&self) -> usize {
        self.zmat.nrows()
    }

    /// Diagonal entry `k` of `Ω`.
    pub(super) fn hdiag(&self, k: usize) -> f64 {
        self.zmat.row(k).dot(&self.zmat.row(k))
    }

    /// Column `knew` of `Ω`, the quadratic coefficients of the `knew`-th
    /// Lagrange function.
    pub(super) fn lagrange_column(&self, knew: usize) -> Array1<f64> {
        self.zmat.dot(&self.zmat.row(knew))
    }

    /// Evaluates every Lagrange function at `xopt + d`.
    pub(super) fn lagrange_values(&self, set: &InterpolationSet, d: ArrayView1<'_, f64>) -> LagrangeValues {
        let npt = set.npt();
        let mut w = Array1::zeros(npt);
        for (k, row) in set.xpt.outer_iter().enumerate() {
            let suma = row.dot(&d);
            let sumb = row.dot(&set.xopt);
            w[k] = suma * (0.5 * suma + sumb);
        }

        let dx = d.dot(&set.xopt);
        let dsq = d.dot(&d);
        let extra = dx * dx + dsq * (set.xoptsq + dx + dx + 0.5 * dsq);

        self.weighted_values(w.view(), d, set.kopt, extra)
    }

    /// Computes `H w` for the KKT vector whose first `npt` entries are `w`
    /// and whose last `n` entries are `d`, along with `beta`.
    ///
    /// `extra` is the squared-norm term of the vector, which differs between
    /// the main iteration and rescue.
    pub(super) fn weighted_values(
        &self,
        w: ArrayView1<'_, f64>,
        d: ArrayView1<'_, f64>,
        kopt: usize,
        extra: f64,
    ) -> LagrangeValues {
        let npt = self.npt();
        let n = d.len();
        let mut vlag = Array1::zeros(npt + n);

        for k in 0..npt {
            vlag[k] = self.bmat.row(k).dot(&d);
        }

        let mut beta = 0.0;
        for column in self.zmat.columns() {
            let sum = column.dot(&w);
            beta -= sum * sum;
            for k in 0..npt {
                vlag[k] += sum * column[k];
            }
        }

        let mut bsum = 0.0;
        for j in 0..n {
            let mut sum = self.bmat.column(j).slice(ndarray::s![..npt]).dot(&w);
            bsum += sum * d[j];
            sum += self.bmat.row(npt + j).dot(&d);
            vlag[npt + j] = sum;
            bsum += sum * d[j];
        }

        vlag[kopt] += 1.0;
        LagrangeValues {
            vlag,
            beta: extra + beta - bsum,
        }
    }

    pub(super) fn is_finite(&self) -> bool {
        all_finite(&self.bmat) && all_finite(&self.zmat)
    }
}

#[cfg(test)]
impl InverseFactorization {
    /// Largest deviation of `ℓ_k(xpt_j)` from `δ_kj` over the whole set.
    pub(super) fn lagrange_residual(&self, set: &InterpolationSet) -> f64 {
        let npt = set.npt();
        let mut worst: f64 = 0.0;
        for j in 0..npt {
            let d = &set.xpt.row(j) - &set.xopt;
            let values = self.lagrange_values(set, d.view());
            for k in 0..npt {
                let expected = if k == j { 1.0 } else { 0.0 };
                worst = worst.max((values.vlag[k] - expected).abs());
            }
        }
        worst
    }
}
