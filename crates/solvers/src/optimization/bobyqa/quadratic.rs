//! The quadratic surrogate and its packed Hessian storage.

use std::collections::TryReserveError;

use ndarray::{Array1, Array2, ArrayView1};

use super::numeric::try_zeros;

/// A symmetric `n × n` matrix storing only its upper triangle.
///
/// Entry `(i, j)` with `i <= j` lives at `j * (j + 1) / 2 + i`, so the
/// columns of the upper triangle are laid out one after the other.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct PackedSymmetric {
    n: usize,
    data: Array1<f64>,
}

impl PackedSymmetric {
    pub(super) fn zeros(n: usize) -> Result<Self, TryReserveError> {
        Ok(Self {
            n,
            data: try_zeros(n * (n + 1) / 2)?,
        })
    }

    fn index(i: usize, j: usize) -> usize {
        let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
        hi * (hi + 1) / 2 + lo
    }

    pub(super) fn get(&self, i: usize, j: usize) -> f64 {
        self.data[Self::index(i, j)]
    }

    pub(super) fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[Self::index(i, j)] = value;
    }

    pub(super) fn add(&mut self, i: usize, j: usize, value: f64) {
        self.data[Self::index(i, j)] += value;
    }

    /// Adds `scale * v vᵀ`.
    pub(super) fn add_outer(&mut self, scale: f64, v: ArrayView1<'_, f64>) {
        for j in 0..self.n {
            let sv = scale * v[j];
            for i in 0..=j {
                self.data[Self::index(i, j)] += sv * v[i];
            }
        }
    }

    pub(super) fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    /// Returns `H v`.
    pub(super) fn mul_vec(&self, v: ArrayView1<'_, f64>) -> Array1<f64> {
        let mut out = Array1::zeros(self.n);
        for j in 0..self.n {
            for i in 0..j {
                let h = self.get(i, j);
                out[j] += h * v[i];
                out[i] += h * v[j];
            }
            out[j] += self.get(j, j) * v[j];
        }
        out
    }

    pub(super) fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

/// Quadratic model of the objective around the best interpolation point.
///
/// The Hessian is `hq + Σ_k pq[k] · xpt_k xpt_kᵀ`: an explicit part and an
/// implicit part carried by one coefficient per interpolation point. The
/// constant term is never stored; the model is always used relative to the
/// objective value at the best point.
#[derive(Debug, Clone)]
pub(super) struct QuadraticModel {
    /// Gradient of the model at `xopt`.
    pub(super) gopt: Array1<f64>,

    /// Explicit second-derivative part.
    pub(super) hq: PackedSymmetric,

    /// Implicit second-derivative coefficients, one per interpolation point.
    pub(super) pq: Array1<f64>,
}

impl QuadraticModel {
    pub(super) fn zeros(n: usize, npt: usize) -> Result<Self, TryReserveError> {
        Ok(Self {
            gopt: try_zeros(n)?,
            hq: PackedSymmetric::zeros(n)?,
            pq: try_zeros(npt)?,
        })
    }

    /// Returns the full model Hessian applied to `s`.
    pub(super) fn hessian_times(&self, xpt: &Array2<f64>, s: ArrayView1<'_, f64>) -> Array1<f64> {
        let mut hs = self.hq.mul_vec(s);
        for (k, row) in xpt.outer_iter().enumerate() {
            if self.pq[k] != 0.0 {
                let temp = self.pq[k] * row.dot(&s);
                hs.scaled_add(temp, &row);
            }
        }
        hs
    }

    /// Returns the `j`-th diagonal entry of the full model Hessian.
    pub(super) fn curvature(&self, xpt: &Array2<f64>, j: usize) -> f64 {
        let implicit: f64 = xpt
            .column(j)
            .iter()
            .zip(&self.pq)
            .map(|(x, p)| p * x * x)
            .sum();
        self.hq.get(j, j) + implicit
    }

    /// Returns the change in the model when moving from `xopt` by `d`.
    pub(super) fn predicted_change(&self, xpt: &Array2<f64>, d: ArrayView1<'_, f64>) -> f64 {
        let n = d.len();
        let mut vquad = self.gopt.dot(&d);
        for j in 0..n {
            for i in 0..j {
                vquad += self.hq.get(i, j) * d[i] * d[j];
            }
            vquad += 0.5 * self.hq.get(j, j) * d[j] * d[j];
        }
        for (k, row) in xpt.outer_iter().enumerate() {
            let t = row.dot(&d);
            vquad += 0.5 * self.pq[k] * t * t;
        }
        vquad
    }

    /// Moves the implicit term of point `k` (located at `x`) into `hq`.
    pub(super) fn fold_point(&mut self, k: usize, x: ArrayView1<'_, f64>) {
        let pk = self.pq[k];
        if pk != 0.0 {
            self.hq.add_outer(pk, x);
        }
        self.pq[k] = 0.0;
    }

    /// Updates `gopt` for a move of the expansion point by `step`.
    ///
    /// The implicit Hessian terms are skipped when `with_implicit` is false,
    /// which is correct whenever every `pq` is still zero.
    pub(super) fn shift_gradient(&mut self, xpt: &Array2<f64>, step: ArrayView1<'_, f64>, with_implicit: bool) {
        let hs = if with_implicit {
            self.hessian_times(xpt, step)
        } else {
            self.hq.mul_vec(step)
        };
        self.gopt += &hs;
    }

    pub(super) fn is_finite(&self) -> bool {
        self.gopt.iter().all(|v| v.is_finite())
            && self.pq.iter().all(|v| v.is_finite())
            && self.hq.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn packed_layout_is_column_major_upper() {
        let mut h = PackedSymmetric::zeros(3).unwrap();
        h.set(0, 2, 5.0);
        h.set(1, 1, 2.0);
        assert_eq!(h.get(2, 0), 5.0);
        assert_eq!(PackedSymmetric::index(0, 2), 3);
        assert_eq!(PackedSymmetric::index(2, 2), 5);

        let hv = h.mul_vec(array![1.0, 1.0, 1.0].view());
        assert_eq!(hv, array![5.0, 2.0, 5.0]);
    }

    #[test]
    fn implicit_terms_enter_hessian_products() {
        let mut model = QuadraticModel::zeros(2, 2).unwrap();
        model.hq.set(0, 0, 2.0);
        model.pq[1] = 0.5;
        let xpt = array![[0.0, 0.0], [1.0, 2.0]];

        // H = diag(2, 0) + 0.5 [1 2]ᵀ[1 2]
        let hs = model.hessian_times(&xpt, array![1.0, 0.0].view());
        assert_relative_eq!(hs[0], 2.5);
        assert_relative_eq!(hs[1], 1.0);
        assert_relative_eq!(model.curvature(&xpt, 1), 2.0);

        let d = array![1.0, -1.0];
        let h_d = model.hessian_times(&xpt, d.view());
        assert_relative_eq!(model.predicted_change(&xpt, d.view()), 0.5 * d.dot(&h_d));
    }

    #[test]
    fn folding_keeps_hessian() {
        let mut model = QuadraticModel::zeros(2, 2).unwrap();
        model.pq[1] = 0.5;
        let xpt = array![[0.0, 0.0], [1.0, 2.0]];
        let s = array![0.3, -0.7];
        let before = model.hessian_times(&xpt, s.view());

        model.fold_point(1, xpt.row(1));
        let after = model.hessian_times(&xpt, s.view());

        assert_eq!(model.pq[1], 0.0);
        assert_relative_eq!(before[0], after[0], epsilon = 1e-15);
        assert_relative_eq!(before[1], after[1], epsilon = 1e-15);
    }
}
