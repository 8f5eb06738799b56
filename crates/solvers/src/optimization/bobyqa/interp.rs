use std::collections::TryReserveError;

use ndarray::{Array1, Array2, ArrayView1};

use super::numeric::{try_zeros, try_zeros_2d};

/// The interpolation points and their objective values.
///
/// Points are stored as offsets from `xbase` in scaled coordinates, one row
/// per point. `kopt` always indexes the lowest value seen among the rows.
#[derive(Debug, Clone)]
pub(super) struct InterpolationSet {
    pub(super) xbase: Array1<f64>,
    pub(super) xpt: Array2<f64>,
    pub(super) fval: Array1<f64>,
    pub(super) kopt: usize,

    /// Cached copy of `xpt.row(kopt)`.
    pub(super) xopt: Array1<f64>,

    /// Cached `‖xopt‖²`.
    pub(super) xoptsq: f64,
}

impl InterpolationSet {
    pub(super) fn new(xbase: Array1<f64>, npt: usize) -> Result<Self, TryReserveError> {
        let n = xbase.len();
        Ok(Self {
            xpt: try_zeros_2d(npt, n)?,
            fval: try_zeros(npt)?,
            xopt: try_zeros(n)?,
            xbase,
            kopt: 0,
            xoptsq: 0.0,
        })
    }

    pub(super) fn n(&self) -> usize {
        self.xpt.ncols()
    }

    pub(super) fn npt(&self) -> usize {
        self.xpt.nrows()
    }

    pub(super) fn fopt(&self) -> f64 {
        self.fval[self.kopt]
    }

    /// Re-reads `xopt` and `xoptsq` from row `kopt`.
    pub(super) fn refresh_xopt(&mut self) {
        self.xopt.assign(&self.xpt.row(self.kopt));
        self.xoptsq = self.xopt.dot(&self.xopt);
    }

    /// Squared distance from row `k` to `centre`.
    pub(super) fn dist_sq(&self, k: usize, centre: ArrayView1<'_, f64>) -> f64 {
        self.xpt
            .row(k)
            .iter()
            .zip(centre)
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::array;

    #[test]
    fn xopt_follows_kopt() {
        let mut set = InterpolationSet::new(array![1.0, 1.0], 4).unwrap();
        set.xpt.row_mut(2).assign(&array![3.0, 4.0]);
        set.kopt = 2;
        set.refresh_xopt();

        assert_eq!(set.xopt, array![3.0, 4.0]);
        assert_eq!(set.xoptsq, 25.0);
        assert_eq!(set.dist_sq(0, set.xopt.view()), 25.0);
        assert_eq!((set.n(), set.npt()), (2, 4));
    }
}
