//! Validating the box, choosing free variables, and scaling them.

use ndarray::{Array1, ArrayView1};
use thiserror::Error;

use super::{config::Config, numeric::MIN_GAP};

/// Box constraints and initial step sizes for each variable.
///
/// A variable is held fixed when its bounds coincide or its step is zero.
/// The remaining variables are divided by `|step|` so that every initial
/// step has length one in the solver's internal coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds<const N: usize> {
    lower: [f64; N],
    upper: [f64; N],
    step: [f64; N],
}

impl<const N: usize> Bounds<N> {
    /// Creates validated bounds.
    ///
    /// Infinite bounds are allowed in the direction they point.
    ///
    /// # Errors
    ///
    /// Returns an error if any entry is NaN, a step is infinite, or
    /// `lower > upper` for some index.
    pub fn new(lower: [f64; N], upper: [f64; N], step: [f64; N]) -> Result<Self, SetupError> {
        for index in 0..N {
            let (lo, hi, s) = (lower[index], upper[index], step[index]);
            if lo.is_nan() || hi.is_nan() || !s.is_finite() {
                return Err(SetupError::NotANumber { index });
            }
            if lo > hi || lo == f64::INFINITY || hi == f64::NEG_INFINITY {
                return Err(SetupError::InvertedBounds { index });
            }
        }
        Ok(Self { lower, upper, step })
    }

    /// Creates an unbounded box with the given initial steps.
    ///
    /// # Errors
    ///
    /// Returns an error if a step is not finite.
    pub fn unbounded(step: [f64; N]) -> Result<Self, SetupError> {
        Self::new([f64::NEG_INFINITY; N], [f64::INFINITY; N], step)
    }

    /// Lower bound of each variable.
    #[must_use]
    pub fn lower(&self) -> &[f64; N] {
        &self.lower
    }

    /// Upper bound of each variable.
    #[must_use]
    pub fn upper(&self) -> &[f64; N] {
        &self.upper
    }

    /// Initial step of each variable; zero holds it fixed.
    #[must_use]
    pub fn step(&self) -> &[f64; N] {
        &self.step
    }

    fn is_free(&self, index: usize) -> bool {
        self.step[index] != 0.0 && self.upper[index] > self.lower[index]
    }
}

/// Errors that make a problem unsolvable before any evaluation happens.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum SetupError {
    #[error("bound or step at index {index} is not a usable number")]
    NotANumber { index: usize },

    #[error("lower bound exceeds upper bound at index {index}")]
    InvertedBounds { index: usize },

    #[error("start value at index {index} is not finite")]
    NonFiniteStart { index: usize },

    #[error("no free variables: every step is zero or every bound pair coincides")]
    NoFreeVariables,

    #[error("{npt} interpolation points requested, expected {min} to {max}")]
    InterpolationPoints { npt: usize, min: usize, max: usize },

    #[error("smallest scaled bound gap {gap:e} cannot hold a trust region")]
    BoundsTooTight { gap: f64 },

    #[error("rho_end {rho_end:e} exceeds the initial radius {rho_beg:e}")]
    RhoEnd { rho_end: f64, rho_beg: f64 },

    #[error("a single free variable needs a budget of at least 2, got {max_evals}")]
    LineSearchBudget { max_evals: usize },
}

/// Which caller variables the solver moves, and how they are scaled.
#[derive(Debug, Clone)]
pub(super) struct FreeParameterMap<const N: usize> {
    place: Vec<usize>,
    scale: Vec<f64>,
    template: [f64; N],
}

impl<const N: usize> FreeParameterMap<N> {
    pub(super) fn len(&self) -> usize {
        self.place.len()
    }

    /// Expands scaled free coordinates into a full caller point.
    pub(super) fn to_full(&self, x: ArrayView1<'_, f64>) -> [f64; N] {
        let mut full = self.template;
        for ((&i, &s), &v) in self.place.iter().zip(&self.scale).zip(x) {
            full[i] = v * s;
        }
        full
    }
}

/// The problem in the solver's scaled coordinates.
#[derive(Debug, Clone)]
pub(super) struct ScaledProblem {
    /// Starting point, already moved away from or onto nearby bounds.
    pub(super) x0: Array1<f64>,
    pub(super) lower: Array1<f64>,
    pub(super) upper: Array1<f64>,

    /// Bounds relative to `x0`.
    pub(super) sl: Array1<f64>,
    pub(super) su: Array1<f64>,

    pub(super) rho_beg: f64,
    pub(super) rho_end: f64,
    pub(super) npt: usize,
}

impl ScaledProblem {
    pub(super) fn n(&self) -> usize {
        self.x0.len()
    }
}

/// Validates the inputs and builds the scaled problem.
///
/// Fixed variables keep their start value, clamped into their bounds.
pub(super) fn prepare<const N: usize>(
    bounds: &Bounds<N>,
    x0: &[f64; N],
    config: &Config,
) -> Result<(FreeParameterMap<N>, ScaledProblem), SetupError> {
    let mut template = *x0;
    let mut place = Vec::new();
    let mut scale = Vec::new();

    for i in 0..N {
        if bounds.is_free(i) {
            if !x0[i].is_finite() {
                return Err(SetupError::NonFiniteStart { index: i });
            }
            place.push(i);
            scale.push(bounds.step[i].abs());
        } else {
            template[i] = x0[i].max(bounds.lower[i]).min(bounds.upper[i]);
        }
    }

    let n = place.len();
    if n == 0 {
        return Err(SetupError::NoFreeVariables);
    }

    let npt = match config.interpolation_points() {
        0 => 2 * n + 1,
        npt => npt,
    };
    let (min, max) = (n + 2, (n + 1) * (n + 2) / 2);
    if npt < min || npt > max {
        return Err(SetupError::InterpolationPoints { npt, min, max });
    }

    let mut x: Array1<f64> = place.iter().zip(&scale).map(|(&i, s)| x0[i] / s).collect();
    let lower: Array1<f64> = place.iter().zip(&scale).map(|(&i, s)| bounds.lower[i] / s).collect();
    let upper: Array1<f64> = place.iter().zip(&scale).map(|(&i, s)| bounds.upper[i] / s).collect();

    let gap = (&upper - &lower).fold(f64::INFINITY, |m, &d| m.min(d));
    let mut rho_beg = 1.0;
    if gap < 2.0 * rho_beg {
        if gap > MIN_GAP {
            rho_beg = 0.5 * gap;
        } else {
            return Err(SetupError::BoundsTooTight { gap });
        }
    }

    let mut rho_end = config.rho_end().unwrap_or(config.x_rel_tol() * rho_beg);
    if !rho_end.is_finite() {
        rho_end = 1e-14;
    }
    if rho_end > rho_beg || (n == 1 && rho_end >= rho_beg) {
        return Err(SetupError::RhoEnd { rho_end, rho_beg });
    }
    if n == 1 && config.max_evals() < 2 {
        return Err(SetupError::LineSearchBudget {
            max_evals: config.max_evals(),
        });
    }

    let mut sl = &lower - &x;
    let mut su = &upper - &x;
    for j in 0..n {
        let width = upper[j] - lower[j];
        if sl[j] >= -rho_beg {
            if sl[j] >= 0.0 {
                x[j] = lower[j];
                sl[j] = 0.0;
                su[j] = width;
            } else {
                x[j] = lower[j] + rho_beg;
                sl[j] = -rho_beg;
                su[j] = (upper[j] - x[j]).max(rho_beg);
            }
        } else if su[j] <= rho_beg {
            if su[j] <= 0.0 {
                x[j] = upper[j];
                sl[j] = -width;
                su[j] = 0.0;
            } else {
                x[j] = upper[j] - rho_beg;
                sl[j] = (lower[j] - x[j]).min(-rho_beg);
                su[j] = rho_beg;
            }
        }
    }

    log::debug!(
        "bobyqa setup: {n} of {total} variables free, npt = {npt}, rho_beg = {rho_beg:e}, rho_end = {rho_end:e}",
        total = N,
    );

    Ok((
        FreeParameterMap {
            place,
            scale,
            template,
        },
        ScaledProblem {
            x0: x,
            lower,
            upper,
            sl,
            su,
            rho_beg,
            rho_end,
            npt,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::array;

    fn config() -> Config {
        Config::default()
    }

    #[test]
    fn zero_steps_and_equal_bounds_fix_variables() {
        let bounds = Bounds::new([0.0, 1.0, -2.0], [4.0, 1.0, 2.0], [0.5, 1.0, 0.0]).unwrap();
        let (map, scaled) = prepare(&bounds, &[2.0, 1.0, 0.3], &config()).unwrap();

        assert_eq!(map.len(), 1);
        assert_eq!(scaled.x0, array![4.0]);
        assert_eq!(scaled.lower, array![0.0]);
        assert_eq!(scaled.upper, array![8.0]);
        assert_eq!(map.to_full(array![5.0].view()), [2.5, 1.0, 0.3]);
    }

    #[test]
    fn bounds_expose_their_arrays() {
        let bounds = Bounds::new([-1.0, 0.0], [1.0, f64::INFINITY], [0.5, 0.0]).unwrap();
        assert_eq!(bounds.lower(), &[-1.0, 0.0]);
        assert_eq!(bounds.upper(), &[1.0, f64::INFINITY]);
        assert_eq!(bounds.step(), &[0.5, 0.0]);
        assert_eq!(Bounds::unbounded([2.0]).unwrap().lower(), &[f64::NEG_INFINITY]);
    }

    #[test]
    fn narrow_box_shrinks_initial_radius() {
        let bounds = Bounds::new([0.0, 0.0], [1.0, 10.0], [1.0, 1.0]).unwrap();
        let (_, scaled) = prepare(&bounds, &[0.5, 5.0], &config()).unwrap();

        assert_relative_eq!(scaled.rho_beg, 0.5);
        assert_relative_eq!(scaled.rho_end, 0.5e-8);
    }

    #[test]
    fn start_near_bounds_is_adjusted() {
        let bounds = Bounds::new([0.0, 0.0, 0.0], [10.0, 10.0, 10.0], [1.0; 3]).unwrap();
        let (_, scaled) = prepare(&bounds, &[-1.0, 0.4, 9.8], &config()).unwrap();

        assert_eq!(scaled.x0, array![0.0, 1.0, 9.0]);
        assert_eq!(scaled.sl, array![0.0, -1.0, -9.0]);
        assert_eq!(scaled.su, array![10.0, 9.0, 1.0]);
    }

    #[test]
    fn rejects_bad_problems() {
        let fixed = Bounds::new([1.0, 2.0], [1.0, 2.0], [1.0, 1.0]).unwrap();
        assert_eq!(
            prepare(&fixed, &[1.0, 2.0], &config()).unwrap_err(),
            SetupError::NoFreeVariables
        );

        let open = Bounds::unbounded([1.0, 1.0]).unwrap();
        let err = prepare(&open, &[0.0, 0.0], &config().with_interpolation_points(7)).unwrap_err();
        assert_eq!(err, SetupError::InterpolationPoints { npt: 7, min: 4, max: 6 });

        let tight = Bounds::new([0.0, 0.0], [1e-21, 1.0], [1.0, 1.0]).unwrap();
        assert!(matches!(
            prepare(&tight, &[0.0, 0.0], &config()),
            Err(SetupError::BoundsTooTight { .. })
        ));

        let big_end = Config::new(100, Some(2.0)).unwrap();
        assert!(matches!(
            prepare(&open, &[0.0, 0.0], &big_end),
            Err(SetupError::RhoEnd { .. })
        ));

        assert_eq!(
            Bounds::new([1.0], [0.0], [1.0]).unwrap_err(),
            SetupError::InvertedBounds { index: 0 }
        );
        assert_eq!(
            Bounds::new([0.0], [1.0], [f64::NAN]).unwrap_err(),
            SetupError::NotANumber { index: 0 }
        );
    }

    #[test]
    fn single_variable_needs_two_evaluations() {
        let bounds = Bounds::new([0.0, 0.0], [1.0, 0.0], [0.1, 0.1]).unwrap();
        let config = Config::new(1, None).unwrap();
        assert_eq!(
            prepare(&bounds, &[0.5, 0.0], &config).unwrap_err(),
            SetupError::LineSearchBudget { max_evals: 1 }
        );
    }
}
