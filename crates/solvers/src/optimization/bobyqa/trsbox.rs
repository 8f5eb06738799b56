//! The box-constrained trust-region subproblem.
//!
//! Minimizes the quadratic model over `‖d‖ ≤ delta` intersected with
//! `sl ≤ xopt + d ≤ su`. A truncated conjugate gradient run is followed,
//! when it reaches the trust-region boundary, by rotations of the step
//! around the boundary that keep the active bounds satisfied.

use ndarray::{Array1, ArrayView1};

use super::{interp::InterpolationSet, quadratic::QuadraticModel};

/// The approximate minimizer returned by [`solve`].
#[derive(Debug, Clone)]
pub(super) struct TrustRegionStep {
    /// `xopt + d`, with bound-fixed components set exactly to the bound.
    pub(super) xnew: Array1<f64>,
    pub(super) d: Array1<f64>,

    /// Model gradient at `xopt + d`.
    pub(super) gnew: Array1<f64>,
    pub(super) dsq: f64,

    /// Least positive curvature seen along a conjugate gradient direction.
    ///
    /// `Some(0.0)` when the step reached the trust-region boundary, `None`
    /// when no curvature was measured.
    pub(super) crvmin: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Free,
    AtLower,
    AtUpper,
}

struct Subproblem<'a> {
    set: &'a InterpolationSet,
    model: &'a QuadraticModel,
    sl: ArrayView1<'a, f64>,
    su: ArrayView1<'a, f64>,

    bound: Vec<Bound>,
    nact: usize,
    d: Array1<f64>,
    gnew: Array1<f64>,
    s: Array1<f64>,
    delsq: f64,
    qred: f64,
    gredsq: f64,
    iterc: usize,
    crvmin: Option<f64>,
}

/// Computes a trial step from `xopt` for the current model.
pub(super) fn solve<'a>(
    set: &'a InterpolationSet,
    model: &'a QuadraticModel,
    sl: ArrayView1<'a, f64>,
    su: ArrayView1<'a, f64>,
    delta: f64,
) -> TrustRegionStep {
    let n = set.n();
    let bound: Vec<Bound> = (0..n)
        .map(|i| {
            if set.xopt[i] <= sl[i] && model.gopt[i] >= 0.0 {
                Bound::AtLower
            } else if set.xopt[i] >= su[i] && model.gopt[i] <= 0.0 {
                Bound::AtUpper
            } else {
                Bound::Free
            }
        })
        .collect();

    let mut sub = Subproblem {
        set,
        model,
        sl,
        su,
        nact: bound.iter().filter(|b| **b != Bound::Free).count(),
        bound,
        d: Array1::zeros(n),
        gnew: model.gopt.clone(),
        s: Array1::zeros(n),
        delsq: delta * delta,
        qred: 0.0,
        gredsq: 0.0,
        iterc: 0,
        crvmin: None,
    };

    if sub.conjugate_gradient() {
        sub.rotate();
    }
    sub.finish()
}

impl Subproblem<'_> {
    fn n(&self) -> usize {
        self.d.len()
    }

    fn is_free(&self, i: usize) -> bool {
        self.bound[i] == Bound::Free
    }

    fn hessian_times_s(&self) -> Array1<f64> {
        self.model.hessian_times(&self.set.xpt, self.s.view())
    }

    /// Runs truncated conjugate gradients from `d = 0`.
    ///
    /// Returns `true` when the step ended on the trust-region boundary, in
    /// which case the rotation phase may still reduce the model.
    fn conjugate_gradient(&mut self) -> bool {
        let n = self.n();
        let xopt = &self.set.xopt;
        let mut beta = 0.0;
        let mut ggsav = 0.0;
        let mut itermax = self.iterc + n - self.nact;

        loop {
            let mut stepsq = 0.0;
            for i in 0..n {
                self.s[i] = if !self.is_free(i) {
                    0.0
                } else if beta == 0.0 {
                    -self.gnew[i]
                } else {
                    beta * self.s[i] - self.gnew[i]
                };
                stepsq += self.s[i] * self.s[i];
            }
            if stepsq == 0.0 {
                return false;
            }
            if beta == 0.0 {
                self.gredsq = stepsq;
                itermax = self.iterc + n - self.nact;
            }
            if self.gredsq * self.delsq <= 1e-4 * self.qred * self.qred {
                return false;
            }

            let hs = self.hessian_times_s();
            let (mut resid, mut ds, mut shs) = (self.delsq, 0.0, 0.0);
            for i in (0..n).filter(|&i| self.is_free(i)) {
                resid -= self.d[i] * self.d[i];
                ds += self.s[i] * self.d[i];
                shs += self.s[i] * hs[i];
            }
            if !resid.is_finite() || resid <= 0.0 {
                return true;
            }
            let temp = (stepsq * resid + ds * ds).sqrt();
            let blen = if ds < 0.0 {
                (temp - ds) / stepsq
            } else {
                resid / (temp + ds)
            };
            let mut stplen = if shs > 0.0 { blen.min(self.gredsq / shs) } else { blen };

            let mut iact = None;
            for i in (0..n).filter(|&i| self.s[i] != 0.0) {
                let xsum = xopt[i] + self.d[i];
                let limit = if self.s[i] > 0.0 {
                    (self.su[i] - xsum) / self.s[i]
                } else {
                    (self.sl[i] - xsum) / self.s[i]
                };
                if limit < stplen {
                    stplen = limit;
                    iact = Some(i);
                }
            }

            let mut sdec = 0.0;
            if stplen.is_finite() && stplen > 0.0 {
                self.iterc += 1;
                let curvature = shs / stepsq;
                if iact.is_none() && curvature > 0.0 {
                    self.crvmin = Some(self.crvmin.map_or(curvature, |c| c.min(curvature)));
                }
                ggsav = self.gredsq;
                self.gredsq = 0.0;
                for i in 0..n {
                    self.gnew[i] += stplen * hs[i];
                    if self.is_free(i) {
                        self.gredsq += self.gnew[i] * self.gnew[i];
                    }
                    self.d[i] += stplen * self.s[i];
                }
                sdec = f64::max(stplen * (ggsav - 0.5 * stplen * shs), 0.0);
                self.qred += sdec;
            }

            if let Some(i) = iact {
                self.nact += 1;
                self.bound[i] = if self.s[i] < 0.0 { Bound::AtLower } else { Bound::AtUpper };
                self.delsq -= self.d[i] * self.d[i];
                if !self.delsq.is_finite() || self.delsq <= 0.0 {
                    return true;
                }
                beta = 0.0;
                continue;
            }

            if stplen >= blen {
                return true;
            }
            if self.iterc == itermax || sdec <= 0.01 * self.qred {
                return false;
            }
            beta = self.gredsq / ggsav;
            if !beta.is_finite() {
                beta = 0.0;
            }
        }
    }

    /// Rotates `d` on the boundary towards the reduced steepest descent
    /// direction while the model keeps decreasing.
    fn rotate(&mut self) {
        let n = self.n();
        let xopt = &self.set.xopt;
        self.crvmin = Some(0.0);

        let mut refresh = true;
        let (mut dredsq, mut dredg) = (0.0, 0.0);
        let mut hred = Array1::zeros(n);

        loop {
            if refresh {
                if self.nact + 1 >= n {
                    return;
                }
                dredsq = 0.0;
                dredg = 0.0;
                self.gredsq = 0.0;
                for i in 0..n {
                    if self.is_free(i) {
                        dredsq += self.d[i] * self.d[i];
                        dredg += self.d[i] * self.gnew[i];
                        self.gredsq += self.gnew[i] * self.gnew[i];
                        self.s[i] = self.d[i];
                    } else {
                        self.s[i] = 0.0;
                    }
                }
                hred = self.hessian_times_s();
            }

            self.iterc += 1;
            let temp = self.gredsq * dredsq - dredg * dredg;
            if !temp.is_finite() || temp <= 1e-4 * self.qred * self.qred {
                return;
            }
            let temp = temp.sqrt();
            for i in 0..n {
                self.s[i] = if self.is_free(i) {
                    (dredg * self.d[i] - dredsq * self.gnew[i]) / temp
                } else {
                    0.0
                };
            }
            let sredg = -temp;

            // Bound on the tangent of half the rotation angle.
            let mut angbd = 1.0;
            let mut iact = None;
            let mut newly_fixed = false;
            for i in (0..n).filter(|&i| self.is_free(i)) {
                let tempa = xopt[i] + self.d[i] - self.sl[i];
                let tempb = self.su[i] - xopt[i] - self.d[i];
                if tempa <= 0.0 {
                    self.nact += 1;
                    self.bound[i] = Bound::AtLower;
                    newly_fixed = true;
                    break;
                }
                if tempb <= 0.0 {
                    self.nact += 1;
                    self.bound[i] = Bound::AtUpper;
                    newly_fixed = true;
                    break;
                }
                let ssq = self.d[i] * self.d[i] + self.s[i] * self.s[i];
                let gap = xopt[i] - self.sl[i];
                let t = ssq - gap * gap;
                if t > 0.0 {
                    let t = t.sqrt() - self.s[i];
                    if angbd * t > tempa {
                        angbd = tempa / t;
                        iact = Some((i, Bound::AtLower));
                    }
                }
                let gap = self.su[i] - xopt[i];
                let t = ssq - gap * gap;
                if t > 0.0 {
                    let t = t.sqrt() + self.s[i];
                    if angbd * t > tempb {
                        angbd = tempb / t;
                        iact = Some((i, Bound::AtUpper));
                    }
                }
            }
            if newly_fixed {
                refresh = true;
                continue;
            }

            let hs = self.hessian_times_s();
            let (mut shs, mut dhs, mut dhd) = (0.0, 0.0, 0.0);
            for i in (0..n).filter(|&i| self.is_free(i)) {
                shs += self.s[i] * hs[i];
                dhs += self.d[i] * hs[i];
                dhd += self.d[i] * hred[i];
            }

            // Scan the reduction over an even grid of half-angle tangents.
            let reduction = |angt: f64| {
                let sth = (angt + angt) / (1.0 + angt * angt);
                let temp = shs + angt * (angt * dhd - dhs - dhs);
                sth * (angt * dredg - sredg - 0.5 * sth * temp)
            };
            let iu = (17.0 * angbd + 3.1) as usize;
            let (mut redmax, mut redsav, mut rdprev, mut rdnext) = (0.0, 0.0, 0.0, 0.0);
            let mut isav = 0;
            for i in 1..=iu {
                let rednew = reduction(angbd * i as f64 / iu as f64);
                if rednew > redmax {
                    redmax = rednew;
                    isav = i;
                    rdprev = redsav;
                } else if i == isav + 1 {
                    rdnext = rednew;
                }
                redsav = rednew;
            }
            if isav == 0 {
                return;
            }

            let mut angt = angbd;
            if isav < iu {
                let t = (rdnext - rdprev) / (redmax + redmax - rdprev - rdnext);
                angt = angbd * (isav as f64 + 0.5 * t) / iu as f64;
            }
            let cth = (1.0 - angt * angt) / (1.0 + angt * angt);
            let sth = (angt + angt) / (1.0 + angt * angt);
            let sdec = reduction(angt);
            if sdec <= 0.0 {
                return;
            }

            dredg = 0.0;
            self.gredsq = 0.0;
            for i in 0..n {
                self.gnew[i] += (cth - 1.0) * hred[i] + sth * hs[i];
                if self.is_free(i) {
                    self.d[i] = cth * self.d[i] + sth * self.s[i];
                    dredg += self.d[i] * self.gnew[i];
                    self.gredsq += self.gnew[i] * self.gnew[i];
                }
                hred[i] = cth * hred[i] + sth * hs[i];
            }
            self.qred += sdec;

            if isav == iu {
                if let Some((i, bound)) = iact {
                    self.nact += 1;
                    self.bound[i] = bound;
                    refresh = true;
                    continue;
                }
            }
            if sdec <= 0.01 * self.qred {
                return;
            }
            refresh = false;
        }
    }

    /// Builds `xnew`, snapping fixed components exactly onto their bounds.
    fn finish(self) -> TrustRegionStep {
        let xopt = &self.set.xopt;
        let xnew = Array1::from_shape_fn(self.n(), |i| match self.bound[i] {
            Bound::AtLower => self.sl[i],
            Bound::AtUpper => self.su[i],
            Bound::Free => (xopt[i] + self.d[i]).min(self.su[i]).max(self.sl[i]),
        });
        let d = &xnew - xopt;
        TrustRegionStep {
            dsq: d.dot(&d),
            xnew,
            d,
            gnew: self.gnew,
            crvmin: self.crvmin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::array;

    /// A model about `xopt = 0` with gradient `g` and Hessian `diag(h)`.
    fn diagonal_model(g: [f64; 2], h: [f64; 2]) -> (InterpolationSet, QuadraticModel) {
        let set = InterpolationSet::new(array![0.0, 0.0], 5).unwrap();
        let mut model = QuadraticModel::zeros(2, 5).unwrap();
        model.gopt = array![g[0], g[1]];
        model.hq.set(0, 0, h[0]);
        model.hq.set(1, 1, h[1]);
        (set, model)
    }

    #[test]
    fn interior_newton_step_is_exact() {
        let (set, model) = diagonal_model([-2.0, 1.0], [2.0, 4.0]);
        let (sl, su) = (array![-10.0, -10.0], array![10.0, 10.0]);

        let step = solve(&set, &model, sl.view(), su.view(), 10.0);
        assert_relative_eq!(step.d[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(step.d[1], -0.25, epsilon = 1e-12);
        assert_relative_eq!(step.gnew[0], 0.0, epsilon = 1e-12);
        assert!(step.crvmin.is_some_and(|c| c > 0.0));
    }

    #[test]
    fn long_steps_stop_on_the_sphere() {
        let (set, model) = diagonal_model([-1.0, -1.0], [0.0, 0.0]);
        let (sl, su) = (array![-10.0, -10.0], array![10.0, 10.0]);

        let step = solve(&set, &model, sl.view(), su.view(), 0.5);
        assert_relative_eq!(step.dsq.sqrt(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(step.d[0], step.d[1], epsilon = 1e-12);
        assert_eq!(step.crvmin, Some(0.0));
    }

    #[test]
    fn bounds_clip_and_rotation_uses_remaining_room() {
        // Steepest descent heads to (+, +) but the first variable may move
        // only 0.1, so the rest of the radius goes into the second one.
        let (set, model) = diagonal_model([-1.0, -0.2], [0.0, 0.0]);
        let (sl, su) = (array![-1.0, -1.0], array![0.1, 1.0]);

        let step = solve(&set, &model, sl.view(), su.view(), 0.5);
        assert_eq!(step.xnew[0], 0.1);
        assert!(step.dsq <= 0.25 + 1e-12);
        assert_relative_eq!(step.d[1], (0.25_f64 - 0.01).sqrt(), epsilon = 1e-8);
    }

    #[test]
    fn zero_gradient_gives_zero_step() {
        let (set, model) = diagonal_model([0.0, 0.0], [1.0, 1.0]);
        let (sl, su) = (array![-1.0, -1.0], array![1.0, 1.0]);

        let step = solve(&set, &model, sl.view(), su.view(), 1.0);
        assert_eq!(step.dsq, 0.0);
        assert_eq!(step.crvmin, None);
    }

    #[test]
    fn variables_on_bounds_with_outward_gradient_stay_put() {
        let (mut set, model) = diagonal_model([1.0, -1.0], [1.0, 1.0]);
        set.xopt = array![-1.0, 0.0];
        let (sl, su) = (array![-1.0, -1.0], array![1.0, 1.0]);

        let step = solve(&set, &model, sl.view(), su.view(), 2.0);
        assert_eq!(step.xnew[0], -1.0);
        assert_relative_eq!(step.d[1], 1.0, epsilon = 1e-12);
    }
}
