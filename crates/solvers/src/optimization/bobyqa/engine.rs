//! The trust-region iteration that ties the kernels together.
//!
//! Each pass either takes a trust-region step from `xopt`, or, when some
//! interpolation point has drifted far from `xopt`, replaces that point by
//! an alternative step chosen to improve the geometry of the set. `rho`
//! decreases once the model at the current scale can no longer be improved
//! and the run ends when `rho` reaches its final value.

use ndarray::Array1;

use super::{
    Phase,
    altmov::alternative_step,
    factor::LagrangeValues,
    init::{InitResult, init},
    numeric::all_finite,
    objective::{Halt, Objective},
    rescue::{RescueResult, rescue},
    solution::Status,
    state::{Limits, Workspace},
    trsbox,
    update::{absorb_point, maybe_reset_model, select_replacement, update_factorization},
};

/// Where the iteration goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    TrustRegion,
    Prepare,
    AltMove,
    Denominators,
    Evaluate,
    FarPoint,
    ReduceRho,
    Rescue,
    Finish(Status),
}

/// Runs the full iteration on a freshly allocated workspace.
pub(super) fn run<O: Objective>(ws: &mut Workspace, obj: &mut O, limits: &Limits) -> Result<Status, Halt> {
    let mut engine = Engine::new(ws, obj, limits);
    let mut next = engine.start()?;
    loop {
        next = match next {
            Next::TrustRegion => engine.trust_region(),
            Next::Prepare => engine.prepare(),
            Next::AltMove => engine.alt_move(),
            Next::Denominators => engine.denominators(),
            Next::Evaluate => engine.evaluate()?,
            Next::FarPoint => engine.far_point(),
            Next::ReduceRho => engine.reduce_rho(),
            Next::Rescue => engine.rescue()?,
            Next::Finish(status) => {
                log::debug!("bobyqa: {status} after {} evaluations", engine.obj.evals());
                return Ok(status);
            }
        };
    }
}

struct Engine<'a, O> {
    ws: &'a mut Workspace,
    obj: &'a mut O,
    limits: &'a Limits,

    /// Trial point and its step from `xopt`.
    xnew: Array1<f64>,
    d: Array1<f64>,
    dsq: f64,
    dnorm: f64,

    /// Model gradient and curvature data from the last trust-region solve.
    gnew: Array1<f64>,
    crvmin: Option<f64>,

    /// The Cauchy alternative from the last geometry step.
    xalt: Array1<f64>,
    alpha: f64,
    cauchy: f64,

    /// Point to be replaced and the matching update denominator.
    knew: usize,
    denom: f64,
    lag: LagrangeValues,

    adelt: f64,
    distsq: f64,
    ratio: f64,

    /// Moduli of the last three model prediction errors.
    diffs: [f64; 3],

    /// Evaluation counts at the last rescue and the last long step.
    nresc: usize,
    nfsav: usize,

    /// Consecutive iterations favouring the least Frobenius norm model.
    itest: usize,
}

impl<'a, O: Objective> Engine<'a, O> {
    fn new(ws: &'a mut Workspace, obj: &'a mut O, limits: &'a Limits) -> Self {
        let (n, npt) = (ws.n(), ws.npt());
        Self {
            ws,
            obj,
            limits,
            xnew: Array1::zeros(n),
            d: Array1::zeros(n),
            dsq: 0.0,
            dnorm: 0.0,
            gnew: Array1::zeros(n),
            crvmin: None,
            xalt: Array1::zeros(n),
            alpha: 0.0,
            cauchy: 0.0,
            knew: 0,
            denom: 0.0,
            lag: LagrangeValues {
                vlag: Array1::zeros(npt + n),
                beta: 0.0,
            },
            adelt: 0.0,
            distsq: 0.0,
            ratio: 1.0,
            diffs: [0.0; 3],
            nresc: 0,
            nfsav: 0,
            itest: 0,
        }
    }

    fn start(&mut self) -> Result<Next, Halt> {
        if let InitResult::Terminated(status) = init(self.ws, self.obj, self.limits)? {
            return Ok(Next::Finish(status));
        }
        let evals = self.obj.evals();
        let ws = &mut *self.ws;
        if !all_finite(&ws.set.fval) || !ws.model.is_finite() {
            log::warn!("bobyqa: non-finite objective value in the initial set, stopping");
            return Ok(Next::Finish(Status::RoundoffLimited));
        }
        if ws.set.kopt != 0 {
            ws.model
                .shift_gradient(&ws.set.xpt, ws.set.xopt.view(), evals > ws.npt());
        }
        self.nresc = evals;
        self.nfsav = evals;
        Ok(Next::TrustRegion)
    }

    fn trust_region(&mut self) -> Next {
        let ws = &mut *self.ws;
        let step = trsbox::solve(
            &ws.set,
            &ws.model,
            ws.region.sl.view(),
            ws.region.su.view(),
            ws.region.delta,
        );
        self.xnew = step.xnew;
        self.d = step.d;
        self.gnew = step.gnew;
        self.dsq = step.dsq;
        self.crvmin = step.crvmin;
        self.dnorm = ws.region.delta.min(self.dsq.sqrt());

        let rho = ws.region.rho;
        log::trace!("bobyqa: trust-region step of length {:e} (rho = {rho:e})", self.dnorm);
        if self.dnorm >= 0.5 * rho {
            ws.region.ntrits += 1;
            return Next::Prepare;
        }

        // The step is too short to evaluate. Decide between improving the
        // geometry and moving on to a smaller rho.
        ws.region.ntrits = -1;
        self.distsq = (10.0 * rho).powi(2);
        if self.obj.evals() <= self.nfsav + 2 {
            return Next::FarPoint;
        }

        let errbig = self.diffs.iter().fold(0.0_f64, |m, &v| m.max(v));
        let frhosq = 0.125 * rho * rho;
        if let Some(crvmin) = self.crvmin {
            if crvmin > 0.0 && errbig > frhosq * crvmin {
                return Next::FarPoint;
            }
        }
        let bdtol = errbig / rho;
        for j in 0..ws.n() {
            let mut bdtest = bdtol;
            if self.xnew[j] == ws.region.sl[j] {
                bdtest = self.gnew[j];
            }
            if self.xnew[j] == ws.region.su[j] {
                bdtest = -self.gnew[j];
            }
            if bdtest < bdtol {
                bdtest += 0.5 * ws.model.curvature(&ws.set.xpt, j) * rho;
                if bdtest < bdtol {
                    return Next::FarPoint;
                }
            }
        }
        Next::ReduceRho
    }

    fn prepare(&mut self) -> Next {
        let ws = &mut *self.ws;
        if self.dsq <= 1e-3 * ws.set.xoptsq {
            log::trace!("bobyqa: moving the base point");
            ws.shift_base(&mut self.xnew);
        }
        if ws.region.ntrits == 0 {
            Next::AltMove
        } else {
            Next::Denominators
        }
    }

    fn alt_move(&mut self) -> Next {
        let ws = &*self.ws;
        let alt = alternative_step(
            &ws.set,
            &ws.fact,
            ws.region.sl.view(),
            ws.region.su.view(),
            self.knew,
            self.adelt,
        );
        self.d = &alt.xnew - &ws.set.xopt;
        self.xnew = alt.xnew;
        self.xalt = alt.xalt;
        self.alpha = alt.alpha;
        self.cauchy = alt.cauchy;
        Next::Denominators
    }

    fn denominators(&mut self) -> Next {
        let ws = &*self.ws;
        let mut lag = ws.fact.lagrange_values(&ws.set, self.d.view());

        if ws.region.ntrits == 0 {
            let knew = self.knew;
            let mut denom = lag.vlag[knew] * lag.vlag[knew] + self.alpha * lag.beta;
            if denom < self.cauchy && self.cauchy > 0.0 {
                self.xnew = self.xalt.clone();
                self.d = &self.xnew - &ws.set.xopt;
                self.cauchy = 0.0;
                lag = ws.fact.lagrange_values(&ws.set, self.d.view());
                denom = lag.vlag[knew] * lag.vlag[knew] + self.alpha * lag.beta;
            }
            if denom <= 0.5 * lag.vlag[knew] * lag.vlag[knew] {
                return self.rescue_or_stop();
            }
            self.denom = denom;
        } else {
            let choice = select_replacement(
                &ws.set,
                &ws.fact,
                &lag,
                ws.set.xopt.view(),
                ws.region.delta,
                Some(ws.set.kopt),
            );
            let Some(choice) = choice else {
                return self.rescue_or_stop();
            };
            self.knew = choice.knew;
            self.denom = choice.denom;
        }

        self.lag = lag;
        Next::Evaluate
    }

    fn rescue_or_stop(&self) -> Next {
        if self.obj.evals() > self.nresc {
            Next::Rescue
        } else {
            log::warn!("bobyqa: cancellation in an update denominator, stopping");
            Next::Finish(Status::RoundoffLimited)
        }
    }

    fn evaluate(&mut self) -> Result<Next, Halt> {
        if self.obj.evals() >= self.limits.max_evals {
            return Ok(Next::Finish(Status::MaxEvals));
        }

        let ntrits = self.ws.region.ntrits;
        let phase = if ntrits == 0 {
            Phase::Alternative
        } else {
            Phase::TrustRegion
        };
        let x = self.ws.point_at(self.xnew.view());
        let f = self.obj.evaluate(x.view(), phase)?;

        if f < self.limits.target {
            return Ok(Next::Finish(Status::TargetReached));
        }
        if ntrits == -1 {
            return Ok(Next::Finish(Status::ParameterTolerance));
        }

        let ws = &mut *self.ws;
        let fopt = ws.set.fopt();
        let vquad = ws.model.predicted_change(&ws.set.xpt, self.d.view());
        let diff = f - fopt - vquad;
        self.diffs = [diff.abs(), self.diffs[0], self.diffs[1]];
        if self.dnorm > ws.region.rho {
            self.nfsav = self.obj.evals();
        }

        if ntrits > 0 {
            if vquad >= 0.0 {
                log::debug!("bobyqa: trust-region step does not reduce the model");
                return Ok(Next::Finish(Status::ParameterTolerance));
            }
            self.ratio = (f - fopt) / vquad;
            let region = &mut ws.region;
            region.delta = if self.ratio <= 0.1 {
                f64::min(0.5 * region.delta, self.dnorm)
            } else if self.ratio <= 0.7 {
                f64::max(0.5 * region.delta, self.dnorm)
            } else {
                f64::max(0.5 * region.delta, 2.0 * self.dnorm)
            };
            if region.delta <= 1.5 * region.rho {
                region.delta = region.rho;
            }
            log::trace!("bobyqa: ratio = {:.3}, delta = {:e}", self.ratio, region.delta);

            if f < fopt {
                let choice = select_replacement(&ws.set, &ws.fact, &self.lag, self.xnew.view(), region.delta, None);
                if let Some(choice) = choice {
                    self.knew = choice.knew;
                    self.denom = choice.denom;
                }
            }
        }

        let knew = self.knew;
        log::trace!("bobyqa: replacing interpolation point {knew}");
        update_factorization(&mut ws.fact, self.lag.vlag.view(), self.lag.beta, self.denom, knew);
        if absorb_point(&mut ws.set, &mut ws.model, &ws.fact, knew, self.xnew.view(), f, diff).is_err() {
            log::warn!("bobyqa: non-finite factorization entries, stopping");
            return Ok(Next::Finish(Status::RoundoffLimited));
        }
        if !fopt.is_finite() || !f.is_finite() {
            log::warn!("bobyqa: non-finite objective value, stopping");
            return Ok(Next::Finish(Status::RoundoffLimited));
        }

        if f < fopt {
            ws.set.kopt = knew;
            ws.set.refresh_xopt();
            ws.model.shift_gradient(&ws.set.xpt, self.d.view(), true);
            if let Some(status) = tolerance_status(fopt, f, self.limits) {
                return Ok(Next::Finish(status));
            }
        }

        if ntrits > 0 {
            maybe_reset_model(
                &ws.set,
                &mut ws.model,
                &ws.fact,
                ws.region.sl.view(),
                ws.region.su.view(),
                &mut self.itest,
            );
        }

        if ntrits == 0 || f <= fopt + 0.1 * vquad {
            return Ok(Next::TrustRegion);
        }
        self.distsq = f64::max(2.0 * ws.region.delta, 10.0 * ws.region.rho).powi(2);
        Ok(Next::FarPoint)
    }

    /// Looks for the interpolation point farthest from `xopt` beyond
    /// `sqrt(distsq)` and, if there is one, plans a geometry step for it.
    fn far_point(&mut self) -> Next {
        let ws = &mut *self.ws;
        let mut far = None;
        for k in 0..ws.npt() {
            let dist = ws.set.dist_sq(k, ws.set.xopt.view());
            if dist > self.distsq {
                self.distsq = dist;
                far = Some(k);
            }
        }

        let region = &mut ws.region;
        if let Some(k) = far {
            self.knew = k;
            let dist = self.distsq.sqrt();
            if region.ntrits == -1 {
                region.delta = f64::min(0.1 * region.delta, 0.5 * dist);
                if region.delta <= 1.5 * region.rho {
                    region.delta = region.rho;
                }
            }
            region.ntrits = 0;
            self.adelt = f64::max(f64::min(0.1 * dist, region.delta), region.rho);
            self.dsq = self.adelt * self.adelt;
            return Next::Prepare;
        }

        if region.ntrits != -1 && (self.ratio > 0.0 || region.delta.max(self.dnorm) > region.rho) {
            return Next::TrustRegion;
        }
        Next::ReduceRho
    }

    fn reduce_rho(&mut self) -> Next {
        let rho_end = self.limits.rho_end;
        let region = &mut self.ws.region;
        if region.rho <= rho_end {
            return if region.ntrits == -1 {
                Next::Evaluate
            } else {
                Next::Finish(Status::ParameterTolerance)
            };
        }

        region.delta = 0.5 * region.rho;
        let ratio = region.rho / rho_end;
        region.rho = if ratio <= 16.0 {
            rho_end
        } else if ratio <= 250.0 {
            ratio.sqrt() * rho_end
        } else {
            0.1 * region.rho
        };
        region.delta = region.delta.max(region.rho);
        region.ntrits = 0;
        self.nfsav = self.obj.evals();

        log::debug!(
            "bobyqa: rho = {:e}, delta = {:e}, evals = {}, best = {}",
            region.rho,
            region.delta,
            self.nfsav,
            self.ws.set.fopt(),
        );
        Next::TrustRegion
    }

    fn rescue(&mut self) -> Result<Next, Halt> {
        self.nfsav = self.obj.evals();
        let kbase = self.ws.set.kopt;
        log::warn!("bobyqa: rebuilding the factorization after {} evaluations", self.nfsav);

        if let RescueResult::Terminated(status) = rescue(self.ws, self.obj, self.limits)? {
            return Ok(Next::Finish(status));
        }
        let ws = &mut *self.ws;
        ws.set.refresh_xopt();
        let evals = self.obj.evals();
        self.nresc = evals;

        if self.nfsav < evals {
            self.nfsav = evals;
            if ws.set.kopt != kbase {
                ws.model.shift_gradient(&ws.set.xpt, ws.set.xopt.view(), true);
            }
            return Ok(Next::TrustRegion);
        }
        if ws.region.ntrits > 0 {
            Ok(Next::TrustRegion)
        } else {
            Ok(Next::AltMove)
        }
    }
}

/// Function-value tolerances checked after an improving step from `fopt`
/// to `f`.
fn tolerance_status(fopt: f64, f: f64, limits: &Limits) -> Option<Status> {
    let change = (fopt - f).abs();
    if change < limits.f_abs_tol {
        return Some(Status::AbsoluteFunctionTolerance);
    }
    if change < limits.f_rel_tol * 0.5 * (f.abs() + fopt.abs()) || (limits.f_rel_tol > 0.0 && f == fopt) {
        return Some(Status::RelativeFunctionTolerance);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    use crate::optimization::bobyqa::{
        config::Config,
        objective::FnObjective,
        setup::{Bounds, prepare},
    };

    fn limits(f_abs_tol: f64, f_rel_tol: f64) -> Limits {
        Limits {
            max_evals: 100,
            target: f64::NEG_INFINITY,
            f_abs_tol,
            f_rel_tol,
            rho_end: 1e-6,
        }
    }

    #[test]
    fn tolerances_compare_the_improvement() {
        assert_eq!(tolerance_status(1.0, 0.5, &limits(0.0, 0.0)), None);
        assert_eq!(
            tolerance_status(1.0, 0.9, &limits(0.2, 0.0)),
            Some(Status::AbsoluteFunctionTolerance)
        );
        assert_eq!(
            tolerance_status(100.0, 99.9, &limits(0.0, 1e-2)),
            Some(Status::RelativeFunctionTolerance)
        );
        assert_eq!(
            tolerance_status(0.0, 0.0, &limits(0.0, 1e-12)),
            Some(Status::RelativeFunctionTolerance)
        );
    }

    #[test]
    fn converges_on_a_separable_quadratic() {
        let bounds = Bounds::unbounded([1.0, 1.0]).unwrap();
        let config = Config::default();
        let (_, scaled) = prepare(&bounds, &[0.0, 0.0], &config).unwrap();
        let limits = Limits::new(&config, &scaled, f64::NEG_INFINITY);
        let mut ws = Workspace::new(&scaled).unwrap();

        let mut obj = FnObjective::new(|x: ndarray::ArrayView1<'_, f64>| {
            (x[0] - 1.0).powi(2) + 2.0 * (x[1] + 0.5).powi(2)
        });
        let status = run(&mut ws, &mut obj, &limits).unwrap();

        assert!(!status.is_failure(), "stopped with {status}");
        let best = ws.point_at(ws.set.xopt.view());
        assert_relative_eq!(best[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(best[1], -0.5, epsilon = 1e-6);
        assert!(obj.evals() < 500);
    }

    #[test]
    fn budget_is_never_exceeded() {
        let bounds = Bounds::unbounded([1.0, 1.0, 1.0]).unwrap();
        let config = Config::new(20, None).unwrap();
        let (_, scaled) = prepare(&bounds, &[0.5, 0.5, 0.5], &config).unwrap();
        let limits = Limits::new(&config, &scaled, f64::NEG_INFINITY);
        let mut ws = Workspace::new(&scaled).unwrap();

        let mut obj = FnObjective::new(crate::optimization::bobyqa::tests::wavy);
        let status = run(&mut ws, &mut obj, &limits).unwrap();
        assert_eq!(status, Status::MaxEvals);
        assert_eq!(obj.evals(), 20);
    }
}
