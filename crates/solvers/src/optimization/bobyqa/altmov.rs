//! Moves that improve the geometry of the interpolation set.
//!
//! When a point `knew` is to be replaced without a trust-region step, the
//! new point should make the `knew`-th Lagrange function large, since that
//! keeps the updated factorization well conditioned. Two candidates are
//! built: the best point on the lines through `xopt` and the other
//! interpolation points, and a constrained Cauchy step for the Lagrange
//! function. The caller prefers the first unless its denominator turns out
//! smaller than the second's `cauchy` estimate.

use std::f64::consts::SQRT_2;

use ndarray::{Array1, ArrayView1};

use super::{factor::InverseFactorization, interp::InterpolationSet, numeric::CAUCHY_FLOOR};

/// The two candidate replacements for point `knew`.
#[derive(Debug, Clone)]
pub(super) struct AltMove {
    /// Best point found on the lines through `xopt`.
    pub(super) xnew: Array1<f64>,

    /// Constrained Cauchy point of the Lagrange function.
    pub(super) xalt: Array1<f64>,

    /// Diagonal entry `knew` of `Ω`.
    pub(super) alpha: f64,

    /// Square of the Lagrange function at `xalt`; zero when no Cauchy step
    /// exists.
    pub(super) cauchy: f64,
}

/// A line-search step that ends on a bound, which `xnew` then takes exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Snap {
    Interior,
    Lower(usize),
    Upper(usize),
}

/// Builds both candidates within distance `adelt` of `xopt`.
pub(super) fn alternative_step(
    set: &InterpolationSet,
    fact: &InverseFactorization,
    sl: ArrayView1<'_, f64>,
    su: ArrayView1<'_, f64>,
    knew: usize,
    adelt: f64,
) -> AltMove {
    let hcol = fact.lagrange_column(knew);
    let alpha = hcol[knew];

    // Gradient of the knew-th Lagrange function at xopt.
    let mut glag = fact.bmat.row(knew).to_owned();
    for (k, row) in set.xpt.outer_iter().enumerate() {
        let temp = hcol[k] * row.dot(&set.xopt);
        glag.scaled_add(temp, &row);
    }

    let xnew = line_candidate(set, glag.view(), sl, su, knew, adelt, 0.5 * alpha);

    let forward = cauchy_candidate(set, &hcol, glag.view(), sl, su, adelt, false);
    let (xalt, cauchy) = larger_cauchy(forward, || {
        cauchy_candidate(set, &hcol, (-&glag).view(), sl, su, adelt, true)
    })
    .unwrap_or_else(|| (set.xopt.clone(), 0.0));

    AltMove {
        xnew,
        xalt,
        alpha,
        cauchy,
    }
}

/// Keeps the larger of the two Cauchy candidates, preferring `backward` on
/// ties. The backward pass only runs when the forward one could move.
fn larger_cauchy(
    forward: Option<(Array1<f64>, f64)>,
    backward: impl FnOnce() -> Option<(Array1<f64>, f64)>,
) -> Option<(Array1<f64>, f64)> {
    let forward = forward?;
    match backward() {
        Some(backward) if backward.1 >= forward.1 => Some(backward),
        _ => Some(forward),
    }
}

/// Searches the lines through `xopt` and each other point for the step that
/// maximizes the predicted denominator.
fn line_candidate(
    set: &InterpolationSet,
    glag: ArrayView1<'_, f64>,
    sl: ArrayView1<'_, f64>,
    su: ArrayView1<'_, f64>,
    knew: usize,
    adelt: f64,
    ha: f64,
) -> Array1<f64> {
    let xopt = &set.xopt;
    let mut presav = 0.0;
    let mut ksav = set.kopt;
    let mut stpsav = 0.0;
    let mut snap = Snap::Interior;

    for (k, row) in set.xpt.outer_iter().enumerate() {
        if k == set.kopt {
            continue;
        }
        let offset = &row - xopt;
        let dderiv = glag.dot(&offset);
        let distsq = offset.dot(&offset);

        let mut subd = adelt / distsq.sqrt();
        let mut slbd = -subd;
        let (mut ilbd, mut iubd) = (Snap::Interior, Snap::Interior);
        let sumin = subd.min(1.0);

        for (i, &temp) in offset.iter().enumerate() {
            let (to_lower, to_upper) = (sl[i] - xopt[i], su[i] - xopt[i]);
            if temp > 0.0 {
                if slbd * temp < to_lower {
                    slbd = to_lower / temp;
                    ilbd = Snap::Lower(i);
                }
                if subd * temp > to_upper {
                    subd = sumin.max(to_upper / temp);
                    iubd = Snap::Upper(i);
                }
            } else if temp < 0.0 {
                if slbd * temp > to_upper {
                    slbd = to_upper / temp;
                    ilbd = Snap::Upper(i);
                }
                if subd * temp < to_lower {
                    subd = sumin.max(to_lower / temp);
                    iubd = Snap::Lower(i);
                }
            }
        }

        let (step, vlag, isbd) = if k == knew {
            // The Lagrange function is quadratic along its own line.
            let diff = dderiv - 1.0;
            let mut best = (slbd, slbd * (dderiv - slbd * diff), ilbd);
            let temp = subd * (dderiv - subd * diff);
            if temp.abs() > best.1.abs() {
                best = (subd, temp, iubd);
            }
            let tempd = 0.5 * dderiv;
            let tempa = tempd - diff * slbd;
            let tempb = tempd - diff * subd;
            if tempa * tempb < 0.0 {
                let temp = tempd * tempd / diff;
                if temp.abs() > best.1.abs() {
                    best = (tempd / diff, temp, Snap::Interior);
                }
            }
            best
        } else {
            let mut best = (slbd, slbd * (1.0 - slbd), ilbd);
            let temp = subd * (1.0 - subd);
            if temp.abs() > best.1.abs() {
                best = (subd, temp, iubd);
            }
            if subd > 0.5 && best.1.abs() < 0.25 {
                best = (0.5, 0.25, Snap::Interior);
            }
            (best.0, best.1 * dderiv, best.2)
        };

        let temp = step * (1.0 - step) * distsq;
        let predsq = vlag * vlag * (vlag * vlag + ha * temp * temp);
        if predsq > presav {
            presav = predsq;
            ksav = k;
            stpsav = step;
            snap = isbd;
        }
    }

    let target = set.xpt.row(ksav);
    let mut xnew = Array1::from_shape_fn(xopt.len(), |i| {
        (xopt[i] + stpsav * (target[i] - xopt[i])).min(su[i]).max(sl[i])
    });
    match snap {
        Snap::Lower(i) => xnew[i] = sl[i],
        Snap::Upper(i) => xnew[i] = su[i],
        Snap::Interior => {}
    }
    xnew
}

/// How a component of the Cauchy step was settled.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Component {
    Free,
    Fixed(f64),
}

/// Builds the constrained Cauchy step along `-glag` and returns the point
/// with the square of the Lagrange function there.
///
/// `flipped` says that `glag` is the negated gradient, so the curvature
/// changes sign too. Returns `None` when no component can move.
fn cauchy_candidate(
    set: &InterpolationSet,
    hcol: &Array1<f64>,
    glag: ArrayView1<'_, f64>,
    sl: ArrayView1<'_, f64>,
    su: ArrayView1<'_, f64>,
    adelt: f64,
    flipped: bool,
) -> Option<(Array1<f64>, f64)> {
    let xopt = &set.xopt;
    let n = xopt.len();

    let mut ggfree = 0.0;
    let mut comps: Vec<Component> = (0..n)
        .map(|i| {
            let tempa = f64::min(xopt[i] - sl[i], glag[i]);
            let tempb = f64::max(xopt[i] - su[i], glag[i]);
            if tempa > 0.0 || tempb < 0.0 {
                let g2 = glag[i] * glag[i];
                if g2.is_finite() {
                    ggfree += g2;
                }
                Component::Free
            } else {
                Component::Fixed(0.0)
            }
        })
        .collect();
    if !ggfree.is_finite() || ggfree == 0.0 {
        return None;
    }

    // Fix components that would cross a bound until the step length settles.
    let mut wfixsq = 0.0;
    let mut step = 0.0;
    loop {
        let room = adelt.mul_add(adelt, -wfixsq);
        if room <= 0.0 {
            break;
        }
        let wsqsav = wfixsq;
        step = (room / ggfree).sqrt();
        if step.is_nan() {
            return None;
        }
        ggfree = 0.0;
        for (i, comp) in comps.iter_mut().enumerate() {
            if *comp != Component::Free {
                continue;
            }
            let moved = glag[i].mul_add(-step, xopt[i]);
            if moved <= sl[i] {
                let w = sl[i] - xopt[i];
                *comp = Component::Fixed(w);
                wfixsq += w * w;
            } else if moved >= su[i] {
                let w = su[i] - xopt[i];
                *comp = Component::Fixed(w);
                wfixsq += w * w;
            } else {
                ggfree += glag[i] * glag[i];
            }
        }
        let progressing = ggfree.is_finite()
            && wfixsq.is_finite()
            && wfixsq - wsqsav > CAUCHY_FLOOR
            && ggfree > CAUCHY_FLOOR;
        if !progressing {
            break;
        }
    }

    let mut ccstep = Array1::zeros(n);
    let mut xalt = Array1::zeros(n);
    let mut gw = 0.0;
    for (i, comp) in comps.iter().enumerate() {
        match *comp {
            Component::Free => {
                ccstep[i] = -step * glag[i];
                xalt[i] = (xopt[i] + ccstep[i]).min(su[i]).max(sl[i]);
            }
            Component::Fixed(w) => {
                ccstep[i] = w;
                xalt[i] = if w == 0.0 {
                    xopt[i]
                } else if glag[i] > 0.0 {
                    sl[i]
                } else {
                    su[i]
                };
            }
        }
        gw += glag[i] * ccstep[i];
    }

    let mut curv: f64 = set
        .xpt
        .outer_iter()
        .zip(hcol)
        .map(|(row, h)| {
            let t = row.dot(&ccstep);
            h * t * t
        })
        .sum();
    if flipped {
        curv = -curv;
    }

    // Shorten the step when that makes the Lagrange function larger.
    let value = if curv > -gw && curv < -(1.0 + SQRT_2) * gw {
        let scale = -gw / curv;
        for i in 0..n {
            xalt[i] = scale.mul_add(ccstep[i], xopt[i]).min(su[i]).max(sl[i]);
        }
        0.5 * gw * scale
    } else {
        0.5_f64.mul_add(curv, gw)
    };
    Some((xalt, value * value))
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    use crate::optimization::bobyqa::{setup::Bounds, tests::initialized};

    fn within(x: &Array1<f64>, sl: &Array1<f64>, su: &Array1<f64>) -> bool {
        x.iter().zip(sl).zip(su).all(|((v, l), u)| l <= v && v <= u)
    }

    #[test]
    fn candidates_stay_in_box_and_radius() {
        let bounds = Bounds::new([-1.0, -1.0, -1.0], [1.0, 1.0, 1.0], [0.5, 0.5, 0.5]).unwrap();
        let ws = initialized(&bounds, [0.2, -0.4, 0.0], 7);
        let (sl, su) = (&ws.region.sl, &ws.region.su);
        let adelt = 0.3;

        for knew in (0..ws.npt()).filter(|&k| k != ws.set.kopt) {
            let alt = alternative_step(&ws.set, &ws.fact, sl.view(), su.view(), knew, adelt);
            assert!(within(&alt.xnew, sl, su));
            assert!(within(&alt.xalt, sl, su));

            let step = &alt.xnew - &ws.set.xopt;
            assert!(step.dot(&step).sqrt() <= adelt + 1e-12);
            assert!(alt.cauchy >= 0.0);
            assert_relative_eq!(alt.alpha, ws.fact.hdiag(knew), epsilon = 1e-14);
        }
    }

    #[test]
    fn backward_cauchy_pass_needs_a_movable_forward_pass() {
        let mut tried = false;
        let none = larger_cauchy(None, || {
            tried = true;
            Some((ndarray::array![1.0], 2.0))
        });
        assert!(none.is_none());
        assert!(!tried);

        let tie = larger_cauchy(Some((ndarray::array![0.0], 1.0)), || Some((ndarray::array![1.0], 1.0)));
        assert_eq!(tie, Some((ndarray::array![1.0], 1.0)));

        let kept = larger_cauchy(Some((ndarray::array![0.0], 1.0)), || None);
        assert_eq!(kept, Some((ndarray::array![0.0], 1.0)));
    }

    #[test]
    fn line_candidate_makes_lagrange_function_nonzero() {
        let bounds = Bounds::unbounded([1.0, 1.0]).unwrap();
        let ws = initialized(&bounds, [0.0, 0.0], 5);
        let knew = (0..ws.npt()).find(|&k| k != ws.set.kopt).unwrap();
        let (sl, su) = (&ws.region.sl, &ws.region.su);

        let alt = alternative_step(&ws.set, &ws.fact, sl.view(), su.view(), knew, 0.5);
        let d = &alt.xnew - &ws.set.xopt;
        let lag = ws.fact.lagrange_values(&ws.set, d.view());
        assert!(lag.vlag[knew].abs() > 1e-3);
    }
}
