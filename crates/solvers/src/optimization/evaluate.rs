use thiserror::Error;

use boxmin_core::{Model, OptimizationProblem, Snapshot};

/// One successful evaluation of an optimization problem.
#[derive(Debug, Clone)]
pub struct Evaluation<I, O, const N: usize> {
    /// The solver variables that were evaluated.
    pub x: [f64; N],

    /// The objective reported by the problem.
    pub objective: f64,

    /// The model input and output behind `objective`.
    pub snapshot: Snapshot<I, O>,
}

/// Why an evaluation did not produce an objective.
#[derive(Debug, Error)]
pub enum EvalError<ME, PE> {
    /// The model call failed.
    #[error("model call failed")]
    Model(#[source] ME),

    /// The problem could not build an input or score the output.
    #[error("problem error")]
    Problem(#[source] PE),
}

/// Result type of [`evaluate`] for a given model and problem.
pub type EvaluateResult<M, P, const N: usize> = Result<
    Evaluation<<M as Model>::Input, <M as Model>::Output, N>,
    EvalError<<M as Model>::Error, <P as OptimizationProblem<N>>::Error>,
>;

/// Maps `x` to a model input, calls the model, and scores the output.
///
/// # Errors
///
/// Returns [`EvalError::Problem`] if the input or objective cannot be built,
/// and [`EvalError::Model`] if the model call fails.
pub fn evaluate<M, P, const N: usize>(model: &M, problem: &P, x: [f64; N]) -> EvaluateResult<M, P, N>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
{
    let input = problem.input(&x).map_err(EvalError::Problem)?;
    let output = model.call(&input).map_err(EvalError::Model)?;
    let objective = problem
        .objective(&input, &output)
        .map_err(EvalError::Problem)?;

    Ok(Evaluation {
        x,
        objective,
        snapshot: Snapshot::new(input, output),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    #[derive(Debug, Error)]
    #[error("negative radius")]
    struct NegativeRadius;

    /// Area of a circle, refusing negative radii.
    struct CircleArea;

    impl Model for CircleArea {
        type Input = f64;
        type Output = f64;
        type Error = NegativeRadius;

        fn call(&self, r: &f64) -> Result<f64, Self::Error> {
            if *r < 0.0 {
                return Err(NegativeRadius);
            }
            Ok(std::f64::consts::PI * r * r)
        }
    }

    /// Uses the distance of `x` from the origin as the radius.
    struct Radius;

    impl OptimizationProblem<2> for Radius {
        type Input = f64;
        type Output = f64;
        type Error = NegativeRadius;

        fn input(&self, x: &[f64; 2]) -> Result<f64, Self::Error> {
            Ok(x[0].hypot(x[1]) * x[0].signum())
        }

        fn objective(&self, _input: &f64, output: &f64) -> Result<f64, Self::Error> {
            Ok(*output)
        }
    }

    #[test]
    fn evaluation_carries_snapshot() {
        let eval = evaluate(&CircleArea, &Radius, [3.0, 4.0]).expect("valid radius");
        assert_relative_eq!(eval.snapshot.input, 5.0);
        assert_relative_eq!(eval.objective, 25.0 * std::f64::consts::PI);
        assert_eq!(eval.x, [3.0, 4.0]);
    }

    #[test]
    fn model_failures_are_tagged() {
        let err = evaluate(&CircleArea, &Radius, [-3.0, 4.0]).unwrap_err();
        assert!(matches!(err, EvalError::Model(NegativeRadius)));
    }
}
