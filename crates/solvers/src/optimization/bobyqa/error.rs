use std::{collections::TryReserveError, error::Error as StdError};

use thiserror::Error;

use crate::optimization::evaluate::EvalError;

use super::{config::ConfigError, setup::SetupError};

/// Errors that can occur during a BOBYQA run.
///
/// Numerical trouble inside the algorithm is not an error: it ends the run
/// with a failure [`Status`](super::Status) and the best point found.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid setup: {0}")]
    Setup(#[from] SetupError),

    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),

    #[error("not enough memory for the interpolation workspace")]
    OutOfMemory,

    #[error("no successful evaluations")]
    NoSuccessfulEvaluation,

    #[error("model call failed")]
    Model(#[source] Box<dyn StdError + Send + Sync>),

    #[error("problem error")]
    Problem(#[source] Box<dyn StdError + Send + Sync>),
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

impl<ME, PE> From<EvalError<ME, PE>> for Error
where
    ME: StdError + Send + Sync + 'static,
    PE: StdError + Send + Sync + 'static,
{
    fn from(err: EvalError<ME, PE>) -> Self {
        match err {
            EvalError::Model(e) => Self::Model(Box::new(e)),
            EvalError::Problem(e) => Self::Problem(Box::new(e)),
        }
    }
}
