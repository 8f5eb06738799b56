use thiserror::Error;

/// Configuration for the BOBYQA solver.
///
/// Lengths (`rho_end`) are in scaled units, where each free variable has been
/// divided by the magnitude of its initial step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    max_evals: usize,
    rho_end: Option<f64>,
    x_rel_tol: f64,
    target: Option<f64>,
    f_abs_tol: f64,
    f_rel_tol: f64,
    interpolation_points: usize,
}

/// Errors that can occur when validating a BOBYQA solver config.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_evals must be at least 1")]
    MaxEvals,

    #[error("rho_end must be finite and positive")]
    RhoEnd,

    #[error("x_rel_tol must be finite and positive")]
    XRelTol,

    #[error("f_abs_tol must be finite and non-negative")]
    FAbsTol,

    #[error("f_rel_tol must be finite and non-negative")]
    FRelTol,

    #[error("target must not be NaN")]
    Target,
}

impl Default for Config {
    fn default() -> Self {
        // Known-good values, unwrap is safe
        Self::new(2000, None).unwrap()
    }
}

impl Config {
    /// Creates a config with an evaluation budget and an optional final
    /// trust-region radius.
    ///
    /// With `rho_end = None` the final radius is `x_rel_tol` (default `1e-8`)
    /// times the initial radius.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_evals` is zero or `rho_end` is not a finite
    /// positive number.
    pub fn new(max_evals: usize, rho_end: Option<f64>) -> Result<Self, ConfigError> {
        let config = Self {
            max_evals: 1,
            rho_end: None,
            x_rel_tol: 1e-8,
            target: None,
            f_abs_tol: 0.0,
            f_rel_tol: 0.0,
            interpolation_points: 0,
        }
        .with_max_evals(max_evals)?;

        match rho_end {
            Some(rho_end) => config.with_rho_end(rho_end),
            None => Ok(config),
        }
    }

    /// Sets the evaluation budget.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_evals` is zero.
    pub fn with_max_evals(mut self, max_evals: usize) -> Result<Self, ConfigError> {
        if max_evals == 0 {
            return Err(ConfigError::MaxEvals);
        }
        self.max_evals = max_evals;
        Ok(self)
    }

    /// Sets the final trust-region radius.
    ///
    /// # Errors
    ///
    /// Returns an error unless `rho_end` is finite and positive.
    pub fn with_rho_end(mut self, rho_end: f64) -> Result<Self, ConfigError> {
        if !rho_end.is_finite() || rho_end <= 0.0 {
            return Err(ConfigError::RhoEnd);
        }
        self.rho_end = Some(rho_end);
        Ok(self)
    }

    /// Sets the relative tolerance used to derive the final radius when no
    /// explicit `rho_end` is given.
    ///
    /// # Errors
    ///
    /// Returns an error unless `x_rel_tol` is finite and positive.
    pub fn with_x_rel_tol(mut self, x_rel_tol: f64) -> Result<Self, ConfigError> {
        if !x_rel_tol.is_finite() || x_rel_tol <= 0.0 {
            return Err(ConfigError::XRelTol);
        }
        self.x_rel_tol = x_rel_tol;
        Ok(self)
    }

    /// Stops as soon as an objective value better than `target` is seen:
    /// below it when minimizing, above it when maximizing.
    ///
    /// # Errors
    ///
    /// Returns an error if `target` is NaN.
    pub fn with_target(mut self, target: f64) -> Result<Self, ConfigError> {
        if target.is_nan() {
            return Err(ConfigError::Target);
        }
        self.target = Some(target);
        Ok(self)
    }

    /// Stops when an improving step changes the best value by less than
    /// `abs`, or by less than `rel` relative to the mean magnitude of the
    /// old and new values.
    ///
    /// # Errors
    ///
    /// Returns an error if either tolerance is negative or non-finite.
    pub fn with_f_tol(mut self, abs: f64, rel: f64) -> Result<Self, ConfigError> {
        if !abs.is_finite() || abs < 0.0 {
            return Err(ConfigError::FAbsTol);
        }
        if !rel.is_finite() || rel < 0.0 {
            return Err(ConfigError::FRelTol);
        }
        self.f_abs_tol = abs;
        self.f_rel_tol = rel;
        Ok(self)
    }

    /// Sets the number of interpolation points, or `0` for `2n + 1`.
    #[must_use]
    pub fn with_interpolation_points(mut self, npt: usize) -> Self {
        self.interpolation_points = npt;
        self
    }

    /// Returns the evaluation budget.
    #[must_use]
    pub fn max_evals(&self) -> usize {
        self.max_evals
    }

    /// Returns the explicit final radius, if one was set.
    #[must_use]
    pub fn rho_end(&self) -> Option<f64> {
        self.rho_end
    }

    #[must_use]
    pub fn x_rel_tol(&self) -> f64 {
        self.x_rel_tol
    }

    #[must_use]
    pub fn target(&self) -> Option<f64> {
        self.target
    }

    #[must_use]
    pub fn f_abs_tol(&self) -> f64 {
        self.f_abs_tol
    }

    #[must_use]
    pub fn f_rel_tol(&self) -> f64 {
        self.f_rel_tol
    }

    /// Returns the requested interpolation point count (`0` means automatic).
    #[must_use]
    pub fn interpolation_points(&self) -> usize {
        self.interpolation_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_derived_from_relative_tolerance() {
        let config = Config::default();
        assert_eq!(config.max_evals(), 2000);
        assert_eq!(config.rho_end(), None);
        assert_eq!(config.x_rel_tol(), 1e-8);
        assert_eq!(config.target(), None);
        assert_eq!(config.interpolation_points(), 0);
    }

    #[test]
    fn rejects_invalid_values() {
        assert_eq!(Config::new(0, None), Err(ConfigError::MaxEvals));
        assert_eq!(Config::new(10, Some(0.0)), Err(ConfigError::RhoEnd));
        assert_eq!(Config::new(10, Some(f64::NAN)), Err(ConfigError::RhoEnd));

        let config = Config::default();
        assert_eq!(config.with_x_rel_tol(-1.0), Err(ConfigError::XRelTol));
        assert_eq!(config.with_target(f64::NAN), Err(ConfigError::Target));
        assert_eq!(config.with_f_tol(f64::INFINITY, 0.0), Err(ConfigError::FAbsTol));
        assert_eq!(config.with_f_tol(0.0, -1e-3), Err(ConfigError::FRelTol));
    }

    #[test]
    fn setters_chain() {
        let config = Config::new(50, Some(1e-6))
            .and_then(|c| c.with_target(-1.0))
            .and_then(|c| c.with_f_tol(1e-12, 1e-10))
            .map(|c| c.with_interpolation_points(7))
            .expect("valid config");

        assert_eq!(config.rho_end(), Some(1e-6));
        assert_eq!(config.target(), Some(-1.0));
        assert_eq!(config.f_abs_tol(), 1e-12);
        assert_eq!(config.f_rel_tol(), 1e-10);
        assert_eq!(config.interpolation_points(), 7);
    }
}
