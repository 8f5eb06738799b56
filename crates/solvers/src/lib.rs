//! Derivative-free solvers built on the [`boxmin_core`] traits.
//!
//! - [`optimization::bobyqa`] — bound-constrained minimization by quadratic
//!   interpolation inside a trust region

pub mod optimization;
