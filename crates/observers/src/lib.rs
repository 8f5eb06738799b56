//! Reusable observers for the boxmin solvers.
//!
//! This crate provides [`Observer`] implementations and capability traits that
//! work with any solver whose events and actions implement them.
//!
//! # Modules
//!
//! - [`traits`] — Capability traits for cross-solver observers
//!   ([`HasObjective`], [`HasPoint`], [`CanStopEarly`])
//! - [`History`] — records every evaluation and the running best objective
//!
//! [`Observer`]: boxmin_core::Observer
//! [`HasObjective`]: traits::HasObjective
//! [`HasPoint`]: traits::HasPoint
//! [`CanStopEarly`]: traits::CanStopEarly

mod history;
pub mod traits;

pub use history::{History, Record};
