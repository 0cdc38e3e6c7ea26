#[macro_use]
extern crate tracing;

pub mod challenge;
pub mod config;
pub mod credentials;
pub mod dns;
pub mod error;
pub mod quote;
pub mod solver;

/// Name the solver is referenced by from an ACME issuer's webhook config.
pub const SOLVER_NAME: &str = "opentelekomcloud";

pub use error::{
    Result,
    SolverError,
};
