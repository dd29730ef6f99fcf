//! Environment setup builders for testing the Strata engine.
//!
//! The harness assembles the full engine (in-memory state, fake backend,
//! step catalogue, job runner and stack service) with fast polling.

mod harness;

pub use harness::*;
