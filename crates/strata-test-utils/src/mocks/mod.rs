//! Mock implementations of the Strata seams.
//!
//! Use these when a test needs exact call expectations; prefer
//! [`crate::FakeBackend`] when it needs a backend that behaves.

pub mod backend;

pub use backend::*;
