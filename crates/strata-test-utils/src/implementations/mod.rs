//! Test implementations (fakes) of Strata seams.

mod fake_backend;
mod recording_events;

pub use fake_backend::*;
pub use recording_events::*;
