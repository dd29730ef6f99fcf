/// Stack aggregate
pub mod stack;

/// Action entity and resource descriptors
pub mod action;

/// Step definitions
pub mod step;

/// Job aggregate
pub mod job;

/// Domain events
pub mod events;

/// Resource graph edges
pub mod link;

/// Placeholder references
pub mod reference;

/// Repository interfaces
pub mod repository;
