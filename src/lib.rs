//! Read-after-write visibility probe
//!
//! Stress harness that writes content-addressed blobs through a pool of
//! workers and reads them back from another context, classifying every
//! read-back as visible, visible after one retry, a violation, or a hard
//! failure.

pub mod content;
pub mod core;
pub mod pool;
pub mod report;
pub mod store;

/// Testing utilities for integration tests.
pub mod testing;
