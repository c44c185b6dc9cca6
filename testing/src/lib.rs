//! Shared test fixtures for the broker workspace.
//!
//! Provides a single, shared Redis testcontainer (port 6379) across all test
//! files, lazily started once per test process. When Docker is unavailable
//! the fixture resolves to `None` and callers skip.

mod fixtures;

pub use fixtures::*;
