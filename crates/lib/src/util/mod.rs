//! Shared utilities.
//!
//! Filesystem copy helpers used by the workspace and output steps, plus test helpers.

pub mod fs;

#[cfg(test)]
pub mod testutil;
