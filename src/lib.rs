//! repo-fleet: fan git operations out across a fleet of working copies.
//!
//! This library provides the building blocks of the `repo-fleet` binary:
//!
//! - [`executor`]: bounded, deadline-guarded parallel execution of per-item work
//! - [`git`]: repository queries (HEAD, dirty paths, ranges, ancestry) and the
//!   fast-forward and pruning decisions built on them
//! - [`fleet`]: fetch, merge, status, foreach and add-dir across repositories
//! - [`output`]: prefixed line output and colours
//! - [`config`]: the fleet configuration file

pub mod config;
pub mod executor;
pub mod fleet;
pub mod git;
pub mod output;
pub mod types;

#[cfg(test)]
mod test_utils;
