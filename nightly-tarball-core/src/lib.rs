#![doc = "nightly-tarball-core: core logic library for the nightly tarball build pipeline."]

//! This crate contains all domain logic for building nightly tarballs of one
//! or more branches of a git repository and publishing them to remote
//! storage: snapshotting sources, running the build, tracking build history
//! against a retention policy, and expiring old artifacts.
//!
//! # Usage
//! Add this as a dependency for the orchestration, storage abstraction,
//! history, and retention code. CLI glue lives in the `nightly-tarball`
//! binary crate.

pub mod builder;
pub mod config;
pub mod contract;
pub mod coverity;
pub mod digest;
pub mod filer;
pub mod history;
pub mod notify;
pub mod plan;
pub mod retention;
pub mod runner;
pub mod snapshot;
