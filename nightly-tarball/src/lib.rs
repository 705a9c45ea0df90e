#![doc = "nightly-tarball: CLI crate for the nightly tarball build pipeline."]

//! CLI glue only: argument parsing, config loading, and construction of
//! the real storage client. All pipeline logic lives in
//! `nightly-tarball-core`.

pub mod cli;
pub mod load_config;
pub mod store;
