//! Health aggregation CLI library.
//!
//! This crate provides the CLI interface for importing records and running
//! aggregation requests against the local store.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands};
pub use config::Config;
