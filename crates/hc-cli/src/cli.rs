//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::aggregate::AggregateArgs;
use crate::commands::import::ImportArgs;

/// Priority-based health data aggregation.
///
/// Imports health records from several source apps and aggregates them into
/// time buckets, resolving overlap between sources by priority.
#[derive(Debug, Parser)]
#[command(name = "hc", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import records from JSON lines on stdin.
    Import(ImportArgs),

    /// Aggregate stored records into time buckets.
    Aggregate(AggregateArgs),

    /// List the supported aggregation kinds.
    Kinds,

    /// Show stored record counts.
    Status,
}
