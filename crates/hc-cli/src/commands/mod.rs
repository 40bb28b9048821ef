//! CLI subcommand implementations.

pub mod aggregate;
pub mod import;
pub mod kinds;
pub mod status;
pub mod util;
