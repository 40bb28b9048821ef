//! Status command for showing how many records are stored per kind.

use std::io::Write;

use anyhow::Result;
use hc_db::Database;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, db: &Database, config: &Config) -> Result<()> {
    let counts = db.record_counts()?;

    writeln!(writer, "Health data status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;

    if counts.iter().all(|count| count.records == 0) {
        writeln!(writer, "No records stored.")?;
        return Ok(());
    }

    writeln!(writer, "Records:")?;
    for count in counts.iter().filter(|count| count.records > 0) {
        writeln!(writer, "- {}: {}", count.kind, count.records)?;
    }

    Ok(())
}
