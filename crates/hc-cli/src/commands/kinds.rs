//! Kinds command listing what can be aggregated.

use std::io::Write;

use anyhow::Result;
use hc_core::{AggregationKind, AggregationVariant};

pub fn run<W: Write>(writer: &mut W) -> Result<()> {
    for kind in AggregationKind::ALL {
        let unit = match kind.variant() {
            AggregationVariant::ValueColumn => "prorated value",
            AggregationVariant::SessionDuration => "session duration",
        };
        writeln!(writer, "{:<24} {unit}", kind.as_str())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;

    #[test]
    fn kinds_command_lists_every_kind() {
        let mut output = Vec::new();
        run(&mut output).unwrap();

        let output = String::from_utf8(output).unwrap();
        assert_snapshot!(output, @r"
        steps                    prorated value
        distance                 prorated value
        active_calories_burned   prorated value
        total_calories_burned    prorated value
        floors_climbed           prorated value
        elevation_gained         prorated value
        wheelchair_pushes        prorated value
        sleep_duration           session duration
        exercise_duration        session duration
        ");
    }
}
