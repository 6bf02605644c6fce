//! `--list`: display the supported tasks.

use std::io::{self, Write};

use crate::actions::TaskKind;

/// Write the task table: number, key and name per line.
pub fn run_list(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "File Processing Engine Application Tasks\n")?;
    for kind in TaskKind::all() {
        writeln!(out, "{}\t{:<8}\t{}", kind.number(), kind.key(), kind.name())?;
    }
    Ok(())
}
