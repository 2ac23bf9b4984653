//! Dump-journal command implementation.

use finsync_core::{JournalEntry, JournaledStore};
use serde::Serialize;
use std::path::Path;

/// One journal entry with its position.
#[derive(Debug, Serialize)]
pub struct DumpedEntry {
    /// Position in the journal.
    pub index: usize,
    /// The decoded entry.
    pub entry: JournalEntry,
}

/// Reads entries `offset..offset + limit` from the journal at `path`.
pub fn read_entries(
    path: &Path,
    offset: usize,
    limit: Option<usize>,
) -> Result<Vec<DumpedEntry>, Box<dyn std::error::Error>> {
    let scan = JournaledStore::scan_journal(path)?;
    Ok(scan
        .entries
        .into_iter()
        .enumerate()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .map(|(index, entry)| DumpedEntry { index, entry })
        .collect())
}

/// Runs the dump-journal command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    offset: usize,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = read_entries(path, offset, limit)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => {
            for dumped in &entries {
                println!("{:>6}  {}", dumped.index, dumped.entry);
            }
            println!();
            println!("{} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}
