//! Compact command implementation.

use super::{format_size, open_existing};
use finsync_core::{CompactionReport, JournaledStore};
use std::path::Path;

/// Journal size and the number of entries a snapshot of the current state needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionEstimate {
    /// Entries currently in the journal.
    pub journal_entries: usize,
    /// Current journal size in bytes.
    pub journal_bytes: u64,
}

/// Reads the journal without rewriting it.
pub fn estimate(path: &Path) -> Result<CompactionEstimate, Box<dyn std::error::Error>> {
    let scan = JournaledStore::scan_journal(path)?;
    Ok(CompactionEstimate {
        journal_entries: scan.entries.len(),
        journal_bytes: scan.valid_len + scan.torn_bytes,
    })
}

/// Rewrites the journal at `path` as a snapshot.
pub fn compact(path: &Path) -> Result<CompactionReport, Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    Ok(store.compact()?)
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting journal at {}", path.display());

    if dry_run {
        let estimate = estimate(path)?;
        println!("(dry run - no changes will be made)");
        println!();
        println!("  Journal entries: {}", estimate.journal_entries);
        println!("  Journal size:    {}", format_size(estimate.journal_bytes));
        return Ok(());
    }

    let report = compact(path)?;
    let saved = report.bytes_before.saturating_sub(report.bytes_after);
    println!();
    println!("  Size before: {}", format_size(report.bytes_before));
    println!("  Size after:  {}", format_size(report.bytes_after));
    println!(
        "  Space saved: {} ({:.1}%)",
        format_size(saved),
        if report.bytes_before > 0 {
            saved as f64 / report.bytes_before as f64 * 100.0
        } else {
            0.0
        }
    );
    println!("  Entries:     {}", report.entries);
    println!("✓ Compaction complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsync_core::{EntityStore, Record, StoreConfig};
    use finsync_testkit::{sample_transaction, test_user};

    #[test]
    fn compaction_drops_overwritten_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        {
            let store = JournaledStore::open(&path, &StoreConfig::default()).unwrap();
            for amount in 1..=5 {
                store
                    .put(&test_user(), Record::Transaction(sample_transaction("t1", f64::from(amount))))
                    .unwrap();
            }
        }

        assert_eq!(estimate(&path).unwrap().journal_entries, 5);
        let report = compact(&path).unwrap();
        assert_eq!(report.entries, 1);
        assert!(report.bytes_after < report.bytes_before);
        assert_eq!(estimate(&path).unwrap().journal_entries, 1);
    }
}
