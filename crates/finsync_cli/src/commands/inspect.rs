//! Inspect command implementation.

use super::{format_size, open_existing};
use finsync_core::StoreStats;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Counts from the replayed state.
    pub stats: StoreStats,
}

/// Opens the store at `path` and collects its statistics.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    Ok(InspectResult {
        path: path.display().to_string(),
        journal_size: store.journal_size()?,
        stats: store.stats(),
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    let stats = &result.stats;
    println!("finsync Store Inspection");
    println!("========================");
    println!();
    println!("Path: {}", result.path);
    println!("Journal size: {}", format_size(result.journal_size));
    println!();
    println!("Records:");
    println!("  Users:             {}", stats.users);
    println!("  Live transactions: {}", stats.live_transactions);
    println!("  Live loans:        {}", stats.live_loans);
    println!("  Soft-deleted rows: {}", stats.deleted_rows);
    println!();
    println!("Tombstones:");
    println!("  Retained:       {}", stats.tombstones);
    match stats.pruned_through {
        Some(horizon) => println!("  Pruned through: {}", horizon),
        None => println!("  Pruned through: never pruned"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsync_core::{EntityStore, JournaledStore, Record, RecordId, RecordType, StoreConfig};
    use finsync_testkit::{sample_loan, sample_transaction, test_user};

    #[test]
    fn counts_replayed_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        {
            let store = JournaledStore::open(&path, &StoreConfig::default()).unwrap();
            store.put(&test_user(), Record::Transaction(sample_transaction("t1", 10.0))).unwrap();
            store.put(&test_user(), Record::Transaction(sample_transaction("t2", 20.0))).unwrap();
            store.put(&test_user(), Record::Loan(sample_loan("l1", 1000.0, 12))).unwrap();
            store
                .soft_delete(&test_user(), RecordType::Transaction, &RecordId::new("t2"))
                .unwrap();
        }

        let result = inspect(&path).unwrap();
        assert_eq!(result.stats.users, 1);
        assert_eq!(result.stats.live_transactions, 1);
        assert_eq!(result.stats.live_loans, 1);
        assert_eq!(result.stats.deleted_rows, 1);
        assert!(result.journal_size > 0);
    }

    #[test]
    fn missing_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(inspect(&dir.path().join("nowhere")).is_err());
        assert!(!dir.path().join("nowhere").exists());
    }
}
