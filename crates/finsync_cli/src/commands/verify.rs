//! Verify command implementation.

use finsync_core::{JournalEntry, JournaledStore, Record, Timestamp};
use finsync_sync_protocol::{validate_loan, validate_transaction};
use serde::Serialize;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default, Serialize)]
pub struct VerifyReport {
    /// Intact entries.
    pub entries: usize,
    /// Full-record writes.
    pub puts: usize,
    /// Soft deletes.
    pub soft_deletes: usize,
    /// Tombstone writes.
    pub tombstones: usize,
    /// Pruning markers.
    pub prunes: usize,
    /// Length of the intact prefix.
    pub valid_len: u64,
    /// Bytes of a torn final frame, dropped on the next open.
    pub torn_bytes: u64,
    /// Everything that is wrong with the intact entries.
    pub problems: Vec<String>,
}

impl VerifyReport {
    /// Returns true if no problems were found.
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Reads the journal at `path` without locking or repairing it and checks
/// every entry.
///
/// Frame corruption (bad checksum, undecodable entry) is an error; a torn
/// final frame is reported but is not.
pub fn verify(path: &Path) -> Result<VerifyReport, Box<dyn std::error::Error>> {
    let scan = JournaledStore::scan_journal(path)?;
    let mut report = VerifyReport {
        entries: scan.entries.len(),
        valid_len: scan.valid_len,
        torn_bytes: scan.torn_bytes,
        ..VerifyReport::default()
    };

    let mut last_horizon = Timestamp::EPOCH;
    for (index, entry) in scan.entries.iter().enumerate() {
        let at = format!("journal[{index}]");
        match entry {
            JournalEntry::Put { user, record } => {
                report.puts += 1;
                if record.user_id() != user {
                    report
                        .problems
                        .push(format!("{at}: record owned by {} filed under {user}", record.user_id()));
                }
                match record {
                    Record::Transaction(tx) => validate_transaction(tx, &at, &mut report.problems),
                    Record::Loan(loan) => validate_loan(loan, &at, &mut report.problems),
                }
                if record.updated_at() < record.created_at() {
                    report.problems.push(format!("{at}: updatedAt precedes createdAt"));
                }
            }
            JournalEntry::SoftDelete { .. } => report.soft_deletes += 1,
            JournalEntry::Tombstone(tombstone) => {
                report.tombstones += 1;
                if tombstone.record_id.is_empty() {
                    report.problems.push(format!("{at}: tombstone without an id"));
                }
            }
            JournalEntry::Prune { horizon } => {
                report.prunes += 1;
                if *horizon < last_horizon {
                    report
                        .problems
                        .push(format!("{at}: pruning horizon {horizon} moves backwards"));
                }
                last_horizon = last_horizon.max(*horizon);
            }
        }
    }

    Ok(report)
}

/// Runs the verify command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = verify(path)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Verifying journal at {}", path.display());
        println!();
        println!("  Entries:      {}", report.entries);
        println!("  Puts:         {}", report.puts);
        println!("  Soft deletes: {}", report.soft_deletes);
        println!("  Tombstones:   {}", report.tombstones);
        println!("  Prunes:       {}", report.prunes);
        println!("  Intact bytes: {}", report.valid_len);
        if report.torn_bytes > 0 {
            println!(
                "  Torn tail:    {} bytes (dropped on next open)",
                report.torn_bytes
            );
        }
        println!();
        for problem in &report.problems {
            println!("  ✗ {problem}");
        }
        if report.is_ok() {
            println!("✓ Journal is consistent");
        }
    }

    if report.is_ok() {
        Ok(())
    } else {
        Err(format!("{} problem(s) found", report.problems.len()).into())
    }
}
