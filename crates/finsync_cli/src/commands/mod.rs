//! CLI command implementations.

pub mod compact;
pub mod dump_journal;
pub mod inspect;
pub mod issue_token;
pub mod prune;
pub mod verify;

use finsync_core::{JournaledStore, StoreConfig};
use std::path::Path;

/// Opens an existing store for maintenance. Never creates one.
pub fn open_existing(path: &Path) -> Result<JournaledStore, Box<dyn std::error::Error>> {
    let config = StoreConfig::new().with_create_if_missing(false);
    Ok(JournaledStore::open(path, &config)?)
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
