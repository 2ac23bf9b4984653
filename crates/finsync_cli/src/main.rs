//! finsync CLI
//!
//! Operator tools for a finsync journaled store. Run them against a stopped
//! server: commands that open the store take its directory lock.
//!
//! # Commands
//!
//! - `inspect` - Display record and tombstone counts
//! - `verify` - Check journal framing and every journaled record
//! - `compact` - Rewrite the journal as a snapshot
//! - `prune-tombstones` - Drop old tombstones
//! - `dump-journal` - Print journal entries for debugging
//! - `issue-token` - Sign a bearer token for a user

mod commands;

use clap::{Parser, Subcommand};
use commands::prune::Horizon;
use finsync_core::Timestamp;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// finsync command-line store tools.
#[derive(Parser)]
#[command(name = "finsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display record and tombstone counts
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify journal integrity
    Verify {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rewrite the journal as a snapshot of the current state
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Drop tombstones; clients with older cursors get a full resync
    PruneTombstones {
        /// Drop tombstones older than this many days
        #[arg(long, conflicts_with = "before")]
        older_than_days: Option<u64>,

        /// Drop tombstones deleted before this RFC 3339 instant
        #[arg(long)]
        before: Option<String>,
    },

    /// Print journal entries for debugging
    DumpJournal {
        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Skip this many entries
        #[arg(short, long, default_value = "0")]
        offset: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Issue a bearer token for a user
    IssueToken {
        /// User ID the token authenticates
        #[arg(short, long)]
        user: String,

        /// HMAC secret (defaults to $FINSYNC_AUTH_SECRET)
        #[arg(short, long)]
        secret: Option<String>,

        /// Token lifetime in days
        #[arg(short, long, default_value = "30")]
        expiry_days: u64,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify { format } => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path, &format)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::PruneTombstones {
            older_than_days,
            before,
        } => {
            let path = cli.path.ok_or("Store path required for prune-tombstones")?;
            let horizon = match (older_than_days, before) {
                (Some(days), _) => Horizon::OlderThan(Duration::from_secs(days * 24 * 60 * 60)),
                (None, Some(at)) => Horizon::Before(Timestamp::parse(&at)?),
                (None, None) => return Err("one of --older-than-days or --before is required".into()),
            };
            commands::prune::run(&path, horizon)?;
        }
        Commands::DumpJournal {
            limit,
            offset,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for dump-journal")?;
            commands::dump_journal::run(&path, limit, offset, &format)?;
        }
        Commands::IssueToken {
            user,
            secret,
            expiry_days,
        } => {
            commands::issue_token::run(secret, &user, expiry_days)?;
        }
        Commands::Version => {
            println!("finsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Wire format: JSON, RFC 3339 timestamps");
        }
    }

    Ok(())
}
