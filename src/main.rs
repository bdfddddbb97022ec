//! Command-line front end for the job-file record store.

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use freightfile::activity::ActivityLog;
use freightfile::config::{StoreConfig, connect_from_config};
use freightfile::record::JobFileRecord;
use freightfile::store::JobFileStore;

#[derive(Parser)]
#[command(name = "freightfile", version, about = "Job file record store")]
struct Cli {
    /// Username recorded on saves, transitions, and deletes.
    #[arg(long, env = "FREIGHTFILE_ACTOR", default_value = "cli")]
    actor: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List active job files, optionally filtered by a substring.
    List {
        #[arg(long)]
        filter: Option<String>,
    },
    /// Print one job file as JSON.
    Show { id: String },
    /// Create or update a job file from a JSON document (`-` for stdin).
    Save { path: PathBuf },
    /// Mark a pending job file as checked.
    Check { id: String },
    /// Reopen a checked or approved job file for review.
    Uncheck { id: String },
    /// Approve a checked job file.
    Approve { id: String },
    /// Reject a checked job file with a reason.
    Reject {
        id: String,
        #[arg(long)]
        reason: String,
    },
    /// Soft-delete a job file into the recycle bin.
    Rm { id: String },
    /// List soft-deleted job files awaiting restore or purge.
    Recycled,
    /// Restore a job file from the recycle bin.
    Restore { id: String },
    /// Permanently delete a job file from the recycle bin.
    Purge { id: String },
    /// Write a full backup snapshot as JSON to stdout.
    Export,
    /// Restore records from a backup snapshot (`-` for stdin).
    Import { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = StoreConfig::resolve().context("resolving configuration")?;
    let adapter = connect_from_config(&config).await?;
    let store = JobFileStore::new(adapter).await?;
    let activity = ActivityLog::default();

    match cli.command {
        Command::List { filter } => {
            let rows = match filter.as_deref() {
                Some(query) => store.search(query).await?,
                None => store.list_active().await?,
            };
            for row in &rows {
                println!(
                    "{:<24} {:<10} inv:{:<16} awb:{:<16} {}",
                    row.job_file_number,
                    row.status,
                    row.invoice_number,
                    row.airway_bill_number,
                    row.shipper.as_deref().unwrap_or("-"),
                );
            }
            eprintln!("{} job file(s)", rows.len());
        }
        Command::Show { id } => {
            let record = store.load(&id).await?;
            activity.record_open(&cli.actor, &record.id);
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Save { path } => {
            let candidate: JobFileRecord =
                serde_json::from_str(&read_input(&path)?).context("parsing job file JSON")?;
            let stored = store.save(candidate, &cli.actor).await?;
            println!("saved '{}' ({})", stored.id, stored.status);
        }
        Command::Check { id } => {
            let record = store.mark_checked(&id, &cli.actor).await?;
            println!("'{}' is now {}", record.id, record.status);
        }
        Command::Uncheck { id } => {
            let record = store.mark_unchecked(&id, &cli.actor).await?;
            println!("'{}' is now {}", record.id, record.status);
        }
        Command::Approve { id } => {
            let record = store.mark_approved(&id, &cli.actor).await?;
            println!("'{}' is now {}", record.id, record.status);
        }
        Command::Reject { id, reason } => {
            let record = store.mark_rejected(&id, &cli.actor, &reason).await?;
            println!("'{}' is now {}", record.id, record.status);
        }
        Command::Rm { id } => {
            store.quarantine(&id, &cli.actor).await?;
            println!("'{id}' moved to the recycle bin");
        }
        Command::Recycled => {
            let records = store.list_quarantined().await?;
            for record in &records {
                let stamp = record
                    .deletion
                    .as_ref()
                    .map(|d| format!("deleted by {} at {}", d.deleted_by, d.deleted_at))
                    .unwrap_or_else(|| "no deletion stamp".to_string());
                println!("{:<24} {}", record.job_file_number, stamp);
            }
            eprintln!("{} recycled job file(s)", records.len());
        }
        Command::Restore { id } => {
            let record = store.restore(&id).await?;
            println!("restored '{}' ({})", record.id, record.status);
        }
        Command::Purge { id } => {
            store.purge(&id).await?;
            println!("'{id}' permanently deleted");
        }
        Command::Export => {
            let snapshot = store.export_all().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Import { path } => {
            let snapshot =
                serde_json::from_str(&read_input(&path)?).context("parsing backup snapshot")?;
            let report = store.import_all(snapshot).await?;
            println!(
                "imported {} job file(s) and {} user(s)",
                report.job_files, report.users
            );
        }
    }

    Ok(())
}

fn read_input(path: &PathBuf) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}
