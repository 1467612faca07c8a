// Cumulus file transfer engine.
// Copyright 2024-2026 Cumulus contributors.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Command-line front end for the Cumulus transfer engine.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Condvar, Mutex};

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cumulus::account::{
    Account, AccountIndex, FileSecrets, MemorySecrets, SecretStore, Settings, StaticAccounts,
};
use cumulus::backend;
use cumulus::counters::Counter;
use cumulus::enqueue::EnqueuePlan;
use cumulus::filter::Filter;
use cumulus::item::{Priority, TransferItem};
use cumulus::misc::bytes_to_human;
use cumulus::monitor::void::VoidMonitor;
use cumulus::monitor::Monitor;
use cumulus::{AccountKind, ConflictPolicy, Engine, EngineConfig, Error, TransferRecord};

#[derive(Debug, Parser)]
#[command(name = "cumulus", version, about = "Move files between local and S3-family storage.")]
struct Args {
    /// Path to the transfers database.
    #[arg(long, global = true, default_value = "transfers.db")]
    db: PathBuf,

    /// Path to the accounts settings file (JSON).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Path to the secrets file (JSON map of access key to secret).
    #[arg(long, global = true)]
    secrets: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List configured accounts.
    Accounts,
    /// Queue transfers from sources into a destination directory.
    ///
    /// Locations are written `kind:path`, e.g. `local:/tmp/photos` or
    /// `s3:/bucket/prefix/`.
    Enqueue {
        /// Source files or directories.
        #[arg(required = true)]
        sources: Vec<String>,
        /// Destination directory.
        #[arg(long)]
        dest: String,
        /// Recurse into source directories.
        #[arg(long)]
        recursive: bool,
        /// Only enqueue files whose name matches this glob.
        #[arg(long)]
        name: Option<String>,
        /// Priority 1 (highest) to 5.
        #[arg(long, default_value_t = 3)]
        priority: i64,
    },
    /// Run the engine until the queue drains.
    Run {
        /// Size of the worker pool.
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Conflict policy: overwrite, skip, hash, size, newer, rename.
        #[arg(long, default_value = "skip")]
        conflict: String,
    },
    /// Show pending, queued, and transferring rows.
    Queue,
    /// Show errored rows.
    Errors,
    /// Show completed rows.
    Completed,
    /// Reset queued and transferring rows back to pending.
    Reset,
    /// Remove rows by id.
    Remove { ids: Vec<i64> },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("cumulus: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> cumulus::Result<()> {
    let accounts = cli_accounts(args.settings.as_deref())?;
    let secrets: Arc<dyn SecretStore> = match &args.secrets {
        Some(path) => Arc::new(FileSecrets::new(path)),
        None => Arc::new(MemorySecrets::new()),
    };

    match args.command {
        Command::Accounts => {
            for account in &accounts {
                println!(
                    "{:<12} {:<20} {}",
                    account.kind, account.nickname, account.root
                );
            }
            Ok(())
        }
        Command::Enqueue {
            sources,
            dest,
            recursive,
            name,
            priority,
        } => {
            let index = AccountIndex::new(accounts.clone());
            let mut source_backends = Vec::new();
            for spec in &sources {
                source_backends.push(open_location(&index, secrets.as_ref(), spec)?);
            }
            let destination = open_location_dir(&index, secrets.as_ref(), &dest)?;
            let mut filters = Vec::new();
            if let Some(pattern) = &name {
                filters.push(Filter::name(pattern)?);
            }
            let plan = EnqueuePlan {
                sources: source_backends,
                destinations: vec![destination],
                filters,
                recursive,
                priority: Priority::from_code(priority),
            };
            let engine = engine_for(&args.db, accounts, secrets, Arc::new(VoidMonitor))?;
            let outcome = engine.enqueue(&plan, false)?;
            println!("{} rows queued", outcome.rows_added);
            Ok(())
        }
        Command::Run { workers, conflict } => {
            let monitor = Arc::new(RunMonitor::default());
            let mut config = EngineConfig::new(
                &args.db,
                Arc::new(StaticAccounts(accounts)),
                secrets,
                monitor.clone(),
            );
            config.max_workers = workers;
            config.conflict = ConflictPolicy::parse(&conflict)?;
            let engine = Engine::open(config)?;
            engine.start()?;
            monitor.wait();
            engine.shutdown();
            println!(
                "{} files, {} moved; {} skipped, {} errors",
                monitor.get(Counter::Files),
                bytes_to_human(monitor.get(Counter::FileBytes) as u64),
                monitor.get(Counter::Skipped),
                monitor.get(Counter::Errors),
            );
            Ok(())
        }
        Command::Queue => {
            let engine = engine_for(&args.db, accounts, secrets, Arc::new(VoidMonitor))?;
            print_rows(&engine.transfers()?);
            Ok(())
        }
        Command::Errors => {
            let engine = engine_for(&args.db, accounts, secrets, Arc::new(VoidMonitor))?;
            for row in engine.errors()? {
                println!("{:>6}  {}  {}", row.id, row.source, row.error_message);
            }
            Ok(())
        }
        Command::Completed => {
            let engine = engine_for(&args.db, accounts, secrets, Arc::new(VoidMonitor))?;
            print_rows(&engine.completed()?);
            Ok(())
        }
        Command::Reset => {
            let engine = engine_for(&args.db, accounts, secrets, Arc::new(VoidMonitor))?;
            let changed = engine.reset_queue()?;
            println!("{changed} rows reset");
            Ok(())
        }
        Command::Remove { ids } => {
            let engine = engine_for(&args.db, accounts, secrets, Arc::new(VoidMonitor))?;
            let removed = engine.remove_rows(&ids)?;
            println!("{removed} rows removed");
            Ok(())
        }
    }
}

fn engine_for(
    db: &Path,
    accounts: Vec<Account>,
    secrets: Arc<dyn SecretStore>,
    monitor: Arc<dyn Monitor>,
) -> cumulus::Result<Engine> {
    Engine::open(EngineConfig::new(
        db,
        Arc::new(StaticAccounts(accounts)),
        secrets,
        monitor,
    ))
}

/// Accounts from the settings file, plus a catch-all local account so
/// plain filesystem paths always resolve.
fn cli_accounts(settings: Option<&Path>) -> cumulus::Result<Vec<Account>> {
    let mut accounts = match settings {
        Some(path) => Settings::load(path)?.clients,
        None => Vec::new(),
    };
    if !accounts.iter().any(|a| a.kind == AccountKind::Local) {
        accounts.push(Account::local(if cfg!(windows) { "C:\\" } else { "/" }));
    }
    Ok(accounts)
}

/// Parse `kind:path` and open a backend for it.
fn open_location(
    index: &AccountIndex,
    secrets: &dyn SecretStore,
    spec: &str,
) -> cumulus::Result<Box<dyn backend::Backend>> {
    let (kind, path) = parse_location(spec)?;
    let is_dir = match kind {
        AccountKind::Local => Path::new(&path).is_dir(),
        _ => path.ends_with('/'),
    };
    let account = index
        .lookup(kind, &path)
        .cloned()
        .ok_or_else(|| Error::NoMatchingAccount {
            kind,
            path: path.clone(),
        })?;
    backend::open(&account, &path, is_dir, secrets)
}

/// Like [open_location] but the result is always a directory handle.
fn open_location_dir(
    index: &AccountIndex,
    secrets: &dyn SecretStore,
    spec: &str,
) -> cumulus::Result<Box<dyn backend::Backend>> {
    let (kind, path) = parse_location(spec)?;
    let account = index
        .lookup(kind, &path)
        .cloned()
        .ok_or_else(|| Error::NoMatchingAccount {
            kind,
            path: path.clone(),
        })?;
    backend::open(&account, &path, true, secrets)
}

fn parse_location(spec: &str) -> cumulus::Result<(AccountKind, String)> {
    let invalid = || Error::InvalidLocation {
        spec: spec.to_owned(),
    };
    let (kind, path) = spec.split_once(':').ok_or_else(invalid)?;
    let kind = match kind {
        "local" => AccountKind::Local,
        "s3" => AccountKind::S3,
        "do" | "spaces" => AccountKind::S3Compat,
        _ => return Err(invalid()),
    };
    if path.is_empty() {
        return Err(invalid());
    }
    Ok((kind, path.to_owned()))
}

fn print_rows(rows: &[TransferRecord]) {
    for row in rows {
        println!(
            "{:>6}  {:<12}  {:>10}  {}  ->  {}",
            row.id,
            row.status.to_string(),
            bytes_to_human(row.size),
            row.source,
            row.destination,
        );
    }
}

/// Monitor for `run`: logs item events and wakes the main thread when
/// the queue drains.
#[derive(Default)]
struct RunMonitor {
    counters: cumulus::counters::Counters,
    done: Mutex<bool>,
    signal: Condvar,
}

impl RunMonitor {
    fn get(&self, counter: Counter) -> usize {
        self.counters.get(counter)
    }

    fn wait(&self) {
        let mut done = self.done.lock().unwrap();
        while !*done {
            done = self.signal.wait(done).unwrap();
        }
    }
}

impl Monitor for RunMonitor {
    fn count(&self, counter: Counter, increment: usize) {
        self.counters.count(counter, increment);
    }

    fn set_counter(&self, counter: Counter, value: usize) {
        self.counters.set(counter, value);
    }

    fn transfer_started(&self, item: &TransferItem) {
        info!(id = item.id, source = item.source.root(), "transfer started");
    }

    fn transfer_finished(&self, item: &TransferItem) {
        info!(
            id = item.id,
            status = %item.status,
            processed = item.processed,
            message = %item.message,
            "transfer finished"
        );
    }

    fn transfer_stopped(&self, item: &TransferItem) {
        info!(id = item.id, "transfer stopped");
    }

    fn queue_changed(&self) {}

    fn enqueue_finished(&self, rows_added: usize) {
        info!(rows_added, "enqueue finished");
    }

    fn completed(&self) {
        *self.done.lock().unwrap() = true;
        self.signal.notify_all();
    }

    fn worker_count_changed(&self, workers: usize) {
        info!(workers, "worker pool resized");
    }
}
