//! `vibrolog` - CLI for offline-first vibration reading capture
//!
//! This binary drives guided capture from the terminal and exposes the
//! ledger, sync and configuration surfaces.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use vibrolog::cli::{
    CaptureCommand, CaptureInput, CatalogCommand, Cli, Command, ConfigCommand, EditCommand,
    LedgerCommand,
};
use vibrolog::{
    init_logging, AppContext, CommitOutcome, Config, EntryError, EntryState, GuidedEntryMachine,
    RecordFilter, Submitted, SyncEvent,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::Capture(cmd) => handle_capture(&config, cmd).await,
        Command::Edit(cmd) => handle_edit(&config, cmd).await,
        Command::Sync(cmd) => handle_sync(&config, cmd.watch).await,
        Command::Status(cmd) => handle_status(&config, cmd.json).await,
        Command::Ledger(cmd) => handle_ledger(&config, cmd),
        Command::Catalog(cmd) => handle_catalog(&config, cmd),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn open_context(config: &Config) -> Result<AppContext> {
    AppContext::from_config(config)
        .with_context(|| format!("opening ledger at {}", config.database_path().display()))
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

async fn handle_capture(config: &Config, cmd: CaptureCommand) -> Result<()> {
    let ctx = open_context(config)?;
    let online = ctx.probe_once().await;
    let background = ctx.spawn_background();
    let mut machine = ctx.entry_machine();
    let date = cmd.date.unwrap_or_else(today);

    let unit_name = ctx
        .catalog
        .unit(&cmd.unit)
        .map_or_else(|| cmd.unit.clone(), |u| u.name.clone());
    println!("{unit_name} - {date} ({})", if online { "online" } else { "offline" });
    println!("Commands: note <text>, restart, quit");
    println!();

    let selected = machine
        .select_unit_on(&cmd.unit, date)
        .await
        .map(|state| matches!(state, EntryState::Complete { .. }));
    match selected {
        Ok(true) => println!("Every equipment is already captured for this day."),
        Ok(false) => run_capture_loop(&mut machine).await?,
        Err(e) => eprintln!("{e}"),
    }

    if let Some(background) = background {
        background.shutdown().await;
    }
    Ok(())
}

async fn run_capture_loop(machine: &mut GuidedEntryMachine) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print_prompt(machine);
        let Some(line) = lines.next_line().await.context("reading input")? else {
            break;
        };

        match CaptureInput::parse(&line) {
            CaptureInput::Quit => break,
            CaptureInput::Restart => match machine.restart_equipment() {
                Ok(()) => println!("Equipment restarted."),
                Err(e) => eprintln!("{e}"),
            },
            CaptureInput::Note(text) => match machine.set_note(&text) {
                Ok(()) if text.is_empty() => println!("Note cleared."),
                Ok(()) => println!("Note set."),
                Err(e) => eprintln!("{e}"),
            },
            CaptureInput::Value(raw) => match machine.submit_value(&raw).await {
                Ok(Submitted::Stored { .. }) => {}
                Ok(Submitted::Committed {
                    outcome,
                    grid_complete,
                }) => {
                    report_commit(&outcome);
                    if grid_complete {
                        println!("All equipment captured for this day.");
                        break;
                    }
                }
                Err(EntryError::Ledger(e)) => {
                    eprintln!("CAPTURE NOT SAVED: {e}");
                    eprintln!("The readings for this equipment are still pending; submit the last value again.");
                }
                Err(e @ EntryError::Rejected(_)) => eprintln!("Rejected: {e}"),
                Err(e) => eprintln!("{e}"),
            },
        }
    }
    Ok(())
}

fn print_prompt(machine: &GuidedEntryMachine) {
    let (Some(equipment), Some(parameter)) =
        (machine.current_equipment(), machine.current_parameter())
    else {
        return;
    };
    let progress = machine.progress();
    println!(
        "[{}/{}] {} ({}) - {} {} (max {}):",
        progress.done() + 1,
        progress.total(),
        equipment.name,
        equipment.id,
        parameter.id,
        parameter.name,
        parameter.max_value
    );
}

fn report_commit(outcome: &CommitOutcome) {
    let id = outcome.local_id().unwrap_or_default();
    if outcome.offline {
        match &outcome.remote_error {
            Some(reason) => println!(
                "Saved offline: {} (#{id}), will sync later ({reason})",
                outcome.record.equipment
            ),
            None => println!(
                "Saved offline: {} (#{id}), will sync later",
                outcome.record.equipment
            ),
        }
    } else {
        println!("Saved and synced: {} (#{id})", outcome.record.equipment);
    }
}

async fn handle_edit(config: &Config, cmd: EditCommand) -> Result<()> {
    let ctx = open_context(config)?;
    ctx.probe_once().await;
    let mut machine = ctx.entry_machine();
    let date = cmd.date.unwrap_or_else(today);

    let previous = machine
        .edit_select(&cmd.unit, &cmd.equipment, &cmd.parameter, date)
        .await?;
    if let Some(note) = &cmd.note {
        machine.set_note(note)?;
    }
    let outcome = machine.edit_submit(&cmd.value).await?;

    match previous {
        Some(value) => println!("{} {}: {value} -> {}", cmd.equipment, cmd.parameter, cmd.value),
        None => println!("{} {}: set to {}", cmd.equipment, cmd.parameter, cmd.value),
    }
    report_commit(&outcome);
    Ok(())
}

async fn handle_sync(config: &Config, watch: bool) -> Result<()> {
    let ctx = open_context(config)?;
    let online = ctx.probe_once().await;

    if !watch {
        if !online {
            let waiting = ctx.coordinator.ledger_stats()?.unsynced;
            println!("Offline; {waiting} records waiting for sync.");
            return Ok(());
        }
        let summary = ctx.coordinator.reconcile().await?;
        println!(
            "Synced {} of {} records ({} failed).",
            summary.synced, summary.attempted, summary.failed
        );
        return Ok(());
    }

    let mut events = ctx.coordinator.subscribe();
    let Some(background) = ctx.spawn_background() else {
        anyhow::bail!("no remote store configured; nothing to watch");
    };
    println!("Watching connectivity; press Ctrl-C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                if let Ok(SyncEvent::Reconciled(summary)) = event {
                    println!(
                        "Synced {} of {} records ({} failed).",
                        summary.synced, summary.attempted, summary.failed
                    );
                }
            }
        }
    }

    background.shutdown().await;
    Ok(())
}

async fn handle_status(config: &Config, json: bool) -> Result<()> {
    let ctx = open_context(config)?;
    let online = ctx.probe_once().await;
    let stats = ctx.coordinator.ledger_stats()?;
    let user = ctx.config().author();

    if json {
        let status = serde_json::json!({
            "online": online,
            "remote_configured": config.remote_enabled(),
            "user": user.as_ref().map(|a| &a.display_name),
            "database_path": config.database_path(),
            "ledger": {
                "total": stats.total,
                "synced": stats.synced,
                "unsynced": stats.unsynced,
                "oldest_capture": stats.oldest_capture,
                "newest_capture": stats.newest_capture,
                "db_size_bytes": stats.db_size_bytes,
            },
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("vibrolog status");
        println!("---------------");
        println!("Connectivity:  {}", if online { "online" } else { "offline" });
        println!(
            "Remote store:  {}",
            config.remote.base_url.as_deref().unwrap_or("not configured")
        );
        println!(
            "User:          {}",
            user.map_or_else(|| vibrolog::record::GUEST_NAME.to_string(), |a| a.display_name)
        );
        println!("Database:      {}", config.database_path().display());
        println!("Size:          {} bytes", stats.db_size_bytes);
        println!();
        println!("Records:       {}", stats.total);
        println!("  synced:      {}", stats.synced);
        println!("  unsynced:    {}", stats.unsynced);
        if let (Some(oldest), Some(newest)) = (stats.oldest_capture, stats.newest_capture) {
            println!("Oldest:        {oldest}");
            println!("Newest:        {newest}");
        }
    }
    Ok(())
}

fn handle_ledger(config: &Config, cmd: LedgerCommand) -> Result<()> {
    let ctx = open_context(config)?;
    let ledger = ctx
        .ledger
        .lock()
        .map_err(|_| anyhow::anyhow!("ledger lock poisoned"))?;

    match cmd {
        LedgerCommand::List {
            unsynced,
            unit,
            date,
            limit,
            json,
        } => {
            let filter = RecordFilter {
                unit,
                date,
                ..RecordFilter::default()
            };
            let records: Vec<_> = if unsynced {
                ledger
                    .list_unsynced()?
                    .into_iter()
                    .filter(|r| filter.matches(r))
                    .take(limit)
                    .collect()
            } else {
                ledger.query(&filter)?.into_iter().take(limit).collect()
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No records.");
            } else {
                for r in &records {
                    println!(
                        "#{:<6} {} {:<5} {:<9} {:<9} {} ({} readings, {})",
                        r.local_id.unwrap_or_default(),
                        r.date,
                        r.unit,
                        r.equipment,
                        if r.synced { "synced" } else { "unsynced" },
                        r.author_name,
                        r.parameters.len(),
                        r.captured_at.with_timezone(&Local).format("%H:%M:%S"),
                    );
                }
            }
        }
        LedgerCommand::Clear { yes } => {
            let total = ledger.count()?;
            let unsynced = ledger.count_unsynced()?;
            if yes {
                let removed = ledger.clear()?;
                println!("Removed {removed} records.");
            } else {
                println!("This will delete {total} records, {unsynced} of them never synced.");
                println!("Use --yes to confirm.");
            }
        }
    }
    Ok(())
}

fn handle_catalog(config: &Config, cmd: CatalogCommand) -> Result<()> {
    let catalog = vibrolog::Catalog::load_from(config.catalog.path.as_deref())
        .context("loading catalog")?;

    match cmd {
        CatalogCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&catalog)?);
                return Ok(());
            }
            println!("[Units]");
            for unit in &catalog.units {
                println!("  {:<10} {}", unit.id, unit.name);
            }
            println!();
            println!("[Equipment]");
            for equipment in &catalog.equipment {
                println!("  {:<10} {}", equipment.id, equipment.name);
            }
            println!();
            println!("[Parameters]");
            for p in &catalog.parameters {
                println!(
                    "  {:<10} {:<40} {:<13} max {} ({} decimals)",
                    p.id, p.name, p.kind, p.max_value, p.max_decimals
                );
            }
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                let mut shown = config.clone();
                shown.remote.api_key = shown.remote.api_key.map(|_| "<redacted>".to_string());
                shown.remote.access_token =
                    shown.remote.access_token.map(|_| "<redacted>".to_string());
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Remote]");
                println!(
                    "  Base URL:           {}",
                    config.remote.base_url.as_deref().unwrap_or("(none)")
                );
                println!("  Table:              {}", config.remote.table);
                println!("  Timeout (ms):       {}", config.remote.timeout_ms);
                println!("  API key set:        {}", config.remote.api_key.is_some());
                println!();
                println!("[Sync]");
                println!(
                    "  Anonymous remote:   {}",
                    config.sync.allow_anonymous_remote
                );
                println!();
                println!("[Connectivity]");
                println!(
                    "  Probe address:      {}",
                    config.probe_address().as_deref().unwrap_or("(none)")
                );
                println!(
                    "  Probe interval (s): {}",
                    config.connectivity.probe_interval_secs
                );
                println!();
                println!("[Entry]");
                println!("  Max note length:    {}", config.entry.max_note_length);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
