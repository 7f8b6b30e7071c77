// src/commands.rs
//! Command handlers for the majordomo CLI

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::thread;
use std::time::Duration;

use majordomo::bot::DisabledTransport;
use majordomo::lifecycle::{self, App};
use majordomo::schema;
use majordomo::store::ConfigStore;
use majordomo::{AppConfig, SwapOutcome};

/// Start every component and keep the process alive
pub fn cmd_run(config_path: Option<&Path>) -> Result<()> {
    let config = AppConfig::load_or_default(config_path)?;

    // Deployments with an XMPP stack inject their transport through
    // `App::init`; the stock binary runs the bot degraded.
    let app = App::init(config, Box::new(DisabledTransport))
        .context("failed to start components")?;

    println!(
        "majordomo v{} running; document at {}",
        env!("CARGO_PKG_VERSION"),
        app.store().primary_path().display()
    );

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

/// One reconciliation pass and exit
pub fn cmd_sync(config_path: Option<&Path>) -> Result<()> {
    let config = AppConfig::load_or_default(config_path)?;
    let (_store, mutator) = lifecycle::open_offline(&config, None)?;

    match mutator.swap_state("manual sync", |doc| doc) {
        SwapOutcome::Applied { report, .. } => {
            println!("{}", report.summary());
            if report.failure_count() > 0 {
                bail!("{} remote calls failed", report.failure_count());
            }
            Ok(())
        }
        SwapOutcome::Rejected { errors, .. } => {
            bail!("sync rejected: {}", errors.join("; "))
        }
        SwapOutcome::Locked { reason, expires_at } => {
            bail!("locked for {} until {}", reason, expires_at)
        }
    }
}

/// Validate a document file and report humanized errors
pub fn cmd_validate(file: Option<&Path>, config_path: Option<&Path>) -> Result<()> {
    let config = AppConfig::load_or_default(config_path)?;
    let path = match file {
        Some(p) => p.to_path_buf(),
        None => config.db_folder.join(majordomo::store::PRIMARY_FILE),
    };

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read {}", path.display()))?;

    match schema::parse_and_validate(&text) {
        Ok(doc) => {
            println!(
                "{} is valid: {} groups, {} rooms, {} members",
                path.display(),
                doc.groups.len(),
                doc.rooms.len(),
                doc.members.len()
            );
            Ok(())
        }
        Err(majordomo::Error::Validation(errors)) => {
            for issue in errors.issues() {
                eprintln!("  {}", issue);
            }
            bail!("{} failed validation", path.display())
        }
        Err(e) => bail!("{}", e),
    }
}

/// Show document, tracking, and lock status
pub fn cmd_status(config_path: Option<&Path>) -> Result<()> {
    let config = AppConfig::load_or_default(config_path)?;
    let store = ConfigStore::open(&config.db_folder)?;

    let doc = store.read()?;
    println!("document:  {}", store.primary_path().display());
    println!("sha256:    {}", doc.file_sha256.as_deref().unwrap_or("-"));
    println!(
        "contents:  {} groups, {} rooms, {} members",
        doc.groups.len(),
        doc.rooms.len(),
        doc.members.len()
    );
    println!(
        "tracking:  {} members, {} rooms, {} groups",
        doc.tracking.managed_members.len(),
        doc.tracking.managed_rooms.len(),
        doc.tracking.managed_groups.len()
    );

    let lock = store.read_lock()?;
    if lock.locked {
        println!(
            "lock:      held for {} until {}",
            lock.reason.as_deref().unwrap_or("unknown"),
            lock.expires_at.map(|t| t.to_rfc3339()).unwrap_or_default()
        );
    } else {
        println!("lock:      free");
    }
    Ok(())
}

/// Create the db folder and seed the default document
pub fn cmd_init(config_path: Option<&Path>) -> Result<()> {
    let config = AppConfig::load_or_default(config_path)?;
    let store = ConfigStore::open(&config.db_folder)?;
    println!("seeded {}", store.primary_path().display());
    Ok(())
}
