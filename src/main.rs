use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use menza_sync::config::Config;
use menza_sync::db::Database;
use menza_sync::hash::HashStore;
use menza_sync::kv::SqliteKvStore;
use menza_sync::menza::{HttpMenzaApi, Language, Menza, SubsystemId, SubsystemParams, SyncReport};
use menza_sync::refresh::{Refresh, RefreshState};
use menza_sync::sync::{fan_out, SyncSource};
use menza_sync::validity::{SystemClock, ValidityChecker};

#[derive(Parser, Debug)]
#[command(name = "menza-sync")]
#[command(about = "Sync cafeteria menus, contacts and opening hours to a local database")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/menza-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Ignore cached validity and refetch everything
  #[arg(short, long)]
  force: bool,

  /// Only sync this cafeteria (repeatable)
  #[arg(short, long = "subsystem")]
  subsystems: Vec<u32>,

  /// Content language: cs or en
  #[arg(short, long)]
  lang: Option<String>,

  /// Also sync week menus
  #[arg(short, long)]
  week: bool,

  /// Forget all validity records before syncing
  #[arg(long)]
  invalidate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let mut config = Config::load(args.config.as_deref())?;
  if let Some(lang) = &args.lang {
    config.language =
      Language::from_code(lang).ok_or_else(|| eyre!("Unknown language: {}", lang))?;
  }
  if !args.subsystems.is_empty() {
    config.subsystems = args.subsystems.iter().copied().map(SubsystemId).collect();
  }

  let data_dir = config.data_dir()?;
  let _log_guard = init_logging(&data_dir)?;

  let kv = Arc::new(SqliteKvStore::open(&data_dir.join("state.db"))?);
  let checker = Arc::new(
    ValidityChecker::new(kv.clone(), Arc::new(SystemClock))?
      .with_time_zone(config.parsed_time_zone()?)
      .with_recent_window(config.recent_window()),
  );
  if args.invalidate {
    checker.invalidate_all()?;
  }
  let hashes = Arc::new(HashStore::new(kv));
  let db = Arc::new(Database::open(&Database::path_in(&data_dir))?);
  let api = Arc::new(HttpMenzaApi::new(&config.api.url, config.api.timeout())?);
  let menza = Arc::new(Menza::new(api, db, checker, hashes));

  let language = config.language;
  let forced = args.force;
  let mut refresh = {
    let menza = menza.clone();
    let only = config.subsystems.clone();
    Refresh::new(move || {
      let menza = menza.clone();
      let only = only.clone();
      async move { menza.sync_all_important(language, &only, forced).await }
    })
  };

  refresh.start();
  let interrupted = tokio::select! {
    _ = refresh.wait() => false,
    _ = tokio::signal::ctrl_c() => true,
  };
  if interrupted {
    refresh.cancel();
    return Err(eyre!("Interrupted"));
  }

  let report = match refresh.state() {
    RefreshState::Done(report) => report.clone(),
    RefreshState::Failed(e) => return Err(eyre!("Sync failed: {}", e)),
    _ => return Err(eyre!("Sync did not finish")),
  };
  print_report(&menza, language, &report);

  if args.week {
    let targets: Vec<SubsystemParams> = menza
      .subsystems()
      .load(language)
      .into_iter()
      .filter(|s| s.opened && (config.subsystems.is_empty() || config.subsystems.contains(&s.id)))
      .map(|s| SubsystemParams::new(s.id, language))
      .collect();

    let week = fan_out(targets, |params| {
      let menza = menza.clone();
      async move { menza.week().sync(&params, forced).await }
    })
    .await;

    println!("week menus: {}", week.combined);
    for failure in &week.failures {
      println!("  ! {}", failure);
    }
  }

  Ok(())
}

fn print_report(menza: &Menza, language: Language, report: &SyncReport) {
  println!("cafeterias: {}", report.subsystems);

  for subsystem in menza.subsystems().load(language) {
    if !subsystem.opened {
      continue;
    }
    let params = SubsystemParams::new(subsystem.id, language);
    let dishes = menza.today().load(&params);
    let info = menza.info().load(&params);
    println!(
      "  {:>3} {:<40} {} dishes, {} contacts, {} opening hours",
      subsystem.id,
      subsystem.name,
      dishes.len(),
      info.contacts.len(),
      info.opening_hours.len()
    );
  }

  for failure in &report.sources.failures {
    println!("  ! {}", failure);
  }
  if let Some(headline) = report.combined().headline() {
    println!("{}", headline);
  }
}

/// Log to a daily rotated file in the data directory; only warnings reach
/// the console.
fn init_logging(data_dir: &Path) -> Result<WorkerGuard> {
  let (non_blocking, guard) =
    tracing_appender::non_blocking(rolling::daily(data_dir.join("logs"), "menza-sync.log"));

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("menza_sync=debug")))
    .with(
      fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::WARN),
    )
    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
