mod ballast;
mod config;
mod laptime;
mod poller;
mod provider;
mod records;
mod server;
mod snapshot;
mod source;
mod store;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{Config, SourceKind};
use crate::laptime::{format_delta, sector_deltas};
use crate::poller::{PollState, Poller};
use crate::provider::HttpSource;
use crate::records::Dashboard;
use crate::source::{MockSource, SnapshotSource};
use crate::store::{FileStore, KvStore, MemoryStore};

fn cli() -> Command {
    Command::new("kartdash")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Live karting timing relay with ballast and sector advice")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Config file (defaults to ./kartdash.json when present)"),
        )
        .arg(
            Arg::new("source")
                .long("source")
                .value_name("SOURCE")
                .global(true)
                .value_parser(["mock", "http"])
                .help("Override the snapshot source"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("serve")
                .about("Run the HTTP relay and serve the dashboard")
                .arg(
                    Arg::new("bind")
                        .long("bind")
                        .value_name("ADDR")
                        .help("Listen address, e.g. 0.0.0.0:8080"),
                )
                .arg(
                    Arg::new("ephemeral")
                        .long("ephemeral")
                        .action(clap::ArgAction::SetTrue)
                        .help("Keep history, drivers and layout in memory only"),
                ),
        )
        .subcommand(Command::new("watch").about("Poll the live timing and print it to the terminal"))
        .subcommand(
            Command::new("ballast")
                .about("Work out ballast plates for a driver")
                .arg(
                    Arg::new("driver")
                        .required(true)
                        .value_parser(clap::value_parser!(f64))
                        .help("Driver weight in kg"),
                )
                .arg(
                    Arg::new("target")
                        .required(true)
                        .value_parser(clap::value_parser!(f64))
                        .help("Class minimum weight in kg"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = cli().get_matches();
    let mut config = Config::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    if let Some(source) = matches.get_one::<String>("source") {
        config.provider.source = if source == "http" {
            SourceKind::Http
        } else {
            SourceKind::Mock
        };
    }

    match matches.subcommand() {
        Some(("serve", sub)) => run_serve(config, sub).await,
        Some(("watch", _)) => run_watch(config).await,
        Some(("ballast", sub)) => {
            run_ballast(sub);
            Ok(())
        }
        _ => unreachable!("subcommand_required"),
    }
}

/// Builds the configured source. The HTTP source is also returned on its own so the relay
/// can proxy one-shot requests for other circuits.
fn build_source(config: &Config) -> Result<(Arc<dyn SnapshotSource>, Option<Arc<HttpSource>>)> {
    match config.provider.source {
        SourceKind::Mock => {
            let seed = chrono::Utc::now().timestamp_millis() as u64;
            let mock: Arc<dyn SnapshotSource> =
                Arc::new(MockSource::new(seed, config.provider.mock_karts));
            Ok((mock, None))
        }
        SourceKind::Http => {
            let http = Arc::new(
                HttpSource::new(&config.provider).context("Failed to set up timing provider")?,
            );
            let source: Arc<dyn SnapshotSource> = http.clone();
            Ok((source, Some(http)))
        }
    }
}

async fn run_serve(config: Config, sub: &ArgMatches) -> Result<()> {
    let bind = sub
        .get_one::<String>("bind")
        .cloned()
        .unwrap_or_else(|| config.server.bind.clone());

    let (source, provider) = build_source(&config)?;
    let store: Arc<dyn KvStore> = if sub.get_flag("ephemeral") {
        info!("Dashboard data is in-memory only");
        Arc::new(MemoryStore::new())
    } else {
        let store = FileStore::open(&config.data_dir)
            .with_context(|| format!("Failed to open data dir {}", config.data_dir.display()))?;
        info!("Persisting dashboard data in {}", store.dir().display());
        Arc::new(store)
    };

    let state = server::AppState {
        poller: Arc::new(Poller::spawn(source, config.poll.interval())),
        provider,
        dashboard: Arc::new(Dashboard::new(store)),
        circuit: config.provider.circuit.clone(),
    };
    server::serve(&bind, &config.server.static_dir, state).await
}

async fn run_watch(config: Config) -> Result<()> {
    let (source, _) = build_source(&config)?;
    let poller = Poller::spawn(source, config.poll.interval());
    let mut rx = poller.subscribe();

    println!("kartdash watching circuit {}", config.provider.circuit);
    println!("Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = rx.borrow_and_update().clone();
                print_state(&state);
            }
        }
    }

    poller.shutdown().await;
    Ok(())
}

fn print_state(state: &PollState) {
    if let Some(err) = &state.error {
        eprintln!("⚠ {}", err);
    }
    let Some(snapshot) = &state.data else {
        return;
    };

    let leader = snapshot.leader().map_or("-", |row| row.kart.as_str());
    println!(
        "\n[{}] {} drivers, leader kart {}",
        snapshot.status,
        snapshot.drivers.len(),
        leader
    );
    println!(
        "{:>3}  {:>4}  {:<18} {:>10} {:>10} {:>9} {:>4}  Sectors vs best",
        "Pos", "Kart", "Driver", "Last", "Best", "Gap", "Laps"
    );
    for (row, deltas) in snapshot.drivers.iter().zip(sector_deltas(snapshot)) {
        let sectors: Vec<String> = deltas
            .deltas_ms
            .iter()
            .map(|d| d.map_or_else(|| "-".to_string(), format_delta))
            .collect();
        println!(
            "{:>3}  {:>4}  {:<18} {:>10} {:>10} {:>9} {:>4}  {}",
            row.position,
            row.kart,
            row.name,
            row.last_lap,
            row.best_lap,
            row.gap,
            row.laps,
            sectors.join(" ")
        );
    }
    if let Some(comments) = &snapshot.comments {
        for comment in comments {
            println!("  {} {}", comment.time, comment.text);
        }
    }
}

fn run_ballast(sub: &ArgMatches) {
    let driver = *sub.get_one::<f64>("driver").expect("required arg");
    let target = *sub.get_one::<f64>("target").expect("required arg");
    let breakdown = ballast::compute_ballast(driver, target);
    println!("{}", ballast::format_ballast(&breakdown));
}
