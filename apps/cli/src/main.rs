#![deny(warnings)]

//! Headless CLI that resumes a save, applies one command and prints the result.

use anyhow::{bail, Context, Result};
use clicker_core::{format_amount, format_rate, validate_state, EconomyState};
use clicker_econ::max_affordable;
use clicker_runtime::{RuntimeConfig, Session, Ticker};
use persistence::{legacy, JsonFileStore, SnapshotStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: tap-tycoon [--config FILE] [--save FILE] [--json] <command>

commands:
  status                 show balance, rate and owned upgrades
  catalog                list upgrades with their next price
  tap [N]                tap N times (default 1)
  buy ID [N]             buy N units of an upgrade (default 1)
  buy-max ID             buy as many units as the balance allows
  bonus [AMOUNT]         grant a bonus (default: configured reward)
  reward                 grant the configured reward
  tick SECONDS           accrue passive income for SECONDS
  run SECONDS            run the live ticker for SECONDS
  import-legacy FILE     convert a first-release save into the current format
  export-legacy FILE     write the current save in the first-release format";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    save: Option<PathBuf>,
    json: bool,
    command: Vec<String>,
}

fn parse_args() -> Args {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = it.next().map(PathBuf::from),
            "--save" => args.save = it.next().map(PathBuf::from),
            "--json" => args.json = true,
            _ => args.command.push(arg),
        }
    }
    args
}

fn count_arg(arg: Option<&String>, default: u64) -> Result<u64> {
    match arg {
        Some(s) => s.parse().with_context(|| format!("not a count: {s}")),
        None => Ok(default),
    }
}

fn seconds_arg(arg: Option<&String>) -> Result<Duration> {
    let Some(s) = arg else {
        bail!("missing SECONDS\n\n{USAGE}");
    };
    let secs: f64 = s.parse().with_context(|| format!("not a number: {s}"))?;
    Duration::try_from_secs_f64(secs).with_context(|| format!("invalid duration: {s}"))
}

fn print_status(state: &EconomyState, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(state)?);
        return Ok(());
    }
    println!(
        "Coins: {} | per second: {} | taps: {}",
        format_amount(state.balance()),
        format_rate(state.aggregate_production_rate()),
        state.total_taps()
    );
    for u in state.upgrades().iter().filter(|u| u.owned_count() > 0) {
        println!(
            "  {:<12} x{:<5} {}/s",
            u.definition.name,
            u.owned_count(),
            format_rate(u.total_production_rate())
        );
    }
    Ok(())
}

fn print_catalog(state: &EconomyState) {
    for u in state.upgrades() {
        let def = u.definition;
        let affordable = max_affordable(def.base_cost, u.owned_count(), state.balance());
        println!(
            "{:<10} {:<13} owned {:<5} next {:>9} | +{}/s each | can buy {} | {}",
            def.id,
            def.name,
            u.owned_count(),
            format_amount(u.current_cost()),
            def.base_production_rate,
            affordable,
            def.description
        );
    }
}

fn import_legacy(path: Option<&String>, store: &JsonFileStore) -> Result<()> {
    let Some(path) = path else {
        bail!("missing FILE\n\n{USAGE}");
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let snapshot = legacy::decode(&text).with_context(|| format!("decoding {path}"))?;
    store
        .save(&snapshot)
        .with_context(|| format!("writing {}", store.path().display()))?;
    println!(
        "Imported {} coins and {} upgrade entries into {}",
        format_amount(snapshot.balance),
        snapshot.owned_counts.len(),
        store.path().display()
    );
    Ok(())
}

fn export_legacy(path: Option<&String>, store: &JsonFileStore) -> Result<()> {
    let Some(path) = path else {
        bail!("missing FILE\n\n{USAGE}");
    };
    let Some(snapshot) = store.load() else {
        bail!("no readable save at {}", store.path().display());
    };
    let text = legacy::encode(&snapshot).context("encoding legacy save")?;
    std::fs::write(path, text).with_context(|| format!("writing {path}"))?;
    println!(
        "Exported {} coins and {} upgrade entries to {path}",
        format_amount(snapshot.balance),
        snapshot.owned_counts.len()
    );
    Ok(())
}

async fn run_live(session: &Arc<Session>, length: Duration) {
    let ticker = Ticker::spawn(Arc::clone(session), session.config().tick_interval());
    let mut updates = session.subscribe();
    let mut report = tokio::time::interval(Duration::from_secs(1));
    report.tick().await;
    let deadline = tokio::time::Instant::now() + length;
    while tokio::time::Instant::now() < deadline {
        tokio::select! {
            _ = report.tick() => {
                let state = updates.borrow_and_update().clone();
                println!(
                    "Coins: {} (+{}/s)",
                    format_amount(state.balance()),
                    format_rate(state.aggregate_production_rate())
                );
            }
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }
    ticker.stop();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args();
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    if let Some(save) = &args.save {
        config.save_path = save.clone();
    }
    info!(command = ?args.command, save = %config.save_path.display(), "starting CLI");

    let store = JsonFileStore::new(&config.save_path);
    let name = args.command.first().map(String::as_str).unwrap_or("status");
    let first = args.command.get(1);
    let second = args.command.get(2);

    match name {
        "import-legacy" => return import_legacy(first, &store),
        "export-legacy" => return export_legacy(first, &store),
        _ => {}
    }

    let session = Session::start(Arc::new(store), config.clone())?;
    validate_state(&session.state())?;

    match name {
        "status" => {}
        "catalog" => print_catalog(&session.state()),
        "tap" => {
            let n = count_arg(first, 1)?;
            let credited: u64 = (0..n).map(|_| session.tap()).sum();
            println!("Tapped {n}x, +{}", format_amount(credited));
        }
        "buy" => {
            let Some(id) = first else {
                bail!("missing upgrade ID\n\n{USAGE}");
            };
            let n = u32::try_from(count_arg(second, 1)?).context("count too large")?;
            let bulk = session.purchase_many(id, n);
            println!(
                "Bought {}x {} for {}",
                bulk.bought,
                id,
                format_amount(bulk.spent)
            );
            if let Some(rejection) = bulk.stopped_by {
                println!("Stopped: {rejection}");
            }
        }
        "buy-max" => {
            let Some(id) = first else {
                bail!("missing upgrade ID\n\n{USAGE}");
            };
            let state = session.state();
            let Some(u) = state.upgrade(id) else {
                bail!("unknown upgrade: {id}");
            };
            let n = max_affordable(u.definition.base_cost, u.owned_count(), state.balance());
            let bulk = session.purchase_many(id, n);
            println!(
                "Bought {}x {} for {}",
                bulk.bought,
                id,
                format_amount(bulk.spent)
            );
        }
        "bonus" => {
            let amount = count_arg(first, config.bonus_amount)?;
            let credited = session.grant_bonus(amount);
            println!("Bonus +{}", format_amount(credited));
        }
        "reward" => {
            let credited = session.grant_reward();
            println!("Reward +{}", format_amount(credited));
        }
        "tick" => {
            let elapsed = seconds_arg(first)?;
            let credited = session.tick(elapsed);
            println!(
                "{:.1}s passed, +{}",
                elapsed.as_secs_f64(),
                format_amount(credited)
            );
        }
        "run" => run_live(&session, seconds_arg(first)?).await,
        other => {
            session.shutdown().await?;
            bail!("unknown command: {other}\n\n{USAGE}");
        }
    }

    session.shutdown().await?;
    print_status(&session.state(), args.json)?;
    Ok(())
}
