use anyhow::{Context, Result};
use araxxor_tracker::{
    config::{self, TrackerConfig},
    engine::{Command as EngineCommand, FightEngine},
    loot::{PriceCache, StaticPrices},
    now_ms, parser,
    splits::{format_opt_time, format_time},
    start_pipeline,
    state::FightState,
    Pipeline, StoreHandle,
};
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use std::{
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    sync::Arc,
};

#[derive(Parser, Debug)]
#[command(name = "araxxor-tracker", version, about = "Araxxor kill tracker")]
struct Cli {
    /// Directory holding config.toml
    #[arg(long, global = true, default_value = ".")]
    config: PathBuf,

    /// SQLite database, overriding `db_path` from the config
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Feed a JSON-lines event file through the engine
    Replay {
        file: PathBuf,
        /// Print a line for every finished fight
        #[arg(long, short)]
        verbose: bool,
    },
    /// List recorded kill sessions
    Sessions,
    /// Forget every statistic (kill records are kept)
    ResetStats,
    /// Set the target kill time, e.g. "95" or "1:35" (empty clears it)
    Target { time: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Target { time } = &cli.command {
        return set_target(&cli.config, time);
    }

    let mut cfg = config::load_or_default(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    if let Some(db) = &cli.db {
        cfg.db_path = db.clone();
    }
    let _log_guard = araxxor_tracker::init_logging(&cfg.log_dir);

    match cli.command {
        Command::Replay { file, verbose } => replay(cfg, &file, verbose).await,
        Command::Sessions => sessions(cfg).await,
        Command::ResetStats => reset_stats(cfg).await,
        Command::Target { .. } => Ok(()),
    }
}

fn price_table(cfg: &TrackerConfig) -> StaticPrices {
    cfg.items
        .iter()
        .fold(StaticPrices::new(), |prices, item| prices.with_item(item.id, &item.name, item.price))
}

async fn replay(cfg: TrackerConfig, file: &Path, verbose: bool) -> Result<()> {
    let handle = StoreHandle::open(&cfg.db_path)?;
    let source = Arc::new(price_table(&cfg));
    let Pipeline { events, commands, mut snapshots, engine } =
        start_pipeline(cfg, Arc::clone(&handle.store), source)?;

    // Drain snapshots concurrently; the engine drops them when we fall behind.
    let printer = tokio::spawn(async move {
        let mut last_state = FightState::Idle;
        while let Some(snap) = snapshots.recv().await {
            if verbose && snap.state == FightState::Ended && last_state == FightState::Active {
                let rotation = snap.rotation_start.map_or("?".to_owned(), |r| r.to_string());
                println!(
                    "fight ended: {}  kill={}  rotation={}  hits={}  taken={}",
                    format_opt_time(snap.elapsed_ms),
                    snap.boss_reached_zero_hp,
                    rotation,
                    snap.counters.hits,
                    snap.counters.damage_taken,
                );
            }
            last_state = snap.state;
        }
    });

    let reader = BufReader::new(
        std::fs::File::open(file).with_context(|| format!("opening {}", file.display()))?,
    );
    let mut sent = 0usize;
    for line in reader.lines() {
        if let Some(event) = parser::parse_line(&line?) {
            events.send(event).await.context("engine stopped early")?;
            sent += 1;
        }
    }

    drop(events);
    drop(commands);
    let engine = engine.await??;
    let _ = printer.await;

    println!("replayed {} events", sent);
    print_stats(&engine);
    drop(engine);
    handle.close().await
}

async fn sessions(cfg: TrackerConfig) -> Result<()> {
    let handle = StoreHandle::open(&cfg.db_path)?;
    let (prices, _requests) = PriceCache::new(1);
    let engine = FightEngine::load(cfg, Arc::clone(&handle.store), prices, now_ms())?;

    let summaries = engine.session_summaries();
    if summaries.is_empty() {
        println!("no kills recorded");
    }
    for s in summaries.iter().rev() {
        let started = Local
            .timestamp_millis_opt(s.start_ms)
            .single()
            .map_or_else(|| s.start_ms.to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
        let rotation = s.best_rotation.map_or("?".to_owned(), |r| r.to_string());
        println!(
            "{}  kills={:<3} best={} ({})  items={}  value={}",
            started, s.kills, format_time(s.best_time_ms), rotation, s.item_count, s.total_value,
        );
    }
    print_stats(&engine);
    handle.close().await
}

async fn reset_stats(cfg: TrackerConfig) -> Result<()> {
    let handle = StoreHandle::open(&cfg.db_path)?;
    let (prices, _requests) = PriceCache::new(1);
    let mut engine = FightEngine::load(cfg, Arc::clone(&handle.store), prices, now_ms())?;
    engine.apply(EngineCommand::ResetStats);
    println!("statistics cleared");
    handle.close().await
}

fn set_target(config_dir: &Path, input: &str) -> Result<()> {
    let mut cfg = config::load_or_default(config_dir)?;
    let secs = config::parse_target_time(input)
        .with_context(|| format!("unrecognised target time {:?}", input))?;
    cfg.target_total_secs = secs;
    config::save(&cfg, config_dir)?;
    if secs == 0 {
        println!("target cleared");
    } else {
        println!("target set to {}", config::format_target_time(secs));
    }
    Ok(())
}

fn print_stats(engine: &FightEngine) {
    let stats = engine.stats();
    println!("kills: {}", stats.kill_count);
    println!("best: {}", format_opt_time(stats.best.map(|b| b.time_ms)));
    for category in araxxor_tracker::egg::EggCategory::ALL {
        if let Some(best) = stats.category_best(category) {
            println!("  {:<5} {}  hits={}  taken={}", category.display_name(), format_time(best.time_ms), best.hits, best.damage_taken);
        }
    }
    println!("average of last {}: {}", stats.recent_ms.len(), format_time(stats.average_duration_ms()));
}
