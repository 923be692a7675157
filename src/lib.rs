pub mod config;
pub mod db;
pub mod egg;
pub mod engine;
pub mod loot;
pub mod parser;
pub mod phase;
pub mod record;
pub mod repository;
pub mod rotation;
pub mod snapshot;
pub mod splits;
pub mod state;
pub mod stats;

use anyhow::Result;
use std::{path::Path, sync::Arc};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const EVENT_QUEUE:    usize = 1024;
const COMMAND_QUEUE:  usize = 16;
const SNAPSHOT_QUEUE: usize = 128;
const FETCH_QUEUE:    usize = 64;

/// Wall-clock time in Unix epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install the global subscriber. With a `log_dir`, logs go to a daily
/// rolling `tracker.log` there (keep the returned guard alive, dropping it
/// flushes); otherwise to stderr. `RUST_LOG` overrides the default filter.
pub fn init_logging(log_dir: &Path) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("araxxor_tracker=debug"));

    let guard = if log_dir.as_os_str().is_empty() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        None
    } else {
        let _ = std::fs::create_dir_all(log_dir);
        let file_appender = tracing_appender::rolling::daily(log_dir, "tracker.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .with_ansi(false)
            .try_init();
        Some(guard)
    };

    // Panics otherwise only reach stderr, which is gone when running headless.
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        tracing::error!("PANIC at {}: {}", location, message);
    }));

    guard
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// The configured key-value store plus, for SQLite, the writer handle that
/// must be flushed before exit.
pub struct StoreHandle {
    pub store: Arc<dyn db::KvStore>,
    writer:    Option<db::DbWriter>,
}

impl StoreHandle {
    /// SQLite at `db_path`, or an in-memory store when the path is empty.
    pub fn open(db_path: &Path) -> Result<Self> {
        if db_path.as_os_str().is_empty() {
            tracing::info!("No database configured, history is kept in memory only");
            return Ok(Self { store: Arc::new(db::MemoryStore::new()), writer: None });
        }
        let writer = db::spawn_db_writer(db_path)?;
        Ok(Self { store: Arc::new(writer.clone()), writer: Some(writer) })
    }

    /// Wait for queued writes to land, then stop the writer thread.
    pub async fn close(&self) -> Result<()> {
        if let Some(writer) = &self.writer {
            writer.flush().await?;
            writer.shutdown();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Channel ends of a running engine.
pub struct Pipeline {
    pub events:    mpsc::Sender<parser::TimedEvent>,
    pub commands:  mpsc::Sender<engine::Command>,
    pub snapshots: mpsc::Receiver<snapshot::FightSnapshot>,
    /// Resolves once `events` and `commands` are both dropped.
    pub engine:    JoinHandle<Result<engine::FightEngine>>,
}

/// Load the engine from `store` and spawn it together with the price
/// fetcher. Must be called from inside a tokio runtime.
///
/// Pipeline: host events -> engine -> snapshots
///                            |
///                      price fetcher <-> price source
pub fn start_pipeline(
    config: config::TrackerConfig,
    store:  Arc<dyn db::KvStore>,
    source: Arc<dyn loot::PriceSource>,
) -> Result<Pipeline> {
    let (prices, fetch_rx) = loot::PriceCache::new(FETCH_QUEUE);
    let fight_engine = engine::FightEngine::load(config, store, prices.clone(), now_ms())?;

    let (event_tx, event_rx)     = mpsc::channel::<parser::TimedEvent>(EVENT_QUEUE);
    let (command_tx, command_rx) = mpsc::channel::<engine::Command>(COMMAND_QUEUE);
    let (snap_tx, snap_rx)       = mpsc::channel::<snapshot::FightSnapshot>(SNAPSHOT_QUEUE);

    let rules = Arc::new(loot::default_rules());
    tokio::spawn(loot::run_fetcher(fetch_rx, prices, source, rules));
    let handle = tokio::spawn(engine::run(event_rx, command_rx, snap_tx, fight_engine));

    Ok(Pipeline { events: event_tx, commands: command_tx, snapshots: snap_rx, engine: handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        egg::ARAXXOR_NPC_ID,
        parser::{GameEvent, TimedEvent},
        state::FightState,
    };

    #[tokio::test]
    async fn pipeline_round_trip_with_sqlite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let handle = StoreHandle::open(&dir.path().join("tracker.db")).expect("open store");
        let source = Arc::new(loot::StaticPrices::new().with_item(995, "Coins", 1));
        let mut pipeline =
            start_pipeline(config::TrackerConfig::default(), Arc::clone(&handle.store), source).expect("pipeline");

        let start = now_ms() - 120_000;
        for (offset, event) in [
            (0, GameEvent::NpcSpawned { npc_id: ARAXXOR_NPC_ID, position: None }),
            (59_000, GameEvent::ActorDeath { actor: parser::Actor::Npc { id: ARAXXOR_NPC_ID } }),
            (60_000, GameEvent::NpcDespawned { npc_id: ARAXXOR_NPC_ID }),
        ] {
            pipeline.events.send(TimedEvent { at_ms: start + offset, event }).await.expect("send");
        }
        let mut last = None;
        for _ in 0..3 {
            last = pipeline.snapshots.recv().await;
        }
        assert_eq!(last.map(|s| s.state), Some(FightState::Ended));

        drop(pipeline.events);
        drop(pipeline.commands);
        let engine = pipeline.engine.await.expect("join").expect("engine");
        assert_eq!(engine.stats().kill_count, 1);
        drop(engine);
        handle.close().await.expect("close");

        let reopened = StoreHandle::open(&dir.path().join("tracker.db")).expect("reopen");
        let (prices, _rx) = loot::PriceCache::new(4);
        let restored = engine::FightEngine::load(config::TrackerConfig::default(), Arc::clone(&reopened.store), prices, now_ms())
            .expect("load");
        assert_eq!(restored.stats().best.map(|b| b.time_ms), Some(60_000));
        reopened.close().await.expect("close");
    }

    #[test]
    fn empty_db_path_uses_memory() {
        let handle = StoreHandle::open(Path::new("")).expect("open");
        handle.store.put("stats", "{}");
        assert_eq!(handle.store.load_prefix("stats").expect("load").len(), 1);
    }
}
