/// Fight engine: the lifecycle controller that owns one fight at a time.
///
/// Receives `TimedEvent`s and control `Command`s via channels, drives the
/// phase detector, rotation tracker and counters, finalises kills into the
/// statistics store and kill repository, and emits a `FightSnapshot` after
/// each step.
///
///   Idle  --boss spawn-->  Active  --boss despawn-->  Ended
///    ^                       |  ^                       |
///    +------ reset ----------+  +---- boss spawn -------+
///
/// Nothing here blocks: persistence is fire-and-forget through `KvStore`
/// and prices are read from the non-blocking `PriceCache`.
use crate::{
    config::TrackerConfig,
    db::KvStore,
    egg::{is_boss, EggCategory, ARAXXOR_NPC_ID},
    loot::{merge_loot, PriceCache},
    parser::{parse_fight_duration, Actor, ChatKind, ClientState, GameEvent, ItemStack, TimedEvent, WorldPoint},
    phase::{Phase, PhaseDetector},
    record::KillRecord,
    repository::{KillRepository, SessionSummary},
    rotation::RotationTracker,
    snapshot::{FightSnapshot, SplitsView},
    splits::{PhaseClock, SplitContext},
    state::{CombatCounters, FightSession, FightState, LastFight},
    stats::{KillOutcome, StatisticsStore},
};
use anyhow::Result;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::mpsc::{Receiver, Sender};

/// Store key of the statistics document.
pub const STATS_KEY: &str = "stats";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Forget every statistic. Kill records stay.
    ResetStats,
    /// Clear the current trip's kill list.
    ResetTrip,
    /// Abandon the current fight.
    Reset,
}

pub struct FightEngine {
    config:   TrackerConfig,
    session:  FightSession,
    counters: CombatCounters,
    phase:    PhaseDetector,
    rotation: RotationTracker,
    stats:    StatisticsStore,
    kills:    KillRepository,
    prices:   PriceCache,
    store:    Arc<dyn KvStore>,
}

impl FightEngine {
    /// Fresh engine with empty statistics and history.
    pub fn new(config: TrackerConfig, store: Arc<dyn KvStore>, prices: PriceCache) -> Self {
        Self {
            config,
            session:  FightSession::new(),
            counters: CombatCounters::default(),
            phase:    PhaseDetector::new(),
            rotation: RotationTracker::new(),
            stats:    StatisticsStore::new(),
            kills:    KillRepository::new(Arc::clone(&store)),
            prices,
            store,
        }
    }

    /// Restore statistics and kill history from `store`. An unreadable
    /// statistics document is logged and replaced with empty statistics.
    pub fn load(
        config: TrackerConfig,
        store:  Arc<dyn KvStore>,
        prices: PriceCache,
        now_ms: i64,
    ) -> Result<Self> {
        let mut stats = match store.load_prefix(STATS_KEY)?.into_iter().find(|(k, _)| k == STATS_KEY) {
            Some((_, raw)) => StatisticsStore::from_json(&raw).unwrap_or_else(|e| {
                tracing::warn!("Discarding unreadable statistics: {}", e);
                StatisticsStore::new()
            }),
            None => StatisticsStore::new(),
        };

        let kills = KillRepository::load(Arc::clone(&store), now_ms)?;
        stats.last_kill_ms = stats.last_kill_ms.max(kills.last_kill_ms());

        tracing::info!(
            "Engine loaded: {} kills on record, best {:?}ms",
            stats.kill_count,
            stats.best.map(|b| b.time_ms)
        );

        Ok(Self {
            config,
            session:  FightSession::new(),
            counters: CombatCounters::default(),
            phase:    PhaseDetector::new(),
            rotation: RotationTracker::new(),
            stats,
            kills,
            prices,
            store,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &TrackerConfig { &self.config }
    pub fn session(&self) -> &FightSession { &self.session }
    pub fn counters(&self) -> CombatCounters { self.counters }
    pub fn phase(&self) -> Phase { self.phase.phase() }
    pub fn rotation(&self) -> &RotationTracker { &self.rotation }
    pub fn stats(&self) -> &StatisticsStore { &self.stats }
    pub fn kills(&self) -> &KillRepository { &self.kills }
    pub fn prices(&self) -> &PriceCache { &self.prices }

    pub fn elapsed_ms(&self, now_ms: i64) -> Option<i64> {
        self.session.elapsed_ms(now_ms, self.config.timer_offset_ms)
    }

    /// Session summaries over the whole kill history, oldest first.
    pub fn session_summaries(&self) -> Vec<SessionSummary> {
        self.kills
            .sessions(self.config.session_timeout_ms())
            .iter()
            .filter_map(|s| SessionSummary::from_kills(s))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Event dispatch
    // -----------------------------------------------------------------------

    pub fn handle(&mut self, event: &TimedEvent) {
        let now_ms = event.at_ms;
        match &event.event {
            GameEvent::NpcSpawned { npc_id, position } => self.on_npc_spawned(*npc_id, *position, now_ms),

            GameEvent::NpcDespawned { npc_id } => self.on_npc_despawned(*npc_id, now_ms),

            GameEvent::AnimationChanged { actor, animation_id, health_ratio, health_scale } => {
                if actor.npc_id() != Some(ARAXXOR_NPC_ID) || !self.in_combat() {
                    return;
                }
                let tick = self.session.current_tick;
                if self.phase.on_animation(*animation_id, tick, *health_ratio, *health_scale) == Some(Phase::Enraged)
                    && self.session.enrage_start_ms.is_none()
                {
                    self.session.enrage_start_ms = Some(now_ms);
                    tracing::info!("Enraged {:?}ms into the fight", self.session.time_to_enrage_ms(0));
                }
            }

            GameEvent::HitsplatApplied { actor, amount, own_hit } => {
                if !self.in_combat() {
                    return;
                }
                match actor {
                    Actor::Npc { id } if is_boss(*id) => self.counters.record_hit(*amount, *own_hit),
                    Actor::LocalPlayer                => self.counters.record_taken(*amount),
                    _ => {}
                }
            }

            GameEvent::ActorDeath { actor } => {
                let boss = actor.npc_id().map_or(false, is_boss);
                if boss && self.session.is_active() && !self.session.boss_reached_zero_hp {
                    self.session.boss_reached_zero_hp = true;
                    self.session.death_ms = Some(now_ms);
                    tracing::info!("Boss reached zero HP at {}ms", now_ms);
                }
            }

            GameEvent::GameTick => self.session.tick(),

            GameEvent::ChatMessage { kind, text } => self.on_chat(*kind, text),

            GameEvent::LootGranted { npc_id, items } => self.on_loot(*npc_id, items, now_ms),

            GameEvent::AreaCheck { near_boss } => self.on_area_check(*near_boss),

            GameEvent::GameStateChanged { state } => {
                if matches!(state, ClientState::LoginScreen | ClientState::Hopping) {
                    tracing::debug!("Client state {:?}, resetting fight", state);
                    self.reset_fight();
                }
            }
        }
    }

    /// Active and the boss still alive: animations and hitsplats count.
    fn in_combat(&self) -> bool {
        self.session.is_active() && !self.session.boss_reached_zero_hp
    }

    fn on_npc_spawned(&mut self, npc_id: u32, position: Option<WorldPoint>, now_ms: i64) {
        if npc_id == ARAXXOR_NPC_ID {
            self.start_fight(now_ms);
            return;
        }
        if !self.session.is_active() {
            return;
        }

        let tick = self.session.current_tick;
        if let Some(category) = EggCategory::from_egg_id(npc_id) {
            match position {
                Some(pos) => self.rotation.on_egg_spawned(category, pos),
                None      => tracing::debug!("{} egg spawned without a position, ignored", category),
            }
        } else if let Some(category) = EggCategory::from_minion_id(npc_id) {
            self.rotation.on_minion_spawned(category, tick, self.session.boss_reached_zero_hp);
        }
    }

    fn on_npc_despawned(&mut self, npc_id: u32, now_ms: i64) {
        if is_boss(npc_id) {
            if self.session.is_active() {
                self.end_fight(now_ms);
            }
            return;
        }

        if let Some(category) = EggCategory::from_egg_id(npc_id) {
            // Eggs vanish in bulk once the boss dies; those say nothing
            // about the rotation.
            if self.in_combat() {
                self.rotation.on_egg_despawned(category, self.session.current_tick);
            }
        } else if let Some(category) = EggCategory::from_minion_id(npc_id) {
            self.rotation.on_minion_despawned(category);
        }
    }

    fn on_chat(&mut self, kind: ChatKind, text: &str) {
        if !matches!(kind, ChatKind::GameMessage | ChatKind::Spam) {
            return;
        }
        if !self.session.boss_reached_zero_hp || self.session.end_ms.is_some() {
            return;
        }
        let duration = parse_fight_duration(text).filter(|d| *d > 0);
        let (Some(duration), Some(start)) = (duration, self.session.start_ms) else {
            return;
        };
        if self.session.set_end_once(start + duration) {
            tracing::info!("Fight duration from chat: {}ms", duration);
        }
    }

    fn on_loot(&mut self, npc_id: u32, items: &[ItemStack], now_ms: i64) {
        if !is_boss(npc_id) || !self.session.boss_reached_zero_hp || self.session.loot_recorded {
            return;
        }
        let Some(duration_ms) = self.elapsed_ms(now_ms).filter(|d| *d > 0) else {
            tracing::warn!("Loot received without a usable fight time, not recorded");
            return;
        };

        let mut loot = BTreeMap::new();
        for item in items.iter().filter(|i| i.quantity > 0) {
            *loot.entry(item.id).or_insert(0) += item.quantity;
        }

        let record = KillRecord {
            timestamp_ms: now_ms,
            duration_ms,
            rotation:     self.rotation.start(),
            loot_value:   self.prices.value_of(&loot, now_ms),
            hits:         self.counters.hits,
            damage_dealt: self.counters.damage_dealt,
            damage_taken: self.counters.damage_taken,
            loot,
        };
        tracing::info!(
            "Kill recorded: {}ms, rotation {:?}, loot value {}",
            record.duration_ms, record.rotation, record.loot_value
        );
        self.kills.push(record);
        self.session.loot_recorded = true;
    }

    fn on_area_check(&mut self, near_boss: bool) {
        if near_boss {
            return;
        }
        if self.session.is_active() || self.session.start_ms.is_some() {
            tracing::info!("Left the boss area, abandoning fight");
            self.reset_fight();
        } else if !self.kills.trip_kills().is_empty() {
            self.kills.reset_trip();
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    fn start_fight(&mut self, now_ms: i64) {
        self.session.start(now_ms);
        self.counters = CombatCounters::default();
        self.phase.reset();
        self.rotation.reset();
    }

    /// Boss despawned. Kills are folded into the statistics; anything else
    /// is an abandoned fight and its counters are dropped.
    fn end_fight(&mut self, now_ms: i64) {
        self.session.set_end_once(now_ms);
        self.session.state = FightState::Ended;

        if !self.session.boss_reached_zero_hp {
            tracing::info!("Fight ended without a kill");
            self.counters = CombatCounters::default();
            return;
        }

        let Some(time_ms) = self.elapsed_ms(now_ms) else {
            return;
        };
        let rotation = self.rotation.start();
        let outcome = KillOutcome {
            time_ms,
            counters:          self.counters,
            rotation,
            time_to_enrage_ms: self.session.time_to_enrage_ms(0),
            time_in_enrage_ms: self.session.enrage_elapsed_ms(now_ms),
        };
        if self.stats.record_kill(&outcome, now_ms) {
            self.stats.set_last_fight(LastFight::capture(&self.session, self.counters, rotation, time_ms, now_ms));
            self.save_stats();
            tracing::info!("Kill #{} in {}ms", self.stats.kill_count, time_ms);
        }
    }

    /// Back to Idle, dropping every piece of per-fight state. Idempotent.
    pub fn reset_fight(&mut self) {
        self.session.reset();
        self.counters = CombatCounters::default();
        self.phase.reset();
        self.rotation.reset();
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
        self.save_stats();
    }

    pub fn reset_trip(&mut self) {
        self.kills.reset_trip();
    }

    pub fn apply(&mut self, command: Command) {
        match command {
            Command::ResetStats => self.reset_stats(),
            Command::ResetTrip  => self.reset_trip(),
            Command::Reset      => self.reset_fight(),
        }
    }

    fn save_stats(&self) {
        match self.stats.to_json() {
            Ok(json) => self.store.put(STATS_KEY, &json),
            Err(e)   => tracing::warn!("Statistics not saved: {}", e),
        }
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    pub fn snapshot(&mut self, now_ms: i64) -> FightSnapshot {
        let elapsed_ms     = self.elapsed_ms(now_ms);
        let kills_per_hour = self.stats.kills_per_hour(now_ms);
        let rotation_start = self.rotation.start();

        let splits = if self.session.start_ms.is_some() {
            let ctx = SplitContext {
                mode:      self.config.split_mode,
                target_ms: self.config.target_ms(),
                rotation:  rotation_start,
                stats:     &self.stats,
            };
            SplitsView {
                time:           elapsed_ms.and_then(|t| ctx.time(t)),
                hits:           ctx.hits(self.counters.hits),
                damage_taken:   ctx.damage_taken(self.counters.damage_taken),
                time_to_enrage: self.session.time_to_enrage_ms(0).and_then(|t| ctx.phase(PhaseClock::ToEnrage, t)),
                time_in_enrage: self.session.enrage_elapsed_ms(now_ms).and_then(|t| ctx.phase(PhaseClock::InEnrage, t)),
            }
        } else {
            SplitsView::default()
        };

        let session_value = match self.kills.sessions(self.config.session_timeout_ms()).pop() {
            Some(latest) => {
                let key  = format!("session_{}", latest[0].timestamp_ms);
                let loot = merge_loot(latest.iter().map(|k| &k.loot));
                self.prices.total_value(&key, &loot, now_ms)
            }
            None => 0,
        };

        FightSnapshot {
            at_ms:                now_ms,
            state:                self.session.state,
            phase:                self.phase.phase(),
            elapsed_ms,
            current_tick:         self.session.current_tick,
            boss_reached_zero_hp: self.session.boss_reached_zero_hp,
            rotation:             self.rotation.history().to_vec(),
            rotation_start,
            active_minions:       EggCategory::ALL.map(|c| self.rotation.active_minions(c)),
            counters:             self.counters,
            dps:                  self.counters.dps(elapsed_ms.unwrap_or(0)),
            average_hit:          self.counters.average_hit(),
            time_to_enrage_ms:    self.session.time_to_enrage_ms(self.config.timer_offset_ms),
            time_in_enrage_ms:    self.session.time_in_enrage_ms(now_ms),
            best_time_ms:         self.stats.best.map(|b| b.time_ms),
            kill_count:           self.stats.kill_count,
            kills_per_hour,
            average_kill_ms:      self.stats.average_duration_ms(),
            trip_kills:           self.kills.trip_kills().len(),
            trip_value:           self.kills.trip_kills().iter().map(|k| k.loot_value).sum(),
            session_value,
            splits,
        }
    }
}

// ---------------------------------------------------------------------------
// Main engine task
// ---------------------------------------------------------------------------

/// Own `engine` until both input channels close, then hand it back.
pub async fn run(
    mut event_rx:   Receiver<TimedEvent>,
    mut command_rx: Receiver<Command>,
    snapshot_tx:    Sender<FightSnapshot>,
    mut engine:     FightEngine,
) -> Result<FightEngine> {
    let mut last_at_ms = crate::now_ms();

    loop {
        tokio::select! {
            Some(command) = command_rx.recv() => {
                tracing::info!("Command: {:?}", command);
                engine.apply(command);
                let _ = snapshot_tx.try_send(engine.snapshot(last_at_ms));
            }

            Some(event) = event_rx.recv() => {
                last_at_ms = event.at_ms;
                engine.handle(&event);
                // Non-blocking: drop the snapshot if the consumer is slow
                let _ = snapshot_tx.try_send(engine.snapshot(event.at_ms));
            }

            else => break,
        }
    }
    tracing::debug!("Engine stopped");
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    const BOSS: u32 = ARAXXOR_NPC_ID;

    fn engine() -> (FightEngine, MemoryStore) {
        let store = MemoryStore::new();
        let (prices, _rx) = PriceCache::new(64);
        prices.insert_price(995, 1, 0);
        prices.insert_price(29790, 10_000_000, 0);
        (FightEngine::new(TrackerConfig::default(), Arc::new(store.clone()), prices), store)
    }

    fn at(at_ms: i64, event: GameEvent) -> TimedEvent {
        TimedEvent { at_ms, event }
    }

    fn feed(engine: &mut FightEngine, events: impl IntoIterator<Item = TimedEvent>) {
        for ev in events {
            engine.handle(&ev);
        }
    }

    fn spawn(npc_id: u32, position: Option<WorldPoint>) -> GameEvent {
        GameEvent::NpcSpawned { npc_id, position }
    }

    fn despawn(npc_id: u32) -> GameEvent {
        GameEvent::NpcDespawned { npc_id }
    }

    fn boss_death() -> GameEvent {
        GameEvent::ActorDeath { actor: Actor::Npc { id: BOSS } }
    }

    fn own_hit(amount: i32) -> GameEvent {
        GameEvent::HitsplatApplied { actor: Actor::Npc { id: BOSS }, amount, own_hit: true }
    }

    fn taken(amount: i32) -> GameEvent {
        GameEvent::HitsplatApplied { actor: Actor::LocalPlayer, amount, own_hit: false }
    }

    fn loot(items: &[(u32, u64)]) -> GameEvent {
        GameEvent::LootGranted {
            npc_id: BOSS,
            items:  items.iter().map(|&(id, quantity)| ItemStack { id, quantity }).collect(),
        }
    }

    fn animation(animation_id: i32, health_ratio: i32) -> GameEvent {
        GameEvent::AnimationChanged {
            actor: Actor::Npc { id: BOSS },
            animation_id,
            health_ratio,
            health_scale: 30,
        }
    }

    /// A kill of `duration` ms starting at `start` with the given counters.
    fn kill(engine: &mut FightEngine, start: i64, duration: i64, hits: u32, damage: i32) {
        feed(engine, [at(start, spawn(BOSS, None))]);
        for _ in 0..hits {
            feed(engine, [at(start + 1, own_hit(10))]);
        }
        feed(engine, [
            at(start + 2, taken(damage)),
            at(start + duration - 1_000, boss_death()),
            at(start + duration, despawn(BOSS)),
        ]);
    }

    #[test]
    fn despawn_without_death_leaves_stats_alone() {
        let (mut e, store) = engine();
        feed(&mut e, [
            at(0, spawn(BOSS, None)),
            at(10, own_hit(30)),
            at(20, taken(12)),
            at(5_000, despawn(BOSS)),
        ]);
        assert_eq!(e.session().state, FightState::Ended);
        assert!(!e.session().boss_reached_zero_hp);
        assert_eq!(e.stats().kill_count, 0);
        assert!(e.stats().best.is_none());
        assert_eq!(e.counters(), CombatCounters::default());
        assert!(store.get(STATS_KEY).is_none());
    }

    #[test]
    fn best_fields_come_from_the_fastest_kill() {
        let (mut e, _store) = engine();
        kill(&mut e, 0, 100_000, 40, 300);
        kill(&mut e, 200_000, 120_000, 5, 10);
        kill(&mut e, 400_000, 90_000, 60, 700);

        let best = e.stats().best.expect("best set");
        assert_eq!((best.time_ms, best.hits, best.damage_taken), (90_000, 60, 700));
        assert_eq!(e.stats().kill_count, 3);
        assert_eq!(e.stats().last_fight.as_ref().map(|l| l.time_ms), Some(90_000));
    }

    #[test]
    fn full_fight_infers_rotation_and_records_one_kill() {
        let (mut e, store) = engine();
        let eggs = [
            (EggCategory::White, WorldPoint::new(3_630, 9_815, 0)),
            (EggCategory::White, WorldPoint::new(3_640, 9_810, 0)),
            (EggCategory::Red,   WorldPoint::new(3_650, 9_800, 0)),
            (EggCategory::Red,   WorldPoint::new(3_632, 9_820, 0)),
            (EggCategory::Green, WorldPoint::new(3_660, 9_790, 0)),
            (EggCategory::Green, WorldPoint::new(3_635, 9_812, 0)),
        ];

        feed(&mut e, [at(0, spawn(BOSS, None))]);
        feed(&mut e, eggs.iter().map(|(c, p)| at(1, spawn(c.egg_npc_id(), Some(*p)))));
        assert_eq!(e.rotation().history(), &[EggCategory::Green, EggCategory::White, EggCategory::Red]);

        feed(&mut e, [
            at(2, GameEvent::GameTick),
            at(5, spawn(EggCategory::Green.minion_npc_id(), None)),
            at(6, despawn(EggCategory::Green.egg_npc_id())),
            at(7, despawn(EggCategory::White.egg_npc_id())),
            at(8, despawn(EggCategory::White.egg_npc_id())),
            at(9, despawn(EggCategory::Red.egg_npc_id())),
            at(10, despawn(EggCategory::Red.egg_npc_id())),
            at(50, own_hit(25)),
            at(60, taken(8)),
            at(90_000, boss_death()),
            at(91_000, despawn(BOSS)),
            at(91_600, loot(&[(995, 30_000), (29790, 1)])),
        ]);

        assert!(e.session().boss_reached_zero_hp);
        assert_eq!(e.elapsed_ms(200_000), Some(91_000));
        assert_eq!(e.stats().best.map(|b| b.time_ms), Some(91_000));
        assert_eq!(e.stats().category_best(EggCategory::Green).map(|b| b.time_ms), Some(91_000));
        assert_eq!(e.rotation().active_minions(EggCategory::Green), 1);

        let kills: Vec<&KillRecord> = e.kills().session_kills().iter().collect();
        assert_eq!(kills.len(), 1);
        assert_eq!(kills[0].duration_ms, 91_000);
        assert_eq!(kills[0].rotation, Some(EggCategory::Green));
        assert_eq!(kills[0].loot_value, 10_030_000);
        assert_eq!((kills[0].hits, kills[0].damage_dealt, kills[0].damage_taken), (1, 25, 8));
        assert!(store.get(&kills[0].key()).is_some());
        assert!(store.get(STATS_KEY).is_some());

        // A second loot event for the same kill is ignored.
        feed(&mut e, [at(92_000, loot(&[(995, 1)]))]);
        assert_eq!(e.kills().session_kills().len(), 1);
    }

    #[test]
    fn chat_duration_takes_precedence_over_despawn() {
        let (mut e, _store) = engine();
        let chat = |text: &str| GameEvent::ChatMessage { kind: ChatKind::GameMessage, text: text.to_owned() };
        feed(&mut e, [
            at(1_000, spawn(BOSS, None)),
            at(5_000, GameEvent::ChatMessage { kind: ChatKind::GameMessage, text: "Fight duration: 0:30.00.".into() }),
            at(94_000, boss_death()),
            at(94_500, GameEvent::ChatMessage { kind: ChatKind::Other, text: "Fight duration: 1:00.00.".into() }),
            at(95_000, chat("Fight duration: <col=ff0000>1:35.40</col>.")),
            at(95_100, chat("Fight duration: 1:40.00.")),
            at(97_000, despawn(BOSS)),
        ]);
        assert_eq!(e.session().end_ms, Some(96_400));
        assert_eq!(e.stats().best.map(|b| b.time_ms), Some(95_400));
    }

    #[test]
    fn zero_chat_duration_leaves_end_to_the_despawn() {
        let (mut e, _store) = engine();
        let chat = |text: &str| GameEvent::ChatMessage { kind: ChatKind::GameMessage, text: text.to_owned() };
        feed(&mut e, [
            at(0, spawn(BOSS, None)),
            at(80_000, boss_death()),
            at(80_500, chat("Fight duration: 0:00.")),
            at(81_000, despawn(BOSS)),
        ]);
        assert_eq!(e.session().end_ms, Some(81_000));
        assert_eq!(e.stats().kill_count, 1);
        assert_eq!(e.stats().best.map(|b| b.time_ms), Some(81_000));
    }

    #[test]
    fn eggs_despawning_after_the_kill_are_not_correlated() {
        let (mut e, _store) = engine();
        let egg = EggCategory::White.egg_npc_id();
        feed(&mut e, [
            at(0, spawn(BOSS, None)),
            at(1, spawn(egg, Some(WorldPoint::new(10, 10, 0)))),
            at(2, spawn(egg, Some(WorldPoint::new(20, 0, 0)))),
            at(3, GameEvent::GameTick),
            at(4, despawn(egg)),
            at(50_000, boss_death()),
            at(50_100, despawn(egg)),
            at(50_200, despawn(egg)),
        ]);
        let timings = e.rotation().timings();
        assert_eq!(timings.len(), 2);
        assert_eq!(timings.iter().filter(|t| t.despawn_tick.is_some()).count(), 1);
        assert!(timings.iter().all(|t| t.position.is_some()));
    }

    #[test]
    fn session_value_grows_with_each_kill() {
        let (mut e, _store) = engine();
        kill(&mut e, 0, 60_000, 3, 5);
        feed(&mut e, [at(60_500, loot(&[(995, 10)]))]);
        assert_eq!(e.snapshot(61_000).session_value, 10);

        kill(&mut e, 100_000, 60_000, 3, 5);
        feed(&mut e, [at(160_500, loot(&[(995, 20)]))]);
        assert_eq!(e.kills().session_kills().len(), 2);
        assert_eq!(e.snapshot(161_000).session_value, 30);
    }

    #[test]
    fn enrage_is_timestamped_once() {
        let (mut e, _store) = engine();
        feed(&mut e, [
            at(0, spawn(BOSS, None)),
            at(10_000, animation(11476, 20)),
            at(11_000, GameEvent::GameTick),
            at(11_000, animation(11475, 20)),
            at(40_000, GameEvent::GameTick),
            at(40_000, animation(11488, 6)),
            at(41_000, GameEvent::GameTick),
            at(41_000, animation(11475, 6)),
            at(50_000, GameEvent::GameTick),
            at(50_000, animation(11476, 3)),
        ]);
        assert_eq!(e.phase(), Phase::Enraged);
        assert_eq!(e.session().enrage_start_ms, Some(41_000));

        feed(&mut e, [at(70_000, boss_death()), at(71_000, despawn(BOSS))]);
        let best = e.stats().best.expect("best");
        assert_eq!(best.time_to_enrage_ms, Some(41_000));
        assert_eq!(best.time_in_enrage_ms, Some(30_000));
        let last = e.stats().last_fight.clone().expect("last fight");
        assert_eq!((last.normal_ms, last.enrage_ms), (41_000, Some(30_000)));
    }

    #[test]
    fn combat_after_death_is_ignored() {
        let (mut e, _store) = engine();
        feed(&mut e, [
            at(0, spawn(BOSS, None)),
            at(1, own_hit(10)),
            at(2, GameEvent::HitsplatApplied { actor: Actor::Npc { id: BOSS }, amount: 50, own_hit: false }),
            at(3, GameEvent::HitsplatApplied { actor: Actor::OtherPlayer, amount: 50, own_hit: false }),
            at(4, boss_death()),
            at(5, own_hit(10)),
            at(6, taken(10)),
        ]);
        assert_eq!(e.counters(), CombatCounters { hits: 1, damage_dealt: 10, damage_taken: 0 });
    }

    #[test]
    fn leaving_the_area_resets_fight_then_trip() {
        let (mut e, _store) = engine();
        kill(&mut e, 0, 60_000, 3, 5);
        feed(&mut e, [at(60_500, loot(&[(995, 10)]))]);
        assert_eq!(e.kills().trip_kills().len(), 1);

        feed(&mut e, [at(61_000, GameEvent::AreaCheck { near_boss: true })]);
        assert_eq!(e.session().state, FightState::Ended);

        feed(&mut e, [at(62_000, GameEvent::AreaCheck { near_boss: false })]);
        assert_eq!(e.session().state, FightState::Idle);
        assert_eq!(e.kills().trip_kills().len(), 1);

        feed(&mut e, [at(63_000, GameEvent::AreaCheck { near_boss: false })]);
        assert!(e.kills().trip_kills().is_empty());
        assert_eq!(e.kills().session_kills().len(), 1);
    }

    #[test]
    fn logout_and_hop_reset_the_fight() {
        let (mut e, _store) = engine();
        for state in [ClientState::LoginScreen, ClientState::Hopping] {
            feed(&mut e, [
                at(0, spawn(BOSS, None)),
                at(1, GameEvent::GameTick),
                at(2, own_hit(5)),
                at(3, GameEvent::GameStateChanged { state }),
            ]);
            assert_eq!(e.session().state, FightState::Idle);
            assert_eq!(e.session().current_tick, 0);
            assert_eq!(e.counters(), CombatCounters::default());
        }
        feed(&mut e, [at(0, spawn(BOSS, None)), at(1, GameEvent::GameStateChanged { state: ClientState::Loading })]);
        assert!(e.session().is_active());
    }

    #[test]
    fn eggs_outside_a_fight_are_ignored() {
        let (mut e, _store) = engine();
        feed(&mut e, [at(0, spawn(EggCategory::Red.egg_npc_id(), Some(WorldPoint::new(1, 1, 0))))]);
        assert!(e.rotation().timings().is_empty());
    }

    #[test]
    fn load_restores_stats_and_history() {
        let (mut e, store) = engine();
        kill(&mut e, 1_000, 80_000, 10, 50);
        feed(&mut e, [at(81_500, loot(&[(995, 5)]))]);

        let (prices, _rx) = PriceCache::new(8);
        let restored = FightEngine::load(TrackerConfig::default(), Arc::new(store), prices, 100_000).expect("load");
        assert_eq!(restored.stats().kill_count, 1);
        assert_eq!(restored.stats().best.map(|b| b.time_ms), Some(80_000));
        assert_eq!(restored.kills().session_kills().len(), 1);
        assert_eq!(restored.stats().last_kill_ms, Some(81_500));
        assert_eq!(restored.session_summaries().len(), 1);
    }

    #[test]
    fn reset_stats_is_persisted() {
        let (mut e, store) = engine();
        kill(&mut e, 0, 60_000, 1, 1);
        e.apply(Command::ResetStats);
        assert_eq!(e.stats().kill_count, 0);
        let saved = StatisticsStore::from_json(&store.get(STATS_KEY).expect("saved")).expect("json");
        assert!(saved.best.is_none());
    }

    #[test]
    fn snapshot_reports_live_values() {
        let (mut e, _store) = engine();
        kill(&mut e, 0, 100_000, 10, 10);
        feed(&mut e, [
            at(200_000, spawn(BOSS, None)),
            at(200_100, own_hit(100)),
            at(200_100, own_hit(100)),
        ]);
        let snap = e.snapshot(210_000);
        assert!(snap.in_fight());
        assert_eq!(snap.elapsed_ms, Some(11_800));
        assert_eq!(snap.counters.hits, 2);
        assert_eq!(snap.average_hit, 100.0);
        assert_eq!(snap.best_time_ms, Some(100_000));
        assert_eq!(snap.kill_count, 1);
        assert_eq!(snap.splits.time, None, "far ahead of the best is hidden");
        assert_eq!(snap.splits.hits.map(|s| s.text), Some("-80%".to_owned()));
    }

    #[tokio::test]
    async fn run_loop_processes_events_and_commands() {
        let (e, _store) = engine();
        let (event_tx, event_rx)       = tokio::sync::mpsc::channel(16);
        let (command_tx, command_rx)   = tokio::sync::mpsc::channel(4);
        let (snap_tx, mut snap_rx)     = tokio::sync::mpsc::channel(16);
        let task = tokio::spawn(run(event_rx, command_rx, snap_tx, e));

        for ev in [at(0, spawn(BOSS, None)), at(600, GameEvent::GameTick), at(700, own_hit(42))] {
            event_tx.send(ev).await.expect("send event");
        }
        let mut last = None;
        for _ in 0..3 {
            last = snap_rx.recv().await;
        }
        let snap = last.expect("snapshot");
        assert_eq!(snap.current_tick, 1);
        assert_eq!(snap.counters.damage_dealt, 42);

        command_tx.send(Command::Reset).await.expect("send command");
        let snap = snap_rx.recv().await.expect("snapshot after command");
        assert_eq!(snap.state, FightState::Idle);

        drop(event_tx);
        drop(command_tx);
        let engine = task.await.expect("join").expect("engine");
        assert_eq!(engine.session().state, FightState::Idle);
    }
}
