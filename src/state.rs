/// Per-fight state: lifecycle timestamps, tick counter and combat counters.
///
/// Owned by the engine and mutated only from its event handler, so nothing
/// here needs locking.
use crate::egg::EggCategory;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FightState {
    #[default]
    Idle,
    Active,
    Ended,
}

#[derive(Debug, Default)]
pub struct FightSession {
    pub state:                FightState,
    pub start_ms:             Option<i64>,
    /// Set at most once per fight, by the duration chat line or the despawn.
    pub end_ms:               Option<i64>,
    pub death_ms:             Option<i64>,
    pub boss_reached_zero_hp: bool,
    pub current_tick:         u32,
    pub enrage_start_ms:      Option<i64>,
    /// A kill yields at most one loot record.
    pub loot_recorded:        bool,
}

impl FightSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.state == FightState::Active
    }

    pub fn start(&mut self, now_ms: i64) {
        *self = Self { state: FightState::Active, start_ms: Some(now_ms), ..Self::default() };
        tracing::info!("Fight started at {}ms", now_ms);
    }

    /// Back to Idle from any state. Idempotent.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record the fight end if nothing set it yet. Returns false when an
    /// earlier end time is retained.
    pub fn set_end_once(&mut self, end_ms: i64) -> bool {
        if self.end_ms.is_some() {
            return false;
        }
        self.end_ms = Some(end_ms);
        true
    }

    pub fn tick(&mut self) {
        if self.is_active() {
            self.current_tick = self.current_tick.saturating_add(1);
        }
    }

    /// Fight clock. The offset only applies while the game's own end time is
    /// not yet known.
    pub fn elapsed_ms(&self, now_ms: i64, offset_ms: i64) -> Option<i64> {
        let start = self.start_ms?;
        let elapsed = match (self.end_ms, self.death_ms) {
            (Some(end), _)      => end - start,
            (None, Some(death)) => death - start + offset_ms,
            (None, None)        => now_ms - start + offset_ms,
        };
        Some(elapsed)
    }

    /// Time from pull to enrage, on the same clock as `elapsed_ms`.
    pub fn time_to_enrage_ms(&self, offset_ms: i64) -> Option<i64> {
        Some(self.enrage_start_ms? - self.start_ms? + offset_ms)
    }

    /// Raw time since enrage, frozen once the boss is dead.
    pub fn enrage_elapsed_ms(&self, now_ms: i64) -> Option<i64> {
        let enrage = self.enrage_start_ms?;
        let until  = self.end_ms.or(self.death_ms).unwrap_or(now_ms);
        Some(until - enrage)
    }

    /// Time spent enraged as the game's timer shows it, which counts the
    /// enrage tick itself.
    pub fn time_in_enrage_ms(&self, now_ms: i64) -> Option<i64> {
        Some(self.enrage_elapsed_ms(now_ms)? + 1_000)
    }
}

// ---------------------------------------------------------------------------
// Combat counters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatCounters {
    pub hits:         u32,
    pub damage_dealt: u64,
    pub damage_taken: u64,
}

impl CombatCounters {
    /// A hitsplat on the boss. Only the tracked player's positive hits count.
    pub fn record_hit(&mut self, amount: i32, own_hit: bool) {
        if own_hit && amount > 0 {
            self.hits = self.hits.saturating_add(1);
            self.damage_dealt += amount as u64;
        }
    }

    /// A hitsplat on the tracked player, from any source.
    pub fn record_taken(&mut self, amount: i32) {
        if amount > 0 {
            self.damage_taken += amount as u64;
        }
    }

    pub fn average_hit(&self) -> f64 {
        if self.hits == 0 {
            return 0.0;
        }
        self.damage_dealt as f64 / f64::from(self.hits)
    }

    /// Damage per second over `elapsed_ms`, 0 before any damage.
    pub fn dps(&self, elapsed_ms: i64) -> f64 {
        if elapsed_ms <= 0 || self.damage_dealt == 0 {
            return 0.0;
        }
        self.damage_dealt as f64 / (elapsed_ms as f64 / 1_000.0)
    }
}

// ---------------------------------------------------------------------------
// Last completed fight
// ---------------------------------------------------------------------------

/// Snapshot of the most recent kill, kept for the "last kill" comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastFight {
    pub time_ms:   i64,
    pub counters:  CombatCounters,
    pub rotation:  Option<EggCategory>,
    /// Pull to enrage, or the whole fight when it never enraged.
    pub normal_ms: i64,
    pub enrage_ms: Option<i64>,
}

impl LastFight {
    pub fn capture(
        session:   &FightSession,
        counters:  CombatCounters,
        rotation:  Option<EggCategory>,
        time_ms:   i64,
        now_ms:    i64,
    ) -> Self {
        let start = session.start_ms.unwrap_or(now_ms);
        let end   = session.end_ms.unwrap_or(now_ms);
        let (normal_ms, enrage_ms) = match session.enrage_start_ms {
            Some(enrage) => (enrage - start, Some(end - enrage)),
            None         => (end - start, None),
        };
        Self { time_ms, counters, rotation, normal_ms, enrage_ms }
    }
}
