/// Read-only view of the engine, emitted after every processed event.
///
/// This is everything an overlay needs to paint the fight panel; it owns
/// its data so it can cross a channel and be serialised as JSON.
use crate::{
    egg::EggCategory,
    phase::Phase,
    splits::Split,
    state::{CombatCounters, FightState},
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct FightSnapshot {
    pub at_ms:                i64,
    pub state:                FightState,
    pub phase:                Phase,
    pub elapsed_ms:           Option<i64>,
    pub current_tick:         u32,
    pub boss_reached_zero_hp: bool,

    /// Inferred egg order so far; empty until the first egg resolves.
    pub rotation:             Vec<EggCategory>,
    pub rotation_start:       Option<EggCategory>,
    /// Living minions per category, in `EggCategory::ALL` order.
    pub active_minions:       [u32; 3],

    pub counters:             CombatCounters,
    pub dps:                  f64,
    pub average_hit:          f64,
    pub time_to_enrage_ms:    Option<i64>,
    pub time_in_enrage_ms:    Option<i64>,

    pub best_time_ms:         Option<i64>,
    pub kill_count:           u32,
    pub kills_per_hour:       f64,
    pub average_kill_ms:      i64,

    pub trip_kills:           usize,
    pub trip_value:           i64,
    pub session_value:        i64,

    pub splits:               SplitsView,
}

/// Live splits for the running fight. `None` hides a split.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SplitsView {
    pub time:           Option<Split>,
    pub hits:           Option<Split>,
    pub damage_taken:   Option<Split>,
    pub time_to_enrage: Option<Split>,
    pub time_in_enrage: Option<Split>,
}

impl FightSnapshot {
    pub fn in_fight(&self) -> bool {
        self.state == FightState::Active
    }
}
