/// Cross-fight statistics: personal bests overall and per starting rotation,
/// the last five kill times, and a kills-per-hour estimate that decays while
/// the player is idle.
///
/// The whole store is serialized as one JSON document so a single write
/// persists it.
use crate::{
    egg::EggCategory,
    state::{CombatCounters, LastFight},
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const RECENT_KILLS: usize = 5;

/// Idle time after the last kill before the rate starts decaying.
pub const DECAY_START_MS: i64 = 5 * 60 * 1_000;
/// Decay constant: the rate falls to 1/e after an hour past the threshold.
pub const DECAY_K: f64 = 1.0 / 3_600_000.0;
const RATE_CACHE_MS: i64 = 1_000;

/// The fastest kill. Every field comes from that one kill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestKill {
    pub time_ms:           i64,
    pub hits:              u32,
    pub damage_taken:      u64,
    pub time_to_enrage_ms: Option<i64>,
    pub time_in_enrage_ms: Option<i64>,
}

/// Fastest kill for one starting rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryBest {
    pub time_ms:      i64,
    pub hits:         u32,
    pub damage_taken: u64,
}

/// Everything the store needs to know about a finished kill.
#[derive(Debug, Clone, Copy)]
pub struct KillOutcome {
    pub time_ms:           i64,
    pub counters:          CombatCounters,
    pub rotation:          Option<EggCategory>,
    pub time_to_enrage_ms: Option<i64>,
    pub time_in_enrage_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsStore {
    pub kill_count:    u32,
    pub best:          Option<BestKill>,
    pub category_best: [Option<CategoryBest>; 3],
    pub recent_ms:     VecDeque<i64>,
    pub last_kill_ms:  Option<i64>,
    pub last_fight:    Option<LastFight>,
    #[serde(skip)]
    rate_cache:        Option<(i64, f64)>,
}

impl StatisticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a finished kill into the store. Returns false (and changes
    /// nothing) for a non-positive duration.
    pub fn record_kill(&mut self, kill: &KillOutcome, now_ms: i64) -> bool {
        if kill.time_ms <= 0 {
            tracing::warn!("Ignoring kill with non-positive duration {}ms", kill.time_ms);
            return false;
        }

        self.kill_count += 1;

        if self.best.map_or(true, |b| kill.time_ms < b.time_ms) {
            self.best = Some(BestKill {
                time_ms:           kill.time_ms,
                hits:              kill.counters.hits,
                damage_taken:      kill.counters.damage_taken,
                time_to_enrage_ms: kill.time_to_enrage_ms,
                time_in_enrage_ms: kill.time_in_enrage_ms,
            });
            tracing::info!("New personal best: {}ms", kill.time_ms);
        }

        if let Some(rotation) = kill.rotation {
            let slot = &mut self.category_best[rotation.index()];
            if slot.map_or(true, |b| kill.time_ms < b.time_ms) {
                *slot = Some(CategoryBest {
                    time_ms:      kill.time_ms,
                    hits:         kill.counters.hits,
                    damage_taken: kill.counters.damage_taken,
                });
            }
        }

        if self.recent_ms.len() == RECENT_KILLS {
            self.recent_ms.pop_front();
        }
        self.recent_ms.push_back(kill.time_ms);

        self.last_kill_ms = Some(now_ms);
        self.rate_cache   = None;
        true
    }

    pub fn set_last_fight(&mut self, last: LastFight) {
        self.last_fight = Some(last);
    }

    pub fn category_best(&self, category: EggCategory) -> Option<CategoryBest> {
        self.category_best[category.index()]
    }

    /// Integer mean of the recent kill times, 0 with no kills.
    pub fn average_duration_ms(&self) -> i64 {
        if self.recent_ms.is_empty() {
            return 0;
        }
        self.recent_ms.iter().sum::<i64>() / self.recent_ms.len() as i64
    }

    /// Kills per hour at the recent average pace, decayed by idle time.
    /// Recomputed at most once per second.
    pub fn kills_per_hour(&mut self, now_ms: i64) -> f64 {
        if let Some((at, value)) = self.rate_cache {
            if now_ms >= at && now_ms - at < RATE_CACHE_MS {
                return value;
            }
        }
        let value = self.compute_kills_per_hour(now_ms);
        self.rate_cache = Some((now_ms, value));
        value
    }

    fn compute_kills_per_hour(&self, now_ms: i64) -> f64 {
        let avg = self.average_duration_ms();
        if avg <= 0 {
            return 0.0;
        }
        let base = 3_600_000.0 / avg as f64;

        match self.last_kill_ms {
            Some(last) if now_ms - last > DECAY_START_MS => {
                let over = (now_ms - last - DECAY_START_MS) as f64;
                base * (-DECAY_K * over).exp()
            }
            _ => base,
        }
    }

    /// Forget every statistic. Kill records are untouched.
    pub fn reset(&mut self) {
        *self = Self::default();
        tracing::info!("Statistics reset");
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        let mut stats: Self = serde_json::from_str(raw)?;
        while stats.recent_ms.len() > RECENT_KILLS {
            stats.recent_ms.pop_front();
        }
        Ok(stats)
    }
}
