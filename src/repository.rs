/// Completed-kill history.
///
/// Two bounded lists: the session list (everything persisted, up to a year
/// back) and the trip list (kills since the player last left the lair or
/// reset it by hand). Every session kill is mirrored to the store under
/// `kill_<timestamp>`.
use crate::{
    db::KvStore,
    egg::EggCategory,
    record::{KillRecord, KEY_PREFIX},
};
use serde::Serialize;
use std::{collections::VecDeque, sync::Arc};

pub const MAX_SESSION_KILLS: usize = 1024;
pub const MAX_TRIP_KILLS:    usize = 1024;
pub const MAX_AGE_MS:        i64   = 365 * 24 * 60 * 60 * 1_000;
pub const SESSION_TIMEOUT_MS: i64 = 45 * 60 * 1_000;

pub struct KillRepository {
    store:         Arc<dyn KvStore>,
    session_kills: VecDeque<KillRecord>,
    trip_kills:    VecDeque<KillRecord>,
}

impl KillRepository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store, session_kills: VecDeque::new(), trip_kills: VecDeque::new() }
    }

    /// Read every persisted kill. Expired and invalid entries are deleted
    /// from the store; a failure to read at all leaves the history empty.
    pub fn load(store: Arc<dyn KvStore>, now_ms: i64) -> anyhow::Result<Self> {
        let cutoff = now_ms - MAX_AGE_MS;
        let mut kills = Vec::new();
        let (mut expired, mut invalid) = (0usize, 0usize);

        for (key, value) in store.load_prefix(KEY_PREFIX)? {
            match KillRecord::decode(&value, now_ms) {
                Ok(record) if record.timestamp_ms < cutoff => {
                    expired += 1;
                    store.remove(&key);
                }
                Ok(record) => kills.push(record),
                Err(e) => {
                    tracing::warn!("Dropping invalid kill record {}: {}", key, e);
                    invalid += 1;
                    store.remove(&key);
                }
            }
        }

        kills.sort_by_key(|k| k.timestamp_ms);
        let overflow = kills.len().saturating_sub(MAX_SESSION_KILLS);
        for old in kills.drain(..overflow) {
            store.remove(&old.key());
        }

        tracing::info!(
            "Loaded {} kill records ({} expired, {} invalid, {} over capacity)",
            kills.len(), expired, invalid, overflow
        );
        Ok(Self { store, session_kills: kills.into(), trip_kills: VecDeque::new() })
    }

    /// Append a finished kill to both lists and persist it.
    pub fn push(&mut self, record: KillRecord) {
        if self.session_kills.len() >= MAX_SESSION_KILLS {
            if let Some(oldest) = self.session_kills.pop_front() {
                self.store.remove(&oldest.key());
            }
        }
        if self.trip_kills.len() >= MAX_TRIP_KILLS {
            self.trip_kills.pop_front();
        }

        self.store.put(&record.key(), &record.encode());
        self.trip_kills.push_back(record.clone());
        self.session_kills.push_back(record);
    }

    pub fn session_kills(&self) -> &VecDeque<KillRecord> {
        &self.session_kills
    }

    pub fn trip_kills(&self) -> &VecDeque<KillRecord> {
        &self.trip_kills
    }

    pub fn reset_trip(&mut self) {
        if !self.trip_kills.is_empty() {
            tracing::info!("Trip reset ({} kills)", self.trip_kills.len());
        }
        self.trip_kills.clear();
    }

    pub fn last_kill_ms(&self) -> Option<i64> {
        self.session_kills.back().map(|k| k.timestamp_ms)
    }

    /// Loot value of every stored kill.
    pub fn total_value(&self) -> i64 {
        self.session_kills.iter().map(|k| k.loot_value).sum()
    }

    pub fn sessions(&self, timeout_ms: i64) -> Vec<Vec<&KillRecord>> {
        group_into_sessions(self.session_kills.iter(), timeout_ms)
    }
}

/// Split kills into runs where no two consecutive kills (by timestamp) are
/// more than `timeout_ms` apart. Sessions come out oldest first.
pub fn group_into_sessions<'a>(
    kills:      impl IntoIterator<Item = &'a KillRecord>,
    timeout_ms: i64,
) -> Vec<Vec<&'a KillRecord>> {
    let mut sorted: Vec<&KillRecord> = kills.into_iter().collect();
    sorted.sort_by_key(|k| k.timestamp_ms);

    let mut sessions = Vec::new();
    let mut current: Vec<&KillRecord> = Vec::new();
    for kill in sorted {
        if let Some(prev) = current.last() {
            if kill.timestamp_ms - prev.timestamp_ms > timeout_ms {
                sessions.push(std::mem::take(&mut current));
            }
        }
        current.push(kill);
    }
    if !current.is_empty() {
        sessions.push(current);
    }
    sessions
}

// ---------------------------------------------------------------------------
// Session summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub start_ms:      i64,
    pub kills:         usize,
    pub total_value:   i64,
    pub item_count:    u64,
    pub best_time_ms:  i64,
    /// Rotation of the kill that set `best_time_ms`.
    pub best_rotation: Option<EggCategory>,
}

impl SessionSummary {
    /// `None` for an empty session.
    pub fn from_kills(kills: &[&KillRecord]) -> Option<Self> {
        let start_ms = kills.iter().map(|k| k.timestamp_ms).min()?;
        // Ties keep the earlier entry.
        let best = kills.iter().copied().fold(None::<&KillRecord>, |best, k| match best {
            Some(b) if b.duration_ms <= k.duration_ms => Some(b),
            _ => Some(k),
        })?;
        Some(Self {
            start_ms,
            kills:         kills.len(),
            total_value:   kills.iter().map(|k| k.loot_value).sum(),
            item_count:    kills.iter().map(|k| k.item_count()).sum(),
            best_time_ms:  best.duration_ms,
            best_rotation: best.rotation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use std::collections::BTreeMap;

    const NOW: i64 = 1_700_000_000_000;

    fn kill(timestamp_ms: i64, duration_ms: i64, rotation: Option<EggCategory>) -> KillRecord {
        KillRecord {
            timestamp_ms,
            duration_ms,
            rotation,
            loot_value:   1_000,
            hits:         10,
            damage_dealt: 300,
            damage_taken: 20,
            loot:         BTreeMap::from([(995, 500)]),
        }
    }

    #[test]
    fn grouping_splits_on_gap_over_timeout() {
        let kills = [kill(46 * 60 * 1_000, 1, None), kill(0, 1, None), kill(1_000, 1, None)];
        let sessions = group_into_sessions(kills.iter(), SESSION_TIMEOUT_MS);
        let stamps: Vec<Vec<i64>> =
            sessions.iter().map(|s| s.iter().map(|k| k.timestamp_ms).collect()).collect();
        assert_eq!(stamps, vec![vec![0, 1_000], vec![46 * 60 * 1_000]]);
    }

    #[test]
    fn gap_equal_to_timeout_stays_in_session() {
        let kills = [kill(0, 1, None), kill(SESSION_TIMEOUT_MS, 1, None)];
        assert_eq!(group_into_sessions(kills.iter(), SESSION_TIMEOUT_MS).len(), 1);
        assert!(group_into_sessions(std::iter::empty(), SESSION_TIMEOUT_MS).is_empty());
    }

    #[test]
    fn summary_tracks_best_kill_rotation() {
        let a = kill(5_000, 100_000, Some(EggCategory::White));
        let b = kill(2_000, 90_000, Some(EggCategory::Green));
        let c = kill(9_000, 90_000, Some(EggCategory::Red));
        let summary = SessionSummary::from_kills(&[&a, &b, &c]).expect("summary");
        assert_eq!(summary.start_ms, 2_000);
        assert_eq!(summary.kills, 3);
        assert_eq!(summary.total_value, 3_000);
        assert_eq!(summary.item_count, 1_500);
        assert_eq!(summary.best_time_ms, 90_000);
        assert_eq!(summary.best_rotation, Some(EggCategory::Green));
        assert_eq!(SessionSummary::from_kills(&[]), None);
    }

    #[test]
    fn push_persists_and_caps() {
        let store = MemoryStore::new();
        let mut repo = KillRepository::new(Arc::new(store.clone()));
        for i in 0..(MAX_SESSION_KILLS as i64 + 2) {
            repo.push(kill(NOW + i, 60_000, None));
        }
        assert_eq!(repo.session_kills().len(), MAX_SESSION_KILLS);
        assert_eq!(repo.trip_kills().len(), MAX_TRIP_KILLS);
        assert_eq!(store.len(), MAX_SESSION_KILLS);
        assert!(store.get(&format!("kill_{}", NOW)).is_none(), "oldest evicted from store");
        assert_eq!(repo.last_kill_ms(), Some(NOW + MAX_SESSION_KILLS as i64 + 1));

        repo.reset_trip();
        assert!(repo.trip_kills().is_empty());
        assert_eq!(repo.session_kills().len(), MAX_SESSION_KILLS);
    }

    #[test]
    fn load_drops_expired_records_from_memory_and_store() {
        let store = MemoryStore::new();
        let fresh = kill(NOW - 60_000, 90_000, Some(EggCategory::Red));
        let stale = kill(NOW - MAX_AGE_MS - 1, 90_000, None);
        store.put(&fresh.key(), &fresh.encode());
        store.put(&stale.key(), &stale.encode());

        let repo = KillRepository::load(Arc::new(store.clone()), NOW).expect("load");
        assert_eq!(repo.session_kills().iter().collect::<Vec<_>>(), vec![&fresh]);
        assert!(store.get(&stale.key()).is_none());
        assert!(store.get(&fresh.key()).is_some());
    }

    #[test]
    fn load_removes_invalid_records() {
        let store = MemoryStore::new();
        store.put("kill_1", "garbage");
        store.put("kill_2", "2|9999999|RED|0|1|1|1|");
        let good = kill(NOW - 10, 60_000, None);
        store.put(&good.key(), &good.encode());

        let repo = KillRepository::load(Arc::new(store.clone()), NOW).expect("load");
        assert_eq!(repo.session_kills().len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn load_sorts_by_timestamp() {
        let store = MemoryStore::new();
        for ts in [NOW - 1_000, NOW - 900_000, NOW - 5] {
            let k = kill(ts, 60_000, None);
            store.put(&k.key(), &k.encode());
        }
        let repo = KillRepository::load(Arc::new(store), NOW).expect("load");
        let stamps: Vec<i64> = repo.session_kills().iter().map(|k| k.timestamp_ms).collect();
        assert_eq!(stamps, vec![NOW - 900_000, NOW - 1_000, NOW - 5]);
        assert_eq!(repo.total_value(), 3_000);
    }
}
