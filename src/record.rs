/// Completed-kill records and their persisted text form:
///
///   timestamp|durationMs|ROTATION|lootValue|hits|damageDealt|damageTaken|id:qty,id:qty
///
/// `ROTATION` is WHITE, RED, GREEN or UNKNOWN. The loot field may be empty or
/// missing entirely. Decoding validates every field and rejects the record
/// rather than repairing it.
use crate::egg::EggCategory;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

pub const MAX_RECORD_LEN:     usize = 10_000;
pub const MAX_LOOT_FIELD_LEN: usize = 5_000;
pub const MAX_LOOT_ENTRY_LEN: usize = 50;
pub const MAX_DURATION_MS:    i64   = 3_600_000;
pub const MAX_HITS:           u32   = 10_000;
pub const MAX_DAMAGE:         u64   = 1_000_000;
pub const MAX_QUANTITY:       u64   = 1_000_000;
/// How far in the future a timestamp may sit before it is treated as corrupt.
pub const FUTURE_SLACK_MS:    i64   = 86_400_000;

/// Storage key prefix; the suffix is the kill timestamp.
pub const KEY_PREFIX: &str = "kill_";

const UNKNOWN_ROTATION: &str = "UNKNOWN";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is {0} bytes, over the 10000 byte limit")]
    Oversize(usize),
    #[error("expected at least 7 fields, found {0}")]
    FieldCount(usize),
    #[error("field `{field}` is not a number: {value:?}")]
    Number { field: &'static str, value: String },
    #[error("field `{field}` out of range: {value}")]
    OutOfRange { field: &'static str, value: i128 },
    #[error("loot field is {0} bytes, over the 5000 byte limit")]
    LootOversize(usize),
    #[error("malformed loot entry {0:?}")]
    LootEntry(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KillRecord {
    pub timestamp_ms: i64,
    pub duration_ms:  i64,
    pub rotation:     Option<EggCategory>,
    pub loot_value:   i64,
    pub hits:         u32,
    pub damage_dealt: u64,
    pub damage_taken: u64,
    pub loot:         BTreeMap<u32, u64>,
}

impl KillRecord {
    /// Storage key for this record.
    pub fn key(&self) -> String {
        format!("{}{}", KEY_PREFIX, self.timestamp_ms)
    }

    pub fn item_count(&self) -> u64 {
        self.loot.values().sum()
    }

    pub fn encode(&self) -> String {
        let loot = self
            .loot
            .iter()
            .map(|(id, qty)| format!("{}:{}", id, qty))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.timestamp_ms,
            self.duration_ms,
            self.rotation.map_or(UNKNOWN_ROTATION, EggCategory::as_str),
            self.loot_value,
            self.hits,
            self.damage_dealt,
            self.damage_taken,
            loot,
        )
    }

    /// Parse and validate one persisted record. `now_ms` bounds how far in
    /// the future the timestamp may be.
    pub fn decode(raw: &str, now_ms: i64) -> Result<Self, RecordError> {
        if raw.len() > MAX_RECORD_LEN {
            return Err(RecordError::Oversize(raw.len()));
        }
        let parts: Vec<&str> = raw.splitn(8, '|').collect();
        if parts.len() < 7 {
            return Err(RecordError::FieldCount(parts.len()));
        }

        let timestamp_ms: i64 = number("timestamp", parts[0])?;
        if timestamp_ms < 0 || timestamp_ms > now_ms + FUTURE_SLACK_MS {
            return Err(out_of_range("timestamp", timestamp_ms));
        }

        let duration_ms: i64 = number("duration", parts[1])?;
        if !(0..=MAX_DURATION_MS).contains(&duration_ms) {
            return Err(out_of_range("duration", duration_ms));
        }

        let rotation = EggCategory::parse(parts[2]);

        let loot_value: i64 = number("loot_value", parts[3])?;
        if !(0..=i64::MAX / 2).contains(&loot_value) {
            return Err(out_of_range("loot_value", loot_value));
        }

        let hits: i64 = number("hits", parts[4])?;
        if !(0..=i64::from(MAX_HITS)).contains(&hits) {
            return Err(out_of_range("hits", hits));
        }
        let damage_dealt = damage("damage_dealt", parts[5])?;
        let damage_taken = damage("damage_taken", parts[6])?;

        let loot = match parts.get(7) {
            Some(field) if !field.is_empty() => decode_loot(field)?,
            _ => BTreeMap::new(),
        };

        Ok(Self {
            timestamp_ms,
            duration_ms,
            rotation,
            loot_value,
            hits: hits as u32,
            damage_dealt,
            damage_taken,
            loot,
        })
    }
}

fn number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, RecordError> {
    value.parse().map_err(|_| RecordError::Number { field, value: value.to_string() })
}

fn out_of_range(field: &'static str, value: i64) -> RecordError {
    RecordError::OutOfRange { field, value: i128::from(value) }
}

fn damage(field: &'static str, value: &str) -> Result<u64, RecordError> {
    let n: i64 = number(field, value)?;
    if n < 0 || n as u64 > MAX_DAMAGE {
        return Err(out_of_range(field, n));
    }
    Ok(n as u64)
}

/// Oversized entries and out-of-range quantities are skipped individually;
/// an entry that is not `id:qty` at all rejects the record.
fn decode_loot(field: &str) -> Result<BTreeMap<u32, u64>, RecordError> {
    if field.len() > MAX_LOOT_FIELD_LEN {
        return Err(RecordError::LootOversize(field.len()));
    }

    let mut loot = BTreeMap::new();
    for entry in field.split(',') {
        if entry.len() > MAX_LOOT_ENTRY_LEN {
            tracing::debug!("Skipping oversized loot entry ({} bytes)", entry.len());
            continue;
        }
        let Some((id, qty)) = entry.split_once(':') else {
            continue;
        };
        let (Ok(id), Ok(qty)) = (id.parse::<u32>(), qty.parse::<i64>()) else {
            return Err(RecordError::LootEntry(entry.to_string()));
        };
        if qty < 0 || qty as u64 > MAX_QUANTITY {
            tracing::debug!("Skipping loot entry {} with quantity {}", id, qty);
            continue;
        }
        loot.insert(id, qty as u64);
    }
    Ok(loot)
}
