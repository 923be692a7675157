/// Tracker configuration, persisted as `config.toml` in a config directory.
///
/// Every field has a default, so a missing file or a partial one loads
/// cleanly. Example:
///
///   timer_offset_ms   = 1800
///   split_mode        = "target"
///   target_total_secs = 95
///   db_path           = "data/tracker.db"
///
///   [[items]]
///   id    = 29796
///   name  = "Noxious halberd"
///   price = 36000000
use crate::splits::SplitMode;
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.toml";

// ---------------------------------------------------------------------------
// TrackerConfig
// ---------------------------------------------------------------------------

/// A fixed price for one item, used when no live price source is wired in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPrice {
    pub id:    u32,
    #[serde(default)]
    pub name:  String,
    pub price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Added to the live fight clock until the game reports the real duration.
    #[serde(default = "default_timer_offset_ms")]
    pub timer_offset_ms: i64,

    /// What the live splits compare against.
    #[serde(default)]
    pub split_mode: SplitMode,

    /// Target kill time in whole seconds for `SplitMode::Target` (0 = unset).
    #[serde(default)]
    pub target_total_secs: u32,

    /// Largest gap between kills that still counts as one session.
    #[serde(default = "default_session_timeout_minutes")]
    pub session_timeout_minutes: u32,

    /// SQLite file for kill history and statistics (empty = in-memory only).
    #[serde(default)]
    pub db_path: PathBuf,

    /// Directory for rolling log files (empty = no file logging).
    #[serde(default)]
    pub log_dir: PathBuf,

    #[serde(default)]
    pub items: Vec<ItemPrice>,
}

fn default_timer_offset_ms() -> i64 { 1_800 }
fn default_session_timeout_minutes() -> u32 { 45 }

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            timer_offset_ms:         default_timer_offset_ms(),
            split_mode:              SplitMode::default(),
            target_total_secs:       0,
            session_timeout_minutes: default_session_timeout_minutes(),
            db_path:                 PathBuf::new(),
            log_dir:                 PathBuf::new(),
            items:                   Vec::new(),
        }
    }
}

impl TrackerConfig {
    pub fn session_timeout_ms(&self) -> i64 {
        i64::from(self.session_timeout_minutes) * 60 * 1_000
    }

    /// Target kill time in milliseconds, if one is set.
    pub fn target_ms(&self) -> Option<i64> {
        (self.target_total_secs > 0).then(|| i64::from(self.target_total_secs) * 1_000)
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

pub fn load_or_default(config_dir: &Path) -> Result<TrackerConfig> {
    let path = config_dir.join(CONFIG_FILE);
    if path.exists() {
        let raw = std::fs::read_to_string(&path)?;
        let cfg: TrackerConfig = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Config parse error: {}", e))?;
        Ok(cfg)
    } else {
        Ok(TrackerConfig::default())
    }
}

pub fn save(config: &TrackerConfig, config_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(config_dir)?;
    let raw = toml::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("Config serialize error: {}", e))?;
    std::fs::write(config_dir.join(CONFIG_FILE), raw)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Target time input
// ---------------------------------------------------------------------------

static PARENTHESIZED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\([^)]*\)").expect("parenthesized pattern is valid")
});

/// Parse a user-entered target time, either plain seconds ("95") or
/// "M:SS" ("1:35"). Placeholder text in parentheses is ignored and an empty
/// input means "no target" (0). Returns `None` for anything unusable.
pub fn parse_target_time(input: &str) -> Option<u32> {
    let cleaned = PARENTHESIZED.replace_all(input.trim(), "");
    let text = cleaned.trim();
    if text.is_empty() {
        return Some(0);
    }
    if text.len() > 20 {
        return None;
    }

    match text.split_once(':') {
        Some((m, s)) => {
            let minutes: u32 = m.trim().parse().ok()?;
            let seconds: u32 = s.trim().parse().ok()?;
            if minutes > 99 || seconds >= 60 {
                return None;
            }
            Some(minutes * 60 + seconds)
        }
        None => {
            let seconds: u32 = text.parse().ok()?;
            (seconds <= 5_999).then_some(seconds)
        }
    }
}

/// Inverse of `parse_target_time` for display; empty when unset.
pub fn format_target_time(total_secs: u32) -> String {
    if total_secs == 0 {
        return String::new();
    }
    format!("{}:{:02}", total_secs / 60, total_secs % 60)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_config() {
        let dir = tempdir().unwrap();
        let mut cfg = TrackerConfig::default();
        cfg.timer_offset_ms   = 1_200;
        cfg.split_mode        = SplitMode::Target;
        cfg.target_total_secs = 95;
        cfg.items             = vec![ItemPrice { id: 29796, name: "Noxious halberd".to_owned(), price: 36_000_000 }];

        save(&cfg, dir.path()).unwrap();

        let loaded = load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.timer_offset_ms,   1_200);
        assert_eq!(loaded.split_mode,        SplitMode::Target);
        assert_eq!(loaded.target_ms(),       Some(95_000));
        assert_eq!(loaded.items,             cfg.items);
    }

    #[test]
    fn returns_default_when_missing() {
        let dir = tempdir().unwrap();
        let cfg = load_or_default(dir.path()).unwrap();
        assert_eq!(cfg.timer_offset_ms, 1_800);
        assert_eq!(cfg.split_mode, SplitMode::PersonalBest);
        assert_eq!(cfg.session_timeout_ms(), 45 * 60 * 1_000);
        assert_eq!(cfg.target_ms(), None);
        assert!(cfg.db_path.as_os_str().is_empty());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "split_mode = \"last_kill\"\n").unwrap();
        let cfg = load_or_default(dir.path()).unwrap();
        assert_eq!(cfg.split_mode, SplitMode::LastKill);
        assert_eq!(cfg.timer_offset_ms, 1_800);
    }

    #[test]
    fn rejects_malformed_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "timer_offset_ms = \"soon\"\n").unwrap();
        assert!(load_or_default(dir.path()).is_err());
    }

    #[test]
    fn target_time_input_forms() {
        assert_eq!(parse_target_time("95"), Some(95));
        assert_eq!(parse_target_time(" 1:35 "), Some(95));
        assert_eq!(parse_target_time("(mm:ss)"), Some(0));
        assert_eq!(parse_target_time(""), Some(0));
        assert_eq!(parse_target_time("1:60"), None);
        assert_eq!(parse_target_time("100:00"), None);
        assert_eq!(parse_target_time("6000"), None);
        assert_eq!(parse_target_time("soon"), None);
        assert_eq!(format_target_time(95), "1:35");
        assert_eq!(format_target_time(0), "");
    }
}
