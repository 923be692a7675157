/// Typed world events delivered by the host, plus the two text formats the
/// tracker has to read:
///
///   * JSON lines, one `TimedEvent` per line, used by the replay CLI:
///       {"at_ms":1000,"event":{"type":"NpcSpawned","npc_id":13668,"position":{"x":3640,"y":9820,"plane":0}}}
///
///   * The game's kill-time chat message:
///       Fight duration: <col=ff0000>1:35.40</col>.
///     `<time>` is M:SS[.f] or H:MM:SS[.f]. Out-of-range components make
///     the whole message unusable.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Tile coordinate in the game world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldPoint {
    pub x:     i32,
    pub y:     i32,
    #[serde(default)]
    pub plane: i32,
}

impl WorldPoint {
    pub fn new(x: i32, y: i32, plane: i32) -> Self {
        Self { x, y, plane }
    }
}

/// Who an animation, hitsplat or death belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Actor {
    Npc { id: u32 },
    LocalPlayer,
    OtherPlayer,
}

impl Actor {
    pub fn npc_id(&self) -> Option<u32> {
        match self {
            Self::Npc { id } => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    GameMessage,
    Spam,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    LoginScreen,
    Hopping,
    Loading,
    LoggedIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub id:       u32,
    pub quantity: u64,
}

/// World events the engine consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GameEvent {
    NpcSpawned {
        npc_id:   u32,
        #[serde(default)]
        position: Option<WorldPoint>,
    },
    NpcDespawned {
        npc_id: u32,
    },
    AnimationChanged {
        actor:        Actor,
        animation_id: i32,
        /// Health bar fill as reported by the client (0..=health_scale).
        #[serde(default)]
        health_ratio: i32,
        #[serde(default)]
        health_scale: i32,
    },
    HitsplatApplied {
        actor:   Actor,
        amount:  i32,
        own_hit: bool,
    },
    ActorDeath {
        actor: Actor,
    },
    GameTick,
    ChatMessage {
        kind: ChatKind,
        text: String,
    },
    LootGranted {
        npc_id: u32,
        items:  Vec<ItemStack>,
    },
    /// Periodic proximity check against the boss's last known location.
    AreaCheck {
        near_boss: bool,
    },
    GameStateChanged {
        state: ClientState,
    },
}

/// An event stamped with the wall-clock time it was observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub at_ms: i64,
    pub event: GameEvent,
}

/// Decode one JSON line. Blank lines and comments (`#`) yield `None`;
/// malformed lines are logged and skipped.
pub fn parse_line(raw: &str) -> Option<TimedEvent> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match serde_json::from_str::<TimedEvent>(line) {
        Ok(ev) => Some(ev),
        Err(e) => {
            tracing::warn!("Skipping malformed event line: {}", e);
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Fight duration chat message
// ---------------------------------------------------------------------------

static FIGHT_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Fight duration: (?:<col=[0-9a-fA-F]{6}>)?(?P<time>[0-9:]+(?:\.[0-9]+)?)(?:</col>)?\.")
        .expect("fight duration pattern is valid")
});

/// Extract the fight duration in milliseconds from a chat line, if present
/// and well-formed.
pub fn parse_fight_duration(text: &str) -> Option<i64> {
    let caps = FIGHT_DURATION.captures(text)?;
    parse_fight_time(caps.name("time")?.as_str())
}

/// Parse "M:SS[.f]" or "H:MM:SS[.f]" into milliseconds.
pub fn parse_fight_time(time: &str) -> Option<i64> {
    if time.is_empty() || time.len() > 20 {
        return None;
    }

    let parts: Vec<&str> = time.splitn(3, ':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [m, s] => {
            let m: i64 = m.parse().ok()?;
            if m > 99 {
                return None;
            }
            (0, m, *s)
        }
        [h, m, s] => {
            let h: i64 = h.parse().ok()?;
            let m: i64 = m.parse().ok()?;
            if h > 23 || m >= 60 {
                return None;
            }
            (h, m, *s)
        }
        _ => return None,
    };

    let (whole, frac) = seconds.split_once('.').unwrap_or((seconds, ""));
    let secs: i64 = whole.parse().ok()?;
    if secs >= 60 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    // Only the first three fractional digits matter at millisecond precision.
    let millis = frac
        .chars()
        .chain(std::iter::repeat('0'))
        .take(3)
        .collect::<String>()
        .parse::<i64>()
        .ok()?;

    Some(((hours * 60 + minutes) * 60 + secs) * 1_000 + millis)
}
