/// The three egg colours that decide Araxxor's opening rotation.
///
/// Each colour has an egg NPC (spawns on the floor) and a minion NPC (what
/// the egg hatches into). The rotation order is a fixed cycle
/// White → Red → Green → White; only the starting colour varies per kill.
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ARAXXOR_NPC_ID:  u32 = 13668;
pub const ARAXXOR_DEAD_ID: u32 = 13669;

/// True for both the living and the post-death Araxxor NPC.
pub fn is_boss(npc_id: u32) -> bool {
    npc_id == ARAXXOR_NPC_ID || npc_id == ARAXXOR_DEAD_ID
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EggCategory {
    White,
    Red,
    Green,
}

impl EggCategory {
    pub const ALL: [EggCategory; 3] = [EggCategory::White, EggCategory::Red, EggCategory::Green];

    pub fn egg_npc_id(self) -> u32 {
        match self {
            Self::White => 13670,
            Self::Red   => 13672,
            Self::Green => 13674,
        }
    }

    pub fn minion_npc_id(self) -> u32 {
        match self {
            Self::White => 13671,
            Self::Red   => 13673,
            Self::Green => 13675,
        }
    }

    /// Successor in the rotation cycle.
    pub fn next(self) -> Self {
        match self {
            Self::White => Self::Red,
            Self::Red   => Self::Green,
            Self::Green => Self::White,
        }
    }

    /// Stable slot for per-category arrays.
    pub fn index(self) -> usize {
        match self {
            Self::White => 0,
            Self::Red   => 1,
            Self::Green => 2,
        }
    }

    pub fn from_egg_id(npc_id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.egg_npc_id() == npc_id)
    }

    pub fn from_minion_id(npc_id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.minion_npc_id() == npc_id)
    }

    /// Name used in persisted kill records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::White => "WHITE",
            Self::Red   => "RED",
            Self::Green => "GREEN",
        }
    }

    /// Inverse of `as_str`. Anything else (including "UNKNOWN") is `None`.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::White => "White",
            Self::Red   => "Red",
            Self::Green => "Green",
        }
    }
}

impl fmt::Display for EggCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
