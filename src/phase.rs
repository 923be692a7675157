/// Boss phase detection from animation ids.
///
/// Normal → Special on any special-attack animation; leaving the special
/// animation drops back to Normal, or into Enraged when the boss is at or
/// below a quarter of its health bar. Enraged is sticky until the fight is
/// reset.
use serde::{Deserialize, Serialize};

pub const SPECIAL_ANIMATIONS: [i32; 3] = [11476, 11488, 11481];

pub const ENRAGE_HP_THRESHOLD: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Normal,
    Special,
    Enraged,
}

#[derive(Debug, Default)]
pub struct PhaseDetector {
    phase:          Phase,
    last_animation: Option<(i32, u32)>,
}

impl PhaseDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn reset(&mut self) {
        self.phase          = Phase::Normal;
        self.last_animation = None;
    }

    /// Feed one boss animation. Returns the new phase when it changed.
    pub fn on_animation(
        &mut self,
        animation_id: i32,
        tick:         u32,
        health_ratio: i32,
        health_scale: i32,
    ) -> Option<Phase> {
        if animation_id <= 0 || self.last_animation == Some((animation_id, tick)) {
            return None;
        }
        self.last_animation = Some((animation_id, tick));

        if self.phase == Phase::Enraged {
            return None;
        }

        let next = if SPECIAL_ANIMATIONS.contains(&animation_id) {
            Phase::Special
        } else if self.phase == Phase::Special {
            if is_low_hp(health_ratio, health_scale) { Phase::Enraged } else { Phase::Normal }
        } else {
            return None;
        };

        if next == self.phase {
            return None;
        }
        tracing::debug!("Phase {:?} -> {:?} (anim {})", self.phase, next, animation_id);
        self.phase = next;
        Some(next)
    }
}

fn is_low_hp(health_ratio: i32, health_scale: i32) -> bool {
    health_scale > 0 && f64::from(health_ratio) <= f64::from(health_scale) * ENRAGE_HP_THRESHOLD
}
