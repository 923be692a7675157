/// Live splits: how the running fight compares with a reference kill.
///
/// The reference depends on `SplitMode`. Personal best compares with the
/// best kill (per starting rotation where one is known for hits and damage),
/// target compares the clock with a fixed goal, and last kill compares with
/// the previous fight. Every mode falls back to the overall best when its
/// own reference is missing.
use crate::{
    egg::EggCategory,
    state::LastFight,
    stats::{CategoryBest, StatisticsStore},
};
use serde::{Deserialize, Serialize};

/// A clock more than this far ahead of the reference shows no split.
const HIDE_AHEAD_MS: i64 = 3_000;
/// Percentage differences smaller than this are noise.
const MIN_PERCENT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    #[default]
    PersonalBest,
    Target,
    LastKill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Matches the all-time best exactly.
    Best,
    Good,
    Bad,
    Even,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Split {
    pub text:    String,
    pub verdict: Verdict,
}

impl Split {
    fn best() -> Self {
        Self { text: "★".to_owned(), verdict: Verdict::Best }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseClock {
    ToEnrage,
    InEnrage,
}

/// Everything a split needs to pick its reference.
pub struct SplitContext<'a> {
    pub mode:      SplitMode,
    pub target_ms: Option<i64>,
    pub rotation:  Option<EggCategory>,
    pub stats:     &'a StatisticsStore,
}

impl<'a> SplitContext<'a> {
    fn last_fight(&self) -> Option<&'a LastFight> {
        self.stats.last_fight.as_ref()
    }

    fn overall_best_ms(&self) -> Option<i64> {
        self.stats.best.map(|b| b.time_ms).filter(|t| *t > 0)
    }

    fn rotation_best(&self) -> Option<CategoryBest> {
        self.rotation.and_then(|r| self.stats.category_best(r))
    }

    fn reference_hits(&self) -> Option<u64> {
        let best = self
            .rotation_best()
            .map(|b| u64::from(b.hits))
            .or_else(|| self.stats.best.map(|b| u64::from(b.hits)));
        match self.mode {
            SplitMode::LastKill => self
                .last_fight()
                .map(|l| u64::from(l.counters.hits))
                .filter(|h| *h > 0)
                .or(best),
            _ => best,
        }
    }

    fn reference_damage(&self) -> Option<u64> {
        let best = self
            .rotation_best()
            .map(|b| b.damage_taken)
            .or_else(|| self.stats.best.map(|b| b.damage_taken));
        match self.mode {
            SplitMode::LastKill => self
                .last_fight()
                .map(|l| l.counters.damage_taken)
                .filter(|d| *d > 0)
                .or(best),
            _ => best,
        }
    }

    fn reference_time_ms(&self) -> Option<i64> {
        match self.mode {
            SplitMode::Target => self.target_ms.or_else(|| self.overall_best_ms()),
            SplitMode::LastKill => self
                .last_fight()
                .filter(|l| l.normal_ms > 0)
                .map(|l| l.normal_ms + l.enrage_ms.unwrap_or(0).max(0))
                .or_else(|| self.overall_best_ms()),
            SplitMode::PersonalBest => self.overall_best_ms(),
        }
    }

    fn best_phase_ms(&self, clock: PhaseClock) -> Option<i64> {
        let best = self.stats.best?;
        let ms = match clock {
            PhaseClock::ToEnrage => best.time_to_enrage_ms,
            PhaseClock::InEnrage => best.time_in_enrage_ms,
        };
        ms.filter(|t| *t > 0)
    }

    fn reference_phase_ms(&self, clock: PhaseClock) -> Option<i64> {
        match self.mode {
            SplitMode::Target => self.target_ms.or_else(|| self.best_phase_ms(clock)),
            SplitMode::LastKill => self
                .last_fight()
                .and_then(|l| match clock {
                    PhaseClock::ToEnrage => Some(l.normal_ms),
                    PhaseClock::InEnrage => l.enrage_ms,
                })
                .filter(|t| *t > 0)
                .or_else(|| self.best_phase_ms(clock)),
            SplitMode::PersonalBest => self.best_phase_ms(clock),
        }
    }

    /// Split for the fight clock.
    pub fn time(&self, current_ms: i64) -> Option<Split> {
        let reference = self.reference_time_ms().filter(|t| *t > 0)?;
        clock_split(current_ms, reference, self.overall_best_ms())
    }

    /// Split for one of the enrage clocks.
    pub fn phase(&self, clock: PhaseClock, current_ms: i64) -> Option<Split> {
        let reference = self.reference_phase_ms(clock).filter(|t| *t > 0)?;
        clock_split(current_ms, reference, self.best_phase_ms(clock))
    }

    /// Split for hits landed. More hits than the reference is good.
    pub fn hits(&self, current: u32) -> Option<Split> {
        let reference = self.reference_hits().filter(|h| *h > 0)?;
        if current == 0 {
            return None;
        }
        let best = self.stats.best.map(|b| u64::from(b.hits)).filter(|h| *h > 0);
        percent_split(u64::from(current), reference, best, true)
    }

    /// Split for damage taken. Less damage than the reference is good.
    pub fn damage_taken(&self, current: u64) -> Option<Split> {
        let reference = self.reference_damage().filter(|d| *d > 0)?;
        let best = self.stats.best.map(|b| b.damage_taken).filter(|d| *d > 0);
        percent_split(current, reference, best, false)
    }
}

fn clock_split(current_ms: i64, reference_ms: i64, best_ms: Option<i64>) -> Option<Split> {
    let diff = current_ms - reference_ms;
    if diff < -HIDE_AHEAD_MS {
        return None;
    }
    if best_ms == Some(current_ms) {
        return Some(Split::best());
    }
    let secs = diff / 1_000;
    Some(match diff {
        d if d > 0 => Split { text: format!("+{}s", secs), verdict: Verdict::Bad },
        d if d < 0 => Split { text: format!("-{}s", secs.abs()), verdict: Verdict::Good },
        _ => Split { text: "0s".to_owned(), verdict: Verdict::Even },
    })
}

fn percent_split(current: u64, reference: u64, best: Option<u64>, higher_is_better: bool) -> Option<Split> {
    if best == Some(current) {
        return Some(Split::best());
    }
    let pct = (current as f64 - reference as f64) / reference as f64 * 100.0;
    if pct.abs() < MIN_PERCENT {
        return None;
    }
    let good = (pct > 0.0) == higher_is_better;
    let sign = if pct > 0.0 { "+" } else { "" };
    Some(Split {
        text:    format!("{}{}%", sign, pct.round() as i64),
        verdict: if good { Verdict::Good } else { Verdict::Bad },
    })
}

// ---------------------------------------------------------------------------
// Time formatting
// ---------------------------------------------------------------------------

/// "1:35" for a minute or more, "45s" below that, "N/A" for negatives.
pub fn format_time(ms: i64) -> String {
    if ms < 0 {
        return "N/A".to_owned();
    }
    let total = ms / 1_000;
    match total / 60 {
        0 => format!("{}s", total),
        m => format!("{}:{:02}", m, total % 60),
    }
}

/// Like `format_time`, with an unset value rendered as "-".
pub fn format_opt_time(ms: Option<i64>) -> String {
    ms.map_or_else(|| "-".to_owned(), format_time)
}
