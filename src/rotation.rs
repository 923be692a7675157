/// Egg rotation inference.
///
/// At the start of a kill six eggs (two per colour) appear within a tick or
/// two of each other. Only three ever hatch, one per colour, in the fixed
/// cycle order; the only unknown is which colour goes first. The client
/// gives us nothing to tell the two same-colour eggs apart except their tile,
/// so every "which egg was that" decision is resolved by the south-east
/// score `x - y`, highest first.
use crate::{egg::EggCategory, parser::WorldPoint};

/// Hard cap on tracked eggs per fight: six real spawns plus room for a few
/// synthesized records when hatch/despawn events arrive uncorrelated.
pub const MAX_EGG_TIMINGS: usize = 9;

const FULL_SPAWN: usize = 6;

fn south_east_score(position: Option<WorldPoint>) -> i64 {
    match position {
        Some(p) => p.x as i64 - p.y as i64,
        None    => i64::MIN,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EggTiming {
    pub category:     EggCategory,
    /// `None` for records synthesized from an uncorrelated event.
    pub position:     Option<WorldPoint>,
    pub hatch_tick:   Option<u32>,
    pub despawn_tick: Option<u32>,
}

impl EggTiming {
    fn spawned(category: EggCategory, position: WorldPoint) -> Self {
        Self { category, position: Some(position), hatch_tick: None, despawn_tick: None }
    }

    pub fn last_event_tick(&self) -> Option<u32> {
        self.hatch_tick.max(self.despawn_tick)
    }

    pub fn had_event(&self) -> bool {
        self.hatch_tick.is_some() || self.despawn_tick.is_some()
    }
}

#[derive(Debug, Default)]
pub struct RotationTracker {
    timings: Vec<EggTiming>,
    history: Vec<EggCategory>,
    first_egg_position: Option<WorldPoint>,
    /// Minions currently alive, per category slot.
    active_minions: [u32; 3],
}

impl RotationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.timings.clear();
        self.history.clear();
        self.first_egg_position = None;
        self.active_minions = [0; 3];
    }

    /// Inferred egg order so far (0 to 3 entries).
    pub fn history(&self) -> &[EggCategory] {
        &self.history
    }

    /// The starting colour, once known.
    pub fn start(&self) -> Option<EggCategory> {
        self.history.first().copied()
    }

    pub fn is_complete(&self) -> bool {
        self.history.len() == 3
    }

    pub fn timings(&self) -> &[EggTiming] {
        &self.timings
    }

    pub fn first_egg_position(&self) -> Option<WorldPoint> {
        self.first_egg_position
    }

    pub fn active_minions(&self, category: EggCategory) -> u32 {
        self.active_minions[category.index()]
    }

    /// An egg of `category` appeared at `position`.
    pub fn on_egg_spawned(&mut self, category: EggCategory, position: WorldPoint) {
        if self.timings.len() < MAX_EGG_TIMINGS {
            self.timings.push(EggTiming::spawned(category, position));
        }

        if !self.history.is_empty() {
            return;
        }

        let unhatched = self.timings.iter().filter(|t| !t.had_event()).count();
        if unhatched != FULL_SPAWN {
            return;
        }

        let Some(first) = self.best_match(|t| !t.had_event()) else {
            return;
        };
        let first_category = self.timings[first].category;
        self.first_egg_position = self.timings[first].position;
        self.history = vec![first_category, first_category.next(), first_category.next().next()];
        tracing::debug!(
            "Rotation inferred from full spawn: {:?} (egg at {:?})",
            self.history, self.first_egg_position
        );
    }

    /// An egg of `category` disappeared without hatching.
    pub fn on_egg_despawned(&mut self, category: EggCategory, tick: u32) {
        match self.best_match(|t| t.category == category && !t.had_event()) {
            Some(i) => self.timings[i].despawn_tick = Some(tick),
            None => self.push_virtual(category, None, Some(tick)),
        }
    }

    /// A minion of `category` appeared, meaning one of its eggs hatched.
    /// `boss_dead` suppresses rotation seeding from post-kill spawns.
    pub fn on_minion_spawned(&mut self, category: EggCategory, tick: u32, boss_dead: bool) {
        self.active_minions[category.index()] += 1;

        match self.best_match(|t| t.category == category && !t.had_event()) {
            Some(i) => self.timings[i].hatch_tick = Some(tick),
            None => self.push_virtual(category, Some(tick), None),
        }

        // Only the first hatch is informative; later colours follow the cycle.
        if boss_dead || !self.history.is_empty() {
            return;
        }
        tracing::debug!("Rotation seeded from first hatch: {:?}", category);
        self.history.push(category);
    }

    pub fn on_minion_despawned(&mut self, category: EggCategory) {
        let slot = &mut self.active_minions[category.index()];
        *slot = slot.saturating_sub(1);
    }

    /// Index of the unconsumed, positioned egg with the highest south-east
    /// score among those matching `filter`. Ties keep the earliest record.
    fn best_match(&self, filter: impl Fn(&EggTiming) -> bool) -> Option<usize> {
        let mut best: Option<(usize, i64)> = None;
        for (i, t) in self.timings.iter().enumerate() {
            if t.position.is_none() || !filter(t) {
                continue;
            }
            let score = south_east_score(t.position);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }
        best.map(|(i, _)| i)
    }

    fn push_virtual(&mut self, category: EggCategory, hatch: Option<u32>, despawn: Option<u32>) {
        if self.timings.len() >= MAX_EGG_TIMINGS {
            tracing::debug!("Egg timing cap reached, dropping uncorrelated {:?} event", category);
            return;
        }
        self.timings.push(EggTiming { category, position: None, hatch_tick: hatch, despawn_tick: despawn });
    }
}
