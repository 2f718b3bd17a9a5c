//! Simulation context: competitors, their trails and the spatial index

use std::collections::BTreeMap;

use tracing::debug;
use uuid::Uuid;

use super::collision::CollisionDetector;
use super::constants::{MAX_COMPETITORS, MAX_LIVES, PALETTE, SPAWN_SLOTS};
use super::physics::{Advance, MotionEngine};
use super::spatial::SpatialIndex;
use super::trail::TrailStore;
use super::RoomError;

/// Authoritative state of one competitor
#[derive(Debug, Clone)]
pub struct Competitor {
    pub id: Uuid,
    pub display_name: String,
    pub color: String,
    pub spawn_slot: usize,
    /// Monotonic join order, used for spawn assignment
    pub join_seq: u64,

    pub x: f32,
    pub y: f32,
    /// Radians
    pub heading: f32,
    /// -1, 0 or 1
    pub turn: i8,
    pub alive: bool,
    pub lives: u32,
    pub score: u32,

    pub trail: TrailStore,
}

impl Competitor {
    pub fn new(
        id: Uuid,
        display_name: String,
        color: impl Into<String>,
        spawn_slot: usize,
        join_seq: u64,
    ) -> Self {
        let slot = SPAWN_SLOTS[spawn_slot % SPAWN_SLOTS.len()];
        Self {
            id,
            display_name,
            color: color.into(),
            spawn_slot,
            join_seq,
            x: slot.x,
            y: slot.y,
            heading: slot.heading,
            turn: 0,
            alive: false,
            lives: MAX_LIVES,
            score: 0,
            trail: TrailStore::new(),
        }
    }

    /// Place at a spawn slot with an empty trail
    pub fn respawn(&mut self, spawn_slot: usize) {
        let slot = SPAWN_SLOTS[spawn_slot % SPAWN_SLOTS.len()];
        self.spawn_slot = spawn_slot;
        self.x = slot.x;
        self.y = slot.y;
        self.heading = slot.heading;
        self.turn = 0;
        self.alive = true;
        self.trail.reset();
    }
}

/// How a competitor died during a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathCause {
    Wall,
    /// Struck the trail owned by the given competitor (possibly itself)
    Trail(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Death {
    pub id: Uuid,
    pub cause: DeathCause,
}

/// Everything a single arena simulation owns
#[derive(Debug, Clone, Default)]
pub struct World {
    competitors: BTreeMap<Uuid, Competitor>,
    index: SpatialIndex,
    next_join_seq: u64,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a competitor. New competitors are never alive until the next round spawn.
    pub fn add(&mut self, id: Uuid, display_name: String) -> Result<&Competitor, RoomError> {
        if self.competitors.contains_key(&id) {
            return Err(RoomError::AlreadyJoined);
        }
        if self.competitors.len() >= MAX_COMPETITORS {
            return Err(RoomError::Full);
        }

        let color = PALETTE
            .iter()
            .find(|color| self.competitors.values().all(|c| c.color != **color))
            .copied()
            .unwrap_or(PALETTE[0]);
        let spawn_slot = self.competitors.len() % SPAWN_SLOTS.len();
        let join_seq = self.next_join_seq;
        self.next_join_seq += 1;

        let competitor = Competitor::new(id, display_name, color, spawn_slot, join_seq);
        Ok(self.competitors.entry(id).or_insert(competitor))
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<Competitor> {
        let removed = self.competitors.remove(id)?;
        if !removed.trail.is_empty() {
            self.index.mark_dirty();
        }
        Some(removed)
    }

    pub fn get(&self, id: &Uuid) -> Option<&Competitor> {
        self.competitors.get(id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut Competitor> {
        self.competitors.get_mut(id)
    }

    pub fn competitors(&self) -> impl Iterator<Item = &Competitor> {
        self.competitors.values()
    }

    pub fn competitors_mut(&mut self) -> impl Iterator<Item = &mut Competitor> {
        self.competitors.values_mut()
    }

    pub fn len(&self) -> usize {
        self.competitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.competitors.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.competitors.contains_key(id)
    }

    /// Update steering; unknown ids are ignored
    pub fn set_turn(&mut self, id: &Uuid, turn: i8) -> bool {
        match self.competitors.get_mut(id) {
            Some(c) => {
                c.turn = turn.clamp(-1, 1);
                true
            }
            None => false,
        }
    }

    pub fn alive_count(&self) -> usize {
        self.competitors.values().filter(|c| c.alive).count()
    }

    /// Competitors that still have lives left
    pub fn contenders(&self) -> impl Iterator<Item = &Competitor> {
        self.competitors.values().filter(|c| c.lives > 0)
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    /// Restore every competitor to full lives and zero score
    pub fn reset_match(&mut self) {
        for c in self.competitors.values_mut() {
            c.lives = MAX_LIVES;
            c.score = 0;
            c.alive = false;
        }
    }

    /// Spawn every competitor with lives left, in join order, and clear all trails.
    /// Competitors out of lives stay dead.
    pub fn spawn_round(&mut self) {
        let mut order: Vec<(u64, Uuid)> = self
            .competitors
            .values()
            .map(|c| (c.join_seq, c.id))
            .collect();
        order.sort_unstable();

        let mut next_slot = 0usize;
        for (_, id) in order {
            let Some(c) = self.competitors.get_mut(&id) else {
                continue;
            };
            if c.lives > 0 {
                c.respawn(next_slot % SPAWN_SLOTS.len());
                next_slot += 1;
            } else {
                c.alive = false;
                c.turn = 0;
                c.trail.reset();
            }
        }

        self.index.rebuild(std::iter::empty());
    }

    /// Run one physics tick at `speed`: move, wall check, re-index, trail check.
    /// Returns the competitors that died this tick.
    pub fn step(&mut self, speed: f32) -> Vec<Death> {
        let mut deaths = Vec::new();

        for c in self.competitors.values_mut() {
            if MotionEngine::advance(c, speed, &mut self.index) == Advance::HitWall {
                deaths.push(Death {
                    id: c.id,
                    cause: DeathCause::Wall,
                });
            }
        }

        if self.index.is_dirty() {
            self.rebuild_index();
        }

        for hit in CollisionDetector::detect(&self.competitors, &self.index) {
            if let Some(c) = self.competitors.get_mut(&hit.victim) {
                c.alive = false;
            }
            deaths.push(Death {
                id: hit.victim,
                cause: DeathCause::Trail(hit.owner),
            });
        }

        for death in &deaths {
            debug!(player_id = %death.id, cause = ?death.cause, "competitor crashed");
        }

        deaths
    }

    /// Re-index the trails of all living competitors
    pub fn rebuild_index(&mut self) {
        self.index.rebuild(
            self.competitors
                .values()
                .filter(|c| c.alive)
                .map(|c| (c.id, &c.trail)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::{BASE_SPEED, COLLISION_SKIP_OWN, TRAIL_CAPACITY};
    use std::f32::consts::FRAC_PI_2;

    fn place(world: &mut World, name: &str, x: f32, y: f32, heading: f32) -> Uuid {
        let id = Uuid::new_v4();
        world.add(id, name.to_string()).unwrap();
        let c = world.get_mut(&id).unwrap();
        c.respawn(0);
        c.x = x;
        c.y = y;
        c.heading = heading;
        id
    }

    #[test]
    fn test_add_assigns_distinct_colors_and_limit() {
        let mut world = World::new();
        for i in 0..MAX_COMPETITORS {
            world.add(Uuid::new_v4(), format!("p{i}")).unwrap();
        }
        let mut colors: Vec<&str> = world.competitors().map(|c| c.color.as_str()).collect();
        colors.sort_unstable();
        colors.dedup();
        assert_eq!(colors.len(), MAX_COMPETITORS);
        assert!(matches!(
            world.add(Uuid::new_v4(), "late".to_string()),
            Err(RoomError::Full)
        ));
    }

    #[test]
    fn test_joined_competitor_starts_dead() {
        let mut world = World::new();
        let id = Uuid::new_v4();
        world.add(id, "a".to_string()).unwrap();
        assert!(!world.get(&id).unwrap().alive);
        assert_eq!(world.get(&id).unwrap().lives, MAX_LIVES);
    }

    #[test]
    fn test_spawn_round_skips_eliminated() {
        let mut world = World::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        world.add(a, "a".to_string()).unwrap();
        world.add(b, "b".to_string()).unwrap();
        world.add(c, "c".to_string()).unwrap();
        world.get_mut(&b).unwrap().lives = 0;

        world.spawn_round();

        assert!(world.get(&a).unwrap().alive);
        assert!(!world.get(&b).unwrap().alive);
        assert!(world.get(&c).unwrap().alive);
        assert_eq!(world.get(&a).unwrap().spawn_slot, 0);
        // b is out, so c takes the next slot
        assert_eq!(world.get(&c).unwrap().spawn_slot, 1);
        assert_eq!(world.get(&c).unwrap().x, SPAWN_SLOTS[1].x);
    }

    #[test]
    fn test_crossing_paths_die_on_exact_tick() {
        let mut world = World::new();
        let runner = place(&mut world, "runner", 100.0, 450.0, 0.0);
        let wall = place(&mut world, "wall", 200.0, 500.0, -FRAC_PI_2);

        // wall passes y=450 on tick 20; runner reaches x=197.5 on tick 39
        for tick in 1..=38 {
            let deaths = world.step(BASE_SPEED);
            assert!(deaths.is_empty(), "unexpected death on tick {tick}: {deaths:?}");
        }
        let deaths = world.step(BASE_SPEED);
        assert_eq!(
            deaths,
            vec![Death {
                id: runner,
                cause: DeathCause::Trail(wall),
            }]
        );
        assert!(!world.get(&runner).unwrap().alive);
        assert!(world.get(&wall).unwrap().alive);
    }

    #[test]
    fn test_straight_line_never_hits_own_trail() {
        let mut world = World::new();
        let id = place(&mut world, "solo", 100.0, 450.0, 0.0);
        for _ in 0..400 {
            assert!(world.step(BASE_SPEED).is_empty());
        }
        assert!(world.get(&id).unwrap().alive);
    }

    #[test]
    fn test_tight_circle_survives_grace_then_closes_loop() {
        let mut world = World::new();
        let id = place(&mut world, "loop", 700.0, 450.0, 0.0);
        world.get_mut(&id).unwrap().turn = 1;

        // A full circle takes 2π / 0.045 ≈ 140 ticks; nothing earlier is close
        // enough to the head except the grace window itself.
        for _ in 0..100 {
            assert!(world.step(BASE_SPEED).is_empty());
        }
        assert!(world.get(&id).unwrap().trail.len() > COLLISION_SKIP_OWN);

        let mut died = None;
        for tick in 101..=200 {
            if !world.step(BASE_SPEED).is_empty() {
                died = Some(tick);
                break;
            }
        }
        let tick = died.expect("closing the loop must be fatal");
        assert!((130..=150).contains(&tick), "died on tick {tick}");
        assert!(!world.get(&id).unwrap().alive);
    }

    #[test]
    fn test_wall_death_happens_before_collision() {
        let mut world = World::new();
        let id = place(&mut world, "edge", 4.0, 450.0, std::f32::consts::PI);
        let deaths = world.step(BASE_SPEED);
        assert!(deaths.is_empty());
        let deaths = world.step(BASE_SPEED);
        assert_eq!(
            deaths,
            vec![Death {
                id,
                cause: DeathCause::Wall,
            }]
        );
    }

    #[test]
    fn test_dead_trail_is_harmless() {
        let mut world = World::new();
        let runner = place(&mut world, "runner", 100.0, 450.0, 0.0);
        let wall = place(&mut world, "wall", 200.0, 500.0, -FRAC_PI_2);
        for _ in 0..25 {
            world.step(BASE_SPEED);
        }
        world.get_mut(&wall).unwrap().alive = false;
        for _ in 0..40 {
            assert!(world.step(BASE_SPEED).is_empty());
        }
        assert!(world.get(&runner).unwrap().alive);
    }

    #[test]
    fn test_removal_forces_reindex() {
        let mut world = World::new();
        let runner = place(&mut world, "runner", 100.0, 450.0, 0.0);
        let wall = place(&mut world, "wall", 200.0, 500.0, -FRAC_PI_2);
        for _ in 0..25 {
            world.step(BASE_SPEED);
        }
        world.remove(&wall);
        assert!(world.index().is_dirty());
        for _ in 0..40 {
            assert!(world.step(BASE_SPEED).is_empty());
        }
        assert!(world.get(&runner).unwrap().alive);
    }

    #[test]
    fn test_trail_wraparound_keeps_index_consistent() {
        let mut world = World::new();
        let id = place(&mut world, "long", 100.0, 450.0, 0.0);
        // Slow enough to stay inside the arena past one full buffer
        for _ in 0..(TRAIL_CAPACITY + 50) {
            assert!(world.step(1.0).is_empty());
        }
        let c = world.get(&id).unwrap();
        assert!(c.alive);
        assert_eq!(c.trail.len(), TRAIL_CAPACITY);
        assert!(!world.index().is_dirty());
        assert_eq!(world.index().len(), TRAIL_CAPACITY);
    }
}
