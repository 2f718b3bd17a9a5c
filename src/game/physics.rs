//! Point kinematics: constant speed, constant turn rate

use std::time::Duration;

use super::constants::{
    ARENA_HEIGHT, ARENA_WIDTH, BASE_SPEED, MAX_SPEED, SPEED_INCREMENT, SPEED_INTERVAL_SECS,
    TURN_RATE,
};
use super::spatial::SpatialIndex;
use super::trail::PushOutcome;
use super::world::Competitor;

/// What happened to a competitor during one advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Moved and left a new trail sample
    Moved,
    /// Moved outside the arena and is now dead
    HitWall,
    /// Not alive, nothing done
    Skipped,
}

/// Moves competitors one fixed tick at a time
pub struct MotionEngine;

impl MotionEngine {
    /// Apply one tick of steering to a heading, normalized to 0..2π
    pub fn steer(heading: f32, turn: i8) -> f32 {
        (heading + f32::from(turn.clamp(-1, 1)) * TURN_RATE).rem_euclid(std::f32::consts::TAU)
    }

    /// Advance a living competitor by `speed` units, record the new sample
    /// in its trail and keep the spatial index in step with the trail.
    pub fn advance(competitor: &mut Competitor, speed: f32, index: &mut SpatialIndex) -> Advance {
        if !competitor.alive {
            return Advance::Skipped;
        }

        competitor.heading = Self::steer(competitor.heading, competitor.turn);
        competitor.x += competitor.heading.cos() * speed;
        competitor.y += competitor.heading.sin() * speed;

        if !Self::in_bounds(competitor.x, competitor.y) {
            competitor.alive = false;
            return Advance::HitWall;
        }

        match competitor.trail.push(competitor.x, competitor.y) {
            PushOutcome::Appended { slot, logical } => {
                if !index.is_dirty() {
                    index.insert(competitor.id, slot, logical, competitor.x, competitor.y);
                }
            }
            // Every logical position shifted and a slot changed owner
            PushOutcome::Overwrote { .. } => index.mark_dirty(),
        }

        Advance::Moved
    }

    /// Whether a point lies inside the closed arena rectangle
    pub fn in_bounds(x: f32, y: f32) -> bool {
        (0.0..=ARENA_WIDTH).contains(&x) && (0.0..=ARENA_HEIGHT).contains(&y)
    }

    /// Speed for a round that has been running for `elapsed`.
    ///
    /// Steps up by `SPEED_INCREMENT` every `SPEED_INTERVAL_SECS` and is capped at
    /// `MAX_SPEED`. A round that has not started runs at `BASE_SPEED`.
    pub fn speed_at_elapsed(elapsed: Option<Duration>) -> f32 {
        let Some(elapsed) = elapsed else {
            return BASE_SPEED;
        };
        let steps = elapsed.as_secs() / SPEED_INTERVAL_SECS;
        (BASE_SPEED + steps as f32 * SPEED_INCREMENT).min(MAX_SPEED)
    }
}
