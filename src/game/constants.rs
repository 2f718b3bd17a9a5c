//! Arena tuning constants shared by the simulation and the wire codec

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

/// Arena width in world units
pub const ARENA_WIDTH: f32 = 1400.0;
/// Arena height in world units
pub const ARENA_HEIGHT: f32 = 900.0;

/// Speed at the start of every round (units per tick)
pub const BASE_SPEED: f32 = 2.5;
/// Speed added every `SPEED_INTERVAL_SECS`
pub const SPEED_INCREMENT: f32 = 0.5;
pub const SPEED_INTERVAL_SECS: u64 = 10;
pub const MAX_SPEED: f32 = 8.0;

/// Heading change per tick per unit of turn intent (radians)
pub const TURN_RATE: f32 = 0.045;

/// Samples kept per competitor trail
pub const TRAIL_CAPACITY: usize = 600;

pub const COLLISION_RADIUS: f32 = 4.0;
pub const COLLISION_RADIUS_SQ: f32 = COLLISION_RADIUS * COLLISION_RADIUS;
/// Newest own-trail samples ignored by self-collision
pub const COLLISION_SKIP_OWN: usize = 20;
/// Newest samples of another competitor's trail ignored by collision
pub const COLLISION_SKIP_OTHER: usize = 2;

/// Spatial hash cell side. Must stay >= 2 * COLLISION_RADIUS so a 3x3 scan covers the radius.
pub const CELL_SIZE: f32 = 20.0;

pub const MAX_LIVES: u32 = 6;
pub const MAX_COMPETITORS: usize = 8;

/// Seconds shown before each round
pub const COUNTDOWN_SECS: u32 = 3;
pub const MIN_COMPETITORS_TO_START: usize = 2;

/// Fixed-point scales used on the wire
pub const POSITION_SCALE: f32 = 10.0;
pub const HEADING_SCALE: f32 = 1000.0;

/// A spawn point and the heading a competitor leaves it with
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnSlot {
    pub x: f32,
    pub y: f32,
    pub heading: f32,
}

/// Spawn slots around the arena, every heading pointing inward
pub const SPAWN_SLOTS: [SpawnSlot; MAX_COMPETITORS] = [
    SpawnSlot { x: 150.0, y: 150.0, heading: FRAC_PI_4 },
    SpawnSlot { x: 1250.0, y: 750.0, heading: PI + FRAC_PI_4 },
    SpawnSlot { x: 1250.0, y: 150.0, heading: PI - FRAC_PI_4 },
    SpawnSlot { x: 150.0, y: 750.0, heading: -FRAC_PI_4 },
    SpawnSlot { x: 700.0, y: 100.0, heading: FRAC_PI_2 },
    SpawnSlot { x: 700.0, y: 800.0, heading: -FRAC_PI_2 },
    SpawnSlot { x: 100.0, y: 450.0, heading: 0.0 },
    SpawnSlot { x: 1300.0, y: 450.0, heading: PI },
];

/// Competitor colors, handed out in order of availability
pub const PALETTE: [&str; MAX_COMPETITORS] = [
    "#00f0ff", "#ff2a6d", "#f9f871", "#05ffa1", "#b967ff", "#ff9f1c", "#ffffff", "#3a86ff",
];
