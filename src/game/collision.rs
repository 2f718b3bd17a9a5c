//! Trail collision detection over the spatial index

use std::collections::BTreeMap;

use uuid::Uuid;

use super::constants::{
    COLLISION_RADIUS, COLLISION_RADIUS_SQ, COLLISION_SKIP_OTHER, COLLISION_SKIP_OWN,
};
use super::spatial::{SampleRef, SpatialIndex};
use super::world::Competitor;

/// A detected trail hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailHit {
    pub victim: Uuid,
    /// Owner of the trail that was struck
    pub owner: Uuid,
}

pub struct CollisionDetector;

impl CollisionDetector {
    /// Find every living competitor whose head touches a lethal trail sample.
    ///
    /// The index must not be dirty. Hits are collected against the state at the
    /// start of the scan, so the result does not depend on iteration order.
    pub fn detect(competitors: &BTreeMap<Uuid, Competitor>, index: &SpatialIndex) -> Vec<TrailHit> {
        debug_assert!(!index.is_dirty(), "spatial index queried while dirty");

        competitors
            .values()
            .filter(|c| c.alive)
            .filter_map(|c| {
                Self::first_hit(c, competitors, index).map(|sample| TrailHit {
                    victim: c.id,
                    owner: sample.owner,
                })
            })
            .collect()
    }

    /// First lethal sample near `subject`, if any
    pub fn first_hit(
        subject: &Competitor,
        competitors: &BTreeMap<Uuid, Competitor>,
        index: &SpatialIndex,
    ) -> Option<SampleRef> {
        let (hx, hy) = (subject.x, subject.y);

        index
            .neighborhood(hx, hy)
            .find(|sample| {
                let Some(owner) = competitors.get(&sample.owner) else {
                    return false;
                };
                let len = owner.trail.len();
                if sample.logical >= len {
                    return false;
                }

                let grace = if owner.id == subject.id {
                    COLLISION_SKIP_OWN
                } else if !owner.alive {
                    return false;
                } else {
                    COLLISION_SKIP_OTHER
                };
                if sample.logical + grace >= len {
                    return false;
                }

                let (sx, sy) = owner.trail.at_slot(sample.slot);
                let dx = sx - hx;
                let dy = sy - hy;
                if dx.abs() > COLLISION_RADIUS || dy.abs() > COLLISION_RADIUS {
                    return false;
                }
                dx * dx + dy * dy < COLLISION_RADIUS_SQ
            })
            .copied()
    }
}
