//! Snapshot encoding (authority) and reconstruction (mirror)

use std::collections::{BTreeMap, HashSet};

use uuid::Uuid;

use crate::util::time::unix_millis;
use crate::ws::protocol::{CompetitorSnapshot, ServerMsg, Snapshot};

use super::constants::{HEADING_SCALE, POSITION_SCALE};
use super::round::RoundState;
use super::world::{Competitor, World};

pub fn encode_position(value: f32) -> i32 {
    (value * POSITION_SCALE).round() as i32
}

pub fn decode_position(value: i32) -> f32 {
    value as f32 / POSITION_SCALE
}

pub fn encode_heading(value: f32) -> i32 {
    (value * HEADING_SCALE).round() as i32
}

pub fn decode_heading(value: i32) -> f32 {
    value as f32 / HEADING_SCALE
}

/// Snapshot decoding errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("trail delta for {0} has an odd number of coordinates")]
    OddSampleCount(Uuid),
}

/// Paces broadcasts and builds delta snapshots
pub struct SnapshotEncoder {
    /// Tick counter since last broadcast
    ticks_since_broadcast: u32,
    /// Broadcast interval in ticks
    broadcast_every: u32,
}

impl SnapshotEncoder {
    pub fn new(broadcast_every: u32) -> Self {
        Self {
            ticks_since_broadcast: 0,
            broadcast_every: broadcast_every.max(1),
        }
    }

    /// Check if it's time to broadcast
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_broadcast += 1;
        if self.ticks_since_broadcast >= self.broadcast_every {
            self.ticks_since_broadcast = 0;
            true
        } else {
            false
        }
    }

    /// Force a broadcast on next check (used for round transitions)
    pub fn force_next(&mut self) {
        self.ticks_since_broadcast = self.broadcast_every;
    }

    /// Build a delta snapshot carrying every sample not yet transmitted, then
    /// advance every trail's sent watermark. Identity fields are left empty;
    /// see [`IdentityTracker::stamp`].
    pub fn encode_delta(world: &mut World, round: &RoundState) -> Snapshot {
        let players = world
            .competitors()
            .map(|c| {
                let mut entry = scalar_fields(c);
                let samples = flatten(c.trail.unsent());
                if !samples.is_empty() {
                    entry.new_trail = Some(samples);
                }
                (c.id, entry)
            })
            .collect();

        for c in world.competitors_mut() {
            c.trail.mark_sent();
        }

        header(players, round)
    }

    /// Full snapshot for a new participant: identity for everyone and each
    /// trail's already-broadcast prefix. The next delta supplies the rest.
    pub fn encode_full(world: &World, round: &RoundState) -> Snapshot {
        let players = world
            .competitors()
            .map(|c| {
                let mut entry = scalar_fields(c);
                entry.trail_sent = 0;
                let samples = flatten(c.trail.iter_from(0).take(c.trail.sent()));
                if !samples.is_empty() {
                    entry.new_trail = Some(samples);
                }
                fill_identity(&mut entry, c);
                (c.id, entry)
            })
            .collect();

        header(players, round)
    }
}

fn header(players: BTreeMap<Uuid, CompetitorSnapshot>, round: &RoundState) -> Snapshot {
    Snapshot {
        players,
        round_active: round.round_active,
        countdown: round.countdown,
        round_start: round.round_start,
        match_winner: round.match_winner,
        server_time: unix_millis(),
    }
}

fn scalar_fields(c: &Competitor) -> CompetitorSnapshot {
    CompetitorSnapshot {
        x: encode_position(c.x),
        y: encode_position(c.y),
        heading: encode_heading(c.heading),
        turn: c.turn,
        trail_len: c.trail.len() as u32,
        trail_start: c.trail.start() as u32,
        trail_sent: c.trail.sent() as u32,
        alive: c.alive,
        score: c.score,
        lives: c.lives,
        ..Default::default()
    }
}

fn fill_identity(entry: &mut CompetitorSnapshot, c: &Competitor) {
    entry.id = Some(c.id);
    entry.name = Some(c.display_name.clone());
    entry.color = Some(c.color.clone());
    entry.spawn_slot = Some(c.spawn_slot as u8);
}

fn flatten(samples: impl Iterator<Item = (f32, f32)>) -> Vec<i32> {
    samples
        .flat_map(|(x, y)| [encode_position(x), encode_position(y)])
        .collect()
}

/// Tracks which competitors' identity fields one recipient has received
#[derive(Debug, Clone, Default)]
pub struct IdentityTracker {
    known: HashSet<Uuid>,
}

impl IdentityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything so the next snapshot carries all identities again
    pub fn reset(&mut self) {
        self.known.clear();
    }

    pub fn forget(&mut self, id: &Uuid) {
        self.known.remove(id);
    }

    pub fn knows(&self, id: &Uuid) -> bool {
        self.known.contains(id)
    }

    /// Add identity fields for competitors this recipient has not seen yet.
    /// Returns the stamped ids; if the snapshot never reaches the recipient,
    /// pass them to [`IdentityTracker::retract`].
    pub fn stamp(&mut self, snapshot: &mut Snapshot, world: &World) -> Vec<Uuid> {
        let mut stamped = Vec::new();
        for (id, entry) in snapshot.players.iter_mut() {
            if self.known.contains(id) {
                continue;
            }
            if let Some(c) = world.get(id) {
                fill_identity(entry, c);
                self.known.insert(*id);
                stamped.push(*id);
            }
        }
        stamped
    }

    /// Undo a stamp whose snapshot was dropped
    pub fn retract(&mut self, stamped: &[Uuid]) {
        for id in stamped {
            self.known.remove(id);
        }
    }

    /// Record that a snapshot already carried identity for all its competitors
    pub fn mark_known(&mut self, snapshot: &Snapshot) {
        self.known.extend(snapshot.players.keys().copied());
    }
}

/// Remote reconstruction of the authoritative state. Never runs physics.
#[derive(Debug, Clone, Default)]
pub struct MirrorState {
    /// Our own competitor id, once assigned
    pub local_id: Option<Uuid>,
    pub players: BTreeMap<Uuid, Competitor>,
    pub round_active: bool,
    pub countdown: u32,
    pub round_start: Option<u64>,
    pub match_winner: Option<Uuid>,
    pub server_time: u64,
}

impl MirrorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a server message in arrival order; unrelated messages are ignored
    pub fn apply_message(&mut self, msg: &ServerMsg) -> Result<(), CodecError> {
        match msg {
            ServerMsg::Init { id, state } => {
                self.local_id = Some(*id);
                self.players.clear();
                self.apply(state)
            }
            ServerMsg::State(snapshot) => self.apply(snapshot),
            ServerMsg::PlayerLeft { id } => {
                self.players.remove(id);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Apply one snapshot. The snapshot's roster is authoritative: competitors
    /// missing from it are dropped locally.
    pub fn apply(&mut self, snapshot: &Snapshot) -> Result<(), CodecError> {
        for (id, entry) in &snapshot.players {
            if entry.new_trail.as_ref().is_some_and(|s| s.len() % 2 != 0) {
                return Err(CodecError::OddSampleCount(*id));
            }
        }

        self.players.retain(|id, _| snapshot.players.contains_key(id));
        for (id, entry) in &snapshot.players {
            let competitor = self.players.entry(*id).or_insert_with(|| {
                Competitor::new(*id, String::new(), String::new(), 0, 0)
            });
            apply_competitor(competitor, entry);
        }

        self.round_active = snapshot.round_active;
        self.countdown = snapshot.countdown;
        self.round_start = snapshot.round_start;
        self.match_winner = snapshot.match_winner;
        self.server_time = snapshot.server_time;
        Ok(())
    }
}

fn apply_competitor(c: &mut Competitor, entry: &CompetitorSnapshot) {
    if let Some(name) = &entry.name {
        c.display_name = name.clone();
    }
    if let Some(color) = &entry.color {
        c.color = color.clone();
    }
    if let Some(slot) = entry.spawn_slot {
        c.spawn_slot = usize::from(slot);
    }

    c.x = decode_position(entry.x);
    c.y = decode_position(entry.y);
    c.heading = decode_heading(entry.heading);
    c.turn = entry.turn.clamp(-1, 1);
    c.alive = entry.alive;
    c.score = entry.score;
    c.lives = entry.lives;

    let reported = entry.trail_len as usize;
    let samples = entry.new_trail.as_deref().unwrap_or_default();
    let incoming = samples.len() / 2;

    // A length the delta cannot explain means the authority reset the trail
    // since our last update.
    let expected = (c.trail.len() + incoming).min(c.trail.capacity());
    if reported == 0 || expected != reported {
        c.trail.reset();
    }
    for pair in samples.chunks_exact(2) {
        c.trail.push(decode_position(pair[0]), decode_position(pair[1]));
    }
    c.trail.mark_sent();
}
