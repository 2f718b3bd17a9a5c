//! Room task: the authoritative tick loop around a RoundController

use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, RosterEntry, ServerMsg};

use super::round::{LifecycleError, MatchPhase, RoundController, Transition};
use super::snapshot::{IdentityTracker, SnapshotEncoder};
use super::{PlayerInput, RoomError, RoomEvent};

/// Longest display name kept
const MAX_NAME_CHARS: usize = 16;

/// Clock settings for a room
#[derive(Debug, Clone)]
pub struct MatchTiming {
    /// Physics tick period
    pub tick: Duration,
    /// Countdown decrement period
    pub countdown_step: Duration,
    /// Pause between a round end and the next countdown
    pub restart_delay: Duration,
    /// Broadcast state every N physics ticks
    pub broadcast_every: u32,
}

impl MatchTiming {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick: Duration::from_micros(1_000_000 / u64::from(config.tick_rate_hz.max(1))),
            countdown_step: Duration::from_secs(1),
            restart_delay: Duration::from_secs(config.restart_delay_secs),
            broadcast_every: config.broadcast_every_ticks,
        }
    }
}

impl Default for MatchTiming {
    fn default() -> Self {
        Self {
            tick: Duration::from_micros(16_667),
            countdown_step: Duration::from_secs(1),
            restart_delay: Duration::from_secs(3),
            broadcast_every: 4,
        }
    }
}

/// Handle to a running room
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub room: String,
    pub event_tx: mpsc::Sender<RoomEvent>,
    pub player_count: Arc<AtomicUsize>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub async fn send(&self, event: RoomEvent) -> Result<(), RoomError> {
        self.event_tx.send(event).await.map_err(|_| RoomError::Closed)
    }
}

/// Registry of all active rooms, keyed by room code
#[derive(Clone)]
pub struct MatchRegistry {
    matches: Arc<DashMap<String, MatchHandle>>,
    timing: MatchTiming,
}

impl MatchRegistry {
    pub fn new(timing: MatchTiming) -> Self {
        Self {
            matches: Arc::new(DashMap::new()),
            timing,
        }
    }

    pub fn get(&self, room: &str) -> Option<MatchHandle> {
        self.matches.get(room).map(|m| m.value().clone())
    }

    /// Return the running room for `room`, spawning its task if needed
    pub fn get_or_create(&self, room: &str) -> MatchHandle {
        let entry = self.matches.entry(room.to_string()).or_insert_with(|| {
            let (game_match, handle) = GameMatch::new(room.to_string(), self.timing.clone());
            let matches = self.matches.clone();
            let id = handle.id;
            let room = handle.room.clone();

            tokio::spawn(async move {
                game_match.run().await;
                matches.remove_if(&room, |_, h| h.id == id);
                info!(match_id = %id, room = %room, "Room removed from registry");
            });

            info!(match_id = %handle.id, room = %handle.room, "Created new room");
            handle
        });
        entry.value().clone()
    }

    /// Drop `room` only while it still maps to the room instance `id`
    pub fn remove_stale(&self, room: &str, id: Uuid) -> bool {
        self.matches.remove_if(room, |_, h| h.id == id).is_some()
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches.iter().map(|m| m.value().player_count()).sum()
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new(MatchTiming::default())
    }
}

/// One open connection in the room
struct Recipient {
    outbound: mpsc::Sender<ServerMsg>,
    identity: IdentityTracker,
    /// Sent `join` and received `init`
    joined: bool,
}

/// The authoritative room task
pub struct GameMatch {
    id: Uuid,
    room: String,
    controller: RoundController,
    recipients: HashMap<Uuid, Recipient>,
    event_rx: mpsc::Receiver<RoomEvent>,
    encoder: SnapshotEncoder,
    timing: MatchTiming,
    physics: Interval,
    countdown: Interval,
    restart_at: Option<Instant>,
    round_clock: Option<Instant>,
    player_count: Arc<AtomicUsize>,
    ever_connected: bool,
}

impl GameMatch {
    /// Create a new room. Must be called inside a tokio runtime.
    pub fn new(room: String, timing: MatchTiming) -> (Self, MatchHandle) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));
        let id = Uuid::new_v4();

        let handle = MatchHandle {
            id,
            room: room.clone(),
            event_tx,
            player_count: player_count.clone(),
        };

        let mut physics = interval(timing.tick);
        physics.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut countdown = interval(timing.countdown_step);
        countdown.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let game_match = Self {
            id,
            room,
            controller: RoundController::new(),
            recipients: HashMap::new(),
            event_rx,
            encoder: SnapshotEncoder::new(timing.broadcast_every),
            timing,
            physics,
            countdown,
            restart_at: None,
            round_clock: None,
            player_count,
            ever_connected: false,
        };

        (game_match, handle)
    }

    /// Run the room until its last connection closes
    pub async fn run(mut self) {
        info!(match_id = %self.id, room = %self.room, "Room opened");

        loop {
            let restart_deadline = self.restart_at.unwrap_or_else(Instant::now);

            tokio::select! {
                biased;

                event = self.event_rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = self.physics.tick(), if self.controller.physics_running() => {
                    self.run_tick();
                }
                _ = self.countdown.tick(), if self.controller.phase() == MatchPhase::Countdown => {
                    let transition = self.controller.countdown_step(unix_millis());
                    self.apply_transition(transition);
                }
                _ = sleep_until(restart_deadline), if self.restart_at.is_some() => {
                    self.restart_at = None;
                    let transition = self.controller.auto_restart();
                    self.apply_transition(transition);
                }
            }

            if self.ever_connected && self.recipients.is_empty() {
                info!(match_id = %self.id, "All players left, closing room");
                break;
            }
        }
    }

    fn handle_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Connected {
                player_id,
                outbound,
            } => {
                self.ever_connected = true;
                self.recipients.insert(
                    player_id,
                    Recipient {
                        outbound,
                        identity: IdentityTracker::new(),
                        joined: false,
                    },
                );
                debug!(match_id = %self.id, player_id = %player_id, "Connection attached");
            }
            RoomEvent::Input(input) => self.handle_input(input),
            RoomEvent::Disconnected { player_id } => self.handle_leave(player_id),
        }
    }

    fn handle_input(&mut self, input: PlayerInput) {
        let player_id = input.player_id;
        match input.msg {
            ClientMsg::Join { name } => self.handle_join(player_id, name),
            ClientMsg::Input { turn } => {
                self.controller.set_turn(&player_id, turn);
            }
            ClientMsg::Start => {
                let result = self.controller.start_match();
                self.apply_lifecycle(player_id, result);
            }
            ClientMsg::Restart => {
                let result = self.controller.restart();
                self.apply_lifecycle(player_id, result);
            }
            ClientMsg::Ping { t } => {
                self.send_to(&player_id, ServerMsg::Pong { t });
            }
        }
    }

    fn apply_lifecycle(&mut self, player_id: Uuid, result: Result<Transition, LifecycleError>) {
        match result {
            Ok(transition) => {
                info!(match_id = %self.id, player_id = %player_id, "Lifecycle request accepted");
                self.apply_transition(transition);
            }
            Err(e) => {
                warn!(
                    match_id = %self.id,
                    player_id = %player_id,
                    reason = %e,
                    "Lifecycle request rejected"
                );
                self.send_to(
                    &player_id,
                    ServerMsg::Notice {
                        message: e.to_string(),
                    },
                );
            }
        }
    }

    /// Handle player join request
    fn handle_join(&mut self, player_id: Uuid, name: String) {
        if !self.recipients.contains_key(&player_id) {
            return;
        }

        let name = sanitize_name(&name, &player_id);
        let joined = self.controller.join(player_id, name).map(|_| ());
        if let Err(e) = joined {
            warn!(match_id = %self.id, player_id = %player_id, error = %e, "Join rejected");
            self.send_to(
                &player_id,
                ServerMsg::Notice {
                    message: e.to_string(),
                },
            );
            return;
        }
        self.player_count.store(self.controller.world().len(), Ordering::Relaxed);

        let state =
            SnapshotEncoder::encode_full(self.controller.world(), self.controller.round());
        if let Some(recipient) = self.recipients.get_mut(&player_id) {
            recipient.joined = true;
            recipient.identity.reset();
            recipient.identity.mark_known(&state);
        }
        if !self.send_to(&player_id, ServerMsg::Init { id: player_id, state }) {
            // Identity then rides on the next delta instead
            if let Some(recipient) = self.recipients.get_mut(&player_id) {
                recipient.identity.reset();
            }
        }

        info!(
            match_id = %self.id,
            player_id = %player_id,
            player_count = self.controller.world().len(),
            "Player joined room"
        );

        self.broadcast(self.player_list());
        self.encoder.force_next();
    }

    /// Handle player leave
    fn handle_leave(&mut self, player_id: Uuid) {
        self.recipients.remove(&player_id);
        let Some(_competitor) = self.controller.leave(&player_id) else {
            return;
        };
        self.player_count.store(self.controller.world().len(), Ordering::Relaxed);
        for recipient in self.recipients.values_mut() {
            recipient.identity.forget(&player_id);
        }

        info!(match_id = %self.id, player_id = %player_id, "Player left room");

        self.broadcast(ServerMsg::PlayerLeft { id: player_id });
        self.broadcast(self.player_list());

        let transition = self.controller.reconcile_after_leave();
        self.apply_transition(transition);
    }

    /// Run a single simulation tick
    fn run_tick(&mut self) {
        let elapsed = self.round_clock.map(|start| start.elapsed());
        let transition = self.controller.tick(elapsed);
        match transition {
            Transition::Ticked { .. } => {
                if self.encoder.should_send() {
                    self.broadcast_state();
                }
            }
            other => self.apply_transition(other),
        }
    }

    /// Reset timers and notify clients after a lifecycle step
    fn apply_transition(&mut self, transition: Transition) {
        match transition {
            Transition::Idle | Transition::Ticked { .. } => {}
            Transition::CountdownStarted => {
                info!(match_id = %self.id, "Countdown started");
                self.restart_at = None;
                self.round_clock = None;
                self.countdown.reset();
                self.broadcast_state();
            }
            Transition::Countdown(_) => self.broadcast_state(),
            Transition::RoundStarted => {
                self.round_clock = Some(Instant::now());
                self.physics.reset();
                self.broadcast(ServerMsg::GameStart);
                self.broadcast_state();
            }
            Transition::RoundEnded { survivor } => {
                info!(match_id = %self.id, survivor = ?survivor, "Round over, restarting soon");
                self.round_clock = None;
                self.restart_at = Some(Instant::now() + self.timing.restart_delay);
                self.broadcast_state();
                self.broadcast(self.player_list());
            }
            Transition::MatchEnded { winner } => {
                info!(match_id = %self.id, winner = ?winner, "Match over");
                self.round_clock = None;
                self.restart_at = None;
                self.broadcast_state();
                self.broadcast(self.player_list());
            }
        }
    }

    /// Encode one delta and send it to every joined recipient, each with the
    /// identity fields it has not seen yet
    fn broadcast_state(&mut self) {
        let round = self.controller.round().clone();
        let base = SnapshotEncoder::encode_delta(self.controller.world_mut(), &round);
        let world = self.controller.world();

        for (player_id, recipient) in self.recipients.iter_mut() {
            if !recipient.joined {
                continue;
            }
            let mut snapshot = base.clone();
            let stamped = recipient.identity.stamp(&mut snapshot, world);
            let msg = ServerMsg::State(snapshot);
            if !try_deliver(&self.id, player_id, &recipient.outbound, msg) {
                recipient.identity.retract(&stamped);
            }
        }
    }

    fn broadcast(&self, msg: ServerMsg) {
        for (player_id, recipient) in &self.recipients {
            if recipient.joined {
                try_deliver(&self.id, player_id, &recipient.outbound, msg.clone());
            }
        }
    }

    fn send_to(&self, player_id: &Uuid, msg: ServerMsg) -> bool {
        match self.recipients.get(player_id) {
            Some(recipient) => try_deliver(&self.id, player_id, &recipient.outbound, msg),
            None => false,
        }
    }

    fn player_list(&self) -> ServerMsg {
        let players: BTreeMap<Uuid, RosterEntry> = self
            .controller
            .world()
            .competitors()
            .map(|c| {
                (
                    c.id,
                    RosterEntry {
                        name: c.display_name.clone(),
                        score: c.score,
                        lives: c.lives,
                        color: c.color.clone(),
                        alive: c.alive,
                    },
                )
            })
            .collect();
        ServerMsg::PlayerList { players }
    }
}

/// Non-blocking send; a full or closed channel just misses this message.
/// Returns whether the message was queued.
fn try_deliver(
    match_id: &Uuid,
    player_id: &Uuid,
    outbound: &mpsc::Sender<ServerMsg>,
    msg: ServerMsg,
) -> bool {
    match outbound.try_send(msg) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            debug!(match_id = %match_id, player_id = %player_id, "Outbound channel full, skipping");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(
                match_id = %match_id,
                player_id = %player_id,
                "Outbound channel closed, skipping"
            );
            false
        }
    }
}

fn sanitize_name(name: &str, player_id: &Uuid) -> String {
    let trimmed: String = name.trim().chars().take(MAX_NAME_CHARS).collect();
    if trimmed.is_empty() {
        format!("Player_{}", &player_id.to_string()[..8])
    } else {
        trimmed
    }
}
