//! Round and match lifecycle, lives and score bookkeeping

use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use super::constants::{COUNTDOWN_SECS, MIN_COMPETITORS_TO_START};
use super::physics::MotionEngine;
use super::world::{Competitor, Death, World};
use super::RoomError;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Waiting for a start request
    Lobby,
    /// Counting down before a round
    Countdown,
    /// Physics running
    RoundActive,
    /// Round over, auto-restart pending
    RoundEnd,
    /// Match over until a restart request
    MatchEnd,
}

/// Round fields shared with remote mirrors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundState {
    pub round_active: bool,
    /// Seconds remaining, 0 when not counting down
    pub countdown: u32,
    /// Unix millis
    pub round_start: Option<u64>,
    pub match_winner: Option<Uuid>,
}

/// Requests that do not fit the current phase
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Need at least 2 players to start")]
    NotEnoughPlayers,

    #[error("A match is already in progress")]
    AlreadyRunning,

    #[error("There is no finished match to restart")]
    NothingToRestart,
}

/// What a lifecycle step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Nothing to do in the current phase
    Idle,
    /// A physics tick ran and the round continues
    Ticked { deaths: Vec<Death> },
    /// A fresh countdown began
    CountdownStarted,
    /// Countdown decremented to the given value
    Countdown(u32),
    RoundStarted,
    /// Round over, more than one competitor still has lives
    RoundEnded { survivor: Option<Uuid> },
    /// At most one competitor has lives left
    MatchEnded { winner: Option<Uuid> },
}

/// Drives lobby → countdown → round → round end → match end
#[derive(Debug, Clone)]
pub struct RoundController {
    world: World,
    phase: MatchPhase,
    round: RoundState,
    physics_running: bool,
    rounds_played: u32,
}

impl RoundController {
    pub fn new() -> Self {
        Self {
            world: World::new(),
            phase: MatchPhase::Lobby,
            round: RoundState::default(),
            physics_running: false,
            rounds_played: 0,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn round(&self) -> &RoundState {
        &self.round
    }

    pub fn physics_running(&self) -> bool {
        self.physics_running
    }

    pub fn rounds_played(&self) -> u32 {
        self.rounds_played
    }

    /// Add a competitor. Joining outside the lobby leaves it dead until the next round.
    pub fn join(&mut self, id: Uuid, name: String) -> Result<&Competitor, RoomError> {
        self.world.add(id, name)
    }

    pub fn leave(&mut self, id: &Uuid) -> Option<Competitor> {
        self.world.remove(id)
    }

    /// Steering update; values are clamped to -1..=1 and unknown ids ignored
    pub fn set_turn(&mut self, id: &Uuid, turn: i32) -> bool {
        self.world.set_turn(id, turn.clamp(-1, 1) as i8)
    }

    /// Lobby → Countdown with lives and scores reset
    pub fn start_match(&mut self) -> Result<Transition, LifecycleError> {
        if self.phase != MatchPhase::Lobby {
            return Err(LifecycleError::AlreadyRunning);
        }
        if self.world.len() < MIN_COMPETITORS_TO_START {
            return Err(LifecycleError::NotEnoughPlayers);
        }

        self.world.reset_match();
        self.round.match_winner = None;
        self.rounds_played = 0;
        Ok(self.begin_countdown())
    }

    /// MatchEnd → Lobby, then straight into a new match when possible
    pub fn restart(&mut self) -> Result<Transition, LifecycleError> {
        if self.phase != MatchPhase::MatchEnd {
            return Err(LifecycleError::NothingToRestart);
        }
        self.phase = MatchPhase::Lobby;
        self.round = RoundState::default();
        self.start_match()
    }

    fn begin_countdown(&mut self) -> Transition {
        self.phase = MatchPhase::Countdown;
        self.round.round_active = false;
        self.round.round_start = None;
        self.round.countdown = COUNTDOWN_SECS;
        Transition::CountdownStarted
    }

    /// One countdown second elapsed
    pub fn countdown_step(&mut self, now_millis: u64) -> Transition {
        if self.phase != MatchPhase::Countdown {
            return Transition::Idle;
        }
        self.round.countdown = self.round.countdown.saturating_sub(1);
        if self.round.countdown > 0 {
            return Transition::Countdown(self.round.countdown);
        }

        self.world.spawn_round();
        self.round.round_active = true;
        self.round.round_start = Some(now_millis);
        self.phase = MatchPhase::RoundActive;
        self.physics_running = true;
        self.rounds_played += 1;
        info!(
            round = self.rounds_played,
            competitors = self.world.alive_count(),
            "Round started"
        );
        Transition::RoundStarted
    }

    /// One physics tick. `elapsed` is the time since the round started.
    pub fn tick(&mut self, elapsed: Option<Duration>) -> Transition {
        if self.phase != MatchPhase::RoundActive || !self.physics_running {
            return Transition::Idle;
        }

        let speed = MotionEngine::speed_at_elapsed(elapsed);
        let deaths = self.world.step(speed);
        for death in &deaths {
            if let Some(c) = self.world.get_mut(&death.id) {
                c.lives = c.lives.saturating_sub(1);
            }
        }

        if self.world.alive_count() <= 1 {
            self.stop_physics();
            return self.end_round();
        }
        Transition::Ticked { deaths }
    }

    /// Idempotent
    pub fn stop_physics(&mut self) {
        self.physics_running = false;
    }

    fn end_round(&mut self) -> Transition {
        self.phase = MatchPhase::RoundEnd;
        self.round.round_active = false;

        let survivor = self.world.competitors().find(|c| c.alive).map(|c| c.id);
        if let Some(c) = survivor.and_then(|id| self.world.get_mut(&id)) {
            c.score += 1;
        }

        if self.world.contenders().count() <= 1 {
            return self.finish_match();
        }

        info!(round = self.rounds_played, survivor = ?survivor, "Round ended");
        Transition::RoundEnded { survivor }
    }

    fn finish_match(&mut self) -> Transition {
        let winner = {
            let mut contenders = self.world.contenders();
            match (contenders.next(), contenders.next()) {
                (Some(c), None) => Some(c.id),
                _ => None,
            }
        };
        self.phase = MatchPhase::MatchEnd;
        self.round.round_active = false;
        self.round.countdown = 0;
        self.round.match_winner = winner;
        self.stop_physics();
        info!(winner = ?winner, rounds = self.rounds_played, "Match ended");
        Transition::MatchEnded { winner }
    }

    /// Restart delay elapsed after a round end
    pub fn auto_restart(&mut self) -> Transition {
        if self.phase != MatchPhase::RoundEnd {
            return Transition::Idle;
        }
        // Departures during the delay can leave too few contenders
        if self.world.contenders().count() <= 1 {
            return self.finish_match();
        }
        self.begin_countdown()
    }

    /// Called after a competitor leaves mid-match
    pub fn reconcile_after_leave(&mut self) -> Transition {
        match self.phase {
            MatchPhase::RoundActive if self.world.alive_count() <= 1 => {
                self.stop_physics();
                self.end_round()
            }
            MatchPhase::Countdown if self.world.contenders().count() <= 1 => self.finish_match(),
            _ => Transition::Idle,
        }
    }
}

impl Default for RoundController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::MAX_LIVES;
    use std::f32::consts::PI;

    fn controller_with(n: usize) -> (RoundController, Vec<Uuid>) {
        let mut ctrl = RoundController::new();
        let ids = (0..n)
            .map(|i| {
                let id = Uuid::new_v4();
                ctrl.join(id, format!("p{i}")).unwrap();
                id
            })
            .collect();
        (ctrl, ids)
    }

    fn run_countdown(ctrl: &mut RoundController) {
        assert_eq!(ctrl.countdown_step(0), Transition::Countdown(2));
        assert_eq!(ctrl.countdown_step(0), Transition::Countdown(1));
        assert_eq!(ctrl.countdown_step(1_000), Transition::RoundStarted);
    }

    /// Point a competitor at the left wall so the next tick kills it
    fn doom(ctrl: &mut RoundController, id: &Uuid) {
        let c = ctrl.world_mut().get_mut(id).unwrap();
        c.x = 1.0;
        c.heading = PI;
    }

    #[test]
    fn test_start_requires_two_players() {
        let (mut ctrl, _) = controller_with(1);
        assert_eq!(ctrl.start_match(), Err(LifecycleError::NotEnoughPlayers));
        assert_eq!(ctrl.phase(), MatchPhase::Lobby);
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let (mut ctrl, _) = controller_with(2);
        assert_eq!(ctrl.start_match(), Ok(Transition::CountdownStarted));
        assert_eq!(ctrl.round().countdown, COUNTDOWN_SECS);
        assert_eq!(ctrl.start_match(), Err(LifecycleError::AlreadyRunning));
        assert_eq!(ctrl.restart(), Err(LifecycleError::NothingToRestart));
    }

    #[test]
    fn test_countdown_spawns_round() {
        let (mut ctrl, ids) = controller_with(3);
        ctrl.start_match().unwrap();
        run_countdown(&mut ctrl);

        assert_eq!(ctrl.phase(), MatchPhase::RoundActive);
        assert!(ctrl.round().round_active);
        assert_eq!(ctrl.round().round_start, Some(1_000));
        assert!(ctrl.physics_running());
        for id in &ids {
            assert!(ctrl.world().get(id).unwrap().alive);
        }
        assert!(matches!(ctrl.tick(None), Transition::Ticked { .. }));
    }

    #[test]
    fn test_mid_round_joiner_waits_for_next_round() {
        let (mut ctrl, _) = controller_with(2);
        ctrl.start_match().unwrap();
        run_countdown(&mut ctrl);

        let late = Uuid::new_v4();
        ctrl.join(late, "late".to_string()).unwrap();
        ctrl.tick(None);
        let c = ctrl.world().get(&late).unwrap();
        assert!(!c.alive);
        assert!(c.trail.is_empty());
    }

    #[test]
    fn test_three_player_match_lifecycle() {
        let (mut ctrl, ids) = controller_with(3);
        let (winner, a, b) = (ids[0], ids[1], ids[2]);
        ctrl.start_match().unwrap();

        for round in 1..=MAX_LIVES {
            run_countdown(&mut ctrl);
            doom(&mut ctrl, &a);
            doom(&mut ctrl, &b);
            let transition = ctrl.tick(None);
            assert!(!ctrl.physics_running());
            assert!(!ctrl.round().round_active);
            assert_eq!(ctrl.world().get(&a).unwrap().lives, MAX_LIVES - round);
            assert_eq!(ctrl.world().get(&winner).unwrap().lives, MAX_LIVES);
            assert_eq!(ctrl.world().get(&winner).unwrap().score, round);

            if round < MAX_LIVES {
                assert_eq!(
                    transition,
                    Transition::RoundEnded {
                        survivor: Some(winner)
                    }
                );
                assert_eq!(ctrl.round().match_winner, None);
                assert_eq!(ctrl.phase(), MatchPhase::RoundEnd);
                assert_eq!(ctrl.auto_restart(), Transition::CountdownStarted);
                assert_eq!(ctrl.round().countdown, COUNTDOWN_SECS);
            } else {
                assert_eq!(
                    transition,
                    Transition::MatchEnded {
                        winner: Some(winner)
                    }
                );
            }
        }

        assert_eq!(ctrl.phase(), MatchPhase::MatchEnd);
        assert_eq!(ctrl.round().match_winner, Some(winner));
        // Physics stays halted
        assert_eq!(ctrl.tick(None), Transition::Idle);
        assert_eq!(ctrl.auto_restart(), Transition::Idle);
        assert_eq!(ctrl.countdown_step(0), Transition::Idle);
        assert!(!ctrl.physics_running());
    }

    #[test]
    fn test_simultaneous_elimination_has_no_winner() {
        let (mut ctrl, ids) = controller_with(2);
        ctrl.start_match().unwrap();
        for id in &ids {
            ctrl.world_mut().get_mut(id).unwrap().lives = 1;
        }
        run_countdown(&mut ctrl);
        doom(&mut ctrl, &ids[0]);
        doom(&mut ctrl, &ids[1]);
        assert_eq!(ctrl.tick(None), Transition::MatchEnded { winner: None });
        assert_eq!(ctrl.round().match_winner, None);
    }

    #[test]
    fn test_restart_after_match_end() {
        let (mut ctrl, ids) = controller_with(2);
        ctrl.start_match().unwrap();
        ctrl.world_mut().get_mut(&ids[1]).unwrap().lives = 1;
        run_countdown(&mut ctrl);
        doom(&mut ctrl, &ids[1]);
        assert_eq!(
            ctrl.tick(None),
            Transition::MatchEnded {
                winner: Some(ids[0])
            }
        );

        assert_eq!(ctrl.restart(), Ok(Transition::CountdownStarted));
        assert_eq!(ctrl.round().match_winner, None);
        for id in &ids {
            let c = ctrl.world().get(id).unwrap();
            assert_eq!(c.lives, MAX_LIVES);
            assert_eq!(c.score, 0);
        }
    }

    #[test]
    fn test_eliminated_competitor_sits_out() {
        let (mut ctrl, ids) = controller_with(3);
        ctrl.start_match().unwrap();
        ctrl.world_mut().get_mut(&ids[2]).unwrap().lives = 1;
        run_countdown(&mut ctrl);
        doom(&mut ctrl, &ids[2]);
        assert!(matches!(ctrl.tick(None), Transition::Ticked { .. }));
        assert_eq!(ctrl.world().get(&ids[2]).unwrap().lives, 0);

        // force the round to end via the two remaining
        doom(&mut ctrl, &ids[1]);
        assert!(matches!(ctrl.tick(None), Transition::RoundEnded { .. }));
        ctrl.auto_restart();
        run_countdown(&mut ctrl);
        assert!(!ctrl.world().get(&ids[2]).unwrap().alive);
        assert!(ctrl.world().get(&ids[0]).unwrap().alive);
    }

    #[test]
    fn test_leave_during_round_ends_it() {
        let (mut ctrl, ids) = controller_with(2);
        ctrl.start_match().unwrap();
        run_countdown(&mut ctrl);
        ctrl.leave(&ids[1]);
        assert_eq!(
            ctrl.reconcile_after_leave(),
            Transition::MatchEnded {
                winner: Some(ids[0])
            }
        );
        assert!(!ctrl.physics_running());
    }
}
