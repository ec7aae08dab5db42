//! Session state and authoritative tick loop

use dashmap::DashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{info, warn};
use uuid::Uuid;

use crate::util::time::{patch_interval_ticks, SessionClock, TICK_DURATION_MICROS};
use crate::ws::protocol::{ClientMsg, ServerMsg, Slot};

use super::physics;
use super::snapshot::SnapshotBuilder;
use super::PeerEvent;

/// Exactly two seats per session
pub const MAX_PEERS: usize = 2;
/// First score to reach this wins
pub const WIN_SCORE: u8 = 10;
/// Pause between a miss and the next serve
pub const SERVE_DELAY_MS: u64 = 1_000;
/// Grace after the second join, so both clients finish loading before
/// physics begins
pub const START_GRACE_MS: u64 = 2_000;

/// Round phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Waiting for the second player
    Idle,
    /// Both seats filled, serve grace pending
    RoundStarting,
    /// Ball in play
    RoundRunning,
    /// Between rounds, next serve scheduled
    RoundPaused,
    /// Terminal: win reached or a peer left
    GameOver,
}

/// One player seat (authoritative)
#[derive(Debug, Clone)]
pub struct PlayerEntity {
    /// Identity of the connected peer; None means the seat is unfilled.
    /// Set once at join, used to authenticate every later move command.
    pub peer_id: Option<Uuid>,
    pub display_name: String,
    /// Paddle left edge, clamped to [0, PADDLE_MAX_X] after every mutation
    pub paddle_x: f32,
    pub score: u8,
    /// Set at most once, never cleared
    pub has_won: bool,
}

impl PlayerEntity {
    fn empty() -> Self {
        Self {
            peer_id: None,
            display_name: String::new(),
            // Centered on the court edge
            paddle_x: physics::PADDLE_MAX_X / 2.0,
            score: 0,
            has_won: false,
        }
    }
}

/// Session state (owned by the session task)
pub struct SessionState {
    pub id: Uuid,
    pub phase: RoundPhase,
    pub tick: u64,
    /// True once the first serve has happened; never reverts
    pub game_started: bool,
    /// Session-clock stamp of the current round's serve
    pub round_started_at: u64,
    pub players: [PlayerEntity; 2],
    pub ball_x: f32,
    pub ball_y: f32,
    /// true = moving toward player two's goal line (y increasing)
    pub ball_direction: bool,
    /// Lateral velocity ratio in [-1, 1]
    pub ball_angle: f32,
    /// Deferred serve deadline on the session clock, if one is scheduled.
    /// Checked each tick; the GameOver guard in serve() makes a deadline
    /// that outlives the game a no-op.
    pub pending_serve_at: Option<u64>,
    pub clock: SessionClock,
    rng: ChaCha8Rng,
}

impl SessionState {
    pub fn new(id: Uuid, seed: u64) -> Self {
        Self {
            id,
            phase: RoundPhase::Idle,
            tick: 0,
            game_started: false,
            round_started_at: 0,
            players: [PlayerEntity::empty(), PlayerEntity::empty()],
            ball_x: 0.0,
            ball_y: 0.0,
            ball_direction: false,
            ball_angle: 0.0,
            pending_serve_at: None,
            clock: SessionClock::start(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Resolve a peer id to its seat
    pub fn slot_of(&self, peer_id: Uuid) -> Option<Slot> {
        if self.players[0].peer_id == Some(peer_id) {
            Some(Slot::PlayerOne)
        } else if self.players[1].peer_id == Some(peer_id) {
            Some(Slot::PlayerTwo)
        } else {
            None
        }
    }

    pub fn seated_count(&self) -> usize {
        self.players.iter().filter(|p| p.peer_id.is_some()).count()
    }

    /// Fill the first free seat. Returns the assigned slot, or None when
    /// both seats are taken (the lobby caps occupancy, so that is a stale
    /// or duplicate join).
    pub fn seat(&mut self, peer_id: Uuid, display_name: String) -> Option<Slot> {
        if self.slot_of(peer_id).is_some() {
            return None;
        }
        let slot = if self.players[0].peer_id.is_none() {
            Slot::PlayerOne
        } else if self.players[1].peer_id.is_none() {
            Slot::PlayerTwo
        } else {
            return None;
        };

        let player = &mut self.players[slot.index()];
        player.peer_id = Some(peer_id);
        player.display_name = display_name;

        if slot == Slot::PlayerTwo {
            // Both seats filled: first serve after the loading grace
            self.phase = RoundPhase::RoundStarting;
            self.pending_serve_at = Some(self.clock.elapsed_ms() + START_GRACE_MS);
        }

        Some(slot)
    }

    /// Apply a paddle-movement command. A peer id matching neither seat is
    /// silently dropped: stale and unauthenticated messages get no reply,
    /// so nothing about seat assignment leaks to the sender.
    pub fn apply_move(&mut self, peer_id: Uuid, delta: f32) {
        if let Some(slot) = self.slot_of(peer_id) {
            let player = &mut self.players[slot.index()];
            player.paddle_x = physics::clamp_paddle(player.paddle_x + delta);
        }
    }

    /// Put the ball in play: center serve, straight line, coin-flip
    /// direction, round clock restamped. Guarded no-op once the session is
    /// over, which cancels any serve still scheduled at teardown.
    pub fn serve(&mut self) {
        if self.phase == RoundPhase::GameOver {
            return;
        }
        self.ball_direction = self.rng.gen_bool(0.5);
        self.ball_x = physics::SERVE_X;
        self.ball_y = physics::SERVE_Y;
        self.ball_angle = 0.0;
        self.round_started_at = self.clock.elapsed_ms();
        self.game_started = true;
        self.phase = RoundPhase::RoundRunning;
        self.pending_serve_at = None;
    }

    /// Fire the scheduled serve if its deadline has passed
    fn fire_due_serve(&mut self) {
        if let Some(deadline) = self.pending_serve_at {
            if self.clock.elapsed_ms() >= deadline {
                self.serve();
            }
        }
    }

    /// Advance the simulation by `delta_ms`. Returns the winner when this
    /// tick ended the game.
    ///
    /// Within one tick the order is fixed: integration, then goal-band or
    /// wall resolution (mutually exclusive by construction), then the win
    /// check.
    pub fn step(&mut self, delta_ms: f32) -> Option<Slot> {
        self.tick += 1;
        self.fire_due_serve();

        if !self.game_started || self.phase != RoundPhase::RoundRunning {
            return None;
        }

        let now = self.clock.elapsed_ms();
        let elapsed = now.saturating_sub(self.round_started_at) as f32;
        let speed = physics::ball_speed(delta_ms, elapsed);

        if self.ball_direction {
            self.ball_y += speed;
        } else {
            self.ball_y -= speed;
        }
        self.ball_x += speed * self.ball_angle;

        if let Some(side) = physics::goal_band_side(self.ball_y) {
            let paddle_x = self.players[side.index()].paddle_x;
            if physics::paddle_covers(paddle_x, self.ball_x) {
                // Bounce: flip travel, re-angle off the contact point, snap
                // out of the paddle band so the hit cannot re-trigger
                self.ball_direction = !self.ball_direction;
                self.ball_angle = physics::bounce_angle(self.ball_x, paddle_x);
                self.ball_y = physics::snap_y(side);
            } else {
                // Miss: the defender let it through, the other side scores
                let scorer = side.other();
                self.players[scorer.index()].score += 1;
                self.phase = RoundPhase::RoundPaused;
                self.pending_serve_at = Some(now + SERVE_DELAY_MS);
                info!(
                    session_id = %self.id,
                    scorer = ?scorer,
                    score = self.players[scorer.index()].score,
                    "Point scored"
                );
            }
        } else if physics::touches_side_wall(self.ball_x) {
            self.ball_angle = -self.ball_angle;
        }

        self.resolve_win()
    }

    /// Mark the winner once a score reaches the threshold
    fn resolve_win(&mut self) -> Option<Slot> {
        for (index, player) in self.players.iter_mut().enumerate() {
            if player.score >= WIN_SCORE {
                player.has_won = true;
                self.phase = RoundPhase::GameOver;
                let slot = if index == 0 {
                    Slot::PlayerOne
                } else {
                    Slot::PlayerTwo
                };
                return Some(slot);
            }
        }
        None
    }

    /// Slot of the winner, if the game ended by victory
    pub fn winner(&self) -> Option<Slot> {
        if self.players[0].has_won {
            Some(Slot::PlayerOne)
        } else if self.players[1].has_won {
            Some(Slot::PlayerTwo)
        } else {
            None
        }
    }
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<PeerEvent>,
    pub snapshot_tx: broadcast::Sender<ServerMsg>,
    pub player_count: Arc<std::sync::atomic::AtomicUsize>,
}

impl SessionHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Atomically claim a seat if one is free. The lobby reserves before
    /// routing a join so two peers cannot race into the same last seat.
    pub fn try_reserve_seat(&self) -> bool {
        self.player_count
            .fetch_update(
                std::sync::atomic::Ordering::Relaxed,
                std::sync::atomic::Ordering::Relaxed,
                |count| (count < MAX_PEERS).then_some(count + 1),
            )
            .is_ok()
    }
}

/// Registry of all active sessions
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.sessions.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.remove(id).map(|(_, h)| h)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn total_players(&self) -> usize {
        self.sessions.iter().map(|s| s.value().player_count()).sum()
    }

    /// Find a session with a free seat
    pub fn find_available_session(&self) -> Option<SessionHandle> {
        for entry in self.sessions.iter() {
            if entry.value().player_count() < MAX_PEERS {
                return Some(entry.value().clone());
            }
        }
        None
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative game session
pub struct GameSession {
    state: SessionState,
    input_rx: mpsc::Receiver<PeerEvent>,
    snapshot_tx: broadcast::Sender<ServerMsg>,
    snapshot_builder: SnapshotBuilder,
    player_count: Arc<std::sync::atomic::AtomicUsize>,
}

impl GameSession {
    /// Create a new session
    pub fn new(id: Uuid, seed: u64) -> (Self, SessionHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (snapshot_tx, _) = broadcast::channel(64);
        let player_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let handle = SessionHandle {
            id,
            input_tx,
            snapshot_tx: snapshot_tx.clone(),
            player_count: player_count.clone(),
        };

        let session = Self {
            state: SessionState::new(id, seed),
            input_rx,
            snapshot_tx,
            snapshot_builder: SnapshotBuilder::new(patch_interval_ticks()),
            player_count,
        };

        (session, handle)
    }

    /// Run the authoritative tick loop
    pub async fn run(mut self) {
        info!(session_id = %self.state.id, "Session started");

        let tick_duration = Duration::from_micros(TICK_DURATION_MICROS);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        loop {
            tick_interval.tick().await;

            // Real elapsed time since the previous tick, in milliseconds
            let delta_ms = last_tick.elapsed().as_secs_f32() * 1_000.0;
            last_tick = Instant::now();

            // Drain the event queue, then advance physics. Events and the
            // tick's read-modify-write never interleave: this task is the
            // only mutator of SessionState.
            self.process_events();
            self.run_tick(delta_ms);

            if self.snapshot_builder.should_send() {
                let snapshot = self.snapshot_builder.build(self.state.tick, &self.state);
                let _ = self.snapshot_tx.send(snapshot);
            }

            if self.state.phase == RoundPhase::GameOver {
                break;
            }
        }

        // Termination signal; nothing mutates the state after this
        let _ = self.snapshot_tx.send(ServerMsg::SessionClosed {
            winner: self.state.winner(),
        });

        info!(
            session_id = %self.state.id,
            winner = ?self.state.winner(),
            "Session closed"
        );
    }

    /// Process all pending peer events
    fn process_events(&mut self) {
        while let Ok(event) = self.input_rx.try_recv() {
            match event.msg {
                ClientMsg::Join { name } => {
                    self.handle_join(event.peer_id, name);
                }
                ClientMsg::MovePaddle { delta } => {
                    self.state.apply_move(event.peer_id, delta);
                }
                ClientMsg::Ping { t } => {
                    let _ = self.snapshot_tx.send(ServerMsg::Pong {
                        peer_id: event.peer_id,
                        t,
                    });
                }
                ClientMsg::Leave => {
                    self.handle_leave(event.peer_id);
                }
            }
        }
    }

    /// Handle a peer taking a seat
    fn handle_join(&mut self, peer_id: Uuid, display_name: String) {
        let Some(slot) = self.state.seat(peer_id, display_name.clone()) else {
            warn!(
                session_id = %self.state.id,
                peer_id = %peer_id,
                "Join with no free seat"
            );
            let _ = self.snapshot_tx.send(ServerMsg::Error {
                peer_id,
                code: "session_full".to_string(),
                message: "Session is full".to_string(),
            });
            // The lobby reserved a seat for this join; give it back. Never
            // drop the counter below actual occupancy, and never lower it
            // from a successful join: a concurrent reservation may still
            // have its join in flight.
            let seated = self.state.seated_count();
            let _ = self.player_count.fetch_update(
                std::sync::atomic::Ordering::Relaxed,
                std::sync::atomic::Ordering::Relaxed,
                |count| (count > seated).then(|| count - 1),
            );
            return;
        };

        let _ = self.snapshot_tx.send(ServerMsg::PlayerJoined {
            slot,
            display_name,
        });

        if slot == Slot::PlayerOne {
            // The first joiner owns the near edge; its client flips the
            // court based on this notice
            let _ = self.snapshot_tx.send(ServerMsg::YouArePlayerOne { peer_id });
        }

        // First-state sync for the new peer
        self.snapshot_builder.force_next();

        info!(
            session_id = %self.state.id,
            peer_id = %peer_id,
            slot = ?slot,
            "Player joined session"
        );
    }

    /// Handle a peer leaving. With exactly two participants any departure
    /// makes continuation meaningless, so the session ends immediately and
    /// the remaining state is left as-is.
    fn handle_leave(&mut self, peer_id: Uuid) {
        if self.state.slot_of(peer_id).is_none() {
            // A peer that never held a seat cannot tear the session down
            return;
        }

        info!(
            session_id = %self.state.id,
            peer_id = %peer_id,
            "Peer left, closing session"
        );
        self.state.phase = RoundPhase::GameOver;
    }

    /// Run a single simulation tick
    fn run_tick(&mut self, delta_ms: f32) {
        if let Some(winner) = self.state.step(delta_ms) {
            // Make sure both peers see the final score before teardown
            self.snapshot_builder.force_next();
            info!(
                session_id = %self.state.id,
                winner = ?winner,
                "Winning score reached"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::ServerMsg;

    fn seeded_state() -> SessionState {
        SessionState::new(Uuid::new_v4(), 42)
    }

    fn running_state() -> SessionState {
        let mut state = seeded_state();
        state.seat(Uuid::new_v4(), "alice".into());
        state.seat(Uuid::new_v4(), "bob".into());
        state.serve();
        state
    }

    #[test]
    fn paddle_position_stays_in_bounds_for_any_delta() {
        let mut state = seeded_state();
        let peer = Uuid::new_v4();
        state.seat(peer, "alice".into());

        for delta in [-10_000.0, -3.5, 0.0, 7.25, 10_000.0] {
            state.apply_move(peer, delta);
            let x = state.players[0].paddle_x;
            assert!((0.0..=physics::PADDLE_MAX_X).contains(&x), "out of bounds: {x}");
        }
    }

    #[test]
    fn move_from_unknown_peer_is_dropped() {
        let mut state = seeded_state();
        state.seat(Uuid::new_v4(), "alice".into());
        let before = state.players[0].paddle_x;

        state.apply_move(Uuid::new_v4(), 50.0);

        assert_eq!(state.players[0].paddle_x, before);
    }

    #[test]
    fn first_seat_then_second_seat() {
        let mut state = seeded_state();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(state.seat(first, "alice".into()), Some(Slot::PlayerOne));
        assert_eq!(state.phase, RoundPhase::Idle);
        assert!(state.pending_serve_at.is_none());

        assert_eq!(state.seat(second, "bob".into()), Some(Slot::PlayerTwo));
        assert_eq!(state.phase, RoundPhase::RoundStarting);
        assert!(state.pending_serve_at.is_some());
        assert!(!state.game_started);
    }

    #[test]
    fn third_seat_is_refused() {
        let mut state = seeded_state();
        state.seat(Uuid::new_v4(), "alice".into());
        state.seat(Uuid::new_v4(), "bob".into());
        assert_eq!(state.seat(Uuid::new_v4(), "carol".into()), None);
    }

    #[test]
    fn duplicate_peer_cannot_take_both_seats() {
        let mut state = seeded_state();
        let peer = Uuid::new_v4();
        assert_eq!(state.seat(peer, "alice".into()), Some(Slot::PlayerOne));
        assert_eq!(state.seat(peer, "alice".into()), None);
    }

    #[test]
    fn tick_is_a_no_op_before_the_game_starts() {
        let mut state = seeded_state();
        state.seat(Uuid::new_v4(), "alice".into());
        let (bx, by) = (state.ball_x, state.ball_y);

        assert!(state.step(16.7).is_none());

        assert_eq!((state.ball_x, state.ball_y), (bx, by));
        assert!(!state.game_started);
    }

    #[test]
    fn tick_is_a_no_op_while_round_is_paused() {
        let mut state = running_state();
        state.phase = RoundPhase::RoundPaused;
        state.ball_x = 123.0;
        state.ball_y = 456.0;

        state.step(16.7);

        assert_eq!(state.ball_x, 123.0);
        assert_eq!(state.ball_y, 456.0);
    }

    #[test]
    fn serve_resets_ball_and_stamps_round() {
        let mut state = seeded_state();
        state.seat(Uuid::new_v4(), "alice".into());
        state.seat(Uuid::new_v4(), "bob".into());

        state.serve();

        assert_eq!(state.ball_x, physics::SERVE_X);
        assert_eq!(state.ball_y, physics::SERVE_Y);
        assert_eq!(state.ball_angle, 0.0);
        assert!(state.game_started);
        assert_eq!(state.phase, RoundPhase::RoundRunning);
        assert!(state.pending_serve_at.is_none());
    }

    #[test]
    fn due_serve_fires_on_the_next_tick() {
        let mut state = seeded_state();
        state.seat(Uuid::new_v4(), "alice".into());
        state.seat(Uuid::new_v4(), "bob".into());
        assert!(!state.game_started);

        // Deadline already in the past
        state.pending_serve_at = Some(0);
        state.step(16.7);

        assert!(state.game_started);
        assert_eq!(state.phase, RoundPhase::RoundRunning);
    }

    #[test]
    fn pending_serve_after_game_over_is_a_guarded_no_op() {
        let mut state = running_state();
        state.phase = RoundPhase::GameOver;
        state.pending_serve_at = Some(0);

        state.step(16.7);

        assert_eq!(state.phase, RoundPhase::GameOver);
        assert!(!matches!(state.phase, RoundPhase::RoundRunning));
    }

    #[test]
    fn paddle_contact_flips_direction_and_snaps_to_the_band_edge() {
        // Ball entering player one's goal band, paddle underneath it
        let mut state = running_state();
        state.ball_x = 300.0;
        state.ball_y = 31.0;
        state.ball_direction = false; // toward player one
        state.ball_angle = 0.0;
        state.players[0].paddle_x = 250.0;

        state.step(16.7);

        assert!(state.ball_direction, "direction must flip toward player two");
        assert_eq!(state.ball_y, 30.0);
        assert_eq!(state.players[0].score, 0);
        assert_eq!(state.players[1].score, 0);
    }

    #[test]
    fn paddle_contact_on_player_two_side_snaps_high() {
        let mut state = running_state();
        state.ball_x = 300.0;
        state.ball_y = 569.0;
        state.ball_direction = true;
        state.ball_angle = 0.0;
        state.players[1].paddle_x = 250.0;

        state.step(16.7);

        assert!(!state.ball_direction);
        assert_eq!(state.ball_y, 570.0);
    }

    #[test]
    fn off_center_contact_angles_the_bounce() {
        let mut state = running_state();
        state.ball_x = 330.0;
        state.ball_y = 31.0;
        state.ball_direction = false;
        state.players[0].paddle_x = 250.0;

        state.step(16.7);

        // Contact right of center sends the ball rightward
        assert!(state.ball_angle > 0.0);
        assert!(state.ball_angle <= 1.0);
    }

    #[test]
    fn miss_scores_exactly_one_point_for_the_other_player() {
        let mut state = running_state();
        state.ball_x = 300.0;
        state.ball_y = 31.0;
        state.ball_direction = false;
        state.ball_angle = 0.0;
        state.players[0].paddle_x = 0.0; // ball outside [0, 100]

        state.step(16.7);

        assert_eq!(state.players[1].score, 1);
        assert_eq!(state.players[0].score, 0);
        assert_eq!(state.phase, RoundPhase::RoundPaused);
        assert!(state.pending_serve_at.is_some());
    }

    #[test]
    fn side_wall_reflects_the_angle() {
        let mut state = running_state();
        state.ball_x = 589.0;
        state.ball_y = 300.0;
        state.ball_direction = true;
        state.ball_angle = 0.8;

        state.step(16.7);

        assert!(state.ball_angle < 0.0);
    }

    #[test]
    fn goal_band_and_wall_checks_are_mutually_exclusive() {
        // Ball in the corner: goal-band resolution wins, the wall check
        // never runs this tick
        let mut state = running_state();
        state.ball_x = 595.0;
        state.ball_y = 31.0;
        state.ball_direction = false;
        state.ball_angle = 0.5;
        state.players[0].paddle_x = 0.0;

        state.step(16.7);

        // Miss resolved; angle untouched by the wall bounce
        assert_eq!(state.players[1].score, 1);
        assert!(state.ball_angle > 0.0);
    }

    #[test]
    fn winning_score_sets_exactly_one_flag_and_ends_the_game() {
        let mut state = running_state();
        state.players[0].score = WIN_SCORE - 1;
        state.players[1].score = 7;
        state.ball_x = 300.0;
        state.ball_y = 569.0;
        state.ball_direction = true;
        state.ball_angle = 0.0;
        state.players[1].paddle_x = 450.0; // miss on player two's side

        let winner = state.step(16.7);

        assert_eq!(winner, Some(Slot::PlayerOne));
        assert!(state.players[0].has_won);
        assert!(!state.players[1].has_won);
        assert_eq!(state.phase, RoundPhase::GameOver);
    }

    #[test]
    fn no_mutation_after_game_over() {
        let mut state = running_state();
        state.players[0].score = WIN_SCORE;
        state.resolve_win();
        assert_eq!(state.phase, RoundPhase::GameOver);

        // Further miss events cannot happen: ticks no longer move the ball
        state.ball_x = 300.0;
        state.ball_y = 31.0;
        let scores = (state.players[0].score, state.players[1].score);

        state.step(16.7);
        state.step(16.7);

        assert_eq!((state.players[0].score, state.players[1].score), scores);
        assert_eq!(state.ball_y, 31.0);
    }

    #[test]
    fn first_joiner_gets_the_player_one_notice() {
        let (mut session, handle) = GameSession::new(Uuid::new_v4(), 1);
        let mut rx = handle.snapshot_tx.subscribe();

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        session.handle_join(first, "alice".into());
        session.handle_join(second, "bob".into());

        let mut notices = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let ServerMsg::YouArePlayerOne { peer_id } = msg {
                notices.push(peer_id);
            }
        }

        assert_eq!(notices, vec![first]);
    }

    #[test]
    fn pong_is_addressed_to_the_pinging_peer() {
        let (mut session, handle) = GameSession::new(Uuid::new_v4(), 1);
        let mut rx = handle.snapshot_tx.subscribe();
        let pinger = Uuid::new_v4();

        handle
            .input_tx
            .try_send(PeerEvent {
                peer_id: pinger,
                msg: ClientMsg::Ping { t: 7 },
            })
            .unwrap();
        session.process_events();

        let mut pongs = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let ServerMsg::Pong { t, .. } = msg {
                pongs.push((t, msg.addressed_to()));
            }
        }

        // The opponent's writer must be able to filter this out
        assert_eq!(pongs, vec![(7, Some(pinger))]);
    }

    #[test]
    fn session_full_error_is_addressed_to_the_refused_peer() {
        let (mut session, handle) = GameSession::new(Uuid::new_v4(), 1);
        session.handle_join(Uuid::new_v4(), "alice".into());
        session.handle_join(Uuid::new_v4(), "bob".into());

        let mut rx = handle.snapshot_tx.subscribe();
        let refused = Uuid::new_v4();
        session.handle_join(refused, "carol".into());

        let mut errors = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let ServerMsg::Error { ref code, .. } = msg {
                errors.push((code.clone(), msg.addressed_to()));
            }
        }

        assert_eq!(errors, vec![("session_full".to_string(), Some(refused))]);
    }

    #[test]
    fn join_processing_never_lowers_a_concurrent_reservation() {
        let (mut session, handle) = GameSession::new(Uuid::new_v4(), 1);
        assert!(handle.try_reserve_seat());
        assert!(handle.try_reserve_seat());

        // Second reservation's join is still in flight; the count must hold
        // so no third peer can slip in
        session.handle_join(Uuid::new_v4(), "alice".into());
        assert_eq!(handle.player_count(), 2);
        assert!(!handle.try_reserve_seat());

        session.handle_join(Uuid::new_v4(), "bob".into());
        assert_eq!(handle.player_count(), 2);
    }

    #[test]
    fn refused_join_releases_its_reservation() {
        let (mut session, handle) = GameSession::new(Uuid::new_v4(), 1);
        let peer = Uuid::new_v4();

        assert!(handle.try_reserve_seat());
        session.handle_join(peer, "alice".into());
        assert_eq!(handle.player_count(), 1);

        // A second reservation for the same peer is refused at the seat;
        // its slot goes back to the pool
        assert!(handle.try_reserve_seat());
        session.handle_join(peer, "alice".into());
        assert_eq!(handle.player_count(), 1);
    }

    #[test]
    fn leave_from_a_seated_peer_closes_the_session() {
        let (mut session, _handle) = GameSession::new(Uuid::new_v4(), 1);
        let peer = Uuid::new_v4();
        session.handle_join(peer, "alice".into());

        session.handle_leave(peer);

        assert_eq!(session.state.phase, RoundPhase::GameOver);
        assert_eq!(session.state.winner(), None);
    }

    #[test]
    fn leave_from_an_unseated_peer_is_ignored() {
        let (mut session, _handle) = GameSession::new(Uuid::new_v4(), 1);
        session.handle_join(Uuid::new_v4(), "alice".into());

        session.handle_leave(Uuid::new_v4());

        assert_ne!(session.state.phase, RoundPhase::GameOver);
    }

    #[test]
    fn seat_reservation_caps_at_two() {
        let (_session, handle) = GameSession::new(Uuid::new_v4(), 1);
        assert!(handle.try_reserve_seat());
        assert!(handle.try_reserve_seat());
        assert!(!handle.try_reserve_seat());
    }

    #[test]
    fn registry_finds_sessions_with_free_seats() {
        let registry = SessionRegistry::new();
        let (_session, handle) = GameSession::new(Uuid::new_v4(), 1);
        registry.insert(handle.clone());

        assert!(registry.find_available_session().is_some());

        handle.try_reserve_seat();
        handle.try_reserve_seat();
        assert!(registry.find_available_session().is_none());

        registry.remove(&handle.id);
        assert_eq!(registry.active_sessions(), 0);
    }
}
