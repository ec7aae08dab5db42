//! Snapshot building and patch-rate control

use crate::ws::protocol::{PlayerView, ServerMsg};

use super::session::SessionState;

/// Builds state snapshots for network transmission at a bounded cadence,
/// independent of the simulation tick rate.
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval,
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (first-state sync on join, game over)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    /// Build a snapshot message from the authoritative state
    pub fn build(&self, tick: u64, state: &SessionState) -> ServerMsg {
        let players = [
            player_view(state, 0),
            player_view(state, 1),
        ];

        ServerMsg::Snapshot {
            tick,
            game_started: state.game_started,
            round_started_at: state.round_started_at,
            players,
            ball_x: state.ball_x,
            ball_y: state.ball_y,
            ball_direction: state.ball_direction,
            ball_angle: state.ball_angle,
        }
    }
}

fn player_view(state: &SessionState, index: usize) -> PlayerView {
    let player = &state.players[index];
    PlayerView {
        display_name: player.display_name.clone(),
        paddle_x: player.paddle_x,
        score: player.score,
        has_won: player.has_won,
    }
}
