//! Ball physics and court geometry
//!
//! Everything here is a pure function over the fixed logical court, so the
//! simulation math is testable without a running session.

use crate::ws::protocol::Slot;

/// Logical court width in pixels
pub const COURT_WIDTH: f32 = 600.0;
/// Logical court height in pixels
pub const COURT_HEIGHT: f32 = 600.0;
/// Paddle width; paddle positions range over [0, COURT_WIDTH - PADDLE_WIDTH]
pub const PADDLE_WIDTH: f32 = 100.0;
/// Maximum paddle left-edge position
pub const PADDLE_MAX_X: f32 = COURT_WIDTH - PADDLE_WIDTH;
/// Ball radius
pub const BALL_RADIUS: f32 = 10.0;
/// Distance of each goal band from its court edge (paddle thickness)
pub const GOAL_BAND: f32 = 20.0;
/// Serve position (court center)
pub const SERVE_X: f32 = 300.0;
pub const SERVE_Y: f32 = 300.0;
/// Speed doubles every this many milliseconds of round time
pub const SPEED_RAMP_MS: f32 = 30_000.0;

/// Row the ball is snapped to after bouncing off a paddle, per side.
/// Snapping past the band prevents the collision from re-triggering while
/// the ball is still inside the paddle's footprint.
pub fn snap_y(side: Slot) -> f32 {
    match side {
        Slot::PlayerOne => GOAL_BAND + BALL_RADIUS,
        Slot::PlayerTwo => COURT_HEIGHT - GOAL_BAND - BALL_RADIUS,
    }
}

/// Per-tick ball travel distance.
///
/// Linear ramp over round time: +100% speed per 30 simulated seconds, so a
/// long rally gets progressively harder to return.
pub fn ball_speed(delta_ms: f32, elapsed_since_round_start_ms: f32) -> f32 {
    (delta_ms / 3.0) * (elapsed_since_round_start_ms / SPEED_RAMP_MS + 1.0)
}

/// Which goal band the ball is touching this tick, accounting for its radius
pub fn goal_band_side(ball_y: f32) -> Option<Slot> {
    if ball_y - BALL_RADIUS <= GOAL_BAND {
        Some(Slot::PlayerOne)
    } else if ball_y + BALL_RADIUS >= COURT_HEIGHT - GOAL_BAND {
        Some(Slot::PlayerTwo)
    } else {
        None
    }
}

/// Does a paddle at `paddle_x` cover the ball's horizontal position?
pub fn paddle_covers(paddle_x: f32, ball_x: f32) -> bool {
    ball_x >= paddle_x && ball_x <= paddle_x + PADDLE_WIDTH
}

/// Bounce angle from a paddle contact: signed offset from the paddle center,
/// normalized by 40 and clamped so the lateral ratio stays within [-1, 1].
/// An unclamped edge hit would yield 1.25, which the replicated state range
/// does not admit.
pub fn bounce_angle(ball_x: f32, paddle_x: f32) -> f32 {
    ((ball_x - (paddle_x + PADDLE_WIDTH / 2.0)) / 40.0).clamp(-1.0, 1.0)
}

/// Is the ball touching the left or right wall?
pub fn touches_side_wall(ball_x: f32) -> bool {
    ball_x >= COURT_WIDTH - BALL_RADIUS || ball_x <= BALL_RADIUS
}

/// Clamp a paddle position to the court
pub fn clamp_paddle(paddle_x: f32) -> f32 {
    paddle_x.clamp(0.0, PADDLE_MAX_X)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn speed_ramp_is_monotone_in_round_time() {
        let delta = 16.7;
        let mut last = 0.0;
        for elapsed in (0..120_000).step_by(500) {
            let speed = ball_speed(delta, elapsed as f32);
            assert!(speed >= last, "speed regressed at {elapsed}ms");
            last = speed;
        }
    }

    #[test]
    fn speed_doubles_after_thirty_seconds() {
        let base = ball_speed(15.0, 0.0);
        let ramped = ball_speed(15.0, 30_000.0);
        assert_approx_eq!(ramped, base * 2.0);
    }

    #[test]
    fn goal_band_detection_uses_ball_radius() {
        assert_eq!(goal_band_side(30.0), Some(Slot::PlayerOne));
        assert_eq!(goal_band_side(29.0), Some(Slot::PlayerOne));
        assert_eq!(goal_band_side(31.0), None);
        assert_eq!(goal_band_side(570.0), Some(Slot::PlayerTwo));
        assert_eq!(goal_band_side(571.0), Some(Slot::PlayerTwo));
        assert_eq!(goal_band_side(569.0), None);
        assert_eq!(goal_band_side(300.0), None);
    }

    #[test]
    fn paddle_coverage_is_inclusive_on_both_edges() {
        assert!(paddle_covers(250.0, 250.0));
        assert!(paddle_covers(250.0, 350.0));
        assert!(paddle_covers(250.0, 300.0));
        assert!(!paddle_covers(250.0, 249.9));
        assert!(!paddle_covers(250.0, 350.1));
    }

    #[test]
    fn bounce_angle_is_zero_at_paddle_center() {
        assert_approx_eq!(bounce_angle(300.0, 250.0), 0.0);
    }

    #[test]
    fn bounce_angle_sign_follows_contact_side() {
        assert!(bounce_angle(340.0, 250.0) > 0.0);
        assert!(bounce_angle(260.0, 250.0) < 0.0);
    }

    #[test]
    fn bounce_angle_is_clamped_at_paddle_edges() {
        // Edge contact is 50px off center; unclamped that is 1.25
        assert_approx_eq!(bounce_angle(350.0, 250.0), 1.0);
        assert_approx_eq!(bounce_angle(250.0, 250.0), -1.0);
    }

    #[test]
    fn side_wall_detection() {
        assert!(touches_side_wall(590.0));
        assert!(touches_side_wall(10.0));
        assert!(!touches_side_wall(300.0));
        assert!(!touches_side_wall(10.1));
    }

    #[test]
    fn paddle_clamp_bounds() {
        assert_eq!(clamp_paddle(-40.0), 0.0);
        assert_eq!(clamp_paddle(9_999.0), PADDLE_MAX_X);
        assert_eq!(clamp_paddle(250.0), 250.0);
    }

    #[test]
    fn snap_rows_sit_just_outside_the_bands() {
        assert_approx_eq!(snap_y(Slot::PlayerOne), 30.0);
        assert_approx_eq!(snap_y(Slot::PlayerTwo), 570.0);
    }
}
