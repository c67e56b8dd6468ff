//! Two-player match: paddles on the left and right edges, first to the
//! score target wins.
//!
//! In custom mode the power-up rules from [`crate::powerups`] apply: a
//! selected power-up fires on the owner's next paddle contact, scoring
//! charges power-ups and conceding costs one.

use crate::ai::LaneView;
use crate::physics::{deflect, required_substeps, Ball, CloneBall, Paddle, PaddleControl};
use crate::powerups::{PowerUpKind, PowerUpState};
use crate::protocol::{BallSnapshot, PlayerSnapshot, StateSnapshot};
use crate::{
    BALL_SIZE, CANVAS_HEIGHT, CANVAS_WIDTH, CLONES_PER_POWER_UP, CURVE_ACCELERATION,
    DEFAULT_SCORE_TARGET, MAX_POWER_UPS, PADDLE_MARGIN, PADDLE_WIDTH, SPEED_BOOST,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const LEFT: usize = 0;
pub const RIGHT: usize = 1;

const LEFT_FACE: f32 = PADDLE_MARGIN + PADDLE_WIDTH;
const RIGHT_FACE: f32 = CANVAS_WIDTH - PADDLE_MARGIN - PADDLE_WIDTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchConfig {
    pub score_target: u32,
    /// Enables power-ups.
    pub custom: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig {
            score_target: DEFAULT_SCORE_TARGET,
            custom: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub name: String,
    pub score: u32,
    pub paddle: Paddle,
    pub eliminated: bool,
    pub power_ups: PowerUpState,
    pub control: PaddleControl,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    PaddleHit {
        seat: usize,
    },
    PowerUpActivated {
        seat: usize,
        kind: PowerUpKind,
    },
    Scored {
        scorer: usize,
        granted: Option<PowerUpKind>,
        lost: Option<PowerUpKind>,
    },
    Ended {
        winner: usize,
    },
}

pub struct ClassicMatch {
    players: [PlayerState; 2],
    ball: Ball,
    clones: Vec<CloneBall>,
    tick: u64,
    config: MatchConfig,
    rng: StdRng,
    winner: Option<usize>,
    forfeit: bool,
}

impl ClassicMatch {
    pub fn new(names: [String; 2], config: MatchConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let [left, right] = names;
        let players = [
            Self::new_player(left, PADDLE_MARGIN, &mut rng),
            Self::new_player(right, RIGHT_FACE, &mut rng),
        ];
        let mut ball = Ball::new();
        ball.reset(&mut rng);

        ClassicMatch {
            players,
            ball,
            clones: Vec::new(),
            tick: 0,
            config: MatchConfig {
                score_target: config.score_target.max(1),
                ..config
            },
            rng,
            winner: None,
            forfeit: false,
        }
    }

    fn new_player(name: String, x: f32, rng: &mut StdRng) -> PlayerState {
        PlayerState {
            name,
            score: 0,
            paddle: Paddle::new(x),
            eliminated: false,
            power_ups: PowerUpState::new(rng),
            control: PaddleControl::default(),
        }
    }

    pub fn players(&self) -> &[PlayerState; 2] {
        &self.players
    }

    pub fn scores(&self) -> [u32; 2] {
        [self.players[LEFT].score, self.players[RIGHT].score]
    }

    pub fn ball(&self) -> &Ball {
        &self.ball
    }

    pub fn clones(&self) -> &[CloneBall] {
        &self.clones
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn is_terminal(&self) -> bool {
        self.winner.is_some()
    }

    pub fn winner(&self) -> Option<usize> {
        self.winner
    }

    pub fn was_forfeit(&self) -> bool {
        self.forfeit
    }

    pub fn set_control(&mut self, seat: usize, control: PaddleControl) {
        if let Some(player) = self.players.get_mut(seat) {
            player.control = control;
        }
    }

    /// Arms a held power-up. Only honoured in custom mode while running.
    pub fn select_power_up(&mut self, seat: usize, slot: usize) -> bool {
        if !self.config.custom || self.is_terminal() {
            return false;
        }
        match self.players.get_mut(seat) {
            Some(player) => player.power_ups.select(slot),
            None => false,
        }
    }

    /// Runs one simulation step of `dt_ms` milliseconds.
    pub fn advance(&mut self, dt_ms: f32) -> Vec<StepEvent> {
        let mut events = Vec::new();
        if self.is_terminal() {
            return events;
        }

        let dt = dt_ms.max(0.0) / 1000.0;
        self.tick += 1;

        for player in self.players.iter_mut() {
            player.paddle.apply_control(player.control, dt, CANVAS_HEIGHT);
        }

        let fastest = self
            .clones
            .iter()
            .map(|c| c.vx.hypot(c.vy))
            .fold(self.ball.speed(), f32::max);
        let substeps = required_substeps(fastest, dt);
        let sub_dt = dt / substeps as f32;

        for _ in 0..substeps {
            self.ball.integrate(sub_dt);
            self.ball.bounce_walls(CANVAS_HEIGHT);
            self.check_paddles(&mut events);

            for clone in self.clones.iter_mut() {
                clone.integrate(sub_dt);
                clone.bounce_walls(CANVAS_HEIGHT);
            }
            self.clones.retain(|clone| !clone.is_out(CANVAS_WIDTH));

            if let Some(scorer) = self.goal_crossed() {
                self.score(scorer, &mut events);
                if self.is_terminal() {
                    break;
                }
            }
        }

        events
    }

    fn check_paddles(&mut self, events: &mut Vec<StepEvent>) {
        for seat in [LEFT, RIGHT] {
            let approaching = match seat {
                LEFT => self.ball.vx < 0.0,
                _ => self.ball.vx > 0.0,
            };
            if !approaching || !self.players[seat].paddle.overlaps(&self.ball) {
                continue;
            }

            deflect(&mut self.ball, &self.players[seat].paddle);
            events.push(StepEvent::PaddleHit { seat });

            if self.config.custom {
                if let Some((_, kind)) = self.players[seat].power_ups.take_pending() {
                    self.activate(kind);
                    events.push(StepEvent::PowerUpActivated { seat, kind });
                }
            }
            return;
        }
    }

    fn activate(&mut self, kind: PowerUpKind) {
        match kind {
            PowerUpKind::CloneBall => {
                for _ in 0..CLONES_PER_POWER_UP {
                    let vy = self.rng.gen_range(-1.0..=1.0) * self.ball.base_speed;
                    self.clones.push(CloneBall::spawn_from(&self.ball, vy));
                }
            }
            PowerUpKind::Curve => {
                self.ball.curve = CURVE_ACCELERATION;
                for clone in self.clones.iter_mut() {
                    clone.curve = CURVE_ACCELERATION;
                }
            }
            PowerUpKind::SpeedBoost => {
                self.ball.boost(SPEED_BOOST);
                for clone in self.clones.iter_mut() {
                    clone.apply_boost(SPEED_BOOST);
                }
            }
        }
    }

    /// Seat credited with a point once the ball fully leaves the canvas.
    fn goal_crossed(&self) -> Option<usize> {
        if self.ball.x + self.ball.size < 0.0 {
            Some(RIGHT)
        } else if self.ball.x > CANVAS_WIDTH {
            Some(LEFT)
        } else {
            None
        }
    }

    fn score(&mut self, scorer: usize, events: &mut Vec<StepEvent>) {
        let conceded = 1 - scorer;
        self.players[scorer].score += 1;

        let (granted, lost) = if self.config.custom {
            for player in self.players.iter_mut() {
                player.power_ups.clear_pending();
            }
            (
                self.players[scorer].power_ups.record_point(&mut self.rng),
                self.players[conceded].power_ups.record_conceded(&mut self.rng),
            )
        } else {
            (None, None)
        };
        events.push(StepEvent::Scored {
            scorer,
            granted,
            lost,
        });

        self.ball.reset(&mut self.rng);
        self.clones.clear();
        for player in self.players.iter_mut() {
            player.paddle.recenter(CANVAS_HEIGHT);
        }

        if self.players[scorer].score >= self.config.score_target {
            self.winner = Some(scorer);
            events.push(StepEvent::Ended { winner: scorer });
        }
    }

    /// Ends the match in favour of the other seat. Returns the winner, or
    /// `None` if the match had already ended.
    pub fn forfeit(&mut self, seat: usize) -> Option<usize> {
        if self.is_terminal() || seat > RIGHT {
            return None;
        }
        self.players[seat].eliminated = true;
        self.forfeit = true;
        self.winner = Some(1 - seat);
        self.winner
    }

    /// Starts over with the same players.
    pub fn rematch(&mut self) {
        for player in self.players.iter_mut() {
            player.score = 0;
            player.eliminated = false;
            player.power_ups.reset(&mut self.rng);
            player.paddle.recenter(CANVAS_HEIGHT);
            player.control = PaddleControl::default();
        }
        self.ball = Ball::new();
        self.ball.reset(&mut self.rng);
        self.clones.clear();
        self.tick = 0;
        self.winner = None;
        self.forfeit = false;
    }

    pub fn lane_view(&self, seat: usize) -> LaneView {
        let player = &self.players[seat.min(RIGHT)];
        lane_view_for(
            seat,
            &ball_snapshot(&self.ball),
            *player.power_ups.slots(),
            *player.power_ups.pending(),
        )
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            tick: self.tick,
            ball: ball_snapshot(&self.ball),
            players: self
                .players
                .iter()
                .map(|p| PlayerSnapshot {
                    name: p.name.clone(),
                    paddle_y: p.paddle.y,
                    score: p.score,
                    lives: 0,
                    eliminated: p.eliminated,
                    power_ups: p.power_ups.slots().to_vec(),
                    pending: p.power_ups.pending().to_vec(),
                    charging: p.power_ups.charging(),
                    hit_streak: p.power_ups.hit_streak(),
                })
                .collect(),
            clones: self
                .clones
                .iter()
                .map(|c| BallSnapshot {
                    x: c.x,
                    y: c.y,
                    vx: c.vx,
                    vy: c.vy,
                })
                .collect(),
            fruits: Vec::new(),
            arena: None,
        }
    }
}

fn ball_snapshot(ball: &Ball) -> BallSnapshot {
    BallSnapshot {
        x: ball.x,
        y: ball.y,
        vx: ball.vx,
        vy: ball.vy,
    }
}

/// Builds the AI's view of a classic field from a ball snapshot. Seat 0
/// defends the left edge, seat 1 the right.
pub fn lane_view_for(
    seat: usize,
    ball: &BallSnapshot,
    power_ups: [Option<PowerUpKind>; MAX_POWER_UPS],
    pending: [bool; MAX_POWER_UPS],
) -> LaneView {
    let (depth, depth_velocity) = if seat == LEFT {
        (ball.x - LEFT_FACE, ball.vx)
    } else {
        (RIGHT_FACE - (ball.x + BALL_SIZE), -ball.vx)
    };

    LaneView {
        depth,
        lateral: ball.y + BALL_SIZE / 2.0,
        depth_velocity,
        lateral_velocity: ball.vy,
        span: CANVAS_HEIGHT,
        field_depth: RIGHT_FACE - LEFT_FACE,
        power_ups,
        pending,
    }
}
