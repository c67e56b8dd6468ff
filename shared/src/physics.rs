use crate::{
    BALL_BASE_SPEED, BALL_MAX_SPEED, BALL_SIZE, CANVAS_HEIGHT, CANVAS_WIDTH, PADDLE_HEIGHT,
    PADDLE_SPEED, PADDLE_WIDTH, SPEED_INCREMENT,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

/// Cosmetic spin applied per pixel travelled.
const ROTATION_PER_PIXEL: f32 = 0.02;

/// Paddles closer than this to their steering target stop moving.
const STEERING_DEADZONE: f32 = 2.0;

///Represents a vector in 2D space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    ///Positive direction is down, matching canvas coordinates.
    pub y: f32,
}

impl Vec2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Vec2 { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the normalized vector.
    pub fn normalize(&self) -> Vec2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vec2::default()
        } else {
            Vec2 {
                x: self.x / mag,
                y: self.y / mag,
            }
        }
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vec2 {
        Vec2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vec2) -> Vec2 {
        Vec2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    ///Returns the difference of two vectors.
    pub fn sub(&self, other: &Vec2) -> Vec2 {
        Vec2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }

    pub fn dot(&self, other: &Vec2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    ///Reflects the vector about a unit normal.
    pub fn reflect(&self, normal: &Vec2) -> Vec2 {
        self.sub(&normal.scale(2.0 * self.dot(normal)))
    }
}

/// Vertical paddle direction as sent by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    fn sign(self) -> f32 {
        match self {
            Direction::Up => -1.0,
            Direction::Down => 1.0,
        }
    }
}

/// Held movement keys of a human player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaddleInput {
    pub up: bool,
    pub down: bool,
}

impl PaddleInput {
    pub fn direction(&self) -> Option<Direction> {
        match (self.up, self.down) {
            (true, false) => Some(Direction::Up),
            (false, true) => Some(Direction::Down),
            _ => None,
        }
    }
}

/// How a paddle is driven during a step: held keys for humans, a steering
/// target (paddle centre) for bots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaddleControl {
    Keys(PaddleInput),
    Target(f32),
}

impl Default for PaddleControl {
    fn default() -> Self {
        PaddleControl::Keys(PaddleInput::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ball {
    /// Top-left corner.
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub size: f32,
    /// Cosmetic only.
    pub rotation: f32,
    pub base_speed: f32,
    /// Vertical acceleration magnitude while a curve effect is active.
    pub curve: f32,
}

impl Ball {
    /// Creates a ball at the canvas centre heading right.
    pub fn new() -> Self {
        Ball {
            x: (CANVAS_WIDTH - BALL_SIZE) / 2.0,
            y: (CANVAS_HEIGHT - BALL_SIZE) / 2.0,
            vx: BALL_BASE_SPEED,
            vy: 0.0,
            size: BALL_SIZE,
            rotation: 0.0,
            base_speed: BALL_BASE_SPEED,
            curve: 0.0,
        }
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x + self.size / 2.0, self.y + self.size / 2.0)
    }

    pub fn set_center(&mut self, center: Vec2) {
        self.x = center.x - self.size / 2.0;
        self.y = center.y - self.size / 2.0;
    }

    pub fn velocity(&self) -> Vec2 {
        Vec2::new(self.vx, self.vy)
    }

    pub fn set_velocity(&mut self, velocity: Vec2) {
        self.vx = clamp_axis(velocity.x);
        self.vy = clamp_axis(velocity.y);
    }

    pub fn speed(&self) -> f32 {
        self.velocity().magnitude()
    }

    /// Moves the ball by its velocity over `dt` seconds.
    pub fn integrate(&mut self, dt: f32) {
        apply_curve(&mut self.vy, self.curve, dt);
        self.x += self.vx * dt;
        self.y += self.vy * dt;
        self.rotation = (self.rotation + self.speed() * dt * ROTATION_PER_PIXEL) % TAU;
    }

    /// Reflects off the top and bottom walls. Returns true on a bounce.
    pub fn bounce_walls(&mut self, height: f32) -> bool {
        bounce_vertical(&mut self.y, &mut self.vy, self.size, height)
    }

    /// Recentres the ball after a point: horizontal direction flips, the
    /// vertical speed is redrawn from `rng`, the curve effect ends.
    pub fn reset(&mut self, rng: &mut impl Rng) {
        let direction = if self.vx > 0.0 {
            -1.0
        } else if self.vx < 0.0 {
            1.0
        } else if rng.gen_bool(0.5) {
            1.0
        } else {
            -1.0
        };
        self.x = (CANVAS_WIDTH - self.size) / 2.0;
        self.y = (CANVAS_HEIGHT - self.size) / 2.0;
        self.vx = direction * self.base_speed;
        self.vy = rng.gen_range(-0.6..=0.6) * self.base_speed;
        self.curve = 0.0;
    }

    pub fn boost(&mut self, factor: f32) {
        self.vx = clamp_axis(self.vx * factor);
        self.vy = clamp_axis(self.vy * factor);
    }
}

impl Default for Ball {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoy ball: bounces off the top and bottom walls only and never scores.
#[derive(Debug, Clone, PartialEq)]
pub struct CloneBall {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub size: f32,
    pub curve: f32,
    pub boost: f32,
    pub boosted: bool,
}

impl CloneBall {
    pub fn spawn_from(ball: &Ball, vy: f32) -> Self {
        CloneBall {
            x: ball.x,
            y: ball.y,
            vx: ball.vx,
            vy: clamp_axis(vy),
            size: ball.size,
            curve: ball.curve,
            boost: 1.0,
            boosted: false,
        }
    }

    pub fn integrate(&mut self, dt: f32) {
        apply_curve(&mut self.vy, self.curve, dt);
        self.x += self.vx * dt;
        self.y += self.vy * dt;
    }

    pub fn bounce_walls(&mut self, height: f32) -> bool {
        bounce_vertical(&mut self.y, &mut self.vy, self.size, height)
    }

    /// Applies the speed boost at most once per clone.
    pub fn apply_boost(&mut self, factor: f32) -> bool {
        if self.boosted {
            return false;
        }
        self.boost = factor;
        self.vx = clamp_axis(self.vx * factor);
        self.vy = clamp_axis(self.vy * factor);
        self.boosted = true;
        true
    }

    /// True once the clone has fully left the canvas horizontally.
    pub fn is_out(&self, width: f32) -> bool {
        self.x + self.size < 0.0 || self.x > width
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Paddle {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub speed: f32,
    /// Direction of the most recent step, `None` while idle.
    pub last_direction: Option<Direction>,
}

impl Paddle {
    pub fn new(x: f32) -> Self {
        Paddle {
            x,
            y: (CANVAS_HEIGHT - PADDLE_HEIGHT) / 2.0,
            width: PADDLE_WIDTH,
            height: PADDLE_HEIGHT,
            speed: PADDLE_SPEED,
            last_direction: None,
        }
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }

    pub fn recenter(&mut self, canvas_height: f32) {
        self.y = (canvas_height - self.height) / 2.0;
        self.last_direction = None;
    }

    /// Applies one movement step and keeps the paddle inside
    /// `[0, canvas_height - height]`.
    pub fn apply_control(&mut self, control: PaddleControl, dt: f32, canvas_height: f32) {
        match control {
            PaddleControl::Keys(input) => self.move_direction(input.direction(), dt),
            PaddleControl::Target(target) => self.steer_towards(target, dt),
        }
        self.y = self.y.clamp(0.0, canvas_height - self.height);
    }

    fn move_direction(&mut self, direction: Option<Direction>, dt: f32) {
        if let Some(direction) = direction {
            self.y += direction.sign() * self.speed * dt;
        }
        self.last_direction = direction;
    }

    /// Moves the paddle centre toward `target` at no more than its speed.
    fn steer_towards(&mut self, target: f32, dt: f32) {
        let diff = target - self.center_y();
        if diff.abs() <= STEERING_DEADZONE {
            self.last_direction = None;
            return;
        }
        let step = diff.abs().min(self.speed * dt);
        self.y += step * diff.signum();
        self.last_direction = Some(if diff < 0.0 {
            Direction::Up
        } else {
            Direction::Down
        });
    }

    /// Axis-aligned bounding box overlap with the ball.
    pub fn overlaps(&self, ball: &Ball) -> bool {
        !(ball.x + ball.size <= self.x
            || ball.x >= self.x + self.width
            || ball.y + ball.size <= self.y
            || ball.y >= self.y + self.height)
    }
}

/// Paddle contact: flips and accelerates the horizontal velocity, applies
/// the spin rule, and pushes the ball clear of the paddle face.
pub fn deflect(ball: &mut Ball, paddle: &Paddle) {
    let moving_right = ball.vx > 0.0;
    ball.vx = clamp_axis(-ball.vx * SPEED_INCREMENT);

    let spin = matches!(
        (paddle.last_direction, ball.vy),
        (Some(Direction::Up), vy) if vy > 0.0
    ) || matches!(
        (paddle.last_direction, ball.vy),
        (Some(Direction::Down), vy) if vy < 0.0
    );
    if spin {
        ball.vy = -ball.vy;
    }

    if moving_right {
        ball.x = paddle.x - ball.size;
    } else {
        ball.x = paddle.x + paddle.width;
    }
}

/// Number of sub-steps needed so that no body travels further than half a
/// ball per sub-step.
pub fn required_substeps(max_speed: f32, dt: f32) -> u32 {
    const SAFETY_FACTOR: f32 = 0.5;

    let max_movement_per_step = BALL_SIZE * SAFETY_FACTOR;
    let max_movement_this_tick = max_speed * dt;

    if max_movement_this_tick > max_movement_per_step {
        (max_movement_this_tick / max_movement_per_step).ceil() as u32
    } else {
        1
    }
}

pub fn clamp_axis(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(-BALL_MAX_SPEED, BALL_MAX_SPEED)
    } else {
        0.0
    }
}

// Curve acceleration always pushes along the current vertical direction, so
// speed never drops during a rally.
fn apply_curve(vy: &mut f32, curve: f32, dt: f32) {
    if curve > 0.0 && *vy != 0.0 {
        *vy = clamp_axis(*vy + vy.signum() * curve * dt);
    }
}

fn bounce_vertical(y: &mut f32, vy: &mut f32, size: f32, height: f32) -> bool {
    if *y <= 0.0 && *vy < 0.0 {
        *y = 0.0;
        *vy = -*vy;
        true
    } else if *y >= height - size && *vy > 0.0 {
        *y = height - size;
        *vy = -*vy;
        true
    } else {
        false
    }
}
