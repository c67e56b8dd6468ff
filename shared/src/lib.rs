//! # Shared Arena Core
//!
//! Pure simulation and protocol types used by both the authoritative server
//! and headless clients. Nothing in this crate performs I/O or spawns tasks;
//! every simulation step is a plain function of the current state, the
//! elapsed time and an injected random source.
//!
//! ## Module Organization
//!
//! - [`physics`]: ball, clone ball and paddle bodies plus collision helpers
//! - [`powerups`]: power-up slots, charging and hit streak bookkeeping
//! - [`classic`]: the two-player match state and its scoring rules
//! - [`arena`]: the polygon battle-royale variant with fruit spawns
//! - [`ai`]: paddle-steering strategies for bot opponents
//! - [`protocol`]: JSON wire messages and state snapshots
//!
//! All distances are in canvas pixels and all velocities in pixels per
//! second. Steps take their delta in milliseconds.

pub mod ai;
pub mod arena;
pub mod classic;
pub mod physics;
pub mod powerups;
pub mod protocol;

pub use ai::{AiDecision, AiStrategy, Difficulty, LaneView};
pub use arena::{ArenaGeometry, FruitFrequency, RoyaleMatch, RoyaleSettings};
pub use classic::{ClassicMatch, MatchConfig};
pub use physics::{Ball, CloneBall, Direction, Paddle, PaddleControl, PaddleInput};
pub use powerups::{PowerUpKind, PowerUpState};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage, StateSnapshot};

pub const CANVAS_WIDTH: f32 = 800.0;
pub const CANVAS_HEIGHT: f32 = 600.0;

pub const PADDLE_WIDTH: f32 = 10.0;
pub const PADDLE_HEIGHT: f32 = 100.0;
pub const PADDLE_MARGIN: f32 = 20.0;
pub const PADDLE_SPEED: f32 = 420.0;

pub const BALL_SIZE: f32 = 12.0;
pub const BALL_BASE_SPEED: f32 = 320.0;
/// Per-axis cap; paddle bounces stop accelerating the ball once reached.
pub const BALL_MAX_SPEED: f32 = 1800.0;
pub const SPEED_INCREMENT: f32 = 1.08;
pub const CURVE_ACCELERATION: f32 = 260.0;
pub const SPEED_BOOST: f32 = 1.35;
pub const CLONES_PER_POWER_UP: usize = 2;

pub const DEFAULT_SCORE_TARGET: u32 = 5;
pub const MAX_POWER_UPS: usize = 3;
pub const STREAK_TO_CHARGE: u8 = 3;

/// Ball displacement between two AI samples above which the AI assumes a
/// scoring reset happened instead of real motion.
pub const AI_RESET_THRESHOLD: f32 = 120.0;

pub const DEFAULT_TICK_RATE: u32 = 60;
