//! Battle-royale arena: a regular polygon centred on the canvas where every
//! contender guards one side.
//!
//! Each contender's paddle slides along its own side. A ball that fully
//! crosses a guarded side costs that contender one life; at zero lives the
//! contender is eliminated and the side turns into a wall. Sides without an
//! owner (the two spare sides of a two-player square) are walls from the
//! start. Fruits spawn inside the arena while power-ups are enabled and go
//! to whoever touched the ball last.

use crate::ai::LaneView;
use crate::physics::{required_substeps, Ball, Paddle, PaddleControl, Vec2};
use crate::protocol::{ArenaSnapshot, BallSnapshot, FruitSnapshot, PlayerSnapshot, StateSnapshot};
use crate::{
    BALL_BASE_SPEED, BALL_MAX_SPEED, BALL_SIZE, CANVAS_HEIGHT, CANVAS_WIDTH, MAX_POWER_UPS,
    SPEED_INCREMENT,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};

pub const MIN_CONTENDERS: usize = 2;
pub const MAX_CONTENDERS: usize = 6;

pub const MAX_FRUITS: usize = 3;
pub const FRUIT_RADIUS: f32 = 14.0;
pub const FRUIT_SPEED_FACTOR: f32 = 1.25;

/// A ball this far outside the circumradius escaped through a corner.
const ESCAPE_MARGIN: f32 = 4.0 * BALL_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FruitFrequency {
    Low,
    #[default]
    Medium,
    High,
}

impl FruitFrequency {
    pub fn interval_ms(self) -> f32 {
        match self {
            FruitFrequency::Low => 12_000.0,
            FruitFrequency::Medium => 8_000.0,
            FruitFrequency::High => 4_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FruitKind {
    Speed,
    Life,
    Shield,
}

impl FruitKind {
    pub const ALL: [FruitKind; 3] = [FruitKind::Speed, FruitKind::Life, FruitKind::Shield];

    pub fn random(rng: &mut impl Rng) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoyaleSettings {
    /// Starting lives, also the cap for `life` fruits.
    pub lives: u32,
    pub fruit_frequency: FruitFrequency,
    /// Enables fruit spawns.
    pub power_ups: bool,
}

impl Default for RoyaleSettings {
    fn default() -> Self {
        RoyaleSettings {
            lives: 3,
            fruit_frequency: FruitFrequency::Medium,
            power_ups: true,
        }
    }
}

/// Local frame of one polygon side. `normal` points out of the arena and
/// `tangent` runs along the side in the direction of increasing lateral
/// position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SideFrame {
    pub midpoint: Vec2,
    pub tangent: Vec2,
    pub normal: Vec2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArenaGeometry {
    pub center: Vec2,
    pub sides: usize,
    pub radius: f32,
    /// Distance from the centre to every side.
    pub apothem: f32,
    pub half_length: f32,
    frames: Vec<SideFrame>,
    owned_sides: Vec<usize>,
}

impl ArenaGeometry {
    /// Shape and size for a contender count; `None` outside 2..=6.
    pub fn for_player_count(players: usize) -> Option<Self> {
        if !(MIN_CONTENDERS..=MAX_CONTENDERS).contains(&players) {
            return None;
        }

        let sides = if players == 2 { 4 } else { players };
        let radius = match players {
            2 | 3 => 260.0,
            4 => 280.0,
            5 => 300.0,
            _ => 320.0,
        };
        let half_angle = PI / sides as f32;
        let center = Vec2::new(CANVAS_WIDTH / 2.0, CANVAS_HEIGHT / 2.0);
        let apothem = radius * half_angle.cos();

        let frames = (0..sides)
            .map(|side| {
                let theta = -PI / 2.0 + side as f32 * TAU / sides as f32;
                let normal = Vec2::new(theta.cos(), theta.sin());
                SideFrame {
                    midpoint: center.add(&normal.scale(apothem)),
                    tangent: Vec2::new(-normal.y, normal.x),
                    normal,
                }
            })
            .collect();

        // Two players face each other across the square.
        let owned_sides = if players == 2 {
            vec![0, 2]
        } else {
            (0..players).collect()
        };

        Some(ArenaGeometry {
            center,
            sides,
            radius,
            apothem,
            half_length: radius * half_angle.sin(),
            frames,
            owned_sides,
        })
    }

    pub fn vertices(&self) -> Vec<Vec2> {
        let offset = -PI / 2.0 - PI / self.sides as f32;
        (0..self.sides)
            .map(|i| {
                let angle = offset + i as f32 * TAU / self.sides as f32;
                self.center
                    .add(&Vec2::new(angle.cos(), angle.sin()).scale(self.radius))
            })
            .collect()
    }

    pub fn frame(&self, side: usize) -> &SideFrame {
        &self.frames[side]
    }

    /// Side guarded by a seat.
    pub fn side_of(&self, seat: usize) -> Option<usize> {
        self.owned_sides.get(seat).copied()
    }

    /// Seat guarding a side, if any.
    pub fn owner_of(&self, side: usize) -> Option<usize> {
        self.owned_sides.iter().position(|owned| *owned == side)
    }

    pub fn span(&self) -> f32 {
        2.0 * self.half_length
    }

    /// Positive outside the side's line, negative inside.
    pub fn signed_distance(&self, side: usize, point: Vec2) -> f32 {
        let frame = self.frame(side);
        point.sub(&frame.midpoint).dot(&frame.normal)
    }

    /// Position along the side in `[0, span]` for points next to it.
    pub fn lateral(&self, side: usize, point: Vec2) -> f32 {
        let frame = self.frame(side);
        point.sub(&frame.midpoint).dot(&frame.tangent) + self.half_length
    }

    pub fn contains(&self, point: Vec2) -> bool {
        (0..self.sides).all(|side| self.signed_distance(side, point) <= 0.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contender {
    pub name: String,
    pub lives: u32,
    pub eliminated: bool,
    pub shield: bool,
    /// `y` runs along the contender's side, in lateral coordinates.
    pub paddle: Paddle,
    pub control: PaddleControl,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fruit {
    pub position: Vec2,
    pub kind: FruitKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArenaEvent {
    LifeLost { seat: usize, lives_left: u32 },
    ShieldBlocked { seat: usize },
    Eliminated { seat: usize },
    FruitSpawned { kind: FruitKind },
    FruitCollected { seat: usize, kind: FruitKind },
    Ended { winner: Option<usize> },
}

pub struct RoyaleMatch {
    geometry: ArenaGeometry,
    contenders: Vec<Contender>,
    ball: Ball,
    fruits: Vec<Fruit>,
    settings: RoyaleSettings,
    rng: StdRng,
    tick: u64,
    spawn_timer_ms: f32,
    last_hitter: Option<usize>,
    elimination_order: Vec<usize>,
    winner: Option<usize>,
    ended: bool,
}

impl RoyaleMatch {
    /// Returns `None` when the number of names has no arena shape.
    pub fn new(names: Vec<String>, settings: RoyaleSettings, seed: u64) -> Option<Self> {
        let geometry = ArenaGeometry::for_player_count(names.len())?;
        let lives = settings.lives.max(1);
        let span = geometry.span();

        let contenders = names
            .into_iter()
            .map(|name| {
                let mut paddle = Paddle::new(0.0);
                paddle.recenter(span);
                Contender {
                    name,
                    lives,
                    eliminated: false,
                    shield: false,
                    paddle,
                    control: PaddleControl::default(),
                }
            })
            .collect();

        let mut arena = RoyaleMatch {
            geometry,
            contenders,
            ball: Ball::new(),
            fruits: Vec::new(),
            settings: RoyaleSettings { lives, ..settings },
            rng: StdRng::seed_from_u64(seed),
            tick: 0,
            spawn_timer_ms: 0.0,
            last_hitter: None,
            elimination_order: Vec::new(),
            winner: None,
            ended: false,
        };
        arena.reset_ball();
        Some(arena)
    }

    pub fn geometry(&self) -> &ArenaGeometry {
        &self.geometry
    }

    pub fn contenders(&self) -> &[Contender] {
        &self.contenders
    }

    pub fn ball(&self) -> &Ball {
        &self.ball
    }

    pub fn fruits(&self) -> &[Fruit] {
        &self.fruits
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn is_terminal(&self) -> bool {
        self.ended
    }

    pub fn winner(&self) -> Option<usize> {
        self.winner
    }

    /// Seats in the order they were knocked out.
    pub fn elimination_order(&self) -> &[usize] {
        &self.elimination_order
    }

    pub fn alive(&self) -> usize {
        self.contenders.iter().filter(|c| !c.eliminated).count()
    }

    pub fn set_control(&mut self, seat: usize, control: PaddleControl) {
        if let Some(contender) = self.contenders.get_mut(seat) {
            contender.control = control;
        }
    }

    /// Advances the arena by `dt_ms` milliseconds.
    pub fn advance(&mut self, dt_ms: f32) -> Vec<ArenaEvent> {
        let mut events = Vec::new();
        if self.ended {
            return events;
        }

        let dt_ms = dt_ms.max(0.0);
        let dt = dt_ms / 1000.0;
        self.tick += 1;

        let span = self.geometry.span();
        for contender in self.contenders.iter_mut().filter(|c| !c.eliminated) {
            contender.paddle.apply_control(contender.control, dt, span);
        }

        self.update_fruit_timer(dt_ms, &mut events);

        let substeps = required_substeps(self.ball.speed(), dt);
        let sub_dt = dt / substeps as f32;
        for _ in 0..substeps {
            self.ball.integrate(sub_dt);
            self.collide_sides(&mut events);
            if self.ended {
                break;
            }
            self.collect_fruits(&mut events);
        }

        events
    }

    /// Knocks a contender out regardless of lives, e.g. after a disconnect.
    pub fn eliminate(&mut self, seat: usize) -> Vec<ArenaEvent> {
        let mut events = Vec::new();
        if !self.ended && seat < self.contenders.len() {
            self.knock_out(seat, &mut events);
        }
        events
    }

    fn collide_sides(&mut self, events: &mut Vec<ArenaEvent>) {
        let radius = self.ball.size / 2.0;

        for side in 0..self.geometry.sides {
            let frame = *self.geometry.frame(side);
            let center = self.ball.center();
            if self.ball.velocity().dot(&frame.normal) <= 0.0 {
                continue;
            }
            let distance = self.geometry.signed_distance(side, center);
            if distance + radius < 0.0 {
                continue;
            }

            let owner = self
                .geometry
                .owner_of(side)
                .filter(|seat| !self.contenders[*seat].eliminated);

            let Some(seat) = owner else {
                self.reflect_off(side, 1.0);
                continue;
            };

            let lateral = self.geometry.lateral(side, center);
            let paddle = &self.contenders[seat].paddle;
            let reach = paddle.height / 2.0 + radius;
            if distance <= radius && (lateral - paddle.center_y()).abs() <= reach {
                self.reflect_off(side, SPEED_INCREMENT);
                self.last_hitter = Some(seat);
            } else if distance > radius {
                if self.contenders[seat].shield {
                    self.contenders[seat].shield = false;
                    self.reflect_off(side, 1.0);
                    events.push(ArenaEvent::ShieldBlocked { seat });
                } else {
                    self.lose_life(seat, events);
                    return;
                }
            }
        }

        if self.ball.center().sub(&self.geometry.center).magnitude()
            > self.geometry.radius + ESCAPE_MARGIN
        {
            self.reset_ball();
        }
    }

    /// Mirrors the ball velocity about the side normal, scales it and puts
    /// the ball back inside the side's line.
    ///
    /// The cap applies to the speed, not per axis. A ball already at or
    /// above the cap keeps its speed.
    fn reflect_off(&mut self, side: usize, factor: f32) {
        let frame = *self.geometry.frame(side);
        let radius = self.ball.size / 2.0;
        let center = self.ball.center();
        let distance = self.geometry.signed_distance(side, center);

        let reflected = self.ball.velocity().reflect(&frame.normal);
        let speed = reflected.magnitude();
        let target = (speed * factor).min(speed.max(BALL_MAX_SPEED));
        let velocity = reflected.normalize().scale(target);
        if velocity.x.is_finite() && velocity.y.is_finite() {
            self.ball.vx = velocity.x;
            self.ball.vy = velocity.y;
        }
        self.ball
            .set_center(center.sub(&frame.normal.scale(distance + radius)));
    }

    fn lose_life(&mut self, seat: usize, events: &mut Vec<ArenaEvent>) {
        let contender = &mut self.contenders[seat];
        contender.lives = contender.lives.saturating_sub(1);
        events.push(ArenaEvent::LifeLost {
            seat,
            lives_left: contender.lives,
        });

        if contender.lives == 0 {
            self.knock_out(seat, events);
        }
        if !self.ended {
            self.reset_ball();
        }
    }

    fn knock_out(&mut self, seat: usize, events: &mut Vec<ArenaEvent>) {
        let contender = &mut self.contenders[seat];
        if contender.eliminated {
            return;
        }
        contender.eliminated = true;
        contender.lives = 0;
        contender.shield = false;
        self.elimination_order.push(seat);
        events.push(ArenaEvent::Eliminated { seat });

        if self.last_hitter == Some(seat) {
            self.last_hitter = None;
        }

        if self.alive() <= 1 {
            self.ended = true;
            self.winner = self.contenders.iter().position(|c| !c.eliminated);
            events.push(ArenaEvent::Ended {
                winner: self.winner,
            });
        }
    }

    fn reset_ball(&mut self) {
        let angle = self.rng.gen_range(0.0..TAU);
        self.ball.set_center(self.geometry.center);
        self.ball.curve = 0.0;
        self.ball.set_velocity(Vec2::new(angle.cos(), angle.sin()).scale(BALL_BASE_SPEED));
        self.last_hitter = None;
    }

    fn update_fruit_timer(&mut self, dt_ms: f32, events: &mut Vec<ArenaEvent>) {
        if !self.settings.power_ups {
            return;
        }
        self.spawn_timer_ms += dt_ms;
        let interval = self.settings.fruit_frequency.interval_ms();
        if self.spawn_timer_ms < interval {
            return;
        }
        self.spawn_timer_ms = 0.0;

        if self.fruits.len() < MAX_FRUITS {
            let angle = self.rng.gen_range(0.0..TAU);
            let distance = self.rng.gen_range(0.0..=0.5 * self.geometry.apothem);
            let kind = FruitKind::random(&mut self.rng);
            self.fruits.push(Fruit {
                position: self
                    .geometry
                    .center
                    .add(&Vec2::new(angle.cos(), angle.sin()).scale(distance)),
                kind,
            });
            events.push(ArenaEvent::FruitSpawned { kind });
        }
    }

    fn collect_fruits(&mut self, events: &mut Vec<ArenaEvent>) {
        let Some(seat) = self.last_hitter else {
            return;
        };
        let center = self.ball.center();
        let reach = self.ball.size / 2.0 + FRUIT_RADIUS;

        let mut i = 0;
        while i < self.fruits.len() {
            if self.fruits[i].position.sub(&center).magnitude() <= reach {
                let fruit = self.fruits.remove(i);
                self.apply_fruit(seat, fruit.kind);
                events.push(ArenaEvent::FruitCollected {
                    seat,
                    kind: fruit.kind,
                });
            } else {
                i += 1;
            }
        }
    }

    fn apply_fruit(&mut self, seat: usize, kind: FruitKind) {
        match kind {
            FruitKind::Speed => {
                let faster = self.ball.velocity().scale(FRUIT_SPEED_FACTOR);
                self.ball.set_velocity(faster);
            }
            FruitKind::Life => {
                let contender = &mut self.contenders[seat];
                contender.lives = (contender.lives + 1).min(self.settings.lives);
            }
            FruitKind::Shield => self.contenders[seat].shield = true,
        }
    }

    /// The ball as seen from a seat's side.
    pub fn lane_view(&self, seat: usize) -> Option<LaneView> {
        let side = self.geometry.side_of(seat)?;
        let frame = self.geometry.frame(side);
        let center = self.ball.center();
        let velocity = self.ball.velocity();

        Some(LaneView {
            depth: -self.geometry.signed_distance(side, center),
            lateral: self.geometry.lateral(side, center),
            depth_velocity: -velocity.dot(&frame.normal),
            lateral_velocity: velocity.dot(&frame.tangent),
            span: self.geometry.span(),
            field_depth: 2.0 * self.geometry.apothem,
            power_ups: [None; MAX_POWER_UPS],
            pending: [false; MAX_POWER_UPS],
        })
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            tick: self.tick,
            ball: BallSnapshot {
                x: self.ball.x,
                y: self.ball.y,
                vx: self.ball.vx,
                vy: self.ball.vy,
            },
            players: self
                .contenders
                .iter()
                .map(|c| PlayerSnapshot {
                    name: c.name.clone(),
                    paddle_y: c.paddle.y,
                    score: 0,
                    lives: c.lives,
                    eliminated: c.eliminated,
                    power_ups: Vec::new(),
                    pending: Vec::new(),
                    charging: None,
                    hit_streak: 0,
                })
                .collect(),
            clones: Vec::new(),
            fruits: self
                .fruits
                .iter()
                .map(|f| FruitSnapshot {
                    x: f.position.x,
                    y: f.position.y,
                    kind: f.kind,
                })
                .collect(),
            arena: Some(ArenaSnapshot {
                sides: self.geometry.sides,
                radius: self.geometry.radius,
            }),
        }
    }
}
