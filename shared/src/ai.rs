//! Bot opponents.
//!
//! Strategies never touch the match directly. The engine hands them a
//! [`LaneView`] of the ball as seen from the bot's own goal line and gets
//! back a target position for the paddle centre; the physics step then
//! steers the paddle toward that target at paddle speed.
//!
//! The three strategies differ only in how well they predict the impact
//! point:
//! - [`NaiveAi`] extrapolates from the last two ball samples and treats a
//!   stalled ball as incoming.
//! - [`BasicAi`] uses the same extrapolation but only reacts to a ball that
//!   is strictly moving toward it.
//! - [`NormalAi`] reads the true velocity, folds the prediction back into
//!   the lane wall by wall, and fires any power-up it holds.

use crate::{MAX_POWER_UPS, AI_RESET_THRESHOLD};
use crate::powerups::PowerUpKind;
use serde::{Deserialize, Serialize};

/// Upper bound on wall reflections folded by [`NormalAi`].
const MAX_REFLECTIONS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn display_name(self) -> String {
        let label = match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        };
        format!("AI ({})", label)
    }

    pub fn strategy(self) -> Box<dyn AiStrategy> {
        match self {
            Difficulty::Easy => Box::new(NaiveAi::default()),
            Difficulty::Medium => Box::new(BasicAi::default()),
            Difficulty::Hard => Box::new(NormalAi::default()),
        }
    }
}

/// The ball as seen from one paddle's lane.
///
/// `depth` is the distance of the ball from the bot's goal line (positive
/// inside the field), `lateral` the ball position along the lane in
/// `[0, span]`. Velocities are in pixels per second along the same axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneView {
    pub depth: f32,
    pub lateral: f32,
    pub depth_velocity: f32,
    pub lateral_velocity: f32,
    pub span: f32,
    pub field_depth: f32,
    pub power_ups: [Option<PowerUpKind>; MAX_POWER_UPS],
    pub pending: [bool; MAX_POWER_UPS],
}

impl LaneView {
    pub fn center(&self) -> f32 {
        self.span / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AiDecision {
    /// Desired paddle centre along the lane.
    pub target: f32,
    /// Power-up slot to select this tick.
    pub activate: Option<usize>,
}

pub trait AiStrategy: Send {
    /// Re-issues the latest decision without observing the ball again.
    fn decide(&mut self) -> AiDecision;

    /// Takes a fresh observation, updates the strategy's memory and decides.
    fn refresh_and_decide(&mut self, view: &LaneView) -> AiDecision;

    /// Tells the strategy the width of its lane before the first
    /// observation, so an early `decide` aims at the lane centre.
    fn assign_lane(&mut self, span: f32);

    fn name(&self) -> &'static str;
}

/// Last observed ball sample plus the decision derived from it.
#[derive(Debug, Clone, Default)]
struct Memory {
    previous: Option<(f32, f32)>,
    last: Option<AiDecision>,
    span: Option<f32>,
}

enum Observation {
    /// First sample ever; nothing to extrapolate from.
    Fresh,
    /// The ball jumped further than any legal move; memory was re-seeded.
    Discontinuity,
    Moved { depth_delta: f32, lateral_delta: f32 },
}

impl Memory {
    fn observe(&mut self, view: &LaneView) -> Observation {
        self.span = Some(view.span);
        let current = (view.depth, view.lateral);
        let observation = match self.previous {
            None => Observation::Fresh,
            Some((depth, lateral)) => {
                let depth_delta = view.depth - depth;
                let lateral_delta = view.lateral - lateral;
                if depth_delta.hypot(lateral_delta) > AI_RESET_THRESHOLD {
                    Observation::Discontinuity
                } else {
                    Observation::Moved {
                        depth_delta,
                        lateral_delta,
                    }
                }
            }
        };

        self.previous = match observation {
            Observation::Discontinuity => Some((view.field_depth / 2.0, view.center())),
            _ => Some(current),
        };
        observation
    }

    fn remember(&mut self, decision: AiDecision) -> AiDecision {
        self.last = Some(decision);
        decision
    }

    fn replay(&self) -> AiDecision {
        self.last.unwrap_or(AiDecision {
            target: self.span.unwrap_or(crate::CANVAS_HEIGHT) / 2.0,
            activate: None,
        })
    }
}

/// Folds a predicted lateral position back into `[0, span]` as if the ball
/// bounced off the lane walls, with period `2 * span`.
pub fn fold_into_lane(lateral: f32, span: f32) -> f32 {
    if span <= 0.0 || !lateral.is_finite() {
        return span.max(0.0) / 2.0;
    }
    let period = 2.0 * span;
    let wrapped = lateral.rem_euclid(period);
    if wrapped > span {
        period - wrapped
    } else {
        wrapped
    }
}

fn extrapolate_from_samples(view: &LaneView, depth_delta: f32, lateral_delta: f32) -> f32 {
    // Number of sample intervals until the ball reaches the goal line.
    let steps = view.depth / -depth_delta;
    fold_into_lane(view.lateral + lateral_delta * steps, view.span)
}

#[derive(Debug, Clone, Default)]
pub struct NaiveAi {
    memory: Memory,
}

impl AiStrategy for NaiveAi {
    fn decide(&mut self) -> AiDecision {
        self.memory.replay()
    }

    fn refresh_and_decide(&mut self, view: &LaneView) -> AiDecision {
        let target = match self.memory.observe(view) {
            Observation::Fresh | Observation::Discontinuity => view.center(),
            Observation::Moved {
                depth_delta,
                lateral_delta,
            } => {
                if depth_delta < 0.0 {
                    extrapolate_from_samples(view, depth_delta, lateral_delta)
                } else if depth_delta == 0.0 {
                    // A stalled ball counts as incoming; follow it.
                    view.lateral
                } else {
                    view.center()
                }
            }
        };
        self.memory.remember(AiDecision {
            target,
            activate: None,
        })
    }

    fn assign_lane(&mut self, span: f32) {
        self.memory.span = Some(span);
    }

    fn name(&self) -> &'static str {
        "naive"
    }
}

#[derive(Debug, Clone, Default)]
pub struct BasicAi {
    memory: Memory,
}

impl AiStrategy for BasicAi {
    fn decide(&mut self) -> AiDecision {
        self.memory.replay()
    }

    fn refresh_and_decide(&mut self, view: &LaneView) -> AiDecision {
        let target = match self.memory.observe(view) {
            Observation::Moved {
                depth_delta,
                lateral_delta,
            } if depth_delta < 0.0 => extrapolate_from_samples(view, depth_delta, lateral_delta),
            _ => view.center(),
        };
        self.memory.remember(AiDecision {
            target,
            activate: None,
        })
    }

    fn assign_lane(&mut self, span: f32) {
        self.memory.span = Some(span);
    }

    fn name(&self) -> &'static str {
        "basic"
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalAi {
    memory: Memory,
}

impl NormalAi {
    fn predict(view: &LaneView) -> f32 {
        if view.depth_velocity >= 0.0 {
            return view.center();
        }
        let time_to_goal = view.depth / -view.depth_velocity;
        let mut lateral = view.lateral + view.lateral_velocity * time_to_goal;
        for _ in 0..MAX_REFLECTIONS {
            if lateral < 0.0 {
                lateral = -lateral;
            } else if lateral > view.span {
                lateral = 2.0 * view.span - lateral;
            } else {
                break;
            }
        }
        if lateral.is_finite() {
            lateral.clamp(0.0, view.span)
        } else {
            view.center()
        }
    }

    fn power_up_to_fire(view: &LaneView) -> Option<usize> {
        (0..MAX_POWER_UPS).find(|slot| view.power_ups[*slot].is_some() && !view.pending[*slot])
    }
}

impl AiStrategy for NormalAi {
    fn decide(&mut self) -> AiDecision {
        AiDecision {
            activate: None,
            ..self.memory.replay()
        }
    }

    fn refresh_and_decide(&mut self, view: &LaneView) -> AiDecision {
        let target = match self.memory.observe(view) {
            Observation::Discontinuity => view.center(),
            _ => Self::predict(view),
        };
        self.memory.remember(AiDecision {
            target,
            activate: Self::power_up_to_fire(view),
        })
    }

    fn assign_lane(&mut self, span: f32) {
        self.memory.span = Some(span);
    }

    fn name(&self) -> &'static str {
        "normal"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn view(depth: f32, lateral: f32, depth_velocity: f32, lateral_velocity: f32) -> LaneView {
        LaneView {
            depth,
            lateral,
            depth_velocity,
            lateral_velocity,
            span: 600.0,
            field_depth: 800.0,
            power_ups: [None; MAX_POWER_UPS],
            pending: [false; MAX_POWER_UPS],
        }
    }

    #[test]
    fn test_fold_into_lane() {
        assert_approx_eq!(fold_into_lane(250.0, 600.0), 250.0);
        assert_approx_eq!(fold_into_lane(700.0, 600.0), 500.0);
        assert_approx_eq!(fold_into_lane(-100.0, 600.0), 100.0);
        assert_approx_eq!(fold_into_lane(1300.0, 600.0), 100.0);
        assert_approx_eq!(fold_into_lane(f32::NAN, 600.0), 300.0);
    }

    #[test]
    fn test_first_sample_targets_center() {
        for difficulty in [Difficulty::Easy, Difficulty::Medium] {
            let mut ai = difficulty.strategy();
            let decision = ai.refresh_and_decide(&view(400.0, 100.0, -300.0, 0.0));
            assert_eq!(decision.target, 300.0);
        }
    }

    #[test]
    fn test_naive_extrapolates_incoming_ball() {
        let mut ai = NaiveAi::default();
        ai.refresh_and_decide(&view(410.0, 100.0, -600.0, 600.0));
        let decision = ai.refresh_and_decide(&view(400.0, 110.0, -600.0, 600.0));
        // 40 more intervals of +10 lateral.
        assert_approx_eq!(decision.target, 510.0, 1e-3);
    }

    #[test]
    fn test_naive_reflects_prediction() {
        let mut ai = NaiveAi::default();
        ai.refresh_and_decide(&view(410.0, 500.0, -600.0, 600.0));
        let decision = ai.refresh_and_decide(&view(400.0, 510.0, -600.0, 600.0));
        // 510 + 400 = 910 folds to 290.
        assert_approx_eq!(decision.target, 290.0, 1e-3);
    }

    #[test]
    fn test_naive_follows_stalled_ball_but_basic_does_not() {
        let mut naive = NaiveAi::default();
        naive.refresh_and_decide(&view(400.0, 120.0, 0.0, 0.0));
        assert_eq!(naive.refresh_and_decide(&view(400.0, 120.0, 0.0, 0.0)).target, 120.0);

        let mut basic = BasicAi::default();
        basic.refresh_and_decide(&view(400.0, 120.0, 0.0, 0.0));
        assert_eq!(basic.refresh_and_decide(&view(400.0, 120.0, 0.0, 0.0)).target, 300.0);
    }

    #[test]
    fn test_receding_ball_targets_center() {
        let mut basic = BasicAi::default();
        basic.refresh_and_decide(&view(390.0, 100.0, 600.0, 0.0));
        assert_eq!(basic.refresh_and_decide(&view(400.0, 100.0, 600.0, 0.0)).target, 300.0);

        let mut normal = NormalAi::default();
        assert_eq!(normal.refresh_and_decide(&view(400.0, 100.0, 600.0, 0.0)).target, 300.0);
    }

    #[test]
    fn test_normal_uses_true_velocity() {
        let mut ai = NormalAi::default();
        // One second to impact, drifting 1000px: 1100 -> 100.
        let decision = ai.refresh_and_decide(&view(400.0, 100.0, -400.0, 1000.0));
        assert_approx_eq!(decision.target, 100.0, 1e-3);
    }

    #[test]
    fn test_reset_jump_targets_center_for_all_strategies() {
        for difficulty in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard] {
            let mut ai = difficulty.strategy();
            ai.refresh_and_decide(&view(20.0, 40.0, -600.0, -300.0));
            ai.refresh_and_decide(&view(10.0, 35.0, -600.0, -300.0));

            // The ball reappears at the centre heading straight at us.
            let decision = ai.refresh_and_decide(&view(400.0, 300.0 - 150.0, -320.0, 400.0));
            assert_eq!(decision.target, 300.0, "{} strategy", ai.name());
        }
    }

    #[test]
    fn test_reset_reseeds_memory_to_center() {
        let mut ai = NaiveAi::default();
        ai.refresh_and_decide(&view(10.0, 35.0, -600.0, 0.0));
        ai.refresh_and_decide(&view(400.0, 500.0, -300.0, 0.0));

        // Extrapolation now runs from the re-seeded centre sample.
        let decision = ai.refresh_and_decide(&view(390.0, 300.0, -300.0, 0.0));
        assert_approx_eq!(decision.target, 300.0, 1e-3);
    }

    #[test]
    fn test_normal_fires_held_power_up() {
        let mut ai = NormalAi::default();
        let mut lane = view(400.0, 100.0, -300.0, 0.0);
        lane.power_ups[1] = Some(PowerUpKind::Curve);

        assert_eq!(ai.refresh_and_decide(&lane).activate, Some(1));

        lane.pending[1] = true;
        assert_eq!(ai.refresh_and_decide(&lane).activate, None);
    }

    #[test]
    fn test_decide_replays_last_target() {
        let mut ai = NormalAi::default();
        let mut lane = view(400.0, 100.0, -400.0, 1000.0);
        lane.power_ups[0] = Some(PowerUpKind::SpeedBoost);
        let fresh = ai.refresh_and_decide(&lane);

        let replay = ai.decide();
        assert_eq!(replay.target, fresh.target);
        assert_eq!(replay.activate, None);
    }

    #[test]
    fn test_decide_before_observing_aims_at_lane_centre() {
        let mut strategies: Vec<Box<dyn AiStrategy>> = vec![
            Box::new(NaiveAi::default()),
            Box::new(BasicAi::default()),
            Box::new(NormalAi::default()),
        ];
        for ai in strategies.iter_mut() {
            assert_eq!(ai.decide().target, crate::CANVAS_HEIGHT / 2.0, "{} strategy", ai.name());
            ai.assign_lane(450.0);
            assert_eq!(ai.decide().target, 225.0, "{} strategy", ai.name());
        }
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Difficulty::Easy.display_name(), "AI (easy)");
        assert_eq!(Difficulty::Hard.strategy().name(), "normal");
    }
}
