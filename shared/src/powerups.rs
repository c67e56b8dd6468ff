//! Power-up slots and the hit-streak charging rules of custom mode.
//!
//! Every player holds up to [`MAX_POWER_UPS`] power-ups. One further kind is
//! always "charging": each point the player scores advances their hit
//! streak, and the third consecutive point completes the charging power-up
//! into a free slot. Conceding a point breaks the streak and costs one held
//! power-up, chosen at random.

use crate::{MAX_POWER_UPS, STREAK_TO_CHARGE};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerUpKind {
    CloneBall,
    Curve,
    SpeedBoost,
}

impl PowerUpKind {
    pub const ALL: [PowerUpKind; 3] = [
        PowerUpKind::CloneBall,
        PowerUpKind::Curve,
        PowerUpKind::SpeedBoost,
    ];

    pub fn random(rng: &mut impl Rng) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PowerUpState {
    slots: [Option<PowerUpKind>; MAX_POWER_UPS],
    pending: [bool; MAX_POWER_UPS],
    charging: Option<PowerUpKind>,
    hit_streak: u8,
}

impl PowerUpState {
    pub fn new(rng: &mut impl Rng) -> Self {
        Self {
            charging: Some(PowerUpKind::random(rng)),
            ..Self::default()
        }
    }

    pub fn slots(&self) -> &[Option<PowerUpKind>; MAX_POWER_UPS] {
        &self.slots
    }

    pub fn pending(&self) -> &[bool; MAX_POWER_UPS] {
        &self.pending
    }

    pub fn charging(&self) -> Option<PowerUpKind> {
        self.charging
    }

    pub fn hit_streak(&self) -> u8 {
        self.hit_streak
    }

    pub fn held(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Places `kind` in the first free slot. Returns false when all slots
    /// are taken.
    pub fn grant(&mut self, kind: PowerUpKind) -> bool {
        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(kind);
                true
            }
            None => false,
        }
    }

    /// Marks a held power-up for activation on the next paddle contact.
    /// Empty, out-of-range or already selected slots are ignored.
    pub fn select(&mut self, slot: usize) -> bool {
        if slot >= MAX_POWER_UPS || self.slots[slot].is_none() || self.pending[slot] {
            return false;
        }
        self.pending[slot] = true;
        true
    }

    /// Consumes the first selected power-up.
    pub fn take_pending(&mut self) -> Option<(usize, PowerUpKind)> {
        let slot = self.pending.iter().position(|pending| *pending)?;
        self.pending[slot] = false;
        self.slots[slot].take().map(|kind| (slot, kind))
    }

    pub fn clear_pending(&mut self) {
        self.pending = [false; MAX_POWER_UPS];
    }

    /// Advances the streak after scoring. At the third point the charging
    /// power-up moves into a free slot (it is lost if none is free), the
    /// streak restarts and a new kind starts charging.
    pub fn record_point(&mut self, rng: &mut impl Rng) -> Option<PowerUpKind> {
        self.hit_streak += 1;
        if self.hit_streak < STREAK_TO_CHARGE {
            return None;
        }

        self.hit_streak = 0;
        let completed = self.charging.take();
        self.charging = Some(PowerUpKind::random(rng));
        completed.filter(|kind| self.grant(*kind))
    }

    /// Breaks the streak after conceding and removes one random held
    /// power-up.
    pub fn record_conceded(&mut self, rng: &mut impl Rng) -> Option<PowerUpKind> {
        self.hit_streak = 0;
        let held: Vec<usize> = (0..MAX_POWER_UPS)
            .filter(|i| self.slots[*i].is_some())
            .collect();
        let slot = *held.choose(rng)?;
        self.pending[slot] = false;
        self.slots[slot].take()
    }

    /// Clears everything for a rematch; a fresh kind starts charging.
    pub fn reset(&mut self, rng: &mut impl Rng) {
        *self = Self::new(rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_new_state_is_charging() {
        let state = PowerUpState::new(&mut rng());
        assert!(state.charging().is_some());
        assert_eq!(state.held(), 0);
        assert_eq!(state.hit_streak(), 0);
    }

    #[test]
    fn test_third_point_completes_charge() {
        let mut rng = rng();
        let mut state = PowerUpState::new(&mut rng);
        let charging = state.charging();

        assert_eq!(state.record_point(&mut rng), None);
        assert_eq!(state.hit_streak(), 1);
        assert_eq!(state.record_point(&mut rng), None);
        assert_eq!(state.hit_streak(), 2);

        let granted = state.record_point(&mut rng);
        assert_eq!(granted, charging);
        assert_eq!(state.hit_streak(), 0);
        assert_eq!(state.held(), 1);
        assert_eq!(state.slots()[0], charging);
    }

    #[test]
    fn test_never_more_than_three_held() {
        let mut rng = rng();
        let mut state = PowerUpState::new(&mut rng);

        for _ in 0..30 {
            state.record_point(&mut rng);
            assert!(state.held() <= MAX_POWER_UPS);
            assert!(state.hit_streak() <= STREAK_TO_CHARGE);
        }
        assert_eq!(state.held(), MAX_POWER_UPS);
        assert!(!state.grant(PowerUpKind::Curve));
    }

    #[test]
    fn test_conceding_resets_streak_and_drops_one() {
        let mut rng = rng();
        let mut state = PowerUpState::new(&mut rng);
        state.grant(PowerUpKind::Curve);
        state.grant(PowerUpKind::SpeedBoost);
        state.record_point(&mut rng);

        let lost = state.record_conceded(&mut rng);

        assert!(lost.is_some());
        assert_eq!(state.held(), 1);
        assert_eq!(state.hit_streak(), 0);
    }

    #[test]
    fn test_conceding_with_empty_slots() {
        let mut rng = rng();
        let mut state = PowerUpState::new(&mut rng);
        assert_eq!(state.record_conceded(&mut rng), None);
    }

    #[test]
    fn test_select_and_take_pending() {
        let mut state = PowerUpState::default();
        state.grant(PowerUpKind::CloneBall);

        assert!(!state.select(1), "empty slot");
        assert!(!state.select(7), "out of range");
        assert!(state.select(0));
        assert!(!state.select(0), "already selected");

        assert_eq!(state.take_pending(), Some((0, PowerUpKind::CloneBall)));
        assert_eq!(state.held(), 0);
        assert_eq!(state.take_pending(), None);
    }

    #[test]
    fn test_clear_pending_keeps_slots() {
        let mut state = PowerUpState::default();
        state.grant(PowerUpKind::Curve);
        state.select(0);
        state.clear_pending();
        assert_eq!(state.pending(), &[false; MAX_POWER_UPS]);
        assert_eq!(state.held(), 1);
    }
}
