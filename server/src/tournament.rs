//! Single-elimination tournament brackets.
//!
//! A [`Tournament`] only tracks the bracket: who is still in, which
//! pairings are open and who won them. Starting the actual matches and
//! substituting absent players is the server's job; it feeds every
//! outcome back through [`Tournament::record_result`].
//!
//! Bye policy: when a round has an odd number of entrants the last seed
//! advances without playing.

use crate::client_manager::{ClientId, MatchId};
use crate::error::ArenaError;
use crate::game::{MatchResult, TournamentStanding};
use log::{debug, info};
use shared::protocol::TournamentStatus;
use shared::{Difficulty, ServerMessage};
use std::collections::HashMap;

pub type TournamentId = u32;
pub type BracketMatchId = u32;

#[derive(Debug, Clone, PartialEq)]
pub enum Competitor {
    Human { client_id: ClientId, name: String },
    Bot { name: String, difficulty: Difficulty },
}

impl Competitor {
    pub fn name(&self) -> &str {
        match self {
            Competitor::Human { name, .. } | Competitor::Bot { name, .. } => name,
        }
    }

    pub fn client_id(&self) -> Option<ClientId> {
        match self {
            Competitor::Human { client_id, .. } => Some(*client_id),
            Competitor::Bot { .. } => None,
        }
    }

    pub fn is_bot(&self) -> bool {
        matches!(self, Competitor::Bot { .. })
    }
}

/// One pairing of the bracket. `a` and `b` index into the tournament's
/// competitors; a bye has no `b` and is decided from the start.
#[derive(Debug, Clone, PartialEq)]
pub struct BracketMatch {
    pub id: BracketMatchId,
    pub round: u32,
    pub a: usize,
    pub b: Option<usize>,
    pub winner: Option<usize>,
    pub score: Option<(u32, u32)>,
}

impl BracketMatch {
    pub fn is_bye(&self) -> bool {
        self.b.is_none()
    }

    /// Competitor index playing on `side` (0 for `a`, 1 for `b`).
    pub fn side(&self, side: usize) -> Option<usize> {
        match side {
            0 => Some(self.a),
            1 => self.b,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoundProgress {
    /// Other pairings of the round are still open.
    Pending,
    /// The round closed; these pairings need to be played.
    NextRound(Vec<BracketMatch>),
    Completed { champion: String },
}

#[derive(Debug)]
pub struct Tournament {
    id: TournamentId,
    name: String,
    status: TournamentStatus,
    round: u32,
    capacity: usize,
    competitors: Vec<Competitor>,
    eliminated: Vec<bool>,
    matches: Vec<BracketMatch>,
    champion: Option<usize>,
    next_match_id: BracketMatchId,
    /// Bracket matches are played with power-ups.
    custom: bool,
}

impl Tournament {
    pub fn new(id: TournamentId, name: impl Into<String>, capacity: usize) -> Self {
        Tournament {
            id,
            name: name.into(),
            status: TournamentStatus::Created,
            round: 0,
            capacity,
            competitors: Vec::new(),
            eliminated: Vec::new(),
            matches: Vec::new(),
            champion: None,
            next_match_id: 1,
            custom: false,
        }
    }

    pub fn id(&self) -> TournamentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> TournamentStatus {
        self.status
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn is_custom(&self) -> bool {
        self.custom
    }

    pub fn set_custom(&mut self, custom: bool) {
        self.custom = custom;
    }

    pub fn is_full(&self) -> bool {
        self.competitors.len() >= self.capacity
    }

    pub fn competitors(&self) -> &[Competitor] {
        &self.competitors
    }

    pub fn competitor(&self, index: usize) -> Option<&Competitor> {
        self.competitors.get(index)
    }

    pub fn bracket_match(&self, id: BracketMatchId) -> Option<&BracketMatch> {
        self.matches.iter().find(|m| m.id == id)
    }

    pub fn champion(&self) -> Option<&Competitor> {
        self.champion.and_then(|index| self.competitors.get(index))
    }

    /// Adds a competitor while the tournament is still open.
    pub fn register(&mut self, competitor: Competitor) -> Result<usize, ArenaError> {
        if self.status != TournamentStatus::Created {
            return Err(ArenaError::rejected("Tournament already started"));
        }
        if self.is_full() {
            return Err(ArenaError::rejected("Tournament is full"));
        }
        if let Some(client_id) = competitor.client_id() {
            if self.position_of(client_id).is_some() {
                return Err(ArenaError::rejected("Already registered for this tournament"));
            }
        }

        debug!("Tournament {}: {} registered", self.id, competitor.name());
        self.competitors.push(competitor);
        self.eliminated.push(false);
        Ok(self.competitors.len() - 1)
    }

    /// Withdraws a human before the start. Once the bracket runs,
    /// departures are settled through their matches.
    pub fn unregister(&mut self, client_id: ClientId) -> bool {
        if self.status != TournamentStatus::Created {
            return false;
        }
        match self.position_of(client_id) {
            Some(index) => {
                self.competitors.remove(index);
                self.eliminated.remove(index);
                true
            }
            None => false,
        }
    }

    fn position_of(&self, client_id: ClientId) -> Option<usize> {
        self.competitors
            .iter()
            .position(|c| c.client_id() == Some(client_id))
    }

    /// Replaces a human competitor by a bot that keeps their name.
    pub fn substitute(&mut self, index: usize, difficulty: Difficulty) -> Option<&Competitor> {
        let competitor = self.competitors.get_mut(index)?;
        if let Competitor::Human { name, .. } = competitor {
            info!("Tournament {}: bot takes over for {}", self.id, name);
            *competitor = Competitor::Bot {
                name: name.clone(),
                difficulty,
            };
        }
        Some(competitor)
    }

    /// Seeds round one in registration order. Returns the pairings that
    /// need playing; byes are already settled.
    pub fn start(&mut self) -> Result<Vec<BracketMatch>, ArenaError> {
        if self.status != TournamentStatus::Created {
            return Err(ArenaError::state("tournament already started"));
        }
        if self.competitors.len() < 2 {
            return Err(ArenaError::rejected("Tournament needs at least 2 players"));
        }

        self.status = TournamentStatus::Active;
        info!(
            "Tournament {} ({}) started with {} players",
            self.id,
            self.name,
            self.competitors.len()
        );
        let entrants: Vec<usize> = (0..self.competitors.len()).collect();
        Ok(self.pair_round(entrants))
    }

    fn pair_round(&mut self, entrants: Vec<usize>) -> Vec<BracketMatch> {
        self.round += 1;
        let mut playable = Vec::new();

        for pair in entrants.chunks(2) {
            let id = self.next_match_id;
            self.next_match_id += 1;

            let bracket_match = match *pair {
                [a, b] => BracketMatch {
                    id,
                    round: self.round,
                    a,
                    b: Some(b),
                    winner: None,
                    score: None,
                },
                [a] => {
                    debug!(
                        "Tournament {}: {} gets a bye in round {}",
                        self.id, self.competitors[a].name(), self.round
                    );
                    BracketMatch {
                        id,
                        round: self.round,
                        a,
                        b: None,
                        winner: Some(a),
                        score: None,
                    }
                }
                _ => continue,
            };

            if !bracket_match.is_bye() {
                playable.push(bracket_match.clone());
            }
            self.matches.push(bracket_match);
        }
        playable
    }

    /// Records the outcome of an open pairing. `winner_side` is 0 for `a`
    /// and 1 for `b`.
    pub fn record_result(
        &mut self,
        match_id: BracketMatchId,
        winner_side: usize,
        score: (u32, u32),
    ) -> Result<RoundProgress, ArenaError> {
        if self.status != TournamentStatus::Active {
            return Err(ArenaError::state(format!("tournament {} is not running", self.id)));
        }
        let tournament_id = self.id;
        let bracket_match = self
            .matches
            .iter_mut()
            .find(|m| m.id == match_id)
            .ok_or(ArenaError::NotFound {
                kind: "bracket match",
                id: match_id,
            })?;
        if bracket_match.winner.is_some() {
            return Err(ArenaError::state(format!(
                "bracket match {} already decided",
                match_id
            )));
        }
        let (winner, loser) = match (winner_side, bracket_match.b) {
            (0, Some(b)) => (bracket_match.a, b),
            (1, Some(b)) => (b, bracket_match.a),
            _ => {
                return Err(ArenaError::state(format!(
                    "bracket match {} has no side {}",
                    match_id, winner_side
                )))
            }
        };

        bracket_match.winner = Some(winner);
        bracket_match.score = Some(score);
        self.eliminated[loser] = true;
        info!(
            "Tournament {}: {} beat {} {}-{}",
            tournament_id,
            self.competitors[winner].name(),
            self.competitors[loser].name(),
            score.0,
            score.1
        );

        Ok(self.advance())
    }

    fn advance(&mut self) -> RoundProgress {
        let round = self.round;
        let mut winners = Vec::new();
        for bracket_match in self.matches.iter().filter(|m| m.round == round) {
            match bracket_match.winner {
                Some(winner) => winners.push(winner),
                None => return RoundProgress::Pending,
            }
        }

        if let [champion] = winners[..] {
            self.status = TournamentStatus::Completed;
            self.champion = Some(champion);
            let name = self.competitors[champion].name().to_string();
            info!("Tournament {} won by {}", self.id, name);
            return RoundProgress::Completed { champion: name };
        }

        debug!("Tournament {}: round {} closed", self.id, round);
        RoundProgress::NextRound(self.pair_round(winners))
    }

    pub fn remaining_players(&self) -> usize {
        self.eliminated.iter().filter(|out| !**out).count()
    }

    pub fn total_players(&self) -> usize {
        self.competitors.len()
    }

    pub fn standing(&self) -> TournamentStanding {
        TournamentStanding {
            remaining: self.remaining_players(),
            total: self.total_players(),
        }
    }

    /// Every human that registered, eliminated or not.
    pub fn humans(&self) -> Vec<ClientId> {
        self.competitors.iter().filter_map(Competitor::client_id).collect()
    }

    pub fn update_message(&self) -> ServerMessage {
        ServerMessage::TournamentUpdate {
            tournament_id: self.id,
            name: self.name.clone(),
            status: self.status,
            round: self.round,
            remaining_players: self.remaining_players(),
            total_players: self.total_players(),
            champion: self.champion().map(|c| c.name().to_string()),
        }
    }
}

/// Outcome of a quick-tournament registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuickJoin {
    pub tournament_id: TournamentId,
    pub player_count: usize,
    /// The tournament reached its size and is ready to start.
    pub full: bool,
}

/// Owns every tournament and the mapping from running matches to the
/// bracket pairings they decide.
#[derive(Debug)]
pub struct TournamentManager {
    tournaments: HashMap<TournamentId, Tournament>,
    matches: HashMap<MatchId, (TournamentId, BracketMatchId)>,
    open_quick: Option<TournamentId>,
    quick_size: usize,
    next_id: TournamentId,
}

impl TournamentManager {
    pub fn new(quick_size: usize) -> Self {
        TournamentManager {
            tournaments: HashMap::new(),
            matches: HashMap::new(),
            open_quick: None,
            quick_size,
            next_id: 1,
        }
    }

    pub fn create(&mut self, name: impl Into<String>, capacity: usize) -> TournamentId {
        let id = self.next_id;
        self.next_id += 1;
        self.tournaments.insert(id, Tournament::new(id, name, capacity));
        id
    }

    /// Registers a human into the open quick tournament, opening a new one
    /// if needed.
    pub fn join_quick(&mut self, client_id: ClientId, alias: &str) -> Result<QuickJoin, ArenaError> {
        let tournament_id = match self.open_quick.filter(|id| self.tournaments.contains_key(id)) {
            Some(id) => id,
            None => {
                let id = self.next_id;
                let id = self.create(format!("Quick Tournament #{}", id), self.quick_size);
                self.open_quick = Some(id);
                id
            }
        };

        let tournament = self
            .tournaments
            .get_mut(&tournament_id)
            .ok_or(ArenaError::NotFound {
                kind: "tournament",
                id: tournament_id,
            })?;
        tournament.register(Competitor::Human {
            client_id,
            name: alias.to_string(),
        })?;

        let full = tournament.is_full();
        if full {
            self.open_quick = None;
        }
        Ok(QuickJoin {
            tournament_id,
            player_count: tournament.total_players(),
            full,
        })
    }

    pub fn get(&self, id: TournamentId) -> Option<&Tournament> {
        self.tournaments.get(&id)
    }

    pub fn get_mut(&mut self, id: TournamentId) -> Option<&mut Tournament> {
        self.tournaments.get_mut(&id)
    }

    pub fn bind_match(&mut self, match_id: MatchId, tournament_id: TournamentId, bracket_match: BracketMatchId) {
        self.matches.insert(match_id, (tournament_id, bracket_match));
    }

    pub fn binding(&self, match_id: MatchId) -> Option<(TournamentId, BracketMatchId)> {
        self.matches.get(&match_id).copied()
    }

    /// Feeds a finished engine match into its bracket. The binding is
    /// consumed, so a second report for the same match is refused.
    pub fn record(&mut self, result: &MatchResult) -> Result<(TournamentId, RoundProgress), ArenaError> {
        let (tournament_id, bracket_match) =
            self.matches
                .remove(&result.match_id)
                .ok_or(ArenaError::NotFound {
                    kind: "tournament match",
                    id: result.match_id,
                })?;
        let winner = result.winner.ok_or_else(|| {
            ArenaError::state(format!("match {} ended without a winner", result.match_id))
        })?;
        let score = (
            result.scores.first().copied().unwrap_or(0),
            result.scores.get(1).copied().unwrap_or(0),
        );

        let tournament = self
            .tournaments
            .get_mut(&tournament_id)
            .ok_or(ArenaError::NotFound {
                kind: "tournament",
                id: tournament_id,
            })?;
        let progress = tournament.record_result(bracket_match, winner, score)?;
        Ok((tournament_id, progress))
    }

    pub fn standing(&self, tournament_id: TournamentId) -> Option<TournamentStanding> {
        self.tournaments.get(&tournament_id).map(Tournament::standing)
    }

    /// Withdraws a departing client from every tournament that has not
    /// started yet. Returns the tournaments that lost a player.
    pub fn remove_client(&mut self, client_id: ClientId) -> Vec<TournamentId> {
        let affected: Vec<TournamentId> = self
            .tournaments
            .values_mut()
            .filter_map(|t| t.unregister(client_id).then_some(t.id()))
            .collect();

        for id in &affected {
            let empty = self
                .tournaments
                .get(id)
                .map_or(false, |t| t.total_players() == 0);
            if empty {
                debug!("Tournament {} closed, no players left", id);
                self.remove(*id);
            }
        }
        affected
    }

    pub fn remove(&mut self, tournament_id: TournamentId) -> Option<Tournament> {
        if self.open_quick == Some(tournament_id) {
            self.open_quick = None;
        }
        self.matches.retain(|_, (tid, _)| *tid != tournament_id);
        self.tournaments.remove(&tournament_id)
    }

    pub fn len(&self) -> usize {
        self.tournaments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tournaments.is_empty()
    }
}
