//! Match engine: one tokio task per running match.
//!
//! A [`MatchRoom`] exclusively owns the simulation of one match and the
//! seats playing it. [`spawn_match`] runs the room on its own fixed-rate
//! tick loop and hands back a [`MatchHandle`] for routing input and
//! disconnects into it.
//!
//! When the simulation reaches a terminal state the task, in this order,
//! stops ticking, releases every registry binding to the match, runs the
//! completion hook exactly once and sends one `gameOver` to each human
//! still seated.

use crate::client_manager::{ClientHandle, ClientId, ClientManager, MatchId};
use crate::config::ServerConfig;
use crate::error::ArenaError;
use log::{debug, info, warn};
use shared::arena::ArenaEvent;
use shared::classic::StepEvent;
use shared::protocol::{role_name, GameOverReport};
use shared::{
    AiStrategy, ClassicMatch, Difficulty, LaneView, MatchConfig, PaddleControl, PaddleInput,
    RoyaleMatch, RoyaleSettings, ServerMessage, StateSnapshot, MAX_POWER_UPS,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Longest simulated step; slower ticks are clamped to this.
const MAX_DELTA: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub enum MatchKind {
    Classic { custom: bool },
    BattleRoyale(RoyaleSettings),
}

pub enum Controller {
    Human(ClientHandle),
    Bot(Box<dyn AiStrategy>),
}

pub struct Seat {
    pub name: String,
    pub controller: Controller,
}

impl Seat {
    pub fn human(name: impl Into<String>, handle: ClientHandle) -> Self {
        Seat {
            name: name.into(),
            controller: Controller::Human(handle),
        }
    }

    pub fn bot(difficulty: Difficulty) -> Self {
        Self::named_bot(difficulty.display_name(), difficulty)
    }

    pub fn named_bot(name: impl Into<String>, difficulty: Difficulty) -> Self {
        Seat {
            name: name.into(),
            controller: Controller::Bot(difficulty.strategy()),
        }
    }

    pub fn client_id(&self) -> Option<ClientId> {
        match &self.controller {
            Controller::Human(handle) => Some(handle.id()),
            Controller::Bot(_) => None,
        }
    }
}

pub struct MatchSetup {
    pub kind: MatchKind,
    pub seats: Vec<Seat>,
    pub score_target: u32,
    pub is_tournament: bool,
    pub seed: u64,
    pub tick_duration: Duration,
    pub ai_refresh_ticks: u32,
}

impl MatchSetup {
    pub fn classic(seats: Vec<Seat>, custom: bool, config: &ServerConfig) -> Self {
        Self::with_kind(MatchKind::Classic { custom }, seats, config)
    }

    pub fn battle_royale(seats: Vec<Seat>, settings: RoyaleSettings, config: &ServerConfig) -> Self {
        Self::with_kind(MatchKind::BattleRoyale(settings), seats, config)
    }

    fn with_kind(kind: MatchKind, seats: Vec<Seat>, config: &ServerConfig) -> Self {
        MatchSetup {
            kind,
            seats,
            score_target: config.score_target,
            is_tournament: false,
            seed: rand::random(),
            tick_duration: config.tick_duration(),
            ai_refresh_ticks: config.ai_refresh_ticks,
        }
    }

    pub fn in_tournament(mut self) -> Self {
        self.is_tournament = true;
        self
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.seats.iter().filter_map(Seat::client_id).collect()
    }
}

/// Outcome handed to the completion hook.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub match_id: MatchId,
    /// Winning seat; `None` when the match was stopped.
    pub winner: Option<usize>,
    pub names: Vec<String>,
    /// Points in classic matches, remaining lives in battle royale.
    pub scores: Vec<u32>,
    pub forfeit: bool,
    pub is_battle_royale: bool,
}

impl MatchResult {
    pub fn winner_name(&self) -> Option<&str> {
        self.winner
            .and_then(|seat| self.names.get(seat))
            .map(String::as_str)
    }
}

/// Tournament counts after a match result has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TournamentStanding {
    pub remaining: usize,
    pub total: usize,
}

pub type CompletionHook = Box<dyn FnOnce(&MatchResult) -> Option<TournamentStanding> + Send>;

/// Validated input from a human seat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeatInput {
    pub keys: PaddleInput,
    pub slots: [bool; MAX_POWER_UPS],
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchCommand {
    Input { client_id: ClientId, input: SeatInput },
    Disconnect { client_id: ClientId },
    Stop,
}

enum Simulation {
    Classic(ClassicMatch),
    Royale(RoyaleMatch),
}

impl Simulation {
    fn tick(&self) -> u64 {
        match self {
            Simulation::Classic(game) => game.tick(),
            Simulation::Royale(arena) => arena.tick(),
        }
    }

    fn is_terminal(&self) -> bool {
        match self {
            Simulation::Classic(game) => game.is_terminal(),
            Simulation::Royale(arena) => arena.is_terminal(),
        }
    }

    fn winner(&self) -> Option<usize> {
        match self {
            Simulation::Classic(game) => game.winner(),
            Simulation::Royale(arena) => arena.winner(),
        }
    }

    fn set_control(&mut self, seat: usize, control: PaddleControl) {
        match self {
            Simulation::Classic(game) => game.set_control(seat, control),
            Simulation::Royale(arena) => arena.set_control(seat, control),
        }
    }

    fn select_power_up(&mut self, seat: usize, slot: usize) -> bool {
        match self {
            Simulation::Classic(game) => game.select_power_up(seat, slot),
            Simulation::Royale(_) => false,
        }
    }

    fn lane_view(&self, seat: usize) -> Option<LaneView> {
        match self {
            Simulation::Classic(game) => Some(game.lane_view(seat)),
            Simulation::Royale(arena) => arena.lane_view(seat),
        }
    }

    fn scores(&self) -> Vec<u32> {
        match self {
            Simulation::Classic(game) => game.scores().to_vec(),
            Simulation::Royale(arena) => arena.contenders().iter().map(|c| c.lives).collect(),
        }
    }

    fn snapshot(&self) -> StateSnapshot {
        match self {
            Simulation::Classic(game) => game.snapshot(),
            Simulation::Royale(arena) => arena.snapshot(),
        }
    }
}

pub struct MatchRoom {
    id: MatchId,
    seats: Vec<Seat>,
    /// Humans that disconnected; they receive nothing further.
    departed: Vec<bool>,
    sim: Simulation,
    custom: bool,
    is_tournament: bool,
    ai_refresh_ticks: u64,
    forfeit: bool,
    stopped: bool,
}

impl MatchRoom {
    pub fn new(id: MatchId, setup: MatchSetup) -> Result<Self, ArenaError> {
        let names: Vec<String> = setup.seats.iter().map(|s| s.name.clone()).collect();

        let (sim, custom) = match &setup.kind {
            MatchKind::Classic { custom } => {
                let [left, right]: [String; 2] = names.try_into().map_err(|names: Vec<String>| {
                    ArenaError::state(format!("classic match needs 2 players, got {}", names.len()))
                })?;
                let config = MatchConfig {
                    score_target: setup.score_target,
                    custom: *custom,
                };
                (
                    Simulation::Classic(ClassicMatch::new([left, right], config, setup.seed)),
                    *custom,
                )
            }
            MatchKind::BattleRoyale(settings) => {
                let count = names.len();
                let arena = RoyaleMatch::new(names, settings.clone(), setup.seed).ok_or_else(|| {
                    ArenaError::state(format!("no arena shape for {} players", count))
                })?;
                (Simulation::Royale(arena), settings.power_ups)
            }
        };

        let mut seats = setup.seats;
        for (seat, occupant) in seats.iter_mut().enumerate() {
            if let (Controller::Bot(strategy), Some(view)) = (&mut occupant.controller, sim.lane_view(seat)) {
                strategy.assign_lane(view.span);
            }
        }

        Ok(MatchRoom {
            id,
            departed: vec![false; seats.len()],
            seats,
            sim,
            custom,
            is_tournament: setup.is_tournament,
            ai_refresh_ticks: setup.ai_refresh_ticks.max(1) as u64,
            forfeit: false,
            stopped: false,
        })
    }

    pub fn id(&self) -> MatchId {
        self.id
    }

    pub fn is_battle_royale(&self) -> bool {
        matches!(self.sim, Simulation::Royale(_))
    }

    pub fn is_over(&self) -> bool {
        self.stopped || self.sim.is_terminal()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.sim.snapshot()
    }

    fn seat_of(&self, client_id: ClientId) -> Option<usize> {
        self.seats
            .iter()
            .position(|seat| seat.client_id() == Some(client_id))
    }

    /// Humans still seated, with their seat index.
    fn present_humans(&self) -> impl Iterator<Item = (usize, &ClientHandle)> {
        self.seats
            .iter()
            .enumerate()
            .filter(|(seat, _)| !self.departed[*seat])
            .filter_map(|(seat, s)| match &s.controller {
                Controller::Human(handle) => Some((seat, handle)),
                Controller::Bot(_) => None,
            })
    }

    pub fn announce_start(&self) {
        let player1_name = self.seats.first().map(|s| s.name.clone()).unwrap_or_default();
        let player2_name = self.seats.get(1).map(|s| s.name.clone()).unwrap_or_default();
        let players = if self.is_battle_royale() {
            self.seats.iter().map(|s| s.name.clone()).collect()
        } else {
            Vec::new()
        };

        for (seat, handle) in self.present_humans() {
            handle.send(ServerMessage::GameStart {
                player_role: role_name(seat),
                player1_name: player1_name.clone(),
                player2_name: player2_name.clone(),
                is_custom: self.custom,
                players: players.clone(),
            });
        }
    }

    /// Applies a human's input. Input for an ended match or from a client
    /// without a seat is dropped.
    pub fn apply_input(&mut self, client_id: ClientId, input: SeatInput) {
        if self.is_over() {
            return;
        }
        let Some(seat) = self.seat_of(client_id) else {
            debug!("Match {}: input from unseated client {}", self.id, client_id);
            return;
        };
        self.sim.set_control(seat, PaddleControl::Keys(input.keys));
        for (slot, selected) in input.slots.iter().enumerate() {
            if *selected {
                self.sim.select_power_up(seat, slot);
            }
        }
    }

    /// Runs AI, advances the simulation and streams the new state.
    pub fn step(&mut self, dt_ms: f32) {
        if self.is_over() {
            return;
        }

        let refresh = self.sim.tick() % self.ai_refresh_ticks == 0;
        for seat in 0..self.seats.len() {
            let view = self.sim.lane_view(seat);
            let Controller::Bot(strategy) = &mut self.seats[seat].controller else {
                continue;
            };
            let decision = match (refresh, view) {
                (true, Some(view)) => strategy.refresh_and_decide(&view),
                _ => strategy.decide(),
            };
            self.sim.set_control(seat, PaddleControl::Target(decision.target));
            if let Some(slot) = decision.activate {
                self.sim.select_power_up(seat, slot);
            }
        }

        self.advance(dt_ms);

        let state = ServerMessage::GameState {
            data: self.sim.snapshot(),
        };
        for (_, handle) in self.present_humans() {
            handle.send(state.clone());
        }
    }

    fn advance(&mut self, dt_ms: f32) {
        let id = self.id;
        match &mut self.sim {
            Simulation::Classic(game) => {
                for event in game.advance(dt_ms) {
                    match event {
                        StepEvent::Scored { scorer, .. } => {
                            debug!("Match {}: seat {} scored, {:?}", id, scorer, game.scores())
                        }
                        StepEvent::PowerUpActivated { seat, kind } => {
                            debug!("Match {}: seat {} fired {:?}", id, seat, kind)
                        }
                        StepEvent::Ended { winner } => info!("Match {}: seat {} wins", id, winner),
                        StepEvent::PaddleHit { .. } => {}
                    }
                }
            }
            Simulation::Royale(arena) => {
                for event in arena.advance(dt_ms) {
                    match event {
                        ArenaEvent::Eliminated { seat } => {
                            info!("Match {}: seat {} eliminated", id, seat)
                        }
                        ArenaEvent::Ended { winner } => {
                            info!("Match {}: battle royale won by {:?}", id, winner)
                        }
                        other => debug!("Match {}: {:?}", id, other),
                    }
                }
            }
        }
    }

    /// A human left mid-match: forfeit in a duel, elimination in battle
    /// royale. Returns false if the client had no seat.
    pub fn disconnect(&mut self, client_id: ClientId) -> bool {
        let Some(seat) = self.seat_of(client_id) else {
            return false;
        };
        self.departed[seat] = true;
        if self.is_over() {
            return true;
        }

        info!("Match {}: {} left", self.id, self.seats[seat].name);
        match &mut self.sim {
            Simulation::Classic(game) => {
                game.forfeit(seat);
            }
            Simulation::Royale(arena) => {
                arena.eliminate(seat);
            }
        }
        if self.sim.is_terminal() {
            self.forfeit = true;
        } else if self.present_humans().next().is_none() {
            info!("Match {}: no humans left, ending", self.id);
            self.stopped = true;
        }
        true
    }

    /// Ends the match without a winner.
    pub fn stop(&mut self) {
        if !self.is_over() {
            info!("Match {} stopped", self.id);
            self.stopped = true;
        }
    }

    pub fn result(&self) -> MatchResult {
        MatchResult {
            match_id: self.id,
            winner: if self.stopped { None } else { self.sim.winner() },
            names: self.seats.iter().map(|s| s.name.clone()).collect(),
            scores: self.sim.scores(),
            forfeit: self.forfeit,
            is_battle_royale: self.is_battle_royale(),
        }
    }

    /// Sends the final `gameOver` to every human still seated.
    pub fn finish(&self, result: &MatchResult, standing: Option<TournamentStanding>) {
        for (seat, handle) in self.present_humans() {
            handle.send(ServerMessage::GameOver(self.report_for(seat, result, standing)));
        }
    }

    fn report_for(
        &self,
        seat: usize,
        result: &MatchResult,
        standing: Option<TournamentStanding>,
    ) -> GameOverReport {
        let (lives1, lives2) = if result.is_battle_royale {
            let winner_lives = result
                .winner
                .and_then(|w| result.scores.get(w).copied())
                .unwrap_or(0);
            (winner_lives, result.scores.get(seat).copied().unwrap_or(0))
        } else {
            (
                result.scores.first().copied().unwrap_or(0),
                result.scores.get(1).copied().unwrap_or(0),
            )
        };

        let standing = standing.filter(|_| self.is_tournament);
        let still_playing = result.winner == Some(seat)
            && standing.map_or(false, |s| s.remaining > 1);

        GameOverReport {
            winner: result.winner_name().map(str::to_string),
            lives1,
            lives2,
            is_tournament: self.is_tournament,
            is_battle_royale: result.is_battle_royale,
            should_disconnect: !still_playing,
            forfeit: result.forfeit.then_some(true),
            tournament_remaining_players: standing.map(|s| s.remaining),
            tournament_total_players: standing.map(|s| s.total),
        }
    }
}

/// Command side of a running match.
pub struct MatchHandle {
    pub id: MatchId,
    commands: mpsc::UnboundedSender<MatchCommand>,
    task: JoinHandle<()>,
}

impl MatchHandle {
    pub fn send(&self, command: MatchCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the match task to complete.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("Match {} task failed: {}", self.id, e);
        }
    }
}

/// Starts a match on its own task.
pub fn spawn_match(
    id: MatchId,
    setup: MatchSetup,
    registry: Arc<RwLock<ClientManager>>,
    hook: CompletionHook,
) -> Result<MatchHandle, ArenaError> {
    let tick_duration = setup.tick_duration;
    let room = MatchRoom::new(id, setup)?;
    let (commands, receiver) = mpsc::unbounded_channel();

    let task = tokio::spawn(run_match(room, receiver, registry, hook, tick_duration));
    Ok(MatchHandle { id, commands, task })
}

async fn run_match(
    mut room: MatchRoom,
    mut commands: mpsc::UnboundedReceiver<MatchCommand>,
    registry: Arc<RwLock<ClientManager>>,
    hook: CompletionHook,
    tick_duration: Duration,
) {
    info!("Match {} started", room.id());
    room.announce_start();

    let mut ticker = interval(tick_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately
    ticker.tick().await;
    let mut last_tick = Instant::now();

    while !room.is_over() {
        tokio::select! {
            command = commands.recv() => match command {
                Some(MatchCommand::Input { client_id, input }) => room.apply_input(client_id, input),
                Some(MatchCommand::Disconnect { client_id }) => {
                    room.disconnect(client_id);
                }
                Some(MatchCommand::Stop) | None => room.stop(),
            },
            _ = ticker.tick() => {
                let now = Instant::now();
                let mut delta = now.duration_since(last_tick);
                last_tick = now;
                if delta > MAX_DELTA {
                    debug!("Match {}: capping {:?} step to {:?}", room.id(), delta, MAX_DELTA);
                    delta = MAX_DELTA;
                }
                room.step(delta.as_secs_f32() * 1000.0);
            }
        }
    }

    registry.write().await.release_match(room.id());
    let result = room.result();
    let standing = hook(&result);
    room.finish(&result, standing);
    info!(
        "Match {} over, winner {:?}",
        room.id(),
        result.winner_name().unwrap_or("none")
    );
}
