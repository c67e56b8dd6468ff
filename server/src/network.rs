//! Server network layer handling WebSocket connections and event routing
//!
//! Every connection gets a reader task and a writer task. Readers forward
//! text frames into one event loop owned by [`Server`]; writers drain the
//! client's outbound channel. The event loop owns the matchmaking queues and
//! the lobbies, so queue pairing, lobby changes and close handling never
//! race each other. Running matches live on their own tasks and report back
//! through the same event channel when they end.

use crate::client_manager::{ClientHandle, ClientId, ClientManager, MatchId, Outbound};
use crate::config::ServerConfig;
use crate::error::ArenaError;
use crate::game::{
    spawn_match, CompletionHook, MatchCommand, MatchHandle, MatchResult, MatchSetup, Seat, SeatInput,
};
use crate::lobby::{LobbyId, LobbyLaunch, LobbyManager, MemberKind};
use crate::matchmaking::{ai_match_setup, pair_setup, Matchmaker, QueueEntry, QueueOutcome};
use crate::tournament::{
    BracketMatch, BracketMatchId, Competitor, RoundProgress, TournamentId, TournamentManager,
};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::protocol::{parse_client_message, InputDirection, LobbyMode, QueueMode, TournamentStatus};
use shared::{ClientMessage, Difficulty, PaddleInput, RoyaleSettings, ServerMessage};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// Difficulty of bots that take over for absent tournament players.
const SUBSTITUTE_DIFFICULTY: Difficulty = Difficulty::Medium;

/// Events flowing into the main server loop
#[derive(Debug)]
pub enum ServerEvent {
    MessageReceived {
        client_id: ClientId,
        text: String,
    },
    ClientClosed {
        client_id: ClientId,
    },
    /// A match task finished. Tournament matches carry the bracket progress
    /// their result produced.
    MatchEnded {
        match_id: MatchId,
        bracket: Option<(TournamentId, RoundProgress)>,
    },
    Shutdown,
}

/// Main server coordinating connections, queues, lobbies and matches
pub struct Server {
    config: ServerConfig,
    clients: Arc<RwLock<ClientManager>>,
    tournaments: Arc<Mutex<TournamentManager>>,
    matchmaker: Matchmaker,
    lobbies: LobbyManager,
    matches: HashMap<MatchId, MatchHandle>,
    next_match_id: MatchId,

    event_tx: mpsc::UnboundedSender<ServerEvent>,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Server {
            clients: Arc::new(RwLock::new(ClientManager::new(config.max_clients))),
            tournaments: Arc::new(Mutex::new(TournamentManager::new(config.tournament_size))),
            matchmaker: Matchmaker::new(),
            lobbies: LobbyManager::new(),
            matches: HashMap::new(),
            next_match_id: 1,
            config,
            event_tx,
            event_rx,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn event_sender(&self) -> mpsc::UnboundedSender<ServerEvent> {
        self.event_tx.clone()
    }

    pub fn clients(&self) -> Arc<RwLock<ClientManager>> {
        Arc::clone(&self.clients)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn queued(&self, mode: QueueMode) -> usize {
        self.matchmaker.queued(mode)
    }

    pub fn lobbies(&self) -> &LobbyManager {
        &self.lobbies
    }

    fn tournaments(&self) -> MutexGuard<'_, TournamentManager> {
        self.tournaments.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tournament_update(&self, tournament_id: TournamentId) -> Option<ServerMessage> {
        self.tournaments().get(tournament_id).map(|t| t.update_message())
    }

    /// Registers an in-process client, bypassing the socket layer.
    pub async fn connect_client(
        &self,
        alias: Option<&str>,
    ) -> Option<(ClientHandle, mpsc::UnboundedReceiver<Outbound>)> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = self
            .clients
            .write()
            .await
            .add_client(None, sender, alias.map(str::to_string))?;
        Some((handle, receiver))
    }

    /// Waits for the next queued event.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.event_rx.recv().await
    }

    /// Handles every event already queued without waiting for more.
    pub async fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.event_rx.try_recv() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Processes one event. Returns false once the server should stop.
    pub async fn handle_event(&mut self, event: ServerEvent) -> bool {
        match event {
            ServerEvent::MessageReceived { client_id, text } => {
                self.handle_message(client_id, &text).await;
            }
            ServerEvent::ClientClosed { client_id } => {
                self.handle_close(client_id).await;
            }
            ServerEvent::MatchEnded { match_id, bracket } => {
                // Joining guarantees the final gameOver frames are queued
                // before anything of a following round.
                if let Some(handle) = self.matches.remove(&match_id) {
                    handle.join().await;
                }
                if let Some((tournament_id, progress)) = bracket {
                    self.on_bracket_progress(tournament_id, progress).await;
                }
            }
            ServerEvent::Shutdown => {
                info!("Server shutting down");
                return false;
            }
        }
        true
    }

    async fn handle_message(&mut self, client_id: ClientId, text: &str) {
        let Some(handle) = self.clients.read().await.handle(client_id) else {
            debug!("Dropping message from unknown client {}", client_id);
            return;
        };

        let result = match parse_client_message(text) {
            Ok(message) => self.dispatch(&handle, message).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            if e.is_reportable() {
                debug!("Client {}: {}", client_id, e);
                handle.send(ServerMessage::Error {
                    reason: e.to_string(),
                });
            } else {
                debug!("Client {}: ignored, {}", client_id, e);
            }
        }
    }

    async fn dispatch(&mut self, handle: &ClientHandle, message: ClientMessage) -> Result<(), ArenaError> {
        let client_id = handle.id();
        match message {
            ClientMessage::JoinQueue { mode } => {
                self.ensure_available(client_id).await?;
                let entry = QueueEntry::new(handle.clone(), self.alias(client_id).await);
                match self.matchmaker.add_to_queue(mode, entry) {
                    QueueOutcome::Waiting => {
                        debug!("Client {} waiting in {:?} queue", client_id, mode);
                        handle.send(ServerMessage::Waiting { mode });
                    }
                    QueueOutcome::Paired { player1, player2 } => {
                        self.start_pair(player1, player2, mode).await?;
                    }
                }
            }
            ClientMessage::LeaveQueue => {
                self.matchmaker.remove_from_queue(client_id);
            }
            ClientMessage::CreateAiMatch { difficulty, is_custom } => {
                self.ensure_available(client_id).await?;
                self.matchmaker.remove_from_queue(client_id);
                let entry = QueueEntry::new(handle.clone(), self.alias(client_id).await);
                let setup = ai_match_setup(entry, difficulty, is_custom, &self.config);
                self.start_match(setup, None).await?;
            }
            ClientMessage::JoinTournament { alias } => {
                self.clients.write().await.set_alias(client_id, &alias);
                self.matchmaker.remove_from_queue(client_id);
                let name = self.alias(client_id).await;
                let joined = self.tournaments().join_quick(client_id, &name)?;
                info!(
                    "{} joined tournament {} ({} players)",
                    name, joined.tournament_id, joined.player_count
                );

                self.broadcast_to_tournament(
                    joined.tournament_id,
                    ServerMessage::PlayerJoined {
                        player_count: joined.player_count,
                    },
                )
                .await;
                if joined.full {
                    self.start_tournament(joined.tournament_id).await?;
                }
            }
            ClientMessage::PlayerInput { direction } => {
                let keys = match direction {
                    InputDirection::Up => PaddleInput { up: true, down: false },
                    InputDirection::Down => PaddleInput { up: false, down: true },
                    InputDirection::Stop => PaddleInput::default(),
                };
                self.route_input(
                    client_id,
                    SeatInput {
                        keys,
                        ..SeatInput::default()
                    },
                )
                .await?;
            }
            ClientMessage::Input {
                up,
                down,
                slot1,
                slot2,
                slot3,
            } => {
                let input = SeatInput {
                    keys: PaddleInput { up, down },
                    slots: [slot1, slot2, slot3],
                };
                self.route_input(client_id, input).await?;
            }
            ClientMessage::CreateLobby { settings } => {
                let name = self.alias(client_id).await;
                let lobby_id = self.lobbies.create(handle.clone(), name, settings)?;
                self.broadcast_lobby(lobby_id);
            }
            ClientMessage::JoinLobby { lobby_id } => {
                let name = self.alias(client_id).await;
                self.lobbies.join(lobby_id, handle.clone(), name)?;
                self.broadcast_lobby(lobby_id);
            }
            ClientMessage::LeaveLobby => {
                let outcome = self.lobbies.leave(client_id)?;
                if !outcome.closed {
                    self.broadcast_lobby(outcome.lobby_id);
                }
            }
            ClientMessage::AddBot { difficulty } => {
                let lobby_id = self.lobbies.add_bot(client_id, difficulty)?;
                self.broadcast_lobby(lobby_id);
            }
            ClientMessage::RemoveBot { player_id } => {
                let lobby_id = self.lobbies.remove_bot(client_id, player_id)?;
                self.broadcast_lobby(lobby_id);
            }
            ClientMessage::SetReady { ready } => {
                let lobby_id = self.lobbies.set_ready(client_id, ready)?;
                self.broadcast_lobby(lobby_id);
            }
            ClientMessage::StartLobby => {
                let launch = self.lobbies.start(client_id)?;
                self.launch_lobby(launch).await?;
            }
            ClientMessage::Ping => {
                handle.send(ServerMessage::Pong);
            }
            ClientMessage::Pong => {}
        }
        Ok(())
    }

    async fn alias(&self, client_id: ClientId) -> String {
        self.clients
            .read()
            .await
            .alias(client_id)
            .unwrap_or_else(|| format!("Player {}", client_id))
    }

    async fn ensure_available(&self, client_id: ClientId) -> Result<(), ArenaError> {
        if self.clients.read().await.is_available(client_id) {
            Ok(())
        } else {
            Err(ArenaError::rejected("Already in a match"))
        }
    }

    /// Forwards input to the match the client is bound to.
    async fn route_input(&self, client_id: ClientId, input: SeatInput) -> Result<(), ArenaError> {
        let match_id = self
            .clients
            .read()
            .await
            .active_match(client_id)
            .ok_or_else(|| ArenaError::state(format!("client {} is not in a match", client_id)))?;
        let handle = self
            .matches
            .get(&match_id)
            .ok_or_else(|| ArenaError::state(format!("match {} already ended", match_id)))?;
        handle.send(MatchCommand::Input { client_id, input });
        Ok(())
    }

    /// Starts a queue pairing, or puts the surviving entry back if its
    /// partner became unavailable meanwhile.
    async fn start_pair(&mut self, player1: QueueEntry, player2: QueueEntry, mode: QueueMode) -> Result<(), ArenaError> {
        let (first_ok, second_ok) = {
            let clients = self.clients.read().await;
            (clients.is_available(player1.id()), clients.is_available(player2.id()))
        };

        match (first_ok, second_ok) {
            (true, true) => {
                info!("Pairing {} and {} ({:?})", player1.name, player2.name, mode);
                let setup = pair_setup(player1, player2, mode, &self.config);
                self.start_match(setup, None).await?;
            }
            (true, false) => self.matchmaker.requeue_front(mode, player1),
            (false, true) => {
                player2.handle.send(ServerMessage::Waiting { mode });
                self.matchmaker.requeue_front(mode, player2);
            }
            (false, false) => {}
        }
        Ok(())
    }

    /// Binds every human of `setup` and spawns the match task.
    async fn start_match(
        &mut self,
        setup: MatchSetup,
        bracket: Option<(TournamentId, BracketMatchId)>,
    ) -> Result<MatchId, ArenaError> {
        let match_id = self.next_match_id;
        self.next_match_id += 1;

        {
            let mut clients = self.clients.write().await;
            for client_id in setup.client_ids() {
                if !clients.bind_match(client_id, match_id) {
                    clients.release_match(match_id);
                    return Err(ArenaError::ParticipantLoss(client_id));
                }
            }
        }

        let hook = match bracket {
            Some((tournament_id, bracket_match)) => {
                self.tournaments()
                    .bind_match(match_id, tournament_id, bracket_match);
                self.tournament_hook()
            }
            None => self.plain_hook(),
        };

        match spawn_match(match_id, setup, Arc::clone(&self.clients), hook) {
            Ok(handle) => {
                self.matches.insert(match_id, handle);
                Ok(match_id)
            }
            Err(e) => {
                self.clients.write().await.release_match(match_id);
                Err(e)
            }
        }
    }

    fn plain_hook(&self) -> CompletionHook {
        let events = self.event_tx.clone();
        Box::new(move |result: &MatchResult| {
            let _ = events.send(ServerEvent::MatchEnded {
                match_id: result.match_id,
                bracket: None,
            });
            None
        })
    }

    /// Records the result in its bracket while the match task still holds
    /// the final report, so the `gameOver` carries the new standing.
    fn tournament_hook(&self) -> CompletionHook {
        let tournaments = Arc::clone(&self.tournaments);
        let events = self.event_tx.clone();
        Box::new(move |result: &MatchResult| {
            let (bracket, standing) = {
                let mut manager = tournaments.lock().unwrap_or_else(PoisonError::into_inner);
                match manager.record(result) {
                    Ok((tournament_id, progress)) => {
                        let standing = manager.standing(tournament_id);
                        (Some((tournament_id, progress)), standing)
                    }
                    Err(e) => {
                        warn!("Match {}: result not recorded, {}", result.match_id, e);
                        (None, None)
                    }
                }
            };
            let _ = events.send(ServerEvent::MatchEnded {
                match_id: result.match_id,
                bracket,
            });
            standing
        })
    }

    async fn start_tournament(&mut self, tournament_id: TournamentId) -> Result<(), ArenaError> {
        let open = {
            let mut manager = self.tournaments();
            let tournament = manager.get_mut(tournament_id).ok_or(ArenaError::NotFound {
                kind: "tournament",
                id: tournament_id,
            })?;
            tournament.start()?
        };
        self.run_bracket(tournament_id, open.into()).await;
        Ok(())
    }

    async fn on_bracket_progress(&mut self, tournament_id: TournamentId, progress: RoundProgress) {
        let open = match progress {
            RoundProgress::NextRound(matches) => matches.into(),
            RoundProgress::Pending | RoundProgress::Completed { .. } => VecDeque::new(),
        };
        self.run_bracket(tournament_id, open).await;
    }

    /// Launches open pairings until every one of them is either running or
    /// decided, then reports the standing. Pairings decided on the spot can
    /// open a new round, which is launched in the same pass.
    async fn run_bracket(&mut self, tournament_id: TournamentId, mut open: VecDeque<BracketMatch>) {
        while let Some(bracket_match) = open.pop_front() {
            match self.launch_bracket_match(tournament_id, &bracket_match).await {
                Ok(Some(RoundProgress::NextRound(next))) => open.extend(next),
                Ok(_) => {}
                Err(e) => warn!(
                    "Tournament {}: bracket match {} not launched, {}",
                    tournament_id, bracket_match.id, e
                ),
            }
        }

        let (update, humans, completed) = {
            let manager = self.tournaments();
            match manager.get(tournament_id) {
                Some(t) => (
                    t.update_message(),
                    t.humans(),
                    t.status() == TournamentStatus::Completed,
                ),
                None => return,
            }
        };
        self.send_to_clients(&humans, update).await;

        if completed {
            self.tournaments().remove(tournament_id);
        }
    }

    /// Starts one pairing. Returns the bracket progress when the pairing
    /// was decided without an engine match.
    async fn launch_bracket_match(
        &mut self,
        tournament_id: TournamentId,
        bracket_match: &BracketMatch,
    ) -> Result<Option<RoundProgress>, ArenaError> {
        let (first, second, custom) = {
            let manager = self.tournaments();
            let tournament = manager.get(tournament_id).ok_or(ArenaError::NotFound {
                kind: "tournament",
                id: tournament_id,
            })?;
            let side = |side: usize| {
                bracket_match
                    .side(side)
                    .and_then(|index| tournament.competitor(index))
                    .cloned()
            };
            (side(0), side(1), tournament.is_custom())
        };
        let (Some(first), Some(second)) = (first, second) else {
            return Err(ArenaError::state("pairing without two competitors"));
        };

        let seat_a = self.seat_for(tournament_id, bracket_match.a, first).await;
        let seat_b = match bracket_match.b {
            Some(index) => self.seat_for(tournament_id, index, second).await,
            None => None,
        };

        match (seat_a, seat_b) {
            (Some(a), Some(b)) if a.client_id().is_none() && b.client_id().is_none() => {
                let winner_side = usize::from(rand::random::<bool>());
                let loser_points = rand::random::<u32>() % self.config.score_target.max(1);
                let score = if winner_side == 0 {
                    (self.config.score_target, loser_points)
                } else {
                    (loser_points, self.config.score_target)
                };
                debug!(
                    "Tournament {}: {} vs {} settled without play",
                    tournament_id, a.name, b.name
                );
                self.record_decided(tournament_id, bracket_match.id, winner_side, score)
                    .map(Some)
            }
            (Some(a), Some(b)) => {
                let setup = MatchSetup::classic(vec![a, b], custom, &self.config).in_tournament();
                match self
                    .start_match(setup, Some((tournament_id, bracket_match.id)))
                    .await
                {
                    Ok(match_id) => {
                        debug!(
                            "Tournament {}: bracket match {} running as match {}",
                            tournament_id, bracket_match.id, match_id
                        );
                        Ok(None)
                    }
                    Err(e) => {
                        warn!("Tournament {}: {}, awarding a walkover", tournament_id, e);
                        self.walkover(tournament_id, bracket_match.id, 0).map(Some)
                    }
                }
            }
            (_, None) => self.walkover(tournament_id, bracket_match.id, 0).map(Some),
            (None, Some(_)) => self.walkover(tournament_id, bracket_match.id, 1).map(Some),
        }
    }

    /// Seat for a competitor. An absent human is replaced by a bot when
    /// substitution is enabled, otherwise no seat is produced.
    async fn seat_for(&mut self, tournament_id: TournamentId, index: usize, competitor: Competitor) -> Option<Seat> {
        match competitor {
            Competitor::Bot { name, difficulty } => Some(Seat::named_bot(name, difficulty)),
            Competitor::Human { client_id, name } => {
                let handle = {
                    let clients = self.clients.read().await;
                    if clients.is_available(client_id) {
                        clients.handle(client_id)
                    } else {
                        None
                    }
                };
                match handle {
                    Some(handle) => Some(Seat::human(name, handle)),
                    None if self.config.substitute_bots => {
                        if let Some(tournament) = self.tournaments().get_mut(tournament_id) {
                            tournament.substitute(index, SUBSTITUTE_DIFFICULTY);
                        }
                        Some(Seat::named_bot(name, SUBSTITUTE_DIFFICULTY))
                    }
                    None => {
                        info!("Tournament {}: {} is absent", tournament_id, name);
                        None
                    }
                }
            }
        }
    }

    fn walkover(
        &self,
        tournament_id: TournamentId,
        bracket_match: BracketMatchId,
        winner_side: usize,
    ) -> Result<RoundProgress, ArenaError> {
        let target = self.config.score_target;
        let score = if winner_side == 0 { (target, 0) } else { (0, target) };
        self.record_decided(tournament_id, bracket_match, winner_side, score)
    }

    fn record_decided(
        &self,
        tournament_id: TournamentId,
        bracket_match: BracketMatchId,
        winner_side: usize,
        score: (u32, u32),
    ) -> Result<RoundProgress, ArenaError> {
        let mut manager = self.tournaments();
        let tournament = manager.get_mut(tournament_id).ok_or(ArenaError::NotFound {
            kind: "tournament",
            id: tournament_id,
        })?;
        tournament.record_result(bracket_match, winner_side, score)
    }

    async fn launch_lobby(&mut self, launch: LobbyLaunch) -> Result<(), ArenaError> {
        let LobbyLaunch {
            lobby_id,
            settings,
            participants,
        } = launch;

        match settings.mode {
            LobbyMode::BattleRoyale => {
                let seats: Vec<Seat> = {
                    let clients = self.clients.read().await;
                    participants
                        .into_iter()
                        .filter_map(|member| match member.kind {
                            MemberKind::Human(handle) if clients.is_available(handle.id()) => {
                                Some(Seat::human(member.name, handle))
                            }
                            MemberKind::Human(handle) => {
                                debug!("Lobby {}: client {} is busy, skipped", lobby_id, handle.id());
                                None
                            }
                            MemberKind::Bot(difficulty) => Some(Seat::named_bot(member.name, difficulty)),
                        })
                        .collect()
                };
                if seats.len() < 2 {
                    return Err(ArenaError::rejected("Not enough players to start"));
                }

                let royale = RoyaleSettings {
                    lives: settings.lives,
                    fruit_frequency: settings.fruit_frequency,
                    power_ups: settings.power_ups,
                };
                let setup = MatchSetup::battle_royale(seats, royale, &self.config);
                self.start_match(setup, None).await?;
            }
            LobbyMode::Tournament => {
                let tournament_id = {
                    let mut manager = self.tournaments();
                    let tournament_id =
                        manager.create(format!("Lobby {} Tournament", lobby_id), participants.len());
                    let tournament = manager.get_mut(tournament_id).ok_or(ArenaError::NotFound {
                        kind: "tournament",
                        id: tournament_id,
                    })?;
                    tournament.set_custom(settings.power_ups);
                    for member in participants {
                        let competitor = match member.kind {
                            MemberKind::Human(handle) => Competitor::Human {
                                client_id: handle.id(),
                                name: member.name,
                            },
                            MemberKind::Bot(difficulty) => Competitor::Bot {
                                name: member.name,
                                difficulty,
                            },
                        };
                        tournament.register(competitor)?;
                    }
                    tournament_id
                };
                self.start_tournament(tournament_id).await?;
            }
        }
        Ok(())
    }

    fn broadcast_lobby(&self, lobby_id: LobbyId) {
        if let Some(lobby) = self.lobbies.get(lobby_id) {
            let message = ServerMessage::LobbyUpdate { lobby: lobby.view() };
            for handle in lobby.recipients() {
                handle.send(message.clone());
            }
        }
    }

    async fn broadcast_to_tournament(&self, tournament_id: TournamentId, message: ServerMessage) {
        let humans = self
            .tournaments()
            .get(tournament_id)
            .map(|t| t.humans())
            .unwrap_or_default();
        self.send_to_clients(&humans, message).await;
    }

    async fn send_to_clients(&self, client_ids: &[ClientId], message: ServerMessage) {
        let clients = self.clients.read().await;
        for client_id in client_ids {
            if let Some(handle) = clients.handle(*client_id) {
                handle.send(message.clone());
            }
        }
    }

    /// Cleans up after a departed client. Safe to run more than once for
    /// the same client.
    async fn handle_close(&mut self, client_id: ClientId) {
        self.matchmaker.remove_from_queue(client_id);

        if self.lobbies.lobby_of(client_id).is_some() {
            match self.lobbies.leave(client_id) {
                Ok(outcome) if !outcome.closed => self.broadcast_lobby(outcome.lobby_id),
                Ok(_) => {}
                Err(e) => debug!("Client {}: {}", client_id, e),
            }
        }

        let withdrawn = self.tournaments().remove_client(client_id);
        for tournament_id in withdrawn {
            if let Some(update) = self.tournament_update(tournament_id) {
                self.broadcast_to_tournament(tournament_id, update).await;
            }
        }

        let active_match = self.clients.read().await.active_match(client_id);
        if let Some(match_id) = active_match {
            if let Some(handle) = self.matches.get(&match_id) {
                handle.send(MatchCommand::Disconnect { client_id });
            }
        }

        if let Some(client) = self.clients.write().await.remove_client(&client_id) {
            client.handle.close();
        }
    }

    /// Stops every running match and waits for their tasks.
    pub async fn shutdown(&mut self) {
        for handle in self.matches.values() {
            handle.send(MatchCommand::Stop);
        }
        for (_, handle) in self.matches.drain() {
            handle.join().await;
        }
    }

    /// Spawns task that accepts incoming WebSocket connections
    fn spawn_acceptor(&self, listener: TcpListener) {
        let clients = Arc::clone(&self.clients);
        let events = self.event_tx.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let clients = Arc::clone(&clients);
                        let events = events.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, addr, clients, events).await {
                                warn!("Connection from {} failed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that pings every client and closes silent ones
    fn spawn_heartbeat(&self) {
        let (Some(period), Some(timeout)) = (self.config.ping_interval(), self.config.client_timeout()) else {
            return;
        };
        let clients = Arc::clone(&self.clients);
        let events = self.event_tx.clone();

        tokio::spawn(async move {
            let mut ticker = interval(period);

            loop {
                ticker.tick().await;

                let (handles, timed_out) = {
                    let clients = clients.read().await;
                    (clients.handles(), clients.timed_out_clients(timeout))
                };

                for handle in handles {
                    handle.send(ServerMessage::Ping);
                }
                for client_id in timed_out {
                    warn!("Client {} timed out", client_id);
                    if let Err(e) = events.send(ServerEvent::ClientClosed { client_id }) {
                        error!("Failed to send timeout event: {}", e);
                        return;
                    }
                }
            }
        });
    }

    /// Main server loop
    pub async fn run(&mut self) -> Result<(), ArenaError> {
        let listener = TcpListener::bind(self.config.address()).await?;
        info!("Server listening on ws://{}", listener.local_addr()?);

        self.spawn_acceptor(listener);
        self.spawn_heartbeat();

        while let Some(event) = self.event_rx.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }

        self.shutdown().await;
        Ok(())
    }
}

/// Runs one WebSocket connection until either side closes it.
async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    clients: Arc<RwLock<ClientManager>>,
    events: mpsc::UnboundedSender<ServerEvent>,
) -> Result<(), ArenaError> {
    let mut alias = None;
    let ws_stream = accept_hdr_async(stream, |request: &Request, response: Response| {
        alias = alias_from_query(request.uri().query());
        Ok::<Response, ErrorResponse>(response)
    })
    .await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (sender, mut outbound) = mpsc::unbounded_channel();
    let Some(handle) = clients.write().await.add_client(Some(addr), sender, alias) else {
        warn!("Server full, rejecting {}", addr);
        let reason = serde_json::to_string(&ServerMessage::Error {
            reason: "Server full".to_string(),
        })
        .unwrap_or_default();
        ws_sender.send(Message::Text(reason)).await?;
        ws_sender.close().await?;
        return Ok(());
    };
    let client_id = handle.id();

    tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            match frame {
                Outbound::Message(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to serialize message for client {}: {}", client_id, e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sender.close().await;
                    break;
                }
            }
        }
    });

    while let Some(frame) = ws_receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Client {} read error: {}", client_id, e);
                break;
            }
        };
        clients.write().await.touch(client_id);

        match frame {
            Message::Text(text) => {
                if events
                    .send(ServerEvent::MessageReceived { client_id, text })
                    .is_err()
                {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    let _ = events.send(ServerEvent::ClientClosed { client_id });
    Ok(())
}

/// Extracts the `alias` parameter of a `?alias=Name` upgrade query.
pub fn alias_from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "alias")
        .map(|(_, value)| decode_component(value))
        .filter(|alias| !alias.trim().is_empty())
}

fn decode_component(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => decoded.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        decoded.push(byte);
                        i += 2;
                    }
                    None => decoded.push(b'%'),
                }
            }
            byte => decoded.push(byte),
        }
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
