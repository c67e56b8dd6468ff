//! Pre-match lobbies for battle royale and lobby tournaments.
//!
//! A lobby holds 2 to 6 players, humans and bots mixed. Humans toggle a
//! ready flag, bots are always ready, and only the host may start. Each
//! lobby resolves client ids to lobby player ids and back, which the server
//! uses both for `lobbyUpdate` broadcasts and for reaching one member.

use crate::client_manager::{ClientHandle, ClientId};
use crate::error::ArenaError;
use log::{debug, info};
use shared::arena::{MAX_CONTENDERS, MIN_CONTENDERS};
use shared::protocol::{LobbyPlayer, LobbySettings, LobbyView};
use shared::Difficulty;
use std::collections::HashMap;

pub type LobbyId = u32;
pub type PlayerId = u32;

#[derive(Debug, Clone)]
pub enum MemberKind {
    Human(ClientHandle),
    Bot(Difficulty),
}

#[derive(Debug, Clone)]
pub struct LobbyMember {
    pub id: PlayerId,
    pub name: String,
    pub kind: MemberKind,
    pub ready: bool,
}

impl LobbyMember {
    pub fn client_id(&self) -> Option<ClientId> {
        match &self.kind {
            MemberKind::Human(handle) => Some(handle.id()),
            MemberKind::Bot(_) => None,
        }
    }

    pub fn is_bot(&self) -> bool {
        matches!(self.kind, MemberKind::Bot(_))
    }

    fn view(&self) -> LobbyPlayer {
        LobbyPlayer {
            id: self.id,
            name: self.name.clone(),
            is_bot: self.is_bot(),
            is_ready: self.ready,
        }
    }
}

#[derive(Debug)]
pub struct Lobby {
    id: LobbyId,
    /// Player id of the host; always a human.
    host: PlayerId,
    settings: LobbySettings,
    members: Vec<LobbyMember>,
    by_client: HashMap<ClientId, PlayerId>,
    by_player: HashMap<PlayerId, ClientId>,
    next_player_id: PlayerId,
}

impl Lobby {
    fn new(id: LobbyId, settings: LobbySettings) -> Self {
        Lobby {
            id,
            host: 0,
            settings,
            members: Vec::new(),
            by_client: HashMap::new(),
            by_player: HashMap::new(),
            next_player_id: 1,
        }
    }

    pub fn id(&self) -> LobbyId {
        self.id
    }

    pub fn settings(&self) -> &LobbySettings {
        &self.settings
    }

    pub fn members(&self) -> &[LobbyMember] {
        &self.members
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.settings.player_count
    }

    pub fn host_client(&self) -> Option<ClientId> {
        self.client_for_player(self.host)
    }

    pub fn client_for_player(&self, player_id: PlayerId) -> Option<ClientId> {
        self.by_player.get(&player_id).copied()
    }

    pub fn player_for_client(&self, client_id: ClientId) -> Option<PlayerId> {
        self.by_client.get(&client_id).copied()
    }

    /// Handles of every human in the lobby.
    pub fn recipients(&self) -> Vec<ClientHandle> {
        self.members
            .iter()
            .filter_map(|m| match &m.kind {
                MemberKind::Human(handle) => Some(handle.clone()),
                MemberKind::Bot(_) => None,
            })
            .collect()
    }

    /// Sends one message to a single member.
    pub fn send_to(&self, player_id: PlayerId, message: shared::ServerMessage) -> bool {
        self.members
            .iter()
            .find(|m| m.id == player_id)
            .and_then(|m| match &m.kind {
                MemberKind::Human(handle) => Some(handle.send(message)),
                MemberKind::Bot(_) => None,
            })
            .unwrap_or(false)
    }

    pub fn view(&self) -> LobbyView {
        LobbyView {
            id: self.id,
            host: self.host,
            settings: self.settings.clone(),
            players: self.members.iter().map(LobbyMember::view).collect(),
        }
    }

    fn allocate_player_id(&mut self) -> PlayerId {
        let id = self.next_player_id;
        self.next_player_id += 1;
        id
    }

    fn add_human(&mut self, handle: ClientHandle, name: String) -> PlayerId {
        let player_id = self.allocate_player_id();
        self.by_client.insert(handle.id(), player_id);
        self.by_player.insert(player_id, handle.id());
        self.members.push(LobbyMember {
            id: player_id,
            name,
            kind: MemberKind::Human(handle),
            ready: false,
        });
        player_id
    }

    fn add_bot(&mut self, difficulty: Difficulty) -> PlayerId {
        let player_id = self.allocate_player_id();
        self.members.push(LobbyMember {
            id: player_id,
            name: format!("{} #{}", difficulty.display_name(), player_id),
            kind: MemberKind::Bot(difficulty),
            ready: true,
        });
        player_id
    }

    fn remove_human(&mut self, client_id: ClientId) -> Option<LobbyMember> {
        let player_id = self.by_client.remove(&client_id)?;
        self.by_player.remove(&player_id);
        let index = self.members.iter().position(|m| m.id == player_id)?;
        Some(self.members.remove(index))
    }

    fn human_count(&self) -> usize {
        self.by_client.len()
    }

    fn require_host(&self, client_id: ClientId, action: &str) -> Result<(), ArenaError> {
        if self.host_client() == Some(client_id) {
            Ok(())
        } else {
            Err(ArenaError::rejected(format!("Only the host can {}", action)))
        }
    }
}

/// Roster handed over when a lobby starts.
#[derive(Debug)]
pub struct LobbyLaunch {
    pub lobby_id: LobbyId,
    pub settings: LobbySettings,
    pub participants: Vec<LobbyMember>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub lobby_id: LobbyId,
    /// The last human left and the lobby is gone.
    pub closed: bool,
}

#[derive(Debug, Default)]
pub struct LobbyManager {
    lobbies: HashMap<LobbyId, Lobby>,
    membership: HashMap<ClientId, LobbyId>,
    next_id: LobbyId,
}

impl LobbyManager {
    pub fn new() -> Self {
        LobbyManager {
            next_id: 1,
            ..Default::default()
        }
    }

    pub fn get(&self, lobby_id: LobbyId) -> Option<&Lobby> {
        self.lobbies.get(&lobby_id)
    }

    pub fn lobby_of(&self, client_id: ClientId) -> Option<LobbyId> {
        self.membership.get(&client_id).copied()
    }

    fn member_lobby_mut(&mut self, client_id: ClientId) -> Result<&mut Lobby, ArenaError> {
        let lobby_id = self
            .lobby_of(client_id)
            .ok_or_else(|| ArenaError::rejected("Not in a lobby"))?;
        self.lobbies.get_mut(&lobby_id).ok_or(ArenaError::NotFound {
            kind: "lobby",
            id: lobby_id,
        })
    }

    /// Opens a lobby with the caller as host.
    pub fn create(
        &mut self,
        handle: ClientHandle,
        name: String,
        settings: LobbySettings,
    ) -> Result<LobbyId, ArenaError> {
        if !(MIN_CONTENDERS..=MAX_CONTENDERS).contains(&settings.player_count) {
            return Err(ArenaError::rejected(format!(
                "Player count must be between {} and {}",
                MIN_CONTENDERS, MAX_CONTENDERS
            )));
        }
        if settings.lives == 0 {
            return Err(ArenaError::rejected("Lives must be at least 1"));
        }
        if self.membership.contains_key(&handle.id()) {
            return Err(ArenaError::rejected("Already in a lobby"));
        }

        let lobby_id = self.next_id;
        self.next_id += 1;

        let client_id = handle.id();
        let mut lobby = Lobby::new(lobby_id, settings);
        lobby.host = lobby.add_human(handle, name);
        info!("Lobby {} created by client {}", lobby_id, client_id);

        self.lobbies.insert(lobby_id, lobby);
        self.membership.insert(client_id, lobby_id);
        Ok(lobby_id)
    }

    pub fn join(&mut self, lobby_id: LobbyId, handle: ClientHandle, name: String) -> Result<(), ArenaError> {
        if self.membership.contains_key(&handle.id()) {
            return Err(ArenaError::rejected("Already in a lobby"));
        }
        let lobby = self.lobbies.get_mut(&lobby_id).ok_or(ArenaError::NotFound {
            kind: "lobby",
            id: lobby_id,
        })?;
        if lobby.is_full() {
            return Err(ArenaError::rejected("Lobby is full"));
        }

        let client_id = handle.id();
        lobby.add_human(handle, name);
        self.membership.insert(client_id, lobby_id);
        debug!("Client {} joined lobby {}", client_id, lobby_id);
        Ok(())
    }

    /// Removes a client from its lobby. The host role passes to the next
    /// human; a lobby left without humans is closed.
    pub fn leave(&mut self, client_id: ClientId) -> Result<LeaveOutcome, ArenaError> {
        let lobby_id = self
            .membership
            .remove(&client_id)
            .ok_or_else(|| ArenaError::state(format!("client {} is not in a lobby", client_id)))?;
        let lobby = self.lobbies.get_mut(&lobby_id).ok_or(ArenaError::NotFound {
            kind: "lobby",
            id: lobby_id,
        })?;

        if let Some(member) = lobby.remove_human(client_id) {
            debug!("Client {} left lobby {}", client_id, lobby_id);
            if member.id == lobby.host {
                if let Some(next) = lobby.members.iter().find(|m| !m.is_bot()) {
                    lobby.host = next.id;
                    info!("Lobby {}: host passed to {}", lobby_id, next.name);
                }
            }
        }

        let closed = lobby.human_count() == 0;
        if closed {
            info!("Lobby {} closed", lobby_id);
            self.lobbies.remove(&lobby_id);
        }
        Ok(LeaveOutcome { lobby_id, closed })
    }

    pub fn add_bot(&mut self, client_id: ClientId, difficulty: Difficulty) -> Result<LobbyId, ArenaError> {
        let lobby = self.member_lobby_mut(client_id)?;
        lobby.require_host(client_id, "add bots")?;
        if lobby.is_full() {
            return Err(ArenaError::rejected("Lobby is full"));
        }
        lobby.add_bot(difficulty);
        Ok(lobby.id)
    }

    pub fn remove_bot(&mut self, client_id: ClientId, player_id: PlayerId) -> Result<LobbyId, ArenaError> {
        let lobby = self.member_lobby_mut(client_id)?;
        lobby.require_host(client_id, "remove bots")?;
        let index = lobby
            .members
            .iter()
            .position(|m| m.id == player_id && m.is_bot())
            .ok_or(ArenaError::NotFound {
                kind: "bot",
                id: player_id,
            })?;
        lobby.members.remove(index);
        Ok(lobby.id)
    }

    pub fn set_ready(&mut self, client_id: ClientId, ready: bool) -> Result<LobbyId, ArenaError> {
        let lobby = self.member_lobby_mut(client_id)?;
        let player_id = lobby
            .player_for_client(client_id)
            .ok_or_else(|| ArenaError::state("lobby membership out of sync"))?;
        if let Some(member) = lobby.members.iter_mut().find(|m| m.id == player_id) {
            member.ready = ready;
        }
        Ok(lobby.id)
    }

    /// Closes the lobby and hands its roster over. Only the host may start,
    /// with at least two players and every human ready.
    pub fn start(&mut self, client_id: ClientId) -> Result<LobbyLaunch, ArenaError> {
        let lobby = self.member_lobby_mut(client_id)?;
        lobby.require_host(client_id, "start the game")?;
        if lobby.members.len() < MIN_CONTENDERS {
            return Err(ArenaError::rejected(format!(
                "At least {} players are needed",
                MIN_CONTENDERS
            )));
        }
        if !lobby.members.iter().all(|m| m.ready) {
            return Err(ArenaError::rejected("Not all players are ready"));
        }

        let lobby_id = lobby.id;
        let lobby = self.lobbies.remove(&lobby_id).ok_or(ArenaError::NotFound {
            kind: "lobby",
            id: lobby_id,
        })?;
        self.membership.retain(|_, id| *id != lobby_id);
        info!(
            "Lobby {} starting {:?} with {} players",
            lobby_id,
            lobby.settings.mode,
            lobby.members.len()
        );

        Ok(LobbyLaunch {
            lobby_id,
            settings: lobby.settings,
            participants: lobby.members,
        })
    }

    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }
}
