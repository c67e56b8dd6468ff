//! JSON wire protocol.
//!
//! Every frame is a JSON object discriminated by its `"type"` field. Parsing
//! goes through [`parse_client_message`] so that callers can tell a malformed
//! payload apart from a message type the server does not know.

use crate::ai::Difficulty;
use crate::arena::{FruitFrequency, FruitKind};
use crate::powerups::PowerUpKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    Normal,
    Custom,
}

impl QueueMode {
    pub fn is_custom(self) -> bool {
        self == QueueMode::Custom
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputDirection {
    Up,
    Down,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LobbyMode {
    Tournament,
    BattleRoyale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LobbySettings {
    pub mode: LobbyMode,
    pub power_ups: bool,
    pub fruit_frequency: FruitFrequency,
    pub lives: u32,
    pub player_count: usize,
}

impl Default for LobbySettings {
    fn default() -> Self {
        LobbySettings {
            mode: LobbyMode::BattleRoyale,
            power_ups: true,
            fruit_frequency: FruitFrequency::Medium,
            lives: 3,
            player_count: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyPlayer {
    pub id: u32,
    pub name: String,
    pub is_bot: bool,
    pub is_ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyView {
    pub id: u32,
    pub host: u32,
    pub settings: LobbySettings,
    pub players: Vec<LobbyPlayer>,
}

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinQueue {
        mode: QueueMode,
    },
    LeaveQueue,
    CreateAiMatch {
        difficulty: Difficulty,
        #[serde(default)]
        is_custom: bool,
    },
    #[serde(rename = "join_tournament")]
    JoinTournament {
        alias: String,
    },
    #[serde(rename = "player_input")]
    PlayerInput {
        direction: InputDirection,
    },
    Input {
        up: bool,
        down: bool,
        #[serde(default)]
        slot1: bool,
        #[serde(default)]
        slot2: bool,
        #[serde(default)]
        slot3: bool,
    },
    CreateLobby {
        #[serde(default)]
        settings: LobbySettings,
    },
    JoinLobby {
        lobby_id: u32,
    },
    LeaveLobby,
    AddBot {
        #[serde(default)]
        difficulty: Difficulty,
    },
    RemoveBot {
        player_id: u32,
    },
    SetReady {
        ready: bool,
    },
    StartLobby,
    Ping,
    Pong,
}

/// Every `"type"` value [`ClientMessage`] accepts.
pub const CLIENT_MESSAGE_TYPES: [&str; 15] = [
    "joinQueue",
    "leaveQueue",
    "createAiMatch",
    "join_tournament",
    "player_input",
    "input",
    "createLobby",
    "joinLobby",
    "leaveLobby",
    "addBot",
    "removeBot",
    "setReady",
    "startLobby",
    "ping",
    "pong",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TournamentStatus {
    Created,
    Active,
    Completed,
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Waiting {
        mode: QueueMode,
    },
    PlayerJoined {
        player_count: usize,
    },
    GameStart {
        player_role: String,
        player1_name: String,
        player2_name: String,
        is_custom: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        players: Vec<String>,
    },
    GameState {
        data: StateSnapshot,
    },
    GameOver(GameOverReport),
    LobbyUpdate {
        lobby: LobbyView,
    },
    TournamentUpdate {
        tournament_id: u32,
        name: String,
        status: TournamentStatus,
        round: u32,
        remaining_players: usize,
        total_players: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        champion: Option<String>,
    },
    Ping,
    Pong,
    Error {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOverReport {
    pub winner: Option<String>,
    pub lives1: u32,
    pub lives2: u32,
    pub is_tournament: bool,
    pub is_battle_royale: bool,
    pub should_disconnect: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forfeit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tournament_remaining_players: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tournament_total_players: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BallSnapshot {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub name: String,
    /// Paddle top edge. In battle royale it is measured along the player's
    /// side of the arena.
    pub paddle_y: f32,
    pub score: u32,
    pub lives: u32,
    pub eliminated: bool,
    pub power_ups: Vec<Option<PowerUpKind>>,
    pub pending: Vec<bool>,
    pub charging: Option<PowerUpKind>,
    pub hit_streak: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FruitSnapshot {
    pub x: f32,
    pub y: f32,
    pub kind: FruitKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArenaSnapshot {
    pub sides: usize,
    pub radius: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub tick: u64,
    pub ball: BallSnapshot,
    pub players: Vec<PlayerSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clones: Vec<BallSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fruits: Vec<FruitSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arena: Option<ArenaSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid message format")]
    Malformed,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

/// Parses one inbound text frame.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|_| ProtocolError::Malformed)?;
    let kind = value
        .get("type")
        .and_then(|kind| kind.as_str())
        .ok_or(ProtocolError::Malformed)?;

    if !CLIENT_MESSAGE_TYPES.contains(&kind) {
        return Err(ProtocolError::UnknownType(kind.to_string()));
    }

    serde_json::from_value(value).map_err(|_| ProtocolError::Malformed)
}

/// Canonical role name for a seat index: `player1`, `player2`, ...
pub fn role_name(seat: usize) -> String {
    format!("player{}", seat + 1)
}
