//! Integration tests for the arena server
//!
//! These tests drive a [`Server`] through its event loop with in-process
//! clients and check what each client receives.

use server::client_manager::{ClientHandle, ClientId, Outbound};
use server::config::ServerConfig;
use server::network::{Server, ServerEvent};
use shared::protocol::{GameOverReport, QueueMode, TournamentStatus};
use shared::ServerMessage;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(3);

/// Messages received by one client. Frames that were skipped while waiting
/// for something else stay available, except state snapshots.
struct Inbox {
    rx: UnboundedReceiver<Outbound>,
    backlog: VecDeque<ServerMessage>,
}

impl Inbox {
    fn new(rx: UnboundedReceiver<Outbound>) -> Self {
        Inbox {
            rx,
            backlog: VecDeque::new(),
        }
    }

    async fn expect<F>(&mut self, what: &str, mut matches: F) -> ServerMessage
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        if let Some(index) = self.backlog.iter().position(|m| matches(m)) {
            if let Some(message) = self.backlog.remove(index) {
                return message;
            }
        }
        loop {
            let frame = timeout(WAIT, self.rx.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
            match frame {
                Some(Outbound::Message(message)) if matches(&message) => return message,
                Some(Outbound::Message(ServerMessage::GameState { .. })) => {}
                Some(Outbound::Message(message)) => self.backlog.push_back(message),
                Some(Outbound::Close) | None => panic!("connection closed waiting for {}", what),
            }
        }
    }

    async fn game_start(&mut self) -> (String, String, String) {
        match self.expect("gameStart", |m| matches!(m, ServerMessage::GameStart { .. })).await {
            ServerMessage::GameStart {
                player_role,
                player1_name,
                player2_name,
                ..
            } => (player_role, player1_name, player2_name),
            _ => unreachable!(),
        }
    }

    async fn game_over(&mut self) -> GameOverReport {
        match self.expect("gameOver", |m| matches!(m, ServerMessage::GameOver(_))).await {
            ServerMessage::GameOver(report) => report,
            _ => unreachable!(),
        }
    }

    /// Everything received so far, without waiting.
    fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages: Vec<ServerMessage> = self.backlog.drain(..).collect();
        while let Ok(frame) = self.rx.try_recv() {
            if let Outbound::Message(message) = frame {
                messages.push(message);
            }
        }
        messages
    }
}

async fn connect(server: &Server, alias: &str) -> (ClientHandle, Inbox) {
    let (handle, rx) = server
        .connect_client(Some(alias))
        .await
        .expect("server is full");
    (handle, Inbox::new(rx))
}

async fn send(server: &mut Server, client_id: ClientId, text: &str) {
    server
        .handle_event(ServerEvent::MessageReceived {
            client_id,
            text: text.to_string(),
        })
        .await;
}

async fn close(server: &mut Server, client_id: ClientId) {
    server
        .handle_event(ServerEvent::ClientClosed { client_id })
        .await;
}

/// Waits for the next match completion and lets the server process it.
async fn settle_match(server: &mut Server) {
    let event = timeout(WAIT, server.next_event())
        .await
        .expect("no match completion")
        .expect("event channel closed");
    assert!(matches!(event, ServerEvent::MatchEnded { .. }), "{:?}", event);
    server.handle_event(event).await;
}

fn tournament_update(message: &ServerMessage) -> Option<(TournamentStatus, u32, usize, usize)> {
    match message {
        ServerMessage::TournamentUpdate {
            status,
            round,
            remaining_players,
            total_players,
            ..
        } => Some((*status, *round, *remaining_players, *total_players)),
        _ => None,
    }
}

/// MATCHMAKING TESTS
mod matchmaking_tests {
    use super::*;

    /// The earlier arrival plays player1 and the queue is empty afterwards
    #[tokio::test]
    async fn queue_pairs_in_arrival_order() {
        let mut server = Server::new(ServerConfig::default());
        let (alice, mut alice_inbox) = connect(&server, "alice").await;
        let (bob, mut bob_inbox) = connect(&server, "bob").await;

        send(&mut server, alice.id(), r#"{"type":"joinQueue","mode":"custom"}"#).await;
        alice_inbox
            .expect("waiting", |m| *m == ServerMessage::Waiting { mode: QueueMode::Custom })
            .await;
        send(&mut server, bob.id(), r#"{"type":"joinQueue","mode":"custom"}"#).await;

        let (role, player1, player2) = alice_inbox.game_start().await;
        assert_eq!(role, "player1");
        assert_eq!((player1.as_str(), player2.as_str()), ("alice", "bob"));
        assert_eq!(bob_inbox.game_start().await.0, "player2");

        assert_eq!(server.queued(QueueMode::Custom), 0);
        assert_eq!(server.active_matches(), 1);
        server.shutdown().await;
    }

    /// Leaving the queue is harmless when repeated
    #[tokio::test]
    async fn leave_queue_twice() {
        let mut server = Server::new(ServerConfig::default());
        let (alice, mut inbox) = connect(&server, "alice").await;

        send(&mut server, alice.id(), r#"{"type":"joinQueue","mode":"normal"}"#).await;
        send(&mut server, alice.id(), r#"{"type":"leaveQueue"}"#).await;
        send(&mut server, alice.id(), r#"{"type":"leaveQueue"}"#).await;

        assert_eq!(server.queued(QueueMode::Normal), 0);
        let errors = inbox
            .drain()
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::Error { .. }))
            .count();
        assert_eq!(errors, 0);
    }

    /// A disconnect mid-match gives the opponent exactly one forfeit win
    #[tokio::test]
    async fn disconnect_forfeits_once() {
        let mut server = Server::new(ServerConfig::default());
        let (alice, mut alice_inbox) = connect(&server, "alice").await;
        let (bob, mut bob_inbox) = connect(&server, "bob").await;

        send(&mut server, alice.id(), r#"{"type":"joinQueue","mode":"normal"}"#).await;
        send(&mut server, bob.id(), r#"{"type":"joinQueue","mode":"normal"}"#).await;
        alice_inbox.game_start().await;
        bob_inbox.game_start().await;

        close(&mut server, alice.id()).await;

        let report = bob_inbox.game_over().await;
        assert_eq!(report.winner.as_deref(), Some("bob"));
        assert_eq!(report.forfeit, Some(true));
        assert!(report.should_disconnect);
        assert!(!report.is_tournament);

        settle_match(&mut server).await;
        assert_eq!(server.active_matches(), 0);

        let extra = bob_inbox
            .drain()
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::GameOver(_)))
            .count();
        assert_eq!(extra, 0);

        let clients = server.clients();
        let registry = clients.read().await;
        assert!(registry.handle(alice.id()).is_none());
        assert_eq!(registry.active_match(bob.id()), None);
        assert!(registry.is_available(bob.id()));
    }

    /// A queued client that disconnects is never paired
    #[tokio::test]
    async fn disconnect_leaves_queue() {
        let mut server = Server::new(ServerConfig::default());
        let (alice, _alice_inbox) = connect(&server, "alice").await;
        let (bob, mut bob_inbox) = connect(&server, "bob").await;

        send(&mut server, alice.id(), r#"{"type":"joinQueue","mode":"normal"}"#).await;
        close(&mut server, alice.id()).await;
        send(&mut server, bob.id(), r#"{"type":"joinQueue","mode":"normal"}"#).await;

        bob_inbox
            .expect("waiting", |m| matches!(m, ServerMessage::Waiting { .. }))
            .await;
        assert_eq!(server.queued(QueueMode::Normal), 1);
        assert_eq!(server.active_matches(), 0);
    }

    /// A bot match starts at once with the human as player1
    #[tokio::test]
    async fn ai_match_streams_state() {
        let mut server = Server::new(ServerConfig::default());
        let (alice, mut inbox) = connect(&server, "alice").await;

        send(
            &mut server,
            alice.id(),
            r#"{"type":"createAiMatch","difficulty":"hard","isCustom":true}"#,
        )
        .await;

        let (role, _, opponent) = inbox.game_start().await;
        assert_eq!(role, "player1");
        assert_eq!(opponent, "AI (hard)");

        send(&mut server, alice.id(), r#"{"type":"input","up":true,"down":false}"#).await;
        let state = inbox
            .expect("gameState", |m| {
                matches!(m, ServerMessage::GameState { data } if data.tick > 5)
            })
            .await;
        if let ServerMessage::GameState { data } = state {
            assert_eq!(data.players.len(), 2);
            assert_eq!(data.players[1].name, "AI (hard)");
        }
        server.shutdown().await;
    }
}

/// PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Bad frames are answered with an error and the connection stays open
    #[tokio::test]
    async fn malformed_and_unknown_messages() {
        let mut server = Server::new(ServerConfig::default());
        let (alice, mut inbox) = connect(&server, "alice").await;

        send(&mut server, alice.id(), "definitely not json").await;
        send(&mut server, alice.id(), r#"{"type":"joinQueue","mode":"ranked"}"#).await;
        send(&mut server, alice.id(), r#"{"type":"fly"}"#).await;
        send(&mut server, alice.id(), r#"{"type":"ping"}"#).await;

        assert_eq!(
            inbox.drain(),
            vec![
                ServerMessage::Error {
                    reason: "Invalid message format".to_string()
                },
                ServerMessage::Error {
                    reason: "Invalid message format".to_string()
                },
                ServerMessage::Error {
                    reason: "Unknown message type: fly".to_string()
                },
                ServerMessage::Pong,
            ]
        );
        assert!(!alice.is_closed());
    }

    /// Unknown lobbies are reported by id
    #[tokio::test]
    async fn unknown_lobby_is_reported() {
        let mut server = Server::new(ServerConfig::default());
        let (alice, mut inbox) = connect(&server, "alice").await;

        send(&mut server, alice.id(), r#"{"type":"joinLobby","lobbyId":77}"#).await;

        assert_eq!(
            inbox.drain(),
            vec![ServerMessage::Error {
                reason: "lobby 77 not found".to_string()
            }]
        );
    }
}

/// TOURNAMENT TESTS
mod tournament_tests {
    use super::*;

    fn config(size: usize, substitute_bots: bool) -> ServerConfig {
        ServerConfig {
            tournament_size: size,
            substitute_bots,
            ..ServerConfig::default()
        }
    }

    /// Four players, decided by disconnects. Remaining counts reported with
    /// every result are exact.
    #[tokio::test]
    async fn quick_tournament_runs_to_completion() {
        let mut server = Server::new(config(4, false));
        let aliases = ["alice", "bob", "carol", "dave"];
        let mut players = Vec::new();
        for alias in aliases {
            players.push(connect(&server, alias).await);
        }

        for ((handle, _), alias) in players.iter().zip(aliases) {
            let text = format!(r#"{{"type":"join_tournament","alias":"{}"}}"#, alias);
            send(&mut server, handle.id(), &text).await;
        }

        for player_count in 1..=4 {
            players[0]
                .1
                .expect("playerJoined", |m| *m == ServerMessage::PlayerJoined { player_count })
                .await;
        }
        assert_eq!(server.active_matches(), 2);

        let ids: Vec<ClientId> = players.iter().map(|(h, _)| h.id()).collect();
        let (alice_role, _, alice_opponent) = players[0].1.game_start().await;
        assert_eq!((alice_role.as_str(), alice_opponent.as_str()), ("player1", "bob"));
        let (_, carol_p1, carol_opponent) = players[2].1.game_start().await;
        assert_eq!((carol_p1.as_str(), carol_opponent.as_str()), ("carol", "dave"));

        // Round one: bob and dave leave.
        close(&mut server, ids[1]).await;
        let report = players[0].1.game_over().await;
        assert!(report.is_tournament);
        assert!(!report.should_disconnect);
        assert_eq!(report.tournament_remaining_players, Some(3));
        assert_eq!(report.tournament_total_players, Some(4));
        settle_match(&mut server).await;

        close(&mut server, ids[3]).await;
        let report = players[2].1.game_over().await;
        assert!(!report.should_disconnect);
        assert_eq!(report.tournament_remaining_players, Some(2));
        settle_match(&mut server).await;

        // The final pairs the two round winners.
        let (role, player1, player2) = players[0].1.game_start().await;
        assert_eq!(role, "player1");
        assert_eq!((player1.as_str(), player2.as_str()), ("alice", "carol"));
        players[2].1.game_start().await;
        let update = players[0]
            .1
            .expect("round two update", |m| {
                tournament_update(m).map_or(false, |(_, round, _, _)| round == 2)
            })
            .await;
        assert_eq!(
            tournament_update(&update),
            Some((TournamentStatus::Active, 2, 2, 4))
        );

        close(&mut server, ids[2]).await;
        let report = players[0].1.game_over().await;
        assert_eq!(report.winner.as_deref(), Some("alice"));
        assert!(report.should_disconnect);
        assert_eq!(report.tournament_remaining_players, Some(1));
        settle_match(&mut server).await;

        let done = players[0]
            .1
            .expect("completion update", |m| {
                matches!(m, ServerMessage::TournamentUpdate { status: TournamentStatus::Completed, .. })
            })
            .await;
        match done {
            ServerMessage::TournamentUpdate { champion, remaining_players, .. } => {
                assert_eq!(champion.as_deref(), Some("alice"));
                assert_eq!(remaining_players, 1);
            }
            _ => unreachable!(),
        }
        assert_eq!(server.active_matches(), 0);
    }

    /// An absent player loses by walkover and the round closes at once
    #[tokio::test]
    async fn absent_player_gives_walkover() {
        let mut server = Server::new(config(3, false));
        let (alice, mut alice_inbox) = connect(&server, "alice").await;
        let (bob, _bob_inbox) = connect(&server, "bob").await;
        let (carol, mut carol_inbox) = connect(&server, "carol").await;

        send(&mut server, alice.id(), r#"{"type":"join_tournament","alias":"alice"}"#).await;
        send(&mut server, bob.id(), r#"{"type":"join_tournament","alias":"bob"}"#).await;
        // Bob is busy in a bot match when the bracket starts.
        send(&mut server, bob.id(), r#"{"type":"createAiMatch","difficulty":"easy"}"#).await;
        send(&mut server, carol.id(), r#"{"type":"join_tournament","alias":"carol"}"#).await;

        // Alice beat bob by walkover and carol had the bye: the final starts.
        let (_, player1, player2) = alice_inbox.game_start().await;
        assert_eq!((player1.as_str(), player2.as_str()), ("alice", "carol"));
        carol_inbox.game_start().await;

        let update = alice_inbox
            .expect("tournament update", |m| tournament_update(m).is_some())
            .await;
        assert_eq!(
            tournament_update(&update),
            Some((TournamentStatus::Active, 2, 2, 3))
        );
        server.shutdown().await;
    }

    /// With substitution enabled a bot plays in place of the absent player
    #[tokio::test]
    async fn absent_player_is_substituted() {
        let mut server = Server::new(config(2, true));
        let (alice, mut alice_inbox) = connect(&server, "alice").await;
        let (bob, _bob_inbox) = connect(&server, "bob").await;

        send(&mut server, bob.id(), r#"{"type":"join_tournament","alias":"bob"}"#).await;
        send(&mut server, bob.id(), r#"{"type":"createAiMatch","difficulty":"easy"}"#).await;
        send(&mut server, alice.id(), r#"{"type":"join_tournament","alias":"alice"}"#).await;

        let (role, player1, player2) = alice_inbox.game_start().await;
        assert_eq!(role, "player2");
        assert_eq!((player1.as_str(), player2.as_str()), ("bob", "alice"));
        assert_eq!(server.active_matches(), 2);
        server.shutdown().await;
    }
}

/// LOBBY TESTS
mod lobby_tests {
    use super::*;

    fn lobby_size(message: &ServerMessage) -> Option<usize> {
        match message {
            ServerMessage::LobbyUpdate { lobby } => Some(lobby.players.len()),
            _ => None,
        }
    }

    /// Host, guest and a bot start a battle royale
    #[tokio::test]
    async fn lobby_starts_battle_royale() {
        let mut server = Server::new(ServerConfig::default());
        let (host, mut host_inbox) = connect(&server, "alice").await;
        let (guest, mut guest_inbox) = connect(&server, "bob").await;

        send(
            &mut server,
            host.id(),
            r#"{"type":"createLobby","settings":{"mode":"battleRoyale","playerCount":3,"lives":2}}"#,
        )
        .await;
        let lobby_id = match host_inbox.expect("lobby", |m| lobby_size(m) == Some(1)).await {
            ServerMessage::LobbyUpdate { lobby } => lobby.id,
            _ => unreachable!(),
        };

        send(&mut server, guest.id(), &format!(r#"{{"type":"joinLobby","lobbyId":{}}}"#, lobby_id)).await;
        guest_inbox.expect("lobby", |m| lobby_size(m) == Some(2)).await;

        send(&mut server, guest.id(), r#"{"type":"addBot","difficulty":"easy"}"#).await;
        guest_inbox
            .expect("host-only error", |m| matches!(m, ServerMessage::Error { .. }))
            .await;
        send(&mut server, host.id(), r#"{"type":"addBot","difficulty":"easy"}"#).await;
        guest_inbox.expect("lobby", |m| lobby_size(m) == Some(3)).await;

        send(&mut server, host.id(), r#"{"type":"setReady","ready":true}"#).await;
        send(&mut server, host.id(), r#"{"type":"startLobby"}"#).await;
        host_inbox
            .expect("not ready", |m| {
                *m == ServerMessage::Error {
                    reason: "Not all players are ready".to_string(),
                }
            })
            .await;

        send(&mut server, guest.id(), r#"{"type":"setReady","ready":true}"#).await;
        send(&mut server, host.id(), r#"{"type":"startLobby"}"#).await;

        match host_inbox.expect("gameStart", |m| matches!(m, ServerMessage::GameStart { .. })).await {
            ServerMessage::GameStart { player_role, players, .. } => {
                assert_eq!(player_role, "player1");
                assert_eq!(players.len(), 3);
            }
            _ => unreachable!(),
        }
        assert_eq!(guest_inbox.game_start().await.0, "player2");

        let state = guest_inbox
            .expect("arena state", |m| matches!(m, ServerMessage::GameState { data } if data.arena.is_some()))
            .await;
        if let ServerMessage::GameState { data } = state {
            assert_eq!(data.arena.map(|a| a.sides), Some(3));
            assert!(data.players.iter().all(|p| p.lives == 2));
        }
        assert!(server.lobbies().is_empty());
        server.shutdown().await;
    }

    /// The host role passes on when the host disconnects
    #[tokio::test]
    async fn host_disconnect_migrates_lobby() {
        let mut server = Server::new(ServerConfig::default());
        let (host, _host_inbox) = connect(&server, "alice").await;
        let (guest, mut guest_inbox) = connect(&server, "bob").await;

        send(&mut server, host.id(), r#"{"type":"createLobby","settings":{}}"#).await;
        send(&mut server, guest.id(), r#"{"type":"joinLobby","lobbyId":1}"#).await;
        close(&mut server, host.id()).await;

        let update = guest_inbox.expect("lobby", |m| lobby_size(m) == Some(1)).await;
        if let ServerMessage::LobbyUpdate { lobby } = update {
            assert_eq!(lobby.host, lobby.players[0].id);
            assert_eq!(lobby.players[0].name, "bob");
        }

        close(&mut server, guest.id()).await;
        assert!(server.lobbies().is_empty());
    }

    /// A lobby tournament of one human and three bots settles the bot pairing
    /// without a match
    #[tokio::test]
    async fn lobby_tournament_with_bots() {
        let mut server = Server::new(ServerConfig::default());
        let (host, mut inbox) = connect(&server, "alice").await;

        send(
            &mut server,
            host.id(),
            r#"{"type":"createLobby","settings":{"mode":"tournament","playerCount":4}}"#,
        )
        .await;
        for _ in 0..3 {
            send(&mut server, host.id(), r#"{"type":"addBot","difficulty":"medium"}"#).await;
        }
        send(&mut server, host.id(), r#"{"type":"setReady","ready":true}"#).await;
        send(&mut server, host.id(), r#"{"type":"startLobby"}"#).await;

        let (role, player1, _) = inbox.game_start().await;
        assert_eq!((role.as_str(), player1.as_str()), ("player1", "alice"));

        let update = inbox
            .expect("tournament update", |m| tournament_update(m).is_some())
            .await;
        assert_eq!(
            tournament_update(&update),
            Some((TournamentStatus::Active, 1, 3, 4))
        );
        assert_eq!(server.active_matches(), 1);
        server.shutdown().await;
    }

    /// Bracket matches of a lobby tournament use the lobby's power-up setting
    #[tokio::test]
    async fn lobby_tournament_follows_power_up_setting() {
        for power_ups in [true, false] {
            let mut server = Server::new(ServerConfig::default());
            let (host, mut inbox) = connect(&server, "alice").await;

            send(
                &mut server,
                host.id(),
                &format!(
                    r#"{{"type":"createLobby","settings":{{"mode":"tournament","playerCount":2,"powerUps":{}}}}}"#,
                    power_ups
                ),
            )
            .await;
            send(&mut server, host.id(), r#"{"type":"addBot","difficulty":"easy"}"#).await;
            send(&mut server, host.id(), r#"{"type":"setReady","ready":true}"#).await;
            send(&mut server, host.id(), r#"{"type":"startLobby"}"#).await;

            match inbox.expect("gameStart", |m| matches!(m, ServerMessage::GameStart { .. })).await {
                ServerMessage::GameStart { is_custom, .. } => assert_eq!(is_custom, power_ups),
                _ => unreachable!(),
            }
            server.shutdown().await;
        }
    }

    /// Bots do not keep an arena running once the last human has left
    #[tokio::test]
    async fn royale_ends_when_last_human_leaves() {
        let mut server = Server::new(ServerConfig::default());
        let (host, mut inbox) = connect(&server, "alice").await;

        send(
            &mut server,
            host.id(),
            r#"{"type":"createLobby","settings":{"mode":"battleRoyale","playerCount":3}}"#,
        )
        .await;
        for _ in 0..2 {
            send(&mut server, host.id(), r#"{"type":"addBot","difficulty":"hard"}"#).await;
        }
        send(&mut server, host.id(), r#"{"type":"setReady","ready":true}"#).await;
        send(&mut server, host.id(), r#"{"type":"startLobby"}"#).await;
        inbox.game_start().await;
        assert_eq!(server.active_matches(), 1);

        close(&mut server, host.id()).await;
        settle_match(&mut server).await;

        assert_eq!(server.active_matches(), 0);
    }
}
