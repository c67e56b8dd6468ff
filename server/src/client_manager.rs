//! Connection registry for the arena server
//!
//! This module tracks every connected client and is the single source of
//! truth for message routing:
//! - Client connection lifecycle (connect, disconnect, timeout)
//! - The alias a client plays under
//! - The binding between a client and the one match it is playing in
//!
//! Match tasks share the registry with the server loop and release their
//! bindings themselves when they end, before any completion work runs.

use log::{debug, info};
use shared::ServerMessage;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub type ClientId = u32;
pub type MatchId = u32;

/// Frames queued for a client's socket writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Close,
}

/// Cheap, cloneable sending side of a client connection.
///
/// Sends never block; a handle whose writer has gone away simply reports
/// the send as failed.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    sender: mpsc::UnboundedSender<Outbound>,
}

impl ClientHandle {
    pub fn new(id: ClientId, sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { id, sender }
    }

    /// Creates a handle together with the receiving end its writer would
    /// own.
    pub fn channel(id: ClientId) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(id, sender), receiver)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn send(&self, message: ServerMessage) -> bool {
        self.sender.send(Outbound::Message(message)).is_ok()
    }

    pub fn close(&self) {
        let _ = self.sender.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// A connected client
#[derive(Debug)]
pub struct Client {
    pub handle: ClientHandle,
    pub alias: String,
    /// Peer address, absent for in-process connections
    pub addr: Option<SocketAddr>,
    /// Last time we received any frame from this client
    pub last_seen: Instant,
    /// Match this client is currently bound to
    pub active_match: Option<MatchId>,
}

impl Client {
    pub fn new(handle: ClientHandle, alias: String, addr: Option<SocketAddr>) -> Self {
        Self {
            handle,
            alias,
            addr,
            last_seen: Instant::now(),
            active_match: None,
        }
    }

    /// Checks if the client has exceeded the connection timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected clients and their match bindings
pub struct ClientManager {
    clients: HashMap<ClientId, Client>,
    next_client_id: ClientId,
    max_clients: usize,
}

impl ClientManager {
    /// Creates a new client manager with the specified capacity limit.
    /// Client IDs start from 1.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a connection. Returns `None` if the server is at capacity.
    ///
    /// Clients without a resolved alias play as `Player <id>`.
    pub fn add_client(
        &mut self,
        addr: Option<SocketAddr>,
        sender: mpsc::UnboundedSender<Outbound>,
        alias: Option<String>,
    ) -> Option<ClientHandle> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        let handle = ClientHandle::new(client_id, sender);
        let alias = sanitize_alias(alias).unwrap_or_else(|| format!("Player {}", client_id));
        match addr {
            Some(addr) => info!("Client {} ({}) connected from {}", client_id, alias, addr),
            None => info!("Client {} ({}) connected", client_id, alias),
        }
        self.clients
            .insert(client_id, Client::new(handle.clone(), alias, addr));

        Some(handle)
    }

    /// Removes a client, returning its record if it was still registered.
    pub fn remove_client(&mut self, client_id: &ClientId) -> Option<Client> {
        let client = self.clients.remove(client_id)?;
        info!("Client {} disconnected", client.handle.id());
        Some(client)
    }

    pub fn handle(&self, client_id: ClientId) -> Option<ClientHandle> {
        self.clients.get(&client_id).map(|c| c.handle.clone())
    }

    pub fn alias(&self, client_id: ClientId) -> Option<String> {
        self.clients.get(&client_id).map(|c| c.alias.clone())
    }

    /// Replaces a client's alias. Blank aliases are refused.
    pub fn set_alias(&mut self, client_id: ClientId, alias: &str) -> bool {
        match (self.clients.get_mut(&client_id), sanitize_alias(Some(alias.to_string()))) {
            (Some(client), Some(alias)) => {
                client.alias = alias;
                true
            }
            _ => false,
        }
    }

    pub fn touch(&mut self, client_id: ClientId) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_seen = Instant::now();
        }
    }

    /// Binds a client to a match. Fails if the client is gone or already
    /// playing.
    pub fn bind_match(&mut self, client_id: ClientId, match_id: MatchId) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) if client.active_match.is_none() => {
                client.active_match = Some(match_id);
                true
            }
            _ => false,
        }
    }

    pub fn active_match(&self, client_id: ClientId) -> Option<MatchId> {
        self.clients.get(&client_id).and_then(|c| c.active_match)
    }

    /// Registered, connected and not bound to a match.
    pub fn is_available(&self, client_id: ClientId) -> bool {
        self.clients
            .get(&client_id)
            .map_or(false, |c| c.active_match.is_none() && !c.handle.is_closed())
    }

    /// Clears every binding to `match_id` and returns the released clients.
    pub fn release_match(&mut self, match_id: MatchId) -> Vec<ClientId> {
        let mut released = Vec::new();
        for (id, client) in self.clients.iter_mut() {
            if client.active_match == Some(match_id) {
                client.active_match = None;
                released.push(*id);
            }
        }
        debug!("Match {} released clients {:?}", match_id, released);
        released
    }

    /// Clients that have been silent for longer than `timeout`.
    pub fn timed_out_clients(&self, timeout: Duration) -> Vec<ClientId> {
        self.clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn handles(&self) -> Vec<ClientHandle> {
        self.clients.values().map(|c| c.handle.clone()).collect()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn sanitize_alias(alias: Option<String>) -> Option<String> {
    let alias = alias?;
    let trimmed: String = alias.trim().chars().take(32).collect();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn add(manager: &mut ClientManager, alias: Option<&str>) -> (ClientHandle, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = manager
            .add_client(Some(test_addr()), sender, alias.map(str::to_string))
            .unwrap();
        (handle, receiver)
    }

    #[test]
    fn test_client_timeout() {
        let (handle, _rx) = ClientHandle::channel(1);
        let mut client = Client::new(handle, "a".into(), None);

        assert!(!client.is_timed_out(Duration::from_secs(1)));

        client.last_seen = Instant::now() - Duration::from_secs(2);

        assert!(client.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_client_manager_creation() {
        let manager = ClientManager::new(5);
        assert_eq!(manager.max_clients, 5);
        assert!(manager.is_empty());
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_add_multiple_clients() {
        let mut manager = ClientManager::new(3);
        let (first, _rx1) = add(&mut manager, None);
        let (second, _rx2) = add(&mut manager, Some("alice"));

        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert_eq!(manager.alias(1).as_deref(), Some("Player 1"));
        assert_eq!(manager.alias(2).as_deref(), Some("alice"));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1);
        let _first = add(&mut manager, None);

        let (sender, _rx) = mpsc::unbounded_channel();
        assert!(manager.add_client(None, sender, None).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_client() {
        let mut manager = ClientManager::new(2);
        let (handle, _rx) = add(&mut manager, None);

        assert!(manager.remove_client(&handle.id()).is_some());
        assert!(manager.remove_client(&handle.id()).is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_alias_rules() {
        let mut manager = ClientManager::new(2);
        let (handle, _rx) = add(&mut manager, Some("   "));
        assert_eq!(manager.alias(handle.id()).as_deref(), Some("Player 1"));

        assert!(!manager.set_alias(handle.id(), "  "));
        assert!(manager.set_alias(handle.id(), "  bob "));
        assert_eq!(manager.alias(handle.id()).as_deref(), Some("bob"));
        assert!(!manager.set_alias(99, "ghost"));
    }

    #[test]
    fn test_match_binding_is_exclusive() {
        let mut manager = ClientManager::new(3);
        let (a, _rx1) = add(&mut manager, None);
        let (b, _rx2) = add(&mut manager, None);

        assert!(manager.bind_match(a.id(), 7));
        assert!(!manager.bind_match(a.id(), 8));
        assert!(manager.bind_match(b.id(), 7));
        assert!(!manager.is_available(a.id()));

        let mut released = manager.release_match(7);
        released.sort();
        assert_eq!(released, vec![a.id(), b.id()]);
        assert_eq!(manager.active_match(a.id()), None);
        assert!(manager.is_available(a.id()));
        assert!(manager.release_match(7).is_empty());
    }

    #[test]
    fn test_closed_client_is_unavailable() {
        let mut manager = ClientManager::new(2);
        let (handle, rx) = add(&mut manager, None);
        drop(rx);
        assert!(handle.is_closed());
        assert!(!handle.send(ServerMessage::Ping));
        assert!(!manager.is_available(handle.id()));
    }

    #[test]
    fn test_timed_out_clients() {
        let mut manager = ClientManager::new(2);
        let (stale, _rx1) = add(&mut manager, None);
        let (_fresh, _rx2) = add(&mut manager, None);

        if let Some(client) = manager.clients.get_mut(&stale.id()) {
            client.last_seen = Instant::now() - Duration::from_secs(60);
        }

        assert_eq!(manager.timed_out_clients(Duration::from_secs(30)), vec![stale.id()]);
        manager.touch(stale.id());
        assert!(manager.timed_out_clients(Duration::from_secs(30)).is_empty());
    }
}
