//! # Arena Server Library
//!
//! This library provides the authoritative server for the Pong arena. Clients
//! connect over WebSocket, send JSON input, and receive state snapshots from
//! the only true simulation, which runs here.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Every match runs on its own fixed-rate tick task. Clients only ever send
//! intent (paddle direction, power-up slot selection); scores, collisions and
//! eliminations are decided by the server.
//!
//! ### Match Orchestration
//! Players reach a match through one of four doors:
//! - The normal or custom matchmaking queue (first come, first paired)
//! - An instant match against a bot of a chosen difficulty
//! - A quick single-elimination tournament
//! - A lobby that starts either a battle royale or a lobby tournament
//!
//! ### Client Lifecycle
//! A client is bound to at most one running match. Disconnecting forfeits a
//! duel, eliminates a battle-royale contender, and withdraws the client from
//! queues, lobbies and tournaments that have not started.
//!
//! ## Architecture Design
//!
//! ### Central Event Loop
//! Socket reads, closes and match completions are funnelled into one event
//! loop owned by [`network::Server`]. The loop owns the queues and lobbies,
//! so pairing and cleanup are applied in a single order.
//!
//! ### Shared State
//! Only two pieces of state cross task boundaries: the client registry
//! (`Arc<tokio::sync::RwLock<ClientManager>>`), which match tasks use to
//! release their bindings, and the tournament manager
//! (`Arc<std::sync::Mutex<TournamentManager>>`), which completion hooks
//! update synchronously.
//!
//! ## Module Organization
//!
//! - [`client_manager`]: connection registry and match bindings
//! - [`config`]: command line settings
//! - [`error`]: the server error type
//! - [`game`]: match rooms and their tick tasks
//! - [`matchmaking`]: the two FIFO queues
//! - [`tournament`]: bracket state machine
//! - [`lobby`]: pre-match rooms with bot slots and readiness
//! - [`network`]: WebSocket transport and the event loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use clap::Parser;
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::parse();
//!     config.validate()?;
//!
//!     let mut server = Server::new(config);
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod error;
pub mod game;
pub mod lobby;
pub mod matchmaking;
pub mod network;
pub mod tournament;
