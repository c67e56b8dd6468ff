//! Command line configuration for the arena server.

use crate::error::ArenaError;
use clap::Parser;
use shared::{DEFAULT_SCORE_TARGET, DEFAULT_TICK_RATE};
use std::time::Duration;

/// Runtime settings, parsed from the command line.
#[derive(Parser, Debug, Clone, PartialEq)]
#[clap(author, version, about)]
pub struct ServerConfig {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    pub port: u16,
    /// Simulation ticks per second for every match
    #[clap(short, long, default_value_t = DEFAULT_TICK_RATE)]
    pub tick_rate: u32,
    /// Points needed to win a classic match
    #[clap(long, default_value_t = DEFAULT_SCORE_TARGET)]
    pub score_target: u32,
    /// Players needed before a quick tournament starts
    #[clap(long, default_value = "4")]
    pub tournament_size: usize,
    /// Replace disconnected tournament players with bots instead of
    /// awarding a walkover
    #[clap(long)]
    pub substitute_bots: bool,
    /// Ticks between fresh AI observations
    #[clap(long, default_value = "1")]
    pub ai_refresh_ticks: u32,
    /// Seconds of silence before a client is dropped (0 disables)
    #[clap(long, default_value = "30")]
    pub client_timeout_secs: u64,
    /// Maximum number of concurrent connections
    #[clap(short, long, default_value = "256")]
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::parse_from(["server"])
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn client_timeout(&self) -> Option<Duration> {
        match self.client_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Heartbeat period: three pings per timeout window.
    pub fn ping_interval(&self) -> Option<Duration> {
        self.client_timeout().map(|timeout| timeout / 3)
    }

    pub fn validate(&self) -> Result<(), ArenaError> {
        if !(1..=240).contains(&self.tick_rate) {
            return Err(ArenaError::Config(format!(
                "tick rate must be between 1 and 240, got {}",
                self.tick_rate
            )));
        }
        if self.score_target == 0 {
            return Err(ArenaError::Config("score target must be at least 1".into()));
        }
        if !(2..=64).contains(&self.tournament_size) {
            return Err(ArenaError::Config(format!(
                "tournament size must be between 2 and 64, got {}",
                self.tournament_size
            )));
        }
        if self.ai_refresh_ticks == 0 {
            return Err(ArenaError::Config("AI refresh interval must be at least 1 tick".into()));
        }
        if self.max_clients == 0 {
            return Err(ArenaError::Config("max clients must be at least 1".into()));
        }
        Ok(())
    }
}
