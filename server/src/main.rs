use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::{Server, ServerEvent};

/// Main-method of the application.
/// Parses command-line arguments, then runs the server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ServerConfig::parse();
    config.validate()?;
    info!(
        "Starting arena server on {} at {} Hz",
        config.address(),
        config.tick_rate
    );

    let mut server = Server::new(config);
    let events = server.event_sender();

    // Handle shutdown gracefully
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = events.send(ServerEvent::Shutdown);
        }
    });

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
