//! Headless client for poking a running arena server.
//!
//! Connects under an alias, starts a bot match or joins a queue, then plays
//! with the hard AI until the match ends.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use shared::classic::lane_view_for;
use shared::protocol::QueueMode;
use shared::{ClientMessage, Difficulty, ServerMessage, StateSnapshot, MAX_POWER_UPS, PADDLE_HEIGHT};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Paddle centre offset below which the probe stops steering.
const STEER_DEADZONE: f32 = 4.0;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short = 'H', long, default_value = "127.0.0.1:8080")]
    server: String,
    /// Alias to play under
    #[clap(short, long, default_value = "probe")]
    alias: String,
    /// Queue to join instead of starting a bot match
    #[clap(short, long)]
    queue: Option<String>,
    /// Bot difficulty for the bot match
    #[clap(short, long, default_value = "medium")]
    difficulty: String,
    /// Play with power-ups
    #[clap(long)]
    custom: bool,
}

fn parse_difficulty(value: &str) -> Difficulty {
    match value {
        "easy" => Difficulty::Easy,
        "hard" => Difficulty::Hard,
        _ => Difficulty::Medium,
    }
}

/// Chooses key input that moves our paddle towards the AI's target.
fn steer(seat: usize, state: &StateSnapshot, strategy: &mut dyn shared::AiStrategy) -> ClientMessage {
    let Some(me) = state.players.get(seat) else {
        return ClientMessage::Input {
            up: false,
            down: false,
            slot1: false,
            slot2: false,
            slot3: false,
        };
    };

    let mut power_ups = [None; MAX_POWER_UPS];
    let mut pending = [false; MAX_POWER_UPS];
    for slot in 0..MAX_POWER_UPS {
        power_ups[slot] = me.power_ups.get(slot).copied().flatten();
        pending[slot] = me.pending.get(slot).copied().unwrap_or(false);
    }

    let view = lane_view_for(seat, &state.ball, power_ups, pending);
    let decision = strategy.refresh_and_decide(&view);
    let offset = decision.target - (me.paddle_y + PADDLE_HEIGHT / 2.0);
    let mut slots = [false; MAX_POWER_UPS];
    if let Some(slot) = decision.activate {
        slots[slot] = true;
    }

    ClientMessage::Input {
        up: offset < -STEER_DEADZONE,
        down: offset > STEER_DEADZONE,
        slot1: slots[0],
        slot2: slots[1],
        slot3: slots[2],
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let url = format!("ws://{}/?alias={}", args.server, args.alias.replace(' ', "+"));
    println!("Connecting to {}", url);
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = ws_stream.split();

    let opening = match args.queue.as_deref() {
        Some("custom") => ClientMessage::JoinQueue { mode: QueueMode::Custom },
        Some(_) => ClientMessage::JoinQueue { mode: QueueMode::Normal },
        None => ClientMessage::CreateAiMatch {
            difficulty: parse_difficulty(&args.difficulty),
            is_custom: args.custom,
        },
    };
    sink.send(Message::Text(serde_json::to_string(&opening)?)).await?;

    let mut strategy = Difficulty::Hard.strategy();
    let mut seat = 0;
    let mut last_input = None;

    while let Some(frame) = stream.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let message: ServerMessage = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(e) => {
                println!("Unreadable frame ({}): {}", e, text);
                continue;
            }
        };

        match message {
            ServerMessage::Waiting { mode } => println!("Waiting in {:?} queue", mode),
            ServerMessage::GameStart {
                player_role,
                player1_name,
                player2_name,
                is_custom,
                ..
            } => {
                seat = if player_role == "player2" { 1 } else { 0 };
                println!(
                    "Match started: {} vs {} (custom: {}), playing as {}",
                    player1_name, player2_name, is_custom, player_role
                );
            }
            ServerMessage::GameState { data } => {
                let input = steer(seat, &data, strategy.as_mut());
                if last_input.as_ref() != Some(&input) {
                    sink.send(Message::Text(serde_json::to_string(&input)?)).await?;
                    last_input = Some(input);
                }
                if data.tick % 120 == 0 {
                    let scores: Vec<u32> = data.players.iter().map(|p| p.score).collect();
                    println!("Tick {}: scores {:?}", data.tick, scores);
                }
            }
            ServerMessage::GameOver(report) => {
                println!(
                    "Game over, winner {:?} ({}-{}), forfeit: {}",
                    report.winner,
                    report.lives1,
                    report.lives2,
                    report.forfeit.unwrap_or(false)
                );
                if report.should_disconnect {
                    break;
                }
            }
            ServerMessage::Ping => {
                sink.send(Message::Text(serde_json::to_string(&ClientMessage::Pong)?))
                    .await?;
            }
            ServerMessage::Error { reason } => println!("Server error: {}", reason),
            other => println!("{:?}", other),
        }
    }

    let _ = sink.close().await;
    println!("Probe client finished");
    Ok(())
}
