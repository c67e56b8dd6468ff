//! Performance benchmarks for critical arena systems

use server::client_manager::ClientHandle;
use server::matchmaking::{Matchmaker, QueueEntry, QueueOutcome};
use server::tournament::{Competitor, RoundProgress, Tournament};
use shared::protocol::{parse_client_message, QueueMode};
use shared::{
    ClassicMatch, Difficulty, MatchConfig, PaddleControl, RoyaleMatch, RoyaleSettings, ServerMessage,
};
use std::time::Instant;

const FRAME_MS: f32 = 1000.0 / 60.0;

/// Benchmarks a bot-driven classic match, one tick at a time
#[test]
fn benchmark_classic_simulation() {
    let config = MatchConfig {
        score_target: 5,
        custom: true,
    };
    let mut game = ClassicMatch::new(["left".to_string(), "right".to_string()], config, 7);
    let mut bots = [Difficulty::Hard.strategy(), Difficulty::Medium.strategy()];

    let iterations = 10_000;
    let mut rematches = 0;
    let start = Instant::now();

    for _ in 0..iterations {
        if game.is_terminal() {
            game.rematch();
            rematches += 1;
        }
        for (seat, bot) in bots.iter_mut().enumerate() {
            let decision = bot.refresh_and_decide(&game.lane_view(seat));
            game.set_control(seat, PaddleControl::Target(decision.target));
            if let Some(slot) = decision.activate {
                game.select_power_up(seat, slot);
            }
        }
        game.advance(FRAME_MS);
    }

    let duration = start.elapsed();
    println!(
        "Classic simulation: {} ticks in {:?} ({:.2} μs/tick, {} rematches)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64,
        rematches
    );

    // Far faster than real time: 10k ticks is almost three minutes of play
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks a six-player battle royale with fruit spawns
#[test]
fn benchmark_royale_simulation() {
    let names: Vec<String> = (1..=6).map(|i| format!("bot {}", i)).collect();
    let settings = RoyaleSettings {
        lives: 1_000,
        ..RoyaleSettings::default()
    };
    let mut arena = RoyaleMatch::new(names, settings, 11).expect("six players fit an arena");
    let mut bots: Vec<_> = (0..6).map(|_| Difficulty::Hard.strategy()).collect();

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        for (seat, bot) in bots.iter_mut().enumerate() {
            if let Some(view) = arena.lane_view(seat) {
                let decision = bot.refresh_and_decide(&view);
                arena.set_control(seat, PaddleControl::Target(decision.target));
            }
        }
        arena.advance(FRAME_MS);
    }

    let duration = start.elapsed();
    println!(
        "Royale simulation: {} ticks in {:?} ({:.2} μs/tick)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 3000);
}

/// Benchmarks snapshot encoding, the per-tick cost of every broadcast
#[test]
fn benchmark_snapshot_serialization() {
    let mut game = ClassicMatch::new(["a".to_string(), "b".to_string()], MatchConfig::default(), 3);
    game.advance(FRAME_MS);
    let message = ServerMessage::GameState {
        data: game.snapshot(),
    };

    let iterations = 10_000;
    let start = Instant::now();
    let mut bytes = 0;

    for _ in 0..iterations {
        let text = serde_json::to_string(&message).unwrap();
        bytes += text.len();
    }

    let duration = start.elapsed();
    println!(
        "Snapshot serialization: {} messages, {} bytes in {:?} ({:.2} μs/msg)",
        iterations,
        bytes,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks inbound frame parsing including type validation
#[test]
fn benchmark_input_parsing() {
    let frames = [
        r#"{"type":"input","up":true,"down":false,"slot1":false,"slot2":true,"slot3":false}"#,
        r#"{"type":"player_input","direction":"down"}"#,
        r#"{"type":"ping"}"#,
        r#"{"type":"bogus"}"#,
    ];

    let iterations = 20_000;
    let start = Instant::now();
    let mut parsed = 0;

    for i in 0..iterations {
        if parse_client_message(frames[i % frames.len()]).is_ok() {
            parsed += 1;
        }
    }

    let duration = start.elapsed();
    println!(
        "Input parsing: {} frames in {:?} ({:.2} μs/frame)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(parsed, iterations / 4 * 3);
    assert!(duration.as_millis() < 2000);
}

/// Stress test: many arrivals through one queue
#[test]
fn stress_test_queue_pairing() {
    let mut matchmaker = Matchmaker::new();
    let mut receivers = Vec::new();
    let mut pairs = 0;

    let iterations = 10_000;
    let start = Instant::now();

    for id in 1..=iterations {
        let (handle, rx) = ClientHandle::channel(id);
        receivers.push(rx);
        if let QueueOutcome::Paired { player1, player2 } =
            matchmaker.add_to_queue(QueueMode::Normal, QueueEntry::new(handle, "p"))
        {
            assert!(player1.id() < player2.id());
            pairs += 1;
        }
    }

    let duration = start.elapsed();
    println!("Queue pairing: {} arrivals in {:?}", iterations, duration);

    assert_eq!(pairs, iterations / 2);
    assert_eq!(matchmaker.queued(QueueMode::Normal), 0);
    assert!(duration.as_millis() < 500);
}

/// Benchmarks running a 64-player bracket to completion
#[test]
fn benchmark_bracket_progression() {
    let iterations = 100;
    let start = Instant::now();

    for _ in 0..iterations {
        let mut tournament = Tournament::new(1, "Bench Cup", 64);
        for i in 0..64 {
            tournament
                .register(Competitor::Bot {
                    name: format!("bot {}", i),
                    difficulty: Difficulty::Easy,
                })
                .unwrap();
        }

        let mut open = tournament.start().unwrap();
        let mut played = 0;
        'bracket: loop {
            let mut next = Vec::new();
            for bracket_match in &open {
                played += 1;
                match tournament.record_result(bracket_match.id, 1, (3, 5)).unwrap() {
                    RoundProgress::NextRound(matches) => next = matches,
                    RoundProgress::Completed { .. } => break 'bracket,
                    RoundProgress::Pending => {}
                }
            }
            open = next;
        }
        assert_eq!(played, 63);
    }

    let duration = start.elapsed();
    println!(
        "Bracket progression: {} tournaments in {:?} ({:.2} μs/tournament)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}
