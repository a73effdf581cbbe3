//! Performance benchmarks for critical game systems

use bincode::serialize;
use rand::rngs::StdRng;
use rand::SeedableRng;
use server::config::GameConfig;
use server::dungeon::DungeonGenerator;
use server::game::Game;
use server::grid::GridSystem;
use shared::{Direction, EntityRow, EntityState, Intent, Packet, PlayerClass, PlayerInput, Team, WorldEvent};
use std::sync::Arc;
use std::time::Instant;

fn populated_game() -> Game {
    let mut game = Game::new(Arc::new(GameConfig::default()), Some(7));
    game.start_game();
    for (i, class) in [PlayerClass::Fighter, PlayerClass::Rogue, PlayerClass::Barbarian]
        .into_iter()
        .enumerate()
    {
        game.add_player(&format!("Bench{}", i), class, 0);
    }
    game.drain_outbox();
    game
}

/// Benchmarks full dungeon generation
#[test]
fn benchmark_dungeon_generation() {
    let config = GameConfig::default();
    let generator = DungeonGenerator::new(&config.global);
    let mut rng = StdRng::seed_from_u64(1);

    let iterations = 20;
    let start = Instant::now();

    for _ in 0..iterations {
        let dungeon = generator.generate(&mut rng);
        assert!(!dungeon.rooms.is_empty());
    }

    let duration = start.elapsed();
    println!(
        "Dungeon generation: {} iterations in {:?} ({:.2} ms/iter)",
        iterations,
        duration,
        duration.as_millis() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks A* between the two rooms farthest apart
#[test]
fn benchmark_pathfinding() {
    let config = Arc::new(GameConfig::default());
    let generator = DungeonGenerator::new(&config.global);
    let dungeon = generator.generate(&mut StdRng::seed_from_u64(2));
    let grid = GridSystem::new(config, dungeon);

    let rooms = grid.rooms();
    let from = (rooms[0].center_x, rooms[0].center_y);
    let to = rooms
        .iter()
        .map(|r| (r.center_x, r.center_y))
        .max_by_key(|(x, y)| (x - from.0).abs() + (y - from.1).abs())
        .unwrap_or(from);

    let iterations = 200;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = grid.find_path(from, to);
    }

    let duration = start.elapsed();
    println!(
        "Pathfinding {:?} -> {:?}: {} iterations in {:?} ({:.2} μs/iter)",
        from,
        to,
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 3000);
}

/// Benchmarks the authoritative tick with a populated dungeon
#[test]
fn benchmark_game_update() {
    let mut game = populated_game();
    let players: Vec<u32> = game
        .combat()
        .iter()
        .filter(|(_, s)| s.team == Team::Player)
        .map(|(id, _)| id)
        .collect();

    let ticks = 400u64;
    let start = Instant::now();

    for tick in 1..=ticks {
        for (i, id) in players.iter().enumerate() {
            let direction = Direction::CARDINALS[(tick as usize + i) % 4];
            game.handle_player_input(
                *id,
                PlayerInput {
                    tick,
                    intent: Intent::Move { direction },
                },
            );
        }
        game.update(tick, 50.0);
        game.drain_outbox();
    }

    let duration = start.elapsed();
    println!(
        "Game update: {} ticks with {} entities in {:?} ({:.2} μs/tick)",
        ticks,
        game.grid().entity_count(),
        duration,
        duration.as_micros() as f64 / ticks as f64
    );

    // 400 ticks is 20 seconds of play
    assert!(duration.as_millis() < 4000);
}

/// Benchmarks building and serializing a snapshot
#[test]
fn benchmark_snapshot_serialization() {
    let mut game = populated_game();
    game.update(1, 50.0);

    let iterations = 1000;
    let start = Instant::now();
    let mut bytes = 0;

    for i in 0..iterations {
        let snapshot = game.get_authoritative_state(i as u64);
        let packet = Packet::Event(WorldEvent::Snapshot(snapshot));
        bytes = serialize(&packet).unwrap().len();
    }

    let duration = start.elapsed();
    println!(
        "Snapshot serialization: {} iterations in {:?} ({:.2} μs/iter, {} bytes)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64,
        bytes
    );

    assert!(duration.as_millis() < 3000);
}

/// Benchmarks the positional entity row codec
#[test]
fn benchmark_entity_row_codec() {
    let state = EntityState {
        id: 42,
        x: 17,
        y: 23,
        facing: Direction::LEFT,
        hp: 55,
        max_hp: 110,
        kind: "player".to_string(),
        team: Team::Player,
        invisible: false,
        next_action_tick: 300,
        last_processed_input_tick: 120,
    };

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let row = EntityRow::encode(&state);
        let decoded = row.decode();
        assert_eq!(decoded.id, 42);
    }

    let duration = start.elapsed();
    println!(
        "Entity row codec: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}
