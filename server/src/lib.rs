//! # Dungeon Server Library
//!
//! The authoritative simulation for a real-time multiplayer dungeon crawler.
//! Humans enter a freshly generated dungeon, fight monsters, loot chests and
//! race to an escape portal before the dungeon collapses. Humans who die come
//! back as monsters and hunt the survivors.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Every rule is decided here. Clients only send intents ("step left",
//! "attack that cell", "equip this sword") and render the snapshots they get
//! back. Intents are validated against the entity's action cooldown, its
//! position and its inventory before anything changes.
//!
//! ### Fixed Timestep
//! The world advances in whole ticks (20 per second by default). All timing
//! rules are expressed in ticks: action cooldowns, despawn delays, buff
//! durations and monster memory. Wall-clock jitter never leaks into the rules.
//!
//! ### State Broadcasting
//! After each tick the server sends a compact snapshot of every entity,
//! projectile and loot container. The tile grid rides along only when it
//! changed or periodically for late joiners. Discrete happenings such as
//! deaths, portal spawns and gold updates go out as separate events.
//!
//! ## Module Organization
//!
//! - `config`: global tuning and the item, enemy and class tables
//! - `dungeon`: BSP dungeon generation and terrain decoration
//! - `grid`: occupancy, movement, line of sight, pathfinding and lava
//! - `combat`: stats, damage, cooldowns, abilities and respawning
//! - `loot`: chests, bags, inventories and equipment
//! - `projectile`: ranged shots with sub-stepped collision
//! - `ai`: the idle/chase state machine driving monsters
//! - `ticker`: fixed-timestep scheduling with stall protection
//! - `game`: the orchestrator tying the systems together
//! - `client_manager`: connected clients and their intent queues
//! - `network`: the UDP transport and main loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::GameConfig;
//! use server::game::Game;
//! use server::network::Server;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(GameConfig::default());
//!     let tick_rate = config.global.tick_rate as f64;
//!
//!     let mut game = Game::new(config, Some(42));
//!     game.start_game();
//!
//!     let mut server = Server::new("127.0.0.1:8080", game, tick_rate, 16).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod ai;
pub mod client_manager;
pub mod combat;
pub mod config;
pub mod dungeon;
pub mod game;
pub mod grid;
pub mod loot;
pub mod network;
pub mod projectile;
pub mod ticker;
