//! # Dungeon Client Library
//!
//! The client side of the dungeon crawler. The server is authoritative, so the
//! client never simulates rules: it sends intents, buffers the snapshots it
//! receives and renders an interpolated view of the recent past.
//!
//! ## Module Organization
//!
//! ### Sync Module (`sync`)
//! [`sync::ClientSyncManager`] estimates the server clock offset from the
//! first snapshot, keeps a bounded timestamp-ordered buffer and blends
//! entity and projectile positions between the two snapshots that bracket
//! the render time. Outside the buffered range it falls back to the nearest
//! snapshot.
//!
//! ### Profile Module (`profile`)
//! [`profile::ProfileStore`] persists the player's name, banked gold and
//! extraction count as JSON. A missing or corrupt file never blocks startup.
//!
//! ### Network Module (`network`)
//! A headless UDP client that joins with the stored profile, keeps the
//! connection alive and routes events to the sync manager and the profile.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use client::profile::ProfileStore;
//! use shared::PlayerClass;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let profile = ProfileStore::open("profile.json");
//!     let mut client = Client::new("127.0.0.1:8080", PlayerClass::Rogue, profile, false).await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod profile;
pub mod sync;
