use crate::profile::ProfileStore;
use crate::sync::ClientSyncManager;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use shared::{
    timestamp_ms, Direction, EntityId, Equipment, Intent, ItemStack, Packet, PlayerClass,
    PlayerInput, WorldEvent, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::interval;

/// Snapshots with a full grid exceed a single Ethernet frame.
const RECV_BUFFER_SIZE: usize = 65536;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const STATUS_INTERVAL: Duration = Duration::from_secs(5);
const WANDER_INTERVAL: Duration = Duration::from_millis(500);

/// Headless client: keeps the connection alive, feeds snapshots to the sync
/// manager and records rewards in the local profile.
pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    client_id: Option<u32>,
    entity_id: Option<EntityId>,
    connected: bool,
    class: PlayerClass,
    wander: bool,

    sync: ClientSyncManager,
    profile: ProfileStore,
    inventory: Vec<ItemStack>,
    equipment: Equipment,
    input_tick: u64,
    ping_ms: u64,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        class: PlayerClass,
        profile: ProfileStore,
        wander: bool,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            client_id: None,
            entity_id: None,
            connected: false,
            class,
            wander,
            sync: ClientSyncManager::new(),
            profile,
            inventory: Vec::new(),
            equipment: Equipment::default(),
            input_tick: 0,
            ping_ms: 0,
        })
    }

    pub fn entity_id(&self) -> Option<EntityId> {
        self.entity_id
    }

    pub fn sync(&self) -> &ClientSyncManager {
        &self.sync
    }

    pub fn profile(&self) -> &ProfileStore {
        &self.profile
    }

    pub fn inventory(&self) -> &[ItemStack] {
        &self.inventory
    }

    pub fn equipment(&self) -> &Equipment {
        &self.equipment
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to {}...", self.server_addr);
        let profile = self.profile.profile();
        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
            name: profile.name.clone(),
            class: self.class,
            gold: profile.gold,
        };
        self.send_packet(&packet).await
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Sends an intent stamped with the next input tick.
    pub async fn send_intent(&mut self, intent: Intent) -> Result<(), Box<dyn std::error::Error>> {
        if !self.connected {
            return Ok(());
        }
        self.input_tick += 1;
        let packet = Packet::Input(PlayerInput {
            tick: self.input_tick,
            intent,
        });
        self.send_packet(&packet).await
    }

    pub fn handle_packet(&mut self, packet: Packet, local_now_ms: f64) {
        match packet {
            Packet::Connected {
                client_id,
                entity_id,
            } => {
                info!("Connected as client {} (entity {})", client_id, entity_id);
                self.client_id = Some(client_id);
                self.entity_id = Some(entity_id);
                self.connected = true;
            }
            Packet::Event(event) => self.handle_event(event, local_now_ms),
            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                self.client_id = None;
                self.entity_id = None;
            }
            _ => warn!("Unexpected packet type"),
        }
    }

    fn is_me(&self, id: EntityId) -> bool {
        self.entity_id == Some(id)
    }

    fn handle_event(&mut self, event: WorldEvent, local_now_ms: f64) {
        match event {
            WorldEvent::Snapshot(snapshot) => {
                self.ping_ms = timestamp_ms().saturating_sub(snapshot.timestamp);
                self.sync.on_server_update(snapshot, local_now_ms);
            }
            WorldEvent::InitWorld {
                grid,
                grid_revision,
            } => {
                info!("World received: {}x{}", grid.width(), grid.height());
                self.sync.apply_grid(grid, grid_revision);
            }
            WorldEvent::UpdateInventory {
                inventory,
                equipment,
            } => {
                self.inventory = inventory;
                self.equipment = equipment;
            }
            WorldEvent::UpdateGold { id, amount } if self.is_me(id) => {
                if let Err(e) = self.profile.add_rewards(amount, 0) {
                    error!("Failed to save profile: {}", e);
                }
            }
            WorldEvent::PlayerExtracted { id } if self.is_me(id) => {
                info!("Extracted with {} gold banked", self.profile.profile().gold);
                if let Err(e) = self.profile.add_rewards(0, 1) {
                    error!("Failed to save profile: {}", e);
                }
                self.entity_id = None;
            }
            WorldEvent::EntityDeath { id } if self.is_me(id) => info!("You died"),
            WorldEvent::RespawnMonster { id, kind, x, y } if self.is_me(id) => {
                info!("You rise again as a {} at {},{}", kind, x, y);
            }
            WorldEvent::PortalSpawn { x, y } => info!("Escape portal opened at {},{}", x, y),
            WorldEvent::HumansEscaped { message } => info!("Game over: {}", message),
            other => debug!("Event: {:?}", other),
        }
    }

    fn log_status(&self) {
        let Some(state) = self.sync.get_interpolated_state(timestamp_ms() as f64) else {
            return;
        };
        let me = self
            .entity_id
            .and_then(|id| state.entities.iter().find(|e| e.state.id == id));
        match me {
            Some(me) => info!(
                "hp {}/{} at {:.1},{:.1} | {} entities | {:.0}s left | ping {} ms",
                me.state.hp,
                me.state.max_hp,
                me.x,
                me.y,
                state.entities.len(),
                state.game_time,
                self.ping_ms
            ),
            None => info!(
                "{} entities | {:.0}s left | ping {} ms",
                state.entities.len(),
                state.game_time,
                self.ping_ms
            ),
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        let mut status = interval(STATUS_INTERVAL);
        let mut wander = interval(WANDER_INTERVAL);
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => match deserialize::<Packet>(&buffer[0..len]) {
                            Ok(packet) => self.handle_packet(packet, timestamp_ms() as f64),
                            Err(e) => warn!("Failed to deserialize packet: {}", e),
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = heartbeat.tick() => {
                    if self.connected {
                        if let Err(e) = self.send_packet(&Packet::Heartbeat).await {
                            error!("Error sending heartbeat: {}", e);
                        }
                    } else {
                        self.connect().await?;
                    }
                },

                _ = wander.tick(), if self.wander => {
                    let direction = Direction::CARDINALS
                        .choose(&mut rand::thread_rng())
                        .copied()
                        .unwrap_or(Direction::RIGHT);
                    if let Err(e) = self.send_intent(Intent::Move { direction }).await {
                        error!("Error sending input: {}", e);
                    }
                },

                _ = status.tick() => self.log_status(),

                _ = tokio::signal::ctrl_c() => {
                    info!("Leaving the dungeon");
                    break;
                },
            }
        }

        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Snapshot, TileGrid, Tile};

    async fn client(tag: &str) -> Client {
        let path = std::env::temp_dir().join(format!(
            "dungeon-client-{}-{}.json",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        Client::new("127.0.0.1:9", PlayerClass::Fighter, ProfileStore::open(path), false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connected_then_rewards_go_to_profile() {
        let mut c = client("rewards").await;
        c.handle_packet(
            Packet::Connected {
                client_id: 1,
                entity_id: 7,
            },
            0.0,
        );
        assert_eq!(c.entity_id(), Some(7));

        c.handle_packet(Packet::Event(WorldEvent::UpdateGold { id: 7, amount: 4 }), 0.0);
        c.handle_packet(Packet::Event(WorldEvent::UpdateGold { id: 8, amount: 50 }), 0.0);
        c.handle_packet(Packet::Event(WorldEvent::PlayerExtracted { id: 7 }), 0.0);
        assert_eq!(c.profile().profile().gold, 4);
        assert_eq!(c.profile().profile().extractions, 1);
        assert_eq!(c.entity_id(), None);
        let _ = std::fs::remove_file(c.profile().path());
    }

    #[tokio::test]
    async fn test_world_and_snapshots_reach_sync() {
        let mut c = client("sync").await;
        c.handle_packet(
            Packet::Event(WorldEvent::InitWorld {
                grid: TileGrid::new(8, 8, Tile::Floor),
                grid_revision: 1,
            }),
            0.0,
        );
        assert_eq!(c.sync().grid_revision(), Some(1));

        let snapshot = Snapshot {
            timestamp: 5_000,
            game_time: 500.0,
            entities: Vec::new(),
            projectiles: Vec::new(),
            loot: Vec::new(),
            grid: None,
            grid_revision: 1,
        };
        c.handle_packet(Packet::Event(WorldEvent::Snapshot(snapshot)), 1_000.0);
        assert_eq!(c.sync().buffered_len(), 1);
        assert_eq!(c.sync().time_offset(), Some(4_000.0));
    }

    #[tokio::test]
    async fn test_disconnect_clears_identity() {
        let mut c = client("disconnect").await;
        c.handle_packet(
            Packet::Connected {
                client_id: 1,
                entity_id: 2,
            },
            0.0,
        );
        c.handle_packet(
            Packet::Disconnected {
                reason: "Server full".into(),
            },
            0.0,
        );
        assert_eq!(c.entity_id(), None);
    }
}
