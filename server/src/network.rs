//! Server network layer: UDP transport and the fixed-rate game loop.
//!
//! Three background tasks surround the main loop. One receives and decodes
//! datagrams, one sends queued packets, and one expires silent clients. The main loop owns
//! the [`Game`] and is the only place that mutates it.

use crate::client_manager::{ClientManager, CLIENT_TIMEOUT};
use crate::game::{Game, Outbound};
use crate::ticker::Ticker;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{timestamp_ms, Packet, WorldEvent, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

/// Client datagrams are small; anything larger is dropped.
const RECV_BUFFER_SIZE: usize = 2048;

/// Messages sent from network tasks to the main loop.
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: u32, entity_id: Option<u32> },
    Shutdown,
}

/// Messages sent from the main loop to the sender task.
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<u32>,
    },
}

pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    game: Game,
    ticker: Ticker,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        game: Game,
        tick_rate: f64,
        max_clients: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            game,
            ticker: Ticker::new(tick_rate),
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    /// Handle for asking the main loop to stop.
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; RECV_BUFFER_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match deserialize::<Packet>(&buffer[0..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };
                        let data = match serialize(&packet) {
                            Ok(data) => data,
                            Err(e) => {
                                error!("Failed to serialize broadcast: {}", e);
                                continue;
                            }
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }
                            if let Err(e) = socket.send_to(&data, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    async fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(CLIENT_TIMEOUT)
                };

                for client in timed_out {
                    let message = ServerMessage::ClientTimeout {
                        client_id: client.id,
                        entity_id: client.entity_id,
                    };
                    if let Err(e) = server_tx.send(message) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<u32>) {
        if let Err(e) = self
            .game_tx
            .send(GameMessage::BroadcastPacket { packet, exclude })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect {
                client_version,
                name,
                class,
                gold,
            } => {
                info!(
                    "Client {} connecting from {} (version: {})",
                    name, addr, client_version
                );
                if client_version != PROTOCOL_VERSION {
                    let response = Packet::Disconnected {
                        reason: "Protocol version mismatch".to_string(),
                    };
                    self.send_packet(response, addr);
                    return;
                }

                let existing = {
                    let mut clients = self.clients.write().await;
                    clients
                        .find_client_by_addr(addr)
                        .and_then(|id| clients.remove_client(id))
                };
                if let Some(existing) = existing {
                    info!("Replacing client {} from {}", existing.id, addr);
                    if let Some(entity_id) = existing.entity_id {
                        self.game.remove_player(entity_id);
                    }
                }

                let client_id = {
                    let mut clients = self.clients.write().await;
                    clients.add_client(addr, &name)
                };

                let Some(client_id) = client_id else {
                    let response = Packet::Disconnected {
                        reason: "Server full".to_string(),
                    };
                    self.send_packet(response, addr);
                    return;
                };

                let entity_id = self.game.add_player(&name, class, gold);
                self.clients.write().await.attach_entity(client_id, entity_id);
                self.send_packet(
                    Packet::Connected {
                        client_id,
                        entity_id,
                    },
                    addr,
                );
                self.send_packet(Packet::Event(self.game.init_world_event()), addr);
                self.dispatch_events().await;
            }

            Packet::Input(input) => {
                let mut clients = self.clients.write().await;
                match clients.find_client_by_addr(addr) {
                    Some(client_id) => {
                        clients.add_input(client_id, input);
                    }
                    None => debug!("Input from unknown address {}", addr),
                }
            }

            Packet::Heartbeat => {
                let mut clients = self.clients.write().await;
                if let Some(client_id) = clients.find_client_by_addr(addr) {
                    clients.touch(client_id);
                }
            }

            Packet::Disconnect => {
                let removed = {
                    let mut clients = self.clients.write().await;
                    clients
                        .find_client_by_addr(addr)
                        .and_then(|id| clients.remove_client(id))
                };
                if let Some(entity_id) = removed.and_then(|c| c.entity_id) {
                    self.game.remove_player(entity_id);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Sends everything the game queued since the last call.
    async fn dispatch_events(&mut self) {
        let outbox = self.game.drain_outbox();
        if outbox.is_empty() {
            return;
        }
        let clients = self.clients.read().await;
        for outbound in outbox {
            match outbound {
                Outbound::Broadcast(event) => self.broadcast_packet(Packet::Event(event), None),
                Outbound::Unicast(entity_id, event) => match clients.addr_of_entity(entity_id) {
                    Some(addr) => self.send_packet(Packet::Event(event), addr),
                    None => debug!("No client for entity {}, event dropped", entity_id),
                },
            }
        }
    }

    async fn broadcast_snapshot(&mut self) {
        if self.clients.read().await.is_empty() {
            return;
        }
        let snapshot = self.game.get_authoritative_state(timestamp_ms());
        self.broadcast_packet(Packet::Event(WorldEvent::Snapshot(snapshot)), None);
    }

    /// Feeds queued intents to the game, runs due ticks and publishes the
    /// results. Returns the delay until the next step.
    async fn step(&mut self) -> Duration {
        let inputs = self.clients.write().await.drain_inputs();
        for (entity_id, input) in inputs {
            self.game.handle_player_input(entity_id, input);
        }

        let before = self.ticker.tick();
        let game = &mut self.game;
        let delay = self
            .ticker
            .pump(std::time::Instant::now(), |tick, dt_ms| game.update(tick, dt_ms));
        let ticked = self.ticker.tick() != before;

        self.dispatch_events().await;
        if ticked {
            self.broadcast_snapshot().await;
            if self.ticker.tick() % 200 == 0 {
                let client_count = self.clients.read().await.len();
                debug!(
                    "Tick {}: {} clients, {} entities, {:.0}s left",
                    self.ticker.tick(),
                    client_count,
                    self.game.grid().entity_count(),
                    self.game.game_time()
                );
            }
        }
        delay
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        info!(
            "Server started at {:.0} Hz",
            1000.0 / self.ticker.time_per_tick_ms()
        );

        let sleep = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(sleep);
        let mut game_over_logged = false;

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id, entity_id }) => {
                            info!("Client {} timed out", client_id);
                            if let Some(entity_id) = entity_id {
                                self.game.remove_player(entity_id);
                            }
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = &mut sleep => {
                    let delay = self.step().await;
                    sleep.as_mut().reset(Instant::now() + delay);
                    if self.game.is_game_over() && !game_over_logged {
                        info!("Match finished at tick {}", self.ticker.tick());
                        game_over_logged = true;
                    }
                },
            }
        }

        Ok(())
    }
}
