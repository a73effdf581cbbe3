//! Connected clients and their queued intents.
//!
//! Each client maps a network address to the entity it controls. Intents are
//! buffered per client as they arrive and handed to the game once per tick in
//! input-tick order, so packets reordered by the network are still applied in
//! the order the player issued them.

use log::info;
use shared::{EntityId, PlayerInput};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Silence after which a client is considered gone.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);
/// Queued intents per client; the oldest are discarded beyond this.
const MAX_PENDING_INPUTS: usize = 64;

#[derive(Debug)]
pub struct Client {
    pub id: u32,
    pub addr: SocketAddr,
    pub name: String,
    /// Entity in the world, once the game has placed one.
    pub entity_id: Option<EntityId>,
    pub last_seen: Instant,
    pub pending_inputs: Vec<PlayerInput>,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr, name: &str) -> Self {
        Self {
            id,
            addr,
            name: name.to_string(),
            entity_id: None,
            last_seen: Instant::now(),
            pending_inputs: Vec::new(),
        }
    }

    /// Queues an intent, keeping the queue sorted by input tick. Equal ticks
    /// keep arrival order.
    pub fn add_input(&mut self, input: PlayerInput) {
        self.last_seen = Instant::now();
        self.pending_inputs.push(input);
        self.pending_inputs.sort_by_key(|i| i.tick);
        if self.pending_inputs.len() > MAX_PENDING_INPUTS {
            let excess = self.pending_inputs.len() - MAX_PENDING_INPUTS;
            self.pending_inputs.drain(..excess);
        }
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

pub struct ClientManager {
    clients: HashMap<u32, Client>,
    next_client_id: u32,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a new connection. Returns `None` when the server is full.
    pub fn add_client(&mut self, addr: SocketAddr, name: &str) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} ({}) connected from {}", client_id, name, addr);
        self.clients.insert(client_id, Client::new(client_id, addr, name));
        Some(client_id)
    }

    /// Binds a client to the entity the game created for it.
    pub fn attach_entity(&mut self, client_id: u32, entity_id: EntityId) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.entity_id = Some(entity_id);
                true
            }
            None => false,
        }
    }

    /// Removes a client, returning it so its entity can be cleaned up.
    pub fn remove_client(&mut self, client_id: u32) -> Option<Client> {
        let client = self.clients.remove(&client_id)?;
        info!("Client {} disconnected", client.id);
        Some(client)
    }

    pub fn get(&self, client_id: u32) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Address of the client controlling `entity_id`.
    pub fn addr_of_entity(&self, entity_id: EntityId) -> Option<SocketAddr> {
        self.clients
            .values()
            .find(|client| client.entity_id == Some(entity_id))
            .map(|client| client.addr)
    }

    /// Refreshes the activity timestamp.
    pub fn touch(&mut self, client_id: u32) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_seen = Instant::now();
        }
    }

    pub fn add_input(&mut self, client_id: u32, input: PlayerInput) -> bool {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.add_input(input);
            true
        } else {
            false
        }
    }

    /// Takes every queued intent of clients that own an entity, ordered by
    /// input tick across clients and by entity id on ties.
    pub fn drain_inputs(&mut self) -> Vec<(EntityId, PlayerInput)> {
        let mut all_inputs: Vec<(EntityId, PlayerInput)> = Vec::new();
        for client in self.clients.values_mut() {
            let Some(entity_id) = client.entity_id else {
                continue;
            };
            all_inputs.extend(client.pending_inputs.drain(..).map(|input| (entity_id, input)));
        }
        all_inputs.sort_by_key(|(entity_id, input)| (input.tick, *entity_id));
        all_inputs
    }

    /// Removes clients silent for longer than `timeout` and returns them.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<Client> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|client_id| self.remove_client(client_id))
            .collect()
    }

    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
