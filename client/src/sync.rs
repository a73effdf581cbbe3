//! Client-side snapshot buffering and interpolation.
//!
//! Snapshots arrive unordered and at the server's tick rate. The manager keeps
//! a short timestamp-ordered buffer, estimates the offset between the server
//! clock and the local clock from the first snapshot, and renders the world
//! slightly in the past so that two snapshots usually bracket the render time.

use log::debug;
use shared::{EntityState, Projectile, Snapshot, TileGrid};
use std::collections::HashMap;

pub const DEFAULT_INTERPOLATION_DELAY_MS: f64 = 75.0;
pub const MAX_BUFFERED_SNAPSHOTS: usize = 60;

/// An entity at a possibly fractional position.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderEntity {
    pub x: f32,
    pub y: f32,
    pub state: EntityState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedState {
    /// Server-clock time this state represents.
    pub render_time: f64,
    pub game_time: f32,
    pub entities: Vec<RenderEntity>,
    pub projectiles: Vec<Projectile>,
}

pub struct ClientSyncManager {
    /// Ordered by timestamp, oldest first.
    buffer: Vec<Snapshot>,
    time_offset: Option<f64>,
    interpolation_delay_ms: f64,
    grid: Option<TileGrid>,
    grid_revision: Option<u32>,
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

impl ClientSyncManager {
    pub fn new() -> Self {
        Self::with_delay(DEFAULT_INTERPOLATION_DELAY_MS)
    }

    pub fn with_delay(interpolation_delay_ms: f64) -> Self {
        Self {
            buffer: Vec::new(),
            time_offset: None,
            interpolation_delay_ms,
            grid: None,
            grid_revision: None,
        }
    }

    /// `server - local`, fixed by the first snapshot received.
    pub fn time_offset(&self) -> Option<f64> {
        self.time_offset
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.buffer.last()
    }

    pub fn grid(&self) -> Option<&TileGrid> {
        self.grid.as_ref()
    }

    pub fn grid_revision(&self) -> Option<u32> {
        self.grid_revision
    }

    /// Stores a full grid unless a newer revision is already held.
    pub fn apply_grid(&mut self, grid: TileGrid, revision: u32) {
        if self.grid_revision.map_or(true, |current| revision >= current) {
            self.grid = Some(grid);
            self.grid_revision = Some(revision);
        }
    }

    /// Buffers a snapshot received at `local_now_ms`. Out-of-order snapshots
    /// are slotted in place and a duplicate timestamp replaces the older copy.
    pub fn on_server_update(&mut self, mut snapshot: Snapshot, local_now_ms: f64) {
        if self.time_offset.is_none() {
            let offset = snapshot.timestamp as f64 - local_now_ms;
            debug!("Clock offset to server: {:.1} ms", offset);
            self.time_offset = Some(offset);
        }
        if let Some(grid) = snapshot.grid.take() {
            self.apply_grid(grid, snapshot.grid_revision);
        }

        match self
            .buffer
            .binary_search_by_key(&snapshot.timestamp, |s| s.timestamp)
        {
            Ok(index) => self.buffer[index] = snapshot,
            Err(index) => {
                if index == 0 && self.buffer.len() >= MAX_BUFFERED_SNAPSHOTS {
                    debug!("Dropping stale snapshot {}", snapshot.timestamp);
                    return;
                }
                self.buffer.insert(index, snapshot);
            }
        }
        if self.buffer.len() > MAX_BUFFERED_SNAPSHOTS {
            let excess = self.buffer.len() - MAX_BUFFERED_SNAPSHOTS;
            self.buffer.drain(..excess);
        }
    }

    /// Server-clock time to render at local time `local_now_ms`.
    pub fn render_time(&self, local_now_ms: f64) -> Option<f64> {
        self.time_offset
            .map(|offset| local_now_ms + offset - self.interpolation_delay_ms)
    }

    /// World state to draw at local time `local_now_ms`.
    pub fn get_interpolated_state(&self, local_now_ms: f64) -> Option<InterpolatedState> {
        self.state_at(self.render_time(local_now_ms)?)
    }

    /// World state at a server-clock time. Outside the buffered range the
    /// nearest snapshot is returned as is.
    pub fn state_at(&self, render_time: f64) -> Option<InterpolatedState> {
        let split = self
            .buffer
            .partition_point(|s| s.timestamp as f64 <= render_time);
        let prev = split.checked_sub(1).and_then(|i| self.buffer.get(i));
        let next = self.buffer.get(split);

        match (prev, next) {
            (Some(prev), Some(next)) => {
                let span = (next.timestamp - prev.timestamp) as f64;
                let alpha = ((render_time - prev.timestamp as f64) / span).clamp(0.0, 1.0) as f32;
                Some(Self::interpolate(prev, next, alpha, render_time))
            }
            (Some(only), None) | (None, Some(only)) => Some(Self::raw(only, render_time)),
            (None, None) => None,
        }
    }

    fn raw(snapshot: &Snapshot, render_time: f64) -> InterpolatedState {
        InterpolatedState {
            render_time,
            game_time: snapshot.game_time,
            entities: snapshot
                .entities
                .iter()
                .map(|row| {
                    let state = row.decode();
                    RenderEntity {
                        x: state.x as f32,
                        y: state.y as f32,
                        state,
                    }
                })
                .collect(),
            projectiles: snapshot.projectiles.clone(),
        }
    }

    /// Positions are blended by id. Entities and projectiles missing from
    /// `prev` appear at their `next` position; those missing from `next` are
    /// gone.
    fn interpolate(prev: &Snapshot, next: &Snapshot, alpha: f32, render_time: f64) -> InterpolatedState {
        let previous: HashMap<u32, (i32, i32)> = prev
            .entities
            .iter()
            .map(|row| {
                let state = row.decode();
                (state.id, (state.x, state.y))
            })
            .collect();
        let entities = next
            .entities
            .iter()
            .map(|row| {
                let state = row.decode();
                let (px, py) = previous.get(&state.id).copied().unwrap_or((state.x, state.y));
                RenderEntity {
                    x: lerp(px as f32, state.x as f32, alpha),
                    y: lerp(py as f32, state.y as f32, alpha),
                    state,
                }
            })
            .collect();

        let previous_shots: HashMap<u32, &Projectile> =
            prev.projectiles.iter().map(|p| (p.id, p)).collect();
        let projectiles = next
            .projectiles
            .iter()
            .map(|p| match previous_shots.get(&p.id) {
                Some(old) => Projectile {
                    x: lerp(old.x, p.x, alpha),
                    y: lerp(old.y, p.y, alpha),
                    ..p.clone()
                },
                None => p.clone(),
            })
            .collect();

        InterpolatedState {
            render_time,
            game_time: lerp(prev.game_time, next.game_time, alpha),
            entities,
            projectiles,
        }
    }
}

impl Default for ClientSyncManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{Direction, EntityRow, Team, Tile};

    fn entity(id: u32, x: i32, y: i32) -> EntityRow {
        EntityRow::encode(&EntityState {
            id,
            x,
            y,
            facing: Direction::RIGHT,
            hp: 10,
            max_hp: 10,
            kind: "rat".into(),
            team: Team::Monster,
            invisible: false,
            next_action_tick: 0,
            last_processed_input_tick: 0,
        })
    }

    fn snapshot(timestamp: u64, entities: Vec<EntityRow>) -> Snapshot {
        Snapshot {
            timestamp,
            game_time: 600.0 - timestamp as f32 / 1000.0,
            entities,
            projectiles: Vec::new(),
            loot: Vec::new(),
            grid: None,
            grid_revision: 0,
        }
    }

    #[test]
    fn test_midpoint_interpolation() {
        let mut sync = ClientSyncManager::with_delay(0.0);
        sync.on_server_update(snapshot(0, vec![entity(1, 0, 0)]), 0.0);
        sync.on_server_update(snapshot(100, vec![entity(1, 10, 0)]), 100.0);

        let state = sync.state_at(50.0).unwrap();
        assert_approx_eq!(state.entities[0].x, 5.0);
        assert_approx_eq!(state.entities[0].y, 0.0);
        assert_eq!(state.entities[0].state.x, 10);
    }

    #[test]
    fn test_beyond_buffer_uses_latest() {
        let mut sync = ClientSyncManager::with_delay(0.0);
        sync.on_server_update(snapshot(0, vec![entity(1, 0, 0)]), 0.0);
        sync.on_server_update(snapshot(100, vec![entity(1, 10, 0)]), 100.0);

        let state = sync.state_at(150.0).unwrap();
        assert_approx_eq!(state.entities[0].x, 10.0);
        let early = sync.state_at(-20.0).unwrap();
        assert_approx_eq!(early.entities[0].x, 0.0);
    }

    #[test]
    fn test_empty_buffer_yields_nothing() {
        let sync = ClientSyncManager::new();
        assert!(sync.get_interpolated_state(1000.0).is_none());
        assert!(sync.state_at(0.0).is_none());
    }

    #[test]
    fn test_offset_from_first_snapshot_only() {
        let mut sync = ClientSyncManager::new();
        sync.on_server_update(snapshot(10_000, vec![]), 2_000.0);
        sync.on_server_update(snapshot(10_050, vec![]), 2_400.0);
        assert_approx_eq!(sync.time_offset().unwrap(), 8_000.0);
        assert_approx_eq!(sync.render_time(2_100.0).unwrap(), 10_025.0);
    }

    #[test]
    fn test_out_of_order_snapshots_are_sorted() {
        let mut sync = ClientSyncManager::with_delay(0.0);
        sync.on_server_update(snapshot(200, vec![entity(1, 20, 0)]), 0.0);
        sync.on_server_update(snapshot(100, vec![entity(1, 10, 0)]), 0.0);
        sync.on_server_update(snapshot(100, vec![entity(1, 12, 0)]), 0.0);
        assert_eq!(sync.buffered_len(), 2);
        assert_eq!(sync.latest().unwrap().timestamp, 200);

        let state = sync.state_at(150.0).unwrap();
        assert_approx_eq!(state.entities[0].x, 16.0);
    }

    #[test]
    fn test_buffer_is_capped() {
        let mut sync = ClientSyncManager::new();
        for i in 0..(MAX_BUFFERED_SNAPSHOTS as u64 + 15) {
            sync.on_server_update(snapshot(i * 50, vec![]), 0.0);
        }
        assert_eq!(sync.buffered_len(), MAX_BUFFERED_SNAPSHOTS);
        sync.on_server_update(snapshot(1, vec![]), 0.0);
        assert_eq!(sync.buffered_len(), MAX_BUFFERED_SNAPSHOTS);
        // Oldest kept snapshot is the 16th one sent, at t=750.
        assert_approx_eq!(sync.state_at(0.0).unwrap().game_time, 599.25);
    }

    #[test]
    fn test_new_and_removed_entities() {
        let mut sync = ClientSyncManager::with_delay(0.0);
        sync.on_server_update(snapshot(0, vec![entity(1, 0, 0), entity(2, 5, 5)]), 0.0);
        sync.on_server_update(snapshot(100, vec![entity(1, 4, 0), entity(3, 7, 7)]), 0.0);

        let state = sync.state_at(25.0).unwrap();
        let ids: Vec<u32> = state.entities.iter().map(|e| e.state.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_approx_eq!(state.entities[0].x, 1.0);
        assert_approx_eq!(state.entities[1].x, 7.0);
    }

    #[test]
    fn test_projectiles_interpolate_by_id() {
        let shot = |x: f32| Projectile {
            id: 4,
            x,
            y: 2.0,
            vx: 1.0,
            vy: 0.0,
            speed: 15.0,
            owner_id: 1,
            damage: 7,
        };
        let mut first = snapshot(0, vec![]);
        first.projectiles.push(shot(2.0));
        let mut second = snapshot(50, vec![]);
        second.projectiles.push(shot(2.75));

        let mut sync = ClientSyncManager::with_delay(0.0);
        sync.on_server_update(first, 0.0);
        sync.on_server_update(second, 0.0);
        let state = sync.state_at(25.0).unwrap();
        assert_approx_eq!(state.projectiles[0].x, 2.375);
    }

    #[test]
    fn test_grid_kept_until_newer_revision() {
        let mut sync = ClientSyncManager::new();
        let mut with_grid = snapshot(0, vec![]);
        with_grid.grid = Some(TileGrid::new(4, 4, Tile::Floor));
        with_grid.grid_revision = 3;
        sync.on_server_update(with_grid, 0.0);
        assert_eq!(sync.grid_revision(), Some(3));
        assert!(sync.latest().unwrap().grid.is_none());

        sync.apply_grid(TileGrid::new(4, 4, Tile::Wall), 2);
        assert_eq!(sync.grid().unwrap().get(0, 0), Some(Tile::Floor));
        sync.apply_grid(TileGrid::new(4, 4, Tile::Mud), 4);
        assert_eq!(sync.grid().unwrap().get(0, 0), Some(Tile::Mud));
    }
}
