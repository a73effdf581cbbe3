//! Spatial authority over terrain and entity occupancy.
//!
//! Positions and the occupancy index are always mutated together, so a cell
//! lookup and a position lookup can never disagree. The occupancy index is
//! keyed by the flat cell index `y * width + x`.

use crate::combat::CombatSystem;
use crate::config::GameConfig;
use crate::dungeon::{Dungeon, DungeonGenerator, Room};
use crate::loot::LootSystem;
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{Direction, EntityId, IdGenerator, LootId, Tile, TileGrid};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;

const LOS_STEP_LIMIT: u32 = 100;
const SPAWN_SAMPLES: u32 = 100;
const STRAIGHT_COST: u32 = 10;
const DIAGONAL_COST: u32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub facing: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collision {
    Wall,
    Entity(EntityId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveResult {
    Moved { x: i32, y: i32 },
    Blocked(Collision),
}

impl MoveResult {
    pub fn success(&self) -> bool {
        matches!(self, MoveResult::Moved { .. })
    }
}

/// Outcome of a player or AI move intent once loot and sliding are considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveIntent {
    Moved { x: i32, y: i32 },
    BumpEntity(EntityId),
    InteractLoot(LootId),
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickIntent {
    AttackTarget { x: i32, y: i32 },
    MovePath(VecDeque<(i32, i32)>),
}

pub struct GridSystem {
    config: Arc<GameConfig>,
    dungeon: Dungeon,
    revision: u32,
    positions: HashMap<EntityId, Position>,
    occupancy: HashMap<usize, EntityId>,
    lava_elapsed_ms: f64,
}

impl GridSystem {
    pub fn new(config: Arc<GameConfig>, dungeon: Dungeon) -> Self {
        Self {
            config,
            dungeon,
            revision: 0,
            positions: HashMap::new(),
            occupancy: HashMap::new(),
            lava_elapsed_ms: 0.0,
        }
    }

    /// Replaces the layout with a fresh dungeon and forgets every entity.
    pub fn initialize_dungeon<R: Rng>(&mut self, generator: &DungeonGenerator, rng: &mut R) {
        self.dungeon = generator.generate(rng);
        self.positions.clear();
        self.occupancy.clear();
        self.lava_elapsed_ms = 0.0;
        self.revision = self.revision.wrapping_add(1);
    }

    pub fn tiles(&self) -> &TileGrid {
        &self.dungeon.grid
    }

    pub fn rooms(&self) -> &[Room] {
        &self.dungeon.rooms
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn width(&self) -> i32 {
        self.dungeon.grid.width() as i32
    }

    pub fn height(&self) -> i32 {
        self.dungeon.grid.height() as i32
    }

    pub fn tile(&self, x: i32, y: i32) -> Option<Tile> {
        self.dungeon.grid.get(x, y)
    }

    /// Writes a tile and bumps the revision so the grid is re-sent.
    pub fn set_tile(&mut self, x: i32, y: i32, tile: Tile) -> bool {
        if self.dungeon.grid.set(x, y, tile) {
            self.revision = self.revision.wrapping_add(1);
            true
        } else {
            false
        }
    }

    pub fn is_walkable(&self, x: i32, y: i32) -> bool {
        self.tile(x, y).map_or(false, Tile::is_walkable)
    }

    pub fn movement_cost(&self, x: i32, y: i32) -> f64 {
        self.tile(x, y).map_or(1.0, |t| t.movement_cost() as f64)
    }

    pub fn position(&self, id: EntityId) -> Option<&Position> {
        self.positions.get(&id)
    }

    pub fn entity_at(&self, x: i32, y: i32) -> Option<EntityId> {
        self.dungeon
            .grid
            .index(x, y)
            .and_then(|i| self.occupancy.get(&i).copied())
    }

    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &Position)> {
        self.positions.iter().map(|(id, pos)| (*id, pos))
    }

    pub fn entity_count(&self) -> usize {
        self.positions.len()
    }

    /// Places an entity facing down. Fails if the cell is outside the grid or
    /// held by another entity.
    pub fn add_entity(&mut self, id: EntityId, x: i32, y: i32) -> bool {
        let Some(index) = self.dungeon.grid.index(x, y) else {
            return false;
        };
        if matches!(self.occupancy.get(&index), Some(other) if *other != id) {
            return false;
        }
        self.remove_entity(id);
        self.occupancy.insert(index, id);
        self.positions.insert(
            id,
            Position {
                x,
                y,
                facing: Direction::DOWN,
            },
        );
        true
    }

    pub fn remove_entity(&mut self, id: EntityId) -> Option<Position> {
        let pos = self.positions.remove(&id)?;
        if let Some(index) = self.dungeon.grid.index(pos.x, pos.y) {
            if self.occupancy.get(&index) == Some(&id) {
                self.occupancy.remove(&index);
            }
        }
        Some(pos)
    }

    /// Moves an entity to an arbitrary free cell, keeping its facing.
    pub fn teleport(&mut self, id: EntityId, x: i32, y: i32) -> bool {
        let Some(facing) = self.positions.get(&id).map(|p| p.facing) else {
            return false;
        };
        if !self.add_entity(id, x, y) {
            return false;
        }
        if let Some(pos) = self.positions.get_mut(&id) {
            pos.facing = facing;
        }
        true
    }

    pub fn set_facing(&mut self, id: EntityId, facing: Direction) {
        if let Some(pos) = self.positions.get_mut(&id) {
            if !facing.is_zero() {
                pos.facing = facing;
            }
        }
    }

    /// Attempts a single step. Facing always turns toward a non-zero
    /// direction, even when the step is refused.
    pub fn move_entity(&mut self, id: EntityId, dx: i32, dy: i32) -> Option<MoveResult> {
        let pos = self.positions.get_mut(&id)?;
        if dx != 0 || dy != 0 {
            pos.facing = Direction::new(dx, dy);
        }
        let (x, y) = (pos.x, pos.y);
        let (nx, ny) = (x + dx, y + dy);

        if dx != 0 && dy != 0 && !self.is_walkable(x + dx, y) && !self.is_walkable(x, y + dy) {
            return Some(MoveResult::Blocked(Collision::Wall));
        }
        if !self.is_walkable(nx, ny) {
            return Some(MoveResult::Blocked(Collision::Wall));
        }
        if let Some(other) = self.entity_at(nx, ny) {
            if other != id {
                return Some(MoveResult::Blocked(Collision::Entity(other)));
            }
        }

        let grid = &self.dungeon.grid;
        if let (Some(from), Some(to)) = (grid.index(x, y), grid.index(nx, ny)) {
            self.occupancy.remove(&from);
            self.occupancy.insert(to, id);
        }
        if let Some(pos) = self.positions.get_mut(&id) {
            pos.x = nx;
            pos.y = ny;
        }
        Some(MoveResult::Moved { x: nx, y: ny })
    }

    /// Bresenham trace between two cells. Walls and torches block; leaving the
    /// grid or exceeding the step limit fails closed.
    pub fn has_line_of_sight(&self, x0: i32, y0: i32, x1: i32, y1: i32) -> bool {
        let (mut x, mut y) = (x0, y0);
        let dx = (x1 - x0).abs();
        let dy = (y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx - dy;

        for _ in 0..=LOS_STEP_LIMIT {
            if x == x1 && y == y1 {
                return true;
            }
            match self.tile(x, y) {
                None => return false,
                Some(tile) if tile.blocks_sight() => return false,
                _ => {}
            }
            let e2 = 2 * err;
            if e2 > -dy {
                err -= dy;
                x += sx;
            }
            if e2 < dx {
                err += dx;
                y += sy;
            }
        }
        false
    }

    pub fn in_spawn_room(&self, x: i32, y: i32) -> bool {
        self.dungeon.in_spawn_room(x, y)
    }

    fn is_free_floor(&self, x: i32, y: i32) -> bool {
        self.tile(x, y) == Some(Tile::Floor) && self.entity_at(x, y).is_none()
    }

    /// Free floor that no closed chest sits on.
    fn is_open_floor(&self, x: i32, y: i32, loot: &LootSystem) -> bool {
        self.is_free_floor(x, y) && !loot.is_collidable(x, y)
    }

    /// Picks a spawn cell clear of entities and closed chests. Never fails:
    /// degrades from spawn rooms to random samples to a full scan and finally
    /// to `(1, 1)`.
    pub fn spawn_point<R: Rng>(&self, is_player: bool, loot: &LootSystem, rng: &mut R) -> (i32, i32) {
        if is_player {
            let spawn_rooms: Vec<&Room> = self.dungeon.spawn_rooms().collect();
            if let Some(room) = spawn_rooms.choose(rng) {
                if self.is_open_floor(room.center_x, room.center_y, loot) {
                    return (room.center_x, room.center_y);
                }
                for y in room.y..room.y + room.h {
                    for x in room.x..room.x + room.w {
                        if self.is_walkable(x, y)
                            && self.entity_at(x, y).is_none()
                            && !loot.is_collidable(x, y)
                        {
                            return (x, y);
                        }
                    }
                }
            }
        }

        let (w, h) = (self.width(), self.height());
        if w > 0 && h > 0 {
            for _ in 0..SPAWN_SAMPLES {
                let x = rng.gen_range(0..w);
                let y = rng.gen_range(0..h);
                if self.is_open_floor(x, y, loot) && !self.in_spawn_room(x, y) {
                    return (x, y);
                }
            }
        }

        for y in 1..h - 1 {
            for x in 1..w - 1 {
                if self.is_open_floor(x, y, loot) {
                    return (x, y);
                }
            }
        }
        (1, 1)
    }

    pub fn chest_spawn_locations(&self) -> Vec<(i32, i32)> {
        self.dungeon
            .rooms
            .iter()
            .filter(|r| !r.is_spawn)
            .flat_map(|r| r.corners())
            .filter(|(x, y)| self.is_free_floor(*x, *y))
            .collect()
    }

    pub fn spawn_extraction_zone<R: Rng>(&mut self, loot: &LootSystem, rng: &mut R) -> (i32, i32) {
        let (x, y) = self.spawn_point(false, loot, rng);
        self.set_tile(x, y, Tile::Extraction);
        info!("Extraction zone opened at {},{}", x, y);
        (x, y)
    }

    /// Seeds monsters into every non-spawn room and chests on shuffled
    /// room corners. Returns the ids of the spawned monsters.
    pub fn populate<R: Rng>(
        &mut self,
        combat: &mut CombatSystem,
        loot: &mut LootSystem,
        ids: &mut IdGenerator,
        rng: &mut R,
    ) -> Vec<EntityId> {
        let global = &self.config.global;
        let enemy_kinds: Vec<String> = self.config.enemies.keys().cloned().collect();
        let (min, max) = (global.enemies_per_room_min, global.enemies_per_room_max);
        let rooms: Vec<Room> = self.dungeon.rooms.iter().filter(|r| !r.is_spawn).copied().collect();
        let mut spawned = Vec::new();

        for room in rooms {
            if enemy_kinds.is_empty() || room.w < 3 || room.h < 3 {
                continue;
            }
            let count = rng.gen_range(min..=max);
            for _ in 0..count {
                let x = room.x + 1 + rng.gen_range(0..room.w - 2);
                let y = room.y + 1 + rng.gen_range(0..room.h - 2);
                if !self.is_walkable(x, y) || self.entity_at(x, y).is_some() {
                    continue;
                }
                let Some(kind) = enemy_kinds.choose(rng) else {
                    break;
                };
                let id = ids.next_id();
                if self.add_entity(id, x, y) && combat.register_monster(id, kind) {
                    spawned.push(id);
                } else {
                    self.remove_entity(id);
                }
            }
        }

        let mut chests = self.chest_spawn_locations();
        chests.shuffle(rng);
        let (w, h) = (self.width(), self.height());
        for (x, y) in chests.into_iter().take(self.config.global.chest_count) {
            let tier = loot.get_loot_tier(x, y, w, h);
            loot.spawn_random_loot(x, y, tier, rng);
        }

        info!(
            "Populated dungeon with {} monsters and {} chests",
            spawned.len(),
            loot.world_loot().count()
        );
        spawned
    }

    /// Resolves a step intent, treating closed chests as solid and sliding
    /// along walls when a diagonal is refused.
    pub fn resolve_move_intent(
        &mut self,
        id: EntityId,
        direction: Direction,
        loot: &LootSystem,
    ) -> MoveIntent {
        let Some(pos) = self.positions.get(&id).copied() else {
            return MoveIntent::Blocked;
        };
        if !direction.is_single_step() {
            return MoveIntent::Blocked;
        }

        let (tx, ty) = (pos.x + direction.x, pos.y + direction.y);
        if let Some(chest) = loot.closed_chest_at(tx, ty) {
            self.set_facing(id, direction);
            return MoveIntent::InteractLoot(chest);
        }

        match self.move_entity(id, direction.x, direction.y) {
            Some(MoveResult::Moved { x, y }) => MoveIntent::Moved { x, y },
            Some(MoveResult::Blocked(Collision::Entity(other))) => MoveIntent::BumpEntity(other),
            Some(MoveResult::Blocked(Collision::Wall)) if direction.is_diagonal() => {
                for (dx, dy) in [(direction.x, 0), (0, direction.y)] {
                    if loot.is_collidable(pos.x + dx, pos.y + dy) {
                        continue;
                    }
                    if let Some(MoveResult::Moved { x, y }) = self.move_entity(id, dx, dy) {
                        return MoveIntent::Moved { x, y };
                    }
                }
                MoveIntent::Blocked
            }
            _ => MoveIntent::Blocked,
        }
    }

    /// Cost-aware A* over walkable tiles. The returned steps exclude the
    /// start cell. Entities are ignored; they are resolved step by step.
    pub fn find_path(&self, from: (i32, i32), to: (i32, i32)) -> Option<VecDeque<(i32, i32)>> {
        let grid = &self.dungeon.grid;
        let start = grid.index(from.0, from.1)?;
        let goal = grid.index(to.0, to.1)?;
        if start == goal || !self.is_walkable(to.0, to.1) {
            return None;
        }

        let width = grid.width();
        let heuristic = |i: usize| {
            let dx = ((i % width) as i32 - to.0).unsigned_abs();
            let dy = ((i / width) as i32 - to.1).unsigned_abs();
            STRAIGHT_COST * dx.max(dy) + (DIAGONAL_COST - STRAIGHT_COST) * dx.min(dy)
        };

        let mut open = BinaryHeap::new();
        let mut best: HashMap<usize, u32> = HashMap::new();
        let mut came_from: HashMap<usize, usize> = HashMap::new();
        best.insert(start, 0);
        open.push(Reverse((heuristic(start), start)));
        let mut expanded = 0usize;

        while let Some(Reverse((_, current))) = open.pop() {
            if current == goal {
                let mut path = VecDeque::new();
                let mut node = goal;
                while node != start {
                    path.push_front(((node % width) as i32, (node / width) as i32));
                    node = *came_from.get(&node)?;
                }
                return Some(path);
            }
            expanded += 1;
            if expanded > self.config.global.path_search_limit {
                debug!("Path search from {:?} to {:?} exceeded node limit", from, to);
                return None;
            }

            let (cx, cy) = ((current % width) as i32, (current / width) as i32);
            let current_cost = best.get(&current).copied().unwrap_or(u32::MAX);
            for dy in -1..=1 {
                for dx in -1..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let (nx, ny) = (cx + dx, cy + dy);
                    if !self.is_walkable(nx, ny) {
                        continue;
                    }
                    let diagonal = dx != 0 && dy != 0;
                    if diagonal && !self.is_walkable(cx + dx, cy) && !self.is_walkable(cx, cy + dy) {
                        continue;
                    }
                    let step = if diagonal { DIAGONAL_COST } else { STRAIGHT_COST };
                    let cost = current_cost
                        + (step as f64 * self.movement_cost(nx, ny)).round() as u32;
                    let Some(next) = grid.index(nx, ny) else {
                        continue;
                    };
                    if cost < best.get(&next).copied().unwrap_or(u32::MAX) {
                        best.insert(next, cost);
                        came_from.insert(next, current);
                        open.push(Reverse((cost + heuristic(next), next)));
                    }
                }
            }
        }
        None
    }

    /// Interprets a click on a cell: attack a hostile occupant (or any cell
    /// when `shift` is held), otherwise walk there.
    pub fn determine_click_intent(
        &self,
        id: EntityId,
        x: i32,
        y: i32,
        shift: bool,
        combat: &CombatSystem,
        loot: &LootSystem,
    ) -> Option<ClickIntent> {
        let pos = self.positions.get(&id)?;
        if pos.x == x && pos.y == y {
            return None;
        }

        let hostile = self
            .entity_at(x, y)
            .map_or(false, |other| combat.is_hostile(id, other));
        if hostile || shift {
            return Some(ClickIntent::AttackTarget { x, y });
        }

        if loot.closed_chest_at(x, y).is_some() || self.is_walkable(x, y) {
            return self.find_path((pos.x, pos.y), (x, y)).map(ClickIntent::MovePath);
        }
        None
    }

    /// Applies lava damage to every living entity standing on lava each time
    /// the lava interval elapses.
    pub fn process_lava_damage(&mut self, dt_ms: f64, combat: &mut CombatSystem) {
        let global = &self.config.global;
        self.lava_elapsed_ms += dt_ms;
        if self.lava_elapsed_ms < global.lava_interval_ms as f64 {
            return;
        }
        self.lava_elapsed_ms -= global.lava_interval_ms as f64;

        let mut burning: Vec<EntityId> = self
            .positions
            .iter()
            .filter(|(_, pos)| self.tile(pos.x, pos.y) == Some(Tile::Lava))
            .map(|(id, _)| *id)
            .collect();
        burning.sort_unstable();
        for id in burning {
            if combat.is_alive(id) {
                combat.apply_damage(id, global.lava_damage, None, false);
            }
        }
    }
}
