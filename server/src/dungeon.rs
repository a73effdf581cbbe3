//! Procedural dungeon layout via binary space partitioning.
//!
//! The bounding rectangle inside the border walls is split recursively, one
//! room is carved per leaf, and sibling subtrees are joined with L-shaped
//! corridors so every room is reachable. Extra corridors between random room
//! pairs add loops, then hazards and wall torches are scattered on top.

use crate::config::GlobalConfig;
use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{Tile, TileGrid};

const MIN_SPLIT_SIZE: i32 = 12;
const SPLIT_MARGIN: i32 = 8;
const MIN_PART: i32 = 10;
const ROOM_PADDING: i32 = 2;
const MIN_ROOM: i32 = 4;
const AXIS_BIAS: f32 = 1.1;
const LAKE_COUNT: usize = 8;
const LAKE_STEPS: usize = 15;
const TORCH_CHANCE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Room {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub center_x: i32,
    pub center_y: i32,
    pub is_spawn: bool,
}

impl Room {
    fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            center_x: x + w / 2,
            center_y: y + h / 2,
            is_spawn: false,
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }

    /// The four corner cells, which sit inside the room.
    pub fn corners(&self) -> [(i32, i32); 4] {
        [
            (self.x, self.y),
            (self.x + self.w - 1, self.y),
            (self.x, self.y + self.h - 1),
            (self.x + self.w - 1, self.y + self.h - 1),
        ]
    }
}

/// Result of one generation pass.
#[derive(Debug, Clone)]
pub struct Dungeon {
    pub grid: TileGrid,
    pub rooms: Vec<Room>,
}

impl Dungeon {
    pub fn spawn_rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.iter().filter(|r| r.is_spawn)
    }

    pub fn in_spawn_room(&self, x: i32, y: i32) -> bool {
        self.spawn_rooms().any(|r| r.contains(x, y))
    }

    /// A single open room inside a solid border. Used for scripted matches
    /// and for exercising the systems on a known layout.
    pub fn arena(width: usize, height: usize) -> Self {
        let mut grid = TileGrid::new(width, height, Tile::Wall);
        let (w, h) = (width as i32, height as i32);
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                grid.set(x, y, Tile::Floor);
            }
        }
        let rooms = if w > 2 && h > 2 {
            vec![Room::new(1, 1, w - 2, h - 2)]
        } else {
            Vec::new()
        };
        Self { grid, rooms }
    }
}

/// Transient BSP node, discarded once rooms and corridors are carved.
struct Partition {
    x: i32,
    y: i32,
    w: i32,
    h: i32,
    children: Option<Box<(Partition, Partition)>>,
    room: Option<Room>,
}

impl Partition {
    fn leaf(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            children: None,
            room: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DungeonGenerator {
    width: usize,
    height: usize,
    depth: u32,
    spawn_room_count: usize,
}

impl DungeonGenerator {
    pub fn new(global: &GlobalConfig) -> Self {
        Self {
            width: global.dungeon_width,
            height: global.dungeon_height,
            depth: global.bsp_depth,
            spawn_room_count: global.spawn_room_count,
        }
    }

    pub fn generate<R: Rng>(&self, rng: &mut R) -> Dungeon {
        let mut grid = TileGrid::new(self.width, self.height, Tile::Wall);
        let w = self.width as i32;
        let h = self.height as i32;

        let mut root = self.split(Partition::leaf(1, 1, w - 2, h - 2), self.depth, rng);
        let mut rooms = Vec::new();
        carve_rooms(&mut root, &mut grid, &mut rooms, rng);

        if rooms.is_empty() {
            // A degenerate partition still yields one usable room.
            let room = Room::new(
                (w / 2 - 2).max(1),
                (h / 2 - 2).max(1),
                MIN_ROOM.min(w - 2),
                MIN_ROOM.min(h - 2),
            );
            carve_room(&mut grid, &room);
            rooms.push(room);
        } else {
            connect(&root, &mut grid, rng);
        }

        if rooms.len() > 1 {
            let extra = rooms.len() * 3 / 2;
            for _ in 0..extra {
                let a = rng.gen_range(0..rooms.len());
                let b = rng.gen_range(0..rooms.len());
                if a != b {
                    carve_corridor(
                        &mut grid,
                        (rooms[a].center_x, rooms[a].center_y),
                        (rooms[b].center_x, rooms[b].center_y),
                    );
                }
            }
        }

        mark_spawn_rooms(&mut rooms, self.spawn_room_count, w, h);

        let mut dungeon = Dungeon { grid, rooms };
        scatter_hazards(&mut dungeon, rng);
        place_torches(&mut dungeon.grid, rng);

        debug!(
            "Generated {}x{} dungeon with {} rooms ({} spawn)",
            self.width,
            self.height,
            dungeon.rooms.len(),
            dungeon.spawn_rooms().count()
        );
        dungeon
    }

    fn split<R: Rng>(&self, mut node: Partition, depth: u32, rng: &mut R) -> Partition {
        if depth == 0 || (node.w < MIN_SPLIT_SIZE && node.h < MIN_SPLIT_SIZE) {
            return node;
        }

        let mut horizontal = rng.gen_bool(0.5);
        if node.w > node.h && node.w as f32 / node.h.max(1) as f32 >= AXIS_BIAS {
            horizontal = false;
        } else if node.h > node.w && node.h as f32 / node.w.max(1) as f32 >= AXIS_BIAS {
            horizontal = true;
        }

        let max = (if horizontal { node.h } else { node.w }) - SPLIT_MARGIN;
        if max <= MIN_PART {
            return node;
        }
        let split_at = rng.gen_range(MIN_PART..max);

        let (a, b) = if horizontal {
            (
                Partition::leaf(node.x, node.y, node.w, split_at),
                Partition::leaf(node.x, node.y + split_at, node.w, node.h - split_at),
            )
        } else {
            (
                Partition::leaf(node.x, node.y, split_at, node.h),
                Partition::leaf(node.x + split_at, node.y, node.w - split_at, node.h),
            )
        };

        let left = self.split(a, depth - 1, rng);
        let right = self.split(b, depth - 1, rng);
        node.children = Some(Box::new((left, right)));
        node
    }
}

fn carve_rooms<R: Rng>(node: &mut Partition, grid: &mut TileGrid, rooms: &mut Vec<Room>, rng: &mut R) {
    if let Some(children) = node.children.as_mut() {
        carve_rooms(&mut children.0, grid, rooms, rng);
        carve_rooms(&mut children.1, grid, rooms, rng);
        return;
    }

    // Leaves too small for a minimum room are skipped.
    if node.w <= MIN_ROOM || node.h <= MIN_ROOM {
        return;
    }

    let span_w = (node.w - ROOM_PADDING * 2).max(1);
    let span_h = (node.h - ROOM_PADDING * 2).max(1);
    let room_w = (rng.gen_range(0..span_w) + MIN_ROOM).min(node.w - 1);
    let room_h = (rng.gen_range(0..span_h) + MIN_ROOM).min(node.h - 1);
    let room = Room::new(
        node.x + (node.w - room_w) / 2,
        node.y + (node.h - room_h) / 2,
        room_w,
        room_h,
    );

    carve_room(grid, &room);
    rooms.push(room);
    node.room = Some(room);
}

/// Joins sibling subtrees bottom-up and returns every room below `node`.
fn connect<R: Rng>(node: &Partition, grid: &mut TileGrid, rng: &mut R) -> Vec<Room> {
    match node.children.as_ref() {
        None => node.room.into_iter().collect(),
        Some(children) => {
            let mut left = connect(&children.0, grid, rng);
            let right = connect(&children.1, grid, rng);
            if let (Some(a), Some(b)) = (left.choose(rng).copied(), right.choose(rng).copied()) {
                carve_corridor(grid, (a.center_x, a.center_y), (b.center_x, b.center_y));
            }
            left.extend(right);
            left
        }
    }
}

fn carve_room(grid: &mut TileGrid, room: &Room) {
    for y in room.y..room.y + room.h {
        for x in room.x..room.x + room.w {
            grid.set(x, y, Tile::Floor);
        }
    }
}

/// Horizontal leg along the start row, then vertical leg along the end column.
fn carve_corridor(grid: &mut TileGrid, from: (i32, i32), to: (i32, i32)) {
    let (x1, y1) = from;
    let (x2, y2) = to;
    for x in x1.min(x2)..=x1.max(x2) {
        grid.set(x, y1, Tile::Floor);
    }
    for y in y1.min(y2)..=y1.max(y2) {
        grid.set(x2, y, Tile::Floor);
    }
}

fn mark_spawn_rooms(rooms: &mut [Room], count: usize, width: i32, height: i32) {
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let distance = |r: &Room| {
        let dx = r.center_x as f32 - cx;
        let dy = r.center_y as f32 - cy;
        dx * dx + dy * dy
    };

    let mut order: Vec<usize> = (0..rooms.len()).collect();
    order.sort_by(|a, b| distance(&rooms[*b]).total_cmp(&distance(&rooms[*a])));
    for index in order.into_iter().take(count) {
        rooms[index].is_spawn = true;
    }
}

fn scatter_hazards<R: Rng>(dungeon: &mut Dungeon, rng: &mut R) {
    const FEATURES: [Tile; 3] = [Tile::Water, Tile::Mud, Tile::Lava];
    let w = dungeon.grid.width() as i32;
    let h = dungeon.grid.height() as i32;
    if w < 5 || h < 5 {
        return;
    }

    for _ in 0..LAKE_COUNT {
        let feature = FEATURES[rng.gen_range(0..FEATURES.len())];
        let mut x = rng.gen_range(2..w - 2);
        let mut y = rng.gen_range(2..h - 2);

        for _ in 0..LAKE_STEPS {
            let interior = x > 0 && x < w - 1 && y > 0 && y < h - 1;
            if interior
                && dungeon.grid.get(x, y) == Some(Tile::Floor)
                && !dungeon.in_spawn_room(x, y)
            {
                dungeon.grid.set(x, y, feature);
            }
            x += rng.gen_range(-1..=1);
            y += rng.gen_range(-1..=1);
        }
    }
}

fn place_torches<R: Rng>(grid: &mut TileGrid, rng: &mut R) {
    let w = grid.width() as i32;
    let h = grid.height() as i32;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            if grid.get(x, y) != Some(Tile::Wall) {
                continue;
            }
            let near_floor = [(0, 1), (0, -1), (1, 0), (-1, 0)]
                .iter()
                .any(|(dx, dy)| grid.get(x + dx, y + dy) == Some(Tile::Floor));
            if near_floor && rng.gen_bool(TORCH_CHANCE) {
                grid.set(x, y, Tile::WallTorch);
            }
        }
    }
}
