use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub type EntityId = u32;
pub type LootId = u32;
pub type ProjectileId = u32;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MELEE_RANGE: i32 = 1;
pub const QUICK_SLOT_COUNT: u8 = 3;

/// Terrain code stored in every grid cell. The numeric codes are part of the
/// wire format and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Tile {
    Floor,
    Wall,
    Water,
    Mud,
    Lava,
    WallTorch,
    Extraction,
}

impl Tile {
    pub fn code(self) -> u8 {
        match self {
            Tile::Floor => 0,
            Tile::Wall => 1,
            Tile::Water => 2,
            Tile::Mud => 3,
            Tile::Lava => 4,
            Tile::WallTorch => 5,
            Tile::Extraction => 9,
        }
    }

    pub fn from_code(code: u8) -> Option<Tile> {
        match code {
            0 => Some(Tile::Floor),
            1 => Some(Tile::Wall),
            2 => Some(Tile::Water),
            3 => Some(Tile::Mud),
            4 => Some(Tile::Lava),
            5 => Some(Tile::WallTorch),
            9 => Some(Tile::Extraction),
            _ => None,
        }
    }

    pub fn is_walkable(self) -> bool {
        !matches!(self, Tile::Wall | Tile::WallTorch)
    }

    pub fn blocks_sight(self) -> bool {
        matches!(self, Tile::Wall | Tile::WallTorch)
    }

    /// Time multiplier applied to an action that ends on this tile.
    pub fn movement_cost(self) -> f32 {
        match self {
            Tile::Water | Tile::Mud => 2.0,
            Tile::Lava => 1.5,
            _ => 1.0,
        }
    }
}

impl From<Tile> for u8 {
    fn from(tile: Tile) -> u8 {
        tile.code()
    }
}

impl TryFrom<u8> for Tile {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Tile::from_code(code).ok_or_else(|| format!("unknown tile code {}", code))
    }
}

/// Row-major tile grid with a fixed stride of `width`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGrid {
    width: usize,
    height: usize,
    cells: Vec<Tile>,
}

impl TileGrid {
    pub fn new(width: usize, height: usize, fill: Tile) -> Self {
        Self {
            width,
            height,
            cells: vec![fill; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    /// Flat cell index, `y * width + x`.
    pub fn index(&self, x: i32, y: i32) -> Option<usize> {
        if self.in_bounds(x, y) {
            Some(y as usize * self.width + x as usize)
        } else {
            None
        }
    }

    pub fn get(&self, x: i32, y: i32) -> Option<Tile> {
        self.index(x, y).map(|i| self.cells[i])
    }

    /// Returns false when the coordinate is outside the grid.
    pub fn set(&mut self, x: i32, y: i32, tile: Tile) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.cells[i] = tile;
                true
            }
            None => false,
        }
    }

    pub fn cells(&self) -> &[Tile] {
        &self.cells
    }

    pub fn count(&self, tile: Tile) -> usize {
        self.cells.iter().filter(|t| **t == tile).count()
    }
}

/// Step direction; each component is -1, 0 or 1 for a valid move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Direction {
    pub x: i32,
    pub y: i32,
}

impl Direction {
    pub const UP: Direction = Direction { x: 0, y: -1 };
    pub const DOWN: Direction = Direction { x: 0, y: 1 };
    pub const LEFT: Direction = Direction { x: -1, y: 0 };
    pub const RIGHT: Direction = Direction { x: 1, y: 0 };
    pub const CARDINALS: [Direction; 4] =
        [Direction::DOWN, Direction::UP, Direction::RIGHT, Direction::LEFT];

    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Sign of each component, so any offset becomes a single step.
    pub fn toward(dx: i32, dy: i32) -> Self {
        Self {
            x: dx.signum(),
            y: dy.signum(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0 && self.y == 0
    }

    pub fn is_diagonal(&self) -> bool {
        self.x != 0 && self.y != 0
    }

    pub fn is_single_step(&self) -> bool {
        !self.is_zero() && self.x.abs() <= 1 && self.y.abs() <= 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    Player,
    Monster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerClass {
    Fighter,
    Rogue,
    Barbarian,
}

impl Default for PlayerClass {
    fn default() -> Self {
        PlayerClass::Fighter
    }
}

impl std::str::FromStr for PlayerClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fighter" => Ok(PlayerClass::Fighter),
            "rogue" => Ok(PlayerClass::Rogue),
            "barbarian" => Ok(PlayerClass::Barbarian),
            other => Err(format!("unknown class '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item_id: String,
    pub count: u32,
}

impl ItemStack {
    pub fn new(item_id: impl Into<String>, count: u32) -> Self {
        Self {
            item_id: item_id.into(),
            count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquipSlot {
    Weapon,
    Armor,
    Quick1,
    Quick2,
    Quick3,
}

impl EquipSlot {
    pub const ALL: [EquipSlot; 5] = [
        EquipSlot::Weapon,
        EquipSlot::Armor,
        EquipSlot::Quick1,
        EquipSlot::Quick2,
        EquipSlot::Quick3,
    ];

    /// Maps a zero-based quick bar index onto its slot.
    pub fn quick(index: u8) -> Option<EquipSlot> {
        match index {
            0 => Some(EquipSlot::Quick1),
            1 => Some(EquipSlot::Quick2),
            2 => Some(EquipSlot::Quick3),
            _ => None,
        }
    }

    pub fn is_quick(self) -> bool {
        matches!(self, EquipSlot::Quick1 | EquipSlot::Quick2 | EquipSlot::Quick3)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    pub weapon: Option<ItemStack>,
    pub armor: Option<ItemStack>,
    pub quick1: Option<ItemStack>,
    pub quick2: Option<ItemStack>,
    pub quick3: Option<ItemStack>,
}

impl Equipment {
    pub fn get(&self, slot: EquipSlot) -> Option<&ItemStack> {
        match slot {
            EquipSlot::Weapon => self.weapon.as_ref(),
            EquipSlot::Armor => self.armor.as_ref(),
            EquipSlot::Quick1 => self.quick1.as_ref(),
            EquipSlot::Quick2 => self.quick2.as_ref(),
            EquipSlot::Quick3 => self.quick3.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, slot: EquipSlot) -> &mut Option<ItemStack> {
        match slot {
            EquipSlot::Weapon => &mut self.weapon,
            EquipSlot::Armor => &mut self.armor,
            EquipSlot::Quick1 => &mut self.quick1,
            EquipSlot::Quick2 => &mut self.quick2,
            EquipSlot::Quick3 => &mut self.quick3,
        }
    }

    pub fn take(&mut self, slot: EquipSlot) -> Option<ItemStack> {
        self.slot_mut(slot).take()
    }

    /// Puts a stack into the slot and returns whatever was there before.
    pub fn put(&mut self, slot: EquipSlot, stack: ItemStack) -> Option<ItemStack> {
        self.slot_mut(slot).replace(stack)
    }

    pub fn is_empty(&self) -> bool {
        EquipSlot::ALL.iter().all(|slot| self.get(*slot).is_none())
    }

    pub fn drain(&mut self) -> Vec<ItemStack> {
        EquipSlot::ALL
            .iter()
            .filter_map(|slot| self.take(*slot))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LootKind {
    Chest,
    Bag,
}

/// Loot lying in the world: a chest rolled at population time or a dropped bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldLoot {
    pub id: LootId,
    pub x: i32,
    pub y: i32,
    pub kind: LootKind,
    pub items: Vec<ItemStack>,
    pub gold: u32,
    pub opened: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projectile {
    pub id: ProjectileId,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub speed: f32,
    pub owner_id: EntityId,
    pub damage: i32,
}

/// Positional entity record used in snapshots:
/// `[id, x, y, facingX, facingY, hp, maxHp, type, team, invisible, nextActionTick, lastProcessedInputTick]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRow(
    pub EntityId,
    pub i32,
    pub i32,
    pub i32,
    pub i32,
    pub i32,
    pub i32,
    pub String,
    pub Team,
    pub u8,
    pub u64,
    pub u64,
);

/// Decoded view of an [`EntityRow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityState {
    pub id: EntityId,
    pub x: i32,
    pub y: i32,
    pub facing: Direction,
    pub hp: i32,
    pub max_hp: i32,
    pub kind: String,
    pub team: Team,
    pub invisible: bool,
    pub next_action_tick: u64,
    pub last_processed_input_tick: u64,
}

impl EntityRow {
    pub fn encode(state: &EntityState) -> Self {
        EntityRow(
            state.id,
            state.x,
            state.y,
            state.facing.x,
            state.facing.y,
            state.hp,
            state.max_hp,
            state.kind.clone(),
            state.team,
            u8::from(state.invisible),
            state.next_action_tick,
            state.last_processed_input_tick,
        )
    }

    pub fn decode(&self) -> EntityState {
        EntityState {
            id: self.0,
            x: self.1,
            y: self.2,
            facing: Direction::new(self.3, self.4),
            hp: self.5,
            max_hp: self.6,
            kind: self.7.clone(),
            team: self.8,
            invisible: self.9 != 0,
            next_action_tick: self.10,
            last_processed_input_tick: self.11,
        }
    }
}

/// Timestamped view of the world broadcast once per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "t")]
    pub timestamp: u64,
    #[serde(rename = "gt")]
    pub game_time: f32,
    #[serde(rename = "e")]
    pub entities: Vec<EntityRow>,
    #[serde(rename = "p")]
    pub projectiles: Vec<Projectile>,
    #[serde(rename = "l")]
    pub loot: Vec<(LootId, WorldLoot)>,
    pub grid: Option<TileGrid>,
    #[serde(rename = "gridRevision")]
    pub grid_revision: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropSource {
    Inventory,
    Equipment(EquipSlot),
}

/// Player intent submitted to the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    Move { direction: Direction },
    TargetAction { x: i32, y: i32, shift: bool },
    EquipItem { item_id: String, slot: EquipSlot },
    UnequipItem { slot: EquipSlot },
    DropItem { item_id: String, source: DropSource },
    InteractLoot { loot_id: LootId },
    UseAbilitySlot { slot: u8 },
    Pickup,
    Ability,
    PrimaryAction,
}

impl Intent {
    /// Inventory management ignores the global action cooldown.
    pub fn is_inventory_action(&self) -> bool {
        matches!(
            self,
            Intent::EquipItem { .. } | Intent::UnequipItem { .. } | Intent::DropItem { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInput {
    pub tick: u64,
    pub intent: Intent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectKind {
    Attack,
    Slash,
    Heal,
    Stealth,
    Buff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectTarget {
    Entity(EntityId),
    Cell { x: i32, y: i32 },
}

/// Events emitted by the authority for broadcast or unicast delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldEvent {
    Snapshot(Snapshot),
    InitWorld {
        grid: TileGrid,
        grid_revision: u32,
    },
    Effect {
        kind: EffectKind,
        source_id: Option<EntityId>,
        target: EffectTarget,
    },
    EntityDeath {
        id: EntityId,
    },
    HumansEscaped {
        message: String,
    },
    UpdateInventory {
        inventory: Vec<ItemStack>,
        equipment: Equipment,
    },
    LootOpened {
        id: LootId,
    },
    PortalSpawn {
        x: i32,
        y: i32,
    },
    RespawnMonster {
        id: EntityId,
        kind: String,
        x: i32,
        y: i32,
    },
    SpawnProjectile(Projectile),
    UpdateGold {
        id: EntityId,
        amount: u32,
    },
    PlayerExtracted {
        id: EntityId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    Connect {
        client_version: u32,
        name: String,
        class: PlayerClass,
        gold: u32,
    },
    Input(PlayerInput),
    /// Keeps an idle connection alive.
    Heartbeat,
    Disconnect,

    Connected {
        client_id: u32,
        entity_id: EntityId,
    },
    Event(WorldEvent),
    Disconnected {
        reason: String,
    },
}

/// Monotonic id source; zero is never handed out.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    next: u32,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next = self.next.wrapping_add(1).max(1);
        id
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Current wall clock in milliseconds since the Unix epoch.
pub fn timestamp_ms() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    millis.min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn sample_state() -> EntityState {
        EntityState {
            id: 7,
            x: 12,
            y: 30,
            facing: Direction::new(-1, 1),
            hp: 45,
            max_hp: 110,
            kind: "player".to_string(),
            team: Team::Player,
            invisible: true,
            next_action_tick: 99,
            last_processed_input_tick: 97,
        }
    }

    #[test]
    fn test_tile_codes_are_stable() {
        let expected = [
            (Tile::Floor, 0),
            (Tile::Wall, 1),
            (Tile::Water, 2),
            (Tile::Mud, 3),
            (Tile::Lava, 4),
            (Tile::WallTorch, 5),
            (Tile::Extraction, 9),
        ];
        for (tile, code) in expected {
            assert_eq!(tile.code(), code);
            assert_eq!(Tile::from_code(code), Some(tile));
        }
        assert_eq!(Tile::from_code(6), None);
    }

    #[test]
    fn test_tile_walkability_and_cost() {
        assert!(Tile::Floor.is_walkable());
        assert!(Tile::Water.is_walkable());
        assert!(Tile::Mud.is_walkable());
        assert!(Tile::Lava.is_walkable());
        assert!(Tile::Extraction.is_walkable());
        assert!(!Tile::Wall.is_walkable());
        assert!(!Tile::WallTorch.is_walkable());

        assert_approx_eq!(Tile::Mud.movement_cost(), 2.0);
        assert_approx_eq!(Tile::Water.movement_cost(), 2.0);
        assert_approx_eq!(Tile::Lava.movement_cost(), 1.5);
        assert_approx_eq!(Tile::Floor.movement_cost(), 1.0);
    }

    #[test]
    fn test_tile_grid_bounds() {
        let mut grid = TileGrid::new(4, 3, Tile::Wall);
        assert_eq!(grid.index(3, 2), Some(11));
        assert_eq!(grid.get(4, 0), None);
        assert_eq!(grid.get(-1, 0), None);
        assert!(grid.set(1, 1, Tile::Floor));
        assert!(!grid.set(9, 9, Tile::Floor));
        assert_eq!(grid.get(1, 1), Some(Tile::Floor));
        assert_eq!(grid.count(Tile::Floor), 1);
    }

    #[test]
    fn test_tile_grid_serializes_codes() {
        let mut grid = TileGrid::new(2, 1, Tile::Floor);
        grid.set(1, 0, Tile::Extraction);
        let bytes = bincode::serialize(&grid).unwrap();
        let decoded: TileGrid = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, grid);
        // Each cell travels as its single-byte code.
        assert_eq!(bytes[bytes.len() - 1], 9);
    }

    #[test]
    fn test_entity_row_round_trip() {
        let state = sample_state();
        let row = EntityRow::encode(&state);
        assert_eq!(row.9, 1);
        assert_eq!(row.decode(), state);
    }

    #[test]
    fn test_direction_helpers() {
        assert_eq!(Direction::toward(5, -3), Direction::new(1, -1));
        assert!(Direction::new(1, 1).is_diagonal());
        assert!(Direction::new(0, 1).is_single_step());
        assert!(!Direction::new(0, 2).is_single_step());
        assert!(!Direction::default().is_single_step());
    }

    #[test]
    fn test_equipment_put_and_take() {
        let mut equipment = Equipment::default();
        assert!(equipment.is_empty());
        assert_eq!(equipment.put(EquipSlot::Weapon, ItemStack::new("sword_basic", 1)), None);

        let previous = equipment.put(EquipSlot::Weapon, ItemStack::new("bow_short", 1));
        assert_eq!(previous, Some(ItemStack::new("sword_basic", 1)));

        equipment.put(EquipSlot::Quick2, ItemStack::new("potion_small", 3));
        let drained = equipment.drain();
        assert_eq!(drained.len(), 2);
        assert!(equipment.is_empty());
    }

    #[test]
    fn test_quick_slot_mapping() {
        assert_eq!(EquipSlot::quick(0), Some(EquipSlot::Quick1));
        assert_eq!(EquipSlot::quick(2), Some(EquipSlot::Quick3));
        assert_eq!(EquipSlot::quick(3), None);
        assert!(EquipSlot::Quick2.is_quick());
        assert!(!EquipSlot::Armor.is_quick());
    }

    #[test]
    fn test_id_generator_is_monotonic() {
        let mut ids = IdGenerator::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
        assert_eq!(ids.next_id(), 3);
    }

    #[test]
    fn test_packet_serialization_connect() {
        let packet = Packet::Connect {
            client_version: 42,
            name: "Ada".to_string(),
            class: PlayerClass::Rogue,
            gold: 12,
        };
        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Connect {
                client_version,
                name,
                class,
                gold,
            } => {
                assert_eq!(client_version, 42);
                assert_eq!(name, "Ada");
                assert_eq!(class, PlayerClass::Rogue);
                assert_eq!(gold, 12);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_input() {
        let packet = Packet::Input(PlayerInput {
            tick: 123,
            intent: Intent::DropItem {
                item_id: "potion_small".to_string(),
                source: DropSource::Equipment(EquipSlot::Quick1),
            },
        });

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();
        assert_eq!(deserialized, packet);
    }

    #[test]
    fn test_packet_serialization_snapshot() {
        let snapshot = Snapshot {
            timestamp: 123456789,
            game_time: 540.5,
            entities: vec![EntityRow::encode(&sample_state())],
            projectiles: vec![Projectile {
                id: 3,
                x: 1.5,
                y: 2.0,
                vx: 1.0,
                vy: 0.0,
                speed: 15.0,
                owner_id: 7,
                damage: 8,
            }],
            loot: vec![(
                4,
                WorldLoot {
                    id: 4,
                    x: 3,
                    y: 3,
                    kind: LootKind::Chest,
                    items: vec![ItemStack::new("sword_basic", 1)],
                    gold: 10,
                    opened: false,
                },
            )],
            grid: None,
            grid_revision: 2,
        };

        let packet = Packet::Event(WorldEvent::Snapshot(snapshot));
        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Event(WorldEvent::Snapshot(snapshot)) => {
                assert_eq!(snapshot.timestamp, 123456789);
                assert_approx_eq!(snapshot.game_time, 540.5);
                assert_eq!(snapshot.entities[0].decode(), sample_state());
                assert_eq!(snapshot.projectiles.len(), 1);
                assert_eq!(snapshot.loot[0].1.kind, LootKind::Chest);
                assert!(snapshot.grid.is_none());
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_inventory_actions_skip_cooldown() {
        assert!(Intent::UnequipItem {
            slot: EquipSlot::Armor
        }
        .is_inventory_action());
        assert!(!Intent::Pickup.is_inventory_action());
        assert!(!Intent::Move {
            direction: Direction::UP
        }
        .is_inventory_action());
    }

    #[test]
    fn test_class_parsing() {
        assert_eq!("Rogue".parse::<PlayerClass>(), Ok(PlayerClass::Rogue));
        assert_eq!("barbarian".parse::<PlayerClass>(), Ok(PlayerClass::Barbarian));
        assert!("wizard".parse::<PlayerClass>().is_err());
    }
}
