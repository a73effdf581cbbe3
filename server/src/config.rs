//! Immutable game configuration shared by every simulation system.
//!
//! A [`GameConfig`] bundles the global tuning values with the static content
//! tables (items, enemies, classes). It is built once at startup, either from
//! the built-in defaults or from a JSON file, and then handed to each system
//! by reference. Fields missing from a file fall back to their defaults.

use serde::{Deserialize, Serialize};
use shared::PlayerClass;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Global tuning values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub tick_rate: u32,
    pub dungeon_width: usize,
    pub dungeon_height: usize,
    pub bsp_depth: u32,
    pub spawn_room_count: usize,
    pub global_cooldown_ms: u32,
    pub escape_time_seconds: f32,
    pub portal_open_seconds: f32,
    pub despawn_delay_ms: u32,
    pub inventory_slots: usize,
    pub chest_count: usize,
    pub enemies_per_room_min: u32,
    pub enemies_per_room_max: u32,
    pub lava_damage: i32,
    pub lava_interval_ms: u32,
    pub ai_action_cooldown_ms: u32,
    pub ai_memory_ms: u32,
    pub ai_wander_chance: f64,
    pub ai_sight_range: i32,
    pub crit_chance: f64,
    pub crit_multiplier: f32,
    pub projectile_speed: f32,
    pub grid_resend_ticks: u64,
    pub extraction_reward: u32,
    pub kill_reward_min: u32,
    pub kill_reward_max: u32,
    pub agility_baseline: i32,
    pub path_search_limit: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            tick_rate: 20,
            dungeon_width: 50,
            dungeon_height: 50,
            bsp_depth: 8,
            spawn_room_count: 2,
            global_cooldown_ms: 250,
            escape_time_seconds: 600.0,
            portal_open_seconds: 60.0,
            despawn_delay_ms: 1000,
            inventory_slots: 15,
            chest_count: 15,
            enemies_per_room_min: 1,
            enemies_per_room_max: 3,
            lava_damage: 20,
            lava_interval_ms: 1000,
            ai_action_cooldown_ms: 1000,
            ai_memory_ms: 5000,
            ai_wander_chance: 0.02,
            ai_sight_range: 12,
            crit_chance: 0.15,
            crit_multiplier: 1.5,
            projectile_speed: 15.0,
            grid_resend_ticks: 100,
            extraction_reward: 100,
            kill_reward_min: 2,
            kill_reward_max: 5,
            agility_baseline: 10,
            path_search_limit: 4000,
        }
    }
}

impl GlobalConfig {
    /// Milliseconds per simulation tick.
    pub fn time_per_tick_ms(&self) -> f64 {
        1000.0 / self.tick_rate.max(1) as f64
    }

    /// Converts a millisecond duration into whole ticks, rounding up.
    pub fn ms_to_ticks(&self, ms: f64) -> u64 {
        (ms / self.time_per_tick_ms()).ceil().max(0.0) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Weapon,
    Armor,
    Consumable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemEffect {
    Heal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDef {
    pub name: String,
    pub kind: ItemKind,
    #[serde(default)]
    pub damage: i32,
    #[serde(default)]
    pub defense: i32,
    #[serde(default = "default_range")]
    pub range: i32,
    #[serde(default)]
    pub effect: Option<ItemEffect>,
    #[serde(default)]
    pub value: i32,
    #[serde(default = "default_tier")]
    pub tier: u8,
}

fn default_range() -> i32 {
    1
}

fn default_tier() -> u8 {
    1
}

impl ItemDef {
    fn weapon(name: &str, damage: i32, range: i32, tier: u8) -> Self {
        Self {
            name: name.to_string(),
            kind: ItemKind::Weapon,
            damage,
            defense: 0,
            range,
            effect: None,
            value: 0,
            tier,
        }
    }

    fn armor(name: &str, defense: i32, tier: u8) -> Self {
        Self {
            name: name.to_string(),
            kind: ItemKind::Armor,
            damage: 0,
            defense,
            range: 1,
            effect: None,
            value: 0,
            tier,
        }
    }

    fn potion(name: &str, heal: i32, tier: u8) -> Self {
        Self {
            name: name.to_string(),
            kind: ItemKind::Consumable,
            damage: 0,
            defense: 0,
            range: 1,
            effect: Some(ItemEffect::Heal),
            value: heal,
            tier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnemyDef {
    pub name: String,
    pub hp: i32,
    pub damage: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassAbility {
    Heal,
    Stealth,
    DamageBuff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub strength: i32,
    pub agility: i32,
    pub will: i32,
    pub ability: ClassAbility,
    pub cooldown_ms: u32,
    #[serde(default)]
    pub duration_ms: u32,
    #[serde(default)]
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassTable {
    pub fighter: ClassDef,
    pub rogue: ClassDef,
    pub barbarian: ClassDef,
}

impl Default for ClassTable {
    fn default() -> Self {
        Self {
            fighter: ClassDef {
                name: "Second Wind".to_string(),
                strength: 15,
                agility: 15,
                will: 15,
                ability: ClassAbility::Heal,
                cooldown_ms: 15_000,
                duration_ms: 0,
                value: 40,
            },
            rogue: ClassDef {
                name: "Hide".to_string(),
                strength: 10,
                agility: 25,
                will: 10,
                ability: ClassAbility::Stealth,
                cooldown_ms: 20_000,
                duration_ms: 5_000,
                value: 0,
            },
            barbarian: ClassDef {
                name: "Rage".to_string(),
                strength: 25,
                agility: 10,
                will: 10,
                ability: ClassAbility::DamageBuff,
                cooldown_ms: 25_000,
                duration_ms: 8_000,
                value: 10,
            },
        }
    }
}

impl ClassTable {
    pub fn get(&self, class: PlayerClass) -> &ClassDef {
        match class {
            PlayerClass::Fighter => &self.fighter,
            PlayerClass::Rogue => &self.rogue,
            PlayerClass::Barbarian => &self.barbarian,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub global: GlobalConfig,
    pub items: BTreeMap<String, ItemDef>,
    pub enemies: BTreeMap<String, EnemyDef>,
    pub classes: ClassTable,
}

impl Default for GameConfig {
    fn default() -> Self {
        let mut items = BTreeMap::new();
        items.insert("sword_basic".into(), ItemDef::weapon("Rusty Sword", 8, 1, 1));
        items.insert("dagger_iron".into(), ItemDef::weapon("Iron Dagger", 6, 1, 1));
        items.insert("axe_battle".into(), ItemDef::weapon("Battle Axe", 14, 1, 2));
        items.insert("bow_short".into(), ItemDef::weapon("Short Bow", 7, 6, 2));
        items.insert("sword_knight".into(), ItemDef::weapon("Knight Sword", 18, 1, 3));
        items.insert("crossbow_heavy".into(), ItemDef::weapon("Heavy Crossbow", 13, 8, 3));
        items.insert("armor_leather".into(), ItemDef::armor("Leather Armor", 1, 1));
        items.insert("armor_chain".into(), ItemDef::armor("Chain Mail", 3, 2));
        items.insert("armor_plate".into(), ItemDef::armor("Plate Armor", 5, 3));
        items.insert("potion_small".into(), ItemDef::potion("Small Potion", 30, 1));
        items.insert("potion_large".into(), ItemDef::potion("Large Potion", 60, 2));
        items.insert("elixir_vital".into(), ItemDef::potion("Vital Elixir", 120, 3));

        let mut enemies = BTreeMap::new();
        for (key, name, hp, damage) in [
            ("rat", "Giant Rat", 20, 4),
            ("goblin", "Goblin", 35, 6),
            ("skeleton", "Skeleton", 45, 8),
            ("orc", "Orc", 70, 12),
        ] {
            enemies.insert(
                key.to_string(),
                EnemyDef {
                    name: name.to_string(),
                    hp,
                    damage,
                },
            );
        }

        Self {
            global: GlobalConfig::default(),
            items,
            enemies,
            classes: ClassTable::default(),
        }
    }
}

impl GameConfig {
    /// Loads a configuration file, filling absent fields from the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let config: GameConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: display,
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.global;
        if g.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be positive".into()));
        }
        if g.dungeon_width < 12 || g.dungeon_height < 12 {
            return Err(ConfigError::Invalid(format!(
                "dungeon must be at least 12x12, got {}x{}",
                g.dungeon_width, g.dungeon_height
            )));
        }
        if g.kill_reward_min > g.kill_reward_max {
            return Err(ConfigError::Invalid(
                "kill_reward_min exceeds kill_reward_max".into(),
            ));
        }
        if g.enemies_per_room_min > g.enemies_per_room_max {
            return Err(ConfigError::Invalid(
                "enemies_per_room_min exceeds enemies_per_room_max".into(),
            ));
        }
        if self.enemies.is_empty() {
            return Err(ConfigError::Invalid("enemy table is empty".into()));
        }
        Ok(())
    }

    pub fn item(&self, item_id: &str) -> Option<&ItemDef> {
        self.items.get(item_id)
    }

    pub fn class(&self, class: PlayerClass) -> &ClassDef {
        self.classes.get(class)
    }
}
