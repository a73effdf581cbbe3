//! Per-entity combat stats, cooldowns and the damage/death pipeline.
//!
//! Damage never removes anything by itself. Every hp change is recorded as a
//! [`CombatEvent`] on an internal queue which the orchestrator drains and
//! reacts to (despawn scheduling, loot drops, rewards).

use crate::config::{ClassAbility, GameConfig, ItemEffect, ItemKind};
use crate::grid::GridSystem;
use crate::loot::{ConsumableEffect, LootSystem};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{EntityId, EquipSlot, PlayerClass, Team, MELEE_RANGE};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

const MIN_AGILITY_FACTOR: f64 = 0.5;
const AGILITY_STEP: f64 = 0.02;
const BASE_PLAYER_HP: i32 = 80;
const DEFAULT_ATTRIBUTE: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub strength: i32,
    pub agility: i32,
    pub will: i32,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            strength: DEFAULT_ATTRIBUTE,
            agility: DEFAULT_ATTRIBUTE,
            will: DEFAULT_ATTRIBUTE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CombatStats {
    pub hp: i32,
    pub max_hp: i32,
    pub damage: i32,
    /// Wire type: `"player"` for humans, otherwise the enemy table key.
    pub kind: String,
    pub team: Team,
    /// True for human-controlled entities, including those turned monster.
    pub is_player: bool,
    pub class: Option<PlayerClass>,
    pub name: String,
    pub attributes: Attributes,
    pub next_action_tick: u64,
    pub last_processed_input_tick: u64,
    pub current_path: Option<VecDeque<(i32, i32)>>,
    pub invisible: bool,
    pub invisible_until: u64,
    pub damage_buff: i32,
    pub damage_buff_until: u64,
    pub ability_ready_tick: u64,
    pub gold: u32,
}

impl CombatStats {
    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CombatEvent {
    Damage {
        target_id: EntityId,
        amount: i32,
        current_hp: i32,
        source_id: Option<EntityId>,
        is_crit: bool,
    },
    Death {
        entity_id: EntityId,
        killer_id: Option<EntityId>,
        stats: CombatStats,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackResolution {
    Melee {
        target_id: EntityId,
        damage: i32,
        is_crit: bool,
    },
    Ranged {
        target_x: i32,
        target_y: i32,
        damage: i32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Respawn {
    pub kind: String,
    pub x: i32,
    pub y: i32,
}

pub struct CombatSystem {
    config: Arc<GameConfig>,
    stats: HashMap<EntityId, CombatStats>,
    events: Vec<CombatEvent>,
}

impl CombatSystem {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self {
            config,
            stats: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.stats.clear();
        self.events.clear();
    }

    /// Registers a human player with class-derived attributes.
    pub fn register_player(&mut self, id: EntityId, class: PlayerClass, name: &str, gold: u32) {
        let def = self.config.class(class);
        let attributes = Attributes {
            strength: def.strength,
            agility: def.agility,
            will: def.will,
        };
        let max_hp = BASE_PLAYER_HP + 2 * attributes.strength;
        self.stats.insert(
            id,
            CombatStats {
                hp: max_hp,
                max_hp,
                damage: 2 + attributes.strength / 5,
                kind: "player".to_string(),
                team: Team::Player,
                is_player: true,
                class: Some(class),
                name: name.to_string(),
                attributes,
                next_action_tick: 0,
                last_processed_input_tick: 0,
                current_path: None,
                invisible: false,
                invisible_until: 0,
                damage_buff: 0,
                damage_buff_until: 0,
                ability_ready_tick: 0,
                gold,
            },
        );
    }

    /// Registers a monster from the enemy table. Unknown kinds are refused.
    pub fn register_monster(&mut self, id: EntityId, kind: &str) -> bool {
        let Some(def) = self.config.enemies.get(kind) else {
            debug!("Unknown enemy kind '{}'", kind);
            return false;
        };
        self.stats.insert(
            id,
            CombatStats {
                hp: def.hp,
                max_hp: def.hp,
                damage: def.damage,
                kind: kind.to_string(),
                team: Team::Monster,
                is_player: false,
                class: None,
                name: def.name.clone(),
                attributes: Attributes::default(),
                next_action_tick: 0,
                last_processed_input_tick: 0,
                current_path: None,
                invisible: false,
                invisible_until: 0,
                damage_buff: 0,
                damage_buff_until: 0,
                ability_ready_tick: 0,
                gold: 0,
            },
        );
        true
    }

    pub fn remove_entity(&mut self, id: EntityId) -> Option<CombatStats> {
        self.stats.remove(&id)
    }

    pub fn stats(&self, id: EntityId) -> Option<&CombatStats> {
        self.stats.get(&id)
    }

    pub fn stats_mut(&mut self, id: EntityId) -> Option<&mut CombatStats> {
        self.stats.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &CombatStats)> {
        self.stats.iter().map(|(id, s)| (*id, s))
    }

    pub fn ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.stats.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.stats.get(&id).map_or(false, CombatStats::is_alive)
    }

    /// Living entities on the human team.
    pub fn human_count(&self) -> usize {
        self.stats
            .values()
            .filter(|s| s.team == Team::Player && s.is_alive())
            .count()
    }

    /// Monsters never hurt monsters; nobody hurts themselves.
    pub fn is_friendly(&self, a: EntityId, b: EntityId) -> bool {
        if a == b {
            return true;
        }
        match (self.stats.get(&a), self.stats.get(&b)) {
            (Some(sa), Some(sb)) => sa.team == Team::Monster && sb.team == Team::Monster,
            _ => false,
        }
    }

    pub fn is_hostile(&self, a: EntityId, b: EntityId) -> bool {
        self.is_alive(a) && self.is_alive(b) && !self.is_friendly(a, b)
    }

    pub fn drain_events(&mut self) -> Vec<CombatEvent> {
        std::mem::take(&mut self.events)
    }

    /// Applies `amount` damage (negative heals). Hp is clamped to
    /// `[0, max_hp]`. Dead targets are ignored, so death fires once per life.
    pub fn apply_damage(
        &mut self,
        target_id: EntityId,
        amount: i32,
        source_id: Option<EntityId>,
        is_crit: bool,
    ) -> bool {
        let Some(stats) = self.stats.get_mut(&target_id) else {
            return false;
        };
        if !stats.is_alive() {
            return false;
        }

        stats.hp = stats.hp.saturating_sub(amount).clamp(0, stats.max_hp);
        self.events.push(CombatEvent::Damage {
            target_id,
            amount,
            current_hp: stats.hp,
            source_id,
            is_crit,
        });

        if stats.hp == 0 {
            stats.current_path = None;
            info!("Entity {} ({}) died", target_id, stats.kind);
            self.events.push(CombatEvent::Death {
                entity_id: target_id,
                killer_id: source_id,
                stats: stats.clone(),
            });
        }
        true
    }

    /// Scales a base cooldown by agility, floored at half, then by the
    /// terrain cost of the entity's current cell.
    pub fn calculate_cooldown(&self, id: EntityId, base_ms: f64, grid: &GridSystem) -> f64 {
        let Some(stats) = self.stats.get(&id) else {
            return base_ms;
        };
        let above = (stats.attributes.agility - self.config.global.agility_baseline) as f64;
        let factor = (1.0 - above * AGILITY_STEP).max(MIN_AGILITY_FACTOR);
        let terrain = grid
            .position(id)
            .map_or(1.0, |pos| grid.movement_cost(pos.x, pos.y));
        base_ms * factor * terrain
    }

    /// Converts a cooldown into the tick at which the entity may act again.
    pub fn schedule_next_action(&mut self, id: EntityId, tick: u64, cooldown_ms: f64) {
        let ticks = self.config.global.ms_to_ticks(cooldown_ms);
        if let Some(stats) = self.stats.get_mut(&id) {
            stats.next_action_tick = tick + ticks;
        }
    }

    pub fn weapon_range(&self, id: EntityId, loot: &LootSystem) -> i32 {
        loot.equipped_def(id, EquipSlot::Weapon)
            .filter(|def| def.kind == ItemKind::Weapon)
            .map_or(MELEE_RANGE, |def| def.range.max(MELEE_RANGE))
    }

    /// Base damage plus weapon and any active damage buff.
    pub fn attack_damage(&self, id: EntityId, loot: &LootSystem) -> i32 {
        let Some(stats) = self.stats.get(&id) else {
            return 0;
        };
        let weapon = loot
            .equipped_def(id, EquipSlot::Weapon)
            .map_or(0, |def| def.damage);
        stats.damage + weapon + stats.damage_buff
    }

    fn armor(&self, id: EntityId, loot: &LootSystem) -> i32 {
        loot.equipped_def(id, EquipSlot::Armor)
            .map_or(0, |def| def.defense)
    }

    /// Decides whether `attacker` can hit `target` right now and how.
    /// `manual` attacks may crit.
    pub fn resolve_attack<R: Rng>(
        &self,
        attacker: EntityId,
        target: EntityId,
        grid: &GridSystem,
        loot: &LootSystem,
        manual: bool,
        rng: &mut R,
    ) -> Option<AttackResolution> {
        if !self.is_hostile(attacker, target) {
            return None;
        }
        let from = grid.position(attacker)?;
        let to = grid.position(target)?;
        let distance = (to.x - from.x).abs().max((to.y - from.y).abs());
        let range = self.weapon_range(attacker, loot);
        let mut damage = self.attack_damage(attacker, loot);

        if range > MELEE_RANGE {
            if distance > range || !grid.has_line_of_sight(from.x, from.y, to.x, to.y) {
                return None;
            }
            return Some(AttackResolution::Ranged {
                target_x: to.x,
                target_y: to.y,
                damage,
            });
        }

        if distance > MELEE_RANGE {
            return None;
        }
        let is_crit = manual && rng.gen_bool(self.config.global.crit_chance.clamp(0.0, 1.0));
        if is_crit {
            damage = (damage as f32 * self.config.global.crit_multiplier).floor() as i32;
        }
        let damage = (damage - self.armor(target, loot)).max(1);
        Some(AttackResolution::Melee {
            target_id: target,
            damage,
            is_crit,
        })
    }

    /// Attack in the facing direction: the occupant of the facing cell for
    /// melee weapons, or a shot along the facing for ranged ones.
    pub fn process_attack_intent<R: Rng>(
        &self,
        id: EntityId,
        grid: &GridSystem,
        loot: &LootSystem,
        rng: &mut R,
    ) -> Option<AttackResolution> {
        if !self.is_alive(id) {
            return None;
        }
        let pos = grid.position(id)?;
        if pos.facing.is_zero() {
            return None;
        }
        let range = self.weapon_range(id, loot);
        if range > MELEE_RANGE {
            return Some(AttackResolution::Ranged {
                target_x: pos.x + pos.facing.x * range,
                target_y: pos.y + pos.facing.y * range,
                damage: self.attack_damage(id, loot),
            });
        }
        let target = grid.entity_at(pos.x + pos.facing.x, pos.y + pos.facing.y)?;
        self.resolve_attack(id, target, grid, loot, true, rng)
    }

    /// Attack aimed at a cell: ranged weapons shoot toward it, melee weapons
    /// need a hostile occupant within reach.
    pub fn process_target_action<R: Rng>(
        &self,
        id: EntityId,
        x: i32,
        y: i32,
        grid: &GridSystem,
        loot: &LootSystem,
        rng: &mut R,
    ) -> Option<AttackResolution> {
        if !self.is_alive(id) {
            return None;
        }
        let pos = grid.position(id)?;
        if pos.x == x && pos.y == y {
            return None;
        }
        if self.weapon_range(id, loot) > MELEE_RANGE {
            return Some(AttackResolution::Ranged {
                target_x: x,
                target_y: y,
                damage: self.attack_damage(id, loot),
            });
        }
        let target = grid.entity_at(x, y)?;
        self.resolve_attack(id, target, grid, loot, true, rng)
    }

    /// Turns a dead human into a monster at a fresh monster spawn point,
    /// keeping the entity id. No-op if the entity is gone.
    pub fn respawn_player_as_monster<R: Rng>(
        &mut self,
        id: EntityId,
        grid: &mut GridSystem,
        loot: &LootSystem,
        rng: &mut R,
    ) -> Option<Respawn> {
        if !self.stats.get(&id).map_or(false, |s| s.is_player) {
            return None;
        }
        let kinds: Vec<&String> = self.config.enemies.keys().collect();
        let kind = (*kinds.choose(rng)?).clone();
        let def = self.config.enemies.get(&kind)?.clone();

        let (x, y) = grid.spawn_point(false, loot, rng);
        let placed = if grid.position(id).is_some() {
            grid.teleport(id, x, y)
        } else {
            grid.add_entity(id, x, y)
        };
        if !placed {
            return None;
        }

        let stats = self.stats.get_mut(&id)?;
        stats.hp = def.hp;
        stats.max_hp = def.hp;
        stats.damage = def.damage;
        stats.kind = kind.clone();
        stats.team = Team::Monster;
        stats.current_path = None;
        stats.invisible = false;
        stats.damage_buff = 0;
        info!("Entity {} respawned as {} at {},{}", id, kind, x, y);
        Some(Respawn { kind, x, y })
    }

    /// Fires the class ability if it is off cooldown. Monsters have none.
    pub fn use_ability(&mut self, id: EntityId, tick: u64) -> Option<ClassAbility> {
        let global = &self.config.global;
        let stats = self.stats.get(&id)?;
        if !stats.is_alive() || stats.team != Team::Player || tick < stats.ability_ready_tick {
            return None;
        }
        let def = self.config.class(stats.class?).clone();
        let duration = global.ms_to_ticks(def.duration_ms as f64);
        let cooldown = global.ms_to_ticks(def.cooldown_ms as f64);

        if def.ability == ClassAbility::Heal {
            self.apply_damage(id, -def.value, Some(id), false);
        }
        let stats = self.stats.get_mut(&id)?;
        match def.ability {
            ClassAbility::Heal => {}
            ClassAbility::Stealth => {
                stats.invisible = true;
                stats.invisible_until = tick + duration;
            }
            ClassAbility::DamageBuff => {
                stats.damage_buff = def.value;
                stats.damage_buff_until = tick + duration;
            }
        }
        stats.ability_ready_tick = tick + cooldown;
        debug!("Entity {} used {}", id, def.name);
        Some(def.ability)
    }

    /// Applies a consumed item. Heals go through the damage pipeline.
    pub fn apply_consumable(&mut self, id: EntityId, effect: &ConsumableEffect) -> bool {
        match effect.effect {
            ItemEffect::Heal => self.apply_damage(id, -effect.value, Some(id), false),
        }
    }

    /// Expires tick-limited effects.
    pub fn update_buffs(&mut self, tick: u64) {
        for (id, stats) in self.stats.iter_mut() {
            if stats.invisible && tick >= stats.invisible_until {
                stats.invisible = false;
                debug!("Entity {} is visible again", id);
            }
            if stats.damage_buff != 0 && tick >= stats.damage_buff_until {
                stats.damage_buff = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dungeon::Dungeon;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shared::Tile;

    fn setup() -> (CombatSystem, GridSystem, LootSystem) {
        let config = Arc::new(GameConfig::default());
        (
            CombatSystem::new(config.clone()),
            GridSystem::new(config.clone(), Dungeon::arena(10, 10)),
            LootSystem::new(config),
        )
    }

    fn damage_events(events: &[CombatEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, CombatEvent::Damage { .. }))
            .count()
    }

    fn death_events(events: &[CombatEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, CombatEvent::Death { .. }))
            .count()
    }

    #[test]
    fn test_player_stats_from_class() {
        let (mut combat, _, _) = setup();
        combat.register_player(1, PlayerClass::Barbarian, "Ada", 40);
        let stats = combat.stats(1).unwrap();
        assert_eq!(stats.max_hp, 80 + 2 * 25);
        assert_eq!(stats.hp, stats.max_hp);
        assert_eq!(stats.team, Team::Player);
        assert_eq!(stats.gold, 40);
        assert_eq!(stats.kind, "player");
    }

    #[test]
    fn test_unknown_monster_rejected() {
        let (mut combat, _, _) = setup();
        assert!(!combat.register_monster(1, "dragon"));
        assert!(combat.register_monster(2, "rat"));
        assert_eq!(combat.stats(2).unwrap().team, Team::Monster);
    }

    #[test]
    fn test_hp_clamped_both_ways() {
        let (mut combat, _, _) = setup();
        combat.register_player(1, PlayerClass::Fighter, "Ada", 0);
        let max = combat.stats(1).unwrap().max_hp;

        combat.apply_damage(1, -500, None, false);
        assert_eq!(combat.stats(1).unwrap().hp, max);

        combat.apply_damage(1, 30, None, false);
        assert_eq!(combat.stats(1).unwrap().hp, max - 30);

        combat.apply_damage(1, i32::MAX, None, false);
        assert_eq!(combat.stats(1).unwrap().hp, 0);
    }

    #[test]
    fn test_death_fires_once() {
        let (mut combat, _, _) = setup();
        combat.register_monster(5, "rat");
        assert!(combat.apply_damage(5, 1000, Some(1), false));
        assert!(!combat.apply_damage(5, 1000, Some(2), false));
        assert!(!combat.apply_damage(5, -50, None, false));

        let events = combat.drain_events();
        assert_eq!(damage_events(&events), 1);
        assert_eq!(death_events(&events), 1);
        match &events[1] {
            CombatEvent::Death {
                entity_id,
                killer_id,
                stats,
            } => {
                assert_eq!(*entity_id, 5);
                assert_eq!(*killer_id, Some(1));
                assert_eq!(stats.hp, 0);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(combat.drain_events().is_empty());
    }

    #[test]
    fn test_cooldown_agility_and_terrain() {
        let (mut combat, mut grid, _) = setup();
        combat.register_monster(1, "rat");
        grid.set_tile(3, 3, Tile::Mud);
        grid.add_entity(1, 3, 3);
        assert_approx_eq!(combat.calculate_cooldown(1, 250.0, &grid), 500.0);

        combat.stats_mut(1).unwrap().attributes.agility = 15;
        assert_approx_eq!(combat.calculate_cooldown(1, 250.0, &grid), 450.0);

        combat.stats_mut(1).unwrap().attributes.agility = 100;
        assert_approx_eq!(combat.calculate_cooldown(1, 250.0, &grid), 250.0);
    }

    #[test]
    fn test_monsters_never_hurt_monsters() {
        let (mut combat, mut grid, loot) = setup();
        let mut rng = StdRng::seed_from_u64(1);
        combat.register_monster(1, "rat");
        combat.register_monster(2, "orc");
        grid.add_entity(1, 2, 2);
        grid.add_entity(2, 3, 2);
        assert!(combat.is_friendly(1, 2));
        assert!(combat.resolve_attack(1, 2, &grid, &loot, false, &mut rng).is_none());
    }

    #[test]
    fn test_melee_requires_adjacency() {
        let (mut combat, mut grid, loot) = setup();
        let mut rng = StdRng::seed_from_u64(1);
        combat.register_player(1, PlayerClass::Fighter, "Ada", 0);
        combat.register_monster(2, "rat");
        grid.add_entity(1, 2, 2);
        grid.add_entity(2, 4, 2);
        assert!(combat.resolve_attack(1, 2, &grid, &loot, false, &mut rng).is_none());

        grid.teleport(2, 3, 3);
        match combat.resolve_attack(1, 2, &grid, &loot, false, &mut rng) {
            Some(AttackResolution::Melee {
                target_id,
                damage,
                is_crit,
            }) => {
                assert_eq!(target_id, 2);
                assert_eq!(damage, 5);
                assert!(!is_crit);
            }
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[test]
    fn test_ranged_weapon_fires_projectile() {
        let (mut combat, mut grid, mut loot) = setup();
        let mut rng = StdRng::seed_from_u64(1);
        combat.register_player(1, PlayerClass::Rogue, "Ada", 0);
        combat.register_monster(2, "rat");
        grid.add_entity(1, 1, 1);
        grid.add_entity(2, 5, 1);
        loot.add_item(1, "bow_short", 1);
        assert!(loot.equip_item(1, "bow_short", EquipSlot::Weapon));

        match combat.resolve_attack(1, 2, &grid, &loot, true, &mut rng) {
            Some(AttackResolution::Ranged {
                target_x, target_y, ..
            }) => assert_eq!((target_x, target_y), (5, 1)),
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[test]
    fn test_attack_intent_uses_facing() {
        let (mut combat, mut grid, loot) = setup();
        let mut rng = StdRng::seed_from_u64(9);
        combat.register_player(1, PlayerClass::Fighter, "Ada", 0);
        combat.register_monster(2, "rat");
        grid.add_entity(1, 2, 2);
        grid.add_entity(2, 2, 3);
        assert!(combat.process_attack_intent(1, &grid, &loot, &mut rng).is_some());

        grid.set_facing(1, shared::Direction::UP);
        assert!(combat.process_attack_intent(1, &grid, &loot, &mut rng).is_none());
    }

    #[test]
    fn test_respawn_keeps_identity() {
        let (mut combat, mut grid, loot) = setup();
        let mut rng = StdRng::seed_from_u64(3);
        combat.register_player(1, PlayerClass::Fighter, "Ada", 12);
        grid.add_entity(1, 2, 2);
        combat.apply_damage(1, 9999, None, false);

        let respawn = combat.respawn_player_as_monster(1, &mut grid, &loot, &mut rng).unwrap();
        let stats = combat.stats(1).unwrap();
        assert_eq!(stats.team, Team::Monster);
        assert_eq!(stats.kind, respawn.kind);
        assert!(stats.is_alive());
        assert!(stats.is_player);
        assert_eq!(stats.gold, 12);
        let pos = grid.position(1).unwrap();
        assert_eq!((pos.x, pos.y), (respawn.x, respawn.y));

        assert!(combat.respawn_player_as_monster(42, &mut grid, &loot, &mut rng).is_none());
    }

    #[test]
    fn test_abilities_are_tick_based() {
        let (mut combat, _, _) = setup();
        combat.register_player(1, PlayerClass::Rogue, "Ada", 0);
        assert_eq!(combat.use_ability(1, 10), Some(ClassAbility::Stealth));
        assert!(combat.stats(1).unwrap().invisible);
        assert_eq!(combat.use_ability(1, 11), None);

        combat.update_buffs(10 + 99);
        assert!(combat.stats(1).unwrap().invisible);
        combat.update_buffs(10 + 100);
        assert!(!combat.stats(1).unwrap().invisible);

        // 20 s cooldown at 20 ticks per second.
        assert_eq!(combat.use_ability(1, 409), None);
        assert_eq!(combat.use_ability(1, 410), Some(ClassAbility::Stealth));
    }

    #[test]
    fn test_heal_ability_emits_damage_event() {
        let (mut combat, _, _) = setup();
        combat.register_player(1, PlayerClass::Fighter, "Ada", 0);
        combat.apply_damage(1, 60, None, false);
        combat.drain_events();

        assert_eq!(combat.use_ability(1, 0), Some(ClassAbility::Heal));
        let hp = combat.stats(1).unwrap().hp;
        assert_eq!(hp, combat.stats(1).unwrap().max_hp - 20);
        let events = combat.drain_events();
        assert!(matches!(
            events.as_slice(),
            [CombatEvent::Damage { amount: -40, .. }]
        ));
    }

    #[test]
    fn test_rage_buff_adds_damage() {
        let (mut combat, _, loot) = setup();
        combat.register_player(1, PlayerClass::Barbarian, "Ada", 0);
        let before = combat.attack_damage(1, &loot);
        combat.use_ability(1, 0);
        assert_eq!(combat.attack_damage(1, &loot), before + 10);
        combat.update_buffs(160);
        assert_eq!(combat.attack_damage(1, &loot), before);
    }

    #[test]
    fn test_human_count() {
        let (mut combat, _, _) = setup();
        combat.register_player(1, PlayerClass::Fighter, "A", 0);
        combat.register_player(2, PlayerClass::Rogue, "B", 0);
        combat.register_monster(3, "rat");
        assert_eq!(combat.human_count(), 2);
        combat.apply_damage(2, 9999, None, false);
        assert_eq!(combat.human_count(), 1);
    }
}
