//! Authoritative game orchestrator.
//!
//! `Game` composes the grid, combat, loot, projectile and AI systems, routes
//! player intents into them and turns their results into outbound
//! [`WorldEvent`]s. It never touches the network: events are queued as
//! [`Outbound`] messages and drained by the transport once per tick.
//!
//! Within one call to [`Game::update`] the processing order is fixed:
//! buffered intents, path following, escape portal and time limit,
//! projectiles, lava, AI, buff expiry and finally the despawn sweep.

use crate::ai::AiSystem;
use crate::combat::{AttackResolution, CombatEvent, CombatStats, CombatSystem};
use crate::config::{ClassAbility, GameConfig};
use crate::dungeon::{Dungeon, DungeonGenerator};
use crate::grid::{ClickIntent, GridSystem, MoveIntent};
use crate::loot::{LootSystem, PickupTarget};
use crate::projectile::{Impact, ProjectileSystem};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    Direction, EffectKind, EffectTarget, EntityId, EntityRow, EntityState, EquipSlot,
    IdGenerator, Intent, LootId, PlayerClass, PlayerInput, Projectile, Snapshot, Team, Tile,
    WorldEvent,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Longest step the simulation accepts, in milliseconds.
const MAX_UPDATE_DT_MS: f64 = 100.0;
const STARTER_KIT: [&str; 2] = ["sword_basic", "armor_leather"];

pub const MSG_TIME_EXPIRED: &str = "Time Expired - Dungeon Collapsed";
pub const MSG_ALL_PERISHED: &str = "All Humans Perished";
pub const MSG_ALL_ESCAPED: &str = "All Humans Escaped";

/// A world event and who should receive it.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Broadcast(WorldEvent),
    Unicast(EntityId, WorldEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingDespawn {
    id: EntityId,
    despawn_tick: u64,
    is_player: bool,
}

pub struct Game {
    config: Arc<GameConfig>,
    generator: DungeonGenerator,
    grid: GridSystem,
    combat: CombatSystem,
    loot: LootSystem,
    projectiles: ProjectileSystem,
    ai: AiSystem,
    ids: IdGenerator,
    rng: StdRng,

    tick: u64,
    game_time: f32,
    escape_open: bool,
    game_over: bool,
    live_projectiles: Vec<Projectile>,
    despawns: Vec<PendingDespawn>,
    /// One pending intent per entity, replaced by newer ones.
    buffered: BTreeMap<EntityId, PlayerInput>,
    outbox: Vec<Outbound>,
    last_sent_grid_revision: Option<u32>,
    last_grid_sent_tick: u64,
}

impl Game {
    /// Creates a game over a freshly generated, still empty dungeon. A seed
    /// makes every random decision reproducible.
    pub fn new(config: Arc<GameConfig>, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let generator = DungeonGenerator::new(&config.global);
        let dungeon = generator.generate(&mut rng);
        Self::build(config, generator, dungeon, rng)
    }

    /// Creates a game over a fixed layout. Nothing is populated.
    pub fn with_dungeon(config: Arc<GameConfig>, dungeon: Dungeon, seed: u64) -> Self {
        let generator = DungeonGenerator::new(&config.global);
        Self::build(config, generator, dungeon, StdRng::seed_from_u64(seed))
    }

    fn build(config: Arc<GameConfig>, generator: DungeonGenerator, dungeon: Dungeon, rng: StdRng) -> Self {
        Self {
            grid: GridSystem::new(config.clone(), dungeon),
            combat: CombatSystem::new(config.clone()),
            loot: LootSystem::new(config.clone()),
            projectiles: ProjectileSystem::new(config.clone()),
            ai: AiSystem::new(config.clone()),
            ids: IdGenerator::new(),
            rng,
            tick: 0,
            game_time: config.global.escape_time_seconds,
            escape_open: false,
            game_over: false,
            live_projectiles: Vec::new(),
            despawns: Vec::new(),
            buffered: BTreeMap::new(),
            outbox: Vec::new(),
            last_sent_grid_revision: None,
            last_grid_sent_tick: 0,
            generator,
            config,
        }
    }

    /// Generates a new dungeon, populates it and resets the clock. Everyone
    /// in the previous world is dropped.
    pub fn start_game(&mut self) {
        self.loot.clear();
        self.combat.clear();
        self.ai.clear();
        self.grid.initialize_dungeon(&self.generator, &mut self.rng);
        self.grid
            .populate(&mut self.combat, &mut self.loot, &mut self.ids, &mut self.rng);

        self.game_time = self.config.global.escape_time_seconds;
        self.escape_open = false;
        self.game_over = false;
        self.live_projectiles.clear();
        self.despawns.clear();
        self.buffered.clear();
        self.last_sent_grid_revision = None;
        self.last_grid_sent_tick = 0;

        info!(
            "Game started: {}x{} dungeon with {} rooms",
            self.grid.width(),
            self.grid.height(),
            self.grid.rooms().len()
        );
        let init = self.init_world_event();
        self.broadcast(init);
    }

    pub fn config(&self) -> &Arc<GameConfig> {
        &self.config
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Seconds left before the dungeon collapses.
    pub fn game_time(&self) -> f32 {
        self.game_time
    }

    pub fn escape_open(&self) -> bool {
        self.escape_open
    }

    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    pub fn grid(&self) -> &GridSystem {
        &self.grid
    }

    pub fn grid_mut(&mut self) -> &mut GridSystem {
        &mut self.grid
    }

    pub fn combat(&self) -> &CombatSystem {
        &self.combat
    }

    pub fn combat_mut(&mut self) -> &mut CombatSystem {
        &mut self.combat
    }

    pub fn loot(&self) -> &LootSystem {
        &self.loot
    }

    pub fn loot_mut(&mut self) -> &mut LootSystem {
        &mut self.loot
    }

    pub fn ai(&self) -> &AiSystem {
        &self.ai
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.live_projectiles
    }

    pub fn buffered_input(&self, id: EntityId) -> Option<&PlayerInput> {
        self.buffered.get(&id)
    }

    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    fn broadcast(&mut self, event: WorldEvent) {
        self.outbox.push(Outbound::Broadcast(event));
    }

    fn unicast(&mut self, id: EntityId, event: WorldEvent) {
        self.outbox.push(Outbound::Unicast(id, event));
    }

    pub fn init_world_event(&self) -> WorldEvent {
        WorldEvent::InitWorld {
            grid: self.grid.tiles().clone(),
            grid_revision: self.grid.revision(),
        }
    }

    /// Places a new human in a spawn room with class stats, carried gold and
    /// the starter kit.
    pub fn add_player(&mut self, name: &str, class: PlayerClass, gold: u32) -> EntityId {
        let id = self.ids.next_id();
        let (x, y) = self.grid.spawn_point(true, &self.loot, &mut self.rng);
        if !self.grid.add_entity(id, x, y) {
            warn!("No free spawn cell for player {}", id);
        }
        self.combat.register_player(id, class, name, gold);
        for item in STARTER_KIT {
            self.loot.add_item(id, item, 1);
        }
        self.send_inventory_update(id);
        info!("Player {} ({:?} {}) joined at {},{}", id, class, name, x, y);
        id
    }

    /// Drops every trace of an entity. Returns whether it existed.
    pub fn remove_player(&mut self, id: EntityId) -> bool {
        let existed = self.combat.stats(id).is_some() || self.grid.position(id).is_some();
        self.despawn_entity(id);
        self.despawns.retain(|d| d.id != id);
        if existed {
            info!("Player {} removed", id);
        }
        existed
    }

    /// Adds a monster of a known kind at a cell.
    pub fn spawn_monster(&mut self, kind: &str, x: i32, y: i32) -> Option<EntityId> {
        let id = self.ids.next_id();
        if !self.combat.register_monster(id, kind) {
            return None;
        }
        if !self.grid.add_entity(id, x, y) {
            self.combat.remove_entity(id);
            return None;
        }
        Some(id)
    }

    fn despawn_entity(&mut self, id: EntityId) {
        self.grid.remove_entity(id);
        self.combat.remove_entity(id);
        self.loot.remove_entity(id);
        self.ai.remove_entity(id);
        self.buffered.remove(&id);
    }

    /// Accepts an intent from a connected player. Intents arriving during the
    /// action cooldown are held in a single slot, newest wins. Returns true
    /// when the intent was processed immediately.
    pub fn handle_player_input(&mut self, id: EntityId, input: PlayerInput) -> bool {
        let Some(stats) = self.combat.stats(id) else {
            return false;
        };
        if !stats.is_alive() {
            debug!("Ignoring input from dead entity {}", id);
            return false;
        }
        if input.tick < stats.last_processed_input_tick {
            debug!(
                "Dropping stale input {} from {} (last {})",
                input.tick, id, stats.last_processed_input_tick
            );
            return false;
        }
        if !input.intent.is_inventory_action() && self.tick < stats.next_action_tick {
            self.buffered.insert(id, input);
            return false;
        }
        self.process_intent(id, input);
        true
    }

    fn process_intent(&mut self, id: EntityId, input: PlayerInput) {
        let PlayerInput { tick, intent } = input;
        if let Some(stats) = self.combat.stats_mut(id) {
            stats.last_processed_input_tick = tick;
        }
        let mut cooldown = !intent.is_inventory_action();

        match intent {
            Intent::Move { direction } => {
                if let Some(stats) = self.combat.stats_mut(id) {
                    stats.current_path = None;
                }
                self.process_move(id, direction);
            }
            Intent::TargetAction { x, y, shift } => {
                match self
                    .grid
                    .determine_click_intent(id, x, y, shift, &self.combat, &self.loot)
                {
                    Some(ClickIntent::AttackTarget { x, y }) => {
                        let resolution = self.combat.process_target_action(
                            id,
                            x,
                            y,
                            &self.grid,
                            &self.loot,
                            &mut self.rng,
                        );
                        if let Some(resolution) = resolution {
                            self.apply_attack(id, resolution);
                        }
                    }
                    Some(ClickIntent::MovePath(path)) => {
                        if let Some(stats) = self.combat.stats_mut(id) {
                            stats.current_path = Some(path);
                        }
                        cooldown = false;
                    }
                    None => {}
                }
            }
            Intent::EquipItem { item_id, slot } => {
                if self.loot.equip_item(id, &item_id, slot) {
                    self.send_inventory_update(id);
                }
            }
            Intent::UnequipItem { slot } => {
                if self.loot.unequip_item(id, slot) {
                    self.send_inventory_update(id);
                }
            }
            Intent::DropItem { item_id, source } => {
                if let Some(pos) = self.grid.position(id).copied() {
                    if self.loot.perform_drop(id, &item_id, source, pos.x, pos.y).is_some() {
                        self.send_inventory_update(id);
                    }
                }
            }
            Intent::InteractLoot { loot_id } => {
                if self.within_reach(id, loot_id) {
                    self.process_loot_interaction(id, loot_id);
                }
            }
            Intent::UseAbilitySlot { slot } => {
                let effect = EquipSlot::quick(slot).and_then(|slot| self.loot.consume_item(id, slot));
                if let Some(effect) = effect {
                    self.combat.apply_consumable(id, &effect);
                    self.send_inventory_update(id);
                    self.broadcast(WorldEvent::Effect {
                        kind: EffectKind::Heal,
                        source_id: Some(id),
                        target: EffectTarget::Entity(id),
                    });
                    self.process_combat_events();
                }
            }
            Intent::Pickup => {
                self.pickup(id);
            }
            Intent::Ability => self.use_ability(id),
            Intent::PrimaryAction => {
                if !self.pickup(id) {
                    let resolution =
                        self.combat
                            .process_attack_intent(id, &self.grid, &self.loot, &mut self.rng);
                    if let Some(resolution) = resolution {
                        self.apply_attack(id, resolution);
                    }
                }
            }
        }

        if cooldown {
            self.apply_global_cooldown(id);
        }
    }

    fn apply_global_cooldown(&mut self, id: EntityId) {
        let base = self.config.global.global_cooldown_ms as f64;
        let cooldown = self.combat.calculate_cooldown(id, base, &self.grid);
        self.combat.schedule_next_action(id, self.tick, cooldown);
    }

    fn process_move(&mut self, id: EntityId, direction: Direction) {
        match self.grid.resolve_move_intent(id, direction, &self.loot) {
            MoveIntent::Moved { x, y } => {
                if self.grid.tile(x, y) == Some(Tile::Extraction) {
                    self.handle_escape(id);
                }
            }
            MoveIntent::BumpEntity(other) => {
                if !self.combat.is_friendly(id, other) {
                    self.perform_attack(id, other, true);
                }
            }
            MoveIntent::InteractLoot(loot_id) => {
                self.process_loot_interaction(id, loot_id);
            }
            MoveIntent::Blocked => {}
        }
    }

    fn within_reach(&self, id: EntityId, loot_id: LootId) -> bool {
        match (self.grid.position(id), self.loot.get(loot_id)) {
            (Some(pos), Some(loot)) => (loot.x - pos.x).abs().max((loot.y - pos.y).abs()) <= 1,
            _ => false,
        }
    }

    /// Loots whatever is under or in front of the entity. Returns false when
    /// nothing was taken, so the caller can fall back to attacking.
    fn pickup(&mut self, id: EntityId) -> bool {
        let Some(pos) = self.grid.position(id).copied() else {
            return false;
        };
        match self.loot.get_pickup_target(pos.x, pos.y, pos.facing) {
            Some(PickupTarget::Chest(loot_id)) => self.process_loot_interaction(id, loot_id),
            Some(PickupTarget::Bags(bags)) => {
                let mut taken = false;
                for loot_id in bags {
                    taken |= self.process_loot_interaction(id, loot_id);
                }
                taken
            }
            None => false,
        }
    }

    /// Returns whether the loot was opened or emptied.
    fn process_loot_interaction(&mut self, id: EntityId, loot_id: LootId) -> bool {
        // Monsters, including humans turned monster, cannot carry loot.
        if self.combat.stats(id).map_or(true, |s| s.team != Team::Player) {
            return false;
        }
        let Some(result) = self.loot.resolve_interaction(id, loot_id) else {
            return false;
        };
        self.send_inventory_update(id);
        self.broadcast(WorldEvent::LootOpened { id: loot_id });
        if result.gold > 0 {
            self.award_gold(id, result.gold);
        }
        true
    }

    fn send_inventory_update(&mut self, id: EntityId) {
        let event = WorldEvent::UpdateInventory {
            inventory: self.loot.inventory(id).to_vec(),
            equipment: self.loot.equipment(id),
        };
        self.unicast(id, event);
    }

    fn award_gold(&mut self, id: EntityId, amount: u32) {
        let Some(stats) = self.combat.stats_mut(id) else {
            return;
        };
        stats.gold += amount;
        self.unicast(id, WorldEvent::UpdateGold { id, amount });
    }

    fn use_ability(&mut self, id: EntityId) {
        let Some(ability) = self.combat.use_ability(id, self.tick) else {
            return;
        };
        let kind = match ability {
            ClassAbility::Heal => EffectKind::Heal,
            ClassAbility::Stealth => EffectKind::Stealth,
            ClassAbility::DamageBuff => EffectKind::Buff,
        };
        self.broadcast(WorldEvent::Effect {
            kind,
            source_id: Some(id),
            target: EffectTarget::Entity(id),
        });
        self.process_combat_events();
    }

    fn perform_attack(&mut self, attacker: EntityId, target: EntityId, manual: bool) {
        let resolution = self.combat.resolve_attack(
            attacker,
            target,
            &self.grid,
            &self.loot,
            manual,
            &mut self.rng,
        );
        if let Some(resolution) = resolution {
            self.apply_attack(attacker, resolution);
        }
    }

    fn apply_attack(&mut self, attacker: EntityId, resolution: AttackResolution) {
        let Some(from) = self.grid.position(attacker).copied() else {
            return;
        };
        match resolution {
            AttackResolution::Ranged {
                target_x,
                target_y,
                damage,
            } => {
                let range = self.combat.weapon_range(attacker, &self.loot);
                let projectile = self.projectiles.create_projectile(
                    attacker,
                    (from.x, from.y),
                    (target_x, target_y),
                    damage,
                    range,
                );
                if let Some(projectile) = projectile {
                    self.grid.set_facing(
                        attacker,
                        Direction::toward(target_x - from.x, target_y - from.y),
                    );
                    self.broadcast(WorldEvent::SpawnProjectile(projectile.clone()));
                    self.live_projectiles.push(projectile);
                }
            }
            AttackResolution::Melee {
                target_id,
                damage,
                is_crit,
            } => {
                if let Some(to) = self.grid.position(target_id).copied() {
                    self.grid
                        .set_facing(attacker, Direction::toward(to.x - from.x, to.y - from.y));
                }
                if self
                    .combat
                    .apply_damage(target_id, damage, Some(attacker), is_crit)
                {
                    self.broadcast(WorldEvent::Effect {
                        kind: if is_crit {
                            EffectKind::Slash
                        } else {
                            EffectKind::Attack
                        },
                        source_id: Some(attacker),
                        target: EffectTarget::Entity(target_id),
                    });
                }
                self.process_combat_events();
            }
        }
    }

    fn handle_escape(&mut self, id: EntityId) {
        let Some(stats) = self.combat.stats(id) else {
            return;
        };
        if stats.team != Team::Player || !stats.is_alive() {
            return;
        }
        info!("{} ({}) escaped the dungeon", stats.name, id);

        let reward = self.config.global.extraction_reward;
        self.award_gold(id, reward);
        self.broadcast(WorldEvent::PlayerExtracted { id });
        self.despawn_entity(id);

        if self.combat.human_count() == 0 {
            self.end_game(MSG_ALL_ESCAPED);
        }
    }

    fn end_game(&mut self, message: &str) {
        if self.game_over {
            return;
        }
        self.game_over = true;
        info!("Game over: {}", message);
        self.broadcast(WorldEvent::HumansEscaped {
            message: message.to_string(),
        });
    }

    fn process_combat_events(&mut self) {
        for event in self.combat.drain_events() {
            if let CombatEvent::Death {
                entity_id,
                killer_id,
                stats,
            } = event
            {
                self.handle_entity_death(entity_id, killer_id, &stats);
            }
        }
    }

    /// Runs once per death: drops the victim's items, pays kill rewards,
    /// checks for a wipe and schedules the despawn or respawn.
    fn handle_entity_death(&mut self, id: EntityId, killer: Option<EntityId>, stats: &CombatStats) {
        self.broadcast(WorldEvent::EntityDeath { id });
        self.buffered.remove(&id);

        let items = self.loot.take_all(id);
        if !items.is_empty() {
            if let Some(pos) = self.grid.position(id).copied() {
                if let Some(bag) = self.loot.create_loot_bag(pos.x, pos.y, items, 0) {
                    debug!("Entity {} dropped bag {} at {},{}", id, bag, pos.x, pos.y);
                }
            }
            self.send_inventory_update(id);
        }

        if !stats.is_player && stats.team == Team::Monster {
            if let Some(killer) = killer.filter(|k| *k != id) {
                let global = &self.config.global;
                let reward = self
                    .rng
                    .gen_range(global.kill_reward_min..=global.kill_reward_max);
                self.award_gold(killer, reward);
            }
        }

        if stats.is_player && self.combat.human_count() == 0 {
            self.end_game(MSG_ALL_PERISHED);
        }

        let delay = self
            .config
            .global
            .ms_to_ticks(self.config.global.despawn_delay_ms as f64);
        self.despawns.push(PendingDespawn {
            id,
            despawn_tick: self.tick + delay,
            is_player: stats.is_player,
        });
    }

    /// Advances the world by one fixed tick.
    pub fn update(&mut self, tick: u64, dt_ms: f64) {
        self.tick = tick;
        let dt = dt_ms.min(MAX_UPDATE_DT_MS);
        self.game_time -= (dt / 1000.0) as f32;

        self.flush_buffered_inputs();
        self.follow_paths();
        self.update_timers();

        let impacts = self.projectiles.update_projectiles(
            dt,
            &mut self.live_projectiles,
            &self.grid,
            &mut self.combat,
        );
        for impact in impacts {
            if let Impact::Entity {
                projectile_id,
                target_id,
            } = impact
            {
                debug!("Projectile {} struck {}", projectile_id, target_id);
            }
        }
        self.process_combat_events();

        self.grid.process_lava_damage(dt, &mut self.combat);
        self.process_combat_events();

        let attacks = self.ai.update(
            tick,
            &mut self.grid,
            &mut self.combat,
            &self.loot,
            &mut self.rng,
        );
        for attack in attacks {
            self.perform_attack(attack.attacker_id, attack.target_id, false);
        }

        self.combat.update_buffs(tick);
        self.process_despawns();
    }

    fn flush_buffered_inputs(&mut self) {
        let ready: Vec<EntityId> = self
            .buffered
            .keys()
            .copied()
            .filter(|id| {
                self.combat
                    .stats(*id)
                    .map_or(true, |s| self.tick >= s.next_action_tick)
            })
            .collect();
        for id in ready {
            if let Some(input) = self.buffered.remove(&id) {
                if self.combat.is_alive(id) {
                    self.process_intent(id, input);
                }
            }
        }
    }

    /// Takes one step along each player's auto-path whose cooldown has
    /// cleared. A step that is no longer adjacent aborts the path.
    fn follow_paths(&mut self) {
        for id in self.combat.ids() {
            let Some(stats) = self.combat.stats(id) else {
                continue;
            };
            if !stats.is_player || !stats.is_alive() || self.tick < stats.next_action_tick {
                continue;
            }
            let Some(next) = stats.current_path.as_ref().and_then(|p| p.front().copied()) else {
                continue;
            };
            let Some(pos) = self.grid.position(id).copied() else {
                continue;
            };

            let direction = Direction::new(next.0 - pos.x, next.1 - pos.y);
            let Some(stats) = self.combat.stats_mut(id) else {
                continue;
            };
            if !direction.is_single_step() {
                debug!("Entity {} path broken at {:?}, dropping it", id, next);
                stats.current_path = None;
                continue;
            }
            if let Some(path) = stats.current_path.as_mut() {
                path.pop_front();
                if path.is_empty() {
                    stats.current_path = None;
                }
            }

            self.process_move(id, direction);
            self.apply_global_cooldown(id);
        }
    }

    fn update_timers(&mut self) {
        let portal_at = self.config.global.portal_open_seconds;
        if !self.escape_open && self.game_time <= portal_at {
            self.escape_open = true;
            let (x, y) = self.grid.spawn_extraction_zone(&self.loot, &mut self.rng);
            self.broadcast(WorldEvent::PortalSpawn { x, y });
        }
        if !self.game_over && self.game_time <= 0.0 {
            self.end_game(MSG_TIME_EXPIRED);
        }
    }

    fn process_despawns(&mut self) {
        let tick = self.tick;
        let (due, pending): (Vec<PendingDespawn>, Vec<PendingDespawn>) =
            std::mem::take(&mut self.despawns)
                .into_iter()
                .partition(|d| tick >= d.despawn_tick);
        self.despawns = pending;

        for entry in due {
            if !entry.is_player {
                debug!("Despawning monster {}", entry.id);
                self.despawn_entity(entry.id);
                continue;
            }
            match self
                .combat
                .respawn_player_as_monster(entry.id, &mut self.grid, &self.loot, &mut self.rng)
            {
                Some(respawn) => {
                    self.ai.remove_entity(entry.id);
                    self.broadcast(WorldEvent::RespawnMonster {
                        id: entry.id,
                        kind: respawn.kind,
                        x: respawn.x,
                        y: respawn.y,
                    });
                }
                None => debug!("Entity {} is gone, respawn skipped", entry.id),
            }
        }
    }

    /// Serializes the world for broadcast. The grid is included when its
    /// revision changed since it was last sent, and periodically for late
    /// joiners.
    pub fn get_authoritative_state(&mut self, timestamp: u64) -> Snapshot {
        let mut ids: Vec<EntityId> = self.grid.entities().map(|(id, _)| id).collect();
        ids.sort_unstable();
        let entities = ids
            .into_iter()
            .filter_map(|id| {
                let pos = self.grid.position(id)?;
                let stats = self.combat.stats(id)?;
                Some(EntityRow::encode(&EntityState {
                    id,
                    x: pos.x,
                    y: pos.y,
                    facing: pos.facing,
                    hp: stats.hp,
                    max_hp: stats.max_hp,
                    kind: stats.kind.clone(),
                    team: stats.team,
                    invisible: stats.invisible,
                    next_action_tick: stats.next_action_tick,
                    last_processed_input_tick: stats.last_processed_input_tick,
                }))
            })
            .collect();

        let revision = self.grid.revision();
        let resend = self.config.global.grid_resend_ticks;
        // Several ticks may pass between snapshots, so the periodic resend
        // is measured from the last send rather than aligned to tick numbers.
        let send_grid = self.last_sent_grid_revision != Some(revision)
            || (resend > 0 && self.tick.saturating_sub(self.last_grid_sent_tick) >= resend);
        if send_grid {
            self.last_sent_grid_revision = Some(revision);
            self.last_grid_sent_tick = self.tick;
        }

        Snapshot {
            timestamp,
            game_time: self.game_time,
            entities,
            projectiles: self.live_projectiles.clone(),
            loot: self.loot.entries(),
            grid: send_grid.then(|| self.grid.tiles().clone()),
            grid_revision: revision,
        }
    }
}
