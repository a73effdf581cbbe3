//! Monster behaviour: a two-state machine per monster.
//!
//! An idle monster occasionally wanders. Once it sees a player it chases,
//! and keeps hunting the last seen position for a while after losing sight.
//! Every action is gated by the monster's own cooldown.

use crate::combat::CombatSystem;
use crate::config::GameConfig;
use crate::grid::GridSystem;
use crate::loot::LootSystem;
use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{Direction, EntityId, Team};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AiState {
    #[default]
    Idle,
    Chasing,
}

#[derive(Debug, Clone, Default)]
struct Brain {
    state: AiState,
    last_known: Option<(i32, i32)>,
    memory_until_tick: u64,
}

/// A melee swing the AI wants to make. The orchestrator resolves it so that
/// monster attacks go through the same path as player attacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AiAttack {
    pub attacker_id: EntityId,
    pub target_id: EntityId,
}

pub struct AiSystem {
    config: Arc<GameConfig>,
    brains: HashMap<EntityId, Brain>,
}

impl AiSystem {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self {
            config,
            brains: HashMap::new(),
        }
    }

    pub fn state(&self, id: EntityId) -> AiState {
        self.brains.get(&id).map_or(AiState::Idle, |b| b.state)
    }

    pub fn last_known(&self, id: EntityId) -> Option<(i32, i32)> {
        self.brains.get(&id).and_then(|b| b.last_known)
    }

    pub fn remove_entity(&mut self, id: EntityId) {
        self.brains.remove(&id);
    }

    pub fn clear(&mut self) {
        self.brains.clear();
    }

    /// Nearest visible living player by Manhattan distance, within sight range.
    fn nearest_player(
        &self,
        x: i32,
        y: i32,
        grid: &GridSystem,
        combat: &CombatSystem,
    ) -> Option<(EntityId, i32, i32)> {
        let sight = self.config.global.ai_sight_range;
        combat
            .iter()
            .filter(|(_, s)| s.team == Team::Player && s.is_alive() && !s.invisible)
            .filter_map(|(id, _)| grid.position(id).map(|p| (id, p.x, p.y)))
            .filter(|(_, px, py)| (px - x).abs().max((py - y).abs()) <= sight)
            .min_by_key(|(id, px, py)| ((px - x).abs() + (py - y).abs(), *id))
    }

    /// Greedy step toward a cell: the direct step first, then each axis on
    /// its own if a diagonal was refused. Closed chests are never entered.
    fn step_toward(id: EntityId, to: (i32, i32), grid: &mut GridSystem, loot: &LootSystem) -> bool {
        let Some(pos) = grid.position(id).copied() else {
            return false;
        };
        let dir = Direction::toward(to.0 - pos.x, to.1 - pos.y);
        if dir.is_zero() {
            return false;
        }

        let mut candidates = vec![(dir.x, dir.y)];
        if dir.is_diagonal() {
            candidates.push((dir.x, 0));
            candidates.push((0, dir.y));
        }
        for (dx, dy) in candidates {
            if loot.is_collidable(pos.x + dx, pos.y + dy) {
                continue;
            }
            if grid.move_entity(id, dx, dy).map_or(false, |r| r.success()) {
                return true;
            }
        }
        false
    }

    /// Runs one AI step for every monster that is not controlled by a human
    /// and whose action cooldown has cleared.
    pub fn update<R: Rng>(
        &mut self,
        tick: u64,
        grid: &mut GridSystem,
        combat: &mut CombatSystem,
        loot: &LootSystem,
        rng: &mut R,
    ) -> Vec<AiAttack> {
        let global = &self.config.global;
        let cooldown_ms = global.ai_action_cooldown_ms as f64;
        let memory_ticks = global.ms_to_ticks(global.ai_memory_ms as f64);
        let wander_chance = global.ai_wander_chance.clamp(0.0, 1.0);

        let controlled: Vec<EntityId> = combat
            .ids()
            .into_iter()
            .filter(|id| {
                combat
                    .stats(*id)
                    .map_or(false, |s| !s.is_player && s.is_alive() && s.next_action_tick <= tick)
            })
            .collect();

        let mut attacks = Vec::new();
        for id in controlled {
            let Some(pos) = grid.position(id).copied() else {
                continue;
            };
            let mut brain = self.brains.remove(&id).unwrap_or_default();
            let mut acted = false;

            let visible = self
                .nearest_player(pos.x, pos.y, grid, combat)
                .filter(|(_, tx, ty)| grid.has_line_of_sight(pos.x, pos.y, *tx, *ty));

            if let Some((target_id, tx, ty)) = visible {
                if brain.state != AiState::Chasing {
                    debug!("Monster {} spotted entity {}", id, target_id);
                }
                brain.state = AiState::Chasing;
                brain.last_known = Some((tx, ty));
                brain.memory_until_tick = tick + memory_ticks;

                let (dx, dy) = (tx - pos.x, ty - pos.y);
                if dx.abs().max(dy.abs()) <= 1 {
                    grid.set_facing(id, Direction::toward(dx, dy));
                    attacks.push(AiAttack {
                        attacker_id: id,
                        target_id,
                    });
                    acted = true;
                } else {
                    acted = Self::step_toward(id, (tx, ty), grid, loot);
                }
            } else if brain.state == AiState::Chasing {
                match brain.last_known {
                    Some(last) if tick < brain.memory_until_tick && last != (pos.x, pos.y) => {
                        acted = Self::step_toward(id, last, grid, loot);
                    }
                    _ => {
                        debug!("Monster {} lost its target", id);
                        brain = Brain::default();
                    }
                }
            } else if rng.gen_bool(wander_chance) {
                if let Some(dir) = Direction::CARDINALS.choose(rng) {
                    if !loot.is_collidable(pos.x + dir.x, pos.y + dir.y) {
                        acted = grid.move_entity(id, dir.x, dir.y).map_or(false, |r| r.success());
                    }
                }
            }

            if acted {
                let cooldown = combat.calculate_cooldown(id, cooldown_ms, grid);
                combat.schedule_next_action(id, tick, cooldown);
            }
            self.brains.insert(id, brain);
        }
        attacks
    }
}
