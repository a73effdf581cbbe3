//! Ranged attack projectiles.

use crate::combat::CombatSystem;
use crate::config::GameConfig;
use crate::grid::GridSystem;
use log::debug;
use shared::{EntityId, IdGenerator, Projectile, ProjectileId, MELEE_RANGE};
use std::sync::Arc;

/// Longest distance a projectile may cover in one sub-step, in tiles.
const MAX_SUBSTEP: f32 = 0.5;

/// How a projectile left the world during an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Impact {
    Wall {
        projectile_id: ProjectileId,
    },
    Entity {
        projectile_id: ProjectileId,
        target_id: EntityId,
    },
}

pub struct ProjectileSystem {
    config: Arc<GameConfig>,
    ids: IdGenerator,
}

impl ProjectileSystem {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self {
            config,
            ids: IdGenerator::new(),
        }
    }

    /// Creates a projectile leaving `from` toward `toward`. Only weapons with
    /// reach beyond melee shoot, and a zero-length aim produces nothing.
    pub fn create_projectile(
        &mut self,
        owner_id: EntityId,
        from: (i32, i32),
        toward: (i32, i32),
        damage: i32,
        range: i32,
    ) -> Option<Projectile> {
        if range <= MELEE_RANGE {
            return None;
        }
        let dx = (toward.0 - from.0) as f32;
        let dy = (toward.1 - from.1) as f32;
        let magnitude = (dx * dx + dy * dy).sqrt();
        if magnitude == 0.0 {
            return None;
        }

        Some(Projectile {
            id: self.ids.next_id(),
            x: from.0 as f32,
            y: from.1 as f32,
            vx: dx / magnitude,
            vy: dy / magnitude,
            speed: self.config.global.projectile_speed,
            owner_id,
            damage,
        })
    }

    /// Advances every projectile by `dt_ms`, in sub-steps no longer than half
    /// a tile. Each sub-step has exactly one outcome: the projectile stops in
    /// a wall, hits a living entity other than its owner, or flies on.
    pub fn update_projectiles(
        &self,
        dt_ms: f64,
        projectiles: &mut Vec<Projectile>,
        grid: &GridSystem,
        combat: &mut CombatSystem,
    ) -> Vec<Impact> {
        let mut impacts = Vec::new();

        projectiles.retain_mut(|p| {
            let travel = p.speed * (dt_ms as f32 / 1000.0);
            if travel <= 0.0 {
                return true;
            }
            let steps = (travel / MAX_SUBSTEP).ceil().max(1.0) as u32;
            let step = travel / steps as f32;
            let (mut px, mut py) = (p.x.round() as i32, p.y.round() as i32);

            for _ in 0..steps {
                p.x += p.vx * step;
                p.y += p.vy * step;
                let cx = p.x.round() as i32;
                let cy = p.y.round() as i32;

                // A diagonal cell change squeezes between corner-touching walls
                // unless one orthogonal neighbour is open, as for movement.
                let (dx, dy) = ((cx - px).signum(), (cy - py).signum());
                let corner_blocked = dx != 0
                    && dy != 0
                    && !grid.is_walkable(px + dx, py)
                    && !grid.is_walkable(px, py + dy);
                if corner_blocked || !grid.is_walkable(cx, cy) {
                    impacts.push(Impact::Wall { projectile_id: p.id });
                    return false;
                }
                px = cx;
                py = cy;
                if let Some(target_id) = grid.entity_at(cx, cy) {
                    if target_id != p.owner_id && combat.is_alive(target_id) {
                        combat.apply_damage(target_id, p.damage, Some(p.owner_id), false);
                        debug!("Projectile {} hit entity {}", p.id, target_id);
                        impacts.push(Impact::Entity {
                            projectile_id: p.id,
                            target_id,
                        });
                        return false;
                    }
                }
            }
            true
        });

        impacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::CombatEvent;
    use crate::dungeon::Dungeon;
    use assert_approx_eq::assert_approx_eq;
    use shared::{PlayerClass, Tile};

    fn setup() -> (ProjectileSystem, GridSystem, CombatSystem) {
        let config = Arc::new(GameConfig::default());
        (
            ProjectileSystem::new(config.clone()),
            GridSystem::new(config.clone(), Dungeon::arena(20, 10)),
            CombatSystem::new(config),
        )
    }

    #[test]
    fn test_melee_range_creates_nothing() {
        let (mut projectiles, _, _) = setup();
        assert!(projectiles.create_projectile(1, (2, 2), (5, 2), 7, 1).is_none());
    }

    #[test]
    fn test_zero_direction_creates_nothing() {
        let (mut projectiles, _, _) = setup();
        assert!(projectiles.create_projectile(1, (2, 2), (2, 2), 7, 6).is_none());
    }

    #[test]
    fn test_velocity_is_normalized() {
        let (mut projectiles, _, _) = setup();
        let p = projectiles.create_projectile(1, (2, 2), (5, 6), 7, 6).unwrap();
        assert_approx_eq!(p.vx, 0.6);
        assert_approx_eq!(p.vy, 0.8);
        assert_approx_eq!(p.speed, 15.0);
        assert_eq!(p.owner_id, 1);
        let q = projectiles.create_projectile(1, (2, 2), (5, 6), 7, 6).unwrap();
        assert_ne!(p.id, q.id);
    }

    #[test]
    fn test_wall_destroys_projectile() {
        let (mut projectiles, mut grid, mut combat) = setup();
        grid.set_tile(6, 2, Tile::Wall);
        let mut list = vec![projectiles.create_projectile(1, (2, 2), (9, 2), 7, 6).unwrap()];

        let impacts = projectiles.update_projectiles(1000.0, &mut list, &grid, &mut combat);
        assert!(list.is_empty());
        assert!(matches!(impacts[0], Impact::Wall { .. }));
    }

    #[test]
    fn test_hit_applies_damage_once() {
        let (mut projectiles, mut grid, mut combat) = setup();
        combat.register_player(1, PlayerClass::Rogue, "Shooter", 0);
        combat.register_monster(2, "orc");
        grid.add_entity(1, 2, 2);
        grid.add_entity(2, 5, 2);
        let mut list = vec![projectiles.create_projectile(1, (2, 2), (5, 2), 7, 6).unwrap()];

        let impacts = projectiles.update_projectiles(1000.0, &mut list, &grid, &mut combat);
        assert!(list.is_empty());
        assert_eq!(
            impacts,
            vec![Impact::Entity {
                projectile_id: 1,
                target_id: 2
            }]
        );
        assert_eq!(combat.stats(2).unwrap().hp, 70 - 7);
        let damage_events = combat
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, CombatEvent::Damage { .. }))
            .count();
        assert_eq!(damage_events, 1);
    }

    #[test]
    fn test_owner_is_never_hit() {
        let (mut projectiles, grid, mut combat) = setup();
        let mut grid = grid;
        combat.register_player(1, PlayerClass::Rogue, "Shooter", 0);
        grid.add_entity(1, 2, 2);
        let mut list = vec![projectiles.create_projectile(1, (2, 2), (3, 2), 7, 6).unwrap()];

        let impacts = projectiles.update_projectiles(50.0, &mut list, &grid, &mut combat);
        assert!(impacts.is_empty());
        assert_eq!(list.len(), 1);
        assert_approx_eq!(list[0].x, 2.75);
        assert!(combat.drain_events().is_empty());
    }

    #[test]
    fn test_fast_projectile_does_not_tunnel() {
        let (mut projectiles, mut grid, mut combat) = setup();
        grid.set_tile(4, 2, Tile::Wall);
        let mut list = vec![projectiles.create_projectile(1, (2, 2), (9, 2), 7, 6).unwrap()];
        list[0].speed = 200.0;

        projectiles.update_projectiles(100.0, &mut list, &grid, &mut combat);
        assert!(list.is_empty());
    }

    #[test]
    fn test_diagonal_shot_stops_at_wall_corner() {
        let (mut projectiles, mut grid, mut combat) = setup();
        combat.register_monster(2, "orc");
        grid.add_entity(2, 3, 3);
        grid.set_tile(3, 2, Tile::Wall);
        grid.set_tile(2, 3, Tile::Wall);
        let mut list = vec![projectiles.create_projectile(1, (2, 2), (5, 5), 7, 6).unwrap()];

        let impacts = projectiles.update_projectiles(1000.0, &mut list, &grid, &mut combat);
        assert!(list.is_empty());
        assert!(matches!(impacts[..], [Impact::Wall { .. }]));
        assert_eq!(combat.stats(2).unwrap().hp, 70);
    }

    #[test]
    fn test_diagonal_shot_passes_half_open_corner() {
        let (mut projectiles, mut grid, mut combat) = setup();
        combat.register_monster(2, "orc");
        grid.add_entity(2, 3, 3);
        grid.set_tile(3, 2, Tile::Wall);
        let mut list = vec![projectiles.create_projectile(1, (2, 2), (5, 5), 7, 6).unwrap()];

        let impacts = projectiles.update_projectiles(1000.0, &mut list, &grid, &mut combat);
        assert!(list.is_empty());
        assert!(matches!(impacts[..], [Impact::Entity { target_id: 2, .. }]));
        assert_eq!(combat.stats(2).unwrap().hp, 70 - 7);
    }
}
