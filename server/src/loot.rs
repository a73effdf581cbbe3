//! World loot, inventories and equipment.
//!
//! Every item stack lives in exactly one place: a world loot record, an
//! inventory slot, or an equipment slot. All operations here move stacks
//! between those places and never copy them.

use crate::config::{GameConfig, ItemDef, ItemEffect, ItemKind};
use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{
    Direction, DropSource, EntityId, EquipSlot, Equipment, IdGenerator, ItemStack, LootId,
    LootKind, WorldLoot,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// What a consumed quick-slot item does, handed back to the caller to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumableEffect {
    pub item_id: String,
    pub name: String,
    pub effect: ItemEffect,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickupTarget {
    Chest(LootId),
    Bags(Vec<LootId>),
}

/// Result of opening a chest or emptying a bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    pub loot_id: LootId,
    pub received: Vec<ItemStack>,
    /// Stacks that did not fit and stayed on the floor.
    pub overflow: Vec<ItemStack>,
    pub overflow_bag: Option<LootId>,
    pub gold: u32,
    pub removed: bool,
}

pub struct LootSystem {
    config: Arc<GameConfig>,
    world: BTreeMap<LootId, WorldLoot>,
    inventories: HashMap<EntityId, Vec<ItemStack>>,
    equipment: HashMap<EntityId, Equipment>,
    ids: IdGenerator,
}

impl LootSystem {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self {
            config,
            world: BTreeMap::new(),
            inventories: HashMap::new(),
            equipment: HashMap::new(),
            ids: IdGenerator::new(),
        }
    }

    pub fn clear(&mut self) {
        self.world.clear();
        self.inventories.clear();
        self.equipment.clear();
    }

    pub fn world_loot(&self) -> impl Iterator<Item = &WorldLoot> {
        self.world.values()
    }

    pub fn get(&self, loot_id: LootId) -> Option<&WorldLoot> {
        self.world.get(&loot_id)
    }

    /// Loot as `(id, record)` pairs, ordered by id.
    pub fn entries(&self) -> Vec<(LootId, WorldLoot)> {
        self.world
            .iter()
            .map(|(id, loot)| (*id, loot.clone()))
            .collect()
    }

    /// Tier 1 near the dungeon center, up to tier 3 at the edges.
    pub fn get_loot_tier(&self, x: i32, y: i32, width: i32, height: i32) -> u8 {
        let cx = width as f64 / 2.0;
        let cy = height as f64 / 2.0;
        let max = (cx * cx + cy * cy).sqrt().max(1.0);
        let distance = ((x as f64 - cx).powi(2) + (y as f64 - cy).powi(2)).sqrt() / max;
        if distance < 0.35 {
            1
        } else if distance < 0.7 {
            2
        } else {
            3
        }
    }

    fn roll_items<R: Rng>(&self, tier: u8, rng: &mut R) -> Vec<ItemStack> {
        let pool: Vec<(&String, &ItemDef)> = self
            .config
            .items
            .iter()
            .filter(|(_, def)| def.tier <= tier)
            .collect();
        let count = rng.gen_range(1..=3);
        let mut items = Vec::new();
        for _ in 0..count {
            let pick = pool.choose_weighted(rng, |(_, def)| if def.tier == tier { 3 } else { 1 });
            if let Ok((item_id, def)) = pick {
                let amount = if def.kind == ItemKind::Consumable {
                    rng.gen_range(1..=2)
                } else {
                    1
                };
                items.push(ItemStack::new(item_id.as_str(), amount));
            }
        }
        items
    }

    /// Places a closed chest whose contents are rolled now and fixed until
    /// it is opened.
    pub fn spawn_random_loot<R: Rng>(&mut self, x: i32, y: i32, tier: u8, rng: &mut R) -> LootId {
        let items = self.roll_items(tier, rng);
        let gold = rng.gen_range(5..=15) * tier as u32;
        let id = self.ids.next_id();
        self.world.insert(
            id,
            WorldLoot {
                id,
                x,
                y,
                kind: LootKind::Chest,
                items,
                gold,
                opened: false,
            },
        );
        id
    }

    /// Drops a bag. Nothing is created for an empty drop.
    pub fn create_loot_bag(&mut self, x: i32, y: i32, items: Vec<ItemStack>, gold: u32) -> Option<LootId> {
        if items.is_empty() && gold == 0 {
            return None;
        }
        let id = self.ids.next_id();
        self.world.insert(
            id,
            WorldLoot {
                id,
                x,
                y,
                kind: LootKind::Bag,
                items,
                gold,
                opened: false,
            },
        );
        Some(id)
    }

    pub fn loot_at(&self, x: i32, y: i32) -> Vec<&WorldLoot> {
        self.world
            .values()
            .filter(|l| l.x == x && l.y == y && !l.opened)
            .collect()
    }

    pub fn closed_chest_at(&self, x: i32, y: i32) -> Option<LootId> {
        self.world
            .values()
            .find(|l| l.x == x && l.y == y && l.kind == LootKind::Chest && !l.opened)
            .map(|l| l.id)
    }

    /// Closed chests are solid; bags and opened chests are not.
    pub fn is_collidable(&self, x: i32, y: i32) -> bool {
        self.closed_chest_at(x, y).is_some()
    }

    pub fn inventory(&self, id: EntityId) -> &[ItemStack] {
        self.inventories.get(&id).map_or(&[], Vec::as_slice)
    }

    pub fn equipment(&self, id: EntityId) -> Equipment {
        self.equipment.get(&id).cloned().unwrap_or_default()
    }

    pub fn equipped_def(&self, id: EntityId, slot: EquipSlot) -> Option<&ItemDef> {
        let stack = self.equipment.get(&id)?.get(slot)?;
        self.config.item(&stack.item_id)
    }

    fn stacks(&self, item_id: &str) -> bool {
        self.config
            .item(item_id)
            .map_or(false, |def| def.kind == ItemKind::Consumable)
    }

    /// Adds a stack to the inventory, merging consumables. Returns the stack
    /// back when there is no room.
    fn store(&mut self, id: EntityId, stack: ItemStack) -> Result<(), ItemStack> {
        let capacity = self.config.global.inventory_slots;
        let merge = self.stacks(&stack.item_id);
        let inventory = self.inventories.entry(id).or_default();
        if merge {
            if let Some(existing) = inventory.iter_mut().find(|s| s.item_id == stack.item_id) {
                existing.count += stack.count;
                return Ok(());
            }
        }
        if inventory.len() >= capacity {
            return Err(stack);
        }
        inventory.push(stack);
        Ok(())
    }

    /// Grants a known item. Fails for unknown ids or a full inventory.
    pub fn add_item(&mut self, id: EntityId, item_id: &str, count: u32) -> bool {
        if count == 0 || self.config.item(item_id).is_none() {
            return false;
        }
        self.store(id, ItemStack::new(item_id, count)).is_ok()
    }

    fn fits(kind: ItemKind, slot: EquipSlot) -> bool {
        match kind {
            ItemKind::Weapon => slot == EquipSlot::Weapon,
            ItemKind::Armor => slot == EquipSlot::Armor,
            ItemKind::Consumable => slot.is_quick(),
        }
    }

    /// Moves a stack from the inventory into a compatible slot. Whatever was
    /// in the slot takes the stack's old inventory position.
    pub fn equip_item(&mut self, id: EntityId, item_id: &str, slot: EquipSlot) -> bool {
        let Some(def) = self.config.item(item_id) else {
            return false;
        };
        if !Self::fits(def.kind, slot) {
            debug!("Entity {} cannot equip {} in {:?}", id, item_id, slot);
            return false;
        }
        let Some(inventory) = self.inventories.get_mut(&id) else {
            return false;
        };
        let Some(index) = inventory.iter().position(|s| s.item_id == item_id) else {
            return false;
        };

        let stack = inventory.remove(index);
        let previous = self.equipment.entry(id).or_default().put(slot, stack);
        if let Some(previous) = previous {
            inventory.insert(index, previous);
        }
        true
    }

    /// Moves an equipped stack back to the inventory if there is room.
    pub fn unequip_item(&mut self, id: EntityId, slot: EquipSlot) -> bool {
        let Some(stack) = self.equipment.get_mut(&id).and_then(|e| e.take(slot)) else {
            return false;
        };
        match self.store(id, stack) {
            Ok(()) => true,
            Err(stack) => {
                self.equipment.entry(id).or_default().put(slot, stack);
                false
            }
        }
    }

    /// Uses one unit from a quick slot and returns its effect.
    pub fn consume_item(&mut self, id: EntityId, slot: EquipSlot) -> Option<ConsumableEffect> {
        if !slot.is_quick() {
            return None;
        }
        let item_id = self.equipment.get(&id)?.get(slot)?.item_id.clone();
        let def = self.config.item(&item_id)?;
        let effect = ConsumableEffect {
            item_id,
            name: def.name.clone(),
            effect: def.effect?,
            value: def.value,
        };

        let slot_ref = self.equipment.get_mut(&id)?.slot_mut(slot);
        let emptied = match slot_ref.as_mut() {
            Some(stack) => {
                stack.count = stack.count.saturating_sub(1);
                stack.count == 0
            }
            None => false,
        };
        if emptied {
            *slot_ref = None;
        }
        Some(effect)
    }

    /// Opens a chest or empties a bag into the entity's inventory. Opened
    /// chests and unknown ids are no-ops returning `None`.
    pub fn resolve_interaction(&mut self, entity_id: EntityId, loot_id: LootId) -> Option<Interaction> {
        let loot = self.world.get_mut(&loot_id)?;
        if loot.opened {
            return None;
        }
        let kind = loot.kind;
        let (x, y) = (loot.x, loot.y);
        if kind == LootKind::Chest {
            loot.opened = true;
        }
        let items = std::mem::take(&mut loot.items);
        let gold = std::mem::take(&mut loot.gold);

        let mut received = Vec::new();
        let mut overflow = Vec::new();
        for stack in items {
            let copy = stack.clone();
            match self.store(entity_id, stack) {
                Ok(()) => received.push(copy),
                Err(stack) => overflow.push(stack),
            }
        }

        let mut overflow_bag = None;
        let mut removed = false;
        match kind {
            LootKind::Chest => {
                overflow_bag = self.create_loot_bag(x, y, overflow.clone(), 0);
            }
            LootKind::Bag => {
                if overflow.is_empty() {
                    self.world.remove(&loot_id);
                    removed = true;
                } else if let Some(bag) = self.world.get_mut(&loot_id) {
                    bag.items = overflow.clone();
                }
            }
        }

        debug!(
            "Entity {} took {} stacks and {} gold from loot {}",
            entity_id,
            received.len(),
            gold,
            loot_id
        );
        Some(Interaction {
            loot_id,
            received,
            overflow,
            overflow_bag,
            gold,
            removed,
        })
    }

    /// Removes a stack from the inventory or an equipment slot and drops it
    /// in a bag at `(x, y)`.
    pub fn perform_drop(
        &mut self,
        id: EntityId,
        item_id: &str,
        source: DropSource,
        x: i32,
        y: i32,
    ) -> Option<LootId> {
        let stack = match source {
            DropSource::Inventory => {
                let inventory = self.inventories.get_mut(&id)?;
                let index = inventory.iter().position(|s| s.item_id == item_id)?;
                inventory.remove(index)
            }
            DropSource::Equipment(slot) => {
                let equipment = self.equipment.get_mut(&id)?;
                if equipment.get(slot)?.item_id != item_id {
                    return None;
                }
                equipment.take(slot)?
            }
        };
        self.create_loot_bag(x, y, vec![stack], 0)
    }

    /// Unopened loot under the entity or in front of it. A chest wins over
    /// bags.
    pub fn get_pickup_target(&self, x: i32, y: i32, facing: Direction) -> Option<PickupTarget> {
        let mut cells = vec![(x, y)];
        if !facing.is_zero() {
            cells.push((x + facing.x, y + facing.y));
        }
        let found: Vec<&WorldLoot> = cells
            .iter()
            .flat_map(|(cx, cy)| self.loot_at(*cx, *cy))
            .collect();

        if let Some(chest) = found.iter().find(|l| l.kind == LootKind::Chest) {
            return Some(PickupTarget::Chest(chest.id));
        }
        if found.is_empty() {
            None
        } else {
            Some(PickupTarget::Bags(found.iter().map(|l| l.id).collect()))
        }
    }

    /// Strips everything an entity carries, e.g. for a death drop.
    pub fn take_all(&mut self, id: EntityId) -> Vec<ItemStack> {
        let mut items = self.inventories.remove(&id).unwrap_or_default();
        if let Some(mut equipment) = self.equipment.remove(&id) {
            items.extend(equipment.drain());
        }
        items
    }

    pub fn remove_entity(&mut self, id: EntityId) {
        self.inventories.remove(&id);
        self.equipment.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn loot() -> LootSystem {
        LootSystem::new(Arc::new(GameConfig::default()))
    }

    fn total_items(loot: &LootSystem, id: EntityId) -> u32 {
        let carried: u32 = loot.inventory(id).iter().map(|s| s.count).sum();
        let equipped = loot.equipment(id);
        carried
            + EquipSlot::ALL
                .iter()
                .filter_map(|slot| equipped.get(*slot))
                .map(|s| s.count)
                .sum::<u32>()
    }

    #[test]
    fn test_loot_tier_grows_with_distance() {
        let loot = loot();
        assert_eq!(loot.get_loot_tier(25, 25, 50, 50), 1);
        assert_eq!(loot.get_loot_tier(40, 25, 50, 50), 2);
        assert_eq!(loot.get_loot_tier(1, 1, 50, 50), 3);
    }

    #[test]
    fn test_chest_contents_fixed_at_spawn() {
        let mut loot = loot();
        let mut rng = StdRng::seed_from_u64(8);
        let id = loot.spawn_random_loot(4, 4, 3, &mut rng);
        let chest = loot.get(id).unwrap();
        assert_eq!(chest.kind, LootKind::Chest);
        assert!(!chest.opened);
        assert!(!chest.items.is_empty() && chest.items.len() <= 3);
        assert!(chest.gold >= 15);
        assert!(loot.is_collidable(4, 4));
    }

    #[test]
    fn test_second_chest_open_is_noop() {
        let mut loot = loot();
        let mut rng = StdRng::seed_from_u64(8);
        let id = loot.spawn_random_loot(4, 4, 1, &mut rng);
        let expected = loot.get(id).unwrap().items.clone();

        let first = loot.resolve_interaction(1, id).unwrap();
        assert_eq!(first.received, expected);
        assert!(loot.get(id).unwrap().opened);
        assert!(!loot.is_collidable(4, 4));

        assert!(loot.resolve_interaction(1, id).is_none());
        assert!(loot.resolve_interaction(2, id).is_none());
    }

    #[test]
    fn test_full_inventory_overflow_drops_bag() {
        let mut loot = loot();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..15 {
            loot.store(1, ItemStack::new("sword_basic", 1)).unwrap();
        }
        let chest = loot.spawn_random_loot(2, 2, 2, &mut rng);
        let contents = loot.get(chest).unwrap().items.clone();

        let result = loot.resolve_interaction(1, chest).unwrap();
        assert!(result.received.is_empty());
        assert_eq!(result.overflow, contents);
        let bag = loot.get(result.overflow_bag.unwrap()).unwrap();
        assert_eq!(bag.kind, LootKind::Bag);
        assert_eq!((bag.x, bag.y), (2, 2));
        assert_eq!(bag.items, contents);
    }

    #[test]
    fn test_bag_removed_once_empty() {
        let mut loot = loot();
        let bag = loot
            .create_loot_bag(3, 3, vec![ItemStack::new("potion_small", 2)], 4)
            .unwrap();
        let result = loot.resolve_interaction(7, bag).unwrap();
        assert!(result.removed);
        assert_eq!(result.gold, 4);
        assert!(loot.get(bag).is_none());
        assert_eq!(loot.inventory(7), &[ItemStack::new("potion_small", 2)]);
        assert!(loot.create_loot_bag(3, 3, vec![], 0).is_none());
    }

    #[test]
    fn test_equip_validates_slot_kind() {
        let mut loot = loot();
        loot.add_item(1, "sword_basic", 1);
        loot.add_item(1, "potion_small", 2);
        assert!(!loot.equip_item(1, "sword_basic", EquipSlot::Armor));
        assert!(!loot.equip_item(1, "potion_small", EquipSlot::Weapon));
        assert!(!loot.equip_item(1, "armor_plate", EquipSlot::Armor));

        assert!(loot.equip_item(1, "sword_basic", EquipSlot::Weapon));
        assert!(loot.equip_item(1, "potion_small", EquipSlot::Quick2));
        assert!(loot.inventory(1).is_empty());
        assert_eq!(loot.equipped_def(1, EquipSlot::Weapon).unwrap().kind, ItemKind::Weapon);
    }

    #[test]
    fn test_equip_swaps_previous_item() {
        let mut loot = loot();
        loot.add_item(1, "sword_basic", 1);
        loot.add_item(1, "axe_battle", 1);
        loot.equip_item(1, "sword_basic", EquipSlot::Weapon);
        loot.equip_item(1, "axe_battle", EquipSlot::Weapon);
        assert_eq!(loot.inventory(1), &[ItemStack::new("sword_basic", 1)]);
        assert_eq!(
            loot.equipment(1).weapon,
            Some(ItemStack::new("axe_battle", 1))
        );
        assert_eq!(total_items(&loot, 1), 2);
    }

    #[test]
    fn test_unequip_needs_room() {
        let mut loot = loot();
        loot.add_item(1, "armor_leather", 1);
        loot.equip_item(1, "armor_leather", EquipSlot::Armor);
        for _ in 0..15 {
            loot.store(1, ItemStack::new("dagger_iron", 1)).unwrap();
        }
        assert!(!loot.unequip_item(1, EquipSlot::Armor));
        assert!(loot.equipment(1).armor.is_some());

        loot.perform_drop(1, "dagger_iron", DropSource::Inventory, 0, 0).unwrap();
        assert!(loot.unequip_item(1, EquipSlot::Armor));
        assert!(loot.equipment(1).armor.is_none());
        assert!(!loot.unequip_item(1, EquipSlot::Armor));
    }

    #[test]
    fn test_consume_decrements_then_clears() {
        let mut loot = loot();
        loot.add_item(1, "potion_small", 2);
        loot.equip_item(1, "potion_small", EquipSlot::Quick1);

        let effect = loot.consume_item(1, EquipSlot::Quick1).unwrap();
        assert_eq!(effect.effect, ItemEffect::Heal);
        assert_eq!(effect.value, 30);
        assert_eq!(loot.equipment(1).quick1.unwrap().count, 1);

        assert!(loot.consume_item(1, EquipSlot::Quick1).is_some());
        assert!(loot.equipment(1).quick1.is_none());
        assert!(loot.consume_item(1, EquipSlot::Quick1).is_none());
        assert!(loot.consume_item(1, EquipSlot::Weapon).is_none());
    }

    #[test]
    fn test_drop_from_equipment_creates_bag() {
        let mut loot = loot();
        loot.add_item(1, "sword_basic", 1);
        loot.equip_item(1, "sword_basic", EquipSlot::Weapon);
        assert!(loot
            .perform_drop(1, "axe_battle", DropSource::Equipment(EquipSlot::Weapon), 2, 2)
            .is_none());

        let bag = loot
            .perform_drop(1, "sword_basic", DropSource::Equipment(EquipSlot::Weapon), 2, 2)
            .unwrap();
        assert_eq!(loot.get(bag).unwrap().items, vec![ItemStack::new("sword_basic", 1)]);
        assert_eq!(total_items(&loot, 1), 0);
    }

    #[test]
    fn test_pickup_target_prefers_chest() {
        let mut loot = loot();
        let mut rng = StdRng::seed_from_u64(1);
        let bag = loot
            .create_loot_bag(2, 2, vec![ItemStack::new("potion_small", 1)], 0)
            .unwrap();
        assert_eq!(
            loot.get_pickup_target(2, 2, Direction::RIGHT),
            Some(PickupTarget::Bags(vec![bag]))
        );

        let chest = loot.spawn_random_loot(3, 2, 1, &mut rng);
        assert_eq!(
            loot.get_pickup_target(2, 2, Direction::RIGHT),
            Some(PickupTarget::Chest(chest))
        );
        assert_eq!(loot.get_pickup_target(5, 5, Direction::UP), None);
    }

    #[test]
    fn test_take_all_strips_everything() {
        let mut loot = loot();
        loot.add_item(1, "sword_basic", 1);
        loot.add_item(1, "armor_leather", 1);
        loot.add_item(1, "potion_small", 3);
        loot.equip_item(1, "armor_leather", EquipSlot::Armor);
        let items = loot.take_all(1);
        assert_eq!(items.len(), 3);
        assert_eq!(total_items(&loot, 1), 0);
    }
}
