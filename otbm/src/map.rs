//! In-memory map model.

use std::collections::BTreeMap;

use bitflags::bitflags;

/// Absolute map coordinate. The ordering is floor first, then row, then
/// column, so iterating a tile map visits tiles in the order the writer
/// emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: u16,
    pub y: u16,
    pub z: u8,
}

impl Position {
    pub fn new(x: u16, y: u16, z: u8) -> Self {
        Position { x, y, z }
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.z, self.y, self.x).cmp(&(other.z, other.y, other.x))
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

bitflags! {
    /// Persisted tile state. Only the low byte is map state; higher bits are
    /// runtime-only and never written.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TileFlags: u32 {
        const PROTECTION_ZONE = 1 << 0;
        const NO_PVP = 1 << 2;
        const NO_LOGOUT = 1 << 3;
        const PVP_ZONE = 1 << 4;
        const REFRESH = 1 << 5;
    }
}

/// Value of one generic item attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int(i32),
    Float(f32),
    Double(f64),
    Bool(bool),
}

/// One item on a tile or inside a container.
///
/// The item carries only its id; what the id means (stackable, fluid, name)
/// is the catalog's business and looked up where needed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Item {
    pub id: u16,
    /// Stack count or fluid subtype. 1 for anything plain.
    pub count: u8,
    pub action_id: u16,
    pub unique_id: u16,
    pub charges: u16,
    pub depot_id: u16,
    pub door_id: u8,
    pub tier: u8,
    pub text: String,
    pub description: String,
    pub written_by: String,
    pub written_date: u32,
    pub duration: u32,
    pub decaying_state: u32,
    pub sleeper_guid: u32,
    pub sleep_start: u32,
    pub teleport_dest: Option<Position>,
    pub podium_outfit: Option<[u8; 15]>,
    pub attributes: Vec<(String, AttributeValue)>,
    pub contents: Vec<Item>,
}

impl Item {
    pub fn new(id: u16) -> Self {
        Item {
            id,
            count: 1,
            ..Item::default()
        }
    }

    /// True when nothing beyond the id is set. Simple ground items get the
    /// compact inline encoding.
    pub fn is_simple(&self) -> bool {
        self.count <= 1
            && self.action_id == 0
            && self.unique_id == 0
            && self.charges == 0
            && self.depot_id == 0
            && self.door_id == 0
            && self.tier == 0
            && self.text.is_empty()
            && self.description.is_empty()
            && self.written_by.is_empty()
            && self.written_date == 0
            && self.duration == 0
            && self.decaying_state == 0
            && self.sleeper_guid == 0
            && self.sleep_start == 0
            && self.teleport_dest.is_none()
            && self.podium_outfit.is_none()
            && self.attributes.is_empty()
            && self.contents.is_empty()
    }
}

/// One map square: an optional ground item plus everything stacked on it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tile {
    /// 0 when the tile belongs to no house.
    pub house_id: u32,
    pub flags: TileFlags,
    pub ground: Option<Item>,
    pub items: Vec<Item>,
}

impl Tile {
    pub fn is_empty(&self) -> bool {
        self.house_id == 0 && self.flags.is_empty() && self.ground.is_none() && self.items.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Town {
    pub id: u32,
    pub name: String,
    pub temple: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    pub name: String,
    pub position: Position,
}

/// Creature entry inside a legacy embedded spawn area, positioned relative
/// to the spawn center.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnCreature {
    pub name: String,
    pub offset_x: u16,
    pub offset_y: u16,
    pub interval: u16,
}

/// Legacy spawn area embedded in the map file itself. Current files keep
/// spawns in an external side file and only reference it by name, so these
/// are read but never written back.
#[derive(Debug, Clone, PartialEq)]
pub struct Spawn {
    pub center: Position,
    pub radius: u16,
    pub creatures: Vec<SpawnCreature>,
}

/// A fully loaded map.
#[derive(Debug, Default)]
pub struct Map {
    pub otbm_version: u32,
    pub width: u16,
    pub height: u16,
    /// Catalog version the map was built against, echoed back on save.
    pub otb_major: u32,
    pub otb_minor: u32,
    pub description: String,
    pub spawn_file: String,
    pub house_file: String,
    pub tiles: BTreeMap<Position, Tile>,
    pub towns: Vec<Town>,
    pub waypoints: Vec<Waypoint>,
    pub spawns: Vec<Spawn>,
}

impl Map {
    pub fn tile(&self, pos: Position) -> Option<&Tile> {
        self.tiles.get(&pos)
    }

    pub fn set_tile(&mut self, pos: Position, tile: Tile) {
        self.tiles.insert(pos, tile);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_ordering_is_floor_row_column() {
        let mut positions = vec![
            Position::new(5, 5, 7),
            Position::new(4, 5, 7),
            Position::new(9, 1, 7),
            Position::new(0, 0, 8),
        ];
        positions.sort();
        assert_eq!(
            positions,
            vec![
                Position::new(9, 1, 7),
                Position::new(4, 5, 7),
                Position::new(5, 5, 7),
                Position::new(0, 0, 8),
            ]
        );
    }

    #[test]
    fn simple_item_detection() {
        let mut item = Item::new(100);
        assert!(item.is_simple());
        item.action_id = 1000;
        assert!(!item.is_simple());

        let mut nested = Item::new(1987);
        nested.contents.push(Item::new(100));
        assert!(!nested.is_simple());
    }
}
