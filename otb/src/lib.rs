//! The OTB item catalog: a flat node file describing every item type a map
//! may reference, keyed by server id with a parallel client id used on the
//! wire. Maps store one of the two id spaces; the catalog is what lets tools
//! translate between them.

use std::collections::HashMap;

use bitflags::bitflags;
use node_file::{BinaryNode, FileIdentifier, NodeError};
use thiserror::Error;

mod read;

pub use read::{read_catalog, read_catalog_from_slice, read_catalog_version};

/// Catalog file identifier. Older files carry the all-zero wildcard instead.
pub const OTB_IDENTIFIER: FileIdentifier = FileIdentifier(*b"OTBI");

#[derive(Debug, Error)]
pub enum OtbError {
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error("catalog root is malformed: {0}")]
    MalformedRoot(&'static str),
}

/// Broad item category, stored as the type byte of each item node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemGroup {
    #[default]
    None,
    Ground,
    Container,
    Weapon,
    Ammunition,
    Armor,
    Changes,
    Teleport,
    MagicField,
    Writeable,
    Key,
    Splash,
    Fluid,
    Door,
    Deprecated,
    Podium,
}

impl ItemGroup {
    pub fn from_byte(byte: u8) -> Option<ItemGroup> {
        Some(match byte {
            0 => ItemGroup::None,
            1 => ItemGroup::Ground,
            2 => ItemGroup::Container,
            3 => ItemGroup::Weapon,
            4 => ItemGroup::Ammunition,
            5 => ItemGroup::Armor,
            6 => ItemGroup::Changes,
            7 => ItemGroup::Teleport,
            8 => ItemGroup::MagicField,
            9 => ItemGroup::Writeable,
            10 => ItemGroup::Key,
            11 => ItemGroup::Splash,
            12 => ItemGroup::Fluid,
            13 => ItemGroup::Door,
            14 => ItemGroup::Deprecated,
            15 => ItemGroup::Podium,
            _ => return None,
        })
    }
}

bitflags! {
    /// Per-item flag word from the catalog.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ItemTypeFlags: u32 {
        const UNPASSABLE = 1 << 0;
        const BLOCK_MISSILES = 1 << 1;
        const BLOCK_PATHFINDER = 1 << 2;
        const HAS_ELEVATION = 1 << 3;
        const USABLE = 1 << 4;
        const PICKUPABLE = 1 << 5;
        const MOVABLE = 1 << 6;
        const STACKABLE = 1 << 7;
        const FLOOR_CHANGE_DOWN = 1 << 8;
        const FLOOR_CHANGE_NORTH = 1 << 9;
        const FLOOR_CHANGE_EAST = 1 << 10;
        const FLOOR_CHANGE_SOUTH = 1 << 11;
        const FLOOR_CHANGE_WEST = 1 << 12;
        const ALWAYS_ON_TOP = 1 << 13;
        const READABLE = 1 << 14;
        const ROTATABLE = 1 << 15;
        const HANGABLE = 1 << 16;
        const HOOK_EAST = 1 << 17;
        const HOOK_SOUTH = 1 << 18;
        const CANNOT_DECAY = 1 << 19;
        const ALLOW_DISTANCE_READ = 1 << 20;
        const CLIENT_CHARGES = 1 << 22;
        const IGNORE_LOOK = 1 << 23;
        const IS_ANIMATION = 1 << 24;
        const FULL_GROUND = 1 << 25;
        const FORCE_USE = 1 << 26;
    }
}

/// One catalog entry.
#[derive(Debug, Clone, Default)]
pub struct ItemType {
    pub server_id: u16,
    pub client_id: u16,
    pub name: String,
    pub description: String,
    pub group: ItemGroup,
    pub flags: ItemTypeFlags,
    pub speed: u16,
    pub light_level: u16,
    pub light_color: u16,
    pub minimap_color: u16,
    pub stack_order: u8,
    pub ware_id: u16,
    pub max_text_length: u16,
    pub max_text_length_once: u16,
}

impl ItemType {
    pub fn is_stackable(&self) -> bool {
        self.flags.contains(ItemTypeFlags::STACKABLE)
    }

    pub fn is_fluid_container(&self) -> bool {
        self.group == ItemGroup::Fluid
    }

    pub fn is_splash(&self) -> bool {
        self.group == ItemGroup::Splash
    }
}

/// Catalog version triple from the root node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatalogVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

/// All item types from one catalog file, indexed both ways.
///
/// Id 0 is the "no item" sentinel in both id spaces and never resolves.
#[derive(Debug, Default)]
pub struct ItemCatalog {
    pub version: CatalogVersion,
    items: Vec<ItemType>,
    by_server_id: HashMap<u16, usize>,
    by_client_id: HashMap<u16, usize>,
}

impl ItemCatalog {
    pub fn new(version: CatalogVersion) -> Self {
        ItemCatalog {
            version,
            ..ItemCatalog::default()
        }
    }

    /// Adds an entry. When several entries share a client id (reused client
    /// sprites), the first registration wins for client-side lookup.
    pub fn insert(&mut self, item: ItemType) {
        let index = self.items.len();
        if item.server_id != 0 {
            self.by_server_id.insert(item.server_id, index);
        }
        if item.client_id != 0 {
            self.by_client_id.entry(item.client_id).or_insert(index);
        }
        self.items.push(item);
    }

    pub fn lookup_by_server_id(&self, id: u16) -> Option<&ItemType> {
        self.by_server_id.get(&id).map(|&i| &self.items[i])
    }

    pub fn lookup_by_client_id(&self, id: u16) -> Option<&ItemType> {
        self.by_client_id.get(&id).map(|&i| &self.items[i])
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemType> {
        self.items.iter()
    }
}

/// OTB attribute bytes used inside item nodes.
pub mod attribute {
    pub const SERVER_ID: u8 = 0x10;
    pub const CLIENT_ID: u8 = 0x11;
    pub const NAME: u8 = 0x12;
    pub const DESCRIPTION: u8 = 0x13;
    pub const SPEED: u8 = 0x14;
    pub const SPRITE_HASH: u8 = 0x20;
    pub const MINIMAP_COLOR: u8 = 0x21;
    pub const MAX_READ_WRITE_CHARS: u8 = 0x22;
    pub const MAX_READ_CHARS: u8 = 0x23;
    pub const LIGHT: u8 = 0x2A;
    pub const STACK_ORDER: u8 = 0x2B;
    pub const TRADE_AS: u8 = 0x2D;

    /// Root node attribute carrying the version triple.
    pub const ROOT_VERSION: u8 = 0x01;
}

pub(crate) fn read_string(node: &mut BinaryNode, len: usize) -> Result<String, NodeError> {
    Ok(String::from_utf8_lossy(node.get_raw(len)?).into_owned())
}
