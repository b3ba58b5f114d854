//! Wire-level constants for the map format: node kinds, attribute tags and
//! the width of every attribute's payload. Both the reader and the streaming
//! id converter consult the same table so the two can never disagree about
//! how to step over an attribute.

/// Node type bytes.
pub mod node {
    pub const ROOT: u8 = 0;
    pub const MAP_DATA: u8 = 2;
    pub const TILE_AREA: u8 = 4;
    pub const TILE: u8 = 5;
    pub const ITEM: u8 = 6;
    /// Legacy container for spawn areas embedded in the map file.
    pub const SPAWNS: u8 = 9;
    pub const SPAWN_AREA: u8 = 10;
    pub const MONSTER: u8 = 11;
    pub const TOWNS: u8 = 12;
    pub const TOWN: u8 = 13;
    pub const HOUSE_TILE: u8 = 14;
    pub const WAYPOINTS: u8 = 15;
    pub const WAYPOINT: u8 = 16;
}

/// Attribute tag bytes, shared between map data, tiles and items.
pub mod attr {
    pub const DESCRIPTION: u8 = 1;
    pub const EXT_FILE: u8 = 2;
    pub const TILE_FLAGS: u8 = 3;
    pub const ACTION_ID: u8 = 4;
    pub const UNIQUE_ID: u8 = 5;
    pub const TEXT: u8 = 6;
    pub const DESC: u8 = 7;
    pub const TELEPORT_DEST: u8 = 8;
    /// Compact inline item: just a u16 id, used for simple ground items.
    pub const ITEM: u8 = 9;
    pub const DEPOT_ID: u8 = 10;
    pub const EXT_SPAWN_FILE: u8 = 11;
    pub const RUNE_CHARGES: u8 = 12;
    pub const EXT_HOUSE_FILE: u8 = 13;
    pub const HOUSE_DOOR_ID: u8 = 14;
    pub const COUNT: u8 = 15;
    pub const DURATION: u8 = 16;
    pub const DECAYING_STATE: u8 = 17;
    pub const WRITTEN_DATE: u8 = 18;
    pub const WRITTEN_BY: u8 = 19;
    pub const SLEEPER_GUID: u8 = 20;
    pub const SLEEP_START: u8 = 21;
    pub const CHARGES: u8 = 22;
    pub const TIER: u8 = 27;
    pub const PODIUM_OUTFIT: u8 = 28;
    /// Generic key/value attribute map. Always the last attribute of its
    /// node; everything after it belongs to the map structure itself.
    pub const ATTRIBUTE_MAP: u8 = 128;
}

/// Payload shape of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrWidth {
    U8,
    U16,
    U32,
    /// Fixed number of raw bytes.
    Fixed(usize),
    /// u16 length prefix plus that many bytes.
    Str,
    /// Self-describing key/value map; consumes the rest of the payload.
    TerminalMap,
}

/// Payload width for `tag`, or `None` for tags this schema does not know.
pub fn width(tag: u8) -> Option<AttrWidth> {
    Some(match tag {
        attr::RUNE_CHARGES | attr::HOUSE_DOOR_ID | attr::COUNT | attr::TIER => AttrWidth::U8,
        attr::ACTION_ID | attr::UNIQUE_ID | attr::ITEM | attr::DEPOT_ID | attr::CHARGES => {
            AttrWidth::U16
        }
        attr::TILE_FLAGS
        | attr::DURATION
        | attr::DECAYING_STATE
        | attr::WRITTEN_DATE
        | attr::SLEEPER_GUID
        | attr::SLEEP_START => AttrWidth::U32,
        attr::DESCRIPTION
        | attr::EXT_FILE
        | attr::TEXT
        | attr::DESC
        | attr::EXT_SPAWN_FILE
        | attr::EXT_HOUSE_FILE
        | attr::WRITTEN_BY => AttrWidth::Str,
        attr::TELEPORT_DEST => AttrWidth::Fixed(5),
        attr::PODIUM_OUTFIT => AttrWidth::Fixed(15),
        attr::ATTRIBUTE_MAP => AttrWidth::TerminalMap,
        _ => return None,
    })
}

/// True for tags that belong to an item rather than its enclosing tile.
/// The item attribute walk must stop at anything else so the byte stays in
/// the stream for the tile parser.
pub fn is_item_attribute(tag: u8) -> bool {
    matches!(
        tag,
        attr::COUNT
            | attr::RUNE_CHARGES
            | attr::CHARGES
            | attr::ACTION_ID
            | attr::UNIQUE_ID
            | attr::TEXT
            | attr::DESC
            | attr::TELEPORT_DEST
            | attr::DEPOT_ID
            | attr::HOUSE_DOOR_ID
            | attr::TIER
            | attr::DURATION
            | attr::DECAYING_STATE
            | attr::WRITTEN_DATE
            | attr::WRITTEN_BY
            | attr::SLEEPER_GUID
            | attr::SLEEP_START
            | attr::PODIUM_OUTFIT
            | attr::ATTRIBUTE_MAP
    )
}

/// Value type bytes inside an attribute map entry.
pub mod attr_map_type {
    pub const STRING: u8 = 1;
    pub const INT: u8 = 2;
    pub const FLOAT: u8 = 3;
    pub const DOUBLE: u8 = 4;
    pub const BOOL: u8 = 5;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_item_attribute_has_a_width() {
        for tag in 0..=u8::MAX {
            if is_item_attribute(tag) {
                assert!(width(tag).is_some(), "tag {tag} missing from width table");
            }
        }
    }
}
