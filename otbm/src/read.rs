//! Map file loading.

use std::io::Read;
use std::path::Path;

use node_file::{BinaryNode, NodeReader};
use otb::ItemCatalog;

use crate::map::{
    AttributeValue, Item, Map, Position, Spawn, SpawnCreature, Tile, TileFlags, Town, Waypoint,
};
use crate::schema::{self, attr, attr_map_type, node};
use crate::{report, OtbmError, ProgressFn, ACCEPTED, LATEST_OTBM_VERSION};

/// Everything the fixed-size part of the file says about a map, available
/// without touching any tile data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapHeader {
    pub otbm_version: u32,
    pub width: u16,
    pub height: u16,
    pub otb_major: u32,
    pub otb_minor: u32,
    pub description: String,
    pub spawn_file: String,
    pub house_file: String,
}

/// Tally of what a full load encountered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadCounts {
    pub tiles: usize,
    pub items: usize,
    pub towns: usize,
    pub waypoints: usize,
    pub spawns: usize,
}

#[derive(Debug)]
pub struct MapLoad {
    pub map: Map,
    pub counts: ReadCounts,
}

/// Loads a whole map from disk.
///
/// A catalog, when given, is only consulted to flag item ids the catalog does
/// not know; tiles with malformed payloads are logged and skipped rather than
/// failing the load. Header problems are fatal.
pub fn read(
    path: &Path,
    catalog: Option<&ItemCatalog>,
    mut progress: Option<ProgressFn<'_>>,
) -> Result<MapLoad, OtbmError> {
    report(&mut progress, 0, "Opening map file");
    let mut reader = NodeReader::open(path, ACCEPTED)?;
    parse_map(&mut reader, catalog, progress)
}

/// Loads a whole map from a byte slice.
pub fn read_from_slice(
    data: &[u8],
    catalog: Option<&ItemCatalog>,
    progress: Option<ProgressFn<'_>>,
) -> Result<MapLoad, OtbmError> {
    let mut reader = NodeReader::from_slice(data, ACCEPTED)?;
    parse_map(&mut reader, catalog, progress)
}

/// Reads only the header, skipping all tile data.
pub fn read_header(path: &Path) -> Result<MapHeader, OtbmError> {
    let mut reader = NodeReader::open(path, ACCEPTED)?;
    parse_header(&mut reader)
}

/// Reads only the header from a byte slice.
pub fn read_header_from_slice(data: &[u8]) -> Result<MapHeader, OtbmError> {
    let mut reader = NodeReader::from_slice(data, ACCEPTED)?;
    parse_header(&mut reader)
}

fn parse_header<R: Read>(reader: &mut NodeReader<R>) -> Result<MapHeader, OtbmError> {
    let mut root = reader.root_node()?;
    let mut header = parse_root(&mut root)?;
    let mut map_data = reader
        .first_child(&root)?
        .ok_or(OtbmError::MalformedHeader("no map data node"))?;
    if map_data.kind() != node::MAP_DATA {
        return Err(OtbmError::MalformedHeader("expected a map data node"));
    }
    parse_map_data_attrs(&mut map_data, &mut header)?;
    Ok(header)
}

fn parse_map<R: Read>(
    reader: &mut NodeReader<R>,
    catalog: Option<&ItemCatalog>,
    mut progress: Option<ProgressFn<'_>>,
) -> Result<MapLoad, OtbmError> {
    report(&mut progress, 5, "Parsing header");

    let mut root = reader.root_node()?;
    let mut header = parse_root(&mut root)?;

    let mut map_data = reader
        .first_child(&root)?
        .ok_or(OtbmError::MalformedHeader("no map data node"))?;
    if map_data.kind() != node::MAP_DATA {
        return Err(OtbmError::MalformedHeader("expected a map data node"));
    }
    parse_map_data_attrs(&mut map_data, &mut header)?;

    let mut map = Map {
        otbm_version: header.otbm_version,
        width: header.width,
        height: header.height,
        otb_major: header.otb_major,
        otb_minor: header.otb_minor,
        description: header.description,
        spawn_file: header.spawn_file,
        house_file: header.house_file,
        ..Map::default()
    };
    let mut counts = ReadCounts::default();

    report(&mut progress, 10, "Loading map data");

    let mut processed = 0u64;
    let mut child = reader.first_child(&map_data)?;
    while let Some(mut current) = child {
        processed += 1;
        if processed % 15 == 0 {
            let percent = 10 + (reader.position() * 80 / reader.len().max(1)) as u8;
            report(&mut progress, percent.min(90), "Loading tiles");
        }

        let outcome = match current.kind() {
            node::TILE_AREA => parse_tile_area(reader, &mut current, &mut map, &mut counts, catalog),
            node::TOWNS => parse_towns(reader, &mut current, &mut map, &mut counts),
            node::SPAWNS => parse_spawns(reader, &mut current, &mut map, &mut counts),
            node::WAYPOINTS => parse_waypoints(reader, &mut current, &mut map, &mut counts),
            other => {
                tracing::debug!(kind = other, "skipping unknown map data child");
                Ok(())
            }
        };
        match outcome {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                tracing::warn!(kind = current.kind(), error = %e, "skipping malformed map data child");
            }
            Err(e) => return Err(e),
        }

        child = reader.next_sibling(current)?;
    }

    report(&mut progress, 100, "Map loading complete");
    tracing::info!(
        tiles = counts.tiles,
        items = counts.items,
        towns = counts.towns,
        waypoints = counts.waypoints,
        spawns = counts.spawns,
        "map loaded"
    );

    Ok(MapLoad { map, counts })
}

/// Root payload: u32 revision, u16 width and height, then the catalog
/// version pair the map was built against.
fn parse_root(root: &mut BinaryNode) -> Result<MapHeader, OtbmError> {
    if root.kind() != node::ROOT {
        return Err(OtbmError::MalformedHeader("unexpected root node type"));
    }

    let otbm_version = root.get_u32()?;
    if otbm_version > LATEST_OTBM_VERSION {
        tracing::warn!(
            version = otbm_version,
            "unsupported map revision, loading anyway"
        );
    }

    Ok(MapHeader {
        otbm_version,
        width: root.get_u16()?,
        height: root.get_u16()?,
        otb_major: root.get_u32()?,
        otb_minor: root.get_u32()?,
        ..MapHeader::default()
    })
}

/// Map data attributes: description and the external side file names. The
/// walk stops at the first tag it does not recognize.
fn parse_map_data_attrs(
    map_data: &mut BinaryNode,
    header: &mut MapHeader,
) -> Result<(), OtbmError> {
    while let Some(tag) = map_data.peek_u8() {
        match tag {
            attr::DESCRIPTION => {
                map_data.get_u8()?;
                header.description = map_data.get_string()?;
            }
            attr::EXT_SPAWN_FILE => {
                map_data.get_u8()?;
                header.spawn_file = map_data.get_string()?;
            }
            attr::EXT_HOUSE_FILE => {
                map_data.get_u8()?;
                header.house_file = map_data.get_string()?;
            }
            other => {
                tracing::trace!(tag = other, "stopping at unknown map attribute");
                break;
            }
        }
    }
    Ok(())
}

fn parse_tile_area<R: Read>(
    reader: &mut NodeReader<R>,
    area: &mut BinaryNode,
    map: &mut Map,
    counts: &mut ReadCounts,
    catalog: Option<&ItemCatalog>,
) -> Result<(), OtbmError> {
    let base_x = area.get_u16()?;
    let base_y = area.get_u16()?;
    let base_z = area.get_u8()?;

    let mut child = reader.first_child(area)?;
    while let Some(mut tile_node) = child {
        match tile_node.kind() {
            node::TILE | node::HOUSE_TILE => {
                match parse_tile(reader, &mut tile_node, base_x, base_y, base_z, map, counts, catalog) {
                    Ok(()) => {}
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!(
                            base_x,
                            base_y,
                            base_z,
                            error = %e,
                            "skipping malformed tile"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            other => tracing::debug!(kind = other, "skipping unknown tile area child"),
        }
        child = reader.next_sibling(tile_node)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn parse_tile<R: Read>(
    reader: &mut NodeReader<R>,
    tile_node: &mut BinaryNode,
    base_x: u16,
    base_y: u16,
    base_z: u8,
    map: &mut Map,
    counts: &mut ReadCounts,
    catalog: Option<&ItemCatalog>,
) -> Result<(), OtbmError> {
    let x_offset = tile_node.get_u8()?;
    let y_offset = tile_node.get_u8()?;
    let pos = Position::new(
        base_x.wrapping_add(u16::from(x_offset)),
        base_y.wrapping_add(u16::from(y_offset)),
        base_z,
    );

    let mut tile = Tile::default();
    if tile_node.kind() == node::HOUSE_TILE {
        tile.house_id = tile_node.get_u32()?;
    }

    // Tile attributes. The first item on a tile, inline or as a child node,
    // is always the ground.
    while let Some(tag) = tile_node.peek_u8() {
        match tag {
            attr::TILE_FLAGS => {
                tile_node.get_u8()?;
                tile.flags = TileFlags::from_bits_truncate(tile_node.get_u32()? & 0xFF);
            }
            attr::ITEM => {
                tile_node.get_u8()?;
                let mut item = Item::new(tile_node.get_u16()?);
                parse_item_attributes(tile_node, &mut item)?;
                note_unknown_id(catalog, item.id);
                counts.items += 1;
                place_on_tile(&mut tile, item);
            }
            other => {
                tracing::trace!(tag = other, "stopping at unknown tile attribute");
                break;
            }
        }
    }

    let mut child = reader.first_child(tile_node)?;
    while let Some(item_node) = child {
        if item_node.kind() == node::ITEM {
            let (item, next) = parse_item_node(reader, item_node, catalog)?;
            place_on_tile(&mut tile, item);
            counts.items += 1;
            child = next;
        } else {
            tracing::debug!(kind = item_node.kind(), "skipping unknown tile child");
            child = reader.next_sibling(item_node)?;
        }
    }

    map.set_tile(pos, tile);
    counts.tiles += 1;
    Ok(())
}

fn place_on_tile(tile: &mut Tile, item: Item) {
    if tile.ground.is_none() && tile.items.is_empty() {
        tile.ground = Some(item);
    } else {
        tile.items.push(item);
    }
}

/// Item node: u16 id, attributes, then contained items as child nodes.
/// Contained items do not count toward the load tally; only things directly
/// on a tile do.
fn parse_item_node<R: Read>(
    reader: &mut NodeReader<R>,
    mut item_node: BinaryNode,
    catalog: Option<&ItemCatalog>,
) -> Result<(Item, Option<BinaryNode>), OtbmError> {
    let mut item = Item::new(item_node.get_u16()?);
    parse_item_attributes(&mut item_node, &mut item)?;
    note_unknown_id(catalog, item.id);

    let mut child = reader.first_child(&item_node)?;
    while let Some(inner) = child {
        if inner.kind() == node::ITEM {
            let (contained, next) = parse_item_node(reader, inner, catalog)?;
            item.contents.push(contained);
            child = next;
        } else {
            tracing::debug!(kind = inner.kind(), "skipping unknown item child");
            child = reader.next_sibling(inner)?;
        }
    }

    let next = reader.next_sibling(item_node)?;
    Ok((item, next))
}

/// Walks the item attributes in a payload shared with the enclosing tile.
/// Stops, without consuming the tag, at anything that is not an item
/// attribute: that byte belongs to the tile parser.
fn parse_item_attributes(node: &mut BinaryNode, item: &mut Item) -> Result<(), OtbmError> {
    while let Some(tag) = node.peek_u8() {
        if !schema::is_item_attribute(tag) {
            return Ok(());
        }
        node.get_u8()?;
        match tag {
            attr::COUNT | attr::RUNE_CHARGES => item.count = node.get_u8()?,
            attr::CHARGES => item.charges = node.get_u16()?,
            attr::ACTION_ID => item.action_id = node.get_u16()?,
            attr::UNIQUE_ID => item.unique_id = node.get_u16()?,
            attr::TEXT => item.text = node.get_string()?,
            attr::DESC => item.description = node.get_string()?,
            attr::WRITTEN_BY => item.written_by = node.get_string()?,
            attr::WRITTEN_DATE => item.written_date = node.get_u32()?,
            attr::DURATION => item.duration = node.get_u32()?,
            attr::DECAYING_STATE => item.decaying_state = node.get_u32()?,
            attr::SLEEPER_GUID => item.sleeper_guid = node.get_u32()?,
            attr::SLEEP_START => item.sleep_start = node.get_u32()?,
            attr::DEPOT_ID => item.depot_id = node.get_u16()?,
            attr::HOUSE_DOOR_ID => item.door_id = node.get_u8()?,
            attr::TIER => item.tier = node.get_u8()?,
            attr::TELEPORT_DEST => {
                item.teleport_dest = Some(Position::new(
                    node.get_u16()?,
                    node.get_u16()?,
                    node.get_u8()?,
                ));
            }
            attr::PODIUM_OUTFIT => {
                let mut outfit = [0u8; 15];
                outfit.copy_from_slice(node.get_raw(15)?);
                item.podium_outfit = Some(outfit);
            }
            attr::ATTRIBUTE_MAP => parse_attribute_map(node, item)?,
            _ => unreachable!("attribute set out of sync with the schema table"),
        }
    }
    Ok(())
}

/// Generic attribute map: u16 entry count, then string key, type byte and a
/// type-dependent value per entry.
fn parse_attribute_map(node: &mut BinaryNode, item: &mut Item) -> Result<(), OtbmError> {
    let count = node.get_u16()?;
    for _ in 0..count {
        let key = node.get_string()?;
        let value = match node.get_u8()? {
            attr_map_type::STRING => AttributeValue::String(node.get_long_string()?),
            attr_map_type::INT => AttributeValue::Int(node.get_u32()? as i32),
            attr_map_type::FLOAT => AttributeValue::Float(f32::from_bits(node.get_u32()?)),
            attr_map_type::DOUBLE => AttributeValue::Double(f64::from_bits(node.get_u64()?)),
            attr_map_type::BOOL => AttributeValue::Bool(node.get_u8()? != 0),
            _ => return Err(OtbmError::MalformedAttributeMap),
        };
        item.attributes.push((key, value));
    }
    Ok(())
}

fn parse_towns<R: Read>(
    reader: &mut NodeReader<R>,
    towns: &mut BinaryNode,
    map: &mut Map,
    counts: &mut ReadCounts,
) -> Result<(), OtbmError> {
    let mut child = reader.first_child(towns)?;
    while let Some(mut town_node) = child {
        if town_node.kind() == node::TOWN {
            let town = Town {
                id: town_node.get_u32()?,
                name: town_node.get_string()?,
                temple: Position::new(
                    town_node.get_u16()?,
                    town_node.get_u16()?,
                    town_node.get_u8()?,
                ),
            };
            map.towns.push(town);
            counts.towns += 1;
        }
        child = reader.next_sibling(town_node)?;
    }
    Ok(())
}

fn parse_waypoints<R: Read>(
    reader: &mut NodeReader<R>,
    waypoints: &mut BinaryNode,
    map: &mut Map,
    counts: &mut ReadCounts,
) -> Result<(), OtbmError> {
    let mut child = reader.first_child(waypoints)?;
    while let Some(mut wp_node) = child {
        if wp_node.kind() == node::WAYPOINT {
            let waypoint = Waypoint {
                name: wp_node.get_string()?,
                position: Position::new(wp_node.get_u16()?, wp_node.get_u16()?, wp_node.get_u8()?),
            };
            map.waypoints.push(waypoint);
            counts.waypoints += 1;
        }
        child = reader.next_sibling(wp_node)?;
    }
    Ok(())
}

/// Legacy embedded spawns: spawn areas with creature entries positioned
/// relative to the area center.
fn parse_spawns<R: Read>(
    reader: &mut NodeReader<R>,
    spawns: &mut BinaryNode,
    map: &mut Map,
    counts: &mut ReadCounts,
) -> Result<(), OtbmError> {
    let mut child = reader.first_child(spawns)?;
    while let Some(mut area) = child {
        if area.kind() != node::SPAWN_AREA {
            child = reader.next_sibling(area)?;
            continue;
        }

        let mut spawn = Spawn {
            center: Position::new(area.get_u16()?, area.get_u16()?, area.get_u8()?),
            radius: area.get_u16()?,
            creatures: Vec::new(),
        };

        let mut creature_node = reader.first_child(&area)?;
        while let Some(mut monster) = creature_node {
            if monster.kind() == node::MONSTER {
                spawn.creatures.push(SpawnCreature {
                    offset_x: monster.get_u16()?,
                    offset_y: monster.get_u16()?,
                    name: monster.get_string()?,
                    interval: monster.get_u16()?,
                });
            }
            creature_node = reader.next_sibling(monster)?;
        }

        map.spawns.push(spawn);
        counts.spawns += 1;
        child = reader.next_sibling(area)?;
    }
    Ok(())
}

fn note_unknown_id(catalog: Option<&ItemCatalog>, id: u16) {
    if let Some(catalog) = catalog {
        if id != 0 && catalog.lookup_by_server_id(id).is_none() {
            tracing::debug!(id, "item id not present in catalog");
        }
    }
}
