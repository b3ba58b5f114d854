//! Map file saving.
//!
//! Output is deterministic: tiles are grouped into 256x256 areas keyed by
//! base coordinate, areas are emitted in key order and tiles row-major inside
//! each area, so saving the same map twice produces byte-identical files.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use node_file::NodeWriter;
use otb::{ItemCatalog, ItemType};

use crate::map::{AttributeValue, Item, Map, Position, Tile};
use crate::schema::{attr, attr_map_type, node};
use crate::{report, OtbmError, ProgressFn, OTBM_IDENTIFIER};

/// Item id translation applied while writing or converting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdConversion {
    #[default]
    None,
    /// Server ids in, client ids out.
    ToClient,
    /// Client ids in, server ids out.
    ToServer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub tiles: usize,
    pub items: usize,
    pub converted: usize,
    pub skipped: usize,
}

/// Translates one id, keeping score. Ids with no catalog mapping (and the
/// 0 sentinel) pass through unchanged; unmapped nonzero ids count as skipped.
pub(crate) fn translate_id(
    id: u16,
    conversion: IdConversion,
    catalog: Option<&ItemCatalog>,
    converted: &mut usize,
    skipped: &mut usize,
) -> u16 {
    if conversion == IdConversion::None || id == 0 {
        return id;
    }
    let Some(catalog) = catalog else { return id };

    let mapped = match conversion {
        IdConversion::ToClient => catalog.lookup_by_server_id(id).map(|t| t.client_id),
        IdConversion::ToServer => catalog.lookup_by_client_id(id).map(|t| t.server_id),
        IdConversion::None => unreachable!(),
    };
    match mapped {
        Some(new_id) if new_id > 0 => {
            *converted += 1;
            new_id
        }
        _ => {
            *skipped += 1;
            id
        }
    }
}

struct WriteCtx<'a> {
    conversion: IdConversion,
    catalog: Option<&'a ItemCatalog>,
    summary: WriteSummary,
}

impl WriteCtx<'_> {
    fn convert_id(&mut self, id: u16) -> u16 {
        translate_id(
            id,
            self.conversion,
            self.catalog,
            &mut self.summary.converted,
            &mut self.summary.skipped,
        )
    }

    /// Catalog entry for an id in the map's current id space.
    fn item_type(&self, id: u16) -> Option<&ItemType> {
        let catalog = self.catalog?;
        match self.conversion {
            IdConversion::ToServer => catalog.lookup_by_client_id(id),
            _ => catalog.lookup_by_server_id(id),
        }
    }

    /// Splash and fluid items carry their subtype in a Count attribute even
    /// when it is the default, so they can never use the inline encoding.
    fn forces_count(&self, id: u16) -> bool {
        self.item_type(id)
            .map(|t| t.is_splash() || t.is_fluid_container())
            .unwrap_or(false)
    }
}

/// Saves a map to disk, optionally translating item ids on the way out.
/// The in-memory map is left untouched.
pub fn write(
    path: &Path,
    map: &Map,
    catalog: Option<&ItemCatalog>,
    conversion: IdConversion,
    progress: Option<ProgressFn<'_>>,
) -> Result<WriteSummary, OtbmError> {
    let writer = NodeWriter::create(path, OTBM_IDENTIFIER)?;
    let (_, summary) = write_to(writer, map, catalog, conversion, progress)?;
    Ok(summary)
}

/// Saves a map into a byte vector.
pub fn write_to_vec(
    map: &Map,
    catalog: Option<&ItemCatalog>,
    conversion: IdConversion,
) -> Result<(Vec<u8>, WriteSummary), OtbmError> {
    let writer = NodeWriter::new(Vec::new(), OTBM_IDENTIFIER)?;
    write_to(writer, map, catalog, conversion, None)
}

fn write_to<W: Write>(
    mut writer: NodeWriter<W>,
    map: &Map,
    catalog: Option<&ItemCatalog>,
    conversion: IdConversion,
    mut progress: Option<ProgressFn<'_>>,
) -> Result<(W, WriteSummary), OtbmError> {
    if conversion != IdConversion::None && catalog.is_none() {
        return Err(OtbmError::ConversionNeedsCatalog);
    }
    let mut ctx = WriteCtx {
        conversion,
        catalog,
        summary: WriteSummary::default(),
    };

    report(&mut progress, 0, "Writing map header");

    writer.begin_node(node::ROOT)?;
    writer.write_u32(map.otbm_version)?;
    writer.write_u16(map.width)?;
    writer.write_u16(map.height)?;
    writer.write_u32(map.otb_major)?;
    writer.write_u32(map.otb_minor)?;

    writer.begin_node(node::MAP_DATA)?;
    if !map.description.is_empty() {
        writer.write_u8(attr::DESCRIPTION)?;
        writer.write_string(&map.description)?;
    }
    if !map.spawn_file.is_empty() {
        writer.write_u8(attr::EXT_SPAWN_FILE)?;
        writer.write_string(&map.spawn_file)?;
    }
    if !map.house_file.is_empty() {
        writer.write_u8(attr::EXT_HOUSE_FILE)?;
        writer.write_string(&map.house_file)?;
    }

    report(&mut progress, 10, "Writing tile areas");

    // Position order is (z, y, x); re-key by area base so every tile lands
    // in its 256x256 area node.
    let mut areas: BTreeMap<(u16, u16, u8), Vec<(&Position, &Tile)>> = BTreeMap::new();
    for (pos, tile) in &map.tiles {
        areas
            .entry((pos.x & 0xFF00, pos.y & 0xFF00, pos.z))
            .or_default()
            .push((pos, tile));
    }

    let total_areas = areas.len().max(1);
    for (index, ((base_x, base_y, base_z), mut tiles)) in areas.into_iter().enumerate() {
        tiles.sort_by_key(|(pos, _)| (pos.y, pos.x));

        writer.begin_node(node::TILE_AREA)?;
        writer.write_u16(base_x)?;
        writer.write_u16(base_y)?;
        writer.write_u8(base_z)?;
        for (pos, tile) in tiles {
            write_tile(&mut writer, pos, tile, &mut ctx)?;
        }
        writer.end_node()?;

        let percent = 10 + (80 * (index + 1) / total_areas) as u8;
        report(&mut progress, percent, "Writing tiles");
    }

    if !map.towns.is_empty() {
        writer.begin_node(node::TOWNS)?;
        for town in &map.towns {
            writer.begin_node(node::TOWN)?;
            writer.write_u32(town.id)?;
            writer.write_string(&town.name)?;
            writer.write_u16(town.temple.x)?;
            writer.write_u16(town.temple.y)?;
            writer.write_u8(town.temple.z)?;
            writer.end_node()?;
        }
        writer.end_node()?;
    }

    if !map.waypoints.is_empty() {
        writer.begin_node(node::WAYPOINTS)?;
        for waypoint in &map.waypoints {
            writer.begin_node(node::WAYPOINT)?;
            writer.write_string(&waypoint.name)?;
            writer.write_u16(waypoint.position.x)?;
            writer.write_u16(waypoint.position.y)?;
            writer.write_u8(waypoint.position.z)?;
            writer.end_node()?;
        }
        writer.end_node()?;
    }

    writer.end_node()?; // map data
    writer.end_node()?; // root

    let sink = writer.finish()?;
    report(&mut progress, 100, "Map saved");
    tracing::info!(
        tiles = ctx.summary.tiles,
        items = ctx.summary.items,
        converted = ctx.summary.converted,
        skipped = ctx.summary.skipped,
        "map written"
    );
    Ok((sink, ctx.summary))
}

fn write_tile<W: Write>(
    writer: &mut NodeWriter<W>,
    pos: &Position,
    tile: &Tile,
    ctx: &mut WriteCtx<'_>,
) -> Result<(), OtbmError> {
    let local_x = (pos.x & 0xFF) as u8;
    let local_y = (pos.y & 0xFF) as u8;

    if tile.house_id > 0 {
        writer.begin_node(node::HOUSE_TILE)?;
        writer.write_u8(local_x)?;
        writer.write_u8(local_y)?;
        writer.write_u32(tile.house_id)?;
    } else {
        writer.begin_node(node::TILE)?;
        writer.write_u8(local_x)?;
        writer.write_u8(local_y)?;
    }

    // Only the low byte holds persisted state.
    let flags = tile.flags.bits() & 0xFF;
    if flags != 0 {
        writer.write_u8(attr::TILE_FLAGS)?;
        writer.write_u32(flags)?;
    }

    if let Some(ground) = &tile.ground {
        if ground.is_simple() && !ctx.forces_count(ground.id) {
            // Compact inline encoding, two bytes cheaper than a child node.
            let id = ctx.convert_id(ground.id);
            writer.write_u8(attr::ITEM)?;
            writer.write_u16(id)?;
        } else {
            write_item(writer, ground, ctx)?;
        }
        ctx.summary.items += 1;
    }

    for item in &tile.items {
        write_item(writer, item, ctx)?;
        ctx.summary.items += 1;
    }

    writer.end_node()?;
    ctx.summary.tiles += 1;
    Ok(())
}

fn write_item<W: Write>(
    writer: &mut NodeWriter<W>,
    item: &Item,
    ctx: &mut WriteCtx<'_>,
) -> Result<(), OtbmError> {
    writer.begin_node(node::ITEM)?;
    let id = ctx.convert_id(item.id);
    writer.write_u16(id)?;

    let item_type = ctx.item_type(item.id);
    let forced_count = item_type
        .map(|t| t.is_splash() || t.is_fluid_container())
        .unwrap_or(false);
    let stackable = item_type.map(|t| t.is_stackable()).unwrap_or(false);
    if forced_count || (stackable && item.count > 1) {
        writer.write_u8(attr::COUNT)?;
        writer.write_u8(item.count)?;
    }

    if item.action_id > 0 {
        writer.write_u8(attr::ACTION_ID)?;
        writer.write_u16(item.action_id)?;
    }
    if item.unique_id > 0 {
        writer.write_u8(attr::UNIQUE_ID)?;
        writer.write_u16(item.unique_id)?;
    }
    if item.charges > 0 {
        writer.write_u8(attr::CHARGES)?;
        writer.write_u16(item.charges)?;
    }
    if !item.text.is_empty() {
        writer.write_u8(attr::TEXT)?;
        writer.write_string(&item.text)?;
    }
    if !item.description.is_empty() {
        writer.write_u8(attr::DESC)?;
        writer.write_string(&item.description)?;
    }
    if !item.written_by.is_empty() {
        writer.write_u8(attr::WRITTEN_BY)?;
        writer.write_string(&item.written_by)?;
    }
    if item.written_date > 0 {
        writer.write_u8(attr::WRITTEN_DATE)?;
        writer.write_u32(item.written_date)?;
    }
    if item.duration > 0 {
        writer.write_u8(attr::DURATION)?;
        writer.write_u32(item.duration)?;
    }
    if item.decaying_state > 0 {
        writer.write_u8(attr::DECAYING_STATE)?;
        writer.write_u32(item.decaying_state)?;
    }
    if item.sleeper_guid > 0 {
        writer.write_u8(attr::SLEEPER_GUID)?;
        writer.write_u32(item.sleeper_guid)?;
    }
    if item.sleep_start > 0 {
        writer.write_u8(attr::SLEEP_START)?;
        writer.write_u32(item.sleep_start)?;
    }
    if let Some(dest) = item.teleport_dest {
        writer.write_u8(attr::TELEPORT_DEST)?;
        writer.write_u16(dest.x)?;
        writer.write_u16(dest.y)?;
        writer.write_u8(dest.z)?;
    }
    if item.door_id > 0 {
        writer.write_u8(attr::HOUSE_DOOR_ID)?;
        writer.write_u8(item.door_id)?;
    }
    if item.depot_id > 0 {
        writer.write_u8(attr::DEPOT_ID)?;
        writer.write_u16(item.depot_id)?;
    }
    if item.tier > 0 {
        writer.write_u8(attr::TIER)?;
        writer.write_u8(item.tier)?;
    }
    if let Some(outfit) = &item.podium_outfit {
        writer.write_u8(attr::PODIUM_OUTFIT)?;
        writer.write_bytes(outfit)?;
    }
    if !item.attributes.is_empty() {
        write_attribute_map(writer, &item.attributes)?;
    }

    for contained in &item.contents {
        write_item(writer, contained, ctx)?;
    }

    writer.end_node()?;
    Ok(())
}

fn write_attribute_map<W: Write>(
    writer: &mut NodeWriter<W>,
    attributes: &[(String, AttributeValue)],
) -> Result<(), OtbmError> {
    writer.write_u8(attr::ATTRIBUTE_MAP)?;
    writer.write_u16(attributes.len() as u16)?;
    for (key, value) in attributes {
        writer.write_string(key)?;
        match value {
            AttributeValue::String(s) => {
                writer.write_u8(attr_map_type::STRING)?;
                writer.write_long_string(s)?;
            }
            AttributeValue::Int(v) => {
                writer.write_u8(attr_map_type::INT)?;
                writer.write_u32(*v as u32)?;
            }
            AttributeValue::Float(v) => {
                writer.write_u8(attr_map_type::FLOAT)?;
                writer.write_u32(v.to_bits())?;
            }
            AttributeValue::Double(v) => {
                writer.write_u8(attr_map_type::DOUBLE)?;
                writer.write_u64(v.to_bits())?;
            }
            AttributeValue::Bool(v) => {
                writer.write_u8(attr_map_type::BOOL)?;
                writer.write_u8(u8::from(*v))?;
            }
        }
    }
    Ok(())
}
