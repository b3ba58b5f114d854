//! Streaming item id conversion.
//!
//! Rewrites a map file node by node, translating every item id it passes and
//! copying everything else verbatim. The map model is never built, so memory
//! use is bounded by the largest single node regardless of map size.

use std::io::{Read, Write};
use std::path::Path;

use node_file::{BinaryNode, NodeReader, NodeWriter};
use otb::ItemCatalog;

use crate::schema::{self, attr, node, AttrWidth};
use crate::write::{translate_id, IdConversion};
use crate::{report, OtbmError, ProgressFn, ACCEPTED, OTBM_IDENTIFIER};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertSummary {
    pub converted: usize,
    pub skipped: usize,
}

struct ConvertCtx<'a> {
    conversion: IdConversion,
    catalog: &'a ItemCatalog,
    summary: ConvertSummary,
    nodes: u64,
}

impl ConvertCtx<'_> {
    fn convert_id(&mut self, id: u16) -> u16 {
        translate_id(
            id,
            self.conversion,
            Some(self.catalog),
            &mut self.summary.converted,
            &mut self.summary.skipped,
        )
    }
}

/// Converts the item ids of a map file, streaming from `input` to `output`.
pub fn convert(
    input: &Path,
    output: &Path,
    conversion: IdConversion,
    catalog: &ItemCatalog,
    mut progress: Option<ProgressFn<'_>>,
) -> Result<ConvertSummary, OtbmError> {
    report(&mut progress, 0, "Opening map files");
    let reader = NodeReader::open(input, ACCEPTED)?;
    let writer = NodeWriter::create(output, OTBM_IDENTIFIER)?;
    let (_, summary) = convert_stream(reader, writer, conversion, catalog, progress)?;
    Ok(summary)
}

/// Converts a map held in memory, returning the rewritten bytes.
pub fn convert_from_slice(
    data: &[u8],
    conversion: IdConversion,
    catalog: &ItemCatalog,
) -> Result<(Vec<u8>, ConvertSummary), OtbmError> {
    let reader = NodeReader::from_slice(data, ACCEPTED)?;
    let writer = NodeWriter::new(Vec::new(), OTBM_IDENTIFIER)?;
    convert_stream(reader, writer, conversion, catalog, None)
}

fn convert_stream<R: Read, W: Write>(
    mut reader: NodeReader<R>,
    mut writer: NodeWriter<W>,
    conversion: IdConversion,
    catalog: &ItemCatalog,
    mut progress: Option<ProgressFn<'_>>,
) -> Result<(W, ConvertSummary), OtbmError> {
    let mut ctx = ConvertCtx {
        conversion,
        catalog,
        summary: ConvertSummary::default(),
        nodes: 0,
    };

    let root = reader.root_node()?;
    process_node(&mut reader, root, &mut writer, &mut ctx, &mut progress)?;

    let sink = writer.finish()?;
    report(&mut progress, 100, "Conversion complete");
    tracing::info!(
        converted = ctx.summary.converted,
        skipped = ctx.summary.skipped,
        "map id conversion complete"
    );
    Ok((sink, ctx.summary))
}

/// Copies one node and its subtree, translating ids where they occur, and
/// returns the node's next sibling.
fn process_node<R: Read, W: Write>(
    reader: &mut NodeReader<R>,
    mut current: BinaryNode,
    writer: &mut NodeWriter<W>,
    ctx: &mut ConvertCtx<'_>,
    progress: &mut Option<ProgressFn<'_>>,
) -> Result<Option<BinaryNode>, OtbmError> {
    ctx.nodes += 1;
    if ctx.nodes % 15 == 0 {
        let percent = (reader.position() * 100 / reader.len().max(1)) as u8;
        report(progress, percent.min(99), "Converting item ids");
    }

    writer.begin_node(current.kind())?;
    match current.kind() {
        // Item payload leads with the id; the attributes that follow never
        // contain another id, so they copy through untouched.
        node::ITEM => {
            let id = current.get_u16()?;
            let new_id = ctx.convert_id(id);
            writer.write_u16(new_id)?;
            copy_rest(&mut current, writer)?;
        }
        node::TILE | node::HOUSE_TILE => convert_tile_payload(&mut current, writer, ctx)?,
        _ => copy_rest(&mut current, writer)?,
    }

    let mut child = reader.first_child(&current)?;
    while let Some(inner) = child {
        child = process_node(reader, inner, writer, ctx, progress)?;
    }

    writer.end_node()?;
    reader.next_sibling(current).map_err(Into::into)
}

/// Walks a tile payload attribute by attribute so the inline item id can be
/// translated. Every attribute is stepped over by its schema width; a tag
/// the schema does not know makes resynchronization impossible, so the
/// conversion aborts rather than risk corrupting the output.
fn convert_tile_payload<W: Write>(
    tile: &mut BinaryNode,
    writer: &mut NodeWriter<W>,
    ctx: &mut ConvertCtx<'_>,
) -> Result<(), OtbmError> {
    writer.write_u8(tile.get_u8()?)?; // x offset
    writer.write_u8(tile.get_u8()?)?; // y offset
    if tile.kind() == node::HOUSE_TILE {
        writer.write_u32(tile.get_u32()?)?;
    }

    while tile.remaining() > 0 {
        let tag = tile.get_u8()?;
        if tag == attr::ITEM {
            let id = tile.get_u16()?;
            let new_id = ctx.convert_id(id);
            writer.write_u8(tag)?;
            writer.write_u16(new_id)?;
            continue;
        }
        match schema::width(tag) {
            Some(AttrWidth::U8) => {
                writer.write_u8(tag)?;
                writer.write_u8(tile.get_u8()?)?;
            }
            Some(AttrWidth::U16) => {
                writer.write_u8(tag)?;
                writer.write_u16(tile.get_u16()?)?;
            }
            Some(AttrWidth::U32) => {
                writer.write_u8(tag)?;
                writer.write_u32(tile.get_u32()?)?;
            }
            Some(AttrWidth::Fixed(len)) => {
                writer.write_u8(tag)?;
                writer.write_bytes(tile.get_raw(len)?)?;
            }
            Some(AttrWidth::Str) => {
                writer.write_u8(tag)?;
                let len = tile.get_u16()?;
                writer.write_u16(len)?;
                writer.write_bytes(tile.get_raw(len as usize)?)?;
            }
            Some(AttrWidth::TerminalMap) => {
                // Self-describing and always last; nothing after it can be
                // an item id.
                writer.write_u8(tag)?;
                return copy_rest(tile, writer);
            }
            None => return Err(OtbmError::UnknownTileAttribute(tag)),
        }
    }
    Ok(())
}

fn copy_rest<W: Write>(
    current: &mut BinaryNode,
    writer: &mut NodeWriter<W>,
) -> Result<(), OtbmError> {
    let remaining = current.remaining();
    if remaining > 0 {
        writer.write_bytes(current.get_raw(remaining)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{Item, Map, Position, Tile};
    use crate::read::read_from_slice;
    use crate::schema::attr;
    use crate::testutil::{catalog, sample_map};
    use crate::write::write_to_vec;

    #[test]
    fn client_then_server_conversion_is_identity() {
        let catalog = catalog();
        let (original, _) =
            write_to_vec(&sample_map(), Some(&catalog), IdConversion::None).unwrap();

        let (client, to_client) =
            convert_from_slice(&original, IdConversion::ToClient, &catalog).unwrap();
        assert_eq!(to_client.skipped, 0);
        assert!(to_client.converted > 0);

        // The client-space file reads back with client ids.
        let load = read_from_slice(&client, None, None).unwrap();
        let pz = load.map.tile(Position::new(100, 100, 7)).unwrap();
        assert_eq!(pz.ground.as_ref().unwrap().id, 4526);

        let (server, to_server) =
            convert_from_slice(&client, IdConversion::ToServer, &catalog).unwrap();
        assert_eq!(server, original);
        assert_eq!(to_server.converted, to_client.converted);
        assert_eq!(to_server.skipped, 0);
    }

    #[test]
    fn unmapped_ids_are_kept_and_counted() {
        let catalog = catalog();
        let mut map = Map::default();
        let mut tile = Tile::default();
        tile.ground = Some(Item::new(555));
        map.set_tile(Position::new(10, 10, 7), tile);
        let (bytes, _) = write_to_vec(&map, None, IdConversion::None).unwrap();

        let (converted, summary) =
            convert_from_slice(&bytes, IdConversion::ToClient, &catalog).unwrap();
        assert_eq!(summary.converted, 0);
        assert_eq!(summary.skipped, 1);

        let load = read_from_slice(&converted, None, None).unwrap();
        let tile = load.map.tile(Position::new(10, 10, 7)).unwrap();
        assert_eq!(tile.ground.as_ref().unwrap().id, 555);
    }

    #[test]
    fn zero_id_passes_through_uncounted() {
        let catalog = catalog();
        let mut writer = NodeWriter::new(Vec::new(), OTBM_IDENTIFIER).unwrap();
        writer.begin_node(node::ROOT).unwrap();
        writer.write_u32(2).unwrap();
        writer.write_u16(256).unwrap();
        writer.write_u16(256).unwrap();
        writer.write_u32(3).unwrap();
        writer.write_u32(60).unwrap();
        writer.begin_node(node::MAP_DATA).unwrap();
        writer.begin_node(node::TILE_AREA).unwrap();
        writer.write_u16(0).unwrap();
        writer.write_u16(0).unwrap();
        writer.write_u8(7).unwrap();
        writer.begin_node(node::TILE).unwrap();
        writer.write_u8(5).unwrap();
        writer.write_u8(5).unwrap();
        writer.write_u8(attr::ITEM).unwrap();
        writer.write_u16(0).unwrap();
        writer.end_node().unwrap();
        writer.end_node().unwrap();
        writer.end_node().unwrap();
        writer.end_node().unwrap();
        let bytes = writer.finish().unwrap();

        let (converted, summary) =
            convert_from_slice(&bytes, IdConversion::ToClient, &catalog).unwrap();
        assert_eq!(summary, ConvertSummary::default());
        assert_eq!(converted, bytes);
    }

    #[test]
    fn unknown_tile_attribute_aborts() {
        let catalog = catalog();
        let mut writer = NodeWriter::new(Vec::new(), OTBM_IDENTIFIER).unwrap();
        writer.begin_node(node::ROOT).unwrap();
        writer.write_u32(2).unwrap();
        writer.write_u16(256).unwrap();
        writer.write_u16(256).unwrap();
        writer.write_u32(3).unwrap();
        writer.write_u32(60).unwrap();
        writer.begin_node(node::MAP_DATA).unwrap();
        writer.begin_node(node::TILE_AREA).unwrap();
        writer.write_u16(0).unwrap();
        writer.write_u16(0).unwrap();
        writer.write_u8(7).unwrap();
        writer.begin_node(node::TILE).unwrap();
        writer.write_u8(5).unwrap();
        writer.write_u8(5).unwrap();
        // A tag the schema has no width for; skipping it blind would desync
        // the id scan.
        writer.write_u8(0x63).unwrap();
        writer.write_bytes(&[0xAA, 0xBB]).unwrap();
        writer.end_node().unwrap();
        writer.end_node().unwrap();
        writer.end_node().unwrap();
        writer.end_node().unwrap();
        let bytes = writer.finish().unwrap();

        match convert_from_slice(&bytes, IdConversion::ToClient, &catalog) {
            Err(OtbmError::UnknownTileAttribute(0x63)) => {}
            other => panic!("expected unknown tile attribute error, got {other:?}"),
        }
    }

    #[test]
    fn house_tiles_and_full_items_convert() {
        let catalog = catalog();
        let (original, _) =
            write_to_vec(&sample_map(), Some(&catalog), IdConversion::None).unwrap();
        let (client, _) = convert_from_slice(&original, IdConversion::ToClient, &catalog).unwrap();

        let load = read_from_slice(&client, None, None).unwrap();
        let house = load.map.tile(Position::new(101, 100, 7)).unwrap();
        assert_eq!(house.house_id, 42);
        assert_eq!(house.ground.as_ref().unwrap().id, 4526);
        assert_eq!(house.items[0].id, 2001);
        // Attributes survive the rewrite untouched.
        assert_eq!(house.items[0].action_id, 1000);
        assert_eq!(house.items[0].door_id, 3);
        // Nested container contents convert at every depth.
        let chest = load.map.tile(Position::new(100, 101, 7)).unwrap();
        assert_eq!(chest.items[0].contents[1].contents[0].id, 2886);
    }
}
