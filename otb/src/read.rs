//! Catalog file parsing.

use std::io::Read;
use std::path::Path;

use node_file::{BinaryNode, FileIdentifier, NodeReader};

use crate::{
    attribute, read_string, CatalogVersion, ItemCatalog, ItemGroup, ItemType, ItemTypeFlags,
    OtbError, OTB_IDENTIFIER,
};

const ACCEPTED: &[FileIdentifier] = &[OTB_IDENTIFIER];

/// Reads a full item catalog from disk.
pub fn read_catalog(path: &Path) -> Result<ItemCatalog, OtbError> {
    let mut reader = NodeReader::open(path, ACCEPTED)?;
    parse_catalog(&mut reader)
}

/// Reads a full item catalog from a byte slice.
pub fn read_catalog_from_slice(data: &[u8]) -> Result<ItemCatalog, OtbError> {
    let mut reader = NodeReader::from_slice(data, ACCEPTED)?;
    parse_catalog(&mut reader)
}

/// Reads only the version triple, without touching the item nodes.
pub fn read_catalog_version(path: &Path) -> Result<CatalogVersion, OtbError> {
    let mut reader = NodeReader::open(path, ACCEPTED)?;
    let mut root = reader.root_node()?;
    parse_root(&mut root)
}

fn parse_catalog<R: Read>(reader: &mut NodeReader<R>) -> Result<ItemCatalog, OtbError> {
    let mut root = reader.root_node()?;
    let version = parse_root(&mut root)?;
    let mut catalog = ItemCatalog::new(version);

    let mut child = reader.first_child(&root)?;
    while let Some(mut node) = child {
        match parse_item(&mut node)? {
            Some(item) => catalog.insert(item),
            // Entries with no server id cannot be referenced by any map.
            None => tracing::debug!("dropping catalog entry without a server id"),
        }
        child = reader.next_sibling(node)?;
    }

    tracing::debug!(
        items = catalog.len(),
        major = version.major,
        minor = version.minor,
        "item catalog loaded"
    );
    Ok(catalog)
}

/// Root payload: type byte 0, an unused u32 flag word, then the version
/// attribute (0x01) whose data begins with three u32s.
fn parse_root(root: &mut BinaryNode) -> Result<CatalogVersion, OtbError> {
    if root.kind() != 0 {
        return Err(OtbError::MalformedRoot("unexpected root node type"));
    }
    root.get_u32()?;

    if root.get_u8()? != attribute::ROOT_VERSION {
        return Err(OtbError::MalformedRoot("missing version attribute"));
    }
    let len = root.get_u16()? as usize;
    if len < 12 {
        return Err(OtbError::MalformedRoot("version attribute too short"));
    }
    let version = CatalogVersion {
        major: root.get_u32()?,
        minor: root.get_u32()?,
        build: root.get_u32()?,
    };
    // The rest of the attribute is a free-form description string.
    root.skip(len - 12)?;
    Ok(version)
}

/// Item payload: u32 flag word, then (attribute, u16 length, data) records
/// until the payload runs out. Unknown attributes are skipped by length.
fn parse_item(node: &mut BinaryNode) -> Result<Option<ItemType>, OtbError> {
    let mut item = ItemType {
        group: ItemGroup::from_byte(node.kind()).unwrap_or_else(|| {
            tracing::warn!(group = node.kind(), "unknown item group byte");
            ItemGroup::None
        }),
        flags: ItemTypeFlags::from_bits_truncate(node.get_u32()?),
        ..ItemType::default()
    };

    while node.remaining() > 0 {
        let attr = node.get_u8()?;
        let len = node.get_u16()? as usize;
        match attr {
            attribute::SERVER_ID if len == 2 => item.server_id = node.get_u16()?,
            attribute::CLIENT_ID if len == 2 => item.client_id = node.get_u16()?,
            attribute::NAME => item.name = read_string(node, len)?,
            attribute::DESCRIPTION => item.description = read_string(node, len)?,
            attribute::SPEED if len == 2 => item.speed = node.get_u16()?,
            attribute::MINIMAP_COLOR if len == 2 => item.minimap_color = node.get_u16()?,
            attribute::MAX_READ_WRITE_CHARS if len == 2 => item.max_text_length = node.get_u16()?,
            attribute::MAX_READ_CHARS if len == 2 => item.max_text_length_once = node.get_u16()?,
            attribute::LIGHT if len == 4 => {
                item.light_level = node.get_u16()?;
                item.light_color = node.get_u16()?;
            }
            attribute::STACK_ORDER if len == 1 => item.stack_order = node.get_u8()?,
            attribute::TRADE_AS if len == 2 => item.ware_id = node.get_u16()?,
            // Sprite hashes, mis-sized records and anything newer than this
            // reader are skipped by their declared length.
            _ => node.skip(len)?,
        }
    }

    if item.server_id == 0 {
        return Ok(None);
    }
    Ok(Some(item))
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_file::NodeWriter;

    fn write_attr(writer: &mut NodeWriter<Vec<u8>>, attr: u8, data: &[u8]) {
        writer.write_u8(attr).unwrap();
        writer.write_u16(data.len() as u16).unwrap();
        writer.write_bytes(data).unwrap();
    }

    fn sample_catalog() -> Vec<u8> {
        let mut writer = NodeWriter::new(Vec::new(), OTB_IDENTIFIER).unwrap();
        writer.begin_node(0).unwrap();
        writer.write_u32(0).unwrap();
        writer.write_u8(attribute::ROOT_VERSION).unwrap();
        writer.write_u16(140).unwrap();
        writer.write_u32(3).unwrap();
        writer.write_u32(60).unwrap();
        writer.write_u32(29).unwrap();
        writer.write_bytes(&[0; 128]).unwrap();

        // A stackable pickupable item.
        writer.begin_node(0).unwrap();
        writer
            .write_u32((ItemTypeFlags::STACKABLE | ItemTypeFlags::PICKUPABLE).bits())
            .unwrap();
        write_attr(&mut writer, attribute::SERVER_ID, &100u16.to_le_bytes());
        write_attr(&mut writer, attribute::CLIENT_ID, &3031u16.to_le_bytes());
        write_attr(&mut writer, attribute::NAME, b"gold coin");
        writer.end_node().unwrap();

        // A ground tile with speed, light and an attribute this reader does
        // not know about.
        writer.begin_node(1).unwrap();
        writer.write_u32(ItemTypeFlags::UNPASSABLE.bits()).unwrap();
        write_attr(&mut writer, attribute::SERVER_ID, &406u16.to_le_bytes());
        write_attr(&mut writer, attribute::CLIENT_ID, &4526u16.to_le_bytes());
        write_attr(&mut writer, attribute::SPEED, &150u16.to_le_bytes());
        write_attr(&mut writer, attribute::LIGHT, &[5, 0, 0xD7, 0]);
        write_attr(&mut writer, 0x7F, &[1, 2, 3]);
        write_attr(&mut writer, attribute::NAME, b"grass");
        writer.end_node().unwrap();

        // No server id: must be dropped.
        writer.begin_node(12).unwrap();
        writer.write_u32(0).unwrap();
        write_attr(&mut writer, attribute::CLIENT_ID, &999u16.to_le_bytes());
        writer.end_node().unwrap();

        writer.end_node().unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn parses_version_and_items() {
        let catalog = read_catalog_from_slice(&sample_catalog()).unwrap();
        assert_eq!(
            catalog.version,
            CatalogVersion {
                major: 3,
                minor: 60,
                build: 29
            }
        );
        assert_eq!(catalog.len(), 2);

        let coin = catalog.lookup_by_server_id(100).unwrap();
        assert_eq!(coin.client_id, 3031);
        assert_eq!(coin.name, "gold coin");
        assert!(coin.is_stackable());

        let grass = catalog.lookup_by_server_id(406).unwrap();
        assert_eq!(grass.group, ItemGroup::Ground);
        assert_eq!(grass.speed, 150);
        assert_eq!(grass.light_level, 5);
        assert_eq!(grass.light_color, 0xD7);
        assert_eq!(grass.name, "grass");
    }

    #[test]
    fn lookups_cross_reference_both_id_spaces() {
        let catalog = read_catalog_from_slice(&sample_catalog()).unwrap();
        assert_eq!(catalog.lookup_by_client_id(3031).unwrap().server_id, 100);
        assert_eq!(catalog.lookup_by_client_id(4526).unwrap().server_id, 406);
        // The entry without a server id never made it in.
        assert!(catalog.lookup_by_client_id(999).is_none());
        // Id 0 is the sentinel and resolves to nothing.
        assert!(catalog.lookup_by_server_id(0).is_none());
        assert!(catalog.lookup_by_client_id(0).is_none());
    }

    #[test]
    fn rejects_catalog_without_version_attribute() {
        let mut writer = NodeWriter::new(Vec::new(), OTB_IDENTIFIER).unwrap();
        writer.begin_node(0).unwrap();
        writer.write_u32(0).unwrap();
        writer.write_u8(0x02).unwrap();
        writer.write_u16(0).unwrap();
        writer.end_node().unwrap();
        let bytes = writer.finish().unwrap();

        assert!(matches!(
            read_catalog_from_slice(&bytes),
            Err(OtbError::MalformedRoot(_))
        ));
    }
}
