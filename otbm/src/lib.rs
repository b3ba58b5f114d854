//! The OTBM map format: a node-file tree of 256x256 tile areas, tiles and
//! items, plus towns, waypoints and legacy embedded spawns.
//!
//! Three entry points cover the format:
//!
//! - [`read`] / [`read_header`] load a whole map or just its header into the
//!   [`Map`] model,
//! - [`write`] saves a map deterministically, optionally translating item
//!   ids between the server and client id spaces,
//! - [`convert`] rewrites a map file id-by-id without ever building the
//!   model, so arbitrarily large maps convert in constant memory.

use node_file::{FileIdentifier, NodeError};
use thiserror::Error;

pub mod convert;
pub mod map;
pub mod read;
pub mod schema;
#[cfg(test)]
pub(crate) mod testutil;
pub mod write;

pub use convert::{convert, convert_from_slice, ConvertSummary};
pub use map::{
    AttributeValue, Item, Map, Position, Spawn, SpawnCreature, Tile, TileFlags, Town, Waypoint,
};
pub use read::{
    read, read_from_slice, read_header, read_header_from_slice, MapHeader, MapLoad, ReadCounts,
};
pub use write::{write, write_to_vec, IdConversion, WriteSummary};

/// Map file identifier. Older files carry the all-zero wildcard instead.
pub const OTBM_IDENTIFIER: FileIdentifier = FileIdentifier(*b"OTBM");

pub(crate) const ACCEPTED: &[FileIdentifier] = &[OTBM_IDENTIFIER];

/// Newest map revision this crate understands.
pub const LATEST_OTBM_VERSION: u32 = 4;

#[derive(Debug, Error)]
pub enum OtbmError {
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error("map header is malformed: {0}")]
    MalformedHeader(&'static str),
    #[error("malformed generic attribute map")]
    MalformedAttributeMap,
    #[error("unknown tile attribute 0x{0:02X}")]
    UnknownTileAttribute(u8),
    #[error("id conversion requires an item catalog")]
    ConversionNeedsCatalog,
}

impl OtbmError {
    /// Errors that spoil one tile but not the file: the reader logs them and
    /// moves on. Handle-level node errors are final.
    pub(crate) fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OtbmError::Node(NodeError::EndOfNode) | OtbmError::MalformedAttributeMap
        )
    }
}

/// Progress callback: percentage done plus a phase label, invoked
/// synchronously from the read/write/convert loops.
pub type ProgressFn<'a> = &'a mut dyn FnMut(u8, &str);

pub(crate) fn report(progress: &mut Option<ProgressFn<'_>>, percent: u8, message: &str) {
    if let Some(callback) = progress {
        callback(percent, message);
    }
}
