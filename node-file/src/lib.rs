//! Escape-encoded binary node-tree files.
//!
//! A node file is a 4-byte identifier followed by a single tree of nodes.
//! Three reserved byte values delimit the stream: `0xFE` starts a node,
//! `0xFF` ends it, and `0xFD` escapes the next byte so payload data may
//! contain the marker values. A node is a type byte plus an opaque payload;
//! children are nested between the node's start and end markers.
//!
//! The read side ([`NodeReader`]) is a single-pass cursor over a refillable
//! buffer: children are decoded on demand and traversal never looks back, so
//! memory stays bounded on files with hundreds of thousands of nodes. The
//! write side ([`NodeWriter`]) brackets nodes with `begin_node`/`end_node`
//! and escapes every payload byte.

use thiserror::Error;

mod read;
mod write;

pub use read::{BinaryNode, NodeReader};
pub use write::NodeWriter;

/// Byte that opens a node.
pub const NODE_START: u8 = 0xFE;
/// Byte that closes the current node.
pub const NODE_END: u8 = 0xFF;
/// Byte that makes the following byte literal payload data.
pub const NODE_ESCAPE: u8 = 0xFD;

/// Decode/encode buffer size for file-backed handles.
pub(crate) const FILE_BUFFER_SIZE: usize = 64 * 1024;

/// The 4-byte identifier at the start of every node file.
///
/// An all-zero identifier is a wildcard: legacy files carry it and every
/// reader accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentifier(pub [u8; 4]);

impl FileIdentifier {
    pub const WILDCARD: FileIdentifier = FileIdentifier([0; 4]);

    pub fn is_wildcard(&self) -> bool {
        self.0 == [0; 4]
    }
}

impl From<&[u8; 4]> for FileIdentifier {
    fn from(bytes: &[u8; 4]) -> Self {
        FileIdentifier(*bytes)
    }
}

/// Errors raised by node file handles.
///
/// Handle-level errors are sticky: once a [`NodeReader`] or [`NodeWriter`]
/// reports one, every later call on that handle fails with the same error
/// and the handle must be discarded. Node cursor errors
/// ([`EndOfNode`](NodeError::EndOfNode)) only exhaust the one node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("could not open file: {0}")]
    CouldNotOpen(std::io::ErrorKind),
    #[error("file identifier {0:02X?} not recognized")]
    InvalidIdentifier([u8; 4]),
    #[error("string too long for its length prefix")]
    StringTooLong,
    #[error("failed to read from source: {0}")]
    Read(std::io::ErrorKind),
    #[error("failed to write to sink: {0}")]
    Write(std::io::ErrorKind),
    #[error("node file syntax error: {0}")]
    Syntax(&'static str),
    #[error("file end encountered unexpectedly")]
    PrematureEnd,
    #[error("read past the end of the node payload")]
    EndOfNode,
    #[error("unbalanced node nesting")]
    Unbalanced,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tree(payloads: &[&[u8]]) -> Vec<u8> {
        // One root (kind 0) with one child per payload (kind = index + 1).
        let mut writer = NodeWriter::new(Vec::new(), FileIdentifier(*b"TEST")).unwrap();
        writer.begin_node(0).unwrap();
        for (i, payload) in payloads.iter().enumerate() {
            writer.begin_node(i as u8 + 1).unwrap();
            writer.write_bytes(payload).unwrap();
            writer.end_node().unwrap();
        }
        writer.end_node().unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn escape_round_trip() {
        // Payloads full of marker values must come back byte for byte.
        let nasty: &[&[u8]] = &[
            &[NODE_START, NODE_END, NODE_ESCAPE],
            &[NODE_ESCAPE, NODE_ESCAPE, 0x00, NODE_START],
            &[0xFD, 0xFE, 0xFF, 0xFD, 0xFE, 0xFF],
            b"plain data with no markers",
        ];

        let bytes = write_tree(nasty);
        let mut file = NodeReader::from_slice(&bytes, &[FileIdentifier(*b"TEST")]).unwrap();
        let root = file.root_node().unwrap();
        assert_eq!(root.kind(), 0);

        let mut child = file.first_child(&root).unwrap();
        for (i, payload) in nasty.iter().enumerate() {
            let mut node = child.expect("missing child");
            assert_eq!(node.kind(), i as u8 + 1);
            assert_eq!(node.get_raw(node.remaining()).unwrap(), *payload);
            child = file.next_sibling(node).unwrap();
        }
        assert!(child.is_none());
    }

    #[test]
    fn sibling_skip_without_descending() {
        // next_sibling must consume an unvisited subtree.
        let mut writer = NodeWriter::new(Vec::new(), FileIdentifier::WILDCARD).unwrap();
        writer.begin_node(0).unwrap();
        writer.begin_node(1).unwrap();
        writer.begin_node(2).unwrap();
        writer.begin_node(3).unwrap();
        writer.write_u64(0xFDFEFFFDFEFFFDFE).unwrap();
        writer.end_node().unwrap();
        writer.end_node().unwrap();
        writer.end_node().unwrap();
        writer.begin_node(4).unwrap();
        writer.write_u16(0xBEEF).unwrap();
        writer.end_node().unwrap();
        writer.end_node().unwrap();
        let bytes = writer.finish().unwrap();

        let mut file = NodeReader::from_slice(&bytes, &[]).unwrap();
        let root = file.root_node().unwrap();
        let deep = file.first_child(&root).unwrap().unwrap();
        assert_eq!(deep.kind(), 1);
        let mut sibling = file.next_sibling(deep).unwrap().unwrap();
        assert_eq!(sibling.kind(), 4);
        assert_eq!(sibling.get_u16().unwrap(), 0xBEEF);
        assert!(file.next_sibling(sibling).unwrap().is_none());
    }

    #[test]
    fn depth_balance() {
        let mut writer = NodeWriter::new(Vec::new(), FileIdentifier::WILDCARD).unwrap();
        assert_eq!(writer.end_node(), Err(NodeError::Unbalanced));
        writer.begin_node(0).unwrap();
        writer.end_node().unwrap();
        assert_eq!(writer.end_node(), Err(NodeError::Unbalanced));
        assert!(writer.is_ok());
        writer.finish().unwrap();
    }

    #[test]
    fn unclosed_node_fails_finish() {
        let mut writer = NodeWriter::new(Vec::new(), FileIdentifier::WILDCARD).unwrap();
        writer.begin_node(0).unwrap();
        assert_eq!(writer.finish().unwrap_err(), NodeError::Unbalanced);
    }

    #[test]
    fn truncated_file_is_premature_end() {
        let mut bytes = write_tree(&[b"some payload"]);
        // Drop the root's end marker.
        bytes.truncate(bytes.len() - 1);

        let mut file = NodeReader::from_slice(&bytes, &[]).unwrap();
        let root = file.root_node().unwrap();
        let node = file.first_child(&root).unwrap().unwrap();
        assert_eq!(file.next_sibling(node).unwrap_err(), NodeError::PrematureEnd);

        // Truncating inside a payload fails while loading the node itself.
        let mut bytes = write_tree(&[b"some payload"]);
        bytes.truncate(bytes.len() - 6);
        let mut file = NodeReader::from_slice(&bytes, &[]).unwrap();
        let root = file.root_node().unwrap();
        assert_eq!(file.first_child(&root).unwrap_err(), NodeError::PrematureEnd);
        // The handle stays poisoned.
        assert_eq!(file.first_child(&root).unwrap_err(), NodeError::PrematureEnd);
    }

    #[test]
    fn identifier_checking() {
        let bytes = write_tree(&[]);
        assert_eq!(
            NodeReader::from_slice(&bytes, &[FileIdentifier(*b"OTBM")]).unwrap_err(),
            NodeError::InvalidIdentifier(*b"TEST")
        );
        // Empty accepted set takes anything.
        assert!(NodeReader::from_slice(&bytes, &[]).is_ok());

        // All-zero identifiers are wildcards.
        let mut writer = NodeWriter::new(Vec::new(), FileIdentifier::WILDCARD).unwrap();
        writer.begin_node(0).unwrap();
        writer.end_node().unwrap();
        let legacy = writer.finish().unwrap();
        assert!(NodeReader::from_slice(&legacy, &[FileIdentifier(*b"OTBM")]).is_ok());
    }

    #[test]
    fn cursor_over_read_fails_cleanly() {
        let bytes = write_tree(&[&[1, 2, 3]]);
        let mut file = NodeReader::from_slice(&bytes, &[]).unwrap();
        let root = file.root_node().unwrap();
        let mut node = file.first_child(&root).unwrap().unwrap();
        assert_eq!(node.get_u16().unwrap(), 0x0201);
        assert_eq!(node.get_u32(), Err(NodeError::EndOfNode));
        assert_eq!(node.remaining(), 0);
        // A cursor error does not poison the handle.
        assert!(file.next_sibling(node).unwrap().is_none());
    }

    #[test]
    fn strings_and_integers() {
        let mut writer = NodeWriter::new(Vec::new(), FileIdentifier::WILDCARD).unwrap();
        writer.begin_node(7).unwrap();
        writer.write_u8(0xFE).unwrap();
        writer.write_u16(0xFFFD).unwrap();
        writer.write_u32(0xDEADBEEF).unwrap();
        writer.write_u64(u64::MAX).unwrap();
        writer.write_string("hello node").unwrap();
        writer.write_long_string("long one").unwrap();
        writer.end_node().unwrap();
        let bytes = writer.finish().unwrap();

        let mut file = NodeReader::from_slice(&bytes, &[]).unwrap();
        let mut root = file.root_node().unwrap();
        assert_eq!(root.kind(), 7);
        assert_eq!(root.get_u8().unwrap(), 0xFE);
        assert_eq!(root.get_u16().unwrap(), 0xFFFD);
        assert_eq!(root.get_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(root.get_u64().unwrap(), u64::MAX);
        assert_eq!(root.get_string().unwrap(), "hello node");
        assert_eq!(root.get_long_string().unwrap(), "long one");
        assert_eq!(root.remaining(), 0);
    }

    #[test]
    fn disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.bin");

        let mut writer = NodeWriter::create(&path, FileIdentifier(*b"TEST")).unwrap();
        writer.begin_node(0).unwrap();
        writer.write_u32(42).unwrap();
        writer.begin_node(9).unwrap();
        writer.write_string("child").unwrap();
        writer.end_node().unwrap();
        writer.end_node().unwrap();
        writer.finish().unwrap();

        let mut file = NodeReader::open(&path, &[FileIdentifier(*b"TEST")]).unwrap();
        let mut root = file.root_node().unwrap();
        assert_eq!(root.get_u32().unwrap(), 42);
        let mut child = file.first_child(&root).unwrap().unwrap();
        assert_eq!(child.kind(), 9);
        assert_eq!(child.get_string().unwrap(), "child");
    }
}
