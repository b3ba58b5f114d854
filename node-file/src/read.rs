//! Read side of the node file format.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use bytes::Buf;

use crate::{FileIdentifier, NodeError, FILE_BUFFER_SIZE, NODE_END, NODE_ESCAPE, NODE_START};

/// One decoded node: a type byte plus its unescaped payload, read through a
/// forward-only cursor.
///
/// A node is produced by [`NodeReader::root_node`], [`NodeReader::first_child`]
/// or [`NodeReader::next_sibling`] and is only meaningful together with the
/// reader that produced it. The cursor never advances past the node's own
/// payload; over-reads exhaust the cursor and fail with
/// [`NodeError::EndOfNode`] instead of running into sibling data.
#[derive(Debug)]
pub struct BinaryNode {
    data: Vec<u8>,
    pos: usize,
    /// Nesting depth at which this node lives, tracked by the reader so an
    /// unvisited subtree can be skipped when advancing to a sibling.
    depth: usize,
}

impl BinaryNode {
    /// The node's type byte.
    pub fn kind(&self) -> u8 {
        self.data[0]
    }

    /// Bytes left in this node's payload.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&[u8], NodeError> {
        if len > self.data.len() - self.pos {
            self.pos = self.data.len();
            return Err(NodeError::EndOfNode);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8, NodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, NodeError> {
        Ok(self.take(2)?.get_u16_le())
    }

    pub fn get_u32(&mut self) -> Result<u32, NodeError> {
        Ok(self.take(4)?.get_u32_le())
    }

    pub fn get_u64(&mut self) -> Result<u64, NodeError> {
        Ok(self.take(8)?.get_u64_le())
    }

    /// Looks at the next payload byte without consuming it. `None` when the
    /// payload is exhausted.
    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Reads a u16 length prefix followed by that many raw bytes.
    pub fn get_string(&mut self) -> Result<String, NodeError> {
        let len = self.get_u16()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    /// Reads a u32 length prefix followed by that many raw bytes.
    pub fn get_long_string(&mut self) -> Result<String, NodeError> {
        let len = self.get_u32()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    /// Consumes `len` raw payload bytes.
    pub fn get_raw(&mut self, len: usize) -> Result<&[u8], NodeError> {
        self.take(len)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), NodeError> {
        self.take(len).map(|_| ())
    }
}

/// Buffered, single-pass reader for a node file.
///
/// The reader owns a fixed-size decode buffer refilled from the source as the
/// scan consumes it, so the whole file is never resident. Traversal is
/// depth-first and forward-only: descend with [`first_child`], move on with
/// [`next_sibling`]. Advancing past a node whose children were never visited
/// silently consumes the whole subtree. Payload buffers of passed-over nodes
/// are recycled into a spare pool.
///
/// Errors are sticky: after the first failure every call returns the same
/// error and the handle must be discarded.
///
/// [`first_child`]: NodeReader::first_child
/// [`next_sibling`]: NodeReader::next_sibling
#[derive(Debug)]
pub struct NodeReader<R: Read> {
    source: R,
    cache: Box<[u8]>,
    cache_len: usize,
    cache_pos: usize,
    /// Bytes consumed from the source so far, identifier included.
    consumed: u64,
    total: u64,
    /// Number of nodes whose end marker has not been consumed yet.
    open_depth: usize,
    /// Set when the last marker scanned was a start: the next node in the
    /// stream is a child of the node just loaded.
    last_was_start: bool,
    error: Option<NodeError>,
    spare: Vec<Vec<u8>>,
}

impl NodeReader<File> {
    /// Opens a node file on disk and validates its 4-byte identifier against
    /// `accepted`. An empty set accepts any identifier; an all-zero
    /// identifier in the file is accepted regardless.
    pub fn open(path: &Path, accepted: &[FileIdentifier]) -> Result<Self, NodeError> {
        let file = File::open(path).map_err(|e| NodeError::CouldNotOpen(e.kind()))?;
        let total = file
            .metadata()
            .map_err(|e| NodeError::CouldNotOpen(e.kind()))?
            .len();
        Self::new(file, total, accepted)
    }
}

impl<'a> NodeReader<Cursor<&'a [u8]>> {
    /// Reads a node file already resident in memory.
    pub fn from_slice(data: &'a [u8], accepted: &[FileIdentifier]) -> Result<Self, NodeError> {
        Self::new(Cursor::new(data), data.len() as u64, accepted)
    }
}

impl<R: Read> NodeReader<R> {
    pub fn new(mut source: R, total: u64, accepted: &[FileIdentifier]) -> Result<Self, NodeError> {
        let mut identifier = [0u8; 4];
        source
            .read_exact(&mut identifier)
            .map_err(|_| NodeError::Syntax("missing file identifier"))?;

        if identifier != [0; 4]
            && !accepted.is_empty()
            && !accepted.iter().any(|id| id.0 == identifier)
        {
            return Err(NodeError::InvalidIdentifier(identifier));
        }

        Ok(NodeReader {
            source,
            cache: vec![0; FILE_BUFFER_SIZE].into_boxed_slice(),
            cache_len: 0,
            cache_pos: 0,
            consumed: 4,
            total,
            open_depth: 0,
            last_was_start: false,
            error: None,
            spare: Vec::new(),
        })
    }

    /// Bytes consumed from the source so far. Together with [`len`](Self::len)
    /// this drives percent-style progress reporting.
    pub fn position(&self) -> u64 {
        self.consumed
    }

    /// Total size of the source in bytes.
    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn check(&self) -> Result<(), NodeError> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn fail<T>(&mut self, error: NodeError) -> Result<T, NodeError> {
        self.error = Some(error.clone());
        Err(error)
    }

    fn refill(&mut self) -> Result<usize, NodeError> {
        match self.source.read(&mut self.cache) {
            Ok(n) => {
                self.cache_len = n;
                self.cache_pos = 0;
                Ok(n)
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => self.refill(),
            Err(e) => self.fail(NodeError::Read(e.kind())),
        }
    }

    fn next_byte(&mut self) -> Result<u8, NodeError> {
        match self.try_next_byte()? {
            Some(b) => Ok(b),
            None => self.fail(NodeError::PrematureEnd),
        }
    }

    fn try_next_byte(&mut self) -> Result<Option<u8>, NodeError> {
        if self.cache_pos >= self.cache_len && self.refill()? == 0 {
            return Ok(None);
        }
        let b = self.cache[self.cache_pos];
        self.cache_pos += 1;
        self.consumed += 1;
        Ok(Some(b))
    }

    /// Reads the single top-level node. Must be called once, before any
    /// traversal.
    pub fn root_node(&mut self) -> Result<BinaryNode, NodeError> {
        self.check()?;
        if self.open_depth != 0 {
            return self.fail(NodeError::Syntax("root node requested twice"));
        }
        match self.next_byte()? {
            NODE_START => {
                self.open_depth = 1;
                self.load(1)
            }
            _ => self.fail(NodeError::Syntax("file does not begin with a node")),
        }
    }

    /// Descends into `parent`'s first child. Returns `None` when the parent
    /// has no children. Only valid while `parent` is the innermost node
    /// produced by this reader.
    pub fn first_child(&mut self, parent: &BinaryNode) -> Result<Option<BinaryNode>, NodeError> {
        self.check()?;
        if !self.last_was_start || self.open_depth != parent.depth {
            return Ok(None);
        }
        self.last_was_start = false;
        self.open_depth += 1;
        self.load(self.open_depth).map(Some)
    }

    /// Consumes `node` (recycling its buffer) and moves to its next sibling,
    /// skipping whatever part of `node`'s subtree was never visited. Returns
    /// `None` at the end of the sibling chain.
    pub fn next_sibling(&mut self, node: BinaryNode) -> Result<Option<BinaryNode>, NodeError> {
        self.check()?;
        let depth = node.depth;
        self.recycle(node);

        // A start marker consumed at the end of the last load opens a child
        // that was never materialized; account for it before skipping.
        if self.last_was_start {
            self.last_was_start = false;
            self.open_depth += 1;
        }

        // Consume the remainder of the subtree, escape-aware, until the
        // node's own end marker has been passed.
        while self.open_depth >= depth {
            match self.next_byte()? {
                NODE_ESCAPE => {
                    self.next_byte()?;
                }
                NODE_START => self.open_depth += 1,
                NODE_END => self.open_depth -= 1,
                _ => {}
            }
        }

        // The next marker decides: another sibling, or back to the parent.
        let op = if depth == 1 {
            // Past the top-level node the stream may simply end.
            match self.try_next_byte()? {
                Some(op) => op,
                None => return Ok(None),
            }
        } else {
            self.next_byte()?
        };

        match op {
            NODE_START => {
                self.open_depth += 1;
                self.load(self.open_depth).map(Some)
            }
            NODE_END => {
                if self.open_depth == 0 {
                    return self.fail(NodeError::Syntax("unbalanced end marker"));
                }
                self.open_depth -= 1;
                self.last_was_start = false;
                Ok(None)
            }
            _ => self.fail(NodeError::Syntax("expected a node marker between nodes")),
        }
    }

    /// Returns an abandoned node's payload buffer to the spare pool.
    pub fn recycle(&mut self, node: BinaryNode) {
        let mut buffer = node.data;
        buffer.clear();
        self.spare.push(buffer);
    }

    /// Scans the payload of the node that just started, stopping at the next
    /// unescaped marker. The first payload byte is the node's type.
    fn load(&mut self, depth: usize) -> Result<BinaryNode, NodeError> {
        let mut data = self.spare.pop().unwrap_or_else(|| Vec::with_capacity(256));

        loop {
            match self.next_byte()? {
                NODE_START => {
                    self.last_was_start = true;
                    break;
                }
                NODE_END => {
                    self.open_depth -= 1;
                    self.last_was_start = false;
                    break;
                }
                NODE_ESCAPE => {
                    let literal = self.next_byte()?;
                    data.push(literal);
                }
                byte => data.push(byte),
            }
        }

        if data.is_empty() {
            return self.fail(NodeError::Syntax("node without a type byte"));
        }

        Ok(BinaryNode { data, pos: 1, depth })
    }
}
