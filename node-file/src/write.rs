//! Write side of the node file format.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use bytes::{BufMut, BytesMut};

use crate::{FileIdentifier, NodeError, FILE_BUFFER_SIZE, NODE_END, NODE_ESCAPE, NODE_START};

/// Buffered writer for a node file.
///
/// Nodes are bracketed with [`begin_node`]/[`end_node`]; every payload byte
/// is escaped individually. The accumulation buffer flushes to the sink when
/// it reaches capacity and on [`finish`], which also checks that the nesting
/// depth returned to zero. Sink failures are sticky: once a write fails the
/// handle rejects everything and must be discarded.
///
/// [`begin_node`]: NodeWriter::begin_node
/// [`end_node`]: NodeWriter::end_node
/// [`finish`]: NodeWriter::finish
pub struct NodeWriter<W: Write> {
    sink: W,
    buffer: BytesMut,
    depth: usize,
    error: Option<NodeError>,
}

impl NodeWriter<File> {
    /// Creates a node file on disk, writing the 4-byte identifier up front.
    pub fn create(path: &Path, identifier: FileIdentifier) -> Result<Self, NodeError> {
        let file = File::create(path).map_err(|e| NodeError::CouldNotOpen(e.kind()))?;
        Self::new(file, identifier)
    }
}

impl<W: Write> NodeWriter<W> {
    pub fn new(sink: W, identifier: FileIdentifier) -> Result<Self, NodeError> {
        let mut writer = NodeWriter {
            sink,
            buffer: BytesMut::with_capacity(FILE_BUFFER_SIZE),
            depth: 0,
            error: None,
        };
        // The identifier is the only unescaped data in the file.
        writer.buffer.put_slice(&identifier.0);
        Ok(writer)
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Current node nesting depth.
    pub fn depth(&self) -> usize {
        self.depth
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

    fn raw_byte(&mut self, byte: u8) -> Result<(), NodeError> {
        self.buffer.put_u8(byte);
        if self.buffer.len() >= FILE_BUFFER_SIZE {
            self.flush_buffer()?;
        }
        Ok(())
    }

    fn escaped(&mut self, byte: u8) -> Result<(), NodeError> {
        if byte == NODE_START || byte == NODE_END || byte == NODE_ESCAPE {
            self.raw_byte(NODE_ESCAPE)?;
        }
        self.raw_byte(byte)
    }

    fn flush_buffer(&mut self) -> Result<(), NodeError> {
        match self.sink.write_all(&self.buffer) {
            Ok(()) => {
                self.buffer.clear();
                Ok(())
            }
            Err(e) => self.fail(NodeError::Write(e.kind())),
        }
    }

    /// Opens a node of the given type.
    pub fn begin_node(&mut self, kind: u8) -> Result<(), NodeError> {
        self.check()?;
        self.raw_byte(NODE_START)?;
        self.escaped(kind)?;
        self.depth += 1;
        Ok(())
    }

    /// Closes the current node. Fails without poisoning the handle when no
    /// node is open.
    pub fn end_node(&mut self) -> Result<(), NodeError> {
        self.check()?;
        if self.depth == 0 {
            return Err(NodeError::Unbalanced);
        }
        self.raw_byte(NODE_END)?;
        self.depth -= 1;
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), NodeError> {
        self.check()?;
        self.escaped(value)
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), NodeError> {
        self.check()?;
        for byte in value.to_le_bytes() {
            self.escaped(byte)?;
        }
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), NodeError> {
        self.check()?;
        for byte in value.to_le_bytes() {
            self.escaped(byte)?;
        }
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), NodeError> {
        self.check()?;
        for byte in value.to_le_bytes() {
            self.escaped(byte)?;
        }
        Ok(())
    }

    /// Writes a u16 length prefix followed by the raw bytes.
    pub fn write_string(&mut self, value: &str) -> Result<(), NodeError> {
        if value.len() > u16::MAX as usize {
            return Err(NodeError::StringTooLong);
        }
        self.write_u16(value.len() as u16)?;
        self.write_bytes(value.as_bytes())
    }

    /// Writes a u32 length prefix followed by the raw bytes.
    pub fn write_long_string(&mut self, value: &str) -> Result<(), NodeError> {
        if value.len() > u32::MAX as usize {
            return Err(NodeError::StringTooLong);
        }
        self.write_u32(value.len() as u32)?;
        self.write_bytes(value.as_bytes())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), NodeError> {
        self.check()?;
        for &byte in data {
            self.escaped(byte)?;
        }
        Ok(())
    }

    /// Flushes everything to the sink and returns it. Fails when the nesting
    /// depth never returned to zero.
    pub fn finish(mut self) -> Result<W, NodeError> {
        self.check()?;
        if self.depth != 0 {
            return Err(NodeError::Unbalanced);
        }
        self.flush_buffer()?;
        self.sink
            .flush()
            .map_err(|e| NodeError::Write(e.kind()))?;
        Ok(self.sink)
    }
}
