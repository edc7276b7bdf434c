//! The per context buffer small render commands are packed into.

use std::fmt;

use crate::error::{Error, ErrorKind, Result};

use super::protocol::{self, RenderCommandHeader, RENDER_COMMAND_HEADER_SIZE};

/// Render commands waiting to be sent in a single `GLXRender` request.
///
/// Between two commands the cursor never goes past the flush limit, which
/// keeps the safe margin free so any command smaller than it can be appended
/// without checking the room left.
pub struct CommandBuffer {
    storage: Vec<u8>,
    capacity: usize,
    limit: usize,
}

impl CommandBuffer {
    /// Create the buffer of `capacity` bytes keeping `safe_margin` bytes free.
    ///
    /// A margin equal to the capacity makes every command trigger a flush.
    pub fn new(capacity: usize, safe_margin: usize) -> Self {
        Self {
            storage: Vec::with_capacity(capacity),
            capacity,
            limit: capacity.saturating_sub(safe_margin),
        }
    }

    /// Total room of the buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Once the cursor is past this offset the buffer must be flushed.
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The cursor, which is the amount of pending bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Whether `len` more bytes fit before the end of the buffer.
    #[inline]
    pub fn fits(&self, len: usize) -> bool {
        len <= self.capacity - self.storage.len()
    }

    /// Whether the cursor passed the flush limit.
    #[inline]
    pub fn needs_flush(&self) -> bool {
        self.storage.len() > self.limit
    }

    /// The pending commands.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage
    }

    /// Append raw command bytes.
    pub fn append(&mut self, command: &[u8]) -> Result<()> {
        if !self.fits(command.len()) {
            return Err(overflow(command.len()));
        }

        self.storage.extend_from_slice(command);
        Ok(())
    }

    /// Append a small render command, its header and the padded payload.
    pub fn append_command(&mut self, opcode: u16, payload: &[u8]) -> Result<()> {
        let len = small_command_len(payload.len());
        let length = u16::try_from(len).map_err(|_| overflow(len))?;
        if !self.fits(len) {
            return Err(overflow(len));
        }

        let header = RenderCommandHeader { length, opcode };
        self.storage.extend_from_slice(bytemuck::bytes_of(&header));
        self.storage.extend_from_slice(payload);
        self.storage.extend_from_slice(&protocol::PADDING[..protocol::pad_len(payload.len())]);
        Ok(())
    }

    /// Drop the pending commands, moving the cursor back to the start.
    #[inline]
    pub fn reset(&mut self) {
        self.storage.clear();
    }
}

/// Encoded size of a small render command with `payload_len` bytes of data.
#[inline]
pub fn small_command_len(payload_len: usize) -> usize {
    RENDER_COMMAND_HEADER_SIZE + protocol::padded(payload_len)
}

fn overflow(len: usize) -> Error {
    Error::new(
        None,
        Some(format!("render command of {len} bytes doesn't fit into the buffer")),
        ErrorKind::OutOfMemory,
    )
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("capacity", &self.capacity)
            .field("limit", &self.limit)
            .field("cursor", &self.storage.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_keeps_the_safe_margin() {
        let buffer = CommandBuffer::new(1024, protocol::BUFFER_SAFE_MARGIN);
        assert_eq!(buffer.limit(), 1024 - 188);
        assert!(buffer.is_empty());
        assert!(!buffer.needs_flush());
    }

    #[test]
    fn commands_are_padded() {
        let mut buffer = CommandBuffer::new(256, 64);
        buffer.append_command(0x1234, &[1, 2, 3, 4, 5]).unwrap();

        assert_eq!(buffer.len(), 12);
        assert_eq!(small_command_len(5), 12);
        let bytes = buffer.as_bytes();
        assert_eq!(&bytes[0..2], &12u16.to_ne_bytes());
        assert_eq!(&bytes[2..4], &0x1234u16.to_ne_bytes());
        assert_eq!(&bytes[4..9], &[1, 2, 3, 4, 5]);
        assert_eq!(&bytes[9..12], &[0, 0, 0]);
    }

    #[test]
    fn flush_is_requested_past_the_limit() {
        let mut buffer = CommandBuffer::new(64, 32);
        buffer.append(&[0; 32]).unwrap();
        assert!(!buffer.needs_flush());
        buffer.append(&[0; 4]).unwrap();
        assert!(buffer.needs_flush());

        buffer.reset();
        assert!(buffer.is_empty());
        assert!(!buffer.needs_flush());
    }

    #[test]
    fn single_command_mode_flushes_everything() {
        let mut buffer = CommandBuffer::new(64, 64);
        assert_eq!(buffer.limit(), 0);
        buffer.append_command(1, &[]).unwrap();
        assert!(buffer.needs_flush());
    }

    #[test]
    fn overflow_is_rejected() {
        let mut buffer = CommandBuffer::new(16, 8);
        buffer.append(&[0; 12]).unwrap();
        assert!(!buffer.fits(8));
        let err = buffer.append_command(1, &[0; 4]).unwrap_err();
        assert_eq!(err.error_kind(), ErrorKind::OutOfMemory);
        assert_eq!(buffer.len(), 12);
    }
}
