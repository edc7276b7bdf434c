//! Everything sent to the server goes through the [`Transmitter`].

use std::fmt;
use std::io::IoSlice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::connection::{Connection, ContextTag, ExtensionInfo};
use crate::error::{Error, ErrorKind, Result};

use super::command_buffer::CommandBuffer;
use super::protocol::{
    self, LargeRenderCommandHeader, RenderLargeReq, RenderReq, RequestHeader,
    LARGE_RENDER_COMMAND_HEADER_SIZE, MAX_REQUEST_BYTES, RENDER_HEADER_SIZE,
    RENDER_LARGE_HEADER_SIZE, X_GLX_RENDER, X_GLX_RENDER_LARGE,
};

/// Sends requests over a single connection.
///
/// Once a transfer fails midway the connection is marked broken and every
/// later request fails right away, since the server's view of the request
/// stream can't be trusted anymore.
pub(crate) struct Transmitter {
    connection: Arc<dyn Connection>,
    extension: ExtensionInfo,
    max_chunk: usize,
    broken: AtomicBool,
}

impl Transmitter {
    /// The chunk size of large commands derives from `buffer_capacity`, the
    /// capacity of the render buffers flushed through this transmitter.
    pub(crate) fn new(
        connection: Arc<dyn Connection>,
        extension: ExtensionInfo,
        buffer_capacity: usize,
    ) -> Self {
        let max_chunk = max_chunk_size(buffer_capacity);
        Self { connection, extension, max_chunk, broken: AtomicBool::new(false) }
    }

    #[inline]
    pub(crate) fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    #[inline]
    pub(crate) fn major_opcode(&self) -> u8 {
        self.extension.major_opcode
    }

    #[inline]
    pub(crate) fn first_error(&self) -> u8 {
        self.extension.first_error
    }

    /// The largest piece of a large command a single request carries.
    #[inline]
    pub(crate) fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    #[inline]
    pub(crate) fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    fn check(&self) -> Result<()> {
        if self.is_broken() {
            Err(Error::new(
                None,
                Some(String::from("the connection broke during an earlier transfer")),
                ErrorKind::ConnectionLost,
            ))
        } else {
            Ok(())
        }
    }

    fn mark_broken(&self, err: Error) -> Error {
        warn!("marking the connection broken: {err}");
        self.broken.store(true, Ordering::Release);
        err
    }

    /// Send a single fixed size request.
    pub(crate) fn send(&self, request: &[u8]) -> Result<()> {
        self.check()?;
        self.connection
            .send_request(&[IoSlice::new(request)])
            .map_err(|err| self.mark_broken(Error::connection(&err)))
    }

    /// Send the request and wait for its reply.
    pub(crate) fn request_reply(&self, request: &[u8]) -> Result<Vec<u8>> {
        self.check()?;
        self.connection
            .request_reply(&[IoSlice::new(request)])
            .map_err(|err| self.mark_broken(Error::connection(&err)))
    }

    /// Ship the buffered commands in a single `GLXRender` request.
    ///
    /// Nothing is sent for an empty buffer. The buffer is emptied even when
    /// sending fails, and a buffer that couldn't be sent breaks the
    /// connection.
    pub(crate) fn flush(&self, buffer: &mut CommandBuffer, tag: ContextTag) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        let result = self.send_render(buffer.as_bytes(), tag).map_err(|err| {
            if err.is_connection_error() {
                return err;
            }

            self.mark_broken(Error::new(
                None,
                Some(format!("lost {} bytes of render commands: {err}", buffer.len())),
                ErrorKind::ConnectionLost,
            ))
        });
        buffer.reset();
        result
    }

    fn send_render(&self, commands: &[u8], tag: ContextTag) -> Result<()> {
        self.check()?;

        let header = RequestHeader::new(
            self.extension.major_opcode,
            X_GLX_RENDER,
            RENDER_HEADER_SIZE + commands.len(),
        )?;
        let request = RenderReq { header, context_tag: tag.raw() };
        trace!("flushing {} bytes of render commands with tag {}", commands.len(), tag.raw());

        let parts = [
            IoSlice::new(bytemuck::bytes_of(&request)),
            IoSlice::new(commands),
            IoSlice::new(&protocol::PADDING[..protocol::pad_len(commands.len())]),
        ];
        self.connection
            .send_request(&parts)
            .map_err(|err| self.mark_broken(Error::connection(&err)))
    }

    /// Send the command with the large header in as many `GLXRenderLarge`
    /// requests as needed.
    ///
    /// The pending buffer is flushed first, so the command keeps its place in
    /// the command stream.
    pub(crate) fn send_large_command(
        &self,
        buffer: &mut CommandBuffer,
        tag: ContextTag,
        opcode: u32,
        payload: &[u8],
    ) -> Result<()> {
        self.flush(buffer, tag)?;

        let length = u32::try_from(LARGE_RENDER_COMMAND_HEADER_SIZE + protocol::padded(payload.len()))
            .map_err(|_| ErrorKind::BadRequest)?;
        let header = LargeRenderCommandHeader { length, opcode };
        self.send_large(tag, bytemuck::bytes_of(&header), payload)
    }

    /// Split `header` followed by `payload` into `GLXRenderLarge` requests.
    ///
    /// All the requests are handed to the connection in one go, so no other
    /// request gets between them.
    pub(crate) fn send_large(&self, tag: ContextTag, header: &[u8], payload: &[u8]) -> Result<()> {
        self.check()?;

        let chunks = LargeChunks::new(header, payload, self.max_chunk)?;
        if chunks.is_empty() {
            return Ok(());
        }

        debug!(
            "sending {} byte large command in {} requests",
            header.len() + payload.len(),
            chunks.len()
        );

        let mut requests = Vec::with_capacity(chunks.len());
        for chunk in chunks.iter() {
            let data_bytes = chunk.len();
            let header = RequestHeader::new(
                self.extension.major_opcode,
                X_GLX_RENDER_LARGE,
                RENDER_LARGE_HEADER_SIZE + data_bytes,
            )?;
            let request = RenderLargeReq {
                header,
                context_tag: tag.raw(),
                request_number: chunk.number,
                request_total: chunk.total,
                data_bytes: data_bytes as u32,
            };
            requests.push((request, chunk));
        }

        let parts: Vec<[IoSlice<'_>; 4]> = requests
            .iter()
            .map(|(request, chunk)| {
                [
                    IoSlice::new(bytemuck::bytes_of(request)),
                    IoSlice::new(chunk.header),
                    IoSlice::new(chunk.payload),
                    IoSlice::new(&protocol::PADDING[..protocol::pad_len(chunk.len())]),
                ]
            })
            .collect();
        let parts: Vec<&[IoSlice<'_>]> = parts.iter().map(|parts| &parts[..]).collect();

        self.connection
            .send_requests(&parts)
            .map_err(|err| self.mark_broken(Error::connection(&err)))
    }
}

impl fmt::Debug for Transmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transmitter")
            .field("extension", &self.extension)
            .field("max_chunk", &self.max_chunk)
            .field("broken", &self.is_broken())
            .finish()
    }
}

/// The render buffer capacity for a server accepting `max_request_bytes`.
///
/// The request length is a 16 bit word count, so larger server limits are
/// of no use.
#[inline]
pub(crate) fn buffer_capacity(max_request_bytes: usize) -> usize {
    max_request_bytes.min(MAX_REQUEST_BYTES).saturating_sub(RENDER_HEADER_SIZE)
}

/// The largest chunk a `GLXRenderLarge` request carries, so the request
/// is no larger than a flushed render buffer.
///
/// Every chunk but the last is a whole number of words.
#[inline]
pub(crate) fn max_chunk_size(buffer_capacity: usize) -> usize {
    let request = (buffer_capacity + RENDER_HEADER_SIZE).min(MAX_REQUEST_BYTES);
    (request.saturating_sub(RENDER_LARGE_HEADER_SIZE) & !3).max(4)
}

/// The split of a large command into request sized pieces.
///
/// The header and the payload are treated as one byte stream: the first
/// chunk carries the header followed by as much payload as fits, every
/// other chunk carries the next `max_chunk` bytes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LargeChunks<'a> {
    header: &'a [u8],
    payload: &'a [u8],
    max_chunk: usize,
    total: u16,
}

impl<'a> LargeChunks<'a> {
    pub(crate) fn new(header: &'a [u8], payload: &'a [u8], max_chunk: usize) -> Result<Self> {
        let len = header.len() + payload.len();
        let total = if max_chunk == 0 { 0 } else { (len + max_chunk - 1) / max_chunk };
        let total = u16::try_from(total).map_err(|_| {
            Error::new(
                None,
                Some(format!("a command of {len} bytes needs more than 65535 requests")),
                ErrorKind::BadRequest,
            )
        })?;

        Ok(Self { header, payload, max_chunk, total })
    }

    /// The amount of requests.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.total as usize
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = Chunk<'a>> + '_ {
        (0..self.total).map(move |index| self.chunk(index))
    }

    fn chunk(&self, index: u16) -> Chunk<'a> {
        let header_len = self.header.len();
        let stream_len = header_len + self.payload.len();
        let start = index as usize * self.max_chunk;
        let end = (start + self.max_chunk).min(stream_len);

        Chunk {
            number: index + 1,
            total: self.total,
            header: &self.header[start.min(header_len)..end.min(header_len)],
            payload: &self.payload[start.saturating_sub(header_len)..end.saturating_sub(header_len)],
        }
    }
}

/// A single `GLXRenderLarge` request worth of data.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Chunk<'a> {
    /// One based number of the request.
    pub number: u16,
    pub total: u16,
    pub header: &'a [u8],
    pub payload: &'a [u8],
}

impl Chunk<'_> {
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.header.len() + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(header: &[u8], payload: &[u8], max_chunk: usize) -> Vec<u8> {
        let chunks = LargeChunks::new(header, payload, max_chunk).unwrap();
        let mut stream = Vec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.number as usize, index + 1);
            assert_eq!(chunk.total as usize, chunks.len());
            assert!(chunk.len() <= max_chunk);
            assert!(chunk.len() > 0);
            stream.extend_from_slice(chunk.header);
            stream.extend_from_slice(chunk.payload);
        }
        stream
    }

    #[test]
    fn chunk_counts_around_the_boundary() {
        let max_chunk = 64;
        for len in [0, 1, max_chunk - 1, max_chunk, max_chunk + 1, 10 * max_chunk + 7] {
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let chunks = LargeChunks::new(&[], &payload, max_chunk).unwrap();
            assert_eq!(chunks.len(), (len + max_chunk - 1) / max_chunk, "len {len}");
            assert_eq!(collect(&[], &payload, max_chunk), payload);
        }
    }

    #[test]
    fn last_chunk_carries_the_remainder() {
        let payload = vec![7u8; 10 * 64 + 7];
        let chunks = LargeChunks::new(&[], &payload, 64).unwrap();
        let sizes: Vec<usize> = chunks.iter().map(|chunk| chunk.len()).collect();
        assert_eq!(sizes.len(), 11);
        assert!(sizes[..10].iter().all(|&size| size == 64));
        assert_eq!(sizes[10], 7);
    }

    #[test]
    fn header_shares_the_first_chunk() {
        let header = [0xaa; 8];
        let payload: Vec<u8> = (0..100).collect();
        let chunks = LargeChunks::new(&header, &payload, 32).unwrap();
        assert_eq!(chunks.len(), 4);

        let first = chunks.iter().next().unwrap();
        assert_eq!(first.header, &header);
        assert_eq!(first.payload, &payload[..24]);

        let mut expected = header.to_vec();
        expected.extend_from_slice(&payload);
        assert_eq!(collect(&header, &payload, 32), expected);
    }

    #[test]
    fn header_larger_than_a_chunk() {
        let header = [1u8; 10];
        let chunks = LargeChunks::new(&header, &[2, 3], 4).unwrap();
        let pieces: Vec<(usize, usize)> =
            chunks.iter().map(|chunk| (chunk.header.len(), chunk.payload.len())).collect();
        assert_eq!(pieces, vec![(4, 0), (4, 0), (2, 2)]);
    }

    #[test]
    fn too_many_chunks_are_rejected() {
        let payload = vec![0u8; 65536 * 4 + 1];
        let err = LargeChunks::new(&[], &payload, 4).unwrap_err();
        assert_eq!(err.error_kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn limits_follow_the_request_size() {
        assert_eq!(buffer_capacity(262140), 262132);
        assert_eq!(max_chunk_size(262132), 262124);
    }

    #[test]
    fn limits_fit_the_length_field() {
        assert_eq!(buffer_capacity(1 << 20), 262132);
        assert_eq!(max_chunk_size(buffer_capacity(1 << 20)), 262124);
        assert_eq!(max_chunk_size(usize::MAX / 2), 262124);
    }

    #[test]
    fn chunks_follow_a_capped_buffer() {
        assert_eq!(max_chunk_size(1024), 1016);
        assert_eq!(max_chunk_size(1023), 1012);
        assert_eq!(max_chunk_size(0), 4);
    }

    struct Sink;

    impl Connection for Sink {
        fn glx_extension(&self) -> Option<ExtensionInfo> {
            None
        }

        fn maximum_request_bytes(&self) -> usize {
            MAX_REQUEST_BYTES
        }

        fn generate_id(&self) -> u32 {
            1
        }

        fn screen_count(&self) -> usize {
            1
        }

        fn send_requests(&self, _requests: &[&[IoSlice<'_>]]) -> std::io::Result<()> {
            Ok(())
        }

        fn request_reply(&self, _request: &[IoSlice<'_>]) -> std::io::Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn unframable_flush_breaks_the_connection() {
        let extension = ExtensionInfo { major_opcode: 140, first_error: 160 };
        let transmitter = Transmitter::new(Arc::new(Sink), extension, 1 << 20);
        let mut buffer = CommandBuffer::new(1 << 20, 0);
        buffer.append(&vec![0; MAX_REQUEST_BYTES]).unwrap();

        let err = transmitter.flush(&mut buffer, ContextTag(1)).unwrap_err();
        assert!(err.is_connection_error());
        assert!(transmitter.is_broken());
        assert!(buffer.is_empty());

        buffer.append(&[0; 4]).unwrap();
        let err = transmitter.flush(&mut buffer, ContextTag(1)).unwrap_err();
        assert_eq!(err.error_kind(), ErrorKind::ConnectionLost);
    }
}
