//! GLX wire layouts.
//!
//! Every request starts with the major opcode of the extension, the GLX
//! minor opcode and the request length in 4 byte units. Fields use the client
//! byte order, the server swaps when needed.

use std::mem;

use bytemuck::{Pod, Zeroable};

use crate::error::{Error, ErrorKind, Result};

pub(crate) const X_GLX_RENDER: u8 = 1;
pub(crate) const X_GLX_RENDER_LARGE: u8 = 2;
pub(crate) const X_GLX_CREATE_CONTEXT: u8 = 3;
pub(crate) const X_GLX_DESTROY_CONTEXT: u8 = 4;
pub(crate) const X_GLX_MAKE_CURRENT: u8 = 5;
pub(crate) const X_GLX_IS_DIRECT: u8 = 6;
pub(crate) const X_GLX_QUERY_VERSION: u8 = 7;
pub(crate) const X_GLX_WAIT_GL: u8 = 8;
pub(crate) const X_GLX_WAIT_X: u8 = 9;
pub(crate) const X_GLX_COPY_CONTEXT: u8 = 10;
pub(crate) const X_GLX_VENDOR_PRIVATE_WITH_REPLY: u8 = 17;
pub(crate) const X_GLX_CREATE_NEW_CONTEXT: u8 = 24;
pub(crate) const X_GLX_QUERY_CONTEXT: u8 = 25;
pub(crate) const X_GLX_MAKE_CONTEXT_CURRENT: u8 = 26;

pub(crate) const X_GLXVOP_QUERY_CONTEXT_INFO_EXT: u32 = 1024;
pub(crate) const X_GLXVOP_MAKE_CURRENT_READ_SGI: u32 = 65537;
pub(crate) const X_GLXVOP_CREATE_CONTEXT_WITH_CONFIG_SGIX: u32 = 65540;

/// Size of the `GLXRender` request header.
pub const RENDER_HEADER_SIZE: usize = mem::size_of::<RenderReq>();

/// Size of the `GLXRenderLarge` request header.
pub const RENDER_LARGE_HEADER_SIZE: usize = mem::size_of::<RenderLargeReq>();

/// Room kept free at the end of the render buffer, the largest fixed size
/// command always fits into it.
pub const BUFFER_SAFE_MARGIN: usize = 188;

/// Commands above this size always travel as large commands.
pub const RENDER_COMMAND_SIZE_LIMIT: usize = 4096;

/// Size of the small render command header.
pub const RENDER_COMMAND_HEADER_SIZE: usize = mem::size_of::<RenderCommandHeader>();

/// Size of the large render command header.
pub const LARGE_RENDER_COMMAND_HEADER_SIZE: usize = mem::size_of::<LargeRenderCommandHeader>();

/// Size of every reply without its trailing words.
pub(crate) const REPLY_SIZE: usize = 32;

/// `GLX_SHARE_CONTEXT_EXT`.
pub(crate) const GLX_SHARE_CONTEXT_EXT: u32 = 0x800a;
/// `GLX_VISUAL_ID_EXT`.
pub(crate) const GLX_VISUAL_ID_EXT: u32 = 0x800b;
/// `GLX_SCREEN_EXT`.
pub(crate) const GLX_SCREEN_EXT: u32 = 0x800c;
/// `GLX_FBCONFIG_ID`.
pub(crate) const GLX_FBCONFIG_ID: u32 = 0x8013;
/// `GLX_RENDER_TYPE`.
pub(crate) const GLX_RENDER_TYPE: u32 = 0x8011;

// Core X errors.
const BAD_REQUEST: u8 = 1;
const BAD_VALUE: u8 = 2;
const BAD_WINDOW: u8 = 3;
const BAD_PIXMAP: u8 = 4;
const BAD_MATCH: u8 = 8;
const BAD_DRAWABLE: u8 = 9;
const BAD_ACCESS: u8 = 10;
const BAD_ALLOC: u8 = 11;
const BAD_ID_CHOICE: u8 = 14;
const BAD_LENGTH: u8 = 16;

// GLX errors, relative to the extension's first error.
const GLX_BAD_CONTEXT: u8 = 0;
const GLX_BAD_CONTEXT_STATE: u8 = 1;
const GLX_BAD_DRAWABLE: u8 = 2;
const GLX_BAD_PIXMAP: u8 = 3;
const GLX_BAD_CONTEXT_TAG: u8 = 4;
const GLX_BAD_CURRENT_WINDOW: u8 = 5;
const GLX_BAD_RENDER_REQUEST: u8 = 6;
const GLX_BAD_LARGE_REQUEST: u8 = 7;
const GLX_UNSUPPORTED_PRIVATE_REQUEST: u8 = 8;
const GLX_BAD_FBCONFIG: u8 = 9;
const GLX_BAD_PBUFFER: u8 = 10;
const GLX_BAD_CURRENT_DRAWABLE: u8 = 11;
const GLX_BAD_WINDOW: u8 = 12;

/// Zeroes requests are padded with.
pub(crate) static PADDING: [u8; 3] = [0; 3];

/// Bytes needed to pad `len` to the 4 byte boundary.
#[inline]
pub(crate) fn pad_len(len: usize) -> usize {
    (4 - (len & 3)) & 3
}

/// `len` rounded up to the 4 byte boundary.
#[inline]
pub(crate) fn padded(len: usize) -> usize {
    len + pad_len(len)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub(crate) struct RequestHeader {
    pub major_opcode: u8,
    pub glx_code: u8,
    /// Length of the whole request in 4 byte units.
    pub length: u16,
}

impl RequestHeader {
    /// Header for a request of `total` bytes, including the header itself.
    pub(crate) fn new(major_opcode: u8, glx_code: u8, total: usize) -> Result<Self> {
        let length = u16::try_from(padded(total) / 4).map_err(|_| {
            Error::new(None, Some(format!("request of {total} bytes is too long")), ErrorKind::BadRequest)
        })?;
        Ok(Self { major_opcode, glx_code, length })
    }
}

/// The largest request the 16 bit length field can describe.
pub const MAX_REQUEST_BYTES: usize = u16::MAX as usize * 4;

/// Header of a request with no trailing data.
fn fixed_header<T>(major_opcode: u8, glx_code: u8) -> RequestHeader {
    let words = (mem::size_of::<T>() / 4) as u16;
    RequestHeader { major_opcode, glx_code, length: words }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct RenderReq {
    pub header: RequestHeader,
    pub context_tag: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct RenderLargeReq {
    pub header: RequestHeader,
    pub context_tag: u32,
    pub request_number: u16,
    pub request_total: u16,
    pub data_bytes: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct RenderCommandHeader {
    pub length: u16,
    pub opcode: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct LargeRenderCommandHeader {
    pub length: u32,
    pub opcode: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct CreateContextReq {
    pub header: RequestHeader,
    pub context: u32,
    pub visual: u32,
    pub screen: u32,
    pub share_list: u32,
    pub is_direct: u8,
    pub pad: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct CreateNewContextReq {
    pub header: RequestHeader,
    pub context: u32,
    pub fbconfig: u32,
    pub screen: u32,
    pub render_type: u32,
    pub share_list: u32,
    pub is_direct: u8,
    pub pad: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct CreateContextWithConfigSgixReq {
    pub header: RequestHeader,
    pub vendor_code: u32,
    pub context_tag: u32,
    pub context: u32,
    pub fbconfig: u32,
    pub screen: u32,
    pub render_type: u32,
    pub share_list: u32,
    pub is_direct: u8,
    pub pad: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct ContextReq {
    pub header: RequestHeader,
    pub context: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct MakeCurrentReq {
    pub header: RequestHeader,
    pub drawable: u32,
    pub context: u32,
    pub old_context_tag: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct MakeContextCurrentReq {
    pub header: RequestHeader,
    pub old_context_tag: u32,
    pub drawable: u32,
    pub read_drawable: u32,
    pub context: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct MakeCurrentReadSgiReq {
    pub header: RequestHeader,
    pub vendor_code: u32,
    pub old_context_tag: u32,
    pub drawable: u32,
    pub readable: u32,
    pub context: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct QueryVersionReq {
    pub header: RequestHeader,
    pub major_version: u32,
    pub minor_version: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct TaggedReq {
    pub header: RequestHeader,
    pub context_tag: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct CopyContextReq {
    pub header: RequestHeader,
    pub source: u32,
    pub dest: u32,
    pub mask: u32,
    pub context_tag: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct QueryContextInfoExtReq {
    pub header: RequestHeader,
    pub vendor_code: u32,
    pub context_tag: u32,
    pub context: u32,
}

impl CreateContextReq {
    pub(crate) fn new(
        major_opcode: u8,
        context: u32,
        visual: u32,
        screen: u32,
        share_list: u32,
        is_direct: bool,
    ) -> Self {
        Self {
            header: fixed_header::<Self>(major_opcode, X_GLX_CREATE_CONTEXT),
            context,
            visual,
            screen,
            share_list,
            is_direct: is_direct as u8,
            pad: [0; 3],
        }
    }
}

impl CreateNewContextReq {
    pub(crate) fn new(
        major_opcode: u8,
        context: u32,
        fbconfig: u32,
        screen: u32,
        render_type: u32,
        share_list: u32,
        is_direct: bool,
    ) -> Self {
        Self {
            header: fixed_header::<Self>(major_opcode, X_GLX_CREATE_NEW_CONTEXT),
            context,
            fbconfig,
            screen,
            render_type,
            share_list,
            is_direct: is_direct as u8,
            pad: [0; 3],
        }
    }
}

impl CreateContextWithConfigSgixReq {
    pub(crate) fn new(
        major_opcode: u8,
        context: u32,
        fbconfig: u32,
        screen: u32,
        render_type: u32,
        share_list: u32,
        is_direct: bool,
    ) -> Self {
        Self {
            header: fixed_header::<Self>(major_opcode, X_GLX_VENDOR_PRIVATE_WITH_REPLY),
            vendor_code: X_GLXVOP_CREATE_CONTEXT_WITH_CONFIG_SGIX,
            context_tag: 0,
            context,
            fbconfig,
            screen,
            render_type,
            share_list,
            is_direct: is_direct as u8,
            pad: [0; 3],
        }
    }
}

impl ContextReq {
    pub(crate) fn new(major_opcode: u8, glx_code: u8, context: u32) -> Self {
        Self { header: fixed_header::<Self>(major_opcode, glx_code), context }
    }
}

impl MakeCurrentReq {
    pub(crate) fn new(major_opcode: u8, drawable: u32, context: u32, old_context_tag: u32) -> Self {
        Self {
            header: fixed_header::<Self>(major_opcode, X_GLX_MAKE_CURRENT),
            drawable,
            context,
            old_context_tag,
        }
    }
}

impl MakeContextCurrentReq {
    pub(crate) fn new(
        major_opcode: u8,
        old_context_tag: u32,
        drawable: u32,
        read_drawable: u32,
        context: u32,
    ) -> Self {
        Self {
            header: fixed_header::<Self>(major_opcode, X_GLX_MAKE_CONTEXT_CURRENT),
            old_context_tag,
            drawable,
            read_drawable,
            context,
        }
    }
}

impl MakeCurrentReadSgiReq {
    pub(crate) fn new(
        major_opcode: u8,
        old_context_tag: u32,
        drawable: u32,
        readable: u32,
        context: u32,
    ) -> Self {
        Self {
            header: fixed_header::<Self>(major_opcode, X_GLX_VENDOR_PRIVATE_WITH_REPLY),
            vendor_code: X_GLXVOP_MAKE_CURRENT_READ_SGI,
            old_context_tag,
            drawable,
            readable,
            context,
        }
    }
}

impl QueryVersionReq {
    pub(crate) fn new(major_opcode: u8, major_version: u32, minor_version: u32) -> Self {
        Self {
            header: fixed_header::<Self>(major_opcode, X_GLX_QUERY_VERSION),
            major_version,
            minor_version,
        }
    }
}

impl TaggedReq {
    pub(crate) fn new(major_opcode: u8, glx_code: u8, context_tag: u32) -> Self {
        Self { header: fixed_header::<Self>(major_opcode, glx_code), context_tag }
    }
}

impl CopyContextReq {
    pub(crate) fn new(
        major_opcode: u8,
        source: u32,
        dest: u32,
        mask: u32,
        context_tag: u32,
    ) -> Self {
        Self {
            header: fixed_header::<Self>(major_opcode, X_GLX_COPY_CONTEXT),
            source,
            dest,
            mask,
            context_tag,
        }
    }
}

impl QueryContextInfoExtReq {
    pub(crate) fn new(major_opcode: u8, context: u32) -> Self {
        Self {
            header: fixed_header::<Self>(major_opcode, X_GLX_VENDOR_PRIVATE_WITH_REPLY),
            vendor_code: X_GLXVOP_QUERY_CONTEXT_INFO_EXT,
            context_tag: 0,
            context,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct ReplyHeader {
    pub response_type: u8,
    pub pad: u8,
    pub sequence: u16,
    /// Words following the 32 byte reply.
    pub length: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct MakeCurrentReply {
    pub header: ReplyHeader,
    pub context_tag: u32,
    pub pad: [u32; 5],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct QueryVersionReply {
    pub header: ReplyHeader,
    pub major_version: u32,
    pub minor_version: u32,
    pub pad: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct IsDirectReply {
    pub header: ReplyHeader,
    pub is_direct: u8,
    pub pad: [u8; 23],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct QueryContextReply {
    pub header: ReplyHeader,
    /// Amount of attribute/value pairs following the reply.
    pub n: u32,
    pub pad: [u32; 5],
}

/// Decode the fixed part of a reply, turning error replies into errors.
pub(crate) fn parse_reply<T: Pod>(bytes: &[u8], first_error: u8) -> Result<T> {
    match bytes.first() {
        Some(1) if bytes.len() >= mem::size_of::<T>() => {
            Ok(bytemuck::pod_read_unaligned(&bytes[..mem::size_of::<T>()]))
        },
        Some(0) if bytes.len() >= 2 => Err(error_from_code(bytes[1], first_error)),
        _ => Err(ErrorKind::BadReply.into()),
    }
}

/// The `u32` words following the fixed 32 bytes of a reply.
pub(crate) fn reply_words(bytes: &[u8], count: usize) -> Result<Vec<u32>> {
    let words = bytes.get(REPLY_SIZE..REPLY_SIZE + count * 4).ok_or(ErrorKind::BadReply)?;
    Ok(words.chunks_exact(4).map(|word| bytemuck::pod_read_unaligned::<u32>(word)).collect())
}

/// Map an X error code into the error kind.
pub(crate) fn error_from_code(code: u8, first_error: u8) -> Error {
    let kind = match code.checked_sub(first_error) {
        Some(GLX_BAD_CONTEXT) => ErrorKind::BadContext,
        Some(GLX_BAD_CONTEXT_STATE) => ErrorKind::BadContextState,
        Some(GLX_BAD_DRAWABLE)
        | Some(GLX_BAD_PIXMAP)
        | Some(GLX_BAD_CURRENT_WINDOW)
        | Some(GLX_BAD_PBUFFER)
        | Some(GLX_BAD_CURRENT_DRAWABLE)
        | Some(GLX_BAD_WINDOW) => ErrorKind::BadDrawable,
        Some(GLX_BAD_CONTEXT_TAG) => ErrorKind::BadContextTag,
        Some(GLX_BAD_RENDER_REQUEST) | Some(GLX_BAD_LARGE_REQUEST) => ErrorKind::BadRequest,
        Some(GLX_UNSUPPORTED_PRIVATE_REQUEST) => {
            ErrorKind::NotSupported("the vendor private request isn't supported by the server")
        },
        Some(GLX_BAD_FBCONFIG) => ErrorKind::BadMatch,
        _ => match code {
            BAD_MATCH => ErrorKind::BadMatch,
            BAD_ACCESS => ErrorKind::BadAccess,
            BAD_ALLOC => ErrorKind::OutOfMemory,
            BAD_WINDOW | BAD_PIXMAP | BAD_DRAWABLE => ErrorKind::BadDrawable,
            BAD_REQUEST | BAD_VALUE | BAD_LENGTH | BAD_ID_CHOICE => ErrorKind::BadRequest,
            _ => ErrorKind::Misc,
        },
    };

    Error::new(Some(code as i64), None, kind)
}
