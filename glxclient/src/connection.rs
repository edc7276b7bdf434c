//! The display server connection GLX requests travel over.
//!
//! The transport itself, the X11 byte stream with its sequence numbers and
//! error queues, is owned by the caller. This crate only needs to push
//! already framed requests and read back replies, which is what the
//! [`Connection`] trait describes.

use std::io::{self, IoSlice};
use std::num::NonZeroU32;

use raw_window_handle::RawWindowHandle;

use crate::error::{Error, ErrorKind, Result};

/// A raw X resource id.
pub type Xid = u32;

/// The X11 `None` resource id.
pub const NONE: Xid = 0;

/// A GLX drawable, which is either a window, a pixmap or a pbuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Drawable(NonZeroU32);

impl Drawable {
    /// Wrap the raw id, `None` is returned for the X11 `None` id.
    #[inline]
    pub fn new(xid: Xid) -> Option<Self> {
        NonZeroU32::new(xid).map(Self)
    }

    /// The raw X id of the drawable.
    #[inline]
    pub fn xid(self) -> Xid {
        self.0.get()
    }
}

/// Convert a native window handle into the drawable id it refers to.
impl TryFrom<RawWindowHandle> for Drawable {
    type Error = Error;

    fn try_from(handle: RawWindowHandle) -> Result<Self> {
        match handle {
            RawWindowHandle::Xlib(handle) => u32::try_from(handle.window)
                .ok()
                .and_then(Drawable::new)
                .ok_or_else(|| ErrorKind::BadDrawable.into()),
            RawWindowHandle::Xcb(handle) => Ok(Drawable(handle.window)),
            _ => Err(ErrorKind::NotSupported("provided native window is not supported").into()),
        }
    }
}

/// A token the server hands out for every bind of a context.
///
/// Every request rendering into the bound context carries it, so the server
/// can route it to the right client side state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextTag(pub(crate) u32);

impl ContextTag {
    /// The tag of "no context", sent when nothing was bound before.
    pub const NONE: Self = Self(0);

    /// The raw value sent on the wire.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Whether it's the [`ContextTag::NONE`].
    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Location of the GLX extension on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionInfo {
    /// Major opcode every GLX request is sent with.
    pub major_opcode: u8,

    /// The first error code of the GLX error range.
    pub first_error: u8,
}

/// A connection to the X server.
///
/// Implementations must keep the requests passed to a single
/// [`Connection::send_requests`] call contiguous in the request stream, no
/// request of another thread may land between them.
pub trait Connection: Send + Sync {
    /// Query where the GLX extension lives, `None` if the server lacks it.
    fn glx_extension(&self) -> Option<ExtensionInfo>;

    /// The largest request, in bytes, the server accepts.
    fn maximum_request_bytes(&self) -> usize;

    /// Allocate a fresh resource id.
    fn generate_id(&self) -> Xid;

    /// The amount of screens on the connection.
    fn screen_count(&self) -> usize;

    /// The GLX extensions the server advertises for the screen.
    fn server_extensions(&self, _screen: i32) -> Vec<String> {
        Vec::new()
    }

    /// Send the requests in order, as one uninterrupted sequence.
    fn send_requests(&self, requests: &[&[IoSlice<'_>]]) -> io::Result<()>;

    /// Send a single request made of the given parts.
    fn send_request(&self, request: &[IoSlice<'_>]) -> io::Result<()> {
        self.send_requests(&[request])
    }

    /// Send a request and block until its reply or error arrives.
    ///
    /// The returned bytes are the raw reply: at least 32 bytes where the first
    /// byte is `1` for a reply and `0` for an error.
    fn request_reply(&self, request: &[IoSlice<'_>]) -> io::Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;
    use std::ptr::NonNull;

    use raw_window_handle::{WaylandWindowHandle, XcbWindowHandle, XlibWindowHandle};

    use super::*;

    #[test]
    fn drawable_from_window_handle() {
        let xlib = RawWindowHandle::Xlib(XlibWindowHandle::new(0x400001));
        assert_eq!(Drawable::try_from(xlib).unwrap().xid(), 0x400001);

        let xcb = XcbWindowHandle::new(NonZeroU32::new(0x400002).unwrap());
        assert_eq!(Drawable::try_from(RawWindowHandle::Xcb(xcb)).unwrap().xid(), 0x400002);

        let none = RawWindowHandle::Xlib(XlibWindowHandle::new(0));
        assert_eq!(Drawable::try_from(none).unwrap_err().error_kind(), ErrorKind::BadDrawable);

        let wayland = WaylandWindowHandle::new(NonNull::dangling());
        assert!(Drawable::try_from(RawWindowHandle::Wayland(wayland)).unwrap_err().not_supported());
    }

    #[test]
    fn none_drawable() {
        assert_eq!(Drawable::new(NONE), None);
        assert_eq!(Drawable::new(7).map(Drawable::xid), Some(7));
        assert!(ContextTag::NONE.is_none());
    }
}
