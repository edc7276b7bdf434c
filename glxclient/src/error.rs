//! Glxclient error handling.

use std::fmt;
use std::io;

/// A specialized [`Result`] type for GLX operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for all the GLX client operations.
#[derive(Debug, Clone)]
pub struct Error {
    /// The raw X error code, when the error came from the server.
    raw_code: Option<i64>,

    /// The raw message from the transport in case it could be obtained.
    raw_os_message: Option<String>,

    /// The simplified error kind to handle matching.
    kind: ErrorKind,
}

impl Error {
    pub(crate) fn new(
        raw_code: Option<i64>,
        raw_os_message: Option<String>,
        kind: ErrorKind,
    ) -> Self {
        Self { raw_code, raw_os_message, kind }
    }

    /// Build a connection level error out of the transport failure.
    pub(crate) fn connection(err: &io::Error) -> Self {
        Self::new(None, Some(err.to_string()), ErrorKind::ConnectionLost)
    }

    /// Helper to check that error is [`ErrorKind::NotSupported`].
    #[inline]
    pub fn not_supported(&self) -> bool {
        matches!(&self.kind, ErrorKind::NotSupported(_))
    }

    /// Whether the error is fatal to the connection it happened on.
    #[inline]
    pub fn is_connection_error(&self) -> bool {
        self.kind == ErrorKind::ConnectionLost
    }

    /// The underlying error kind.
    #[inline]
    pub fn error_kind(&self) -> ErrorKind {
        self.kind
    }

    /// The underlying raw code in case it's present.
    #[inline]
    pub fn raw_code(&self) -> Option<i64> {
        self.raw_code
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(raw_code) = self.raw_code {
            write!(f, "[{raw_code:x}] ")?;
        }

        let msg = if let Some(raw_os_message) = self.raw_os_message.as_ref() {
            raw_os_message
        } else {
            self.kind.as_str()
        };

        write!(f, "{msg}")
    }
}

impl std::error::Error for Error {}

/// Build an error with just a kind.
impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error { raw_code: None, raw_os_message: None, kind }
    }
}

/// A list specifying general categories of GLX client errors.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ErrorKind {
    /// The requested resource wasn't found.
    ///
    /// For example the renderer refused to create a handle for a drawable, or
    /// the connection doesn't carry the GLX extension.
    NotFound,

    /// Can't access a requested resource.
    ///
    /// For example when trying to make a context current while it's current on
    /// another thread.
    BadAccess,

    /// An operation could not be completed, because it failed to allocate
    /// enough memory.
    OutOfMemory,

    /// The context is not valid, it was never realized or it was destroyed.
    BadContext,

    /// The context is in bad state, the renderer refused to bind it.
    BadContextState,

    /// The context tag sent along a request isn't known to the server.
    BadContextTag,

    /// The drawable is invalid or couldn't be resolved by the renderer.
    BadDrawable,

    /// Arguments are inconsistent. For example a context passed without
    /// drawables.
    BadMatch,

    /// The server rejected the request as malformed.
    BadRequest,

    /// The server reply couldn't be decoded.
    BadReply,

    /// The connection to the server failed; it must be considered broken.
    ConnectionLost,

    /// The operation is not supported by the server.
    NotSupported(&'static str),

    /// The misc error that can't be classified occurred.
    Misc,
}

impl ErrorKind {
    pub(crate) fn as_str(&self) -> &'static str {
        use ErrorKind::*;
        match *self {
            NotFound => "not found",
            BadAccess => "access to the resource failed",
            OutOfMemory => "out of memory",
            BadContext => "argument does not name a valid context",
            BadContextState => "the context is in a bad state",
            BadContextTag => "the context tag is not known to the server",
            BadDrawable => "argument does not name a valid drawable",
            BadMatch => "arguments are inconsistent",
            BadRequest => "the request was rejected by the server",
            BadReply => "the server reply is malformed",
            ConnectionLost => "the connection to the server is broken",
            NotSupported(reason) => reason,
            Misc => "misc glx error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
