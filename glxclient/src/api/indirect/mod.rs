//! The indirect renderer: GL commands are encoded into GLX requests and
//! executed by the server.

use std::fmt;

use log::debug;

use crate::config::{ConfigKind, ConfigRecord};
use crate::connection::{ContextTag, Xid};
use crate::display::{DisplayFeatures, Version};
use crate::error::{ErrorKind, Result};

pub mod command_buffer;
pub(crate) mod protocol;
pub(crate) mod transmit;

use protocol::{
    ContextReq, CopyContextReq, CreateContextReq, CreateContextWithConfigSgixReq,
    CreateNewContextReq, IsDirectReply, MakeContextCurrentReq, MakeCurrentReadSgiReq,
    MakeCurrentReply, MakeCurrentReq, QueryContextInfoExtReq, QueryContextReply,
    QueryVersionReply, QueryVersionReq, TaggedReq,
};
use transmit::Transmitter;

/// The GLX version the client asks the server for.
pub(crate) const CLIENT_VERSION: Version = Version::new(1, 4);

/// A server side context creation.
#[derive(Debug)]
pub(crate) struct CreateRequest<'a> {
    pub context: Xid,
    pub config: &'a ConfigRecord,
    pub share_list: Xid,
    pub direct: bool,
}

/// A bind or unbind of a server side context.
///
/// Unbinding is a bind of the `None` context to the `None` drawables.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BindRequest {
    pub old_tag: ContextTag,
    pub context: Xid,
    pub draw: Xid,
    pub read: Xid,
}

impl BindRequest {
    pub(crate) fn unbind(old_tag: ContextTag) -> Self {
        Self { old_tag, context: 0, draw: 0, read: 0 }
    }
}

/// The request flavour used to bind contexts.
///
/// Picked once per connection from the negotiated version and extensions.
pub(crate) trait BindProtocol: Send + Sync + fmt::Debug {
    /// Encode the bind request.
    fn make_current(&self, major_opcode: u8, request: &BindRequest) -> Result<Vec<u8>>;
}

/// `glXMakeContextCurrent` of GLX 1.3.
#[derive(Debug)]
struct ContextCurrent;

/// `GLX_SGI_make_current_read` on pre 1.3 servers.
#[derive(Debug)]
struct MakeCurrentReadSgi;

/// Plain `glXMakeCurrent`, the read drawable must match the draw one.
#[derive(Debug)]
struct LegacyMakeCurrent;

impl BindProtocol for ContextCurrent {
    fn make_current(&self, major_opcode: u8, request: &BindRequest) -> Result<Vec<u8>> {
        let req = MakeContextCurrentReq::new(
            major_opcode,
            request.old_tag.raw(),
            request.draw,
            request.read,
            request.context,
        );
        Ok(bytemuck::bytes_of(&req).to_vec())
    }
}

impl BindProtocol for MakeCurrentReadSgi {
    fn make_current(&self, major_opcode: u8, request: &BindRequest) -> Result<Vec<u8>> {
        if request.draw == request.read {
            return LegacyMakeCurrent.make_current(major_opcode, request);
        }

        let req = MakeCurrentReadSgiReq::new(
            major_opcode,
            request.old_tag.raw(),
            request.draw,
            request.read,
            request.context,
        );
        Ok(bytemuck::bytes_of(&req).to_vec())
    }
}

impl BindProtocol for LegacyMakeCurrent {
    fn make_current(&self, major_opcode: u8, request: &BindRequest) -> Result<Vec<u8>> {
        if request.draw != request.read {
            return Err(ErrorKind::NotSupported(
                "separate read drawables need GLX 1.3 or GLX_SGI_make_current_read",
            )
            .into());
        }

        let req =
            MakeCurrentReq::new(major_opcode, request.draw, request.context, request.old_tag.raw());
        Ok(bytemuck::bytes_of(&req).to_vec())
    }
}

/// Pick the bind flavour for the server.
pub(crate) fn select_bind_protocol(
    version: Version,
    features: DisplayFeatures,
) -> Box<dyn BindProtocol> {
    if version >= Version::new(1, 3) {
        Box::new(ContextCurrent)
    } else if features.contains(DisplayFeatures::MAKE_CURRENT_READ) {
        Box::new(MakeCurrentReadSgi)
    } else {
        Box::new(LegacyMakeCurrent)
    }
}

/// Encode the context creation request matching the config kind.
pub(crate) fn encode_create_context(
    version: Version,
    features: DisplayFeatures,
    major_opcode: u8,
    request: &CreateRequest<'_>,
) -> Result<Vec<u8>> {
    let config = request.config;
    let screen = config.screen as u32;
    match config.kind {
        ConfigKind::Visual => {
            let req = CreateContextReq::new(
                major_opcode,
                request.context,
                config.id,
                screen,
                request.share_list,
                request.direct,
            );
            Ok(bytemuck::bytes_of(&req).to_vec())
        },
        ConfigKind::FbConfig if version >= Version::new(1, 3) => {
            let req = CreateNewContextReq::new(
                major_opcode,
                request.context,
                config.id,
                screen,
                config.render_type.raw(),
                request.share_list,
                request.direct,
            );
            Ok(bytemuck::bytes_of(&req).to_vec())
        },
        ConfigKind::FbConfig if features.contains(DisplayFeatures::FBCONFIG) => {
            let req = CreateContextWithConfigSgixReq::new(
                major_opcode,
                request.context,
                config.id,
                screen,
                config.render_type.raw(),
                request.share_list,
                request.direct,
            );
            Ok(bytemuck::bytes_of(&req).to_vec())
        },
        ConfigKind::FbConfig => {
            Err(ErrorKind::NotSupported("fbconfigs need GLX 1.3 or GLX_SGIX_fbconfig").into())
        },
    }
}

/// Ask for the GLX version the server implements.
pub(crate) fn query_version(transmitter: &Transmitter, client: Version) -> Result<Version> {
    let req =
        QueryVersionReq::new(transmitter.major_opcode(), client.major as u32, client.minor as u32);
    let reply = transmitter.request_reply(bytemuck::bytes_of(&req))?;
    let reply: QueryVersionReply = protocol::parse_reply(&reply, transmitter.first_error())?;

    let version = Version::new(
        u8::try_from(reply.major_version).unwrap_or(u8::MAX),
        u8::try_from(reply.minor_version).unwrap_or(u8::MAX),
    );
    debug!("server implements GLX {version}");
    Ok(version)
}

/// Send the bind request and return the tag of the new binding.
pub(crate) fn make_current(
    transmitter: &Transmitter,
    protocol: &dyn BindProtocol,
    request: &BindRequest,
) -> Result<ContextTag> {
    let bytes = protocol.make_current(transmitter.major_opcode(), request)?;
    let reply = transmitter.request_reply(&bytes)?;
    let reply: MakeCurrentReply = protocol::parse_reply(&reply, transmitter.first_error())?;
    Ok(ContextTag(reply.context_tag))
}

pub(crate) fn destroy_context(transmitter: &Transmitter, context: Xid) -> Result<()> {
    let req = ContextReq::new(transmitter.major_opcode(), protocol::X_GLX_DESTROY_CONTEXT, context);
    transmitter.send(bytemuck::bytes_of(&req))
}

pub(crate) fn is_direct(transmitter: &Transmitter, context: Xid) -> Result<bool> {
    let req = ContextReq::new(transmitter.major_opcode(), protocol::X_GLX_IS_DIRECT, context);
    let reply = transmitter.request_reply(bytemuck::bytes_of(&req))?;
    let reply: IsDirectReply = protocol::parse_reply(&reply, transmitter.first_error())?;
    Ok(reply.is_direct != 0)
}

/// Send `glXWaitGL` or `glXWaitX` for the binding.
pub(crate) fn wait(transmitter: &Transmitter, glx_code: u8, tag: ContextTag) -> Result<()> {
    let req = TaggedReq::new(transmitter.major_opcode(), glx_code, tag.raw());
    transmitter.send(bytemuck::bytes_of(&req))
}

pub(crate) fn copy_context(
    transmitter: &Transmitter,
    source: Xid,
    dest: Xid,
    mask: u32,
    tag: ContextTag,
) -> Result<()> {
    let req = CopyContextReq::new(transmitter.major_opcode(), source, dest, mask, tag.raw());
    transmitter.send(bytemuck::bytes_of(&req))
}

/// Fetch the attributes of a server side context.
pub(crate) fn query_context(
    transmitter: &Transmitter,
    version: Version,
    features: DisplayFeatures,
    context: Xid,
) -> Result<Vec<(u32, u32)>> {
    let major_opcode = transmitter.major_opcode();
    let reply = if version >= Version::new(1, 3) {
        let req = ContextReq::new(major_opcode, protocol::X_GLX_QUERY_CONTEXT, context);
        transmitter.request_reply(bytemuck::bytes_of(&req))?
    } else if features.contains(DisplayFeatures::IMPORT_CONTEXT) {
        let req = QueryContextInfoExtReq::new(major_opcode, context);
        transmitter.request_reply(bytemuck::bytes_of(&req))?
    } else {
        return Err(ErrorKind::NotSupported("GLX_EXT_import_context is not supported").into());
    };

    let fixed: QueryContextReply = protocol::parse_reply(&reply, transmitter.first_error())?;
    let words = protocol::reply_words(&reply, fixed.n as usize * 2)?;
    Ok(words.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAJOR: u8 = 140;

    fn bind(draw: Xid, read: Xid) -> BindRequest {
        BindRequest { old_tag: ContextTag(3), context: 0x600001, draw, read }
    }

    #[test]
    fn glx13_uses_make_context_current() {
        let protocol = select_bind_protocol(Version::new(1, 4), DisplayFeatures::empty());
        let bytes = protocol.make_current(MAJOR, &bind(1, 2)).unwrap();
        assert_eq!(bytes.len(), 20);
        assert_eq!(bytes[1], protocol::X_GLX_MAKE_CONTEXT_CURRENT);
    }

    #[test]
    fn sgi_uses_vendor_request_for_split_drawables() {
        let protocol = select_bind_protocol(Version::new(1, 2), DisplayFeatures::MAKE_CURRENT_READ);

        let bytes = protocol.make_current(MAJOR, &bind(1, 2)).unwrap();
        assert_eq!(bytes[1], protocol::X_GLX_VENDOR_PRIVATE_WITH_REPLY);
        assert_eq!(&bytes[4..8], &protocol::X_GLXVOP_MAKE_CURRENT_READ_SGI.to_ne_bytes());

        let bytes = protocol.make_current(MAJOR, &bind(1, 1)).unwrap();
        assert_eq!(bytes[1], protocol::X_GLX_MAKE_CURRENT);
    }

    #[test]
    fn legacy_rejects_split_drawables() {
        let protocol = select_bind_protocol(Version::new(1, 2), DisplayFeatures::empty());
        assert!(protocol.make_current(MAJOR, &bind(1, 2)).unwrap_err().not_supported());

        let bytes = protocol.make_current(MAJOR, &bind(1, 1)).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[12..16], &3u32.to_ne_bytes());
    }

    #[test]
    fn create_request_follows_config_kind() {
        let visual = ConfigRecord::visual(0, 0x21);
        let request = CreateRequest { context: 5, config: &visual, share_list: 0, direct: false };
        let bytes =
            encode_create_context(Version::new(1, 2), DisplayFeatures::empty(), MAJOR, &request)
                .unwrap();
        assert_eq!(bytes[1], protocol::X_GLX_CREATE_CONTEXT);

        let fbconfig = ConfigRecord::fbconfig(0, 0x77, Default::default());
        let request = CreateRequest { context: 5, config: &fbconfig, share_list: 0, direct: true };
        let bytes =
            encode_create_context(Version::new(1, 3), DisplayFeatures::empty(), MAJOR, &request)
                .unwrap();
        assert_eq!(bytes[1], protocol::X_GLX_CREATE_NEW_CONTEXT);
        assert_eq!(bytes[24], 1);

        let bytes =
            encode_create_context(Version::new(1, 2), DisplayFeatures::FBCONFIG, MAJOR, &request)
                .unwrap();
        assert_eq!(&bytes[4..8], &protocol::X_GLXVOP_CREATE_CONTEXT_WITH_CONFIG_SGIX.to_ne_bytes());

        let err =
            encode_create_context(Version::new(1, 2), DisplayFeatures::empty(), MAJOR, &request)
                .unwrap_err();
        assert!(err.not_supported());
    }
}
