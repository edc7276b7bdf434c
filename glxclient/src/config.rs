//! The configs contexts and drawables are created with.
//!
//! Picking a config is done elsewhere, this module only carries the record the
//! selection produced.

use bitflags::bitflags;

use crate::connection::Xid;

/// `GLX_RGBA_TYPE`.
const GLX_RGBA_TYPE: u32 = 0x8014;
/// `GLX_COLOR_INDEX_TYPE`.
const GLX_COLOR_INDEX_TYPE: u32 = 0x8015;
/// `GLX_RGBA_FLOAT_TYPE_ARB`.
const GLX_RGBA_FLOAT_TYPE_ARB: u32 = 0x20b9;

/// Where the config id comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    /// The id is an X visual id.
    Visual,

    /// The id is a GLX framebuffer config id.
    FbConfig,
}

/// The type of the color buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderType {
    /// Regular RGBA rendering.
    #[default]
    Rgba,

    /// Color index rendering.
    ColorIndex,

    /// Floating point RGBA rendering.
    RgbaFloat,
}

impl RenderType {
    /// The value sent on the wire.
    pub fn raw(self) -> u32 {
        match self {
            RenderType::Rgba => GLX_RGBA_TYPE,
            RenderType::ColorIndex => GLX_COLOR_INDEX_TYPE,
            RenderType::RgbaFloat => GLX_RGBA_FLOAT_TYPE_ARB,
        }
    }

    pub(crate) fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            GLX_RGBA_TYPE => Some(RenderType::Rgba),
            GLX_COLOR_INDEX_TYPE => Some(RenderType::ColorIndex),
            GLX_RGBA_FLOAT_TYPE_ARB => Some(RenderType::RgbaFloat),
            _ => None,
        }
    }
}

bitflags! {
    /// Texture targets a drawable of the config could be bound to.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureTargets: u8 {
        /// `GLX_TEXTURE_1D_EXT`.
        const TEXTURE_1D        = 0b00000001;

        /// `GLX_TEXTURE_2D_EXT`.
        const TEXTURE_2D        = 0b00000010;

        /// `GLX_TEXTURE_RECTANGLE_EXT`.
        const TEXTURE_RECTANGLE = 0b00000100;
    }
}

/// The texture format drawables of the config expose when bound as texture.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// The drawable can't be bound as a texture.
    #[default]
    None,

    /// RGB texture.
    Rgb,

    /// RGBA texture.
    Rgba,
}

/// The config record handed over by config selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigRecord {
    /// Visual or fbconfig id of the config.
    pub id: Xid,

    /// What `id` refers to.
    pub kind: ConfigKind,

    /// The screen the config belongs to.
    pub screen: i32,

    /// Color buffer type.
    pub render_type: RenderType,

    /// Texture targets drawables of this config could be bound to.
    pub texture_targets: TextureTargets,

    /// Texture format drawables of this config expose.
    pub texture_format: TextureFormat,
}

impl ConfigRecord {
    /// A visual based RGBA config without texture binding support.
    pub fn visual(screen: i32, visual_id: Xid) -> Self {
        Self {
            id: visual_id,
            kind: ConfigKind::Visual,
            screen,
            render_type: RenderType::Rgba,
            texture_targets: TextureTargets::empty(),
            texture_format: TextureFormat::None,
        }
    }

    /// An fbconfig based config without texture binding support.
    pub fn fbconfig(screen: i32, fbconfig_id: Xid, render_type: RenderType) -> Self {
        Self {
            id: fbconfig_id,
            kind: ConfigKind::FbConfig,
            screen,
            render_type,
            texture_targets: TextureTargets::empty(),
            texture_format: TextureFormat::None,
        }
    }
}

/// Translate a config id into the record describing it.
pub trait ConfigResolver: Send + Sync {
    /// Resolve the visual or fbconfig id on the screen.
    fn resolve_config(&self, screen: i32, kind: ConfigKind, id: Xid) -> Option<ConfigRecord>;
}
