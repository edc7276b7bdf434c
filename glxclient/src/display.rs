//! Per connection GLX state.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bitflags::bitflags;
use log::debug;
use once_cell::sync::OnceCell;

use crate::api::direct::drawable::DrawableBinder;
use crate::api::direct::{DriverLoader, DriverScreen};
use crate::api::indirect::protocol::BUFFER_SAFE_MARGIN;
use crate::api::indirect::transmit::{self, Transmitter};
use crate::api::indirect::{self, BindProtocol};
use crate::config::{ConfigResolver, TextureFormat, TextureTargets};
use crate::connection::{Connection, Drawable, Xid};
use crate::error::{Error, ErrorKind, Result};
use crate::make_current;
use crate::utils::NoPrint;

/// A GLX version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

impl Version {
    /// Create a new version.
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

bitflags! {
    /// The features the server offers on top of the negotiated version.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DisplayFeatures: u8 {
        /// Contexts can read from a drawable other than the one they draw to.
        const MAKE_CURRENT_READ   = 0b00000001;

        /// Contexts can be created from fbconfigs.
        const FBCONFIG            = 0b00000010;

        /// Contexts of other clients can be imported.
        const IMPORT_CONTEXT      = 0b00000100;

        /// Drawables can be bound as textures.
        const TEXTURE_FROM_PIXMAP = 0b00001000;
    }
}

/// Build a [`Display`] over a connection.
pub struct DisplayBuilder {
    render_buffer_size: Option<usize>,
    single_command_requests: bool,
    direct_rendering: bool,
    driver_loader: Option<Arc<dyn DriverLoader>>,
    config_resolver: Option<Arc<dyn ConfigResolver>>,
}

impl Default for DisplayBuilder {
    fn default() -> Self {
        Self {
            render_buffer_size: None,
            single_command_requests: false,
            direct_rendering: true,
            driver_loader: None,
            config_resolver: None,
        }
    }
}

impl DisplayBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Cap the size of the render buffer of the contexts.
    ///
    /// By default it's the largest request the server accepts.
    pub fn with_render_buffer_size(mut self, size: usize) -> Self {
        self.render_buffer_size = Some(size);
        self
    }

    /// Send every render command in a request of its own.
    ///
    /// Makes server side errors point at the command that caused them.
    pub fn with_single_command_requests(mut self, single: bool) -> Self {
        self.single_command_requests = single;
        self
    }

    /// Allow contexts to use the direct renderer. Enabled by default, but
    /// without a driver loader every context is indirect anyway.
    pub fn with_direct_rendering(mut self, direct: bool) -> Self {
        self.direct_rendering = direct;
        self
    }

    /// The loader of the direct rendering drivers.
    pub fn with_driver_loader(mut self, loader: Arc<dyn DriverLoader>) -> Self {
        self.driver_loader = Some(loader);
        self
    }

    /// Turns the config ids of imported contexts into config records.
    pub fn with_config_resolver(mut self, resolver: Arc<dyn ConfigResolver>) -> Self {
        self.config_resolver = Some(resolver);
        self
    }

    /// Create the display.
    ///
    /// Fails with [`ErrorKind::NotFound`] when the server lacks GLX.
    pub fn build(self, connection: Arc<dyn Connection>) -> Result<Display> {
        let extension = connection.glx_extension().ok_or_else(|| {
            Error::new(
                None,
                Some(String::from("the server doesn't support GLX")),
                ErrorKind::NotFound,
            )
        })?;

        let mut buffer_capacity = transmit::buffer_capacity(connection.maximum_request_bytes());
        if let Some(size) = self.render_buffer_size {
            buffer_capacity = buffer_capacity.min(size);
        }

        let screens = (0..connection.screen_count() as i32).map(Screen::new).collect();
        let transmitter = Transmitter::new(connection, extension, buffer_capacity);
        debug!(
            "GLX at major opcode {}, render buffer of {buffer_capacity} bytes, large chunks of {} \
             bytes",
            extension.major_opcode,
            transmitter.max_chunk()
        );

        let inner = Arc::new(DisplayInner {
            transmitter,
            buffer_capacity,
            single_command_requests: self.single_command_requests,
            direct_rendering: self.direct_rendering,
            driver_loader: self.driver_loader.map(NoPrint),
            config_resolver: self.config_resolver.map(NoPrint),
            screens,
            negotiated: OnceCell::new(),
        });

        Ok(Display { inner })
    }
}

impl fmt::Debug for DisplayBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayBuilder")
            .field("render_buffer_size", &self.render_buffer_size)
            .field("single_command_requests", &self.single_command_requests)
            .field("direct_rendering", &self.direct_rendering)
            .field("driver_loader", &self.driver_loader.is_some())
            .field("config_resolver", &self.config_resolver.is_some())
            .finish()
    }
}

/// A connection to an X server carrying GLX.
///
/// Clones refer to the same connection.
#[derive(Debug, Clone)]
pub struct Display {
    pub(crate) inner: Arc<DisplayInner>,
}

impl Display {
    /// The version both the server and this crate implement.
    ///
    /// The version is queried on first use.
    pub fn version(&self) -> Result<Version> {
        self.negotiated().map(|negotiated| negotiated.version)
    }

    /// The features the server offers.
    pub fn features(&self) -> Result<DisplayFeatures> {
        self.negotiated().map(|negotiated| negotiated.features)
    }

    /// The amount of screens on the connection.
    pub fn screen_count(&self) -> usize {
        self.inner.screens.len()
    }

    /// Whether a transfer failed midway, leaving the connection unusable.
    pub fn is_broken(&self) -> bool {
        self.inner.transmitter.is_broken()
    }

    /// Forget the driver handles of the drawable, to be called once the
    /// drawable is destroyed.
    pub fn destroy_drawable(&self, drawable: Drawable) {
        let _guard = make_current::bind_lock();
        for screen in &self.inner.screens {
            screen.drawables().release(drawable);
        }
    }

    /// The texture targets and format the drawable can be bound as, known
    /// once a direct context was bound to it.
    pub fn texture_binding(&self, drawable: Drawable) -> Option<(TextureTargets, TextureFormat)> {
        let _guard = make_current::bind_lock();
        self.inner.screens.iter().find_map(|screen| {
            let drawables = screen.drawables();
            drawables.get(drawable).map(|binding| (binding.texture_targets, binding.texture_format))
        })
    }

    /// Ask the server whether the context is direct.
    pub fn is_direct_xid(&self, context: Xid) -> Result<bool> {
        indirect::is_direct(&self.inner.transmitter, context)
    }

    #[inline]
    pub(crate) fn transmitter(&self) -> &Transmitter {
        &self.inner.transmitter
    }

    pub(crate) fn negotiated(&self) -> Result<&Negotiated> {
        self.inner.negotiated.get_or_try_init(|| {
            let transmitter = &self.inner.transmitter;
            let version = indirect::query_version(transmitter, indirect::CLIENT_VERSION)?
                .min(indirect::CLIENT_VERSION);
            let features = server_features(transmitter.connection().as_ref(), version);
            let bind = indirect::select_bind_protocol(version, features);
            debug!("negotiated GLX {version} with {features:?}, binding through {bind:?}");
            Ok(Negotiated { version, features, bind })
        })
    }

    pub(crate) fn screen(&self, number: i32) -> Result<&Screen> {
        usize::try_from(number).ok().and_then(|index| self.inner.screens.get(index)).ok_or_else(
            || Error::new(None, Some(format!("no screen {number} on the display")), ErrorKind::BadMatch),
        )
    }

    /// The direct rendering driver of the screen, loaded on first use.
    pub(crate) fn driver(&self, screen: &Screen) -> Option<Arc<dyn DriverScreen>> {
        if !self.inner.direct_rendering {
            return None;
        }

        let loader = self.inner.driver_loader.as_ref()?;
        screen
            .driver
            .get_or_init(|| {
                let driver = loader.driver_for_screen(screen.number);
                debug!(
                    "screen {} has {}direct rendering driver",
                    screen.number,
                    if driver.is_some() { "a " } else { "no " }
                );
                driver.map(NoPrint)
            })
            .as_ref()
            .map(|driver| driver.0.clone())
    }

    pub(crate) fn config_resolver(&self) -> Option<&Arc<dyn ConfigResolver>> {
        self.inner.config_resolver.as_deref()
    }

    /// The render buffer capacity and safe margin of new contexts.
    pub(crate) fn buffer_layout(&self) -> (usize, usize) {
        let capacity = self.inner.buffer_capacity;
        let margin =
            if self.inner.single_command_requests { capacity } else { BUFFER_SAFE_MARGIN };
        (capacity, margin)
    }

    #[inline]
    pub(crate) fn ptr_eq(&self, other: &Display) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Display {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Display {}

pub(crate) struct DisplayInner {
    transmitter: Transmitter,
    buffer_capacity: usize,
    single_command_requests: bool,
    direct_rendering: bool,
    driver_loader: Option<NoPrint<Arc<dyn DriverLoader>>>,
    config_resolver: Option<NoPrint<Arc<dyn ConfigResolver>>>,
    screens: Vec<Screen>,
    negotiated: OnceCell<Negotiated>,
}

impl fmt::Debug for DisplayInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayInner")
            .field("transmitter", &self.transmitter)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("single_command_requests", &self.single_command_requests)
            .field("direct_rendering", &self.direct_rendering)
            .field("driver_loader", &self.driver_loader)
            .field("screens", &self.screens)
            .field("negotiated", &self.negotiated.get())
            .finish_non_exhaustive()
    }
}

/// The outcome of the version negotiation.
#[derive(Debug)]
pub(crate) struct Negotiated {
    pub version: Version,
    pub features: DisplayFeatures,
    pub bind: Box<dyn BindProtocol>,
}

#[derive(Debug)]
pub(crate) struct Screen {
    pub number: i32,
    driver: OnceCell<Option<NoPrint<Arc<dyn DriverScreen>>>>,
    drawables: Mutex<DrawableBinder>,
}

impl Screen {
    fn new(number: i32) -> Self {
        Self { number, driver: OnceCell::new(), drawables: Mutex::new(DrawableBinder::default()) }
    }

    /// The driver handles of the drawables, only touched with the bind lock
    /// held.
    pub(crate) fn drawables(&self) -> MutexGuard<'_, DrawableBinder> {
        self.drawables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn server_features(connection: &dyn Connection, version: Version) -> DisplayFeatures {
    // A feature counts only when every screen offers it.
    let mut common: Option<HashSet<String>> = None;
    for screen in 0..connection.screen_count() as i32 {
        let extensions: HashSet<String> = connection.server_extensions(screen).into_iter().collect();
        common = Some(match common {
            Some(common) => common.intersection(&extensions).cloned().collect(),
            None => extensions,
        });
    }
    let extensions = common.unwrap_or_default();

    let glx13 = version >= Version::new(1, 3);
    let mut features = DisplayFeatures::empty();

    features.set(
        DisplayFeatures::MAKE_CURRENT_READ,
        glx13 || extensions.contains("GLX_SGI_make_current_read"),
    );

    features.set(DisplayFeatures::FBCONFIG, glx13 || extensions.contains("GLX_SGIX_fbconfig"));

    features.set(
        DisplayFeatures::IMPORT_CONTEXT,
        glx13 || extensions.contains("GLX_EXT_import_context"),
    );

    features.set(
        DisplayFeatures::TEXTURE_FROM_PIXMAP,
        extensions.contains("GLX_EXT_texture_from_pixmap"),
    );

    features
}
