//! GLX contexts and their client side state.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;

use log::{debug, warn};

use crate::api::direct::{DriverContext, DriverDrawable};
use crate::api::indirect::command_buffer::CommandBuffer;
use crate::api::indirect::protocol::{
    GLX_FBCONFIG_ID, GLX_RENDER_TYPE, GLX_SCREEN_EXT, GLX_SHARE_CONTEXT_EXT, GLX_VISUAL_ID_EXT,
    RENDER_COMMAND_SIZE_LIMIT,
};
use crate::api::indirect::{self, CreateRequest};
use crate::config::{ConfigKind, ConfigRecord, RenderType};
use crate::connection::{ContextTag, Drawable, Xid, NONE};
use crate::current;
use crate::display::Display;
use crate::error::{Error, ErrorKind, Result};
use crate::make_current;
use crate::utils::NoPrint;

/// A builder for the [`ContextAttributes`].
#[derive(Debug, Default)]
pub struct ContextAttributesBuilder {
    attributes: ContextAttributes,
}

impl ContextAttributesBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Default::default()
    }

    /// Share the display lists and textures with the `context`.
    pub fn with_sharing(mut self, context: &Context) -> Self {
        self.attributes.shared = Some(context.clone());
        self
    }

    /// Whether to try the direct renderer. By default it's tried.
    ///
    /// The context is indirect when the screen has no driver or the driver
    /// refuses to create it, check [`Context::is_direct`].
    pub fn with_direct(mut self, direct: bool) -> Self {
        self.attributes.direct = direct;
        self
    }

    /// Override the render type of the config.
    pub fn with_render_type(mut self, render_type: RenderType) -> Self {
        self.attributes.render_type = Some(render_type);
        self
    }

    pub fn build(self) -> ContextAttributes {
        self.attributes
    }
}

/// The attributes that are used to create a context.
#[derive(Debug, Clone)]
pub struct ContextAttributes {
    pub(crate) shared: Option<Context>,
    pub(crate) direct: bool,
    pub(crate) render_type: Option<RenderType>,
}

impl Default for ContextAttributes {
    fn default() -> Self {
        Self { shared: None, direct: true, render_type: None }
    }
}

impl Display {
    /// Create a context rendering with the `config`.
    pub fn create_context(
        &self,
        config: &ConfigRecord,
        attributes: &ContextAttributes,
    ) -> Result<Context> {
        let negotiated = self.negotiated()?;
        let screen = self.screen(config.screen)?;

        let mut config = config.clone();
        if let Some(render_type) = attributes.render_type {
            config.render_type = render_type;
        }

        let share_list = match attributes.shared.as_ref() {
            Some(shared) if !shared.inner.lock_state().is_live() => {
                return Err(Error::new(
                    None,
                    Some(String::from("the context to share with was destroyed")),
                    ErrorKind::BadContext,
                ));
            },
            Some(shared) => shared.inner.xid,
            None => NONE,
        };

        let driver = if attributes.direct { self.driver(screen) } else { None };
        let driver_context = driver.and_then(|driver| {
            let shared_state = attributes.shared.as_ref().map(|shared| shared.inner.lock_state());
            let shared_driver = shared_state
                .as_ref()
                .and_then(|state| state.resources.as_ref())
                .and_then(|resources| resources.driver.as_ref())
                .map(|driver| driver.0.as_ref());

            let context = driver.create_context(&config, shared_driver);
            if context.is_none() {
                warn!("driver refused the context, falling back to indirect rendering");
            }

            context
        });

        let direct = driver_context.is_some();
        let xid = self.transmitter().connection().generate_id();
        let request = CreateRequest { context: xid, config: &config, share_list, direct };
        let bytes = indirect::encode_create_context(
            negotiated.version,
            negotiated.features,
            self.transmitter().major_opcode(),
            &request,
        )?;
        self.transmitter().send(&bytes)?;

        debug!(
            "created {} context {xid:#x} on screen {}",
            if direct { "direct" } else { "indirect" },
            config.screen
        );

        let screen = config.screen;
        let render_type = config.render_type;
        Ok(Context::new(ContextInner {
            display: self.clone(),
            xid,
            share_xid: share_list,
            screen,
            config: Some(config),
            render_type,
            imported: false,
            direct,
            state: Mutex::new(ContextState::new(self, driver_context)),
        }))
    }

    /// Wrap a context another client created.
    ///
    /// Imported contexts are always indirect. Destroying them only frees the
    /// client side.
    pub fn import_context(&self, xid: Xid) -> Result<Context> {
        if xid == NONE {
            return Err(ErrorKind::BadContext.into());
        }

        let negotiated = self.negotiated()?;
        let attributes =
            indirect::query_context(self.transmitter(), negotiated.version, negotiated.features, xid)?;

        let mut share_xid = NONE;
        let mut screen = 0;
        let mut render_type = RenderType::default();
        let mut config_id = None;
        for (attribute, value) in attributes {
            match attribute {
                GLX_SHARE_CONTEXT_EXT => share_xid = value,
                GLX_SCREEN_EXT => screen = value as i32,
                GLX_VISUAL_ID_EXT => config_id = Some((ConfigKind::Visual, value)),
                GLX_FBCONFIG_ID => config_id = Some((ConfigKind::FbConfig, value)),
                GLX_RENDER_TYPE => render_type = RenderType::from_raw(value).unwrap_or_default(),
                _ => (),
            }
        }

        let config = config_id.zip(self.config_resolver()).and_then(|((kind, id), resolver)| {
            resolver.resolve_config(screen, kind, id)
        });

        debug!("imported context {xid:#x} of screen {screen}");

        Ok(Context::new(ContextInner {
            display: self.clone(),
            xid,
            share_xid,
            screen,
            config,
            render_type,
            imported: true,
            direct: false,
            state: Mutex::new(ContextState::new(self, None)),
        }))
    }

    /// Copy the state selected by `mask` from `source` into `dest`.
    ///
    /// When `source` is current on this thread its pending commands are sent
    /// first.
    pub fn copy_context(&self, source: &Context, dest: &Context, mask: u32) -> Result<()> {
        let mut tag = ContextTag::NONE;
        if source.is_current() {
            let mut state = source.inner.lock_state();
            let ContextState { binding, resources, .. } = &mut *state;
            if let (Some(binding), Some(resources)) = (binding, resources) {
                if !source.inner.direct && binding.display.ptr_eq(self) {
                    self.transmitter().flush(&mut resources.buffer, binding.tag)?;
                    tag = binding.tag;
                }
            }
        }

        indirect::copy_context(self.transmitter(), source.inner.xid, dest.inner.xid, mask, tag)
    }
}

/// A GLX context.
///
/// Clones refer to the same context.
#[derive(Debug, Clone)]
pub struct Context {
    pub(crate) inner: Arc<ContextInner>,
}

impl Context {
    fn new(inner: ContextInner) -> Self {
        Self { inner: Arc::new(inner) }
    }

    /// The server side id of the context.
    pub fn xid(&self) -> Xid {
        self.inner.xid
    }

    /// The id of the context sharing objects with this one.
    pub fn share_xid(&self) -> Option<Xid> {
        Some(self.inner.share_xid).filter(|&xid| xid != NONE)
    }

    pub fn screen(&self) -> i32 {
        self.inner.screen
    }

    /// The config of the context, unknown for imported contexts without a
    /// config resolver.
    pub fn config(&self) -> Option<&ConfigRecord> {
        self.inner.config.as_ref()
    }

    pub fn render_type(&self) -> RenderType {
        self.inner.render_type
    }

    /// The display the context was created on.
    pub fn display(&self) -> &Display {
        &self.inner.display
    }

    /// Whether rendering goes to the driver in the client process.
    pub fn is_direct(&self) -> bool {
        self.inner.direct
    }

    /// Whether the context was created by another client.
    pub fn is_imported(&self) -> bool {
        self.inner.imported
    }

    /// Whether the context is current on the calling thread.
    pub fn is_current(&self) -> bool {
        current::current().is(&self.inner)
    }

    /// Whether the context was destroyed or freed.
    ///
    /// A destroyed context stays usable until it stops being current.
    pub fn is_destroyed(&self) -> bool {
        self.inner.lock_state().lifecycle != Lifecycle::Live
    }

    /// Destroy the context.
    ///
    /// The server side context is destroyed right away, the client side
    /// only once the context is no longer current.
    pub fn destroy(&self) -> Result<()> {
        self.release(!self.inner.imported)
    }

    /// Free the client side of the context, leaving the server side intact.
    pub fn free(&self) -> Result<()> {
        self.release(false)
    }

    fn release(&self, on_server: bool) -> Result<()> {
        let _guard = make_current::bind_lock();

        let freed = {
            let mut state = self.inner.lock_state();
            if state.lifecycle != Lifecycle::Live {
                return Err(ErrorKind::BadContext.into());
            }

            if state.binding.is_some() {
                debug!("context {:#x} is current, deferring its free", self.inner.xid);
                state.lifecycle = Lifecycle::PendingDestroy;
                None
            } else {
                state.free()
            }
        };

        drop(freed);

        if on_server {
            debug!("destroying context {:#x}", self.inner.xid);
            indirect::destroy_context(self.inner.display.transmitter(), self.inner.xid)?;
        }

        Ok(())
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Context {}

pub(crate) struct ContextInner {
    pub(crate) display: Display,
    pub(crate) xid: Xid,
    pub(crate) share_xid: Xid,
    pub(crate) screen: i32,
    pub(crate) config: Option<ConfigRecord>,
    pub(crate) render_type: RenderType,
    pub(crate) imported: bool,
    pub(crate) direct: bool,
    pub(crate) state: Mutex<ContextState>,
}

impl ContextInner {
    /// Lock the mutable state.
    ///
    /// The state is consistent before every fallible call made with it
    /// locked, so a poisoned lock is still usable.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.lifecycle != Lifecycle::Live || self.imported {
            return;
        }

        debug!("destroying dropped context {:#x}", self.xid);
        if let Err(err) = indirect::destroy_context(self.display.transmitter(), self.xid) {
            warn!("failed to destroy dropped context {:#x}: {err}", self.xid);
        }
    }
}

impl fmt::Debug for ContextInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("xid", &format_args!("{:#x}", self.xid))
            .field("share_xid", &format_args!("{:#x}", self.share_xid))
            .field("screen", &self.screen)
            .field("render_type", &self.render_type)
            .field("imported", &self.imported)
            .field("direct", &self.direct)
            .field("state", &self.state)
            .finish()
    }
}

/// Where a context stands between creation and free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Live,

    /// Destroyed while current, freed on its last unbind.
    PendingDestroy,

    Freed,
}

/// Where and how the context is current.
///
/// Either all of it is present or the context isn't bound.
#[derive(Debug)]
pub(crate) struct Binding {
    pub display: Display,
    pub draw: Drawable,
    pub read: Drawable,
    pub tag: ContextTag,
    pub thread: ThreadId,

    /// Driver handles of the drawables, for direct contexts.
    pub handles: Option<DriverHandles>,
}

#[derive(Debug, Clone)]
pub(crate) struct DriverHandles {
    pub draw: Arc<dyn DriverDrawable>,
    pub read: Arc<dyn DriverDrawable>,
}

/// The client side resources, dropping them frees the context.
#[derive(Debug)]
pub(crate) struct Resources {
    pub buffer: CommandBuffer,

    /// Commands above this size are sent as large commands.
    pub max_small_command: usize,

    pub driver: Option<NoPrint<Box<dyn DriverContext>>>,
}

#[derive(Debug)]
pub(crate) struct ContextState {
    pub binding: Option<Binding>,
    pub lifecycle: Lifecycle,
    pub resources: Option<Resources>,
}

impl ContextState {
    fn new(display: &Display, driver: Option<Box<dyn DriverContext>>) -> Self {
        let (capacity, safe_margin) = display.buffer_layout();
        let resources = Resources {
            buffer: CommandBuffer::new(capacity, safe_margin),
            max_small_command: capacity.min(RENDER_COMMAND_SIZE_LIMIT),
            driver: driver.map(NoPrint),
        };

        Self { binding: None, lifecycle: Lifecycle::Live, resources: Some(resources) }
    }

    /// Whether the context can still be bound.
    pub(crate) fn is_live(&self) -> bool {
        self.lifecycle == Lifecycle::Live && self.resources.is_some()
    }

    /// Take the resources out for freeing.
    pub(crate) fn free(&mut self) -> Option<Resources> {
        self.lifecycle = Lifecycle::Freed;
        self.resources.take()
    }

    /// Forget the binding, finishing a deferred destruction.
    ///
    /// Returns the resources to drop once the lock is released.
    pub(crate) fn release_binding(&mut self) -> Option<Resources> {
        self.binding = None;
        if self.lifecycle == Lifecycle::PendingDestroy {
            self.free()
        } else {
            None
        }
    }
}
