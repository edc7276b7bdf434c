//! Binding contexts to the calling thread.
//!
//! All the transitions run under a single process wide lock, which also
//! guards the drawable caches and the deferred frees. A context's own state
//! lock is only ever taken after it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, warn};

use crate::api::indirect::{self, BindRequest};
use crate::connection::{ContextTag, Drawable};
use crate::context::{Binding, Context, ContextInner, ContextState, DriverHandles};
use crate::current::{self, CurrentContext};
use crate::display::Display;
use crate::error::{Error, ErrorKind, Result};

static BIND_LOCK: Mutex<()> = Mutex::new(());

/// Take the lock serializing binds, unbinds and destruction.
pub(crate) fn bind_lock() -> MutexGuard<'static, ()> {
    BIND_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Display {
    /// Make `context` current on the calling thread, drawing to `draw` and
    /// reading from `read`.
    ///
    /// Passing no context and no drawables releases the current context.
    /// The context stays current on this thread until another call replaces
    /// it, it can't be current on two threads at once.
    ///
    /// On error no context should be assumed current, though the previous
    /// one is kept when the new one was rejected before anything was sent.
    pub fn make_current(
        &self,
        draw: Option<Drawable>,
        read: Option<Drawable>,
        context: Option<&Context>,
    ) -> Result<()> {
        let target = match (context, draw, read) {
            (Some(context), Some(draw), Some(read)) => {
                Some(Target { context: &context.inner, draw, read })
            },
            (None, None, None) => None,
            _ => {
                return Err(Error::new(
                    None,
                    Some(String::from("a context needs both drawables, no context takes none")),
                    ErrorKind::BadMatch,
                ))
            },
        };

        let old = current::current();
        let outcome = {
            let _guard = bind_lock();
            match target {
                Some(target) => self.bind(&old, target),
                None => release(&old)
                    .map(|()| CurrentContext::none())
                    .map_err(|error| Failure { error, lost_current: true }),
            }
        };

        match outcome {
            Ok(next) => {
                current::set_current(next);
                Ok(())
            },
            Err(Failure { error, lost_current }) => {
                if lost_current {
                    current::set_current(CurrentContext::none());
                }

                Err(error)
            },
        }
    }

    fn bind(
        &self,
        old: &CurrentContext,
        target: Target<'_>,
    ) -> std::result::Result<CurrentContext, Failure> {
        let new = target.context;
        let thread = thread::current().id();

        {
            let state = new.lock_state();
            if !state.is_live() {
                return Err(Failure::kept(ErrorKind::BadContext.into()));
            }

            if let Some(binding) = &state.binding {
                if binding.thread != thread {
                    return Err(Failure::kept(Error::new(
                        None,
                        Some(format!("context {:#x} is current on another thread", new.xid)),
                        ErrorKind::BadAccess,
                    )));
                }
            }
        }

        let handles = if new.direct {
            Some(self.resolve_handles(new, target.draw, target.read).map_err(Failure::kept)?)
        } else {
            None
        };

        if old.is(new) {
            let mut state = new.lock_state();
            let ContextState { binding, resources, .. } = &mut *state;
            if let (Some(binding), Some(resources)) = (binding, resources) {
                if binding.display.ptr_eq(self) {
                    binding
                        .display
                        .transmitter()
                        .flush(&mut resources.buffer, binding.tag)
                        .map_err(Failure::kept)?;
                    binding.draw = target.draw;
                    binding.read = target.read;
                    binding.handles = handles;
                    debug!("moved context {:#x} to new drawables", new.xid);
                    return Ok(old.clone());
                }
            }
        }

        let old_context = old.context();
        if let Some(old_context) = old_context {
            flush(old_context).map_err(Failure::kept)?;
        }

        // An indirect bind on the same connection releases the old context on
        // the server by itself.
        let old_binding = old_context.and_then(|context| bound_tag(context));
        let implicit_release = match (&old_binding, old_context) {
            (Some((display, _)), Some(old_context)) => {
                !old_context.direct && !new.direct && display.ptr_eq(self)
            },
            _ => false,
        };
        let old_tag = match &old_binding {
            Some((_, tag)) if implicit_release => *tag,
            _ => ContextTag::NONE,
        };

        let tag = self
            .bind_renderer(new, &target, handles.as_ref(), old_tag)
            .map_err(Failure::kept)?;

        if let Some(old_context) = old_context {
            if !implicit_release {
                if let Err(err) = unbind(old_context) {
                    warn!("failed to unbind context {:#x}, rolling back", old_context.xid);
                    self.rollback(new, tag);
                    release_binding(old_context);
                    return Err(Failure { error: err, lost_current: true });
                }
            }

            release_binding(old_context);
        }

        new.lock_state().binding = Some(Binding {
            display: self.clone(),
            draw: target.draw,
            read: target.read,
            tag,
            thread,
            handles,
        });

        debug!(
            "made context {:#x} current with tag {} on drawables {:#x}/{:#x}",
            new.xid,
            tag.raw(),
            target.draw.xid(),
            target.read.xid()
        );

        Ok(CurrentContext::Bound(new.clone()))
    }

    fn resolve_handles(
        &self,
        context: &ContextInner,
        draw: Drawable,
        read: Drawable,
    ) -> Result<DriverHandles> {
        if !context.display.ptr_eq(self) {
            return Err(Error::new(
                None,
                Some(String::from("direct contexts are bound on the display they come from")),
                ErrorKind::BadMatch,
            ));
        }

        let screen = self.screen(context.screen)?;
        let driver = self.driver(screen).ok_or(ErrorKind::BadContext)?;
        let config = context.config.as_ref().ok_or(ErrorKind::BadContext)?;

        let mut drawables = screen.drawables();
        let mut resolve = |drawable: Drawable| {
            drawables.resolve(driver.as_ref(), drawable, config).map_err(|err| {
                Error::new(None, Some(err.to_string()), ErrorKind::BadDrawable)
            })
        };
        let draw_handle = resolve(draw)?;
        let read_handle = if read == draw { draw_handle.clone() } else { resolve(read)? };

        Ok(DriverHandles { draw: draw_handle, read: read_handle })
    }

    fn bind_renderer(
        &self,
        context: &ContextInner,
        target: &Target<'_>,
        handles: Option<&DriverHandles>,
        old_tag: ContextTag,
    ) -> Result<ContextTag> {
        match handles {
            Some(handles) => {
                let mut state = context.lock_state();
                let driver = state
                    .resources
                    .as_mut()
                    .and_then(|resources| resources.driver.as_mut())
                    .ok_or(ErrorKind::BadContext)?;

                if driver.0.bind(handles.draw.as_ref(), handles.read.as_ref()) {
                    Ok(ContextTag::NONE)
                } else {
                    Err(Error::new(
                        None,
                        Some(format!("driver refused to bind context {:#x}", context.xid)),
                        ErrorKind::BadContextState,
                    ))
                }
            },
            None => {
                let negotiated = self.negotiated()?;
                let request = BindRequest {
                    old_tag,
                    context: context.xid,
                    draw: target.draw.xid(),
                    read: target.read.xid(),
                };
                indirect::make_current(self.transmitter(), negotiated.bind.as_ref(), &request)
            },
        }
    }

    /// Undo a bind that went through, best effort.
    fn rollback(&self, context: &ContextInner, tag: ContextTag) {
        let result = if context.direct {
            driver_unbind(context)
        } else {
            self.negotiated().and_then(|negotiated| {
                indirect::make_current(
                    self.transmitter(),
                    negotiated.bind.as_ref(),
                    &BindRequest::unbind(tag),
                )
                .map(drop)
            })
        };

        if let Err(err) = result {
            warn!("failed to roll back the bind of context {:#x}: {err}", context.xid);
        }
    }
}

struct Target<'a> {
    context: &'a Arc<ContextInner>,
    draw: Drawable,
    read: Drawable,
}

/// A failed transition.
struct Failure {
    error: Error,

    /// The calling thread lost its current context.
    lost_current: bool,
}

impl Failure {
    /// Failure leaving everything as it was.
    fn kept(error: Error) -> Self {
        Self { error, lost_current: false }
    }
}

/// Release the calling thread's context.
fn release(old: &CurrentContext) -> Result<()> {
    let Some(context) = old.context() else {
        return Ok(());
    };

    let flushed = flush(context);
    let unbound = unbind(context);
    release_binding(context);

    debug!("released context {:#x}", context.xid);
    flushed.and(unbound)
}

/// Send the pending commands of a bound context.
fn flush(context: &ContextInner) -> Result<()> {
    let mut state = context.lock_state();
    let ContextState { binding, resources, .. } = &mut *state;
    match (binding, resources) {
        (Some(binding), Some(resources)) => {
            binding.display.transmitter().flush(&mut resources.buffer, binding.tag)
        },
        _ => Ok(()),
    }
}

fn bound_tag(context: &ContextInner) -> Option<(Display, ContextTag)> {
    let state = context.lock_state();
    state.binding.as_ref().map(|binding| (binding.display.clone(), binding.tag))
}

/// Unbind the context from its renderer.
fn unbind(context: &ContextInner) -> Result<()> {
    if context.direct {
        return driver_unbind(context);
    }

    let Some((display, tag)) = bound_tag(context) else {
        return Ok(());
    };

    let negotiated = display.negotiated()?;
    let request = BindRequest::unbind(tag);
    indirect::make_current(display.transmitter(), negotiated.bind.as_ref(), &request).map(drop)
}

fn driver_unbind(context: &ContextInner) -> Result<()> {
    let mut state = context.lock_state();
    let driver = state.resources.as_mut().and_then(|resources| resources.driver.as_mut());
    let Some(driver) = driver else {
        return Ok(());
    };

    if driver.0.unbind() {
        Ok(())
    } else {
        Err(Error::new(
            None,
            Some(format!("driver refused to unbind context {:#x}", context.xid)),
            ErrorKind::BadContextState,
        ))
    }
}

/// Forget the binding of the context, freeing it if it was destroyed while
/// current.
fn release_binding(context: &ContextInner) {
    let freed = context.lock_state().release_binding();
    if freed.is_some() {
        debug!("freeing context {:#x} after its last unbind", context.xid);
    }

    drop(freed);
}
