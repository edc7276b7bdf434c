//! The context current on each thread.
//!
//! Every thread starts with the [`SentinelContext`], so asking for the
//! current context always yields something.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use crate::connection::{ContextTag, Drawable};
use crate::context::{Context, ContextInner};
use crate::display::Display;

/// The "no context is current" placeholder.
pub struct SentinelContext {
    tag: ContextTag,
}

impl SentinelContext {
    /// The sentinel never holds a binding.
    pub fn tag(&self) -> ContextTag {
        self.tag
    }
}

impl fmt::Debug for SentinelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SentinelContext")
    }
}

/// The single sentinel shared by all threads.
pub static SENTINEL: SentinelContext = SentinelContext { tag: ContextTag::NONE };

/// What a thread has current.
#[derive(Debug, Clone)]
pub(crate) enum CurrentContext {
    Sentinel(&'static SentinelContext),
    Bound(Arc<ContextInner>),
}

impl CurrentContext {
    #[inline]
    pub(crate) fn none() -> Self {
        CurrentContext::Sentinel(&SENTINEL)
    }

    /// The real context, `None` for the sentinel.
    #[inline]
    pub(crate) fn context(&self) -> Option<&Arc<ContextInner>> {
        match self {
            CurrentContext::Sentinel(_) => None,
            CurrentContext::Bound(context) => Some(context),
        }
    }

    #[inline]
    pub(crate) fn is(&self, context: &Arc<ContextInner>) -> bool {
        self.context().map_or(false, |current| Arc::ptr_eq(current, context))
    }

    /// The tag requests for the current context carry.
    pub(crate) fn tag(&self) -> ContextTag {
        match self {
            CurrentContext::Sentinel(sentinel) => sentinel.tag(),
            CurrentContext::Bound(context) => {
                let state = context.lock_state();
                state.binding.as_ref().map_or(ContextTag::NONE, |binding| binding.tag)
            },
        }
    }
}

thread_local! {
    static CURRENT: RefCell<CurrentContext> = RefCell::new(CurrentContext::none());
}

/// The calling thread's current context.
pub(crate) fn current() -> CurrentContext {
    CURRENT.with(|current| current.borrow().clone())
}

/// Replace the calling thread's current context.
pub(crate) fn set_current(context: CurrentContext) {
    // The old context may be dropped here, so not while borrowed.
    let old = CURRENT.with(|current| current.replace(context));
    drop(old);
}

/// The context current on the calling thread.
pub fn current_context() -> Option<Context> {
    current().context().map(|inner| Context { inner: inner.clone() })
}

/// The tag of the current context's binding.
///
/// It's [`ContextTag::NONE`] with no context or a direct context current.
pub fn current_context_tag() -> ContextTag {
    current().tag()
}

/// The drawable the current context draws to.
pub fn current_draw_drawable() -> Option<Drawable> {
    let current = current();
    let state = current.context()?.lock_state();
    state.binding.as_ref().map(|binding| binding.draw)
}

/// The drawable the current context reads from.
pub fn current_read_drawable() -> Option<Drawable> {
    let current = current();
    let state = current.context()?.lock_state();
    state.binding.as_ref().map(|binding| binding.read)
}

/// The display the current context is bound on.
pub fn current_display() -> Option<Display> {
    let current = current();
    let state = current.context()?.lock_state();
    state.binding.as_ref().map(|binding| binding.display.clone())
}
