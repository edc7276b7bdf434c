//! The direct renderer, a driver loaded into the client process.
//!
//! Loading the driver and talking to the kernel is the business of the
//! [`DriverLoader`] implementation the display is built with. The crate
//! only drives the objects it hands out.

use std::fmt;
use std::sync::Arc;

use crate::config::ConfigRecord;
use crate::connection::Drawable;

pub(crate) mod drawable;

/// Loads the direct rendering driver of a screen.
pub trait DriverLoader: Send + Sync {
    /// The driver of the screen, `None` if the screen can't render directly.
    ///
    /// Called at most once per screen of a display.
    fn driver_for_screen(&self, screen: i32) -> Option<Arc<dyn DriverScreen>>;
}

/// A direct rendering driver bound to a screen.
pub trait DriverScreen: Send + Sync {
    /// Create the driver side of a context.
    ///
    /// `None` means the driver refused, the context falls back to indirect
    /// rendering then.
    fn create_context(
        &self,
        config: &ConfigRecord,
        shared: Option<&dyn DriverContext>,
    ) -> Option<Box<dyn DriverContext>>;

    /// Create the driver handle for the drawable.
    fn create_drawable(
        &self,
        drawable: Drawable,
        config: &ConfigRecord,
    ) -> Option<Arc<dyn DriverDrawable>>;
}

/// The driver side of a context.
///
/// Dropping it destroys it.
pub trait DriverContext: Send {
    /// Bind the context to the drawables, `false` when the driver refused.
    fn bind(&mut self, draw: &dyn DriverDrawable, read: &dyn DriverDrawable) -> bool;

    /// Release the context from the drawables.
    fn unbind(&mut self) -> bool;

    /// Execute an encoded render command.
    fn execute(&mut self, opcode: u32, payload: &[u8]);

    /// Submit the queued rendering.
    fn flush(&mut self) {}

    /// Block until the rendering into `draw` finished.
    fn wait_gl(&mut self, _draw: &dyn DriverDrawable) {}

    /// Block until the X rendering into `draw` finished.
    fn wait_x(&mut self, _draw: &dyn DriverDrawable) {}
}

/// The driver's handle for a drawable.
///
/// Dropping the last reference destroys it.
pub trait DriverDrawable: Send + Sync {
    /// The drawable the handle renders to.
    fn drawable(&self) -> Drawable;
}

impl fmt::Debug for dyn DriverDrawable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverDrawable").field("drawable", &self.drawable()).finish()
    }
}
