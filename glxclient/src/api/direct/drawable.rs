//! The per screen cache of the driver's drawable handles.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::config::{ConfigRecord, TextureFormat, TextureTargets};
use crate::connection::Drawable;
use crate::error::{Error, ErrorKind, Result};

use super::{DriverDrawable, DriverScreen};

/// A cached driver handle and the texture attributes of its config.
#[derive(Debug, Clone)]
pub(crate) struct DrawableBinding {
    pub handle: Arc<dyn DriverDrawable>,
    pub texture_targets: TextureTargets,
    pub texture_format: TextureFormat,
}

/// The driver handles created for the drawables of a screen.
///
/// Resolving the same drawable twice gives the same handle until it's
/// released.
#[derive(Debug, Default)]
pub(crate) struct DrawableBinder {
    bindings: HashMap<Drawable, DrawableBinding>,
}

impl DrawableBinder {
    /// Get the driver handle for the drawable, creating it on first use.
    pub(crate) fn resolve(
        &mut self,
        driver: &dyn DriverScreen,
        drawable: Drawable,
        config: &ConfigRecord,
    ) -> Result<Arc<dyn DriverDrawable>> {
        if let Some(binding) = self.bindings.get(&drawable) {
            return Ok(binding.handle.clone());
        }

        let handle = driver.create_drawable(drawable, config).ok_or_else(|| {
            Error::new(
                None,
                Some(format!("driver refused to create drawable {:#x}", drawable.xid())),
                ErrorKind::NotFound,
            )
        })?;

        debug!("created driver handle for drawable {:#x}", drawable.xid());
        self.bindings.insert(drawable, DrawableBinding {
            handle: handle.clone(),
            texture_targets: config.texture_targets,
            texture_format: config.texture_format,
        });

        Ok(handle)
    }

    /// The cached binding of the drawable.
    pub(crate) fn get(&self, drawable: Drawable) -> Option<&DrawableBinding> {
        self.bindings.get(&drawable)
    }

    /// Drop the handle of the drawable, returns whether there was one.
    ///
    /// Contexts still bound to the drawable keep the handle alive.
    pub(crate) fn release(&mut self, drawable: Drawable) -> bool {
        let released = self.bindings.remove(&drawable).is_some();
        if released {
            debug!("released driver handle for drawable {:#x}", drawable.xid());
        }

        released
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::api::direct::DriverContext;

    struct Handle(Drawable);

    impl DriverDrawable for Handle {
        fn drawable(&self) -> Drawable {
            self.0
        }
    }

    #[derive(Default)]
    struct Screen {
        created: AtomicUsize,
        refuse: bool,
    }

    impl DriverScreen for Screen {
        fn create_context(
            &self,
            _config: &ConfigRecord,
            _shared: Option<&dyn DriverContext>,
        ) -> Option<Box<dyn DriverContext>> {
            None
        }

        fn create_drawable(
            &self,
            drawable: Drawable,
            _config: &ConfigRecord,
        ) -> Option<Arc<dyn DriverDrawable>> {
            if self.refuse {
                return None;
            }

            self.created.fetch_add(1, Ordering::Relaxed);
            Some(Arc::new(Handle(drawable)))
        }
    }

    fn drawable(xid: u32) -> Drawable {
        Drawable::new(xid).unwrap()
    }

    #[test]
    fn resolve_is_cached() {
        let screen = Screen::default();
        let config = ConfigRecord::visual(0, 0x21);
        let mut binder = DrawableBinder::default();

        let first = binder.resolve(&screen, drawable(0x400001), &config).unwrap();
        let second = binder.resolve(&screen, drawable(0x400001), &config).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(screen.created.load(Ordering::Relaxed), 1);

        binder.resolve(&screen, drawable(0x400002), &config).unwrap();
        assert!(binder.get(drawable(0x400002)).is_some());
    }

    #[test]
    fn release_then_resolve_creates_a_new_handle() {
        let screen = Screen::default();
        let mut config = ConfigRecord::visual(0, 0x21);
        config.texture_targets = TextureTargets::TEXTURE_2D;
        let mut binder = DrawableBinder::default();

        let first = binder.resolve(&screen, drawable(0x400001), &config).unwrap();
        assert_eq!(
            binder.get(drawable(0x400001)).unwrap().texture_targets,
            TextureTargets::TEXTURE_2D
        );

        assert!(binder.release(drawable(0x400001)));
        assert!(!binder.release(drawable(0x400001)));
        assert!(binder.get(drawable(0x400001)).is_none());

        let second = binder.resolve(&screen, drawable(0x400001), &config).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(screen.created.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn refused_creation_caches_nothing() {
        let screen = Screen { refuse: true, ..Default::default() };
        let config = ConfigRecord::visual(0, 0x21);
        let mut binder = DrawableBinder::default();

        let err = binder.resolve(&screen, drawable(0x400001), &config).unwrap_err();
        assert_eq!(err.error_kind(), ErrorKind::NotFound);
        assert!(binder.get(drawable(0x400001)).is_none());
    }
}
