//! The glxclient prelude.
//!
//! Brings the traits the caller implements to plug its connection, driver
//! and config selection in.
//!
//! ```no_run
//! # #![allow(unused_imports)]
//! use glxclient::prelude::*;
//! ```

pub use crate::api::direct::{DriverContext, DriverDrawable, DriverLoader, DriverScreen};
pub use crate::config::ConfigResolver;
pub use crate::connection::Connection;
