//! The client side core of GLX.
//!
//! The crate tracks which [`Context`] is current on each thread and keeps
//! the client and the server agreeing on it. Rendering commands issued on
//! a thread are either packed into the current context's buffer and sent to
//! the X server as `GLXRender` requests, or handed to a direct rendering
//! driver living in the process.
//!
//! A [`Display`] is built over a [`Connection`] provided by the caller:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # fn connection() -> Arc<dyn glxclient::connection::Connection> { unimplemented!() }
//! use glxclient::config::ConfigRecord;
//! use glxclient::connection::Drawable;
//! use glxclient::context::ContextAttributesBuilder;
//! use glxclient::display::DisplayBuilder;
//!
//! let display = DisplayBuilder::new().build(connection()).unwrap();
//! let config = ConfigRecord::visual(0, 0x21);
//! let context =
//!     display.create_context(&config, &ContextAttributesBuilder::new().build()).unwrap();
//!
//! let window = Drawable::new(0x400001);
//! display.make_current(window, window, Some(&context)).unwrap();
//! glxclient::render::render(0x0101, &[0; 8]).unwrap();
//! glxclient::render::flush().unwrap();
//! display.make_current(None, None, None).unwrap();
//! ```
//!
//! [`Context`]: crate::context::Context
//! [`Display`]: crate::display::Display
//! [`Connection`]: crate::connection::Connection

#![deny(
    missing_debug_implementations,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod api;
pub mod config;
pub mod connection;
pub mod context;
pub mod current;
pub mod display;
pub mod error;
pub mod prelude;
pub mod render;

mod make_current;
mod utils;
