//! The two renderers a context is backed by.

pub mod direct;
pub mod indirect;
