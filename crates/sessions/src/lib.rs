//! Session reconstruction from ordered listening events.

pub mod builder;

pub use builder::SessionBuilder;
