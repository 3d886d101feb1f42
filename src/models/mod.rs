//! Core data models for promptgrid.

mod config;
mod conversation;
mod error;
mod trial;

pub use config::*;
pub use conversation::*;
pub use error::*;
pub use trial::*;
