//! srt-process core - platform-independent process supervision types
//!
//! This crate provides the configuration, error type, status model, output
//! capture and the platform seam shared by the platform-specific crates.

mod config;
mod error;
mod process;
mod stdio;

pub use config::*;
pub use error::*;
pub use process::*;
pub use stdio::*;
