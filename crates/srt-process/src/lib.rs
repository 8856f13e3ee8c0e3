//! srt-process - supervise one external process per handle
//!
//! A [`ProcessHandle`] launches an executable (optionally through ssh),
//! waits a grace period for it to settle and fails fast if it reported an
//! error on stderr. The platform-specific part (process groups, signals) is
//! selected at compile time.

mod factory;
mod handle;

pub use factory::{PlatformProcessControl, PlatformProcessControlFactory};
pub use handle::{ProcessHandle, StartOptions};

// Re-export core functionality
pub use srt_process_core::*;
pub use tokio_util::sync::CancellationToken;
