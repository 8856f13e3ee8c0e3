//! Unix-specific process control implementation

mod unix_process_control;

pub use unix_process_control::UnixProcessControl;

use srt_process_core::ProcessControlFactory;

/// Unix-specific process control factory
pub struct UnixProcessControlFactory;

impl ProcessControlFactory for UnixProcessControlFactory {
    type Control = UnixProcessControl;

    fn create_process_control() -> Self::Control {
        UnixProcessControl::new()
    }

    fn platform_name() -> &'static str {
        "Unix"
    }
}
