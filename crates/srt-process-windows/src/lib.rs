//! Windows-specific process control implementation

mod windows_process_control;

pub use windows_process_control::WindowsProcessControl;

use srt_process_core::ProcessControlFactory;

/// Windows-specific process control factory
pub struct WindowsProcessControlFactory;

impl ProcessControlFactory for WindowsProcessControlFactory {
    type Control = WindowsProcessControl;

    fn create_process_control() -> Self::Control {
        WindowsProcessControl::new()
    }

    fn platform_name() -> &'static str {
        "Windows"
    }
}
