use srt_process_core::ProcessControlFactory;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformProcessControlFactory;

impl ProcessControlFactory for PlatformProcessControlFactory {
    #[cfg(unix)]
    type Control = srt_process_unix::UnixProcessControl;

    #[cfg(windows)]
    type Control = srt_process_windows::WindowsProcessControl;

    fn create_process_control() -> Self::Control {
        #[cfg(unix)]
        return srt_process_unix::UnixProcessControlFactory::create_process_control();

        #[cfg(windows)]
        return srt_process_windows::WindowsProcessControlFactory::create_process_control();
    }

    fn platform_name() -> &'static str {
        #[cfg(unix)]
        return srt_process_unix::UnixProcessControlFactory::platform_name();

        #[cfg(windows)]
        return srt_process_windows::WindowsProcessControlFactory::platform_name();
    }
}

/// Process control for the platform this crate was built for
pub type PlatformProcessControl = <PlatformProcessControlFactory as ProcessControlFactory>::Control;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_detection() {
        let platform = PlatformProcessControlFactory::platform_name();
        println!("Running on platform: {platform}");

        #[cfg(unix)]
        assert_eq!(platform, "Unix");

        #[cfg(windows)]
        assert_eq!(platform, "Windows");

        let _control = PlatformProcessControlFactory::create_process_control();
    }
}
