use async_trait::async_trait;
use srt_process_core::{ProcessControl, ProcessId, TerminationResult};
use tokio::process::Command;

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use tracing::{info, warn};

    /// Unix process control: new process group on spawn, signals via `kill(2)`
    #[derive(Debug, Default, Clone, Copy)]
    pub struct UnixProcessControl;

    impl UnixProcessControl {
        pub fn new() -> Self {
            Self
        }

        fn send(&self, pid: ProcessId, sig: Signal) -> TerminationResult {
            let nix_pid = NixPid::from_raw(pid as i32);

            match signal::kill(nix_pid, sig) {
                Ok(()) => {
                    info!(pid = %pid, signal = %sig, "Sent signal to process");
                    TerminationResult::Success
                }
                Err(nix::errno::Errno::ESRCH) => {
                    info!(pid = %pid, "Process not found (already terminated)");
                    TerminationResult::ProcessNotFound
                }
                Err(nix::errno::Errno::EPERM) => {
                    warn!(pid = %pid, signal = %sig, "Permission denied to signal process");
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!(pid = %pid, signal = %sig, error = %e, "Failed to signal process");
                    TerminationResult::Failed(format!("{sig} failed: {e}"))
                }
            }
        }
    }

    #[async_trait]
    impl ProcessControl for UnixProcessControl {
        fn configure(&self, command: &mut Command) {
            // Own process group, so the child can be signalled apart from us.
            command.process_group(0);
        }

        async fn interrupt(&self, pid: ProcessId) -> TerminationResult {
            self.send(pid, Signal::SIGINT)
        }

        async fn force_kill(&self, pid: ProcessId) -> TerminationResult {
            self.send(pid, Signal::SIGKILL)
        }
    }
}

#[cfg(unix)]
pub use unix_impl::UnixProcessControl;

// Provide stub implementations for non-Unix systems
#[cfg(not(unix))]
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixProcessControl;

#[cfg(not(unix))]
impl UnixProcessControl {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(unix))]
#[async_trait]
impl ProcessControl for UnixProcessControl {
    fn configure(&self, _command: &mut Command) {}

    async fn interrupt(&self, _pid: ProcessId) -> TerminationResult {
        TerminationResult::Failed("Unix signals are not available on this platform".to_string())
    }

    async fn force_kill(&self, _pid: ProcessId) -> TerminationResult {
        TerminationResult::Failed("Unix signals are not available on this platform".to_string())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Duration;

    fn sleeper(control: &UnixProcessControl) -> tokio::process::Child {
        let mut command = Command::new("sleep");
        command
            .arg("5")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        control.configure(&mut command);
        command.spawn().unwrap()
    }

    #[tokio::test]
    async fn test_interrupt_stops_sleep() {
        let control = UnixProcessControl::new();
        let mut child = sleeper(&control);
        let pid = child.id().unwrap();

        assert_eq!(control.interrupt(pid).await, TerminationResult::Success);

        let status = tokio::time::timeout(Duration::from_secs(2), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_force_kill() {
        let control = UnixProcessControl::new();
        let mut child = sleeper(&control);
        let pid = child.id().unwrap();

        assert_eq!(control.force_kill(pid).await, TerminationResult::Success);

        let status = tokio::time::timeout(Duration::from_secs(2), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_child_gets_own_process_group() {
        let control = UnixProcessControl::new();
        let child = sleeper(&control);
        let pid = child.id().unwrap();

        let pgid = nix::unistd::getpgid(Some(nix::unistd::Pid::from_raw(pid as i32))).unwrap();
        assert_eq!(pgid.as_raw(), pid as i32);
    }
}
