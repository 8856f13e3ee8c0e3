use async_trait::async_trait;
use srt_process_core::{ProcessControl, ProcessId, TerminationResult};
use tokio::process::Command;
use tracing::{info, warn};

/// `taskkill` exit code when no process matches the pid
const TASKKILL_NOT_FOUND: i32 = 128;

/// Windows process control: new process group on spawn, console events and
/// `taskkill` for signalling
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsProcessControl;

impl WindowsProcessControl {
    pub fn new() -> Self {
        Self
    }

    /// Use taskkill with /F /T to kill a process and its descendants
    async fn taskkill_tree(&self, pid: ProcessId) -> anyhow::Result<TerminationResult> {
        let output = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .output()
            .await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(classify_taskkill(output.status.code(), &stderr))
    }

    #[cfg(windows)]
    fn ctrl_break(&self, pid: ProcessId) -> anyhow::Result<()> {
        use windows::Win32::System::Console::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent};

        // CTRL_C_EVENT cannot target a single process group, CTRL_BREAK can.
        unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) }?;
        Ok(())
    }

    #[cfg(not(windows))]
    fn ctrl_break(&self, _pid: ProcessId) -> anyhow::Result<()> {
        Err(anyhow::anyhow!(
            "Console control events are not available on this platform"
        ))
    }
}

#[async_trait]
impl ProcessControl for WindowsProcessControl {
    fn configure(&self, command: &mut Command) {
        #[cfg(windows)]
        {
            use windows::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP;
            command.creation_flags(CREATE_NEW_PROCESS_GROUP.0);
        }

        #[cfg(not(windows))]
        let _ = command;
    }

    async fn interrupt(&self, pid: ProcessId) -> TerminationResult {
        match self.ctrl_break(pid) {
            Ok(()) => {
                info!(pid = %pid, "Sent CTRL_BREAK to process group");
                TerminationResult::Success
            }
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to send CTRL_BREAK to process group");
                TerminationResult::Failed(format!("CTRL_BREAK failed: {e}"))
            }
        }
    }

    async fn force_kill(&self, pid: ProcessId) -> TerminationResult {
        match self.taskkill_tree(pid).await {
            Ok(TerminationResult::Success) => {
                info!(pid = %pid, "Force killed process tree");
                TerminationResult::Success
            }
            Ok(TerminationResult::ProcessNotFound) => {
                info!(pid = %pid, "Process not found for force kill");
                TerminationResult::ProcessNotFound
            }
            Ok(result) => {
                warn!(pid = %pid, result = ?result, "taskkill could not kill process tree");
                result
            }
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to force kill process");
                TerminationResult::Failed(format!("Force kill failed: {e}"))
            }
        }
    }
}

/// Map a `taskkill` exit code and its stderr onto a termination result.
fn classify_taskkill(code: Option<i32>, stderr: &str) -> TerminationResult {
    match code {
        Some(0) => TerminationResult::Success,
        Some(TASKKILL_NOT_FOUND) => TerminationResult::ProcessNotFound,
        _ if stderr.to_ascii_lowercase().contains("access is denied") => {
            TerminationResult::AccessDenied
        }
        Some(code) => TerminationResult::Failed(format!(
            "taskkill exited with {code}: {}",
            stderr.trim()
        )),
        None => TerminationResult::Failed(format!("taskkill was terminated: {}", stderr.trim())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_taskkill() {
        assert_eq!(classify_taskkill(Some(0), ""), TerminationResult::Success);
        assert_eq!(
            classify_taskkill(
                Some(128),
                "ERROR: The process \"4242\" not found.\r\n"
            ),
            TerminationResult::ProcessNotFound
        );
        assert_eq!(
            classify_taskkill(
                Some(1),
                "ERROR: The process with PID 4 could not be terminated.\r\nReason: Access is denied.\r\n"
            ),
            TerminationResult::AccessDenied
        );
        assert!(!classify_taskkill(Some(1), "Reason: Access is denied.").is_settled());

        let result = classify_taskkill(Some(255), "ERROR: Invalid argument\r\n");
        assert_eq!(
            result,
            TerminationResult::Failed("taskkill exited with 255: ERROR: Invalid argument".to_string())
        );
        assert!(matches!(classify_taskkill(None, ""), TerminationResult::Failed(_)));
    }

    #[cfg(not(windows))]
    #[tokio::test]
    async fn test_interrupt_unavailable_off_windows() {
        let control = WindowsProcessControl::new();
        let result = control.interrupt(1).await;
        assert!(matches!(result, TerminationResult::Failed(_)));
    }

    #[cfg(windows)]
    #[tokio::test]
    async fn test_force_kill_ping() {
        let control = WindowsProcessControl::new();
        let mut command = Command::new("ping");
        command
            .args(["127.0.0.1", "-n", "10"])
            .stdout(std::process::Stdio::null())
            .kill_on_drop(true);
        control.configure(&mut command);
        let mut child = command.spawn().unwrap();
        let pid = child.id().unwrap();

        assert_eq!(control.force_kill(pid).await, TerminationResult::Success);
        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }
}
