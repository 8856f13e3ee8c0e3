use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::ExitStatus;
use tokio::process::Command;

/// OS process identifier
pub type ProcessId = u32;

/// Coarse state of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    #[display("idle")]
    Idle,
    #[display("running")]
    Running,
}

/// Return code attached to a status report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    /// No code yet, the process is still running. Renders as an empty string.
    Pending,
    /// Process exited normally with the given exit code
    Exited(i32),
    /// Process was terminated by the given signal (Unix only)
    Signaled(i32),
}

impl ReturnCode {
    pub fn from_exit_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ReturnCode::Exited(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ReturnCode::Signaled(signal);
            }
        }

        // Neither a code nor a signal; treat it as an abnormal exit.
        ReturnCode::Exited(-1)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ReturnCode::Exited(0))
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnCode::Pending => Ok(()),
            ReturnCode::Exited(code) => write!(f, "{code}"),
            ReturnCode::Signaled(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// Result of a status query: `(status, returncode)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub status: ProcessStatus,
    pub returncode: Option<ReturnCode>,
}

impl StatusReport {
    /// Running with the empty return-code marker.
    pub fn running() -> Self {
        Self {
            status: ProcessStatus::Running,
            returncode: Some(ReturnCode::Pending),
        }
    }

    /// Idle without a return code.
    pub fn idle() -> Self {
        Self {
            status: ProcessStatus::Idle,
            returncode: None,
        }
    }

    pub fn exited(status: ExitStatus) -> Self {
        Self {
            status: ProcessStatus::Idle,
            returncode: Some(ReturnCode::from_exit_status(status)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ProcessStatus::Running
    }

    /// Return code as shown in messages, `None` when absent.
    pub fn returncode_text(&self) -> String {
        match self.returncode {
            Some(code) => code.to_string(),
            None => "None".to_string(),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.status, self.returncode_text())
    }
}

/// Result of sending a signal to a process
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Signal was delivered
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Permission denied (insufficient privileges)
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

impl TerminationResult {
    /// Delivered, or nothing left to deliver to.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            TerminationResult::Success | TerminationResult::ProcessNotFound
        )
    }
}

/// Platform-specific part of launching and signalling a child process
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Apply platform creation flags before spawning (new process group).
    fn configure(&self, command: &mut Command);

    /// Ask the process to stop (SIGINT on Unix, CTRL_BREAK on Windows).
    async fn interrupt(&self, pid: ProcessId) -> TerminationResult;

    /// Kill the process without giving it a chance to clean up.
    async fn force_kill(&self, pid: ProcessId) -> TerminationResult;
}

/// Factory trait for creating platform-specific process controls
pub trait ProcessControlFactory {
    /// The type of process control this factory creates
    type Control: ProcessControl;

    /// Create a process control for the current platform
    fn create_process_control() -> Self::Control;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}
