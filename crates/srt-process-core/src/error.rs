use crate::process::StatusReport;
use thiserror::Error;

/// Every way supervising a process can fail
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Process has been started already: {identifier}. Start can not be done")]
    AlreadyStarted { identifier: String },

    #[error("Process has not been started: {args:?}. {source}")]
    Spawn {
        args: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Process has not been started: {args:?}, returncode: {}, stdout: {stdout}, stderr: {stderr}",
        .report.returncode_text()
    )]
    LaunchValidation {
        args: Vec<String>,
        report: StatusReport,
        stdout: String,
        stderr: String,
    },

    #[error("Process has not been started yet. {operation} can not be done")]
    NotStarted { operation: &'static str },

    #[error("Process start has been cancelled: {args:?}")]
    Cancelled { args: Vec<String> },

    #[error("Process has not been terminated: {identifier}")]
    NotTerminated { identifier: String },

    #[error("Process has not been killed: {identifier}")]
    NotKilled { identifier: String },

    #[error("Process has not been stopped: {identifier}")]
    NotStopped { identifier: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ProcessError {
    /// The launch itself went wrong: the OS refused it or the child
    /// reported an error during the grace period.
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            ProcessError::Spawn { .. } | ProcessError::LaunchValidation { .. }
        )
    }

    /// Decoded stderr of a failed launch, if any was captured.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            ProcessError::LaunchValidation { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
