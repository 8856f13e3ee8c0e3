use crate::factory::{PlatformProcessControl, PlatformProcessControlFactory};
use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use srt_process_core::{
    CaptureBuffer, CapturedOutput, ProcessConfig, ProcessControl, ProcessControlFactory,
    ProcessError, ProcessId, ProcessStatus, StatusMode, StatusReport, TerminationPolicy,
    WaitMode, capture,
};
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-call overrides for [`ProcessHandle::start_with`]
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Replaces the configured grace period for this call
    pub grace: Option<Duration>,
    /// Aborts the wait when cancelled
    pub cancel: Option<CancellationToken>,
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = Some(grace);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// The OS process plus the buffers its output pipes are drained into.
#[derive(Debug)]
struct NativeProcess {
    child: Mutex<Child>,
    pid: Option<ProcessId>,
    stdout: CaptureBuffer,
    stderr: CaptureBuffer,
    readers: Vec<JoinHandle<io::Result<()>>>,
}

#[derive(Debug)]
enum ExitProbe {
    Running,
    Failed(io::Error),
}

impl NativeProcess {
    fn spawn<C: ProcessControl>(config: &ProcessConfig, control: &C) -> io::Result<Self> {
        let (program, rest) = config.args.split_first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "empty argument list")
        })?;

        let mut command = Command::new(program);
        command
            .args(rest)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        control.configure(&mut command);

        let mut child = command.spawn()?;

        let stdout = CaptureBuffer::with_limit(config.capture_limit);
        let stderr = CaptureBuffer::with_limit(config.capture_limit);
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(tokio::spawn(capture(out, stdout.clone())));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(tokio::spawn(capture(err, stderr.clone())));
        }

        Ok(Self {
            pid: child.id(),
            child: Mutex::new(child),
            stdout,
            stderr,
            readers,
        })
    }

    fn lock_child(&self) -> MutexGuard<'_, Child> {
        self.child
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_exit(&self) -> io::Result<Option<ExitStatus>> {
        self.lock_child().try_wait()
    }

    fn probe_exit(&self) -> Result<ExitStatus, ExitProbe> {
        match self.try_exit() {
            Ok(Some(status)) => Ok(status),
            Ok(None) => Err(ExitProbe::Running),
            Err(e) => Err(ExitProbe::Failed(e)),
        }
    }

    fn live_status(&self) -> io::Result<StatusReport> {
        Ok(match self.try_exit()? {
            Some(status) => StatusReport::exited(status),
            None => StatusReport::running(),
        })
    }

    /// Poll until the child exits.
    async fn wait_for_exit(&self, poll_interval: Duration) -> io::Result<ExitStatus> {
        loop {
            if let Some(status) = self.try_exit()? {
                return Ok(status);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Wait for the child to exit and its pipes to be drained.
    async fn run_to_completion(&mut self, poll_interval: Duration) -> anyhow::Result<()> {
        let status = self.wait_for_exit(poll_interval).await?;
        debug!(pid = ?self.pid, status = %status, "Process exited, draining output");
        self.drain().await
    }

    /// Wait for the pipe readers to hit EOF.
    ///
    /// Cancel safe: a reader is only forgotten once it has finished, so an
    /// interrupted drain can be resumed later.
    async fn drain(&mut self) -> anyhow::Result<()> {
        while let Some(reader) = self.readers.last_mut() {
            let finished = reader.await.context("output reader task failed");
            self.readers.pop();
            finished??;
        }
        Ok(())
    }

    fn output(&self) -> CapturedOutput {
        CapturedOutput::from_buffers(&self.stdout, &self.stderr)
    }
}

/// Owns the lifecycle of exactly one external process.
///
/// `start` launches the process, leaves it alone for a grace period and
/// rejects the launch if anything was written to stderr in the meantime.
/// `stop` only marks the handle stopped; `terminate`, `kill` and `shutdown`
/// actually signal the process.
#[derive(Debug)]
pub struct ProcessHandle<C: ProcessControl = PlatformProcessControl> {
    config: ProcessConfig,
    control: Arc<C>,
    native: Option<NativeProcess>,
    identifier: String,
    has_started: bool,
    has_stopped: bool,
}

impl ProcessHandle {
    /// Handle for `args` (executable first) with default policies.
    pub fn new<S: ToString, I: IntoIterator<Item = S>>(args: I, is_remote: bool) -> Self {
        Self::with_config(ProcessConfig::new(args, is_remote))
    }

    pub fn with_config(config: ProcessConfig) -> Self {
        let control = PlatformProcessControlFactory::create_process_control();
        Self::with_control(config, Arc::new(control))
    }
}

impl<C: ProcessControl> ProcessHandle<C> {
    pub fn with_control(config: ProcessConfig, control: Arc<C>) -> Self {
        Self {
            config,
            control,
            native: None,
            identifier: String::new(),
            has_started: false,
            has_stopped: false,
        }
    }

    pub fn arguments(&self) -> &[String] {
        &self.config.args
    }

    pub fn is_remote(&self) -> bool {
        self.config.is_remote
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Empty until the process is confirmed started.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn has_started(&self) -> bool {
        self.has_started
    }

    pub fn has_stopped(&self) -> bool {
        self.has_stopped
    }

    /// OS pid of the last launch attempt, if one was spawned.
    pub fn pid(&self) -> Option<ProcessId> {
        self.native.as_ref().and_then(|native| native.pid)
    }

    fn native(&self, operation: &'static str) -> Result<&NativeProcess, ProcessError> {
        self.native
            .as_ref()
            .ok_or(ProcessError::NotStarted { operation })
    }

    fn ensure_started(&self, operation: &'static str) -> Result<&NativeProcess, ProcessError> {
        if !self.has_started {
            return Err(ProcessError::NotStarted { operation });
        }
        self.native(operation)
    }

    pub async fn start(&mut self) -> Result<(), ProcessError> {
        self.start_with(StartOptions::default()).await
    }

    /// Launch the process and judge it.
    ///
    /// The wait before judging is bounded by the grace period (or the
    /// override in `options`) in both wait modes. In `RunToCompletion` a
    /// child that outlives it is judged on what it has done so far.
    ///
    /// Fails with `AlreadyStarted` if a previous call succeeded, `Spawn` if
    /// the OS refused to create the process, `LaunchValidation` if the
    /// process wrote to stderr before it was judged, and `Cancelled` if the
    /// token in `options` fired during the wait.
    pub async fn start_with(&mut self, options: StartOptions) -> Result<(), ProcessError> {
        debug!(args = ?self.config.args, "Starting process");

        if self.has_started {
            return Err(ProcessError::AlreadyStarted {
                identifier: self.identifier.clone(),
            });
        }

        // Dropping an earlier failed attempt kills its child.
        self.native = None;
        let spawned = NativeProcess::spawn(&self.config, self.control.as_ref()).map_err(
            |source| ProcessError::Spawn {
                args: self.config.args.clone(),
                source,
            },
        )?;
        let native = self.native.insert(spawned);

        let cancel = options.cancel.unwrap_or_default();
        let grace = options
            .grace
            .unwrap_or_else(|| self.config.grace_period());
        let completed = match self.config.wait_mode {
            WaitMode::Detached => {
                tokio::select! {
                    _ = tokio::time::sleep(grace) => true,
                    _ = cancel.cancelled() => false,
                }
            }
            WaitMode::RunToCompletion => {
                let poll_interval = self.config.grace.poll_interval();
                tokio::select! {
                    finished = native.run_to_completion(poll_interval) => { finished?; true }
                    _ = tokio::time::sleep(grace) => {
                        debug!(?grace, "Process did not complete within the grace period");
                        true
                    }
                    _ = cancel.cancelled() => false,
                }
            }
        };

        if !completed {
            if let Err(e) = native.lock_child().start_kill() {
                warn!(error = %e, "Failed to kill process after cancelled start");
            }
            return Err(ProcessError::Cancelled {
                args: self.config.args.clone(),
            });
        }

        let report = self.status()?;
        let native = self.native("Start")?;
        let pid = native.pid;
        let stderr = native.stderr.decoded();
        let exited_abnormally = self.config.status_mode == StatusMode::Live
            && report
                .returncode
                .is_some_and(|code| report.status == ProcessStatus::Idle && !code.is_success());

        if !stderr.is_empty() || exited_abnormally {
            warn!(args = ?self.config.args, report = %report, "Process has not been started");
            return Err(ProcessError::LaunchValidation {
                args: self.config.args.clone(),
                report,
                stdout: native.stdout.decoded(),
                stderr,
            });
        }

        self.identifier = Uuid::new_v4().to_string();
        self.has_started = true;
        info!(identifier = %self.identifier, pid = ?pid, "Started successfully");
        Ok(())
    }

    /// `(status, returncode)` of the last launch attempt.
    ///
    /// In `StatusMode::Replica` any captured stderr output means
    /// `(Idle, None)` and everything else `(Running, "")`, whether or not
    /// the process is actually alive. `StatusMode::Live` asks the OS.
    pub fn status(&self) -> Result<StatusReport, ProcessError> {
        let native = self.native("Get status")?;

        match self.config.status_mode {
            StatusMode::Replica => Ok(if native.stderr.is_empty() {
                StatusReport::running()
            } else {
                StatusReport::idle()
            }),
            StatusMode::Live => Ok(native.live_status()?),
        }
    }

    /// Mark the handle stopped. Sends nothing to the process.
    pub fn stop(&mut self) {
        if !self.has_stopped {
            debug!(identifier = %self.identifier, "Marking process stopped");
        }
        self.has_stopped = true;
    }

    /// Interrupt the process and wait for it to exit.
    pub async fn terminate(&mut self) -> Result<(), ProcessError> {
        debug!(identifier = %self.identifier, "Terminating process");
        let native = self.ensure_started("Terminate")?;

        let pid = match native.pid {
            Some(pid) if native.live_status()?.is_running() => pid,
            _ => {
                debug!("Process is idle, no need to terminate");
                self.has_stopped = true;
                return Ok(());
            }
        };

        let sent = self.control.interrupt(pid).await;
        if !sent.is_settled() {
            warn!(pid = %pid, result = ?sent, "Interrupt was not delivered");
            return Err(ProcessError::NotTerminated {
                identifier: self.identifier.clone(),
            });
        }

        let policy = &self.config.termination;
        tokio::time::sleep(policy.poll_interval()).await;

        let exited = (move || async move { native.probe_exit() })
            .retry(exit_checks(policy))
            .when(|probe| matches!(probe, ExitProbe::Running))
            .notify(|_, delay| debug!(pid = %pid, ?delay, "Process still running after interrupt"))
            .await;

        match exited {
            Ok(status) => {
                info!(pid = %pid, status = %status, "Terminated successfully");
                self.has_stopped = true;
                Ok(())
            }
            Err(ExitProbe::Running) => Err(ProcessError::NotTerminated {
                identifier: self.identifier.clone(),
            }),
            Err(ExitProbe::Failed(e)) => Err(e.into()),
        }
    }

    /// Force kill the process.
    pub async fn kill(&mut self) -> Result<(), ProcessError> {
        debug!(identifier = %self.identifier, "Killing process");
        let native = self.ensure_started("Kill")?;

        let pid = match native.pid {
            Some(pid) if native.live_status()?.is_running() => pid,
            _ => {
                debug!("Process is idle, no need to kill");
                self.has_stopped = true;
                return Ok(());
            }
        };

        let sent = self.control.force_kill(pid).await;
        if !sent.is_settled() {
            warn!(pid = %pid, result = ?sent, "Force kill was not delivered");
        }
        tokio::time::sleep(self.config.termination.kill_wait()).await;

        if native.live_status()?.is_running() {
            return Err(ProcessError::NotKilled {
                identifier: self.identifier.clone(),
            });
        }

        info!(pid = %pid, "Killed successfully");
        self.has_stopped = true;
        Ok(())
    }

    /// Terminate the process, escalating to a kill if it does not exit.
    pub async fn shutdown(&mut self) -> Result<(), ProcessError> {
        debug!(identifier = %self.identifier, "Stopping process");
        self.ensure_started("Stop")?;

        match self.terminate().await {
            Ok(()) => {}
            Err(ProcessError::NotTerminated { .. }) => {
                error!(identifier = %self.identifier, "Failed to terminate process");

                match self.kill().await {
                    Ok(()) => {}
                    Err(ProcessError::NotKilled { identifier }) => {
                        error!(identifier = %identifier, "Failed to kill process");
                        return Err(ProcessError::NotStopped { identifier });
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }

        debug!(identifier = %self.identifier, "Stopped successfully");
        Ok(())
    }

    /// Everything the process has written so far. Once the process has
    /// exited, waits up to the grace period for the pipes to be drained
    /// first; descendants may keep them open longer than that.
    pub async fn collect_results(&mut self) -> Result<CapturedOutput, ProcessError> {
        let exited = self.ensure_started("Collect results")?.try_exit()?.is_some();
        let grace = self.config.grace_period();

        let native = self
            .native
            .as_mut()
            .ok_or(ProcessError::NotStarted {
                operation: "Collect results",
            })?;
        if exited {
            match tokio::time::timeout(grace, native.drain()).await {
                Ok(drained) => drained?,
                Err(_) => debug!(?grace, "Output pipes still open, returning partial output"),
            }
        }

        Ok(native.output())
    }
}

/// Exit checks after the first one, which `terminate` makes one poll
/// interval after the interrupt.
fn exit_checks(policy: &TerminationPolicy) -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(policy.poll_interval())
        .with_max_times(policy.interrupt_attempts.saturating_sub(1))
}

impl<C: ProcessControl> fmt::Display for ProcessHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process id {}", self.identifier)
    }
}
