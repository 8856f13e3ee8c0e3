use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection allowance given to `ssh -o ConnectTimeout=...`.
pub const SSH_CONNECTION_TIMEOUT_SECS: u64 = 10;

const MAX_GRACE_MS: u64 = 300_000;

/// Bytes kept per captured stream; older output is discarded first.
pub const DEFAULT_CAPTURE_LIMIT: usize = 1024 * 1024;

/// How long a freshly spawned process is left alone before it is judged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GracePolicy {
    /// Grace period for processes launched on this machine (in milliseconds)
    #[serde(default = "default_local_grace_ms")]
    pub local_grace_ms: u64,

    /// Grace period for processes launched through a remote shell (in milliseconds)
    #[serde(default = "default_remote_grace_ms")]
    pub remote_grace_ms: u64,

    /// Interval between exit checks while waiting (in milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for GracePolicy {
    fn default() -> Self {
        Self {
            local_grace_ms: default_local_grace_ms(),
            remote_grace_ms: default_remote_grace_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl GracePolicy {
    /// Remote grace is the ssh connect timeout plus one second of slack.
    pub fn from_connect_timeout(connect_timeout_secs: u64) -> Self {
        Self {
            remote_grace_ms: (connect_timeout_secs + 1) * 1_000,
            ..Default::default()
        }
    }

    /// Same periods for local and remote launches, mostly useful in tests.
    pub fn uniform(grace: Duration) -> Self {
        let ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        Self {
            local_grace_ms: ms,
            remote_grace_ms: ms,
            ..Default::default()
        }
    }

    pub fn grace_for(&self, is_remote: bool) -> Duration {
        if is_remote {
            Duration::from_millis(self.remote_grace_ms)
        } else {
            Duration::from_millis(self.local_grace_ms)
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("poll_interval_ms must be greater than zero"));
        }

        if self.local_grace_ms > MAX_GRACE_MS || self.remote_grace_ms > MAX_GRACE_MS {
            return Err(anyhow::anyhow!("grace periods should not exceed 5 minutes"));
        }

        Ok(())
    }
}

/// Escalation timings used by `terminate`, `kill` and `shutdown`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TerminationPolicy {
    /// Number of exit checks after the interrupt signal before giving up.
    /// The first check happens one poll interval after the signal.
    #[serde(default = "default_interrupt_attempts")]
    pub interrupt_attempts: usize,

    /// Delay between exit checks after the interrupt signal (in milliseconds)
    #[serde(default = "default_termination_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long to wait after a force kill before checking (in milliseconds)
    #[serde(default = "default_kill_wait_ms")]
    pub kill_wait_ms: u64,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            interrupt_attempts: default_interrupt_attempts(),
            poll_interval_ms: default_termination_poll_interval_ms(),
            kill_wait_ms: default_kill_wait_ms(),
        }
    }
}

impl TerminationPolicy {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn kill_wait(&self) -> Duration {
        Duration::from_millis(self.kill_wait_ms)
    }
}

/// Where the status of a started process comes from.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusMode {
    /// Non-empty captured stderr means idle, anything else means running.
    #[default]
    Replica,
    /// Ask the OS whether the child has exited and with which code.
    Live,
}

/// What `start` waits for before judging the launch.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitMode {
    /// Leave the child running and judge it once the grace period is over.
    #[default]
    Detached,
    /// Poll until the child exits, then judge it. Bounded by the grace
    /// period; a child still running by then is judged as `Detached` would.
    RunToCompletion,
}

/// A remote shell endpoint the command is started on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTarget {
    pub username: String,
    pub host: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl RemoteTarget {
    pub fn new(username: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            host: host.into(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    /// Prefix `args` with the ssh invocation.
    ///
    /// `-t` allocates a pseudo-terminal so that SIGINT reaches the remote
    /// command, `BatchMode=yes` disables any prompt.
    pub fn wrap<S: ToString, I: IntoIterator<Item = S>>(&self, args: I) -> Vec<String> {
        let mut wrapped = vec![
            "ssh".to_string(),
            "-t".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            format!("{}@{}", self.username, self.host),
        ];
        wrapped.extend(args.into_iter().map(|arg| format!("\"{}\"", arg.to_string())));
        wrapped
    }
}

/// Everything a process handle needs to launch and judge one process.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ProcessConfig {
    /// Executable followed by its arguments
    #[builder(setter(custom))]
    pub args: Vec<String>,
    #[builder(default)]
    pub is_remote: bool,
    #[builder(default)]
    pub grace: GracePolicy,
    #[builder(default)]
    pub status_mode: StatusMode,
    #[builder(default)]
    pub wait_mode: WaitMode,
    #[builder(default)]
    pub termination: TerminationPolicy,
    /// Upper bound on the bytes kept for each of stdout and stderr
    #[builder(default = "DEFAULT_CAPTURE_LIMIT")]
    pub capture_limit: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            is_remote: false,
            grace: GracePolicy::default(),
            status_mode: StatusMode::default(),
            wait_mode: WaitMode::default(),
            termination: TerminationPolicy::default(),
            capture_limit: DEFAULT_CAPTURE_LIMIT,
        }
    }
}

impl ProcessConfig {
    pub fn builder() -> ProcessConfigBuilder {
        ProcessConfigBuilder::default()
    }

    /// Default policies for `args`. Does not reject an empty argument list,
    /// `start` reports that as a spawn failure.
    pub fn new<S: ToString, I: IntoIterator<Item = S>>(args: I, is_remote: bool) -> Self {
        Self {
            args: args.into_iter().map(|s| s.to_string()).collect(),
            is_remote,
            ..Default::default()
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace.grace_for(self.is_remote)
    }
}

impl ProcessConfigBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.args = Some(args);
        self
    }

    /// Run `args` on `target` over ssh and use the remote grace period.
    pub fn remote<S: ToString, I: IntoIterator<Item = S>>(
        &mut self,
        target: &RemoteTarget,
        args: I,
    ) -> &mut Self {
        let remote_grace_ms = GracePolicy::from_connect_timeout(target.connect_timeout_secs)
            .remote_grace_ms;
        let grace = self.grace.get_or_insert_with(GracePolicy::default);
        grace.remote_grace_ms = remote_grace_ms;

        self.args = Some(target.wrap(args));
        self.is_remote = Some(true);
        self
    }

    fn validate(&self) -> Result<(), String> {
        match &self.args {
            Some(args) if !args.is_empty() => {}
            _ => return Err("args must contain at least the executable".to_string()),
        }

        if let Some(grace) = &self.grace {
            grace.validate().map_err(|e| e.to_string())?;
        }

        if self.capture_limit == Some(0) {
            return Err("capture_limit must be greater than zero".to_string());
        }

        Ok(())
    }
}

// Default value functions for serde
fn default_local_grace_ms() -> u64 {
    5_000
}
fn default_remote_grace_ms() -> u64 {
    (SSH_CONNECTION_TIMEOUT_SECS + 1) * 1_000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_interrupt_attempts() -> usize {
    3
}
fn default_termination_poll_interval_ms() -> u64 {
    1_000
}
fn default_kill_wait_ms() -> u64 {
    1_000
}
fn default_connect_timeout_secs() -> u64 {
    SSH_CONNECTION_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grace_periods() {
        let grace = GracePolicy::default();
        assert!(grace.validate().is_ok());
        assert_eq!(grace.grace_for(false), Duration::from_secs(5));
        assert_eq!(grace.grace_for(true), Duration::from_secs(11));
    }

    #[test]
    fn test_grace_from_connect_timeout() {
        let grace = GracePolicy::from_connect_timeout(20);
        assert_eq!(grace.grace_for(true), Duration::from_secs(21));
        assert_eq!(grace.grace_for(false), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_grace() {
        let grace = GracePolicy {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(grace.validate().is_err());

        let grace = GracePolicy {
            remote_grace_ms: 600_000,
            ..Default::default()
        };
        assert!(grace.validate().is_err());
    }

    #[test]
    fn test_uniform_grace_saturates() {
        let grace = GracePolicy::uniform(Duration::MAX);
        assert_eq!(grace.local_grace_ms, u64::MAX);
        assert_eq!(grace.remote_grace_ms, u64::MAX);
        assert!(grace.validate().is_err());

        let grace = GracePolicy::uniform(Duration::from_millis(250));
        assert_eq!(grace.grace_for(true), Duration::from_millis(250));
        assert!(grace.validate().is_ok());
    }

    #[test]
    fn test_grace_deserialization_fills_defaults() {
        let grace: GracePolicy = serde_json::from_str(r#"{"localGraceMs": 250}"#).unwrap();
        assert_eq!(grace.local_grace_ms, 250);
        assert_eq!(grace.remote_grace_ms, 11_000);
        assert_eq!(grace.poll_interval_ms, 100);
    }

    #[test]
    fn test_mode_serialization() {
        assert_eq!(serde_json::to_string(&StatusMode::Live).unwrap(), "\"live\"");
        assert_eq!(
            serde_json::to_string(&WaitMode::RunToCompletion).unwrap(),
            "\"run-to-completion\""
        );
    }

    #[test]
    fn test_builder_requires_args() {
        assert!(ProcessConfig::builder().build().is_err());
        assert!(
            ProcessConfig::builder()
                .args(Vec::<String>::new())
                .build()
                .is_err()
        );

        let config = ProcessConfig::builder().args(["true"]).build().unwrap();
        assert_eq!(config.args, vec!["true".to_string()]);
        assert!(!config.is_remote);
        assert_eq!(config.status_mode, StatusMode::Replica);
        assert_eq!(config.wait_mode, WaitMode::Detached);
        assert_eq!(config.grace_period(), Duration::from_secs(5));
        assert_eq!(config.capture_limit, DEFAULT_CAPTURE_LIMIT);
        assert_eq!(ProcessConfig::new(["true"], false).capture_limit, DEFAULT_CAPTURE_LIMIT);
    }

    #[test]
    fn test_builder_rejects_zero_capture_limit() {
        let result = ProcessConfig::builder()
            .args(["true"])
            .capture_limit(0usize)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_invalid_grace() {
        let result = ProcessConfig::builder()
            .args(["true"])
            .grace(GracePolicy {
                poll_interval_ms: 0,
                ..Default::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_remote_target_wraps_args() {
        let target = RemoteTarget::new("tester", "10.0.0.1");
        let args = target.wrap(["srt-xtransmit", "receive", "srt://:4200"]);
        assert_eq!(
            args,
            vec![
                "ssh",
                "-t",
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=10",
                "tester@10.0.0.1",
                "\"srt-xtransmit\"",
                "\"receive\"",
                "\"srt://:4200\"",
            ]
        );
    }

    #[test]
    fn test_builder_remote() {
        let target = RemoteTarget {
            connect_timeout_secs: 3,
            ..RemoteTarget::new("tester", "host")
        };
        let config = ProcessConfig::builder()
            .remote(&target, ["tshark", "-i", "eth0"])
            .build()
            .unwrap();

        assert!(config.is_remote);
        assert_eq!(config.args[0], "ssh");
        assert_eq!(config.grace_period(), Duration::from_secs(4));
    }
}
