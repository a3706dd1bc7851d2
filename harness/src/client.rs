//! Running a client binary on a fixture and capturing what it prints.

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt as _};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use trace_diff::ClientKind;
use tracing::{debug, info, warn};

/// Placeholder in argument templates for the fixture path.
pub const FIXTURE_PLACEHOLDER: &str = "{fixture}";

/// How long output pipes may stay open once the client itself is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How to invoke one client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientSpec {
    /// Label used in diffs and artifact names.
    pub name: String,
    pub kind: ClientKind,
    pub program: String,
    /// Argument template, see [`FIXTURE_PLACEHOLDER`].
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl ClientSpec {
    /// A client of `kind` named after it, with the default invocation.
    pub fn new(kind: ClientKind) -> Self {
        Self {
            name: kind.to_string(),
            kind,
            program: default_program(kind).to_owned(),
            args: default_args(kind),
            timeout: default_timeout(kind),
        }
    }

    pub fn args_for(&self, fixture: &Path) -> Vec<String> {
        let fixture = fixture.display().to_string();
        self.args
            .iter()
            .map(|arg| arg.replace(FIXTURE_PLACEHOLDER, &fixture))
            .collect()
    }
}

pub fn default_program(kind: ClientKind) -> &'static str {
    match kind {
        ClientKind::Geth => "evm",
        ClientKind::Parity => "parity-evm",
        ClientKind::Aleth => "testeth",
        ClientKind::EthereumJs => "node",
    }
}

pub fn default_args(kind: ClientKind) -> Vec<String> {
    let args: &[&str] = match kind {
        ClientKind::Geth => &["--json", "--nomemory", "--noreturndata", "statetest", "{fixture}"],
        ClientKind::Parity => &["state-test", "--std-json", "{fixture}"],
        ClientKind::Aleth => &[
            "-t",
            "GeneralStateTests",
            "--",
            "--singletest",
            "{fixture}",
            "--jsontrace",
            "{ \"disableStorage\": true, \"disableMemory\": true }",
        ],
        ClientKind::EthereumJs => &[
            "tests/tester.js",
            "--state",
            "--customStateTest",
            "{fixture}",
            "--jsontrace",
        ],
    };
    args.iter().map(|it| (*it).to_owned()).collect()
}

/// Slower dialects get more time.
pub fn default_timeout(kind: ClientKind) -> Duration {
    match kind {
        ClientKind::EthereumJs => Duration::from_secs(45),
        _ => Duration::from_secs(30),
    }
}

/// Parses `[name=]kind[:program [args...]]`.
///
/// Arguments are split on whitespace and replace the default template.
///
/// ```
/// # use harness::client::ClientSpec;
/// let spec: ClientSpec = "geth-next=geth:/opt/geth/evm".parse().unwrap();
/// assert_eq!(spec.name, "geth-next");
/// assert_eq!(spec.program, "/opt/geth/evm");
/// ```
impl FromStr for ClientSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, rest) = match s.split_once('=') {
            Some((name, rest)) if !name.contains(':') => (Some(name.trim()), rest),
            _ => (None, s),
        };
        let (kind, invocation) = match rest.split_once(':') {
            Some((kind, invocation)) => (kind, Some(invocation)),
            None => (rest, None),
        };
        let kind: ClientKind = kind.parse()?;

        let mut spec = ClientSpec::new(kind);
        if let Some(name) = name {
            if name.is_empty() {
                bail!("empty client name in `{s}`");
            }
            spec.name = name.to_owned();
        }
        if let Some(invocation) = invocation {
            let mut words = invocation.split_whitespace();
            spec.program = words
                .next()
                .ok_or_else(|| anyhow!("empty program in `{s}`"))?
                .to_owned();
            let args: Vec<String> = words.map(str::to_owned).collect();
            if !args.is_empty() {
                spec.args = args;
            }
        }
        Ok(spec)
    }
}

/// How a client process ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Exit code, `None` if the process was killed by a signal.
    Exited(Option<i32>),
    /// Killed after running past its timeout.
    TimedOut,
    SpawnFailed(String),
    /// Not run here; the output was captured earlier.
    Captured,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(Some(0)) | ExitStatus::Captured)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(Some(code)) => write!(f, "exit code {code}"),
            ExitStatus::Exited(None) => f.write_str("killed by signal"),
            ExitStatus::TimedOut => f.write_str("timed out"),
            ExitStatus::SpawnFailed(e) => write!(f, "failed to start: {e}"),
            ExitStatus::Captured => f.write_str("captured"),
        }
    }
}

/// Everything a client printed, stdout first, then stderr.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOutput {
    pub lines: Vec<String>,
    pub status: ExitStatus,
}

impl RawOutput {
    pub fn captured(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_owned).collect(),
            status: ExitStatus::Captured,
        }
    }
}

/// Runs `spec` on `fixture` until it exits or its timeout expires.
///
/// Never fails: a client that cannot be started, crashes or hangs produces
/// whatever output it managed to print, and the status says what happened.
pub async fn run_client(spec: &ClientSpec, fixture: &Path) -> RawOutput {
    let args = spec.args_for(fixture);
    debug!(client = %spec.name, program = %spec.program, ?args, "starting client");
    let started = Instant::now();

    let mut command = Command::new(&spec.program);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // A group of its own, so a timeout also reaches whatever the client
    // started.
    #[cfg(unix)]
    command.process_group(0);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(client = %spec.name, program = %spec.program, "unable to start client: {e}");
            return RawOutput {
                lines: Vec::new(),
                status: ExitStatus::SpawnFailed(e.to_string()),
            };
        }
    };

    let stdout = Drain::spawn(child.stdout.take());
    let stderr = Drain::spawn(child.stderr.take());

    let status = match tokio::time::timeout(spec.timeout, child.wait()).await {
        Ok(Ok(status)) => ExitStatus::Exited(status.code()),
        Ok(Err(e)) => {
            warn!(client = %spec.name, "lost track of client process: {e}");
            ExitStatus::Exited(None)
        }
        Err(_) => {
            warn!(
                client = %spec.name,
                timeout = ?spec.timeout,
                "client timed out, keeping its partial output"
            );
            kill_group(&spec.name, &mut child).await;
            ExitStatus::TimedOut
        }
    };

    let mut lines = Vec::new();
    for drain in [stdout, stderr] {
        let bytes = drain.finish(&spec.name).await;
        lines.extend(String::from_utf8_lossy(&bytes).lines().map(str::to_owned));
    }

    if status.success() {
        debug!(client = %spec.name, lines = lines.len(), elapsed = ?started.elapsed(), "client finished");
    } else {
        info!(client = %spec.name, %status, lines = lines.len(), "client did not exit cleanly");
    }
    RawOutput { lines, status }
}

/// Kills the client and every process left in its group.
async fn kill_group(client: &str, child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|it| i32::try_from(it).ok()) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            debug!(client, "unable to kill process group {pid}: {e}");
        }
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

/// Reads one output stream in the background. What was read survives the
/// task being abandoned.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl Drain {
    fn spawn(stream: Option<impl AsyncRead + Unpin + Send + 'static>) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn({
            let buf = Arc::clone(&buf);
            async move {
                let Some(mut stream) = stream else {
                    return;
                };
                let mut chunk = [0u8; 8192];
                loop {
                    let n = match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    let mut buf = buf.lock().unwrap_or_else(PoisonError::into_inner);
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
        });
        Self { buf, task }
    }

    /// Waits a little for the stream to close, then takes what was read.
    /// Processes that escaped the client's group can hold the pipe open
    /// indefinitely.
    async fn finish(mut self, client: &str) -> Vec<u8> {
        if tokio::time::timeout(DRAIN_GRACE, &mut self.task).await.is_err() {
            warn!(client, "output still open after the client ended, keeping what was read");
            self.task.abort();
        }
        let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_specs() {
        let spec: ClientSpec = "geth".parse().unwrap();
        assert_eq!(spec, ClientSpec::new(ClientKind::Geth));
        assert_eq!(spec.timeout, Duration::from_secs(30));

        let spec: ClientSpec = "ethereumjs:/usr/bin/node runner.js {fixture}".parse().unwrap();
        assert_eq!(spec.name, "ethereumjs");
        assert_eq!(spec.program, "/usr/bin/node");
        assert_eq!(spec.args, ["runner.js", "{fixture}"]);
        assert_eq!(spec.timeout, Duration::from_secs(45));

        let spec: ClientSpec = "old=parity:parity-evm-1.9".parse().unwrap();
        assert_eq!((spec.name.as_str(), spec.kind), ("old", ClientKind::Parity));
        assert_eq!(spec.args, default_args(ClientKind::Parity));

        assert!("besu".parse::<ClientSpec>().is_err());
        assert!("=geth".parse::<ClientSpec>().is_err());
        assert!("geth:".parse::<ClientSpec>().is_err());
    }

    #[test]
    fn substitutes_the_fixture() {
        let spec = ClientSpec::new(ClientKind::Geth);
        let args = spec.args_for(Path::new("/tmp/add11.json"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/add11.json"));
        assert!(!args.iter().any(|it| it.contains(FIXTURE_PLACEHOLDER)));
    }

    #[cfg(unix)]
    fn shell(script: &str, timeout: Duration) -> ClientSpec {
        ClientSpec {
            name: "sh".into(),
            kind: ClientKind::Geth,
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            timeout,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_both_streams() {
        let spec = shell("echo out; echo err >&2; exit 3", Duration::from_secs(10));
        let output = run_client(&spec, Path::new("unused.json")).await;
        assert_eq!(output.lines, ["out", "err"]);
        assert_eq!(output.status, ExitStatus::Exited(Some(3)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn keeps_partial_output_on_timeout() {
        let spec = shell("echo started; exec sleep 10", Duration::from_millis(300));
        let output = run_client(&spec, Path::new("unused.json")).await;
        assert_eq!(output.status, ExitStatus::TimedOut);
        assert_eq!(output.lines, ["started"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_reaches_the_clients_children() {
        let spec = shell("echo started; sleep 6; echo done", Duration::from_millis(300));
        let started = Instant::now();
        let output = run_client(&spec, Path::new("unused.json")).await;
        assert_eq!(output.status, ExitStatus::TimedOut);
        assert_eq!(output.lines, ["started"]);
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn escaped_children_do_not_hold_the_run() {
        // `setsid` moves the sleeper out of the client's group, so only the
        // drain grace period ends the wait for its inherited pipes.
        let spec = shell(
            "echo started; setsid sleep 6 & echo forked",
            Duration::from_secs(10),
        );
        let started = Instant::now();
        let output = run_client(&spec, Path::new("unused.json")).await;
        assert_eq!(output.status, ExitStatus::Exited(Some(0)));
        assert_eq!(output.lines, ["started", "forked"]);
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    }

    #[tokio::test]
    async fn missing_program() {
        let spec = ClientSpec {
            program: "/nonexistent/evm".into(),
            ..ClientSpec::new(ClientKind::Geth)
        };
        let output = run_client(&spec, Path::new("unused.json")).await;
        assert!(matches!(output.status, ExitStatus::SpawnFailed(_)));
        assert!(output.lines.is_empty());
    }
}
