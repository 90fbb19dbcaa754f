use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type Result<T> = std::result::Result<T, DecoderError>;

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command failed ({command}): {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
}

#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        command.output().await
    }
}

/// Where a relay writes its mpegts output and where a consumer reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportTarget {
    Udp { host: String, port: u16 },
    UnixSocket { path: PathBuf },
}

impl TransportTarget {
    /// URL the decoder writes to.
    pub fn output_url(&self) -> String {
        match self {
            TransportTarget::Udp { host, port } => format!("udp://{host}:{port}"),
            TransportTarget::UnixSocket { path } => format!("unix:/{}", path.display()),
        }
    }

    /// URL a consumer plays back from. Matches `output_url` for both
    /// transports; kept separate because callers mean different things.
    pub fn playback_url(&self) -> String {
        self.output_url()
    }
}

/// Arguments for the continuous HLS → mpegts relay. Media never flows
/// through the parent process; the decoder writes straight to the transport
/// and, when asked, tees into a capture file.
pub fn relay_args(
    hls_url: &str,
    transport: &TransportTarget,
    capture_file: Option<&Path>,
) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
        "-f".to_string(),
        "hls".to_string(),
        "-i".to_string(),
        hls_url.to_string(),
        "-f".to_string(),
        "mpegts".to_string(),
    ];
    if let TransportTarget::UnixSocket { .. } = transport {
        args.push("-listen".to_string());
        args.push("1".to_string());
    }
    args.push(transport.output_url());
    if let Some(path) = capture_file {
        args.push("-f".to_string());
        args.push("mpegts".to_string());
        args.push(format!("file:/{}", path.display()));
    }
    args
}

/// Arguments for a run-to-completion copy-codec trim of a capture or archive
/// file. Times are offsets in seconds from the start of the input.
pub fn splice_args(input: &Path, output: &Path, start_secs: f64, end_secs: f64) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-acodec".to_string(),
        "copy".to_string(),
        "-ss".to_string(),
        format!("{start_secs}"),
        "-to".to_string(),
        format!("{end_secs}"),
        "-loglevel".to_string(),
        "fatal".to_string(),
        output.display().to_string(),
    ]
}

/// Trims `[start_secs, end_secs]` of `input` into `output` through the
/// executor seam. A failed run removes the partial output before returning.
pub async fn splice(
    executor: &dyn CommandExecutor,
    ffmpeg: &Path,
    input: &Path,
    output: &Path,
    start_secs: f64,
    end_secs: f64,
) -> Result<()> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let args = splice_args(input, output, start_secs, end_secs);
    let mut command = Command::new(ffmpeg);
    command.args(&args);
    let run = executor.run(&mut command).await?;
    if !run.status.success() {
        let _ = tokio::fs::remove_file(output).await;
        return Err(DecoderError::CommandFailure {
            command: format!("{} {}", ffmpeg.display(), args.join(" ")),
            status: run.status.code(),
            stderr: String::from_utf8_lossy(&run.stderr).into_owned(),
        });
    }
    Ok(())
}

/// A long-running external decoder process.
///
/// stderr is piped into a background reader so `drain_stderr` never blocks
/// on the child.
#[derive(Debug)]
pub struct Decoder {
    child: Child,
    stderr_rx: mpsc::UnboundedReceiver<String>,
    stopped: bool,
}

impl Decoder {
    pub fn spawn(program: &Path, args: &[String]) -> Result<Self> {
        debug!(program = %program.display(), ?args, "spawning decoder");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        }

        Ok(Self {
            child,
            stderr_rx: rx,
            stopped: false,
        })
    }

    /// True while the child has neither exited nor failed to report.
    pub fn is_alive(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(err) => {
                warn!(error = %err, "decoder status check failed");
                false
            }
        }
    }

    /// Collects every stderr line buffered since the last call.
    pub fn drain_stderr(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.stderr_rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    /// Kills and reaps the child. Safe to call more than once.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        if let Err(err) = self.child.start_kill() {
            warn!(error = %err, "failed to kill decoder");
            return;
        }
        match tokio::time::timeout(Duration::from_secs(3), self.child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "decoder stopped"),
            Ok(Err(err)) => warn!(error = %err, "failed to reap decoder"),
            Err(_) => warn!("decoder did not exit after kill"),
        }
    }
}
