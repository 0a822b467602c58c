use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs::File;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::TEMPLATE_ENV;
use crate::error::{ExitCause, NodeError, Result};

type KillReply = oneshot::Sender<io::Result<()>>;

/// Program and arguments used to launch a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBinary {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl NodeBinary {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec!["node".to_string(), "start".to_string()],
        }
    }
}

impl Default for NodeBinary {
    fn default() -> Self {
        Self::new("peer")
    }
}

/// Ownership of a spawned node process.
///
/// The child itself lives in a monitor task; this handle can only ask that task to kill it.
/// Dropping the handle kills the process.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<KillReply>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Kill the process and wait for it to be reaped. A process that already exited is not an
    /// error.
    pub async fn kill(mut self) -> io::Result<()> {
        let Some(kill_tx) = self.kill_tx.take() else {
            return Ok(());
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if kill_tx.send(reply_tx).is_err() {
            return Ok(());
        }
        reply_rx.await.unwrap_or(Ok(()))
    }
}

#[cfg(test)]
impl ProcessHandle {
    /// A handle whose kill request is answered with an error of `kind`.
    pub(crate) fn failing_kill(pid: u32, kind: io::ErrorKind) -> Self {
        let (kill_tx, kill_rx) = oneshot::channel::<KillReply>();
        tokio::spawn(async move {
            if let Ok(reply) = kill_rx.await {
                let _ = reply.send(Err(io::Error::from(kind)));
            }
        });
        Self {
            pid: Some(pid),
            kill_tx: Some(kill_tx),
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            debug!("Killing orphaned process {:?}", self.pid);
            let (reply_tx, _) = oneshot::channel();
            let _ = kill_tx.send(reply_tx);
        }
    }
}

/// Spawn `binary` with its configuration directory set to `config_dir`, sending its combined
/// output to `log_path`. Returns the process handle and a receiver that fires once if the
/// process exits on its own.
pub async fn spawn(
    binary: &NodeBinary,
    config_dir: &Path,
    log_path: &Path,
) -> Result<(ProcessHandle, oneshot::Receiver<ExitCause>)> {
    let log = File::create(log_path)
        .await
        .map_err(|e| NodeError::io(log_path, e))?;
    let log_stderr = log
        .try_clone()
        .await
        .map_err(|e| NodeError::io(log_path, e))?;

    let mut command = Command::new(&binary.program);
    command
        .args(&binary.args)
        .env(TEMPLATE_ENV, config_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| NodeError::Spawn {
        program: binary.program.clone(),
        source,
    })?;
    let pid = child.id();
    debug!("Spawned {} (pid {:?})", binary.program.display(), pid);

    if let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) {
        tokio::spawn(copy_output(stdout, stderr, log, log_stderr));
    }

    let (exit_tx, exit_rx) = oneshot::channel();
    let (kill_tx, kill_rx) = oneshot::channel();
    tokio::spawn(monitor(child, exit_tx, kill_rx));

    Ok((
        ProcessHandle {
            pid,
            kill_tx: Some(kill_tx),
        },
        exit_rx,
    ))
}

/// Copy both output streams into the log until the process closes them.
async fn copy_output(mut stdout: ChildStdout, mut stderr: ChildStderr, mut log: File, mut log_stderr: File) {
    let (out, err) = tokio::join!(
        tokio::io::copy(&mut stdout, &mut log),
        tokio::io::copy(&mut stderr, &mut log_stderr),
    );
    if let Err(e) = out.and(err) {
        warn!("Lost node output: {}", e);
    }
}

/// Own the child until it exits or is killed. Exit is reported at most once.
async fn monitor(
    mut child: Child,
    exit_tx: oneshot::Sender<ExitCause>,
    kill_rx: oneshot::Receiver<KillReply>,
) {
    tokio::select! {
        status = child.wait() => {
            let cause = match status {
                Ok(status) => ExitCause::Exited(status),
                Err(e) => ExitCause::Wait(e),
            };
            debug!("Process {:?} exited: {}", child.id(), cause);
            let _ = exit_tx.send(cause);
        }
        Ok(reply) = kill_rx => {
            let _ = reply.send(child.kill().await);
        }
    }
}
