//! Interactive shell attached to one session: a single long-lived shell
//! process whose stdout/stderr are pumped line-by-line into the session's
//! outbound queue as they arrive. Supports REPL-style tools; commands are
//! written to stdin, output flows back whenever the process produces it.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const TERMINATE_WAIT: Duration = Duration::from_secs(3);

pub struct ShellSession {
    child: Child,
    stdin: Option<ChildStdin>,
    pumps: Vec<JoinHandle<()>>,
}

impl ShellSession {
    pub fn spawn(outbound: mpsc::Sender<String>) -> io::Result<Self> {
        let program = if cfg!(windows) {
            "powershell.exe"
        } else {
            "/bin/bash"
        };
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("shell stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("shell stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("shell stderr unavailable"))?;

        let pumps = vec![pump(stdout, outbound.clone()), pump(stderr, outbound)];
        Ok(Self {
            child,
            stdin: Some(stdin),
            pumps,
        })
    }

    /// Feeds one command line to the shell's stdin.
    pub async fn write_line(&mut self, command: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "shell stdin closed"))?;
        stdin.write_all(command.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }

    /// Graceful first: closing stdin lets the shell exit on EOF. If it
    /// lingers past the bounded wait, escalate to SIGKILL. Either way the
    /// child is reaped and both pumps have drained before returning.
    pub async fn terminate(mut self) {
        drop(self.stdin.take());
        if tokio::time::timeout(TERMINATE_WAIT, self.child.wait())
            .await
            .is_err()
        {
            debug!("shell ignored EOF, killing");
            let _ = self.child.kill().await;
        }
        for pump in self.pumps {
            let _ = pump.await;
        }
    }
}

fn pump<R>(reader: R, outbound: mpsc::Sender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let frame = json!({"type": "shell_output", "output": line}).to_string();
            if outbound.send(frame).await.is_err() {
                break;
            }
        }
    })
}
