//! Hypervisor process launch and console relay.
//!
//! The launched process's standard output is the sole channel back to the
//! controller. A dedicated relay task forwards it over an unbounded,
//! ordered channel with a fixed protocol: the first message is the child's
//! pid, then one message per output line (trailing terminator stripped),
//! then exactly one end-of-stream marker once stdout closes. Nothing is
//! ever sent after the marker; the task then reaps the child and exits.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{InstanceError, Result};

/// One message on the console channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleMessage {
    /// Pid of the launched process; always the first message.
    Pid(u32),
    /// One stdout line, in emission order.
    Line(String),
    /// End of stream; sent exactly once, nothing follows it.
    Eof,
}

/// Receiving side of a launched process's console.
///
/// Single consumer for the lifetime of the instance; the matching producer
/// is the relay task spawned by [`launch`].
#[derive(Debug)]
pub struct ConsoleStream {
    rx: UnboundedReceiver<ConsoleMessage>,
    relay: Option<JoinHandle<()>>,
}

impl ConsoleStream {
    /// Receive the next console message, blocking until one arrives.
    ///
    /// Returns `None` only if the relay task died without sending
    /// [`ConsoleMessage::Eof`].
    pub async fn recv(&mut self) -> Option<ConsoleMessage> {
        self.rx.recv().await
    }

    /// Wait for the relay task (and with it the child process) to finish.
    /// Idempotent; a second call returns immediately.
    pub async fn join(&mut self) {
        if let Some(handle) = self.relay.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "console relay task failed");
            }
        }
    }
}

/// Launch `program` with `args` and return its console stream.
///
/// The relay runs as an independent task; beyond the spawn itself the
/// caller never blocks on the child.
pub fn launch(program: &str, args: &[String]) -> Result<ConsoleStream> {
    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| InstanceError::Launch {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

    let pid = child.id().ok_or_else(|| InstanceError::Launch {
        program: program.to_string(),
        reason: "child exited before a pid could be read".to_string(),
    })?;
    let stdout = child.stdout.take().ok_or_else(|| InstanceError::Launch {
        program: program.to_string(),
        reason: "child stdout was not captured".to_string(),
    })?;

    let (tx, rx) = mpsc::unbounded_channel();
    let relay = tokio::spawn(relay_console(child, pid, stdout, tx));

    Ok(ConsoleStream {
        rx,
        relay: Some(relay),
    })
}

/// Read the child's stdout to completion, forwarding each line, then send
/// the end-of-stream marker and reap the process.
async fn relay_console(
    mut child: Child,
    pid: u32,
    stdout: ChildStdout,
    tx: UnboundedSender<ConsoleMessage>,
) {
    let _ = tx.send(ConsoleMessage::Pid(pid));

    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let _ = tx.send(ConsoleMessage::Line(line));
            }
            Ok(None) => break,
            Err(e) => {
                warn!(pid, error = %e, "console read error, treating as end of stream");
                break;
            }
        }
    }

    let _ = tx.send(ConsoleMessage::Eof);

    match child.wait().await {
        Ok(status) => debug!(pid, %status, "launched process exited"),
        Err(e) => warn!(pid, error = %e, "failed to reap launched process"),
    }
}
