//! Instance lifecycle controller.
//!
//! Drives one hypervisor instance through provisioning, launch, readiness
//! detection and teardown. Exactly two tasks exist per instance: the
//! caller-driven controller and the console relay (see [`crate::launcher`]);
//! they communicate only through the console channel, so no locking is
//! needed. The waits below are the controller's only suspension points and
//! carry no internal timeout — a caller needing a deadline wraps the wait
//! itself.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::cache::ImageCache;
use crate::config::InstanceConfig;
use crate::disk;
use crate::error::{InstanceError, Result};
use crate::launcher::{self, ConsoleMessage, ConsoleStream};
use crate::transport;
use crate::util;

/// Memory allocated to every instance, in megabytes.
const MEMORY_MB: u32 = 512;

/// Console line prefix that marks the end of guest initialization. Emitted
/// by the default user-data's `final_message`.
const READY_PREFIX: &str = "SYSTEM READY";

/// Derived lifecycle view of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    NotStarted,
    Running { ready: bool },
    Ended,
}

/// Controller for a single hypervisor instance.
///
/// A single caller task owns the controller and drives the lifecycle
/// sequentially; the design does not defend against concurrent misuse.
pub struct Instance {
    config: InstanceConfig,
    cache: ImageCache,
    console: Option<ConsoleStream>,
    pid: Option<u32>,
    // Monotonic flags: set once by the single controlling task, never reset.
    ready: bool,
    ended: bool,
}

impl Instance {
    pub fn new(config: InstanceConfig) -> Self {
        let cache = ImageCache::for_config(&config);
        Self {
            config,
            cache,
            console: None,
            pid: None,
            ready: false,
            ended: false,
        }
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    /// True once a ready line has been observed on the console.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// True once the hypervisor's console stream has closed.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Pid of the hypervisor process, once powered on.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> InstanceState {
        if self.ended {
            InstanceState::Ended
        } else if self.pid.is_some() {
            InstanceState::Running { ready: self.ready }
        } else {
            InstanceState::NotStarted
        }
    }

    /// Ensure the instance's root disk exists (see [`disk::ensure_disk`]).
    pub async fn ensure_disk(&self) -> Result<PathBuf> {
        disk::ensure_disk(&self.config, &self.cache).await
    }

    /// Ensure the transport ISO exists (see [`transport::ensure_transport`]).
    pub async fn ensure_transport(&self) -> Result<PathBuf> {
        transport::ensure_transport(&self.config).await
    }

    /// Provision disk and transport, launch the hypervisor and capture its
    /// pid. Returns once the pid has arrived on the console channel.
    pub async fn poweron(&mut self) -> Result<()> {
        let disk = self.ensure_disk().await?;
        let iso = self.ensure_transport().await?;

        let mut args = vec![
            "-name".to_string(),
            self.config.name(),
            "-m".to_string(),
            MEMORY_MB.to_string(),
            "-drive".to_string(),
            format!("file={},if=virtio", disk.display()),
            "-cdrom".to_string(),
            iso.display().to_string(),
            "-serial".to_string(),
            "stdio".to_string(),
        ];
        args.extend(self.config.extra_args.iter().cloned());

        let mut console = launcher::launch(&self.config.hypervisor, &args)?;
        let pid = match console.recv().await {
            Some(ConsoleMessage::Pid(pid)) => pid,
            _ => return Err(InstanceError::ConsoleClosed),
        };
        info!(name = %self.config.name(), pid, "instance launched");

        self.console = Some(console);
        self.pid = Some(pid);
        Ok(())
    }

    /// Block until the guest reports ready or the console stream ends.
    ///
    /// Every observed line is appended to the console log and flushed;
    /// scanning stops the instant a line starts with `SYSTEM READY` (sets
    /// `ready`) or the end-of-stream marker arrives (sets `ended`). The
    /// rest of the stream is not drained — an instance may well end before
    /// ever becoming ready, so check [`Instance::is_ready`] afterwards.
    pub async fn wait_until_ready(&mut self) -> Result<()> {
        let log_path = self.config.console_log_path();
        let mut log = open_log(&log_path)?;

        let Self {
            console,
            ready,
            ended,
            ..
        } = self;
        let console = console.as_mut().ok_or(InstanceError::NotStarted)?;

        while !(*ready || *ended) {
            match console.recv().await {
                Some(ConsoleMessage::Line(line)) => {
                    append_line(&mut log, &log_path, &line)?;
                    if line.starts_with(READY_PREFIX) {
                        *ready = true;
                    }
                }
                Some(ConsoleMessage::Eof) | None => *ended = true,
                Some(ConsoleMessage::Pid(_)) => {}
            }
        }

        Ok(())
    }

    /// Block until the console stream ends, logging every remaining line,
    /// then join the relay task. Continues from wherever the channel cursor
    /// is, so it composes with a prior [`Instance::wait_until_ready`].
    pub async fn wait(&mut self) -> Result<()> {
        let log_path = self.config.console_log_path();
        let mut log = open_log(&log_path)?;

        {
            let Self {
                console, ended, ..
            } = &mut *self;
            let console = console.as_mut().ok_or(InstanceError::NotStarted)?;

            while !*ended {
                match console.recv().await {
                    Some(ConsoleMessage::Line(line)) => append_line(&mut log, &log_path, &line)?,
                    Some(ConsoleMessage::Eof) | None => *ended = true,
                    Some(ConsoleMessage::Pid(_)) => {}
                }
            }
        }

        if let Some(console) = self.console.as_mut() {
            console.join().await;
        }
        Ok(())
    }

    /// Terminate the hypervisor (SIGTERM) and wait for it to wind down.
    pub async fn poweroff(&mut self) -> Result<()> {
        let pid = self.pid.ok_or(InstanceError::NotStarted)?;
        info!(pid, "powering off instance");
        if !util::terminate_process(pid) {
            warn!(pid, "failed to signal hypervisor process");
        }
        self.wait().await
    }
}

/// Open the console log in append mode, creating it on first use. The log
/// accumulates output across sequential waits without loss or duplication.
fn open_log(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| InstanceError::io(path, e))
}

/// Append one newline-terminated record and flush, so a crash mid-wait
/// loses at most the current line.
fn append_line(log: &mut File, path: &Path, line: &str) -> Result<()> {
    writeln!(log, "{line}")
        .and_then(|()| log.flush())
        .map_err(|e| InstanceError::io(path, e))
}
