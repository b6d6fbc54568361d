//! kl2tpd subprocess backend

use super::config;
use super::log_watch::{LogTracker, LogTransition};
use super::{L2tpEvent, L2tpProcess, L2tpSupervisor, SpawnRequest};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

/// Spawns one kl2tpd per PPPoE session
#[derive(Debug, Clone)]
pub struct Kl2tpdSupervisor {
    binary: PathBuf,
    runtime_dir: PathBuf,
    interface: String,
}

impl Kl2tpdSupervisor {
    pub fn new(
        binary: impl Into<PathBuf>,
        runtime_dir: impl Into<PathBuf>,
        interface: impl Into<String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            runtime_dir: runtime_dir.into(),
            interface: interface.into(),
        }
    }

    fn config_path(&self, pppoe_session_id: u16) -> PathBuf {
        self.runtime_dir.join(format!(
            "kpppoed-{}-{:04x}.toml",
            std::process::id(),
            pppoe_session_id
        ))
    }
}

impl L2tpSupervisor for Kl2tpdSupervisor {
    type Process = Kl2tpdProcess;

    fn spawn(
        &self,
        request: SpawnRequest<'_>,
        events: mpsc::Sender<L2tpEvent>,
    ) -> Result<Kl2tpdProcess> {
        let text = config::render(&request, &self.interface)?;
        let config_path = self.config_path(request.pppoe_session_id);
        std::fs::write(&config_path, text).map_err(|e| {
            Error::L2tp(format!("write {}: {}", config_path.display(), e))
        })?;

        let spawned = Command::new(&self.binary)
            .arg("-config")
            .arg(&config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                remove_config(&config_path);
                return Err(Error::L2tp(format!(
                    "start {}: {}",
                    self.binary.display(),
                    e
                )));
            }
        };

        let pid = child.id().unwrap_or(0);
        let control = Arc::new(ProcessControl {
            pid,
            signalled: AtomicBool::new(false),
            exited: AtomicBool::new(false),
        });
        let (drained_tx, drained_rx) = watch::channel(false);

        match child.stderr.take() {
            Some(stderr) => {
                tokio::spawn(tail_log(
                    stderr,
                    request.pppoe_session_id,
                    Arc::clone(&control),
                    events,
                    drained_tx,
                ));
            }
            None => {
                let _ = drained_tx.send(true);
            }
        }

        info!(
            session_id = request.pppoe_session_id,
            pid,
            config = %config_path.display(),
            "Started kl2tpd"
        );

        Ok(Kl2tpdProcess {
            pppoe_session_id: request.pppoe_session_id,
            child: Mutex::new(child),
            control,
            drained: drained_rx,
            config_path,
        })
    }
}

/// Signal bookkeeping shared with the log tailer
#[derive(Debug)]
struct ProcessControl {
    pid: u32,
    signalled: AtomicBool,
    exited: AtomicBool,
}

impl ProcessControl {
    /// SIGTERM the process unless it was already signalled or reaped
    fn signal(&self) -> Result<()> {
        if self.pid == 0 || self.exited.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.signalled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // SAFETY: kill(2) has no memory-safety preconditions
        let ret = unsafe { libc::kill(self.pid as libc::pid_t, libc::SIGTERM) };
        if ret < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

/// Running kl2tpd instance
#[derive(Debug)]
pub struct Kl2tpdProcess {
    pppoe_session_id: u16,
    child: Mutex<Child>,
    control: Arc<ProcessControl>,
    drained: watch::Receiver<bool>,
    config_path: PathBuf,
}

impl Kl2tpdProcess {
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    async fn wait_drained(&self) {
        let mut drained = self.drained.clone();
        // A dropped sender means the tailer is gone, which counts as drained
        let _ = drained.wait_for(|done| *done).await;
    }
}

impl L2tpProcess for Kl2tpdProcess {
    async fn wait(&self) -> Result<ExitStatus> {
        let status = {
            let mut child = self.child.lock().await;
            child.wait().await?
        };
        self.control.exited.store(true, Ordering::Release);

        self.wait_drained().await;
        remove_config(&self.config_path);

        debug!(
            session_id = self.pppoe_session_id,
            %status,
            "kl2tpd reaped"
        );
        Ok(status)
    }

    fn signal_exit(&self) -> Result<()> {
        self.control.signal()
    }

    async fn terminate(&self) {
        if let Err(e) = self.signal_exit() {
            warn!(
                session_id = self.pppoe_session_id,
                "Failed to signal kl2tpd: {}", e
            );
        }
        self.wait_drained().await;
    }
}

fn remove_config(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), "Failed to remove kl2tpd config: {}", e);
        }
    }
}

/// Read kl2tpd diagnostics until EOF, re-logging each line and reporting
/// data plane transitions. Lines are decoded lossily; kl2tpd output is not
/// guaranteed to be UTF-8.
async fn tail_log(
    stderr: ChildStderr,
    pppoe_session_id: u16,
    control: Arc<ProcessControl>,
    events: mpsc::Sender<L2tpEvent>,
    drained: watch::Sender<bool>,
) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut tracker = LogTracker::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(session_id = pppoe_session_id, "kl2tpd log read failed: {}", e);
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        debug!(target: "kl2tpd", session_id = pppoe_session_id, "{}", line);

        let Some(transition) = tracker.feed(line) else {
            continue;
        };
        let event = match transition {
            LogTransition::Up {
                tunnel_id,
                session_id,
            } => L2tpEvent::SessionUp {
                pppoe_session_id,
                tunnel_id,
                session_id,
            },
            LogTransition::Down {
                tunnel_id,
                session_id,
            } => L2tpEvent::SessionDown {
                pppoe_session_id,
                tunnel_id,
                session_id,
            },
        };

        if events.send(event).await.is_err() {
            debug!(
                session_id = pppoe_session_id,
                ?event,
                "Event consumer gone, dropping event"
            );
        }

        if matches!(event, L2tpEvent::SessionDown { .. }) {
            if let Err(e) = control.signal() {
                warn!(session_id = pppoe_session_id, "Failed to signal kl2tpd: {}", e);
            }
        }
    }

    let _ = drained.send(true);
}
