/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use bytes::Bytes;
use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak, mpsc};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::events::EventKind;
use super::registry::{RegistryInner, SessionRegistry};
use super::state::{CloseReason, SessionState, SessionStatus};
use crate::error::SupervisorError;

/// How long the forced-kill command may run before it is itself killed.
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(10);

/// Output chunks buffered per reader before slow readers start lagging.
const OUTPUT_CAPACITY: usize = 1024;

/// Read buffer size for the terminal reader thread.
const READ_CHUNK: usize = 4096;

/// How long an exited session waits for its last output before closing.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Everything needed to launch a dev-mode process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Working directory, or the current one if unset.
    pub cwd: Option<PathBuf>,
    /// Environment overrides applied on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Terminal rows.
    pub rows: u16,
    /// Terminal columns.
    pub cols: u16,
    /// Bound on the forced-kill command used during teardown.
    pub kill_timeout: Duration,
}

impl LaunchSpec {
    /// Creates a spec for `command` with an 80x24 terminal.
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            cwd: None,
            env: Vec::new(),
            rows: 24,
            cols: 80,
            kill_timeout: DEFAULT_KILL_TIMEOUT,
        }
    }

    /// Sets the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Adds an environment override.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the terminal size.
    #[must_use]
    pub const fn size(mut self, rows: u16, cols: u16) -> Self {
        self.rows = rows;
        self.cols = cols;
        self
    }

    /// Sets the forced-kill timeout.
    #[must_use]
    pub const fn kill_timeout(mut self, timeout: Duration) -> Self {
        self.kill_timeout = timeout;
        self
    }
}

/// One dev-mode process bound to a pseudo-terminal.
///
/// A session has a single writer (whoever drives the terminal) and any
/// number of readers, each with its own subscription to the output.
pub struct ProcessSession {
    project: String,
    state: AtomicU8,
    pid: Option<u32>,
    server_pid: Mutex<Option<u32>>,
    started: Instant,
    kill_timeout: Duration,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    output: broadcast::Sender<Bytes>,
    first_reader: Mutex<Option<broadcast::Receiver<Bytes>>>,
    closed: CancellationToken,
    registry: Weak<RegistryInner>,
}

impl std::fmt::Debug for ProcessSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSession")
            .field("project", &self.project)
            .field("state", &self.state())
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProcessSession {
    /// Launches `launch` in a new pseudo-terminal and registers the session
    /// under `project`, stopping any previous session for that name first.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Launch`] if the command is empty, the
    /// terminal cannot be opened, or the program cannot be spawned.
    pub async fn start(
        registry: &SessionRegistry,
        project: &str,
        launch: &LaunchSpec,
    ) -> Result<Arc<Self>, SupervisorError> {
        let launch_error = |message: String| SupervisorError::Launch {
            project: project.to_string(),
            message,
        };

        let Some(program) = launch.command.first().filter(|p| !p.trim().is_empty()) else {
            return Err(launch_error("command is empty".to_string()));
        };

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: launch.rows,
                cols: launch.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| launch_error(format!("failed to open terminal: {e}")))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(&launch.command[1..]);
        if let Some(cwd) = &launch.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &launch.env {
            cmd.env(key, value);
        }

        info!(
            "Starting dev mode for {}: {}",
            project,
            launch.command.join(" ")
        );

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| launch_error(format!("failed to spawn '{program}': {e}")))?;
        // The child holds its own handle; ours would keep the terminal open
        // after it exits.
        drop(pair.slave);

        let mut killer = child.clone_killer();
        let io = pair
            .master
            .try_clone_reader()
            .and_then(|reader| Ok((reader, pair.master.take_writer()?)));
        let (reader, writer) = match io {
            Ok(io) => io,
            Err(e) => {
                let _ = killer.kill();
                return Err(launch_error(format!("failed to open terminal stream: {e}")));
            }
        };

        let (output, first_reader) = broadcast::channel(OUTPUT_CAPACITY);
        let session = Arc::new(Self {
            project: project.to_string(),
            state: AtomicU8::new(SessionState::Starting.as_u8()),
            pid: child.process_id(),
            server_pid: Mutex::new(None),
            started: Instant::now(),
            kill_timeout: launch.kill_timeout,
            writer: Mutex::new(Some(writer)),
            master: Mutex::new(Some(pair.master)),
            killer: Mutex::new(killer),
            output,
            first_reader: Mutex::new(Some(first_reader)),
            closed: CancellationToken::new(),
            registry: registry.downgrade(),
        });

        // Published before the exit watcher runs, so an instant exit still finds
        // the session registered and deregisters it.
        registry.put(session.clone()).await;

        let (drained_tx, drained_rx) = mpsc::channel::<()>();

        let io_session = session.clone();
        let reader_thread = std::thread::Builder::new()
            .name(format!("devmode-io-{project}"))
            .spawn(move || {
                io_session.pump_output(reader);
                let _ = drained_tx.send(());
            });
        if let Err(e) = reader_thread {
            session.stop_with(CloseReason::Stopped).await;
            return Err(launch_error(format!("failed to start terminal reader: {e}")));
        }

        // Exit is watched apart from the output: a descendant that inherits
        // the terminal keeps it open long after the launched process is gone.
        let wait_session = session.clone();
        let waiter_thread = std::thread::Builder::new()
            .name(format!("devmode-wait-{project}"))
            .spawn(move || {
                match child.wait() {
                    Ok(status) => info!(
                        "Dev mode process for {} exited with code {}",
                        wait_session.project,
                        status.exit_code()
                    ),
                    Err(e) => warn!(
                        "Failed to reap dev mode process for {}: {}",
                        wait_session.project, e
                    ),
                }
                if drained_rx.recv_timeout(OUTPUT_DRAIN_GRACE).is_err() {
                    debug!(
                        "Terminal for {} still open after exit; closing without it",
                        wait_session.project
                    );
                }
                wait_session.mark_closed(CloseReason::Exited);
            });
        if let Err(e) = waiter_thread {
            session.stop_with(CloseReason::Stopped).await;
            return Err(launch_error(format!("failed to start exit watcher: {e}")));
        }

        if session
            .state
            .compare_exchange(
                SessionState::Starting.as_u8(),
                SessionState::Running.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            registry.events().send(EventKind::Started {
                project: project.to_string(),
                pid: session.pid,
            });
        }

        Ok(session)
    }

    /// Forwards terminal output to subscribers until EOF.
    fn pump_output(&self, mut reader: Box<dyn Read + Send>) {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    // No subscribers is fine; output is dropped.
                    let _ = self.output.send(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    trace!("Terminal read for {} ended: {}", self.project, e);
                    break;
                }
            }
        }
        debug!("Terminal output closed for {}", self.project);
    }

    /// The project this session belongs to.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Returns `true` until the session is closed.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state() != SessionState::Closed
    }

    /// PID of the process launched in the terminal.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// PID of the inner application server, if one was recorded.
    #[must_use]
    pub fn server_pid(&self) -> Option<u32> {
        *lock(&self.server_pid)
    }

    /// Records the inner server PID so teardown can kill it directly.
    pub fn set_server_pid(&self, pid: u32) {
        *lock(&self.server_pid) = Some(pid);
    }

    /// Point-in-time status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            project: self.project.clone(),
            state: self.state(),
            pid: self.pid,
            server_pid: self.server_pid(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    /// Subscribes to terminal output.
    ///
    /// The first subscriber sees output from the moment the process started,
    /// up to the buffer capacity; later ones see output produced after they
    /// subscribe. The channel stays open while the session is referenced, so
    /// readers should also watch [`Self::wait_closed`].
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        lock(&self.first_reader)
            .take()
            .unwrap_or_else(|| self.output.subscribe())
    }

    /// Writes `data` to the process's terminal input.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::StreamClosed`] if the session is closed,
    /// or [`SupervisorError::Io`] if the write itself fails.
    pub fn write(&self, data: &[u8]) -> Result<(), SupervisorError> {
        let mut writer = lock(&self.writer);
        let Some(stream) = writer.as_mut().filter(|_| self.is_alive()) else {
            debug!(
                "Dropping {} byte(s) written to closed session {}",
                data.len(),
                self.project
            );
            return Err(SupervisorError::StreamClosed {
                project: self.project.clone(),
            });
        };
        stream.write_all(data)?;
        stream.flush()?;
        Ok(())
    }

    /// Completes once the session is closed.
    pub async fn wait_closed(&self) {
        self.closed.cancelled().await;
    }

    /// Transitions to closed. Only the first call has any effect.
    ///
    /// Closes the terminal stream, deregisters the session and notifies
    /// the project's teardown listeners. Returns `true` if this call
    /// performed the transition.
    pub fn mark_closed(&self, reason: CloseReason) -> bool {
        let previous = self.state.swap(SessionState::Closed.as_u8(), Ordering::SeqCst);
        if SessionState::from_u8(previous) == SessionState::Closed {
            return false;
        }

        lock(&self.writer).take();
        lock(&self.master).take();
        self.closed.cancel();

        if let Some(registry) = SessionRegistry::upgrade(&self.registry) {
            registry.session_closed(self, reason);
        }
        true
    }

    /// Stops the session because a caller asked for it.
    pub async fn stop(&self) {
        self.stop_with(CloseReason::Stopped).await;
    }

    /// Kills the inner server (if known) and the terminal process, then
    /// marks the session closed with `reason`.
    pub async fn stop_with(&self, reason: CloseReason) {
        if !self.is_alive() {
            return;
        }

        if let Some(pid) = self.server_pid() {
            kill_server_process(pid, self.kill_timeout).await;
        }

        if let Err(e) = lock(&self.killer).kill() {
            debug!("Terminal process for {} already gone: {}", self.project, e);
        }

        self.mark_closed(reason);
    }
}

/// Best-effort termination of an application server process.
///
/// Runs the platform kill command for `pid`; if that command has not
/// finished within `timeout` it is itself killed. Failures are logged and
/// never returned, since this runs during teardown.
pub async fn kill_server_process(pid: u32, timeout: Duration) {
    let (program, args) = kill_command(pid);
    debug!("Killing server process {} with {} {:?}", pid, program, args);

    let mut child = match Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to run kill command for server process {}: {}", pid, e);
            return;
        }
    };

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => {
            info!("Killed server process {}", pid);
        }
        Ok(Ok(status)) => {
            warn!("Kill command for server process {} exited with {}", pid, status);
        }
        Ok(Err(e)) => {
            warn!("Kill command for server process {} failed: {}", pid, e);
        }
        Err(_) => {
            warn!(
                "Kill command for server process {} did not finish within {}s",
                pid,
                timeout.as_secs()
            );
            if let Err(e) = child.kill().await {
                warn!("Failed to force-kill the kill command: {}", e);
            }
        }
    }
}

#[cfg(windows)]
fn kill_command(pid: u32) -> (&'static str, Vec<String>) {
    (
        "taskkill",
        vec![
            "/F".to_string(),
            "/T".to_string(),
            "/PID".to_string(),
            pid.to_string(),
        ],
    )
}

#[cfg(not(windows))]
fn kill_command(pid: u32) -> (&'static str, Vec<String>) {
    ("kill", vec!["-TERM".to_string(), pid.to_string()])
}
