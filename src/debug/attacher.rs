// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Waits for a dev-mode JVM to open its debug socket, then attaches.
//!
//! The attacher moves through `ProbingSocket` (cheap JDWP handshake writes
//! until something accepts) and `ConnectorAttach` (full connector attach
//! under a wall-clock budget). Cancellation and closure of the owning
//! session are checked before every attempt and raced against every wait,
//! so either is observed within one retry interval.

use serde::Serialize;
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::connector::{DebugConnector, JDWP_HANDSHAKE};
use crate::error::AttachError;
use crate::session::SessionRegistry;

/// Host attached to when the caller does not name one.
pub const DEFAULT_ATTACH_HOST: &str = "localhost";

/// Retry budgets for one attach request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachSettings {
    /// Socket probes before giving up with a timeout.
    pub probe_retries: u32,
    /// Pause between socket probes.
    pub probe_interval: Duration,
    /// Bound on a single probe connect.
    pub probe_connect_timeout: Duration,
    /// Bound on a single connector attach.
    pub attach_timeout: Duration,
    /// Wall-clock budget for all connector attaches.
    pub attach_budget: Duration,
    /// Pause between connector attaches.
    pub attach_retry_interval: Duration,
}

impl Default for AttachSettings {
    fn default() -> Self {
        Self {
            probe_retries: 180,
            probe_interval: Duration::from_secs(1),
            probe_connect_timeout: Duration::from_secs(5),
            attach_timeout: Duration::from_secs(10),
            attach_budget: Duration::from_secs(60),
            attach_retry_interval: Duration::from_millis(100),
        }
    }
}

/// Where an attach request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachPhase {
    /// Not started.
    Idle,
    /// Waiting for the debug socket to accept connections.
    ProbingSocket,
    /// Socket is listening; attaching the debugger.
    ConnectorAttach,
    /// Debugger attached.
    Attached,
    /// Gave up.
    Failed,
    /// Cancelled, or the owning session closed.
    Cancelled,
}

impl AttachPhase {
    /// Returns `true` for phases that never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Attached | Self::Failed | Self::Cancelled)
    }
}

/// One request to attach a debugger to a project's JVM.
#[derive(Debug, Clone)]
pub struct AttachRequest {
    /// Project whose session owns the JVM.
    pub project: String,
    /// Debug host.
    pub host: String,
    /// Debug port.
    pub port: u16,
    /// Launch the resulting target is bound to.
    pub launch: String,
}

impl AttachRequest {
    /// Request for `project` on the default host. The launch is named after
    /// the project.
    pub fn new(project: impl Into<String>, port: u16) -> Self {
        let project = project.into();
        Self {
            launch: project.clone(),
            project,
            host: DEFAULT_ATTACH_HOST.to_string(),
            port,
        }
    }

    /// Overrides the host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Binds the result to a named launch.
    #[must_use]
    pub fn with_launch(mut self, launch: impl Into<String>) -> Self {
        self.launch = launch.into();
        self
    }
}

/// An attached debugger, bound to the launch that asked for it.
#[derive(Debug)]
pub struct DebugTarget<T> {
    /// Launch that owns the target.
    pub launch: String,
    /// Project whose JVM was attached.
    pub project: String,
    /// Debug host.
    pub host: String,
    /// Debug port.
    pub port: u16,
    /// Connector-specific handle.
    pub handle: T,
}

/// Runs the probe-then-attach sequence for attach requests.
pub struct DebugAttacher<C> {
    connector: C,
    registry: SessionRegistry,
    settings: AttachSettings,
}

impl<C: DebugConnector> DebugAttacher<C> {
    /// Creates an attacher that watches sessions in `registry`.
    pub fn new(connector: C, registry: SessionRegistry, settings: AttachSettings) -> Self {
        Self {
            connector,
            registry,
            settings,
        }
    }

    /// The retry budgets in use.
    #[must_use]
    pub const fn settings(&self) -> &AttachSettings {
        &self.settings
    }

    /// The registry consulted for session closure.
    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn ensure_wanted(&self, project: &str, cancel: &CancellationToken) -> Result<(), AttachError> {
        if cancel.is_cancelled() {
            debug!("Attach for {} cancelled", project);
            return Err(AttachError::Cancelled);
        }
        if self.registry.is_marked_closed(project) {
            info!("Session for {} closed before the debugger attached", project);
            return Err(AttachError::Cancelled);
        }
        Ok(())
    }

    async fn pause(cancel: &CancellationToken, interval: Duration) -> Result<(), AttachError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AttachError::Cancelled),
            () = tokio::time::sleep(interval) => Ok(()),
        }
    }

    /// Polls `host:port` until something accepts a JDWP handshake write.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError::Cancelled`] if `cancel` fires or the project's
    /// session closes first, and [`AttachError::Timeout`] once the probe
    /// budget is spent.
    pub async fn wait_for_listening(
        &self,
        project: &str,
        host: &str,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<(), AttachError> {
        let retries = self.settings.probe_retries;
        debug!(
            "Waiting for JDWP socket on {}:{} ({} attempts)",
            host, port, retries
        );

        for attempt in 1..=retries {
            self.ensure_wanted(project, cancel)?;

            let probe = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(AttachError::Cancelled),
                result = probe_once(host, port, self.settings.probe_connect_timeout) => result,
            };

            match probe {
                Ok(()) => {
                    info!(
                        "JDWP socket on {}:{} is listening (attempt {})",
                        host, port, attempt
                    );
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    trace!("{}:{} not listening yet", host, port);
                }
                Err(e) => {
                    debug!("Probe of {}:{} failed: {}", host, port, e);
                }
            }

            if attempt < retries {
                Self::pause(cancel, self.settings.probe_interval).await?;
            }
        }

        Err(AttachError::Timeout {
            host: host.to_string(),
            port,
        })
    }

    /// Attaches the debugger, retrying until the attach budget is spent.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError::Cancelled`] on cancellation or session
    /// closure, and [`AttachError::ConnectionFailed`] when the budget runs
    /// out.
    pub async fn attach(
        &self,
        request: &AttachRequest,
        cancel: &CancellationToken,
    ) -> Result<DebugTarget<C::Target>, AttachError> {
        let budget = self.settings.attach_budget;
        let deadline = Instant::now() + budget;
        let mut attempts = 0u32;

        loop {
            self.ensure_wanted(&request.project, cancel)?;
            attempts += 1;

            let attempt = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(AttachError::Cancelled),
                result = tokio::time::timeout(
                    self.settings.attach_timeout,
                    self.connector.attach(&request.host, request.port, self.settings.attach_timeout),
                ) => result,
            };

            match attempt {
                Ok(Ok(handle)) => {
                    info!(
                        "Debugger attached to {}:{} for {} after {} attempt(s)",
                        request.host, request.port, request.project, attempts
                    );
                    return Ok(DebugTarget {
                        launch: request.launch.clone(),
                        project: request.project.clone(),
                        host: request.host.clone(),
                        port: request.port,
                        handle,
                    });
                }
                Ok(Err(e)) => {
                    debug!(
                        "Attach attempt {} to {}:{} failed: {}",
                        attempts, request.host, request.port, e
                    );
                }
                Err(_) => {
                    debug!(
                        "Attach attempt {} to {}:{} timed out",
                        attempts, request.host, request.port
                    );
                }
            }

            if Instant::now() >= deadline {
                return Err(AttachError::ConnectionFailed {
                    host: request.host.clone(),
                    port: request.port,
                    budget,
                });
            }

            Self::pause(cancel, self.settings.attach_retry_interval).await?;
        }
    }

    /// Runs the whole sequence, publishing each phase on `phase`.
    ///
    /// # Errors
    ///
    /// See [`Self::wait_for_listening`] and [`Self::attach`].
    pub async fn run(
        &self,
        request: &AttachRequest,
        cancel: &CancellationToken,
        phase: &watch::Sender<AttachPhase>,
    ) -> Result<DebugTarget<C::Target>, AttachError> {
        phase.send_replace(AttachPhase::ProbingSocket);

        let outcome = async {
            self.wait_for_listening(&request.project, &request.host, request.port, cancel)
                .await?;
            phase.send_replace(AttachPhase::ConnectorAttach);
            self.attach(request, cancel).await
        }
        .await;

        phase.send_replace(match &outcome {
            Ok(_) => AttachPhase::Attached,
            Err(e) if e.is_cancelled() => AttachPhase::Cancelled,
            Err(_) => AttachPhase::Failed,
        });

        outcome
    }
}

/// One readiness probe: connect and write the handshake token. A reply is
/// not awaited; accepting the write is enough to call the socket listening.
async fn probe_once(host: &str, port: u16, connect_timeout: Duration) -> io::Result<()> {
    let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    stream.write_all(JDWP_HANDSHAKE).await?;
    Ok(())
}
