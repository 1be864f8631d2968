// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for debugger attach: socket probing, connector retries,
//! cancellation and session teardown.

use anyhow::{Result, bail};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use devmode_supervisor::debug::{
    AttachJob, AttachPhase, AttachRequest, AttachSettings, DebugAttacher, DebugConnector,
    JDWP_HANDSHAKE, JdwpConnector,
};
use devmode_supervisor::error::AttachError;
use devmode_supervisor::session::{EventKind, SessionRegistry};

const LOOPBACK: &str = "127.0.0.1";

/// Connector that fails a fixed number of times before succeeding.
struct FlakyConnector {
    failures: usize,
    attempts: AtomicUsize,
}

impl FlakyConnector {
    const fn new(failures: usize) -> Self {
        Self {
            failures,
            attempts: AtomicUsize::new(0),
        }
    }
}

impl DebugConnector for FlakyConnector {
    type Target = &'static str;

    async fn attach(&self, _host: &str, _port: u16, _timeout: Duration) -> io::Result<&'static str> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "not yet"))
        } else {
            Ok("stub-vm")
        }
    }
}

/// A port that nothing listens on.
fn closed_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind((LOOPBACK, 0))?;
    Ok(listener.local_addr()?.port())
}

/// A listener that accepts and holds connections until the test ends.
async fn accepting_listener() -> Result<u16> {
    let listener = TcpListener::bind((LOOPBACK, 0)).await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    Ok(port)
}

fn fast_settings() -> AttachSettings {
    AttachSettings {
        probe_retries: 3,
        probe_interval: Duration::from_millis(10),
        probe_connect_timeout: Duration::from_millis(500),
        attach_timeout: Duration::from_millis(500),
        attach_budget: Duration::from_millis(300),
        attach_retry_interval: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_cancel_during_probing_is_prompt() -> Result<()> {
    let registry = SessionRegistry::new();
    let attacher = Arc::new(DebugAttacher::new(
        FlakyConnector::new(0),
        registry.clone(),
        AttachSettings::default(),
    ));
    let port = closed_port()?;

    let job = AttachJob::spawn(
        attacher,
        AttachRequest::new("app", port).with_host(LOOPBACK),
        &CancellationToken::new(),
    );
    let phases = job.phases();

    // Let it get into the one-second pause between probes.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(*phases.borrow(), AttachPhase::ProbingSocket);

    let cancelled_at = Instant::now();
    job.cancel();
    let result = job.wait().await;

    assert!(matches!(result, Err(AttachError::Cancelled)));
    assert!(cancelled_at.elapsed() < Duration::from_millis(1500));
    assert_eq!(*phases.borrow(), AttachPhase::Cancelled);
    assert_eq!(registry.listener_count("app"), 0);
    Ok(())
}

#[tokio::test]
async fn test_session_teardown_cancels_probing() -> Result<()> {
    let registry = SessionRegistry::new();
    let mut events = registry.events().subscribe();
    let attacher = Arc::new(DebugAttacher::new(
        FlakyConnector::new(0),
        registry.clone(),
        AttachSettings::default(),
    ));
    let port = closed_port()?;

    let job = AttachJob::spawn(
        attacher,
        AttachRequest::new("app", port).with_host(LOOPBACK),
        &CancellationToken::new(),
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    registry.dispose("app").await;
    let result = tokio::time::timeout(Duration::from_millis(1500), job.wait()).await?;

    // Closure, not a probe timeout.
    assert!(matches!(result, Err(AttachError::Cancelled)));

    let event = events.recv().await?;
    assert!(matches!(
        event.kind,
        EventKind::AttachFailed {
            cancelled: true,
            ..
        }
    ));
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_stopping_live_session_cancels_probing() -> Result<()> {
    use devmode_supervisor::session::{LaunchSpec, ProcessSession};

    let registry = SessionRegistry::new();
    let session =
        ProcessSession::start(&registry, "app", &LaunchSpec::new(["sleep", "30"])).await?;
    let attacher = Arc::new(DebugAttacher::new(
        FlakyConnector::new(0),
        registry.clone(),
        AttachSettings::default(),
    ));

    let job = AttachJob::spawn(
        attacher,
        AttachRequest::new("app", closed_port()?).with_host(LOOPBACK),
        &CancellationToken::new(),
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    session.stop().await;
    let result = tokio::time::timeout(Duration::from_millis(1500), job.wait()).await?;
    assert!(matches!(result, Err(AttachError::Cancelled)));
    Ok(())
}

#[tokio::test]
async fn test_attach_succeeds_after_retries() -> Result<()> {
    let registry = SessionRegistry::new();
    let mut events = registry.events().subscribe();
    let port = accepting_listener().await?;
    let attacher = Arc::new(DebugAttacher::new(
        FlakyConnector::new(2),
        registry.clone(),
        AttachSettings {
            attach_budget: Duration::from_secs(5),
            ..fast_settings()
        },
    ));

    let request = AttachRequest::new("app", port)
        .with_host(LOOPBACK)
        .with_launch("app [debug]");
    let job = AttachJob::spawn(attacher, request, &CancellationToken::new());
    let phases = job.phases();
    let target = job.wait().await?;

    assert_eq!(target.handle, "stub-vm");
    assert_eq!(target.launch, "app [debug]");
    assert_eq!(target.project, "app");
    assert_eq!((target.host.as_str(), target.port), (LOOPBACK, port));
    assert_eq!(*phases.borrow(), AttachPhase::Attached);
    assert_eq!(registry.listener_count("app"), 0);

    let event = events.recv().await?;
    assert_eq!(
        event.kind,
        EventKind::DebuggerAttached {
            project: "app".to_string(),
            host: LOOPBACK.to_string(),
            port,
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_probe_timeout_reports_host_and_port() -> Result<()> {
    let port = closed_port()?;
    let attacher = DebugAttacher::new(
        FlakyConnector::new(0),
        SessionRegistry::new(),
        fast_settings(),
    );

    let started = Instant::now();
    let result = attacher
        .wait_for_listening("app", LOOPBACK, port, &CancellationToken::new())
        .await;

    match result {
        Err(AttachError::Timeout { host, port: p }) => {
            assert_eq!(host, LOOPBACK);
            assert_eq!(p, port);
        }
        other => bail!("expected a timeout, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[tokio::test]
async fn test_timeout_message_names_the_port() -> Result<()> {
    let port = closed_port()?;
    let attacher = Arc::new(DebugAttacher::new(
        FlakyConnector::new(0),
        SessionRegistry::new(),
        fast_settings(),
    ));

    let job = AttachJob::spawn(
        attacher,
        AttachRequest::new("app", port).with_host(LOOPBACK),
        &CancellationToken::new(),
    );
    let Err(err) = job.wait().await else {
        bail!("attach should not succeed against a closed port");
    };

    let message = err.to_string();
    assert!(message.contains(LOOPBACK), "{message}");
    assert!(message.contains(&format!("port: {port}")), "{message}");
    Ok(())
}

#[tokio::test]
async fn test_attach_budget_exhaustion_is_connection_failed() -> Result<()> {
    let port = accepting_listener().await?;
    let connector = FlakyConnector::new(usize::MAX);
    let attacher = DebugAttacher::new(connector, SessionRegistry::new(), fast_settings());

    let request = AttachRequest::new("app", port).with_host(LOOPBACK);
    let result = attacher.attach(&request, &CancellationToken::new()).await;

    match result {
        Err(AttachError::ConnectionFailed { host, port: p, .. }) => {
            assert_eq!(host, LOOPBACK);
            assert_eq!(p, port);
        }
        other => bail!("expected connection failure, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_jdwp_attach_against_fake_vm() -> Result<()> {
    let listener = TcpListener::bind((LOOPBACK, 0)).await?;
    let port = listener.local_addr()?.port();

    // Echo the handshake to every client; probes hang up without reading.
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; JDWP_HANDSHAKE.len()];
                if socket.read_exact(&mut buf).await.is_ok() && buf == JDWP_HANDSHAKE {
                    let _ = socket.write_all(&buf).await;
                    // Hold the debugger connection open.
                    let _ = socket.read(&mut buf).await;
                }
            });
        }
    });

    let attacher = Arc::new(DebugAttacher::new(
        JdwpConnector,
        SessionRegistry::new(),
        AttachSettings {
            attach_budget: Duration::from_secs(5),
            ..fast_settings()
        },
    ));
    let job = AttachJob::spawn(
        attacher,
        AttachRequest::new("app", port).with_host(LOOPBACK),
        &CancellationToken::new(),
    );
    let target = job.wait().await?;

    assert_eq!(target.handle.address(), format!("{LOOPBACK}:{port}"));
    Ok(())
}
