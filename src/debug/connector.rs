// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Debugger connectors: the step that turns a listening port into a debug
//! target handle.

use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// The JDWP handshake token, sent by the debugger and echoed by the JVM.
pub const JDWP_HANDSHAKE: &[u8] = b"JDWP-Handshake";

/// Establishes a debugger-protocol connection to a JVM.
///
/// Implementations perform one attempt; retry policy belongs to the
/// attacher.
pub trait DebugConnector: Send + Sync {
    /// The handle produced by a successful attach.
    type Target: Send + 'static;

    /// Attaches to `host:port`, giving up after `timeout`.
    fn attach(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> impl Future<Output = io::Result<Self::Target>> + Send;
}

/// Attaches over a socket by completing the JDWP handshake.
#[derive(Debug, Default, Clone, Copy)]
pub struct JdwpConnector;

/// A JDWP socket whose handshake has completed.
#[derive(Debug)]
pub struct JdwpConnection {
    address: String,
    stream: TcpStream,
}

impl JdwpConnection {
    /// `host:port` the connection was made to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Hands the raw stream to the debug model.
    #[must_use]
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

impl DebugConnector for JdwpConnector {
    type Target = JdwpConnection;

    async fn attach(&self, host: &str, port: u16, timeout: Duration) -> io::Result<JdwpConnection> {
        let handshake = async {
            let mut stream = TcpStream::connect((host, port)).await?;
            stream.write_all(JDWP_HANDSHAKE).await?;
            stream.flush().await?;

            let mut reply = [0u8; JDWP_HANDSHAKE.len()];
            stream.read_exact(&mut reply).await?;
            if reply != JDWP_HANDSHAKE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "peer did not echo the JDWP handshake",
                ));
            }

            Ok(JdwpConnection {
                address: format!("{host}:{port}"),
                stream,
            })
        };

        tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("JDWP handshake with {host}:{port} timed out"),
                )
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_handshake_with_echoing_peer() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let jvm = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;
            let mut buf = [0u8; JDWP_HANDSHAKE.len()];
            socket.read_exact(&mut buf).await?;
            socket.write_all(&buf).await?;
            Ok::<_, io::Error>(buf)
        });

        let connection = JdwpConnector
            .attach("127.0.0.1", port, Duration::from_secs(5))
            .await?;
        assert_eq!(connection.address(), format!("127.0.0.1:{port}"));
        assert_eq!(&jvm.await??, JDWP_HANDSHAKE);
        Ok(())
    }

    #[tokio::test]
    async fn test_wrong_reply_is_rejected() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; JDWP_HANDSHAKE.len()];
                let _ = socket.read_exact(&mut buf).await;
                let _ = socket.write_all(b"HTTP/1.1 400 B").await;
            }
        });

        let err = JdwpConnector
            .attach("127.0.0.1", port, Duration::from_secs(5))
            .await
            .err()
            .map(|e| e.kind());
        assert_eq!(err, Some(io::ErrorKind::InvalidData));
        Ok(())
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let _hold = tokio::spawn(async move {
            let accepted = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(accepted);
        });

        let err = JdwpConnector
            .attach("127.0.0.1", port, Duration::from_millis(200))
            .await
            .err()
            .map(|e| e.kind());
        assert_eq!(err, Some(io::ErrorKind::TimedOut));
        Ok(())
    }
}
