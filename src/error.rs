// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Error types shared by the session and debug layers.

use std::time::Duration;

/// Errors raised while managing dev-mode sessions and their server files.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The external process could not be spawned.
    #[error("failed to launch dev mode for project '{project}': {message}")]
    Launch {
        /// Project the launch was for.
        project: String,
        /// What went wrong.
        message: String,
    },

    /// A read or write was attempted on a closed session.
    #[error("the terminal stream for project '{project}' is closed")]
    StreamClosed {
        /// Project whose session is closed.
        project: String,
    },

    /// The server configuration file could not be located.
    #[error("server configuration not found for project '{project}': {detail}")]
    ConfigNotFound {
        /// Project being inspected.
        project: String,
        /// Where we looked.
        detail: String,
    },

    /// A structural scan expected exactly one candidate and found several.
    #[error("ambiguous server configuration for project '{project}': {detail}")]
    AmbiguousConfig {
        /// Project being inspected.
        project: String,
        /// The competing candidates.
        detail: String,
    },

    /// I/O failure on a live stream or file.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Terminal outcomes of a debugger attach request other than success.
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    /// The debug socket never started listening within the probe budget.
    #[error(
        "timed out trying to attach the debugger to JVM on host: {host} and port: {port}. \
         If the server starts later, attach a remote debugger manually; the port in use is \
         printed by dev mode as 'Liberty debug port: [ {port} ]'"
    )]
    Timeout {
        /// Host that was probed.
        host: String,
        /// Port that was probed.
        port: u16,
    },

    /// The socket was listening but the debugger handshake never completed.
    #[error("debugger could not connect to {host}:{port} within {}s", budget.as_secs())]
    ConnectionFailed {
        /// Host that was attached to.
        host: String,
        /// Port that was attached to.
        port: u16,
        /// The wall-clock budget that ran out.
        budget: Duration,
    },

    /// The request was cancelled, or the owning session went away first.
    #[error("debugger attach was cancelled")]
    Cancelled,
}

impl AttachError {
    /// Returns `true` for cancellations, which callers report quietly.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
