// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Lifecycle events broadcast to UI collaborators.
pub mod events;
/// Pseudo-terminal backed dev-mode processes.
pub mod process;
/// Project-to-session registry and teardown listeners.
pub mod registry;
/// Session state and status types.
pub mod state;

pub use events::{EventBroadcaster, EventKind, SessionEvent};
pub use process::{DEFAULT_KILL_TIMEOUT, LaunchSpec, ProcessSession, kill_server_process};
pub use registry::{ListenerId, SessionRegistry, TeardownListener};
pub use state::{CloseReason, SessionState, SessionStatus};
