// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Lifecycle events published by the registry.
//!
//! UI collaborators subscribe to these instead of polling: a session
//! starting or closing, and a debugger attaching or giving up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use super::state::CloseReason;

/// Default number of events buffered per subscriber.
const EVENT_CAPACITY: usize = 256;

/// An event that can be broadcast to listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// The specific event data.
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Types of session events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A dev-mode session was registered and is running.
    Started {
        /// Project name.
        project: String,
        /// PID of the process launched in the terminal.
        pid: Option<u32>,
    },
    /// A session was closed and deregistered.
    Closed {
        /// Project name.
        project: String,
        /// Why it closed.
        reason: CloseReason,
    },
    /// A debugger attached to the project's JVM.
    DebuggerAttached {
        /// Project name.
        project: String,
        /// Debug host.
        host: String,
        /// Debug port.
        port: u16,
    },
    /// An attach request ended without a debugger.
    AttachFailed {
        /// Project name.
        project: String,
        /// The single user-facing message.
        message: String,
        /// Whether the request was cancelled rather than failed.
        cancelled: bool,
    },
}

/// Cloneable broadcaster for sharing across components.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Broadcast an event. Events with no subscribers are dropped.
    pub fn send(&self, kind: EventKind) {
        let event = SessionEvent {
            timestamp: Utc::now(),
            kind,
        };

        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    /// Subscribe to all events sent after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
