// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Probe-then-attach state machine.
pub mod attacher;
/// Debugger connectors and the JDWP handshake.
pub mod connector;
/// Background attach jobs tied to session teardown.
pub mod job;
/// Debug port resolution.
pub mod port;

pub use attacher::{
    AttachPhase, AttachRequest, AttachSettings, DEFAULT_ATTACH_HOST, DebugAttacher, DebugTarget,
};
pub use connector::{DebugConnector, JDWP_HANDSHAKE, JdwpConnection, JdwpConnector};
pub use job::AttachJob;
pub use port::{PortSource, resolve_debug_port};
