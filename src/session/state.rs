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

//! Session lifecycle state and status snapshots.

use serde::{Deserialize, Serialize};

/// Lifecycle of a dev-mode session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Process spawned, not yet published as running.
    Starting,
    /// Process running and its stream open.
    Running,
    /// Terminal. The session is deregistered and never reused.
    Closed,
}

impl SessionState {
    /// Create from atomic u8 value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Running,
            _ => Self::Closed,
        }
    }

    /// Convert to atomic u8 value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Starting => 0,
            Self::Running => 1,
            Self::Closed => 2,
        }
    }
}

/// Why a session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The process exited on its own.
    Exited,
    /// A caller asked for the session to stop.
    Stopped,
    /// The terminal hosting the session was disposed.
    Disposed,
    /// A new session for the same project evicted this one.
    Replaced,
    /// The registry was shut down.
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Exited => "exited",
            Self::Stopped => "stopped",
            Self::Disposed => "disposed",
            Self::Replaced => "replaced",
            Self::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Point-in-time status of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// Project the session belongs to.
    pub project: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// PID of the process launched in the terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// PID of the inner application server, if captured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_pid: Option<u32>,
    /// Seconds since spawn.
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            SessionState::Starting,
            SessionState::Running,
            SessionState::Closed,
        ] {
            assert_eq!(SessionState::from_u8(state.as_u8()), state);
        }
        assert_eq!(SessionState::from_u8(200), SessionState::Closed);
    }

    #[test]
    fn test_status_omits_unknown_pids() -> anyhow::Result<()> {
        let status = SessionStatus {
            project: "demo".to_string(),
            state: SessionState::Running,
            pid: Some(42),
            server_pid: None,
            uptime_secs: 3,
        };
        let json = serde_json::to_value(&status)?;
        assert_eq!(json["state"], "running");
        assert_eq!(json["pid"], 42);
        assert!(json.get("server_pid").is_none());
        Ok(())
    }
}
