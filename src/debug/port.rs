// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Debug port resolution.
//!
//! A port comes from, in order of preference: the start parameters the user
//! supplied, a freshly allocated ephemeral port, or (for a dev mode that is
//! already running) the `WLP_DEBUG_ADDRESS` entry of the generated
//! `server.env`.

use regex::Regex;
use std::net::TcpListener;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::error::SupervisorError;
use crate::project::{BuildType, Project};

/// Marker token of the debug address entry in `server.env`.
pub const WLP_DEBUG_ADDRESS: &str = "WLP_DEBUG_ADDRESS";

static DEBUG_PORT_BANNER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Liberty debug port: \[\s*(\d+)\s*\]").ok());

/// Where a resolved debug port came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSource {
    /// Embedded in the start parameters.
    StartParms,
    /// Allocated by binding an ephemeral port.
    Ephemeral,
    /// Read from the generated `server.env`.
    ServerEnv,
}

/// Extracts the debug port flag value from whitespace-separated start
/// parameters, e.g. `-DdebugPort=7777`.
#[must_use]
pub fn debug_port_from_parms(build_type: BuildType, parms: &str) -> Option<u16> {
    let flag = build_type.debug_port_flag();
    let part = parms.split_whitespace().find(|part| part.contains(flag))?;
    let value = part.split('=').nth(1)?.trim();
    match value.parse() {
        Ok(port) => Some(port),
        Err(_) => {
            warn!("Ignoring unparsable debug port in start parameters: {}", part);
            None
        }
    }
}

/// Appends `<flag>=<port>` to the start parameters unless the flag is
/// already present.
#[must_use]
pub fn add_debug_port_to_start_parms(build_type: BuildType, port: u16, parms: &str) -> String {
    let flag = build_type.debug_port_flag();
    if parms.contains(flag) {
        return parms.to_string();
    }

    if parms.is_empty() {
        format!("{flag}={port}")
    } else {
        format!("{parms} {flag}={port}")
    }
}

/// Returns a port that was free at the time of the call, by briefly binding
/// a listener on loopback.
///
/// # Errors
///
/// Returns an I/O error if no listener can be bound.
pub fn allocate_ephemeral_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Finds the value of the last line containing [`WLP_DEBUG_ADDRESS`].
///
/// The value is everything after the first `=` on that line, trimmed.
/// Later entries override earlier ones, as they do for the server runtime.
#[must_use]
pub fn parse_debug_address(contents: &str) -> Option<&str> {
    let line = contents
        .lines()
        .rev()
        .find(|line| line.contains(WLP_DEBUG_ADDRESS))?;
    line.split_once('=').map(|(_, value)| value.trim())
}

/// Parses a debug address value (`7777` or `host:7777`) into a port.
#[must_use]
pub fn port_from_address(address: &str) -> Option<u16> {
    let port = address.rsplit(':').next().unwrap_or(address);
    port.trim().parse().ok()
}

/// Reads the debug port from a `server.env` file.
///
/// Returns `Ok(None)` when the file has no usable entry.
///
/// # Errors
///
/// Returns [`SupervisorError::ConfigNotFound`] if the file does not exist
/// and [`SupervisorError::Io`] if it cannot be read.
pub fn read_debug_port_from_server_env(
    project: &str,
    server_env: &Path,
) -> Result<Option<u16>, SupervisorError> {
    let contents = match std::fs::read_to_string(server_env) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SupervisorError::ConfigNotFound {
                project: project.to_string(),
                detail: format!("{} does not exist", server_env.display()),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let port = parse_debug_address(&contents).and_then(port_from_address);
    debug!("Debug port from {}: {:?}", server_env.display(), port);
    Ok(port)
}

/// Recognises the dev-mode banner `Liberty debug port: [ 63624 ]`.
#[must_use]
pub fn parse_debug_port_message(line: &str) -> Option<u16> {
    let pattern = DEBUG_PORT_BANNER.as_ref()?;
    pattern.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Determines the debug port for `project`.
///
/// `dev_mode_running` means the server was started earlier, possibly
/// without our parameters, so only its generated files know the port.
///
/// # Errors
///
/// Returns [`SupervisorError::ConfigNotFound`] or
/// [`SupervisorError::AmbiguousConfig`] when the `server.env` fallback
/// cannot produce a port, and [`SupervisorError::Io`] if no ephemeral port
/// can be bound.
pub fn resolve_debug_port(
    project: &Project,
    parms: &str,
    dev_mode_running: bool,
) -> Result<(u16, PortSource), SupervisorError> {
    if let Some(port) = debug_port_from_parms(project.build_type, parms) {
        return Ok((port, PortSource::StartParms));
    }

    if !dev_mode_running {
        return Ok((allocate_ephemeral_port()?, PortSource::Ephemeral));
    }

    let server_env = project.server_env_path()?;
    read_debug_port_from_server_env(&project.name, &server_env)?
        .map(|port| (port, PortSource::ServerEnv))
        .ok_or_else(|| SupervisorError::ConfigNotFound {
            project: project.name.clone(),
            detail: format!(
                "no {WLP_DEBUG_ADDRESS} entry in {}",
                server_env.display()
            ),
        })
}
