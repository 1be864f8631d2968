// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Devmode supervisor runs Maven/Gradle dev mode for a project inside a
//! pseudo-terminal and attaches a debugger to the JVM it spawns.
//!
//! Sessions are tracked per project in a [`session::SessionRegistry`];
//! debugger attach requests run as background [`debug::AttachJob`]s that are
//! cancelled when their project's session goes away.

/// Command-line output helpers.
pub mod cli;
/// Layered configuration for budgets and build commands.
pub mod config;
/// JDWP probing, debugger attach and debug port resolution.
pub mod debug;
/// Error types for sessions and debugger attach.
pub mod error;
/// Project model and server file discovery.
pub mod project;
/// Dev-mode process sessions and the session registry.
pub mod session;
