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

//! The slice of the project model the supervisor needs: a name, a
//! location, a build type, and where the build puts the server files.

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::SupervisorError;

/// File name of the generated server environment file.
pub const SERVER_ENV_FILE_NAME: &str = "server.env";

/// Maven dev-mode debug port argument key.
pub const MAVEN_DEBUG_PORT_FLAG: &str = "-DdebugPort";

/// Gradle dev-mode debug port argument key.
pub const GRADLE_DEBUG_PORT_FLAG: &str = "--libertyDebugPort";

/// How deep below the servers directory `server.env` may live.
const SERVER_ENV_SEARCH_DEPTH: usize = 2;

/// Build tool driving a project's dev mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    /// Maven (`pom.xml`).
    Maven,
    /// Gradle (`build.gradle`).
    Gradle,
}

impl BuildType {
    /// The start parameter that carries the debug port.
    #[must_use]
    pub const fn debug_port_flag(self) -> &'static str {
        match self {
            Self::Maven => MAVEN_DEBUG_PORT_FLAG,
            Self::Gradle => GRADLE_DEBUG_PORT_FLAG,
        }
    }

    /// Directory the build installs server definitions into.
    #[must_use]
    pub fn servers_dir(self, project_root: &Path) -> PathBuf {
        match self {
            Self::Maven => project_root
                .join("target")
                .join("liberty")
                .join("wlp")
                .join("usr")
                .join("servers"),
            Self::Gradle => project_root
                .join("build")
                .join("wlp")
                .join("usr")
                .join("servers"),
        }
    }

    /// Detects the build type from the build files in `root`.
    #[must_use]
    pub fn detect(root: &Path) -> Option<Self> {
        if root.join("pom.xml").is_file() {
            Some(Self::Maven)
        } else if root.join("build.gradle").is_file() || root.join("build.gradle.kts").is_file() {
            Some(Self::Gradle)
        } else {
            None
        }
    }
}

impl std::fmt::Display for BuildType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Maven => f.write_str("maven"),
            Self::Gradle => f.write_str("gradle"),
        }
    }
}

/// A user project that can run in dev mode.
#[derive(Debug, Clone)]
pub struct Project {
    /// Unique name; the registry key.
    pub name: String,
    /// Project root directory.
    pub path: PathBuf,
    /// Build tool.
    pub build_type: BuildType,
    /// Child modules that hold the server configuration, for aggregator
    /// projects. Empty for a project that is its own server module.
    pub server_modules: Vec<Self>,
    /// Whether this is an aggregator whose server lives in a child module.
    pub is_parent: bool,
}

impl Project {
    /// Creates a single-module project.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, build_type: BuildType) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            build_type,
            server_modules: Vec::new(),
            is_parent: false,
        }
    }

    /// Marks this project as an aggregator and adds a server module.
    #[must_use]
    pub fn with_server_module(mut self, module: Self) -> Self {
        self.is_parent = true;
        self.server_modules.push(module);
        self
    }

    /// The project that actually contains the server configuration.
    ///
    /// # Errors
    ///
    /// For aggregator projects, returns [`SupervisorError::ConfigNotFound`]
    /// when no child holds the server and [`SupervisorError::AmbiguousConfig`]
    /// when more than one does.
    pub fn server_project(&self) -> Result<&Self, SupervisorError> {
        if !self.is_parent {
            return Ok(self);
        }

        match self.server_modules.as_slice() {
            [] => Err(SupervisorError::ConfigNotFound {
                project: self.name.clone(),
                detail: "no child module contains the server configuration".to_string(),
            }),
            [module] => Ok(module),
            modules => Err(SupervisorError::AmbiguousConfig {
                project: self.name.clone(),
                detail: format!(
                    "multiple child modules contain server configuration: {}",
                    modules
                        .iter()
                        .map(|m| m.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }),
        }
    }

    /// Locates the generated `server.env` for this project.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::ConfigNotFound`] if the servers directory
    /// does not exist or holds no `server.env`, and
    /// [`SupervisorError::AmbiguousConfig`] if it holds more than one.
    pub fn server_env_path(&self) -> Result<PathBuf, SupervisorError> {
        let server = self.server_project()?;
        let base = server.build_type.servers_dir(&server.path);

        if !base.is_dir() {
            return Err(SupervisorError::ConfigNotFound {
                project: server.name.clone(),
                detail: format!("{} does not exist", base.display()),
            });
        }

        let walker = WalkBuilder::new(&base)
            .max_depth(Some(SERVER_ENV_SEARCH_DEPTH))
            .standard_filters(false)
            .build();

        let mut matches: Vec<PathBuf> = walker
            .flatten()
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|n| n.eq_ignore_ascii_case(SERVER_ENV_FILE_NAME))
            })
            .map(ignore::DirEntry::into_path)
            .collect();

        debug!(
            "Found {} {} file(s) under {}",
            matches.len(),
            SERVER_ENV_FILE_NAME,
            base.display()
        );

        match matches.len() {
            0 => Err(SupervisorError::ConfigNotFound {
                project: server.name.clone(),
                detail: format!("no {SERVER_ENV_FILE_NAME} under {}", base.display()),
            }),
            1 => Ok(matches.remove(0)),
            _ => {
                matches.sort();
                Err(SupervisorError::AmbiguousConfig {
                    project: server.name.clone(),
                    detail: format!(
                        "more than one {SERVER_ENV_FILE_NAME} found: {}",
                        matches
                            .iter()
                            .map(|p| p.display().to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                })
            }
        }
    }
}
