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

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::debug::{AttachSettings, DEFAULT_ATTACH_HOST};
use crate::project::BuildType;

/// Supervisor settings, loaded in layers by [`Config::load`].
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Host the debugger attaches to (default: localhost)
    #[serde(default = "default_attach_host")]
    pub attach_host: String,

    /// Socket probes before giving up (default: 180)
    #[serde(default = "default_probe_retries")]
    pub probe_retries: u32,

    /// Pause between socket probes in milliseconds (default: 1000)
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Wall-clock budget for debugger attach in seconds (default: 60)
    #[serde(default = "default_attach_budget_secs")]
    pub attach_budget_secs: u64,

    /// Bound on one attach attempt in seconds (default: 10)
    #[serde(default = "default_attach_timeout_secs")]
    pub attach_timeout_secs: u64,

    /// Pause between attach attempts in milliseconds (default: 100)
    #[serde(default = "default_attach_retry_ms")]
    pub attach_retry_ms: u64,

    /// Bound on the server kill command in seconds (default: 10)
    #[serde(default = "default_kill_timeout_secs")]
    pub kill_timeout_secs: u64,

    /// Dev-mode commands per build tool
    #[serde(default)]
    pub build: BuildCommands,
}

/// Dev-mode commands keyed by build tool.
#[derive(Debug, Deserialize, Clone)]
pub struct BuildCommands {
    /// Maven dev mode
    #[serde(default = "BuildCommand::maven")]
    pub maven: BuildCommand,

    /// Gradle dev mode
    #[serde(default = "BuildCommand::gradle")]
    pub gradle: BuildCommand,
}

impl Default for BuildCommands {
    fn default() -> Self {
        Self {
            maven: BuildCommand::maven(),
            gradle: BuildCommand::gradle(),
        }
    }
}

/// How to start dev mode with one build tool.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    /// The build tool executable (e.g., "mvn")
    pub program: String,

    /// Wrapper script preferred when present in the project root (e.g., "mvnw")
    #[serde(default)]
    pub wrapper: Option<String>,

    /// Arguments that start dev mode
    #[serde(default)]
    pub args: Vec<String>,
}

impl BuildCommand {
    fn maven() -> Self {
        Self {
            program: "mvn".to_string(),
            wrapper: Some("mvnw".to_string()),
            args: vec!["io.openliberty.tools:liberty-maven-plugin:dev".to_string()],
        }
    }

    fn gradle() -> Self {
        Self {
            program: "gradle".to_string(),
            wrapper: Some("gradlew".to_string()),
            args: vec!["libertyDev".to_string()],
        }
    }

    /// Full command line for `project_root`, with the start parameters
    /// split on whitespace and appended.
    #[must_use]
    pub fn command_line(&self, project_root: &Path, parms: &str) -> Vec<String> {
        let program = self
            .wrapper
            .as_ref()
            .map(|w| project_root.join(w))
            .filter(|w| w.is_file())
            .map_or_else(|| self.program.clone(), |w| w.display().to_string());

        std::iter::once(program)
            .chain(self.args.iter().cloned())
            .chain(parms.split_whitespace().map(str::to_string))
            .collect()
    }
}

fn default_attach_host() -> String {
    DEFAULT_ATTACH_HOST.to_string()
}

const fn default_probe_retries() -> u32 {
    180
}

const fn default_probe_interval_ms() -> u64 {
    1000
}

const fn default_attach_budget_secs() -> u64 {
    60
}

const fn default_attach_timeout_secs() -> u64 {
    10
}

const fn default_attach_retry_ms() -> u64 {
    100
}

const fn default_kill_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            attach_host: default_attach_host(),
            probe_retries: default_probe_retries(),
            probe_interval_ms: default_probe_interval_ms(),
            attach_budget_secs: default_attach_budget_secs(),
            attach_timeout_secs: default_attach_timeout_secs(),
            attach_retry_ms: default_attach_retry_ms(),
            kill_timeout_secs: default_kill_timeout_secs(),
            build: BuildCommands::default(),
        }
    }
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or does not deserialize.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Defaults for the flat settings; tables fall back through serde
        builder = builder
            .set_default("attach_host", DEFAULT_ATTACH_HOST)?
            .set_default("probe_retries", i64::from(default_probe_retries()))?
            .set_default("kill_timeout_secs", 10)?;

        // 2. User config directory (~/.config/devmode-supervisor/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("devmode-supervisor").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 3. Explicit file
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 4. Environment (DEVMODE_PROBE_RETRIES, etc.)
        builder = builder.add_source(config::Environment::with_prefix("DEVMODE"));

        let config = builder
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Retry budgets for the debugger attacher.
    #[must_use]
    pub fn attach_settings(&self) -> AttachSettings {
        AttachSettings {
            probe_retries: self.probe_retries,
            probe_interval: Duration::from_millis(self.probe_interval_ms),
            attach_timeout: Duration::from_secs(self.attach_timeout_secs),
            attach_budget: Duration::from_secs(self.attach_budget_secs),
            attach_retry_interval: Duration::from_millis(self.attach_retry_ms),
            ..AttachSettings::default()
        }
    }

    /// Bound on the server kill command.
    #[must_use]
    pub const fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }

    /// Dev-mode command for a build tool.
    #[must_use]
    pub const fn build_command(&self, build_type: BuildType) -> &BuildCommand {
        match build_type {
            BuildType::Maven => &self.build.maven,
            BuildType::Gradle => &self.build.gradle,
        }
    }
}
