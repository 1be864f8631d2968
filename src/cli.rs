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

//! CLI utilities for terminal output formatting and colors.

use crossterm::tty::IsTty;
use std::io::stdout;

/// Terminal size used when the real one cannot be detected.
pub const FALLBACK_SIZE: (u16, u16) = (24, 80);

/// Configuration for color output
#[derive(Debug, Clone)]
pub struct ColorConfig {
    /// Whether escape codes are emitted.
    pub enabled: bool,
}

impl ColorConfig {
    /// Create a new `ColorConfig`, auto-detecting TTY unless nocolor is true
    #[must_use]
    pub fn new(nocolor: bool) -> Self {
        Self {
            enabled: !nocolor && stdout().is_tty(),
        }
    }

    fn paint(&self, code: &str, s: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    /// ANSI escape code for green (attached)
    #[must_use]
    pub fn green(&self, s: &str) -> String {
        self.paint("32", s)
    }

    /// ANSI escape code for red (failures)
    #[must_use]
    pub fn red(&self, s: &str) -> String {
        self.paint("31", s)
    }

    /// ANSI escape code for yellow (cancelled)
    #[must_use]
    pub fn yellow(&self, s: &str) -> String {
        self.paint("33", s)
    }

    /// ANSI escape code for cyan (project names)
    #[must_use]
    pub fn cyan(&self, s: &str) -> String {
        self.paint("36", s)
    }

    /// ANSI escape code for dim text
    #[must_use]
    pub fn dim(&self, s: &str) -> String {
        self.paint("2", s)
    }
}

/// Get the terminal size as `(rows, cols)`, defaulting to 24x80 if unable
/// to detect
#[must_use]
pub fn terminal_size() -> (u16, u16) {
    crossterm::terminal::size()
        .ok()
        .filter(|&(cols, rows)| cols > 0 && rows > 0)
        .map_or(FALLBACK_SIZE, |(cols, rows)| (rows, cols))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_config_disabled() {
        let config = ColorConfig::new(true);
        assert!(!config.enabled);
        assert_eq!(config.green("test"), "test");
        assert_eq!(config.red("test"), "test");
        assert_eq!(config.yellow("test"), "test");
        assert_eq!(config.cyan("test"), "test");
        assert_eq!(config.dim("test"), "test");
    }

    #[test]
    fn test_color_config_enabled() {
        let config = ColorConfig { enabled: true };
        assert_eq!(config.red("x"), "\x1b[31mx\x1b[0m");
        assert_eq!(config.dim("x"), "\x1b[2mx\x1b[0m");
    }

    #[test]
    fn test_terminal_size_is_never_zero() {
        let (rows, cols) = terminal_size();
        assert!(rows > 0);
        assert!(cols > 0);
    }
}
