// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Boot configuration
//!
//! Loaded from TOML. Durations are written as duration literals
//! (`boot_wait = "30s"`), and the boot command may be split across several
//! strings that are joined before parsing.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::driver::{DEFAULT_KEY_INTERVAL, KEY_INTERVAL_ENV, Pacing};
use crate::duration::parse_duration;
use crate::error::Error;
use crate::parser::parse;

pub const DEFAULT_BOOT_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a boot command cannot be used when vnc is disabled")]
    BootCommandWithoutVnc,

    #[error("error parsing boot_command: {0}")]
    BootCommand(#[from] Error),

    #[error("boot_key_jitter must be between 0.0 and 1.0, got {0}")]
    InvalidJitter(f64),

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// Which keyboard the boot command is typed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DriverKind {
    #[default]
    Vnc,
    Usb,
    PcXt,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootConfig {
    pub boot_command: Vec<String>,
    #[serde(deserialize_with = "duration_literal")]
    pub boot_wait: Duration,
    #[serde(deserialize_with = "optional_duration_literal")]
    pub boot_key_interval: Option<Duration>,
    pub boot_key_jitter: f64,
    pub disable_vnc: bool,
    pub driver: DriverKind,
    // Zero sends every flush as one frame
    pub scancode_chunk_size: usize,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            boot_command: Vec::new(),
            boot_wait: DEFAULT_BOOT_WAIT,
            boot_key_interval: None,
            boot_key_jitter: 0.0,
            disable_vnc: false,
            driver: DriverKind::default(),
            scancode_chunk_size: 0,
        }
    }
}

fn duration_literal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(deserializer)?;
    parse_duration(&text).map_err(serde::de::Error::custom)
}

fn optional_duration_literal<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    Option::<String>::deserialize(deserializer)?
        .map(|text| parse_duration(&text).map_err(serde::de::Error::custom))
        .transpose()
}

impl BootConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn flat_boot_command(&self) -> String {
        self.boot_command.concat()
    }

    /// Check the configuration, returning every problem found.
    pub fn prepare(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.disable_vnc && !self.boot_command.is_empty() {
            errors.push(ConfigError::BootCommandWithoutVnc);
        }

        if !(0.0..=1.0).contains(&self.boot_key_jitter) {
            errors.push(ConfigError::InvalidJitter(self.boot_key_jitter));
        }

        match parse(&self.flat_boot_command()) {
            Ok(sequence) => errors.extend(sequence.validate().into_iter().map(ConfigError::from)),
            Err(e) => errors.push(e.into()),
        }

        errors
    }

    pub fn key_interval(&self) -> Duration {
        resolve_key_interval(self.boot_key_interval, key_interval_from_env())
    }

    pub fn pacing(&self) -> Pacing {
        Pacing::new(self.key_interval()).with_jitter(self.boot_key_jitter)
    }
}

/// The key interval set through the environment, if it parses.
pub fn key_interval_from_env() -> Option<Duration> {
    let value = std::env::var(KEY_INTERVAL_ENV).ok()?;
    match parse_duration(&value) {
        Ok(interval) => Some(interval),
        Err(e) => {
            warn!(variable = KEY_INTERVAL_ENV, error = %e, "ignoring key interval");
            None
        }
    }
}

/// An explicit, non-zero interval wins over the environment, which wins
/// over the default.
pub fn resolve_key_interval(configured: Option<Duration>, env: Option<Duration>) -> Duration {
    configured
        .filter(|interval| !interval.is_zero())
        .or(env)
        .unwrap_or(DEFAULT_KEY_INTERVAL)
}
