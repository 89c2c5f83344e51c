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

//! Error types for parsing, validating and typing boot commands

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("boot command syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("wait duration must be positive, got {0:?}")]
    NonPositiveWait(Duration),

    #[error("special {0} not found")]
    SpecialNotFound(String),

    #[error("no key code for character {0:?}")]
    UnmappedCharacter(char),

    // Sender failures are passed through untouched
    #[error(transparent)]
    Transport(#[from] anyhow::Error),

    #[error("boot command cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        Error::Syntax {
            position,
            message: message.into(),
        }
    }

    /// True when the error means the build was stopped rather than the boot
    /// command being wrong.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Errors raised while reading the host-side network configuration files
/// (`dhcpd.conf`, `netmap.conf`, `networking` and the lease databases).
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to close the global declaration")]
    CloseGlobal,

    #[error("list of tokens was left unterminated: {0:?}")]
    Unterminated(Vec<String>),

    #[error("declaration {0:?} was never closed")]
    Unclosed(String),

    #[error("invalid declaration: {name} {operands:?}")]
    InvalidDeclaration { name: String, operands: Vec<String> },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("no {kind} declarations matching {key} found")]
    NotFound { kind: &'static str, key: String },

    #[error("more than one {kind} declaration matching {key} found")]
    Ambiguous { kind: &'static str, key: String },

    #[error("network map: {0}")]
    NetworkMap(String),

    #[error("networking: {0}")]
    Networking(String),

    #[error("lease entry: {0}")]
    Lease(String),

    #[error("bytes are not well-formed ({0})")]
    MalformedBytes(String),
}

impl ParseError {
    pub(crate) fn parameter(name: &str, reason: impl Into<String>) -> Self {
        ParseError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
