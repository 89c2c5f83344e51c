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

//! `netmap.conf` reader
//!
//! VMware maps network names to vmnet devices with lines such as
//! `network0.name = "HostOnly"` and `network0.device = "vmnet1"`.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{escaped_transform, is_not, take_while},
    character::complete::{char, one_of},
    combinator::{all_consuming, opt, recognize, value},
    multi::{many0, many1_count},
    sequence::{delimited, preceded},
};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::ParseError;
use crate::scan::{quoted, uncomment};

const NEWLINE: &str = "\n";

fn blank(input: &str) -> IResult<&str, &str> {
    take_while(|c: char| matches!(c, ' ' | '\t' | '\r')).parse(input)
}

fn token(input: &str) -> IResult<&str, &str> {
    preceded(
        blank,
        alt((
            value(NEWLINE, many1_count(preceded(blank, char('\n')))),
            recognize(one_of(".=")),
            quoted,
            is_not(" \t\r\n.=\""),
        )),
    )
    .parse(input)
}

/// Split uncommented `netmap.conf` text into tokens. `.`, `=` and newlines
/// are tokens of their own; runs of newlines collapse into one.
pub fn tokenize(input: &str) -> Vec<String> {
    let tokens: IResult<&str, Vec<&str>> = many0(token).parse(input);
    tokens
        .map(|(_, tokens)| tokens.into_iter().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Strip the quotes from a value and resolve its escapes.
pub fn unquote(text: &str) -> Result<String, ParseError> {
    let escape = alt((
        value("\\", char('\\')),
        value("\"", char('"')),
        value("\n", char('n')),
        value("\t", char('t')),
    ));
    let inner = escaped_transform(is_not("\\\""), '\\', escape);
    let unquoted: IResult<&str, Option<String>> =
        all_consuming(delimited(char('"'), opt(inner), char('"'))).parse(text);

    unquoted
        .map(|(_, inner)| inner.unwrap_or_default())
        .map_err(|_| ParseError::NetworkMap(format!("invalid value {text}")))
}

fn parse(tokens: Vec<String>) -> Result<Vec<BTreeMap<String, String>>, ParseError> {
    let mut networks: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut state: Vec<String> = Vec::new();

    let mut assign = |state: &mut Vec<String>| -> Result<(), ParseError> {
        match std::mem::take(state).as_slice() {
            [network, attribute, value] => {
                networks
                    .entry(network.clone())
                    .or_default()
                    .insert(attribute.clone(), unquote(value)?);
                Ok(())
            }
            other => Err(ParseError::NetworkMap(format!(
                "invalid attribute assignment: {other:?}"
            ))),
        }
    };

    for token in tokens {
        match token.as_str() {
            "." if state.len() != 1 => {
                return Err(ParseError::NetworkMap("missing network index".into()));
            }
            "=" if state.len() != 2 => {
                return Err(ParseError::NetworkMap("assignment to empty attribute".into()));
            }
            "." | "=" => {}
            NEWLINE if state.is_empty() => {}
            NEWLINE => assign(&mut state)?,
            _ => state.push(token),
        }
    }

    // The last line need not end in a newline
    if !state.is_empty() {
        assign(&mut state)?;
    }

    Ok(networks.into_values().collect())
}

/// Lookups between network names and the host devices that carry them.
pub trait NetworkNameMapper {
    fn name_into_devices(&self, name: &str) -> Result<Vec<String>, ParseError>;

    fn device_into_name(&self, device: &str) -> Result<String, ParseError>;
}

/// Network attributes keyed by name, ordered by network index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkMap(Vec<BTreeMap<String, String>>);

impl NetworkMap {
    pub fn parse(content: &str) -> Result<Self, ParseError> {
        parse(tokenize(&uncomment(content))).map(NetworkMap)
    }

    pub fn read(path: &Path) -> Result<Self, ParseError> {
        let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn networks(&self) -> &[BTreeMap<String, String>] {
        &self.0
    }

    fn attribute<'a>(network: &'a BTreeMap<String, String>, key: &str) -> &'a str {
        network.get(key).map(String::as_str).unwrap_or_default()
    }
}

impl NetworkNameMapper for NetworkMap {
    fn name_into_devices(&self, name: &str) -> Result<Vec<String>, ParseError> {
        let devices: Vec<String> = self
            .0
            .iter()
            .filter(|network| Self::attribute(network, "name").eq_ignore_ascii_case(name))
            .map(|network| Self::attribute(network, "device").to_string())
            .collect();

        if devices.is_empty() {
            return Err(ParseError::NotFound {
                kind: "network",
                key: name.to_string(),
            });
        }
        Ok(devices)
    }

    fn device_into_name(&self, device: &str) -> Result<String, ParseError> {
        self.0
            .iter()
            .find(|network| Self::attribute(network, "device").eq_ignore_ascii_case(device))
            .map(|network| Self::attribute(network, "name").to_string())
            .ok_or_else(|| ParseError::NotFound {
                kind: "device",
                key: device.to_string(),
            })
    }
}

impl fmt::Display for NetworkMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, network) in self.0.iter().enumerate() {
            writeln!(f, "network{idx}.name = \"{}\"", Self::attribute(network, "name"))?;
            writeln!(f, "network{idx}.device = \"{}\"", Self::attribute(network, "device"))?;
        }
        Ok(())
    }
}
