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

//! DHCP lease databases
//!
//! Two formats are understood: the ISC `dhcpd.leases` journal written by the
//! VMware DHCP server, and the `dhcpd_leases` file macOS keeps for its
//! built-in server. Both readers keep going past a broken entry and hand back
//! the failures next to the entries that did parse.

use chrono::{DateTime, NaiveDateTime, Utc};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{is_not, tag},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{all_consuming, map, rest},
    multi::many0,
    sequence::{delimited, preceded, separated_pair, terminated},
};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::error::ParseError;
use crate::scan::{Scanner, hex_octets, quoted, uncomment};

const LEASE_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Entries read from a lease file along with the ones that could not be.
#[derive(Debug, Default)]
pub struct ParsedLeases<T> {
    pub entries: Vec<T>,
    pub errors: Vec<ParseError>,
}

impl<T> ParsedLeases<T> {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Decode colon separated hex octets such as `00:0c:29:aa:bb:cc`.
pub fn decode_lease_bytes(input: &str) -> Result<Vec<u8>, ParseError> {
    let malformed = || ParseError::MalformedBytes(input.to_string());
    let parsed: IResult<&str, Vec<&str>> = all_consuming(hex_octets(2, 2)).parse(input);
    let (_, octets) = parsed.map_err(|_| malformed())?;
    hex::decode(octets.concat()).map_err(|_| malformed())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseEntry {
    pub address: String,
    pub starts: Option<NaiveDateTime>,
    pub starts_weekday: Option<u8>,
    pub ends: Option<NaiveDateTime>,
    pub ends_weekday: Option<u8>,
    pub ether: Vec<u8>,
    pub uid: Vec<u8>,
    /// Statements that are not interpreted.
    pub extra: Vec<String>,
}

fn lease_time(words: &[&str], address: &str) -> (Option<u8>, Option<NaiveDateTime>) {
    let (weekday, stamp) = match words {
        [weekday, date, time] => (weekday, format!("{date} {time}")),
        _ => {
            warn!(address, statement = ?words, "unreadable lease time");
            return (None, None);
        }
    };

    let weekday = weekday.parse().ok();
    let time = NaiveDateTime::parse_from_str(&stamp, LEASE_TIME_FORMAT)
        .inspect_err(|e| warn!(address, stamp = %stamp, error = %e, "unreadable lease time"))
        .ok();
    (weekday, time)
}

fn lease_bytes(value: &str, what: &str, address: &str) -> Vec<u8> {
    decode_lease_bytes(value).unwrap_or_else(|e| {
        warn!(address, value, error = %e, "unreadable {what}");
        Vec::new()
    })
}

fn lease_header(input: &str) -> IResult<&str, &str> {
    all_consuming(delimited(
        (multispace0, tag("lease"), multispace1),
        is_not(" \t\r\n"),
        multispace0,
    ))
    .parse(input)
}

// A quoted string is one word even when it holds spaces or semicolons
fn words(input: &str) -> IResult<&str, Vec<&str>> {
    many0(preceded(multispace0, alt((quoted, is_not(" \t\r\n;\""))))).parse(input)
}

/// The `;`-terminated statements of a block, then any unterminated words
/// left at its end.
fn statements(input: &str) -> IResult<&str, (Vec<Vec<&str>>, Vec<&str>)> {
    (
        many0(terminated(words, preceded(multispace0, char(';')))),
        words,
    )
        .parse(input)
}

fn read_lease(head: &str, body: &str) -> Result<LeaseEntry, ParseError> {
    let unreadable = || {
        ParseError::Lease(format!("unable to parse lease entry {:?}", head.trim()))
    };
    let (_, address) = lease_header(head).map_err(|_| unreadable())?;
    let (_, (mut parsed, tail)) = statements(body).map_err(|_| unreadable())?;
    if !tail.is_empty() {
        parsed.push(tail);
    }

    let mut entry = LeaseEntry {
        address: address.to_string(),
        ..Default::default()
    };

    for statement in parsed {
        match statement.as_slice() {
            [] => {}
            ["starts", stamp @ ..] => {
                (entry.starts_weekday, entry.starts) = lease_time(stamp, &entry.address);
            }
            ["ends", stamp @ ..] => {
                (entry.ends_weekday, entry.ends) = lease_time(stamp, &entry.address);
            }
            ["hardware", "ethernet", mac] => {
                entry.ether = lease_bytes(mac, "hardware ethernet address", &entry.address);
            }
            ["uid", uid] => {
                entry.uid = lease_bytes(uid, "uid", &entry.address);
            }
            _ => entry.extra.push(statement.join(" ")),
        }
    }
    Ok(entry)
}

/// Read an ISC `dhcpd.leases` file.
pub fn read_dhcpd_leases(content: &str) -> ParsedLeases<LeaseEntry> {
    let text = uncomment(content);
    let mut scanner = Scanner::new(&text);
    let mut leases = ParsedLeases::default();

    while let Some(block) = scanner.take_block('{', '}') {
        match read_lease(block.head, block.body) {
            Ok(entry) => leases.entries.push(entry),
            Err(e) => {
                let entry = leases.entries.len() + leases.errors.len() + 1;
                warn!(entry, error = %e, "skipping lease");
                leases.errors.push(e);
            }
        }
    }
    leases
}

pub fn read_dhcpd_leases_file(path: &Path) -> Result<ParsedLeases<LeaseEntry>, ParseError> {
    let content = read(path)?;
    Ok(read_dhcpd_leases(&content))
}

impl ParsedLeases<LeaseEntry> {
    /// The lease for `mac` that ends last.
    pub fn latest_for_hardware(&self, mac: &[u8]) -> Option<&LeaseEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.ether == mac)
            .max_by_key(|entry| entry.ends)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppleLeaseEntry {
    pub ip_address: String,
    pub hw_address: Vec<u8>,
    pub identifier: Vec<u8>,
    /// Expiry as written, a hex unix timestamp.
    pub lease: Option<String>,
    pub name: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl AppleLeaseEntry {
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        let lease = self.lease.as_deref()?;
        let secs = i64::from_str_radix(lease.trim_start_matches("0x"), 16).ok()?;
        DateTime::from_timestamp(secs, 0)
    }
}

// "1,0:50:56:20:ac:3" is a hardware type and an address with unpadded octets
fn apple_hardware(value: &str) -> Result<Vec<u8>, ParseError> {
    let malformed = || ParseError::MalformedBytes(value.to_string());
    let parsed: IResult<&str, Vec<&str>> =
        all_consuming(preceded((digit1, char(',')), hex_octets(1, 2))).parse(value);
    let (_, octets) = parsed.map_err(|_| malformed())?;
    let padded: String = octets.iter().map(|octet| format!("{octet:0>2}")).collect();
    hex::decode(padded).map_err(|_| malformed())
}

fn apple_field(line: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(map(is_not("="), str::trim), char('='), map(rest, str::trim)).parse(line)
}

fn read_apple_lease(body: &str) -> Option<Result<AppleLeaseEntry, ParseError>> {
    let mut entry = AppleLeaseEntry::default();
    let (mut has_ip, mut has_hw, mut has_id) = (false, false, false);

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Ok((_, (key, value))) = apple_field(line) else {
            warn!(line, "skipping invalid lease line");
            continue;
        };

        match key {
            "ip_address" => {
                entry.ip_address = value.to_string();
                has_ip = true;
            }
            "hw_address" => match apple_hardware(value) {
                Ok(bytes) => {
                    entry.hw_address = bytes;
                    has_hw = true;
                }
                Err(e) => warn!(key, value, error = %e, "skipping malformed address"),
            },
            "identifier" => match apple_hardware(value) {
                Ok(bytes) => {
                    entry.identifier = bytes;
                    has_id = true;
                }
                Err(e) => warn!(key, value, error = %e, "skipping malformed address"),
            },
            "lease" => entry.lease = Some(value.to_string()),
            "name" => entry.name = Some(value.to_string()),
            _ => {
                entry.extra.insert(key.to_string(), value.to_string());
            }
        }
    }

    match (has_ip, has_hw, has_id) {
        (false, false, false) => None,
        (true, true, true) => Some(Ok(entry)),
        _ => Some(Err(ParseError::Lease(format!(
            "entry {:?} is missing mandatory information",
            entry.name.as_deref().unwrap_or(&entry.ip_address)
        )))),
    }
}

/// Read the macOS `dhcpd_leases` file.
pub fn read_apple_leases(content: &str) -> ParsedLeases<AppleLeaseEntry> {
    let text = uncomment(content);
    let mut scanner = Scanner::new(&text);
    let mut leases = ParsedLeases::default();

    while let Some(block) = scanner.take_block('{', '}') {
        match read_apple_lease(block.body) {
            Some(Ok(entry)) => leases.entries.push(entry),
            Some(Err(e)) => {
                warn!(error = %e, "skipping lease");
                leases.errors.push(e);
            }
            None => {}
        }
    }
    leases
}

pub fn read_apple_leases_file(path: &Path) -> Result<ParsedLeases<AppleLeaseEntry>, ParseError> {
    let content = read(path)?;
    Ok(read_apple_leases(&content))
}

fn read(path: &Path) -> Result<String, ParseError> {
    std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const ISC_LEASES: &str = include_str!("../testdata/dhcpd.leases");
    const APPLE_LEASES: &str = include_str!("../testdata/apple-dhcpd_leases");

    #[test]
    fn test_decode_lease_bytes() {
        assert_eq!(
            decode_lease_bytes("00:0c:29:AA:bb:cc").unwrap(),
            vec![0x00, 0x0c, 0x29, 0xaa, 0xbb, 0xcc]
        );
        for bad in ["0:0c", "000c", "zz:00", ""] {
            assert!(
                matches!(decode_lease_bytes(bad), Err(ParseError::MalformedBytes(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_read_dhcpd_leases() {
        let leases = read_dhcpd_leases(ISC_LEASES);
        assert_eq!(leases.entries.len(), 3);
        assert_eq!(leases.errors.len(), 1);
        assert!(!leases.is_clean());

        let first = &leases.entries[0];
        assert_eq!(first.address, "172.16.41.129");
        assert_eq!(first.starts_weekday, Some(3));
        assert_eq!(
            first.starts,
            NaiveDate::from_ymd_opt(2024, 5, 8).and_then(|d| d.and_hms_opt(10, 12, 3))
        );
        assert_eq!(first.ether, vec![0x00, 0x0c, 0x29, 0x5e, 0x1a, 0x03]);
        assert_eq!(first.uid, vec![0x01, 0x00, 0x0c, 0x29, 0x5e, 0x1a, 0x03]);
        assert_eq!(first.extra, vec!["client-hostname \"builder\""]);

        // A broken field is dropped, the entry is kept
        let second = &leases.entries[1];
        assert_eq!(second.address, "172.16.41.130");
        assert!(second.ends.is_none());
        assert!(second.ether.is_empty());
    }

    #[test]
    fn test_latest_for_hardware() {
        let leases = read_dhcpd_leases(ISC_LEASES);
        let mac = [0x00, 0x0c, 0x29, 0x5e, 0x1a, 0x03];
        let latest = leases.latest_for_hardware(&mac).unwrap();
        assert_eq!(latest.address, "172.16.41.131");
        assert!(leases.latest_for_hardware(&[0xde, 0xad]).is_none());
    }

    #[test]
    fn test_read_apple_leases() {
        let leases = read_apple_leases(APPLE_LEASES);
        assert_eq!(leases.entries.len(), 2);
        assert_eq!(leases.errors.len(), 1);

        let first = &leases.entries[0];
        assert_eq!(first.ip_address, "192.168.111.2");
        assert_eq!(first.hw_address, vec![0x00, 0x50, 0x56, 0x20, 0xac, 0x03]);
        assert_eq!(first.identifier, first.hw_address);
        assert_eq!(first.name.as_deref(), Some("vagrant-2019"));
        assert_eq!(first.extra.get("extra").map(String::as_str), Some("a=b"));
        assert_eq!(
            first.expires(),
            DateTime::from_timestamp(0x5fd72edc, 0)
        );

        assert_eq!(leases.entries[1].ip_address, "192.168.111.3");
    }

    #[test]
    fn test_apple_lease_needs_every_mandatory_field() {
        let leases = read_apple_leases(
            "{
                ip_address=192.168.111.4
                hw_address=1,0:50:56:20:ac:4
                hw_address=1,0:50:56:20:ac:4
            }",
        );
        assert!(leases.entries.is_empty());
        assert_eq!(leases.errors.len(), 1);
        assert!(matches!(
            &leases.errors[0],
            ParseError::Lease(msg) if msg.contains("192.168.111.4")
        ));
    }

    #[test]
    fn test_apple_hardware() {
        assert_eq!(
            apple_hardware("1,0:50:56:c0:0:8").unwrap(),
            vec![0x00, 0x50, 0x56, 0xc0, 0x00, 0x08]
        );
        for bad in ["0:50:56", "1,0:50,56", "x,0:50", "1,0:50:"] {
            assert!(apple_hardware(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn test_lease_statements() {
        let entry = read_lease(
            "\nlease 10.0.0.7 ",
            " client-hostname \"my host; one\" ;\n  binding state active;\n  ends never",
        )
        .unwrap();
        assert_eq!(entry.address, "10.0.0.7");
        assert_eq!(
            entry.extra,
            vec!["client-hostname \"my host; one\"", "binding state active"]
        );
        assert!(entry.ends.is_none());

        for head in ["lease", "lease a b", "leased 10.0.0.7", ""] {
            assert!(matches!(read_lease(head, ""), Err(ParseError::Lease(_))), "{head:?}");
        }
    }

    #[test]
    fn test_empty_inputs() {
        assert!(read_dhcpd_leases("").entries.is_empty());
        let apple = read_apple_leases("{\n}\n");
        assert!(apple.entries.is_empty() && apple.is_clean());
    }
}
