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

//! VMware Fusion `networking` reader
//!
//! Fusion keeps its virtual network setup as one command per line after a
//! version header:
//!
//! ```text
//! VERSION=1,0
//! answer VNET_8_NAT yes
//! answer VNET_8_VIRTUAL_ADAPTER yes
//! add_nat_portfwd 8 tcp 2222 172.16.12.10 22
//! add_bridge_mapping en0 4
//! ```
//!
//! Commands are replayed in file order to build a [`NetworkingConfig`], so a
//! `remove_*` command undoes an earlier `add_*`.

use nom::{
    IResult, Parser,
    bytes::complete::{is_not, tag},
    character::complete::{char, digit1, one_of, space0},
    combinator::{all_consuming, map_res, rest},
    multi::{many0, many1_count, separated_list0},
    sequence::{preceded, separated_pair},
};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::dhcp::format_mac;
use crate::error::ParseError;
use crate::leases::decode_lease_bytes;
use crate::netmap::NetworkNameMapper;

/// Prefix of the host-side device names.
pub const DEVICE_PREFIX: &str = "vmnet";

fn invalid(reason: impl Into<String>) -> ParseError {
    ParseError::Networking(reason.into())
}

fn row(input: &str) -> IResult<&str, Vec<&str>> {
    many0(preceded(space0, is_not(" \t\r\n"))).parse(input)
}

/// Split the file into rows of whitespace separated words. Blank lines are
/// dropped.
pub fn rows(input: &str) -> Vec<Vec<&str>> {
    let rows: IResult<&str, Vec<Vec<&str>>> =
        separated_list0(many1_count(preceded(space0, one_of("\r\n"))), row).parse(input);
    rows.map(|(_, rows)| rows.into_iter().filter(|row| !row.is_empty()).collect())
        .unwrap_or_default()
}

fn number<T: FromStr>(input: &str) -> IResult<&str, T> {
    map_res(digit1, |digits: &str| digits.parse::<T>()).parse(input)
}

/// The `VERSION=<major>,<minor>` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const SUPPORTED: Version = Version { major: 1, minor: 0 };

    pub fn parse(row: &[&str]) -> Result<Self, ParseError> {
        let unexpected = || invalid(format!("unexpected format for VERSION entry: {row:?}"));
        let [word] = row else {
            return Err(unexpected());
        };
        let parsed: IResult<&str, (u32, u32)> = all_consuming(preceded(
            tag("VERSION="),
            separated_pair(number::<u32>, char(','), number::<u32>),
        ))
        .parse(*word);
        let (_, (major, minor)) = parsed.map_err(|_| unexpected())?;
        Ok(Version { major, minor })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// An answer key such as `VNET_8_HOSTONLY_SUBNET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vnet {
    pub number: u32,
    pub option: String,
}

impl Vnet {
    pub fn parse(word: &str) -> Result<Self, ParseError> {
        let unexpected = || invalid(format!("invalid VNET key {word:?}"));
        if word.to_uppercase() != word {
            return Err(unexpected());
        }
        let parsed: IResult<&str, (u32, &str)> =
            all_consuming(preceded(tag("VNET_"), separated_pair(number::<u32>, char('_'), rest)))
                .parse(word);
        let (_, (number, option)) = parsed.map_err(|_| unexpected())?;
        Ok(Vnet {
            number,
            option: option.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    fn parse(word: &str) -> Result<Self, ParseError> {
        match word.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(invalid(format!("expected tcp or udp, found {word:?}"))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

const COMMANDS: [&str; 10] = [
    "answer",
    "remove_answer",
    "add_nat_portfwd",
    "remove_nat_portfwd",
    "add_dhcp_mac_to_ip",
    "remove_dhcp_mac_to_ip",
    "add_bridge_mapping",
    "remove_bridge_mapping",
    "add_nat_prefix",
    "remove_nat_prefix",
];

/// One line of the file after the version header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Answer {
        vnet: Vnet,
        value: String,
    },
    RemoveAnswer {
        vnet: Vnet,
    },
    AddNatPortForward {
        vnet: u32,
        protocol: Protocol,
        port: u16,
        target: SocketAddr,
    },
    RemoveNatPortForward {
        vnet: u32,
        protocol: Protocol,
        port: u16,
    },
    AddDhcpMacToIp {
        vnet: u32,
        mac: Vec<u8>,
        ip: IpAddr,
    },
    RemoveDhcpMacToIp {
        vnet: u32,
        mac: Vec<u8>,
    },
    AddBridgeMapping {
        interface: String,
        vnet: u32,
    },
    RemoveBridgeMapping {
        interface: String,
    },
    AddNatPrefix {
        vnet: u32,
        prefix: u8,
    },
    RemoveNatPrefix {
        vnet: u32,
        prefix: u8,
    },
}

fn argument<T: FromStr>(word: &str, what: &str) -> Result<T, ParseError> {
    word.parse()
        .map_err(|_| invalid(format!("unable to parse {what} from {word:?}")))
}

fn nat_prefix(word: &str) -> Result<u8, ParseError> {
    let parsed: IResult<&str, u8> = all_consuming(preceded(char('/'), number::<u8>)).parse(word);
    parsed
        .map(|(_, prefix)| prefix)
        .map_err(|_| invalid(format!("expected a prefix such as /16, found {word:?}")))
}

impl Command {
    pub fn parse(row: &[&str]) -> Result<Self, ParseError> {
        let Some((name, args)) = row.split_first() else {
            return Err(invalid("empty command"));
        };

        let command = match (*name, args) {
            ("answer", [vnet, value]) => Command::Answer {
                vnet: Vnet::parse(vnet)?,
                value: value.to_string(),
            },
            ("remove_answer", [vnet]) => Command::RemoveAnswer {
                vnet: Vnet::parse(vnet)?,
            },
            ("add_nat_portfwd", [vnet, protocol, port, host, target_port]) => {
                Command::AddNatPortForward {
                    vnet: argument(vnet, "vnet")?,
                    protocol: Protocol::parse(protocol)?,
                    port: argument(port, "port")?,
                    target: SocketAddr::new(
                        argument(host, "target host")?,
                        argument(target_port, "target port")?,
                    ),
                }
            }
            ("remove_nat_portfwd", [vnet, protocol, port]) => Command::RemoveNatPortForward {
                vnet: argument(vnet, "vnet")?,
                protocol: Protocol::parse(protocol)?,
                port: argument(port, "port")?,
            },
            ("add_dhcp_mac_to_ip", [vnet, mac, ip]) => Command::AddDhcpMacToIp {
                vnet: argument(vnet, "vnet")?,
                mac: decode_lease_bytes(mac)?,
                ip: argument(ip, "address")?,
            },
            ("remove_dhcp_mac_to_ip", [vnet, mac]) => Command::RemoveDhcpMacToIp {
                vnet: argument(vnet, "vnet")?,
                mac: decode_lease_bytes(mac)?,
            },
            ("add_bridge_mapping", [interface, vnet]) => Command::AddBridgeMapping {
                interface: interface.to_string(),
                vnet: argument(vnet, "vnet")?,
            },
            ("remove_bridge_mapping", [interface]) => Command::RemoveBridgeMapping {
                interface: interface.to_string(),
            },
            ("add_nat_prefix", [vnet, prefix]) => Command::AddNatPrefix {
                vnet: argument(vnet, "vnet")?,
                prefix: nat_prefix(prefix)?,
            },
            ("remove_nat_prefix", [vnet, prefix]) => Command::RemoveNatPrefix {
                vnet: argument(vnet, "vnet")?,
                prefix: nat_prefix(prefix)?,
            },
            (name, args) if COMMANDS.contains(&name) => {
                return Err(invalid(format!(
                    "wrong number of arguments for {name}: {args:?}"
                )));
            }
            (name, _) => return Err(invalid(format!("unknown command {name:?}"))),
        };
        Ok(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    HostOnly,
    Nat,
    Bridged,
}

impl NetworkType {
    pub fn name(self) -> &'static str {
        match self {
            NetworkType::HostOnly => "hostonly",
            NetworkType::Nat => "nat",
            NetworkType::Bridged => "bridged",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        [NetworkType::HostOnly, NetworkType::Nat, NetworkType::Bridged]
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The state left once every command in the file has been applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkingConfig {
    /// Answers by vnet, keyed by option name.
    pub answers: BTreeMap<u32, BTreeMap<String, String>>,
    pub nat_port_forwards: BTreeMap<u32, BTreeMap<(Protocol, u16), SocketAddr>>,
    /// Reserved addresses by vnet, keyed by formatted MAC address.
    pub dhcp_mac_to_ip: BTreeMap<u32, BTreeMap<String, IpAddr>>,
    /// Host interfaces bridged to a vnet.
    pub bridge_mappings: BTreeMap<String, u32>,
    pub nat_prefixes: BTreeMap<u32, Vec<u8>>,
}

impl NetworkingConfig {
    /// Parse a `networking` file. Only version 1.0 is understood; a command
    /// that cannot be read is logged and skipped.
    pub fn parse(content: &str) -> Result<Self, ParseError> {
        let mut rows = rows(content).into_iter();
        let header = rows.next().ok_or_else(|| invalid("missing VERSION entry"))?;
        let version = Version::parse(&header)?;
        if version != Version::SUPPORTED {
            return Err(invalid(format!(
                "expected version {} of networking file, found {version}",
                Version::SUPPORTED
            )));
        }

        let mut config = NetworkingConfig::default();
        for row in rows {
            match Command::parse(&row) {
                Ok(command) => config.apply(command),
                Err(e) => warn!(?row, error = %e, "skipping networking command"),
            }
        }
        Ok(config)
    }

    pub fn read(path: &Path) -> Result<Self, ParseError> {
        let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    fn apply(&mut self, command: Command) {
        debug!(?command, "applying networking command");
        match command {
            Command::Answer { vnet, value } => {
                self.answers
                    .entry(vnet.number)
                    .or_default()
                    .insert(vnet.option, value);
            }
            Command::RemoveAnswer { vnet } => match self.answers.get_mut(&vnet.number) {
                Some(answers) => {
                    answers.remove(&vnet.option);
                }
                None => warn!(vnet = vnet.number, option = %vnet.option, "no answer to remove"),
            },
            Command::AddNatPortForward {
                vnet,
                protocol,
                port,
                target,
            } => {
                self.nat_port_forwards
                    .entry(vnet)
                    .or_default()
                    .insert((protocol, port), target);
            }
            Command::RemoveNatPortForward {
                vnet,
                protocol,
                port,
            } => match self.nat_port_forwards.get_mut(&vnet) {
                Some(forwards) => {
                    forwards.remove(&(protocol, port));
                }
                None => warn!(vnet, %protocol, port, "no port forward to remove"),
            },
            Command::AddDhcpMacToIp { vnet, mac, ip } => {
                self.dhcp_mac_to_ip
                    .entry(vnet)
                    .or_default()
                    .insert(format_mac(&mac), ip);
            }
            Command::RemoveDhcpMacToIp { vnet, mac } => match self.dhcp_mac_to_ip.get_mut(&vnet) {
                Some(reserved) => {
                    reserved.remove(&format_mac(&mac));
                }
                None => warn!(vnet, mac = %format_mac(&mac), "no reserved address to remove"),
            },
            Command::AddBridgeMapping { interface, vnet } => {
                self.bridge_mappings.insert(interface, vnet);
            }
            Command::RemoveBridgeMapping { interface } => {
                self.bridge_mappings.remove(&interface);
            }
            Command::AddNatPrefix { vnet, prefix } => {
                self.nat_prefixes.entry(vnet).or_default().push(prefix);
            }
            Command::RemoveNatPrefix { vnet, prefix } => match self.nat_prefixes.get_mut(&vnet) {
                Some(prefixes) => {
                    if let Some(idx) = prefixes.iter().position(|p| *p == prefix) {
                        prefixes.remove(idx);
                    }
                }
                None => warn!(vnet, prefix, "no nat prefix to remove"),
            },
        }
    }

    /// The kind of every known vnet. vmnet0, vmnet1 and vmnet8 are bridged,
    /// host-only and NAT unless the file says otherwise.
    pub fn network_types(&self) -> BTreeMap<u32, NetworkType> {
        let mut types = BTreeMap::from([
            (0, NetworkType::Bridged),
            (1, NetworkType::HostOnly),
            (8, NetworkType::Nat),
        ]);

        for vnet in self.bridge_mappings.values() {
            types.insert(*vnet, NetworkType::Bridged);
        }

        for (vnet, answers) in &self.answers {
            let answer = |key: &str| answers.get(key).map(String::as_str);
            // Anything that is not a virtual adapter is an alias of a bridge
            let kind = if answer("VIRTUAL_ADAPTER") == Some("yes") {
                if answer("HOSTONLY_SUBNET").is_none() || answer("HOSTONLY_NETMASK").is_none() {
                    debug!(vnet, "virtual adapter without a host-only subnet");
                }
                if answer("NAT") == Some("yes") {
                    NetworkType::Nat
                } else {
                    NetworkType::HostOnly
                }
            } else {
                NetworkType::Bridged
            };
            types.insert(*vnet, kind);
        }
        types
    }
}

impl NetworkNameMapper for NetworkingConfig {
    fn name_into_devices(&self, name: &str) -> Result<Vec<String>, ParseError> {
        let not_found = || ParseError::NotFound {
            kind: "network",
            key: name.to_string(),
        };
        let wanted = NetworkType::from_name(name).ok_or_else(not_found)?;

        let devices: Vec<String> = self
            .network_types()
            .into_iter()
            .filter(|(_, kind)| *kind == wanted)
            .map(|(vnet, _)| format!("{DEVICE_PREFIX}{vnet}"))
            .collect();
        if devices.is_empty() {
            return Err(not_found());
        }
        Ok(devices)
    }

    fn device_into_name(&self, device: &str) -> Result<String, ParseError> {
        let lower = device.to_ascii_lowercase();
        // Anything that is not a vmnet device is already a network name
        let Some(number) = lower.strip_prefix(DEVICE_PREFIX) else {
            return Ok(device.to_string());
        };
        let vnet: u32 = argument(number, "device number")?;

        self.network_types()
            .get(&vnet)
            .map(NetworkType::to_string)
            .ok_or_else(|| ParseError::NotFound {
                kind: "device",
                key: device.to_string(),
            })
    }
}

impl fmt::Display for NetworkingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (vnet, kind) in self.network_types() {
            writeln!(f, "{DEVICE_PREFIX}{vnet} {kind}")?;
            let forwards = self.nat_port_forwards.get(&vnet).into_iter().flatten();
            for ((protocol, port), target) in forwards {
                writeln!(f, "  {protocol}/{port} -> {target}")?;
            }
        }
        Ok(())
    }
}
