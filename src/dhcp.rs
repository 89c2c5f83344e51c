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

//! `dhcpd.conf` reader
//!
//! The file is read in three passes: a tokenizer, a tree builder that nests
//! parameters under their braced declarations, and a flattening pass that
//! gives every declaration a copy of everything it inherits from its parents.
//!
//! ```text
//! option domain-name "local";          # global parameter
//! subnet 172.16.0.0 netmask 255.255.0.0 {
//!     range 172.16.0.128 172.16.0.254; # inherits domain-name
//!     host vm { hardware ethernet 00:0c:29:aa:bb:cc; fixed-address 172.16.0.10; }
//! }
//! ```

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::is_not,
    character::complete::{multispace0, one_of},
    combinator::{all_consuming, recognize},
    multi::many0,
    sequence::preceded,
};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::path::Path;
use tracing::debug;

use crate::error::ParseError;
use crate::scan::{hex_octets, quoted, uncomment};

fn token(input: &str) -> IResult<&str, &str> {
    preceded(
        multispace0,
        alt((quoted, recognize(one_of("{};")), is_not(" \t\r\n{};\""))),
    )
    .parse(input)
}

/// Split uncommented `dhcpd.conf` text into tokens.
///
/// Whitespace separates tokens, `{`, `}` and `;` are tokens of their own and
/// a double-quoted string is one token with its quotes.
pub fn tokenize(input: &str) -> Vec<String> {
    let tokens: IResult<&str, Vec<&str>> = many0(token).parse(input);
    tokens
        .map(|(_, tokens)| tokens.into_iter().map(str::to_string).collect())
        .unwrap_or_default()
}

/// A statement: its first token and everything after it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenParameter {
    pub name: String,
    pub operands: Vec<String>,
}

impl TokenParameter {
    fn from_tokens(tokens: Vec<String>) -> Self {
        let mut tokens = tokens.into_iter();
        Self {
            name: tokens.next().unwrap_or_default(),
            operands: tokens.collect(),
        }
    }
}

impl fmt::Display for TokenParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.operands.join(","))
    }
}

/// A braced declaration with its statements and nested declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenGroup {
    pub id: TokenParameter,
    pub params: Vec<TokenParameter>,
    pub groups: Vec<TokenGroup>,
}

/// Nest statements under the declarations that enclose them. The root is the
/// global scope and has an empty id.
pub fn build_tree(tokens: Vec<String>) -> Result<TokenGroup, ParseError> {
    let mut stack = vec![TokenGroup::default()];
    let mut pending: Vec<String> = Vec::new();

    for token in tokens {
        match token.as_str() {
            "{" => {
                let id = TokenParameter::from_tokens(std::mem::take(&mut pending));
                stack.push(TokenGroup {
                    id,
                    ..Default::default()
                });
            }
            "}" => {
                if stack.len() == 1 {
                    return Err(ParseError::CloseGlobal);
                }
                if !pending.is_empty() {
                    return Err(ParseError::Unterminated(pending));
                }
                let group = stack.pop().ok_or(ParseError::CloseGlobal)?;
                if let Some(parent) = stack.last_mut() {
                    parent.groups.push(group);
                }
            }
            ";" => {
                if pending.is_empty() {
                    continue;
                }
                let param = TokenParameter::from_tokens(std::mem::take(&mut pending));
                if let Some(node) = stack.last_mut() {
                    node.params.push(param);
                }
            }
            _ => pending.push(token),
        }
    }

    // A missing final semicolon still counts as a statement
    if !pending.is_empty() {
        let param = TokenParameter::from_tokens(pending);
        if let Some(node) = stack.last_mut() {
            node.params.push(param);
        }
    }

    if stack.len() > 1 {
        let open = stack.pop().map(|g| g.id.to_string()).unwrap_or_default();
        return Err(ParseError::Unclosed(open));
    }
    stack.pop().ok_or(ParseError::CloseGlobal)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Allow,
    Ignore,
    Deny,
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grant::Allow => f.write_str("allow"),
            Grant::Ignore => f.write_str("ignore"),
            Grant::Deny => f.write_str("deny"),
        }
    }
}

/// A classified statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    Include(String),
    Option { name: String, value: String },
    Grant { grant: Grant, attribute: String },
    Range4 { bootp: bool, min: Ipv4Addr, max: Ipv4Addr },
    Range6 { min: Ipv6Addr, max: Ipv6Addr },
    Prefix6 { min: Ipv6Addr, max: Ipv6Addr, bits: u8 },
    Hardware { class: String, address: Vec<u8> },
    FixedAddress4(Vec<String>),
    FixedAddress6(Vec<String>),
    HostIdentifier { option: String, data: String },
    Boolean { name: String, value: bool },
    Expression { name: String, expression: String },
    Other { name: String, value: String },
}

fn ipv4(text: &str) -> Result<Ipv4Addr, ParseError> {
    text.parse()
        .map_err(|_| ParseError::InvalidAddress(text.to_string()))
}

fn ipv6(text: &str) -> Result<Ipv6Addr, ParseError> {
    text.parse()
        .map_err(|_| ParseError::InvalidAddress(text.to_string()))
}

fn prefix_bits(name: &str, text: &str) -> Result<u8, ParseError> {
    match text.parse::<u8>() {
        Ok(bits) if bits <= 128 => Ok(bits),
        _ => Err(ParseError::parameter(name, format!("invalid prefix length {text:?}"))),
    }
}

fn ipv6_mask(bits: u8) -> u128 {
    match bits {
        0 => 0,
        b => u128::MAX << (128 - u32::from(b.min(128))),
    }
}

// "a, b" arrives as the tokens "a," and "b"
fn address_list(operands: &[String]) -> Vec<String> {
    operands
        .iter()
        .flat_map(|op| op.split(','))
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_string)
        .collect()
}

fn hardware_address(name: &str, text: &str) -> Result<Vec<u8>, ParseError> {
    let invalid = || ParseError::parameter(name, format!("invalid hardware address {text}"));
    let parsed: IResult<&str, Vec<&str>> = all_consuming(hex_octets(1, 2)).parse(text);
    let (_, octets) = parsed.map_err(|_| invalid())?;
    octets
        .into_iter()
        .map(|octet| u8::from_str_radix(octet, 16).map_err(|_| invalid()))
        .collect()
}

impl Parameter {
    pub fn parse(token: &TokenParameter) -> Result<Self, ParseError> {
        let name = token.name.as_str();
        let ops = token.operands.as_slice();

        match name {
            "include" => match ops {
                [file] => Ok(Parameter::Include(file.clone())),
                _ => Err(ParseError::parameter(name, "expected a single file name")),
            },
            "option" => match ops {
                [option, value @ ..] if !value.is_empty() => Ok(Parameter::Option {
                    name: option.clone(),
                    value: value.join(" "),
                }),
                _ => Err(ParseError::parameter(name, "expected a name and a value")),
            },
            "allow" | "deny" | "ignore" => {
                if ops.is_empty() {
                    return Err(ParseError::parameter(name, "missing attribute"));
                }
                let grant = match name {
                    "allow" => Grant::Allow,
                    "deny" => Grant::Deny,
                    _ => Grant::Ignore,
                };
                Ok(Parameter::Grant {
                    grant,
                    attribute: ops.join(" "),
                })
            }
            "range" => {
                let (bootp, addresses) = match ops {
                    [flag, rest @ ..]
                        if flag.eq_ignore_ascii_case("dynamic-bootp")
                            || flag.eq_ignore_ascii_case("bootp") =>
                    {
                        (true, rest)
                    }
                    _ => (false, ops),
                };
                match addresses {
                    [single] => {
                        let addr = ipv4(single)?;
                        Ok(Parameter::Range4 { bootp, min: addr, max: addr })
                    }
                    [low, high] => Ok(Parameter::Range4 {
                        bootp,
                        min: ipv4(low)?,
                        max: ipv4(high)?,
                    }),
                    _ => Err(ParseError::parameter(name, "expected one or two addresses")),
                }
            }
            "range6" => match ops {
                [cidr] if cidr.contains('/') => {
                    let (address, bits) = cidr.split_once('/').unwrap_or((cidr, ""));
                    let mask = ipv6_mask(prefix_bits(name, bits)?);
                    let network = u128::from(ipv6(address)?) & mask;
                    Ok(Parameter::Range6 {
                        min: Ipv6Addr::from(network),
                        max: Ipv6Addr::from(network | !mask),
                    })
                }
                [single] => {
                    let addr = ipv6(single)?;
                    Ok(Parameter::Range6 { min: addr, max: addr })
                }
                [addr, temporary] if temporary.eq_ignore_ascii_case("temporary") => {
                    let addr = ipv6(addr)?;
                    Ok(Parameter::Range6 { min: addr, max: addr })
                }
                [low, high] => Ok(Parameter::Range6 {
                    min: ipv6(low)?,
                    max: ipv6(high)?,
                }),
                _ => Err(ParseError::parameter(name, "expected one or two addresses")),
            },
            "prefix6" => match ops {
                [low, high, bits] => Ok(Parameter::Prefix6 {
                    min: ipv6(low)?,
                    max: ipv6(high)?,
                    bits: prefix_bits(name, bits.trim_start_matches('/'))?,
                }),
                _ => Err(ParseError::parameter(name, "expected two addresses and a prefix length")),
            },
            "hardware" => match ops {
                [class, address] => Ok(Parameter::Hardware {
                    class: class.clone(),
                    address: hardware_address(name, address)?,
                }),
                _ => Err(ParseError::parameter(name, "expected a class and an address")),
            },
            "fixed-address" => Ok(Parameter::FixedAddress4(address_list(ops))),
            "fixed-address6" => Ok(Parameter::FixedAddress6(address_list(ops))),
            "host-identifier" => match ops {
                [kind, option, data] if kind == "option" => Ok(Parameter::HostIdentifier {
                    option: option.clone(),
                    data: data.clone(),
                }),
                [kind, _, _] => Err(ParseError::parameter(name, format!("invalid match {kind:?}"))),
                _ => Err(ParseError::parameter(name, "expected option, name and data")),
            },
            _ => match ops {
                [] => Ok(Parameter::Boolean {
                    name: name.to_string(),
                    value: true,
                }),
                [eq, expression @ ..] if eq == "=" && !expression.is_empty() => {
                    Ok(Parameter::Expression {
                        name: name.to_string(),
                        expression: expression.join(" "),
                    })
                }
                [flag] if name.eq_ignore_ascii_case("not") => Ok(Parameter::Boolean {
                    name: flag.clone(),
                    value: false,
                }),
                [value] => Ok(Parameter::Other {
                    name: name.to_string(),
                    value: value.clone(),
                }),
                _ => Err(ParseError::parameter(name, format!("unexpected operands {ops:?}"))),
            },
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Include(file) => write!(f, "include-file:filename={file}"),
            Parameter::Option { name, value } => write!(f, "option:{name}={value}"),
            Parameter::Grant { grant, attribute } => write!(f, "grant:{grant},{attribute}"),
            Parameter::Range4 { min, max, .. } => write!(f, "range4:{min}-{max}"),
            Parameter::Range6 { min, max } => write!(f, "range6:{min}-{max}"),
            Parameter::Prefix6 { min, max, bits } => write!(f, "prefix6:/{bits}:{min}-{max}"),
            Parameter::Hardware { class, address } => {
                write!(f, "hardware-address:{class}[{}]", format_mac(address))
            }
            Parameter::FixedAddress4(addrs) => write!(f, "fixed-address4:{}", addrs.join(",")),
            Parameter::FixedAddress6(addrs) => write!(f, "fixed-address6:{}", addrs.join(",")),
            Parameter::HostIdentifier { option, data } => write!(f, "match-client:{option}={data}"),
            Parameter::Boolean { name, value } => write!(f, "boolean:{name}={value}"),
            Parameter::Expression { name, expression } => {
                write!(f, "parameter-expression:{name}=\"{expression}\"")
            }
            Parameter::Other { name, value } => write!(f, "parameter:{name}={value}"),
        }
    }
}

pub fn format_mac(address: &[u8]) -> String {
    address
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// What a braced declaration is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclarationId {
    Global,
    SharedNetwork(String),
    Subnet4 { address: Ipv4Addr, netmask: Ipv4Addr },
    Subnet6 { address: Ipv6Addr, prefix: u8 },
    Host(String),
    Pool,
    Group,
}

impl DeclarationId {
    pub fn parse(id: &TokenParameter) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidDeclaration {
            name: id.name.clone(),
            operands: id.operands.clone(),
        };

        match (id.name.as_str(), id.operands.as_slice()) {
            ("", []) => Ok(DeclarationId::Global),
            ("group", _) => Ok(DeclarationId::Group),
            ("pool", _) => Ok(DeclarationId::Pool),
            ("host", [name]) => Ok(DeclarationId::Host(name.clone())),
            ("shared-network", [name]) => Ok(DeclarationId::SharedNetwork(name.clone())),
            ("subnet", [address, keyword, netmask]) if keyword.eq_ignore_ascii_case("netmask") => {
                Ok(DeclarationId::Subnet4 {
                    address: address.parse().map_err(|_| invalid())?,
                    netmask: netmask.parse().map_err(|_| invalid())?,
                })
            }
            ("subnet6", [cidr]) => {
                let (address, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
                let prefix = prefix.parse::<u8>().map_err(|_| invalid())?;
                if prefix > 128 {
                    return Err(invalid());
                }
                Ok(DeclarationId::Subnet6 {
                    address: address.parse().map_err(|_| invalid())?,
                    prefix,
                })
            }
            _ => Err(invalid()),
        }
    }

    /// Whether a subnet declaration covers `address`. Always false for
    /// anything that is not a subnet.
    pub fn contains(&self, address: IpAddr) -> bool {
        match (self, address) {
            (DeclarationId::Subnet4 { address: net, netmask }, IpAddr::V4(addr)) => {
                let mask = u32::from(*netmask);
                u32::from(*net) & mask == u32::from(addr) & mask
            }
            (DeclarationId::Subnet6 { address: net, prefix }, IpAddr::V6(addr)) => {
                let mask = ipv6_mask(*prefix);
                u128::from(*net) & mask == u128::from(addr) & mask
            }
            _ => false,
        }
    }
}

impl fmt::Display for DeclarationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclarationId::Global => f.write_str("{global}"),
            DeclarationId::SharedNetwork(name) => write!(f, "{{shared-network {name}}}"),
            DeclarationId::Subnet4 { address, netmask } => {
                write!(f, "{{subnet4 {address}/{}}}", u32::from(*netmask).count_ones())
            }
            DeclarationId::Subnet6 { address, prefix } => {
                write!(f, "{{subnet6 {address}/{prefix}}}")
            }
            DeclarationId::Host(name) => write!(f, "{{host name:{name}}}"),
            DeclarationId::Pool => f.write_str("{pool}"),
            DeclarationId::Group => f.write_str("{group}"),
        }
    }
}

/// A declaration with everything it inherits applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub id: DeclarationId,
    /// Enclosing declarations, outermost first.
    pub scope: Vec<DeclarationId>,
    /// Address-like statements: includes, ranges, hardware and fixed addresses.
    pub addresses: Vec<Parameter>,
    pub options: BTreeMap<String, String>,
    pub grants: BTreeMap<String, Grant>,
    pub booleans: BTreeMap<String, bool>,
    pub parameters: BTreeMap<String, String>,
    pub expressions: BTreeMap<String, String>,
    pub host_identifiers: Vec<(String, String)>,
}

impl Declaration {
    fn new(id: DeclarationId) -> Self {
        Self {
            id,
            scope: Vec::new(),
            addresses: Vec::new(),
            options: BTreeMap::new(),
            grants: BTreeMap::new(),
            booleans: BTreeMap::new(),
            parameters: BTreeMap::new(),
            expressions: BTreeMap::new(),
            host_identifiers: Vec::new(),
        }
    }

    fn child(&self, id: DeclarationId) -> Self {
        let mut child = self.clone();
        child.scope.push(std::mem::replace(&mut child.id, id));
        child
    }

    fn apply(&mut self, parameter: Parameter) {
        match parameter {
            Parameter::Option { name, value } => {
                self.options.insert(name, value);
            }
            Parameter::Grant { grant, attribute } => {
                self.grants.insert(attribute, grant);
            }
            Parameter::Boolean { name, value } => {
                self.booleans.insert(name, value);
            }
            Parameter::HostIdentifier { option, data } => {
                self.host_identifiers.push((option, data));
            }
            Parameter::Expression { name, expression } => {
                self.expressions.insert(name, expression);
            }
            Parameter::Other { name, value } => {
                self.parameters.insert(name, value);
            }
            other => self.addresses.push(other),
        }
    }

    fn single_address(&self, kind: &'static str, found: Vec<String>) -> Result<String, ParseError> {
        let key = self.id.to_string();
        match found.as_slice() {
            [] => Err(ParseError::NotFound { kind, key }),
            [address] => Ok(address.clone()),
            _ => Err(ParseError::Ambiguous { kind, key }),
        }
    }

    /// The one `fixed-address`, resolved if it is a host name.
    pub fn ip4(&self) -> Result<Ipv4Addr, ParseError> {
        let found = self
            .addresses
            .iter()
            .filter_map(|p| match p {
                Parameter::FixedAddress4(addrs) => Some(addrs.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect();
        let address = self.single_address("fixed-address", found)?;

        if let Ok(ip) = address.parse() {
            return Ok(ip);
        }
        resolve(&address)?
            .into_iter()
            .find_map(|ip| match ip {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .ok_or(ParseError::InvalidAddress(address))
    }

    /// The one `fixed-address6`, resolved if it is a host name.
    pub fn ip6(&self) -> Result<Ipv6Addr, ParseError> {
        let found = self
            .addresses
            .iter()
            .filter_map(|p| match p {
                Parameter::FixedAddress6(addrs) => Some(addrs.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect();
        let address = self.single_address("fixed-address6", found)?;

        if let Ok(ip) = address.parse() {
            return Ok(ip);
        }
        resolve(&address)?
            .into_iter()
            .find_map(|ip| match ip {
                IpAddr::V6(v6) => Some(v6),
                IpAddr::V4(_) => None,
            })
            .ok_or(ParseError::InvalidAddress(address))
    }

    /// The one `hardware` address.
    pub fn hardware(&self) -> Result<Vec<u8>, ParseError> {
        let found: Vec<&Vec<u8>> = self
            .addresses
            .iter()
            .filter_map(|p| match p {
                Parameter::Hardware { address, .. } => Some(address),
                _ => None,
            })
            .collect();

        let key = self.id.to_string();
        match found.as_slice() {
            [] => Err(ParseError::NotFound { kind: "hardware", key }),
            [address] => Ok(address.to_vec()),
            _ => Err(ParseError::Ambiguous { kind: "hardware", key }),
        }
    }
}

fn resolve(host: &str) -> Result<Vec<IpAddr>, ParseError> {
    debug!(host, "resolving fixed address");
    (host, 0)
        .to_socket_addrs()
        .map(|addrs| addrs.map(|a| a.ip()).collect())
        .map_err(|_| ParseError::InvalidAddress(host.to_string()))
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = std::iter::once(&self.id)
            .chain(self.scope.iter().rev())
            .map(ToString::to_string)
            .collect();
        writeln!(f, "{}", ids.join(","))?;

        if !self.addresses.is_empty() {
            let addrs: Vec<String> = self.addresses.iter().map(ToString::to_string).collect();
            writeln!(f, "address : {}", addrs.join(","))?;
        }
        if !self.options.is_empty() {
            writeln!(f, "options : {:?}", self.options)?;
        }
        if !self.grants.is_empty() {
            writeln!(f, "grants : {:?}", self.grants)?;
        }
        if !self.booleans.is_empty() {
            writeln!(f, "attributes : {:?}", self.booleans)?;
        }
        if !self.parameters.is_empty() {
            writeln!(f, "parameters : {:?}", self.parameters)?;
        }
        if !self.expressions.is_empty() {
            writeln!(f, "parameter-expressions : {:?}", self.expressions)?;
        }
        if !self.host_identifiers.is_empty() {
            let ids: Vec<String> = self
                .host_identifiers
                .iter()
                .map(|(option, data)| format!("match-client:{option}={data}"))
                .collect();
            writeln!(f, "hostid : {}", ids.join(" "))?;
        }
        Ok(())
    }
}

fn flatten(
    group: &TokenGroup,
    parent: Option<&Declaration>,
    out: &mut Vec<Declaration>,
) -> Result<(), ParseError> {
    let id = DeclarationId::parse(&group.id)?;
    let mut declaration = match parent {
        Some(parent) => parent.child(id),
        None => Declaration::new(id),
    };

    for param in &group.params {
        declaration.apply(Parameter::parse(param)?);
    }

    let mut children = Vec::new();
    for child in &group.groups {
        flatten(child, Some(&declaration), &mut children)?;
    }
    out.push(declaration);
    out.append(&mut children);
    Ok(())
}

/// Every declaration in a `dhcpd.conf`, global scope first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpConfiguration {
    declarations: Vec<Declaration>,
}

impl DhcpConfiguration {
    pub fn parse(content: &str) -> Result<Self, ParseError> {
        let tree = build_tree(tokenize(&uncomment(content)))?;
        let mut declarations = Vec::new();
        flatten(&tree, None, &mut declarations)?;
        debug!(count = declarations.len(), "parsed dhcpd configuration");
        Ok(Self { declarations })
    }

    pub fn read(path: &Path) -> Result<Self, ParseError> {
        let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn global(&self) -> &Declaration {
        // The root always flattens into the first entry
        &self.declarations[0]
    }

    pub fn subnet_by_address(&self, address: IpAddr) -> Result<&Declaration, ParseError> {
        unique(
            "network",
            address.to_string(),
            self.declarations.iter().filter(|d| d.id.contains(address)),
        )
    }

    pub fn host_by_name(&self, host: &str) -> Result<&Declaration, ParseError> {
        unique(
            "host",
            host.to_string(),
            self.declarations.iter().filter(|d| {
                matches!(&d.id, DeclarationId::Host(name) if name.eq_ignore_ascii_case(host))
            }),
        )
    }
}

fn unique<'a>(
    kind: &'static str,
    key: String,
    mut matches: impl Iterator<Item = &'a Declaration>,
) -> Result<&'a Declaration, ParseError> {
    match (matches.next(), matches.next()) {
        (Some(found), None) => Ok(found),
        (None, _) => Err(ParseError::NotFound { kind, key }),
        (Some(_), Some(_)) => Err(ParseError::Ambiguous { kind, key }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = include_str!("../testdata/dhcpd-example.conf");

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn param(name: &str, operands: &[&str]) -> TokenParameter {
        TokenParameter {
            name: name.to_string(),
            operands: strings(operands),
        }
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("host vm {\n\toption name \"a b;c\";}");
        assert_eq!(
            tokens,
            strings(&["host", "vm", "{", "option", "name", "\"a b;c\"", ";", "}"])
        );
        assert!(tokenize("  \n\t ").is_empty());

        // Quotes end a bare word, an unterminated string runs to the end
        assert_eq!(
            tokenize("a;b\"c d\"\r\ne \"open"),
            strings(&["a", ";", "b", "\"c d\"", "e", "\"open"])
        );
    }

    #[test]
    fn test_build_tree() {
        let tree = build_tree(tokenize("a 1; group { b; pool { c 2 3; } } d")).unwrap();
        assert_eq!(tree.params, vec![param("a", &["1"]), param("d", &[])]);
        assert_eq!(tree.groups.len(), 1);

        let group = &tree.groups[0];
        assert_eq!(group.id, param("group", &[]));
        assert_eq!(group.params, vec![param("b", &[])]);
        assert_eq!(group.groups[0].params, vec![param("c", &["2", "3"])]);
    }

    #[test]
    fn test_build_tree_errors() {
        assert!(matches!(
            build_tree(tokenize("a; }")),
            Err(ParseError::CloseGlobal)
        ));
        assert!(matches!(
            build_tree(tokenize("group { a b }")),
            Err(ParseError::Unterminated(tokens)) if tokens == strings(&["a", "b"])
        ));
        assert!(matches!(
            build_tree(tokenize("host vm { a;")),
            Err(ParseError::Unclosed(name)) if name.contains("host")
        ));
    }

    #[test]
    fn test_parameter_classification() {
        let cases: [(&str, &[&str], &str); 15] = [
            ("include", &["\"/etc/extra.conf\""], "include-file:filename=\"/etc/extra.conf\""),
            (
                "option",
                &["domain-name-servers", "10.0.0.1,", "10.0.0.2"],
                "option:domain-name-servers=10.0.0.1, 10.0.0.2",
            ),
            ("deny", &["unknown-clients"], "grant:deny,unknown-clients"),
            ("range", &["10.0.0.10", "10.0.0.20"], "range4:10.0.0.10-10.0.0.20"),
            ("range", &["dynamic-bootp", "10.0.0.9"], "range4:10.0.0.9-10.0.0.9"),
            ("range6", &["fd00::/120"], "range6:fd00::-fd00::ff"),
            ("range6", &["fd00::5", "temporary"], "range6:fd00::5-fd00::5"),
            ("prefix6", &["fd00::", "fd00::ff00", "/120"], "prefix6:/120:fd00::-fd00::ff00"),
            (
                "hardware",
                &["ethernet", "0:c:29:aa:bb:cc"],
                "hardware-address:ethernet[00:0c:29:aa:bb:cc]",
            ),
            ("fixed-address", &["10.0.0.5,", "10.0.0.6"], "fixed-address4:10.0.0.5,10.0.0.6"),
            (
                "host-identifier",
                &["option", "dhcp6.client-id", "00:01"],
                "match-client:dhcp6.client-id=00:01",
            ),
            ("authoritative", &[], "boolean:authoritative=true"),
            ("not", &["authoritative"], "boolean:authoritative=false"),
            (
                "ddns-hostname",
                &["=", "pick", "(", "\"a\"", ")"],
                "parameter-expression:ddns-hostname=\"pick ( \"a\" )\"",
            ),
            ("default-lease-time", &["1800"], "parameter:default-lease-time=1800"),
        ];

        for (name, operands, expected) in cases {
            let token = param(name, operands);
            let parsed = Parameter::parse(&token).unwrap_or_else(|e| panic!("{token}: {e}"));
            assert_eq!(parsed.to_string(), expected);
        }
    }

    #[test]
    fn test_parameter_errors() {
        for token in [
            param("include", &["a", "b"]),
            param("option", &["lonely"]),
            param("allow", &[]),
            param("range", &["10.0.0.1", "10.0.0.2", "10.0.0.3"]),
            param("range", &["not-an-address"]),
            param("prefix6", &["fd00::", "fd00::1"]),
            param("hardware", &["ethernet", "zz:00"]),
            param("host-identifier", &["match", "a", "b"]),
            param("max-lease-time", &["1", "2"]),
        ] {
            assert!(Parameter::parse(&token).is_err(), "{token}");
        }
    }

    #[test]
    fn test_declaration_ids() {
        let subnet = param("subnet", &["10.0.0.0", "netmask", "255.255.255.0"]);
        assert_eq!(
            DeclarationId::parse(&subnet).unwrap(),
            DeclarationId::Subnet4 {
                address: Ipv4Addr::new(10, 0, 0, 0),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
            }
        );
        assert_eq!(
            DeclarationId::parse(&param("subnet6", &["fd00::/64"])).unwrap(),
            DeclarationId::Subnet6 {
                address: "fd00::".parse().unwrap(),
                prefix: 64,
            }
        );
        assert_eq!(
            DeclarationId::parse(&param("shared-network", &["lab"])).unwrap(),
            DeclarationId::SharedNetwork("lab".into())
        );
        for bad in [
            param("class", &["\"vendor\""]),
            param("subnet", &["10.0.0.0", "mask", "255.0.0.0"]),
            param("subnet6", &["fd00::"]),
            param("host", &[]),
        ] {
            assert!(matches!(
                DeclarationId::parse(&bad),
                Err(ParseError::InvalidDeclaration { .. })
            ));
        }
    }

    #[test]
    fn test_subnet_contains() {
        let subnet = DeclarationId::Subnet4 {
            address: Ipv4Addr::new(192, 168, 10, 0),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        };
        assert!(subnet.contains("192.168.10.200".parse().unwrap()));
        assert!(!subnet.contains("192.168.11.1".parse().unwrap()));
        assert!(!subnet.contains("fd00::1".parse().unwrap()));
        assert!(!DeclarationId::Global.contains("192.168.10.1".parse().unwrap()));
    }

    #[test]
    fn test_read_example() {
        let config = DhcpConfiguration::parse(EXAMPLE).unwrap();
        let global = config.global();
        assert_eq!(global.id, DeclarationId::Global);
        assert_eq!(global.parameters["default-lease-time"], "1800");
        assert!(global.booleans["authoritative"]);

        let subnet = config
            .subnet_by_address("172.16.41.130".parse().unwrap())
            .unwrap();
        assert!(matches!(subnet.id, DeclarationId::Subnet4 { .. }));
        assert_eq!(subnet.options["broadcast-address"], "172.16.41.255");
        // Inherited from the global scope
        assert_eq!(subnet.options["domain-name"], "\"localdomain\"");
        assert_eq!(subnet.parameters["default-lease-time"], "1800");
        assert_eq!(subnet.grants["unknown-clients"], Grant::Allow);

        let host = config.host_by_name("BUILDER").unwrap();
        assert_eq!(host.scope, vec![DeclarationId::Global, subnet.id.clone()]);
        assert_eq!(host.hardware().unwrap(), vec![0x00, 0x0c, 0x29, 0x5e, 0x1a, 0x03]);
        assert_eq!(host.ip4().unwrap(), Ipv4Addr::new(172, 16, 41, 10));
        // Overridden in the host block
        assert_eq!(host.parameters["default-lease-time"], "600");
        assert_eq!(host.options["domain-name"], "\"localdomain\"");
    }

    #[test]
    fn test_lookup_errors() {
        let config = DhcpConfiguration::parse(EXAMPLE).unwrap();
        assert!(matches!(
            config.host_by_name("missing"),
            Err(ParseError::NotFound { kind: "host", .. })
        ));
        assert!(matches!(
            config.host_by_name("twin"),
            Err(ParseError::Ambiguous { kind: "host", .. })
        ));
        assert!(matches!(
            config.subnet_by_address("10.9.9.9".parse().unwrap()),
            Err(ParseError::NotFound { .. })
        ));

        let twin = config
            .declarations()
            .iter()
            .find(|d| d.id == DeclarationId::Host("twin".into()))
            .unwrap();
        assert!(matches!(
            twin.hardware(),
            Err(ParseError::NotFound { kind: "hardware", .. })
        ));
        assert!(matches!(
            config.global().ip4(),
            Err(ParseError::NotFound { kind: "fixed-address", .. })
        ));
    }

    #[test]
    fn test_ipv6_subnet() {
        let config = DhcpConfiguration::parse(
            "subnet6 fd00:1::/64 {
                range6 fd00:1::100 fd00:1::1ff;
                host v6 { fixed-address6 fd00:1::42; }
            }",
        )
        .unwrap();
        let subnet = config.subnet_by_address("fd00:1::9".parse().unwrap()).unwrap();
        assert!(matches!(subnet.id, DeclarationId::Subnet6 { prefix: 64, .. }));
        assert_eq!(
            config.host_by_name("v6").unwrap().ip6().unwrap(),
            "fd00:1::42".parse::<Ipv6Addr>().unwrap()
        );
    }

    #[test]
    fn test_invalid_files() {
        assert!(DhcpConfiguration::parse("subnet 10.0.0.0 { }").is_err());
        assert!(DhcpConfiguration::parse("host a { hardware ethernet 00:11; ").is_err());
        for bad in ["00:11:", "00:x1", "001:22", ""] {
            let token = param("hardware", &["ethernet", bad]);
            assert!(
                matches!(Parameter::parse(&token), Err(ParseError::InvalidParameter { .. })),
                "{bad:?}"
            );
        }
        assert!(DhcpConfiguration::parse("}").is_err());
    }

    #[test]
    fn test_display() {
        let config = DhcpConfiguration::parse("host vm { fixed-address 10.0.0.2; }").unwrap();
        let text = config.host_by_name("vm").unwrap().to_string();
        assert!(text.starts_with("{host name:vm},{global}\n"), "{text}");
        assert!(text.contains("address : fixed-address4:10.0.0.2"), "{text}");
    }

    #[test]
    fn test_read_missing_file() {
        let err = DhcpConfiguration::read(Path::new("/nonexistent/dhcpd.conf")).unwrap_err();
        assert!(matches!(err, ParseError::Io { .. }));
    }
}
