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

//! Text scanning shared by the host configuration readers
//!
//! The readers hold a whole file in memory and walk it with small nom
//! parsers. [`Scanner`] is the cursor they share for pulling out
//! `;`-terminated statements and braced blocks one at a time.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{is_not, take_till, take_while_m_n},
    character::complete::char,
    combinator::{opt, recognize, value},
    multi::{fold_many0, separated_list1},
    sequence::{preceded, terminated},
};

/// Drop everything from `#` to the end of the line. The newline itself is kept.
pub fn uncomment(input: &str) -> String {
    let comment = value("", preceded(char('#'), take_till(|c: char| c == '\n')));
    let kept: IResult<&str, String> = fold_many0(
        alt((is_not("#"), comment)),
        String::new,
        |mut text, piece| {
            text.push_str(piece);
            text
        },
    )
    .parse(input);
    kept.map(|(_, text)| text).unwrap_or_default()
}

/// A double-quoted string, quotes included. An unterminated string runs to
/// the end of input.
pub(crate) fn quoted(input: &str) -> IResult<&str, &str> {
    recognize((char('"'), take_till(|c: char| c == '"'), opt(char('"')))).parse(input)
}

/// Colon separated hex octets of `min` to `max` digits each.
pub(crate) fn hex_octets<'a>(
    min: usize,
    max: usize,
) -> impl Parser<&'a str, Output = Vec<&'a str>, Error = nom::error::Error<&'a str>> {
    separated_list1(
        char(':'),
        take_while_m_n(min, max, |c: char| c.is_ascii_hexdigit()),
    )
}

/// A braced block pulled out of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block<'a> {
    /// Text between the previous block and the opening brace.
    pub head: &'a str,
    /// Text between the braces.
    pub body: &'a str,
    /// False when input ran out before the closing brace.
    pub closed: bool,
}

/// Pull-based cursor over a string.
#[derive(Debug, Clone)]
pub struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { rest: input }
    }

    pub fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    pub fn remaining(&self) -> &'a str {
        self.rest
    }

    /// Consume up to and including `sentinel`, returning what came before it
    /// and whether the sentinel was found.
    pub fn take_until(&mut self, sentinel: char) -> (&'a str, bool) {
        let found: IResult<&'a str, &'a str> =
            terminated(take_till(|c: char| c == sentinel), char(sentinel)).parse(self.rest);
        match found {
            Ok((rest, taken)) => {
                self.rest = rest;
                (taken, true)
            }
            Err(_) => (std::mem::take(&mut self.rest), false),
        }
    }

    /// Consume the next `open` ... `close` block. Returns `None` once there is
    /// no opening delimiter left; whatever remained is consumed.
    pub fn take_block(&mut self, open: char, close: char) -> Option<Block<'a>> {
        let (head, found) = self.take_until(open);
        if !found {
            return None;
        }
        let (body, closed) = self.take_until(close);
        Some(Block { head, body, closed })
    }
}
