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

//! Boot command parser
//!
//! A boot command is literal text mixed with bracketed tokens:
//! - `<wait>`, `<wait5>`, `<wait1m30s>` pause typing
//! - `<enter>`, `<f2>`, `<leftAltOn>`, `<leftAltOff>` press or toggle named keys
//! - `<aOn>`, `<aOff>` hold or release a single character
//!
//! Bracketed text that is none of these is typed as-is, brackets included.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, tag_no_case},
    character::complete::{anychar, char, digit0, digit1, one_of},
    combinator::{map, opt, recognize, success, value},
    multi::many1,
    sequence::{delimited, pair, preceded},
};
use std::str::FromStr;
use std::time::Duration;

use crate::duration;
use crate::error::{Error, Result};
use crate::types::{Expression, ExpressionSequence, KeyAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitLength<'a> {
    Default,
    Seconds(&'a str),
    Duration(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Wait(WaitLength<'a>),
    Toggle(char, KeyAction),
    Special(&'a str, KeyAction),
    Literal(char),
}

impl Token<'_> {
    fn into_expression(self) -> std::result::Result<Expression, String> {
        let expression = match self {
            Token::Wait(WaitLength::Default) => Expression::Wait(Duration::from_secs(1)),
            Token::Wait(WaitLength::Seconds(digits)) => {
                let secs: u64 = digits
                    .parse()
                    .map_err(|_| format!("wait of {digits} seconds is out of range"))?;
                Expression::Wait(Duration::from_secs(secs))
            }
            Token::Wait(WaitLength::Duration(text)) => {
                let parsed = duration::parse_signed(text).map_err(|e| e.to_string())?;
                // Negative waits survive parsing so validation can report them
                Expression::Wait(parsed.positive().unwrap_or(Duration::ZERO))
            }
            Token::Toggle(ch, action) => Expression::Literal { ch, action },
            Token::Special(name, action) => Expression::special(name, action),
            Token::Literal(ch) => Expression::literal(ch),
        };
        Ok(expression)
    }
}

fn integer(input: &str) -> IResult<&str, &str> {
    alt((tag("0"), recognize(pair(one_of("123456789"), digit0)))).parse(input)
}

fn number(input: &str) -> IResult<&str, &str> {
    recognize((opt(char('-')), integer, opt((char('.'), digit1)))).parse(input)
}

fn duration_text(input: &str) -> IResult<&str, &str> {
    recognize(many1(pair(number, duration::unit))).parse(input)
}

fn parse_wait(input: &str) -> IResult<&str, WaitLength<'_>> {
    delimited(
        char('<'),
        preceded(
            tag("wait"),
            alt((
                map(duration_text, WaitLength::Duration),
                map(integer, WaitLength::Seconds),
                success(WaitLength::Default),
            )),
        ),
        char('>'),
    )
    .parse(input)
}

fn parse_toggle_suffix(input: &str) -> IResult<&str, KeyAction> {
    alt((
        value(KeyAction::On, tag_no_case("on")),
        value(KeyAction::Off, tag_no_case("off")),
    ))
    .parse(input)
}

fn parse_char_toggle(input: &str) -> IResult<&str, (char, KeyAction)> {
    delimited(char('<'), pair(anychar, parse_toggle_suffix), char('>')).parse(input)
}

// Where one name prefixes another the longer one must be tried first
fn parse_special_name(input: &str) -> IResult<&str, &str> {
    alt((
        alt((
            tag_no_case("bs"),
            tag_no_case("del"),
            tag_no_case("enter"),
            tag_no_case("esc"),
            tag_no_case("f10"),
            tag_no_case("f11"),
            tag_no_case("f12"),
            tag_no_case("f1"),
            tag_no_case("f2"),
            tag_no_case("f3"),
            tag_no_case("f4"),
            tag_no_case("f5"),
            tag_no_case("f6"),
            tag_no_case("f7"),
            tag_no_case("f8"),
            tag_no_case("f9"),
            tag_no_case("return"),
            tag_no_case("tab"),
        )),
        alt((
            tag_no_case("up"),
            tag_no_case("down"),
            tag_no_case("spacebar"),
            tag_no_case("insert"),
            tag_no_case("home"),
            tag_no_case("end"),
            tag_no_case("pageup"),
            tag_no_case("pagedown"),
            tag_no_case("leftalt"),
            tag_no_case("leftctrl"),
            tag_no_case("leftshift"),
            tag_no_case("leftsuper"),
            tag_no_case("left"),
            tag_no_case("rightalt"),
            tag_no_case("rightctrl"),
            tag_no_case("rightshift"),
            tag_no_case("rightsuper"),
            tag_no_case("right"),
            tag_no_case("menu"),
        )),
    ))
    .parse(input)
}

fn parse_special(input: &str) -> IResult<&str, (&str, KeyAction)> {
    delimited(
        char('<'),
        map(
            pair(parse_special_name, opt(parse_toggle_suffix)),
            |(name, action)| (name, action.unwrap_or(KeyAction::Press)),
        ),
        char('>'),
    )
    .parse(input)
}

fn parse_token(input: &str) -> IResult<&str, Token<'_>> {
    alt((
        map(parse_wait, Token::Wait),
        map(parse_char_toggle, |(ch, action)| Token::Toggle(ch, action)),
        map(parse_special, |(name, action)| Token::Special(name, action)),
        map(anychar, Token::Literal),
    ))
    .parse(input)
}

/// Parse a boot command into the expressions it types.
pub fn parse(command: &str) -> Result<ExpressionSequence> {
    let mut expressions = Vec::new();
    let mut remaining = command;

    while !remaining.is_empty() {
        let position = command.len() - remaining.len();
        let (rest, token) =
            parse_token(remaining).map_err(|e| Error::syntax(position, e.to_string()))?;
        let expression = token
            .into_expression()
            .map_err(|message| Error::syntax(position, message))?;
        expressions.push(expression);
        remaining = rest;
    }

    Ok(ExpressionSequence::new(expressions))
}

impl FromStr for ExpressionSequence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse(s)
    }
}
