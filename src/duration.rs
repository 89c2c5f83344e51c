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

//! Duration literals
//!
//! Durations are written the way Go's `time.ParseDuration` reads them: one or
//! more `<number><unit>` pairs with an optional leading sign, e.g. `1h30m`,
//! `2.5s` or `4m2ns`. Units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit1},
    combinator::{opt, value},
    multi::many1,
    sequence::preceded,
};
use std::time::Duration;
use thiserror::Error;

const NANOSECOND: u128 = 1;
const MICROSECOND: u128 = 1_000 * NANOSECOND;
const MILLISECOND: u128 = 1_000 * MICROSECOND;
const SECOND: u128 = 1_000 * MILLISECOND;
const MINUTE: u128 = 60 * SECOND;
const HOUR: u128 = 60 * MINUTE;

// Same ceiling as a signed 64-bit nanosecond count
const MAX_NANOS: u128 = i64::MAX as u128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("invalid duration {0:?}")]
    Invalid(String),
    #[error("duration {0:?} is out of range")]
    Overflow(String),
    #[error("duration {0:?} is negative")]
    Negative(String),
}

/// A duration literal that may carry a leading minus sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedDuration {
    pub negative: bool,
    pub magnitude: Duration,
}

impl SignedDuration {
    /// The duration if it is strictly positive.
    pub fn positive(self) -> Option<Duration> {
        (!self.negative && !self.magnitude.is_zero()).then_some(self.magnitude)
    }
}

pub(crate) fn unit(input: &str) -> IResult<&str, u128> {
    alt((
        value(NANOSECOND, tag("ns")),
        value(MICROSECOND, alt((tag("us"), tag("µs"), tag("μs")))),
        value(MILLISECOND, tag("ms")),
        value(SECOND, tag("s")),
        value(MINUTE, tag("m")),
        value(HOUR, tag("h")),
    ))
    .parse(input)
}

fn segment(input: &str) -> IResult<&str, (&str, Option<&str>, u128)> {
    (digit1, opt(preceded(char('.'), digit1)), unit).parse(input)
}

/// Parse a duration literal, keeping its sign.
pub fn parse_signed(input: &str) -> Result<SignedDuration, DurationError> {
    let invalid = || DurationError::Invalid(input.to_string());
    let overflow = || DurationError::Overflow(input.to_string());

    let (body, negative) = match input.as_bytes().first() {
        Some(b'-') => (&input[1..], true),
        Some(b'+') => (&input[1..], false),
        _ => (input, false),
    };

    // A bare zero is the only literal allowed without a unit
    if body == "0" {
        return Ok(SignedDuration {
            negative,
            magnitude: Duration::ZERO,
        });
    }

    let (rest, segments) = many1(segment).parse(body).map_err(|_| invalid())?;
    if !rest.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    for (whole, fraction, unit) in segments {
        // digit1 guarantees digits, so the only failure left is overflow
        let whole: u128 = whole.parse().map_err(|_| overflow())?;
        let mut nanos = whole
            .checked_mul(unit)
            .filter(|n| *n <= MAX_NANOS)
            .ok_or_else(overflow)?;

        if let Some(fraction) = fraction {
            let mut scale = unit;
            for digit in fraction.bytes() {
                scale /= 10;
                if scale == 0 {
                    break;
                }
                nanos += u128::from(digit - b'0') * scale;
            }
        }

        total = total
            .checked_add(nanos)
            .filter(|n| *n <= MAX_NANOS)
            .ok_or_else(overflow)?;
    }

    let nanos = u64::try_from(total).map_err(|_| overflow())?;
    Ok(SignedDuration {
        negative,
        magnitude: Duration::from_nanos(nanos),
    })
}

/// Parse a duration literal that must not be negative.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let parsed = parse_signed(input)?;
    if parsed.negative && !parsed.magnitude.is_zero() {
        return Err(DurationError::Negative(input.to_string()));
    }
    Ok(parsed.magnitude)
}
