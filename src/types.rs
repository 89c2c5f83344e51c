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

//! Core types for boot command expressions

use std::fmt;
use std::time::Duration;

use crate::error::Error;

/// What happens to a key: held down, released, or both in turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAction {
    On,
    Off,
    Press,
}

impl KeyAction {
    pub fn presses(self) -> bool {
        matches!(self, KeyAction::On | KeyAction::Press)
    }

    pub fn releases(self) -> bool {
        matches!(self, KeyAction::Off | KeyAction::Press)
    }
}

impl fmt::Display for KeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAction::On => f.write_str("On"),
            KeyAction::Off => f.write_str("Off"),
            KeyAction::Press => f.write_str("Press"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Wait(Duration),
    Literal { ch: char, action: KeyAction },
    // Name as written; drivers match it case-insensitively
    Special { name: String, action: KeyAction },
}

impl Expression {
    pub fn literal(ch: char) -> Self {
        Expression::Literal {
            ch,
            action: KeyAction::Press,
        }
    }

    pub fn special(name: impl Into<String>, action: KeyAction) -> Self {
        Expression::Special {
            name: name.into(),
            action,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        match self {
            Expression::Wait(duration) if duration.is_zero() => {
                Err(Error::NonPositiveWait(*duration))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Wait(duration) => write!(f, "Wait<{duration:?}>"),
            Expression::Literal { ch, action } => write!(f, "LIT-{action}({ch})"),
            Expression::Special { name, action } => write!(f, "Spec-{action}({name})"),
        }
    }
}

/// An ordered list of expressions parsed from one boot command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpressionSequence {
    pub expressions: Vec<Expression>,
}

impl ExpressionSequence {
    pub fn new(expressions: Vec<Expression>) -> Self {
        Self { expressions }
    }

    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Expression> {
        self.expressions.iter()
    }

    /// Every validation failure in the sequence, not just the first.
    pub fn validate(&self) -> Vec<Error> {
        self.expressions
            .iter()
            .filter_map(|expression| expression.validate().err())
            .collect()
    }
}

impl FromIterator<Expression> for ExpressionSequence {
    fn from_iter<I: IntoIterator<Item = Expression>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ExpressionSequence {
    type Item = &'a Expression;
    type IntoIter = std::slice::Iter<'a, Expression>;

    fn into_iter(self) -> Self::IntoIter {
        self.expressions.iter()
    }
}

impl fmt::Display for ExpressionSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, expression) in self.expressions.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{expression}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_action_halves() {
        assert!(KeyAction::On.presses());
        assert!(!KeyAction::On.releases());
        assert!(!KeyAction::Off.presses());
        assert!(KeyAction::Off.releases());
        assert!(KeyAction::Press.presses());
        assert!(KeyAction::Press.releases());
    }

    #[test]
    fn test_wait_validation() {
        assert!(Expression::Wait(Duration::from_nanos(1)).validate().is_ok());
        assert!(matches!(
            Expression::Wait(Duration::ZERO).validate(),
            Err(Error::NonPositiveWait(_))
        ));
    }

    #[test]
    fn test_keys_always_validate() {
        assert!(Expression::literal('x').validate().is_ok());
        assert!(
            Expression::special("nonexistentkey", KeyAction::On)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_sequence_collects_every_error() {
        let sequence: ExpressionSequence = [
            Expression::Wait(Duration::ZERO),
            Expression::literal('a'),
            Expression::Wait(Duration::from_secs(1)),
            Expression::Wait(Duration::ZERO),
        ]
        .into_iter()
        .collect();

        let errors = sequence.validate();
        assert_eq!(errors.len(), 2);
        assert!(
            errors
                .iter()
                .all(|e| matches!(e, Error::NonPositiveWait(_)))
        );
    }

    #[test]
    fn test_display() {
        let sequence = ExpressionSequence::new(vec![
            Expression::Wait(Duration::from_secs(1)),
            Expression::literal('f'),
            Expression::special("leftAlt", KeyAction::On),
        ]);
        assert_eq!(
            sequence.to_string(),
            "Wait<1s> LIT-Press(f) Spec-On(leftAlt)"
        );
    }
}
