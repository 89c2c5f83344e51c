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

//! USB HID keyboard driver
//!
//! Sends HID usage IDs one event at a time. There is nothing to buffer, so
//! flushing is a no-op. Modifier keys are tracked so callers can see what is
//! currently held down.

use async_trait::async_trait;
use bitflags::bitflags;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use crate::driver::{BootDriver, Pacing, char_table, key_events, needs_shift};
use crate::error::{Error, Result};
use crate::types::KeyAction;

/// A USB HID keyboard usage ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HidCode(pub u8);

impl HidCode {
    pub const ENTER: HidCode = HidCode(0x28);
    pub const ESCAPE: HidCode = HidCode(0x29);
    pub const BACKSPACE: HidCode = HidCode(0x2a);
    pub const TAB: HidCode = HidCode(0x2b);
    pub const SPACE: HidCode = HidCode(0x2c);
    pub const F1: HidCode = HidCode(0x3a);
    pub const INSERT: HidCode = HidCode(0x49);
    pub const HOME: HidCode = HidCode(0x4a);
    pub const PAGE_UP: HidCode = HidCode(0x4b);
    pub const DELETE: HidCode = HidCode(0x4c);
    pub const END: HidCode = HidCode(0x4d);
    pub const PAGE_DOWN: HidCode = HidCode(0x4e);
    pub const RIGHT: HidCode = HidCode(0x4f);
    pub const LEFT: HidCode = HidCode(0x50);
    pub const DOWN: HidCode = HidCode(0x51);
    pub const UP: HidCode = HidCode(0x52);
    pub const MENU: HidCode = HidCode(0x65);
    pub const LEFT_CTRL: HidCode = HidCode(0xe0);
    pub const LEFT_SHIFT: HidCode = HidCode(0xe1);
    pub const LEFT_ALT: HidCode = HidCode(0xe2);
    pub const LEFT_SUPER: HidCode = HidCode(0xe3);
    pub const RIGHT_CTRL: HidCode = HidCode(0xe4);
    pub const RIGHT_SHIFT: HidCode = HidCode(0xe5);
    pub const RIGHT_ALT: HidCode = HidCode(0xe6);
    pub const RIGHT_SUPER: HidCode = HidCode(0xe7);

    /// Bit for this key in a HID report's modifier byte: left ctrl, shift,
    /// alt and super in the low nibble, the right-hand keys in the high one.
    fn modifier_bit(self) -> Option<u8> {
        (HidCode::LEFT_CTRL.0..=HidCode::RIGHT_SUPER.0)
            .contains(&self.0)
            .then(|| 1 << (self.0 - HidCode::LEFT_CTRL.0))
    }
}

impl fmt::Display for HidCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

bitflags! {
    /// Modifier keys currently held, either side.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u8 {
        const CTRL = 1 << 0;
        const SHIFT = 1 << 1;
        const ALT = 1 << 2;
        const SUPER = 1 << 3;
    }
}

fn special_codes() -> HashMap<&'static str, HidCode> {
    let mut map = HashMap::from([
        ("bs", HidCode::BACKSPACE),
        ("del", HidCode::DELETE),
        ("enter", HidCode::ENTER),
        ("return", HidCode::ENTER),
        ("esc", HidCode::ESCAPE),
        ("tab", HidCode::TAB),
        ("spacebar", HidCode::SPACE),
        ("up", HidCode::UP),
        ("down", HidCode::DOWN),
        ("left", HidCode::LEFT),
        ("right", HidCode::RIGHT),
        ("insert", HidCode::INSERT),
        ("home", HidCode::HOME),
        ("end", HidCode::END),
        ("pageup", HidCode::PAGE_UP),
        ("pagedown", HidCode::PAGE_DOWN),
        ("menu", HidCode::MENU),
        ("leftalt", HidCode::LEFT_ALT),
        ("leftctrl", HidCode::LEFT_CTRL),
        ("leftshift", HidCode::LEFT_SHIFT),
        ("leftsuper", HidCode::LEFT_SUPER),
        ("rightalt", HidCode::RIGHT_ALT),
        ("rightctrl", HidCode::RIGHT_CTRL),
        ("rightshift", HidCode::RIGHT_SHIFT),
        ("rightsuper", HidCode::RIGHT_SUPER),
    ]);

    const FUNCTION_KEYS: [&str; 12] = [
        "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11", "f12",
    ];
    let first = HidCode::F1.0;
    for (name, code) in FUNCTION_KEYS.into_iter().zip(first..) {
        map.insert(name, HidCode(code));
    }
    map
}

fn literal_codes() -> HashMap<char, HidCode> {
    char_table(
        &[
            ("abcdefghijklmnopqrstuvwxyz", 0x04),
            ("ABCDEFGHIJKLMNOPQRSTUVWXYZ", 0x04),
            ("1234567890", 0x1e),
            ("!@#$%^&*()", 0x1e),
            (" ", 0x2c),
            ("-=[]\\", 0x2d),
            ("_+{}|", 0x2d),
            (";'`,./", 0x33),
            (":\"~<>?", 0x33),
        ],
        HidCode,
    )
}

pub type HidSender = Box<dyn FnMut(HidCode, bool) -> anyhow::Result<()> + Send>;

pub struct UsbDriver {
    sender: HidSender,
    pacing: Pacing,
    codes: HashMap<char, HidCode>,
    specials: HashMap<&'static str, HidCode>,
    // One bit per physical modifier key
    held: u8,
}

impl UsbDriver {
    pub fn new(
        sender: impl FnMut(HidCode, bool) -> anyhow::Result<()> + Send + 'static,
        pacing: Pacing,
    ) -> Self {
        Self {
            sender: Box::new(sender),
            pacing,
            codes: literal_codes(),
            specials: special_codes(),
            held: 0,
        }
    }

    /// Modifiers held down by special On events, whichever side.
    pub fn held_modifiers(&self) -> Modifiers {
        Modifiers::from_bits_truncate(self.held | self.held >> 4)
    }

    async fn send_events(&mut self, events: Vec<(HidCode, bool)>) -> Result<()> {
        for (code, down) in events {
            debug!(%code, down, "sending usb key event");
            (self.sender)(code, down)?;
            self.pacing.pause().await;
        }
        Ok(())
    }
}

#[async_trait]
impl BootDriver for UsbDriver {
    async fn send_key(&mut self, ch: char, action: KeyAction) -> Result<()> {
        let code = *self.codes.get(&ch).ok_or(Error::UnmappedCharacter(ch))?;
        let shift = needs_shift(ch).then_some(HidCode::LEFT_SHIFT);
        self.send_events(key_events(code, shift, action)).await
    }

    async fn send_special(&mut self, name: &str, action: KeyAction) -> Result<()> {
        let code = *self
            .specials
            .get(name.to_ascii_lowercase().as_str())
            .ok_or_else(|| Error::SpecialNotFound(name.to_string()))?;
        self.send_events(key_events(code, None, action)).await?;

        // Shift brackets around literals come and go without touching this
        if let Some(bit) = code.modifier_bit() {
            match action {
                KeyAction::On => self.held |= bit,
                KeyAction::Off => self.held &= !bit,
                KeyAction::Press => {}
            }
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
