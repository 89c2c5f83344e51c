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

//! VNC keyboard driver
//!
//! Key events go straight out as X11 keysyms through the RFB KeyEvent
//! message, one down or up at a time.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

use crate::driver::{BootDriver, Pacing, key_events, needs_shift};
use crate::error::{Error, Result};
use crate::types::KeyAction;

pub mod keysym {
    pub const BACKSPACE: u32 = 0xff08;
    pub const TAB: u32 = 0xff09;
    pub const RETURN: u32 = 0xff0d;
    pub const ESCAPE: u32 = 0xff1b;
    pub const HOME: u32 = 0xff50;
    pub const LEFT: u32 = 0xff51;
    pub const UP: u32 = 0xff52;
    pub const RIGHT: u32 = 0xff53;
    pub const DOWN: u32 = 0xff54;
    pub const PAGE_UP: u32 = 0xff55;
    pub const PAGE_DOWN: u32 = 0xff56;
    pub const END: u32 = 0xff57;
    pub const INSERT: u32 = 0xff63;
    pub const MENU: u32 = 0xff67;
    // function keys run 0xffbe to 0xffc9, in order
    pub const F1: u32 = 0xffbe;
    pub const SHIFT_LEFT: u32 = 0xffe1;
    pub const SHIFT_RIGHT: u32 = 0xffe2;
    pub const CTRL_LEFT: u32 = 0xffe3;
    pub const CTRL_RIGHT: u32 = 0xffe4;
    pub const ALT_LEFT: u32 = 0xffe9;
    pub const ALT_RIGHT: u32 = 0xffea;
    pub const SUPER_LEFT: u32 = 0xffeb;
    pub const SUPER_RIGHT: u32 = 0xffec;
    pub const DELETE: u32 = 0xffff;
    pub const SPACE: u32 = 0x20;

    // Characters outside Latin-1 use the Unicode keysym range
    const UNICODE_OFFSET: u32 = 0x0100_0000;

    pub fn from_char(ch: char) -> u32 {
        let cp = u32::from(ch);
        if cp < 0x100 { cp } else { UNICODE_OFFSET | cp }
    }
}

fn special_keysyms() -> HashMap<&'static str, u32> {
    let mut map = HashMap::from([
        ("bs", keysym::BACKSPACE),
        ("del", keysym::DELETE),
        ("enter", keysym::RETURN),
        ("return", keysym::RETURN),
        ("esc", keysym::ESCAPE),
        ("tab", keysym::TAB),
        ("up", keysym::UP),
        ("down", keysym::DOWN),
        ("left", keysym::LEFT),
        ("right", keysym::RIGHT),
        ("spacebar", keysym::SPACE),
        ("insert", keysym::INSERT),
        ("home", keysym::HOME),
        ("end", keysym::END),
        ("pageup", keysym::PAGE_UP),
        ("pagedown", keysym::PAGE_DOWN),
        ("menu", keysym::MENU),
        ("leftalt", keysym::ALT_LEFT),
        ("leftctrl", keysym::CTRL_LEFT),
        ("leftshift", keysym::SHIFT_LEFT),
        ("leftsuper", keysym::SUPER_LEFT),
        ("rightalt", keysym::ALT_RIGHT),
        ("rightctrl", keysym::CTRL_RIGHT),
        ("rightshift", keysym::SHIFT_RIGHT),
        ("rightsuper", keysym::SUPER_RIGHT),
    ]);

    const FUNCTION_KEYS: [&str; 12] = [
        "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11", "f12",
    ];
    for (name, sym) in FUNCTION_KEYS.into_iter().zip(keysym::F1..) {
        map.insert(name, sym);
    }
    map
}

pub type KeyEventSender = Box<dyn FnMut(u32, bool) -> anyhow::Result<()> + Send>;

pub struct VncDriver {
    sender: KeyEventSender,
    pacing: Pacing,
    specials: HashMap<&'static str, u32>,
}

impl VncDriver {
    pub fn new(
        sender: impl FnMut(u32, bool) -> anyhow::Result<()> + Send + 'static,
        pacing: Pacing,
    ) -> Self {
        Self {
            sender: Box::new(sender),
            pacing,
            specials: special_keysyms(),
        }
    }

    async fn send_events(&mut self, events: Vec<(u32, bool)>) -> Result<()> {
        for (sym, down) in events {
            debug!(keysym = sym, down, "sending vnc key event");
            (self.sender)(sym, down)?;
            self.pacing.pause().await;
        }
        Ok(())
    }
}

#[async_trait]
impl BootDriver for VncDriver {
    async fn send_key(&mut self, ch: char, action: KeyAction) -> Result<()> {
        let shift = needs_shift(ch).then_some(keysym::SHIFT_LEFT);
        self.send_events(key_events(keysym::from_char(ch), shift, action))
            .await
    }

    async fn send_special(&mut self, name: &str, action: KeyAction) -> Result<()> {
        let sym = *self
            .specials
            .get(name.to_ascii_lowercase().as_str())
            .ok_or_else(|| Error::SpecialNotFound(name.to_string()))?;
        self.send_events(key_events(sym, None, action)).await
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
