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

//! Keyboard backends
//!
//! A [`BootDriver`] turns platform-neutral key events into whatever its
//! transport understands. The transport itself is a closure handed to the
//! driver's constructor, so the same driver can sit on a VNC connection, a
//! hypervisor CLI or a test recorder.

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::Result;
use crate::types::KeyAction;

/// Delay between key events when nothing else is configured.
pub const DEFAULT_KEY_INTERVAL: Duration = Duration::from_millis(100);

/// Environment variable that overrides the key interval.
pub const KEY_INTERVAL_ENV: &str = "PACKER_KEY_INTERVAL";

/// Punctuation that needs shift held on a US layout.
pub const SHIFTED_CHARS: &str = "~!@#$%^&*()_+{}|:\"<>?";

#[async_trait]
pub trait BootDriver: Send {
    async fn send_key(&mut self, ch: char, action: KeyAction) -> Result<()>;

    async fn send_special(&mut self, name: &str, action: KeyAction) -> Result<()>;

    /// Send anything still buffered.
    async fn flush(&mut self) -> Result<()>;

    /// Send Ctrl+Alt+Delete.
    async fn reboot(&mut self) -> Result<()> {
        self.send_special("leftctrl", KeyAction::On).await?;
        self.send_special("leftalt", KeyAction::On).await?;
        self.send_special("del", KeyAction::Press).await?;
        self.send_special("leftalt", KeyAction::Off).await?;
        self.send_special("leftctrl", KeyAction::Off).await?;
        self.flush().await
    }
}

#[async_trait]
impl<D: BootDriver + ?Sized> BootDriver for Box<D> {
    async fn send_key(&mut self, ch: char, action: KeyAction) -> Result<()> {
        (**self).send_key(ch, action).await
    }

    async fn send_special(&mut self, name: &str, action: KeyAction) -> Result<()> {
        (**self).send_special(name, action).await
    }

    async fn flush(&mut self) -> Result<()> {
        (**self).flush().await
    }

    async fn reboot(&mut self) -> Result<()> {
        (**self).reboot().await
    }
}

/// Timing between key events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    pub interval: Duration,
    // Jitter as a fraction (0.0 to 1.0) of interval
    pub jitter: f64,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            interval: DEFAULT_KEY_INTERVAL,
            jitter: 0.0,
        }
    }
}

impl Pacing {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            jitter: 0.0,
        }
    }

    /// No delay at all; mostly useful for tests and dry runs.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn delay(&self) -> Duration {
        let base_us = u64::try_from(self.interval.as_micros()).unwrap_or(u64::MAX);
        let jitter_us = (base_us as f64 * self.jitter) as u64;

        if jitter_us > 0 {
            let variation = rand::rng().random_range(0..=jitter_us * 2);
            let delay = base_us.saturating_add(variation).saturating_sub(jitter_us);
            Duration::from_micros(delay)
        } else {
            self.interval
        }
    }

    /// Sleep between key events. Not cancellable: a key is never cut short.
    pub async fn pause(&self) {
        let delay = self.delay();
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}

pub fn needs_shift(ch: char) -> bool {
    ch.is_uppercase() || SHIFTED_CHARS.contains(ch)
}

/// Build a character table from runs of characters with consecutive codes.
pub(crate) fn char_table<C>(runs: &[(&str, u8)], code: impl Fn(u8) -> C) -> HashMap<char, C> {
    let code = &code;
    runs.iter()
        .flat_map(move |(chars, start)| {
            chars.chars().zip(*start..).map(move |(ch, n)| (ch, code(n)))
        })
        .collect()
}

/// The down/up events for one key, optionally bracketed by a modifier.
///
/// On holds the modifier then the key, Off releases the modifier then the
/// key, Press does down/down/up/up.
pub(crate) fn key_events<K: Copy>(
    key: K,
    modifier: Option<K>,
    action: KeyAction,
) -> Vec<(K, bool)> {
    let mut events = Vec::with_capacity(4);
    match action {
        KeyAction::On => {
            events.extend(modifier.map(|m| (m, true)));
            events.push((key, true));
        }
        KeyAction::Off => {
            events.extend(modifier.map(|m| (m, false)));
            events.push((key, false));
        }
        KeyAction::Press => {
            events.extend(modifier.map(|m| (m, true)));
            events.push((key, true));
            events.push((key, false));
            events.extend(modifier.map(|m| (m, false)));
        }
    }
    events
}
