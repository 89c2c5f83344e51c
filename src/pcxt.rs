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

//! PC-XT scancode driver
//!
//! Scancodes (set 1) are buffered as whole groups and only sent on flush,
//! chunked into frames no wider than the transport accepts.
//!
//! Each key has a "make" code sent when it goes down and a "break" code sent
//! when it comes up. For single-byte keys the break code is the make code with
//! the high bit set; extended keys carry an `e0` prefix in both.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

use crate::driver::{BootDriver, Pacing, char_table, needs_shift};
use crate::error::{Error, Result};
use crate::types::KeyAction;

const RELEASE_FLAG: u8 = 0x80;
const EXTENDED_PREFIX: u8 = 0xe0;
const LEFT_SHIFT: u8 = 0x2a;

pub type ScanCodeSender = Box<dyn FnMut(&[u8]) -> anyhow::Result<()> + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ScanCode {
    make: Vec<u8>,
    break_code: Vec<u8>,
}

impl ScanCode {
    fn simple(base: u8) -> Self {
        Self {
            make: vec![base],
            break_code: vec![base | RELEASE_FLAG],
        }
    }

    fn extended(base: u8) -> Self {
        Self {
            make: vec![EXTENDED_PREFIX, base],
            break_code: vec![EXTENDED_PREFIX, base | RELEASE_FLAG],
        }
    }

    fn for_action(&self, action: KeyAction) -> Vec<u8> {
        let mut codes = Vec::with_capacity(self.make.len() + self.break_code.len());
        if action.presses() {
            codes.extend_from_slice(&self.make);
        }
        if action.releases() {
            codes.extend_from_slice(&self.break_code);
        }
        codes
    }
}

fn special_scancodes() -> HashMap<&'static str, ScanCode> {
    let mut map = HashMap::from([
        ("bs", ScanCode::simple(0x0e)),
        ("del", ScanCode::extended(0x53)),
        ("enter", ScanCode::simple(0x1c)),
        ("return", ScanCode::simple(0x1c)),
        ("esc", ScanCode::simple(0x01)),
        ("tab", ScanCode::simple(0x0f)),
        ("spacebar", ScanCode::simple(0x39)),
        ("f11", ScanCode::simple(0x57)),
        ("f12", ScanCode::simple(0x58)),
        ("up", ScanCode::extended(0x48)),
        ("down", ScanCode::extended(0x50)),
        ("left", ScanCode::extended(0x4b)),
        ("right", ScanCode::extended(0x4d)),
        ("insert", ScanCode::extended(0x52)),
        ("home", ScanCode::extended(0x47)),
        ("end", ScanCode::extended(0x4f)),
        ("pageup", ScanCode::extended(0x49)),
        ("pagedown", ScanCode::extended(0x51)),
        ("leftalt", ScanCode::simple(0x38)),
        ("leftctrl", ScanCode::simple(0x1d)),
        ("leftshift", ScanCode::simple(LEFT_SHIFT)),
        ("rightalt", ScanCode::extended(0x38)),
        ("rightctrl", ScanCode::extended(0x1d)),
        ("rightshift", ScanCode::simple(0x36)),
        ("leftsuper", ScanCode::extended(0x5b)),
        ("rightsuper", ScanCode::extended(0x5c)),
        ("menu", ScanCode::extended(0x5d)),
    ]);

    // f1 through f10 are contiguous
    const FUNCTION_KEYS: [&str; 10] = ["f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10"];
    for (name, base) in FUNCTION_KEYS.into_iter().zip(0x3b..) {
        map.insert(name, ScanCode::simple(base));
    }
    map
}

fn literal_scancodes() -> HashMap<char, u8> {
    char_table(
        &[
            ("1234567890-=", 0x02),
            ("!@#$%^&*()_+", 0x02),
            ("qwertyuiop[]", 0x10),
            ("QWERTYUIOP{}", 0x10),
            ("asdfghjkl;'`", 0x1e),
            ("ASDFGHJKL:\"~", 0x1e),
            ("\\zxcvbnm,./", 0x2b),
            ("|ZXCVBNM<>?", 0x2b),
            (" ", 0x39),
        ],
        |code| code,
    )
}

/// Split buffered scancode groups into frames of at most `size` bytes.
///
/// A group is never split across frames. A `size` of zero means unbounded.
pub fn chunk_scan_codes(groups: &[Vec<u8>], size: usize) -> Result<Vec<Vec<u8>>> {
    let mut frames = Vec::new();
    let mut running: Vec<u8> = Vec::new();

    for group in groups {
        if size > 0 {
            if group.len() > size {
                return Err(Error::Internal(format!(
                    "scancode group of {} bytes does not fit in a chunk of {size}",
                    group.len()
                )));
            }
            if running.len() + group.len() > size {
                frames.push(std::mem::take(&mut running));
            }
        }
        running.extend_from_slice(group);
    }

    if !running.is_empty() {
        frames.push(running);
    }
    Ok(frames)
}

pub struct PcXtDriver {
    sender: ScanCodeSender,
    pacing: Pacing,
    chunk_size: usize,
    scancodes: HashMap<char, u8>,
    specials: HashMap<&'static str, ScanCode>,
    buffer: Vec<Vec<u8>>,
}

impl PcXtDriver {
    pub fn new(
        sender: impl FnMut(&[u8]) -> anyhow::Result<()> + Send + 'static,
        chunk_size: usize,
        pacing: Pacing,
    ) -> Self {
        Self {
            sender: Box::new(sender),
            pacing,
            chunk_size,
            scancodes: literal_scancodes(),
            specials: special_scancodes(),
            buffer: Vec::new(),
        }
    }

    /// Scancode groups waiting for the next flush.
    pub fn pending(&self) -> &[Vec<u8>] {
        &self.buffer
    }
}

#[async_trait]
impl BootDriver for PcXtDriver {
    async fn send_key(&mut self, ch: char, action: KeyAction) -> Result<()> {
        let code = *self
            .scancodes
            .get(&ch)
            .ok_or(Error::UnmappedCharacter(ch))?;
        let shift = needs_shift(ch);

        let mut group = Vec::with_capacity(4);
        if action.presses() {
            if shift {
                group.push(LEFT_SHIFT);
            }
            group.push(code);
        }
        if action.releases() {
            if shift {
                group.push(LEFT_SHIFT | RELEASE_FLAG);
            }
            group.push(code | RELEASE_FLAG);
        }

        debug!(?ch, code, shift, %action, "buffering scancodes");
        self.buffer.push(group);
        Ok(())
    }

    async fn send_special(&mut self, name: &str, action: KeyAction) -> Result<()> {
        let scancode = self
            .specials
            .get(name.to_ascii_lowercase().as_str())
            .ok_or_else(|| Error::SpecialNotFound(name.to_string()))?;

        debug!(special = name, %action, "buffering scancodes");
        self.buffer.push(scancode.for_action(action));
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        // Taken up front so a failed send never leaves stale codes behind
        let groups = std::mem::take(&mut self.buffer);
        if groups.is_empty() {
            return Ok(());
        }

        for (idx, frame) in chunk_scan_codes(&groups, self.chunk_size)?.iter().enumerate() {
            if idx > 0 {
                self.pacing.pause().await;
            }
            debug!(frame = %hex_frame(frame), "sending scancodes");
            (self.sender)(frame)?;
        }
        Ok(())
    }
}

pub fn hex_frame(frame: &[u8]) -> String {
    frame
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::Recorder;
    use crate::parser::parse;
    use crate::types::Expression;
    use std::time::Duration;
    use tokio::time::Instant;

    fn driver(chunk_size: usize) -> (PcXtDriver, Recorder<Vec<u8>>) {
        let frames = Recorder::default();
        let sink = frames.clone();
        let driver = PcXtDriver::new(
            move |frame: &[u8]| {
                sink.push(frame.to_vec());
                Ok(())
            },
            chunk_size,
            Pacing::immediate(),
        );
        (driver, frames)
    }

    #[tokio::test]
    async fn test_special_actions_case_insensitive() {
        let (mut driver, _) = driver(0);
        let sequence = parse("<rightShift><rightshiftoff><RIGHTSHIFTON>").unwrap();
        for expression in &sequence {
            match expression {
                Expression::Special { name, action } => {
                    driver.send_special(name, *action).await.unwrap()
                }
                other => panic!("unexpected {other}"),
            }
        }

        let pending: Vec<String> = driver.pending().iter().map(|g| hex_frame(g)).collect();
        assert_eq!(pending, ["36 b6", "b6", "36"]);
    }

    #[tokio::test]
    async fn test_every_literal_is_make_then_break() {
        let (mut driver, _) = driver(0);
        let chars: Vec<char> = literal_scancodes().into_keys().collect();

        for ch in chars {
            driver.send_key(ch, KeyAction::Press).await.unwrap();
            let group = driver.pending().last().unwrap().clone();
            let code = literal_scancodes()[&ch];

            if needs_shift(ch) {
                assert_eq!(group, vec![0x2a, code, 0xaa, code | 0x80], "{ch:?}");
            } else {
                assert_eq!(group, vec![code, code | 0x80], "{ch:?}");
            }
        }
    }

    #[tokio::test]
    async fn test_literal_on_off() {
        let (mut driver, _) = driver(0);
        driver.send_key('a', KeyAction::On).await.unwrap();
        driver.send_key('a', KeyAction::Off).await.unwrap();
        driver.send_key('A', KeyAction::On).await.unwrap();
        assert_eq!(
            driver.pending(),
            &[vec![0x1e], vec![0x9e], vec![0x2a, 0x1e]]
        );
    }

    #[tokio::test]
    async fn test_extended_special() {
        let (mut driver, _) = driver(0);
        driver.send_special("pageDown", KeyAction::Press).await.unwrap();
        driver.send_special("f10", KeyAction::Press).await.unwrap();
        assert_eq!(
            driver.pending(),
            &[vec![0xe0, 0x51, 0xe0, 0xd1], vec![0x44, 0xc4]]
        );
    }

    #[tokio::test]
    async fn test_unknown_special() {
        let (mut driver, _) = driver(0);
        let err = driver
            .send_special("nonexistentkey", KeyAction::Press)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SpecialNotFound(_)));
        assert!(err.to_string().contains("nonexistentkey"));
        assert!(driver.pending().is_empty());
    }

    #[tokio::test]
    async fn test_unmapped_character() {
        let (mut driver, _) = driver(0);
        let err = driver.send_key('é', KeyAction::Press).await.unwrap_err();
        assert!(matches!(err, Error::UnmappedCharacter('é')));
    }

    #[tokio::test]
    async fn test_flush_chunks_and_clears() {
        let (mut driver, frames) = driver(4);
        for ch in "aB".chars() {
            driver.send_key(ch, KeyAction::Press).await.unwrap();
        }
        driver.send_special("up", KeyAction::Press).await.unwrap();
        driver.flush().await.unwrap();

        assert!(driver.pending().is_empty());
        assert_eq!(
            frames.take(),
            vec![
                vec![0x1e, 0x9e],
                vec![0x2a, 0x30, 0xaa, 0xb0],
                vec![0xe0, 0x48, 0xe0, 0xc8],
            ]
        );

        // Nothing buffered, nothing sent
        driver.flush().await.unwrap();
        assert!(frames.take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_pauses_between_frames() {
        let frames = Recorder::default();
        let sink = frames.clone();
        let mut driver = PcXtDriver::new(
            move |frame: &[u8]| {
                sink.push(frame.to_vec());
                Ok(())
            },
            2,
            Pacing::new(Duration::from_millis(100)),
        );
        for ch in "abc".chars() {
            driver.send_key(ch, KeyAction::Press).await.unwrap();
        }

        let start = Instant::now();
        driver.flush().await.unwrap();
        assert_eq!(frames.take().len(), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(200));

        // A single frame goes out without any pause
        driver.send_key('d', KeyAction::Press).await.unwrap();
        let start = Instant::now();
        driver.flush().await.unwrap();
        assert_eq!(frames.take(), vec![vec![0x20, 0xa0]]);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_flush_clears_on_send_error() {
        let mut driver = PcXtDriver::new(
            |_: &[u8]| Err(anyhow::anyhow!("serial port gone")),
            0,
            Pacing::immediate(),
        );
        driver.send_key('x', KeyAction::Press).await.unwrap();

        let err = driver.flush().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(err.to_string(), "serial port gone");
        assert!(driver.pending().is_empty());
    }

    #[tokio::test]
    async fn test_flush_rejects_oversized_group() {
        let (mut driver, frames) = driver(2);
        driver.send_key('A', KeyAction::Press).await.unwrap();
        assert!(matches!(driver.flush().await, Err(Error::Internal(_))));
        assert!(driver.pending().is_empty());
        assert!(frames.take().is_empty());
    }

    #[tokio::test]
    async fn test_reboot_sends_chord() {
        let (mut driver, frames) = driver(0);
        driver.reboot().await.unwrap();
        assert_eq!(
            frames.take(),
            vec![vec![0x1d, 0x38, 0xe0, 0x53, 0xe0, 0xd3, 0xb8, 0x9d]]
        );
    }

    #[test]
    fn test_chunking_properties() {
        let groups: Vec<Vec<u8>> = vec![
            vec![0x1e, 0x9e],
            vec![0x2a, 0x30, 0xaa, 0xb0],
            vec![0x36],
            vec![0xe0, 0x48, 0xe0, 0xc8],
            vec![0x1c, 0x9c],
            vec![0xb6],
        ];
        let flat: Vec<u8> = groups.concat();

        for size in 4..=12 {
            let frames = chunk_scan_codes(&groups, size).unwrap();
            assert!(frames.iter().all(|f| f.len() <= size), "size {size}");
            assert_eq!(frames.concat(), flat, "size {size}");

            // Every frame boundary falls on a group boundary
            let mut boundaries = vec![0];
            for group in &groups {
                boundaries.push(boundaries.last().unwrap() + group.len());
            }
            let mut offset = 0;
            for frame in &frames {
                offset += frame.len();
                assert!(boundaries.contains(&offset), "size {size}");
            }
        }
    }

    #[test]
    fn test_chunking_unbounded() {
        let groups = vec![vec![1, 2], vec![3], vec![4, 5, 6]];
        assert_eq!(
            chunk_scan_codes(&groups, 0).unwrap(),
            vec![vec![1, 2, 3, 4, 5, 6]]
        );
        assert!(chunk_scan_codes(&[], 3).unwrap().is_empty());
    }

    #[test]
    fn test_chunking_rejects_wide_group() {
        let groups = vec![vec![1, 2, 3]];
        assert!(matches!(
            chunk_scan_codes(&groups, 2),
            Err(Error::Internal(_))
        ));
    }
}
