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

//! Playback of boot commands
//!
//! Runs expressions against a driver with cancellation checked between
//! expressions and during waits

use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::driver::BootDriver;
use crate::error::{Error, Result};
use crate::parser::parse;
use crate::types::{Expression, ExpressionSequence};

impl Expression {
    pub async fn run<D>(&self, driver: &mut D, cancel: &CancellationToken) -> Result<()>
    where
        D: BootDriver + ?Sized,
    {
        match self {
            Expression::Wait(duration) => {
                // Everything typed before the wait must reach the guest first
                driver.flush().await?;
                debug!(?duration, "waiting");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    _ = sleep(*duration) => Ok(()),
                }
            }
            Expression::Literal { ch, action } => driver.send_key(*ch, *action).await,
            Expression::Special { name, action } => driver.send_special(name, *action).await,
        }
    }
}

impl ExpressionSequence {
    pub async fn run<D>(&self, driver: &mut D, cancel: &CancellationToken) -> Result<()>
    where
        D: BootDriver + ?Sized,
    {
        let errors = self.validate();
        if !errors.is_empty() {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(Error::Internal(format!(
                "boot command failed validation: {}",
                messages.join("; ")
            )));
        }

        for expression in self {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            expression.run(driver, cancel).await?;
        }

        driver.flush().await
    }
}

pub struct PlaybackEngine<D> {
    driver: D,
    cancel: CancellationToken,
    boot_wait: Duration,
}

impl<D: BootDriver> PlaybackEngine<D> {
    pub fn new(driver: D, cancel: CancellationToken) -> Self {
        Self {
            driver,
            cancel,
            boot_wait: Duration::ZERO,
        }
    }

    /// Time to let the guest boot before the first key goes out.
    pub fn with_boot_wait(mut self, boot_wait: Duration) -> Self {
        self.boot_wait = boot_wait;
        self
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    pub async fn execute(&mut self, command: &str) -> Result<()> {
        let sequence = parse(command)?;

        if !self.boot_wait.is_zero() {
            info!(boot_wait = ?self.boot_wait, "waiting for boot");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep(self.boot_wait) => {}
            }
        }

        info!(expressions = sequence.len(), "typing boot command");
        sequence.run(&mut self.driver, &self.cancel).await?;
        info!("boot command complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Pacing;
    use crate::driver::testing::Recorder;
    use crate::pcxt::PcXtDriver;
    use crate::types::KeyAction;
    use async_trait::async_trait;
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Key(char, KeyAction),
        Special(String, KeyAction),
        Flush,
    }

    #[derive(Default)]
    struct RecordingDriver {
        calls: Recorder<Call>,
        fail_on: Option<char>,
    }

    #[async_trait]
    impl BootDriver for RecordingDriver {
        async fn send_key(&mut self, ch: char, action: KeyAction) -> Result<()> {
            if self.fail_on == Some(ch) {
                return Err(anyhow::anyhow!("link down").into());
            }
            self.calls.push(Call::Key(ch, action));
            Ok(())
        }

        async fn send_special(&mut self, name: &str, action: KeyAction) -> Result<()> {
            self.calls.push(Call::Special(name.to_string(), action));
            Ok(())
        }

        async fn flush(&mut self) -> Result<()> {
            self.calls.push(Call::Flush);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sequence() {
        let mut driver = RecordingDriver::default();
        let cancel = CancellationToken::new();
        let start = Instant::now();

        parse("a<wait2s><enter>")
            .unwrap()
            .run(&mut driver, &cancel)
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(
            driver.calls.take(),
            vec![
                Call::Key('a', KeyAction::Press),
                Call::Flush,
                Call::Special("enter".into(), KeyAction::Press),
                Call::Flush,
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_sequence_only_flushes() {
        let mut driver = RecordingDriver::default();
        parse("")
            .unwrap()
            .run(&mut driver, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(driver.calls.take(), vec![Call::Flush]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait() {
        let mut driver = RecordingDriver::default();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = parse("x<wait1h>y")
            .unwrap()
            .run(&mut driver, &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(60));
        // Nothing after the wait is typed, and no final flush
        assert_eq!(
            driver.calls.take(),
            vec![Call::Key('x', KeyAction::Press), Call::Flush]
        );
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let mut driver = RecordingDriver::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = parse("abc").unwrap().run(&mut driver, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(driver.calls.take().is_empty());
    }

    #[tokio::test]
    async fn test_error_stops_without_flush() {
        let mut driver = RecordingDriver {
            fail_on: Some('b'),
            ..Default::default()
        };
        let err = parse("abc")
            .unwrap()
            .run(&mut driver, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "link down");
        assert_eq!(driver.calls.take(), vec![Call::Key('a', KeyAction::Press)]);
    }

    #[tokio::test]
    async fn test_invalid_sequence_is_internal_error() {
        let mut driver = RecordingDriver::default();
        let sequence = ExpressionSequence::new(vec![
            Expression::literal('a'),
            Expression::Wait(Duration::ZERO),
        ]);

        let err = sequence
            .run(&mut driver, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(driver.calls.take().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_special_name_fails_at_send() {
        let frames: Recorder<Vec<u8>> = Recorder::default();
        let sink = frames.clone();
        let mut driver = PcXtDriver::new(
            move |frame: &[u8]| {
                sink.push(frame.to_vec());
                Ok(())
            },
            0,
            Pacing::immediate(),
        );
        let sequence = ExpressionSequence::new(vec![
            Expression::literal('a'),
            Expression::special("nonexistentkey", KeyAction::Press),
        ]);

        let err = sequence
            .run(&mut driver, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "special nonexistentkey not found");
        assert!(frames.take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_boot_wait() {
        let mut engine = PlaybackEngine::new(RecordingDriver::default(), CancellationToken::new())
            .with_boot_wait(Duration::from_secs(10));

        let start = Instant::now();
        engine.execute("<leftCtrlOn>c<leftCtrlOff>").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(10));

        assert_eq!(
            engine.into_driver().calls.take(),
            vec![
                Call::Special("leftCtrl".into(), KeyAction::On),
                Call::Key('c', KeyAction::Press),
                Call::Special("leftCtrl".into(), KeyAction::Off),
                Call::Flush,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_cancelled_during_boot_wait() {
        let cancel = CancellationToken::new();
        let mut engine = PlaybackEngine::new(RecordingDriver::default(), cancel.clone())
            .with_boot_wait(Duration::from_secs(10));
        cancel.cancel();

        assert!(engine.execute("abc").await.unwrap_err().is_cancelled());
        assert!(engine.driver().calls.take().is_empty());
    }

    #[tokio::test]
    async fn test_engine_rejects_bad_command() {
        let mut engine = PlaybackEngine::new(RecordingDriver::default(), CancellationToken::new());
        let err = engine.execute("<wait1s-2m>").await.unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[tokio::test]
    async fn test_engine_works_with_boxed_driver() {
        let driver: Box<dyn BootDriver> = Box::new(RecordingDriver::default());
        let mut engine = PlaybackEngine::new(driver, CancellationToken::new());
        engine.execute("<f1>").await.unwrap();
    }
}
