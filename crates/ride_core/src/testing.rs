//! In-memory collaborators for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};

use crate::channel::{ChannelError, OutboundChannel};
use crate::clock::Clock;

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub recipient: String,
    pub text: String,
    pub choices: Option<Vec<String>>,
}

/// Outbound channel that records every message instead of delivering it.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<SentMessage>>,
    failing: AtomicBool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail with `ChannelError::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn messages_to(&self, recipient: &str) -> Vec<SentMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.recipient == recipient)
            .collect()
    }

    pub fn count_containing(&self, recipient: &str, needle: &str) -> usize {
        self.messages_to(recipient)
            .iter()
            .filter(|m| m.text.contains(needle))
            .count()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

#[async_trait]
impl OutboundChannel for RecordingChannel {
    async fn send(
        &self,
        recipient: &str,
        text: &str,
        choices: Option<&[String]>,
    ) -> Result<bool, ChannelError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable("recording channel set to fail".into()));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| ChannelError::Unavailable("recording channel poisoned".into()))?;
        sent.push(SentMessage {
            recipient: recipient.to_string(),
            text: text.to_string(),
            choices: choices.map(<[String]>::to_vec),
        });
        Ok(true)
    }
}

/// Clock pinned to a settable instant.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        if let Ok(mut current) = self.now.lock() {
            *current = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut current) = self.now.lock() {
            *current += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
