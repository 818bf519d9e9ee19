// SPDX-License-Identifier: GPL-2.0-or-later

//! Process-wide structured logger: a `tokio::sync::broadcast` feed that
//! timestamps and fans out `LogEntry`s, printing each to stdout as it
//! arrives. Every component depends on `common::ArcLogger`, not this
//! concrete type, so tests can substitute `common::DummyLogger`.

use common::{ILogger, LogEntry, LogLevel, LogSource, VideoId};
use serde::Serialize;
use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::sync::broadcast;

/// Logger used everywhere across the application.
pub struct Logger {
    feed: broadcast::Sender<LogEntryWithTime>,
}

impl Logger {
    /// Creates a new logger with a bounded feed; slow subscribers lag rather
    /// than back-pressure log producers.
    #[must_use]
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(256);
        Self { feed }
    }

    /// Subscribes to the log feed, receiving all entries logged from this
    /// point forward.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntryWithTime> {
        self.feed.subscribe()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl ILogger for Logger {
    fn log(&self, log: LogEntry) {
        let log = LogEntryWithTime {
            level: log.level,
            source: log.source,
            video_id: log.video_id,
            message: log.message.to_string(),
            time: UnixMicro::now(),
        };

        println!("{log}");

        // Only errors if there are no subscribers.
        self.feed.send(log).ok();
    }
}

/// Microseconds since the Unix epoch.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct UnixMicro(u64);

impl UnixMicro {
    fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_micros();
        UnixMicro(u64::try_from(micros).unwrap_or(u64::MAX))
    }
}

/// A log entry with its timestamp applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogEntryWithTime {
    pub level: LogLevel,
    pub source: LogSource,
    #[serde(rename = "videoId", skip_serializing_if = "Option::is_none")]
    pub video_id: Option<VideoId>,
    pub message: String,
    pub time: UnixMicro,
}

impl fmt::Display for LogEntryWithTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            LogLevel::Error => write!(f, "[ERROR] ")?,
            LogLevel::Warning => write!(f, "[WARNING] ")?,
            LogLevel::Info => write!(f, "[INFO] ")?,
            LogLevel::Debug => write!(f, "[DEBUG] ")?,
        };

        if let Some(video_id) = &self.video_id {
            write!(f, "{video_id}: ")?;
        }

        let mut src_title = self.source.to_string();
        make_ascii_titlecase(&mut src_title);

        write!(f, "{}: {}", src_title, self.message)
    }
}

fn make_ascii_titlecase(s: &mut str) {
    if let Some(r) = s.get_mut(0..1) {
        r.make_ascii_uppercase();
    }
}
