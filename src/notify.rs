//! User-facing notices raised by the session layer.
//!
//! Many requests can fail at the same moment (a burst of 429s, an expired
//! session hit by every open view), so identical messages emitted within the
//! configured window are collapsed into one before reaching the sink.

use crate::clock::Clock;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Destination for notices, e.g. a toast area or a terminal.
pub trait NoticeSink: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Sink that forwards notices to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NoticeSink for TracingSink {
    fn notify(&self, notice: &Notice) {
        match notice.level {
            NoticeLevel::Info => info!(target: "admin_session::notice", "{}", notice.message),
            NoticeLevel::Warning => warn!(target: "admin_session::notice", "{}", notice.message),
            NoticeLevel::Error => error!(target: "admin_session::notice", "{}", notice.message),
        }
    }
}

/// Sink that records notices, used in tests and by embedders that render them later.
#[derive(Debug, Default)]
pub struct RecordingSink {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.notices().into_iter().map(|n| n.message).collect()
    }
}

impl NoticeSink for RecordingSink {
    fn notify(&self, notice: &Notice) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice.clone());
    }
}

/// De-duplicating front for a [`NoticeSink`].
pub struct Notifier {
    sink: Arc<dyn NoticeSink>,
    clock: Arc<dyn Clock>,
    window_ms: i64,
    recent: Mutex<HashMap<String, i64>>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NoticeSink>, clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            sink,
            clock,
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Forwards the notice unless the same message was emitted within the window.
    /// Returns whether the notice reached the sink.
    pub fn notify(&self, notice: Notice) -> bool {
        let now = self.clock.now_ms();
        {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(last) = recent.get(&notice.message) {
                if now.saturating_sub(*last) < self.window_ms {
                    return false;
                }
            }
            recent.retain(|_, last| now.saturating_sub(*last) < self.window_ms);
            recent.insert(notice.message.clone(), now);
        }
        self.sink.notify(&notice);
        true
    }
}
