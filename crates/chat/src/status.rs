use std::time::{Duration, Instant};

pub const DEFAULT_NOTICE_TTL: Duration = Duration::from_millis(3000);

/// Identifier of one posted notice; a newer notice always gets a larger id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoticeId(pub u64);

impl NoticeId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Failure,
}

/// Short-lived status text. Replaced, never queued, by a newer notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientNotice {
    pub id: NoticeId,
    pub kind: NoticeKind,
    pub text: String,
    pub ttl: Duration,
}

/// Request to clear notice `id` once `ttl` has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoticeTimer {
    pub id: NoticeId,
    pub ttl: Duration,
}

/// Session flags read by the presentation layer alongside the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub awaiting_reply: bool,
    pub long_task_in_progress: bool,
    pub transient_notice: Option<TransientNotice>,
    pub awaiting_since: Option<Instant>,
    pub transport_closed: bool,
}

impl SessionStatus {
    /// Updates `awaiting_reply`, stamping the moment it turns on.
    pub fn set_awaiting_reply(&mut self, awaiting: bool) {
        if awaiting && !self.awaiting_reply {
            self.awaiting_since = Some(Instant::now());
        }
        if !awaiting {
            self.awaiting_since = None;
        }
        self.awaiting_reply = awaiting;
    }

    /// True when input is blocked because a reply or a long task is still running.
    pub fn input_blocked(&self) -> bool {
        self.awaiting_reply || self.long_task_in_progress
    }

    /// How long the current reply has been outstanding.
    pub fn awaiting_for(&self, now: Instant) -> Option<Duration> {
        self.awaiting_since
            .map(|since| now.saturating_duration_since(since))
    }
}
