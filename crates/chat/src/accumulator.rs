use std::fmt;
use std::sync::Arc;

use crate::error::SanitizerResult;
use crate::message::{ChatRequest, Message};
use crate::sanitizer::{ControlMarkers, Sanitizer, StreamSanitizer};
use crate::status::SessionStatus;

/// Reason a submit was discarded. Rejected input is never queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejection {
    AwaitingReply,
    LongTaskInProgress,
    EmptyInput,
}

impl fmt::Display for SubmitRejection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::AwaitingReply => "still waiting for the assistant to finish replying",
            Self::LongTaskInProgress => "a report is being generated",
            Self::EmptyInput => "message is empty",
        };
        formatter.write_str(reason)
    }
}

/// How a chunk was folded into the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Started,
    Appended,
}

/// Owns the transcript and turns chunk/done/error events into transcript mutations.
///
/// `active` holds the raw-stream sanitizer of the trailing assistant message and is
/// `Some` exactly when that message is still incomplete. Messages are shared with
/// published snapshots, so only the one being changed is ever copied.
#[derive(Debug, Clone)]
pub struct MessageAccumulator {
    template: StreamSanitizer,
    greeting: Option<String>,
    messages: Vec<Arc<Message>>,
    active: Option<StreamSanitizer>,
}

impl MessageAccumulator {
    pub fn new(markers: ControlMarkers, greeting: Option<String>) -> SanitizerResult<Self> {
        let sanitizer = Sanitizer::new(&markers)?;
        let greeting = greeting
            .map(|text| sanitizer.sanitize(&text))
            .filter(|text| !text.trim().is_empty());

        let mut accumulator = Self {
            template: StreamSanitizer::new(markers)?,
            greeting,
            messages: Vec::new(),
            active: None,
        };
        accumulator.seed();
        Ok(accumulator)
    }

    pub fn messages(&self) -> &[Arc<Message>] {
        &self.messages
    }

    /// True while the trailing assistant message is still receiving chunks.
    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    pub fn apply_chunk(
        &mut self,
        content: &str,
        variant: Option<String>,
        status: &mut SessionStatus,
    ) -> ChunkOutcome {
        status.set_awaiting_reply(true);

        if let Some(sanitizer) = self.active.as_mut()
            && let Some(message) = self.messages.last_mut()
        {
            sanitizer.push(content);
            let message = Arc::make_mut(message);
            message.content = sanitizer.rendered();
            if message.variant.is_none() {
                message.variant = variant;
            }
            return ChunkOutcome::Appended;
        }

        let mut sanitizer = self.template.clone();
        sanitizer.push(content);
        self.messages.push(Arc::new(Message::assistant_streaming(
            sanitizer.rendered(),
            variant,
        )));
        self.active = Some(sanitizer);
        tracing::trace!(
            message_index = self.messages.len() - 1,
            "started streaming assistant message"
        );
        ChunkOutcome::Started
    }

    /// Completes the trailing assistant message. Returns false when nothing was in flight.
    pub fn apply_done(&mut self, status: &mut SessionStatus) -> bool {
        status.set_awaiting_reply(false);

        if self.seal_trailing() {
            return true;
        }

        tracing::debug!("done received without an in-flight assistant message; ignoring");
        false
    }

    /// Unblocks input after a peer error. The transcript is left exactly as it is.
    pub fn apply_error(&self, content: &str, status: &mut SessionStatus) {
        tracing::error!(error = %content, "peer reported an error");
        status.set_awaiting_reply(false);
    }

    /// Appends a user turn and returns the request to send, or rejects without side effects.
    pub fn submit(
        &mut self,
        input: &str,
        status: &mut SessionStatus,
    ) -> Result<ChatRequest, SubmitRejection> {
        if status.awaiting_reply {
            return Err(SubmitRejection::AwaitingReply);
        }
        if status.long_task_in_progress {
            return Err(SubmitRejection::LongTaskInProgress);
        }
        if input.trim().is_empty() {
            return Err(SubmitRejection::EmptyInput);
        }

        // A reply cut short by a peer error stays incomplete until the next user turn.
        if self.seal_trailing() {
            tracing::debug!("sealed interrupted assistant message before new user turn");
        }

        let request = ChatRequest::new(input, &self.messages);
        self.messages.push(Arc::new(Message::user(input)));
        status.set_awaiting_reply(true);
        Ok(request)
    }

    /// Resets to the seed transcript. `long_task_in_progress` is left untouched.
    pub fn clear(&mut self, status: &mut SessionStatus) {
        self.seed();
        status.set_awaiting_reply(false);
    }

    fn seed(&mut self) {
        self.active = None;
        self.messages.clear();
        if let Some(greeting) = &self.greeting {
            self.messages
                .push(Arc::new(Message::assistant_completed(greeting.clone())));
        }
    }

    fn seal_trailing(&mut self) -> bool {
        if self.active.take().is_none() {
            return false;
        }

        if let Some(message) = self.messages.last_mut() {
            Arc::make_mut(message).completed = true;
        }
        true
    }
}
