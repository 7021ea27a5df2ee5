#![deny(unsafe_code)]

//! Client-side state machine for a streaming chat session.
//!
//! Raw inbound frames are decoded into [`InboundEvent`]s and folded into a sanitized
//! transcript plus [`SessionStatus`] flags. Observers receive a [`SessionSnapshot`] after
//! every state change and render it with a [`TranscriptRenderer`].

pub mod accumulator;
pub mod error;
/// Inbound wire events and the frame decoder.
pub mod events;
/// Transcript entities and the outbound request shape.
pub mod message;
pub mod render;
/// Control-marker stripping, both full-text and incremental.
pub mod sanitizer;
pub mod session;
/// Long-task tracking and file deliveries.
pub mod side_channel;
pub mod status;

pub use accumulator::{ChunkOutcome, MessageAccumulator, SubmitRejection};
pub use error::{DecodeError, SanitizerError, SaveError};
pub use events::{FileDelivery, InboundEvent, decode_frame};
pub use message::{ChatRequest, HistoryEntry, Message, Role, transcript_is_well_formed};
pub use render::{HtmlRenderer, PlainTextRenderer, TranscriptRenderer, escape_html};
pub use sanitizer::{ControlMarkers, Sanitizer, StreamSanitizer};
pub use session::{ChatSession, SessionConfig, SessionSnapshot};
pub use side_channel::{DiskFileSaver, FileSaver, MimeKind, SaveAction, SideChannelCoordinator};
pub use status::{NoticeId, NoticeKind, NoticeTimer, SessionStatus, TransientNotice};
