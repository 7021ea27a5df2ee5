use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::accumulator::{MessageAccumulator, SubmitRejection};
use crate::error::{SanitizerResult, SaveResult};
use crate::events::{InboundEvent, decode_frame};
use crate::message::{ChatRequest, Message};
use crate::sanitizer::ControlMarkers;
use crate::side_channel::{FileSaver, SaveAction, SideChannelCoordinator};
use crate::status::{DEFAULT_NOTICE_TTL, NoticeId, NoticeTimer, SessionStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub markers: ControlMarkers,
    pub greeting: Option<String>,
    pub notice_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            markers: ControlMarkers::default(),
            greeting: None,
            notice_ttl: DEFAULT_NOTICE_TTL,
        }
    }
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub transcript: Arc<[Arc<Message>]>,
    pub status: SessionStatus,
}

/// Owner of the transcript and session status for one transport session.
///
/// All mutation goes through `&mut self`, so event handling is strictly sequential.
/// Observers only ever see published snapshots.
pub struct ChatSession {
    accumulator: MessageAccumulator,
    coordinator: SideChannelCoordinator,
    status: SessionStatus,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl ChatSession {
    pub fn new(config: SessionConfig) -> SanitizerResult<Self> {
        let accumulator = MessageAccumulator::new(config.markers, config.greeting)?;
        let status = SessionStatus::default();
        let (snapshot_tx, _) = watch::channel(SessionSnapshot {
            transcript: Arc::from(accumulator.messages()),
            status: status.clone(),
        });

        Ok(Self {
            accumulator,
            coordinator: SideChannelCoordinator::new(config.notice_ttl),
            status,
            snapshot_tx,
        })
    }

    /// Subscribes to snapshots published after every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn messages(&self) -> &[Arc<Message>] {
        self.accumulator.messages()
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    /// Decodes and applies one raw frame, saving any delivered file on the calling thread.
    pub fn handle_frame(&mut self, frame: &str, saver: &dyn FileSaver) -> Option<NoticeTimer> {
        let action = self.apply_frame(frame)?;
        let outcome = saver.save(&action);
        Some(self.finish_save(&action.filename, outcome))
    }

    /// Applies one decoded event, saving any delivered file on the calling thread.
    /// Returns a timer when a notice was posted.
    pub fn handle_event(
        &mut self,
        event: InboundEvent,
        saver: &dyn FileSaver,
    ) -> Option<NoticeTimer> {
        let action = self.apply_event(event)?;
        let outcome = saver.save(&action);
        Some(self.finish_save(&action.filename, outcome))
    }

    /// Decodes and applies one raw frame. Undecodable frames are logged and dropped.
    ///
    /// A file delivery changes nothing yet: the returned action must be saved by the
    /// caller and the outcome reported through [`ChatSession::finish_save`].
    pub fn apply_frame(&mut self, frame: &str) -> Option<SaveAction> {
        match decode_frame(frame) {
            Ok(event) => self.apply_event(event),
            Err(error) => {
                tracing::warn!(error = %error, frame_len = frame.len(), "dropping undecodable frame");
                None
            }
        }
    }

    pub fn apply_event(&mut self, event: InboundEvent) -> Option<SaveAction> {
        tracing::trace!(kind = %event.kind(), "handling inbound event");

        match event {
            InboundEvent::Chunk { content, variant } => {
                self.accumulator
                    .apply_chunk(&content, variant, &mut self.status);
            }
            InboundEvent::Done => {
                self.accumulator.apply_done(&mut self.status);
            }
            InboundEvent::Error { content } => {
                self.accumulator.apply_error(&content, &mut self.status);
            }
            InboundEvent::ReportStart => self.coordinator.report_started(&mut self.status),
            InboundEvent::ReportEnd => self.coordinator.report_finished(&mut self.status),
            InboundEvent::FileDelivery(delivery) => {
                tracing::debug!(filename = %delivery.filename, "file delivery awaiting save");
                return Some(SaveAction::from(delivery));
            }
            InboundEvent::Unknown { kind } => {
                tracing::debug!(kind = %kind, "ignoring unknown event kind");
                return None;
            }
        }

        self.publish();
        None
    }

    /// Posts the notice for a finished save and returns the timer that clears it.
    pub fn finish_save(&mut self, filename: &str, outcome: SaveResult<PathBuf>) -> NoticeTimer {
        let timer = self
            .coordinator
            .record_save(filename, outcome, &mut self.status);
        self.publish();
        timer
    }

    /// Appends a user turn and returns the request for the transport.
    pub fn submit(&mut self, input: &str) -> Result<ChatRequest, SubmitRejection> {
        let request = self.accumulator.submit(input, &mut self.status)?;
        self.publish();
        Ok(request)
    }

    pub fn clear(&mut self) {
        self.accumulator.clear(&mut self.status);
        self.publish();
    }

    /// Clears notice `id` unless a newer notice replaced it.
    pub fn expire_notice(&mut self, id: NoticeId) -> bool {
        let expired = self.coordinator.expire_notice(id, &mut self.status);
        if expired {
            self.publish();
        }
        expired
    }

    /// Records that the event stream ended. An in-flight reply stays incomplete.
    pub fn mark_transport_closed(&mut self) {
        if self.status.awaiting_reply {
            tracing::warn!("transport closed while awaiting a reply; input stays blocked");
        }
        self.status.transport_closed = true;
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(SessionSnapshot {
            transcript: Arc::from(self.accumulator.messages()),
            status: self.status.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use proptest::prelude::*;

    use super::*;
    use crate::error::SaveResult;
    use crate::message::{Role, transcript_is_well_formed};
    use crate::sanitizer::Sanitizer;
    use crate::side_channel::{MimeKind, SaveAction};

    #[derive(Default)]
    struct MemorySaver {
        saved: Mutex<Vec<SaveAction>>,
    }

    impl FileSaver for MemorySaver {
        fn save(&self, action: &SaveAction) -> SaveResult<PathBuf> {
            self.saved.lock().unwrap().push(action.clone());
            Ok(PathBuf::from(&action.filename))
        }
    }

    fn session() -> ChatSession {
        ChatSession::new(SessionConfig::default()).unwrap()
    }

    fn feed(session: &mut ChatSession, frames: &[&str]) {
        let saver = MemorySaver::default();
        for frame in frames {
            session.handle_frame(frame, &saver);
        }
    }

    #[test]
    fn split_tool_call_marker_is_removed_from_final_message() {
        let mut session = session();
        feed(
            &mut session,
            &[
                r#"{"type":"chunk","content":"[start tool call] abc"}"#,
                r#"{"type":"chunk","content":"def [end tool call] visible"}"#,
                r#"{"type":"done"}"#,
            ],
        );

        let message = &session.messages()[0];
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, "visible");
        assert!(message.completed);
        assert!(!session.status().awaiting_reply);
    }

    #[test]
    fn report_lifecycle_leaves_transcript_unchanged() {
        let mut session = session();
        feed(
            &mut session,
            &[
                r#"{"type":"chunk","content":"analysis"}"#,
                r#"{"type":"done"}"#,
            ],
        );
        let before = session.messages().to_vec();

        feed(&mut session, &[r#"{"type":"report_start","content":""}"#]);
        assert!(session.status().long_task_in_progress);
        assert_eq!(session.messages(), before.as_slice());

        feed(&mut session, &[r#"{"type":"report_end","content":""}"#]);
        assert!(!session.status().long_task_in_progress);
        assert_eq!(session.messages(), before.as_slice());
    }

    #[test]
    fn submit_while_awaiting_publishes_nothing() {
        let mut session = session();
        session.submit("first").unwrap();
        let mut observer = session.subscribe();
        observer.mark_unchanged();
        let before = session.snapshot();

        assert_eq!(
            session.submit("second"),
            Err(SubmitRejection::AwaitingReply)
        );

        assert!(!observer.has_changed().unwrap());
        assert_eq!(session.snapshot(), before);
        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn submit_is_blocked_during_report_generation() {
        let mut session = session();
        feed(&mut session, &[r#"{"type":"report_start"}"#]);

        assert_eq!(
            session.submit("hello"),
            Err(SubmitRejection::LongTaskInProgress)
        );
        assert!(session.messages().is_empty());
    }

    #[test]
    fn file_download_saves_with_mime_and_posts_notice() {
        let mut session = session();
        let saver = MemorySaver::default();

        let html = session.handle_frame(
            r#"{"type":"file_download","filename":"report.html","content":"<p>x</p>","file_type":"html"}"#,
            &saver,
        );
        let markdown = session.handle_frame(
            r##"{"type":"file_download","filename":"report.md","content":"# x"}"##,
            &saver,
        );

        let saved = saver.saved.lock().unwrap();
        assert_eq!(saved[0].mime, MimeKind::TextHtml);
        assert_eq!(saved[1].mime, MimeKind::TextMarkdown);
        assert!(session.messages().is_empty());

        let (html, markdown) = (html.unwrap(), markdown.unwrap());
        assert!(!session.expire_notice(html.id));
        assert!(session.status().transient_notice.is_some());
        assert!(session.expire_notice(markdown.id));
        assert!(session.status().transient_notice.is_none());
    }

    #[test]
    fn error_event_only_clears_awaiting_reply() {
        let mut session = session();
        session.submit("question").unwrap();
        feed(&mut session, &[r#"{"type":"chunk","content":"partial"}"#]);
        let before = session.messages().to_vec();

        feed(&mut session, &[r#"{"type":"error","content":"model overloaded"}"#]);

        assert_eq!(session.messages(), before.as_slice());
        assert!(!session.status().awaiting_reply);
    }

    #[test]
    fn garbage_and_unknown_frames_change_nothing() {
        let mut session = session();
        let mut observer = session.subscribe();
        observer.mark_unchanged();

        feed(
            &mut session,
            &["{not json", "42", r#"{"type":"presence","user":"x"}"#],
        );

        assert!(!observer.has_changed().unwrap());
        assert!(session.messages().is_empty());
    }

    #[test]
    fn clear_resets_transcript_but_not_long_task() {
        let mut session = ChatSession::new(SessionConfig {
            greeting: Some("Hello!".into()),
            ..SessionConfig::default()
        })
        .unwrap();
        session.submit("q").unwrap();
        feed(
            &mut session,
            &[
                r#"{"type":"chunk","content":"a"}"#,
                r#"{"type":"report_start"}"#,
            ],
        );

        session.clear();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.transcript.len(), 1);
        assert_eq!(snapshot.transcript[0].content, "Hello!");
        assert!(!snapshot.status.awaiting_reply);
        assert!(snapshot.status.long_task_in_progress);
    }

    #[test]
    fn transport_close_keeps_incomplete_message() {
        let mut session = session();
        session.submit("q").unwrap();
        feed(&mut session, &[r#"{"type":"chunk","content":"half"}"#]);

        session.mark_transport_closed();

        let snapshot = session.snapshot();
        assert!(snapshot.status.transport_closed);
        assert!(snapshot.status.awaiting_reply);
        assert!(!snapshot.transcript[1].completed);
    }

    #[test]
    fn publishing_a_chunk_shares_untouched_messages_with_the_previous_snapshot() {
        let mut session = ChatSession::new(SessionConfig {
            greeting: Some("Hello!".into()),
            ..SessionConfig::default()
        })
        .unwrap();
        session.submit("q").unwrap();
        feed(&mut session, &[r#"{"type":"chunk","content":"par"}"#]);
        let before = session.snapshot();

        feed(&mut session, &[r#"{"type":"chunk","content":"tial"}"#]);
        let after = session.snapshot();

        assert!(Arc::ptr_eq(&before.transcript[0], &after.transcript[0]));
        assert!(Arc::ptr_eq(&before.transcript[1], &after.transcript[1]));
        assert!(!Arc::ptr_eq(&before.transcript[2], &after.transcript[2]));
        assert_eq!(before.transcript[2].content, "par");
        assert_eq!(after.transcript[2].content, "partial");
    }

    #[tokio::test]
    async fn observers_receive_published_snapshots() {
        let mut session = session();
        let mut observer = session.subscribe();

        let reader = tokio::spawn(async move {
            loop {
                observer.changed().await.unwrap();
                let done = observer
                    .borrow_and_update()
                    .transcript
                    .last()
                    .is_some_and(|message| message.completed && message.role == Role::Assistant);
                if done {
                    return observer.borrow().transcript.last().cloned();
                }
            }
        });

        feed(
            &mut session,
            &[
                r#"{"type":"chunk","content":"Hi "}"#,
                r#"{"type":"chunk","content":"there"}"#,
                r#"{"type":"done"}"#,
            ],
        );

        let last = reader.await.unwrap().unwrap();
        assert_eq!(last.content, "Hi there");
    }

    #[derive(Debug, Clone)]
    enum Step {
        Chunk(String),
        Done,
        Error,
        ReportStart,
        ReportEnd,
        Submit(String),
        Clear,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            6 => prop_oneof![
                Just("[start tool call]".to_string()),
                Just("[end tool call]".to_string()),
                "[a-z \\n]{0,5}",
            ]
            .prop_map(Step::Chunk),
            2 => Just(Step::Done),
            1 => Just(Step::Error),
            1 => Just(Step::ReportStart),
            1 => Just(Step::ReportEnd),
            2 => "[a-z ]{0,4}".prop_map(Step::Submit),
            1 => Just(Step::Clear),
        ]
    }

    proptest! {
        #[test]
        fn transcript_invariants_hold_for_any_event_sequence(
            steps in proptest::collection::vec(step(), 0..40),
        ) {
            let mut session = session();
            let saver = MemorySaver::default();
            let reference = Sanitizer::new(&ControlMarkers::default()).unwrap();
            let mut raw: Option<String> = None;

            for step in steps {
                let transcript_before = session.messages().to_vec();
                match step {
                    Step::Chunk(content) => {
                        raw.get_or_insert_with(String::new).push_str(&content);
                        session.handle_event(
                            InboundEvent::Chunk { content, variant: None },
                            &saver,
                        );
                        prop_assert!(session.status().awaiting_reply);
                    }
                    Step::Done => {
                        session.handle_event(InboundEvent::Done, &saver);
                        if let Some(raw) = raw.take() {
                            let last = session.messages().last().unwrap();
                            prop_assert!(last.completed);
                            prop_assert_eq!(&last.content, &reference.sanitize(&raw));
                        }
                        prop_assert!(!session.status().awaiting_reply);
                    }
                    Step::Error => {
                        session.handle_event(
                            InboundEvent::Error { content: "boom".into() },
                            &saver,
                        );
                        prop_assert_eq!(session.messages(), transcript_before.as_slice());
                        prop_assert!(!session.status().awaiting_reply);
                    }
                    Step::ReportStart => {
                        session.handle_event(InboundEvent::ReportStart, &saver);
                        prop_assert!(session.status().long_task_in_progress);
                        prop_assert_eq!(session.messages(), transcript_before.as_slice());
                    }
                    Step::ReportEnd => {
                        session.handle_event(InboundEvent::ReportEnd, &saver);
                        prop_assert!(!session.status().long_task_in_progress);
                        prop_assert_eq!(session.messages(), transcript_before.as_slice());
                    }
                    Step::Submit(input) => {
                        let status_before = session.status().clone();
                        match session.submit(&input) {
                            Ok(request) => {
                                raw = None;
                                prop_assert_eq!(request.history.len(), transcript_before.len());
                                prop_assert!(session.status().awaiting_reply);
                            }
                            Err(_) => {
                                prop_assert_eq!(session.messages(), transcript_before.as_slice());
                                prop_assert_eq!(session.status(), &status_before);
                            }
                        }
                    }
                    Step::Clear => {
                        raw = None;
                        session.clear();
                        prop_assert!(session.messages().is_empty());
                        prop_assert!(!session.status().awaiting_reply);
                    }
                }

                prop_assert!(transcript_is_well_formed(session.messages()));
                if let Some(raw) = &raw {
                    let last = session.messages().last().unwrap();
                    prop_assert!(!last.completed);
                    prop_assert_eq!(&last.content, &reference.sanitize(raw));
                }
            }
        }
    }
}
