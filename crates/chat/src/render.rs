//! Presentation layers over [`SessionSnapshot`].
//!
//! Renderers are pure functions of a snapshot, so one state machine can drive any number
//! of visual themes. The transcript and the status block are rendered separately: while a
//! reply streams, the plain transcript only grows at its end, but status lines come and go.

use std::fmt::Write as _;
use std::time::{Duration, Instant};

use crate::message::{Message, Role};
use crate::session::SessionSnapshot;
use crate::status::{NoticeKind, SessionStatus};

/// Turns a snapshot into displayable text.
pub trait TranscriptRenderer: Send + Sync {
    fn render_transcript(&self, snapshot: &SessionSnapshot) -> String;

    /// Empty when there is nothing to report.
    fn render_status(&self, snapshot: &SessionSnapshot) -> String;

    fn render(&self, snapshot: &SessionSnapshot) -> String {
        let mut out = self.render_transcript(snapshot);
        let status = self.render_status(snapshot);
        if !out.is_empty() && !status.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&status);
        out
    }
}

/// Status lines shared by every renderer.
pub fn status_lines(status: &SessionStatus, stall_after: Option<Duration>) -> Vec<String> {
    let mut lines = Vec::new();

    if status.awaiting_reply {
        lines.push("… assistant is typing".to_string());
    }
    if status.long_task_in_progress {
        lines.push("report generation in progress".to_string());
    }
    if let Some(notice) = &status.transient_notice {
        let prefix = match notice.kind {
            NoticeKind::Success => "✓",
            NoticeKind::Failure => "✗",
        };
        lines.push(format!("{prefix} {}", notice.text));
    }
    if let Some(threshold) = stall_after
        && let Some(waited) = status.awaiting_for(Instant::now())
        && waited >= threshold
    {
        lines.push(format!(
            "no reply for {}s; input stays blocked until the peer answers or the session restarts",
            waited.as_secs()
        ));
    }
    if status.transport_closed {
        lines.push("connection closed; restart the session to continue".to_string());
    }

    lines
}

/// Plain text for terminals. Content is printed as-is; nothing is interpreted as markup.
///
/// Separators are written before a message rather than after it, so appending to the last
/// message only appends to the rendered transcript.
#[derive(Debug, Clone, Default)]
pub struct PlainTextRenderer {
    pub stall_after: Option<Duration>,
}

impl TranscriptRenderer for PlainTextRenderer {
    fn render_transcript(&self, snapshot: &SessionSnapshot) -> String {
        let mut out = String::new();

        for message in snapshot.transcript.iter() {
            if !out.is_empty() {
                out.push_str(if out.ends_with('\n') { "\n" } else { "\n\n" });
            }
            let _ = writeln!(out, "{}:", speaker(message));
            out.push_str(&message.content);
        }

        out
    }

    fn render_status(&self, snapshot: &SessionSnapshot) -> String {
        let mut out = String::new();
        for line in status_lines(&snapshot.status, self.stall_after) {
            let _ = writeln!(out, "[{line}]");
        }
        out
    }
}

/// HTML fragment with every piece of message text escaped.
///
/// Assistant markdown is emitted as escaped source inside a `markdown` container for an
/// external converter; user newlines become `<br />` only after escaping.
#[derive(Debug, Clone, Default)]
pub struct HtmlRenderer {
    pub stall_after: Option<Duration>,
}

impl TranscriptRenderer for HtmlRenderer {
    fn render_transcript(&self, snapshot: &SessionSnapshot) -> String {
        let mut out = String::from("<div class=\"messages\">\n");

        for message in snapshot.transcript.iter() {
            let role_class = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            let state_class = if message.completed { "" } else { " streaming" };
            let _ = writeln!(
                out,
                "<div class=\"message {role_class}{state_class}\"><div class=\"message-header\"><span class=\"role-indicator\">{}</span></div>",
                escape_html(&speaker(message))
            );

            match message.role {
                Role::User => {
                    let _ = writeln!(
                        out,
                        "<div class=\"content\">{}</div>",
                        escape_html(&message.content).replace('\n', "<br />")
                    );
                }
                Role::Assistant => {
                    let _ = writeln!(
                        out,
                        "<div class=\"content markdown\">{}</div>",
                        escape_html(&message.content)
                    );
                }
            }
            out.push_str("</div>\n");
        }

        out.push_str("</div>\n");
        out
    }

    fn render_status(&self, snapshot: &SessionSnapshot) -> String {
        let lines = status_lines(&snapshot.status, self.stall_after);
        if lines.is_empty() {
            return String::new();
        }

        let mut out = String::from("<div class=\"status-bar\">\n");
        for line in lines {
            let _ = writeln!(out, "<div class=\"status\">{}</div>", escape_html(&line));
        }
        out.push_str("</div>\n");
        out
    }
}

/// Escapes the five HTML-significant characters.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for character in text.chars() {
        match character {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn speaker(message: &Message) -> String {
    match (&message.role, &message.variant) {
        (Role::Assistant, Some(variant)) => format!("Assistant ({variant})"),
        (role, _) => role.label().to_string(),
    }
}
