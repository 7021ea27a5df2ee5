use crossterm::Command;
use crossterm::cursor::{MoveTo, MoveToColumn, MoveToPreviousLine};
use crossterm::terminal::{Clear, ClearType};
use novaviz_chat::{HtmlRenderer, PlainTextRenderer, SessionSnapshot, TranscriptRenderer};
use snafu::ResultExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{AppResult, WriteOutputSnafu};
use crate::settings::{ClientSettings, PresenterKind};

/// Writes rendered snapshots to a terminal-like sink.
///
/// Complete transcript lines are written once. The volatile tail, made of the unfinished
/// last transcript line and the status block, is erased and rewritten in place on every
/// change. When the transcript no longer extends what was written, the screen is cleared
/// and redrawn.
pub struct TerminalPresenter<W> {
    renderer: Box<dyn TranscriptRenderer>,
    out: W,
    /// Terminal width in columns, used to count wrapped rows when erasing the tail.
    width: Option<u16>,
    committed: String,
    volatile: String,
}

impl<W: AsyncWrite + Unpin> TerminalPresenter<W> {
    pub fn new(renderer: Box<dyn TranscriptRenderer>, out: W) -> Self {
        Self {
            renderer,
            out,
            width: None,
            committed: String::new(),
            volatile: String::new(),
        }
    }

    pub fn from_settings(settings: &ClientSettings, out: W) -> Self {
        let stall_after = settings.stall_warning_after();
        let renderer: Box<dyn TranscriptRenderer> = match settings.presenter {
            PresenterKind::Plain => Box::new(PlainTextRenderer { stall_after }),
            PresenterKind::Html => Box::new(HtmlRenderer { stall_after }),
        };
        Self::new(renderer, out)
    }

    pub fn with_width(mut self, width: Option<u16>) -> Self {
        self.width = width.filter(|columns| *columns > 0);
        self
    }

    pub async fn present(&mut self, snapshot: &SessionSnapshot) -> AppResult<()> {
        let transcript = self.renderer.render_transcript(snapshot);
        let status = self.renderer.render_status(snapshot);

        let (fresh, redraw) = match transcript.strip_prefix(self.committed.as_str()) {
            Some(rest) => (rest, false),
            None => (transcript.as_str(), true),
        };
        let split = fresh.rfind('\n').map_or(0, |index| index + 1);
        let (settled, tail) = fresh.split_at(split);
        let volatile = volatile_block(tail, &status);

        if !redraw && settled.is_empty() && volatile == self.volatile {
            return Ok(());
        }

        let mut frame = if redraw {
            clear_screen()
        } else {
            erase_rows(&self.volatile, self.width)
        };
        frame.push_str(settled);
        frame.push_str(&volatile);
        self.write(&frame).await?;
        self.flush().await?;

        if redraw {
            self.committed.clear();
        }
        self.committed.push_str(settled);
        self.volatile = volatile;
        Ok(())
    }

    /// Prints a one-off line above the volatile tail.
    pub async fn notify(&mut self, line: &str) -> AppResult<()> {
        let mut frame = erase_rows(&self.volatile, self.width);
        frame.push_str(line);
        frame.push('\n');
        frame.push_str(&self.volatile);
        self.write(&frame).await?;
        self.flush().await
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    async fn write(&mut self, text: &str) -> AppResult<()> {
        self.out
            .write_all(text.as_bytes())
            .await
            .context(WriteOutputSnafu {
                stage: "write-terminal",
            })
    }

    async fn flush(&mut self) -> AppResult<()> {
        self.out.flush().await.context(WriteOutputSnafu {
            stage: "flush-terminal",
        })
    }
}

/// Unfinished transcript line followed by the status block. Never ends with a newline, so
/// the cursor stays on its last row.
fn volatile_block(tail: &str, status: &str) -> String {
    let status = status.trim_end_matches('\n');
    let mut block = tail.to_string();
    if !status.is_empty() {
        if !block.is_empty() {
            block.push_str("\n\n");
        }
        block.push_str(status);
    }
    block
}

fn clear_screen() -> String {
    let mut sequence = String::new();
    let _ = Clear(ClearType::All).write_ansi(&mut sequence);
    let _ = MoveTo(0, 0).write_ansi(&mut sequence);
    sequence
}

/// Moves the cursor back to the first row of `block` and clears everything below it.
fn erase_rows(block: &str, width: Option<u16>) -> String {
    let mut sequence = String::new();
    if block.is_empty() {
        return sequence;
    }

    let rows = block
        .split('\n')
        .map(|line| screen_rows(line, width))
        .sum::<usize>();
    let _ = MoveToColumn(0).write_ansi(&mut sequence);
    if rows > 1 {
        let up = u16::try_from(rows - 1).unwrap_or(u16::MAX);
        let _ = MoveToPreviousLine(up).write_ansi(&mut sequence);
    }
    let _ = Clear(ClearType::FromCursorDown).write_ansi(&mut sequence);
    sequence
}

fn screen_rows(line: &str, width: Option<u16>) -> usize {
    match width {
        Some(columns) => line.chars().count().div_ceil(usize::from(columns)).max(1),
        None => 1,
    }
}
