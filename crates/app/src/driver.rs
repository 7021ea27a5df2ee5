use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use novaviz_chat::error::SaveResult;
use novaviz_chat::{
    ChatRequest, ChatSession, FileSaver, NoticeTimer, SaveAction, SessionSnapshot,
    SubmitRejection,
};
use novaviz_transport::{TransportError, connect};
use snafu::ResultExt;
use tokio::io::{AsyncBufRead, AsyncWrite, Lines};
use tokio::sync::mpsc;

use crate::error::{AppResult, BuildSessionSnafu, ReadInputSnafu, TransportSnafu};
use crate::settings::ClientSettings;
use crate::terminal::TerminalPresenter;

const STALL_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// One line of user input, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Clear,
    Quit,
    Submit(String),
}

impl InputCommand {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "/clear" => Self::Clear,
            "/quit" => Self::Quit,
            _ => Self::Submit(line.to_string()),
        }
    }
}

/// What the run loop has to do after an input line was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOutcome {
    Send(ChatRequest),
    Rejected(SubmitRejection),
    Disconnected,
    Cleared,
    Quit,
}

/// A save that ran off the event loop.
#[derive(Debug)]
pub struct FinishedSave {
    pub filename: String,
    pub outcome: SaveResult<PathBuf>,
}

/// Session state plus the bookkeeping the run loop needs between events.
pub struct SessionDriver {
    chat: ChatSession,
    stall_after: Option<Duration>,
    stall_warned: bool,
}

impl SessionDriver {
    pub fn new(chat: ChatSession, stall_after: Option<Duration>) -> Self {
        Self {
            chat,
            stall_after,
            stall_warned: false,
        }
    }

    pub fn chat(&self) -> &ChatSession {
        &self.chat
    }

    /// Applies one frame. A returned action still has to be saved.
    pub fn on_frame(&mut self, frame: &str) -> Option<SaveAction> {
        let action = self.chat.apply_frame(frame);
        if !self.chat.status().awaiting_reply {
            self.stall_warned = false;
        }
        action
    }

    pub fn on_save_finished(&mut self, save: FinishedSave) -> NoticeTimer {
        self.chat.finish_save(&save.filename, save.outcome)
    }

    pub fn on_input(&mut self, line: &str) -> InputOutcome {
        match InputCommand::parse(line) {
            InputCommand::Quit => InputOutcome::Quit,
            InputCommand::Clear => {
                self.chat.clear();
                self.stall_warned = false;
                InputOutcome::Cleared
            }
            InputCommand::Submit(_) if self.chat.status().transport_closed => {
                InputOutcome::Disconnected
            }
            InputCommand::Submit(text) => match self.chat.submit(&text) {
                Ok(request) => InputOutcome::Send(request),
                Err(rejection) => {
                    tracing::info!(reason = %rejection, "submit rejected; input discarded");
                    InputOutcome::Rejected(rejection)
                }
            },
        }
    }

    pub fn on_notice_expired(&mut self, timer: NoticeTimer) -> bool {
        self.chat.expire_notice(timer.id)
    }

    pub fn on_transport_closed(&mut self) {
        self.chat.mark_transport_closed();
    }

    /// The request never left, so no reply can come: further input is discarded.
    /// Returns the line to show the user.
    pub fn on_send_failed(&mut self, error: &TransportError) -> String {
        tracing::warn!(error = %error, "failed to send chat request");
        self.chat.mark_transport_closed();
        format!("message not sent: {error}")
    }

    /// Returns true the first time the outstanding reply crosses the stall threshold.
    pub fn check_stall(&mut self, now: Instant) -> bool {
        let Some(threshold) = self.stall_after else {
            return false;
        };
        let Some(waited) = self.chat.status().awaiting_for(now) else {
            self.stall_warned = false;
            return false;
        };
        if waited < threshold || self.stall_warned {
            return false;
        }

        tracing::warn!(
            waited_secs = waited.as_secs(),
            "no reply from peer; input stays blocked until it answers"
        );
        self.stall_warned = true;
        true
    }
}

/// Connects to the configured server and runs one session until quit, end of input, or
/// an output failure.
pub async fn run_session<R, W>(
    settings: &ClientSettings,
    mut lines: Lines<R>,
    presenter: &mut TerminalPresenter<W>,
    saver: Arc<dyn FileSaver>,
) -> AppResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let chat = ChatSession::new(settings.session_config()).context(BuildSessionSnafu {
        stage: "build-chat-session",
    })?;
    let mut snapshots = chat.subscribe();
    let mut driver = SessionDriver::new(chat, settings.stall_warning_after());
    let (saved_tx, mut saved_rx) = mpsc::unbounded_channel();

    let handle = connect(&settings.transport_config())
        .await
        .context(TransportSnafu {
            stage: "connect-transport",
        })?;
    let mut transport = handle.session;
    let worker = tokio::spawn(handle.worker);

    presenter.present(&current(&mut snapshots)).await?;

    let notice_sleep = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(notice_sleep);
    let mut pending_notice: Option<NoticeTimer> = None;
    let mut stall_check = tokio::time::interval(STALL_CHECK_INTERVAL);
    let mut transport_open = true;

    loop {
        tokio::select! {
            frame = transport.recv(), if transport_open => match frame {
                Some(frame) => {
                    if let Some(action) = driver.on_frame(&frame) {
                        spawn_save(Arc::clone(&saver), action, saved_tx.clone());
                    }
                }
                None => {
                    tracing::info!("transport closed");
                    transport_open = false;
                    driver.on_transport_closed();
                }
            },
            Some(save) = saved_rx.recv() => {
                let timer = driver.on_save_finished(save);
                notice_sleep.as_mut().reset(tokio::time::Instant::now() + timer.ttl);
                pending_notice = Some(timer);
            }
            line = lines.next_line() => {
                let line = line.context(ReadInputSnafu { stage: "read-input-line" })?;
                let Some(line) = line else {
                    tracing::info!("input closed; ending session");
                    break;
                };
                match driver.on_input(&line) {
                    InputOutcome::Send(request) => {
                        if let Err(error) = transport.send_json(&request).await {
                            let line = driver.on_send_failed(&error);
                            presenter.notify(&line).await?;
                        }
                    }
                    InputOutcome::Rejected(rejection) => {
                        presenter.notify(&format!("input discarded: {rejection}")).await?;
                    }
                    InputOutcome::Disconnected => {
                        presenter.notify("input discarded: connection closed").await?;
                    }
                    InputOutcome::Cleared => {}
                    InputOutcome::Quit => break,
                }
            }
            () = &mut notice_sleep, if pending_notice.is_some() => {
                if let Some(timer) = pending_notice.take() {
                    driver.on_notice_expired(timer);
                }
            }
            _ = stall_check.tick() => {
                if driver.check_stall(Instant::now()) {
                    presenter.present(&driver.chat().snapshot()).await?;
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                presenter.present(&current(&mut snapshots)).await?;
            }
        }
    }

    transport.close();
    drop(transport);
    if let Err(error) = worker.await {
        tracing::warn!(error = %error, "transport worker ended abnormally");
    }
    Ok(())
}

// Saving touches the filesystem, so it runs on the blocking pool.
fn spawn_save(
    saver: Arc<dyn FileSaver>,
    action: SaveAction,
    done: mpsc::UnboundedSender<FinishedSave>,
) {
    tokio::task::spawn_blocking(move || {
        let outcome = saver.save(&action);
        let _ = done.send(FinishedSave {
            filename: action.filename,
            outcome,
        });
    });
}

fn current(snapshots: &mut tokio::sync::watch::Receiver<SessionSnapshot>) -> SessionSnapshot {
    snapshots.borrow_and_update().clone()
}
