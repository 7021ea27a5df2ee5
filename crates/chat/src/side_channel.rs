use std::fmt;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use snafu::{OptionExt, ResultExt};

use crate::error::{CreateDownloadDirSnafu, InvalidFilenameSnafu, SaveResult, WriteDownloadSnafu};
use crate::events::FileDelivery;
use crate::status::{NoticeId, NoticeKind, NoticeTimer, SessionStatus, TransientNotice};

/// MIME kind of a delivered file artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeKind {
    TextHtml,
    TextMarkdown,
}

impl MimeKind {
    /// `html` maps to HTML; every other kind, including a missing one, is markdown.
    pub fn from_content_kind(kind: Option<&str>) -> Self {
        match kind {
            Some("html") => Self::TextHtml,
            _ => Self::TextMarkdown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextHtml => "text/html",
            Self::TextMarkdown => "text/markdown",
        }
    }
}

impl fmt::Display for MimeKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// One file to hand to the save collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveAction {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub mime: MimeKind,
}

impl From<FileDelivery> for SaveAction {
    fn from(delivery: FileDelivery) -> Self {
        Self {
            mime: MimeKind::from_content_kind(delivery.content_kind.as_deref()),
            filename: delivery.filename,
            bytes: delivery.content.into_bytes(),
        }
    }
}

/// External collaborator that persists delivered files.
///
/// Saving may block on I/O, so async callers run it off the event loop and report the
/// outcome back through [`SideChannelCoordinator::record_save`].
pub trait FileSaver: Send + Sync {
    /// Saves the artifact and returns where it ended up.
    fn save(&self, action: &SaveAction) -> SaveResult<PathBuf>;
}

const MAX_NAME_ATTEMPTS: usize = 1000;

/// Saves delivered files into one directory. An existing file is never replaced: a taken
/// name gets a ` (n)` suffix before its extension.
#[derive(Debug, Clone)]
pub struct DiskFileSaver {
    dir: PathBuf,
}

impl DiskFileSaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // Only the final path component of a peer-suggested name is ever used.
    fn file_name(filename: &str) -> SaveResult<&Path> {
        Path::new(filename.trim())
            .file_name()
            .filter(|name| !name.is_empty())
            .map(Path::new)
            .context(InvalidFilenameSnafu {
                stage: "resolve-download-path",
                filename: filename.to_string(),
            })
    }
}

impl FileSaver for DiskFileSaver {
    fn save(&self, action: &SaveAction) -> SaveResult<PathBuf> {
        let name = Self::file_name(&action.filename)?;

        std::fs::create_dir_all(&self.dir).context(CreateDownloadDirSnafu {
            stage: "create-download-directory",
            path: self.dir.clone(),
        })?;

        let mut attempt = 0;
        let (path, mut file) = loop {
            let path = self.dir.join(numbered_name(name, attempt));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break (path, file),
                Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                    if attempt >= MAX_NAME_ATTEMPTS {
                        return Err(error).context(WriteDownloadSnafu {
                            stage: "pick-download-name",
                            path,
                        });
                    }
                    attempt += 1;
                }
                Err(error) => {
                    return Err(error).context(WriteDownloadSnafu {
                        stage: "create-download-file",
                        path,
                    });
                }
            }
        };

        file.write_all(&action.bytes).context(WriteDownloadSnafu {
            stage: "write-download-file",
            path: path.clone(),
        })?;

        tracing::info!(path = ?path, mime = %action.mime, "saved delivered file");
        Ok(path)
    }
}

/// `report.md`, then `report (1).md`, `report (2).md` and so on.
fn numbered_name(name: &Path, attempt: usize) -> PathBuf {
    if attempt == 0 {
        return name.to_path_buf();
    }

    let stem = name
        .file_stem()
        .unwrap_or(name.as_os_str())
        .to_string_lossy();
    match name.extension() {
        Some(extension) => {
            PathBuf::from(format!("{stem} ({attempt}).{}", extension.to_string_lossy()))
        }
        None => PathBuf::from(format!("{stem} ({attempt})")),
    }
}

/// Tracks the long-task flag and turns finished saves into notices.
#[derive(Debug, Clone)]
pub struct SideChannelCoordinator {
    notice_ttl: Duration,
    next_notice_id: u64,
}

impl SideChannelCoordinator {
    pub fn new(notice_ttl: Duration) -> Self {
        Self {
            notice_ttl,
            next_notice_id: 1,
        }
    }

    pub fn report_started(&self, status: &mut SessionStatus) {
        tracing::info!("report generation started");
        status.long_task_in_progress = true;
    }

    pub fn report_finished(&self, status: &mut SessionStatus) {
        tracing::info!("report generation finished");
        status.long_task_in_progress = false;
    }

    /// Posts the notice for a finished save.
    pub fn record_save(
        &mut self,
        filename: &str,
        outcome: SaveResult<PathBuf>,
        status: &mut SessionStatus,
    ) -> NoticeTimer {
        let (kind, text) = match outcome {
            Ok(path) => {
                tracing::debug!(filename = %filename, path = ?path, "file delivery saved");
                let shown = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| filename.to_string());
                (NoticeKind::Success, format!("Saved {shown}"))
            }
            Err(error) => {
                tracing::warn!(filename = %filename, error = %error, "file delivery failed");
                (
                    NoticeKind::Failure,
                    format!("Failed to save {filename}: {error}"),
                )
            }
        };

        self.post_notice(kind, text, status)
    }

    /// Replaces any current notice and returns the timer that should clear it.
    pub fn post_notice(
        &mut self,
        kind: NoticeKind,
        text: impl Into<String>,
        status: &mut SessionStatus,
    ) -> NoticeTimer {
        let id = NoticeId::new(self.next_notice_id);
        self.next_notice_id = self.next_notice_id.saturating_add(1);

        status.transient_notice = Some(TransientNotice {
            id,
            kind,
            text: text.into(),
            ttl: self.notice_ttl,
        });

        NoticeTimer {
            id,
            ttl: self.notice_ttl,
        }
    }

    /// Clears notice `id` if it is still the current one.
    pub fn expire_notice(&self, id: NoticeId, status: &mut SessionStatus) -> bool {
        match &status.transient_notice {
            Some(notice) if notice.id == id => {
                status.transient_notice = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::SaveError;

    #[derive(Default)]
    struct RecordingSaver {
        saved: Mutex<Vec<SaveAction>>,
        fail: bool,
    }

    impl FileSaver for RecordingSaver {
        fn save(&self, action: &SaveAction) -> SaveResult<PathBuf> {
            if self.fail {
                return Err(SaveError::Rejected {
                    stage: "recording-saver",
                    filename: action.filename.clone(),
                    message: "disk full".into(),
                });
            }
            self.saved.lock().unwrap().push(action.clone());
            Ok(PathBuf::from(&action.filename))
        }
    }

    fn delivery(kind: Option<&str>) -> FileDelivery {
        FileDelivery {
            filename: "report.out".into(),
            content: "# Report".into(),
            content_kind: kind.map(str::to_string),
        }
    }

    #[test]
    fn mime_kind_is_html_only_for_exact_html() {
        assert_eq!(MimeKind::from_content_kind(Some("html")), MimeKind::TextHtml);
        assert_eq!(
            MimeKind::from_content_kind(Some("pdf")),
            MimeKind::TextMarkdown
        );
        assert_eq!(
            MimeKind::from_content_kind(Some("HTML")),
            MimeKind::TextMarkdown
        );
        assert_eq!(MimeKind::from_content_kind(None), MimeKind::TextMarkdown);
        assert_eq!(MimeKind::TextHtml.as_str(), "text/html");
        assert_eq!(MimeKind::TextMarkdown.as_str(), "text/markdown");
    }

    #[test]
    fn delivery_produces_one_save_action_and_success_notice() {
        let saver = RecordingSaver::default();
        let mut coordinator = SideChannelCoordinator::new(Duration::from_millis(3000));
        let mut status = SessionStatus::default();

        let action = SaveAction::from(delivery(Some("html")));
        let timer = coordinator.record_save(&action.filename, saver.save(&action), &mut status);

        let saved = saver.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].mime, MimeKind::TextHtml);
        assert_eq!(saved[0].bytes, b"# Report");

        let notice = status.transient_notice.as_ref().unwrap();
        assert_eq!(notice.kind, NoticeKind::Success);
        assert_eq!(notice.id, timer.id);
        assert_eq!(timer.ttl, Duration::from_millis(3000));
    }

    #[test]
    fn failed_save_posts_failure_notice() {
        let saver = RecordingSaver {
            fail: true,
            ..RecordingSaver::default()
        };
        let mut coordinator = SideChannelCoordinator::new(Duration::from_millis(3000));
        let mut status = SessionStatus::default();

        let action = SaveAction::from(delivery(None));
        coordinator.record_save(&action.filename, saver.save(&action), &mut status);

        let notice = status.transient_notice.as_ref().unwrap();
        assert_eq!(notice.kind, NoticeKind::Failure);
        assert!(notice.text.contains("disk full"));
    }

    #[test]
    fn stale_timer_does_not_clear_newer_notice() {
        let mut coordinator = SideChannelCoordinator::new(Duration::from_millis(10));
        let mut status = SessionStatus::default();

        let first = coordinator.post_notice(NoticeKind::Success, "one", &mut status);
        let second = coordinator.post_notice(NoticeKind::Failure, "two", &mut status);
        assert!(second.id > first.id);

        assert!(!coordinator.expire_notice(first.id, &mut status));
        assert_eq!(status.transient_notice.as_ref().unwrap().text, "two");

        assert!(coordinator.expire_notice(second.id, &mut status));
        assert!(status.transient_notice.is_none());
    }

    #[test]
    fn report_markers_toggle_only_the_long_task_flag() {
        let coordinator = SideChannelCoordinator::new(Duration::from_millis(10));
        let mut status = SessionStatus::default();

        coordinator.report_started(&mut status);
        assert!(status.long_task_in_progress);
        coordinator.report_finished(&mut status);
        assert_eq!(status, SessionStatus::default());
    }

    #[test]
    fn disk_saver_keeps_only_the_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let saver = DiskFileSaver::new(dir.path().join("downloads"));
        let action = SaveAction {
            filename: "../../etc/report.md".into(),
            bytes: b"content".to_vec(),
            mime: MimeKind::TextMarkdown,
        };

        let path = saver.save(&action).unwrap();

        assert_eq!(path, dir.path().join("downloads").join("report.md"));
        assert_eq!(std::fs::read(&path).unwrap(), b"content");
    }

    #[test]
    fn disk_saver_never_overwrites_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let saver = DiskFileSaver::new(dir.path());
        std::fs::write(dir.path().join("report.md"), b"earlier").unwrap();
        let action = |bytes: &[u8]| SaveAction {
            filename: "report.md".into(),
            bytes: bytes.to_vec(),
            mime: MimeKind::TextMarkdown,
        };

        let first = saver.save(&action(b"one")).unwrap();
        let second = saver.save(&action(b"two")).unwrap();

        assert_eq!(first, dir.path().join("report (1).md"));
        assert_eq!(second, dir.path().join("report (2).md"));
        assert_eq!(std::fs::read(dir.path().join("report.md")).unwrap(), b"earlier");
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
    }

    #[test]
    fn numbered_names_keep_the_extension() {
        assert_eq!(numbered_name(Path::new("notes"), 0), PathBuf::from("notes"));
        assert_eq!(numbered_name(Path::new("notes"), 3), PathBuf::from("notes (3)"));
        assert_eq!(
            numbered_name(Path::new("report.html"), 1),
            PathBuf::from("report (1).html")
        );
    }

    #[test]
    fn recorded_save_names_the_file_actually_written() {
        let mut coordinator = SideChannelCoordinator::new(Duration::from_millis(3000));
        let mut status = SessionStatus::default();

        coordinator.record_save(
            "report.md",
            Ok(PathBuf::from("/tmp/downloads/report (1).md")),
            &mut status,
        );

        let notice = status.transient_notice.as_ref().unwrap();
        assert_eq!(notice.kind, NoticeKind::Success);
        assert_eq!(notice.text, "Saved report (1).md");
    }

    #[test]
    fn disk_saver_rejects_unusable_names() {
        let dir = tempfile::tempdir().unwrap();
        let saver = DiskFileSaver::new(dir.path());
        for filename in ["", "..", "   ", "reports/.."] {
            let action = SaveAction {
                filename: filename.into(),
                bytes: Vec::new(),
                mime: MimeKind::TextMarkdown,
            };
            assert!(matches!(
                saver.save(&action),
                Err(SaveError::InvalidFilename { .. })
            ));
        }
    }
}
