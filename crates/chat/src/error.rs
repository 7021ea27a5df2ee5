use std::path::PathBuf;

use snafu::Snafu;

/// Failure to turn one inbound frame into an event. Never fatal to the session.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DecodeError {
    #[snafu(display("frame is not valid JSON on `{stage}`: {source}"))]
    MalformedFrame {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("frame is not a JSON object on `{stage}`"))]
    NotAnObject { stage: &'static str },
    #[snafu(display("frame has no string `type` discriminator on `{stage}`"))]
    MissingType { stage: &'static str },
    #[snafu(display("`{kind}` frame has invalid fields on `{stage}`: {source}"))]
    InvalidFields {
        stage: &'static str,
        kind: String,
        source: serde_json::Error,
    },
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Failure of the save action for a delivered file artifact.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SaveError {
    #[snafu(display("suggested filename '{filename}' is not usable"))]
    InvalidFilename {
        stage: &'static str,
        filename: String,
    },
    #[snafu(display("failed to create download directory at {path:?} on `{stage}`: {source}"))]
    CreateDownloadDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to write file at {path:?} on `{stage}`: {source}"))]
    WriteDownload {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("file saver rejected '{filename}': {message}"))]
    Rejected {
        stage: &'static str,
        filename: String,
        message: String,
    },
}

pub type SaveResult<T> = Result<T, SaveError>;

/// Control markers that cannot be compiled into a matcher.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SanitizerError {
    #[snafu(display("control marker '{marker}' is empty on `{stage}`"))]
    EmptyMarker {
        stage: &'static str,
        marker: &'static str,
    },
    #[snafu(display("failed to compile control marker pattern on `{stage}`: {source}"))]
    MarkerPattern {
        stage: &'static str,
        source: regex::Error,
    },
}

pub type SanitizerResult<T> = Result<T, SanitizerError>;
