use snafu::Snafu;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("server url is empty"))]
    EmptyUrl { stage: &'static str },
    #[snafu(display("failed to connect to '{url}' on `{stage}`, {source}"))]
    Connect {
        stage: &'static str,
        url: String,
        source: tungstenite::Error,
    },
    #[snafu(display("failed to encode outbound frame on `{stage}`, {source}"))]
    EncodeFrame {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("transport is closed; outbound frame dropped on `{stage}`"))]
    Closed { stage: &'static str },
}

pub type TransportResult<T> = Result<T, TransportError>;
