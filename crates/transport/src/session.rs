use std::future::Future;
use std::pin::Pin;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use snafu::{OptionExt, ResultExt, ensure};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::{ClosedSnafu, ConnectSnafu, EmptyUrlSnafu, EncodeFrameSnafu, TransportResult};

const DEFAULT_OUTBOUND_BUFFER: usize = 16;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub type TransportWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub url: String,
    pub outbound_buffer: usize,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim().to_string(),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

/// Caller-side half of one connection: inbound frames, outbound queue and close signal.
pub struct TransportSession {
    frames: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::Sender<String>,
    close_tx: Option<oneshot::Sender<()>>,
}

/// A connected session plus the socket worker the caller must spawn.
pub struct TransportHandle {
    pub session: TransportSession,
    pub worker: TransportWorker,
}

impl TransportSession {
    /// Next inbound text frame, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    /// Serializes `payload` and queues it as one text frame.
    pub async fn send_json<T: Serialize>(&self, payload: &T) -> TransportResult<()> {
        let text = serde_json::to_string(payload).context(EncodeFrameSnafu {
            stage: "encode-outbound-frame",
        })?;
        self.outbound.send(text).await.ok().context(ClosedSnafu {
            stage: "queue-outbound-frame",
        })
    }

    /// Asks the worker to close the socket. Returns false if it was already gone.
    pub fn close(&mut self) -> bool {
        self.close_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
    }
}

/// Opens one WebSocket connection. No retries: a failed connect is returned as is.
pub async fn connect(config: &TransportConfig) -> TransportResult<TransportHandle> {
    ensure!(
        !config.url.is_empty(),
        EmptyUrlSnafu {
            stage: "validate-transport-config",
        }
    );

    let (ws, response) = connect_async(config.url.as_str())
        .await
        .context(ConnectSnafu {
            stage: "open-websocket",
            url: config.url.clone(),
        })?;
    tracing::info!(url = %config.url, status = %response.status(), "transport connected");

    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer.max(1));
    let (close_tx, close_rx) = oneshot::channel();

    Ok(TransportHandle {
        session: TransportSession {
            frames: frame_rx,
            outbound: outbound_tx,
            close_tx: Some(close_tx),
        },
        worker: Box::pin(run_socket_worker(ws, frame_tx, outbound_rx, close_rx)),
    })
}

async fn run_socket_worker(
    ws: WsStream,
    frame_tx: mpsc::UnboundedSender<String>,
    mut outbound_rx: mpsc::Receiver<String>,
    mut close_rx: oneshot::Receiver<()>,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                tracing::debug!("closing transport on request");
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            outbound = outbound_rx.recv() => {
                let Some(text) = outbound else {
                    let _ = sink.close().await;
                    break;
                };
                if let Err(error) = sink.send(Message::Text(text.into())).await {
                    tracing::warn!(error = %error, "failed to send outbound frame");
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if frame_tx.send(text.as_str().to_string()).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        if frame_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        tracing::warn!(len = bytes.len(), "skipping non-UTF-8 binary frame");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "peer closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    tracing::warn!(error = %error, "transport read failed");
                    break;
                }
                None => break,
            },
        }
    }

    tracing::debug!("transport worker finished");
}
