#![deny(unsafe_code)]

//! WebSocket transport for one chat session: raw text frames in, JSON frames out.

pub mod error;
pub mod session;

pub use error::{TransportError, TransportResult};
pub use session::{TransportConfig, TransportHandle, TransportSession, TransportWorker, connect};
