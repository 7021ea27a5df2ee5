use serde::Deserialize;
use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt};

use crate::error::{
    DecodeResult, InvalidFieldsSnafu, MalformedFrameSnafu, MissingTypeSnafu, NotAnObjectSnafu,
};

/// File artifact pushed by the peer outside the chunk stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileDelivery {
    pub filename: String,
    pub content: String,
    #[serde(default, rename = "file_type")]
    pub content_kind: Option<String>,
}

/// Typed peer event decoded from one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Chunk {
        content: String,
        variant: Option<String>,
    },
    Done,
    Error {
        content: String,
    },
    ReportStart,
    ReportEnd,
    FileDelivery(FileDelivery),
    /// Event kind this client does not know yet; decoded and ignored.
    Unknown {
        kind: String,
    },
}

impl InboundEvent {
    /// Wire name of the event kind, used in logs.
    pub fn kind(&self) -> &str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Done => "done",
            Self::Error { .. } => "error",
            Self::ReportStart => "report_start",
            Self::ReportEnd => "report_end",
            Self::FileDelivery(_) => "file_download",
            Self::Unknown { kind } => kind.as_str(),
        }
    }
}

#[derive(Deserialize)]
struct ChunkFields {
    content: String,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Deserialize)]
struct ErrorFields {
    #[serde(default)]
    content: String,
}

/// Classifies one raw text frame by its `type` discriminator.
pub fn decode_frame(frame: &str) -> DecodeResult<InboundEvent> {
    let value = serde_json::from_str::<Value>(frame).context(MalformedFrameSnafu {
        stage: "decode-frame-json",
    })?;

    let Value::Object(fields) = value else {
        return NotAnObjectSnafu {
            stage: "decode-frame-shape",
        }
        .fail();
    };

    let kind = fields
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .context(MissingTypeSnafu {
            stage: "decode-frame-type",
        })?;

    let event = match kind.as_str() {
        "chunk" => {
            let chunk: ChunkFields = decode_fields(&kind, fields)?;
            InboundEvent::Chunk {
                content: chunk.content,
                variant: chunk.role,
            }
        }
        "done" => InboundEvent::Done,
        "error" => {
            let error: ErrorFields = decode_fields(&kind, fields)?;
            InboundEvent::Error {
                content: error.content,
            }
        }
        "report_start" => InboundEvent::ReportStart,
        "report_end" => InboundEvent::ReportEnd,
        "file_download" => InboundEvent::FileDelivery(decode_fields(&kind, fields)?),
        _ => InboundEvent::Unknown { kind },
    };

    Ok(event)
}

fn decode_fields<T>(kind: &str, fields: Map<String, Value>) -> DecodeResult<T>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(Value::Object(fields)).context(InvalidFieldsSnafu {
        stage: "decode-frame-fields",
        kind: kind.to_string(),
    })
}
