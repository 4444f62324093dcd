//! JSON frames exchanged on the attendance socket.

use serde::{Deserialize, Serialize};

use crate::model::attendance::{ConnectionId, Envelope, PunchIn, PunchOut};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchUpRequest {
    #[serde(default)]
    pub after_seq: u64,
}

/// client -> server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinAttendance,
    PunchIn(PunchIn),
    PunchOut(PunchOut),
    CatchUp(CatchUpRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lagged {
    pub skipped: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

/// server -> client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerMessage {
    Connected { data: Connected },
    AttendanceUpdated(Envelope),
    Lagged { data: Lagged },
    Error { data: ErrorBody },
}

impl ServerMessage {
    pub fn connected(connection_id: ConnectionId) -> Self {
        ServerMessage::Connected {
            data: Connected { connection_id },
        }
    }

    pub fn lagged(skipped: u64) -> Self {
        ServerMessage::Lagged {
            data: Lagged { skipped },
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            data: ErrorBody {
                message: message.into(),
            },
        }
    }
}
