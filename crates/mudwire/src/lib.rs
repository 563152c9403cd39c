//! `mudwire`: the client/server wire protocol.
//!
//! Every message is one JSON document per line, tagged by `op`. Inbound
//! messages are [`Intent`]s, outbound messages are [`Event`]s. A line that
//! does not parse as an intent is not a protocol violation: the gateway
//! treats it as a generic `command` and echoes it back.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Client → server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Intent {
    Register {
        username: String,
        password: String,
    },
    Login {
        username: String,
        password_hash: String,
    },
    Move {
        direction: String,
    },
    Fight {
        target: String,
        #[serde(default)]
        skill: Option<String>,
    },
    Chat {
        to: String,
        body: String,
    },
    /// Explicit logout; the transport closing has the same effect.
    Disconnect,
    Command {
        text: String,
    },
}

/// Server → client. Addressed by connection; the engine never writes sockets.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Event {
    ConnectionId {
        id: String,
    },
    LoginAccepted {
        username: String,
    },
    LoginRejected,
    RegistrationAccepted,
    RegistrationRejected {
        reason: String,
    },
    LocationSnapshot {
        room: String,
        description: String,
        exits: Vec<String>,
        monsters: Vec<MonsterView>,
    },
    StatsSnapshot {
        name: String,
        hp: i32,
        max_hp: i32,
        attack: i32,
        defense: i32,
        speed_ms: u64,
    },
    CombatStatus {
        initiator_name: String,
        initiator_hp: i32,
        target_name: String,
        target_hp: i32,
    },
    ChatMessage {
        from: String,
        to: String,
        body: String,
    },
    Notice {
        text: String,
    },
}

/// What a client may see of a monster sharing its room.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MonsterView {
    pub name: String,
    pub hp: i32,
    pub max_hp: i32,
}

#[derive(Debug, Clone)]
pub enum WireError {
    NotUtf8,
    BadJson(String),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::NotUtf8 => write!(f, "line is not utf-8"),
            WireError::BadJson(e) => write!(f, "bad json: {e}"),
        }
    }
}

impl std::error::Error for WireError {}

pub fn decode_intent(line: &[u8]) -> Result<Intent, WireError> {
    let s = std::str::from_utf8(line).map_err(|_| WireError::NotUtf8)?;
    serde_json::from_str(s).map_err(|e| WireError::BadJson(e.to_string()))
}

/// Encode one event as a JSON line, trailing `\n` included.
pub fn encode_event(ev: &Event) -> Bytes {
    // Event carries only plain strings and integers; serialization cannot fail.
    let mut s = serde_json::to_string(ev).expect("serialize event");
    s.push('\n');
    Bytes::from(s)
}
