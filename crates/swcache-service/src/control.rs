//! Messages exchanged with client views over the control channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A recognized control message.
///
/// On the wire, messages are JSON objects tagged by their kind, e.g. `{"type": "SKIP_WAITING"}`.
/// For inbound messages, `kind` is accepted as an alias of `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Inbound: promote the waiting generation right away.
    SkipWaiting,
    /// Outbound: a new generation took control.
    SwActivated,
}

impl ControlMessage {
    /// Parses an inbound message, returning `None` for anything not recognized.
    ///
    /// Only [`ControlMessage::SkipWaiting`] is accepted inbound; everything else, including an
    /// echoed `SW_ACTIVATED`, is ignored.
    pub fn parse(message: &Value) -> Option<Self> {
        let kind = message
            .get("type")
            .or_else(|| message.get("kind"))
            .and_then(Value::as_str)?;

        match kind {
            "SKIP_WAITING" => Some(Self::SkipWaiting),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SkipWaiting => "SKIP_WAITING",
            Self::SwActivated => "SW_ACTIVATED",
        }
    }
}
