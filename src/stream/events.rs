//! Messages carried by the server-push stream.

use serde::{Deserialize, Serialize};

/// Tagged by the `type` field:
///
/// ```text
/// {"type":"connected"}
/// {"type":"speak","text":"..."}
/// {"type":"waitStatus","isWaiting":true}
/// {"type":"ptt","action":"start"}
/// ```
///
/// Types this client does not know deserialize as [`ServerEvent::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    Connected,
    Speak {
        #[serde(default)]
        text: String,
    },
    WaitStatus {
        #[serde(rename = "isWaiting", default)]
        is_waiting: bool,
    },
    /// Push-to-talk gesture relayed from a global hotkey helper.
    Ptt { action: PttAction },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PttAction {
    Start,
    Stop,
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub fn parse(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_known_type() {
        assert_eq!(
            ServerEvent::parse(r#"{"type":"connected"}"#).unwrap(),
            ServerEvent::Connected
        );
        assert_eq!(
            ServerEvent::parse(r#"{"type":"speak","text":"hello"}"#).unwrap(),
            ServerEvent::Speak {
                text: "hello".into()
            }
        );
        assert_eq!(
            ServerEvent::parse(r#"{"type":"waitStatus","isWaiting":true}"#).unwrap(),
            ServerEvent::WaitStatus { is_waiting: true }
        );
        assert_eq!(
            ServerEvent::parse(r#"{"type":"ptt","action":"stop"}"#).unwrap(),
            ServerEvent::Ptt {
                action: PttAction::Stop
            }
        );
    }

    #[test]
    fn unknown_type_is_tolerated() {
        assert_eq!(
            ServerEvent::parse(r#"{"type":"conversationUpdated","id":3}"#).unwrap(),
            ServerEvent::Unknown
        );
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(ServerEvent::parse("not json").is_err());
        assert!(ServerEvent::parse(r#"{"text":"no type"}"#).is_err());
    }
}
