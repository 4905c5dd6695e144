//! Wire codec for the demo terminal service.
//!
//! The service speaks line-oriented JSON text frames. Client frames carry
//! exactly one of `input` or `resize`; server frames are a record whose
//! keys (`output`, `error`, `download_progress`) may co-occur, and every
//! present key must be applied. Frames that do not decode as that record
//! are raw terminal bytes, not an error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub cols: u16,
    pub rows: u16,
}

/// Client-originated frames. Untagged so the wire shapes stay
/// `{"input": "..."}` and `{"resize": {"cols": .., "rows": ..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientFrame {
    Input { input: String },
    Resize { resize: WindowSize },
}

impl ClientFrame {
    pub fn input(data: impl Into<String>) -> Self {
        ClientFrame::Input { input: data.into() }
    }

    pub fn resize(cols: u16, rows: u16) -> Self {
        ClientFrame::Resize {
            resize: WindowSize { cols, rows },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub percent: u8,
}

/// Server frame: each field is independently optional and more than one
/// may be present on a single frame. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_progress: Option<DownloadProgress>,
}

impl ServerFrame {
    pub fn is_empty(&self) -> bool {
        self.output.is_none() && self.error.is_none() && self.download_progress.is_none()
    }
}

/// A decoded inbound frame. `Raw` is the passthrough path for anything
/// the service emits outside the JSON record shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(ServerFrame),
    Raw(String),
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to encode client frame: {0}")]
    Encode(#[from] serde_json::Error),
}

pub fn encode(frame: &ClientFrame) -> Result<String, WireError> {
    Ok(serde_json::to_string(frame)?)
}

pub fn decode(text: &str) -> Inbound {
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(frame) => Inbound::Frame(frame),
        Err(_) => Inbound::Raw(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_input_frame_shape() {
        let text = encode(&ClientFrame::input("ls\n")).unwrap();
        assert_eq!(text, r#"{"input":"ls\n"}"#);
    }

    #[test]
    fn encodes_resize_frame_shape() {
        let text = encode(&ClientFrame::resize(120, 40)).unwrap();
        assert_eq!(text, r#"{"resize":{"cols":120,"rows":40}}"#);
    }

    #[test]
    fn decodes_output_frame() {
        let inbound = decode(r#"{"output":"hello"}"#);
        assert_eq!(
            inbound,
            Inbound::Frame(ServerFrame {
                output: Some("hello".into()),
                ..ServerFrame::default()
            })
        );
    }

    #[test]
    fn decodes_co_occurring_keys_without_dropping_any() {
        let inbound = decode(r#"{"output":"a","download_progress":{"percent":50}}"#);
        let Inbound::Frame(frame) = inbound else {
            panic!("expected a decoded frame");
        };
        assert_eq!(frame.output.as_deref(), Some("a"));
        assert_eq!(frame.download_progress, Some(DownloadProgress { percent: 50 }));
        assert!(frame.error.is_none());
    }

    #[test]
    fn non_json_frame_is_raw_passthrough() {
        assert_eq!(decode("not json"), Inbound::Raw("not json".into()));
    }

    #[test]
    fn json_without_known_keys_decodes_empty() {
        let inbound = decode(r#"{"action":"require_mfa"}"#);
        assert_eq!(inbound, Inbound::Frame(ServerFrame::default()));
        let Inbound::Frame(frame) = inbound else {
            unreachable!()
        };
        assert!(frame.is_empty());
    }

    #[test]
    fn non_object_json_is_raw_passthrough() {
        assert_eq!(decode("\"hello\""), Inbound::Raw("\"hello\"".into()));
        assert_eq!(decode("42"), Inbound::Raw("42".into()));
    }

    #[test]
    fn error_frame_round_trips() {
        let inbound = decode(r#"{"error":"command blocked by security policy"}"#);
        assert_eq!(
            inbound,
            Inbound::Frame(ServerFrame {
                error: Some("command blocked by security policy".into()),
                ..ServerFrame::default()
            })
        );
    }

    #[test]
    fn client_frames_deserialize_for_test_servers() {
        let frame: ClientFrame = serde_json::from_str(r#"{"resize":{"cols":80,"rows":24}}"#).unwrap();
        assert_eq!(frame, ClientFrame::resize(80, 24));
        let frame: ClientFrame = serde_json::from_str(r#"{"input":"make\r"}"#).unwrap();
        assert_eq!(frame, ClientFrame::input("make\r"));
    }
}
