use serde::{Deserialize, Serialize};

use crate::error::Result;

/// `header.status` value marking the last fragment of an answer.
pub const STATUS_FINAL: i64 = 2;

/// One inbound frame, as sent by the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    /// Status and error information.
    pub header: ResponseHeader,

    /// The answer text, absent on most error frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ResponsePayload>,
}

/// Header of an inbound frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Zero on success; nonzero is a remote error.
    pub code: i64,

    /// Error message accompanying a nonzero code.
    #[serde(default)]
    pub message: String,

    /// Service-side session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Two on the final fragment; anything else means more fragments follow.
    #[serde(default)]
    pub status: i64,
}

/// Wrapper for the `payload` object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponsePayload {
    /// The streamed choices.
    #[serde(default)]
    pub choices: Choices,
}

/// Streamed choices of one fragment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Choices {
    /// Per-choice status; mirrors `header.status`.
    #[serde(default)]
    pub status: i64,

    /// Fragment sequence number.
    #[serde(default)]
    pub seq: i64,

    /// The text pieces of this fragment.
    #[serde(default)]
    pub text: Vec<TextPiece>,
}

/// One piece of answer text.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextPiece {
    /// Always `assistant` in practice.
    #[serde(default)]
    pub role: String,

    /// The text to append.
    #[serde(default)]
    pub content: String,

    /// Choice index.
    #[serde(default)]
    pub index: i64,
}

/// The decoded view of one inbound frame that drives the exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseFragment {
    /// The frame's `header.status`.
    pub status_code: i64,

    /// The frame's `header.code`.
    pub remote_error_code: i64,

    /// The frame's `header.message`.
    pub remote_error_message: String,

    /// True when this is the last fragment of the answer.
    pub is_final: bool,

    /// Text pieces in the order the service sent them.
    pub text_pieces: Vec<String>,

    /// Service-side session id.
    pub sid: Option<String>,
}

impl ResponseFragment {
    /// True when the service reported an error in this frame.
    pub fn is_error(&self) -> bool {
        self.remote_error_code != 0
    }
}

impl ChatResponse {
    /// Decode an inbound text frame.
    pub fn from_frame(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Flatten the envelope into the fragment model.
    pub fn into_fragment(self) -> ResponseFragment {
        let text_pieces = self
            .payload
            .map(|payload| {
                payload
                    .choices
                    .text
                    .into_iter()
                    .map(|piece| piece.content)
                    .collect()
            })
            .unwrap_or_default();
        ResponseFragment {
            status_code: self.header.status,
            remote_error_code: self.header.code,
            remote_error_message: self.header.message,
            is_final: self.header.status == STATUS_FINAL,
            text_pieces,
            sid: self.header.sid,
        }
    }
}

/// Decode an inbound text frame straight into a fragment.
pub fn decode_fragment(frame: &str) -> Result<ResponseFragment> {
    ChatResponse::from_frame(frame).map(ChatResponse::into_fragment)
}
