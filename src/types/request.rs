use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::history::History;
use crate::types::ConversationTurn;

/// Length of the per-request `uid` token.
const UID_LEN: usize = 10;

/// The single outbound frame of an exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    /// Application identity and per-request token.
    pub header: RequestHeader,

    /// Model selection and sampling parameters.
    pub parameter: Parameter,

    /// The conversation so far, ending with the new question.
    pub payload: RequestPayload,
}

/// Header of an outbound frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestHeader {
    /// The application id from the Spark console.
    pub app_id: String,

    /// A short random token identifying the requester.
    pub uid: String,
}

/// Wrapper for the `parameter` object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Parameter {
    /// Chat parameters.
    pub chat: ChatParameter,
}

/// Chat parameters sent with every request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatParameter {
    /// The model domain, e.g. `generalv3`.
    pub domain: String,

    /// Sampling temperature in `0.0..=1.0`.
    pub temperature: f32,

    /// Upper bound on the answer length, in tokens.
    pub max_tokens: u32,
}

/// Wrapper for the `payload` object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestPayload {
    /// The message list.
    pub message: RequestMessage,
}

/// The ordered message list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestMessage {
    /// Every prior turn followed by the new user turn.
    pub text: Vec<ConversationTurn>,
}

impl ChatRequest {
    /// Create a request from its parts.
    pub fn new(app_id: impl Into<String>, chat: ChatParameter, text: Vec<ConversationTurn>) -> Self {
        Self {
            header: RequestHeader {
                app_id: app_id.into(),
                uid: new_uid(),
            },
            parameter: Parameter { chat },
            payload: RequestPayload {
                message: RequestMessage { text },
            },
        }
    }

    /// Build the request for `question` and record the question in `history`.
    ///
    /// The user turn is appended before any response is known, so it stays in the
    /// history even if the exchange later fails.
    pub fn for_question(
        app_id: impl Into<String>,
        chat: ChatParameter,
        history: &mut History,
        question: &str,
    ) -> Self {
        history.append(ConversationTurn::user(question));
        Self::new(app_id, chat, history.snapshot())
    }

    /// Serialize the request as a text frame.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn new_uid() -> String {
    let mut uid = uuid::Uuid::new_v4().simple().to_string();
    uid.truncate(UID_LEN);
    uid
}
