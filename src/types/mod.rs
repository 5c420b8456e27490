// Public modules
pub mod model;
pub mod request;
pub mod response;
pub mod turn;

// Re-exports
pub use model::{Endpoint, ModelType};
pub use request::{ChatParameter, ChatRequest, Parameter, RequestHeader, RequestMessage, RequestPayload};
pub use response::{
    ChatResponse, Choices, ResponseFragment, ResponseHeader, ResponsePayload, STATUS_FINAL,
    TextPiece, decode_fragment,
};
pub use turn::{ConversationTurn, Role};
