//! The message-oriented connection an exchange runs over.
//!
//! [`Connector`] opens a [`Connection`]; the exchange driver sends exactly one
//! text frame and then reads [`Inbound`] events until it resolves.  The
//! production implementation is [`WebSocketConnector`]; [`ScriptedConnector`]
//! replays a fixed script and records what was sent, for tests and offline use.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::error::{Error, Result};

/// One event delivered by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A UTF-8 text frame.
    Text(String),

    /// The peer closed the connection.
    Closed {
        /// Close code, when the peer sent one.
        code: Option<u16>,
        /// Close reason; empty when none was given.
        reason: String,
    },
}

/// An open, message-oriented connection.
#[async_trait::async_trait]
pub trait Connection: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Wait for the next event.  Returns `None` once the stream has ended.
    async fn recv(&mut self) -> Option<Result<Inbound>>;

    /// Close the connection.
    async fn close(&mut self) -> Result<()>;
}

/// Opens connections to signed URLs.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`.
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>>;
}

///////////////////////////////////////// WebSocket /////////////////////////////////////////

/// Connects over WebSocket (`ws://` or `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>> {
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(handshake_error)?;
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

fn handshake_error(err: tokio_tungstenite::tungstenite::Error) -> Error {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Http(response) => {
            let status = response.status();
            let body = response
                .body()
                .as_ref()
                .map(|body| String::from_utf8_lossy(body).into_owned())
                .unwrap_or_default();
            Error::connection(format!("handshake rejected with {status}: {body}"), None)
        }
        err => Error::connection(format!("failed to connect: {err}"), Some(Box::new(err))),
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl Connection for WebSocketConnection {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Inbound>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Inbound::Text(text))),
                Ok(Message::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    return Some(Ok(Inbound::Closed { code, reason }));
                }
                Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {
                    continue;
                }
                Err(err) => return Some(Err(err.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }
}

///////////////////////////////////////// Scripted /////////////////////////////////////////

/// One scripted step of a [`ScriptedConnector`].
#[derive(Debug, Clone)]
pub enum Step {
    /// Deliver a text frame.
    Frame(String),

    /// Deliver a close event.
    Close {
        /// Close code.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },

    /// Deliver a transport error.
    Fail(String),

    /// Sleep before the next step.
    Delay(Duration),

    /// Never deliver anything again.
    Stall,
}

impl Step {
    /// A close event with the normal close code.
    pub fn normal_close() -> Self {
        Step::Close {
            code: Some(1000),
            reason: String::new(),
        }
    }
}

/// A connector that replays a fixed script on every connection.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    script: Vec<Step>,
    refuse: Option<String>,
    sent: Arc<Mutex<Vec<String>>>,
    connected: Arc<Mutex<Vec<Url>>>,
}

impl ScriptedConnector {
    /// Create a connector that replays `script`.
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// Create a connector whose every connection attempt fails with `message`.
    pub fn refusing(message: impl Into<String>) -> Self {
        Self {
            refuse: Some(message.into()),
            ..Self::default()
        }
    }

    /// Every frame sent over any connection so far.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Every URL connected to so far.
    pub fn connected(&self) -> Vec<Url> {
        self.connected
            .lock()
            .map(|connected| connected.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>> {
        if let Ok(mut connected) = self.connected.lock() {
            connected.push(url.clone());
        }
        if let Some(message) = &self.refuse {
            return Err(Error::connection(message.clone(), None));
        }
        Ok(Box::new(ScriptedConnection {
            steps: self.script.iter().cloned().collect(),
            sent: Arc::clone(&self.sent),
            closed: false,
        }))
    }
}

struct ScriptedConnection {
    steps: VecDeque<Step>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: bool,
}

#[async_trait::async_trait]
impl Connection for ScriptedConnection {
    async fn send_text(&mut self, text: String) -> Result<()> {
        if self.closed {
            return Err(Error::connection("send on closed connection", None));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(text);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Inbound>> {
        loop {
            if self.closed {
                return None;
            }
            match self.steps.pop_front()? {
                Step::Frame(text) => return Some(Ok(Inbound::Text(text))),
                Step::Close { code, reason } => {
                    self.closed = true;
                    return Some(Ok(Inbound::Closed { code, reason }));
                }
                Step::Fail(message) => return Some(Err(Error::connection(message, None))),
                Step::Delay(duration) => tokio::time::sleep(duration).await,
                Step::Stall => futures::future::pending::<()>().await,
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
