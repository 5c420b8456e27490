//! One question-to-answer cycle over a streaming connection.
//!
//! An [`Exchange`] is an explicit state machine:
//!
//! ```text
//! Connecting -> Streaming -> { Completed | Failed | TimedOut | ClosedEarly }
//! ```
//!
//! The four right-hand states are terminal.  Whichever of completion, remote
//! error, transport failure, early close, or timeout arrives first resolves the
//! exchange and fires its one-shot gate; every later signal is ignored.
//!
//! The exchange is shared between the driver task, which feeds it transport
//! events, and the caller, which may time it out.  Both go through the same
//! mutex, so the terminal check and the transition happen atomically.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::history::History;
use crate::observability::{
    EXCHANGE_CLOSED_EARLY, EXCHANGE_COMPLETED, EXCHANGE_DURATION, EXCHANGE_LATE_EVENTS,
    EXCHANGE_REMOTE_ERRORS, EXCHANGE_TIMEOUTS, EXCHANGE_TRANSPORT_ERRORS, STREAM_BYTES,
    STREAM_FRAGMENTS, STREAM_TTFB,
};
use crate::render::SharedRenderer;
use crate::transport::{Connector, Inbound};
use crate::types::{ChatParameter, ChatRequest, ConversationTurn, ResponseFragment, decode_fragment};

/// An exchange shared between its driver task and its caller.
pub type SharedExchange = Arc<Mutex<Exchange>>;

/// The receiving half of an exchange's one-shot gate.
pub type Gate = oneshot::Receiver<Result<String>>;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where an exchange stands.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExchangeState {
    /// Waiting for the connection to open.
    Connecting,
    /// The request was sent; fragments are arriving.
    Streaming,
    /// The final fragment arrived.
    Completed,
    /// The service reported an error or the transport failed.
    Failed,
    /// No resolution arrived in time.
    TimedOut,
    /// The connection closed before the final fragment.
    ClosedEarly,
}

impl ExchangeState {
    /// True for the four resolved states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExchangeState::Completed
                | ExchangeState::Failed
                | ExchangeState::TimedOut
                | ExchangeState::ClosedEarly
        )
    }
}

/// Per-call state of one exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingExchange {
    /// The question being asked.
    pub question: String,
    /// Text received so far, in arrival order.
    pub accumulated_answer: String,
    /// Fragments received before resolution.
    pub fragment_count: usize,
    /// True once the exchange has resolved.
    pub terminal: bool,
}

/// Everything needed to frame the request of an exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTemplate {
    /// The application id.
    pub app_id: String,
    /// Model and sampling parameters.
    pub chat: ChatParameter,
}

/// Where answer text goes while an exchange is in flight.
#[derive(Clone)]
pub struct Output {
    /// The destination.
    pub renderer: SharedRenderer,
    /// Write each fragment as it arrives instead of the whole answer at the end.
    pub incremental: bool,
}

/// The state machine of one question-to-answer cycle.
pub struct Exchange {
    state: ExchangeState,
    pending: PendingExchange,
    template: RequestTemplate,
    history: Arc<Mutex<History>>,
    output: Option<Output>,
    gate: Option<oneshot::Sender<Result<String>>>,
    started: Instant,
    first_fragment: Option<Instant>,
}

impl Exchange {
    /// Begin an exchange for `question`.
    ///
    /// Returns the exchange in [`ExchangeState::Connecting`] and the gate that
    /// fires exactly once when it resolves.
    pub fn new(
        question: impl Into<String>,
        template: RequestTemplate,
        history: Arc<Mutex<History>>,
        output: Option<Output>,
    ) -> (Self, Gate) {
        let (tx, rx) = oneshot::channel();
        let this = Self {
            state: ExchangeState::Connecting,
            pending: PendingExchange {
                question: question.into(),
                ..PendingExchange::default()
            },
            template,
            history,
            output,
            gate: Some(tx),
            started: Instant::now(),
            first_fragment: None,
        };
        (this, rx)
    }

    /// Wrap this exchange for sharing with its driver.
    pub fn into_shared(self) -> SharedExchange {
        Arc::new(Mutex::new(self))
    }

    /// The current state.
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// The per-call state.
    pub fn pending(&self) -> &PendingExchange {
        &self.pending
    }

    /// The connection opened: record the question and return the frame to send.
    ///
    /// The user turn is appended to history here, before any answer is known,
    /// and is not removed if the exchange later fails.  Returns `None` if the
    /// exchange is no longer connecting.
    pub fn on_open(&mut self) -> Option<String> {
        if self.state != ExchangeState::Connecting {
            self.late("open");
            return None;
        }
        let request = {
            let mut history = lock(&self.history);
            ChatRequest::for_question(
                self.template.app_id.clone(),
                self.template.chat.clone(),
                &mut history,
                &self.pending.question,
            )
        };
        match request.to_frame() {
            Ok(frame) => {
                debug!(turns = request.payload.message.text.len(), "exchange streaming");
                self.state = ExchangeState::Streaming;
                Some(frame)
            }
            Err(err) => {
                self.resolve(ExchangeState::Failed, Err(err));
                None
            }
        }
    }

    /// Process one decoded fragment.  Returns true once the exchange is resolved.
    pub fn on_fragment(&mut self, fragment: ResponseFragment) -> bool {
        if self.state.is_terminal() {
            self.late("fragment");
            return true;
        }
        self.pending.fragment_count += 1;
        STREAM_FRAGMENTS.click();
        if self.first_fragment.is_none() {
            self.first_fragment = Some(Instant::now());
            STREAM_TTFB.add(self.started.elapsed().as_secs_f64());
        }

        if fragment.is_error() {
            warn!(
                code = fragment.remote_error_code,
                sid = fragment.sid.as_deref().unwrap_or(""),
                message = %fragment.remote_error_message,
                "remote error"
            );
            EXCHANGE_REMOTE_ERRORS.click();
            let err = Error::remote_protocol(
                fragment.remote_error_code,
                fragment.remote_error_message,
                fragment.sid,
            );
            self.resolve(ExchangeState::Failed, Err(err));
            return true;
        }

        for piece in &fragment.text_pieces {
            STREAM_BYTES.count(piece.len() as u64);
            self.pending.accumulated_answer.push_str(piece);
        }
        if let Some(output) = self.output.as_ref().filter(|output| output.incremental) {
            let mut renderer = lock(&output.renderer);
            for piece in &fragment.text_pieces {
                renderer.print_text(piece);
            }
            renderer.flush();
        }
        debug!(
            status = fragment.status_code,
            pieces = fragment.text_pieces.len(),
            fragments = self.pending.fragment_count,
            "fragment"
        );

        if !fragment.is_final {
            return false;
        }
        let answer = self.pending.accumulated_answer.clone();
        lock(&self.history).append(ConversationTurn::assistant(answer.clone()));
        if let Some(output) = &self.output {
            let mut renderer = lock(&output.renderer);
            if output.incremental {
                renderer.finish_response();
            } else {
                renderer.print_answer(&answer);
            }
        }
        EXCHANGE_COMPLETED.click();
        self.resolve(ExchangeState::Completed, Ok(answer));
        true
    }

    /// An inbound frame could not be decoded.
    pub fn on_decode_error(&mut self, err: Error) -> bool {
        if self.state.is_terminal() {
            self.late("undecodable frame");
            return true;
        }
        warn!(error = %err, "undecodable frame");
        EXCHANGE_TRANSPORT_ERRORS.click();
        self.resolve(ExchangeState::Failed, Err(err));
        true
    }

    /// The transport failed.
    pub fn on_transport_error(&mut self, err: Error) -> bool {
        if self.state.is_terminal() {
            self.late("transport error");
            return true;
        }
        warn!(error = %err, "transport failure");
        EXCHANGE_TRANSPORT_ERRORS.click();
        self.resolve(ExchangeState::Failed, Err(err));
        true
    }

    /// The connection closed.
    pub fn on_close(&mut self, code: Option<u16>, reason: &str) -> bool {
        if self.state.is_terminal() {
            debug!(?code, "close after resolution");
            return true;
        }
        warn!(?code, reason, state = ?self.state, "connection closed before the answer completed");
        EXCHANGE_CLOSED_EARLY.click();
        let message = match code {
            Some(code) if reason.is_empty() => {
                format!("connection closed before the answer completed (code {code})")
            }
            Some(code) => {
                format!("connection closed before the answer completed (code {code}: {reason})")
            }
            None => "connection closed before the answer completed".to_string(),
        };
        self.resolve(ExchangeState::ClosedEarly, Err(Error::connection(message, None)));
        true
    }

    /// No resolution arrived within `after`.
    pub fn on_timeout(&mut self, after: Duration) -> bool {
        if self.state.is_terminal() {
            self.late("timeout");
            return true;
        }
        warn!(after = ?after, fragments = self.pending.fragment_count, "exchange timed out");
        EXCHANGE_TIMEOUTS.click();
        let err = Error::timeout(
            format!(
                "no answer within {:?} after {} fragments",
                after, self.pending.fragment_count
            ),
            Some(after.as_secs_f64()),
        );
        self.resolve(ExchangeState::TimedOut, Err(err));
        true
    }

    fn resolve(&mut self, state: ExchangeState, result: Result<String>) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.pending.terminal = true;
        EXCHANGE_DURATION.add(self.started.elapsed().as_secs_f64());
        debug!(state = ?state, fragments = self.pending.fragment_count, "exchange resolved");
        if let Some(gate) = self.gate.take() {
            // The caller may already have stopped waiting.
            let _ = gate.send(result);
        }
    }

    fn late(&self, what: &str) {
        EXCHANGE_LATE_EVENTS.click();
        debug!(state = ?self.state, what, "ignoring event for resolved exchange");
    }
}

/// Run an exchange over a fresh connection to `url`.
///
/// Opens the connection, sends the single request frame, and feeds every
/// inbound event to the exchange in arrival order until it resolves.  The
/// connection is closed on the way out.
pub async fn drive(connector: Arc<dyn Connector>, url: Url, exchange: SharedExchange) {
    let mut conn = match connector.connect(&url).await {
        Ok(conn) => conn,
        Err(err) => {
            lock(&exchange).on_transport_error(err);
            return;
        }
    };

    let frame = lock(&exchange).on_open();
    let Some(frame) = frame else {
        let _ = conn.close().await;
        return;
    };
    if let Err(err) = conn.send_text(frame).await {
        lock(&exchange).on_transport_error(err);
        let _ = conn.close().await;
        return;
    }

    loop {
        let resolved = match conn.recv().await {
            Some(Ok(Inbound::Text(text))) => {
                let mut exchange = lock(&exchange);
                match decode_fragment(&text) {
                    Ok(fragment) => exchange.on_fragment(fragment),
                    Err(err) => exchange.on_decode_error(err),
                }
            }
            Some(Ok(Inbound::Closed { code, reason })) => {
                lock(&exchange).on_close(code, &reason);
                return;
            }
            Some(Err(err)) => lock(&exchange).on_transport_error(err),
            None => lock(&exchange).on_close(None, ""),
        };
        if resolved {
            break;
        }
    }
    if let Err(err) = conn.close().await {
        debug!(error = %err, "close after resolution failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Renderer;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<String>>>);

    impl Capture {
        fn writes(&self) -> Vec<String> {
            lock(&self.0).clone()
        }
    }

    impl Renderer for Capture {
        fn print_text(&mut self, text: &str) {
            lock(&self.0).push(text.to_string());
        }

        fn flush(&mut self) {
            lock(&self.0).push("<flush>".to_string());
        }

        fn finish_response(&mut self) {
            lock(&self.0).push("<end>".to_string());
        }

        fn print_error(&mut self, error: &str) {
            lock(&self.0).push(format!("<error {error}>"));
        }

        fn print_info(&mut self, info: &str) {
            lock(&self.0).push(format!("<info {info}>"));
        }
    }

    fn template() -> RequestTemplate {
        RequestTemplate {
            app_id: "app".to_string(),
            chat: ChatParameter {
                domain: "generalv3".to_string(),
                temperature: 0.5,
                max_tokens: 4096,
            },
        }
    }

    fn fragment(status: i64, pieces: &[&str]) -> ResponseFragment {
        ResponseFragment {
            status_code: status,
            is_final: status == 2,
            text_pieces: pieces.iter().map(|piece| piece.to_string()).collect(),
            ..ResponseFragment::default()
        }
    }

    fn remote_error(code: i64, message: &str) -> ResponseFragment {
        ResponseFragment {
            status_code: 2,
            remote_error_code: code,
            remote_error_message: message.to_string(),
            is_final: true,
            sid: Some("cht-sid".to_string()),
            ..ResponseFragment::default()
        }
    }

    fn open(question: &str, output: Option<Output>) -> (Exchange, Gate, Arc<Mutex<History>>) {
        let history = Arc::new(Mutex::new(History::new()));
        let (mut exchange, gate) = Exchange::new(question, template(), Arc::clone(&history), output);
        assert!(exchange.on_open().is_some());
        (exchange, gate, history)
    }

    #[test]
    fn two_fragments_make_hello() {
        let (mut exchange, mut gate, history) = open("hi", None);
        assert!(!exchange.on_fragment(fragment(1, &["Hel"])));
        assert_eq!(exchange.state(), ExchangeState::Streaming);
        assert!(exchange.on_fragment(fragment(2, &["lo"])));
        assert_eq!(exchange.state(), ExchangeState::Completed);
        assert_eq!(gate.try_recv().unwrap().unwrap(), "Hello");
        assert_eq!(
            lock(&history).snapshot(),
            vec![ConversationTurn::user("hi"), ConversationTurn::assistant("Hello")]
        );
    }

    #[test]
    fn accumulation_is_arrival_order_concatenation() {
        let (mut exchange, mut gate, _) = open("count", None);
        let mut expected = String::new();
        for i in 0..25 {
            let pieces = [format!("{i}"), ",".to_string()];
            expected.push_str(&pieces.concat());
            let pieces: Vec<&str> = pieces.iter().map(String::as_str).collect();
            assert!(!exchange.on_fragment(fragment(1, &pieces)));
        }
        exchange.on_fragment(fragment(2, &[]));
        assert_eq!(exchange.pending().accumulated_answer, expected);
        assert_eq!(exchange.pending().fragment_count, 26);
        assert!(exchange.pending().terminal);
        assert_eq!(gate.try_recv().unwrap().unwrap(), expected);
    }

    #[test]
    fn close_after_completion_is_ignored() {
        let (mut exchange, mut gate, history) = open("hi", None);
        exchange.on_fragment(fragment(2, &["done"]));
        assert!(exchange.on_close(Some(1000), ""));
        assert!(exchange.on_transport_error(Error::connection("reset", None)));
        assert!(exchange.on_timeout(Duration::from_secs(30)));
        assert_eq!(exchange.state(), ExchangeState::Completed);
        assert_eq!(gate.try_recv().unwrap().unwrap(), "done");
        assert_eq!(lock(&history).len(), 2);
    }

    #[test]
    fn remote_error_keeps_user_turn_only() {
        let (mut exchange, mut gate, history) = open("hi", None);
        exchange.on_fragment(fragment(1, &["partial"]));
        assert!(exchange.on_fragment(remote_error(10013, "audit failed")));
        assert_eq!(exchange.state(), ExchangeState::Failed);
        let err = gate.try_recv().unwrap().unwrap_err();
        assert_eq!(err.remote_code(), Some(10013));
        assert_eq!(err.sid(), Some("cht-sid"));
        // The user turn is intentionally not rolled back.
        assert_eq!(lock(&history).snapshot(), vec![ConversationTurn::user("hi")]);
    }

    #[test]
    fn close_before_final_is_closed_early() {
        let (mut exchange, mut gate, history) = open("hi", None);
        exchange.on_fragment(fragment(1, &["par"]));
        assert!(exchange.on_close(Some(1006), "abnormal"));
        assert_eq!(exchange.state(), ExchangeState::ClosedEarly);
        let err = gate.try_recv().unwrap().unwrap_err();
        assert!(err.is_connection());
        assert!(err.to_string().contains("1006"));
        assert_eq!(lock(&history).len(), 1);
    }

    #[test]
    fn late_final_after_timeout_changes_nothing() {
        let capture = Capture::default();
        let output = Output {
            renderer: crate::render::shared(capture.clone()),
            incremental: true,
        };
        let (mut exchange, mut gate, history) = open("hi", Some(output));
        exchange.on_fragment(fragment(1, &["a"]));
        assert!(exchange.on_timeout(Duration::from_secs(30)));
        let writes_at_timeout = capture.writes();

        assert!(exchange.on_fragment(fragment(2, &["b"])));
        assert_eq!(exchange.state(), ExchangeState::TimedOut);
        assert_eq!(exchange.pending().accumulated_answer, "a");
        assert!(gate.try_recv().unwrap().unwrap_err().is_timeout());
        assert_eq!(capture.writes(), writes_at_timeout);
        assert_eq!(lock(&history).snapshot(), vec![ConversationTurn::user("hi")]);
    }

    #[test]
    fn incremental_output_is_flushed_per_fragment() {
        let capture = Capture::default();
        let output = Output {
            renderer: crate::render::shared(capture.clone()),
            incremental: true,
        };
        let (mut exchange, _gate, _) = open("hi", Some(output));
        exchange.on_fragment(fragment(1, &["Hel", "l"]));
        exchange.on_fragment(fragment(2, &["o"]));
        assert_eq!(
            capture.writes(),
            vec!["Hel", "l", "<flush>", "o", "<flush>", "<end>"]
        );
    }

    #[test]
    fn whole_answer_output_is_written_once() {
        let capture = Capture::default();
        let output = Output {
            renderer: crate::render::shared(capture.clone()),
            incremental: false,
        };
        let (mut exchange, _gate, _) = open("hi", Some(output));
        exchange.on_fragment(fragment(1, &["Hel"]));
        assert!(capture.writes().is_empty());
        exchange.on_fragment(fragment(2, &["lo"]));
        assert_eq!(capture.writes(), vec!["Hello", "<end>"]);
    }

    #[test]
    fn open_happens_once() {
        let (mut exchange, _gate, history) = open("hi", None);
        assert!(exchange.on_open().is_none());
        assert_eq!(lock(&history).len(), 1);
    }

    #[test]
    fn timeout_while_connecting_skips_open() {
        let history = Arc::new(Mutex::new(History::new()));
        let (mut exchange, mut gate) = Exchange::new("hi", template(), Arc::clone(&history), None);
        exchange.on_timeout(Duration::from_secs(1));
        assert!(exchange.on_open().is_none());
        assert!(lock(&history).is_empty());
        assert!(gate.try_recv().unwrap().unwrap_err().is_timeout());
    }
}
