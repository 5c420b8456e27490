use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::auth;
use crate::config::{Credentials, SparkConfig, validate_temperature};
use crate::error::{Error, Result};
use crate::exchange::{self, ExchangeState, Output, RequestTemplate, SharedExchange, lock};
use crate::history::History;
use crate::observability::{EXCHANGE_REJECTED_BUSY, EXCHANGES};
use crate::render::SharedRenderer;
use crate::transport::{Connector, WebSocketConnector};
use crate::types::{ChatParameter, ConversationTurn, Endpoint};

/// Counters for one client's exchanges.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Exchanges started.
    pub exchanges: u64,
    /// Exchanges that produced an answer.
    pub completed: u64,
    /// Fragments received during the most recent exchange.
    pub last_fragments: usize,
    /// Fragments received over the client's lifetime.
    pub total_fragments: u64,
}

/// Client for the Spark chat service.
///
/// A client owns one conversation.  Each [`Spark::send_message`] opens a fresh
/// signed connection, sends the whole history plus the new question, and
/// streams the answer back.  One exchange may be outstanding at a time.
pub struct Spark {
    credentials: Credentials,
    endpoint: Endpoint,
    url: Url,
    chat: ChatParameter,
    timeout: Duration,
    stream_output: bool,
    output: Option<SharedRenderer>,
    connector: Arc<dyn Connector>,
    history: Arc<Mutex<History>>,
    in_flight: AtomicBool,
    stats: Mutex<SessionStats>,
}

impl Spark {
    /// Create a new Spark client that connects over WebSocket.
    ///
    /// Missing credentials are read from `SPARK_API_KEY`, `SPARK_API_SECRET`,
    /// and `SPARK_APP_ID`.  The configuration is validated here; an invalid
    /// configuration never produces a client.
    pub fn new(config: SparkConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    /// Create a new client that opens its connections through `connector`.
    pub fn with_connector(config: SparkConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let credentials = config.credentials()?;
        config.validate()?;
        let url = config.endpoint.resolve()?;
        Ok(Self {
            credentials,
            url,
            chat: ChatParameter {
                domain: config.endpoint.domain.clone(),
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            },
            endpoint: config.endpoint,
            timeout: config.timeout,
            stream_output: config.stream_output,
            output: None,
            connector,
            history: Arc::new(Mutex::new(History::new())),
            in_flight: AtomicBool::new(false),
            stats: Mutex::new(SessionStats::default()),
        })
    }

    /// Write answers to `renderer`, incrementally when streaming output is enabled.
    pub fn with_output(mut self, renderer: SharedRenderer) -> Self {
        self.output = Some(renderer);
        self
    }

    /// Ask `question` and wait for the complete answer.
    ///
    /// The question is added to the history when the request is sent and stays
    /// there whether or not an answer arrives.  The answer is added only on
    /// success.  Fails with a busy error if another exchange is outstanding and
    /// with a timeout error if no resolution arrives within the configured
    /// timeout.
    pub async fn send_message(&self, question: &str) -> Result<String> {
        let _in_flight = InFlight::acquire(&self.in_flight)?;
        EXCHANGES.click();
        lock(&self.stats).exchanges += 1;

        let signed = auth::sign(
            &self.url,
            &self.credentials.api_key,
            &self.credentials.api_secret,
            OffsetDateTime::now_utc(),
        )?;
        let url = auth::to_websocket_url(&signed)?;
        let template = RequestTemplate {
            app_id: self.credentials.app_id.clone(),
            chat: self.chat.clone(),
        };
        let output = self.output.as_ref().map(|renderer| Output {
            renderer: Arc::clone(renderer),
            incremental: self.stream_output,
        });
        let (exchange, mut gate) =
            exchange::Exchange::new(question, template, Arc::clone(&self.history), output);
        let exchange = exchange.into_shared();
        debug!(endpoint = %self.endpoint, "starting exchange");
        let task = tokio::spawn(exchange::drive(
            Arc::clone(&self.connector),
            url,
            Arc::clone(&exchange),
        ));
        let guard = AbandonGuard {
            exchange: Arc::clone(&exchange),
            task,
        };

        let result = match tokio::time::timeout(self.timeout, &mut gate).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::connection("exchange ended without an answer", None)),
            Err(_) => {
                lock(&exchange).on_timeout(self.timeout);
                guard.task.abort();
                // Whichever resolution won the race is the one reported.
                gate.try_recv().unwrap_or_else(|_| {
                    Err(Error::timeout(
                        format!("no answer within {:?}", self.timeout),
                        Some(self.timeout.as_secs_f64()),
                    ))
                })
            }
        };
        drop(guard);

        let (state, fragments) = {
            let exchange = lock(&exchange);
            (exchange.state(), exchange.pending().fragment_count)
        };
        {
            let mut stats = lock(&self.stats);
            stats.last_fragments = fragments;
            stats.total_fragments += fragments as u64;
            if state == ExchangeState::Completed {
                stats.completed += 1;
            }
        }
        info!(state = ?state, fragments, "exchange finished");
        result
    }

    /// A copy of the conversation so far.
    pub fn history(&self) -> Vec<ConversationTurn> {
        lock(&self.history).snapshot()
    }

    /// Forget the conversation so far.
    pub fn clear_history(&self) {
        lock(&self.history).clear();
    }

    /// Counters for this client's exchanges.
    pub fn stats(&self) -> SessionStats {
        *lock(&self.stats)
    }

    /// True while an exchange is outstanding.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// The endpoint this client talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The sampling parameters sent with each request.
    pub fn chat_parameter(&self) -> &ChatParameter {
        &self.chat
    }

    /// The bound on one exchange.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Point later exchanges at `endpoint`.  The history is kept.
    pub fn set_endpoint(&mut self, endpoint: Endpoint) -> Result<()> {
        self.url = endpoint.resolve()?;
        self.chat.domain = endpoint.domain.clone();
        self.endpoint = endpoint;
        Ok(())
    }

    /// Change the sampling temperature of later exchanges.
    pub fn set_temperature(&mut self, temperature: f32) -> Result<()> {
        validate_temperature(temperature)?;
        self.chat.temperature = temperature;
        Ok(())
    }

    /// Enable or disable incremental output for later exchanges.
    pub fn set_stream_output(&mut self, stream_output: bool) {
        self.stream_output = stream_output;
    }
}

impl std::fmt::Debug for Spark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spark")
            .field("credentials", &self.credentials)
            .field("endpoint", &self.endpoint)
            .field("chat", &self.chat)
            .field("timeout", &self.timeout)
            .field("stream_output", &self.stream_output)
            .finish_non_exhaustive()
    }
}

/// Marks a client busy for the lifetime of one exchange.
#[derive(Debug)]
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            EXCHANGE_REJECTED_BUSY.click();
            return Err(Error::busy("another exchange is already in flight"));
        }
        Ok(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Stops an unresolved exchange when its caller stops waiting for it.
///
/// A resolved exchange is left alone so its driver can close the connection.
struct AbandonGuard {
    exchange: SharedExchange,
    task: JoinHandle<()>,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        let mut exchange = lock(&self.exchange);
        if !exchange.state().is_terminal() {
            exchange.on_close(None, "caller stopped waiting");
            self.task.abort();
        }
    }
}
