//! Client configuration.
//!
//! [`SparkConfig`] collects credentials, endpoint, and sampling settings.  It is
//! validated once, when the client is constructed; a misconfigured client never
//! gets as far as a send.

use std::env;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{Endpoint, ModelType};

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.5;

/// Default maximum tokens per answer.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Default bound on how long one exchange may take.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable consulted when no API key is configured.
pub const API_KEY_VAR: &str = "SPARK_API_KEY";

/// Environment variable consulted when no API secret is configured.
pub const API_SECRET_VAR: &str = "SPARK_API_SECRET";

/// Environment variable consulted when no app id is configured.
pub const APP_ID_VAR: &str = "SPARK_APP_ID";

/// Validated credentials from the Spark console.
///
/// The `Debug` impl redacts the key and secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// The API key.
    pub api_key: String,
    /// The API secret used to sign connect URLs.
    pub api_secret: String,
    /// The application id.
    pub app_id: String,
}

impl Credentials {
    /// Create credentials.  Call [`Credentials::validate`] before use.
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        app_id: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            app_id: app_id.into(),
        }
    }

    /// Check that every field is present.  All missing fields are reported together.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("api_key", &self.api_key),
            ("api_secret", &self.api_secret),
            ("app_id", &self.app_id),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::configuration(
                format!("{} must be provided", missing.join(", ")),
                Some(missing.join(",")),
            ))
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("app_id", &self.app_id)
            .finish()
    }
}

/// Configuration for a [`Spark`](crate::Spark) client.
#[derive(Clone)]
pub struct SparkConfig {
    /// The API key; falls back to `SPARK_API_KEY`.
    pub api_key: Option<String>,

    /// The API secret; falls back to `SPARK_API_SECRET`.
    pub api_secret: Option<String>,

    /// The application id; falls back to `SPARK_APP_ID`.
    pub app_id: Option<String>,

    /// The endpoint and model domain to talk to.
    pub endpoint: Endpoint,

    /// Sampling temperature in `0.0..=1.0`.
    pub temperature: f32,

    /// Maximum tokens per answer.
    pub max_tokens: u32,

    /// Bound on one exchange, from send to resolution.
    pub timeout: Duration,

    /// Write answer text to the output as it streams in.
    pub stream_output: bool,
}

impl SparkConfig {
    /// Creates a new SparkConfig with default values.
    ///
    /// Defaults:
    /// - Endpoint: Spark Pro
    /// - Temperature: 0.5
    /// - Max tokens: 4096
    /// - Timeout: 30 seconds
    /// - Streaming output: disabled
    pub fn new() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            app_id: None,
            endpoint: ModelType::default().endpoint(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_TIMEOUT,
            stream_output: false,
        }
    }

    /// Sets the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the API secret.
    pub fn with_api_secret(mut self, api_secret: impl Into<String>) -> Self {
        self.api_secret = Some(api_secret.into());
        self
    }

    /// Sets the application id.
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Sets all three credentials at once.
    pub fn with_credentials(self, credentials: Credentials) -> Self {
        self.with_api_key(credentials.api_key)
            .with_api_secret(credentials.api_secret)
            .with_app_id(credentials.app_id)
    }

    /// Targets one of the known service tiers.
    pub fn with_model(mut self, model: ModelType) -> Self {
        self.endpoint = model.endpoint();
        self
    }

    /// Targets a custom endpoint.
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Sets the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the maximum tokens per answer.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the exchange timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enables or disables streaming output.
    pub fn with_stream_output(mut self, stream_output: bool) -> Self {
        self.stream_output = stream_output;
        self
    }

    /// Resolve credentials from the config, then from the environment.
    pub fn credentials(&self) -> Result<Credentials> {
        let resolve = |value: &Option<String>, var: &str| {
            value
                .clone()
                .or_else(|| env::var(var).ok())
                .unwrap_or_default()
        };
        let credentials = Credentials::new(
            resolve(&self.api_key, API_KEY_VAR),
            resolve(&self.api_secret, API_SECRET_VAR),
            resolve(&self.app_id, APP_ID_VAR),
        );
        credentials.validate()?;
        Ok(credentials)
    }

    /// Check the non-credential settings.
    pub fn validate(&self) -> Result<()> {
        validate_temperature(self.temperature)?;
        if self.max_tokens == 0 {
            return Err(Error::configuration(
                "max_tokens must be positive",
                Some("max_tokens".to_string()),
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::configuration(
                "timeout must be positive",
                Some("timeout".to_string()),
            ));
        }
        self.endpoint.resolve()?;
        Ok(())
    }
}

impl Default for SparkConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SparkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("SparkConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .field("app_id", &self.app_id)
            .field("endpoint", &self.endpoint)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .field("stream_output", &self.stream_output)
            .finish()
    }
}

pub(crate) fn validate_temperature(temperature: f32) -> Result<()> {
    if temperature.is_finite() && (0.0..=1.0).contains(&temperature) {
        Ok(())
    } else {
        Err(Error::configuration(
            format!("temperature must be between 0.0 and 1.0, got {temperature}"),
            Some("temperature".to_string()),
        ))
    }
}
