//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and the resolved
//! configuration the REPL runs with.

use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::config::SparkConfig;
use crate::error::{Error, Result};
use crate::types::ModelType;

/// Command-line arguments for the spark-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq)]
pub struct ChatArgs {
    /// Model to use for chat.
    #[arrrg(optional, "Model to use: lite, pro, pro-128k, max, max-32k, 4.0-ultra (default: pro)", "MODEL")]
    pub model: Option<String>,

    /// Sampling temperature.
    #[arrrg(optional, "Sampling temperature 0.0-1.0 (default: 0.5)", "TEMP")]
    pub temperature: Option<f32>,

    /// Maximum tokens per answer.
    #[arrrg(optional, "Max tokens per answer (default: 4096)", "TOKENS")]
    pub max_tokens: Option<u32>,

    /// Seconds to wait for one answer.
    #[arrrg(optional, "Seconds to wait for an answer (default: 30)", "SECONDS")]
    pub timeout: Option<u64>,

    /// Print answers whole instead of as they stream in.
    #[arrrg(flag, "Print each answer once it is complete")]
    pub no_stream: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

// `arrrg::CommandLine` requires `Eq`; `f32` only provides `PartialEq`.
impl Eq for ChatArgs {}

/// Configuration for a chat session.
///
/// Holds the client configuration plus the settings only the REPL cares about.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// The model the session starts with.
    pub model: ModelType,

    /// Client configuration.  Credentials come from the environment.
    pub spark: SparkConfig,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Model: pro
    /// - Streaming output: enabled
    /// - Color: enabled
    pub fn new() -> Self {
        let model = ModelType::default();
        Self {
            model,
            spark: SparkConfig::new().with_model(model).with_stream_output(true),
            use_color: true,
        }
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: ModelType) -> Self {
        self.model = model;
        self.spark = self.spark.with_model(model);
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<ChatArgs> for ChatConfig {
    type Error = Error;

    fn try_from(args: ChatArgs) -> Result<Self> {
        let mut config = ChatConfig::new();
        if let Some(model) = args.model {
            config = config.with_model(model.parse()?);
        }
        let mut spark = config.spark;
        if let Some(temperature) = args.temperature {
            spark = spark.with_temperature(temperature);
        }
        if let Some(max_tokens) = args.max_tokens {
            spark = spark.with_max_tokens(max_tokens);
        }
        if let Some(timeout) = args.timeout {
            spark = spark.with_timeout(Duration::from_secs(timeout));
        }
        spark.validate()?;
        Ok(ChatConfig {
            spark: spark.with_stream_output(!args.no_stream),
            use_color: !args.no_color,
            ..config
        })
    }
}
