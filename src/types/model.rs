use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::{Error, Result};

/// Identifies a Spark service endpoint and the model domain it serves.
///
/// The domain travels in the request body (`parameter.chat.domain`), never in the URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// The HTTP(S) URL of the chat endpoint, e.g. `https://spark-api.xf-yun.com/v3.1/chat`.
    pub url: String,

    /// The model domain sent with every request, e.g. `generalv3`.
    pub domain: String,
}

impl Endpoint {
    /// Create a new endpoint from a URL and a model domain.
    pub fn new(url: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            domain: domain.into(),
        }
    }

    /// Parse and validate the endpoint URL.
    ///
    /// The URL must use one of `http`, `https`, `ws`, or `wss` and must name a host.
    pub fn resolve(&self) -> Result<Url> {
        let url = Url::parse(&self.url).map_err(|err| {
            Error::configuration(
                format!("endpoint {:?} is not a valid URL: {err}", self.url),
                Some("endpoint".to_string()),
            )
        })?;
        if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(Error::configuration(
                format!("endpoint scheme {:?} is not supported", url.scheme()),
                Some("endpoint".to_string()),
            ));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(Error::configuration(
                format!("endpoint {:?} has no host", self.url),
                Some("endpoint".to_string()),
            ));
        }
        if self.domain.trim().is_empty() {
            return Err(Error::configuration(
                "model domain must not be empty",
                Some("domain".to_string()),
            ));
        }
        Ok(url)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.domain, self.url)
    }
}

impl From<ModelType> for Endpoint {
    fn from(model: ModelType) -> Self {
        Endpoint::new(model.url(), model.domain())
    }
}

/// Known Spark service tiers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum ModelType {
    /// Spark Lite.
    Lite,

    /// Spark Pro.
    #[default]
    Pro,

    /// Spark Pro with a 128K context window.
    Pro128K,

    /// Spark Max.
    Max,

    /// Spark Max with a 32K context window.
    Max32K,

    /// Spark 4.0 Ultra.
    Ultra40,
}

impl ModelType {
    /// All known tiers, in ascending order of capability.
    pub const ALL: [ModelType; 6] = [
        ModelType::Lite,
        ModelType::Pro,
        ModelType::Pro128K,
        ModelType::Max,
        ModelType::Max32K,
        ModelType::Ultra40,
    ];

    /// The chat endpoint URL for this tier.
    pub fn url(&self) -> &'static str {
        match self {
            ModelType::Lite => "https://spark-api.xf-yun.com/v1.1/chat",
            ModelType::Pro => "https://spark-api.xf-yun.com/v3.1/chat",
            ModelType::Pro128K => "https://spark-api.xf-yun.com/chat/pro-128k",
            ModelType::Max => "https://spark-api.xf-yun.com/v3.5/chat",
            ModelType::Max32K => "https://spark-api.xf-yun.com/chat/max-32k",
            ModelType::Ultra40 => "https://spark-api.xf-yun.com/v4.0/chat",
        }
    }

    /// The `domain` parameter this tier expects.
    pub fn domain(&self) -> &'static str {
        match self {
            ModelType::Lite => "lite",
            ModelType::Pro => "generalv3",
            ModelType::Pro128K => "pro-128k",
            ModelType::Max => "generalv3.5",
            ModelType::Max32K => "max-32k",
            ModelType::Ultra40 => "4.0Ultra",
        }
    }

    /// The endpoint for this tier.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::from(*self)
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::Lite => write!(f, "lite"),
            ModelType::Pro => write!(f, "pro"),
            ModelType::Pro128K => write!(f, "pro-128k"),
            ModelType::Max => write!(f, "max"),
            ModelType::Max32K => write!(f, "max-32k"),
            ModelType::Ultra40 => write!(f, "4.0-ultra"),
        }
    }
}

impl FromStr for ModelType {
    type Err = Error;

    /// Parse a tier by its short name or by its domain, case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        ModelType::ALL
            .into_iter()
            .find(|model| model.to_string() == wanted || model.domain().to_lowercase() == wanted)
            .or(match wanted.as_str() {
                "ultra" | "4.0ultra" => Some(ModelType::Ultra40),
                _ => None,
            })
            .ok_or_else(|| {
                Error::configuration(
                    format!("unknown model type: {s}"),
                    Some("model".to_string()),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tiers_resolve() {
        for model in ModelType::ALL {
            let url = model.endpoint().resolve().unwrap();
            assert_eq!(url.host_str(), Some("spark-api.xf-yun.com"));
            assert_eq!(url.scheme(), "https");
        }
    }

    #[test]
    fn pro_endpoint() {
        let endpoint = ModelType::Pro.endpoint();
        assert_eq!(endpoint.domain, "generalv3");
        assert_eq!(endpoint.resolve().unwrap().path(), "/v3.1/chat");
    }

    #[test]
    fn parse_by_name_or_domain() {
        assert_eq!("lite".parse::<ModelType>().unwrap(), ModelType::Lite);
        assert_eq!("PRO-128K".parse::<ModelType>().unwrap(), ModelType::Pro128K);
        assert_eq!("generalv3.5".parse::<ModelType>().unwrap(), ModelType::Max);
        assert_eq!("4.0Ultra".parse::<ModelType>().unwrap(), ModelType::Ultra40);
        assert_eq!("ultra".parse::<ModelType>().unwrap(), ModelType::Ultra40);
        assert!("gpt-4".parse::<ModelType>().unwrap_err().is_configuration());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for model in ModelType::ALL {
            assert_eq!(model.to_string().parse::<ModelType>().unwrap(), model);
        }
    }

    #[test]
    fn malformed_endpoints_are_rejected() {
        assert!(Endpoint::new("ttps://spark-api.xf-yun.com/chat", "x")
            .resolve()
            .unwrap_err()
            .is_configuration());
        assert!(Endpoint::new("not a url", "x").resolve().is_err());
        assert!(Endpoint::new("https://spark-api.xf-yun.com/v3.1/chat", "  ")
            .resolve()
            .is_err());
    }
}
