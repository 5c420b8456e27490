//! Connect-URL signing for the Spark WebSocket endpoint.
//!
//! The service authenticates the upgrade request through three query
//! parameters: an RFC 1123 `date`, the `host`, and a base64 `authorization`
//! value carrying an HMAC-SHA256 signature over
//!
//! ```text
//! host: <host>
//! date: <date>
//! GET <path> HTTP/1.1
//! ```
//!
//! Signing is deterministic for a fixed clock value.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use url::Url;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "hmac-sha256";
const SIGNED_HEADERS: &str = "host date request-line";

const RFC1123: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Format `now` as an RFC 1123 date in GMT, e.g. `Wed, 17 May 2023 08:00:00 GMT`.
pub fn rfc1123(now: OffsetDateTime) -> Result<String> {
    now.to_offset(UtcOffset::UTC)
        .format(RFC1123)
        .map_err(|err| Error::signing(format!("cannot format date: {err}")))
}

/// The string the signature is computed over.
pub fn canonical_string(host: &str, date: &str, path: &str) -> String {
    format!("host: {host}\ndate: {date}\nGET {path} HTTP/1.1")
}

/// Base64 HMAC-SHA256 of `canonical` keyed by `api_secret`.
pub fn signature(api_secret: &str, canonical: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(api_secret.as_bytes())
        .map_err(|err| Error::signing(format!("cannot key HMAC: {err}")))?;
    mac.update(canonical.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// The plain (not yet base64-encoded) authorization value.
pub fn authorization_value(api_key: &str, signature: &str) -> String {
    format!(
        "api_key=\"{api_key}\", algorithm=\"{ALGORITHM}\", headers=\"{SIGNED_HEADERS}\", signature=\"{signature}\""
    )
}

/// Sign `endpoint` at time `now`.
///
/// Returns the endpoint's scheme, host, and path with `authorization`, `date`,
/// and `host` query parameters appended.  Use [`to_websocket_url`] to obtain the
/// URL to connect to.
pub fn sign(endpoint: &Url, api_key: &str, api_secret: &str, now: OffsetDateTime) -> Result<Url> {
    let host = endpoint
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| Error::signing(format!("endpoint {endpoint} has no host")))?;
    let path = endpoint.path();
    let date = rfc1123(now)?;

    let canonical = canonical_string(host, &date, path);
    let signature = signature(api_secret, &canonical)?;
    let authorization = STANDARD.encode(authorization_value(api_key, &signature));

    let mut url = endpoint.clone();
    url.set_fragment(None);
    url.set_query(None);
    url.query_pairs_mut()
        .append_pair("authorization", &authorization)
        .append_pair("date", &date)
        .append_pair("host", host);
    Ok(url)
}

/// Rewrite `http` to `ws` and `https` to `wss`.
pub fn to_websocket_url(url: &Url) -> Result<Url> {
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(Error::signing(format!("cannot upgrade {other} URL to WebSocket"))),
    };
    let mut upgraded = url.clone();
    upgraded
        .set_scheme(scheme)
        .map_err(|_| Error::signing(format!("cannot set scheme {scheme} on {url}")))?;
    Ok(upgraded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const DATE: &str = "Wed, 17 May 2023 08:00:00 GMT";
    const SIGNATURE: &str = "f/J1zdPiGw7WBYma7YvPTxGOl+H7qcHIs7E/5j/Ff/w=";

    fn endpoint() -> Url {
        Url::parse("https://spark-api.xf-yun.com/v3.1/chat").unwrap()
    }

    #[test]
    fn formats_rfc1123_in_gmt() {
        assert_eq!(rfc1123(datetime!(2023-05-17 08:00:00 UTC)).unwrap(), DATE);
        assert_eq!(rfc1123(datetime!(2023-05-17 16:00:00 +8)).unwrap(), DATE);
        assert_eq!(
            rfc1123(datetime!(2024-01-05 09:03:07 UTC)).unwrap(),
            "Fri, 05 Jan 2024 09:03:07 GMT"
        );
    }

    #[test]
    fn canonical_string_layout() {
        assert_eq!(
            canonical_string("spark-api.xf-yun.com", DATE, "/v3.1/chat"),
            "host: spark-api.xf-yun.com\ndate: Wed, 17 May 2023 08:00:00 GMT\nGET /v3.1/chat HTTP/1.1"
        );
    }

    #[test]
    fn known_signature() {
        let canonical = canonical_string("spark-api.xf-yun.com", DATE, "/v3.1/chat");
        assert_eq!(signature("secret", &canonical).unwrap(), SIGNATURE);
    }

    #[test]
    fn signed_url_carries_three_parameters() {
        let url = sign(&endpoint(), "key", "secret", datetime!(2023-05-17 08:00:00 UTC)).unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("spark-api.xf-yun.com"));
        assert_eq!(url.path(), "/v3.1/chat");

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].0, "authorization");
        assert_eq!(pairs[1], ("date".to_string(), DATE.to_string()));
        assert_eq!(
            pairs[2],
            ("host".to_string(), "spark-api.xf-yun.com".to_string())
        );

        let decoded = STANDARD.decode(&pairs[0].1).unwrap();
        assert_eq!(
            String::from_utf8(decoded).unwrap(),
            format!(
                "api_key=\"key\", algorithm=\"hmac-sha256\", headers=\"host date request-line\", signature=\"{SIGNATURE}\""
            )
        );
    }

    #[test]
    fn signing_is_deterministic() {
        let now = datetime!(2023-05-17 08:00:00 UTC);
        let a = sign(&endpoint(), "key", "secret", now).unwrap();
        let b = sign(&endpoint(), "key", "secret", now).unwrap();
        assert_eq!(a, b);

        let later = sign(&endpoint(), "key", "secret", datetime!(2023-05-17 08:00:01 UTC)).unwrap();
        assert_ne!(a, later);
    }

    #[test]
    fn websocket_scheme_rewrite() {
        let signed = sign(&endpoint(), "key", "secret", datetime!(2023-05-17 08:00:00 UTC)).unwrap();
        let ws = to_websocket_url(&signed).unwrap();
        assert_eq!(ws.scheme(), "wss");
        assert_eq!(ws.query(), signed.query());

        let plain = Url::parse("http://localhost:8080/chat").unwrap();
        assert_eq!(to_websocket_url(&plain).unwrap().as_str(), "ws://localhost:8080/chat");

        let ftp = Url::parse("ftp://example.com/chat").unwrap();
        assert!(to_websocket_url(&ftp).unwrap_err().is_signing());
    }

    #[test]
    fn hostless_endpoint_fails() {
        let url = Url::parse("data:text/plain,hello").unwrap();
        let err = sign(&url, "key", "secret", OffsetDateTime::UNIX_EPOCH).unwrap_err();
        assert!(err.is_signing());
    }
}
