//! Off-chain transport.
//!
//! Two seams sit here: [`RegistrationFetcher`] turns a `tokenURI` into raw
//! bytes, and [`ChallengeTransport`] sends the single advisory request used
//! to discover x402 payment requirements. [`HttpTransport`] implements both
//! over one reqwest client.
//!
//! Supported registration URIs:
//! - `data:[<mediatype>][;base64],<payload>`
//! - `ipfs://<cid>[/path]` (resolved through the configured gateway)
//! - `http://` and `https://`

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use tracing::debug;

/// Registration fetch failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("unsupported uri scheme in '{0}'")]
    UnsupportedScheme(String),
    #[error("malformed data uri: {0}")]
    DataUri(String),
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("response from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },
}

/// Fetches registration-file bytes for a `tokenURI`.
#[async_trait]
pub trait RegistrationFetcher: Send + Sync {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, FetchError>;
}

/// Raw response to a payment-challenge probe.
#[derive(Debug, Clone, Default)]
pub struct ChallengeResponse {
    pub status: u16,
    /// Header names lowercased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ChallengeResponse {
    /// First header value with this name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Sends one minimal request to a service endpoint, without retries.
#[async_trait]
pub trait ChallengeTransport: Send + Sync {
    async fn send_probe(
        &self,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<ChallengeResponse, FetchError>;
}

/// Default public IPFS gateway.
pub const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.io";

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    ipfs_gateway: String,
    fetch_timeout: Duration,
    max_bytes: usize,
}

impl HttpTransport {
    pub fn new(ipfs_gateway: impl Into<String>, fetch_timeout: Duration, max_bytes: usize) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("agent-probe/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            ipfs_gateway: ipfs_gateway.into().trim_end_matches('/').to_string(),
            fetch_timeout,
            max_bytes,
        }
    }

    /// Map an `ipfs://` URI onto the gateway. Other URIs pass through.
    pub fn gateway_url(&self, uri: &str) -> String {
        match uri.strip_prefix("ipfs://") {
            Some(rest) => {
                let rest = rest.strip_prefix("ipfs/").unwrap_or(rest);
                format!("{}/ipfs/{}", self.ipfs_gateway, rest)
            }
            None => uri.to_string(),
        }
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        debug!("Fetching registration from {}", url);
        let response = self
            .client
            .get(url)
            .timeout(self.fetch_timeout)
            .send()
            .await
            .map_err(|e| request_error(url, e, self.fetch_timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        read_capped(url, response, self.max_bytes, self.fetch_timeout).await
    }
}

#[async_trait]
impl RegistrationFetcher for HttpTransport {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        let uri = uri.trim();
        if uri.starts_with("data:") {
            let bytes = decode_data_uri(uri)?;
            if bytes.len() > self.max_bytes {
                return Err(FetchError::TooLarge {
                    url: "data uri".to_string(),
                    limit: self.max_bytes,
                });
            }
            return Ok(bytes);
        }
        if uri.starts_with("ipfs://") || uri.starts_with("https://") || uri.starts_with("http://") {
            return self.get(&self.gateway_url(uri)).await;
        }
        Err(FetchError::UnsupportedScheme(uri.chars().take(40).collect()))
    }
}

#[async_trait]
impl ChallengeTransport for HttpTransport {
    async fn send_probe(
        &self,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<ChallengeResponse, FetchError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": {
                    "name": "agent-probe",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }
        });

        let response = self
            .client
            .post(endpoint)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(endpoint, e, timeout))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = read_capped(endpoint, response, self.max_bytes, timeout).await?;

        Ok(ChallengeResponse {
            status,
            headers,
            body,
        })
    }
}

async fn read_capped(
    url: &str,
    response: reqwest::Response,
    limit: usize,
    timeout: Duration,
) -> Result<Vec<u8>, FetchError> {
    if response
        .content_length()
        .is_some_and(|len| len > limit as u64)
    {
        return Err(FetchError::TooLarge {
            url: url.to_string(),
            limit,
        });
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| request_error(url, e, timeout))?;
    if bytes.len() > limit {
        return Err(FetchError::TooLarge {
            url: url.to_string(),
            limit,
        });
    }
    Ok(bytes.to_vec())
}

fn request_error(url: &str, e: reqwest::Error, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
            timeout,
        }
    } else {
        FetchError::Request {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

/// Decode an RFC 2397 data URI into its payload bytes.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, FetchError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| FetchError::DataUri("missing data: prefix".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| FetchError::DataUri("missing ',' separator".to_string()))?;

    if meta.split(';').any(|p| p.eq_ignore_ascii_case("base64")) {
        let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        let payload = urlencoding::decode(&payload)
            .map_err(|e| FetchError::DataUri(e.to_string()))?;
        STANDARD
            .decode(payload.as_bytes())
            .or_else(|_| STANDARD_NO_PAD.decode(payload.trim_end_matches('=').as_bytes()))
            .or_else(|_| URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=').as_bytes()))
            .map_err(|e| FetchError::DataUri(format!("bad base64 payload: {}", e)))
    } else {
        Ok(urlencoding::decode_binary(payload.as_bytes()).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> HttpTransport {
        HttpTransport::new("https://gateway.example/", Duration::from_secs(2), 1024)
    }

    #[test]
    fn decodes_base64_data_uri() {
        let json = r#"{"name":"a"}"#;
        let uri = format!("data:application/json;base64,{}", STANDARD.encode(json));
        assert_eq!(decode_data_uri(&uri).unwrap(), json.as_bytes());
    }

    #[test]
    fn decodes_unpadded_base64_data_uri() {
        let json = r#"{"name":"a?>"}"#;
        let payload = STANDARD_NO_PAD.encode(json);
        assert!(payload.contains('/') || payload.contains('+'));
        let uri = format!("data:application/json;base64,{}", payload);
        assert_eq!(decode_data_uri(&uri).unwrap(), json.as_bytes());
    }

    #[test]
    fn decodes_percent_encoded_data_uri() {
        let uri = "data:application/json,%7B%22name%22%3A%22a%22%7D";
        assert_eq!(decode_data_uri(uri).unwrap(), br#"{"name":"a"}"#);
    }

    #[test]
    fn rejects_broken_data_uris() {
        assert!(matches!(
            decode_data_uri("data:application/json;base64"),
            Err(FetchError::DataUri(_))
        ));
        assert!(matches!(
            decode_data_uri("data:;base64,@@@"),
            Err(FetchError::DataUri(_))
        ));
    }

    #[test]
    fn ipfs_uris_use_gateway() {
        let t = transport();
        assert_eq!(
            t.gateway_url("ipfs://bafyabc/agent.json"),
            "https://gateway.example/ipfs/bafyabc/agent.json"
        );
        assert_eq!(
            t.gateway_url("ipfs://ipfs/bafyabc"),
            "https://gateway.example/ipfs/bafyabc"
        );
        assert_eq!(t.gateway_url("https://x/y"), "https://x/y");
    }

    #[tokio::test]
    async fn fetch_handles_data_uri_and_unknown_schemes() {
        let t = transport();
        let uri = format!("data:application/json;base64,{}", STANDARD.encode("{}"));
        assert_eq!(t.fetch(&uri).await.unwrap(), b"{}");

        let err = t.fetch("ftp://host/file").await.unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedScheme(_)));
    }

    #[tokio::test]
    async fn data_uri_respects_size_cap() {
        let t = HttpTransport::new(DEFAULT_IPFS_GATEWAY, Duration::from_secs(1), 4);
        let err = t.fetch("data:,0123456789").await.unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { limit: 4, .. }));
    }

    #[test]
    fn challenge_header_lookup_is_case_insensitive() {
        let resp = ChallengeResponse {
            status: 402,
            headers: vec![("payment-required".into(), "abc".into())],
            body: Vec::new(),
        };
        assert_eq!(resp.header("PAYMENT-REQUIRED"), Some("abc"));
        assert_eq!(resp.header("x-payment-required"), None);
    }
}
