//! HTTP live transport for OpenCode/KiloCode: holds a base URL and an
//! optional basic-auth token, appends a `directory` query param when the
//! session has a cwd, and retries once without it on 404/405.

use std::time::Duration;

use agentd_domain::error::{Error, ErrorKind, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;

/// Outcome of a request classified for the caller: transport errors
/// that should trigger autostart are distinguished from plain HTTP
/// failures so the autostart algorithm only fires on the right signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Unreachable,
    ClientError,
}

pub struct HttpTransport {
    client: Client,
    base_url: String,
    auth_username: Option<String>,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        auth_username: Option<String>,
        token: Option<String>,
        request_timeout_ms: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_timeout_ms))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_username,
            token,
        })
    }

    fn url(&self, path: &str, directory: Option<&str>) -> String {
        match directory {
            Some(dir) if !dir.trim().is_empty() => {
                format!("{}{path}?directory={}", self.base_url, urlencode(dir))
            }
            _ => format!("{}{path}", self.base_url),
        }
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.auth_username, &self.token) {
            (Some(user), Some(token)) => req.basic_auth(user, Some(token)),
            (None, Some(token)) => req.bearer_auth(token),
            _ => req,
        }
    }

    /// POST `path` (optionally directory-suffixed) with a JSON body.
    /// Retries once without the directory query on 404/405.
    pub async fn post_json(
        &self,
        path: &str,
        directory: Option<&str>,
        body: &Value,
    ) -> Result<Value> {
        let resp = self
            .with_auth(self.client.post(self.url(path, directory)))
            .json(body)
            .send()
            .await;
        let resp = match resp {
            Ok(r) => r,
            Err(e) => return Err(classify_reqwest_error(e)),
        };
        if matches!(resp.status(), StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED)
            && directory.is_some()
        {
            return self.post_json(path, None, body).await;
        }
        parse_response(resp).await
    }

    /// GET `path`, same directory-retry rule as `post_json`.
    pub async fn get_json(&self, path: &str, directory: Option<&str>) -> Result<Value> {
        let resp = self
            .with_auth(self.client.get(self.url(path, directory)))
            .send()
            .await;
        let resp = match resp {
            Ok(r) => r,
            Err(e) => return Err(classify_reqwest_error(e)),
        };
        if matches!(resp.status(), StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED)
            && directory.is_some()
        {
            return self.get_json(path, None).await;
        }
        parse_response(resp).await
    }

    /// Open `path` and return the raw response, unbuffered, for the
    /// caller to stream (SSE subscriptions).
    pub async fn raw_get(&self, path: &str) -> Result<reqwest::Response> {
        self.with_auth(self.client.get(self.url(path, None)))
            .send()
            .await
            .map_err(classify_reqwest_error)
    }

    /// POST to `primary`; on a 404/405 from the server (after the
    /// directory retry already built into `post_json`), fall back to
    /// `legacy`. Used for endpoints OpenCode renamed across versions.
    pub async fn post_json_or_legacy(
        &self,
        primary: &str,
        legacy: &str,
        directory: Option<&str>,
        body: &Value,
    ) -> Result<Value> {
        match self.post_json(primary, directory, body).await {
            Ok(v) => Ok(v),
            Err(e) if is_not_found_status(&e) => self.post_json(legacy, directory, body).await,
            Err(e) => Err(e),
        }
    }

    /// Liveness probe used by the autostart algorithm. Treats any
    /// response (even a non-2xx one) as "the server is up."
    pub async fn probe_healthy(&self) -> bool {
        self.client
            .get(self.url("/doc", None))
            .send()
            .await
            .is_ok()
    }
}

async fn parse_response(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    if status.is_server_error() {
        return Err(Error::Unavailable(format!("upstream returned {status}")));
    }
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| Error::Internal(format!("failed to read response body: {e}")))?;
    if !status.is_success() {
        return Err(Error::Provider {
            provider: "http".into(),
            message: format!("status {status}: {}", String::from_utf8_lossy(&bytes)),
        });
    }
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(Error::from)
}

fn is_not_found_status(e: &Error) -> bool {
    matches!(e, Error::Provider { message, .. } if message.starts_with("status 404"))
}

fn classify_reqwest_error(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() {
        Error::Unavailable(format!("upstream unreachable: {e}"))
    } else {
        Error::Http(e)
    }
}

/// Ad-hoc percent-encoding for the one query value we ever send. Avoids
/// pulling in a dedicated URL crate for a single parameter.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Whether this error should be treated as "upstream unreachable" for
/// the purposes of triggering autostart.
pub fn is_unreachable(e: &Error) -> bool {
    e.kind() == ErrorKind::Unavailable
}
