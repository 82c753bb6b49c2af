// src/core/executor.rs

//! Executes a single logical request against the server pool, retrying transient
//! failures across the pool and producing the common headers, timestamp, and
//! signature required by every call.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::core::pool::ServerPool;
use crate::core::signing;
use crate::error::{AcmError, Result};

/// HTTP statuses the executor treats as transient: advance to the next server and retry.
const TRANSIENT_STATUSES: [StatusCode; 3] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
];

/// The raw result of a request: status code plus body, with no interpretation of what
/// the status means. Callers (the Value Store API, the Pulling Engine) decide what a
/// given status implies for their operation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Executes requests against the current server, signing and retrying as configured.
pub struct RequestExecutor {
    verifying_client: reqwest::Client,
    non_verifying_client: reqwest::Client,
    pool: Arc<ServerPool>,
    config: Arc<ClientConfig>,
}

impl RequestExecutor {
    pub fn new(pool: Arc<ServerPool>, config: Arc<ClientConfig>) -> Result<Self> {
        let verifying_client = reqwest::Client::builder().build()?;
        let non_verifying_client = reqwest::Client::builder()
            .danger_accept_invalid_hostnames(true)
            .build()?;
        Ok(Self {
            verifying_client,
            non_verifying_client,
            pool,
            config,
        })
    }

    /// Executes `path` with optional query params, extra headers, and form body,
    /// retrying transient failures across the server pool until either a response is
    /// obtained or every server has been tried.
    ///
    /// `extra_headers` carries caller-specific headers (e.g. the Pulling Engine's
    /// long-poll controls) that sit alongside, and are overridden by, the common headers
    /// and signature this method always attaches.
    ///
    /// `form` values are raw bytes, not `&str`: the `content` field of a publish carries
    /// GBK-encoded bytes that are not valid UTF-8, so the body is percent-encoded by hand
    /// rather than through `reqwest::Form` (which requires UTF-8 values).
    pub async fn execute(
        &self,
        path: &str,
        query: &[(&str, &str)],
        extra_headers: &[(&str, &str)],
        form: Option<&[(&str, &[u8])]>,
        timeout: Duration,
    ) -> Result<RawResponse> {
        // Ensure the pool is populated before counting attempts; `get_server` lazily
        // resolves on first use.
        if self.pool.get_server().await.is_none() {
            return Err(AcmError::AllServersUnavailable);
        }
        let server_count = self.pool.len().await.max(1);

        let mut tries = 0usize;
        loop {
            let server = match self.pool.get_server().await {
                Some(s) => s,
                None => return Err(AcmError::AllServersUnavailable),
            };

            let scheme = if self.config.tls_enabled { "https" } else { "http" };
            let mut url = Url::parse(&format!("{scheme}://{}:{}{path}", server.host, server.port))
                .map_err(|e| AcmError::HttpClientError(format!("malformed request url: {e}")))?;
            if !query.is_empty() {
                url.query_pairs_mut().extend_pairs(query.iter().copied());
            }

            let client = if self.config.tls_enabled && !server.is_ip {
                &self.verifying_client
            } else {
                &self.non_verifying_client
            };

            let mut builder = match form {
                Some(fields) => client.post(url.clone()).body(form_body(fields)),
                None => client.get(url.clone()),
            };
            builder = builder.timeout(timeout);

            for (key, value) in extra_headers {
                builder = builder.header(*key, *value);
            }
            for (key, value) in self.common_headers(query, form) {
                builder = builder.header(key, value);
            }

            debug!("do-sync-req: {url}, tries={tries}");
            match builder.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if TRANSIENT_STATUSES.contains(&status) {
                        warn!("server {}:{} returned {status}, trying next server", server.host, server.port);
                    } else {
                        let body = resp.bytes().await.unwrap_or_default();
                        return Ok(RawResponse { status, body });
                    }
                }
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                    warn!("server {}:{} request failed: {e}", server.host, server.port);
                }
                Err(e) => return Err(e.into()),
            }

            self.pool.change_server().await;
            tries += 1;
            if tries >= server_count {
                return Err(AcmError::AllServersUnavailable);
            }
        }
    }

    fn common_headers(
        &self,
        query: &[(&str, &str)],
        form: Option<&[(&str, &[u8])]>,
    ) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("Client-Version", env!("CARGO_PKG_VERSION").to_string()),
            ("Diamond-Client-AppName", self.config.app_name.clone()),
            ("exConfigInfo", "true".to_string()),
        ];
        if form.is_some() {
            headers.push((
                "Content-Type",
                "application/x-www-form-urlencoded; charset=GBK".to_string(),
            ));
        }

        if self.config.auth_enabled
            && let (Some(ak), Some(sk)) = (&self.config.ak, &self.config.sk)
        {
            let ts = current_millis().to_string();
            let tenant = lookup(query, form, "tenant");
            let group = lookup(query, form, "group");
            if let Some(base) = signing::sign_base(tenant.as_deref(), group.as_deref(), &ts) {
                headers.push(("Spas-AccessKey", ak.clone()));
                headers.push(("timeStamp", ts));
                headers.push(("Spas-Signature", signing::sign(sk, &base)));
            }
        }

        headers
    }
}

fn lookup(query: &[(&str, &str)], form: Option<&[(&str, &[u8])]>, key: &str) -> Option<String> {
    if let Some((_, v)) = query.iter().find(|(k, _)| *k == key) {
        return Some(v.to_string());
    }
    form.into_iter()
        .flatten()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| String::from_utf8_lossy(v).into_owned())
}

/// Percent-encodes `fields` as `application/x-www-form-urlencoded` bytes, preserving
/// non-UTF-8 values byte-for-byte.
fn form_body(fields: &[(&str, &[u8])]) -> Vec<u8> {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode_binary(v)))
        .collect::<Vec<_>>()
        .join("&")
        .into_bytes()
}

fn current_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_pairs_round_trip_through_url() {
        let mut url = Url::parse("http://host/path").unwrap();
        url.query_pairs_mut().extend_pairs([("dataId", "a b"), ("group", "G")]);
        assert_eq!(url.query(), Some("dataId=a+b&group=G"));
    }

    #[test]
    fn lookup_prefers_query_over_form() {
        let query = [("tenant", "from-query")];
        let form: [(&str, &[u8]); 1] = [("tenant", b"from-form")];
        assert_eq!(lookup(&query, Some(&form), "tenant").as_deref(), Some("from-query"));
    }

    #[test]
    fn lookup_falls_back_to_form() {
        let query: [(&str, &str); 0] = [];
        let form: [(&str, &[u8]); 1] = [("group", b"G")];
        assert_eq!(lookup(&query, Some(&form), "group").as_deref(), Some("G"));
    }

    #[test]
    fn form_body_preserves_non_utf8_bytes() {
        let fields: [(&str, &[u8]); 1] = [("content", &[0xB0, 0xE1])];
        let body = form_body(&fields);
        assert_eq!(body, b"content=%B0%E1".to_vec());
    }
}
