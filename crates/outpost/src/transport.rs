// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! The network seam under the request pipeline.
//!
//! [`Transport`] performs exactly one exchange and classifies failures; it
//! never retries or paces. [`HttpTransport`] is the reqwest implementation.
//! Its client shares the session's [`CookieJar`] so cookies set during
//! redirects are captured, and it can be rebuilt in place when the
//! connection pool goes bad.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::model::VillageId;
use crate::session::CookieJar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// A fully prepared request, headers included.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Body>,
}

/// Response as received, body still possibly compressed.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub final_url: String,
    /// All response headers, `set-cookie` included.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one exchange. HTTP error statuses are returned as responses.
    async fn send(&self, request: OutboundRequest) -> Result<RawResponse, TransportError>;

    /// Drop pooled connections and start over with a fresh client.
    /// Cookies survive.
    fn reset(&self);
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: RwLock<reqwest::Client>,
    jar: Arc<CookieJar>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(jar: Arc<CookieJar>, timeout: Duration) -> Result<Self, TransportError> {
        let client = build_client(&jar, timeout)?;
        Ok(Self {
            client: RwLock::new(client),
            jar,
            timeout,
        })
    }

    fn client(&self) -> reqwest::Client {
        self.client.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn build_client(jar: &Arc<CookieJar>, timeout: Duration) -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(5))
        .cookie_provider(Arc::clone(jar))
        .build()
        .map_err(|e| TransportError::InvalidRequest(e.to_string()))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<RawResponse, TransportError> {
        let client = self.client();
        let timeout_ms = self.timeout.as_millis() as u64;

        let mut builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Post => client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            Some(Body::Json(v)) => builder.json(v),
            Some(Body::Form(fields)) => builder.form(fields),
            None => builder,
        };

        let resp = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e, timeout_ms))?;

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let headers: Vec<(String, String)> = resp
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let body = resp
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(&e, timeout_ms))?
            .to_vec();

        Ok(RawResponse {
            status,
            final_url,
            headers,
            body,
        })
    }

    fn reset(&self) {
        match build_client(&self.jar, self.timeout) {
            Ok(fresh) => {
                *self.client.write().unwrap_or_else(|e| e.into_inner()) = fresh;
                tracing::info!("HTTP client rebuilt");
            }
            Err(e) => tracing::warn!(error = %e, "could not rebuild HTTP client; keeping the old one"),
        }
    }
}

// ── URL helpers ──────────────────────────────────────────────────────────────

/// Resolve `href` against the server root.
///
/// Absolute URLs pass through; `/path` and bare `page.php?...` forms are
/// joined to `base`.
pub fn absolute_url(base: &str, href: &str) -> String {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    if let Some(rest) = href.strip_prefix('/') {
        return format!("{base}/{rest}");
    }
    format!("{base}/{href}")
}

/// Append or overwrite the `newdid` village selector.
pub fn with_village_param(url: &str, village_id: VillageId) -> String {
    if let Ok(mut parsed) = url::Url::parse(url) {
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(k, _)| k != "newdid")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        parsed
            .query_pairs_mut()
            .clear()
            .extend_pairs(pairs)
            .append_pair("newdid", &village_id.to_string());
        return parsed.to_string();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}newdid={village_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_url() {
        let base = "https://ts1.example.com";
        assert_eq!(absolute_url(base, "/dorf1.php"), "https://ts1.example.com/dorf1.php");
        assert_eq!(
            absolute_url(base, "build.php?id=3"),
            "https://ts1.example.com/build.php?id=3"
        );
        assert_eq!(absolute_url(base, "https://other.org/x"), "https://other.org/x");
    }

    #[test]
    fn test_with_village_param_appends_and_replaces() {
        assert_eq!(
            with_village_param("https://h.com/dorf1.php", 5),
            "https://h.com/dorf1.php?newdid=5"
        );
        assert_eq!(
            with_village_param("https://h.com/build.php?id=3&newdid=1", 9),
            "https://h.com/build.php?id=3&newdid=9"
        );
        assert_eq!(with_village_param("/build.php?id=3", 2), "/build.php?id=3&newdid=2");
    }

    #[test]
    fn test_raw_response_header_lookup_is_case_insensitive() {
        let r = RawResponse {
            status: 200,
            final_url: String::new(),
            headers: vec![("Content-Type".into(), "text/html".into())],
            body: Vec::new(),
        };
        assert_eq!(r.header("content-type"), Some("text/html"));
    }
}
