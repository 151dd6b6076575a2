// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Single-flight, paced request pipeline.
//!
//! Every request the engine makes goes through one queue. At most one item
//! is in flight: [`RequestPipeline::pump`] dispatches the head of the queue
//! only when nothing is outstanding, and the exchange result comes back as
//! an [`Exchange`] message that the owner feeds to
//! [`RequestPipeline::on_exchange`]. Only then can the next item go out.
//!
//! Item lifecycle: queued, delayed (random pacing plus any backoff), in
//! flight, then succeeded, re-queued at the front for retry, or failed.
//!
//! Retryable failures (refused, reset, timeout, transient, 5xx) are retried
//! with doubling backoff up to a ceiling. A separate counter of consecutive
//! failures across all items rebuilds the HTTP client once it reaches its
//! threshold. Both counters return to zero on the next successful exchange.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flate2::read::GzDecoder;
use rand::Rng;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::actions::OperationState;
use crate::config::{PacingConfig, RetryConfig};
use crate::error::TransportError;
use crate::fetch::FetchPage;
use crate::model::VillageId;
use crate::session::SessionStore;
use crate::transport::{Body, Method, OutboundRequest, RawResponse, Transport};

// ── Identity ─────────────────────────────────────────────────────────────────

/// Desktop browser identities. One is held per connection.
pub const USER_AGENTS: [&str; 7] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.0.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

fn pick_user_agent() -> &'static str {
    USER_AGENTS[rand::thread_rng().gen_range(0..USER_AGENTS.len())]
}

// ── Items ────────────────────────────────────────────────────────────────────

/// Who consumes a completed item.
///
/// Fetch-cycle pages, action steps and health probes are routed to
/// different handlers so the flows never consume each other's responses.
#[derive(Debug, Clone)]
pub enum RequestTag {
    Fetch(FetchPage),
    Action(OperationState),
    HealthProbe,
}

impl RequestTag {
    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch(_))
    }
}

/// One queued request. Never persisted.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub id: Uuid,
    pub page_name: String,
    pub method: Method,
    pub url: String,
    pub village_id: Option<VillageId>,
    pub village_name: Option<String>,
    /// Extra headers; these override the defaults by name.
    pub headers: Vec<(String, String)>,
    pub body: Option<Body>,
    /// Overrides the referer inherited from the previous request.
    pub referer: Option<String>,
    /// Scheduled delay on top of pacing (deliberate re-runs).
    pub extra_delay: Duration,
    /// Retry backoff for the current attempt.
    pub backoff: Duration,
    /// Failed attempts so far.
    pub attempt: u32,
    pub tag: RequestTag,
}

impl PendingRequest {
    pub fn get(page_name: &str, url: impl Into<String>, tag: RequestTag) -> Self {
        Self {
            id: Uuid::new_v4(),
            page_name: page_name.to_string(),
            method: Method::Get,
            url: url.into(),
            village_id: None,
            village_name: None,
            headers: Vec::new(),
            body: None,
            referer: None,
            extra_delay: Duration::ZERO,
            backoff: Duration::ZERO,
            attempt: 0,
            tag,
        }
    }

    pub fn post_json(page_name: &str, url: impl Into<String>, body: serde_json::Value, tag: RequestTag) -> Self {
        Self {
            method: Method::Post,
            body: Some(Body::Json(body)),
            ..Self::get(page_name, url, tag)
        }
    }

    pub fn post_form(page_name: &str, url: impl Into<String>, fields: Vec<(String, String)>, tag: RequestTag) -> Self {
        Self {
            method: Method::Post,
            body: Some(Body::Form(fields)),
            ..Self::get(page_name, url, tag)
        }
    }

    pub fn for_village(mut self, id: VillageId, name: Option<String>) -> Self {
        self.village_id = Some(id);
        self.village_name = name;
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.extra_delay = delay;
        self
    }
}

/// Result of one dispatched item, posted back to the pipeline owner.
#[derive(Debug)]
pub struct Exchange {
    pub request: PendingRequest,
    pub result: Result<RawResponse, TransportError>,
}

/// Decoded response handed to the consumer of an item.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub final_url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// A terminal outcome for one item.
#[derive(Debug)]
pub struct Completion {
    pub request: PendingRequest,
    pub result: Result<PageResponse, TransportError>,
}

/// Retry bookkeeping, exposed for observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryCounters {
    /// Attempts used by the item currently being retried.
    pub current: u32,
    /// Retryable failures in a row across all items.
    pub consecutive_errors: u32,
    /// Client rebuilds performed since start.
    pub resets: u32,
}

/// Fetch-cycle progress. Only fetch-tagged items count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

pub struct RequestPipeline {
    queue: VecDeque<PendingRequest>,
    in_flight: Option<(Uuid, bool)>,
    transport: Arc<dyn Transport>,
    session: SessionStore,
    pacing: PacingConfig,
    retry_config: RetryConfig,
    user_agent: &'static str,
    last_url: Option<String>,
    retry: RetryCounters,
    progress: Progress,
    done_tx: mpsc::UnboundedSender<Exchange>,
}

impl RequestPipeline {
    /// Build a pipeline and the receiver its exchanges come back on.
    pub fn new(
        transport: Arc<dyn Transport>,
        session: SessionStore,
        pacing: PacingConfig,
        retry_config: RetryConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Exchange>) {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let pipeline = Self {
            queue: VecDeque::new(),
            in_flight: None,
            transport,
            session,
            pacing,
            retry_config,
            user_agent: pick_user_agent(),
            last_url: None,
            retry: RetryCounters::default(),
            progress: Progress::default(),
            done_tx,
        };
        (pipeline, done_rx)
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionStore {
        &mut self.session
    }

    pub fn retry_counters(&self) -> RetryCounters {
        self.retry
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn reset_progress(&mut self) {
        self.progress = Progress::default();
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// True while any fetch-tagged item is queued or in flight.
    pub fn fetch_pending(&self) -> bool {
        matches!(self.in_flight, Some((_, true))) || self.queue.iter().any(|r| r.tag.is_fetch())
    }

    pub fn enqueue(&mut self, request: PendingRequest) {
        if request.tag.is_fetch() {
            self.progress.total += 1;
        }
        tracing::debug!(page = %request.page_name, url = %request.url, "enqueued");
        self.queue.push_back(request);
    }

    pub fn enqueue_front(&mut self, request: PendingRequest) {
        if request.tag.is_fetch() {
            self.progress.total += 1;
        }
        tracing::debug!(page = %request.page_name, url = %request.url, "enqueued at front");
        self.queue.push_front(request);
    }

    /// Remove queued items matching `pred`. Returns how many were dropped.
    pub fn discard(&mut self, pred: impl Fn(&PendingRequest) -> bool) -> usize {
        let before = self.queue.len();
        self.queue.retain(|r| !pred(r));
        let dropped = before - self.queue.len();
        if dropped > 0 {
            tracing::debug!(dropped, "discarded queued requests");
        }
        dropped
    }

    /// Dispatch the queue head if nothing is in flight.
    ///
    /// The exchange runs on a spawned task after its delay and reports back
    /// through the exchange channel. Returns whether an item was dispatched.
    pub fn pump(&mut self) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        let Some(request) = self.queue.pop_front() else {
            return false;
        };

        let delay = self.pacing_delay() + request.extra_delay + request.backoff;
        let outbound = self.outbound(&request);
        self.last_url = Some(request.url.clone());
        self.in_flight = Some((request.id, request.tag.is_fetch()));

        tracing::debug!(
            page = %request.page_name,
            attempt = request.attempt,
            delay_ms = delay.as_millis() as u64,
            "dispatching"
        );

        let transport = Arc::clone(&self.transport);
        let tx = self.done_tx.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = transport.send(outbound).await;
            let _ = tx.send(Exchange { request, result });
        });
        true
    }

    /// Account for a finished exchange.
    ///
    /// Returns the completion to route, or `None` when the item was put back
    /// at the front of the queue for another attempt.
    pub fn on_exchange(&mut self, exchange: Exchange) -> Option<Completion> {
        if self.in_flight.map(|(id, _)| id) != Some(exchange.request.id) {
            tracing::warn!(page = %exchange.request.page_name, "exchange for an item that is not in flight");
        }
        self.in_flight = None;

        let Exchange { mut request, result } = exchange;
        let result = result.and_then(|raw| {
            if raw.status >= 500 {
                Err(TransportError::ServerError(raw.status))
            } else {
                Ok(raw)
            }
        });

        match result {
            Ok(raw) => {
                self.retry.current = 0;
                self.retry.consecutive_errors = 0;
                self.absorb_cookies(&raw);
                if let Err(e) = self.session.maybe_persist(Utc::now()) {
                    tracing::warn!(error = %e, "could not persist session");
                }
                if request.tag.is_fetch() {
                    self.progress.completed += 1;
                }
                let response = PageResponse {
                    status: raw.status,
                    final_url: raw.final_url,
                    body: decode_body(&raw.body),
                    headers: raw.headers,
                };
                Some(Completion {
                    request,
                    result: Ok(response),
                })
            }
            Err(err) if err.is_retryable() => {
                self.retry.consecutive_errors += 1;
                if self.retry.consecutive_errors >= self.retry_config.consecutive_errors_before_reset {
                    self.reset_connection();
                }
                if request.attempt < self.retry_config.max_request_retries {
                    request.attempt += 1;
                    request.backoff = backoff_delay(self.retry_config.backoff_base_ms, request.attempt);
                    self.retry.current = request.attempt;
                    tracing::warn!(
                        page = %request.page_name,
                        attempt = request.attempt,
                        backoff_ms = request.backoff.as_millis() as u64,
                        error = %err,
                        "retrying request"
                    );
                    self.queue.push_front(request);
                    None
                } else {
                    tracing::warn!(page = %request.page_name, error = %err, "retries exhausted");
                    self.retry.current = 0;
                    Some(self.fail(request, err))
                }
            }
            Err(err) => {
                tracing::warn!(page = %request.page_name, error = %err, "request failed");
                self.retry.current = 0;
                Some(self.fail(request, err))
            }
        }
    }

    fn fail(&mut self, request: PendingRequest, err: TransportError) -> Completion {
        if request.tag.is_fetch() {
            self.progress.completed += 1;
        }
        Completion {
            request,
            result: Err(err),
        }
    }

    /// Rebuild the client and pick a new identity. Cookies stay in the jar.
    pub fn reset_connection(&mut self) {
        self.transport.reset();
        self.user_agent = pick_user_agent();
        self.retry.consecutive_errors = 0;
        self.retry.resets += 1;
        tracing::warn!(resets = self.retry.resets, "connection reset after consecutive failures");
    }

    fn pacing_delay(&self) -> Duration {
        let (lo, hi) = (self.pacing.min_delay_ms, self.pacing.max_delay_ms);
        if hi == 0 {
            return Duration::ZERO;
        }
        let ms = if hi > lo {
            rand::thread_rng().gen_range(lo..=hi)
        } else {
            lo
        };
        Duration::from_millis(ms)
    }

    fn outbound(&self, request: &PendingRequest) -> OutboundRequest {
        let mut headers: Vec<(String, String)> = vec![
            ("User-Agent".into(), self.user_agent.to_string()),
            (
                "Accept".into(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".into(),
            ),
            ("Accept-Language".into(), "en-US,en;q=0.9".into()),
            ("Accept-Encoding".into(), "gzip".into()),
            ("DNT".into(), "1".into()),
            ("Upgrade-Insecure-Requests".into(), "1".into()),
        ];
        if let Some(referer) = request.referer.as_ref().or(self.last_url.as_ref()) {
            headers.push(("Referer".into(), referer.clone()));
        }
        for (name, value) in &request.headers {
            headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }
        OutboundRequest {
            method: request.method,
            url: request.url.clone(),
            headers,
            body: request.body.clone(),
        }
    }

    fn absorb_cookies(&self, raw: &RawResponse) {
        let host = url::Url::parse(&raw.final_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        for (name, value) in &raw.headers {
            if name.eq_ignore_ascii_case("set-cookie") {
                self.session.jar().apply_set_cookie(value, &host);
            }
        }
    }

    /// Drive the pipeline until the queue is empty, collecting completions.
    ///
    /// For one-shot callers that own the receiver and have nothing else to
    /// multiplex; the engine uses `pump`/`on_exchange` from its event loop.
    pub async fn drain(&mut self, rx: &mut mpsc::UnboundedReceiver<Exchange>) -> Vec<Completion> {
        let mut done = Vec::new();
        while self.pump() {
            let Some(exchange) = rx.recv().await else {
                break;
            };
            if let Some(completion) = self.on_exchange(exchange) {
                done.push(completion);
            }
        }
        done
    }
}

/// `base * 2^(attempt - 1)`.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(16);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Gunzip when the body carries the gzip magic, then decode lossily.
pub fn decode_body(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut out = String::new();
        match GzDecoder::new(bytes).read_to_string(&mut out) {
            Ok(_) => return out,
            Err(e) => tracing::debug!(error = %e, "gzip magic present but body did not inflate"),
        }
    }
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_delay(1000, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1000, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(1000, 3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(0, 3), Duration::ZERO);
    }

    #[test]
    fn test_decode_body_gzip_and_plain() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"<html>village</html>").unwrap();
        let gz = enc.finish().unwrap();
        assert_eq!(decode_body(&gz), "<html>village</html>");
        assert_eq!(decode_body(b"plain"), "plain");
        assert_eq!(decode_body(&[0x1f, 0x8b, 0x00]), String::from_utf8_lossy(&[0x1f, 0x8b, 0x00]));
    }

    #[test]
    fn test_request_builders() {
        let r = PendingRequest::get("dorf1", "https://h/dorf1.php", RequestTag::HealthProbe)
            .for_village(4, Some("North".into()))
            .with_referer("https://h/dorf2.php")
            .with_header("X-Requested-With", "XMLHttpRequest")
            .after(Duration::from_secs(2));
        assert_eq!(r.method, Method::Get);
        assert_eq!(r.village_id, Some(4));
        assert_eq!(r.referer.as_deref(), Some("https://h/dorf2.php"));
        assert_eq!(r.extra_delay, Duration::from_secs(2));
        assert!(!r.tag.is_fetch());
    }

    #[test]
    fn test_user_agent_pool_size() {
        assert_eq!(USER_AGENTS.len(), 7);
        assert!(USER_AGENTS.contains(&pick_user_agent()));
    }
}
