// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Request pipeline scenarios against a scripted transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use outpost::config::{PacingConfig, RetryConfig};
use outpost::error::TransportError;
use outpost::pipeline::{PendingRequest, RequestPipeline, RequestTag};
use outpost::session::{CookieJar, SessionStore};
use outpost::transport::{OutboundRequest, RawResponse, Transport};

// ─────────────────────── helpers ───────────────────────

const BASE: &str = "https://ts1.example.com";

/// Answers from a script in order; an exhausted script answers 200.
#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    sent: Mutex<Vec<OutboundRequest>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    resets: AtomicUsize,
}

impl ScriptedTransport {
    fn with(script: Vec<Result<RawResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        })
    }

    fn sent_urls(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|r| r.url.clone()).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: OutboundRequest) -> Result<RawResponse, TransportError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let url = request.url.clone();
        self.sent.lock().unwrap().push(request);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let next = self.script.lock().unwrap().pop_front();
        self.active.fetch_sub(1, Ordering::SeqCst);
        next.unwrap_or_else(|| Ok(ok(&url, "<html></html>")))
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

fn ok(url: &str, body: &str) -> RawResponse {
    RawResponse {
        status: 200,
        final_url: url.to_string(),
        headers: vec![],
        body: body.as_bytes().to_vec(),
    }
}

fn status(url: &str, code: u16) -> RawResponse {
    RawResponse {
        status: code,
        ..ok(url, "")
    }
}

fn pipeline(
    transport: Arc<ScriptedTransport>,
    dir: &TempDir,
) -> (RequestPipeline, tokio::sync::mpsc::UnboundedReceiver<outpost::pipeline::Exchange>) {
    let session = SessionStore::new(
        Arc::new(CookieJar::new()),
        dir.path().join("cookies.json"),
        "JWT",
        Some("ts1.example.com".to_string()),
        20,
        Duration::from_secs(300),
    );
    let pacing = PacingConfig {
        min_delay_ms: 0,
        max_delay_ms: 0,
    };
    let retry = RetryConfig {
        backoff_base_ms: 0,
        ..RetryConfig::default()
    };
    RequestPipeline::new(transport, session, pacing, retry)
}

fn probe(path: &str) -> PendingRequest {
    PendingRequest::get("probe", format!("{BASE}{path}"), RequestTag::HealthProbe)
}

// ─────────────────────── ordering ───────────────────────

#[tokio::test]
async fn test_single_flight_in_queue_order() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::with(vec![]);
    let (mut pipeline, mut rx) = pipeline(Arc::clone(&transport), &dir);

    pipeline.enqueue(probe("/a.php"));
    pipeline.enqueue(probe("/b.php"));
    pipeline.enqueue_front(probe("/first.php"));

    let done = pipeline.drain(&mut rx).await;
    assert_eq!(done.len(), 3);
    assert!(done.iter().all(|c| c.result.is_ok()));
    assert_eq!(transport.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(
        transport.sent_urls(),
        vec![
            format!("{BASE}/first.php"),
            format!("{BASE}/a.php"),
            format!("{BASE}/b.php"),
        ]
    );
    assert!(!pipeline.is_busy());
}

#[tokio::test]
async fn test_pump_refuses_while_in_flight() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::with(vec![]);
    let (mut pipeline, mut rx) = pipeline(transport, &dir);
    pipeline.enqueue(probe("/a.php"));
    pipeline.enqueue(probe("/b.php"));

    assert!(pipeline.pump());
    assert!(!pipeline.pump());
    assert_eq!(pipeline.queued(), 1);

    let exchange = rx.recv().await.unwrap();
    assert!(pipeline.on_exchange(exchange).is_some());
    assert!(pipeline.pump());
}

#[tokio::test]
async fn test_referer_follows_previous_request() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::with(vec![]);
    let (mut pipeline, mut rx) = pipeline(Arc::clone(&transport), &dir);
    pipeline.enqueue(probe("/dorf1.php"));
    pipeline.enqueue(probe("/dorf2.php"));
    pipeline.drain(&mut rx).await;

    let sent = transport.sent.lock().unwrap();
    let referer = |r: &OutboundRequest| {
        r.headers
            .iter()
            .find(|(k, _)| k == "Referer")
            .map(|(_, v)| v.clone())
    };
    assert_eq!(referer(&sent[0]), None);
    assert_eq!(referer(&sent[1]).as_deref(), Some(&*format!("{BASE}/dorf1.php")));
    let agent = sent[0].headers.iter().find(|(k, _)| k == "User-Agent").unwrap();
    assert_eq!(agent.1, pipeline.user_agent());
}

// ─────────────────────── retries ───────────────────────

#[tokio::test]
async fn test_retryable_failure_requeues_then_succeeds() {
    let dir = TempDir::new().unwrap();
    let url = format!("{BASE}/dorf1.php");
    let transport = ScriptedTransport::with(vec![
        Err(TransportError::Timeout(5000)),
        Ok(status(&url, 502)),
        Ok(ok(&url, "fine")),
    ]);
    let (mut pipeline, mut rx) = pipeline(Arc::clone(&transport), &dir);
    pipeline.enqueue(probe("/dorf1.php"));

    assert!(pipeline.pump());
    let first = rx.recv().await.unwrap();
    assert!(pipeline.on_exchange(first).is_none());
    assert_eq!(pipeline.retry_counters().current, 1);
    assert_eq!(pipeline.retry_counters().consecutive_errors, 1);

    let done = pipeline.drain(&mut rx).await;
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].result.as_ref().unwrap().body, "fine");
    assert_eq!(done[0].request.attempt, 2);
    assert_eq!(pipeline.retry_counters().current, 0);
    assert_eq!(pipeline.retry_counters().consecutive_errors, 0);
    assert_eq!(transport.sent_urls().len(), 3);
}

#[tokio::test]
async fn test_retries_exhausted_reports_failure() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::with(
        (0..4)
            .map(|_| Err(TransportError::ConnectionRefused("refused".into())))
            .collect(),
    );
    let (mut pipeline, mut rx) = pipeline(Arc::clone(&transport), &dir);
    pipeline.enqueue(probe("/dorf1.php"));

    let done = pipeline.drain(&mut rx).await;
    assert_eq!(done.len(), 1);
    assert!(matches!(done[0].result, Err(TransportError::ConnectionRefused(_))));
    // First attempt plus three retries.
    assert_eq!(transport.sent_urls().len(), 4);
    assert_eq!(pipeline.retry_counters().current, 0);
}

#[tokio::test]
async fn test_non_retryable_failure_is_not_requeued() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::with(vec![Err(TransportError::InvalidRequest("bad url".into()))]);
    let (mut pipeline, mut rx) = pipeline(Arc::clone(&transport), &dir);
    pipeline.enqueue(probe("/dorf1.php"));

    let done = pipeline.drain(&mut rx).await;
    assert_eq!(done.len(), 1);
    assert!(done[0].result.is_err());
    assert_eq!(transport.sent_urls().len(), 1);
    assert_eq!(pipeline.retry_counters().consecutive_errors, 0);
}

#[tokio::test]
async fn test_five_consecutive_failures_reset_connection_once() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::with(
        (0..5)
            .map(|_| Err(TransportError::ConnectionReset("reset by peer".into())))
            .collect(),
    );
    let (mut pipeline, mut rx) = pipeline(Arc::clone(&transport), &dir);
    pipeline.enqueue(probe("/a.php"));
    pipeline.enqueue(probe("/b.php"));
    let agent_before = pipeline.user_agent().to_string();

    let done = pipeline.drain(&mut rx).await;
    // a.php fails four times and gives up; b.php's first failure is the
    // fifth in a row and triggers the reset, then it succeeds.
    assert_eq!(done.len(), 2);
    assert!(done[0].result.is_err());
    assert!(done[1].result.is_ok());
    assert_eq!(transport.resets.load(Ordering::SeqCst), 1);
    let counters = pipeline.retry_counters();
    assert_eq!(counters.resets, 1);
    assert_eq!(counters.consecutive_errors, 0);
    assert!(outpost::pipeline::USER_AGENTS.contains(&pipeline.user_agent()));
    assert!(outpost::pipeline::USER_AGENTS.contains(&agent_before.as_str()));
}

// ─────────────────────── session ───────────────────────

#[tokio::test]
async fn test_set_cookie_is_absorbed_and_persisted() {
    let dir = TempDir::new().unwrap();
    let url = format!("{BASE}/dorf1.php");
    let mut response = ok(&url, "<html></html>");
    response.headers = vec![("set-cookie".into(), "JWT=token-1; Path=/; HttpOnly".into())];
    let transport = ScriptedTransport::with(vec![Ok(response)]);
    let (mut pipeline, mut rx) = pipeline(transport, &dir);
    pipeline.enqueue(probe("/dorf1.php"));

    pipeline.drain(&mut rx).await;
    assert_eq!(pipeline.session().auth_token().as_deref(), Some("token-1"));
    assert!(dir.path().join("cookies.json").exists());
}

#[tokio::test]
async fn test_discard_drops_only_matching_items() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::with(vec![]);
    let (mut pipeline, _rx) = pipeline(transport, &dir);
    pipeline.enqueue(probe("/keep.php"));
    pipeline.enqueue(probe("/drop.php"));
    pipeline.enqueue(probe("/drop.php"));

    assert_eq!(pipeline.discard(|r| r.url.ends_with("/drop.php")), 2);
    assert_eq!(pipeline.queued(), 1);
}
