// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Authenticate: credentials POST, optional redirect, then verification.

use serde_json::{json, Value};

use super::{ActionContext, OperationState, Transition};
use crate::config::Credentials;
use crate::error::FailureKind;
use crate::events::EngineEvent;
use crate::pipeline::{PageResponse, PendingRequest, RequestTag};
use crate::transport::absolute_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    Submit,
    FollowRedirect,
    Probe,
}

pub fn start(ctx: &ActionContext<'_>, creds: &Credentials) -> PendingRequest {
    tracing::info!(user = %creds.username, "logging in");
    let body = json!({
        "name": creds.username,
        "password": creds.password,
        "w": "1440:900",
        "mobileOptimizations": false,
    });
    PendingRequest::post_json(
        "login",
        absolute_url(ctx.base_url, "/api/v1/auth/login"),
        body,
        tag(LoginStep::Submit),
    )
    .with_header("Accept", "application/json, text/plain, */*")
    .with_header("X-Requested-With", "XMLHttpRequest")
}

pub fn resume(step: LoginStep, ctx: &ActionContext<'_>, response: &PageResponse) -> Transition {
    tracing::debug!(?step, status = response.status, "login step completed");
    match step {
        LoginStep::Submit => on_submit(ctx, response),
        LoginStep::FollowRedirect => {
            if ctx.authenticated {
                succeeded()
            } else {
                probe(ctx)
            }
        }
        LoginStep::Probe => on_probe(ctx, &response.body),
    }
}

fn on_submit(ctx: &ActionContext<'_>, response: &PageResponse) -> Transition {
    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&response.body) else {
        return failed(FailureKind::Unknown, "Invalid response from server".to_string());
    };
    if let Some(err) = obj.get("error").filter(|e| !e.is_null()) {
        return failed(FailureKind::Authentication, error_text(err));
    }
    if response.status != 200 {
        return failed(
            FailureKind::Authentication,
            format!("Login failed - status code: {}", response.status),
        );
    }
    if let Some(redirect) = obj.get("redirectTo").and_then(Value::as_str) {
        tracing::debug!(redirect, "following login redirect");
        return Transition::Next {
            request: PendingRequest::get(
                "login",
                absolute_url(ctx.base_url, redirect),
                tag(LoginStep::FollowRedirect),
            ),
            events: Vec::new(),
        };
    }
    if ctx.authenticated {
        succeeded()
    } else {
        probe(ctx)
    }
}

fn on_probe(ctx: &ActionContext<'_>, body: &str) -> Transition {
    if ctx.patterns.is_login_page(body) {
        return failed(
            FailureKind::Authentication,
            "Login failed - credentials may be incorrect".to_string(),
        );
    }
    if ctx.patterns.is_authenticated_page(body) || ctx.authenticated {
        return succeeded();
    }
    failed(FailureKind::Unknown, "Could not verify login status".to_string())
}

fn probe(ctx: &ActionContext<'_>) -> Transition {
    tracing::debug!("no auth cookie yet; probing overview page");
    Transition::Next {
        request: PendingRequest::get(
            "login",
            absolute_url(ctx.base_url, "/dorf1.php"),
            tag(LoginStep::Probe),
        ),
        events: Vec::new(),
    }
}

fn error_text(err: &Value) -> String {
    match err {
        Value::String(s) => s.clone(),
        Value::Object(o) => o
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
        other => other.to_string(),
    }
}

fn succeeded() -> Transition {
    tracing::info!("login succeeded");
    Transition::Done(vec![EngineEvent::LoginSucceeded])
}

fn failed(kind: FailureKind, message: String) -> Transition {
    tracing::warn!(%kind, %message, "login failed");
    Transition::Done(vec![EngineEvent::LoginFailed { kind, message }])
}

fn tag(step: LoginStep) -> RequestTag {
    RequestTag::Action(OperationState::Login(step))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::transport::{Body, Method};

    fn creds() -> Credentials {
        Credentials {
            username: "chief".into(),
            password: "hunter2".into(),
        }
    }

    fn submit(fx: &mut Fixture) -> PendingRequest {
        start(&fx.ctx(), &creds())
    }

    fn failure_message(t: &Transition) -> Option<&str> {
        match t.events() {
            [EngineEvent::LoginFailed { message, .. }] => Some(message.as_str()),
            _ => None,
        }
    }

    #[test]
    fn test_submit_request_shape() {
        let mut fx = Fixture::new();
        let req = submit(&mut fx);
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.url, "https://ts1.example.com/api/v1/auth/login");
        let Some(Body::Json(body)) = &req.body else {
            panic!("json body expected");
        };
        assert_eq!(body["name"], "chief");
        assert_eq!(body["w"], "1440:900");
        assert_eq!(body["mobileOptimizations"], false);
        assert!(req
            .headers
            .iter()
            .any(|(k, v)| k == "X-Requested-With" && v == "XMLHttpRequest"));
    }

    #[test]
    fn test_server_error_reported_verbatim() {
        let mut fx = Fixture::new();
        let req = submit(&mut fx);
        let t = step(&mut fx, &req, 401, r#"{"error":"Wrong password"}"#);
        assert_eq!(failure_message(&t), Some("Wrong password"));
    }

    #[test]
    fn test_invalid_json_and_bad_status() {
        let mut fx = Fixture::new();
        let req = submit(&mut fx);
        let t = step(&mut fx, &req, 200, "<html>");
        assert_eq!(failure_message(&t), Some("Invalid response from server"));
        let t = step(&mut fx, &req, 500, "{}");
        assert_eq!(failure_message(&t), Some("Login failed - status code: 500"));
    }

    #[test]
    fn test_redirect_then_cookie_succeeds() {
        let mut fx = Fixture::new();
        let req = submit(&mut fx);
        let t = step(&mut fx, &req, 200, r#"{"redirectTo":"/api/v1/auth?code=abc"}"#);
        let Transition::Next { request, .. } = t else {
            panic!("redirect expected");
        };
        assert_eq!(request.url, "https://ts1.example.com/api/v1/auth?code=abc");

        fx.authenticated = true;
        let t = step(&mut fx, &request, 200, "");
        assert!(matches!(t.events(), [EngineEvent::LoginSucceeded]));
    }

    #[test]
    fn test_probe_outcomes() {
        let mut fx = Fixture::new();
        let req = submit(&mut fx);
        let Transition::Next { request: probe, .. } = step(&mut fx, &req, 200, "{}") else {
            panic!("probe expected without cookie");
        };
        assert!(probe.url.ends_with("/dorf1.php"));

        let t = step(&mut fx, &probe, 200, r#"<form class="loginForm">"#);
        assert_eq!(
            failure_message(&t),
            Some("Login failed - credentials may be incorrect")
        );
        let t = step(&mut fx, &probe, 200, r#"<div id="villageList">"#);
        assert!(matches!(t.events(), [EngineEvent::LoginSucceeded]));
        let t = step(&mut fx, &probe, 200, "<html></html>");
        assert_eq!(failure_message(&t), Some("Could not verify login status"));
    }
}
