// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Session and cookie lifecycle.
//!
//! The [`CookieJar`] is shared with the HTTP client through reqwest's
//! `CookieStore` hook, so cookies set anywhere in a redirect chain land in
//! it. The [`SessionStore`] owns persistence of that jar: it reloads a saved
//! session at startup and writes it back only when the auth token changed or
//! the minimum interval elapsed.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::extraction::PatternTable;

// ── Cookie jar ───────────────────────────────────────────────────────────────

/// One cookie in the persisted file format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// Thread-safe cookie jar for a single game server.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: RwLock<Vec<StoredCookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace (same name, domain and path).
    pub fn insert(&self, cookie: StoredCookie) {
        let mut cookies = self.cookies.write().unwrap_or_else(|e| e.into_inner());
        cookies.retain(|c| !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path));
        cookies.push(cookie);
    }

    pub fn remove(&self, name: &str) {
        let mut cookies = self.cookies.write().unwrap_or_else(|e| e.into_inner());
        cookies.retain(|c| c.name != name);
    }

    pub fn get(&self, name: &str) -> Option<String> {
        let cookies = self.cookies.read().unwrap_or_else(|e| e.into_inner());
        cookies.iter().rev().find(|c| c.name == name).map(|c| c.value.clone())
    }

    pub fn all(&self) -> Vec<StoredCookie> {
        self.cookies.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn replace_all(&self, cookies: Vec<StoredCookie>) {
        *self.cookies.write().unwrap_or_else(|e| e.into_inner()) = cookies;
    }

    pub fn clear(&self) {
        self.replace_all(Vec::new());
    }

    pub fn len(&self) -> usize {
        self.cookies.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Cookie` header value for a request to `host` and `path`.
    pub fn header_for(&self, host: &str, path: &str) -> Option<String> {
        let cookies = self.cookies.read().unwrap_or_else(|e| e.into_inner());
        let pairs: Vec<String> = cookies
            .iter()
            .filter(|c| domain_matches(host, &c.domain) && path.starts_with(c.path.as_str()))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        (!pairs.is_empty()).then(|| pairs.join("; "))
    }

    /// Apply one `Set-Cookie` header received from `host`.
    pub fn apply_set_cookie(&self, raw: &str, host: &str) {
        match parse_set_cookie(raw, host) {
            Some(SetCookie::Store(c)) => self.insert(c),
            Some(SetCookie::Delete(name)) => self.remove(&name),
            None => tracing::debug!(header = raw, "ignoring unparseable set-cookie"),
        }
    }
}

impl reqwest::cookie::CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &url::Url) {
        let host = url.host_str().unwrap_or_default();
        for header in cookie_headers {
            if let Ok(raw) = header.to_str() {
                self.apply_set_cookie(raw, host);
            }
        }
    }

    fn cookies(&self, url: &url::Url) -> Option<HeaderValue> {
        let header = self.header_for(url.host_str()?, url.path())?;
        HeaderValue::from_str(&header).ok()
    }
}

enum SetCookie {
    Store(StoredCookie),
    Delete(String),
}

fn parse_set_cookie(raw: &str, host: &str) -> Option<SetCookie> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let mut cookie = StoredCookie {
        name: name.to_string(),
        value: value.trim().trim_matches('"').to_string(),
        domain: host.to_string(),
        path: "/".to_string(),
    };
    let mut expired = false;
    for attr in parts {
        let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
        let val = val.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "domain" if !val.is_empty() => cookie.domain = val.trim_start_matches('.').to_string(),
            "path" if !val.is_empty() => cookie.path = val.to_string(),
            "max-age" => expired |= val.parse::<i64>().map(|n| n <= 0).unwrap_or(false),
            "expires" => {
                expired |= DateTime::parse_from_rfc2822(val)
                    .map(|t| t.with_timezone(&Utc) <= Utc::now())
                    .unwrap_or(false)
            }
            _ => {}
        }
    }
    Some(if expired {
        SetCookie::Delete(cookie.name)
    } else {
        SetCookie::Store(cookie)
    })
}

fn domain_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim_start_matches('.');
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Last two labels of a host name (`ts1.x1.example.com` to `example.com`).
fn parent_domain(host: &str) -> &str {
    let mut dots = host.rmatch_indices('.');
    dots.next();
    match dots.next() {
        Some((i, _)) => &host[i + 1..],
        None => host,
    }
}

// ── Persistence ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CookieFile {
    cookies: Vec<StoredCookie>,
    /// Unix seconds; 0 when unknown.
    expiry: i64,
    saved_at: DateTime<Utc>,
}

/// Verdict of a session health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionHealth {
    Valid,
    Expired,
    Unknown,
}

/// Classify a probe response by its markup. Login markup wins.
pub fn classify_health(body: &str, table: &PatternTable) -> SessionHealth {
    if table.is_login_page(body) {
        SessionHealth::Expired
    } else if table.is_authenticated_page(body) {
        SessionHealth::Valid
    } else {
        SessionHealth::Unknown
    }
}

/// Cookie persistence with write throttling.
pub struct SessionStore {
    jar: Arc<CookieJar>,
    path: PathBuf,
    auth_cookie: String,
    host: Option<String>,
    lifetime: chrono::Duration,
    persist_interval: Duration,
    last_token: Option<String>,
    last_persisted: Option<DateTime<Utc>>,
}

impl SessionStore {
    pub fn new(
        jar: Arc<CookieJar>,
        path: impl Into<PathBuf>,
        auth_cookie: &str,
        host: Option<String>,
        lifetime_hours: u64,
        persist_interval: Duration,
    ) -> Self {
        Self {
            jar,
            path: path.into(),
            auth_cookie: auth_cookie.to_string(),
            host,
            lifetime: chrono::Duration::hours(lifetime_hours as i64),
            persist_interval,
            last_token: None,
            last_persisted: None,
        }
    }

    pub fn jar(&self) -> &Arc<CookieJar> {
        &self.jar
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn auth_token(&self) -> Option<String> {
        self.jar.get(&self.auth_cookie)
    }

    pub fn has_auth_cookie(&self) -> bool {
        self.auth_token().is_some_and(|t| !t.is_empty())
    }

    /// Load the saved session into the jar. Returns the number of cookies.
    ///
    /// Rejects files with no cookies, a passed expiry, or no auth cookie.
    /// Cookies saved for the server's parent domain are re-homed to the
    /// configured host.
    pub fn load(&mut self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        if !self.path.exists() {
            return Err(SessionError::Missing(self.path.display().to_string()));
        }
        let text = std::fs::read_to_string(&self.path)?;
        let file: CookieFile = serde_json::from_str(&text)?;

        if file.cookies.is_empty() {
            return Err(SessionError::Empty);
        }
        if file.expiry > 0 && now.timestamp() >= file.expiry {
            return Err(SessionError::Expired);
        }
        if !file.cookies.iter().any(|c| c.name == self.auth_cookie) {
            return Err(SessionError::NoAuthCookie(self.auth_cookie.clone()));
        }

        let cookies: Vec<StoredCookie> = file
            .cookies
            .into_iter()
            .map(|mut c| {
                if let Some(host) = &self.host {
                    let saved = c.domain.trim_start_matches('.');
                    if saved != host && saved.ends_with(parent_domain(host)) {
                        c.domain = host.clone();
                    }
                }
                c
            })
            .collect();
        let count = cookies.len();
        self.jar.replace_all(cookies);
        self.last_token = self.auth_token();
        self.last_persisted = Some(file.saved_at);
        tracing::info!(cookies = count, path = %self.path.display(), "loaded saved session");
        Ok(count)
    }

    /// Write the jar to disk unconditionally.
    pub fn persist(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        let token = self.auth_token();
        let expiry = match &token {
            Some(t) => token_expiry(t).unwrap_or_else(|| (now + self.lifetime).timestamp()),
            None => 0,
        };
        let file = CookieFile {
            cookies: self.jar.all(),
            expiry,
            saved_at: now,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        self.last_token = token;
        self.last_persisted = Some(now);
        tracing::debug!(path = %self.path.display(), "session persisted");
        Ok(())
    }

    /// Persist only when the auth token changed or the interval elapsed.
    /// Returns whether a write happened.
    pub fn maybe_persist(&mut self, now: DateTime<Utc>) -> Result<bool, SessionError> {
        if self.jar.is_empty() {
            return Ok(false);
        }
        let token_changed = self.auth_token() != self.last_token;
        let interval_elapsed = match self.last_persisted {
            Some(at) => (now - at).to_std().map(|d| d >= self.persist_interval).unwrap_or(false),
            None => true,
        };
        if token_changed || interval_elapsed {
            self.persist(now)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Drop cookies from memory and disk.
    pub fn clear(&mut self) -> Result<(), SessionError> {
        self.jar.clear();
        self.last_token = None;
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// `exp` claim of a JWT, if the token is one.
fn token_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp")?.as_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore;

    fn store(dir: &Path) -> SessionStore {
        SessionStore::new(
            Arc::new(CookieJar::new()),
            dir.join("cookies.json"),
            "JWT",
            Some("ts2.x1.europe.example.com".into()),
            20,
            Duration::from_secs(300),
        )
    }

    fn jwt_with_exp(exp: i64) -> String {
        let enc = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let header = enc.encode(br#"{"alg":"HS256"}"#);
        let claims = enc.encode(format!(r#"{{"exp":{exp}}}"#));
        format!("{header}.{claims}.sig")
    }

    #[test]
    fn test_set_cookie_parsing_and_header() {
        let jar = CookieJar::new();
        jar.apply_set_cookie("JWT=abc; Path=/; HttpOnly", "ts1.example.com");
        jar.apply_set_cookie("lang=en; Domain=.example.com", "ts1.example.com");
        assert_eq!(jar.get("JWT").as_deref(), Some("abc"));
        let header = jar.header_for("ts1.example.com", "/dorf1.php").unwrap();
        assert!(header.contains("JWT=abc"));
        assert!(header.contains("lang=en"));
        assert!(jar.header_for("other.org", "/").is_none());
    }

    #[test]
    fn test_expired_set_cookie_removes() {
        let jar = CookieJar::new();
        jar.apply_set_cookie("JWT=abc", "h.example.com");
        jar.apply_set_cookie("JWT=deleted; Max-Age=0", "h.example.com");
        assert!(jar.get("JWT").is_none());
    }

    #[test]
    fn test_cookie_store_trait_roundtrip() {
        let jar = CookieJar::new();
        let url = url::Url::parse("https://ts1.example.com/login").unwrap();
        let headers = [HeaderValue::from_static("JWT=t1; Path=/")];
        jar.set_cookies(&mut headers.iter(), &url);
        let v = jar.cookies(&url).unwrap();
        assert_eq!(v.to_str().unwrap(), "JWT=t1");
    }

    #[test]
    fn test_persist_and_reload_with_rehome() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store(dir.path());
        s.jar().insert(StoredCookie {
            name: "JWT".into(),
            value: "token".into(),
            domain: "ts9.x3.europe.example.com".into(),
            path: "/".into(),
        });
        let now = Utc::now();
        s.persist(now).unwrap();

        let mut fresh = store(dir.path());
        assert_eq!(fresh.load(now).unwrap(), 1);
        let c = &fresh.jar().all()[0];
        assert_eq!(c.domain, "ts2.x1.europe.example.com");
        assert!(fresh.has_auth_cookie());
    }

    #[test]
    fn test_load_rejects_expired_and_missing_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store(dir.path());
        s.jar().insert(StoredCookie {
            name: "JWT".into(),
            value: jwt_with_exp(1_000),
            domain: "ts2.x1.europe.example.com".into(),
            path: "/".into(),
        });
        s.persist(Utc::now()).unwrap();
        assert!(matches!(store(dir.path()).load(Utc::now()), Err(SessionError::Expired)));

        s.jar().replace_all(vec![StoredCookie {
            name: "lang".into(),
            value: "en".into(),
            domain: "x".into(),
            path: "/".into(),
        }]);
        s.persist(Utc::now()).unwrap();
        assert!(matches!(
            store(dir.path()).load(Utc::now()),
            Err(SessionError::NoAuthCookie(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(store(dir.path()).load(Utc::now()), Err(SessionError::Missing(_))));
    }

    #[test]
    fn test_maybe_persist_throttles() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store(dir.path());
        let t0 = Utc::now();
        assert!(!s.maybe_persist(t0).unwrap(), "empty jar is never written");

        s.jar().insert(StoredCookie {
            name: "JWT".into(),
            value: "a".into(),
            domain: "h".into(),
            path: "/".into(),
        });
        assert!(s.maybe_persist(t0).unwrap());
        assert!(!s.maybe_persist(t0 + chrono::Duration::seconds(10)).unwrap());

        s.jar().insert(StoredCookie {
            name: "JWT".into(),
            value: "b".into(),
            domain: "h".into(),
            path: "/".into(),
        });
        assert!(s.maybe_persist(t0 + chrono::Duration::seconds(20)).unwrap());
        assert!(s.maybe_persist(t0 + chrono::Duration::seconds(400)).unwrap());
    }

    #[test]
    fn test_token_expiry_from_jwt() {
        assert_eq!(token_expiry(&jwt_with_exp(1_900_000_000)), Some(1_900_000_000));
        assert_eq!(token_expiry("opaque"), None);
    }

    #[test]
    fn test_classify_health() {
        let table = PatternTable::embedded().unwrap();
        assert_eq!(classify_health(r#"<form id="loginForm">"#, &table), SessionHealth::Expired);
        assert_eq!(classify_health(r#"<div id="villageList">"#, &table), SessionHealth::Valid);
        assert_eq!(classify_health("<html></html>", &table), SessionHealth::Unknown);
    }

    #[test]
    fn test_parent_domain() {
        assert_eq!(parent_domain("ts1.x1.example.com"), "example.com");
        assert_eq!(parent_domain("localhost"), "localhost");
    }
}
