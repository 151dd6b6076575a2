// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Side-channel alerts.
//!
//! The engine hands alert-worthy events to a [`Notifier`]. Delivery runs on
//! its own task; a failed delivery is logged and otherwise ignored.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::config::TelegramConfig;
use crate::events::EngineEvent;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<()>;
}

/// Drops every message.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// Sends messages through a Telegram bot.
pub struct TelegramNotifier {
    endpoint: String,
    bot_token: String,
    chat_id: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Self {
        Self::with_endpoint(TELEGRAM_API, config)
    }

    /// Use a different API root. Tests point this at a mock server.
    pub fn with_endpoint(endpoint: &str, config: &TelegramConfig) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.endpoint, self.bot_token);
        let resp = self
            .client
            .post(&url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
            })
            .send()
            .await
            .context("sending telegram message")?;
        if !resp.status().is_success() {
            anyhow::bail!(
                "telegram rejected message: {} {}",
                resp.status(),
                resp.text().await.unwrap_or_default()
            );
        }
        Ok(())
    }
}

/// Notifier for the configured channel, or [`NoopNotifier`].
pub fn from_config(telegram: Option<&TelegramConfig>) -> Arc<dyn Notifier> {
    match telegram {
        Some(cfg) if !cfg.bot_token.is_empty() && !cfg.chat_id.is_empty() => {
            Arc::new(TelegramNotifier::new(cfg))
        }
        _ => Arc::new(NoopNotifier),
    }
}

/// Message text for an alert event, `None` for everything else.
pub fn alert_text(event: &EngineEvent) -> Option<String> {
    if !event.is_alert() {
        return None;
    }
    let text = event.describe()?;
    Some(match event.village_id() {
        Some(vid) => format!("[village {vid}] {text}"),
        None => text,
    })
}

/// Deliver `text` on a background task.
pub fn dispatch(notifier: &Arc<dyn Notifier>, text: String) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&text).await {
            tracing::warn!(error = %e, "notification failed");
        }
    });
}
