// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Outpost library: a paced automation engine for a browser strategy game
//! that has no public API.
//!
//! State is read by scraping HTML pages through a single-flight request
//! pipeline. Actions are replayed as the same HTTP exchanges a browser would
//! issue. Three scheduling managers decide when those actions fire.

pub mod actions;
pub mod activity;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod extraction;
pub mod fetch;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use config::EngineConfig;
pub use engine::{Command, Engine, EngineHandle};
pub use events::{EngineEvent, EventBus};
