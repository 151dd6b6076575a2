// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scheduling managers: decide when actions fire.
//!
//! Troop and farm rules run on [`IntervalScheduler`]. The construction queue
//! is evaluated against each fresh snapshot instead. All three persist
//! their configuration through [`store`].

pub mod construction;
pub mod countdown;
pub mod farms;
pub mod interval;
pub mod store;
pub mod troops;

pub use construction::{BuildTask, ConstructionManager, ConstructionPass, ConstructionTick};
pub use countdown::Countdowns;
pub use farms::{FarmRule, FarmScheduler};
pub use interval::{IntervalScheduler, ScheduledRule, SchedulerTick};
pub use store::RuleCodec;
pub use troops::{TroopKey, TroopRule, TroopScheduler};
