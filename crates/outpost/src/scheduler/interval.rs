// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Generic per-entity interval scheduler.
//!
//! Holds a persisted rule set keyed by entity and one countdown per enabled
//! rule. Every mutation is written back to disk. When a countdown expires
//! the rule's action is handed out and the countdown restarts at the
//! rule's next interval. Actions are only handed out, never awaited; their
//! results come back later as ordinary pipeline completions.

use std::collections::BTreeMap;
use std::fmt::{Debug, Display};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use rand::Rng;

use super::countdown::Countdowns;
use super::store::{self, RuleCodec};
use crate::actions::Operation;
use crate::error::StoreError;
use crate::events::{EngineEvent, ManagerKind};

/// A rule the interval scheduler can run.
pub trait ScheduledRule: Clone + Debug {
    type Key: Ord + Clone + Display + Debug;

    fn key(&self) -> Self::Key;
    fn enabled(&self) -> bool;
    fn set_enabled(&mut self, enabled: bool);

    /// Seconds until the next firing, drawn fresh each restart.
    fn next_countdown<G: Rng>(&self, rng: &mut G) -> u64;

    /// The action to invoke when the countdown expires.
    fn action(&self) -> Operation;
}

/// What one tick of a scheduler produced.
#[derive(Debug, Default)]
pub struct SchedulerTick {
    pub fired: Vec<Operation>,
    pub events: Vec<EngineEvent>,
}

pub struct IntervalScheduler<C: RuleCodec>
where
    C::Rule: ScheduledRule,
{
    manager: ManagerKind,
    path: PathBuf,
    rules: BTreeMap<<C::Rule as ScheduledRule>::Key, C::Rule>,
    timers: Countdowns<<C::Rule as ScheduledRule>::Key>,
    _codec: PhantomData<C>,
}

type KeyOf<C> = <<C as RuleCodec>::Rule as ScheduledRule>::Key;

impl<C: RuleCodec> IntervalScheduler<C>
where
    C::Rule: ScheduledRule,
{
    /// Load `path` and start a countdown for every enabled rule.
    pub fn load<G: Rng>(manager: ManagerKind, path: &Path, rng: &mut G) -> Result<Self, StoreError> {
        let mut scheduler = Self {
            manager,
            path: path.to_path_buf(),
            rules: BTreeMap::new(),
            timers: Countdowns::new(),
            _codec: PhantomData,
        };
        let (rules, legacy) = store::load::<C>(path)?;
        for rule in rules {
            scheduler.rules.insert(rule.key(), rule);
        }
        if legacy {
            tracing::info!(manager = ?manager, path = %path.display(), "rewriting legacy rule file");
            scheduler.save()?;
        }
        let keys: Vec<_> = scheduler
            .rules
            .values()
            .filter(|r| r.enabled())
            .map(|r| r.key())
            .collect();
        for key in keys {
            scheduler.restart(&key, rng);
        }
        tracing::info!(
            manager = ?manager,
            rules = scheduler.rules.len(),
            running = scheduler.timers.len(),
            "rules loaded"
        );
        Ok(scheduler)
    }

    pub fn manager(&self) -> ManagerKind {
        self.manager
    }

    pub fn rules(&self) -> impl Iterator<Item = &C::Rule> {
        self.rules.values()
    }

    pub fn get(&self, key: &KeyOf<C>) -> Option<&C::Rule> {
        self.rules.get(key)
    }

    pub fn remaining(&self, key: &KeyOf<C>) -> u64 {
        self.timers.remaining(key).unwrap_or(0)
    }

    /// Add or replace a rule. Its countdown restarts when enabled.
    pub fn upsert<G: Rng>(&mut self, rule: C::Rule, rng: &mut G) -> Result<Vec<EngineEvent>, StoreError> {
        let key = rule.key();
        let enabled = rule.enabled();
        self.rules.insert(key.clone(), rule);
        self.save()?;
        tracing::info!(manager = ?self.manager, key = %key, enabled, "rule saved");

        let mut events = vec![EngineEvent::RulesChanged { manager: self.manager }];
        if enabled {
            events.push(self.restart(&key, rng));
        } else {
            events.push(self.halt(&key));
        }
        Ok(events)
    }

    /// Remove a rule. `Ok(None)` when it did not exist.
    pub fn remove(&mut self, key: &KeyOf<C>) -> Result<Option<Vec<EngineEvent>>, StoreError> {
        if self.rules.remove(key).is_none() {
            return Ok(None);
        }
        self.save()?;
        tracing::info!(manager = ?self.manager, key = %key, "rule removed");
        Ok(Some(vec![
            self.halt(key),
            EngineEvent::RulesChanged { manager: self.manager },
        ]))
    }

    /// Enable or disable a rule. Disabling reports zero remaining time.
    pub fn set_enabled<G: Rng>(
        &mut self,
        key: &KeyOf<C>,
        enabled: bool,
        rng: &mut G,
    ) -> Result<Option<Vec<EngineEvent>>, StoreError> {
        let Some(rule) = self.rules.get_mut(key) else {
            return Ok(None);
        };
        rule.set_enabled(enabled);
        self.save()?;
        tracing::info!(manager = ?self.manager, key = %key, enabled, "rule toggled");

        let timer = if enabled {
            self.restart(key, rng)
        } else {
            self.halt(key)
        };
        Ok(Some(vec![timer, EngineEvent::RulesChanged { manager: self.manager }]))
    }

    /// Advance every countdown by one second.
    pub fn tick<G: Rng>(&mut self, rng: &mut G) -> SchedulerTick {
        let elapsed = self.timers.tick();
        let mut out = SchedulerTick::default();
        for (key, remaining_secs) in elapsed.running {
            out.events.push(self.timer_event(&key, remaining_secs));
        }
        for key in elapsed.expired {
            let Some(rule) = self.rules.get(&key).filter(|r| r.enabled()) else {
                continue;
            };
            tracing::info!(manager = ?self.manager, key = %key, "rule fired");
            out.fired.push(rule.action());
            out.events.push(self.restart(&key, rng));
        }
        out
    }

    fn restart<G: Rng>(&mut self, key: &KeyOf<C>, rng: &mut G) -> EngineEvent {
        let secs = self
            .rules
            .get(key)
            .map(|r| r.next_countdown(rng))
            .unwrap_or(0);
        self.timers.start(key.clone(), secs);
        tracing::debug!(manager = ?self.manager, key = %key, secs, "countdown started");
        self.timer_event(key, self.remaining(key))
    }

    fn halt(&mut self, key: &KeyOf<C>) -> EngineEvent {
        self.timers.stop(key);
        self.timer_event(key, 0)
    }

    fn timer_event(&self, key: &KeyOf<C>, remaining_secs: u64) -> EngineEvent {
        EngineEvent::RuleTimer {
            manager: self.manager,
            key: key.to_string(),
            remaining_secs,
        }
    }

    fn save(&self) -> Result<(), StoreError> {
        store::save::<C>(&self.path, self.rules.values())
    }
}
