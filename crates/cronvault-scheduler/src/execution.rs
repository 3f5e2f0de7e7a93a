//! Execution state machine: due-time computation and scheduling eligibility
//! for one tracked command.
//!
//! Every time-dependent method has an `*_at(now)` form so callers (and tests)
//! can evaluate the machine against an explicit clock.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use cronvault_core::{CronvaultError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tasks::CommandSpec;

/// Re-poll interval of on-demand commands, also the step of count-based ones.
pub const ON_DEMAND_INTERVAL_SECS: i64 = 20;

fn on_demand_interval() -> Duration {
    Duration::seconds(ON_DEMAND_INTERVAL_SECS)
}

/// How long a scheduled run sleeps before executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DelayMode {
    /// Sleep for the time remaining until `next`.
    #[default]
    UntilDue,
    /// Execute as soon as the run is scheduled.
    Immediate,
}

impl DelayMode {
    pub fn from_value(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "until_due" | "until-due" => Ok(DelayMode::UntilDue),
            "immediate" => Ok(DelayMode::Immediate),
            other => Err(CronvaultError::Config(format!("unknown delay mode '{other}'"))),
        }
    }
}

/// Runtime scheduling record of one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Same id as the command's catalog ref.
    pub id: String,
    /// Snapshot of the command definition.
    pub command: CommandSpec,
    /// Next due time.
    pub next: DateTime<Utc>,
    /// Last run completion (creation time until the first run).
    pub last: DateTime<Utc>,
    /// Number of completed runs.
    pub times: u32,
    /// A run is in flight; the due time is frozen while set.
    pub scheduled: bool,
    /// Private state carried across runs of this command.
    #[serde(with = "context_map")]
    pub context: HashMap<String, Value>,
}

impl Execution {
    pub fn new(id: impl Into<String>, command: CommandSpec) -> Self {
        Self::new_at(id, command, Utc::now())
    }

    pub fn new_at(id: impl Into<String>, command: CommandSpec, now: DateTime<Utc>) -> Self {
        let mut exec = Self {
            id: id.into(),
            command,
            next: now,
            last: now,
            times: 0,
            scheduled: false,
            context: HashMap::new(),
        };
        exec.reset();
        exec
    }

    /// Make the execution eligible for an immediate check.
    pub fn reset(&mut self) {
        self.next = self.last;
    }

    pub fn update_next(&mut self) {
        self.update_next_at(Utc::now());
    }

    /// Recompute `next` from the command's timing rule. No-op while in flight.
    pub fn update_next_at(&mut self, now: DateTime<Utc>) {
        if self.scheduled {
            return;
        }
        let cmd = &self.command;

        if cmd.on_demand {
            self.next = now + on_demand_interval();
            return;
        }

        if cmd.period.is_some() {
            match cmd.period_duration() {
                Some(period) => {
                    self.next = if now >= cmd.since && self.last > cmd.since {
                        cmd.since
                    } else {
                        self.last + period
                    };
                    return;
                }
                None => tracing::warn!(
                    "⚠️ Execution {}: unparsable period {:?}, ignoring it",
                    self.id,
                    cmd.period
                ),
            }
        }

        if let Some(repeat) = cmd.repeat.filter(|r| *r > 0) {
            self.next = if self.times > repeat {
                self.last
            } else if now >= cmd.since && self.last > cmd.since {
                cmd.since
            } else {
                now + on_demand_interval()
            };
        }
    }

    /// Count-based command that has used up its runs.
    pub fn exhausted(&self) -> bool {
        let cmd = &self.command;
        if cmd.on_demand || cmd.period_duration().is_some() {
            return false;
        }
        matches!(cmd.repeat, Some(repeat) if repeat > 0 && self.times > repeat)
    }

    pub fn need_scheduling(&mut self) -> bool {
        self.need_scheduling_at(Utc::now())
    }

    /// Recompute `next`, then report whether a run should be scheduled now.
    pub fn need_scheduling_at(&mut self, now: DateTime<Utc>) -> bool {
        self.update_next_at(now);
        !self.scheduled && !self.exhausted() && now >= self.next
    }

    /// `now >= next`, without recomputing.
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.next
    }

    pub fn expired(&mut self) -> bool {
        self.expired_at(Utc::now())
    }

    /// Recompute `next`; true only for an idle execution whose due time is
    /// still ahead. A past-due idle execution is not expired.
    pub fn expired_at(&mut self, now: DateTime<Utc>) -> bool {
        self.update_next_at(now);
        !(now >= self.next || self.scheduled)
    }

    /// Bookkeeping after a run.
    pub fn record_run(&mut self, completed_at: DateTime<Utc>) {
        self.times += 1;
        self.last = completed_at;
    }

    /// Sleep before executing a scheduled run.
    pub fn delay_until_due(&self, now: DateTime<Utc>, mode: DelayMode) -> std::time::Duration {
        match mode {
            DelayMode::Immediate => std::time::Duration::ZERO,
            DelayMode::UntilDue => (self.next - now).to_std().unwrap_or_default(),
        }
    }
}

/// The private map is stored as a JSON string so arbitrary values survive
/// the non-self-describing binary format.
mod context_map {
    use std::collections::HashMap;

    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(
        map: &HashMap<String, Value>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let text = serde_json::to_string(map).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<String, Value>, D::Error> {
        let text = String::deserialize(deserializer)?;
        serde_json::from_str(&text).map_err(serde::de::Error::custom)
    }
}
