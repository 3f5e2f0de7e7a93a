//! Command definitions: the core data model for scheduled work.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use cronvault_core::{CommandEntry, CronvaultError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::context::{Computable, ExecutionContext};
use crate::period::parse_period;

/// A function payload, invoked with the run's context.
pub type Callback = Arc<dyn Fn(&mut ExecutionContext) -> anyhow::Result<()> + Send + Sync>;

/// What a command runs when it fires.
#[derive(Clone)]
pub enum Payload {
    /// Shell command line, run through the platform shell.
    Shell(String),
    /// Program plus arguments, run without a shell.
    ShellArgv(Vec<String>),
    /// Self-contained unit of work.
    Computable(Arc<dyn Computable>),
    /// Plain function taking the execution context.
    Callback(Callback),
}

impl Payload {
    pub fn shell(command: impl Into<String>) -> Self {
        Payload::Shell(command.into())
    }

    /// Argv-form command; the program name is required.
    pub fn argv<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        if args.is_empty() {
            return Err(CronvaultError::InvalidCommand("empty argv sequence".into()));
        }
        Ok(Payload::ShellArgv(args))
    }

    pub fn computable(unit: impl Computable + 'static) -> Self {
        Payload::Computable(Arc::new(unit))
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&mut ExecutionContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Payload::Callback(Arc::new(f))
    }

    /// Build a payload from a loosely typed config value.
    /// A string is a shell line, an array of strings is an argv;
    /// every other shape is rejected here so it never reaches the engine.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        use serde_json::Value;
        match value {
            Value::String(s) if s.trim().is_empty() => {
                Err(CronvaultError::InvalidCommand("empty shell command".into()))
            }
            Value::String(s) => Ok(Payload::Shell(s.clone())),
            Value::Array(items) if items.is_empty() => Err(CronvaultError::UnsupportedPayload(
                "empty sequence".into(),
            )),
            Value::Array(items) => {
                let args: Option<Vec<String>> =
                    items.iter().map(|v| v.as_str().map(String::from)).collect();
                args.map(Payload::ShellArgv).ok_or_else(|| {
                    let kinds: Vec<&str> = items.iter().map(json_kind).collect();
                    CronvaultError::UnsupportedPayload(format!(
                        "heterogeneous sequence [{}]",
                        kinds.join(", ")
                    ))
                })
            }
            other => Err(CronvaultError::UnsupportedPayload(json_kind(other).into())),
        }
    }

    /// Short kind name used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Shell(_) => "shell",
            Payload::ShellArgv(_) => "argv",
            Payload::Computable(_) => "computable",
            Payload::Callback(_) => "callback",
        }
    }

    /// Human-readable label stored in the catalog.
    pub fn label(&self) -> String {
        match self {
            Payload::Shell(cmd) => cmd.clone(),
            Payload::ShellArgv(args) => args.join(" "),
            Payload::Computable(unit) => format!("computable:{}", unit.name()),
            Payload::Callback(_) => "callback".into(),
        }
    }

    /// Only shell payloads survive a binary round trip.
    pub fn is_persistable(&self) -> bool {
        matches!(self, Payload::Shell(_) | Payload::ShellArgv(_))
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "object",
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Shell(cmd) => f.debug_tuple("Shell").field(cmd).finish(),
            Payload::ShellArgv(args) => f.debug_tuple("ShellArgv").field(args).finish(),
            Payload::Computable(unit) => f.debug_tuple("Computable").field(&unit.name()).finish(),
            Payload::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Payload::Shell(a), Payload::Shell(b)) => a == b,
            (Payload::ShellArgv(a), Payload::ShellArgv(b)) => a == b,
            (Payload::Computable(a), Payload::Computable(b)) => Arc::ptr_eq(a, b),
            (Payload::Callback(a), Payload::Callback(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Wire shape of a persistable payload (borrowed for encoding).
#[derive(Serialize)]
enum PayloadRecordRef<'a> {
    Shell(&'a str),
    ShellArgv(&'a [String]),
}

/// Wire shape of a persistable payload (owned for decoding).
#[derive(Deserialize)]
enum PayloadRecord {
    Shell(String),
    ShellArgv(Vec<String>),
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Payload::Shell(cmd) => PayloadRecordRef::Shell(cmd).serialize(serializer),
            Payload::ShellArgv(args) => PayloadRecordRef::ShellArgv(args).serialize(serializer),
            other => Err(serde::ser::Error::custom(format!(
                "{} payload is not serializable",
                other.kind()
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match PayloadRecord::deserialize(deserializer)? {
            PayloadRecord::Shell(cmd) => Ok(Payload::Shell(cmd)),
            PayloadRecord::ShellArgv(args) if args.is_empty() => {
                Err(serde::de::Error::custom("empty argv sequence"))
            }
            PayloadRecord::ShellArgv(args) => Ok(Payload::ShellArgv(args)),
        }
    }
}

/// A job definition: timing rule plus payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Re-polled on a fixed short interval instead of a schedule.
    pub on_demand: bool,
    /// Duration string such as "24h" or "1h30m".
    pub period: Option<String>,
    /// Maximum number of runs for count-based jobs.
    pub repeat: Option<u32>,
    /// Time anchor of the schedule.
    pub since: DateTime<Utc>,
    pub payload: Payload,
}

impl CommandSpec {
    /// A bare command anchored at the current time.
    pub fn new(payload: Payload) -> Self {
        Self {
            on_demand: false,
            period: None,
            repeat: None,
            since: Utc::now(),
            payload,
        }
    }

    /// A recurring command; the period must parse.
    pub fn periodic(period: &str, payload: Payload) -> Result<Self> {
        let spec = Self {
            period: Some(period.to_string()),
            ..Self::new(payload)
        };
        spec.validate()?;
        Ok(spec)
    }

    /// A command limited to `times` runs.
    pub fn repeating(times: u32, payload: Payload) -> Self {
        Self {
            repeat: Some(times),
            ..Self::new(payload)
        }
    }

    /// A command re-polled on the on-demand interval.
    pub fn on_demand(payload: Payload) -> Self {
        Self {
            on_demand: true,
            ..Self::new(payload)
        }
    }

    /// Move the schedule anchor.
    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = since;
        self
    }

    /// Build a spec from a daemon config entry.
    pub fn from_entry(entry: &CommandEntry) -> Result<Self> {
        let since = match &entry.since {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map_err(|e| CronvaultError::InvalidCommand(format!("bad since '{raw}': {e}")))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };
        let spec = Self {
            on_demand: entry.on_demand,
            period: entry.period.clone(),
            repeat: entry.repeat,
            since,
            payload: Payload::from_value(&entry.command)?,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check the timing rule.
    pub fn validate(&self) -> Result<()> {
        if let Some(period) = &self.period
            && parse_period(period).is_none()
        {
            return Err(CronvaultError::InvalidPeriod(period.clone()));
        }
        Ok(())
    }

    /// Parsed period, if any.
    pub fn period_duration(&self) -> Option<Duration> {
        self.period.as_deref().and_then(parse_period)
    }
}

/// Catalog entry pointing at a stored CommandSpec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRef {
    /// Unique id (UUID v4), also the item record name.
    pub id: String,
    /// Human-readable description of the payload.
    #[serde(default)]
    pub label: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub first_run: DateTime<Utc>,
    pub last_run: DateTime<Utc>,
}

impl CommandRef {
    /// Fresh ref for a new command.
    pub fn new(spec: &CommandSpec) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: spec.payload.label(),
            created: now,
            updated: now,
            first_run: now,
            last_run: now,
        }
    }

    /// Record a payload change.
    pub fn touch(&mut self, spec: &CommandSpec) {
        self.label = spec.payload.label();
        self.updated = Utc::now();
    }
}

/// Catalog file body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Sync mode: due tasks run immediately, all together.
    #[serde(default)]
    pub sync: bool,
    #[serde(default)]
    pub commands: Vec<CommandRef>,
}
