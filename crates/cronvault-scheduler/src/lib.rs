//! # Cronvault Scheduler
//!
//! Persistent job scheduler: a file-backed catalog of recurring or on-demand
//! commands, a due-time state machine per command, and a dispatch loop that
//! runs due commands concurrently.
//!
//! ## Design Principles
//! - Catalog in a human-readable file (JSON, YAML or TOML)
//! - One bincode record per command, guarded by its own lock
//! - Cache commands for in-process work that never touches disk
//! - Tokio timers only, zero overhead when idle
//!
//! ## Architecture
//! ```text
//! SchedulerStore
//!   ├── catalog  (config.json)   → CommandRef … ─┐
//!   ├── items    (<id>.item)     → CommandSpec ←─┘
//!   ├── cache    (memory)        → CommandSpec (callbacks, computables)
//!   └── running  (executions.bin)→ Execution { next, last, times, scheduled }
//!
//! Engine loop (tokio interval)
//!   ├── reload running tasks
//!   ├── evaluate every command (need_scheduling)
//!   └── dispatch cycle → worker per command → scheduled run
//!                          ├── Shell / ShellArgv (tokio::process)
//!                          ├── Computable::compute(ctx)
//!                          └── Callback(ctx)
//!        outcomes → error / warning queues
//! ```

pub mod context;
pub mod dispatch;
pub mod encoding;
pub mod engine;
pub mod execution;
pub mod items;
pub mod period;
pub mod store;
pub mod tasks;

pub use context::{Computable, ExecutionContext, Reporter, SharedMap};
pub use encoding::{Encoding, default_catalog_path};
pub use engine::{EngineOptions, SchedulerState};
pub use execution::{DelayMode, Execution, ON_DEMAND_INTERVAL_SECS};
pub use items::ItemStore;
pub use period::parse_period;
pub use store::{EXECUTIONS_FILE, SchedulerStore};
pub use tasks::{Callback, Catalog, CommandRef, CommandSpec, Payload};
