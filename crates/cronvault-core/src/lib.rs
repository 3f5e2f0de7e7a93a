//! # Cronvault Core
//!
//! Error taxonomy and daemon configuration shared by the scheduler crate and
//! the `cronvault` binary.

pub mod config;
pub mod error;

pub use config::{CommandEntry, DaemonConfig, EngineConfig};
pub use error::{CronvaultError, Result};
