//! # Cronny Core
//!
//! Shared foundation for the Cronny scheduling service:
//! - configuration (environment driven),
//! - the crate-wide error type,
//! - the `ActionExecutor` contract that concrete task implementations
//!   (HTTP call, logger, Slack message, container pull) plug into,
//! - the dynamic `Input`/`Output` value model that flows through workflows.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::CronnyConfig;
pub use error::{CronnyError, Result};
pub use traits::{run_action, validate_input, ActionExecutor, ActionKey, ActionKeyType};
pub use types::{Input, Output};
