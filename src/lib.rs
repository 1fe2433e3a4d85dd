//! Flock head-count ledger.
//!
//! Keeps every flock's `current_count` consistent with the mortality and
//! treatment records written against it. All mutations go through
//! [`ledger`]; [`commands`] is the boundary callers use.

pub mod audit;
pub mod auth;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod id;
pub mod ledger;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod op_logging;
pub mod time;
pub mod validation;

pub use auth::{require_caller, Caller};
pub use commands::CommandOutcome;
pub use error::{AppError, AppResult};
