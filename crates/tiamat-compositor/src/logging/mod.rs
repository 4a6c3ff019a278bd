//! Logging utilities.
//!
//! Centralizes logger initialization; the rest of the crate only speaks the
//! standard `log` facade.

mod init;

pub use init::{init_logging, LoggingConfig};
