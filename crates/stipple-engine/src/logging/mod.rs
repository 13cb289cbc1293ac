//! Logger initialization.
//!
//! The renderer only emits through the `log` facade; `init_logging` is a
//! convenience for binaries and tests that want `env_logger` output.

mod init;

pub use init::{LoggingConfig, init_logging};
