//! Settings loading and process-level logging setup for dbwarden

pub mod logging;
mod settings_file;

pub use logging::{LoggingConfig, init as init_logging, init_from_settings as init_logging_from_settings};
pub use settings_file::*;
