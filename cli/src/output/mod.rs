//! Terminal rendering of chat progress

pub mod cli_handler;

pub use cli_handler::{CliOutputConfig, CliOutputHandler};
