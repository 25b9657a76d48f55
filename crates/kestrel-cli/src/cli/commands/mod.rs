//! CLI command handlers.

use kestrel_core::core::session::ResumeTarget;

pub mod chat;
pub mod config;
pub mod exec;
pub mod sessions;

/// Session flags resolved from the command line.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub resume: Option<ResumeTarget>,
    pub no_save: bool,
}
