//! Core Kestrel library (engine, providers, tools, config).

pub mod config;
pub mod core;
pub mod logging;
pub mod prompts;
pub mod providers;
pub mod tools;
