//! Exec command handler.

use std::path::Path;

use anyhow::{Context, Result};
use kestrel_core::config::Config;

use super::SessionOptions;
use crate::modes;

pub async fn run(
    root: Option<&Path>,
    session_opts: &SessionOptions,
    config: &Config,
    prompt: &str,
) -> Result<()> {
    let opts = modes::RunOptions::new(root, session_opts.resume.clone(), session_opts.no_save);
    modes::exec::run_exec(prompt, config, &opts)
        .await
        .context("execute prompt")
}
