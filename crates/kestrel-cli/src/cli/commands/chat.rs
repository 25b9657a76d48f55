//! Interactive chat command handler.

use std::path::Path;

use anyhow::Result;
use kestrel_core::config::Config;

use super::SessionOptions;
use crate::modes;

pub async fn run(root: Option<&Path>, session_opts: &SessionOptions, config: &Config) -> Result<()> {
    let opts = modes::RunOptions::new(root, session_opts.resume.clone(), session_opts.no_save);
    modes::chat::run_interactive_chat(config, &opts).await
}
