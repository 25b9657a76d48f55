//! Single-shot exec mode.

use std::io::{Write, stdout};

use anyhow::{Result, bail};
use kestrel_core::config::Config;

use super::{RunOptions, build_agent, save_session};

/// Sends one prompt, prints the answer to stdout and saves the session.
///
/// # Errors
/// Fails when the agent cannot be built, the session cannot be saved, or
/// the provider failed (the answer text is still printed first).
pub async fn run_exec(prompt: &str, config: &Config, opts: &RunOptions) -> Result<()> {
    let mut agent = build_agent(config, opts)?;
    let store = opts.store();

    let response = agent.chat(prompt).await;

    {
        let mut out = stdout().lock();
        if !response.text.is_empty() {
            let _ = writeln!(out, "{}", response.text);
        }
        let _ = out.flush();
    }

    if let Some(usage) = &response.usage {
        tracing::info!(
            run_id = agent.run_id(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "exec finished"
        );
    }

    save_session(store.as_ref(), &agent)?;

    if let Some(error) = response.error.as_ref().filter(|_| response.is_failure()) {
        bail!("{error}");
    }
    Ok(())
}
