//! Line-oriented interactive chat.

use std::io::{BufRead, Write, stderr, stdin, stdout};

use anyhow::{Context, Result};
use kestrel_core::config::Config;

use super::{RunOptions, build_agent, save_session};

/// What a line of input asks for.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Quit,
    Clear,
    Skip,
    Message(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    match line.trim() {
        ":q" | "exit" => Input::Quit,
        ":clear" => Input::Clear,
        "" => Input::Skip,
        text => Input::Message(text),
    }
}

/// Reads prompts from stdin until EOF or `:q`, answering each on stdout.
///
/// # Errors
/// Fails when the agent cannot be built or stdin cannot be read. Provider
/// failures are printed and the loop continues.
pub async fn run_interactive_chat(config: &Config, opts: &RunOptions) -> Result<()> {
    let mut agent = build_agent(config, opts)?;
    let store = opts.store();

    let resumed = agent.conversation().len();
    let _ = writeln!(
        stderr(),
        "Kestrel session {} ({resumed} messages). Type :q to quit, :clear to reset.",
        agent.run_id()
    );

    let mut line = String::new();
    loop {
        let _ = write!(stderr(), "> ");
        let _ = stderr().flush();

        line.clear();
        let read = stdin().lock().read_line(&mut line).context("read stdin")?;
        if read == 0 {
            break;
        }

        let text = match parse_input(&line) {
            Input::Quit => break,
            Input::Skip => continue,
            Input::Clear => {
                agent.clear();
                let _ = writeln!(stderr(), "Conversation cleared.");
                continue;
            }
            Input::Message(text) => text.to_string(),
        };

        let response = agent.chat(&text).await;
        {
            let mut out = stdout().lock();
            let _ = writeln!(out, "{}", response.text);
            let _ = out.flush();
        }

        // A failed save must not end the session.
        if let Err(e) = save_session(store.as_ref(), &agent) {
            tracing::warn!(error = %e, "session save failed");
            let _ = writeln!(stderr(), "Warning: {e:#}");
        }
    }

    Ok(())
}
