//! CLI entry and dispatch.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use kestrel_core::core::session::ResumeTarget;
use kestrel_core::{config, logging};

mod commands;

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(version)]
#[command(about = "Kestrel agentic coding CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Root directory for file operations (default: the resumed session's
    /// directory, else the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(flatten)]
    session_args: SessionArgs,
}

/// Session persistence arguments shared by chat and exec.
#[derive(clap::Args, Debug, Clone, Default)]
struct SessionArgs {
    /// Resume a saved session (the latest one when no id is given)
    #[arg(long, value_name = "RUN_ID", global = true)]
    resume: Option<Option<String>>,

    /// Do not save the session
    #[arg(long = "no-save", global = true)]
    no_save: bool,
}

impl SessionArgs {
    fn resume_target(&self) -> Option<ResumeTarget> {
        self.resume.as_ref().map(|id| match id {
            Some(id) => ResumeTarget::Id(id.clone()),
            None => ResumeTarget::Latest,
        })
    }
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Start an interactive chat (default)
    Chat,

    /// Run a single prompt and print the answer
    Exec {
        /// The prompt to send to the agent
        #[arg(short, long)]
        prompt: String,

        /// Override the model from config
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Manage saved sessions
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum SessionCommands {
    /// Lists saved sessions, newest first
    List,
    /// Shows a saved session's transcript
    Show {
        /// The run id of the session to show
        #[arg(value_name = "RUN_ID")]
        id: String,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // Logging is best-effort; a read-only home must not block the CLI.
    let _log_guard = logging::init().ok();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli {
        command,
        root,
        session_args,
    } = cli;

    let session_opts = commands::SessionOptions {
        resume: session_args.resume_target(),
        no_save: session_args.no_save,
    };

    match command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            let config = config::Config::load().context("load config")?;
            commands::chat::run(root.as_deref(), &session_opts, &config).await
        }
        Commands::Exec { prompt, model } => {
            let mut config = config::Config::load().context("load config")?;
            if let Some(model) = model {
                config.model = model;
            }
            commands::exec::run(root.as_deref(), &session_opts, &config, &prompt).await
        }
        Commands::Sessions { command } => match command {
            SessionCommands::List => commands::sessions::list(),
            SessionCommands::Show { id } => commands::sessions::show(&id),
        },
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}
