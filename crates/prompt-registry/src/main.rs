use std::collections::HashMap;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};

use prompt_registry::{
    BuiltinVocabulary, ListenerRequest, MaxIdFile, Outcome, Prompt, PromptError, PromptId,
    PromptMetadata, PromptNotifier, PromptRegistry, RegistryConfig, ReplyError, ReplyPermission,
    RuleConstraints,
};

const APP_NAME: &str = "prompt-registry";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_replay(config: RegistryConfig) -> Result<()> {
    handle_replay(config).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common);

    let config = RegistryConfig::load(cli.common.config.as_deref())?;
    debug!("effective config: {config:#?}");

    match cli.command {
        Command::Replay => async_replay(config),
        Command::Config { command } => handle_config(&config, command),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Outstanding-request registry for interactive access prompts.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true, env = "PROMPT_REGISTRY_CONFIG")]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,
}

impl CommonOpts {
    fn effective_log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else if self.trace {
            LevelFilter::Trace
        } else if self.debug {
            LevelFilter::Debug
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Drive a registry from JSON-lines commands on stdin
    Replay,
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
}

fn init_logging(common: &CommonOpts) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = common.effective_log_level();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "prompt_registry={},{APP_NAME}={}",
            level.as_str().to_lowercase(),
            level.as_str().to_lowercase()
        ))
    });

    // Replay output goes to stdout, so logs always go to stderr.
    if common.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(io::stderr().is_terminal())
                    .with_writer(io::stderr),
            )
            .try_init()
            .ok();
    }

    // Also init env_logger for compatibility with log crate users
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    builder.filter_level(level);
    builder.try_init().ok();
}

fn handle_config(config: &RegistryConfig, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let body = toml::to_string_pretty(config).context("serializing config to TOML")?;
            print!("{body}");
            Ok(())
        }
    }
}

/// One replay command read from stdin.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ReplayOp {
    Request {
        user: u32,
        snap: String,
        interface: String,
        path: String,
        permissions: Vec<String>,
        #[serde(default)]
        remaining: Option<Vec<String>>,
    },
    Reply {
        user: u32,
        id: PromptId,
        outcome: String,
        #[serde(default = "default_true")]
        activity: bool,
    },
    Rule {
        user: u32,
        snap: String,
        interface: String,
        path_pattern: String,
        permissions: Vec<String>,
        outcome: String,
    },
    List {
        user: u32,
        #[serde(default = "default_true")]
        activity: bool,
    },
    Get {
        user: u32,
        id: PromptId,
        #[serde(default = "default_true")]
        activity: bool,
    },
    Sleep {
        millis: u64,
    },
    Close,
}

fn default_true() -> bool {
    true
}

/// One line of replay output on stdout.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ReplayEvent<'a> {
    Notice {
        user: u32,
        id: PromptId,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<&'a HashMap<String, String>>,
    },
    ListenerReply {
        line: usize,
        permission: &'a ReplyPermission,
    },
    Added {
        line: usize,
        prompt: &'a Prompt,
        merged: bool,
    },
    Prompts {
        prompts: &'a [Prompt],
    },
    Replied {
        prompt: &'a Prompt,
    },
    Satisfied {
        ids: &'a [PromptId],
    },
    Closed,
    Error {
        line: usize,
        message: String,
    },
}

fn emit(event: &ReplayEvent<'_>) {
    match serde_json::to_string(event) {
        Ok(line) => {
            let mut stdout = io::stdout().lock();
            if let Err(e) = writeln!(stdout, "{line}") {
                debug!("cannot write replay event to stdout: {e}");
            }
        }
        Err(e) => warn!("cannot serialize replay event: {e}"),
    }
}

struct StdoutNotifier;

impl PromptNotifier for StdoutNotifier {
    fn notify_prompt(
        &self,
        user: u32,
        id: PromptId,
        data: Option<&HashMap<String, String>>,
    ) -> anyhow::Result<()> {
        emit(&ReplayEvent::Notice { user, id, data });
        Ok(())
    }
}

/// Listener request standing in for the kernel; identified by the input
/// line which created it.
struct StdoutListener {
    line: usize,
}

impl ListenerRequest for StdoutListener {
    fn reply(&self, allowed: &ReplyPermission) -> Result<(), ReplyError> {
        emit(&ReplayEvent::ListenerReply {
            line: self.line,
            permission: allowed,
        });
        Ok(())
    }
}

async fn handle_replay(config: RegistryConfig) -> Result<()> {
    let ids = MaxIdFile::open(&config.max_id_path)
        .with_context(|| format!("opening max ID file {}", config.max_id_path.display()))?;
    info!(
        "max ID file {} at {}",
        ids.path().display(),
        PromptId(ids.current())
    );
    let registry = PromptRegistry::new(
        config,
        Box::new(ids),
        Arc::new(BuiltinVocabulary),
        Arc::new(StdoutNotifier),
    )?;
    info!("replaying commands from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0;
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let result = match serde_json::from_str::<ReplayOp>(line) {
            Ok(op) => apply(&registry, line_no, op).await,
            Err(e) => Err(anyhow::Error::new(e).context("parsing command")),
        };
        if let Err(e) = result {
            emit(&ReplayEvent::Error {
                line: line_no,
                message: format!("{e:#}"),
            });
        }
    }

    if !registry.is_closed() {
        registry.close()?;
    }
    Ok(())
}

async fn apply(registry: &PromptRegistry, line: usize, op: ReplayOp) -> Result<()> {
    match op {
        ReplayOp::Request {
            user,
            snap,
            interface,
            path,
            permissions,
            remaining,
        } => {
            let metadata = PromptMetadata::new(user, snap, interface);
            let remaining = remaining.unwrap_or_else(|| permissions.clone());
            let (prompt, merged) = registry.add_or_merge(
                &metadata,
                &path,
                permissions,
                remaining,
                Arc::new(StdoutListener { line }),
            )?;
            emit(&ReplayEvent::Added {
                line,
                prompt: &prompt,
                merged,
            });
        }
        ReplayOp::Reply {
            user,
            id,
            outcome,
            activity,
        } => {
            let outcome: Outcome = outcome.parse()?;
            let prompt = registry.reply(user, id, outcome, activity)?;
            emit(&ReplayEvent::Replied { prompt: &prompt });
        }
        ReplayOp::Rule {
            user,
            snap,
            interface,
            path_pattern,
            permissions,
            outcome,
        } => {
            let outcome: Outcome = outcome.parse()?;
            let metadata = PromptMetadata::new(user, snap, interface);
            let rule = RuleConstraints::new(path_pattern, permissions);
            let ids = registry.handle_new_rule(&metadata, &rule, outcome)?;
            emit(&ReplayEvent::Satisfied { ids: &ids });
        }
        ReplayOp::List { user, activity } => {
            let prompts = registry.prompts(user, activity)?;
            emit(&ReplayEvent::Prompts { prompts: &prompts });
        }
        ReplayOp::Get { user, id, activity } => {
            let prompt = registry.prompt_with_id(user, id, activity)?;
            emit(&ReplayEvent::Prompts {
                prompts: std::slice::from_ref(&prompt),
            });
        }
        ReplayOp::Sleep { millis } => {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
        ReplayOp::Close => match registry.close() {
            Ok(()) => emit(&ReplayEvent::Closed),
            Err(PromptError::Closed) => warn!("registry already closed"),
            Err(e) => return Err(e.into()),
        },
    }
    Ok(())
}
