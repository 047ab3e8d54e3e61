mod rules;

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use sweeper_core::app::config::{QUEUE_VAR, URL_VAR};
use sweeper_core::app::{BuildError, ConfigError, SweepConfig, SweepLoop};
use sweeper_core::domain::{JsonPointerKey, LoopStrategy, SweepError};
use sweeper_core::impls::AmqpBroker;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::rules::{AgeRule, FieldMatch, MessageRule, RemoveUpTo, RuleError};

#[derive(Debug, Parser)]
#[command(name = "sweeper", version, about = "Remove unwanted messages from a RabbitMQ queue")]
struct Cli {
    /// Broker URL.
    #[arg(long, env = URL_VAR)]
    url: String,

    /// Queue to sweep.
    #[arg(long, env = QUEUE_VAR)]
    queue: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Walk the queue once, removing matches, and stop when the first message comes back.
    Cycle {
        /// JSON pointer identifying a message across redeliveries.
        #[arg(long, default_value = "/id")]
        key: String,

        /// How long to let in-flight deliveries settle after the cycle is detected
        /// (else RABBITMQ_DELETE_MESSAGE_TIMEOUT, else 1000).
        #[arg(long)]
        drain_grace_ms: Option<u64>,

        #[command(flatten)]
        rule: RuleArgs,
    },

    /// Remove matches until `--limit` have been removed. Fails if the queue goes quiet first.
    Instructed {
        /// Idle window (else RABBITMQ_IDLE_TIMEOUT, else 1500).
        #[arg(long)]
        idle_timeout_ms: Option<u64>,

        /// Stop after this many removals.
        #[arg(long, default_value_t = 1)]
        limit: u64,

        #[command(flatten)]
        rule: RuleArgs,
    },
}

#[derive(Debug, Args)]
struct RuleArgs {
    /// Remove only messages whose JSON POINTER equals VALUE. Repeatable.
    #[arg(long = "match", value_name = "POINTER=VALUE")]
    matches: Vec<String>,

    /// Remove only messages older than this many minutes.
    #[arg(long)]
    older_than_minutes: Option<i64>,

    /// JSON pointer of the message timestamp used by `--older-than-minutes`.
    #[arg(long, default_value = "/timestamp")]
    timestamp: String,
}

impl RuleArgs {
    fn rule(&self) -> Result<MessageRule, RuleError> {
        let matches = self
            .matches
            .iter()
            .map(|raw| FieldMatch::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;
        let age = self
            .older_than_minutes
            .map(|minutes| AgeRule::minutes(self.timestamp.clone(), minutes))
            .transpose()?;
        MessageRule::new(matches, age)
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Sweep(#[from] SweepError),
}

impl Cli {
    /// Flags win over the environment; the environment wins over defaults.
    fn config(&self) -> Result<SweepConfig, ConfigError> {
        let mut config = SweepConfig::from_lookup(|name| match name {
            URL_VAR => Some(self.url.clone()),
            QUEUE_VAR => Some(self.queue.clone()),
            _ => std::env::var(name).ok(),
        })?;
        match &self.command {
            Command::Cycle {
                drain_grace_ms: Some(ms),
                ..
            } if *ms > 0 => config.drain_grace_ms = *ms,
            Command::Instructed {
                idle_timeout_ms: Some(ms),
                ..
            } if *ms > 0 => config.idle_timeout_ms = *ms,
            _ => {}
        }
        Ok(config)
    }

    fn sweep(&self) -> Result<SweepLoop, CliError> {
        let strategy = match &self.command {
            Command::Cycle { key, rule, .. } => {
                LoopStrategy::cycle_detect(rule.rule()?, JsonPointerKey::new(key.clone()))
            }
            Command::Instructed { limit, rule, .. } => {
                LoopStrategy::instructed(RemoveUpTo::new(rule.rule()?, *limit))
            }
        };
        Ok(SweepLoop::builder()
            .config(&self.config()?)
            .strategy(strategy)
            .build()?)
    }
}

async fn run(cli: &Cli) -> Result<u64, CliError> {
    let sweep = cli.sweep()?;
    Ok(sweep.run(&AmqpBroker::new()).await?)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(&cli).await {
        Ok(removed) => {
            println!("{removed}");
            ExitCode::SUCCESS
        }
        Err(CliError::Sweep(err @ SweepError::IdleTimeout { removed, window })) => {
            println!("{removed}");
            tracing::error!(removed, window = ?window, "{err}");
            ExitCode::FAILURE
        }
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
