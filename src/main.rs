use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use aca_swarm::config::{load_swarm_configuration, LogFormat};
use aca_swarm::engine::ClientEvent;
use aca_swarm::factory::SwarmFactory;
use aca_swarm::providers::{ModelProvider, OpenAICompatibleProvider, ScriptedProvider};
use aca_swarm::session::{FileConfigurationSource, InvocationRequest, SessionContext};
use aca_swarm::tools::ToolRegistry;
use aca_swarm::Config;

#[derive(Parser)]
#[command(name = "aca-swarm")]
#[command(about = "Bounded multi-agent swarm orchestration", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a swarm configuration without running it
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run one request through a swarm
    Run {
        #[arg(short, long)]
        config: PathBuf,

        /// Replay model turns from a YAML script instead of calling a model
        #[arg(long)]
        script: Option<PathBuf>,

        #[arg(long, default_value = "cli-session")]
        session_id: String,

        #[arg(long, default_value = "cli-user")]
        user_id: String,

        #[arg(help = "User message")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();
    init_logging(&config)?;

    match cli.command {
        Commands::Validate { config: path } => validate(&config, &path)?,
        Commands::Run {
            config: path,
            script,
            session_id,
            user_id,
            message,
        } => run(&config, path, script, session_id, user_id, message).await?,
    }

    Ok(())
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.log_level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }

    Ok(())
}

fn validate(config: &Config, path: &Path) -> Result<()> {
    let swarm_config = load_swarm_configuration(path)?;
    if swarm_config.needs_resolution() {
        println!(
            "Configuration references {} stored agents; they are checked when resolved",
            swarm_config.agent_references.len()
        );
        return Ok(());
    }

    swarm_config.validate()?;
    ToolRegistry::with_builtins(&config.default_time_zone).validate(&swarm_config)?;

    println!(
        "Configuration OK: {} agents {:?}, entry '{}'",
        swarm_config.agents.len(),
        swarm_config.node_names(),
        swarm_config.entry_agent
    );
    Ok(())
}

async fn run(
    config: &Config,
    path: PathBuf,
    script: Option<PathBuf>,
    session_id: String,
    user_id: String,
    message: String,
) -> Result<()> {
    let provider: Arc<dyn ModelProvider> = match script {
        Some(script) => Arc::new(ScriptedProvider::from_file(&script)?),
        None => Arc::new(OpenAICompatibleProvider::new(
            Some(config.openai_base_url.clone()),
            config.openai_api_key.clone(),
        )),
    };

    let tools = ToolRegistry::with_builtins(&config.default_time_zone);
    let factory = SwarmFactory::new(provider, Arc::new(tools))
        .with_executor_config(config.executor_config());
    let mut session = SessionContext::new(factory, Arc::new(FileConfigurationSource::new(path)));

    let (tx, rx) = mpsc::channel(64);
    let printer = tokio::spawn(async move {
        let mut frames = ReceiverStream::new(rx);
        let mut stdout = std::io::stdout();
        while let Some(frame) = frames.next().await {
            match &frame {
                ClientEvent::Token(token) => {
                    print!("{}", token.value);
                    let _ = stdout.flush();
                }
                ClientEvent::Final(_) => {
                    println!();
                    if let Ok(json) = serde_json::to_string_pretty(&frame) {
                        println!("{}", json);
                    }
                }
            }
        }
    });

    let request = InvocationRequest::new(message, session_id).with_user(user_id);
    let outcome = session.invoke(request, tx).await;
    session.shutdown().await;
    printer.await.context("output task failed")?;

    match outcome? {
        Some(result) if !result.is_completed() => bail!(
            "swarm finished with {}: {}",
            result.status,
            result.error.unwrap_or_default()
        ),
        _ => Ok(()),
    }
}
