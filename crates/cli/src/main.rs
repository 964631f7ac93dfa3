mod config;
mod error;

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use guardrail::Decision;
use mcp::ToolServerConnector;
use runtime::{
    Agent, AnthropicBackend, CancelOutcome, EmptyToolHost, EventStream, Message, ResumeOutcome,
    ToolCall, ToolError, ToolHost, ToolSpec, Turn, TurnEvent,
};
use serde_json::Value;
use storage::{ConfirmationToken, PendingStore};

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "coxswain.toml";
const PENDING_DB: &str = "pending.db";

#[derive(Parser)]
#[command(name = "coxswain")]
#[command(about = "A guarded tool-calling assistant", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the config file (default: ./coxswain.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat
    Chat,
    /// List the tools offered by the tool server
    Tools,
    /// Show how the guardrail classifies a tool call
    Check {
        /// Tool name
        tool: String,
        /// Tool arguments as JSON
        #[arg(default_value = "{}")]
        arguments: String,
    },
    /// List tool calls awaiting confirmation
    Pending,
    /// Approve a suspended tool call and continue its turn
    Approve {
        /// Confirmation token
        token: ConfirmationToken,
    },
    /// Reject a suspended tool call
    Reject {
        /// Confirmation token
        token: ConfirmationToken,
    },
}

/// Tool host chosen by configuration.
enum Tools {
    Server(ToolServerConnector),
    Disconnected(EmptyToolHost),
}

impl ToolHost for Tools {
    async fn specs(&self) -> Vec<ToolSpec> {
        match self {
            Self::Server(server) => server.specs().await,
            Self::Disconnected(empty) => empty.specs().await,
        }
    }

    async fn execute(&self, call: &ToolCall) -> std::result::Result<String, ToolError> {
        match self {
            Self::Server(server) => server.execute(call).await,
            Self::Disconnected(empty) => empty.execute(call).await,
        }
    }
}

type CliAgent = Agent<AnthropicBackend, Tools>;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Chat) | None => cmd_chat(&config).await,
        Some(Commands::Tools) => cmd_tools(&config).await,
        Some(Commands::Check { tool, arguments }) => cmd_check(&config, &tool, &arguments),
        Some(Commands::Pending) => cmd_pending(&config),
        Some(Commands::Approve { token }) => cmd_approve(&config, token).await,
        Some(Commands::Reject { token }) => cmd_reject(&config, token),
    }
}

async fn cmd_chat(config: &Config) -> Result<()> {
    println!("coxswain v{}", env!("CARGO_PKG_VERSION"));

    let agent = build_agent(config, open_store(config, true)?)?;
    let system_prompt = config.prompt.system_prompt().render();
    let model = config.model();

    println!("Model: {}", model.model);
    match config.tool_server.server_config() {
        Some(server) => println!("Tool server: {}", server.command),
        None => println!("Tool server: none"),
    }
    println!("Type 'quit' or Ctrl+D to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut history: Vec<Message> = Vec::new();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        history.push(Message::user(input));
        let turn = Turn::new(history.clone())
            .with_system_prompt(system_prompt.clone())
            .with_model(model.clone());

        println!();
        let mut reply = String::new();
        let mut stream = agent.run(turn);
        let completed = loop {
            match render(stream, &mut reply).await? {
                Ending::Complete => break true,
                Ending::Failed => break false,
                Ending::Confirm(token) => match prompt_approval()? {
                    true => match agent.resume(&token)? {
                        ResumeOutcome::Resumed(next) => stream = next,
                        ResumeOutcome::NotFound => {
                            println!("That request is no longer pending.");
                            break false;
                        }
                    },
                    false => {
                        agent.cancel(&token)?;
                        println!("Cancelled.");
                        break false;
                    }
                },
            }
        };
        println!("\n");

        if completed && !reply.trim().is_empty() {
            history.push(Message::assistant(reply));
        } else if !completed {
            history.pop();
        }
    }

    println!("Goodbye.");
    Ok(())
}

async fn cmd_tools(config: &Config) -> Result<()> {
    let Some(server) = config.tool_server.server_config() else {
        println!("No tool server configured.");
        return Ok(());
    };

    let tools = ToolServerConnector::new(server).specs().await;
    if tools.is_empty() {
        println!("No tools available.");
        return Ok(());
    }

    for tool in tools {
        let summary = tool.description.lines().next().unwrap_or_default();
        println!("{:<32}  {summary}", tool.name);
    }
    Ok(())
}

fn cmd_check(config: &Config, tool: &str, arguments: &str) -> Result<()> {
    let arguments: Value = serde_json::from_str(arguments)?;

    match config.guardrail().classify(tool, &arguments) {
        Decision::Allow => println!("allow"),
        Decision::Block { reason } => println!("block: {reason}"),
        Decision::Confirm { risk, reason } => println!("confirm ({risk} risk): {reason}"),
    }
    Ok(())
}

fn cmd_pending(config: &Config) -> Result<()> {
    let store = open_store(config, false)?;
    store.purge_expired()?;
    let pending = store.list()?;

    if pending.is_empty() {
        println!("No pending tool calls.");
        return Ok(());
    }

    println!("{:<36}  {:<20}  TOOL", "TOKEN", "REQUESTED");
    println!("{}", "-".repeat(80));

    for summary in pending {
        let requested = Local
            .from_utc_datetime(&summary.created_at.naive_utc())
            .format("%Y-%m-%d %H:%M");
        println!("{:<36}  {:<20}  {}", summary.token, requested, summary.label);
    }

    Ok(())
}

async fn cmd_approve(config: &Config, token: ConfirmationToken) -> Result<()> {
    let agent = build_agent(config, open_store(config, false)?)?;

    let mut stream = match agent.resume(&token)? {
        ResumeOutcome::Resumed(stream) => stream,
        ResumeOutcome::NotFound => {
            println!("No pending tool call for {token}.");
            return Ok(());
        }
    };

    let mut reply = String::new();
    loop {
        match render(stream, &mut reply).await? {
            Ending::Complete | Ending::Failed => break,
            Ending::Confirm(next) => {
                if !prompt_approval()? {
                    println!("Left pending. Run 'coxswain approve {next}' or 'coxswain reject {next}'.");
                    break;
                }
                match agent.resume(&next)? {
                    ResumeOutcome::Resumed(resumed) => stream = resumed,
                    ResumeOutcome::NotFound => break,
                }
            }
        }
    }
    println!();
    Ok(())
}

fn cmd_reject(config: &Config, token: ConfirmationToken) -> Result<()> {
    // Cancelling never reaches the model, so no API key is needed.
    let backend = AnthropicBackend::builder(String::new()).build();
    let agent = Agent::new(backend, open_store(config, false)?);

    match agent.cancel(&token)? {
        CancelOutcome::Cancelled { tool_name, .. } => println!("Rejected '{tool_name}'."),
        CancelOutcome::NotFound => println!("No pending tool call for {token}."),
    }
    Ok(())
}

/// How a rendered event stream ended.
enum Ending {
    Complete,
    Failed,
    Confirm(ConfirmationToken),
}

/// Print a turn's events as they arrive, collecting the reply text.
async fn render(mut stream: EventStream, reply: &mut String) -> Result<Ending> {
    let mut stdout = io::stdout();

    while let Some(event) = stream.next().await {
        match event {
            TurnEvent::StreamMessageStart => {}
            TurnEvent::StreamChunk { delta } => {
                print!("{delta}");
                stdout.flush()?;
                reply.push_str(&delta);
            }
            TurnEvent::ToolCallStart { name, .. } => println!("\n[tool] {name}"),
            TurnEvent::ToolResult {
                name,
                preview,
                is_error,
                confirmed,
                ..
            } => {
                let label = match (is_error, confirmed) {
                    (true, _) => "failed",
                    (false, true) => "approved",
                    (false, false) => "ok",
                };
                let first = preview.lines().next().unwrap_or_default();
                println!("[tool] {name} {label}: {first}");
            }
            TurnEvent::ToolBlocked { name, reason, .. } => {
                println!("[blocked] {name}: {reason}");
            }
            TurnEvent::ConfirmationRequired {
                token,
                name,
                arguments,
                risk,
                description,
                ..
            } => {
                println!("\n[confirm] {name} ({risk} risk): {description}");
                println!("          arguments: {arguments}");
                println!("          token: {token}");
                return Ok(Ending::Confirm(token));
            }
            TurnEvent::StreamError { error } => {
                eprintln!("\nError: {error}");
                return Ok(Ending::Failed);
            }
            TurnEvent::RoundLimitReached { rounds } => {
                println!("\n[stopped after {rounds} rounds]");
            }
            TurnEvent::StreamComplete { usage } => {
                tracing::debug!(
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "turn complete"
                );
                return Ok(Ending::Complete);
            }
        }
    }
    Ok(Ending::Failed)
}

fn prompt_approval() -> Result<bool> {
    print!("Run it? [y/N] ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn build_agent(config: &Config, store: PendingStore) -> Result<CliAgent> {
    let api_key = runtime::resolve_api_key(config)?;

    let mut backend = AnthropicBackend::builder(api_key);
    if let Some(base_url) = &config.backend.base_url {
        backend = backend.base_url(base_url.clone());
    }

    let tools = match config.tool_server.server_config() {
        Some(server) => Tools::Server(ToolServerConnector::new(server)),
        None => Tools::Disconnected(EmptyToolHost),
    };

    Ok(Agent::new(backend.build(), store)
        .with_tools(Arc::new(tools))
        .with_guardrail(config.guardrail()))
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None if Path::new(CONFIG_FILE).exists() => Ok(Config::load(CONFIG_FILE)?),
        None => Ok(Config::default()),
    }
}

/// Open the on-disk pending store. Without `create`, a missing database is
/// an error rather than an empty store.
fn open_store(config: &Config, create: bool) -> Result<PendingStore> {
    let data_dir = dirs_data_dir().unwrap_or_else(|| ".coxswain".into());
    let db_path = data_dir.join(PENDING_DB);

    if !create && !db_path.exists() {
        return Err(Error::DatabaseNotFound { path: db_path });
    }
    std::fs::create_dir_all(&data_dir)?;

    let store = PendingStore::open(&db_path)?;
    Ok(match config.pending.ttl() {
        Some(ttl) => store.with_ttl(ttl),
        None => store,
    })
}

fn dirs_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/coxswain"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("coxswain"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("coxswain"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}
