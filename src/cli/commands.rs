//! CLI command definitions for agent-sandbox.
//!
//! Every command drives one agent identity whose sandbox lives under
//! `<agents-dir>/<agent-id>`. Model text is streamed to stdout, tool-call
//! progress to stderr.

use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::llm::{LiteLlmClient, LlmProvider};
use crate::pdf::MarkdownPdfRenderer;
use crate::scaffold::{
    AgentConfig, AgentContext, AgentEvent, AgentLoop, RunReport, RunState, ToolCallStatus,
    ToolRegistry,
};
use crate::web::HttpWebClient;

/// Default directory holding one sandbox per agent.
const DEFAULT_AGENTS_DIR: &str = "agents";

/// Run an LLM agent with sandboxed filesystem, shell, web and PDF tools.
#[derive(Parser, Debug)]
#[command(name = "agent-sandbox")]
#[command(about = "Run an LLM agent confined to a per-agent sandbox directory")]
#[command(version)]
#[command(
    long_about = "agent-sandbox runs a tool-using LLM agent whose file and shell access is confined to <agents-dir>/<agent-id>.\n\nExample usage:\n  agent-sandbox run \"Create a hello world script and run it\"\n  agent-sandbox --agent-id 5c1b... chat --thread-file thread.json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding the agent sandboxes.
    #[arg(long, env = "AGENT_SANDBOX_DIR", default_value = DEFAULT_AGENTS_DIR, global = true)]
    pub agents_dir: PathBuf,

    /// Reuse an existing agent identity (and its sandbox). A new one is created if omitted.
    #[arg(long, global = true)]
    pub agent_id: Option<Uuid>,

    /// Model to use; defaults to LITELLM_DEFAULT_MODEL.
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Conversation file restored before the first run and saved after each run.
    #[arg(long, global = true)]
    pub thread_file: Option<PathBuf>,

    /// Tool-call rounds allowed per run.
    #[arg(long, default_value = "50", global = true)]
    pub max_tool_rounds: usize,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run a single turn for the given prompt.
    Run(PromptArgs),

    /// Keep running turns until the agent calls `stop`.
    #[command(name = "loop")]
    Loop(LoopArgs),

    /// Interactive session: each input line is one turn.
    Chat,
}

#[derive(Parser, Debug)]
pub struct PromptArgs {
    /// The task for the agent.
    pub prompt: String,
}

#[derive(Parser, Debug)]
pub struct LoopArgs {
    /// The task for the agent.
    pub prompt: String,

    /// Maximum number of turns before giving up.
    #[arg(long, default_value = "20")]
    pub max_turns: usize,
}

/// Parse CLI arguments without running any command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let max_turns = match &cli.command {
        Commands::Loop(args) => args.max_turns,
        _ => AgentConfig::default().max_turns,
    };
    let mut config = AgentConfig::new()
        .with_max_tool_rounds(cli.max_tool_rounds)
        .with_max_turns(max_turns);
    if let Some(model) = &cli.model {
        config = config.with_model(model);
    }

    let llm_client = build_llm_client()?;
    let mut agent = build_agent(&cli, llm_client, config)?;
    let _interrupt = spawn_interrupt_handler(Arc::clone(agent.context()));

    match cli.command {
        Commands::Run(args) => {
            let report = run_turns(&mut agent, &args.prompt, false, cli.thread_file.as_deref()).await?;
            print_summary(&report);
        }
        Commands::Loop(args) => {
            let report = run_turns(&mut agent, &args.prompt, true, cli.thread_file.as_deref()).await?;
            print_summary(&report);
        }
        Commands::Chat => run_chat(&mut agent, cli.thread_file.as_deref()).await?,
    }

    agent.context().dispose_terminal().await;
    Ok(())
}

fn build_llm_client() -> anyhow::Result<Arc<dyn LlmProvider>> {
    info!("Using LiteLLM client from environment");
    Ok(Arc::new(LiteLlmClient::from_env().map_err(|e| {
        anyhow::anyhow!(
            "Failed to initialize LLM client: {}. Please set LITELLM_API_BASE (and LITELLM_API_KEY if required).",
            e
        )
    })?))
}

fn build_agent(
    cli: &Cli,
    llm_client: Arc<dyn LlmProvider>,
    config: AgentConfig,
) -> anyhow::Result<AgentLoop> {
    let agent_id = cli.agent_id.unwrap_or_else(Uuid::new_v4);
    let context = Arc::new(AgentContext::new(agent_id, &cli.agents_dir));
    let sandbox = context.init()?;
    info!(agent_id = %agent_id, sandbox = %sandbox.display(), "Agent ready");

    let web = HttpWebClient::from_env()?;
    if !web.has_search_credentials() {
        warn!("GOOGLE_API_KEY / GOOGLE_SEARCH_ENGINE_ID not set; web_search will fail");
    }
    let registry = ToolRegistry::with_default_tools(Arc::new(web), Arc::new(MarkdownPdfRenderer));

    let mut agent = AgentLoop::new(llm_client, registry, context, config);
    if let Some(path) = &cli.thread_file {
        restore_thread(&mut agent, path)?;
    }
    Ok(agent)
}

/// Cancel the active run on every Ctrl-C. Interrupts between runs are ignored.
fn spawn_interrupt_handler(context: Arc<AgentContext>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if context.cancel_active_run() {
                warn!(agent_id = %context.agent_id(), "Interrupted, cancelling the current run");
            } else {
                info!("No run in progress; type 'exit' or press Ctrl-D to quit");
            }
        }
    })
}

fn restore_thread(agent: &mut AgentLoop, path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let serialized = std::fs::read_to_string(path)?;
    agent.restore_thread(&serialized);
    info!(path = %path.display(), messages = agent.thread().len(), "Restored conversation");
    Ok(())
}

fn save_thread(agent: &AgentLoop, path: &Path) -> anyhow::Result<()> {
    std::fs::write(path, agent.export_thread()?)?;
    Ok(())
}

/// Print events until the sender side is dropped.
fn spawn_printer(mut events: mpsc::UnboundedReceiver<AgentEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                AgentEvent::TurnStarted => {}
                AgentEvent::Text(text) => {
                    print!("{}", text);
                    let _ = std::io::stdout().flush();
                }
                AgentEvent::ToolCall(call) => match call.status {
                    ToolCallStatus::Running => eprintln!("\n[{}] {}", call.name, call.arguments),
                    ToolCallStatus::Done => eprintln!("[{}] done", call.name),
                    ToolCallStatus::Error => eprintln!(
                        "[{}] {}",
                        call.name,
                        call.output.as_deref().unwrap_or("failed")
                    ),
                },
                AgentEvent::Finished(state) => {
                    println!();
                    if state != RunState::Completed {
                        eprintln!("[run {:?}]", state);
                    }
                }
            }
        }
    })
}

async fn run_turns(
    agent: &mut AgentLoop,
    prompt: &str,
    until_stopped: bool,
    thread_file: Option<&Path>,
) -> anyhow::Result<RunReport> {
    let (tx, rx) = mpsc::unbounded_channel();
    let printer = spawn_printer(rx);

    let outcome = if until_stopped {
        agent.run_until_stopped(prompt, &tx).await.map(|mut reports| reports.pop())
    } else {
        agent.run(prompt, &tx).await.map(Some)
    };
    drop(tx);
    let _ = printer.await;

    if let Some(path) = thread_file {
        save_thread(agent, path)?;
    }
    outcome?.ok_or_else(|| anyhow::anyhow!("No turn was run (max turns is 0)"))
}

async fn run_chat(agent: &mut AgentLoop, thread_file: Option<&Path>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        match run_turns(agent, line, false, thread_file).await {
            Ok(report) if report.stop_requested => {
                info!("Agent requested stop");
            }
            Ok(_) => {}
            Err(e) => eprintln!("Error: {e:#}"),
        }
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    eprintln!(
        "state: {:?}, model requests: {}, tool calls: {}",
        report.state, report.rounds, report.tool_calls
    );
}
