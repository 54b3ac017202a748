//! agentcrew: run a crew of local-model agents from the terminal.
//!
//! Commands:
//!
//!   run --project <file|text>   Research, analyze, design and implement
//!   memory facts [QUERY]        Inspect the persisted agent memory
//!   memory tasks [NAME]
//!   memory entity NAME
//!   memory reflections
//!   purge-cache                 Drop expired search cache entries
//!
//! Requires a reachable Ollama server (OLLAMA_URL, default localhost:11434).

mod config;
mod console;
mod pipeline;
mod roles;

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use agentcrew::{
    ApprovalHandler, AutoApprove, CancellationToken, CrewOutput, GenerationOptions, MemoryStore,
    OllamaClient, Process, ResultCache,
};

use crate::config::{Config, Settings};
use crate::roles::Resources;

#[derive(Parser)]
#[command(name = "agentcrew", about = "Role-based agent crews on a local model")]
pub struct Cli {
    /// Config file (default: ~/.config/agentcrew/config.toml)
    #[arg(long, global = true, env = "AGENTCREW_CONFIG")]
    config: Option<PathBuf>,

    /// Ollama base URL
    #[arg(long, global = true, env = "OLLAMA_URL")]
    ollama_url: Option<String>,

    /// Model tag
    #[arg(long, global = true, env = "AGENTCREW_MODEL")]
    model: Option<String>,

    /// Memory snapshot path
    #[arg(long, global = true)]
    memory_file: Option<PathBuf>,

    /// Search cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Refuse to start on an unreadable memory snapshot instead of
    /// moving it aside
    #[arg(long, global = true)]
    strict_memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the crew on a project
    Run(RunArgs),
    /// Inspect the memory snapshot
    Memory {
        #[command(subcommand)]
        query: MemoryQuery,
    },
    /// Remove expired search cache entries
    PurgeCache,
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Project brief: a file path or the description itself
    #[arg(long)]
    project: String,

    #[arg(long, value_enum)]
    process: Option<ProcessArg>,

    /// Ask for approval on the terminal after each task
    #[arg(long)]
    human_feedback: bool,

    /// Where to write the results
    #[arg(long)]
    output: Option<PathBuf>,

    /// Seconds to wait for a reviewer
    #[arg(long)]
    approval_timeout: Option<u64>,

    /// Revisions allowed per task (0 = unbounded)
    #[arg(long)]
    max_revisions: Option<u32>,
}

#[derive(Subcommand)]
pub enum MemoryQuery {
    /// Stored facts, optionally filtered
    Facts { query: Option<String> },
    /// Task statuses, or one task's history
    Tasks { name: Option<String> },
    /// Everything known about an entity
    Entity { name: String },
    Reflections,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ProcessArg {
    Sequential,
    Hierarchical,
}

impl From<ProcessArg> for Process {
    fn from(arg: ProcessArg) -> Self {
        match arg {
            ProcessArg::Sequential => Process::Sequential,
            ProcessArg::Hierarchical => Process::Hierarchical,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs with AGENTCREW_LOG_JSON=1, human-readable otherwise
    let json_logs = std::env::var("AGENTCREW_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env()
        .add_directive("agentcrew=info".parse()?)
        .add_directive("agentcrew_cli=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match &cli.command {
        Command::Run(args) => {
            let settings = Settings::merge(&cli, Some(args), &config);
            run(&settings, &args.project).await
        }
        Command::Memory { query } => {
            let settings = Settings::merge(&cli, None, &config);
            inspect_memory(&settings, query)
        }
        Command::PurgeCache => {
            let settings = Settings::merge(&cli, None, &config);
            let cache = ResultCache::open(&settings.cache_dir)?.with_ttl(settings.cache_ttl);
            let removed = cache.purge_expired()?;
            println!("Removed {removed} expired cache entries from {}", cache.dir().display());
            Ok(())
        }
    }
}

async fn run(settings: &Settings, project_arg: &str) -> Result<()> {
    let project = pipeline::load_project(project_arg)?;

    let llm = OllamaClient::new(&settings.ollama_url)
        .with_model(&settings.model)
        .with_timeout(settings.request_timeout)
        .context("can't build HTTP client")?;
    let memory = Arc::new(
        MemoryStore::open_with_policy(&settings.memory_file, settings.snapshot_policy)
            .with_context(|| format!("can't open memory {}", settings.memory_file.display()))?,
    );
    let cache = ResultCache::open(&settings.cache_dir)
        .with_context(|| format!("can't open cache {}", settings.cache_dir.display()))?
        .with_ttl(settings.cache_ttl);

    let resources = Resources {
        llm: Arc::new(llm),
        memory: memory.clone(),
        cache,
        options: GenerationOptions::default(),
    };
    let team = roles::build_team(&resources, &settings.temperatures)?;

    let approval: Arc<dyn ApprovalHandler> = if settings.human_feedback {
        Arc::new(console::ConsoleApproval)
    } else {
        Arc::new(AutoApprove)
    };
    let mut crew = pipeline::build_crew(&team, &project, settings, approval, memory)?;

    tracing::info!(
        model = %settings.model,
        process = %settings.process,
        tasks = crew.execution_order().len(),
        "Starting crew"
    );

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; stopping after the current step");
            watcher.cancel();
        }
    });

    let output = crew.kickoff(&cancel).await.context("crew run failed")?;

    let report = render_report(&project, settings.process, &output);
    std::fs::write(&settings.output, &report)
        .with_context(|| format!("can't write {}", settings.output.display()))?;
    tracing::info!(path = %settings.output.display(), "Results written");

    println!("{}", output.result);
    Ok(())
}

fn render_report(project: &str, process: Process, output: &CrewOutput) -> String {
    let mut report = String::new();
    let _ = writeln!(report, "Project: {project}");
    let _ = writeln!(report, "Process: {process}\n");
    for task in &output.tasks {
        let _ = writeln!(report, "== {} ({}) ==\n", task.task_id, task.role);
        let _ = writeln!(report, "{}\n", task.output);
    }
    let _ = writeln!(report, "== Final result ==\n");
    let _ = writeln!(report, "{}", output.result);
    report
}

fn inspect_memory(settings: &Settings, query: &MemoryQuery) -> Result<()> {
    let store = MemoryStore::open_with_policy(&settings.memory_file, settings.snapshot_policy)
        .with_context(|| format!("can't open memory {}", settings.memory_file.display()))?;
    match query {
        MemoryQuery::Facts { query } => println!("{}", store.retrieve_facts(query.as_deref())),
        MemoryQuery::Tasks { name } => println!("{}", store.task_status(name.as_deref())),
        MemoryQuery::Entity { name } => println!("{}", store.retrieve_entity(name)),
        MemoryQuery::Reflections => println!("{}", store.reflections()),
    }
    Ok(())
}
