use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use weavecore::{Arguments, CommandRunner, DefinitionError, ExecutionEvent, State, WeaveError};
use weavedispatch::{LocalRunner, OpenSsh, RemoteRunner};
use weaveruntime::{
    NodeRegistration, NodeRegistry, RunReport, Runtime, Settings, StorageConfig, WorkflowCatalog,
};

#[derive(Parser)]
#[command(name = "weave")]
#[command(about = "Run shell-command workflows across local and remote slots", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(short, long, global = true, default_value = "weave.yaml")]
    config: PathBuf,

    /// Storage configuration file with a `storage:` section
    #[arg(long, global = true)]
    storage_config: Option<PathBuf>,

    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available workflows
    List,

    /// Check workflows and arguments without running anything
    Validate {
        /// Workflow names
        #[arg(short, long = "workflow", required = true, num_args = 1..)]
        workflows: Vec<String>,

        /// Run-level arguments as key=value
        #[arg(short, long = "arg", num_args = 1..)]
        args: Vec<String>,
    },

    /// Run one or more workflows
    Run {
        /// Workflow names
        #[arg(short, long = "workflow", required = true, num_args = 1..)]
        workflows: Vec<String>,

        /// Run-level arguments as key=value
        #[arg(short, long = "arg", num_args = 1..)]
        args: Vec<String>,

        /// Also use every registered node's cores
        #[arg(short, long)]
        distributed: bool,

        /// Local slots
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Per-task timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Attempts per task
        #[arg(long)]
        retries: Option<u32>,
    },

    /// Manage remote worker nodes
    Nodes {
        #[command(subcommand)]
        action: NodeCommands,
    },
}

#[derive(Subcommand)]
enum NodeCommands {
    /// List registered nodes
    List,

    /// Register a node after checking it is reachable
    Register {
        name: String,
        host: String,

        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        key_file: Option<PathBuf>,

        #[arg(short, long, default_value_t = 22)]
        port: u16,

        /// Core count; queried with `nproc` when omitted
        #[arg(long)]
        cores: Option<usize>,
    },

    /// Remove a node without contacting it
    Remove { name: String },

    /// Check that a node accepts a session
    Probe { name: String },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut settings = Settings::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(path) = &cli.storage_config {
        settings.storage = StorageConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?;
    }
    settings.storage.server.path = absolute(&settings.storage.server.path)?;

    let success = match cli.command {
        Commands::List => list_workflows(&settings)?,
        Commands::Validate { workflows, args } => validate(&settings, &workflows, &args)?,
        Commands::Run {
            workflows,
            args,
            distributed,
            jobs,
            timeout,
            retries,
        } => {
            if let Some(jobs) = jobs {
                settings.engine.local_slots = jobs;
            }
            if timeout.is_some() {
                settings.engine.task_timeout_secs = timeout;
            }
            if let Some(retries) = retries {
                settings.engine.retry.max_attempts = retries;
            }
            settings.engine.validate()?;
            run(&settings, &workflows, &args, distributed).await?
        }
        Commands::Nodes { action } => manage_nodes(&settings, action).await?,
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn list_workflows(settings: &Settings) -> Result<bool> {
    let catalog = WorkflowCatalog::new(&settings.workflows_dir);
    let workflows = catalog.list()?;
    if workflows.is_empty() {
        println!("No workflows found in {}", catalog.dir().display());
        return Ok(true);
    }

    println!("📦 Available workflows:");
    for workflow in workflows {
        println!();
        println!("  • {}", workflow.name);
        for (module, tasks) in workflow.modules {
            println!("    {}: {}", module, tasks.join(", "));
        }
    }
    Ok(true)
}

fn validate(settings: &Settings, workflows: &[String], args: &[String]) -> Result<bool> {
    let catalog = WorkflowCatalog::new(&settings.workflows_dir);
    let definitions = catalog.load_all(workflows)?;
    let arguments = Arguments::from_pairs(args)?;
    let runtime = Runtime::new(
        settings.storage.shared_storage(),
        settings.engine.clone(),
        Arc::new(LocalRunner::new()),
    );

    println!("🔍 Validating: {}", workflows.join(", "));
    match runtime.validate(&definitions, &arguments) {
        Ok(graph) => {
            println!("✅ Valid: {} modules, {} tasks", graph.modules().len(), graph.len());
            Ok(true)
        }
        Err(WeaveError::Definition(DefinitionError::Invalid(report))) => {
            println!("❌ {}", report);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

async fn run(settings: &Settings, workflows: &[String], args: &[String], distributed: bool) -> Result<bool> {
    let catalog = WorkflowCatalog::new(&settings.workflows_dir);
    let definitions = catalog.load_all(workflows)?;
    let arguments = Arguments::from_pairs(args)?;

    let runtime = Runtime::new(
        settings.storage.shared_storage(),
        settings.engine.clone(),
        Arc::new(LocalRunner::new()),
    );

    let remote_slots = if distributed {
        let shell = Arc::new(OpenSsh::new());
        let registry = NodeRegistry::load(&settings.nodes_file, shell.clone())?;
        let mapping = settings.storage.path_mapping();
        let slots = registry.slots(|node| {
            Arc::new(RemoteRunner::new(node.endpoint(), shell.clone()).with_mapping(mapping.clone()))
                as Arc<dyn CommandRunner>
        });
        if slots.is_empty() {
            tracing::warn!("Distributed mode requested but no nodes are registered");
        }
        slots
    } else {
        Vec::new()
    };

    let prepared = match runtime.plan(&definitions, arguments) {
        Ok(prepared) => prepared,
        Err(WeaveError::Definition(DefinitionError::Invalid(report))) => {
            println!("❌ {}", report);
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };
    println!("🚀 Run {} ({} tasks)", prepared.run_id, prepared.graph.len());
    println!("   Directory: {}", prepared.run_dir().display());
    println!();

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run");
            interrupt.cancel();
        }
    });

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            match event {
                ExecutionEvent::RunStarted { total_tasks, slots, .. } => {
                    println!("▶️  Running {} tasks on {} slots", total_tasks, slots);
                }
                ExecutionEvent::TaskStarted { task_id, slot, .. } => {
                    println!("  ⚡ {} on {}", task_id, slot);
                }
                ExecutionEvent::TaskRetrying { task_id, attempt, error, .. } => {
                    println!("  🔁 {} attempt {} failed: {}", task_id, attempt, error);
                }
                ExecutionEvent::TaskCompleted { task_id, duration_ms, .. } => {
                    println!("  ✅ {} completed in {}ms", task_id, duration_ms);
                }
                ExecutionEvent::TaskFailed { task_id, error, .. } => {
                    println!("  ❌ {} failed: {}", task_id, error);
                }
                ExecutionEvent::TaskBlocked { task_id, blocked_by, .. } => {
                    println!("  ⛔ {} blocked by {}", task_id, blocked_by);
                }
                ExecutionEvent::ModuleFinished { module, state, .. } => match state {
                    State::Done => println!("  📦 Module {} done", module),
                    _ => println!("  📦 Module {} {}", module, state),
                },
                ExecutionEvent::RunCompleted { success, duration_ms, .. } => {
                    if success {
                        println!("✨ Run completed successfully in {}ms", duration_ms);
                    } else {
                        println!("💥 Run failed after {}ms", duration_ms);
                    }
                    break;
                }
            }
        }
    });

    let report = runtime.execute(prepared, remote_slots, token).await?;

    if tokio::time::timeout(Duration::from_millis(500), event_task).await.is_err() {
        tracing::debug!("Event printer did not finish");
    }
    print_summary(&report);
    Ok(report.succeeded)
}

fn print_summary(report: &RunReport) {
    println!();
    println!("📊 Summary for {}:", report.run_id);
    println!("   Completed: {}", report.completed.len());
    for (module, state) in &report.modules {
        println!("   Module {}: {}", module, state);
    }
    if !report.failed.is_empty() {
        println!();
        println!("   Failed:");
        for failed in &report.failed {
            println!("     {}: {}", failed.task_id, failed.error);
        }
    }
    if !report.blocked.is_empty() {
        println!();
        println!("   Never ran (blocked):");
        for blocked in &report.blocked {
            println!(
                "     {}: waiting on {} ({} failed)",
                blocked.task_id, blocked.blocked_by, blocked.root_cause
            );
        }
    }
    if report.cancelled && !report.not_started.is_empty() {
        println!();
        println!("   Not started (cancelled): {}", report.not_started.join(", "));
    }
}

async fn manage_nodes(settings: &Settings, action: NodeCommands) -> Result<bool> {
    let mut registry = NodeRegistry::load(&settings.nodes_file, Arc::new(OpenSsh::new()))?;

    match action {
        NodeCommands::List => {
            if registry.list().is_empty() {
                println!("No nodes registered");
                return Ok(true);
            }
            println!("🖥️  Registered nodes:");
            for node in registry.list() {
                println!(
                    "  • {} {}@{}:{} ({} cores)",
                    node.name, node.username, node.host, node.port, node.cores
                );
            }
            println!("   Total cores: {}", registry.total_cores());
            Ok(true)
        }
        NodeCommands::Register {
            name,
            host,
            username,
            key_file,
            port,
            cores,
        } => {
            let registration = NodeRegistration {
                name,
                host,
                port,
                username,
                key_file,
                cores,
            };
            let record = registry.register(registration).await?;
            println!("✅ Registered {} with {} cores", record.name, record.cores);
            Ok(true)
        }
        NodeCommands::Remove { name } => {
            if registry.remove(&name)? {
                println!("🗑️  Removed {}", name);
            } else {
                println!("Node {} was not registered", name);
            }
            Ok(true)
        }
        NodeCommands::Probe { name } => {
            let alive = registry.probe(&name).await?;
            if alive {
                println!("✅ {} is reachable", name);
            } else {
                println!("❌ {} is unreachable", name);
            }
            Ok(alive)
        }
    }
}
