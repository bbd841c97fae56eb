//! Vigil CLI - browser test runs with selector healing and visual checks
//!
//! Usage:
//!   vigil init                        Create .vigil/ with a default config
//!   vigil run <script> --project <p>  Execute a stored script once
//!   vigil history                     Recent runs, newest first
//!   vigil show <run>                  A run and its execution log
//!   vigil approve <id>                Promote the latest screenshot to baseline
//!   vigil visual create <url>         Register an ad-hoc visual test

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vigil_agent::{has_credentials, AgentHealer, DisabledHealer, SelectorHealer};
use vigil_browser::{ChromeLauncher, StepExecutor};
use vigil_core::{TriggerSource, VigilConfig};
use vigil_runner::{
    FileStore, LogStore, RunStore, RunnerOptions, Stores, TestRunner, VisualTestService,
    HISTORY_LIMIT,
};
use vigil_visual::{ComparisonResult, FsArtifactStore, VisualComparator};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(author, version, about = "Browser test runs with self-healing selectors")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Workspace root holding .vigil/
    #[arg(short = 'C', long, default_value = ".", global = true)]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .vigil/ with a default config
    Init,

    /// Execute a stored script once
    Run {
        /// Script ID
        script: String,

        /// Project the run belongs to
        #[arg(short, long)]
        project: String,

        /// What started the run
        #[arg(long, default_value = "manual")]
        source: CliSource,

        /// Skip the visual check
        #[arg(long)]
        no_visual: bool,

        /// Show the browser window
        #[arg(long)]
        headed: bool,
    },

    /// Promote the latest screenshot for an artifact id to baseline
    Approve {
        /// Script ID or visual artifact id
        id: String,
    },

    /// Compare a PNG file against the baseline for an artifact id
    Compare {
        id: String,

        /// Screenshot to compare
        png: PathBuf,
    },

    /// Print baseline, latest and diff paths for an artifact id
    Images { id: String },

    /// List recent runs
    History {
        /// Only runs for this project
        #[arg(short, long)]
        project: Option<String>,

        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Show a run and its execution log
    Show {
        /// Run ID
        run: String,
    },

    /// Delete a run and its execution log
    Delete {
        /// Run ID
        run: String,
    },

    /// Ad-hoc visual tests
    Visual {
        #[command(subcommand)]
        action: VisualCommands,
    },
}

#[derive(Subcommand)]
enum VisualCommands {
    /// Register a URL for visual comparison
    Create {
        url: String,

        #[arg(short, long)]
        project: String,

        /// Display name (defaults to the URL)
        #[arg(long)]
        name: Option<String>,
    },

    /// List visual tests
    List {
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Screenshot the URL and compare with its baseline
    Run {
        id: String,

        /// Show the browser window
        #[arg(long)]
        headed: bool,
    },

    /// Accept the latest screenshot as baseline
    Approve { id: String },

    /// Remove a visual test and its images
    Delete { id: String },
}

/// CLI-friendly trigger source
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliSource {
    Manual,
    Scheduler,
    Ci,
    Webhook,
}

impl From<CliSource> for TriggerSource {
    fn from(s: CliSource) -> Self {
        match s {
            CliSource::Manual => TriggerSource::Manual,
            CliSource::Scheduler => TriggerSource::Scheduler,
            CliSource::Ci => TriggerSource::Ci,
            CliSource::Webhook => TriggerSource::Webhook,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let root = cli.root;
    match cli.command {
        Commands::Init => cmd_init(&root).await,
        Commands::Run {
            script,
            project,
            source,
            no_visual,
            headed,
        } => cmd_run(&root, &script, &project, source.into(), no_visual, headed).await,
        Commands::Approve { id } => cmd_approve(&root, &id).await,
        Commands::Compare { id, png } => cmd_compare(&root, &id, &png).await,
        Commands::Images { id } => cmd_images(&root, &id),
        Commands::History { project, limit } => cmd_history(&root, project.as_deref(), limit).await,
        Commands::Show { run } => cmd_show(&root, &run).await,
        Commands::Delete { run } => cmd_delete(&root, &run).await,
        Commands::Visual { action } => cmd_visual(&root, action).await,
    }
}

fn load_config(root: &Path) -> Result<VigilConfig> {
    VigilConfig::load_or_default(root).context("Failed to load .vigil/config.toml")
}

fn file_store(root: &Path, config: &VigilConfig) -> Arc<FileStore> {
    Arc::new(FileStore::new(config.data_dir(root)))
}

fn comparator(root: &Path, config: &VigilConfig) -> Arc<VisualComparator> {
    let store = FsArtifactStore::new(config.artifact_dir(root));
    Arc::new(VisualComparator::with_threshold(
        Arc::new(store),
        config.visual.threshold,
    ))
}

fn healer(config: &VigilConfig) -> Arc<dyn SelectorHealer> {
    if !config.healing.enabled {
        info!("Selector healing disabled by configuration");
        return Arc::new(DisabledHealer);
    }
    if !has_credentials() {
        warn!("No API key configured; selector healing is unavailable");
        return Arc::new(DisabledHealer);
    }
    Arc::new(AgentHealer::from_settings(&config.healing))
}

async fn cmd_init(root: &Path) -> Result<()> {
    info!("Initializing vigil in {:?}", root);

    let config_path = VigilConfig::write_default(root).context("Failed to write default config")?;
    let config = VigilConfig::default();
    let data_dir = config.data_dir(root);
    tokio::fs::create_dir_all(data_dir.join("scripts")).await?;
    tokio::fs::create_dir_all(config.artifact_dir(root)).await?;

    println!("Initialized vigil in {:?}", root);
    println!("Created:");
    println!("  {}", config_path.display());
    println!("  {}", data_dir.join("scripts").display());
    println!("  {}", config.artifact_dir(root).display());
    println!("\nNext steps:");
    println!("  1. Save scripts as JSON under {}", data_dir.join("scripts").display());
    println!("  2. Run 'vigil run <script-id> --project <id>'");
    println!("  3. Approve the first screenshot with 'vigil approve <script-id>'");

    Ok(())
}

async fn cmd_run(
    root: &Path,
    script_id: &str,
    project_id: &str,
    source: TriggerSource,
    no_visual: bool,
    headed: bool,
) -> Result<()> {
    let config = load_config(root)?;
    let store = file_store(root, &config);

    let mut options = RunnerOptions::from_config(&config);
    if no_visual {
        options.visual = false;
    }
    if headed {
        options.headless = false;
    }

    let runner = TestRunner::new(
        Stores::shared(store.clone()),
        Arc::new(ChromeLauncher::new(config.browser.clone())),
        healer(&config),
        comparator(root, &config),
    )
    .with_executor(StepExecutor::new(config.timeouts.clone()))
    .with_options(options);

    let outcome = runner.execute_test(script_id, project_id, source).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if let Some(run_id) = &outcome.run_id {
        print_logs(store.as_ref(), run_id).await?;
    }

    if !outcome.passed() {
        bail!(
            "Run {}: {}",
            outcome.status,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn cmd_approve(root: &Path, id: &str) -> Result<()> {
    let config = load_config(root)?;
    comparator(root, &config)
        .approve(id)
        .await
        .with_context(|| format!("Failed to approve {}", id))?;
    println!("Approved latest screenshot as baseline for {}", id);
    Ok(())
}

async fn cmd_compare(root: &Path, id: &str, png: &Path) -> Result<()> {
    let config = load_config(root)?;
    let bytes = tokio::fs::read(png)
        .await
        .with_context(|| format!("Failed to read {:?}", png))?;

    let result = comparator(root, &config).compare(id, &bytes).await?;
    print_comparison(&result);
    Ok(())
}

fn cmd_images(root: &Path, id: &str) -> Result<()> {
    let config = load_config(root)?;
    let Some(paths) = comparator(root, &config).locate(id) else {
        bail!("Invalid artifact id: {}", id);
    };

    for (label, path) in [
        ("baseline", &paths.baseline),
        ("latest", &paths.latest),
        ("diff", &paths.diff),
    ] {
        let marker = if path.exists() { "" } else { " (missing)" };
        println!("{:<9} {}{}", label, path.display(), marker);
    }
    Ok(())
}

async fn cmd_history(root: &Path, project: Option<&str>, limit: usize) -> Result<()> {
    let config = load_config(root)?;
    let store = file_store(root, &config);
    let runs = store.list_runs(project, limit.min(HISTORY_LIMIT)).await?;

    if runs.is_empty() {
        println!("No runs recorded");
        return Ok(());
    }

    for run in runs {
        let duration = run
            .duration_ms
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<7}  {:<9}  {:>8}  {}  {}",
            run.id,
            run.status.to_string(),
            run.trigger_source.to_string(),
            duration,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.script_id,
        );
    }
    Ok(())
}

async fn cmd_show(root: &Path, run_id: &str) -> Result<()> {
    let config = load_config(root)?;
    let store = file_store(root, &config);

    let Some(run) = store.get_run(run_id).await? else {
        bail!("Run not found: {}", run_id);
    };
    println!("{}", serde_json::to_string_pretty(&run)?);
    print_logs(store.as_ref(), run_id).await
}

async fn cmd_delete(root: &Path, run_id: &str) -> Result<()> {
    let config = load_config(root)?;
    let store = file_store(root, &config);

    if store.delete_run(run_id).await? {
        println!("Deleted run {}", run_id);
    } else {
        println!("No run {}", run_id);
    }
    Ok(())
}

async fn cmd_visual(root: &Path, action: VisualCommands) -> Result<()> {
    let config = load_config(root)?;
    let headless = match &action {
        VisualCommands::Run { headed, .. } => !headed && config.browser.headless,
        _ => config.browser.headless,
    };

    let service = VisualTestService::new(
        file_store(root, &config),
        Arc::new(ChromeLauncher::new(config.browser.clone())),
        comparator(root, &config),
    )
    .with_executor(StepExecutor::new(config.timeouts.clone()))
    .with_headless(headless);

    match action {
        VisualCommands::Create { url, project, name } => {
            let name = name.unwrap_or_else(|| url.clone());
            let test = service.create(&project, &name, &url).await?;
            println!("Created visual test {}", test.id);
        }
        VisualCommands::List { project } => {
            let tests = service.list(project.as_deref()).await?;
            if tests.is_empty() {
                println!("No visual tests");
            }
            for test in tests {
                println!("{}  {:<12}  {}  {}", test.id, test.project_id, test.name, test.target_url);
            }
        }
        VisualCommands::Run { id, .. } => {
            let result = service.run(&id).await?;
            print_comparison(&result);
        }
        VisualCommands::Approve { id } => {
            service.approve(&id).await?;
            println!("Approved latest screenshot for visual test {}", id);
        }
        VisualCommands::Delete { id } => {
            if service.delete(&id).await? {
                println!("Deleted visual test {}", id);
            } else {
                println!("No visual test {}", id);
            }
        }
    }
    Ok(())
}

async fn print_logs(store: &dyn LogStore, run_id: &str) -> Result<()> {
    let entries = store.logs_for_run(run_id).await?;
    println!("\nExecution log ({} entries):", entries.len());
    for entry in entries {
        println!(
            "  [{:>4}] {:<7} {:<12} {}",
            entry.step_index,
            entry.status.to_string(),
            entry.action,
            entry.message
        );
    }
    Ok(())
}

fn print_comparison(result: &ComparisonResult) {
    if !result.has_baseline {
        println!("{}: no baseline yet; run 'vigil approve {}' to accept it", result.id, result.id);
    } else if result.is_clean() {
        println!("{}: matches baseline", result.id);
    } else {
        println!(
            "{}: {:.2}% of pixels differ from baseline",
            result.id, result.diff_percentage
        );
    }
}
