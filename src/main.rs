use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dagsmith::config::Config;
use dagsmith::generate::DagGenerator;
use dagsmith::git::{GitAuth, GitWorkingTree, VersionedTree};
use dagsmith::github::{GitHubClient, PullRequestIssuer};
use dagsmith::queue::{self, QUEUE_CAPACITY};
use dagsmith::webhook::{self, AppState};
use dagsmith::workflow::Orchestrator;
use dagsmith::{definition, workflow};

#[derive(Parser)]
#[command(name = "dagsmith", version)]
#[command(about = "Turns pipeline definitions in Git into Airflow DAG pull requests")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file (defaults to dagsmith.toml if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server and the DAG generation consumer
    Serve {
        /// Listen port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Render one pipeline definition locally
    Generate {
        file: PathBuf,
        /// Write the DAG here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Parse and validate one pipeline definition
    Validate { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve { port } => serve(cli.config.as_deref(), port).await,
        Commands::Generate { file, output } => generate(&file, output.as_deref()),
        Commands::Validate { file } => validate(&file),
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "dagsmith=debug" } else { "dagsmith=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(config_path: Option<&std::path::Path>, port: Option<u16>) -> Result<()> {
    let mut config = Config::load(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    config.validate_for_serve()?;

    let tree = GitWorkingTree::open_or_clone(
        &config.git.remote_url,
        &config.git.default_branch,
        &config.app.repo_dir,
        GitAuth {
            username: config.git.username.clone(),
            token: config.git.token.clone(),
        },
    )
    .context("failed to prepare the working checkout")?;
    let tree: Arc<dyn VersionedTree> = Arc::new(tree);
    let issuer: Arc<dyn PullRequestIssuer> = Arc::new(GitHubClient::new(config.git.token.clone()));
    let orchestrator = Orchestrator::new(tree, issuer, config.git.default_branch.clone());

    let (queue, rx) = queue::channel(QUEUE_CAPACITY);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let consumer = tokio::spawn(queue::run_consumer(rx, orchestrator, shutdown_rx));

    let state = Arc::new(AppState { queue });
    webhook::start_server(config.server.port, state).await?;

    // Server is down; let the consumer finish its in-flight event.
    let _ = shutdown_tx.send(true);
    consumer.await.context("consumer task panicked")?;
    info!("shutdown complete");
    Ok(())
}

fn generate(file: &std::path::Path, output: Option<&std::path::Path>) -> Result<()> {
    let raw = std::fs::read(file)
        .with_context(|| format!("failed to read definition {}", file.display()))?;
    let parsed = definition::parse(&raw)?;
    let rendered = DagGenerator::new().render(&parsed.pipeline)?;

    match output {
        Some(path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

fn validate(file: &std::path::Path) -> Result<()> {
    let raw = std::fs::read(file)
        .with_context(|| format!("failed to read definition {}", file.display()))?;
    let parsed = definition::parse(&raw)?;
    let def = &parsed.pipeline;

    println!("{}: ok", file.display());
    println!("  name:     {}", def.name);
    println!("  version:  {}", def.version);
    println!("  steps:    {}", def.steps.len());
    println!(
        "  schedule: {}",
        def.schedule
            .as_ref()
            .map(|s| s.expression.as_str())
            .filter(|e| !e.is_empty())
            .unwrap_or("none")
    );
    println!(
        "  output:   {}",
        workflow::output_path(&format!(
            "{}{}",
            workflow::DEFINITIONS_ROOT,
            file.file_name().unwrap_or_default().to_string_lossy()
        ))
        .display()
    );
    Ok(())
}
