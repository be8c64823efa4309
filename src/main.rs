use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use blockflow::datastore::{self, Datastore, MemoryDatastore};
use blockflow::telemetry::{init_tracing, LogFormat};
use blockflow::workflow::{compile, parse_workflow_file};
use blockflow::{Config, Engine};

#[derive(Parser)]
#[command(name = "blockflow")]
#[command(about = "Run block workflows as API handlers", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: <config dir>/blockflow/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and compile a workflow file
    Validate {
        /// Path to workflow YAML or JSON file
        file: PathBuf,
    },
    /// List the block kinds this build can run
    Blocks,
    /// Print the execution levels of a workflow
    Plan {
        /// Path to workflow YAML or JSON file
        file: PathBuf,
    },
    /// Execute a workflow once and print the response
    Run {
        /// Path to workflow YAML or JSON file
        file: PathBuf,
        /// JSON request payload
        #[arg(short, long)]
        input: Option<String>,
        /// Request headers (key=value)
        #[arg(short = 'H', long = "header", value_parser = parse_var)]
        headers: Vec<(String, String)>,
        /// SQLite datastore file (overrides config)
        #[arg(long)]
        datastore: Option<PathBuf>,
        /// JSON file of {collection: [documents]} loaded before the run
        #[arg(long)]
        seed: Option<PathBuf>,
        /// Run even if the workflow is not deployed
        #[arg(long)]
        allow_draft: bool,
    },
}

fn parse_var(s: &str) -> std::result::Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid header format '{}'. Expected key=value", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(LogFormat::from_env());

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };

    match cli.command {
        Commands::Validate { file } => cmd_validate(&file)?,
        Commands::Blocks => cmd_blocks(&config)?,
        Commands::Plan { file } => cmd_plan(&file)?,
        Commands::Run {
            file,
            input,
            headers,
            datastore,
            seed,
            allow_draft,
        } => {
            cmd_run(
                config,
                &file,
                input.as_deref(),
                headers,
                datastore,
                seed.as_deref(),
                allow_draft,
            )
            .await?
        }
    }

    Ok(())
}

fn cmd_validate(file: &Path) -> anyhow::Result<()> {
    let result = parse_workflow_file(file).and_then(|workflow| {
        compile(&workflow)
            .map(|compiled| (workflow, compiled))
            .map_err(Into::into)
    });

    match result {
        Ok((workflow, compiled)) => {
            println!("✓ Workflow '{}' is valid", workflow.name);
            println!();
            println!("  Blocks: {}", workflow.blocks.len());
            println!("  Connections: {}", workflow.connections.len());
            println!("  Levels: {}", compiled.plan.len());
            println!("  Respond block: {}", compiled.respond_block());
            println!("  Status: {}", workflow.status);
            Ok(())
        }
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&e.to_json())?);
            anyhow::bail!("{} is invalid", file.display())
        }
    }
}

fn cmd_blocks(config: &Config) -> anyhow::Result<()> {
    let engine = Engine::with_datastore(Arc::new(MemoryDatastore::new()), config)?;

    println!("{:<18} {}", "KIND", "DESCRIPTION");
    println!("{}", "-".repeat(60));
    for (kind, description) in engine.registry().descriptions() {
        println!("{:<18} {}", kind.as_str(), description);
    }
    Ok(())
}

fn cmd_plan(file: &Path) -> anyhow::Result<()> {
    let workflow = parse_workflow_file(file)?;
    let compiled = compile(&workflow)?;

    println!("{:<8} {:<32} {}", "LEVEL", "BLOCK", "AFTER");
    println!("{}", "-".repeat(60));
    for (index, level) in compiled.plan.levels().iter().enumerate() {
        for id in level {
            let Some(block) = compiled.block(id) else {
                continue;
            };
            let after = if block.upstream.is_empty() {
                "-".to_string()
            } else {
                block.upstream.join(", ")
            };
            println!(
                "{:<8} {:<32} {}",
                index,
                format!("{} [{}]", id, block.kind),
                after
            );
        }
    }
    Ok(())
}

async fn cmd_run(
    mut config: Config,
    file: &Path,
    input: Option<&str>,
    headers: Vec<(String, String)>,
    datastore_path: Option<PathBuf>,
    seed: Option<&Path>,
    allow_draft: bool,
) -> anyhow::Result<()> {
    let workflow = parse_workflow_file(file)?;
    if !workflow.is_deployed() && !allow_draft {
        anyhow::bail!(
            "Workflow '{}' is {}; deploy it or pass --allow-draft",
            workflow.name,
            workflow.status
        );
    }

    let payload: Value = match input {
        Some(raw) => serde_json::from_str(raw).context("--input is not valid JSON")?,
        None => serde_json::json!({}),
    };

    if datastore_path.is_some() {
        config.datastore.path = datastore_path;
    }
    let store = datastore::open(&config.datastore)?;

    if let Some(seed) = seed {
        let raw = std::fs::read_to_string(seed)
            .with_context(|| format!("failed to read seed file {}", seed.display()))?;
        let collections: HashMap<String, Vec<Value>> =
            serde_json::from_str(&raw).context("seed file must be {collection: [documents]}")?;
        for (collection, documents) in collections {
            let count = store.seed(&collection, documents).await?;
            tracing::info!("Seeded {} documents into '{}'", count, collection);
        }
    }

    let engine = Engine::with_datastore(store, &config)?;
    let headers: HashMap<String, String> = headers.into_iter().collect();

    match engine.execute(&workflow, payload, &headers).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&e.to_external_json())?);
            anyhow::bail!("Workflow '{}' failed: {}", workflow.name, e)
        }
    }
}
