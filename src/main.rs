use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use flowrun::config::Config;
use flowrun::workflow::{graph, parse_workflow_file};
use flowrun::{
    EventJournal, ExportFormat, Params, RunExecutor, RunObserver, RunStore, StepRegistry, Trigger,
};

#[derive(Parser)]
#[command(name = "flowrun")]
#[command(about = "Deterministic workflow run engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow file and print its execution order
    Validate {
        /// Path to workflow YAML file
        file: PathBuf,
    },
    /// Execute a workflow file against the built-in fixture handlers
    Run {
        /// Path to workflow YAML file
        file: PathBuf,
        /// JSON object of run inputs
        #[arg(short, long)]
        input: Option<String>,
        /// Trigger recorded on the run (manual|schedule|webhook|api)
        #[arg(short, long, default_value = "manual")]
        trigger: String,
        /// Also print the run exported as json or csv
        #[arg(long)]
        export: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = dispatch(cli).await {
        eprintln!("{}", serde_json::to_string_pretty(&e.to_json()).unwrap_or_else(|_| e.to_string()));
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> flowrun::Result<()> {
    match cli.command {
        Commands::Validate { file } => validate(&file),
        Commands::Run {
            file,
            input,
            trigger,
            export,
        } => run(&file, input.as_deref(), &trigger, export.as_deref()).await,
    }
}

fn validate(file: &PathBuf) -> flowrun::Result<()> {
    let workflow = parse_workflow_file(file)?;
    let order = graph::sort(&workflow.nodes, &workflow.edges)?;

    let ids: Vec<&str> = order.iter().map(|n| n.id.as_str()).collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "success": true,
            "workflow": workflow.name,
            "nodes": workflow.nodes.len(),
            "execution_order": ids,
        }))?
    );
    Ok(())
}

async fn run(
    file: &PathBuf,
    input: Option<&str>,
    trigger: &str,
    export: Option<&str>,
) -> flowrun::Result<()> {
    let config = Config::load();
    flowrun::metrics::init_metrics();

    let workflow = parse_workflow_file(file)?;
    let trigger: Trigger = trigger
        .parse()
        .map_err(flowrun::Error::Validation)?;
    let inputs: Params = match input {
        Some(raw) => serde_json::from_str(raw)?,
        None => Params::new(),
    };

    let store = Arc::new(RunStore::new());
    let journal = Arc::new(EventJournal::new());
    let executor = RunExecutor::new(StepRegistry::with_fixtures(), store.clone(), journal)
        .with_observer(RunObserver::new())
        .with_log_pace(Duration::from_millis(config.engine.log_pace_ms));

    let run = executor
        .start_run(
            &workflow.id,
            &workflow.name,
            workflow.nodes.clone(),
            &workflow.edges,
            trigger,
            inputs,
        )
        .await?;

    println!("{}", serde_json::to_string_pretty(&run)?);

    if let Some(format) = export {
        let format: ExportFormat = format.parse().map_err(flowrun::Error::Validation)?;
        let artifact = store.export_runs(&[run.run_id.clone()], format)?;
        println!("{}", artifact);
    }

    Ok(())
}
