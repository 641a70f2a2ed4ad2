use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use pipewright_core::config::AppConfig;

use pipewright_agent::{seed_state, Pipeline, RunRecord, RunStatus};
use pipewright_tools::Repository;

#[derive(Parser)]
#[command(
    name = "pipewright",
    version,
    about = "Turns a PRD into a reviewed, tested project through approval-gated stages"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "pipewright.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline on a product requirements document
    Run {
        /// Path to the PRD
        #[arg(long)]
        prd: PathBuf,
        /// Where to write the JSON output record
        #[arg(long)]
        output: PathBuf,
        /// Materialize the generated project here after a completed run.
        /// Existing contents are removed.
        #[arg(long)]
        repo: Option<PathBuf>,
    },
    /// Print the pipeline graph
    Graph,
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pipewright=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Config => {
            let mut shown = config.clone();
            for model in std::iter::once(&mut shown.model).chain(shown.fallback_models.iter_mut()) {
                if model.api_key.is_some() {
                    model.api_key = Some("********".to_string());
                }
            }
            println!("{}", toml::to_string_pretty(&shown)?);
        }
        Commands::Graph => {
            let pipeline = Pipeline::from_config(&config)?;
            for line in pipeline.graph().describe() {
                println!("{}", line);
            }
        }
        Commands::Run { prd, output, repo } => {
            let prd_text = tokio::fs::read_to_string(&prd)
                .await
                .with_context(|| format!("reading PRD {}", prd.display()))?;
            let pipeline = Pipeline::from_config(&config)?;

            let mut state = seed_state(&prd_text);
            let cancel = state.cancellation_token();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                warn!("Interrupt received, stopping after the current node");
                cancel.cancel();
            });

            let run_id = Uuid::new_v4();
            let started_at = Utc::now();
            info!(%run_id, prd = %prd.display(), "Run started");

            let outcome = pipeline.run(&mut state).await;
            let record = RunRecord::new(run_id, started_at, &outcome, &state);
            record.write(&output).await?;

            match outcome {
                Ok(result) if record.status == RunStatus::Completed => {
                    info!(
                        %run_id,
                        steps = result.runs.len(),
                        total_elapsed_ms = result.total_elapsed_ms,
                        "Run completed"
                    );
                    if let Some(dir) = repo {
                        let written = Repository::new(&dir).materialize(&state).await?;
                        println!("Wrote {} files to {}", written.len(), dir.display());
                    }
                }
                Ok(_) => {
                    warn!(%run_id, "Run cancelled");
                    anyhow::bail!("run cancelled");
                }
                Err(e) => {
                    error!(%run_id, kind = e.kind(), error = %e, "Run failed");
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}
