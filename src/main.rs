use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use catalog_etl::catalog::InMemoryCatalog;
use catalog_etl::config::EngineConfig;
use catalog_etl::logging;
use catalog_etl::metrics;
use catalog_etl::pipeline::{
    PipelineDefinition, PipelineExecutor, PostProcessors, RunOptions, StepRegistry,
};

#[derive(Parser)]
#[command(name = "catalog-etl")]
#[command(about = "Declarative ETL pipeline runner for the data catalog")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a pipeline definition and print its result as JSON
    ///
    /// The asset catalog lives only for this process, so lineage is a no-op here:
    /// it always reports `linked: false`.
    Run {
        /// Pipeline definition file (.json or .toml)
        #[arg(long)]
        pipeline: PathBuf,
        /// Read a bounded sample, skip writing and post-processing
        #[arg(long)]
        preview: bool,
        /// Rows to read and return in preview mode
        #[arg(long)]
        preview_rows: Option<usize>,
        /// Engine config file (defaults to ETL_CONFIG, then etl.toml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Serve Prometheus metrics on this address
        #[arg(long)]
        metrics_addr: Option<SocketAddr>,
    },
    /// Check that a pipeline's source, target and steps all resolve
    Validate {
        #[arg(long)]
        pipeline: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List the step types this engine can run
    Steps {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    let config = EngineConfig::load(path.map(PathBuf::as_path)).context("loading engine config")?;
    logging::init_logging(&config.logging);
    Ok(config)
}

fn load_pipeline(path: &Path) -> anyhow::Result<PipelineDefinition> {
    PipelineDefinition::load(path).with_context(|| format!("loading pipeline {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            pipeline,
            preview,
            preview_rows,
            config,
            metrics_addr,
        } => {
            let config = load_config(config.as_ref())?;
            if let Some(addr) = metrics_addr.or_else(metrics::metrics_addr_from_env) {
                if metrics::init_metrics(addr) {
                    info!("📈 serving metrics on {}", addr);
                } else {
                    warn!("metrics exporter could not bind {}", addr);
                }
            }

            let definition = load_pipeline(&pipeline)?;
            let catalog = Arc::new(InMemoryCatalog::new());
            let hooks = PostProcessors::new()
                .with_lineage(catalog.clone())
                .with_cataloger(catalog);
            let executor = PipelineExecutor::from_config(&config).with_hooks(hooks);

            let options = RunOptions {
                preview_mode: preview,
                preview_rows,
            };
            let result = executor.execute_pipeline(&definition, options).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.is_success() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Validate { pipeline, config } => {
            let config = load_config(config.as_ref())?;
            let definition = load_pipeline(&pipeline)?;
            let executor = PipelineExecutor::from_config(&config);
            match executor.validate(&definition) {
                Ok(plan) => {
                    println!("✅ {} is valid ({} enabled steps)", pipeline.display(), plan.len());
                    for (position, step) in plan.iter().enumerate() {
                        println!(
                            "   {position}. [{}] {} ({})",
                            step.id,
                            step.display_name(),
                            step.step_type
                        );
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    error!("validation failed: {}", e);
                    println!("❌ {}", e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Steps { config } => {
            let config = load_config(config.as_ref())?;
            for step_type in StepRegistry::for_settings(&config.engine).step_types() {
                println!("{step_type}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_run_help_explains_lineage_is_a_no_op() {
        let mut cli = Cli::command();
        let run = cli.find_subcommand_mut("run").unwrap();
        let help = run.render_long_help().to_string();
        assert!(help.contains("lineage is a no-op"));
    }
}
