// SPDX-License-Identifier: MIT

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

use dagflow_rs::dagflow::config::{self, EngineConfig};
use dagflow_rs::dagflow::loader::TemplateLoader;
use dagflow_rs::dagflow::reconciler::spawn_reconciler;
use dagflow_rs::dagflow::{server, OrchestrationEngine};
use dagflow_rs::graph::{GraphEngine, RootContext, StageGraphEngine};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the workflow API
    Serve {
        /// Base directory for workflow work directories
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// SQLite database URL, in-memory storage when omitted
        #[arg(long)]
        database_url: Option<String>,

        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        /// Background reconciliation period in seconds, 0 disables it
        #[arg(long)]
        reconcile_secs: Option<u64>,
    },
    /// Check a template and print its initially applicable rules
    Validate {
        /// URL or path of the template
        #[arg(short, long)]
        template: String,

        /// Parameter as key=value, may be repeated
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Serve {
            work_dir,
            database_url,
            host,
            port,
            reconcile_secs,
        } => {
            let mut config = EngineConfig::from_env()?;
            if let Some(dir) = work_dir {
                config.work_dir = dir;
            }
            if database_url.is_some() {
                config.database_url = database_url;
            }
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(secs) = reconcile_secs {
                config.reconcile_interval = config::interval(secs);
            }

            let engine = Arc::new(
                OrchestrationEngine::from_config(&config)
                    .await
                    .context("failed to build engine")?,
            );
            log::info!("Work directory: {}", config.work_dir.display());

            let stop = Arc::new(Notify::new());
            let reconciler = config
                .reconcile_interval
                .map(|interval| spawn_reconciler(engine.clone(), interval, stop.clone()));

            let served = server::serve(engine, &config.host, config.port).await;

            if let Some(handle) = reconciler {
                stop.notify_one();
                handle.await.ok();
            }
            served?;
        }
        Commands::Validate { template, params } => {
            let document = TemplateLoader::new().load(&template).await?;
            let params: Map<String, Value> = params
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();

            let mut graph = StageGraphEngine
                .create(&document, RootContext::new("."))
                .map_err(|e| anyhow!("invalid template: {}", e))?;
            graph
                .init(&params)
                .map_err(|e| anyhow!("invalid parameters: {}", e))?;

            println!("Template: {}", graph.name());
            println!("Rules: {}", graph.rules().join(", "));
            let applicable: Vec<String> = graph
                .rules()
                .into_iter()
                .filter(|r| graph.is_applicable(r))
                .collect();
            println!("Applicable: {}", applicable.join(", "));
        }
    }

    Ok(())
}
