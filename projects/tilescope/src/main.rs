mod cli;
mod error;
mod pipeline;
mod run_artifacts;
mod run_context;
mod video;
mod web;

use anyhow::{Context, Result};
use cli::{Args, Command, RunArgs, ServeArgs};
use pipeline::orchestrator::{output_file_name, Pipeline};
use run_context::Workspace;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;
use web::api::AppState;
use web::server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse_args();

    match args.command {
        Command::Run(run_args) => run_once(run_args).await,
        Command::Serve(serve_args) => serve(serve_args).await,
    }
}

async fn run_once(args: RunArgs) -> Result<()> {
    let detector = args.pipeline.build_detector()?;
    let workspace = Workspace::new(&args.pipeline.workspace);
    let mut pipeline =
        Pipeline::new(detector, args.pipeline.to_config(), workspace)?.with_progress(true);

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(output_file_name(&args.input)));
    let input = args.input;
    let input_display = input.clone();

    let stack = tokio::task::spawn_blocking(move || pipeline.run_to(&input, None, &output))
        .await
        .context("Pipeline task panicked")?
        .with_context(|| format!("Failed to process {:?}", input_display))?;

    tracing::info!("Processed stack written to {:?}", stack);
    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let detector = args.pipeline.build_detector()?;
    let workspace = Workspace::new(&args.pipeline.workspace);
    let pipeline = Pipeline::new(detector, args.pipeline.to_config(), workspace)?;

    let state = Arc::new(AppState {
        pipeline: Arc::new(Mutex::new(pipeline)),
        upload_dir: args.upload_dir,
    });

    run_server(args.host, args.port, state, args.max_upload_mb * 1024 * 1024).await
}
