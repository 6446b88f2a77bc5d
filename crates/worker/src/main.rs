use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use animegen_core::storage::OutputRoot;
use animegen_pipeline::generator::{Generator, GeneratorConfig};
use animegen_pipeline::status::JobContext;
use animegen_worker::cli::{Cli, Job};
use animegen_worker::config::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = match &cli.log_filter {
        Some(filter) => tracing_subscriber::EnvFilter::try_new(filter).context("Invalid --log-filter")?,
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "animegen_worker=debug,animegen_pipeline=info,animegen_comfyui=info".into()),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = WorkerConfig::from_env().context("Invalid ComfyUI endpoint configuration")?;
    cli.apply_overrides(&mut config)
        .context("Invalid --comfyui-url")?;

    let kind = cli.command.kind();
    let templates = config
        .load_templates(&template_base_dir(), &[kind])
        .with_context(|| format!("Failed to load the {} workflow", kind.label()))?;
    let output_root = OutputRoot::new(&config.output_dir).context("Invalid output directory")?;

    tracing::info!(
        comfyui = config.endpoint.api_url(),
        output_dir = %output_root.path().display(),
        max_wait_secs = config.max_wait.as_secs(),
        "Worker starting",
    );

    let generator = Generator::new(
        Arc::new(templates),
        GeneratorConfig {
            max_wait: config.max_wait,
            ..GeneratorConfig::new(config.endpoint.clone(), output_root)
        },
    );

    let cancel = CancellationToken::new();
    let ctx = JobContext::new(cancel.clone());
    tokio::spawn(cancel_on_ctrl_c(cancel));
    tokio::spawn(log_status(ctx.clone()));

    let outcome = match cli.command.into_job() {
        Job::Image(params) => generator.generate_images(&params, &ctx).await,
        Job::Video(params, source) => generator.generate_video(&params, &source, &ctx).await,
        Job::Edit(params, source) => generator.edit_image(&params, &source, &ctx).await,
    }?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

/// Workflow paths are tried relative to the executable's directory, falling
/// back to the working directory.
fn template_base_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_default()
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("Interrupt received, cancelling job");
        cancel.cancel();
    }
}

async fn log_status(ctx: JobContext) {
    let mut rx = ctx.subscribe();
    while rx.changed().await.is_ok() {
        let status = rx.borrow_and_update().clone();
        tracing::info!(?status, "Job status");
        if status.is_terminal() {
            break;
        }
    }
}
