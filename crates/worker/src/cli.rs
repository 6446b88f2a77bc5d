//! Command line for the worker binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use animegen_comfyui::endpoint::{EndpointError, EngineEndpoint};
use animegen_core::generation::{ImageEditParams, ImageToVideoParams, TextToImageParams, DEFAULT_STEPS};
use animegen_core::workflow::TemplateKind;
use animegen_pipeline::source::SourceImage;

use crate::config::WorkerConfig;

#[derive(Debug, Parser)]
#[command(
    name = "animegen-worker",
    about = "Run one ComfyUI generation job and print the outcome as JSON"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG)"
    )]
    pub log_filter: Option<String>,

    #[arg(long, value_name = "URL", global = true, help = "ComfyUI base URL (overrides COMFYUI_URL)")]
    pub comfyui_url: Option<String>,

    #[arg(long, value_name = "DIR", global = true, help = "Directory persisted media is written to")]
    pub output_dir: Option<PathBuf>,

    #[arg(long, value_name = "SECS", global = true, help = "Give up waiting for outputs after this long")]
    pub max_wait_secs: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Text to image.
    Image(ImageArgs),
    /// Animate a source image.
    Video(VideoArgs),
    /// Edit a source image from a prompt.
    Edit(EditArgs),
}

#[derive(Debug, Args)]
pub struct ImageArgs {
    #[arg(short, long)]
    pub prompt: String,
    #[arg(short, long)]
    pub negative: Option<String>,
    #[arg(long, default_value_t = 1024)]
    pub width: u32,
    #[arg(long, default_value_t = 1024)]
    pub height: u32,
    #[arg(long, default_value_t = DEFAULT_STEPS)]
    pub steps: u32,
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, Args)]
pub struct VideoArgs {
    #[arg(short, long)]
    pub prompt: String,
    #[arg(short, long)]
    pub negative: Option<String>,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    #[arg(long, help = "Number of frames")]
    pub length: Option<u32>,
    #[arg(long)]
    pub fps: Option<u32>,
    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Debug, Args)]
pub struct EditArgs {
    #[arg(short, long)]
    pub prompt: String,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    #[arg(long, default_value_t = DEFAULT_STEPS)]
    pub steps: u32,
    #[arg(long)]
    pub seed: Option<u64>,
    #[command(flatten)]
    pub source: SourceArgs,
}

/// Exactly one way of naming the source image.
#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct SourceArgs {
    #[arg(
        long = "source",
        value_name = "JSON",
        value_parser = parse_source_json,
        help = "Source image object as sent by the browser"
    )]
    pub json: Option<SourceImage>,

    #[arg(long, value_name = "NAME", help = "File previously persisted under the output directory")]
    pub local: Option<String>,

    #[arg(long = "engine-file", value_name = "NAME", help = "File in the ComfyUI output folder")]
    pub engine_file: Option<String>,

    #[arg(long = "data-url", value_name = "URL", help = "Inline data: URL")]
    pub data_url: Option<String>,
}

impl SourceArgs {
    pub fn into_source(self) -> SourceImage {
        if let Some(source) = self.json {
            source
        } else if let Some(name) = self.local {
            SourceImage::local(name)
        } else if let Some(name) = self.engine_file {
            SourceImage::engine(name)
        } else {
            self.data_url.map(SourceImage::data_url).unwrap_or_default()
        }
    }
}

fn parse_source_json(raw: &str) -> Result<SourceImage, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid source image JSON: {e}"))
}

/// A fully parsed generation request.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Image(TextToImageParams),
    Video(ImageToVideoParams, SourceImage),
    Edit(ImageEditParams, SourceImage),
}

impl Commands {
    /// Template the command runs on.
    pub fn kind(&self) -> TemplateKind {
        match self {
            Self::Image(_) => TemplateKind::TextToImage,
            Self::Video(_) => TemplateKind::ImageToVideo,
            Self::Edit(_) => TemplateKind::ImageEdit,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            Self::Image(args) => Job::Image(TextToImageParams {
                positive_prompt: args.prompt,
                negative_prompt: args.negative,
                width: args.width,
                height: args.height,
                steps: args.steps,
                seed: args.seed,
            }),
            Self::Video(args) => Job::Video(
                ImageToVideoParams {
                    positive_prompt: args.prompt,
                    negative_prompt: args.negative,
                    width: args.width,
                    height: args.height,
                    length: args.length,
                    fps: args.fps,
                },
                args.source.into_source(),
            ),
            Self::Edit(args) => Job::Edit(
                ImageEditParams {
                    positive_prompt: args.prompt,
                    width: args.width,
                    height: args.height,
                    steps: args.steps,
                    seed: args.seed,
                },
                args.source.into_source(),
            ),
        }
    }
}

impl Cli {
    /// Apply command-line overrides on top of the environment.
    pub fn apply_overrides(&self, config: &mut WorkerConfig) -> Result<(), EndpointError> {
        if let Some(url) = &self.comfyui_url {
            config.endpoint = EngineEndpoint::parse(url)?;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(secs) = self.max_wait_secs {
            config.max_wait = Duration::from_secs(secs);
        }
        Ok(())
    }
}
