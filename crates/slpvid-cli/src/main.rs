//! slp-to-video: render a Slippi replay to a video file.

mod args;
mod display;

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use slpvid_media::{ConversionPipeline, DefaultLocator, HostEnvironment, PipelineOptions, WorkDir};
use slpvid_models::{RunConfig, Termination};

use crate::args::Args;
use crate::display::{raw_output_sink, ProgressDisplay};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env before the host environment is read
    dotenvy::dotenv().ok();

    let args = Args::parse();

    if let Err(e) = init_tracing(args.verbose) {
        eprintln!("Failed to initialize logging: {:#}", e);
    }

    match run(args).await {
        Ok(termination) if termination.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    // Library lifecycle logs stay quiet under the progress bars
    let (cli_level, media_level) = if verbose { ("debug", "debug") } else { ("info", "warn") };
    let env_filter = EnvFilter::from_default_env()
        .add_directive(format!("slpvid_cli={}", cli_level).parse()?)
        .add_directive(format!("slpvid_media={}", media_level).parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .try_init()?;
    }

    Ok(())
}

async fn run(args: Args) -> Result<Termination> {
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    let host = HostEnvironment::detect(args.dev);

    let work_dir = if args.dev {
        WorkDir::create_for_development(&cwd)
    } else {
        WorkDir::create()
    }
    .context("Failed to create a working directory")?;

    let result = convert(&args, &cwd, host, &work_dir).await;

    if let Err(e) = work_dir.cleanup() {
        warn!(error = %e, "Failed to remove working directory");
    }

    result
}

async fn convert(
    args: &Args,
    cwd: &Path,
    host: HostEnvironment,
    work_dir: &WorkDir,
) -> Result<Termination> {
    let mut options = args.to_run_options(cwd);
    options.work_dir = Some(work_dir.to_path_buf());
    let config = RunConfig::from_options(options).context("Invalid options")?;

    if args.verbose {
        info!(
            workdir = %config.work_dir.display(),
            slp_file = %config.input_file.display(),
            iso = %config.melee_iso.display(),
            output = %config.output_file.display(),
            start_frame = ?config.start_frame,
            end_frame = ?config.end_frame,
            "Converting replay"
        );
    }

    let locator = DefaultLocator::new(host);
    let pipeline_options = PipelineOptions {
        output_sink: args.verbose.then(raw_output_sink),
        ..Default::default()
    };
    let pipeline = ConversionPipeline::with_options(config, &locator, pipeline_options)
        .context("Failed to prepare the conversion")?;

    let display = ProgressDisplay::new(!args.verbose);
    display.attach(&pipeline);

    pipeline.start().context("Failed to start playback Dolphin")?;

    let termination = tokio::select! {
        termination = pipeline.wait() => termination,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping conversion");
            pipeline.kill();
            pipeline.wait().await
        }
    };

    display.finish(termination);
    Ok(termination)
}
