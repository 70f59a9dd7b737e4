use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use fastimage::application::ImageEngine;
use fastimage::domain::entities::LoadEvent;
use fastimage::domain::ports::LoadListener;
use fastimage::infrastructure::config::{Command, LoadArgs};
use fastimage::infrastructure::{AppConfig, CliArgs, ConfigStore};
use fastimage::presentation::ConsoleReporter;

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<(ConfigStore, AppConfig)> {
    let store = ConfigStore::new()?;
    let mut config = store
        .load_config(args.config.as_deref())
        .wrap_err("failed to load configuration")?;
    config.merge_with_args(args);
    Ok((store, config))
}

async fn run_load(engine: &ImageEngine, args: LoadArgs) -> Result<bool> {
    let mut request = engine.request(&args.uri);
    if let (Some(width), Some(height)) = (args.width, args.height) {
        request = request.with_target_size(width, height);
    }
    if let Some(mode) = args.resize {
        request = request.with_resize_mode(mode);
    }
    if let Some(priority) = args.priority {
        request = request.with_priority(priority);
    }
    if let Some(policy) = args.policy {
        request = request.with_cache_policy(policy);
    }
    if let Some(tint) = args.tint {
        request = request.with_tint(tint);
    }
    for (name, value) in args.headers {
        request = request.with_header(name, value);
    }

    let reporter = ConsoleReporter::stdout(request.cache_key().to_string());
    let mut subscription = engine.load(request);
    let mut loaded = None;
    while let Some(event) = subscription.next_event().await {
        reporter.dispatch(&event);
        if let LoadEvent::Load(image) = event {
            loaded = Some(image);
        }
    }

    let Some(image) = loaded else {
        return Ok(false);
    };
    if let Some(output) = args.output.as_deref() {
        save_png(image.bitmap.pixels(), output)?;
        println!("wrote {}", output.display());
    }
    Ok(true)
}

fn save_png(pixels: &image::RgbaImage, path: &Path) -> Result<()> {
    pixels
        .save_with_format(path, image::ImageFormat::Png)
        .wrap_err_with(|| format!("failed to write {}", path.display()))
}

async fn run(args: CliArgs) -> Result<bool> {
    if let Command::InitConfig { force } = &args.command {
        let store = ConfigStore::new()?;
        let path = store.init_config(args.config.as_deref(), *force)?;
        println!("wrote {}", path.display());
        return Ok(true);
    }

    let (_store, config) = load_config(&args)?;
    init_logging(&config)?;
    info!(version = fastimage::VERSION, "Starting {}", fastimage::NAME);

    let engine = ImageEngine::new(config.engine).await?;

    match args.command {
        Command::Load(load) => run_load(&engine, load).await,
        Command::Preload { uris, policy } => {
            let requests = uris.into_iter().map(|uri| {
                let request = engine.request(uri);
                match policy {
                    Some(policy) => request.with_cache_policy(policy),
                    None => request,
                }
            });
            let summary = engine.preload(requests).finished().await;
            println!(
                "preloaded {}/{} images",
                summary.succeeded,
                summary.total()
            );
            for (uri, error) in &summary.failures {
                println!("  {uri}: {} ({error})", error.reason());
            }
            Ok(summary.failures.is_empty())
        }
        Command::Stats => {
            println!("{}", engine.stats().await);
            Ok(true)
        }
        Command::Clear => {
            engine.clear_all().await?;
            println!("cleared memory and disk caches");
            Ok(true)
        }
        Command::InitConfig { .. } => Ok(true),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let ok = run(args).await?;
    if !ok {
        warn!("Command finished with failures");
    }
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
