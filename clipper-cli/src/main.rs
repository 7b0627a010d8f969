mod cli;
mod config;
mod error;
mod output;

use std::path::PathBuf;
use std::process;

use chrono::Utc;
use clap::Parser;
use clipper_engine::{Clipper, FixedSource, StreamSourceResolver, TemplateSource};
#[cfg(feature = "colored-output")]
use colored::*;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::{Args, Commands, OutputFormat, Platform},
    config::AppConfig,
    error::{AppError, Result},
};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);
    let output_format = args.output_format();

    if let Err(e) = run(args).await {
        match output_format {
            Some(OutputFormat::Json) => println!("{}", output::format_error(&e)),
            _ => {
                error!("Application error: {}", e);
                #[cfg(feature = "colored-output")]
                {
                    eprintln!("{} {}", "Error:".red().bold(), e);
                }
                #[cfg(not(feature = "colored-output"))]
                {
                    eprintln!("Error: {}", e);
                }
            }
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Commands::Clip {
            channel,
            source_url,
            platform,
            output_dir,
            container,
            ffmpeg,
            max_concurrent,
            format,
        } => {
            let mut config = AppConfig::load(args.config.as_deref())?;
            apply_overrides(&mut config, output_dir, container, ffmpeg, max_concurrent);
            debug!(?config, "Effective configuration");

            let source = stream_source(&config, platform, source_url.as_deref())?;
            let output = clip(config, source.as_ref(), &channel).await?;
            println!("{}", output::format_clip(&output, format)?);
        }

        Commands::Config { show, reset } => {
            if reset {
                let path = AppConfig::reset(args.config.as_deref())?;
                println!("Configuration reset to defaults at {}", path.display());
            } else if show {
                let config = AppConfig::load(args.config.as_deref())?;
                println!("{}", config.show()?);
            } else {
                println!(
                    "Use --show to display current configuration or --reset to reset to defaults"
                );
            }
        }
    }

    Ok(())
}

fn apply_overrides(
    config: &mut AppConfig,
    output_dir: Option<PathBuf>,
    container: Option<String>,
    ffmpeg: Option<String>,
    max_concurrent: Option<usize>,
) {
    let engine = &mut config.engine;
    if let Some(dir) = output_dir {
        engine.clips_dir = dir;
    }
    if let Some(container) = container {
        engine.muxer.output_format = container;
    }
    if let Some(ffmpeg) = ffmpeg {
        engine.muxer.binary_path = ffmpeg;
    }
    if let Some(max_concurrent) = max_concurrent {
        engine.fetch.max_concurrent = max_concurrent;
    }
}

fn stream_source(
    config: &AppConfig,
    platform: Platform,
    source_url: Option<&str>,
) -> Result<Box<dyn StreamSourceResolver>> {
    match (source_url, platform) {
        (Some(url), _) => Ok(Box::new(FixedSource::new(url)?)),
        (None, Platform::Twitch) => Ok(Box::new(TemplateSource::new(
            config.twitch_template.clone(),
        )?)),
        (None, Platform::Direct) => Err(AppError::InvalidInput(
            "--platform direct requires --source-url".to_string(),
        )),
    }
}

async fn clip(
    config: AppConfig,
    source: &dyn StreamSourceResolver,
    channel: &str,
) -> Result<clipper_engine::ClipOutput> {
    let stream = source.resolve(channel).await?;
    let clipper = Clipper::new(config.engine)?;
    let job = clipper.new_job(&stream.channel, Utc::now())?;

    let token = CancellationToken::new();
    let interrupt = tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling clip");
                token.cancel();
            }
        }
    });

    let result = clipper
        .produce_job_with_token(&job, &stream.source_key, &token)
        .await;
    interrupt.abort();
    Ok(result?)
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let mut config = AppConfig::default();
        apply_overrides(
            &mut config,
            Some(PathBuf::from("/tmp/clips")),
            Some("mkv".to_string()),
            None,
            Some(2),
        );
        assert_eq!(config.engine.clips_dir, PathBuf::from("/tmp/clips"));
        assert_eq!(config.engine.muxer.output_format, "mkv");
        assert_eq!(config.engine.muxer.binary_path, "ffmpeg");
        assert_eq!(config.engine.fetch.max_concurrent, 2);
    }

    #[test]
    fn direct_platform_needs_url() {
        let config = AppConfig::default();
        assert!(matches!(
            stream_source(&config, Platform::Direct, None),
            Err(AppError::InvalidInput(_))
        ));
        let url = Some("https://cdn.example/a.m3u8");
        assert!(stream_source(&config, Platform::Direct, url).is_ok());
        assert!(stream_source(&config, Platform::Twitch, None).is_ok());
    }

    #[test]
    fn cli_parses_clip_command() {
        let args = Args::try_parse_from([
            "clipper",
            "clip",
            "chan1",
            "--format",
            "json",
            "--source-url",
            "https://cdn.example/live.m3u8",
        ])
        .unwrap();
        assert_eq!(args.output_format(), Some(OutputFormat::Json));
        match args.command {
            Commands::Clip {
                channel,
                source_url,
                platform,
                ..
            } => {
                assert_eq!(channel, "chan1");
                assert_eq!(source_url.as_deref(), Some("https://cdn.example/live.m3u8"));
                assert_eq!(platform, Platform::Twitch);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
