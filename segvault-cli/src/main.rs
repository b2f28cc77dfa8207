mod cli;
mod error;

use std::process;
use std::sync::Arc;

use clap::Parser;
use segvault_engine::{
    AssetPipeline, AssetRequest, FfmpegRemuxer, HttpTokenProvider, PipelineEvent, ReqwestFetcher,
    TokenProvider, create_client,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::{Args, Commands, FetchArgs};
use crate::error::{AppError, Result};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose, args.quiet) {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            signal_token.cancel();
        }
    });

    let result = match args.command {
        Commands::Fetch(fetch) => run_fetch(fetch, cancel).await,
    };

    if let Err(e) = result {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(indicatif_layer.get_stderr_writer()),
        )
        .with(indicatif_layer)
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}

#[derive(Debug, Default)]
struct Summary {
    stored: usize,
    skipped: usize,
}

async fn run_fetch(args: FetchArgs, cancel: CancellationToken) -> Result<()> {
    let config = args.engine_config();
    let client = create_client(&config.http)?;

    let tokens: Option<Arc<dyn TokenProvider>> = if args.auth {
        let endpoint = args.token_endpoint.clone().ok_or_else(|| {
            AppError::InvalidInput("--auth requires --token-endpoint".to_string())
        })?;
        let bearer = args
            .bearer
            .clone()
            .ok_or_else(|| AppError::InvalidInput("--auth requires --bearer".to_string()))?;
        let provider: Arc<dyn TokenProvider> =
            Arc::new(HttpTokenProvider::new(client.clone(), endpoint, bearer));
        Some(provider)
    } else {
        None
    };

    let mut request = AssetRequest::new(args.id.as_str(), &args.url, args.auth)
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;
    if let Some(file_id) = &args.file_id {
        request = request.with_file_id(file_id.as_str());
    }

    tokio::fs::create_dir_all(&args.out).await?;

    let fetcher = ReqwestFetcher::from_client(client, config.retry.clone())
        .with_cancellation(cancel.clone());
    let remuxer = FfmpegRemuxer::new(config.remux.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let collector = tokio::spawn(async move {
        let mut summary = Summary::default();
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::ArtifactStored { .. } => summary.stored += 1,
                PipelineEvent::ArtifactSkipped { .. } => summary.skipped += 1,
                _ => {}
            }
        }
        summary
    });

    let pipeline = AssetPipeline::new(config, Arc::new(fetcher), tokens, Arc::new(remuxer))
        .with_events(tx)
        .with_cancellation(cancel);
    let result = pipeline.run(request, &args.out).await;
    drop(pipeline);
    let summary = collector.await.unwrap_or_default();

    if summary.skipped > 0 {
        warn!(
            skipped = summary.skipped,
            "Some artifacts could not be downloaded"
        );
    }

    if result.succeeded {
        info!(
            artifacts = summary.stored,
            output = %result.output_path.display(),
            "Done"
        );
        println!("{}", result.output_path.display());
        Ok(())
    } else {
        Err(AppError::AssetFailed {
            asset_id: result.asset_id,
            kind: result
                .failure_kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            detail: result.detail.unwrap_or_default(),
        })
    }
}
