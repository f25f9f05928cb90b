use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use toxflow::config::Settings;
use toxflow::evaluate::{BatchEvaluator, HttpPredictionClient};
use toxflow::events::PipelineEvent;
use toxflow::model::SchemaCheck;
use toxflow::pipeline::{await_outcomes, Pipeline};
use toxflow::serve::{serve, PredictionService};
use toxflow::store::{ArtifactStore, FsArtifactStore};

/// Clean descriptor tables, train a toxicity classifier and serve it.
#[derive(Parser, Debug)]
#[command(name = "toxflow", version, about)]
struct Cli {
    /// Configuration file (defaults to ./toxflow.toml when present)
    #[arg(long, global = true, env = "TOXFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Artifact store root, overriding `store.root`
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the prediction endpoint against the current model
    Serve {
        /// Listen address, overriding `serve.bind`
        #[arg(long)]
        bind: Option<String>,

        /// How request features are matched to the model schema
        #[arg(long, value_enum)]
        schema_check: Option<SchemaCheckArg>,
    },

    /// Ingest datasets and run preprocessing and training on each
    Pipeline {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Give up waiting for outcomes after this many seconds
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
    },

    /// Score a labeled dataset against a running endpoint
    Evaluate {
        file: PathBuf,

        #[arg(long)]
        endpoint: Option<String>,

        /// Evaluate a seeded random sample of this many rows
        #[arg(long)]
        sample: Option<usize>,

        /// Pause between requests
        #[arg(long)]
        delay_ms: Option<u64>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SchemaCheckArg {
    Strict,
    Positional,
}

impl From<SchemaCheckArg> for SchemaCheck {
    fn from(arg: SchemaCheckArg) -> Self {
        match arg {
            SchemaCheckArg::Strict => SchemaCheck::Strict,
            SchemaCheckArg::Positional => SchemaCheck::Positional,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(root) = cli.store {
        settings.store.root = root;
    }
    let store: Arc<dyn ArtifactStore> = Arc::new(
        FsArtifactStore::new(settings.store.root.clone())
            .with_retention(settings.store.keep_versions),
    );

    match cli.command {
        Command::Serve { bind, schema_check } => {
            if let Some(bind) = bind {
                settings.serve.bind = bind;
            }
            if let Some(check) = schema_check {
                settings.serve.schema_check = check.into();
            }
            run_serve(&settings, store).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Pipeline {
            files,
            timeout_secs,
        } => run_pipeline(&settings, store, &files, Duration::from_secs(timeout_secs)).await,
        Command::Evaluate {
            file,
            endpoint,
            sample,
            delay_ms,
        } => {
            if let Some(endpoint) = endpoint {
                settings.evaluate.endpoint = endpoint;
            }
            if sample.is_some() {
                settings.evaluate.sample = sample;
            }
            if let Some(delay) = delay_ms {
                settings.evaluate.delay_ms = delay;
            }
            run_evaluate(&settings, &file).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_serve(settings: &Settings, store: Arc<dyn ArtifactStore>) -> Result<()> {
    let listener = TcpListener::bind(&settings.serve.bind)
        .await
        .with_context(|| format!("binding {}", settings.serve.bind))?;
    let service = PredictionService::new(
        store,
        settings.training.model_key.clone(),
        settings.serve.schema_check,
    );

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("shutting down");
        }
        on_signal.cancel();
    });

    serve(listener, service, shutdown).await
}

async fn run_pipeline(
    settings: &Settings,
    store: Arc<dyn ArtifactStore>,
    files: &[PathBuf],
    timeout: Duration,
) -> Result<ExitCode> {
    let pipeline = Arc::new(Pipeline::new(store, settings));
    let cancel = CancellationToken::new();
    let mut rx = pipeline.bus().subscribe();
    let dispatcher = Arc::clone(&pipeline).start(cancel.clone());

    let mut keys: Vec<String> = Vec::new();
    for path in files {
        let key = key_for(path)?;
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        pipeline.ingest(&key, &bytes)?;
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    let outcomes = await_outcomes(&mut rx, &keys, timeout).await;
    cancel.cancel();
    dispatcher.await.context("dispatcher task")?;

    let mut ok = true;
    for key in &keys {
        match outcomes.get(key) {
            Some(PipelineEvent::ModelPublished { model, schema, .. }) => {
                println!("{key}: published {model} ({} features)", schema.features.len());
            }
            Some(PipelineEvent::TrainingSkipped { reason, .. }) => {
                ok = false;
                println!("{key}: training skipped, {reason}");
            }
            Some(PipelineEvent::StageFailed {
                stage,
                attempts,
                error,
                ..
            }) => {
                ok = false;
                println!("{key}: {stage} failed after {attempts} attempts: {error}");
            }
            _ => {
                ok = false;
                println!("{key}: no outcome within {timeout:?}");
            }
        }
    }

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn run_evaluate(settings: &Settings, file: &Path) -> Result<()> {
    let client = HttpPredictionClient::new(
        settings.evaluate.endpoint.clone(),
        Duration::from_secs(settings.evaluate.timeout_secs),
    )?;
    let evaluator = BatchEvaluator::new(Arc::new(client), settings);
    let report = evaluator.evaluate_file(file).await?;
    println!("{report}");
    Ok(())
}

fn key_for(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no usable file name", path.display()))
}
