//! Sentinel IDS binary entry point: CLI wiring, stage construction, server
//! startup.
//!
//! Grounded on the teacher's (`sairen-os`) `main.rs` shape: `clap::Parser`
//! CLI struct, `tracing_subscriber::fmt()` with an env filter initialized
//! first, then construction of the long-lived subsystems before handing
//! off to the server loop.

use anyhow::{Context, Result};
use clap::Parser;
use sentinel_ids::acquisition;
use sentinel_ids::alerting::{AlertSink, Observer};
use sentinel_ids::config::defaults::{IP_BLOCKLIST_REFRESH_INTERVAL, IP_BLOCKLIST_URL};
use sentinel_ids::config::{self, Mode, PipelineSettings, TypingConfig};
use sentinel_ids::extraction::{DefaultExtractionPlugin, ExtractionPlugin, ExtractionStage, NgramEngine};
use sentinel_ids::filter::{DoubleEncodingFilterPlugin, FilterPlugin, FilterStage, IpBlocklistFilterPlugin};
use sentinel_ids::model::ModelStage;
use sentinel_ids::persistence::PersistenceHandle;
use sentinel_ids::pipeline::Pipeline;
use sentinel_ids::typing::TypingStage;
use std::sync::Arc;
use tracing::info;

/// `./sentinel-ids --host origin.internal:8080 --mode train`
#[derive(Parser, Debug)]
#[command(name = "sentinel-ids")]
#[command(about = "Inline HTTP intrusion-detection reverse proxy")]
#[command(version)]
struct CliArgs {
    /// Upstream origin to forward requests to, once they've passed the pipeline.
    #[arg(long, default_value = "127.0.0.1:8080", env = "SENTINEL_HOST")]
    host: String,

    /// `train` continuously persists labelled rows and n-gram pool growth
    /// and retrains model plug-ins; `test` only predicts.
    #[arg(long, default_value = "test", env = "SENTINEL_MODE")]
    mode: Mode,

    /// Append timestamped alert lines to `alerting/log.log` in addition to
    /// stdout.
    #[arg(long, default_value_t = true)]
    logging: bool,
    /// Disable the `alerting/log.log` file sink; alerts still go to stdout.
    #[arg(long)]
    no_logging: bool,

    /// JSON file describing the typing stage's a-priori "core" topology.
    #[arg(long, default_value = "typing.json")]
    typing_config: String,

    /// Directory backing the on-disk object store.
    #[arg(long, default_value = "./sentinel-store")]
    store: String,

    /// Path reliability threshold below which the typing stage alerts.
    #[arg(long, default_value_t = config::defaults::RELIABILITY_THRESHOLD)]
    reliability_threshold: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let logging_enabled = args.logging && !args.no_logging;

    config::init(PipelineSettings {
        upstream_host: args.host.clone(),
        mode: args.mode,
        logging_enabled,
        reliability_threshold: args.reliability_threshold,
    });

    info!(host = %args.host, mode = ?args.mode, "starting sentinel-ids");

    let typing_config = match TypingConfig::load(&args.typing_config) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %args.typing_config, error = %err, "no typing config found, starting with an empty core topology");
            TypingConfig::empty()
        }
    };

    let persistence = Arc::new(
        PersistenceHandle::open(&args.store).context("failed to open persistence store")?,
    );

    let filter_plugins: Vec<Arc<dyn FilterPlugin>> = vec![
        Arc::new(DoubleEncodingFilterPlugin),
        Arc::new(IpBlocklistFilterPlugin::spawn(
            IP_BLOCKLIST_URL.to_string(),
            IP_BLOCKLIST_REFRESH_INTERVAL,
        )),
    ];
    let filter_stage = Arc::new(FilterStage::new(filter_plugins));

    let typing_stage = Arc::new(TypingStage::new(typing_config, args.reliability_threshold));

    let ngrams = Arc::new(NgramEngine::new(persistence.clone()));
    let extraction_plugins: Vec<Arc<dyn ExtractionPlugin>> =
        vec![Arc::new(DefaultExtractionPlugin::new(ngrams))];
    let extraction_stage = Arc::new(
        ExtractionStage::new(extraction_plugins, persistence.clone(), args.mode)
            .context("failed to construct extraction stage")?,
    );

    let model_stage = Arc::new(
        ModelStage::with_default_plugins(persistence.clone(), args.mode)
            .context("failed to construct model stage")?,
    );

    let sink: Arc<dyn Observer> = Arc::new(AlertSink::new(logging_enabled)?);
    filter_stage.observers().attach(sink.clone());
    typing_stage.observers().attach(sink.clone());
    extraction_stage.observers().attach(sink.clone());
    model_stage.observers().attach(sink.clone());

    let pipeline = Arc::new(Pipeline::new(filter_stage, typing_stage, extraction_stage, model_stage));
    pipeline.observers().attach(sink.clone());

    acquisition::serve(pipeline, config::get()).await?;
    Ok(())
}
