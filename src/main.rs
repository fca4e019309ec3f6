use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use clap_serde_derive::ClapSerde;
use hf_hub::api::sync::Api;
use tokio::sync::Mutex;
use tracing::info;

use vqa_runner::config::Config;
use vqa_runner::inference;
use vqa_runner::inference::models::moondream::MoondreamModel;
use vqa_runner::server;
use vqa_runner::server::handlers::AppState;
use vqa_runner::telemetry;
use vqa_runner::{ModelBase, ModelDomain, VisionTask};

#[cfg(unix)]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// The tokenizer lives in the upstream moondream2 repo, pinned so vocabulary
/// changes cannot drift underneath the generation loop.
const TOKENIZER_REPO: &str = "vikhyatk/moondream2";
const MOONDREAM_REVISION: &str = "30c7cdf3fa6914f50bee3956694374143f5cc884";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env, default_value = "VqaRunner.toml")]
    config_file: String,

    /// Configuration options
    #[command(flatten)]
    pub opt_config: <Config as ClapSerde>::Opt,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = match Config::from_toml(&args.config_file) {
        Ok(conf) => conf.merge(args.opt_config),
        Err(err) => {
            if args.config_file == "VqaRunner.toml" {
                Config::default().merge(args.opt_config)
            } else {
                eprintln!(
                    "Failed to read configuration file {} with error: {}",
                    args.config_file, err
                );
                std::process::exit(1);
            }
        }
    };

    telemetry::init_telemetry(&config.otel_endpoint, config.console)?;

    let device = inference::device(config.cpu)?;
    info!("Running inference on {device:?}");
    info!(
        "Supported features: avx: {}, neon: {}, simd128: {}, f16c: {}",
        candle_core::utils::with_avx(),
        candle_core::utils::with_neon(),
        candle_core::utils::with_simd128(),
        candle_core::utils::with_f16c()
    );

    let (base, weights_filename) = if config.safetensors {
        (
            ModelBase {
                name: "Candle Moondream".into(),
                license: "Apache-2.0".into(),
                domain: ModelDomain::Vision(vec![VisionTask::Answer]),
                repo_id: TOKENIZER_REPO.into(),
                repo_revision: MOONDREAM_REVISION.into(),
            },
            "model.safetensors",
        )
    } else {
        (
            ModelBase {
                name: "Candle Moondream".into(),
                license: "Apache-2.0".into(),
                domain: ModelDomain::Vision(vec![VisionTask::Answer]),
                repo_id: "santiagomed/candle-moondream".into(),
                repo_revision: "main".into(),
            },
            "model-q4_0.gguf",
        )
    };

    let api = Api::new()?;
    let start = Instant::now();
    let model = MoondreamModel::new(
        &api,
        &base,
        TOKENIZER_REPO,
        MOONDREAM_REVISION,
        "tokenizer.json",
        weights_filename,
        &device,
        config.safetensors,
    )?;
    info!("Loaded {} in {:.2?}", model.base.name, start.elapsed());

    let state = AppState {
        model: Arc::new(Mutex::new(model)),
    };

    server::serve(&config, state).await
}
