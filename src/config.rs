use anyhow::Result;
use clap_serde_derive::ClapSerde;
use serde::Deserialize;

#[derive(ClapSerde, Deserialize, Debug)]
pub struct Config {
    /// The address the listener binds to
    #[arg(short, long, env, default_value = "0.0.0.0")]
    pub address: String,

    /// The port the listener binds to
    #[arg(short, long, env, default_value = "8080")]
    pub port: u16,

    /// Run inference on the CPU even when an accelerator is available
    #[arg(long, env)]
    pub cpu: bool,

    /// Load the full precision safetensors weights instead of the quantized gguf
    #[arg(short, long, env)]
    pub safetensors: bool,

    /// OTLP collector endpoint, omit to log to the console only
    #[arg(short, long, env)]
    pub otel_endpoint: Option<String>,

    /// Keep the console log layer active alongside the OTLP exporter
    #[arg(long, env)]
    pub console: bool,
}

impl Config {
    pub fn from_toml(path: &str) -> Result<Self> {
        let str = std::fs::read_to_string(path)?;
        let config = toml::from_str(&str)?;
        Ok(config)
    }
}
