use anyhow::Result;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Runtime knobs for the generation loop, filled from the free form options
/// a request carries. Keys the pipeline does not know are ignored, matching
/// how a keyword driven generate call treats unused options.
#[derive(Deserialize, Debug, Copy, Clone)]
#[serde(default)]
pub struct GenerationOptions {
    pub seed: Option<u64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub repeat_penalty: f32,
    pub repeat_context_size: usize,
    pub max_new_tokens: usize,
}

impl Default for GenerationOptions {
    #[tracing::instrument(level = "trace", skip())]
    fn default() -> Self {
        Self {
            seed: None,
            temperature: None,
            top_p: None,
            repeat_penalty: 1.1,
            repeat_context_size: 64,
            max_new_tokens: 256,
        }
    }
}

impl GenerationOptions {
    pub fn from_map(options: &Map<String, Value>) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(options.clone()))?)
    }
}
