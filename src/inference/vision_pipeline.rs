use anyhow::{bail, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::moondream;
use candle_transformers::models::quantized_moondream;
use candle_transformers::quantized_var_builder;
use hf_hub::api::sync::ApiRepo;
use rand::random;
use serde_json::{Map, Value};

use crate::inference::model_config::GenerationOptions;
use crate::inference::processor::ModelInputs;
use crate::inference::task::answer::TokenBatch;

// Taken from
// https://github.com/huggingface/candle/blob/main/candle-examples/examples/moondream/main.rs
pub struct VisionGeneratorPipeline {
    pub model: Model,
    pub device: Device,
    pub dtype: DType,
    /// Shared bos and eos id, `<|endoftext|>` in the moondream tokenizer.
    pub special_token: u32,
}

pub enum Model {
    Moondream(moondream::Model),
    Quantized(quantized_moondream::Model),
}

/// The model closes answers with a literal `<END>` marker.
const ANSWER_END_MARKER: [u32; 3] = [27, 10619, 29];

impl VisionGeneratorPipeline {
    pub fn with_quantized_gguf(
        repo: &ApiRepo,
        gguf_filename: &str,
        device: &Device,
        special_token: u32,
    ) -> Result<VisionGeneratorPipeline> {
        let gguf_file = repo.get(gguf_filename)?;
        let vb = quantized_var_builder::VarBuilder::from_gguf(gguf_file, device)?;
        let config = moondream::Config::v2();
        let model = quantized_moondream::Model::new(&config, vb)?;

        Ok(VisionGeneratorPipeline {
            model: Model::Quantized(model),
            device: device.clone(),
            dtype: DType::F32,
            special_token,
        })
    }

    pub fn with_safetensors(
        repo: &ApiRepo,
        weights_filename: &str,
        device: &Device,
        special_token: u32,
    ) -> Result<VisionGeneratorPipeline> {
        let weights_file = repo.get(weights_filename)?;
        let dtype = if device.is_cuda() {
            DType::F16
        } else {
            DType::F32
        };
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_file], dtype, device)? };
        let config = moondream::Config::v2();
        let model = moondream::Model::new(&config, vb)?;

        Ok(VisionGeneratorPipeline {
            model: Model::Moondream(model),
            device: device.clone(),
            dtype,
            special_token,
        })
    }

    /// Runs one image conditioned generation. Returned rows echo the padded
    /// prompt so callers can slice it off by the batch sequence length.
    pub fn generate(
        &mut self,
        inputs: &ModelInputs,
        options: &Map<String, Value>,
    ) -> Result<TokenBatch> {
        let batch_size = inputs.batch_size()?;
        if batch_size != 1 {
            bail!("Expected a single example batch, got {batch_size}");
        }

        let options = GenerationOptions::from_map(options)?;
        let mut logits_processor = LogitsProcessor::new(
            options.seed.unwrap_or_else(random),
            options.temperature,
            options.top_p,
        );

        // A failed run must not leak attention state into the next one.
        self.clear_kv_cache();

        let pixel_values = inputs.pixel_values.to_dtype(self.dtype)?;
        let image_embeds = match &self.model {
            Model::Moondream(model) => pixel_values.apply(model.vision_encoder())?,
            Model::Quantized(model) => pixel_values.apply(model.vision_encoder())?,
        };

        let mut tokens = inputs.prompt_ids(0)?;
        if tokens.is_empty() {
            bail!("Prompt is empty");
        }
        let bos_token = Tensor::new(&[self.special_token], &self.device)?.unsqueeze(0)?;

        let mut generated = Vec::new();
        for index in 0..options.max_new_tokens {
            let context_size = if index > 0 { 1 } else { tokens.len() };
            let start_pos = tokens.len().saturating_sub(context_size);
            let input = Tensor::new(&tokens[start_pos..], &self.device)?.unsqueeze(0)?;
            let logits = if index > 0 {
                match &mut self.model {
                    Model::Moondream(model) => model.text_model.forward(&input)?,
                    Model::Quantized(model) => model.text_model.forward(&input)?,
                }
            } else {
                match &mut self.model {
                    Model::Moondream(model) => {
                        model
                            .text_model
                            .forward_with_img(&bos_token, &input, &image_embeds)?
                    }
                    Model::Quantized(model) => {
                        model
                            .text_model
                            .forward_with_img(&bos_token, &input, &image_embeds)?
                    }
                }
            };
            let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
            let logits = if (options.repeat_penalty - 1.).abs() < f32::EPSILON {
                logits
            } else {
                let start_at = tokens.len().saturating_sub(options.repeat_context_size);
                candle_transformers::utils::apply_repeat_penalty(
                    &logits,
                    options.repeat_penalty,
                    &tokens[start_at..],
                )?
            };

            let next_token = logits_processor.sample(&logits)?;
            tokens.push(next_token);
            if next_token == self.special_token {
                break;
            }
            generated.push(next_token);
            if generated.ends_with(&ANSWER_END_MARKER) {
                generated.truncate(generated.len() - ANSWER_END_MARKER.len());
                break;
            }
        }

        let mut row = inputs.token_ids(0)?;
        row.extend_from_slice(&generated);
        Ok(vec![row])
    }

    fn clear_kv_cache(&mut self) {
        match &mut self.model {
            Model::Moondream(model) => model.text_model.clear_kv_cache(),
            Model::Quantized(model) => model.text_model.clear_kv_cache(),
        }
    }
}
