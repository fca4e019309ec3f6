use anyhow::{Error as E, Result};
use candle_core::Device;
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use image::RgbImage;
use serde_json::{Map, Value};
use tokenizers::Tokenizer;

use crate::inference::processor::{ModelInputs, VisionProcessor};
use crate::inference::task::answer::{AnswerHandler, TokenBatch};
use crate::inference::vision_pipeline::VisionGeneratorPipeline;
use crate::ModelBase;

/// Token that moondream emits both to open generation and to end it.
pub const SPECIAL_TOKEN: &str = "<|endoftext|>";

pub struct MoondreamModel {
    pub base: ModelBase,
    processor: VisionProcessor,
    pipeline: VisionGeneratorPipeline,
}

impl MoondreamModel {
    #[tracing::instrument(level = "info", skip(api))]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: &Api,
        base: &ModelBase,
        tokenizer_repo: &str,
        tokenizer_revision: &str,
        tokenizer_filename: &str,
        weights_filename: &str,
        device: &Device,
        safetensors: bool,
    ) -> Result<Self> {
        let weights_repo = api.repo(Repo::with_revision(
            base.repo_id.clone(),
            RepoType::Model,
            base.repo_revision.clone(),
        ));
        let tokenizer_repo = api.repo(Repo::with_revision(
            tokenizer_repo.into(),
            RepoType::Model,
            tokenizer_revision.into(),
        ));

        let tokenizer_file = tokenizer_repo.get(tokenizer_filename)?;
        let tokenizer = Tokenizer::from_file(tokenizer_file).map_err(E::msg)?;
        let processor = VisionProcessor::new(tokenizer);
        let special_token = processor.token_id(SPECIAL_TOKEN)?;

        let pipeline = if safetensors {
            VisionGeneratorPipeline::with_safetensors(
                &weights_repo,
                weights_filename,
                device,
                special_token,
            )?
        } else {
            VisionGeneratorPipeline::with_quantized_gguf(
                &weights_repo,
                weights_filename,
                device,
                special_token,
            )?
        };

        Ok(Self {
            base: base.clone(),
            processor,
            pipeline,
        })
    }
}

impl AnswerHandler for MoondreamModel {
    #[tracing::instrument(level = "debug", skip(self, questions, images))]
    fn preprocess(
        &self,
        questions: &[String],
        images: &[RgbImage],
        max_length: usize,
    ) -> Result<ModelInputs> {
        self.processor.preprocess(questions, images, max_length)
    }

    #[tracing::instrument(level = "debug", skip(self, inputs, options))]
    fn generate(
        &mut self,
        inputs: &ModelInputs,
        options: &Map<String, Value>,
    ) -> Result<TokenBatch> {
        self.pipeline.generate(inputs, options)
    }

    fn batch_decode(&self, token_rows: &[Vec<u32>]) -> Result<Vec<String>> {
        self.processor.batch_decode(token_rows)
    }

    fn device(&self) -> &Device {
        &self.pipeline.device
    }
}
