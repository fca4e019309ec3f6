use anyhow::anyhow;
use candle_core::Device;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::inference::image::decode_base64_image;
use crate::inference::processor::ModelInputs;

/// Token rows as returned by generation, prompt tokens included.
pub type TokenBatch = Vec<Vec<u32>>;

#[derive(Deserialize, Debug)]
pub struct AnswerRequest {
    /// Base64 encoded image bytes, any format the image crate can sniff.
    #[serde(default)]
    pub image_base64: String,

    /// Natural language question about the image.
    #[serde(default)]
    pub question: String,

    /// Bounds the tokenized prompt length, padding and truncation included.
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Every remaining payload key, forwarded to generation untouched.
    #[serde(flatten)]
    pub generation_options: Map<String, Value>,
}

fn default_max_length() -> usize {
    512
}

#[derive(Deserialize, Serialize, Debug)]
pub struct AnswerResponse {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("both 'image_base64' and 'question' fields are required")]
    MissingField,
    #[error("invalid base64 image data: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("undecodable image data: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("inference failed: {0}")]
    Inference(#[from] anyhow::Error),
}

/// Seam between the request flow and a loaded vision language model. The
/// four required operations cover the whole engine surface; `run_answer`
/// implements the request contract once on top of them.
pub trait AnswerHandler: Send {
    /// Builds the padded and truncated single example batch.
    fn preprocess(
        &self,
        questions: &[String],
        images: &[RgbImage],
        max_length: usize,
    ) -> anyhow::Result<ModelInputs>;

    /// Runs generation, echoing the padded prompt row in front of the
    /// generated continuation.
    fn generate(
        &mut self,
        inputs: &ModelInputs,
        options: &Map<String, Value>,
    ) -> anyhow::Result<TokenBatch>;

    fn batch_decode(&self, batch: &[Vec<u32>]) -> anyhow::Result<Vec<String>>;

    /// The device inputs are placed on before generation.
    fn device(&self) -> &Device;

    fn run_answer(&mut self, request: AnswerRequest) -> Result<AnswerResponse, AnswerError> {
        if request.image_base64.is_empty() || request.question.is_empty() {
            return Err(AnswerError::MissingField);
        }

        let image = decode_base64_image(&request.image_base64)?;
        let inputs = self.preprocess(
            std::slice::from_ref(&request.question),
            std::slice::from_ref(&image),
            request.max_length,
        )?;

        let device = self.device().clone();
        let inputs = if matches!(device, Device::Cpu) {
            inputs
        } else {
            inputs.to_device(&device)?
        };

        let prompt_length = inputs.seq_len()?;
        let output = self.generate(&inputs, &request.generation_options)?;

        // Generated rows start with the echoed prompt, strip it before decoding.
        let continuations: TokenBatch = output
            .iter()
            .map(|row| row[prompt_length.min(row.len())..].to_vec())
            .collect();
        let answer = self
            .batch_decode(&continuations)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Generation returned an empty batch"))?;

        Ok(AnswerResponse {
            question: request.question,
            answer,
        })
    }
}
