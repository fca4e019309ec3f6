use std::io::Cursor;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use candle_core::{DType, Device, Tensor};
use image::{ImageBuffer, ImageOutputFormat, Rgb, RgbImage};
use serde_json::{Map, Value};

use vqa_runner::inference::processor::ModelInputs;
use vqa_runner::inference::task::answer::{AnswerHandler, TokenBatch};
use vqa_runner::server;
use vqa_runner::server::handlers::AppState;

/// Everything the engine was asked to do, captured for assertions.
#[derive(Debug, Default)]
pub struct Recorded {
    pub questions: Vec<String>,
    pub image_count: usize,
    pub max_lengths: Vec<usize>,
    pub options: Vec<Map<String, Value>>,
    pub decoded_batches: Vec<Vec<Vec<u32>>>,
}

/// Stand-in engine that produces tensors and tokens without model weights.
///
/// `preprocess` hands back a fixed four token prompt batch and `generate`
/// echoes that prompt followed by the tokens `[5, 6, 7]`, mirroring how the
/// real pipeline returns prompt and continuation in one row.
pub struct FakeAnswerModel {
    pub recorded: Arc<Mutex<Recorded>>,
    pub answer: String,
    pub fail_generate: bool,
    device: Device,
}

impl FakeAnswerModel {
    pub fn new() -> Self {
        Self {
            recorded: Arc::new(Mutex::new(Recorded::default())),
            answer: "a red square".to_string(),
            fail_generate: false,
            device: Device::Cpu,
        }
    }

    pub fn with_failing_generate(mut self) -> Self {
        self.fail_generate = true;
        self
    }
}

impl Default for FakeAnswerModel {
    fn default() -> Self {
        Self::new()
    }
}

impl AnswerHandler for FakeAnswerModel {
    fn preprocess(
        &self,
        questions: &[String],
        images: &[RgbImage],
        max_length: usize,
    ) -> Result<ModelInputs> {
        let mut recorded = self.recorded.lock().unwrap();
        recorded.questions.extend_from_slice(questions);
        recorded.image_count += images.len();
        recorded.max_lengths.push(max_length);

        Ok(ModelInputs {
            input_ids: Tensor::new(&[[1u32, 2, 3, 0]], &self.device)?,
            attention_mask: Tensor::new(&[[1u32, 1, 1, 0]], &self.device)?,
            pixel_values: Tensor::zeros((1, 3, 8, 8), DType::F32, &self.device)?,
        })
    }

    fn generate(
        &mut self,
        inputs: &ModelInputs,
        options: &Map<String, Value>,
    ) -> Result<TokenBatch> {
        self.recorded.lock().unwrap().options.push(options.clone());
        if self.fail_generate {
            return Err(anyhow!("vision head fell over"));
        }

        let mut row = inputs.token_ids(0)?;
        row.extend_from_slice(&[5, 6, 7]);
        Ok(vec![row])
    }

    fn batch_decode(&self, token_rows: &[Vec<u32>]) -> Result<Vec<String>> {
        self.recorded
            .lock()
            .unwrap()
            .decoded_batches
            .push(token_rows.to_vec());
        Ok(vec![self.answer.clone()])
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

pub fn test_app(model: FakeAnswerModel) -> Router {
    let state = AppState {
        model: Arc::new(tokio::sync::Mutex::new(model)),
    };
    server::build_router(state)
}

pub fn red_png_base64(width: u32, height: u32) -> String {
    let image: RgbImage = ImageBuffer::from_pixel(width, height, Rgb([255, 0, 0]));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageOutputFormat::Png)
        .expect("png encoding failed");
    STANDARD.encode(bytes.into_inner())
}
