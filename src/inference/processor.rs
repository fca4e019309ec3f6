use anyhow::{bail, Error as E, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

// Image handling taken from
// https://github.com/huggingface/candle/blob/main/candle-examples/examples/moondream/main.rs
/// Input resolution of the moondream vision encoder.
const IMAGE_SIZE: u32 = 378;
const IMAGE_MEAN: f32 = 0.5;
const IMAGE_STD: f32 = 0.5;

/// Longest padded prompt the processor will build, matching the context
/// window of the moondream text model.
pub const MAX_PROMPT_LENGTH: usize = 2048;

/// Turns raw (question, image) pairs into the fixed shape batch the model
/// consumes and decodes token rows back into text.
pub struct VisionProcessor {
    tokenizer: Tokenizer,
}

/// One preprocessed batch. `input_ids` and `attention_mask` are `[batch,
/// seq]` u32 tensors, `pixel_values` is `[batch, 3, 378, 378]` f32.
#[derive(Debug, Clone)]
pub struct ModelInputs {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub pixel_values: Tensor,
}

impl ModelInputs {
    /// Padded sequence length, which doubles as the prompt length to strip
    /// from generated rows.
    pub fn seq_len(&self) -> Result<usize> {
        Ok(self.input_ids.dim(1)?)
    }

    pub fn batch_size(&self) -> Result<usize> {
        Ok(self.input_ids.dim(0)?)
    }

    /// Moves every tensor of the batch in one step, partial placement is
    /// never valid.
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(ModelInputs {
            input_ids: self.input_ids.to_device(device)?,
            attention_mask: self.attention_mask.to_device(device)?,
            pixel_values: self.pixel_values.to_device(device)?,
        })
    }

    /// Full padded token row of one example.
    pub fn token_ids(&self, index: usize) -> Result<Vec<u32>> {
        Ok(self.input_ids.i(index)?.to_vec1::<u32>()?)
    }

    /// Unpadded prompt tokens of one example, the part the model actually
    /// consumes.
    pub fn prompt_ids(&self, index: usize) -> Result<Vec<u32>> {
        let ids = self.token_ids(index)?;
        let mask = self.attention_mask.i(index)?.to_vec1::<u32>()?;
        Ok(ids
            .into_iter()
            .zip(mask)
            .filter_map(|(id, keep)| (keep == 1).then_some(id))
            .collect())
    }
}

impl VisionProcessor {
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self { tokenizer }
    }

    /// Prompt template the model was trained on.
    fn format_prompt(question: &str) -> String {
        format!("\n\nQuestion: {question}\n\nAnswer:")
    }

    pub fn preprocess(
        &self,
        questions: &[String],
        images: &[RgbImage],
        max_length: usize,
    ) -> Result<ModelInputs> {
        if questions.len() != images.len() {
            bail!(
                "Mismatched batch: {} questions and {} images",
                questions.len(),
                images.len()
            );
        }
        // Fixed padding sizes a buffer of max_length tokens per row.
        if max_length == 0 || max_length > MAX_PROMPT_LENGTH {
            bail!("max_length must be between 1 and {MAX_PROMPT_LENGTH}, got {max_length}");
        }

        let prompts: Vec<String> = questions
            .iter()
            .map(|question| Self::format_prompt(question))
            .collect();

        let mut tokenizer = self.tokenizer.clone();
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(max_length),
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(E::msg)?;
        let encodings = tokenizer.encode_batch(prompts, true).map_err(E::msg)?;

        let mut id_rows = Vec::with_capacity(encodings.len());
        let mut mask_rows = Vec::with_capacity(encodings.len());
        for encoding in &encodings {
            id_rows.push(Tensor::new(encoding.get_ids(), &Device::Cpu)?);
            mask_rows.push(Tensor::new(encoding.get_attention_mask(), &Device::Cpu)?);
        }

        let mut pixel_rows = Vec::with_capacity(images.len());
        for image in images {
            pixel_rows.push(Self::image_to_tensor(image)?);
        }

        Ok(ModelInputs {
            input_ids: Tensor::stack(&id_rows, 0)?,
            attention_mask: Tensor::stack(&mask_rows, 0)?,
            pixel_values: Tensor::stack(&pixel_rows, 0)?,
        })
    }

    fn image_to_tensor(image: &RgbImage) -> Result<Tensor> {
        let resized = DynamicImage::ImageRgb8(image.clone())
            .resize_to_fill(IMAGE_SIZE, IMAGE_SIZE, FilterType::Triangle)
            .to_rgb8();
        let data = resized.into_raw();
        let image = Tensor::from_vec(
            data,
            (IMAGE_SIZE as usize, IMAGE_SIZE as usize, 3),
            &Device::Cpu,
        )?
        .permute((2, 0, 1))?;

        let mean = Tensor::new(&[IMAGE_MEAN, IMAGE_MEAN, IMAGE_MEAN], &Device::Cpu)?
            .reshape((3, 1, 1))?;
        let std =
            Tensor::new(&[IMAGE_STD, IMAGE_STD, IMAGE_STD], &Device::Cpu)?.reshape((3, 1, 1))?;
        let image = (image.to_dtype(DType::F32)? / 255.)?
            .broadcast_sub(&mean)?
            .broadcast_div(&std)?;
        Ok(image)
    }

    pub fn batch_decode(&self, batch: &[Vec<u32>]) -> Result<Vec<String>> {
        let rows: Vec<&[u32]> = batch.iter().map(Vec::as_slice).collect();
        self.tokenizer.decode_batch(&rows, true).map_err(E::msg)
    }

    pub fn token_id(&self, token: &str) -> Result<u32> {
        match self.tokenizer.token_to_id(token) {
            Some(id) => Ok(id),
            None => bail!("Cannot find the {token} token"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use image::{ImageBuffer, Rgb};
    use tokenizers::models::wordlevel::WordLevel;
    use tokenizers::pre_tokenizers::whitespace::WhitespaceSplit;
    use tokenizers::pre_tokenizers::PreTokenizerWrapper;

    use super::*;

    fn toy_processor() -> VisionProcessor {
        let vocab: HashMap<String, u32> = [
            ("[UNK]", 0),
            ("Question:", 1),
            ("Answer:", 2),
            ("what", 3),
            ("color", 4),
            ("is", 5),
            ("this", 6),
        ]
        .into_iter()
        .map(|(token, id)| (token.to_string(), id))
        .collect();
        let model = WordLevel::builder()
            .vocab(vocab)
            .unk_token("[UNK]".to_string())
            .build()
            .unwrap();
        let mut tokenizer = Tokenizer::new(model);
        tokenizer.with_pre_tokenizer(PreTokenizerWrapper::WhitespaceSplit(WhitespaceSplit));
        VisionProcessor::new(tokenizer)
    }

    fn red_image(width: u32, height: u32) -> RgbImage {
        ImageBuffer::from_pixel(width, height, Rgb([255u8, 0, 0]))
    }

    #[test]
    fn pads_prompt_to_fixed_length() {
        let processor = toy_processor();
        let inputs = processor
            .preprocess(&["what color".to_string()], &[red_image(8, 8)], 8)
            .unwrap();

        assert_eq!(inputs.batch_size().unwrap(), 1);
        assert_eq!(inputs.seq_len().unwrap(), 8);
        // Template wraps the question between Question: and Answer: markers.
        assert_eq!(inputs.token_ids(0).unwrap(), vec![1, 3, 4, 2, 0, 0, 0, 0]);
        assert_eq!(inputs.prompt_ids(0).unwrap(), vec![1, 3, 4, 2]);
    }

    #[test]
    fn truncates_prompt_at_max_length() {
        let processor = toy_processor();
        let inputs = processor
            .preprocess(&["what color is this".to_string()], &[red_image(8, 8)], 2)
            .unwrap();

        assert_eq!(inputs.seq_len().unwrap(), 2);
        assert_eq!(inputs.token_ids(0).unwrap(), vec![1, 3]);
    }

    #[test]
    fn pixel_batch_is_resized_and_normalized() {
        let processor = toy_processor();
        let inputs = processor
            .preprocess(&["what".to_string()], &[red_image(10, 10)], 4)
            .unwrap();

        assert_eq!(
            inputs.pixel_values.dims(),
            &[1, 3, IMAGE_SIZE as usize, IMAGE_SIZE as usize]
        );
        // Solid red maps to 1.0 in the red channel and -1.0 elsewhere.
        let red = inputs
            .pixel_values
            .i((0, 0, 0, 0))
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        let green = inputs
            .pixel_values
            .i((0, 1, 0, 0))
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!((red - 1.0).abs() < 1e-6);
        assert!((green + 1.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_mismatched_batches() {
        let processor = toy_processor();
        assert!(processor.preprocess(&["what".to_string()], &[], 4).is_err());
    }

    #[test]
    fn rejects_out_of_range_max_length() {
        let processor = toy_processor();

        assert!(processor
            .preprocess(&["what".to_string()], &[red_image(8, 8)], usize::MAX)
            .is_err());
        assert!(processor
            .preprocess(&["what".to_string()], &[red_image(8, 8)], MAX_PROMPT_LENGTH + 1)
            .is_err());
        assert!(processor
            .preprocess(&["what".to_string()], &[red_image(8, 8)], 0)
            .is_err());
        assert!(processor
            .preprocess(&["what".to_string()], &[red_image(8, 8)], MAX_PROMPT_LENGTH)
            .is_ok());
    }

    #[test]
    fn decodes_token_rows_back_to_text() {
        let processor = toy_processor();
        let decoded = processor.batch_decode(&[vec![3, 4]]).unwrap();
        assert_eq!(decoded, vec!["what color".to_string()]);
    }

    #[test]
    fn looks_up_token_ids() {
        let processor = toy_processor();
        assert_eq!(processor.token_id("Answer:").unwrap(), 2);
        assert!(processor.token_id("<|endoftext|>").is_err());
    }
}
