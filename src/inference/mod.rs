pub mod image;
pub mod model_config;
pub mod models;
pub mod processor;
pub mod task;
pub mod vision_pipeline;

use anyhow::Result;
use candle_core::Device;

/// Picks the best available accelerator unless `cpu` forces host memory.
pub fn device(cpu: bool) -> Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else if candle_core::utils::cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else if candle_core::utils::metal_is_available() {
        Ok(Device::new_metal(0)?)
    } else {
        Ok(Device::Cpu)
    }
}
