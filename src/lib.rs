pub mod config;
pub mod error;
pub mod inference;
pub mod server;
pub mod telemetry;

pub use error::{HttpErrorResponse, VqaResult, VqaRunnerError};
pub use inference::models::model::{ModelBase, ModelDomain, VisionTask};
