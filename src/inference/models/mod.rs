pub mod model;
pub mod moondream;
