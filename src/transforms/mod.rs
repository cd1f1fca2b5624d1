pub mod normalize;
pub mod pipeline;
pub mod processing;
pub mod resize;

pub use pipeline::Transform;
pub use processing::{ImageProcessor, ProcessingMetadata, ProcessingStep};
