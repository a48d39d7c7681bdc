pub mod color;
pub mod filters;
pub mod layout;
pub mod montage;
pub mod pipeline;

pub use pipeline::CaptureProcessor;
