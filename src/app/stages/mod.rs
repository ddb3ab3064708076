pub mod processor;
pub mod producer;
pub mod uploader;

pub use processor::Processor;
pub use producer::Producer;
pub use uploader::{UploadMode, Uploader};
