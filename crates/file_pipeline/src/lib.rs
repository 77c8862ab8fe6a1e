mod pipeline;
mod playback;
mod resource;

pub use pipeline::{FilePipeline, PipelineStatus, UploadedArtifact, format_file_size};
pub use playback::{SeekCommand, seek_target};
pub use resource::{ObjectUrlRegistry, ResourceHandle, ResourceRegistry};
