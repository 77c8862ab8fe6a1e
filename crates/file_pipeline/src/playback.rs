use core_types::{FileType, TimeRange};

use crate::UploadedArtifact;

/// Where a player should jump when a citation is activated.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekCommand {
    pub resource_url: String,
    pub file_type: FileType,
    pub position: f64,
}

/// Documents have no timeline, so citations on them never seek.
pub fn seek_target(artifact: &UploadedArtifact, range: &TimeRange) -> Option<SeekCommand> {
    if !artifact.file_type.is_media() {
        return None;
    }
    Some(SeekCommand {
        resource_url: artifact.resource_url().to_string(),
        file_type: artifact.file_type,
        position: range.start(),
    })
}
