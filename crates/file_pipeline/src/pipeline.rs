use std::path::Path;
use std::sync::Arc;

use core_types::{
    ALLOWED_EXTENSIONS, BackendApi, ClientError, ClientResult, FileId, FileType, SourceFile,
    TimeRange,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::playback::{SeekCommand, seek_target};
use crate::resource::{ResourceHandle, ResourceRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Empty,
    Selected,
    Uploading,
    Ready,
    Error,
}

/// The uploaded and processed file currently backing the chat.
#[derive(Debug)]
pub struct UploadedArtifact {
    pub file_id: FileId,
    pub filename: String,
    pub file_type: FileType,
    source: SourceFile,
    handle: ResourceHandle,
}

impl UploadedArtifact {
    pub fn resource_url(&self) -> &str {
        self.handle.url()
    }

    pub fn source_file(&self) -> &SourceFile {
        &self.source
    }
}

/// Drives one file at a time through upload and processing.
pub struct FilePipeline {
    api: Arc<dyn BackendApi>,
    registry: Arc<dyn ResourceRegistry>,
    max_file_bytes: u64,
    status: PipelineStatus,
    selected: Option<SourceFile>,
    artifact: Option<UploadedArtifact>,
    last_error: Option<String>,
}

impl FilePipeline {
    pub fn new(
        api: Arc<dyn BackendApi>,
        registry: Arc<dyn ResourceRegistry>,
        max_file_bytes: u64,
    ) -> Self {
        Self {
            api,
            registry,
            max_file_bytes,
            status: PipelineStatus::Empty,
            selected: None,
            artifact: None,
            last_error: None,
        }
    }

    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    pub fn is_loading(&self) -> bool {
        self.status == PipelineStatus::Uploading
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn selected(&self) -> Option<&SourceFile> {
        self.selected.as_ref()
    }

    pub fn artifact(&self) -> Option<&UploadedArtifact> {
        self.artifact.as_ref()
    }

    pub fn active_file_id(&self) -> Option<&str> {
        self.artifact.as_ref().map(|artifact| artifact.file_id.as_str())
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    /// Checks extension and size; no network involved.
    pub fn validate(&self, file: &SourceFile) -> ClientResult<FileType> {
        self.check(file.name(), file.size())
    }

    /// Reads a file from disk, rejecting it from its metadata before loading
    /// the contents.
    pub async fn open(&self, path: impl AsRef<Path>) -> ClientResult<SourceFile> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                ClientError::validation(format!("{} is not a file name", path.display()))
            })?;
        let metadata = tokio::fs::metadata(path).await.map_err(|err| {
            ClientError::validation(format!("cannot read {}: {err}", path.display()))
        })?;
        if !metadata.is_file() {
            return Err(ClientError::validation(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        self.check(name, metadata.len())?;

        let data = tokio::fs::read(path).await.map_err(|err| {
            ClientError::validation(format!("cannot read {}: {err}", path.display()))
        })?;
        Ok(SourceFile::from_bytes(name, data).with_path(path))
    }

    /// Stages a file for upload. Rejected files leave the pipeline as it was.
    pub fn select(&mut self, file: SourceFile) -> ClientResult<()> {
        if let Err(err) = self.validate(&file) {
            self.last_error = Some(err.user_message());
            return Err(err);
        }
        self.last_error = None;
        self.selected = Some(file);
        self.status = PipelineStatus::Selected;
        Ok(())
    }

    pub fn deselect(&mut self) {
        self.selected = None;
        if self.status == PipelineStatus::Selected {
            self.status = self.resting_status();
        }
    }

    pub async fn upload_selected(&mut self, token: Option<&str>) -> ClientResult<&UploadedArtifact> {
        let file = self
            .selected
            .clone()
            .ok_or_else(|| ClientError::validation("no file selected"))?;
        self.upload(file, token).await
    }

    /// Uploads then processes `file`; the artifact becomes active only when
    /// both calls succeed.
    pub async fn upload(
        &mut self,
        file: SourceFile,
        token: Option<&str>,
    ) -> ClientResult<&UploadedArtifact> {
        self.last_error = None;
        let local_type = match self.validate(&file) {
            Ok(file_type) => file_type,
            Err(err) => {
                warn!(filename = file.name(), error = %err, "upload rejected locally");
                self.last_error = Some(err.user_message());
                return Err(err);
            }
        };

        info!(filename = file.name(), size = file.size(), "upload accepted");
        self.release_artifact();
        self.selected = Some(file.clone());
        self.status = PipelineStatus::Uploading;

        let uploaded = match self.api.upload_file(&file, token).await {
            Ok(uploaded) => uploaded,
            Err(err) => return Err(self.fail(err)),
        };

        if let Err(err) = self.api.process_file(&uploaded.file_id, token).await {
            warn!(file_id = %uploaded.file_id, "processing failed, discarding file id");
            return Err(self.fail(err));
        }
        info!(file_id = %uploaded.file_id, "file processed");

        let handle = ResourceHandle::acquire(Arc::clone(&self.registry), &file);
        let artifact = UploadedArtifact {
            file_id: uploaded.file_id,
            filename: uploaded.filename,
            file_type: FileType::from_extension(&uploaded.file_type).unwrap_or(local_type),
            source: file,
            handle,
        };
        self.selected = None;
        self.status = PipelineStatus::Ready;
        Ok(self.artifact.insert(artifact))
    }

    /// Asks the backend to process the active artifact again.
    pub async fn reprocess(&mut self, token: Option<&str>) -> ClientResult<Value> {
        let file_id = self
            .active_file_id()
            .map(str::to_string)
            .ok_or_else(|| ClientError::validation("no file to process"))?;
        self.last_error = None;
        match self.api.process_file(&file_id, token).await {
            Ok(ack) => {
                info!(%file_id, "file reprocessed");
                Ok(ack)
            }
            Err(err) => {
                self.last_error = Some(err.user_message());
                Err(err)
            }
        }
    }

    /// Releases the resource handle, if any, and returns to `Empty`.
    pub fn clear(&mut self) {
        self.release_artifact();
        self.selected = None;
        self.last_error = None;
        self.status = PipelineStatus::Empty;
    }

    pub fn seek(&self, range: &TimeRange) -> Option<SeekCommand> {
        self.artifact
            .as_ref()
            .and_then(|artifact| seek_target(artifact, range))
    }

    fn check(&self, name: &str, size: u64) -> ClientResult<FileType> {
        let file_type = FileType::from_file_name(name).ok_or_else(|| {
            ClientError::validation(format!(
                "unsupported file type for {name}; allowed: .{}",
                ALLOWED_EXTENSIONS.join(", .")
            ))
        })?;
        if size == 0 {
            return Err(ClientError::validation(format!("{name} is empty")));
        }
        if size > self.max_file_bytes {
            return Err(ClientError::validation(format!(
                "{name} is {}, over the {} upload limit",
                format_file_size(size),
                format_file_size(self.max_file_bytes)
            )));
        }
        Ok(file_type)
    }

    fn fail(&mut self, err: ClientError) -> ClientError {
        self.status = PipelineStatus::Error;
        self.last_error = Some(err.user_message());
        err
    }

    fn release_artifact(&mut self) {
        if let Some(artifact) = self.artifact.take() {
            info!(file_id = %artifact.file_id, "releasing active file");
        }
    }

    fn resting_status(&self) -> PipelineStatus {
        if self.artifact.is_some() {
            PipelineStatus::Ready
        } else {
            PipelineStatus::Empty
        }
    }
}

pub fn format_file_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    if bytes < KIB {
        format!("{bytes} B")
    } else if bytes < MIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    }
}

#[cfg(test)]
mod tests {
    use core_types::testing::{Call, ScriptedBackend, processed, upload_response};

    use super::*;
    use crate::ObjectUrlRegistry;

    const LIMIT: u64 = 1024;

    fn pipeline() -> (FilePipeline, Arc<ScriptedBackend>, Arc<ObjectUrlRegistry>) {
        let backend = Arc::new(ScriptedBackend::new());
        let registry = Arc::new(ObjectUrlRegistry::new());
        (
            FilePipeline::new(backend.clone(), registry.clone(), LIMIT),
            backend,
            registry,
        )
    }

    fn file(name: &str) -> SourceFile {
        SourceFile::from_bytes(name, vec![7u8; 16])
    }

    #[tokio::test]
    async fn unsupported_extension_never_reaches_network() {
        let (mut pipeline, backend, _) = pipeline();

        for name in ["notes.docx", "archive", "song.flac"] {
            let err = pipeline.upload(file(name), Some("tok")).await.expect_err("reject");
            assert!(matches!(err, ClientError::Validation(_)));
        }

        assert_eq!(backend.call_count(), 0);
        assert_eq!(pipeline.status(), PipelineStatus::Empty);
        assert!(pipeline.last_error().is_some());
    }

    #[test]
    fn extension_check_ignores_case_and_inner_dots() {
        let (mut pipeline, _, _) = pipeline();
        pipeline.select(file("Week.2.Lecture.MP4")).expect("select");
        assert_eq!(pipeline.status(), PipelineStatus::Selected);
        assert!(pipeline.select(file("slides.pdf.txt")).is_err());
    }

    #[tokio::test]
    async fn rejection_keeps_current_selection() {
        let (mut pipeline, backend, _) = pipeline();
        pipeline.select(file("talk.wav")).expect("select");

        assert!(pipeline.select(file("talk.ogg")).is_err());
        let big = SourceFile::from_bytes("big.mp4", vec![0u8; (LIMIT + 1) as usize]);
        assert!(pipeline.upload(big, None).await.is_err());

        assert_eq!(pipeline.status(), PipelineStatus::Selected);
        assert_eq!(pipeline.selected().map(SourceFile::name), Some("talk.wav"));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn oversized_and_empty_files_are_rejected() {
        let (mut pipeline, backend, _) = pipeline();
        let big = SourceFile::from_bytes("lecture.mp4", vec![0u8; (LIMIT + 1) as usize]);
        let empty = SourceFile::from_bytes("blank.pdf", Vec::new());

        let err = pipeline.upload(big, None).await.expect_err("too big");
        assert!(err.to_string().contains("upload limit"), "{err}");
        assert!(pipeline.upload(empty, None).await.is_err());
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn upload_then_process_with_same_token() {
        let (mut pipeline, backend, registry) = pipeline();
        backend
            .push_upload(Ok(upload_response("f1", "notes.pdf")))
            .push_process(Ok(processed()));

        let artifact = pipeline
            .upload(file("notes.pdf"), Some("tok"))
            .await
            .expect("upload");

        assert_eq!(artifact.file_id, "f1");
        assert_eq!(artifact.filename, "notes.pdf");
        assert_eq!(artifact.file_type, FileType::Document);
        assert!(registry.is_live(artifact.resource_url()));
        assert_eq!(pipeline.status(), PipelineStatus::Ready);
        assert_eq!(registry.live_count(), 1);
        assert_eq!(
            backend.calls(),
            vec![
                Call::Upload {
                    filename: "notes.pdf".into(),
                    token: Some("tok".into())
                },
                Call::Process {
                    file_id: "f1".into(),
                    token: Some("tok".into())
                },
            ]
        );
    }

    #[tokio::test]
    async fn replacing_artifact_releases_previous_handle_once() {
        let (mut pipeline, backend, registry) = pipeline();
        backend
            .push_upload(Ok(upload_response("f1", "a.mp3")))
            .push_process(Ok(processed()))
            .push_upload(Ok(upload_response("f2", "b.mp4")))
            .push_process(Ok(processed()));

        let first_url = pipeline
            .upload(file("a.mp3"), Some("tok"))
            .await
            .expect("first")
            .resource_url()
            .to_string();
        let second = pipeline
            .upload(file("b.mp4"), Some("tok"))
            .await
            .expect("second");

        assert_eq!(second.file_type, FileType::Video);
        assert!(!registry.is_live(&first_url));
        assert_eq!(registry.created_count(), 2);
        assert_eq!(registry.revoked_count(), 1);
        assert_eq!(registry.live_count(), 1);
    }

    #[tokio::test]
    async fn process_failure_discards_file_id() {
        let (mut pipeline, backend, registry) = pipeline();
        backend
            .push_upload(Ok(upload_response("f1", "a.mp3")))
            .push_process(Err(ClientError::Http {
                status: 400,
                message: "Unsupported file type".into(),
            }));

        let err = pipeline
            .upload(file("a.mp3"), Some("tok"))
            .await
            .expect_err("must fail");

        assert_eq!(err.user_message(), "Unsupported file type");
        assert_eq!(pipeline.status(), PipelineStatus::Error);
        assert_eq!(pipeline.last_error(), Some("Unsupported file type"));
        assert!(pipeline.active_file_id().is_none());
        assert_eq!(registry.created_count(), 0);
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn upload_failure_skips_processing() {
        let (mut pipeline, backend, _) = pipeline();
        backend.push_upload(Err(ClientError::Network("connection refused".into())));

        assert!(pipeline.upload(file("a.wav"), None).await.is_err());
        assert_eq!(pipeline.status(), PipelineStatus::Error);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn accepted_upload_releases_old_artifact_even_if_it_fails() {
        let (mut pipeline, backend, registry) = pipeline();
        backend
            .push_upload(Ok(upload_response("f1", "a.pdf")))
            .push_process(Ok(processed()))
            .push_upload(Err(ClientError::Network("reset".into())));
        pipeline.upload(file("a.pdf"), None).await.expect("first");

        assert!(pipeline.upload(file("b.pdf"), None).await.is_err());
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.revoked_count(), 1);
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let (mut pipeline, backend, registry) = pipeline();
        backend
            .push_upload(Ok(upload_response("f1", "a.pdf")))
            .push_process(Ok(processed()));
        pipeline.upload(file("a.pdf"), None).await.expect("upload");

        pipeline.clear();
        pipeline.clear();

        assert_eq!(pipeline.status(), PipelineStatus::Empty);
        assert_eq!(registry.revoked_count(), 1);
        assert_eq!(registry.live_count(), 0);
    }

    #[tokio::test]
    async fn dropping_pipeline_releases_handle() {
        let (mut pipeline, backend, registry) = pipeline();
        backend
            .push_upload(Ok(upload_response("f1", "a.pdf")))
            .push_process(Ok(processed()));
        pipeline.upload(file("a.pdf"), None).await.expect("upload");

        drop(pipeline);
        assert_eq!(registry.live_count(), 0);
    }

    #[tokio::test]
    async fn upload_selected_consumes_selection() {
        let (mut pipeline, backend, _) = pipeline();
        backend
            .push_upload(Ok(upload_response("f1", "a.pdf")))
            .push_process(Ok(processed()));

        assert!(pipeline.upload_selected(None).await.is_err());
        pipeline.select(file("a.pdf")).expect("select");
        pipeline.upload_selected(None).await.expect("upload");
        assert!(pipeline.selected().is_none());
    }

    #[tokio::test]
    async fn reprocess_requires_active_file() {
        let (mut pipeline, backend, _) = pipeline();
        assert!(matches!(
            pipeline.reprocess(None).await,
            Err(ClientError::Validation(_))
        ));

        backend
            .push_upload(Ok(upload_response("f1", "a.pdf")))
            .push_process(Ok(processed()))
            .push_process(Ok(processed()));
        pipeline.upload(file("a.pdf"), Some("tok")).await.expect("upload");
        pipeline.reprocess(Some("tok")).await.expect("reprocess");
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn seeking_only_applies_to_media() {
        let (mut pipeline, backend, _) = pipeline();
        backend
            .push_upload(Ok(upload_response("f1", "a.pdf")))
            .push_process(Ok(processed()))
            .push_upload(Ok(upload_response("f2", "b.mp3")))
            .push_process(Ok(processed()));
        let range = TimeRange::new(12.0, 20.0).expect("range");

        pipeline.upload(file("a.pdf"), None).await.expect("pdf");
        assert!(pipeline.seek(&range).is_none());

        pipeline.upload(file("b.mp3"), None).await.expect("mp3");
        let command = pipeline.seek(&range).expect("seek");
        assert_eq!(command.position, 12.0);
        assert_eq!(command.file_type, FileType::Audio);
    }

    #[tokio::test]
    async fn open_reads_file_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("Interview.MP3");
        std::fs::write(&path, b"ID3data").expect("seed");
        let (pipeline, _, _) = pipeline();

        let source = pipeline.open(&path).await.expect("open");
        assert_eq!(source.name(), "Interview.MP3");
        assert_eq!(source.size(), 7);
        assert_eq!(source.file_type(), Some(FileType::Audio));

        assert!(pipeline.open(dir.path().join("missing.pdf")).await.is_err());
        assert!(pipeline.open(dir.path()).await.is_err());
    }

    #[test]
    fn file_sizes_are_human_readable() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
    }
}
