use std::path::Path;
use std::sync::Arc;

use chat_engine::ChatEngine;
use core_types::{
    BackendApi, ClientError, ClientResult, FileId, Message, SessionState, SourceFile, TimeRange,
    UserRecord,
};
use file_pipeline::{FilePipeline, ResourceRegistry, SeekCommand};
use parking_lot::Mutex;
use serde_json::Value;
use session::SessionStore;
use tracing::info;
use transport::AuthBridge;

use crate::Notice;

/// One signed-in user working on one file at a time.
///
/// Every operation ends by reconciling with the session: once the session is
/// gone, whether by logout or by a rejected token, the active file and its
/// resource handle are released.
pub struct QaClient {
    session: Arc<SessionStore>,
    pipeline: FilePipeline,
    chat: ChatEngine,
    bridge: Arc<AuthBridge>,
    notices: Arc<Mutex<Vec<Notice>>>,
    was_authenticated: bool,
}

impl QaClient {
    pub(crate) fn assemble(
        session: Arc<SessionStore>,
        backend: Arc<dyn BackendApi>,
        registry: Arc<dyn ResourceRegistry>,
        max_file_bytes: u64,
        bridge: Arc<AuthBridge>,
        notices: Arc<Mutex<Vec<Notice>>>,
    ) -> Self {
        let was_authenticated = session.is_authenticated();
        Self {
            pipeline: FilePipeline::new(backend.clone(), registry, max_file_bytes),
            chat: ChatEngine::new(backend),
            session,
            bridge,
            notices,
            was_authenticated,
        }
    }

    pub fn session(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn pipeline(&self) -> &FilePipeline {
        &self.pipeline
    }

    pub fn chat(&self) -> &ChatEngine {
        &self.chat
    }

    pub fn bridge(&self) -> &Arc<AuthBridge> {
        &self.bridge
    }

    /// Drains notices raised since the last call.
    pub fn take_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.notices.lock())
    }

    pub async fn login(&mut self, email: &str, password: &str) -> ClientResult<UserRecord> {
        let result = self.session.login(email, password).await;
        self.reconcile();
        result
    }

    pub async fn signup(&mut self, email: &str, password: &str) -> ClientResult<UserRecord> {
        let result = self.session.signup(email, password).await;
        self.reconcile();
        result
    }

    pub fn logout(&mut self) -> bool {
        let ended = self.session.logout();
        self.reconcile();
        ended
    }

    pub async fn open(&self, path: impl AsRef<Path>) -> ClientResult<SourceFile> {
        self.pipeline.open(path).await
    }

    pub fn select(&mut self, file: SourceFile) -> ClientResult<()> {
        self.pipeline.select(file)
    }

    pub fn deselect(&mut self) {
        self.pipeline.deselect();
    }

    pub async fn upload(&mut self, file: SourceFile) -> ClientResult<FileId> {
        let token = self.require_token()?;
        let result = self
            .pipeline
            .upload(file, Some(token.as_str()))
            .await
            .map(|artifact| artifact.file_id.clone());
        self.after_upload(result)
    }

    pub async fn upload_selected(&mut self) -> ClientResult<FileId> {
        let token = self.require_token()?;
        let result = self
            .pipeline
            .upload_selected(Some(token.as_str()))
            .await
            .map(|artifact| artifact.file_id.clone());
        self.after_upload(result)
    }

    pub async fn reprocess(&mut self) -> ClientResult<Value> {
        let token = self.require_token()?;
        let result = self.pipeline.reprocess(Some(token.as_str())).await;
        self.reconcile();
        result
    }

    pub fn clear_file(&mut self) {
        self.pipeline.clear();
    }

    /// Asks about the active file. The question stays in the transcript even
    /// when the request fails.
    pub async fn ask(&mut self, question: &str) -> ClientResult<Message> {
        let token = self.require_token()?;
        let file_id = self
            .pipeline
            .active_file_id()
            .map(str::to_string)
            .ok_or_else(|| ClientError::validation("upload a file first"))?;
        let result = self
            .chat
            .ask(question, &file_id, Some(token.as_str()))
            .await
            .cloned();
        self.reconcile();
        result
    }

    pub fn clear_chat(&mut self) {
        self.chat.clear_chat();
    }

    pub fn seek(&self, range: &TimeRange) -> Option<SeekCommand> {
        self.pipeline.seek(range)
    }

    fn require_token(&self) -> ClientResult<String> {
        self.session
            .token()
            .ok_or_else(|| ClientError::validation("sign in first"))
    }

    fn after_upload(&mut self, result: ClientResult<FileId>) -> ClientResult<FileId> {
        self.reconcile();
        if let Ok(file_id) = &result {
            self.chat.bind(file_id);
        }
        result
    }

    fn reconcile(&mut self) {
        let authenticated = self.session.is_authenticated();
        if self.was_authenticated && !authenticated {
            info!("session ended; releasing active file");
            self.pipeline.clear();
        }
        self.was_authenticated = authenticated;
    }
}
