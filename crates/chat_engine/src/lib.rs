use std::sync::Arc;

use core_types::{
    BackendApi, ChatRequest, ChatResponse, ClientError, ClientResult, FileId, Message, TimeRange,
};
use tracing::{info, warn};

/// Question/answer transcript for the active file.
///
/// Appends are strictly ordered and never rolled back: a failed `ask` leaves
/// its user message in place. Taking `&mut self` keeps at most one `ask` in
/// flight per engine.
pub struct ChatEngine {
    api: Arc<dyn BackendApi>,
    scope: Option<FileId>,
    messages: Vec<Message>,
    loading: bool,
    last_error: Option<String>,
}

impl ChatEngine {
    pub fn new(api: Arc<dyn BackendApi>) -> Self {
        Self {
            api,
            scope: None,
            messages: Vec::new(),
            loading: false,
            last_error: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Points the transcript at `file_id`, emptying it if the file changed.
    pub fn bind(&mut self, file_id: &str) {
        if self.scope.as_deref() == Some(file_id) {
            return;
        }
        if !self.messages.is_empty() {
            info!(
                from = self.scope.as_deref().unwrap_or("-"),
                to = file_id,
                dropped = self.messages.len(),
                "active file changed, clearing transcript"
            );
        }
        self.messages.clear();
        self.last_error = None;
        self.scope = Some(file_id.to_string());
    }

    pub fn clear_chat(&mut self) {
        self.messages.clear();
        self.last_error = None;
    }

    pub async fn ask(
        &mut self,
        question: &str,
        file_id: &str,
        token: Option<&str>,
    ) -> ClientResult<&Message> {
        self.last_error = None;
        if question.trim().is_empty() {
            return Err(self.reject(ClientError::validation("question is empty")));
        }
        if file_id.is_empty() {
            return Err(self.reject(ClientError::validation("upload a file first")));
        }

        self.bind(file_id);
        self.messages.push(Message::user(question));
        self.loading = true;

        let request = ChatRequest {
            question: question.to_string(),
            file_id: file_id.to_string(),
        };
        let result = self.api.chat(&request, token).await;
        self.loading = false;

        match result {
            Ok(response) => {
                let reply = assistant_reply(response);
                info!(file_id, sources = reply.sources.len(), "answer received");
                self.messages.push(reply);
                self.messages.last().ok_or_else(|| {
                    ClientError::MalformedResponse("answer missing from transcript".into())
                })
            }
            Err(err) => {
                warn!(file_id, error = %err, "chat request failed");
                Err(self.reject(err))
            }
        }
    }

    fn reject(&mut self, err: ClientError) -> ClientError {
        self.last_error = Some(err.user_message());
        err
    }
}

fn assistant_reply(response: ChatResponse) -> Message {
    let answer = response.answer.unwrap_or_else(|| {
        warn!("chat response carried no answer");
        String::new()
    });
    let raw = response.sources.unwrap_or_default();
    let total = raw.len();
    let sources: Vec<TimeRange> = raw.into_iter().filter_map(TimeRange::from_raw).collect();
    if sources.len() < total {
        warn!(
            dropped = total - sources.len(),
            "ignoring citations with invalid time ranges"
        );
    }
    Message::assistant(answer, sources)
}
