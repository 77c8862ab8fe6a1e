//! Scripted [`BackendApi`] for component tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};

use crate::{
    AuthResponse, BackendApi, ChatRequest, ChatResponse, ClientError, ClientResult, Credentials,
    RawTimeRange, SourceFile, UploadResponse, UserRecord,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Login { email: String },
    Register { email: String },
    Upload { filename: String, token: Option<String> },
    Process { file_id: String, token: Option<String> },
    Chat { question: String, file_id: String, token: Option<String> },
}

/// Each call kind pops its own queue; an empty queue yields a network error.
#[derive(Default)]
pub struct ScriptedBackend {
    login: Mutex<VecDeque<ClientResult<AuthResponse>>>,
    register: Mutex<VecDeque<ClientResult<AuthResponse>>>,
    upload: Mutex<VecDeque<ClientResult<UploadResponse>>>,
    process: Mutex<VecDeque<ClientResult<Value>>>,
    chat: Mutex<VecDeque<ClientResult<ChatResponse>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_login(&self, result: ClientResult<AuthResponse>) -> &Self {
        self.login.lock().push_back(result);
        self
    }

    pub fn push_register(&self, result: ClientResult<AuthResponse>) -> &Self {
        self.register.lock().push_back(result);
        self
    }

    pub fn push_upload(&self, result: ClientResult<UploadResponse>) -> &Self {
        self.upload.lock().push_back(result);
        self
    }

    pub fn push_process(&self, result: ClientResult<Value>) -> &Self {
        self.process.lock().push_back(result);
        self
    }

    pub fn push_chat(&self, result: ClientResult<ChatResponse>) -> &Self {
        self.chat.lock().push_back(result);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

fn next<T>(queue: &Mutex<VecDeque<ClientResult<T>>>, what: &str) -> ClientResult<T> {
    queue
        .lock()
        .pop_front()
        .unwrap_or_else(|| Err(ClientError::Network(format!("no scripted {what} response"))))
}

#[async_trait]
impl BackendApi for ScriptedBackend {
    async fn login(&self, credentials: &Credentials) -> ClientResult<AuthResponse> {
        self.record(Call::Login {
            email: credentials.email.clone(),
        });
        next(&self.login, "login")
    }

    async fn register(&self, credentials: &Credentials) -> ClientResult<AuthResponse> {
        self.record(Call::Register {
            email: credentials.email.clone(),
        });
        next(&self.register, "register")
    }

    async fn upload_file(
        &self,
        file: &SourceFile,
        token: Option<&str>,
    ) -> ClientResult<UploadResponse> {
        self.record(Call::Upload {
            filename: file.name().to_string(),
            token: token.map(str::to_string),
        });
        next(&self.upload, "upload")
    }

    async fn process_file(&self, file_id: &str, token: Option<&str>) -> ClientResult<Value> {
        self.record(Call::Process {
            file_id: file_id.to_string(),
            token: token.map(str::to_string),
        });
        next(&self.process, "process")
    }

    async fn chat(&self, request: &ChatRequest, token: Option<&str>) -> ClientResult<ChatResponse> {
        self.record(Call::Chat {
            question: request.question.clone(),
            file_id: request.file_id.clone(),
            token: token.map(str::to_string),
        });
        next(&self.chat, "chat")
    }
}

pub fn user(id: &str, email: &str) -> UserRecord {
    UserRecord {
        id: id.to_string(),
        email: Some(email.to_string()),
        extra: Map::new(),
    }
}

pub fn auth_response(id: &str, email: &str, token: &str) -> AuthResponse {
    AuthResponse {
        access_token: Some(token.to_string()),
        user: user(id, email),
    }
}

pub fn upload_response(file_id: &str, filename: &str) -> UploadResponse {
    UploadResponse {
        file_id: file_id.to_string(),
        filename: filename.to_string(),
        file_type: filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default(),
    }
}

pub fn processed() -> Value {
    json!({"message": "processed"})
}

pub fn chat_response(answer: &str, sources: &[(f64, f64)]) -> ChatResponse {
    ChatResponse {
        answer: Some(answer.to_string()),
        sources: Some(
            sources
                .iter()
                .map(|&(start, end)| RawTimeRange {
                    start: Some(start),
                    end: Some(end),
                })
                .collect(),
        ),
    }
}
