use std::sync::Arc;

use async_trait::async_trait;
use core_types::{
    AuthResponse, BackendApi, ChatRequest, ChatResponse, ClientError, ClientResult, Credentials,
    SourceFile, UploadResponse,
};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::info;

use crate::http::{HttpTransport, RequestOptions};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl Endpoints {
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self {
            base: base_url.as_ref().trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn login(&self) -> String {
        format!("{}/auth/login", self.base)
    }

    pub fn register(&self) -> String {
        format!("{}/auth/register", self.base)
    }

    pub fn upload(&self) -> String {
        format!("{}/upload/", self.base)
    }

    pub fn process(&self, file_id: &str) -> String {
        format!("{}/process/{}", self.base, file_id)
    }

    pub fn chat(&self) -> String {
        format!("{}/chat/", self.base)
    }
}

/// [`BackendApi`] over [`HttpTransport`].
pub struct HttpBackend {
    transport: Arc<HttpTransport>,
    endpoints: Endpoints,
}

impl HttpBackend {
    pub fn new(transport: Arc<HttpTransport>, endpoints: Endpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn login(&self, credentials: &Credentials) -> ClientResult<AuthResponse> {
        let data = self
            .transport
            .send(
                &self.endpoints.login(),
                RequestOptions::post().json(credentials_body(credentials)),
            )
            .await?;
        decode(data, "login")
    }

    async fn register(&self, credentials: &Credentials) -> ClientResult<AuthResponse> {
        let data = self
            .transport
            .send(
                &self.endpoints.register(),
                RequestOptions::post().json(credentials_body(credentials)),
            )
            .await?;
        decode(data, "register")
    }

    async fn upload_file(
        &self,
        file: &SourceFile,
        token: Option<&str>,
    ) -> ClientResult<UploadResponse> {
        let mut part = Part::bytes(file.bytes().to_vec()).file_name(file.name().to_string());
        if let Some(mime) = file.extension().as_deref().and_then(mime_for_extension) {
            part = part
                .mime_str(mime)
                .map_err(|err| ClientError::validation(err.to_string()))?;
        }
        let form = Form::new().part("file", part);

        info!(filename = file.name(), size = file.size(), "uploading file");
        let data = self
            .transport
            .send(
                &self.endpoints.upload(),
                RequestOptions::post().multipart(form).token(token),
            )
            .await?;
        decode(data, "upload")
    }

    async fn process_file(&self, file_id: &str, token: Option<&str>) -> ClientResult<Value> {
        self.transport
            .send(
                &self.endpoints.process(file_id),
                RequestOptions::post().token(token),
            )
            .await
    }

    async fn chat(&self, request: &ChatRequest, token: Option<&str>) -> ClientResult<ChatResponse> {
        let body = serde_json::to_value(request)
            .map_err(|err| ClientError::validation(err.to_string()))?;
        let data = self
            .transport
            .send(
                &self.endpoints.chat(),
                RequestOptions::post().json(body).token(token),
            )
            .await?;
        decode(data, "chat")
    }
}

fn credentials_body(credentials: &Credentials) -> Value {
    serde_json::json!({
        "email": credentials.email,
        "password": credentials.password,
    })
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "pdf" => Some("application/pdf"),
        "mp3" => Some("audio/mpeg"),
        "wav" => Some("audio/wav"),
        "mp4" => Some("video/mp4"),
        _ => None,
    }
}

fn decode<T: DeserializeOwned>(data: Value, call: &str) -> ClientResult<T> {
    serde_json::from_value(data)
        .map_err(|err| ClientError::MalformedResponse(format!("{call} response: {err}")))
}

#[cfg(test)]
mod tests {
    use core_types::SessionTerminator;
    use serde_json::json;

    use super::*;
    use crate::AuthBridge;
    use crate::stub::{StubResponse, StubServer};

    fn backend(server: &StubServer) -> HttpBackend {
        let terminator: Arc<dyn SessionTerminator> = Arc::new(AuthBridge::new());
        let transport = Arc::new(HttpTransport::new("svc", terminator));
        HttpBackend::new(transport, Endpoints::new(server.base_url() + "/"))
    }

    #[test]
    fn endpoints_trim_trailing_slash() {
        let endpoints = Endpoints::new("http://api.local/");
        assert_eq!(endpoints.login(), "http://api.local/auth/login");
        assert_eq!(endpoints.register(), "http://api.local/auth/register");
        assert_eq!(endpoints.upload(), "http://api.local/upload/");
        assert_eq!(endpoints.process("f1"), "http://api.local/process/f1");
        assert_eq!(endpoints.chat(), "http://api.local/chat/");
    }

    #[tokio::test]
    async fn login_posts_credentials_and_decodes_session() {
        let server = StubServer::start(vec![StubResponse::json(
            200,
            json!({"access_token": "tok", "refresh_token": "r", "user": {"id": "u1", "email": "a@b.c"}}),
        )])
        .await;

        let response = backend(&server)
            .login(&Credentials::new("a@b.c", "secret1"))
            .await
            .expect("login");

        assert_eq!(response.access_token.as_deref(), Some("tok"));
        assert_eq!(response.user.id, "u1");
        let request = &server.requests()[0];
        assert_eq!(request.path, "/auth/login");
        assert_eq!(
            request.body_json(),
            json!({"email": "a@b.c", "password": "secret1"})
        );
    }

    #[tokio::test]
    async fn upload_sends_file_field_with_token() {
        let server = StubServer::start(vec![StubResponse::json(
            200,
            json!({"file_id": "f1", "filename": "talk.mp3", "file_type": "mp3"}),
        )])
        .await;
        let file = SourceFile::from_bytes("talk.mp3", b"ID3".to_vec());

        let response = backend(&server)
            .upload_file(&file, Some("tok"))
            .await
            .expect("upload");

        assert_eq!(response.file_id, "f1");
        let request = &server.requests()[0];
        assert_eq!(request.path, "/upload/");
        assert_eq!(request.header("authorization"), Some("Bearer tok"));
        let body = request.body_text();
        assert!(body.contains("name=\"file\"; filename=\"talk.mp3\""), "{body}");
        assert!(body.contains("audio/mpeg"), "{body}");
    }

    #[tokio::test]
    async fn chat_sends_question_and_file_id() {
        let server = StubServer::start(vec![StubResponse::json(
            200,
            json!({"answer": "It is about Rust.", "sources": [{"start": 1.0, "end": 4.5}]}),
        )])
        .await;
        let request = ChatRequest {
            question: "What is this about?".into(),
            file_id: "f1".into(),
        };

        let response = backend(&server)
            .chat(&request, Some("tok"))
            .await
            .expect("chat");

        assert_eq!(response.answer.as_deref(), Some("It is about Rust."));
        assert_eq!(response.sources.map(|s| s.len()), Some(1));
        assert_eq!(
            server.requests()[0].body_json(),
            json!({"question": "What is this about?", "file_id": "f1"})
        );
    }

    #[tokio::test]
    async fn process_hits_file_scoped_path() {
        let server =
            StubServer::start(vec![StubResponse::json(200, json!({"chunks": 3}))]).await;

        let ack = backend(&server)
            .process_file("f9", Some("tok"))
            .await
            .expect("process");

        assert_eq!(ack["chunks"], 3);
        assert_eq!(server.requests()[0].path, "/process/f9");
    }

    #[tokio::test]
    async fn missing_fields_are_malformed_responses() {
        let server = StubServer::start(vec![StubResponse::raw(200, "not json")]).await;

        let err = backend(&server)
            .upload_file(&SourceFile::from_bytes("a.pdf", Vec::new()), None)
            .await
            .expect_err("must fail");

        assert!(matches!(err, ClientError::MalformedResponse(_)), "got {err:?}");
    }
}
