use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

mod error;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{ClientError, ClientResult};

pub type FileId = String;
pub type MessageId = Uuid;

/// Extensions the backend knows how to process, lower-case and without the dot.
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["pdf", "mp3", "wav", "mp4"];

/// Durable slot holding the bearer token.
pub const TOKEN_SLOT: &str = "auth_token";
/// Durable slot holding the serialized user record.
pub const USER_SLOT: &str = "user";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UiLanguage {
    ZhCn,
    EnUs,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct SecretRef {
    pub namespace: String,
    pub key: String,
}

impl SecretRef {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Document,
    Audio,
    Video,
}

impl FileType {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Document),
            "mp3" | "wav" => Some(Self::Audio),
            "mp4" => Some(Self::Video),
            _ => None,
        }
    }

    /// Maps a file name through its extension.
    pub fn from_file_name(name: &str) -> Option<Self> {
        extension_of(name).as_deref().and_then(Self::from_extension)
    }

    /// Whether the artifact can be played back and seeked.
    pub fn is_media(self) -> bool {
        matches!(self, Self::Audio | Self::Video)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file picked by the user, held in memory until it is uploaded.
#[derive(Clone)]
pub struct SourceFile {
    name: String,
    path: Option<PathBuf>,
    data: Arc<[u8]>,
}

impl SourceFile {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            path: None,
            data: Arc::from(data.into()),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn extension(&self) -> Option<String> {
        extension_of(&self.name)
    }

    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_file_name(&self.name)
    }
}

/// Lower-cased text after the last dot, if the name has one.
pub fn extension_of(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

impl fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("size", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user: UserRecord,
    pub token: String,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn email(&self) -> Option<&str> {
        self.user.email.as_deref()
    }
}

/// A token exists exactly when the state is `Authenticated`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticated(Session),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Authenticated(session) => Some(&session.token),
            Self::Unauthenticated => None,
        }
    }

    pub fn user(&self) -> Option<&UserRecord> {
        match self {
            Self::Authenticated(session) => Some(&session.user),
            Self::Unauthenticated => None,
        }
    }
}

#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    pub user: UserRecord,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UploadResponse {
    pub file_id: FileId,
    pub filename: String,
    pub file_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub question: String,
    pub file_id: FileId,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub sources: Option<Vec<RawTimeRange>>,
}

/// Citation as the backend sends it; either bound may be missing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RawTimeRange {
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "TimeRangeRepr")]
pub struct TimeRange {
    start: f64,
    end: f64,
}

#[derive(Deserialize)]
struct TimeRangeRepr {
    start: f64,
    end: f64,
}

impl TryFrom<TimeRangeRepr> for TimeRange {
    type Error = ClientError;

    fn try_from(repr: TimeRangeRepr) -> ClientResult<Self> {
        Self::new(repr.start, repr.end)
    }
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> ClientResult<Self> {
        if !start.is_finite() || !end.is_finite() || start < 0.0 {
            return Err(ClientError::validation(format!(
                "invalid time range {start}..{end}"
            )));
        }
        if start > end {
            return Err(ClientError::validation(format!(
                "time range starts after it ends: {start}..{end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// A missing end collapses the range onto its start.
    pub fn from_raw(raw: RawTimeRange) -> Option<Self> {
        let start = raw.start?;
        Self::new(start, raw.end.unwrap_or(start)).ok()
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn label(&self) -> String {
        format!(
            "{} - {}",
            format_timestamp(self.start),
            format_timestamp(self.end)
        )
    }
}

/// `mm:ss`, seconds floored, minutes zero-padded to two digits.
pub fn format_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<TimeRange>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new_v4(),
            role: Role::User,
            content: content.into(),
            sources: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, sources: Vec<TimeRange>) -> Self {
        Self {
            id: MessageId::new_v4(),
            role: Role::Assistant,
            content: content.into(),
            sources,
            created_at: Utc::now(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// Capability handed to the transport so it can end the session on a 401
/// without knowing who owns it.
pub trait SessionTerminator: Send + Sync {
    fn terminate(&self);
}

/// Minimal key-value port behind which the session is persisted.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> ClientResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> ClientResult<()>;
    fn remove(&self, key: &str) -> ClientResult<()>;
}

/// Typed view of the backend HTTP contract.
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> ClientResult<AuthResponse>;
    async fn register(&self, credentials: &Credentials) -> ClientResult<AuthResponse>;
    async fn upload_file(
        &self,
        file: &SourceFile,
        token: Option<&str>,
    ) -> ClientResult<UploadResponse>;
    async fn process_file(&self, file_id: &str, token: Option<&str>) -> ClientResult<Value>;
    async fn chat(&self, request: &ChatRequest, token: Option<&str>) -> ClientResult<ChatResponse>;
}
