use std::fmt::Write;
use std::path::PathBuf;

use anyhow::{Result, bail};
use client::QaClient;
use core_types::{ClientError, Role, format_timestamp};
use file_pipeline::{PipelineStatus, format_file_size};
use i18n::I18n;

pub const HELP: &str = "\
commands:
  login <email> <password>    sign in
  signup <email> <password>   create an account and sign in
  logout                      sign out
  select <path>               pick a .pdf/.mp3/.wav/.mp4 file
  upload [path]               upload and process the picked (or given) file
  reprocess                   process the active file again
  clear                       drop the active file
  ask <question>              ask about the active file
  chat-clear                  empty the transcript
  seek <n>                    jump to citation n of the latest answer
  status                      show session, file and chat state
  help                        show this text
  quit                        leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { email: String, password: String },
    Signup { email: String, password: String },
    Logout,
    Select(PathBuf),
    Upload(Option<PathBuf>),
    Reprocess,
    Clear,
    Ask(String),
    ChatClear,
    Seek(usize),
    Status,
    Help,
    Quit,
}

impl Command {
    /// Blank lines parse to `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (verb, rest) = line
            .split_once(char::is_whitespace)
            .map(|(verb, rest)| (verb, rest.trim()))
            .unwrap_or((line, ""));

        let command = match verb {
            "login" | "signup" => {
                let mut parts = rest.split_whitespace();
                let (Some(email), Some(password), None) = (parts.next(), parts.next(), parts.next())
                else {
                    bail!("usage: {verb} <email> <password>");
                };
                let (email, password) = (email.to_string(), password.to_string());
                if verb == "login" {
                    Self::Login { email, password }
                } else {
                    Self::Signup { email, password }
                }
            }
            "logout" => Self::Logout,
            "select" if !rest.is_empty() => Self::Select(PathBuf::from(rest)),
            "select" => bail!("usage: select <path>"),
            "upload" => Self::Upload((!rest.is_empty()).then(|| PathBuf::from(rest))),
            "reprocess" => Self::Reprocess,
            "clear" => Self::Clear,
            "ask" if !rest.is_empty() => Self::Ask(rest.to_string()),
            "ask" => bail!("usage: ask <question>"),
            "chat-clear" => Self::ChatClear,
            "seek" => match rest.parse::<usize>() {
                Ok(index) if index > 0 => Self::Seek(index),
                _ => bail!("usage: seek <n>, n counts from 1"),
            },
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => bail!("unknown command `{other}`; try `help`"),
        };
        Ok(Some(command))
    }
}

pub struct Shell {
    client: QaClient,
    i18n: I18n,
}

impl Shell {
    pub fn new(client: QaClient, i18n: I18n) -> Self {
        Self { client, i18n }
    }

    /// Runs one command and returns what to print, notices included.
    pub async fn execute(&mut self, command: Command) -> String {
        let mut out = match self.run(command).await {
            Ok(text) => text,
            Err(err) => line(self.i18n.error_banner(&err)),
        };
        out.push_str(&self.render_notices());
        out
    }

    pub fn render_notices(&self) -> String {
        self.client
            .take_notices()
            .into_iter()
            .map(|notice| line(format!("! {}", self.i18n.t(notice.message_key()))))
            .collect()
    }

    async fn run(&mut self, command: Command) -> Result<String, ClientError> {
        let text = match command {
            Command::Login { email, password } => {
                let user = self.client.login(&email, &password).await?;
                line(format!(
                    "{}: {}",
                    self.i18n.t("notice.signed_in"),
                    user.email.as_deref().unwrap_or(&user.id)
                ))
            }
            Command::Signup { email, password } => {
                let user = self.client.signup(&email, &password).await?;
                line(format!(
                    "{}: {}",
                    self.i18n.t("notice.signed_in"),
                    user.email.as_deref().unwrap_or(&user.id)
                ))
            }
            Command::Logout => {
                self.client.logout();
                line(self.i18n.t("notice.signed_out"))
            }
            Command::Select(path) => {
                let file = self.client.open(&path).await?;
                let summary = format!(
                    "{}: {} ({})",
                    self.i18n.t("status.selected"),
                    file.name(),
                    format_file_size(file.size())
                );
                self.client.select(file)?;
                line(summary)
            }
            Command::Upload(path) => {
                let file_id = match path {
                    Some(path) => {
                        let file = self.client.open(&path).await?;
                        self.client.upload(file).await?
                    }
                    None => self.client.upload_selected().await?,
                };
                line(format!("{} [{file_id}]", self.i18n.t("notice.file_ready")))
            }
            Command::Reprocess => {
                self.client.reprocess().await?;
                line(self.i18n.t("notice.file_ready"))
            }
            Command::Clear => {
                self.client.clear_file();
                line(self.i18n.t("notice.file_cleared"))
            }
            Command::Ask(question) => {
                let reply = self.client.ask(&question).await?;
                let speaker = self.i18n.t("chat.assistant");
                let mut text = line(format!("{speaker}: {}", reply.content));
                for (index, source) in reply.sources.iter().enumerate() {
                    let _ = writeln!(text, "  [{}] {}", index + 1, source.label());
                }
                text
            }
            Command::ChatClear => {
                self.client.clear_chat();
                line(self.i18n.t("notice.chat_cleared"))
            }
            Command::Seek(index) => self.seek(index),
            Command::Status => self.status(),
            Command::Help => line(HELP),
            Command::Quit => String::new(),
        };
        Ok(text)
    }

    fn seek(&self, index: usize) -> String {
        let citation = self
            .client
            .chat()
            .messages()
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
            .and_then(|message| message.sources.get(index.checked_sub(1)?));
        let Some(range) = citation else {
            return line(format!("no citation [{index}] in the latest answer"));
        };
        match self.client.seek(range) {
            Some(target) => line(format!(
                "{} {} @ {}",
                target.file_type,
                target.resource_url,
                format_timestamp(target.position)
            )),
            None => line(self.i18n.t("seek.unavailable")),
        }
    }

    fn status(&self) -> String {
        let mut text = String::new();
        let session = self.client.session();
        let who = session
            .user()
            .map(|user| user.email.clone().unwrap_or_else(|| user.id.clone()));
        let _ = writeln!(
            text,
            "session: {}",
            who.as_deref().unwrap_or(self.i18n.t("notice.signed_out"))
        );

        let pipeline = self.client.pipeline();
        let _ = writeln!(text, "file: {}", self.i18n.t(status_key(pipeline.status())));
        if let Some(file) = pipeline.selected() {
            let _ = writeln!(
                text,
                "  {}: {} ({})",
                self.i18n.t("status.selected"),
                file.name(),
                format_file_size(file.size())
            );
        }
        if let Some(artifact) = pipeline.artifact() {
            let _ = writeln!(
                text,
                "  {} [{}] {}",
                artifact.filename, artifact.file_id, artifact.file_type
            );
        }
        if let Some(err) = pipeline.last_error() {
            let _ = writeln!(text, "  {}: {err}", self.i18n.t("status.error"));
        }

        let chat = self.client.chat();
        if chat.messages().is_empty() {
            let _ = writeln!(text, "chat: {}", self.i18n.t("chat.empty"));
        }
        for message in chat.messages() {
            let speaker = match message.role {
                Role::User => self.i18n.t("chat.you"),
                Role::Assistant => self.i18n.t("chat.assistant"),
            };
            let _ = writeln!(text, "  {speaker}: {}", message.content);
        }
        if let Some(err) = chat.last_error() {
            let _ = writeln!(text, "  {}: {err}", self.i18n.t("status.error"));
        }
        text
    }
}

fn status_key(status: PipelineStatus) -> &'static str {
    match status {
        PipelineStatus::Empty => "status.empty",
        PipelineStatus::Selected => "status.selected",
        PipelineStatus::Uploading => "status.uploading",
        PipelineStatus::Ready => "status.ready",
        PipelineStatus::Error => "status.error",
    }
}

fn line(text: impl AsRef<str>) -> String {
    format!("{}\n", text.as_ref())
}
