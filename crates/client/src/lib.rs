mod builder;
mod client;

pub use builder::ClientBuilder;
pub use client::QaClient;

/// User-visible events raised outside the call that caused them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    SessionExpired,
}

impl Notice {
    pub fn message_key(self) -> &'static str {
        match self {
            Notice::SessionExpired => "notice.session_expired",
        }
    }
}
