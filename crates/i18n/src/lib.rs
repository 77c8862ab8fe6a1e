use std::collections::BTreeMap;

use core_types::{ClientError, UiLanguage};

#[derive(Debug, Clone)]
pub struct I18n {
    lang: UiLanguage,
    zh_cn: BTreeMap<&'static str, &'static str>,
    en_us: BTreeMap<&'static str, &'static str>,
}

impl I18n {
    pub fn new(lang: UiLanguage) -> Self {
        Self {
            lang,
            zh_cn: zh_cn_map(),
            en_us: en_us_map(),
        }
    }

    pub fn set_language(&mut self, lang: UiLanguage) {
        self.lang = lang;
    }

    pub fn language(&self) -> UiLanguage {
        self.lang
    }

    pub fn t<'a>(&'a self, key: &'a str) -> &'a str {
        let (primary, fallback) = match self.lang {
            UiLanguage::ZhCn => (&self.zh_cn, &self.en_us),
            UiLanguage::EnUs => (&self.en_us, &self.zh_cn),
        };
        primary
            .get(key)
            .or_else(|| fallback.get(key))
            .copied()
            .unwrap_or(key)
    }

    /// Banner text for an error: a translated category prefix plus the
    /// message the backend or validator produced.
    pub fn error_banner(&self, err: &ClientError) -> String {
        let key = match err {
            ClientError::Validation(_) => "error.validation",
            ClientError::Network(_) => "error.network",
            ClientError::Http { .. } => "error.http",
            ClientError::AuthExpired => return self.t("notice.session_expired").to_string(),
            ClientError::MalformedResponse(_) => "error.malformed",
            ClientError::Storage(_) => "error.storage",
        };
        format!("{}: {}", self.t(key), err.user_message())
    }
}

fn zh_cn_map() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        ("app.title", "MediaQA 文档音视频问答"),
        ("notice.session_expired", "登录已过期，请重新登录"),
        ("notice.signed_in", "已登录"),
        ("notice.signed_out", "已退出登录"),
        ("notice.file_ready", "文件已处理，可以开始提问"),
        ("notice.file_cleared", "已移除当前文件"),
        ("notice.chat_cleared", "对话已清空"),
        ("status.empty", "未选择文件"),
        ("status.selected", "已选择"),
        ("status.uploading", "上传处理中…"),
        ("status.ready", "就绪"),
        ("status.error", "出错"),
        ("chat.you", "你"),
        ("chat.assistant", "助手"),
        ("chat.sources", "引用片段"),
        ("chat.empty", "暂无对话"),
        ("error.validation", "输入无效"),
        ("error.network", "网络错误"),
        ("error.http", "请求失败"),
        ("error.malformed", "响应格式错误"),
        ("error.storage", "本地存储错误"),
        ("seek.unavailable", "文档没有可定位的时间轴"),
    ])
}

fn en_us_map() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        ("app.title", "MediaQA document and media Q&A"),
        ("notice.session_expired", "Your session has expired. Please sign in again."),
        ("notice.signed_in", "Signed in"),
        ("notice.signed_out", "Signed out"),
        ("notice.file_ready", "File processed, ask away"),
        ("notice.file_cleared", "Active file removed"),
        ("notice.chat_cleared", "Chat cleared"),
        ("status.empty", "No file selected"),
        ("status.selected", "Selected"),
        ("status.uploading", "Uploading and processing..."),
        ("status.ready", "Ready"),
        ("status.error", "Error"),
        ("chat.you", "You"),
        ("chat.assistant", "Assistant"),
        ("chat.sources", "Sources"),
        ("chat.empty", "No messages yet"),
        ("error.validation", "Invalid input"),
        ("error.network", "Network error"),
        ("error.http", "Request failed"),
        ("error.malformed", "Unexpected response"),
        ("error.storage", "Local storage error"),
        ("seek.unavailable", "Documents have no timeline to seek"),
    ])
}
