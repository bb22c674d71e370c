//! Error handling and custom error types
//!
//! Remote-signaled conditions are collapsed into a single [`ApiError`] tagged
//! with an [`ErrorKind`]; everything else (transport, I/O, configuration,
//! cancellation) lives on the crate-level [`Error`].

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Closed set of conditions the image service can signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RequestParamsInvalid,
    RequestFailed,
    TokenExpired,
    FileUrlInvalid,
    FileExceedsSize,
    ChatStreamPushing,
    ContentFiltered,
    ImageGenerationFailed,
    VideoGenerationFailed,
    InsufficientCredits,
}

impl ErrorKind {
    /// Stable numeric code exposed to callers.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::RequestParamsInvalid => -2000,
            ErrorKind::RequestFailed => -2001,
            ErrorKind::TokenExpired => -2002,
            ErrorKind::FileUrlInvalid => -2003,
            ErrorKind::FileExceedsSize => -2004,
            ErrorKind::ChatStreamPushing => -2005,
            ErrorKind::ContentFiltered => -2006,
            ErrorKind::ImageGenerationFailed => -2007,
            ErrorKind::VideoGenerationFailed => -2008,
            ErrorKind::InsufficientCredits => -2009,
        }
    }

    /// Fixed message the service associates with this kind.
    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::RequestParamsInvalid => "请求参数非法",
            ErrorKind::RequestFailed => "请求失败",
            ErrorKind::TokenExpired => "Token已失效",
            ErrorKind::FileUrlInvalid => "远程文件URL非法",
            ErrorKind::FileExceedsSize => "远程文件超出大小",
            ErrorKind::ChatStreamPushing => "已有对话流正在输出",
            ErrorKind::ContentFiltered => "内容由于合规问题已被阻止生成",
            ErrorKind::ImageGenerationFailed => "图像生成失败",
            ErrorKind::VideoGenerationFailed => "视频生成失败",
            ErrorKind::InsufficientCredits => "即梦积分不足",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message())
    }
}

/// A typed failure reported by (or on behalf of) the image service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub detail: Option<String>,
}

impl ApiError {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, detail: None }
    }

    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    /// The detail if one was attached, otherwise the kind's fixed message.
    pub fn message(&self) -> &str {
        self.detail.as_deref().unwrap_or_else(|| self.kind.message())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.kind, detail),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for ApiError {}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Jimeng API error: {0}")]
    Api(#[from] ApiError),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Upload token unavailable: {0}")]
    UploadTokenUnavailable(String),

    #[error("Upload address unavailable: {0}")]
    UploadAddressUnavailable(String),

    #[error("Image upload rejected (status {status}): {body}")]
    UploadRejected { status: u16, body: String },

    #[error("Generation did not finish within {0:?}")]
    PollTimeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] dotenvy::Error),
}

impl Error {
    /// Shorthand for an [`Error::Api`] with a detail message.
    pub fn api(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Error::Api(ApiError::with_detail(kind, detail))
    }

    /// The taxonomy kind, when this error came from the service.
    pub fn api_kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Api(e) => Some(e.kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable_and_distinct() {
        let kinds = [
            ErrorKind::RequestParamsInvalid,
            ErrorKind::RequestFailed,
            ErrorKind::TokenExpired,
            ErrorKind::FileUrlInvalid,
            ErrorKind::FileExceedsSize,
            ErrorKind::ChatStreamPushing,
            ErrorKind::ContentFiltered,
            ErrorKind::ImageGenerationFailed,
            ErrorKind::VideoGenerationFailed,
            ErrorKind::InsufficientCredits,
        ];
        let codes: Vec<i32> = kinds.iter().map(|k| k.code()).collect();
        assert_eq!(codes, (-2009..=-2000).rev().collect::<Vec<_>>());
    }

    #[test]
    fn test_api_error_message_prefers_detail() {
        let bare = ApiError::new(ErrorKind::ContentFiltered);
        assert_eq!(bare.message(), "内容由于合规问题已被阻止生成");
        assert_eq!(bare.code(), -2006);

        let detailed = ApiError::with_detail(ErrorKind::ImageGenerationFailed, "记录不存在");
        assert_eq!(detailed.message(), "记录不存在");
        assert_eq!(detailed.to_string(), "[-2007] 图像生成失败: 记录不存在");
    }

    #[test]
    fn test_api_kind_only_for_api_errors() {
        let err = Error::api(ErrorKind::InsufficientCredits, "low credit");
        assert_eq!(err.api_kind(), Some(ErrorKind::InsufficientCredits));
        assert_eq!(Error::Cancelled.api_kind(), None);
    }
}
