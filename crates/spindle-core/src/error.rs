use spindle_types::IdentityField;
use thiserror::Error;

/// 协议解码错误
///
/// 负载不是合法的单行 JSON 对象。连接处理器据此回复 NAK。
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Malformed JSON: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("Expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

/// 上报缺少身份字段（`name` 或 `ID`）
///
/// 语法合法但无法聚合，由聚合器记录后丢弃。
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Report is missing identity field '{field}'")]
pub struct MissingIdentityError {
    pub field: IdentityField,
}

impl From<IdentityField> for MissingIdentityError {
    fn from(field: IdentityField) -> Self {
        Self { field }
    }
}

/// Spindle Core 统一错误类型
#[derive(Error, Debug)]
pub enum SpindleError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    MissingIdentity(#[from] MissingIdentityError),

    #[error("Report queue closed")]
    QueueClosed,

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task failed: {0}")]
    Task(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, SpindleError>;

impl SpindleError {
    pub fn config(msg: impl Into<String>) -> Self {
        SpindleError::Config(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SpindleError::Bind { .. } | SpindleError::Config(_))
    }
}
