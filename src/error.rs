use std::time::Duration;

use crate::codec::CodecError;

/// 连接关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// 对端正常关闭
    Normal,
    /// 连接被重置或中断
    Error(String),
}

/// 统一传输错误类型
#[derive(Debug, thiserror::Error, Clone)]
pub enum TransportError {
    /// 连接相关错误
    #[error("Connection error: {reason} (retryable: {retryable})")]
    Connection {
        reason: String,
        retryable: bool,
    },

    /// 协议相关错误
    #[error("Protocol error ({protocol}): {reason}")]
    Protocol {
        protocol: String,
        reason: String,
    },

    /// 配置相关错误
    #[error("Configuration error in field '{field}': {reason}")]
    Configuration {
        field: String,
        reason: String,
    },

    /// 超时错误
    #[error("Operation '{operation}' timeout after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// 客户端已关闭
    #[error("Client is closed")]
    Closed,
}

impl TransportError {
    /// 判断错误是否可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connection { retryable, .. } => *retryable,
            TransportError::Protocol { .. } => true,
            TransportError::Configuration { .. } => false,
            TransportError::Timeout { .. } => true,
            TransportError::Closed => false,
        }
    }

    /// 获取错误代码
    pub fn error_code(&self) -> &'static str {
        match self {
            TransportError::Connection { .. } => "CONNECTION_ERROR",
            TransportError::Protocol { .. } => "PROTOCOL_ERROR",
            TransportError::Configuration { .. } => "CONFIG_ERROR",
            TransportError::Timeout { .. } => "TIMEOUT_ERROR",
            TransportError::Closed => "CLOSED",
        }
    }
}

/// 便利构造函数
impl TransportError {
    /// 创建连接错误
    pub fn connection_error(reason: impl Into<String>, retryable: bool) -> Self {
        Self::Connection {
            reason: reason.into(),
            retryable,
        }
    }

    /// 创建协议错误
    pub fn protocol_error(protocol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protocol {
            protocol: protocol.into(),
            reason: reason.into(),
        }
    }

    /// 创建配置错误
    pub fn config_error(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// 创建超时错误
    pub fn timeout_error(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }
}

/// 从标准IO错误转换
impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        let retryable = matches!(
            error.kind(),
            std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
        );

        TransportError::Connection {
            reason: format!("IO error: {}", error),
            retryable,
        }
    }
}

impl From<CodecError> for TransportError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Io(io_err) => io_err.into(),
            other => TransportError::protocol_error("frame", other.to_string()),
        }
    }
}
