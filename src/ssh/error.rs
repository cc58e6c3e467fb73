// SSH 错误类型定义

use thiserror::Error;

use super::private_key::KeyParseError;

/// SSH 错误类型
#[derive(Debug, Error)]
pub enum SshError {
    /// 网络或协议层失败
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// 认证失败（包括凭据缺失）
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// 服务器拒绝打开会话通道
    #[error("Failed to open session channel")]
    ChannelCreationFailed,

    /// 服务器拒绝 PTY 请求
    #[error("Pseudo-terminal request was rejected")]
    PtyRequestFailed,

    /// 服务器拒绝 Shell 请求
    #[error("Shell request was rejected")]
    ShellRequestFailed,

    /// 会话已断开
    #[error("Session disconnected")]
    Disconnected,

    /// 私钥解析失败
    #[error("Invalid private key: {0}")]
    InvalidKey(#[from] KeyParseError),

    /// 主机密钥校验无法完成（存储失败、确认超时等）
    #[error("Host key verification failed: {0}")]
    HostKeyVerificationFailed(String),

    /// 主机密钥已变化
    #[error("Host key changed (was {old_fingerprint}, now {new_fingerprint})")]
    HostKeyChanged {
        old_fingerprint: String,
        new_fingerprint: String,
    },

    /// 用户拒绝信任主机密钥
    #[error("Host key was rejected")]
    HostKeyRejected,

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 连接超时
    #[error("Connection timeout after {0}s")]
    Timeout(u64),

    /// 会话不处于可连接状态
    #[error("Session is busy")]
    Busy,
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        SshError::ConnectionFailed(e.to_string())
    }
}

impl SshError {
    /// 是否属于主机密钥相关错误
    pub fn is_host_key_error(&self) -> bool {
        matches!(
            self,
            Self::HostKeyVerificationFailed(_) | Self::HostKeyChanged { .. } | Self::HostKeyRejected
        )
    }
}
