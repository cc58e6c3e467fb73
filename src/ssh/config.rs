// SSH 连接配置

use std::fmt;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::models::AppSettings;

/// 连接目标
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    /// 目标主机
    pub host: String,
    /// 端口
    pub port: u16,
    /// 用户名
    pub username: String,
}

impl Target {
    pub fn new(host: &str, port: u16, username: &str) -> Self {
        Self {
            host: host.trim().to_string(),
            port,
            username: username.trim().to_string(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// 认证凭据
///
/// 秘密内容保存在 `Zeroizing` 缓冲区中，释放时清零；`Debug` 输出不含秘密。
#[derive(Clone)]
pub enum Credential {
    /// 密码认证
    Password(Zeroizing<String>),
    /// 公钥认证
    PrivateKey {
        /// 私钥原始内容（PEM / OpenSSH 文本）
        bytes: Zeroizing<Vec<u8>>,
        /// 私钥密码（如果有）
        passphrase: Option<Zeroizing<String>>,
    },
}

impl Credential {
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password(Zeroizing::new(password.into()))
    }

    pub fn private_key(bytes: impl Into<Vec<u8>>, passphrase: Option<String>) -> Self {
        Self::PrivateKey {
            bytes: Zeroizing::new(bytes.into()),
            passphrase: passphrase.map(Zeroizing::new),
        }
    }

    /// 秘密内容是否为空
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Password(password) => password.is_empty(),
            Self::PrivateKey { bytes, .. } => bytes.is_empty(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Password(_) => "password",
            Self::PrivateKey { .. } => "publickey",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Credential::Password(<redacted>)"),
            Self::PrivateKey { bytes, passphrase } => f
                .debug_struct("Credential::PrivateKey")
                .field("len", &bytes.len())
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// PTY 请求参数
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PtyRequest {
    /// 终端类型
    pub term: String,
    /// 列数
    pub cols: u32,
    /// 行数
    pub rows: u32,
}

/// 单个传输会话的配置
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// 连接超时（秒）
    pub connect_timeout: u64,
    /// 心跳间隔（秒），0 表示关闭
    pub keepalive_interval: u64,
    /// 心跳最大无响应次数
    pub keepalive_max: usize,
    /// 初始 PTY 参数
    pub pty: PtyRequest,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_settings(&AppSettings::default())
    }
}

impl SessionConfig {
    /// 从应用设置构建
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            connect_timeout: settings.connection.connection_timeout_secs as u64,
            keepalive_interval: settings.connection.keepalive_interval_secs as u64,
            keepalive_max: 3,
            pty: PtyRequest {
                term: settings.terminal.term_type.clone(),
                cols: settings.terminal.cols,
                rows: settings.terminal.rows,
            },
        }
    }

    /// 构建 russh 配置
    pub fn to_russh_config(&self) -> russh::client::Config {
        let mut config = russh::client::Config::default();
        if self.keepalive_interval > 0 {
            config.keepalive_interval = Some(Duration::from_secs(self.keepalive_interval));
            config.keepalive_max = self.keepalive_max;
        } else {
            // 关闭心跳时空闲会话不限时；连接超时只作用于建立连接阶段
            config.keepalive_interval = None;
            config.inactivity_timeout = None;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_is_redacted() {
        let password = Credential::password("hunter2");
        assert!(!format!("{:?}", password).contains("hunter2"));

        let key = Credential::private_key(b"SECRET-KEY".to_vec(), Some("pass".into()));
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains("SECRET-KEY"));
        assert!(!rendered.contains("pass\""));
    }

    #[test]
    fn test_empty_credentials() {
        assert!(Credential::password("").is_empty());
        assert!(Credential::private_key(Vec::new(), None).is_empty());
        assert!(!Credential::password("x").is_empty());
    }

    #[test]
    fn test_session_config_from_settings() {
        let mut settings = AppSettings::default();
        settings.terminal.cols = 132;
        settings.connection.keepalive_interval_secs = 0;
        let config = SessionConfig::from_settings(&settings);
        assert_eq!(config.pty.cols, 132);
        assert_eq!(config.pty.rows, 24);

        let russh_config = config.to_russh_config();
        assert!(russh_config.keepalive_interval.is_none());
        assert!(russh_config.inactivity_timeout.is_none());
    }

    #[test]
    fn test_idle_session_without_keepalive_has_no_deadline() {
        let config = SessionConfig {
            connect_timeout: 5,
            keepalive_interval: 0,
            ..SessionConfig::default()
        };
        let russh_config = config.to_russh_config();
        assert!(russh_config.keepalive_interval.is_none());
        assert!(russh_config.inactivity_timeout.is_none());

        let config = SessionConfig {
            keepalive_interval: 15,
            ..SessionConfig::default()
        };
        let russh_config = config.to_russh_config();
        assert_eq!(russh_config.keepalive_interval, Some(Duration::from_secs(15)));
        assert!(russh_config.inactivity_timeout.is_none());
    }
}
