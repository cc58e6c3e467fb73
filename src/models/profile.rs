// 服务器配置档案（持久化用）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{storage_keys, DEFAULT_PORT};
use crate::ssh::config::Target;

/// 认证方式
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AuthMethod {
    #[default]
    Password,
    SshKey,
}

impl AuthMethod {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Password => "Password",
            Self::SshKey => "SSH Key",
        }
    }
}

/// 服务器档案
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerProfile {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: AuthMethod,
    /// 导入的私钥文件名（仅用于展示）
    pub private_key_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl ServerProfile {
    pub fn new(name: &str, host: &str, port: u16, username: &str, auth_method: AuthMethod) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            host: host.trim().to_string(),
            port,
            username: username.trim().to_string(),
            auth_method,
            private_key_name: None,
            created_at: Utc::now(),
            last_connected_at: None,
        }
    }

    /// 连接目标
    pub fn target(&self) -> Target {
        Target::new(&self.host, self.port, &self.username)
    }

    /// 展示用地址（默认端口省略）
    pub fn display_host(&self) -> String {
        if self.port == DEFAULT_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn password_key(&self) -> String {
        format!("{}.{}", storage_keys::PASSWORD_PREFIX, self.id)
    }

    pub fn private_key_key(&self) -> String {
        format!("{}.{}", storage_keys::PRIVATE_KEY_PREFIX, self.id)
    }

    pub fn passphrase_key(&self) -> String {
        format!("{}.{}", storage_keys::PASSPHRASE_PREFIX, self.id)
    }

    /// 校验档案字段
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.name.trim().is_empty() {
            return Err(ProfileError::MissingField("name"));
        }
        if self.host.trim().is_empty() {
            return Err(ProfileError::MissingField("host"));
        }
        if self.username.trim().is_empty() {
            return Err(ProfileError::MissingField("username"));
        }
        if self.port == 0 {
            return Err(ProfileError::InvalidPort);
        }
        Ok(())
    }
}

/// 档案校验错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Port must be between 1 and 65535")]
    InvalidPort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_host() {
        let mut profile = ServerProfile::new("web", "example.com", 22, "root", AuthMethod::Password);
        assert_eq!(profile.display_host(), "example.com");
        profile.port = 2222;
        assert_eq!(profile.display_host(), "example.com:2222");
    }

    #[test]
    fn test_credential_keys_are_per_profile() {
        let profile = ServerProfile::new("web", "example.com", 22, "root", AuthMethod::SshKey);
        assert_eq!(
            profile.password_key(),
            format!("terma.password.{}", profile.id)
        );
        assert_eq!(
            profile.private_key_key(),
            format!("terma.privatekey.{}", profile.id)
        );
        assert_eq!(
            profile.passphrase_key(),
            format!("terma.passphrase.{}", profile.id)
        );
    }

    #[test]
    fn test_validate() {
        let profile = ServerProfile::new("  web ", " example.com ", 22, " root ", AuthMethod::Password);
        assert_eq!(profile.host, "example.com");
        assert!(profile.validate().is_ok());

        let mut blank = profile.clone();
        blank.host = "   ".to_string();
        assert_eq!(blank.validate(), Err(ProfileError::MissingField("host")));

        let mut bad_port = profile;
        bad_port.port = 0;
        assert_eq!(bad_port.validate(), Err(ProfileError::InvalidPort));
    }
}
