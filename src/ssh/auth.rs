// 认证策略
// 每次连接只提交一次认证，之后不再提供，让传输层干净地失败而不是反复重试

use std::sync::Arc;

use russh::keys::PrivateKey;
use russh::MethodKind;
use tracing::debug;
use zeroize::Zeroizing;

use super::config::Credential;
use super::error::SshError;
use super::private_key::{self, KeyType};

/// 服务器声明可用的认证方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdvertisedMethods {
    pub password: bool,
    pub public_key: bool,
}

impl AdvertisedMethods {
    pub fn from_methods(methods: &[MethodKind]) -> Self {
        Self {
            password: methods.contains(&MethodKind::Password),
            public_key: methods.contains(&MethodKind::PublicKey),
        }
    }
}

/// 一次认证提交
pub enum AuthOffer {
    Password {
        username: String,
        password: Zeroizing<String>,
    },
    PublicKey {
        username: String,
        key: Arc<PrivateKey>,
        key_type: KeyType,
    },
}

impl AuthOffer {
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Password { .. } => "password",
            Self::PublicKey { .. } => "publickey",
        }
    }
}

/// 认证策略
pub enum AuthStrategy {
    Password {
        username: String,
        password: Zeroizing<String>,
        attempted: bool,
    },
    Key {
        username: String,
        key: Arc<PrivateKey>,
        key_type: KeyType,
        attempted: bool,
    },
}

impl AuthStrategy {
    /// 按凭据类型构建策略
    ///
    /// 秘密为空时直接返回 `AuthenticationFailed`；私钥在这里解析，
    /// 解析错误同样发生在任何网络操作之前。
    pub fn for_credential(username: &str, credential: &Credential) -> Result<Self, SshError> {
        if credential.is_empty() {
            debug!("[Auth] Empty {} credential", credential.kind());
            return Err(SshError::AuthenticationFailed);
        }

        match credential {
            Credential::Password(password) => Ok(Self::Password {
                username: username.to_string(),
                password: password.clone(),
                attempted: false,
            }),
            Credential::PrivateKey { bytes, passphrase } => {
                let parsed = private_key::parse(bytes, passphrase.as_ref().map(|p| p.as_str()))?;
                debug!(
                    "[Auth] Loaded {} key ({:?})",
                    parsed.key_type, parsed.decode_path
                );
                Ok(Self::Key {
                    username: username.to_string(),
                    key: Arc::new(parsed.key),
                    key_type: parsed.key_type,
                    attempted: false,
                })
            }
        }
    }

    /// 下一次认证提交
    ///
    /// 服务器未声明本策略需要的认证方式，或已经提交过一次时返回 None。
    pub fn next_offer(&mut self, methods: &AdvertisedMethods) -> Option<AuthOffer> {
        match self {
            Self::Password {
                username,
                password,
                attempted,
            } => {
                if *attempted || !methods.password {
                    return None;
                }
                *attempted = true;
                Some(AuthOffer::Password {
                    username: username.clone(),
                    password: password.clone(),
                })
            }
            Self::Key {
                username,
                key,
                key_type,
                attempted,
            } => {
                if *attempted || !methods.public_key {
                    return None;
                }
                *attempted = true;
                Some(AuthOffer::PublicKey {
                    username: username.clone(),
                    key: key.clone(),
                    key_type: *key_type,
                })
            }
        }
    }

    pub fn has_attempted(&self) -> bool {
        match self {
            Self::Password { attempted, .. } | Self::Key { attempted, .. } => *attempted,
        }
    }
}
