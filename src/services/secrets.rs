// 凭据存储与解析
// SecretStore 是安全键值存储的边界（平台钥匙串在此 trait 之后接入）

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::models::{AuthMethod, ServerProfile};
use crate::ssh::config::Credential;
use crate::ssh::error::SshError;

/// 安全键值存储
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;
    fn put(&self, key: &str, secret: &[u8]) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// 进程内存中的 SecretStore
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, secret: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), Zeroizing::new(secret.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// 凭据来源
///
/// 每个档案三个键：密码、私钥、私钥密码。
#[derive(Clone)]
pub struct CredentialSource {
    store: Arc<dyn SecretStore>,
}

impl CredentialSource {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// 保存档案凭据（先清空旧凭据，再按认证方式写入）
    pub fn save_credentials(
        &self,
        profile: &ServerProfile,
        password: Option<&str>,
        private_key: Option<&[u8]>,
        passphrase: Option<&str>,
    ) -> Result<()> {
        self.delete_all(profile)?;
        match profile.auth_method {
            AuthMethod::Password => {
                if let Some(password) = password {
                    self.store.put(&profile.password_key(), password.as_bytes())?;
                }
            }
            AuthMethod::SshKey => {
                if let Some(key) = private_key {
                    self.store.put(&profile.private_key_key(), key)?;
                }
                if let Some(passphrase) = passphrase.filter(|p| !p.is_empty()) {
                    self.store
                        .put(&profile.passphrase_key(), passphrase.as_bytes())?;
                }
            }
        }
        debug!("[Credentials] Saved credentials for profile {}", profile.id);
        Ok(())
    }

    /// 删除档案的全部凭据
    pub fn delete_all(&self, profile: &ServerProfile) -> Result<()> {
        self.store.delete(&profile.password_key())?;
        self.store.delete(&profile.private_key_key())?;
        self.store.delete(&profile.passphrase_key())?;
        Ok(())
    }

    /// 解析一次连接所需的凭据
    ///
    /// 临时密码优先；否则按档案认证方式读取。缺失的秘密解析为空凭据，
    /// 由认证策略在任何网络操作之前拒绝。
    pub fn resolve(
        &self,
        profile: &ServerProfile,
        temporary_password: Option<&str>,
    ) -> Result<Credential, SshError> {
        if let Some(password) = temporary_password {
            return Ok(Credential::password(password));
        }

        match profile.auth_method {
            AuthMethod::Password => {
                let secret = self.read(&profile.password_key())?;
                let password = secret
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .unwrap_or_default();
                Ok(Credential::password(password))
            }
            AuthMethod::SshKey => {
                let key = self.read(&profile.private_key_key())?;
                let passphrase = self
                    .read(&profile.passphrase_key())?
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
                Ok(Credential::private_key(
                    key.map(|k| k.to_vec()).unwrap_or_default(),
                    passphrase,
                ))
            }
        }
    }

    fn read(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, SshError> {
        self.store.get(key).map_err(|e| {
            warn!("[Credentials] Secret store read failed: {:#}", e);
            SshError::AuthenticationFailed
        })
    }
}
