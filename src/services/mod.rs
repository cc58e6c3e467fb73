// 服务模块
// 进程启动时构建一次，通过句柄传给需要的组件

pub mod host_keys;
pub mod secrets;
pub mod storage;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::models::AppSettings;
use host_keys::HostKeyStore;
use secrets::{CredentialSource, MemorySecretStore, SecretStore};
use storage::{Preferences, ProfileStore};

pub use host_keys::{fingerprint, HostKeyVerdict};

/// 应用服务集合
pub struct AppServices {
    pub preferences: Arc<Preferences>,
    pub trust_store: Arc<HostKeyStore>,
    pub credentials: CredentialSource,
    pub profiles: Arc<ProfileStore>,
    pub settings: AppSettings,
}

impl AppServices {
    /// 基于配置目录构建
    pub fn load(config_dir: &Path, secrets: Arc<dyn SecretStore>) -> Result<Self> {
        let preferences = Arc::new(Preferences::open(config_dir.join("preferences.json")));
        let settings = preferences.load_settings()?;
        Ok(Self {
            trust_store: Arc::new(HostKeyStore::new(preferences.clone())),
            credentials: CredentialSource::new(secrets),
            profiles: Arc::new(ProfileStore::open(config_dir.join("profiles.json"))),
            preferences,
            settings,
        })
    }

    /// 默认配置目录
    pub fn load_default(secrets: Arc<dyn SecretStore>) -> Result<Self> {
        Self::load(&storage::get_config_dir()?, secrets)
    }

    /// 不落盘的服务集合（测试、一次性连接）
    pub fn in_memory(profiles_path: &Path) -> Self {
        let preferences = Arc::new(Preferences::in_memory());
        Self {
            trust_store: Arc::new(HostKeyStore::new(preferences.clone())),
            credentials: CredentialSource::new(Arc::new(MemorySecretStore::new())),
            profiles: Arc::new(ProfileStore::open(profiles_path)),
            preferences,
            settings: AppSettings::default(),
        }
    }

    /// 删除档案及其凭据
    pub fn delete_profile(&self, profile: &crate::models::ServerProfile) -> Result<()> {
        self.credentials.delete_all(profile)?;
        self.profiles.delete_profile(profile.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthMethod, ServerProfile};

    #[test]
    fn test_delete_profile_removes_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = Arc::new(MemorySecretStore::new());
        let services = AppServices::load(dir.path(), secrets.clone()).unwrap();

        let profile = ServerProfile::new("web", "example.com", 22, "root", AuthMethod::Password);
        services.profiles.add_profile(profile.clone()).unwrap();
        services
            .credentials
            .save_credentials(&profile, Some("secret"), None, None)
            .unwrap();

        services.delete_profile(&profile).unwrap();
        assert!(services.profiles.load_profiles().unwrap().is_empty());
        assert!(secrets.get(&profile.password_key()).unwrap().is_none());
    }
}
