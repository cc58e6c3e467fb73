// 本地数据持久化服务

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::constants::{storage_keys, APP_NAME};
use crate::models::{AppSettings, ServerProfile};

/// 获取配置目录路径
/// macOS: ~/Library/Application Support/terma
/// Linux: ~/.config/terma
/// Windows: C:\Users\<用户名>\AppData\Roaming\terma
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Unable to locate the system config directory")?
        .join(APP_NAME);
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir).context("Unable to create the config directory")?;
    }
    Ok(config_dir)
}

// ======================== Preferences（扁平键值文档） ========================

enum Backend {
    File(PathBuf),
    Memory,
}

/// 偏好存储
///
/// 一个 `存储键 -> JSON 值` 的扁平文档。首次访问时整体加载进内存，
/// 每次修改后整体重写。
pub struct Preferences {
    backend: Backend,
    /// None 表示尚未加载
    document: Mutex<Option<Map<String, Value>>>,
}

impl Preferences {
    /// 基于文件的偏好存储
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::File(path.into()),
            document: Mutex::new(None),
        }
    }

    /// 默认位置：配置目录下的 preferences.json
    pub fn open_default() -> Result<Self> {
        Ok(Self::open(get_config_dir()?.join("preferences.json")))
    }

    /// 仅内存（测试或无持久化场景）
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory,
            document: Mutex::new(Some(Map::new())),
        }
    }

    /// 读取某个键
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut document = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        let document = self.ensure_loaded(&mut document)?;
        match document.get(key) {
            Some(value) => {
                let value = serde_json::from_value(value.clone())
                    .with_context(|| format!("Unable to parse preference '{}'", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// 写入某个键并整体落盘
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .with_context(|| format!("Unable to serialize preference '{}'", key))?;
        let mut document = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        let document = self.ensure_loaded(&mut document)?;
        // 先写盘，成功后才替换内存中的文档
        let mut updated = document.clone();
        updated.insert(key.to_string(), value);
        self.persist(&updated)?;
        *document = updated;
        Ok(())
    }

    /// 删除某个键并整体落盘
    pub fn remove(&self, key: &str) -> Result<()> {
        let mut document = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        let document = self.ensure_loaded(&mut document)?;
        if document.contains_key(key) {
            let mut updated = document.clone();
            updated.remove(key);
            self.persist(&updated)?;
            *document = updated;
        }
        Ok(())
    }

    fn ensure_loaded<'a>(
        &self,
        slot: &'a mut Option<Map<String, Value>>,
    ) -> Result<&'a mut Map<String, Value>> {
        if slot.is_none() {
            *slot = Some(self.load()?);
        }
        Ok(slot.get_or_insert_with(Map::new))
    }

    fn load(&self) -> Result<Map<String, Value>> {
        let path = match &self.backend {
            Backend::File(path) => path,
            Backend::Memory => return Ok(Map::new()),
        };
        if !path.exists() {
            return Ok(Map::new());
        }
        let content = fs::read_to_string(path).context("Unable to read preferences file")?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        let document: Map<String, Value> =
            serde_json::from_str(&content).context("Unable to parse preferences file")?;
        debug!("[Storage] Loaded {} preference keys", document.len());
        Ok(document)
    }

    fn persist(&self, document: &Map<String, Value>) -> Result<()> {
        let path = match &self.backend {
            Backend::File(path) => path,
            Backend::Memory => return Ok(()),
        };
        write_json(path, document).context("Unable to write preferences file")
    }

    /// 加载应用设置
    pub fn load_settings(&self) -> Result<AppSettings> {
        Ok(self.get(storage_keys::SETTINGS)?.unwrap_or_default())
    }

    /// 保存应用设置
    pub fn save_settings(&self, settings: &AppSettings) -> Result<()> {
        self.set(storage_keys::SETTINGS, settings)
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)?;
    Ok(())
}

// ======================== 服务器档案持久化 ========================

/// 服务器档案存储（JSON 文件）
pub struct ProfileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ProfileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// 默认位置：配置目录下的 profiles.json
    pub fn open_default() -> Result<Self> {
        Ok(Self::open(get_config_dir()?.join("profiles.json")))
    }

    fn read_all(&self) -> Result<Vec<ServerProfile>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let content = fs::read_to_string(&self.path).context("Unable to read profiles file")?;
        if content.trim().is_empty() {
            return Ok(vec![]);
        }
        serde_json::from_str(&content).context("Unable to parse profiles file")
    }

    fn write_all(&self, profiles: &[ServerProfile]) -> Result<()> {
        write_json(&self.path, profiles).context("Unable to write profiles file")
    }

    /// 加载全部档案（最近连接的在前，其次按名称）
    pub fn load_profiles(&self) -> Result<Vec<ServerProfile>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut profiles = self.read_all()?;
        profiles.sort_by(|a, b| {
            b.last_connected_at
                .cmp(&a.last_connected_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(profiles)
    }

    /// 按 ID 查找
    pub fn get_profile(&self, id: Uuid) -> Result<Option<ServerProfile>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_all()?.into_iter().find(|p| p.id == id))
    }

    /// 添加档案
    pub fn add_profile(&self, profile: ServerProfile) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut profiles = self.read_all()?;
        profiles.push(profile);
        self.write_all(&profiles)
    }

    /// 更新档案
    pub fn update_profile(&self, profile: ServerProfile) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut profiles = self.read_all()?;
        if let Some(pos) = profiles.iter().position(|p| p.id == profile.id) {
            profiles[pos] = profile;
            self.write_all(&profiles)?;
        }
        Ok(())
    }

    /// 删除档案（凭据由调用方通过 CredentialSource 清理）
    pub fn delete_profile(&self, id: Uuid) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut profiles = self.read_all()?;
        profiles.retain(|p| p.id != id);
        self.write_all(&profiles)
    }

    /// 更新最后连接时间
    pub fn update_last_connected(&self, id: Uuid) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut profiles = self.read_all()?;
        if let Some(profile) = profiles.iter_mut().find(|p| p.id == id) {
            profile.last_connected_at = Some(Utc::now());
            self.write_all(&profiles)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuthMethod;
    use std::collections::HashMap;

    #[test]
    fn test_preferences_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");

        let prefs = Preferences::open(&path);
        let mut hosts = HashMap::new();
        hosts.insert("example.com".to_string(), "SHA256:abc".to_string());
        prefs.set("terma.knownHosts", &hosts).unwrap();

        // 新实例从磁盘重新加载
        let reopened = Preferences::open(&path);
        let loaded: HashMap<String, String> = reopened.get("terma.knownHosts").unwrap().unwrap();
        assert_eq!(loaded, hosts);
        assert!(reopened.get::<String>("missing").unwrap().is_none());
    }

    #[test]
    fn test_failed_set_keeps_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        let prefs = Preferences::open(&path);
        prefs.set("a", &1u32).unwrap();

        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        assert!(prefs.set("a", &2u32).is_err());
        assert!(prefs.set("b", &3u32).is_err());
        assert!(prefs.remove("a").is_err());
        assert_eq!(prefs.get::<u32>("a").unwrap(), Some(1));
        assert!(prefs.get::<u32>("b").unwrap().is_none());
    }

    #[test]
    fn test_preferences_remove() {
        let prefs = Preferences::in_memory();
        prefs.set("a", &1u32).unwrap();
        prefs.remove("a").unwrap();
        assert!(prefs.get::<u32>("a").unwrap().is_none());
    }

    #[test]
    fn test_settings_default_when_absent() {
        let prefs = Preferences::in_memory();
        let settings = prefs.load_settings().unwrap();
        assert_eq!(settings.connection.reconnect_attempts, 3);
    }

    #[test]
    fn test_profiles_sorted_by_last_connected_then_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(dir.path().join("profiles.json"));

        let beta = ServerProfile::new("beta", "b.example.com", 22, "root", AuthMethod::Password);
        let alpha = ServerProfile::new("alpha", "a.example.com", 22, "root", AuthMethod::Password);
        let gamma = ServerProfile::new("gamma", "c.example.com", 22, "root", AuthMethod::SshKey);
        store.add_profile(beta.clone()).unwrap();
        store.add_profile(alpha.clone()).unwrap();
        store.add_profile(gamma.clone()).unwrap();
        store.update_last_connected(gamma.id).unwrap();

        let names: Vec<String> = store
            .load_profiles()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["gamma", "alpha", "beta"]);

        store.delete_profile(alpha.id).unwrap();
        assert!(store.get_profile(alpha.id).unwrap().is_none());
        assert_eq!(store.load_profiles().unwrap().len(), 2);
    }
}
