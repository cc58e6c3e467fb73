// 主机密钥信任库
// 维护 主机身份 -> 已信任指纹 的映射，持久化在偏好存储的固定键下

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::storage::Preferences;
use crate::constants::storage_keys;
use crate::models::{HostIdentity, KnownHost};

/// 主机密钥校验结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostKeyVerdict {
    /// 指纹与已信任记录一致
    Trusted,
    /// 首次见到该主机
    Unknown { fingerprint: String },
    /// 已信任记录存在但指纹不同
    Changed {
        old_fingerprint: String,
        new_fingerprint: String,
    },
}

impl HostKeyVerdict {
    pub fn is_trusted(&self) -> bool {
        matches!(self, Self::Trusted)
    }

    /// 服务器当前提供的密钥指纹（Trusted 时为 None）
    pub fn offered_fingerprint(&self) -> Option<&str> {
        match self {
            Self::Trusted => None,
            Self::Unknown { fingerprint } => Some(fingerprint),
            Self::Changed {
                new_fingerprint, ..
            } => Some(new_fingerprint),
        }
    }
}

/// 计算公钥指纹：`SHA256:` + 无填充 base64(sha256(key))
///
/// 与 OpenSSH `ssh-keygen -l` 的输出格式一致。
pub fn fingerprint(key_bytes: &[u8]) -> String {
    let digest = Sha256::digest(key_bytes);
    format!("SHA256:{}", STANDARD_NO_PAD.encode(digest))
}

/// 主机密钥信任库
///
/// 映射在首次访问时整体加载，之后每次修改都在同一把锁内整体写回，
/// 并发校验不同主机时不会丢失更新。
pub struct HostKeyStore {
    preferences: Arc<Preferences>,
    hosts: Mutex<Option<HashMap<String, String>>>,
}

impl HostKeyStore {
    pub fn new(preferences: Arc<Preferences>) -> Self {
        Self {
            preferences,
            hosts: Mutex::new(None),
        }
    }

    /// 仅内存的信任库
    pub fn in_memory() -> Self {
        Self::new(Arc::new(Preferences::in_memory()))
    }

    fn lock(&self) -> MutexGuard<'_, Option<HashMap<String, String>>> {
        self.hosts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn loaded<'a>(
        &self,
        slot: &'a mut Option<HashMap<String, String>>,
    ) -> Result<&'a mut HashMap<String, String>> {
        if slot.is_none() {
            let hosts: HashMap<String, String> = self
                .preferences
                .get(storage_keys::KNOWN_HOSTS)?
                .unwrap_or_default();
            debug!("[HostKey] Loaded {} trusted hosts", hosts.len());
            *slot = Some(hosts);
        }
        Ok(slot.get_or_insert_with(HashMap::new))
    }

    /// 校验服务器提供的公钥
    pub fn verify(&self, identity: &HostIdentity, key_bytes: &[u8]) -> Result<HostKeyVerdict> {
        let offered = fingerprint(key_bytes);
        let mut guard = self.lock();
        let hosts = self.loaded(&mut guard)?;

        let verdict = match hosts.get(&identity.lookup_key()) {
            None => HostKeyVerdict::Unknown {
                fingerprint: offered,
            },
            Some(stored) if *stored == offered => HostKeyVerdict::Trusted,
            Some(stored) => HostKeyVerdict::Changed {
                old_fingerprint: stored.clone(),
                new_fingerprint: offered,
            },
        };
        debug!("[HostKey] {} -> {:?}", identity, verdict);
        Ok(verdict)
    }

    /// 信任公钥（覆盖旧记录），返回存储的指纹
    pub fn trust(&self, identity: &HostIdentity, key_bytes: &[u8]) -> Result<String> {
        let fp = fingerprint(key_bytes);
        let mut guard = self.lock();
        let hosts = self.loaded(&mut guard)?;

        if hosts.get(&identity.lookup_key()) != Some(&fp) {
            // 落盘失败时内存中的映射保持不变
            let mut updated = hosts.clone();
            updated.insert(identity.lookup_key(), fp.clone());
            self.preferences.set(storage_keys::KNOWN_HOSTS, &updated)?;
            *hosts = updated;
            info!("[HostKey] Trusted {} ({})", identity, fp);
        }
        Ok(fp)
    }

    /// 移除某个主机的信任记录
    pub fn forget(&self, identity: &HostIdentity) -> Result<()> {
        let mut guard = self.lock();
        let hosts = self.loaded(&mut guard)?;

        if hosts.contains_key(&identity.lookup_key()) {
            let mut updated = hosts.clone();
            updated.remove(&identity.lookup_key());
            self.preferences.set(storage_keys::KNOWN_HOSTS, &updated)?;
            *hosts = updated;
            info!("[HostKey] Forgot {}", identity);
        }
        Ok(())
    }

    /// 已存储的指纹
    pub fn stored_fingerprint(&self, identity: &HostIdentity) -> Result<Option<String>> {
        let mut guard = self.lock();
        let hosts = self.loaded(&mut guard)?;
        Ok(hosts.get(&identity.lookup_key()).cloned())
    }

    /// 全部已信任主机（按主机名排序）
    pub fn entries(&self) -> Result<Vec<KnownHost>> {
        let mut guard = self.lock();
        let hosts = self.loaded(&mut guard)?;
        let mut entries: Vec<KnownHost> = hosts
            .iter()
            .map(|(host, fingerprint)| KnownHost {
                host: host.clone(),
                fingerprint: fingerprint.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.host.cmp(&b.host));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: &[u8] = b"\x00\x00\x00\x0bssh-ed25519\x00\x00\x00\x20aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const KEY_B: &[u8] = b"\x00\x00\x00\x0bssh-ed25519\x00\x00\x00\x20bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn test_fingerprint_format() {
        let fp = fingerprint(KEY_A);
        assert!(fp.starts_with("SHA256:"));
        assert!(!fp.ends_with('='));
        // sha256 = 32 字节 -> 43 个 base64 字符
        assert_eq!(fp.len(), "SHA256:".len() + 43);
        assert_eq!(fp, fingerprint(KEY_A));
        assert_ne!(fp, fingerprint(KEY_B));
    }

    #[test]
    fn test_unknown_then_trusted() {
        let store = HostKeyStore::in_memory();
        let id = HostIdentity::new("example.com", 22);

        assert_eq!(
            store.verify(&id, KEY_A).unwrap(),
            HostKeyVerdict::Unknown {
                fingerprint: fingerprint(KEY_A)
            }
        );
        store.trust(&id, KEY_A).unwrap();
        assert_eq!(store.verify(&id, KEY_A).unwrap(), HostKeyVerdict::Trusted);
    }

    #[test]
    fn test_failed_write_leaves_host_untrusted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        let store = HostKeyStore::new(Arc::new(Preferences::open(&path)));
        let id = HostIdentity::new("example.com", 22);

        // 加载完成后让写入失败
        assert!(!store.verify(&id, KEY_A).unwrap().is_trusted());
        std::fs::create_dir(&path).unwrap();

        assert!(store.trust(&id, KEY_A).is_err());
        assert_eq!(
            store.verify(&id, KEY_A).unwrap(),
            HostKeyVerdict::Unknown {
                fingerprint: fingerprint(KEY_A)
            }
        );
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn test_failed_forget_keeps_trust() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        let store = HostKeyStore::new(Arc::new(Preferences::open(&path)));
        let id = HostIdentity::new("example.com", 22);
        store.trust(&id, KEY_A).unwrap();

        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(store.forget(&id).is_err());
        assert_eq!(store.verify(&id, KEY_A).unwrap(), HostKeyVerdict::Trusted);
    }

    #[test]
    fn test_trust_is_idempotent_and_overwrites() {
        let store = HostKeyStore::in_memory();
        let id = HostIdentity::new("example.com", 22);

        let first = store.trust(&id, KEY_A).unwrap();
        let second = store.trust(&id, KEY_A).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.entries().unwrap().len(), 1);

        store.trust(&id, KEY_B).unwrap();
        assert_eq!(
            store.stored_fingerprint(&id).unwrap(),
            Some(fingerprint(KEY_B))
        );
    }

    #[test]
    fn test_changed_key_reports_both_fingerprints() {
        let store = HostKeyStore::in_memory();
        let id = HostIdentity::new("example.com", 22);
        store.trust(&id, KEY_A).unwrap();

        assert_eq!(
            store.verify(&id, KEY_B).unwrap(),
            HostKeyVerdict::Changed {
                old_fingerprint: fingerprint(KEY_A),
                new_fingerprint: fingerprint(KEY_B),
            }
        );
    }

    #[test]
    fn test_identity_normalization() {
        let store = HostKeyStore::in_memory();
        store
            .trust(&HostIdentity::new("Example.com", 22), KEY_A)
            .unwrap();

        assert!(store
            .verify(&HostIdentity::new("example.com", 22), KEY_A)
            .unwrap()
            .is_trusted());
        assert!(matches!(
            store
                .verify(&HostIdentity::new("example.com", 2222), KEY_A)
                .unwrap(),
            HostKeyVerdict::Unknown { .. }
        ));
    }

    #[test]
    fn test_forget() {
        let store = HostKeyStore::in_memory();
        let id = HostIdentity::new("example.com", 2222);
        store.trust(&id, KEY_A).unwrap();
        store.forget(&id).unwrap();
        store.forget(&id).unwrap();
        assert!(store.stored_fingerprint(&id).unwrap().is_none());
    }

    #[test]
    fn test_persisted_under_well_known_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        {
            let store = HostKeyStore::new(Arc::new(Preferences::open(&path)));
            store
                .trust(&HostIdentity::new("example.com", 2222), KEY_A)
                .unwrap();
        }

        let prefs = Preferences::open(&path);
        let raw: HashMap<String, String> = prefs.get("terma.knownHosts").unwrap().unwrap();
        assert_eq!(raw.get("example.com:2222"), Some(&fingerprint(KEY_A)));

        let reopened = HostKeyStore::new(Arc::new(prefs));
        assert!(reopened
            .verify(&HostIdentity::new("example.com", 2222), KEY_A)
            .unwrap()
            .is_trusted());
    }

    #[test]
    fn test_concurrent_trust_of_different_hosts_keeps_all() {
        let store = Arc::new(HostKeyStore::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let id = HostIdentity::new(&format!("host{}.example.com", i), 22);
                    store.trust(&id, KEY_A).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.entries().unwrap().len(), 8);
    }
}
