// Known Hosts 数据模型
// 主机身份与已信任指纹

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_PORT;

/// 主机身份（规范化后的 host + port）
///
/// 主机名统一小写；端口 22 在查找键中省略，即 `host:22` 与 `host` 是同一身份。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HostIdentity {
    host: String,
    port: u16,
}

impl HostIdentity {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.trim().to_lowercase(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// 信任映射中的查找键
    pub fn lookup_key(&self) -> String {
        if self.port == DEFAULT_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lookup_key())
    }
}

/// 已知主机条目（用于列表展示）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownHost {
    /// 查找键（host 或 host:port）
    pub host: String,
    /// SHA256 指纹
    pub fingerprint: String,
}
