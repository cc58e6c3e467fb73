// Settings 配置数据结构

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    CONNECTION_TIMEOUT_SECS, DEFAULT_TERMINAL_COLS, DEFAULT_TERMINAL_ROWS, DEFAULT_TERMINAL_TYPE,
    HOST_KEY_PROMPT_TIMEOUT_SECS, MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY,
};

// ======================== 主配置结构 ========================

/// 应用设置（持久化用）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub connection: ConnectionSettings,
    pub terminal: TerminalSettings,
}

// ======================== 连接设置 ========================

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connection_timeout_secs: u32,
    pub auto_reconnect: bool,
    pub reconnect_attempts: u32,
    pub reconnect_interval_secs: u32,
    /// 0 表示关闭心跳
    pub keepalive_interval_secs: u32,
    /// 0 表示无限等待
    pub host_key_prompt_timeout_secs: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_timeout_secs: CONNECTION_TIMEOUT_SECS as u32,
            auto_reconnect: true,
            reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_interval_secs: RECONNECT_DELAY.as_secs() as u32,
            keepalive_interval_secs: 60,
            host_key_prompt_timeout_secs: HOST_KEY_PROMPT_TIMEOUT_SECS as u32,
        }
    }
}

impl ConnectionSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs as u64)
    }

    pub fn host_key_prompt_timeout(&self) -> Option<Duration> {
        match self.host_key_prompt_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs as u64)),
        }
    }
}

// ======================== 终端设置 ========================

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSettings {
    pub term_type: String,
    pub cols: u32,
    pub rows: u32,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            term_type: DEFAULT_TERMINAL_TYPE.to_string(),
            cols: DEFAULT_TERMINAL_COLS,
            rows: DEFAULT_TERMINAL_ROWS,
        }
    }
}
