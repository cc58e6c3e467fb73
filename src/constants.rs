// 全局默认值

use std::time::Duration;

/// 应用标识（配置目录名、存储键前缀）
pub const APP_NAME: &str = "terma";

/// SSH 默认端口
pub const DEFAULT_PORT: u16 = 22;

/// 默认终端类型
pub const DEFAULT_TERMINAL_TYPE: &str = "xterm-256color";

/// 默认终端列数
pub const DEFAULT_TERMINAL_COLS: u32 = 80;

/// 默认终端行数
pub const DEFAULT_TERMINAL_ROWS: u32 = 24;

/// 自动重连间隔
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// 自动重连最大次数
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// 连接超时（秒）
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// 主机密钥确认超时（秒）
pub const HOST_KEY_PROMPT_TIMEOUT_SECS: u64 = 120;

/// 存储键
pub mod storage_keys {
    /// 已信任主机指纹映射
    pub const KNOWN_HOSTS: &str = "terma.knownHosts";
    /// 应用设置
    pub const SETTINGS: &str = "terma.settings";

    /// 凭据键前缀
    pub const PASSWORD_PREFIX: &str = "terma.password";
    pub const PRIVATE_KEY_PREFIX: &str = "terma.privatekey";
    pub const PASSPHRASE_PREFIX: &str = "terma.passphrase";
}
