// SSH 连接模块
//
// 模块结构:
// - config: 连接目标、凭据与会话配置 (Target, Credential, SessionConfig)
// - error: 错误类型 (SshError)
// - event: 会话状态与事件 (SessionState, SessionEvent, ConnectionStage)
// - private_key: 私钥解析
// - auth: 认证策略
// - prompt: 主机密钥确认桥
// - handler: russh Handler 实现（主机密钥校验）
// - client: 单次连接流程
// - session: 传输会话状态机
// - reconnect: 自动重连
// - connector: 连接器 (档案 + 会话 + 重连 + 终端视图)
// - manager: 多会话管理

pub mod auth;
pub mod client;
pub mod config;
pub mod connector;
pub mod error;
pub mod event;
pub mod handler;
pub mod manager;
pub mod private_key;
pub mod prompt;
pub mod reconnect;
pub mod session;

// 公开导出
pub use auth::{AdvertisedMethods, AuthOffer, AuthStrategy};
pub use config::{Credential, PtyRequest, SessionConfig, Target};
pub use connector::{Connector, TerminalSink};
pub use error::SshError;
pub use event::{ConnectionStage, SessionEvent, SessionState};
pub use manager::SshManager;
pub use private_key::{KeyParseError, KeyType, ParsedKey};
pub use prompt::{HostKeyPrompt, HostKeyRequest, UnattendedPolicy};
pub use reconnect::{ReconnectContext, ReconnectController, ReconnectDecision, ReconnectOutcome};
pub use session::TransportSession;
