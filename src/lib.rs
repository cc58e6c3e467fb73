// Terma - SSH 终端客户端核心
// 会话/传输层：凭据、私钥解析、主机密钥信任、认证、会话状态机与自动重连

pub mod constants;
pub mod models;
pub mod services;
pub mod ssh;
pub mod terminal;

pub use services::AppServices;
pub use ssh::{Connector, SshError, SshManager, TerminalSink};

/// 初始化日志系统
///
/// 通过 RUST_LOG 环境变量控制日志级别，例如：RUST_LOG=debug terma host
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false) // 不显示 target（模块路径）
        .with_writer(std::io::stderr)
        .try_init();
}
