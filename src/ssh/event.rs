// SSH 会话状态与事件定义

/// 会话状态
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Failed(String),
}

impl SessionState {
    /// 状态机是否允许从当前状态迁移到 `next`
    ///
    /// 正向只能逐级推进；任意进行中的阶段可以失败；
    /// 除 Disconnected 自身外，任何状态都可以回到 Disconnected。
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Disconnected, Connecting) => true,
            (Connecting, Authenticating) => true,
            (Authenticating, Connected) => true,
            (Connecting | Authenticating, Failed(_)) => true,
            (Disconnected, Disconnected) => false,
            (_, Disconnected) => true,
            _ => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Authenticating)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// 状态栏文本
    pub fn status_text(&self) -> String {
        match self {
            Self::Disconnected => "Disconnected".to_string(),
            Self::Connecting => "Connecting...".to_string(),
            Self::Authenticating => "Authenticating...".to_string(),
            Self::Connected => "Connected".to_string(),
            Self::Failed(reason) => format!("Failed: {}", reason),
        }
    }
}

/// 会话事件（按发生顺序投递给消费方）
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// 状态变化
    StateChanged(SessionState),
    /// Shell 输出
    Data(Vec<u8>),
    /// 连接断开；`error` 为 None 表示用户主动断开
    Disconnected { error: Option<String> },
    /// 远程 Shell 报告退出状态后正常关闭（不属于连接丢失）
    ShellExited { exit_status: u32 },
}

/// 建立连接过程中的阶段（握手任务内部上报）
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionStage {
    /// TCP 连接目标主机
    ConnectingHost = 0,
    /// SSH 握手（密钥交换、主机密钥校验）
    Handshaking = 1,
    /// 身份认证
    Authenticating = 2,
    /// 打开会话通道、请求 PTY 与 Shell
    StartingShell = 3,
}

impl ConnectionStage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ConnectingHost => "Connecting to host",
            Self::Handshaking => "SSH handshake",
            Self::Authenticating => "Authenticating",
            Self::StartingShell => "Starting shell",
        }
    }
}
