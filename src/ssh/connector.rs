// SSH 连接器
// 把一个服务器档案、一个传输会话和自动重连绑在一起，向终端视图推送数据与状态

use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use chrono::Utc;
use tokio::runtime::Handle as RuntimeHandle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::config::{Credential, SessionConfig, Target};
use super::error::SshError;
use super::event::{SessionEvent, SessionState};
use super::prompt::HostKeyPrompt;
use super::reconnect::{self, Reconnect, ReconnectController, ReconnectOutcome};
use super::session::TransportSession;
use crate::models::ServerProfile;
use crate::services::secrets::CredentialSource;
use crate::services::storage::ProfileStore;
use crate::services::AppServices;
use crate::terminal::keys::{control_byte, SpecialKey};

/// 终端视图
///
/// 所有回调都在会话线程上按事件发生顺序调用，实现中不要阻塞。
pub trait TerminalSink: Send + Sync {
    /// Shell 输出
    fn on_data(&self, data: &[u8]);

    /// 会话状态变化
    fn on_state(&self, state: &SessionState);

    /// 即将开始第 `attempt` 次自动重连
    fn on_reconnecting(&self, _attempt: u32, _max_attempts: u32) {}

    /// 自动重连放弃，连接已丢失
    fn on_connection_lost(&self, error: &str);

    /// 远程 Shell 正常退出（不会自动重连）
    fn on_exit(&self, _exit_status: u32) {}
}

struct Inner {
    session: TransportSession,
    profile: Mutex<ServerProfile>,
    credentials: CredentialSource,
    profiles: Option<Arc<ProfileStore>>,
    controller: Mutex<ReconnectController>,
    /// 最近一次连接使用的目标与凭据（重连复用）
    last_attempt: Mutex<Option<(Target, Credential)>>,
    sink: Arc<dyn TerminalSink>,
}

impl Inner {
    fn controller(&self) -> std::sync::MutexGuard<'_, ReconnectController> {
        self.controller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_connected(&self) {
        let id = {
            let mut profile = self.profile.lock().unwrap_or_else(PoisonError::into_inner);
            profile.last_connected_at = Some(Utc::now());
            profile.id
        };
        if let Some(profiles) = &self.profiles {
            if let Err(e) = profiles.update_last_connected(id) {
                warn!("[Storage] Failed to record last connection: {:#}", e);
            }
        }
    }

    async fn handle_disconnect(&self, error: Option<String>) {
        match reconnect::run(&self.controller, self, error).await {
            ReconnectOutcome::GaveUp { error } => self.sink.on_connection_lost(&error),
            outcome => debug!("[Reconnect] {} finished: {:?}", self.session.id(), outcome),
        }
    }
}

#[async_trait]
impl Reconnect for Inner {
    async fn reconnect(&self) -> Result<(), SshError> {
        let (target, credential) = self
            .last_attempt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SshError::Disconnected)?;

        self.session.clear_failure();
        self.session.connect(target, credential).await?;
        self.record_connected();
        Ok(())
    }

    fn on_attempt(&self, attempt: u32, max_attempts: u32) {
        self.sink.on_reconnecting(attempt, max_attempts);
    }
}

/// SSH 连接器
pub struct Connector {
    inner: Arc<Inner>,
}

impl Connector {
    /// 为档案创建连接器（不会立即连接）
    pub fn new(
        profile: ServerProfile,
        services: &AppServices,
        prompt: HostKeyPrompt,
        sink: Arc<dyn TerminalSink>,
    ) -> Result<Self, SshError> {
        let config = SessionConfig::from_settings(&services.settings);
        let (session, events) =
            TransportSession::new(config, services.trust_store.clone(), prompt)?;
        let runtime = session.runtime().clone();

        let inner = Arc::new(Inner {
            session,
            profile: Mutex::new(profile),
            credentials: services.credentials.clone(),
            profiles: Some(services.profiles.clone()),
            controller: Mutex::new(ReconnectController::from_settings(
                &services.settings.connection,
            )),
            last_attempt: Mutex::new(None),
            sink,
        });
        spawn_event_pump(&runtime, Arc::downgrade(&inner), events);

        Ok(Self { inner })
    }

    pub fn session_id(&self) -> &str {
        self.inner.session.id()
    }

    pub fn profile(&self) -> ServerProfile {
        self.inner
            .profile
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.session.state()
    }

    pub(crate) fn host_key_prompt(&self) -> &HostKeyPrompt {
        self.inner.session.host_key_prompt()
    }

    /// 开关自动重连
    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.inner.controller().set_enabled(enabled);
    }

    /// 连接
    ///
    /// `temporary_password` 用于本次连接，不会被保存。
    pub async fn connect(&self, temporary_password: Option<&str>) -> Result<(), SshError> {
        let profile = self.profile();
        profile
            .validate()
            .map_err(|e| SshError::Config(e.to_string()))?;

        let credential = self
            .inner
            .credentials
            .resolve(&profile, temporary_password)?;
        let target = profile.target();

        self.inner.controller().reset();
        if self.state().is_failed() {
            self.inner.session.clear_failure();
        }
        *self
            .inner
            .last_attempt
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((target.clone(), credential.clone()));

        info!("[SSH] Connecting profile '{}' ({})", profile.name, target);
        self.inner.session.connect(target, credential).await?;
        self.inner.record_connected();
        Ok(())
    }

    /// 用户主动断开（不会触发自动重连）
    pub fn disconnect(&self) {
        self.inner.controller().mark_manual_disconnect();
        self.inner.session.disconnect();
    }

    pub fn send(&self, data: &[u8]) {
        self.inner.session.send(data);
    }

    pub fn send_text(&self, text: &str) {
        self.send(text.as_bytes());
    }

    pub fn send_key(&self, key: SpecialKey) {
        if let Some(sequence) = key.sequence() {
            self.send(sequence);
        }
    }

    /// Ctrl + 键；不可映射的键忽略
    pub fn send_control(&self, key: char) {
        if let Some(byte) = control_byte(key) {
            self.send(&[byte]);
        }
    }

    pub fn resize(&self, cols: u32, rows: u32) {
        self.inner.session.resize(cols, rows);
    }
}

/// 在会话线程上按顺序分发会话事件
fn spawn_event_pump(
    runtime: &RuntimeHandle,
    inner: Weak<Inner>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    runtime.spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            match event {
                SessionEvent::StateChanged(state) => inner.sink.on_state(&state),
                SessionEvent::Data(data) => inner.sink.on_data(&data),
                SessionEvent::ShellExited { exit_status } => {
                    info!("[SSH] {} shell exited, not reconnecting", inner.session.id());
                    inner.sink.on_exit(exit_status);
                }
                SessionEvent::Disconnected { error } => {
                    // 重连期间继续分发状态事件
                    tokio::spawn(async move { inner.handle_disconnect(error).await });
                }
            }
        }
    });
}
