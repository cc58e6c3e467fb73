// SSH 传输会话
//
// 每个会话独占一个线程和一个 current_thread 运行时。公开方法只向该线程
// 投递命令，真正的网络 I/O 都在会话线程上按顺序执行：
// - connect 挂起调用方直到握手 + Shell 打开完成
// - send / resize / disconnect 为发出即返回

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle as ThreadHandle, ThreadId};

use russh::ChannelMsg;
use tokio::runtime::{Builder, Handle as RuntimeHandle};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use super::auth::AuthStrategy;
use super::client::{ShellConnection, SshClient};
use super::config::{Credential, PtyRequest, SessionConfig, Target};
use super::error::SshError;
use super::event::{ConnectionStage, SessionEvent, SessionState};
use super::prompt::HostKeyPrompt;
use crate::services::host_keys::HostKeyStore;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// 投递到会话线程的命令
enum Command {
    Connect {
        target: Target,
        credential: Credential,
        reply: oneshot::Sender<Result<(), SshError>>,
    },
    Send(Vec<u8>),
    Resize {
        cols: u32,
        rows: u32,
    },
    Disconnect,
    /// Failed -> Disconnected，不发送断开通知（重连前复位用）
    ClearFailure,
    Shutdown,
}

/// 传输会话
pub struct TransportSession {
    id: String,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    /// 本会话专属的确认桥（挂起标记不与其他会话共享）
    prompt: HostKeyPrompt,
    runtime: RuntimeHandle,
    worker: Mutex<Option<ThreadHandle<()>>>,
    worker_thread: ThreadId,
}

impl TransportSession {
    /// 创建会话并启动会话线程
    ///
    /// 返回的接收端按发生顺序投递会话事件。
    pub fn new(
        config: SessionConfig,
        trust_store: Arc<HostKeyStore>,
        prompt: HostKeyPrompt,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), SshError> {
        let id = format!("session-{}", NEXT_SESSION.fetch_add(1, Ordering::Relaxed));
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let runtime_handle = runtime.handle().clone();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let prompt = prompt.for_session();

        let worker = Worker {
            id: id.clone(),
            pty: config.pty.clone(),
            config,
            trust_store,
            prompt: prompt.clone(),
            state: state_tx,
            events: event_tx,
            pending: None,
            shell: None,
            exit_status: None,
        };

        let thread = thread::Builder::new()
            .name(id.clone())
            .spawn(move || runtime.block_on(worker.run(command_rx)))?;
        let worker_thread = thread.thread().id();
        debug!("[SSH] {} started", id);

        Ok((
            Self {
                id,
                commands: command_tx,
                state: state_rx,
                prompt,
                runtime: runtime_handle,
                worker: Mutex::new(Some(thread)),
                worker_thread,
            },
            event_rx,
        ))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 当前状态
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// 订阅状态变化
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// 会话运行时句柄（在会话线程上运行任务）
    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    /// 连接并打开 Shell
    ///
    /// 仅在 Disconnected 状态下接受，否则返回 `Busy`。
    pub async fn connect(&self, target: Target, credential: Credential) -> Result<(), SshError> {
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Connect {
                target,
                credential,
                reply,
            })
            .map_err(|_| SshError::Disconnected)?;
        reply_rx.await.map_err(|_| SshError::Disconnected)?
    }

    /// 写入 Shell；没有打开的通道时静默丢弃
    pub fn send(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let _ = self.commands.send(Command::Send(data.to_vec()));
    }

    /// 调整终端大小；没有通道时记住尺寸，用于下一次 PTY 请求
    pub fn resize(&self, cols: u32, rows: u32) {
        let _ = self.commands.send(Command::Resize { cols, rows });
    }

    /// 断开连接（幂等）
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    pub(crate) fn host_key_prompt(&self) -> &HostKeyPrompt {
        &self.prompt
    }

    pub(crate) fn clear_failure(&self) {
        let _ = self.commands.send(Command::ClearFailure);
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        let thread = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // 在会话线程自身上析构时不能 join 自己
        if let Some(thread) = thread {
            if thread::current().id() != self.worker_thread {
                let _ = thread.join();
            }
        }
        debug!("[SSH] {} stopped", self.id);
    }
}

// ======================== 会话线程 ========================

/// 进行中的连接尝试
struct PendingConnect {
    task: JoinHandle<Result<ShellConnection, SshError>>,
    progress: mpsc::UnboundedReceiver<ConnectionStage>,
    /// 本次 PTY 请求使用的尺寸
    requested_pty: PtyRequest,
    reply: Option<oneshot::Sender<Result<(), SshError>>>,
}

enum PendingEvent {
    Stage(ConnectionStage),
    Finished(Result<Result<ShellConnection, SshError>, JoinError>),
}

struct Worker {
    id: String,
    config: SessionConfig,
    trust_store: Arc<HostKeyStore>,
    prompt: HostKeyPrompt,
    state: watch::Sender<SessionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// 当前 PTY 参数（resize 会更新）
    pty: PtyRequest,
    pending: Option<PendingConnect>,
    shell: Option<ShellConnection>,
    /// 当前 Shell 报告的退出状态
    exit_status: Option<u32>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.handle_command(command).await,
                },
                event = next_pending(&mut self.pending) => self.on_pending(event).await,
                message = next_shell_message(&mut self.shell) => self.on_shell_message(message).await,
            }
        }
        self.close_all().await;
    }

    fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    fn set_state(&self, next: SessionState) {
        let current = self.current();
        if current == next {
            return;
        }
        if !current.can_transition_to(&next) {
            warn!(
                "[SSH] {} unexpected transition {:?} -> {:?}",
                self.id, current, next
            );
        }
        debug!("[SSH] {} {:?} -> {:?}", self.id, current, next);
        self.state.send_replace(next.clone());
        let _ = self.events.send(SessionEvent::StateChanged(next));
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                target,
                credential,
                reply,
            } => self.start_connect(target, credential, reply),
            Command::Send(data) => {
                if let Some(shell) = &self.shell {
                    if let Err(e) = shell.write(&data).await {
                        debug!("[SSH] {} write failed: {}", self.id, e);
                    }
                }
            }
            Command::Resize { cols, rows } => {
                self.pty.cols = cols;
                self.pty.rows = rows;
                if let Some(shell) = &self.shell {
                    if let Err(e) = shell.resize(cols, rows).await {
                        debug!("[SSH] {} window change failed: {}", self.id, e);
                    }
                }
            }
            Command::Disconnect => self.disconnect().await,
            Command::ClearFailure => {
                if self.current().is_failed() {
                    self.set_state(SessionState::Disconnected);
                }
            }
            Command::Shutdown => {}
        }
    }

    fn start_connect(
        &mut self,
        target: Target,
        credential: Credential,
        reply: oneshot::Sender<Result<(), SshError>>,
    ) {
        if self.current() != SessionState::Disconnected || self.pending.is_some() {
            let _ = reply.send(Err(SshError::Busy));
            return;
        }

        // 凭据问题在任何网络操作之前失败
        let strategy = match AuthStrategy::for_credential(&target.username, &credential) {
            Ok(strategy) => strategy,
            Err(e) => {
                warn!("[SSH] {} credential rejected: {}", self.id, e);
                let _ = reply.send(Err(e));
                return;
            }
        };
        drop(credential);

        info!("[SSH] {} connecting to {}", self.id, target);
        self.set_state(SessionState::Connecting);

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let client = SshClient::new(
            target,
            self.config.clone(),
            self.trust_store.clone(),
            self.prompt.clone(),
        );
        let pty = self.pty_for_next_attempt();
        let requested_pty = pty.clone();
        let task =
            tokio::spawn(async move { client.establish(strategy, pty, progress_tx).await });

        self.pending = Some(PendingConnect {
            task,
            progress: progress_rx,
            requested_pty,
            reply: Some(reply),
        });
    }

    async fn on_pending(&mut self, event: PendingEvent) {
        match event {
            PendingEvent::Stage(stage) => {
                debug!("[SSH] {} stage: {}", self.id, stage.label());
                // TCP 建立后进入认证阶段（握手中包含主机密钥校验）
                if stage >= ConnectionStage::Handshaking
                    && self.current() == SessionState::Connecting
                {
                    self.set_state(SessionState::Authenticating);
                }
            }
            PendingEvent::Finished(result) => {
                let Some(mut pending) = self.pending.take() else {
                    return;
                };
                let result = result.unwrap_or_else(|e| {
                    error!("[SSH] {} connect task failed: {}", self.id, e);
                    Err(SshError::ConnectionFailed("connection task aborted".to_string()))
                });
                let outcome = match result {
                    Ok(shell) => {
                        self.on_connected(shell, &pending.requested_pty).await;
                        Ok(())
                    }
                    Err(e) => {
                        warn!("[SSH] {} connection failed: {}", self.id, e);
                        self.set_state(SessionState::Failed(e.to_string()));
                        Err(e)
                    }
                };
                if let Some(reply) = pending.reply.take() {
                    let _ = reply.send(outcome);
                }
            }
        }
    }

    async fn on_connected(&mut self, mut shell: ShellConnection, requested: &PtyRequest) {
        if self.current() == SessionState::Connecting {
            self.set_state(SessionState::Authenticating);
        }
        self.set_state(SessionState::Connected);
        self.exit_status = None;

        for chunk in shell.early_output.drain(..) {
            let _ = self.events.send(SessionEvent::Data(chunk));
        }

        // 连接期间又发生过 resize
        if self.needs_window_change(requested) {
            if let Err(e) = shell.resize(self.pty.cols, self.pty.rows).await {
                debug!("[SSH] {} initial window change failed: {}", self.id, e);
            }
        }
        self.shell = Some(shell);
    }

    /// 下一次 PTY 请求使用的参数（包含未连接时记住的尺寸）
    fn pty_for_next_attempt(&self) -> PtyRequest {
        self.pty.clone()
    }

    fn needs_window_change(&self, requested: &PtyRequest) -> bool {
        self.pty.cols != requested.cols || self.pty.rows != requested.rows
    }

    async fn on_shell_message(&mut self, message: Option<ChannelMsg>) {
        match message {
            Some(ChannelMsg::Data { data }) => {
                let _ = self.events.send(SessionEvent::Data(data.to_vec()));
            }
            Some(ChannelMsg::ExtendedData { data, .. }) => {
                let _ = self.events.send(SessionEvent::Data(data.to_vec()));
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                debug!("[SSH] {} shell exited with status {}", self.id, exit_status);
                self.exit_status = Some(exit_status);
            }
            Some(ChannelMsg::Eof) => {
                debug!("[SSH] {} received EOF", self.id);
            }
            Some(ChannelMsg::Close) | None => {
                if let Some(shell) = self.shell.take() {
                    shell.close().await;
                }
                self.set_state(SessionState::Disconnected);
                let event = match self.exit_status.take() {
                    Some(exit_status) => {
                        info!("[SSH] {} shell exited ({})", self.id, exit_status);
                        SessionEvent::ShellExited { exit_status }
                    }
                    None => {
                        info!("[SSH] {} connection closed by remote host", self.id);
                        SessionEvent::Disconnected {
                            error: Some("Connection closed by remote host".to_string()),
                        }
                    }
                };
                let _ = self.events.send(event);
            }
            Some(_) => {}
        }
    }

    async fn disconnect(&mut self) {
        self.abort_pending();
        if let Some(shell) = self.shell.take() {
            shell.close().await;
        }
        if self.current() != SessionState::Disconnected {
            info!("[SSH] {} disconnected", self.id);
            self.set_state(SessionState::Disconnected);
        }
        let _ = self
            .events
            .send(SessionEvent::Disconnected { error: None });
    }

    fn abort_pending(&mut self) {
        if let Some(mut pending) = self.pending.take() {
            pending.task.abort();
            if let Some(reply) = pending.reply.take() {
                let _ = reply.send(Err(SshError::Disconnected));
            }
        }
    }

    async fn close_all(&mut self) {
        self.abort_pending();
        if let Some(shell) = self.shell.take() {
            shell.close().await;
        }
    }
}

async fn next_pending(pending: &mut Option<PendingConnect>) -> PendingEvent {
    let Some(pending) = pending.as_mut() else {
        return std::future::pending().await;
    };
    tokio::select! {
        biased;
        Some(stage) = pending.progress.recv() => PendingEvent::Stage(stage),
        result = &mut pending.task => PendingEvent::Finished(result),
    }
}

async fn next_shell_message(shell: &mut Option<ShellConnection>) -> Option<ChannelMsg> {
    match shell.as_mut() {
        Some(shell) => shell.channel.wait().await,
        None => std::future::pending().await,
    }
}
