// SSH 客户端核心实现
// TCP 连接 -> SSH 握手（主机密钥校验）-> 认证 -> 会话通道 / PTY / Shell

use std::sync::Arc;
use std::time::Duration;

use russh::client::{AuthResult, Handle, Msg};
use russh::keys::PrivateKeyWithHashAlg;
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::auth::{AdvertisedMethods, AuthOffer, AuthStrategy};
use super::config::{PtyRequest, SessionConfig, Target};
use super::error::SshError;
use super::event::ConnectionStage;
use super::handler::{take_outcome, ClientHandler, HostKeyOutcome};
use super::private_key::KeyType;
use super::prompt::HostKeyPrompt;
use crate::models::HostIdentity;
use crate::services::host_keys::HostKeyStore;

/// 已打开的 Shell 连接
pub struct ShellConnection {
    pub handle: Handle<ClientHandler>,
    pub channel: Channel<Msg>,
    /// 等待 PTY / Shell 回复期间收到的输出
    pub early_output: Vec<Vec<u8>>,
}

impl ShellConnection {
    /// 写入数据到 Shell
    pub async fn write(&self, data: &[u8]) -> Result<(), SshError> {
        self.handle
            .data(self.channel.id(), data.to_vec().into())
            .await
            .map_err(|_| SshError::Disconnected)
    }

    /// 调整终端大小
    pub async fn resize(&self, cols: u32, rows: u32) -> Result<(), SshError> {
        self.channel
            .window_change(cols, rows, 0, 0)
            .await
            .map_err(SshError::from)
    }

    /// 关闭通道与连接（失败忽略）
    pub async fn close(self) {
        let _ = self.channel.eof().await;
        let _ = self.channel.close().await;
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
    }
}

/// SSH 客户端
/// 负责一次完整的连接尝试
pub struct SshClient {
    target: Target,
    config: SessionConfig,
    trust_store: Arc<HostKeyStore>,
    prompt: HostKeyPrompt,
}

impl SshClient {
    pub fn new(
        target: Target,
        config: SessionConfig,
        trust_store: Arc<HostKeyStore>,
        prompt: HostKeyPrompt,
    ) -> Self {
        Self {
            target,
            config,
            trust_store,
            prompt,
        }
    }

    /// 建立连接并打开 Shell
    ///
    /// 各阶段开始时向 `progress` 上报。握手中记录的主机密钥错误优先于
    /// russh 包装后的错误返回。
    pub async fn establish(
        &self,
        strategy: AuthStrategy,
        pty: PtyRequest,
        progress: mpsc::UnboundedSender<ConnectionStage>,
    ) -> Result<ShellConnection, SshError> {
        let outcome = HostKeyOutcome::default();
        match self.run(strategy, pty, &progress, outcome.clone()).await {
            Ok(connection) => Ok(connection),
            Err(e) => Err(take_outcome(&outcome).unwrap_or(e)),
        }
    }

    async fn run(
        &self,
        mut strategy: AuthStrategy,
        pty: PtyRequest,
        progress: &mpsc::UnboundedSender<ConnectionStage>,
        outcome: HostKeyOutcome,
    ) -> Result<ShellConnection, SshError> {
        let target = &self.target;
        let connect_timeout = Duration::from_secs(self.config.connect_timeout);

        // 阶段 1: TCP 连接
        let _ = progress.send(ConnectionStage::ConnectingHost);
        info!("[SSH] Connecting to {}:{}...", target.host, target.port);
        let tcp_stream = timeout(
            connect_timeout,
            TcpStream::connect((target.host.as_str(), target.port)),
        )
        .await
        .map_err(|_| SshError::Timeout(self.config.connect_timeout))?
        .map_err(|e| SshError::ConnectionFailed(e.to_string()))?;
        let _ = tcp_stream.set_nodelay(true);
        debug!("[SSH] TCP connection established");

        // 阶段 2: SSH 握手
        let _ = progress.send(ConnectionStage::Handshaking);
        let handler = ClientHandler::new(
            HostIdentity::new(&target.host, target.port),
            self.trust_store.clone(),
            self.prompt.clone(),
            outcome,
        );
        let russh_config = Arc::new(self.config.to_russh_config());
        let mut handle = timeout(
            connect_timeout,
            russh::client::connect_stream(russh_config, tcp_stream, handler),
        )
        .await
        .map_err(|_| SshError::Timeout(self.config.connect_timeout))??;

        // 阶段 3 之后失败时主动断开，不留半开连接
        match self.authenticate_and_open(&mut handle, &mut strategy, pty, progress).await {
            Ok((channel, early_output)) => {
                info!("[SSH] Shell opened for {}", target);
                Ok(ShellConnection {
                    handle,
                    channel,
                    early_output,
                })
            }
            Err(e) => {
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "", "en")
                    .await;
                Err(e)
            }
        }
    }

    async fn authenticate_and_open(
        &self,
        handle: &mut Handle<ClientHandler>,
        strategy: &mut AuthStrategy,
        pty: PtyRequest,
        progress: &mpsc::UnboundedSender<ConnectionStage>,
    ) -> Result<(Channel<Msg>, Vec<Vec<u8>>), SshError> {
        let _ = progress.send(ConnectionStage::Authenticating);
        self.authenticate(handle, strategy).await?;

        let _ = progress.send(ConnectionStage::StartingShell);
        open_shell(handle, &pty).await
    }

    /// 执行认证
    async fn authenticate(
        &self,
        handle: &mut Handle<ClientHandler>,
        strategy: &mut AuthStrategy,
    ) -> Result<(), SshError> {
        let username = self.target.username.as_str();

        // 先用 none 探测服务器支持的认证方式
        let mut methods = match handle.authenticate_none(username).await? {
            AuthResult::Success => {
                info!("[SSH] Server accepted 'none' authentication");
                return Ok(());
            }
            AuthResult::Failure {
                remaining_methods, ..
            } => AdvertisedMethods::from_methods(&remaining_methods),
        };
        debug!("[SSH] Server advertises {:?}", methods);

        loop {
            let Some(offer) = strategy.next_offer(&methods) else {
                warn!("[SSH] No acceptable authentication method left for {}", username);
                return Err(SshError::AuthenticationFailed);
            };
            debug!("[SSH] Trying {} authentication", offer.method_name());

            let result = match offer {
                AuthOffer::Password { username, password } => {
                    handle
                        .authenticate_password(username, password.as_str())
                        .await?
                }
                AuthOffer::PublicKey {
                    username,
                    key,
                    key_type,
                } => {
                    let hash_alg = if key_type == KeyType::Rsa {
                        handle
                            .best_supported_rsa_hash()
                            .await
                            .ok()
                            .flatten()
                            .flatten()
                    } else {
                        None
                    };
                    handle
                        .authenticate_publickey(username, PrivateKeyWithHashAlg::new(key, hash_alg))
                        .await?
                }
            };

            match result {
                AuthResult::Success => {
                    info!("[SSH] Authenticated as '{}'", username);
                    return Ok(());
                }
                AuthResult::Failure {
                    remaining_methods,
                    partial_success,
                } => {
                    debug!(
                        "[SSH] Authentication rejected (partial_success={})",
                        partial_success
                    );
                    methods = AdvertisedMethods::from_methods(&remaining_methods);
                }
            }
        }
    }
}

/// 打开会话通道，请求 PTY 与 Shell
async fn open_shell(
    handle: &Handle<ClientHandler>,
    pty: &PtyRequest,
) -> Result<(Channel<Msg>, Vec<Vec<u8>>), SshError> {
    let mut channel = handle.channel_open_session().await.map_err(|e| {
        warn!("[SSH] Channel open failed: {}", e);
        SshError::ChannelCreationFailed
    })?;
    let mut early_output = Vec::new();

    channel
        .request_pty(true, &pty.term, pty.cols, pty.rows, 0, 0, &[])
        .await
        .map_err(|_| SshError::PtyRequestFailed)?;
    if !wait_for_reply(&mut channel, &mut early_output).await {
        return Err(SshError::PtyRequestFailed);
    }
    debug!("[SSH] PTY granted ({}x{} {})", pty.cols, pty.rows, pty.term);

    channel
        .request_shell(true)
        .await
        .map_err(|_| SshError::ShellRequestFailed)?;
    if !wait_for_reply(&mut channel, &mut early_output).await {
        return Err(SshError::ShellRequestFailed);
    }

    Ok((channel, early_output))
}

/// 等待通道请求的回复；期间收到的输出暂存
async fn wait_for_reply(channel: &mut Channel<Msg>, early_output: &mut Vec<Vec<u8>>) -> bool {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return true,
            Some(ChannelMsg::Failure) => return false,
            Some(ChannelMsg::Data { data }) => early_output.push(data.to_vec()),
            Some(ChannelMsg::ExtendedData { data, .. }) => early_output.push(data.to_vec()),
            Some(ChannelMsg::Eof | ChannelMsg::Close) | None => return false,
            Some(_) => {}
        }
    }
}
