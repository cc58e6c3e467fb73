// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait，在握手阶段完成主机密钥校验

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use russh::keys::{PublicKey, PublicKeyBase64};
use tracing::{error, info, warn};

use super::error::SshError;
use super::prompt::HostKeyPrompt;
use crate::models::HostIdentity;
use crate::services::host_keys::{HostKeyStore, HostKeyVerdict};

/// 握手期间记录的主机密钥错误
///
/// russh 会把 Handler 的错误包装后再返回，这里保留原始错误供客户端取回。
pub type HostKeyOutcome = Arc<Mutex<Option<SshError>>>;

/// SSH 客户端 Handler
pub struct ClientHandler {
    identity: HostIdentity,
    trust_store: Arc<HostKeyStore>,
    prompt: HostKeyPrompt,
    outcome: HostKeyOutcome,
}

impl ClientHandler {
    pub fn new(
        identity: HostIdentity,
        trust_store: Arc<HostKeyStore>,
        prompt: HostKeyPrompt,
        outcome: HostKeyOutcome,
    ) -> Self {
        Self {
            identity,
            trust_store,
            prompt,
            outcome,
        }
    }

    async fn verify_host_key(&self, server_public_key: &PublicKey) -> Result<bool, SshError> {
        let key_bytes = server_public_key.public_key_bytes();
        let key_type = server_public_key.algorithm().to_string();

        let verdict = self
            .trust_store
            .verify(&self.identity, &key_bytes)
            .map_err(|e| SshError::HostKeyVerificationFailed(format!("{:#}", e)))?;

        if verdict == HostKeyVerdict::Trusted {
            info!("[SSH] Host key for {} is trusted", self.identity);
            return Ok(true);
        }

        if let HostKeyVerdict::Changed {
            old_fingerprint,
            new_fingerprint,
        } = &verdict
        {
            warn!(
                "[SSH] Host key for {} changed: {} -> {}",
                self.identity, old_fingerprint, new_fingerprint
            );
        }

        let accepted = self
            .prompt
            .decide(self.identity.host(), self.identity.port(), &key_type, verdict)
            .await?;
        if !accepted {
            warn!("[SSH] Host key for {} rejected", self.identity);
            return Err(SshError::HostKeyRejected);
        }

        self.trust_store
            .trust(&self.identity, &key_bytes)
            .map_err(|e| SshError::HostKeyVerificationFailed(format!("{:#}", e)))?;
        Ok(true)
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = SshError;

    /// 检查服务器公钥
    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        async move {
            match self.verify_host_key(server_public_key).await {
                Ok(accepted) => Ok(accepted),
                Err(e) => {
                    error!("[SSH] Host key verification failed: {}", e);
                    let message = e.to_string();
                    *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                    Err(SshError::HostKeyVerificationFailed(message))
                }
            }
        }
    }
}

/// 取出握手期间记录的主机密钥错误
pub fn take_outcome(outcome: &HostKeyOutcome) -> Option<SshError> {
    outcome
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}
