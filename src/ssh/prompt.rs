// 主机密钥确认桥
// 握手任务发出请求并挂起，外部（用户）通过 HostKeyRequest 恰好回复一次

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use super::error::SshError;
use crate::services::HostKeyVerdict;

/// 无人值守时的策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnattendedPolicy {
    /// 未知与变化的密钥都直接信任
    #[default]
    TrustAll,
    /// 首次见到时信任；密钥变化时拒绝
    TrustOnFirstUse,
}

/// 待确认的主机密钥
#[derive(Debug)]
pub struct HostKeyRequest {
    pub host: String,
    pub port: u16,
    pub key_type: String,
    pub fingerprint: String,
    pub verdict: HostKeyVerdict,
    reply: oneshot::Sender<bool>,
}

impl HostKeyRequest {
    /// 密钥是否相对已信任记录发生了变化
    pub fn is_changed(&self) -> bool {
        matches!(self.verdict, HostKeyVerdict::Changed { .. })
    }

    pub fn accept(self) {
        let _ = self.reply.send(true);
    }

    pub fn reject(self) {
        let _ = self.reply.send(false);
    }
}

/// 主机密钥确认桥
#[derive(Clone)]
pub struct HostKeyPrompt {
    sender: Option<mpsc::UnboundedSender<HostKeyRequest>>,
    pending: Arc<AtomicBool>,
    timeout: Option<Duration>,
    policy: UnattendedPolicy,
}

impl HostKeyPrompt {
    /// 交互式确认；`timeout` 为 None 时无限等待
    pub fn interactive(
        timeout: Option<Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<HostKeyRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let prompt = Self {
            sender: Some(tx),
            pending: Arc::new(AtomicBool::new(false)),
            timeout,
            policy: UnattendedPolicy::TrustAll,
        };
        (prompt, rx)
    }

    /// 无人值守
    pub fn unattended(policy: UnattendedPolicy) -> Self {
        Self {
            sender: None,
            pending: Arc::new(AtomicBool::new(false)),
            timeout: None,
            policy,
        }
    }

    /// 给一个传输会话使用的副本
    ///
    /// 共用同一个请求通道，但有自己的挂起标记：不同会话可以同时等待确认，
    /// 同一会话内同时只能有一个请求。
    pub fn for_session(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            pending: Arc::new(AtomicBool::new(false)),
            timeout: self.timeout,
            policy: self.policy,
        }
    }

    /// 是否有尚未回复的请求
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// 对未知或变化的主机密钥做出决定
    ///
    /// 返回 true 表示接受。
    pub async fn decide(
        &self,
        host: &str,
        port: u16,
        key_type: &str,
        verdict: HostKeyVerdict,
    ) -> Result<bool, SshError> {
        let fingerprint = verdict.offered_fingerprint().unwrap_or_default().to_string();

        let Some(sender) = &self.sender else {
            return self.decide_unattended(host, verdict);
        };

        if self
            .pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SshError::HostKeyVerificationFailed(
                "another host key prompt is already pending".to_string(),
            ));
        }
        let _pending = PendingGuard(self.pending.clone());

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = HostKeyRequest {
            host: host.to_string(),
            port,
            key_type: key_type.to_string(),
            fingerprint,
            verdict,
            reply: reply_tx,
        };
        if sender.send(request).is_err() {
            // 没有消费方：按未注册处理
            warn!("[HostKey] No prompt handler listening, applying unattended policy");
            return Ok(self.policy == UnattendedPolicy::TrustAll);
        }

        let reply = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    warn!("[HostKey] Prompt for {} timed out", host);
                    return Err(SshError::HostKeyVerificationFailed(format!(
                        "no decision within {}s",
                        limit.as_secs()
                    )));
                }
            },
            None => reply_rx.await,
        };

        // 请求被丢弃而未回复，视为拒绝
        Ok(reply.unwrap_or(false))
    }

    fn decide_unattended(&self, host: &str, verdict: HostKeyVerdict) -> Result<bool, SshError> {
        match (self.policy, verdict) {
            (_, HostKeyVerdict::Trusted) => Ok(true),
            (UnattendedPolicy::TrustAll, _) => {
                info!("[HostKey] Auto-trusting host key for {}", host);
                Ok(true)
            }
            (UnattendedPolicy::TrustOnFirstUse, HostKeyVerdict::Unknown { .. }) => {
                info!("[HostKey] Trusting {} on first use", host);
                Ok(true)
            }
            (
                UnattendedPolicy::TrustOnFirstUse,
                HostKeyVerdict::Changed {
                    old_fingerprint,
                    new_fingerprint,
                },
            ) => Err(SshError::HostKeyChanged {
                old_fingerprint,
                new_fingerprint,
            }),
        }
    }
}

impl Default for HostKeyPrompt {
    fn default() -> Self {
        Self::unattended(UnattendedPolicy::default())
    }
}

/// 离开作用域时清除挂起标记
struct PendingGuard(Arc<AtomicBool>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unknown() -> HostKeyVerdict {
        HostKeyVerdict::Unknown {
            fingerprint: "SHA256:new".into(),
        }
    }

    fn changed() -> HostKeyVerdict {
        HostKeyVerdict::Changed {
            old_fingerprint: "SHA256:old".into(),
            new_fingerprint: "SHA256:new".into(),
        }
    }

    #[tokio::test]
    async fn test_accept_and_reject() {
        let (prompt, mut rx) = HostKeyPrompt::interactive(None);

        let responder = tokio::spawn(async move {
            let first = rx.recv().await.unwrap();
            assert_eq!(first.fingerprint, "SHA256:new");
            assert!(!first.is_changed());
            first.accept();

            let second = rx.recv().await.unwrap();
            assert!(second.is_changed());
            second.reject();
        });

        assert!(prompt.decide("example.com", 22, "ssh-ed25519", unknown()).await.unwrap());
        assert!(!prompt.decide("example.com", 22, "ssh-ed25519", changed()).await.unwrap());
        responder.await.unwrap();
        assert!(!prompt.is_pending());
    }

    #[tokio::test]
    async fn test_dropped_request_is_reject() {
        let (prompt, mut rx) = HostKeyPrompt::interactive(None);
        tokio::spawn(async move {
            drop(rx.recv().await);
        });
        assert!(!prompt.decide("example.com", 22, "ssh-ed25519", unknown()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_verification() {
        let (prompt, _rx) = HostKeyPrompt::interactive(Some(Duration::from_secs(120)));
        let result = prompt.decide("example.com", 22, "ssh-ed25519", unknown()).await;
        assert!(matches!(result, Err(SshError::HostKeyVerificationFailed(_))));
        assert!(!prompt.is_pending());
    }

    #[tokio::test]
    async fn test_second_concurrent_request_is_an_error() {
        let (prompt, mut rx) = HostKeyPrompt::interactive(None);
        let first = {
            let prompt = prompt.clone();
            tokio::spawn(async move { prompt.decide("a", 22, "ssh-ed25519", unknown()).await })
        };
        let request = rx.recv().await.unwrap();

        let second = prompt.decide("b", 22, "ssh-ed25519", unknown()).await;
        assert!(matches!(second, Err(SshError::HostKeyVerificationFailed(_))));

        request.accept();
        assert!(first.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_sessions_prompt_independently() {
        let (prompt, mut rx) = HostKeyPrompt::interactive(None);
        let session_a = prompt.for_session();
        let session_b = prompt.for_session();

        let a = tokio::spawn(async move {
            session_a.decide("host-a", 22, "ssh-ed25519", unknown()).await
        });
        let first = rx.recv().await.unwrap();
        let b = tokio::spawn(async move {
            session_b.decide("host-b", 22, "ssh-ed25519", unknown()).await
        });
        let second = rx.recv().await.unwrap();

        assert_eq!(first.host, "host-a");
        assert_eq!(second.host, "host-b");
        second.reject();
        first.accept();
        assert!(a.await.unwrap().unwrap());
        assert!(!b.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_unattended_policies() {
        let trust_all = HostKeyPrompt::default();
        assert!(trust_all.decide("h", 22, "ssh-ed25519", changed()).await.unwrap());

        let tofu = HostKeyPrompt::unattended(UnattendedPolicy::TrustOnFirstUse);
        assert!(tofu.decide("h", 22, "ssh-ed25519", unknown()).await.unwrap());
        assert!(matches!(
            tofu.decide("h", 22, "ssh-ed25519", changed()).await,
            Err(SshError::HostKeyChanged { .. })
        ));
    }
}
