// SSH 自动重连模块
//
// 当 SSH 连接意外断开时，按固定间隔重试有限次数；
// 用户主动断开不会触发重连。

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::error::SshError;
use crate::models::ConnectionSettings;

const CONNECTION_LOST: &str = "Connection lost";

/// 重连上下文
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconnectContext {
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub is_manual_disconnect: bool,
}

/// 对一次断开的处理决定
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// 用户主动断开，不做处理
    Ignore,
    /// 等待 `delay` 后进行第 `attempt` 次重连
    Retry { attempt: u32, delay: Duration },
    /// 放弃重连，向用户展示错误
    GiveUp { error: String },
}

/// 重连控制器
#[derive(Debug)]
pub struct ReconnectController {
    context: ReconnectContext,
    enabled: bool,
    delay: Duration,
    last_error: Option<String>,
    /// 每次 reset / 手动断开都会递增，用于作废进行中的重连
    epoch: u64,
}

impl ReconnectController {
    pub fn new(max_attempts: u32, delay: Duration, enabled: bool) -> Self {
        Self {
            context: ReconnectContext {
                max_attempts,
                ..Default::default()
            },
            enabled,
            delay,
            last_error: None,
            epoch: 0,
        }
    }

    pub fn from_settings(settings: &ConnectionSettings) -> Self {
        Self::new(
            settings.reconnect_attempts,
            settings.reconnect_delay(),
            settings.auto_reconnect,
        )
    }

    pub fn context(&self) -> &ReconnectContext {
        &self.context
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// 新的连接开始
    pub fn reset(&mut self) {
        self.context.attempt_count = 0;
        self.context.is_manual_disconnect = false;
        self.last_error = None;
        self.epoch += 1;
    }

    /// 用户主动断开（须在断开之前调用）
    pub fn mark_manual_disconnect(&mut self) {
        self.context.attempt_count = 0;
        self.context.is_manual_disconnect = true;
        self.last_error = None;
        self.epoch += 1;
    }

    /// 收到断开通知
    pub fn on_disconnect(&mut self, error: Option<&str>) -> ReconnectDecision {
        if self.context.is_manual_disconnect {
            self.context.is_manual_disconnect = false;
            return ReconnectDecision::Ignore;
        }

        if let Some(error) = error {
            self.last_error = Some(error.to_string());
        }

        if self.enabled && self.context.attempt_count < self.context.max_attempts {
            self.context.attempt_count += 1;
            return ReconnectDecision::Retry {
                attempt: self.context.attempt_count,
                delay: self.delay,
            };
        }

        self.context.attempt_count = 0;
        ReconnectDecision::GiveUp {
            error: self
                .last_error
                .take()
                .unwrap_or_else(|| CONNECTION_LOST.to_string()),
        }
    }

    /// 重连成功
    pub fn on_reconnected(&mut self) {
        self.context.attempt_count = 0;
        self.last_error = None;
    }
}

/// 可被重连的对象
#[async_trait]
pub trait Reconnect: Send + Sync {
    /// 用同一目标和凭据重新执行完整连接流程
    async fn reconnect(&self) -> Result<(), SshError>;

    /// 即将开始第 `attempt` 次重连（等待之前调用）
    fn on_attempt(&self, _attempt: u32, _max_attempts: u32) {}
}

/// 重连结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// 用户主动断开
    Ignored,
    /// 重连成功
    Reconnected { attempts: u32 },
    /// 次数耗尽或未启用
    GaveUp { error: String },
    /// 等待期间用户断开或发起了新连接
    Cancelled,
}

/// 处理一次断开通知，必要时驱动重连直到成功或放弃
pub async fn run(
    controller: &Mutex<ReconnectController>,
    target: &dyn Reconnect,
    error: Option<String>,
) -> ReconnectOutcome {
    let lock = || controller.lock().unwrap_or_else(PoisonError::into_inner);

    let (mut decision, epoch) = {
        let mut controller = lock();
        (controller.on_disconnect(error.as_deref()), controller.epoch())
    };

    loop {
        match decision {
            ReconnectDecision::Ignore => return ReconnectOutcome::Ignored,
            ReconnectDecision::GiveUp { error } => {
                warn!("[Reconnect] Giving up: {}", error);
                return ReconnectOutcome::GaveUp { error };
            }
            ReconnectDecision::Retry { attempt, delay } => {
                let max_attempts = lock().context().max_attempts;
                info!("[Reconnect] Attempt {}/{} in {:?}", attempt, max_attempts, delay);
                target.on_attempt(attempt, max_attempts);

                tokio::time::sleep(delay).await;
                if lock().epoch() != epoch {
                    info!("[Reconnect] Cancelled");
                    return ReconnectOutcome::Cancelled;
                }

                let result = target.reconnect().await;

                let mut controller = lock();
                if controller.epoch() != epoch {
                    return ReconnectOutcome::Cancelled;
                }
                match result {
                    Ok(()) => {
                        info!("[Reconnect] Reconnected after {} attempt(s)", attempt);
                        controller.on_reconnected();
                        return ReconnectOutcome::Reconnected { attempts: attempt };
                    }
                    Err(e) => {
                        warn!(
                            "[Reconnect] Attempt {}/{} failed: {}",
                            attempt, max_attempts, e
                        );
                        decision = controller.on_disconnect(Some(&e.to_string()));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    const DELAY: Duration = Duration::from_secs(2);

    /// 前 `failures` 次重连失败的假目标
    struct FlakyTarget {
        failures: u32,
        calls: AtomicU32,
        announced: AtomicU32,
    }

    impl FlakyTarget {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                announced: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Reconnect for FlakyTarget {
        async fn reconnect(&self) -> Result<(), SshError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(SshError::ConnectionFailed(format!("refused #{}", call)))
            } else {
                Ok(())
            }
        }

        fn on_attempt(&self, _attempt: u32, _max_attempts: u32) {
            self.announced.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_manual_disconnect_is_ignored_once() {
        let mut controller = ReconnectController::new(3, DELAY, true);
        controller.mark_manual_disconnect();
        assert_eq!(controller.on_disconnect(None), ReconnectDecision::Ignore);
        assert!(!controller.context().is_manual_disconnect);
        assert!(matches!(
            controller.on_disconnect(Some("reset")),
            ReconnectDecision::Retry { attempt: 1, .. }
        ));
    }

    #[test]
    fn test_attempts_are_bounded_and_reset() {
        let mut controller = ReconnectController::new(3, DELAY, true);
        for expected in 1..=3 {
            assert_eq!(
                controller.on_disconnect(Some("broken pipe")),
                ReconnectDecision::Retry {
                    attempt: expected,
                    delay: DELAY
                }
            );
        }
        assert_eq!(
            controller.on_disconnect(None),
            ReconnectDecision::GiveUp {
                error: "broken pipe".to_string()
            }
        );
        assert_eq!(controller.context().attempt_count, 0);
    }

    #[test]
    fn test_disabled_gives_up_with_generic_error() {
        let mut controller = ReconnectController::new(3, DELAY, false);
        assert_eq!(
            controller.on_disconnect(None),
            ReconnectDecision::GiveUp {
                error: "Connection lost".to_string()
            }
        );
    }

    #[test]
    fn test_success_restarts_counting() {
        let mut controller = ReconnectController::new(3, DELAY, true);
        controller.on_disconnect(Some("x"));
        controller.on_disconnect(Some("x"));
        controller.on_reconnected();
        assert_eq!(controller.context().attempt_count, 0);
        assert!(matches!(
            controller.on_disconnect(Some("x")),
            ReconnectDecision::Retry { attempt: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_then_connection_lost() {
        let controller = Mutex::new(ReconnectController::new(3, DELAY, true));
        let target = FlakyTarget::new(u32::MAX);
        let started = Instant::now();

        let outcome = run(&controller, &target, Some("reset by peer".into())).await;

        assert_eq!(target.calls.load(Ordering::SeqCst), 3);
        assert_eq!(target.announced.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), DELAY * 3);
        assert_eq!(
            outcome,
            ReconnectOutcome::GaveUp {
                error: "Connection failed: refused #3".to_string()
            }
        );
        assert_eq!(controller.lock().unwrap().context().attempt_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_and_next_disconnect_counts_from_zero() {
        let controller = Mutex::new(ReconnectController::new(3, DELAY, true));
        let target = FlakyTarget::new(1);

        let outcome = run(&controller, &target, Some("timeout".into())).await;
        assert_eq!(outcome, ReconnectOutcome::Reconnected { attempts: 2 });
        assert_eq!(controller.lock().unwrap().context().attempt_count, 0);

        let outcome = run(&controller, &target, Some("timeout".into())).await;
        assert_eq!(outcome, ReconnectOutcome::Reconnected { attempts: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_disconnect_during_delay_cancels() {
        let controller = Arc::new(Mutex::new(ReconnectController::new(3, DELAY, true)));
        let target = Arc::new(FlakyTarget::new(0));

        let driver = {
            let controller = controller.clone();
            let target = target.clone();
            tokio::spawn(async move { run(&controller, target.as_ref(), Some("eof".into())).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        controller.lock().unwrap().mark_manual_disconnect();

        assert_eq!(driver.await.unwrap(), ReconnectOutcome::Cancelled);
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_user_disconnect_never_reconnects() {
        let controller = Mutex::new(ReconnectController::new(3, DELAY, true));
        let target = FlakyTarget::new(0);
        controller.lock().unwrap().mark_manual_disconnect();

        assert_eq!(run(&controller, &target, None).await, ReconnectOutcome::Ignored);
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
    }
}
