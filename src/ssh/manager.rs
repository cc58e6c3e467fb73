// SSH 会话管理器
// 管理多个并存的连接器（每个标签页一个），按会话 ID 索引

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use super::connector::{Connector, TerminalSink};
use super::error::SshError;
use super::prompt::HostKeyPrompt;
use crate::models::ServerProfile;
use crate::services::AppServices;

pub struct SshManager {
    services: Arc<AppServices>,
    prompt: HostKeyPrompt,
    /// 活跃会话映射表 (Session ID -> Connector)
    sessions: RwLock<HashMap<String, Arc<Connector>>>,
}

impl SshManager {
    /// 所有会话共用同一个主机密钥确认通道；每个会话有自己的挂起标记，可以同时等待确认
    pub fn new(services: Arc<AppServices>, prompt: HostKeyPrompt) -> Self {
        Self {
            services,
            prompt,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn services(&self) -> &AppServices {
        &self.services
    }

    /// 为档案打开一个新会话（尚未连接）
    pub fn open(
        &self,
        profile: ServerProfile,
        sink: Arc<dyn TerminalSink>,
    ) -> Result<Arc<Connector>, SshError> {
        let connector = Arc::new(Connector::new(
            profile,
            &self.services,
            self.prompt.clone(),
            sink,
        )?);
        let id = connector.session_id().to_string();
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, connector.clone());
        Ok(connector)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connector>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// 会话 ID 列表（按打开顺序）
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<(u64, String)> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .map(|id| (sequence_of(id), id.clone()))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// 断开并移除会话
    pub fn close(&self, id: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        match removed {
            Some(connector) => {
                info!("[SSH Manager] Closing session {}", id);
                connector.disconnect();
                true
            }
            None => false,
        }
    }

    /// 断开全部会话
    pub fn close_all(&self) {
        let sessions: Vec<_> = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (id, connector) in sessions {
            info!("[SSH Manager] Closing session {}", id);
            connector.disconnect();
        }
    }
}

/// "session-12" -> 12
fn sequence_of(id: &str) -> u64 {
    id.rsplit('-')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(u64::MAX)
}
