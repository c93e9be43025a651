//! 扩展事件总线
//!
//! 作用域限定在单个 Hub 内的观察者接口，替代宿主的全局钩子系统：
//! - `on(kind, callback)` 订阅某类事件
//! - `emit(event)` 同步分发给该类事件的所有订阅者

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::ExtensionKind;
use crate::installer::InstallOutcome;

/// 事件种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Registered,
    Deregistered,
    InstallStarted,
    InstallFinished,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Registered => "registered",
            EventKind::Deregistered => "deregistered",
            EventKind::InstallStarted => "install_started",
            EventKind::InstallFinished => "install_finished",
        }
    }
}

/// 事件载荷
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HubEvent {
    Registered {
        kind: ExtensionKind,
        slug: String,
        name: String,
        basename: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        download_url: Option<String>,
    },
    Deregistered {
        kind: ExtensionKind,
        slug: String,
    },
    InstallStarted {
        kind: ExtensionKind,
        slug: String,
    },
    InstallFinished {
        kind: ExtensionKind,
        slug: String,
        outcome: InstallOutcome,
    },
}

impl HubEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            HubEvent::Registered { .. } => EventKind::Registered,
            HubEvent::Deregistered { .. } => EventKind::Deregistered,
            HubEvent::InstallStarted { .. } => EventKind::InstallStarted,
            HubEvent::InstallFinished { .. } => EventKind::InstallFinished,
        }
    }

    pub fn slug(&self) -> &str {
        match self {
            HubEvent::Registered { slug, .. }
            | HubEvent::Deregistered { slug, .. }
            | HubEvent::InstallStarted { slug, .. }
            | HubEvent::InstallFinished { slug, .. } => slug,
        }
    }

    /// 带前缀的事件名，例如 `extension_hub_registered`
    pub fn name(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.kind().as_str())
    }
}

/// 事件回调
pub type EventCallback = Arc<dyn Fn(&HubEvent) + Send + Sync>;

/// 订阅 ID，用于取消订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// 事件总线
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<(SubscriptionId, EventCallback)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅事件
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&HubEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// 订阅所有事件
    pub fn on_all<F>(&self, callback: F) -> Vec<SubscriptionId>
    where
        F: Fn(&HubEvent) + Send + Sync + 'static,
    {
        let callback: EventCallback = Arc::new(callback);
        [
            EventKind::Registered,
            EventKind::Deregistered,
            EventKind::InstallStarted,
            EventKind::InstallFinished,
        ]
        .into_iter()
        .map(|kind| {
            let callback = callback.clone();
            self.on(kind, move |event| callback(event))
        })
        .collect()
    }

    /// 取消订阅
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let mut removed = false;
        for entries in listeners.values_mut() {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            removed |= entries.len() != before;
        }
        removed
    }

    /// 分发事件
    ///
    /// 回调在锁外执行，回调内可以再次订阅或发送事件
    pub fn emit(&self, event: &HubEvent) {
        let callbacks: Vec<EventCallback> = self
            .listeners
            .read()
            .get(&event.kind())
            .map(|entries| entries.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        for callback in callbacks {
            callback(event);
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }
}
