//! 扩展注册表
//!
//! 进程内的 slug → 描述符映射，插件和主题各一张表：
//! - 按插入顺序保存，用于确定性的列表展示
//! - 注册/注销与分发绑定在同一把写锁内同步增删
//! - 注册/注销成功后发送通知事件

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

use super::dispatch::{Binding, DispatchTable, EndpointId};
use super::events::{EventBus, HubEvent};
use super::types::{ExtensionDescriptor, ExtensionKind, HubError};

#[derive(Default)]
struct Tables {
    plugins: IndexMap<String, Arc<ExtensionDescriptor>>,
    themes: IndexMap<String, Arc<ExtensionDescriptor>>,
}

impl Tables {
    fn table(&self, kind: ExtensionKind) -> &IndexMap<String, Arc<ExtensionDescriptor>> {
        match kind {
            ExtensionKind::Plugin => &self.plugins,
            ExtensionKind::Theme => &self.themes,
        }
    }

    fn table_mut(
        &mut self,
        kind: ExtensionKind,
    ) -> &mut IndexMap<String, Arc<ExtensionDescriptor>> {
        match kind {
            ExtensionKind::Plugin => &mut self.plugins,
            ExtensionKind::Theme => &mut self.themes,
        }
    }
}

/// 扩展注册表
pub struct ExtensionRegistry {
    tables: RwLock<Tables>,
    dispatch: Arc<DispatchTable>,
    events: Arc<EventBus>,
    hook_prefix: RwLock<String>,
}

impl ExtensionRegistry {
    pub fn new(
        hook_prefix: impl Into<String>,
        dispatch: Arc<DispatchTable>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            dispatch,
            events,
            hook_prefix: RwLock::new(hook_prefix.into()),
        }
    }

    /// 注册扩展
    ///
    /// 同一种类下 slug 已存在时先注销旧描述符及其端点，再插入新的
    pub fn register(&self, descriptor: ExtensionDescriptor) -> Result<Binding, HubError> {
        descriptor.validate()?;

        let kind = descriptor.kind;
        let slug = descriptor.slug.clone();
        let mut pending = Vec::with_capacity(2);

        let binding = {
            let prefix = self.hook_prefix.read().clone();
            let mut tables = self.tables.write();
            let table = tables.table_mut(kind);

            if table.shift_remove(&slug).is_some() {
                self.dispatch.unbind(&EndpointId::new(kind, slug.clone()));
                pending.push(HubEvent::Deregistered {
                    kind,
                    slug: slug.clone(),
                });
            }

            pending.push(HubEvent::Registered {
                kind,
                slug: slug.clone(),
                name: descriptor.display_name.clone(),
                basename: descriptor.locator.clone(),
                download_url: descriptor.download_source.as_ref().map(|s| s.to_string()),
            });
            table.insert(slug.clone(), Arc::new(descriptor));
            self.dispatch.bind(EndpointId::new(kind, slug.clone()), &prefix)
        };

        info!(
            "[ExtensionRegistry] 注册{}: {} -> {}",
            kind, slug, binding.name
        );
        for event in &pending {
            self.events.emit(event);
        }
        Ok(binding)
    }

    /// 注销扩展，返回是否有内容被移除
    pub fn deregister(&self, kind: ExtensionKind, slug: &str) -> bool {
        let removed = {
            let mut tables = self.tables.write();
            let removed = tables.table_mut(kind).shift_remove(slug).is_some();
            if removed {
                self.dispatch.unbind(&EndpointId::new(kind, slug));
            }
            removed
        };

        if removed {
            info!("[ExtensionRegistry] 注销{}: {}", kind, slug);
            self.events.emit(&HubEvent::Deregistered {
                kind,
                slug: slug.to_string(),
            });
        }
        removed
    }

    /// 按 slug 查找
    pub fn lookup(&self, kind: ExtensionKind, slug: &str) -> Option<Arc<ExtensionDescriptor>> {
        self.tables.read().table(kind).get(slug).cloned()
    }

    /// 按插入顺序列出
    pub fn list(&self, kind: ExtensionKind) -> Vec<Arc<ExtensionDescriptor>> {
        self.tables.read().table(kind).values().cloned().collect()
    }

    pub fn contains(&self, kind: ExtensionKind, slug: &str) -> bool {
        self.tables.read().table(kind).contains_key(slug)
    }

    pub fn len(&self, kind: ExtensionKind) -> usize {
        self.tables.read().table(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        let tables = self.tables.read();
        tables.plugins.is_empty() && tables.themes.is_empty()
    }

    pub fn hook_prefix(&self) -> String {
        self.hook_prefix.read().clone()
    }

    /// 修改前缀，已有绑定保持旧名称，需要调用方重新注册
    pub fn set_hook_prefix(&self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        if !self.is_empty() {
            warn!(
                "[ExtensionRegistry] 已有注册时修改前缀为 {}，现有端点名称不会更新",
                prefix
            );
        }
        *self.hook_prefix.write() = prefix;
    }

    pub fn dispatch(&self) -> &Arc<DispatchTable> {
        &self.dispatch
    }
}
