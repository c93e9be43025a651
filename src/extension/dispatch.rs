//! 分发绑定
//!
//! 把每个已注册的 (种类, slug) 绑定到一个确定命名的安装端点。
//! 端点名只用于对接宿主的字符串路由，内部查找使用 `EndpointId`。

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::types::ExtensionKind;

/// 端点标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EndpointId {
    pub kind: ExtensionKind,
    pub slug: String,
}

impl EndpointId {
    pub fn new(kind: ExtensionKind, slug: impl Into<String>) -> Self {
        Self {
            kind,
            slug: slug.into(),
        }
    }

    /// 端点名，例如 `extension_hub_install_plugin_demo`
    pub fn endpoint_name(&self, prefix: &str) -> String {
        format!("{}_install_{}_{}", prefix, self.kind, self.slug)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.slug)
    }
}

/// 一条路由绑定
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub id: EndpointId,
    /// 绑定时按当时前缀生成的端点名
    pub name: String,
    /// 单调递增的绑定代数，重新注册时变化
    pub generation: u64,
}

#[derive(Default)]
struct Routes {
    by_id: HashMap<EndpointId, Binding>,
    by_name: HashMap<String, EndpointId>,
}

/// 路由表
///
/// 只由注册表在其写锁内修改，保证与描述符同步增删
#[derive(Default)]
pub struct DispatchTable {
    routes: RwLock<Routes>,
    generation: AtomicU64,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建绑定，已存在的同 ID 绑定会先被移除
    pub(crate) fn bind(&self, id: EndpointId, prefix: &str) -> Binding {
        let mut routes = self.routes.write();
        if let Some(old) = routes.by_id.remove(&id) {
            routes.by_name.remove(&old.name);
        }

        let binding = Binding {
            name: id.endpoint_name(prefix),
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            id: id.clone(),
        };
        routes.by_name.insert(binding.name.clone(), id.clone());
        routes.by_id.insert(id, binding.clone());
        debug!("[DispatchTable] 绑定端点: {}", binding.name);
        binding
    }

    /// 移除绑定
    pub(crate) fn unbind(&self, id: &EndpointId) -> Option<Binding> {
        let mut routes = self.routes.write();
        let binding = routes.by_id.remove(id)?;
        routes.by_name.remove(&binding.name);
        debug!("[DispatchTable] 移除端点: {}", binding.name);
        Some(binding)
    }

    /// 按端点名解析
    pub fn resolve(&self, name: &str) -> Option<Binding> {
        let routes = self.routes.read();
        let id = routes.by_name.get(name)?;
        routes.by_id.get(id).cloned()
    }

    pub fn get(&self, id: &EndpointId) -> Option<Binding> {
        self.routes.read().by_id.get(id).cloned()
    }

    /// 某个 slug 的全部绑定（两种种类）
    pub fn bindings_for_slug(&self, slug: &str) -> Vec<Binding> {
        self.routes
            .read()
            .by_id
            .values()
            .filter(|b| b.id.slug == slug)
            .cloned()
            .collect()
    }

    /// 全部绑定，按端点名排序
    pub fn list(&self) -> Vec<Binding> {
        let mut bindings: Vec<Binding> = self.routes.read().by_id.values().cloned().collect();
        bindings.sort_by(|a, b| a.name.cmp(&b.name));
        bindings
    }

    pub fn len(&self) -> usize {
        self.routes.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
