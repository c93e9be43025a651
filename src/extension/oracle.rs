//! 安装/激活状态查询
//!
//! 两级解析：已注册的 slug 使用描述符自身的检查逻辑，
//! 未注册的 slug 回退到宿主的实时扩展列表，始终返回确定的布尔值。

use std::sync::Arc;

use super::registry::ExtensionRegistry;
use super::types::{ExtensionDescriptor, ExtensionKind};
use crate::host::ExtensionHost;

/// 状态查询器
#[derive(Clone)]
pub struct StatusOracle {
    registry: Arc<ExtensionRegistry>,
    host: Arc<dyn ExtensionHost>,
}

impl StatusOracle {
    pub fn new(registry: Arc<ExtensionRegistry>, host: Arc<dyn ExtensionHost>) -> Self {
        Self { registry, host }
    }

    /// slug 是否已安装
    ///
    /// 同一 slug 同时注册为插件和主题时以插件为准
    pub fn is_installed(&self, slug: &str) -> bool {
        match self.registered(slug) {
            Some(descriptor) => self.descriptor_installed(&descriptor),
            None => self.live_installed(slug),
        }
    }

    /// slug 是否已激活
    pub fn is_active(&self, slug: &str) -> bool {
        match self.registered(slug) {
            Some(descriptor) => self.descriptor_active(&descriptor),
            None => self.live_active(slug),
        }
    }

    /// 指定种类的安装状态
    pub fn is_installed_as(&self, kind: ExtensionKind, slug: &str) -> bool {
        match self.registry.lookup(kind, slug) {
            Some(descriptor) => self.descriptor_installed(&descriptor),
            None => match kind {
                ExtensionKind::Plugin => self.live_plugin_basename(slug).is_some(),
                ExtensionKind::Theme => self.host.installed_themes().iter().any(|t| t == slug),
            },
        }
    }

    /// 描述符对应的扩展是否已安装
    pub fn descriptor_installed(&self, descriptor: &ExtensionDescriptor) -> bool {
        match descriptor.kind {
            ExtensionKind::Plugin => self.host.is_plugin_installed(&descriptor.locator),
            ExtensionKind::Theme => self
                .host
                .installed_themes()
                .iter()
                .any(|t| t == &descriptor.locator),
        }
    }

    /// 描述符对应的扩展是否已激活
    pub fn descriptor_active(&self, descriptor: &ExtensionDescriptor) -> bool {
        if let Some(signal) = &descriptor.activation_signal {
            return self.host.signal_present(signal);
        }
        match descriptor.kind {
            ExtensionKind::Plugin => self.host.is_plugin_active(&descriptor.locator),
            ExtensionKind::Theme => {
                self.host.active_theme().as_deref() == Some(descriptor.locator.as_str())
            }
        }
    }

    fn registered(&self, slug: &str) -> Option<Arc<ExtensionDescriptor>> {
        self.registry
            .lookup(ExtensionKind::Plugin, slug)
            .or_else(|| self.registry.lookup(ExtensionKind::Theme, slug))
    }

    /// 未注册时按目录名在宿主插件列表中查找
    fn live_plugin_basename(&self, slug: &str) -> Option<String> {
        self.host
            .installed_plugins()
            .into_iter()
            .find(|basename| basename.split('/').next() == Some(slug))
    }

    fn live_installed(&self, slug: &str) -> bool {
        self.live_plugin_basename(slug).is_some()
            || self.host.installed_themes().iter().any(|t| t == slug)
    }

    fn live_active(&self, slug: &str) -> bool {
        let plugin_active = self
            .host
            .installed_plugins()
            .iter()
            .filter(|basename| basename.split('/').next() == Some(slug))
            .any(|basename| self.host.is_plugin_active(basename));

        plugin_active || self.host.active_theme().as_deref() == Some(slug)
    }
}
