//! 扩展中心
//!
//! 进程启动时显式构建一次，把注册表、路由表、状态查询、令牌和安装处理器组合在一起，
//! 再以 `Arc<ExtensionHub>` 传给 HTTP 适配层或宿主代码。

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::{Authorizer, CapabilityAuthorizer, NonceManager};
use crate::config::{ConfigError, ExtensionEntry, HubConfig};
use crate::extension::{
    Binding, DispatchTable, DownloadSource, EndpointId, EventBus, EventKind, ExtensionDescriptor,
    ExtensionKind, ExtensionRegistry, HubError, HubEvent, StatusOracle, SubscriptionId,
};
use crate::host::{ExtensionHost, FsExtensionHost, HostError};
use crate::logger::{self, SharedLogStore};
use crate::installer::{
    HandlerSettings, HttpFetcher, InstallError, InstallHandler, InstallRequest, InstallResult,
    PackageFetcher,
};

/// 构建扩展中心失败
#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("宿主初始化失败: {0}")]
    Host(#[from] HostError),

    #[error("下载器初始化失败: {0}")]
    Fetcher(#[from] InstallError),
}

/// 扩展中心构建器
///
/// 未指定的协作方使用默认实现：文件系统宿主、按能力授权、HTTP 下载器
pub struct ExtensionHubBuilder {
    config: HubConfig,
    host: Option<Arc<dyn ExtensionHost>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    fetcher: Option<Arc<dyn PackageFetcher>>,
    nonces: Option<NonceManager>,
}

impl ExtensionHubBuilder {
    pub fn host(mut self, host: Arc<dyn ExtensionHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn PackageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn nonces(mut self, nonces: NonceManager) -> Self {
        self.nonces = Some(nonces);
        self
    }

    pub fn build(self) -> Result<ExtensionHub, BuildError> {
        let config = self.config;
        config.validate()?;

        let host = match self.host {
            Some(host) => host,
            None => Arc::new(FsExtensionHost::new(
                config.plugins_dir.clone(),
                config.themes_dir.clone(),
                config.state_file.clone(),
            )?),
        };
        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new()?),
        };
        let authorizer = self
            .authorizer
            .unwrap_or_else(|| Arc::new(CapabilityAuthorizer));
        let nonces = Arc::new(
            self.nonces
                .unwrap_or_else(|| NonceManager::new(config.nonce.lifetime_secs)),
        );

        let events = Arc::new(EventBus::new());
        let dispatch = Arc::new(DispatchTable::new());
        let registry = Arc::new(ExtensionRegistry::new(
            config.hook_prefix.clone(),
            dispatch.clone(),
            events.clone(),
        ));
        let handler = InstallHandler::new(
            registry.clone(),
            host.clone(),
            authorizer,
            nonces.clone(),
            fetcher,
            events.clone(),
            HandlerSettings {
                nonce_action: config.nonce.action.clone(),
                temp_dir: config.temp_dir.clone(),
                timeouts: config.timeouts.clone(),
            },
        );

        Ok(ExtensionHub {
            oracle: StatusOracle::new(registry.clone(), host.clone()),
            config,
            registry,
            dispatch,
            events,
            host,
            nonces,
            handler,
        })
    }
}

/// 扩展中心
pub struct ExtensionHub {
    config: HubConfig,
    registry: Arc<ExtensionRegistry>,
    dispatch: Arc<DispatchTable>,
    events: Arc<EventBus>,
    oracle: StatusOracle,
    host: Arc<dyn ExtensionHost>,
    nonces: Arc<NonceManager>,
    handler: InstallHandler,
}

impl ExtensionHub {
    pub fn builder(config: HubConfig) -> ExtensionHubBuilder {
        ExtensionHubBuilder {
            config,
            host: None,
            authorizer: None,
            fetcher: None,
            nonces: None,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn host(&self) -> &Arc<dyn ExtensionHost> {
        &self.host
    }

    pub fn oracle(&self) -> &StatusOracle {
        &self.oracle
    }

    // ========== 注册 ==========

    /// 注册描述符，同 slug 的旧描述符和端点会被替换
    pub fn register(&self, descriptor: ExtensionDescriptor) -> Result<Binding, HubError> {
        self.registry.register(descriptor)
    }

    /// 注册插件，`basename` 形如 `<目录>/<入口文件>`
    pub fn register_plugin(
        &self,
        slug: &str,
        name: &str,
        basename: &str,
        download_url: Option<&str>,
        activation_signal: Option<&str>,
    ) -> Result<Binding, HubError> {
        let descriptor = ExtensionDescriptor::plugin(slug, name, basename);
        self.register(with_optional(descriptor, download_url, activation_signal)?)
    }

    pub fn deregister_plugin(&self, slug: &str) -> bool {
        self.registry.deregister(ExtensionKind::Plugin, slug)
    }

    /// 注册主题，`directory` 为主题目录名
    pub fn register_theme(
        &self,
        slug: &str,
        name: &str,
        directory: &str,
        download_url: Option<&str>,
        activation_signal: Option<&str>,
    ) -> Result<Binding, HubError> {
        let descriptor = ExtensionDescriptor::theme(slug, name, directory);
        self.register(with_optional(descriptor, download_url, activation_signal)?)
    }

    pub fn deregister_theme(&self, slug: &str) -> bool {
        self.registry.deregister(ExtensionKind::Theme, slug)
    }

    /// 注册配置文件中列出的扩展，返回成功数量
    ///
    /// 单个条目无效时记录警告并跳过
    pub fn register_configured(&self) -> usize {
        let entries = self
            .config
            .plugins
            .iter()
            .map(|e| (ExtensionKind::Plugin, e))
            .chain(self.config.themes.iter().map(|e| (ExtensionKind::Theme, e)));

        let mut registered = 0;
        for (kind, entry) in entries {
            match descriptor_from_entry(kind, entry).and_then(|d| self.register(d)) {
                Ok(_) => registered += 1,
                Err(e) => warn!("[ExtensionHub] 跳过无效{}配置 {}: {}", kind, entry.slug, e),
            }
        }
        info!("[ExtensionHub] 已注册 {} 个配置扩展", registered);
        registered
    }

    // ========== 查询 ==========

    pub fn lookup(&self, kind: ExtensionKind, slug: &str) -> Option<Arc<ExtensionDescriptor>> {
        self.registry.lookup(kind, slug)
    }

    pub fn list(&self, kind: ExtensionKind) -> Vec<Arc<ExtensionDescriptor>> {
        self.registry.list(kind)
    }

    pub fn is_installed(&self, slug: &str) -> bool {
        self.oracle.is_installed(slug)
    }

    pub fn is_active(&self, slug: &str) -> bool {
        self.oracle.is_active(slug)
    }

    /// 已注册扩展的端点名
    pub fn endpoint_name(&self, kind: ExtensionKind, slug: &str) -> Option<String> {
        self.dispatch
            .get(&EndpointId::new(kind, slug))
            .map(|binding| binding.name)
    }

    pub fn endpoints(&self) -> Vec<Binding> {
        self.dispatch.list()
    }

    // ========== 安装 ==========

    /// 按端点名分发安装请求
    pub async fn dispatch(&self, endpoint: &str, request: &InstallRequest) -> InstallResult {
        match self.dispatch.resolve(endpoint) {
            Some(binding) => self.handler.handle(&binding.id, request).await,
            None => {
                info!("[ExtensionHub] 未知端点: {}", endpoint);
                InstallResult::unknown_slug(endpoint)
            }
        }
    }

    /// 直接按种类和 slug 安装
    pub async fn install(
        &self,
        kind: ExtensionKind,
        slug: &str,
        request: &InstallRequest,
    ) -> InstallResult {
        self.handler
            .handle(&EndpointId::new(kind, slug), request)
            .await
    }

    /// 为用户签发安装令牌
    pub fn create_nonce(&self, user: &str) -> String {
        self.nonces.create(&self.config.nonce.action, user)
    }

    // ========== 事件与配置 ==========

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&HubEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, callback)
    }

    /// 把事件以带前缀的名称（如 `extension_hub_registered`）写入日志存储
    pub fn attach_log_store(&self, store: &SharedLogStore) -> Vec<SubscriptionId> {
        let registry = self.registry.clone();
        logger::attach(store, &self.events, move || registry.hook_prefix())
    }

    pub fn hook_prefix(&self) -> String {
        self.registry.hook_prefix()
    }

    /// 修改前缀，只影响之后的注册
    pub fn set_hook_prefix(&self, prefix: impl Into<String>) {
        self.registry.set_hook_prefix(prefix)
    }
}

fn with_optional(
    descriptor: ExtensionDescriptor,
    download_url: Option<&str>,
    activation_signal: Option<&str>,
) -> Result<ExtensionDescriptor, HubError> {
    let descriptor = match download_url {
        Some(url) => descriptor.with_download_url(url)?,
        None => descriptor,
    };
    Ok(match activation_signal {
        Some(signal) => descriptor.with_activation_signal(signal),
        None => descriptor,
    })
}

/// 配置条目转换为描述符
pub fn descriptor_from_entry(
    kind: ExtensionKind,
    entry: &ExtensionEntry,
) -> Result<ExtensionDescriptor, HubError> {
    let mut descriptor = match kind {
        ExtensionKind::Plugin => {
            ExtensionDescriptor::plugin(&entry.slug, &entry.name, &entry.locator)
        }
        ExtensionKind::Theme => {
            ExtensionDescriptor::theme(&entry.slug, &entry.name, &entry.locator)
        }
    };
    if let Some(url) = &entry.download_url {
        descriptor = descriptor.with_download_source(DownloadSource::parse(url)?);
    }
    if let Some(signal) = &entry.activation_signal {
        descriptor = descriptor.with_activation_signal(signal);
    }
    if let Some(checksum) = &entry.checksum {
        descriptor = descriptor.with_checksum(checksum);
    }
    Ok(descriptor.with_activate_after_install(entry.activate))
}
