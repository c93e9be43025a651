//! 安装请求处理器
//!
//! 每个请求按固定阶段顺序执行，任一阶段失败即返回对应结果：
//! 认证 → 授权 → 解析描述符 → 检查是否已安装 → 下载 → 安装 → 激活（可选） → 响应
//!
//! 同一扩展的安装阶段按 slug 串行，重复的并发请求不会同时下载或解压到同一位置。

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::downloader::PackageFetcher;
use super::types::{InstallError, InstallRequest, InstallResult, InstallStage};
use super::unpack::{CancellationToken, KindInstaller, PluginInstaller, ThemeInstaller};
use super::validator::PackageValidator;
use crate::auth::{Authorizer, NonceManager};
use crate::config::TimeoutSettings;
use crate::extension::{
    EndpointId, EventBus, ExtensionDescriptor, ExtensionKind, ExtensionRegistry, HubEvent,
    StatusOracle,
};
use crate::host::ExtensionHost;

/// 安装超时取消后，等待阻塞任务退出的上限
const CANCEL_GRACE: Duration = Duration::from_secs(10);

/// 处理器设置
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// 令牌绑定的动作名
    pub nonce_action: String,
    /// 下载临时目录
    pub temp_dir: PathBuf,
    pub timeouts: TimeoutSettings,
}

/// 安装请求处理器
pub struct InstallHandler {
    registry: Arc<ExtensionRegistry>,
    oracle: StatusOracle,
    host: Arc<dyn ExtensionHost>,
    authorizer: Arc<dyn Authorizer>,
    nonces: Arc<NonceManager>,
    fetcher: Arc<dyn PackageFetcher>,
    events: Arc<EventBus>,
    validator: PackageValidator,
    plugin_installer: Arc<PluginInstaller>,
    theme_installer: Arc<ThemeInstaller>,
    settings: HandlerSettings,
    locks: DashMap<EndpointId, Arc<Mutex<()>>>,
}

impl InstallHandler {
    pub fn new(
        registry: Arc<ExtensionRegistry>,
        host: Arc<dyn ExtensionHost>,
        authorizer: Arc<dyn Authorizer>,
        nonces: Arc<NonceManager>,
        fetcher: Arc<dyn PackageFetcher>,
        events: Arc<EventBus>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            oracle: StatusOracle::new(registry.clone(), host.clone()),
            plugin_installer: Arc::new(PluginInstaller::new(host.plugins_dir().to_path_buf())),
            theme_installer: Arc::new(ThemeInstaller::new(host.themes_dir().to_path_buf())),
            registry,
            host,
            authorizer,
            nonces,
            fetcher,
            events,
            validator: PackageValidator::new(),
            settings,
            locks: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &HandlerSettings {
        &self.settings
    }

    /// 处理绑定到 `target` 的安装请求
    ///
    /// 所有失败都以结果值返回，不会向调用方传播错误
    pub async fn handle(&self, target: &EndpointId, request: &InstallRequest) -> InstallResult {
        let slug = target.slug.as_str();

        // 阶段 1: 认证
        debug!("[InstallHandler] {} {}", slug, InstallStage::Authenticating);
        if let Err(e) = self.nonces.verify(
            request.token.as_deref(),
            &self.settings.nonce_action,
            &request.caller.user_id,
        ) {
            warn!("[InstallHandler] 令牌校验失败: slug={}, 原因={}", slug, e);
            return InstallResult::unauthorized(slug);
        }

        // 阶段 2: 授权
        debug!("[InstallHandler] {} {}", slug, InstallStage::Authorizing);
        if !self.authorizer.can_manage(&request.caller, target.kind) {
            warn!(
                "[InstallHandler] 用户 {} 无权安装{}: {}",
                request.caller.user_id, target.kind, slug
            );
            return InstallResult::unauthorized(slug);
        }

        // 阶段 3: 解析描述符
        debug!("[InstallHandler] {} {}", slug, InstallStage::Resolving);
        let descriptor = match self.registry.lookup(target.kind, slug) {
            Some(d) if d.slug == slug => d,
            _ => {
                info!("[InstallHandler] 未注册的扩展: {}", target);
                return InstallResult::unknown_slug(slug);
            }
        };

        self.events.emit(&HubEvent::InstallStarted {
            kind: target.kind,
            slug: slug.to_string(),
        });
        let started = Instant::now();

        let result = {
            let lock = self.slug_lock(target);
            let _guard = lock.lock().await;
            self.run_locked(&descriptor).await
        };
        // 没有其他请求持有或等待时回收该 slug 的锁
        self.locks.remove_if(target, |_, lock| Arc::strong_count(lock) == 1);

        if result.success {
            info!(
                "[InstallHandler] {} 完成: {} ({}ms)",
                slug,
                result.outcome,
                started.elapsed().as_millis()
            );
        } else {
            error!(
                "[InstallHandler] {} 失败: {} - {}",
                slug,
                result.outcome,
                result.detail.as_deref().unwrap_or("")
            );
        }

        self.events.emit(&HubEvent::InstallFinished {
            kind: target.kind,
            slug: slug.to_string(),
            outcome: result.outcome,
        });
        result
    }

    fn slug_lock(&self, target: &EndpointId) -> Arc<Mutex<()>> {
        self.locks
            .entry(target.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 持有 slug 锁时执行的阶段 4-7
    async fn run_locked(&self, descriptor: &ExtensionDescriptor) -> InstallResult {
        let slug = descriptor.slug.as_str();

        // 阶段 4: 已安装则直接返回
        debug!("[InstallHandler] {} {}", slug, InstallStage::Checking);
        if self.oracle.descriptor_installed(descriptor) {
            return InstallResult::already_installed(slug);
        }

        // 阶段 5: 下载
        let package = match self.download(descriptor).await {
            Ok(package) => package,
            Err(e) => return InstallResult::from_error(slug, &e),
        };

        // 阶段 6: 安装
        let installed_at = match self.install(descriptor, package).await {
            Ok(path) => path,
            Err(e) => return InstallResult::from_error(slug, &e),
        };

        // 阶段 7: 激活，失败时保留已安装的文件
        if descriptor.activate_after_install {
            debug!("[InstallHandler] {} {}", slug, InstallStage::Activating);
            if let Err(e) = self.activate(descriptor) {
                return InstallResult::from_error(slug, &e);
            }
            return InstallResult::success(
                slug,
                format!("{} 已安装并激活", descriptor.display_name),
            );
        }

        debug!(
            "[InstallHandler] {} {} -> {}",
            slug,
            InstallStage::Complete,
            installed_at.display()
        );
        InstallResult::success(slug, format!("{} 已安装", descriptor.display_name))
    }

    /// 下载到临时文件，返回的 `NamedTempFile` 在离开作用域时自动删除
    async fn download(
        &self,
        descriptor: &ExtensionDescriptor,
    ) -> Result<tempfile::NamedTempFile, InstallError> {
        let source = descriptor
            .download_source
            .as_ref()
            .ok_or_else(|| InstallError::NoSource(descriptor.slug.clone()))?;

        debug!("[InstallHandler] {} {}", descriptor.slug, InstallStage::Downloading);
        tokio::fs::create_dir_all(&self.settings.temp_dir)
            .await
            .map_err(|e| InstallError::DownloadFailed(format!("无法创建临时目录: {e}")))?;
        let package = tempfile::Builder::new()
            .prefix(&format!("{}-", descriptor.slug))
            .suffix(".pkg")
            .tempfile_in(&self.settings.temp_dir)
            .map_err(|e| InstallError::DownloadFailed(format!("无法创建临时文件: {e}")))?;

        let timeout = self.settings.timeouts.download_timeout();
        match tokio::time::timeout(timeout, self.fetcher.fetch(source, package.path())).await {
            Ok(Ok(bytes)) => {
                debug!("[InstallHandler] {} 下载 {} bytes", descriptor.slug, bytes);
                Ok(package)
            }
            // 下载阶段的所有错误都归为下载失败
            Ok(Err(e @ (InstallError::DownloadFailed(_) | InstallError::HttpStatus { .. }))) => {
                Err(e)
            }
            Ok(Err(e)) => Err(InstallError::DownloadFailed(e.to_string())),
            Err(_) => Err(InstallError::Timeout {
                stage: InstallStage::Downloading,
                timeout_ms: self.settings.timeouts.download_timeout_ms,
            }),
        }
    }

    /// 验证并解压安装，阻塞的文件操作放在 blocking 线程中执行
    async fn install(
        &self,
        descriptor: &ExtensionDescriptor,
        package: tempfile::NamedTempFile,
    ) -> Result<PathBuf, InstallError> {
        let installer: Arc<dyn KindInstaller> = match descriptor.kind {
            ExtensionKind::Plugin => self.plugin_installer.clone(),
            ExtensionKind::Theme => self.theme_installer.clone(),
        };
        let validator = self.validator;
        let owned = descriptor.clone();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let mut task = tokio::task::spawn_blocking(move || {
            let path: &Path = package.path();
            debug!("[InstallHandler] {} {}", owned.slug, InstallStage::Validating);
            validator.validate_checksum(path, owned.checksum.as_deref())?;
            let format = validator.validate_format(path)?;

            debug!("[InstallHandler] {} {}", owned.slug, InstallStage::Extracting);
            installer.install(path, format, &owned, &task_cancel)
        });

        let timeout = self.settings.timeouts.install_timeout();
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(InstallError::InstallFailed(format!(
                "安装任务异常退出: {join_error}"
            ))),
            Err(_) => {
                cancel.cancel();
                warn!("[InstallHandler] {} 安装超时，等待安装任务退出", descriptor.slug);

                // 持有 slug 锁等待任务结束，任务已完成移动时撤销安装目录
                match tokio::time::timeout(CANCEL_GRACE, &mut task).await {
                    Ok(Ok(Ok(placed))) => {
                        warn!("[InstallHandler] 超时后移除已放置的目录: {}", placed.display());
                        if let Err(e) = tokio::fs::remove_dir_all(&placed).await {
                            error!("[InstallHandler] 移除 {} 失败: {}", placed.display(), e);
                        }
                    }
                    Ok(_) => {}
                    Err(_) => error!("[InstallHandler] {} 安装任务未能在取消后退出", descriptor.slug),
                }

                Err(InstallError::Timeout {
                    stage: InstallStage::Installing,
                    timeout_ms: self.settings.timeouts.install_timeout_ms,
                })
            }
        }
    }

    fn activate(&self, descriptor: &ExtensionDescriptor) -> Result<(), InstallError> {
        let result = match descriptor.kind {
            ExtensionKind::Plugin => self.host.activate_plugin(&descriptor.locator),
            ExtensionKind::Theme => self.host.activate_theme(&descriptor.locator),
        };
        result.map_err(|e| InstallError::ActivationFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CapabilityAuthorizer, Caller};
    use crate::extension::{DispatchTable, DownloadSource, EventKind};
    use crate::host::{FsExtensionHost, HostError};
    use crate::installer::InstallOutcome;
    use async_trait::async_trait;
    use std::io::{Cursor, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const ACTION: &str = "install_extension";

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, content) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    /// 返回固定内容并计数的下载桩
    struct StubFetcher {
        body: Vec<u8>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl StubFetcher {
        fn new(body: Vec<u8>) -> Self {
            Self {
                body,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PackageFetcher for StubFetcher {
        async fn fetch(&self, _source: &DownloadSource, dest: &Path) -> Result<u64, InstallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            std::fs::write(dest, &self.body)?;
            Ok(self.body.len() as u64)
        }
    }

    /// 连接被重置的下载桩
    struct ResetFetcher;

    #[async_trait]
    impl PackageFetcher for ResetFetcher {
        async fn fetch(&self, _source: &DownloadSource, _dest: &Path) -> Result<u64, InstallError> {
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset").into())
        }
    }

    /// 激活总是失败的宿主
    struct NoActivateHost(FsExtensionHost);

    impl ExtensionHost for NoActivateHost {
        fn plugins_dir(&self) -> &Path {
            self.0.plugins_dir()
        }
        fn themes_dir(&self) -> &Path {
            self.0.themes_dir()
        }
        fn installed_plugins(&self) -> Vec<String> {
            self.0.installed_plugins()
        }
        fn is_plugin_active(&self, basename: &str) -> bool {
            self.0.is_plugin_active(basename)
        }
        fn installed_themes(&self) -> Vec<String> {
            self.0.installed_themes()
        }
        fn active_theme(&self) -> Option<String> {
            self.0.active_theme()
        }
        fn signal_present(&self, signal: &str) -> bool {
            self.0.signal_present(signal)
        }
        fn activate_plugin(&self, basename: &str) -> Result<(), HostError> {
            Err(HostError::ActivationFailed(basename.to_string()))
        }
        fn activate_theme(&self, directory: &str) -> Result<(), HostError> {
            Err(HostError::ActivationFailed(directory.to_string()))
        }
    }

    struct Fixture {
        handler: Arc<InstallHandler>,
        registry: Arc<ExtensionRegistry>,
        nonces: Arc<NonceManager>,
        oracle: StatusOracle,
        events: Arc<EventBus>,
        root: TempDir,
    }

    impl Fixture {
        fn token(&self, user: &str) -> String {
            self.nonces.create(ACTION, user)
        }

        fn admin_request(&self) -> InstallRequest {
            InstallRequest::new(self.token("admin"), Caller::admin("admin"))
        }

        fn temp_files(&self) -> usize {
            std::fs::read_dir(self.root.path().join("tmp"))
                .map(|d| d.count())
                .unwrap_or(0)
        }
    }

    fn fixture_with(
        fetcher: Arc<dyn PackageFetcher>,
        host_factory: impl FnOnce(&Path) -> Arc<dyn ExtensionHost>,
        timeouts: TimeoutSettings,
    ) -> Fixture {
        let root = TempDir::new().unwrap();
        let host = host_factory(root.path());
        let events = Arc::new(EventBus::new());
        let registry = Arc::new(ExtensionRegistry::new(
            "hub",
            Arc::new(DispatchTable::new()),
            events.clone(),
        ));
        let nonces = Arc::new(NonceManager::new(86_400));
        let handler = Arc::new(InstallHandler::new(
            registry.clone(),
            host.clone(),
            Arc::new(CapabilityAuthorizer),
            nonces.clone(),
            fetcher,
            events.clone(),
            HandlerSettings {
                nonce_action: ACTION.to_string(),
                temp_dir: root.path().join("tmp"),
                timeouts,
            },
        ));
        Fixture {
            oracle: StatusOracle::new(registry.clone(), host),
            handler,
            registry,
            nonces,
            events,
            root,
        }
    }

    fn fixture(fetcher: Arc<dyn PackageFetcher>) -> Fixture {
        fixture_with(
            fetcher,
            |root| Arc::new(FsExtensionHost::with_root(root).unwrap()),
            TimeoutSettings::default(),
        )
    }

    fn demo_plugin() -> ExtensionDescriptor {
        ExtensionDescriptor::plugin("demo-plugin", "Demo Plugin", "demo-plugin/plugin.json")
            .with_download_url("https://downloads.example.com/demo-plugin.zip")
            .unwrap()
    }

    fn demo_target() -> EndpointId {
        EndpointId::new(ExtensionKind::Plugin, "demo-plugin")
    }

    fn demo_zip() -> Vec<u8> {
        zip_bytes(&[("demo-plugin/plugin.json", "{}")])
    }

    #[tokio::test]
    async fn test_install_success_and_activate() {
        let fetcher = Arc::new(StubFetcher::new(demo_zip()));
        let f = fixture(fetcher.clone());
        f.registry.register(demo_plugin()).unwrap();

        let result = f.handler.handle(&demo_target(), &f.admin_request()).await;

        assert_eq!(result.outcome, InstallOutcome::Success, "{result:?}");
        assert!(result.success);
        assert_eq!(result.slug, "demo-plugin");
        assert!(f.oracle.is_installed("demo-plugin"));
        assert!(f.oracle.is_active("demo-plugin"));
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(f.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_install_without_activation() {
        let f = fixture(Arc::new(StubFetcher::new(demo_zip())));
        f.registry
            .register(demo_plugin().with_activate_after_install(false))
            .unwrap();

        let result = f.handler.handle(&demo_target(), &f.admin_request()).await;
        assert_eq!(result.outcome, InstallOutcome::Success);
        assert!(f.oracle.is_installed("demo-plugin"));
        assert!(!f.oracle.is_active("demo-plugin"));
    }

    #[tokio::test]
    async fn test_invalid_token_never_downloads() {
        let fetcher = Arc::new(StubFetcher::new(demo_zip()));
        let f = fixture(fetcher.clone());
        f.registry.register(demo_plugin()).unwrap();

        let forged = InstallRequest::new("0123456789abcdef0123", Caller::admin("admin"));
        let missing = InstallRequest::without_token(Caller::admin("admin"));
        let other_user = InstallRequest::new(f.token("mallory"), Caller::admin("admin"));

        for request in [forged, missing, other_user] {
            let result = f.handler.handle(&demo_target(), &request).await;
            assert_eq!(result.outcome, InstallOutcome::Unauthorized);
            assert_eq!(result.detail.as_deref(), Some("not permitted"));
        }
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_capability_unauthorized() {
        let fetcher = Arc::new(StubFetcher::new(demo_zip()));
        let f = fixture(fetcher.clone());
        f.registry.register(demo_plugin()).unwrap();

        let request = InstallRequest::new(f.token("guest"), Caller::new("guest"));
        let result = f.handler.handle(&demo_target(), &request).await;

        assert_eq!(result.outcome, InstallOutcome::Unauthorized);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_slug() {
        let f = fixture(Arc::new(StubFetcher::new(demo_zip())));
        let target = EndpointId::new(ExtensionKind::Plugin, "never-registered");
        let result = f.handler.handle(&target, &f.admin_request()).await;
        assert_eq!(result.outcome, InstallOutcome::UnknownSlug);
        assert_eq!(result.slug, "never-registered");
    }

    #[tokio::test]
    async fn test_already_installed_short_circuits() {
        let fetcher = Arc::new(StubFetcher::new(demo_zip()));
        let f = fixture(fetcher.clone());
        f.registry.register(demo_plugin()).unwrap();

        let first = f.handler.handle(&demo_target(), &f.admin_request()).await;
        let second = f.handler.handle(&demo_target(), &f.admin_request()).await;

        assert_eq!(first.outcome, InstallOutcome::Success);
        assert_eq!(second.outcome, InstallOutcome::AlreadyInstalled);
        assert!(second.success);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_no_download_source_is_install_failed() {
        let fetcher = Arc::new(StubFetcher::new(demo_zip()));
        let f = fixture(fetcher.clone());
        f.registry
            .register(ExtensionDescriptor::plugin(
                "demo-plugin",
                "Demo",
                "demo-plugin/plugin.json",
            ))
            .unwrap();

        let result = f.handler.handle(&demo_target(), &f.admin_request()).await;
        assert_eq!(result.outcome, InstallOutcome::InstallFailed);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_package_is_download_failed() {
        let f = fixture(Arc::new(StubFetcher::new(b"<html>502</html>".to_vec())));
        f.registry.register(demo_plugin()).unwrap();

        let result = f.handler.handle(&demo_target(), &f.admin_request()).await;
        assert_eq!(result.outcome, InstallOutcome::DownloadFailed);
        assert!(!f.oracle.is_installed("demo-plugin"));
        assert_eq!(f.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_download_failed() {
        let f = fixture(Arc::new(StubFetcher::new(demo_zip())));
        f.registry
            .register(demo_plugin().with_checksum("0".repeat(64)))
            .unwrap();

        let result = f.handler.handle(&demo_target(), &f.admin_request()).await;
        assert_eq!(result.outcome, InstallOutcome::DownloadFailed);
        assert!(!f.oracle.is_installed("demo-plugin"));
    }

    #[tokio::test]
    async fn test_bad_layout_is_install_failed() {
        let f = fixture(Arc::new(StubFetcher::new(zip_bytes(&[(
            "demo-plugin/readme.txt",
            "no entry file",
        )]))));
        f.registry.register(demo_plugin()).unwrap();

        let result = f.handler.handle(&demo_target(), &f.admin_request()).await;
        assert_eq!(result.outcome, InstallOutcome::InstallFailed);
        assert!(!f.oracle.is_installed("demo-plugin"));
        assert!(!f.root.path().join("plugins/demo-plugin").exists());
    }

    #[tokio::test]
    async fn test_download_timeout_cleans_temp_file() {
        let fetcher = Arc::new(StubFetcher::new(demo_zip()).with_delay(Duration::from_secs(5)));
        let f = fixture_with(
            fetcher,
            |root| Arc::new(FsExtensionHost::with_root(root).unwrap()),
            TimeoutSettings {
                download_timeout_ms: 50,
                install_timeout_ms: 10_000,
            },
        );
        f.registry.register(demo_plugin()).unwrap();

        let result = f.handler.handle(&demo_target(), &f.admin_request()).await;
        assert_eq!(result.outcome, InstallOutcome::DownloadFailed);
        assert_eq!(f.temp_files(), 0);
        assert!(!f.oracle.is_installed("demo-plugin"));
    }

    #[tokio::test]
    async fn test_fetch_io_error_is_download_failure() {
        let f = fixture(Arc::new(ResetFetcher));
        f.registry.register(demo_plugin()).unwrap();

        let result = f.handler.handle(&demo_target(), &f.admin_request()).await;
        assert_eq!(result.outcome, InstallOutcome::DownloadFailed);
        assert!(result.detail.unwrap().contains("connection reset"));
        assert_eq!(f.temp_files(), 0);
        assert!(!f.oracle.is_installed("demo-plugin"));
    }

    #[tokio::test]
    async fn test_install_timeout_leaves_nothing_behind() {
        let mut entries = vec![("demo-plugin/plugin.json".to_string(), "{}".to_string())];
        for i in 0..2000 {
            entries.push((format!("demo-plugin/assets/{i}.txt"), "x".repeat(256)));
        }
        let entries: Vec<(&str, &str)> = entries
            .iter()
            .map(|(name, content)| (name.as_str(), content.as_str()))
            .collect();
        let f = fixture_with(
            Arc::new(StubFetcher::new(zip_bytes(&entries))),
            |root| Arc::new(FsExtensionHost::with_root(root).unwrap()),
            TimeoutSettings {
                download_timeout_ms: 10_000,
                install_timeout_ms: 1,
            },
        );
        f.registry.register(demo_plugin()).unwrap();

        let result = f.handler.handle(&demo_target(), &f.admin_request()).await;
        // 超时返回失败时不能留下已安装的目录
        assert_eq!(f.oracle.is_installed("demo-plugin"), result.outcome.is_success());
        if result.outcome == InstallOutcome::InstallFailed {
            let leftovers = std::fs::read_dir(f.root.path().join("plugins"))
                .map(|d| d.count())
                .unwrap_or(0);
            assert_eq!(leftovers, 0);
        }
        assert_eq!(f.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_slug_locks_are_released() {
        let f = fixture(Arc::new(StubFetcher::new(demo_zip())));
        f.registry.register(demo_plugin()).unwrap();

        let first = f.handler.handle(&demo_target(), &f.admin_request()).await;
        assert_eq!(first.outcome, InstallOutcome::Success);
        assert!(f.handler.locks.is_empty());

        let second = f.handler.handle(&demo_target(), &f.admin_request()).await;
        assert_eq!(second.outcome, InstallOutcome::AlreadyInstalled);
        assert!(f.handler.locks.is_empty());
    }

    #[tokio::test]
    async fn test_activation_failure_keeps_install() {
        let f = fixture_with(
            Arc::new(StubFetcher::new(demo_zip())),
            |root| Arc::new(NoActivateHost(FsExtensionHost::with_root(root).unwrap())),
            TimeoutSettings::default(),
        );
        f.registry.register(demo_plugin()).unwrap();

        let result = f.handler.handle(&demo_target(), &f.admin_request()).await;
        assert_eq!(result.outcome, InstallOutcome::ActivationFailed);
        assert!(!result.success);
        assert!(f.oracle.is_installed("demo-plugin"));
        assert!(!f.oracle.is_active("demo-plugin"));

        // 重试时不会重新下载
        let retry = f.handler.handle(&demo_target(), &f.admin_request()).await;
        assert_eq!(retry.outcome, InstallOutcome::AlreadyInstalled);
    }

    #[tokio::test]
    async fn test_concurrent_requests_install_once() {
        let fetcher =
            Arc::new(StubFetcher::new(demo_zip()).with_delay(Duration::from_millis(100)));
        let f = fixture(fetcher.clone());
        f.registry.register(demo_plugin()).unwrap();

        let a = f.handler.clone();
        let b = f.handler.clone();
        let req_a = f.admin_request();
        let req_b = f.admin_request();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.handle(&demo_target(), &req_a).await }),
            tokio::spawn(async move { b.handle(&demo_target(), &req_b).await }),
        );
        let mut outcomes = vec![ra.unwrap().outcome, rb.unwrap().outcome];
        outcomes.sort_by_key(|o| o.as_str());

        assert_eq!(
            outcomes,
            vec![InstallOutcome::AlreadyInstalled, InstallOutcome::Success]
        );
        assert_eq!(fetcher.calls(), 1);
        assert!(f.handler.locks.is_empty());
    }

    #[tokio::test]
    async fn test_install_events() {
        let f = fixture(Arc::new(StubFetcher::new(demo_zip())));
        f.registry.register(demo_plugin()).unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        f.events.on(EventKind::InstallFinished, move |e| {
            if let HubEvent::InstallFinished { outcome, .. } = e {
                sink.lock().push(*outcome);
            }
        });

        f.handler.handle(&demo_target(), &f.admin_request()).await;
        assert_eq!(*seen.lock(), vec![InstallOutcome::Success]);
    }

    #[tokio::test]
    async fn test_theme_install() {
        let f = fixture(Arc::new(StubFetcher::new(zip_bytes(&[
            ("dark/theme.json", "{}"),
            ("dark/style.css", "body{}"),
        ]))));
        f.registry
            .register(
                ExtensionDescriptor::theme("dark", "Dark", "dark")
                    .with_download_url("https://downloads.example.com/dark.zip")
                    .unwrap(),
            )
            .unwrap();

        let target = EndpointId::new(ExtensionKind::Theme, "dark");
        let result = f.handler.handle(&target, &f.admin_request()).await;
        assert_eq!(result.outcome, InstallOutcome::Success);
        assert!(f.oracle.is_installed("dark"));
        assert!(f.oracle.is_active("dark"));
    }
}
