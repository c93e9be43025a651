//! 扩展类型定义
//!
//! 定义扩展种类、扩展描述符、下载来源和注册错误

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use url::Url;

/// slug 最大长度
pub const MAX_SLUG_LEN: usize = 64;

/// 注册相关错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("无效的 slug: {0}，只允许字母、数字、连字符和下划线")]
    InvalidSlug(String),

    #[error("无效的定位符: {0}")]
    InvalidLocator(String),

    #[error("无效的下载来源: {0}")]
    InvalidSource(String),

    #[error("无效的校验和: {0}")]
    InvalidChecksum(String),
}

/// 扩展种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionKind {
    Plugin,
    Theme,
}

impl ExtensionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionKind::Plugin => "plugin",
            ExtensionKind::Theme => "theme",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "plugin" | "plugins" => Some(ExtensionKind::Plugin),
            "theme" | "themes" => Some(ExtensionKind::Theme),
            _ => None,
        }
    }
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 下载来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadSource {
    /// http/https 地址
    Remote(Url),
    /// 本地文件（file:// 或绝对路径）
    Local(PathBuf),
}

impl DownloadSource {
    /// 解析下载来源
    pub fn parse(value: &str) -> Result<Self, HubError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(HubError::InvalidSource("下载地址为空".to_string()));
        }

        if Path::new(value).is_absolute() && !value.contains("://") {
            return Ok(DownloadSource::Local(PathBuf::from(value)));
        }

        let url = Url::parse(value).map_err(|e| HubError::InvalidSource(format!("{value}: {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(DownloadSource::Remote(url)),
            "file" => url
                .to_file_path()
                .map(DownloadSource::Local)
                .map_err(|_| HubError::InvalidSource(format!("无效的文件地址: {value}"))),
            scheme => Err(HubError::InvalidSource(format!(
                "不支持的协议 {scheme}，仅支持 http、https 和 file"
            ))),
        }
    }
}

impl fmt::Display for DownloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadSource::Remote(url) => write!(f, "{url}"),
            DownloadSource::Local(path) => write!(f, "file://{}", path.display()),
        }
    }
}

/// 扩展描述符
///
/// 注册后不可变；重新注册同一 slug 会整体替换描述符
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionDescriptor {
    pub kind: ExtensionKind,
    pub slug: String,
    pub display_name: String,
    /// 插件为 `<目录>/<入口文件>`，主题为目录名
    pub locator: String,
    pub download_source: Option<DownloadSource>,
    /// 扩展自行宣告激活时使用的信号名
    pub activation_signal: Option<String>,
    /// 下载包的 SHA-256（十六进制）
    pub checksum: Option<String>,
    /// 安装后是否激活
    pub activate_after_install: bool,
}

impl ExtensionDescriptor {
    /// 创建插件描述符
    pub fn plugin(
        slug: impl Into<String>,
        display_name: impl Into<String>,
        basename: impl Into<String>,
    ) -> Self {
        Self::new(ExtensionKind::Plugin, slug, display_name, basename)
    }

    /// 创建主题描述符
    pub fn theme(
        slug: impl Into<String>,
        display_name: impl Into<String>,
        directory: impl Into<String>,
    ) -> Self {
        Self::new(ExtensionKind::Theme, slug, display_name, directory)
    }

    fn new(
        kind: ExtensionKind,
        slug: impl Into<String>,
        display_name: impl Into<String>,
        locator: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            slug: slug.into(),
            display_name: display_name.into(),
            locator: locator.into(),
            download_source: None,
            activation_signal: None,
            checksum: None,
            activate_after_install: true,
        }
    }

    /// 设置下载来源
    pub fn with_download_url(mut self, url: &str) -> Result<Self, HubError> {
        self.download_source = Some(DownloadSource::parse(url)?);
        Ok(self)
    }

    pub fn with_download_source(mut self, source: DownloadSource) -> Self {
        self.download_source = Some(source);
        self
    }

    /// 设置激活信号
    pub fn with_activation_signal(mut self, signal: impl Into<String>) -> Self {
        self.activation_signal = Some(signal.into());
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_activate_after_install(mut self, activate: bool) -> Self {
        self.activate_after_install = activate;
        self
    }

    /// 验证描述符
    pub fn validate(&self) -> Result<(), HubError> {
        if !is_valid_slug(&self.slug) {
            return Err(HubError::InvalidSlug(self.slug.clone()));
        }

        let components = locator_components(&self.locator)
            .ok_or_else(|| HubError::InvalidLocator(self.locator.clone()))?;
        let expected_ok = match self.kind {
            ExtensionKind::Plugin => components.len() >= 2,
            ExtensionKind::Theme => components.len() == 1,
        };
        if !expected_ok {
            return Err(HubError::InvalidLocator(format!(
                "{} 定位符格式错误: {}",
                self.kind, self.locator
            )));
        }

        if let Some(checksum) = &self.checksum {
            if checksum.len() != 64 || !checksum.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(HubError::InvalidChecksum(checksum.clone()));
            }
        }

        Ok(())
    }

    /// 扩展在扩展目录中的顶层目录名
    pub fn install_dir_name(&self) -> &str {
        self.locator
            .split('/')
            .find(|c| !c.is_empty())
            .unwrap_or(&self.locator)
    }
}

/// 验证 slug 格式
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// 将定位符拆分为普通路径组件，出现 `..`、绝对路径等时返回 None
fn locator_components(locator: &str) -> Option<Vec<String>> {
    if locator.is_empty() || locator.contains('\\') {
        return None;
    }
    let path = Path::new(locator);
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}
