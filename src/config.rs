//! 配置模块
//!
//! 从 YAML 文件加载 Hub 配置，所有字段都有默认值：
//! - hook 前缀（用于端点名称和事件名称的命名空间）
//! - 扩展目录、临时目录
//! - 下载/安装超时
//! - nonce 设置
//! - 日志设置
//! - 启动时注册的扩展列表

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// 默认 hook 前缀
pub const DEFAULT_HOOK_PREFIX: &str = "extension_hub";

/// 默认 nonce 动作名
pub const DEFAULT_NONCE_ACTION: &str = "install_extension";

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("无法读取配置文件 {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("配置文件解析失败: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("配置无效: {0}")]
    Invalid(String),
}

fn default_data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("extension-hub")
}

/// Hub 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    /// 端点与事件名称前缀
    pub hook_prefix: String,
    /// 插件目录
    pub plugins_dir: PathBuf,
    /// 主题目录
    pub themes_dir: PathBuf,
    /// 下载临时目录
    pub temp_dir: PathBuf,
    /// 激活状态文件
    pub state_file: PathBuf,
    pub timeouts: TimeoutSettings,
    pub nonce: NonceSettings,
    pub server: ServerSettings,
    pub logging: LoggingConfig,
    /// 启动时注册的插件
    pub plugins: Vec<ExtensionEntry>,
    /// 启动时注册的主题
    pub themes: Vec<ExtensionEntry>,
}

impl Default for HubConfig {
    fn default() -> Self {
        let root = default_data_root();
        Self {
            hook_prefix: DEFAULT_HOOK_PREFIX.to_string(),
            plugins_dir: root.join("plugins"),
            themes_dir: root.join("themes"),
            temp_dir: std::env::temp_dir().join("extension-hub"),
            state_file: root.join("activation.json"),
            timeouts: TimeoutSettings::default(),
            nonce: NonceSettings::default(),
            server: ServerSettings::default(),
            logging: LoggingConfig::default(),
            plugins: Vec::new(),
            themes: Vec::new(),
        }
    }
}

impl HubConfig {
    /// 从 YAML 文件加载配置
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// 从 YAML 字符串解析配置
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: HubConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 以指定根目录构建配置，扩展目录和临时目录都位于其下
    pub fn with_root(root: &Path) -> Self {
        Self {
            plugins_dir: root.join("plugins"),
            themes_dir: root.join("themes"),
            temp_dir: root.join("tmp"),
            state_file: root.join("activation.json"),
            ..Self::default()
        }
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hook_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("hook_prefix 不能为空".to_string()));
        }
        if self.timeouts.download_timeout_ms == 0 || self.timeouts.install_timeout_ms == 0 {
            return Err(ConfigError::Invalid("超时时间必须大于 0".to_string()));
        }
        if self.nonce.action.trim().is_empty() {
            return Err(ConfigError::Invalid("nonce.action 不能为空".to_string()));
        }
        if self.nonce.lifetime_secs < 2 {
            return Err(ConfigError::Invalid(
                "nonce.lifetime_secs 不能小于 2".to_string(),
            ));
        }
        if let Some(entry) = self
            .server
            .api_keys
            .iter()
            .find(|entry| entry.key.is_empty() || entry.user_id.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "api_keys 条目的 key 和 user_id 不能为空: user_id='{}'",
                entry.user_id
            )));
        }
        Ok(())
    }
}

/// 超时设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutSettings {
    /// 下载超时（毫秒）
    pub download_timeout_ms: u64,
    /// 解压安装超时（毫秒）
    pub install_timeout_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            download_timeout_ms: 300_000,
            install_timeout_ms: 120_000,
        }
    }
}

impl TimeoutSettings {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_millis(self.install_timeout_ms)
    }
}

/// nonce 设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NonceSettings {
    /// nonce 绑定的动作名，可通过配置覆盖
    pub action: String,
    /// nonce 有效期（秒），按两个半周期 tick 计算
    pub lifetime_secs: u64,
}

impl Default for NonceSettings {
    fn default() -> Self {
        Self {
            action: DEFAULT_NONCE_ACTION.to_string(),
            lifetime_secs: 86_400,
        }
    }
}

/// HTTP 服务设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub listen: String,
    /// 请求体大小上限
    pub max_body_bytes: usize,
    /// API 密钥与调用方身份的映射，为空时拒绝所有写操作
    pub api_keys: Vec<ApiKeyEntry>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8731".to_string(),
            max_body_bytes: 64 * 1024,
            api_keys: Vec::new(),
        }
    }
}

/// 单个 API 密钥及其对应的调用方
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiKeyEntry {
    pub key: String,
    pub user_id: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（trace/debug/info/warn/error），RUST_LOG 优先
    pub level: String,
    /// 是否写入日志文件
    pub enabled: bool,
    pub retention_days: u32,
    /// 日志文件路径，为空时使用默认路径
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            enabled: true,
            retention_days: 7,
            file: None,
        }
    }
}

/// 启动时注册的扩展条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtensionEntry {
    pub slug: String,
    pub name: String,
    /// 插件为 `<目录>/<入口文件>`，主题为目录名
    pub locator: String,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub activation_signal: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default = "default_activate")]
    pub activate: bool,
}

fn default_activate() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HubConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hook_prefix, DEFAULT_HOOK_PREFIX);
        assert_eq!(config.nonce.action, DEFAULT_NONCE_ACTION);
    }

    #[test]
    fn test_parse_yaml_with_extensions() {
        let yaml = r#"
hook_prefix: acme
timeouts:
  download_timeout_ms: 1000
plugins:
  - slug: demo-plugin
    name: Demo Plugin
    locator: demo-plugin/plugin.json
    download_url: https://example.com/demo.zip
themes:
  - slug: dark
    name: Dark Theme
    locator: dark
    activate: false
"#;
        let config = HubConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.hook_prefix, "acme");
        assert_eq!(config.timeouts.download_timeout_ms, 1000);
        assert_eq!(config.timeouts.install_timeout_ms, 120_000);
        assert_eq!(config.plugins.len(), 1);
        assert!(config.plugins[0].activate);
        assert_eq!(
            config.plugins[0].download_url.as_deref(),
            Some("https://example.com/demo.zip")
        );
        assert!(!config.themes[0].activate);
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let result = HubConfig::from_yaml("hook_prefix: ''");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = HubConfig::from_yaml("timeouts:\n  install_timeout_ms: 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_parse_api_keys() {
        let yaml = r#"
server:
  api_keys:
    - key: s3cret
      user_id: admin
      capabilities: [install_plugins, install_themes]
    - key: readonly
      user_id: guest
"#;
        let config = HubConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.api_keys.len(), 2);
        assert_eq!(config.server.api_keys[0].capabilities.len(), 2);
        assert!(config.server.api_keys[1].capabilities.is_empty());

        let result = HubConfig::from_yaml("server:\n  api_keys:\n    - key: ''\n      user_id: x");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = HubConfig::load(Path::new("/definitely/not/here.yaml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
