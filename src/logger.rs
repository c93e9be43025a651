//! 日志管理模块
//!
//! - `init_tracing`: 初始化 tracing 订阅者
//! - `LogStore`: 内存中保留最近的扩展活动日志，可同时追加到日志文件
//! - `sanitize_log_message`: 写入前脱敏令牌、密码等字段

use chrono::{Duration, Local, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::extension::{EventBus, HubEvent, SubscriptionId};

/// 初始化 tracing，`RUST_LOG` 优先于配置中的级别
///
/// 重复调用时忽略，测试中可以多次调用
pub fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[derive(Debug, Clone)]
pub struct LogStoreConfig {
    pub max_logs: usize,
    pub retention_days: u32,
    pub max_file_size: u64,
    pub enable_file_logging: bool,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            max_logs: 1000,
            retention_days: 7,
            max_file_size: 10 * 1024 * 1024,
            enable_file_logging: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub message: String,
}

/// 扩展活动日志
pub struct LogStore {
    logs: VecDeque<LogEntry>,
    config: LogStoreConfig,
    log_file_path: Option<PathBuf>,
}

pub type SharedLogStore = Arc<RwLock<LogStore>>;

fn default_log_file() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("extension-hub")
        .join("logs")
        .join("extension-hub.log")
}

impl LogStore {
    /// 只保存在内存中
    pub fn in_memory(max_logs: usize) -> Self {
        Self {
            logs: VecDeque::new(),
            config: LogStoreConfig {
                max_logs,
                enable_file_logging: false,
                ..LogStoreConfig::default()
            },
            log_file_path: None,
        }
    }

    /// 按日志配置创建，未指定文件时使用数据目录下的默认路径
    pub fn with_config(logging: &LoggingConfig) -> Self {
        let config = LogStoreConfig {
            retention_days: logging.retention_days,
            enable_file_logging: logging.enabled,
            ..LogStoreConfig::default()
        };
        let log_file_path = logging.enabled.then(|| {
            let path = logging.file.clone().unwrap_or_else(default_log_file);
            if let Some(dir) = path.parent() {
                let _ = fs::create_dir_all(dir);
            }
            path
        });
        Self {
            logs: VecDeque::new(),
            config,
            log_file_path,
        }
    }

    pub fn shared(self) -> SharedLogStore {
        Arc::new(RwLock::new(self))
    }

    pub fn add(&mut self, level: &str, message: &str) {
        let sanitized = sanitize_log_message(message);
        self.logs.push_back(LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string(),
            message: sanitized.clone(),
        });
        while self.logs.len() > self.config.max_logs {
            self.logs.pop_front();
        }

        if self.config.enable_file_logging {
            if let Some(path) = &self.log_file_path {
                self.rotate_log_file_if_needed(path);
                let local_time = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                let line = format!("{} [{}] {}\n", local_time, level.to_uppercase(), sanitized);
                if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
                    let _ = file.write_all(line.as_bytes());
                }
            }
        }
    }

    /// 记录一条扩展事件，`prefix` 为当前的钩子前缀
    pub fn record_event(&mut self, prefix: &str, event: &HubEvent) {
        let (level, message) = match event {
            HubEvent::Registered {
                kind,
                slug,
                name,
                download_url,
                ..
            } => (
                "info",
                format!(
                    "注册{} {} ({})，下载来源: {}",
                    kind,
                    slug,
                    name,
                    download_url.as_deref().unwrap_or("无")
                ),
            ),
            HubEvent::Deregistered { kind, slug } => ("info", format!("注销{} {}", kind, slug)),
            HubEvent::InstallStarted { kind, slug } => {
                ("info", format!("开始安装{} {}", kind, slug))
            }
            HubEvent::InstallFinished {
                kind,
                slug,
                outcome,
            } => {
                let level = if outcome.is_success() { "info" } else { "error" };
                (level, format!("安装{} {} 结束: {}", kind, slug, outcome))
            }
        };
        self.add(level, &format!("[{}] {}", event.name(prefix), message));
    }

    pub fn get_logs(&self) -> Vec<LogEntry> {
        self.logs.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.logs.clear();
    }

    pub fn get_log_file_path(&self) -> Option<&Path> {
        self.log_file_path.as_deref()
    }

    fn rotate_log_file_if_needed(&self, path: &Path) {
        let Ok(metadata) = fs::metadata(path) else {
            return;
        };
        if metadata.len() <= self.config.max_file_size {
            return;
        }

        let suffix = Local::now().format("%Y%m%d-%H%M%S");
        let rotated = path.with_file_name(format!(
            "{}.{}",
            path.file_name().unwrap_or_default().to_string_lossy(),
            suffix
        ));
        let _ = fs::rename(path, &rotated);
        self.prune_old_logs(path);
    }

    /// 删除超过保留天数的轮转文件
    fn prune_old_logs(&self, path: &Path) {
        let Some(dir) = path.parent() else {
            return;
        };
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        let cutoff = Utc::now() - Duration::days(i64::from(self.config.retention_days));
        let prefix = format!(
            "{}.",
            path.file_name().unwrap_or_default().to_string_lossy()
        );

        for entry in entries.flatten() {
            if !entry.file_name().to_string_lossy().starts_with(&prefix) {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if chrono::DateTime::<Utc>::from(modified) < cutoff {
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

/// 把事件总线上的所有事件记录到日志
///
/// 每条事件记录时都会重新读取前缀，修改前缀后的事件使用新名称。
pub fn attach<P>(store: &SharedLogStore, events: &EventBus, hook_prefix: P) -> Vec<SubscriptionId>
where
    P: Fn() -> String + Send + Sync + 'static,
{
    let store = store.clone();
    events.on_all(move |event| store.write().record_event(&hook_prefix(), event))
}

static SANITIZE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"Bearer\s+[A-Za-z0-9._-]+", "Bearer ***"),
        (r#"nonce["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#, "nonce: ***"),
        (r#"token["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#, "token: ***"),
        (
            r#"api[_-]?key["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
            "api_key: ***",
        ),
        (r#"password["']?\s*[:=]\s*["']?[^\s"',}]+"#, "password: ***"),
        (
            r#"secret["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
            "secret: ***",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// 日志脱敏
pub fn sanitize_log_message(message: &str) -> String {
    let mut sanitized = message.to_string();
    for (re, replacement) in SANITIZE_PATTERNS.iter() {
        sanitized = re.replace_all(&sanitized, *replacement).to_string();
    }
    sanitized
}
