//! 宿主接口
//!
//! 扩展目录扫描、激活状态和激活调用属于宿主应用，这里只定义核心需要的接口，
//! 并提供一个基于文件系统的实现 `FsExtensionHost`。

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// 主题目录中必须存在的清单文件
pub const THEME_MANIFEST: &str = "theme.json";

/// 宿主错误
#[derive(Error, Debug)]
pub enum HostError {
    #[error("扩展未安装: {0}")]
    NotInstalled(String),

    #[error("激活失败: {0}")]
    ActivationFailed(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("状态文件解析错误: {0}")]
    StateError(#[from] serde_json::Error),
}

/// 宿主扩展接口
pub trait ExtensionHost: Send + Sync {
    /// 插件安装目录
    fn plugins_dir(&self) -> &Path;

    /// 主题安装目录
    fn themes_dir(&self) -> &Path;

    /// 已安装插件的 basename 列表（`<目录>/<入口文件>`）
    fn installed_plugins(&self) -> Vec<String>;

    /// 插件入口文件是否存在
    fn is_plugin_installed(&self, basename: &str) -> bool {
        self.plugins_dir().join(basename).is_file()
    }

    fn is_plugin_active(&self, basename: &str) -> bool;

    /// 已安装主题目录名列表
    fn installed_themes(&self) -> Vec<String>;

    /// 当前启用的主题目录名
    fn active_theme(&self) -> Option<String>;

    /// 扩展是否已宣告该激活信号
    fn signal_present(&self, signal: &str) -> bool;

    fn activate_plugin(&self, basename: &str) -> Result<(), HostError>;

    fn activate_theme(&self, directory: &str) -> Result<(), HostError>;
}

/// 持久化的激活状态
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
struct ActivationState {
    #[serde(default)]
    active_plugins: BTreeSet<String>,
    #[serde(default)]
    active_theme: Option<String>,
}

/// 基于文件系统的宿主实现
///
/// 激活状态保存在 JSON 状态文件中，激活信号只在进程内存中记录
pub struct FsExtensionHost {
    plugins_dir: PathBuf,
    themes_dir: PathBuf,
    state_path: PathBuf,
    state: Mutex<ActivationState>,
    signals: RwLock<HashSet<String>>,
}

impl FsExtensionHost {
    /// 创建宿主，读取已有状态文件
    pub fn new(
        plugins_dir: PathBuf,
        themes_dir: PathBuf,
        state_path: PathBuf,
    ) -> Result<Self, HostError> {
        fs::create_dir_all(&plugins_dir)?;
        fs::create_dir_all(&themes_dir)?;

        let state = if state_path.exists() {
            let content = fs::read_to_string(&state_path)?;
            serde_json::from_str(&content)?
        } else {
            ActivationState::default()
        };

        Ok(Self {
            plugins_dir,
            themes_dir,
            state_path,
            state: Mutex::new(state),
            signals: RwLock::new(HashSet::new()),
        })
    }

    /// 在同一根目录下创建插件、主题目录和状态文件
    pub fn with_root(root: &Path) -> Result<Self, HostError> {
        Self::new(
            root.join("plugins"),
            root.join("themes"),
            root.join("activation.json"),
        )
    }

    /// 宣告激活信号
    pub fn announce_signal(&self, signal: impl Into<String>) {
        let signal = signal.into();
        debug!("[FsExtensionHost] 宣告激活信号: {}", signal);
        self.signals.write().insert(signal);
    }

    pub fn withdraw_signal(&self, signal: &str) -> bool {
        self.signals.write().remove(signal)
    }

    fn save(&self, state: &ActivationState) -> Result<(), HostError> {
        if let Some(parent) = self.state_path.parent() {
            fs::create_dir_all(parent)?;
        }
        // 先写临时文件再重命名，避免中途失败留下残缺状态
        let tmp = self.state_path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &self.state_path)?;
        Ok(())
    }

    fn list_dirs(dir: &Path) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| !n.starts_with('.'))
            })
            .collect();
        dirs.sort();
        dirs
    }
}

impl ExtensionHost for FsExtensionHost {
    fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    fn themes_dir(&self) -> &Path {
        &self.themes_dir
    }

    fn installed_plugins(&self) -> Vec<String> {
        let mut basenames = Vec::new();
        for dir in Self::list_dirs(&self.plugins_dir) {
            let Some(dir_name) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            let mut files: Vec<String> = entries
                .flatten()
                .filter(|e| e.path().is_file())
                .filter_map(|e| e.file_name().to_str().map(|f| format!("{dir_name}/{f}")))
                .collect();
            files.sort();
            basenames.extend(files);
        }
        basenames
    }

    fn is_plugin_active(&self, basename: &str) -> bool {
        self.state.lock().active_plugins.contains(basename)
    }

    fn installed_themes(&self) -> Vec<String> {
        Self::list_dirs(&self.themes_dir)
            .into_iter()
            .filter(|p| p.join(THEME_MANIFEST).is_file())
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(String::from))
            .collect()
    }

    fn active_theme(&self) -> Option<String> {
        self.state.lock().active_theme.clone()
    }

    fn signal_present(&self, signal: &str) -> bool {
        self.signals.read().contains(signal)
    }

    fn activate_plugin(&self, basename: &str) -> Result<(), HostError> {
        if !self.is_plugin_installed(basename) {
            return Err(HostError::NotInstalled(basename.to_string()));
        }

        let mut state = self.state.lock();
        if state.active_plugins.contains(basename) {
            return Ok(());
        }
        let mut next = state.clone();
        next.active_plugins.insert(basename.to_string());
        self.save(&next)?;
        *state = next;

        info!("[FsExtensionHost] 激活插件: {}", basename);
        Ok(())
    }

    fn activate_theme(&self, directory: &str) -> Result<(), HostError> {
        if !self.themes_dir.join(directory).join(THEME_MANIFEST).is_file() {
            return Err(HostError::NotInstalled(directory.to_string()));
        }

        let mut state = self.state.lock();
        let mut next = state.clone();
        if let Some(previous) = next.active_theme.replace(directory.to_string()) {
            if previous != directory {
                warn!("[FsExtensionHost] 切换主题: {} -> {}", previous, directory);
            }
        }
        self.save(&next)?;
        *state = next;

        info!("[FsExtensionHost] 启用主题: {}", directory);
        Ok(())
    }
}
