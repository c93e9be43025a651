//! 扩展注册与安装中心
//!
//! 宿主在启动时注册插件和主题的元数据，管理界面通过带令牌的请求触发
//! 下载、安装和激活，状态查询回答扩展是否已安装、是否已激活。

pub mod auth;
pub mod config;
pub mod extension;
pub mod host;
pub mod hub;
pub mod installer;
pub mod logger;
pub mod server;

pub use config::HubConfig;
pub use extension::{EventKind, ExtensionDescriptor, ExtensionKind, HubEvent};
pub use hub::{BuildError, ExtensionHub};
pub use installer::{InstallOutcome, InstallRequest, InstallResult};
