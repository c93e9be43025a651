//! 扩展注册模块
//!
//! 提供扩展注册与状态查询：
//! - 扩展描述符与种类（插件/主题）
//! - 按插入顺序保存的注册表
//! - 与注册表同步增删的分发绑定
//! - 安装/激活状态查询
//! - 注册事件总线

mod dispatch;
mod events;
mod oracle;
mod registry;
mod types;

pub use dispatch::{Binding, DispatchTable, EndpointId};
pub use events::{EventBus, EventCallback, EventKind, HubEvent, SubscriptionId};
pub use oracle::StatusOracle;
pub use registry::ExtensionRegistry;
pub use types::{
    is_valid_slug, DownloadSource, ExtensionDescriptor, ExtensionKind, HubError, MAX_SLUG_LEN,
};
