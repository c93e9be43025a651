//! 请求认证与授权
//!
//! - `ApiKeyAuthenticator`: 由请求密钥确定调用方身份
//! - `NonceManager`: 校验调用方提交的令牌
//! - `Authorizer`: 宿主提供的能力检查

mod api_key;
mod nonce;

pub use api_key::ApiKeyAuthenticator;
pub use nonce::{NonceAge, NonceError, NonceManager};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::extension::ExtensionKind;

/// 安装插件所需能力
pub const CAP_INSTALL_PLUGINS: &str = "install_plugins";
/// 安装主题所需能力
pub const CAP_INSTALL_THEMES: &str = "install_themes";

/// 发起请求的调用方
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl Caller {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// 拥有插件和主题安装能力的管理员
    pub fn admin(user_id: impl Into<String>) -> Self {
        Self::new(user_id)
            .with_capability(CAP_INSTALL_PLUGINS)
            .with_capability(CAP_INSTALL_THEMES)
    }

    pub fn can(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// 宿主授权检查
pub trait Authorizer: Send + Sync {
    /// 调用方能否安装该种类的扩展
    fn can_manage(&self, caller: &Caller, kind: ExtensionKind) -> bool;
}

/// 按调用方能力集合判断
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityAuthorizer;

impl Authorizer for CapabilityAuthorizer {
    fn can_manage(&self, caller: &Caller, kind: ExtensionKind) -> bool {
        match kind {
            ExtensionKind::Plugin => caller.can(CAP_INSTALL_PLUGINS),
            ExtensionKind::Theme => caller.can(CAP_INSTALL_THEMES),
        }
    }
}
