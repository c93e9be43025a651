//! API 密钥认证
//!
//! 把请求头中的密钥映射为服务端配置的调用方身份

use subtle::ConstantTimeEq;

use super::Caller;
use crate::config::ApiKeyEntry;

/// 基于配置密钥表的认证器
pub struct ApiKeyAuthenticator {
    keys: Vec<(String, Caller)>,
}

impl ApiKeyAuthenticator {
    pub fn new(entries: &[ApiKeyEntry]) -> Self {
        let keys = entries
            .iter()
            .filter(|entry| !entry.key.is_empty())
            .map(|entry| {
                let caller = entry
                    .capabilities
                    .iter()
                    .fold(Caller::new(entry.user_id.clone()), |caller, cap| {
                        caller.with_capability(cap.clone())
                    });
                (entry.key.clone(), caller)
            })
            .collect();
        Self { keys }
    }

    /// 校验密钥并返回对应的调用方
    ///
    /// 每个配置的密钥都会参与比较，命中与否不影响比较次数。
    pub fn authenticate(&self, provided_key: Option<&str>) -> Option<Caller> {
        let provided = provided_key?;
        let mut matched = None;
        for (key, caller) in &self.keys {
            if bool::from(provided.as_bytes().ct_eq(key.as_bytes())) && matched.is_none() {
                matched = Some(caller.clone());
            }
        }
        matched
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
