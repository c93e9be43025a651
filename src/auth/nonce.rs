//! 一次用途、限时的请求令牌
//!
//! 令牌绑定到动作名和用户，按半个有效期划分 tick，
//! 当前 tick 和上一个 tick 生成的令牌都视为有效。

use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// 令牌长度（十六进制字符）
const TOKEN_LEN: usize = 20;

/// 令牌校验错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NonceError {
    #[error("缺少令牌")]
    Missing,

    #[error("令牌无效或已过期")]
    Invalid,
}

/// 令牌所处的 tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceAge {
    /// 当前半周期内生成
    Fresh,
    /// 上一个半周期内生成，即将过期
    Aging,
}

/// 令牌管理器
pub struct NonceManager {
    secret: [u8; 32],
    lifetime_secs: u64,
}

impl NonceManager {
    /// 使用随机密钥创建
    pub fn new(lifetime_secs: u64) -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::with_secret(secret, lifetime_secs)
    }

    /// 使用指定密钥创建，多进程共享令牌时使用
    pub fn with_secret(secret: [u8; 32], lifetime_secs: u64) -> Self {
        Self {
            secret,
            lifetime_secs: lifetime_secs.max(2),
        }
    }

    pub fn lifetime_secs(&self) -> u64 {
        self.lifetime_secs
    }

    /// 为动作和用户生成令牌
    pub fn create(&self, action: &str, user: &str) -> String {
        self.create_at(action, user, Utc::now().timestamp())
    }

    pub fn create_at(&self, action: &str, user: &str, now_secs: i64) -> String {
        self.token_for_tick(self.tick(now_secs), action, user)
    }

    /// 校验令牌
    pub fn verify(
        &self,
        token: Option<&str>,
        action: &str,
        user: &str,
    ) -> Result<NonceAge, NonceError> {
        self.verify_at(token, action, user, Utc::now().timestamp())
    }

    pub fn verify_at(
        &self,
        token: Option<&str>,
        action: &str,
        user: &str,
        now_secs: i64,
    ) -> Result<NonceAge, NonceError> {
        let token = match token.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return Err(NonceError::Missing),
        };

        let tick = self.tick(now_secs);
        let candidates = [(tick, NonceAge::Fresh), (tick - 1, NonceAge::Aging)];
        for (candidate_tick, age) in candidates {
            let expected = self.token_for_tick(candidate_tick, action, user);
            if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) {
                return Ok(age);
            }
        }
        Err(NonceError::Invalid)
    }

    fn tick(&self, now_secs: i64) -> i64 {
        let half = (self.lifetime_secs / 2) as i64;
        now_secs.max(0).div_euclid(half) + 1
    }

    fn token_for_tick(&self, tick: i64, action: &str, user: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret);
        hasher.update(tick.to_be_bytes());
        // 长度前缀避免 action/user 拼接歧义
        hasher.update((action.len() as u64).to_be_bytes());
        hasher.update(action.as_bytes());
        hasher.update((user.len() as u64).to_be_bytes());
        hasher.update(user.as_bytes());
        hasher.update(self.secret);
        let digest = format!("{:x}", hasher.finalize());
        digest[..TOKEN_LEN].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: u64 = 86_400;
    const NOW: i64 = 1_700_000_000;

    fn manager() -> NonceManager {
        NonceManager::with_secret([7u8; 32], DAY)
    }

    #[test]
    fn test_verify_fresh_token() {
        let nonces = manager();
        let token = nonces.create_at("install", "alice", NOW);
        assert_eq!(token.len(), TOKEN_LEN);
        assert_eq!(
            nonces.verify_at(Some(&token), "install", "alice", NOW),
            Ok(NonceAge::Fresh)
        );
    }

    #[test]
    fn test_token_ages_then_expires() {
        let nonces = manager();
        let token = nonces.create_at("install", "alice", NOW);
        let half = (DAY / 2) as i64;

        assert_eq!(
            nonces.verify_at(Some(&token), "install", "alice", NOW + half),
            Ok(NonceAge::Aging)
        );
        assert_eq!(
            nonces.verify_at(Some(&token), "install", "alice", NOW + 2 * half),
            Err(NonceError::Invalid)
        );
    }

    #[test]
    fn test_token_bound_to_action_and_user() {
        let nonces = manager();
        let token = nonces.create_at("install", "alice", NOW);
        assert_eq!(
            nonces.verify_at(Some(&token), "install", "bob", NOW),
            Err(NonceError::Invalid)
        );
        assert_eq!(
            nonces.verify_at(Some(&token), "delete", "alice", NOW),
            Err(NonceError::Invalid)
        );
    }

    #[test]
    fn test_missing_token() {
        let nonces = manager();
        assert_eq!(
            nonces.verify_at(None, "install", "alice", NOW),
            Err(NonceError::Missing)
        );
        assert_eq!(
            nonces.verify_at(Some("  "), "install", "alice", NOW),
            Err(NonceError::Missing)
        );
    }

    #[test]
    fn test_different_secrets_disagree() {
        let a = NonceManager::with_secret([1u8; 32], DAY);
        let b = NonceManager::with_secret([2u8; 32], DAY);
        let token = a.create_at("install", "alice", NOW);
        assert!(b.verify_at(Some(&token), "install", "alice", NOW).is_err());
    }

    #[test]
    fn test_random_secret_roundtrip() {
        let nonces = NonceManager::new(DAY);
        let token = nonces.create("install", "alice");
        assert!(nonces.verify(Some(&token), "install", "alice").is_ok());
    }
}
