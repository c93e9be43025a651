//! 安装器类型定义
//!
//! 定义安装结果、请求、阶段以及各阶段内部错误

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::auth::Caller;

/// 对调用方隐藏细节的统一拒绝消息
pub const NOT_PERMITTED: &str = "not permitted";

/// 安装结果种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallOutcome {
    Success,
    AlreadyInstalled,
    DownloadFailed,
    InstallFailed,
    ActivationFailed,
    Unauthorized,
    UnknownSlug,
}

impl InstallOutcome {
    /// 成功与已安装都视为成功
    pub fn is_success(&self) -> bool {
        matches!(self, InstallOutcome::Success | InstallOutcome::AlreadyInstalled)
    }

    /// 对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            InstallOutcome::Success | InstallOutcome::AlreadyInstalled => 200,
            InstallOutcome::Unauthorized => 403,
            InstallOutcome::UnknownSlug => 404,
            InstallOutcome::DownloadFailed => 502,
            InstallOutcome::InstallFailed | InstallOutcome::ActivationFailed => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstallOutcome::Success => "success",
            InstallOutcome::AlreadyInstalled => "already_installed",
            InstallOutcome::DownloadFailed => "download_failed",
            InstallOutcome::InstallFailed => "install_failed",
            InstallOutcome::ActivationFailed => "activation_failed",
            InstallOutcome::Unauthorized => "unauthorized",
            InstallOutcome::UnknownSlug => "unknown_slug",
        }
    }
}

impl fmt::Display for InstallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 返回给调用方的安装结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallResult {
    pub success: bool,
    pub outcome: InstallOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub slug: String,
}

impl InstallResult {
    pub fn new(outcome: InstallOutcome, slug: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            success: outcome.is_success(),
            outcome,
            detail,
            slug: slug.into(),
        }
    }

    pub fn success(slug: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(InstallOutcome::Success, slug, Some(detail.into()))
    }

    pub fn already_installed(slug: impl Into<String>) -> Self {
        Self::new(InstallOutcome::AlreadyInstalled, slug, None)
    }

    /// 认证或授权失败，不携带任何细节
    pub fn unauthorized(slug: impl Into<String>) -> Self {
        Self::new(
            InstallOutcome::Unauthorized,
            slug,
            Some(NOT_PERMITTED.to_string()),
        )
    }

    pub fn unknown_slug(slug: impl Into<String>) -> Self {
        let slug = slug.into();
        let detail = format!("未注册的扩展: {slug}");
        Self::new(InstallOutcome::UnknownSlug, slug, Some(detail))
    }

    /// 由阶段错误生成结果
    pub fn from_error(slug: impl Into<String>, error: &InstallError) -> Self {
        Self::new(error.outcome(), slug, Some(error.to_string()))
    }
}

/// 安装请求
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRequest {
    /// 调用方提交的令牌
    #[serde(default)]
    pub token: Option<String>,
    /// 由服务端认证确定，不从请求体读取
    #[serde(skip)]
    pub caller: Caller,
}

impl InstallRequest {
    pub fn new(token: impl Into<String>, caller: Caller) -> Self {
        Self {
            token: Some(token.into()),
            caller,
        }
    }

    pub fn without_token(caller: Caller) -> Self {
        Self {
            token: None,
            caller,
        }
    }
}

/// 安装阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStage {
    Authenticating,
    Authorizing,
    Resolving,
    Checking,
    Downloading,
    Validating,
    Extracting,
    Installing,
    Activating,
    Complete,
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallStage::Authenticating => "authenticating",
            InstallStage::Authorizing => "authorizing",
            InstallStage::Resolving => "resolving",
            InstallStage::Checking => "checking",
            InstallStage::Downloading => "downloading",
            InstallStage::Validating => "validating",
            InstallStage::Extracting => "extracting",
            InstallStage::Installing => "installing",
            InstallStage::Activating => "activating",
            InstallStage::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// 安装阶段内部错误
///
/// 在阶段边界通过 `outcome()` 转换为 `InstallOutcome`，不会直接返回给调用方
#[derive(Error, Debug)]
pub enum InstallError {
    /// 下载失败
    #[error("下载失败: {0}")]
    DownloadFailed(String),

    /// HTTP 非成功状态
    #[error("下载失败: HTTP {status} ({url})")]
    HttpStatus { status: u16, url: String },

    /// 包格式无效
    #[error("包格式无效: {0}")]
    InvalidPackage(String),

    /// 校验和不匹配
    #[error("校验和不匹配: 期望 {expected}, 实际 {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// 阶段超时
    #[error("{stage} 阶段超时: {timeout_ms}ms")]
    Timeout { stage: InstallStage, timeout_ms: u64 },

    /// 没有下载来源且未安装
    #[error("没有可用的下载来源: {0}")]
    NoSource(String),

    /// 解压失败
    #[error("解压失败: {0}")]
    ExtractFailed(String),

    /// 包结构不符合扩展种类要求
    #[error("包结构无效: {0}")]
    InvalidLayout(String),

    /// 目标目录已存在
    #[error("目标目录已存在: {0}")]
    DestinationExists(String),

    /// 安装失败
    #[error("安装失败: {0}")]
    InstallFailed(String),

    /// 激活失败
    #[error("激活失败: {0}")]
    ActivationFailed(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),
}

impl InstallError {
    /// 转换为结果种类
    pub fn outcome(&self) -> InstallOutcome {
        match self {
            InstallError::DownloadFailed(_)
            | InstallError::HttpStatus { .. }
            | InstallError::InvalidPackage(_)
            | InstallError::ChecksumMismatch { .. }
            | InstallError::Timeout {
                stage: InstallStage::Downloading,
                ..
            } => InstallOutcome::DownloadFailed,
            InstallError::ActivationFailed(_) => InstallOutcome::ActivationFailed,
            InstallError::Timeout { .. }
            | InstallError::NoSource(_)
            | InstallError::ExtractFailed(_)
            | InstallError::InvalidLayout(_)
            | InstallError::DestinationExists(_)
            | InstallError::InstallFailed(_)
            | InstallError::IoError(_) => InstallOutcome::InstallFailed,
        }
    }
}

/// 包格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageFormat {
    /// ZIP 格式
    Zip,
    /// tar.gz 格式
    TarGz,
}

impl PackageFormat {
    /// 从文件头魔数识别格式
    pub fn sniff(header: &[u8]) -> Option<Self> {
        match header {
            // ZIP: PK\x03\x04 或 PK\x05\x06
            [0x50, 0x4B, ..] => Some(PackageFormat::Zip),
            // Gzip: \x1f\x8b
            [0x1f, 0x8b, ..] => Some(PackageFormat::TarGz),
            _ => None,
        }
    }
}
