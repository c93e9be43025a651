//! 扩展 API 端点
//!
//! 供管理界面调用：签发令牌、查询状态、列出扩展、触发安装

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::Caller;
use crate::extension::ExtensionKind;
use crate::installer::{InstallRequest, InstallResult};
use crate::server::AppState;

/// API 错误响应
#[derive(Debug, Serialize)]
pub struct ExtensionApiError {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

impl IntoResponse for ExtensionApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl ExtensionApiError {
    fn forbidden() -> Self {
        Self {
            error: "forbidden".to_string(),
            message: "not permitted".to_string(),
            status_code: 403,
        }
    }
}

/// 从 `Authorization: Bearer <key>` 或 `x-api-key` 读取密钥
fn api_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        return value.to_str().ok()?.strip_prefix("Bearer ").map(str::trim);
    }
    headers.get("x-api-key")?.to_str().ok().map(str::trim)
}

/// 按请求密钥确定调用方
fn authenticate(state: &AppState, headers: &HeaderMap) -> Option<Caller> {
    state.keys.authenticate(api_key(headers))
}

/// POST /actions/:endpoint - 触发安装
pub async fn install_action(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    headers: HeaderMap,
    Json(mut request): Json<InstallRequest>,
) -> (StatusCode, Json<InstallResult>) {
    let Some(caller) = authenticate(&state, &headers) else {
        tracing::warn!("[EXTENSIONS_API] 未认证的安装请求: endpoint={}", endpoint);
        return (StatusCode::FORBIDDEN, Json(InstallResult::unauthorized(endpoint)));
    };
    tracing::info!(
        "[EXTENSIONS_API] 安装请求: endpoint={}, user={}",
        endpoint,
        caller.user_id
    );
    request.caller = caller;

    let result = state.hub.dispatch(&endpoint, &request).await;
    let status = StatusCode::from_u16(result.outcome.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(result))
}

/// 扩展状态
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub slug: String,
    pub installed: bool,
    pub active: bool,
}

/// GET /status/:slug - 查询安装与激活状态
pub async fn extension_status(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Json<StatusResponse> {
    Json(StatusResponse {
        installed: state.hub.is_installed(&slug),
        active: state.hub.is_active(&slug),
        slug,
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NonceResponse {
    pub nonce: String,
    pub action: String,
}

/// POST /nonce - 为已认证的调用方签发安装令牌
pub async fn create_nonce(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<NonceResponse>, ExtensionApiError> {
    let caller = authenticate(&state, &headers).ok_or_else(|| {
        tracing::warn!("[EXTENSIONS_API] 未认证的令牌请求");
        ExtensionApiError::forbidden()
    })?;

    tracing::debug!("[EXTENSIONS_API] 签发令牌: user={}", caller.user_id);
    Ok(Json(NonceResponse {
        nonce: state.hub.create_nonce(&caller.user_id),
        action: state.hub.config().nonce.action.clone(),
    }))
}

/// 扩展列表项
#[derive(Debug, Serialize, Deserialize)]
pub struct ExtensionInfo {
    pub slug: String,
    pub name: String,
    pub locator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub installed: bool,
    pub active: bool,
}

/// GET /extensions/:kind - 按注册顺序列出扩展
pub async fn list_extensions(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<Vec<ExtensionInfo>>, ExtensionApiError> {
    let kind = ExtensionKind::parse(&kind).ok_or_else(|| ExtensionApiError {
        error: "unknown_kind".to_string(),
        message: format!("未知的扩展种类: {kind}"),
        status_code: 404,
    })?;

    let oracle = state.hub.oracle();
    let items = state
        .hub
        .list(kind)
        .into_iter()
        .map(|descriptor| ExtensionInfo {
            endpoint: state.hub.endpoint_name(kind, &descriptor.slug),
            installed: oracle.descriptor_installed(&descriptor),
            active: oracle.descriptor_active(&descriptor),
            download_url: descriptor.download_source.as_ref().map(|s| s.to_string()),
            slug: descriptor.slug.clone(),
            name: descriptor.display_name.clone(),
            locator: descriptor.locator.clone(),
        })
        .collect();

    Ok(Json(items))
}
