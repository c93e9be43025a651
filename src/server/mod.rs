//! HTTP 服务
//!
//! 把扩展中心暴露给管理界面

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};

use crate::auth::ApiKeyAuthenticator;
use crate::hub::ExtensionHub;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ExtensionHub>,
    pub keys: Arc<ApiKeyAuthenticator>,
}

/// 构建路由
pub fn router(hub: Arc<ExtensionHub>) -> Router {
    let max_body_bytes = hub.config().server.max_body_bytes;
    let keys = Arc::new(ApiKeyAuthenticator::new(&hub.config().server.api_keys));
    if keys.is_empty() {
        warn!("[Server] 未配置 api_keys，签发令牌和安装请求都会被拒绝");
    }
    Router::new()
        .route("/actions/:endpoint", post(handlers::install_action))
        .route("/status/:slug", get(handlers::extension_status))
        .route("/nonce", post(handlers::create_nonce))
        .route("/extensions/:kind", get(handlers::list_extensions))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(AppState { hub, keys })
}

/// 在配置的地址上启动服务，直到 `shutdown` 完成
pub async fn serve<F>(hub: Arc<ExtensionHub>, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listen = hub.config().server.listen.clone();
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!("[Server] 监听 {}", listener.local_addr()?);

    axum::serve(listener, router(hub))
        .with_graceful_shutdown(shutdown)
        .await
}
