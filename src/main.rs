use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use extension_hub::{logger, server, ExtensionHub, HubConfig};

/// 配置文件路径：命令行第一个参数，其次是 EXTENSION_HUB_CONFIG
fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("EXTENSION_HUB_CONFIG").map(PathBuf::from))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match config_path() {
        Some(path) => HubConfig::load(&path)
            .with_context(|| format!("加载配置失败: {}", path.display()))?,
        None => HubConfig::default(),
    };

    logger::init_tracing(&config.logging);
    let log_store = logger::LogStore::with_config(&config.logging).shared();

    let hub = ExtensionHub::builder(config)
        .build()
        .context("初始化扩展中心失败")?;
    hub.attach_log_store(&log_store);
    hub.register_configured();

    for binding in hub.endpoints() {
        info!("[Main] 端点 {} -> {}", binding.name, binding.id);
    }

    server::serve(Arc::new(hub), async {
        let _ = tokio::signal::ctrl_c().await;
        info!("[Main] 收到退出信号");
    })
    .await
    .context("HTTP 服务异常退出")?;

    Ok(())
}
