//! 扩展包下载器
//!
//! 把下载来源的内容写入调用方提供的临时文件，
//! 临时文件的生命周期由调用方管理。

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::types::InstallError;
use crate::extension::DownloadSource;

/// 默认下载大小上限
pub const DEFAULT_MAX_PACKAGE_BYTES: u64 = 256 * 1024 * 1024;

/// 扩展包获取接口
#[async_trait]
pub trait PackageFetcher: Send + Sync {
    /// 把包写入 `dest`，返回写入的字节数
    async fn fetch(&self, source: &DownloadSource, dest: &Path) -> Result<u64, InstallError>;
}

/// HTTP / 本地文件下载器
pub struct HttpFetcher {
    client: Client,
    max_bytes: u64,
}

impl HttpFetcher {
    /// 创建新的下载器
    pub fn new() -> Result<Self, InstallError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("extension-hub/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| InstallError::DownloadFailed(format!("创建 HTTP 客户端失败: {e}")))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            max_bytes: DEFAULT_MAX_PACKAGE_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    async fn fetch_remote(&self, url: &url::Url, dest: &Path) -> Result<u64, InstallError> {
        info!("[HttpFetcher] 开始下载: {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| InstallError::DownloadFailed(format!("下载请求失败: {e}")))?;

        if !response.status().is_success() {
            return Err(InstallError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(InstallError::DownloadFailed(format!(
                    "包过大: {} 字节，上限 {} 字节",
                    length, self.max_bytes
                )));
            }
        }

        let mut file = fs::File::create(dest)
            .await
            .map_err(|e| InstallError::DownloadFailed(format!("创建临时文件失败: {e}")))?;

        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| InstallError::DownloadFailed(format!("读取数据失败: {e}")))?;
            downloaded += chunk.len() as u64;
            if downloaded > self.max_bytes {
                return Err(InstallError::DownloadFailed(format!(
                    "包超过大小上限 {} 字节",
                    self.max_bytes
                )));
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| InstallError::DownloadFailed(format!("写入文件失败: {e}")))?;
        }

        file.flush()
            .await
            .map_err(|e| InstallError::DownloadFailed(format!("刷新文件失败: {e}")))?;

        info!("[HttpFetcher] 下载完成: {} ({} bytes)", url, downloaded);
        Ok(downloaded)
    }

    async fn fetch_local(&self, path: &Path, dest: &Path) -> Result<u64, InstallError> {
        debug!("[HttpFetcher] 复制本地包: {}", path.display());

        let metadata = fs::metadata(path).await.map_err(|e| {
            InstallError::DownloadFailed(format!("无法读取本地包 {}: {e}", path.display()))
        })?;
        if !metadata.is_file() {
            return Err(InstallError::DownloadFailed(format!(
                "本地包不是文件: {}",
                path.display()
            )));
        }
        if metadata.len() > self.max_bytes {
            return Err(InstallError::DownloadFailed(format!(
                "包过大: {} 字节，上限 {} 字节",
                metadata.len(),
                self.max_bytes
            )));
        }

        fs::copy(path, dest)
            .await
            .map_err(|e| InstallError::DownloadFailed(format!("复制本地包失败: {e}")))
    }
}

#[async_trait]
impl PackageFetcher for HttpFetcher {
    async fn fetch(&self, source: &DownloadSource, dest: &Path) -> Result<u64, InstallError> {
        match source {
            DownloadSource::Remote(url) => self.fetch_remote(url, dest).await,
            DownloadSource::Local(path) => self.fetch_local(path, dest).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use tempfile::TempDir;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_fetch_remote_success() {
        let base = serve(Router::new().route("/pkg.zip", get(|| async { "package-bytes" }))).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out");

        let fetcher = HttpFetcher::new().unwrap();
        let source = DownloadSource::parse(&format!("{base}/pkg.zip")).unwrap();
        let written = fetcher.fetch(&source, &dest).await.unwrap();

        assert_eq!(written, 13);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "package-bytes");
    }

    #[tokio::test]
    async fn test_fetch_remote_http_error() {
        let base = serve(Router::new().route(
            "/missing.zip",
            get(|| async { (StatusCode::NOT_FOUND, "nope") }),
        ))
        .await;
        let dir = TempDir::new().unwrap();

        let fetcher = HttpFetcher::new().unwrap();
        let source = DownloadSource::parse(&format!("{base}/missing.zip")).unwrap();
        let result = fetcher.fetch(&source, &dir.path().join("out")).await;

        assert!(matches!(
            result,
            Err(InstallError::HttpStatus { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_remote_size_limit() {
        let base = serve(Router::new().route("/big.zip", get(|| async { "x".repeat(1024) }))).await;
        let dir = TempDir::new().unwrap();

        let fetcher = HttpFetcher::new().unwrap().with_max_bytes(100);
        let source = DownloadSource::parse(&format!("{base}/big.zip")).unwrap();
        let result = fetcher.fetch(&source, &dir.path().join("out")).await;

        assert!(matches!(result, Err(InstallError::DownloadFailed(_))));
    }

    #[tokio::test]
    async fn test_fetch_local_file() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("pkg.zip");
        std::fs::write(&src, b"local").unwrap();

        let fetcher = HttpFetcher::new().unwrap();
        let written = fetcher
            .fetch(&DownloadSource::Local(src), &dir.path().join("out"))
            .await
            .unwrap();
        assert_eq!(written, 5);
    }

    #[tokio::test]
    async fn test_fetch_local_missing() {
        let dir = TempDir::new().unwrap();
        let fetcher = HttpFetcher::new().unwrap();
        let result = fetcher
            .fetch(
                &DownloadSource::Local(dir.path().join("absent.zip")),
                &dir.path().join("out"),
            )
            .await;
        assert!(matches!(result, Err(InstallError::DownloadFailed(_))));
    }
}
