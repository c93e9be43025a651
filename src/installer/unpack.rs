//! 扩展包解压与放置
//!
//! 插件和主题使用不同的安装器，流程相同：
//! 解压到目标目录内的隐藏暂存目录 → 定位包根目录 → 校验结构 → 原子重命名到最终位置。
//! 任一步失败时暂存目录随 `TempDir` 一起删除，最终位置不会出现半成品。

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::types::{InstallError, PackageFormat};
use crate::extension::{ExtensionDescriptor, ExtensionKind};
use crate::host::THEME_MANIFEST;

/// 暂存目录前缀，宿主扫描时会忽略以 `.` 开头的目录
const STAGING_PREFIX: &str = ".staging-";

/// 取消令牌
///
/// 超时后由处理器设置，阻塞中的安装任务在关键步骤前检查
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), InstallError> {
        if self.is_cancelled() {
            Err(InstallError::InstallFailed("安装已取消".to_string()))
        } else {
            Ok(())
        }
    }
}

/// 按扩展种类区分的安装器
pub trait KindInstaller: Send + Sync {
    fn kind(&self) -> ExtensionKind;

    /// 扩展目录
    fn target_dir(&self) -> &Path;

    /// 包根目录中必须存在的相对路径
    fn marker(&self, descriptor: &ExtensionDescriptor) -> PathBuf;

    /// 安装包，返回最终安装目录
    fn install(
        &self,
        package: &Path,
        format: PackageFormat,
        descriptor: &ExtensionDescriptor,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, InstallError> {
        let destination = self.target_dir().join(descriptor.install_dir_name());
        if destination.exists() {
            return Err(InstallError::DestinationExists(
                destination.display().to_string(),
            ));
        }

        fs::create_dir_all(self.target_dir()).map_err(|e| {
            InstallError::InstallFailed(format!(
                "无法创建扩展目录 {}: {e}",
                self.target_dir().display()
            ))
        })?;

        // 暂存目录与最终位置在同一文件系统上，保证 rename 原子
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(self.target_dir())
            .map_err(|e| InstallError::InstallFailed(format!("无法创建暂存目录: {e}")))?;
        let extract_dir = staging.path().join("extract");
        fs::create_dir_all(&extract_dir)?;

        match format {
            PackageFormat::Zip => extract_zip(package, &extract_dir, cancel)?,
            PackageFormat::TarGz => extract_targz(package, &extract_dir, cancel)?,
        }

        let marker = self.marker(descriptor);
        let package_root = find_package_root(&extract_dir, &marker)?.ok_or_else(|| {
            InstallError::InvalidLayout(format!(
                "{} 包中未找到 {}",
                self.kind(),
                marker.display()
            ))
        })?;

        cancel.check()?;
        if destination.exists() {
            return Err(InstallError::DestinationExists(
                destination.display().to_string(),
            ));
        }
        fs::rename(&package_root, &destination).map_err(|e| {
            InstallError::InstallFailed(format!(
                "无法移动到 {}: {e}",
                destination.display()
            ))
        })?;

        info!(
            "[KindInstaller] 已安装{} {} -> {}",
            self.kind(),
            descriptor.slug,
            destination.display()
        );
        Ok(destination)
    }
}

/// 插件安装器
///
/// 插件定位符为 `<目录>/<入口文件>`，包根目录必须包含入口文件
#[derive(Debug, Clone)]
pub struct PluginInstaller {
    plugins_dir: PathBuf,
}

impl PluginInstaller {
    pub fn new(plugins_dir: PathBuf) -> Self {
        Self { plugins_dir }
    }
}

impl KindInstaller for PluginInstaller {
    fn kind(&self) -> ExtensionKind {
        ExtensionKind::Plugin
    }

    fn target_dir(&self) -> &Path {
        &self.plugins_dir
    }

    fn marker(&self, descriptor: &ExtensionDescriptor) -> PathBuf {
        Path::new(&descriptor.locator)
            .components()
            .skip(1)
            .collect()
    }
}

/// 主题安装器
///
/// 包根目录必须包含 `theme.json`
#[derive(Debug, Clone)]
pub struct ThemeInstaller {
    themes_dir: PathBuf,
}

impl ThemeInstaller {
    pub fn new(themes_dir: PathBuf) -> Self {
        Self { themes_dir }
    }
}

impl KindInstaller for ThemeInstaller {
    fn kind(&self) -> ExtensionKind {
        ExtensionKind::Theme
    }

    fn target_dir(&self) -> &Path {
        &self.themes_dir
    }

    fn marker(&self, _descriptor: &ExtensionDescriptor) -> PathBuf {
        PathBuf::from(THEME_MANIFEST)
    }
}

/// 查找包根目录：解压目录本身或其一级子目录中包含 marker 的那个
fn find_package_root(extract_dir: &Path, marker: &Path) -> Result<Option<PathBuf>, InstallError> {
    if extract_dir.join(marker).is_file() {
        return Ok(Some(extract_dir.to_path_buf()));
    }

    let mut subdirs: Vec<PathBuf> = fs::read_dir(extract_dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    subdirs.sort();

    Ok(subdirs.into_iter().find(|dir| dir.join(marker).is_file()))
}

/// 解压 ZIP 文件
fn extract_zip(path: &Path, dest: &Path, cancel: &CancellationToken) -> Result<(), InstallError> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| InstallError::ExtractFailed(format!("无法读取 ZIP 文件: {e}")))?;

    for i in 0..archive.len() {
        cancel.check()?;
        let mut entry = archive
            .by_index(i)
            .map_err(|e| InstallError::ExtractFailed(format!("无法读取 ZIP 条目 {i}: {e}")))?;

        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(InstallError::ExtractFailed(format!(
                "ZIP 条目路径越界: {}",
                entry.name()
            )));
        };

        // 跳过 macOS 元数据
        if relative.starts_with("__MACOSX") {
            continue;
        }

        let outpath = dest.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)?;
        std::io::copy(&mut entry, &mut outfile)
            .map_err(|e| {
                InstallError::ExtractFailed(format!("写入 {} 失败: {e}", relative.display()))
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&outpath, fs::Permissions::from_mode(mode & 0o777))?;
            }
        }
    }

    debug!("[unpack] ZIP 解压完成: {}", dest.display());
    Ok(())
}

/// 解压 tar.gz 文件
fn extract_targz(path: &Path, dest: &Path, cancel: &CancellationToken) -> Result<(), InstallError> {
    let file = File::open(path)?;
    let gz = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(gz);

    for entry in archive
        .entries()
        .map_err(|e| InstallError::ExtractFailed(format!("无法读取 tar.gz: {e}")))?
    {
        cancel.check()?;
        let mut entry =
            entry.map_err(|e| InstallError::ExtractFailed(format!("tar.gz 条目读取失败: {e}")))?;

        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| InstallError::ExtractFailed(format!("解压失败: {e}")))?;
        if !unpacked {
            return Err(InstallError::ExtractFailed(
                "tar.gz 条目路径越界".to_string(),
            ));
        }
    }

    debug!("[unpack] tar.gz 解压完成: {}", dest.display());
    Ok(())
}
