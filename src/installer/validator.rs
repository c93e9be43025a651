//! 扩展包验证器
//!
//! 主要功能：
//! - 识别包格式（zip/tar.gz）
//! - 验证压缩包完整性
//! - 验证包校验和（SHA-256）

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use super::types::{InstallError, PackageFormat};

/// 包验证器
#[derive(Debug, Clone, Copy, Default)]
pub struct PackageValidator;

impl PackageValidator {
    pub fn new() -> Self {
        Self
    }

    /// 验证包格式并返回识别出的格式
    pub fn validate_format(&self, path: &Path) -> Result<PackageFormat, InstallError> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| InstallError::InvalidPackage(format!("无法读取下载文件: {e}")))?;
        if metadata.len() == 0 {
            return Err(InstallError::InvalidPackage("文件为空".to_string()));
        }

        let mut header = [0u8; 4];
        let read = File::open(path)?.read(&mut header)?;
        let format = PackageFormat::sniff(&header[..read]).ok_or_else(|| {
            InstallError::InvalidPackage("不支持的包格式，仅支持 zip 和 tar.gz".to_string())
        })?;

        match format {
            PackageFormat::Zip => self.validate_zip_integrity(path)?,
            PackageFormat::TarGz => self.validate_targz_integrity(path)?,
        }

        Ok(format)
    }

    /// 验证 ZIP 文件完整性
    fn validate_zip_integrity(&self, path: &Path) -> Result<(), InstallError> {
        let file = File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| InstallError::InvalidPackage(format!("无法读取 ZIP 文件: {e}")))?;

        if archive.len() == 0 {
            return Err(InstallError::InvalidPackage("ZIP 压缩包为空".to_string()));
        }

        for i in 0..archive.len() {
            let entry = archive.by_index(i).map_err(|e| {
                InstallError::InvalidPackage(format!("ZIP 文件损坏，无法读取条目 {i}: {e}"))
            })?;
            if entry.enclosed_name().is_none() {
                return Err(InstallError::InvalidPackage(format!(
                    "ZIP 条目路径越界: {}",
                    entry.name()
                )));
            }
        }

        Ok(())
    }

    /// 验证 tar.gz 文件完整性
    fn validate_targz_integrity(&self, path: &Path) -> Result<(), InstallError> {
        let file = File::open(path)?;
        let gz = flate2::read::GzDecoder::new(file);
        let mut archive = tar::Archive::new(gz);

        let mut entry_count = 0;
        for entry in archive
            .entries()
            .map_err(|e| InstallError::InvalidPackage(format!("无法读取 tar.gz 文件: {e}")))?
        {
            let entry =
                entry.map_err(|e| InstallError::InvalidPackage(format!("tar.gz 文件损坏: {e}")))?;
            let entry_path = entry
                .path()
                .map_err(|e| InstallError::InvalidPackage(format!("tar.gz 条目路径无效: {e}")))?;
            if entry_path.as_os_str().is_empty() {
                return Err(InstallError::InvalidPackage(
                    "tar.gz 条目路径为空".to_string(),
                ));
            }
            entry_count += 1;
        }

        if entry_count == 0 {
            return Err(InstallError::InvalidPackage(
                "tar.gz 压缩包为空".to_string(),
            ));
        }

        Ok(())
    }

    /// 验证包校验和，未提供校验和时跳过
    pub fn validate_checksum(
        &self,
        path: &Path,
        checksum: Option<&str>,
    ) -> Result<(), InstallError> {
        let Some(expected) = checksum else {
            return Ok(());
        };

        let mut reader = BufReader::new(File::open(path)?);
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        let actual = format!("{:x}", hasher.finalize());
        if actual != expected.to_lowercase() {
            return Err(InstallError::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            });
        }

        Ok(())
    }
}
