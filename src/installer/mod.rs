//! 扩展安装模块
//!
//! 提供扩展包的下载、验证、解压安装与激活

mod downloader;
mod handler;
mod types;
mod unpack;
mod validator;

pub use downloader::{HttpFetcher, PackageFetcher, DEFAULT_MAX_PACKAGE_BYTES};
pub use handler::{HandlerSettings, InstallHandler};
pub use types::{
    InstallError, InstallOutcome, InstallRequest, InstallResult, InstallStage, PackageFormat,
    NOT_PERMITTED,
};
pub use unpack::{CancellationToken, KindInstaller, PluginInstaller, ThemeInstaller};
pub use validator::PackageValidator;
