pub mod cloudflow;
pub mod local;
#[cfg(test)]
pub mod mock;

use crate::config::ConnectionParams;
use crate::error::{AppError, RemoteError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use cloudflow::CloudflowApi;
pub use local::LocalStorage;

// ============ 公共常量 ============

/// 非传输请求超时（秒）- does_exist, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// 传输请求超时（秒）- upload, download
pub const IO_TIMEOUT_SECS: u64 = 300;

/// `file.does_exist` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistsInfo {
    pub exists: bool,
    pub is_folder: bool,
    /// 服务器上的规范 url，删除时使用
    pub url: String,
}

/// 许可证中的一个产品
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseProduct {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
}

/// Cloudflow 许可证
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    #[serde(default)]
    pub products: Vec<LicenseProduct>,
}

/// 服务器上已安装的应用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledApp {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// 远程 Cloudflow 接口
///
/// 一个实例对应一个已登录的会话，所有传输任务共享（只读）。
#[async_trait]
pub trait Remote: Send + Sync {
    /// 查询文件或文件夹是否存在
    async fn does_exist(&self, path: &str) -> Result<ExistsInfo, RemoteError>;

    /// 列出所在文件夹以 `prefix` 开头的所有文件
    async fn list_folder(&self, prefix: &str) -> Result<Vec<String>, RemoteError>;

    /// 上传本地文件，中间文件夹由服务器创建
    async fn upload_file(&self, path: &str, source: &Path) -> Result<(), RemoteError>;

    /// 下载到本地文件，返回写入的字节数
    async fn download_file(&self, path: &str, dest: &Path) -> Result<u64, RemoteError>;

    /// 按规范 url 删除
    async fn delete_file(&self, url: &str) -> Result<(), RemoteError>;

    /// 服务器版本字符串（原样返回，不做解析）
    async fn server_version(&self) -> Result<String, RemoteError>;

    async fn license(&self) -> Result<License, RemoteError>;

    /// 在应用注册表中按名称查找
    async fn installed_app(&self, name: &str) -> Result<Option<InstalledApp>, RemoteError>;

    /// 获取连接名称（用于日志）
    fn name(&self) -> &str;
}

/// 建立远程会话
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn Remote>, AppError>;
}

/// 通过 HTTP 连接真实的 Cloudflow 服务器
#[derive(Debug, Clone, Default)]
pub struct CloudflowConnector;

#[async_trait]
impl Connector for CloudflowConnector {
    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn Remote>, AppError> {
        create_remote(params).await
    }
}

/// 根据连接参数创建远程实例：有 session 直接使用，否则用账号登录
pub async fn create_remote(params: &ConnectionParams) -> Result<Arc<dyn Remote>, AppError> {
    let session_error = |source| AppError::Session {
        host: params.host.clone(),
        source,
    };

    let api = match &params.session {
        Some(session) => {
            tracing::info!("使用已有会话连接 Cloudflow: {}", params.host);
            CloudflowApi::with_session(&params.host, session, params.accept_invalid_certs)
                .map_err(session_error)?
        }
        None => {
            tracing::info!("登录 Cloudflow: {} (用户 {})", params.host, params.login);
            CloudflowApi::login(
                &params.host,
                &params.login,
                &params.password,
                params.accept_invalid_certs,
            )
            .await
            .map_err(session_error)?
        }
    };

    Ok(Arc::new(api) as Arc<dyn Remote>)
}
