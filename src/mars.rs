//! MARS 应用信息查询（版本选择 + 详情）
//!
//! HTTP 查询本身由 [`MarsClient`] 的实现提供。

use crate::error::{AppError, RemoteError, Result};
use crate::output::OutputSink;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 本机在 MARS 上的身份
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub server_url: String,
    pub customer_code: String,
    pub serial: String,
    pub site: String,
}

/// 应用的版本列表
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppListInfo {
    #[serde(default)]
    pub last_release: Option<String>,
    #[serde(default)]
    pub last_version: Option<String>,
    #[serde(default)]
    pub versions: Vec<String>,
}

/// 某个版本的详情
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDetails {
    pub download_url: String,
    #[serde(default)]
    pub you_are_owner: bool,
    #[serde(default)]
    pub changeset: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub download_url: String,
    pub app_name: String,
    pub app_version: String,
    pub owner: bool,
    pub changeset: Option<String>,
    pub license: Option<String>,
}

#[async_trait]
pub trait MarsClient: Send + Sync {
    async fn app_list_info(&self, system: &SystemInfo, app: &str) -> Result<AppListInfo, RemoteError>;

    async fn app_details(
        &self,
        system: &SystemInfo,
        app: &str,
        version: &str,
    ) -> Result<AppDetails, RemoteError>;
}

/// 默认取最新正式版，没有则取最新版本；指定版本必须在列表中
pub fn select_version(
    app: &str,
    list: &AppListInfo,
    force_version: Option<&str>,
    force_last: bool,
) -> Result<String> {
    let selected = if let Some(forced) = force_version {
        if !list.versions.iter().any(|v| v == forced) {
            return Err(AppError::NoSuchVersionAvailable {
                app: app.to_string(),
                version: forced.to_string(),
            });
        }
        Some(forced.to_string())
    } else if force_last {
        list.last_version.clone()
    } else {
        list.last_release.clone().or_else(|| list.last_version.clone())
    };

    selected.ok_or_else(|| AppError::NoSuchVersionAvailable {
        app: app.to_string(),
        version: "latest".to_string(),
    })
}

pub async fn get_app_info(
    client: &dyn MarsClient,
    system: &SystemInfo,
    app: &str,
    force_version: Option<&str>,
    force_last: bool,
    output: &dyn OutputSink,
) -> Result<AppInfo> {
    output.write_line("get app info on MARS");
    let list = client.app_list_info(system, app).await?;
    let version = select_version(app, &list, force_version, force_last)?;
    debug!("MARS: {} 选择版本 {}", app, version);

    let details = client.app_details(system, app, &version).await?;
    Ok(AppInfo {
        download_url: details.download_url,
        app_name: app.to_string(),
        app_version: version,
        owner: details.you_are_owner,
        changeset: details.changeset,
        license: details.license,
    })
}
