//! 应用配置模块
//!
//! `<配置目录>/config.json` 中的 `sync` 段控制传输参数，`log` 段由 [`crate::logging`] 读取。
//! 连接参数按 默认值 < project.cfapp < 命令行 的顺序合并。

use crate::core::manifest::Manifest;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_HOST: &str = "http://localhost:9090";
pub const DEFAULT_LOGIN: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "admin";

/// 传输配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// 最大并发传输数
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 上传/下载请求的最大重试次数（仅限网络错误和 5xx）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 重试基础延迟（毫秒），指数退避
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_concurrency() -> usize {
    20
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl SyncSettings {
    /// 从配置文件加载，文件或字段缺失时使用默认值
    pub fn load(config_dir: &Path) -> Self {
        let mut settings: Self = read_section(config_dir, "sync").unwrap_or_default();
        if settings.concurrency == 0 {
            settings.concurrency = default_concurrency();
        }
        settings
    }
}

/// 读取 config.json 中的某一段，任何错误都返回 None
pub fn read_section<T: DeserializeOwned>(config_dir: &Path, key: &str) -> Option<T> {
    let content = fs::read_to_string(config_dir.join("config.json")).ok()?;
    let config = serde_json::from_str::<serde_json::Value>(&content).ok()?;
    serde_json::from_value(config.get(key)?.clone()).ok()
}

/// 默认配置目录
pub fn config_dir() -> PathBuf {
    crate::dirs::config_dir()
        .map(|p| p.join("cfapp"))
        .unwrap_or_else(|| PathBuf::from(".cfapp"))
}

/// 命令行覆盖项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOverrides {
    pub host: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
    /// 传入时跳过登录
    pub session: Option<String>,
}

/// 单次同步的选项
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub overwrite: bool,
    /// 跳过最低 Cloudflow 版本检查
    pub force_version: bool,
    /// 接受无效的 SSL 证书
    pub accept_invalid_certs: bool,
    pub overrides: ConnectionOverrides,
}

/// 合并后的连接参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub login: String,
    pub password: String,
    pub session: Option<String>,
    pub accept_invalid_certs: bool,
}

impl ConnectionParams {
    pub fn resolve(manifest: &Manifest, options: &SyncOptions) -> Self {
        let pick = |cli: &Option<String>, project: &Option<String>, default: &str| {
            cli.clone()
                .or_else(|| project.clone().filter(|v| !v.is_empty()))
                .unwrap_or_else(|| default.to_string())
        };
        let overrides = &options.overrides;

        Self {
            host: pick(&overrides.host, &manifest.host, DEFAULT_HOST),
            login: pick(&overrides.login, &manifest.login, DEFAULT_LOGIN),
            password: pick(&overrides.password, &manifest.password, DEFAULT_PASSWORD),
            session: overrides.session.clone(),
            accept_invalid_certs: options.accept_invalid_certs,
        }
    }
}
