//! 应用描述文件 `project.cfapp`

use crate::core::path::{EntryKind, ManifestEntry};
use crate::error::{io_err, AppError, Result};
use crate::storage::Remote;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const PROJECT_FILE: &str = "project.cfapp";
pub const NO_VERSION: &str = "no version";

/// MARS 信息（发布名称与许可证代码）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarsRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

/// `project.cfapp` 的内容
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cloudflow_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub workflows: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mars: Option<MarsRecord>,
}

/// 校验结果：`corrected` 是修正后的副本，原清单不会被修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub is_valid: bool,
    pub corrected: Manifest,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl Manifest {
    pub fn from_json(text: &str, path: &Path) -> Result<Self> {
        serde_json::from_str(text).map_err(|source| AppError::ManifestSyntax {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn min_version(&self) -> Option<&str> {
        non_empty(&self.min_cloudflow_version)
    }

    pub fn icon(&self) -> Option<&str> {
        non_empty(&self.icon)
    }

    pub fn documentation(&self) -> Option<&str> {
        non_empty(&self.documentation)
    }

    pub fn license_code(&self) -> Option<&str> {
        self.mars.as_ref().and_then(|m| non_empty(&m.license))
    }

    /// 校验并修正：
    /// - documentation 必须以 `/` 结尾
    /// - 服务器上为空的文件夹必须以 `/` 结尾
    pub async fn validate(&self, remote: &dyn Remote) -> Result<Validation> {
        let mut corrected = self.clone();
        let mut is_valid = true;

        if let Some(doc) = self.documentation() {
            if !doc.ends_with('/') {
                is_valid = false;
                corrected.documentation = Some(format!("{}/", doc));
            }
        }

        for (i, path) in self.files.iter().enumerate() {
            let info = remote.does_exist(path).await.map_err(|source| {
                AppError::CloudflowExistenceCheckFailed {
                    path: path.clone(),
                    source,
                }
            })?;

            if !info.exists {
                return Err(AppError::RemoteFileDoesNotExist(path.clone()));
            }

            if info.is_folder && !path.ends_with('/') {
                let children = remote.list_folder(&format!("{}/", path)).await?;
                if children.is_empty() {
                    debug!("空文件夹补全结尾斜杠: {}", path);
                    is_valid = false;
                    corrected.files[i] = format!("{}/", path);
                }
            }
        }

        Ok(Validation {
            is_valid,
            corrected,
        })
    }
}

/// 一个 Cloudflow 应用：清单 + 所在目录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub manifest: Manifest,
    pub folder: PathBuf,
}

impl Application {
    pub fn new(manifest: Manifest, folder: impl Into<PathBuf>) -> Self {
        Self {
            manifest,
            folder: folder.into(),
        }
    }

    /// 读取 `<folder>/project.cfapp`
    pub fn from_folder(folder: &Path) -> Result<Self> {
        let project_file = folder.join(PROJECT_FILE);
        let text = match std::fs::read_to_string(&project_file) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::MissingManifest(project_file))
            }
            Err(e) => return Err(io_err(&project_file, e)),
        };

        let manifest = Manifest::from_json(&text, &project_file)?;
        Ok(Self::new(manifest, folder))
    }

    /// MARS 名称优先
    pub fn name(&self) -> &str {
        self.manifest
            .mars
            .as_ref()
            .and_then(|m| non_empty(&m.name))
            .unwrap_or(&self.manifest.name)
    }

    pub fn version(&self) -> &str {
        non_empty(&self.manifest.version).unwrap_or(NO_VERSION)
    }

    pub fn has_license(&self) -> bool {
        self.manifest.license_code().is_some()
    }

    pub fn license(&self) -> Result<&str> {
        self.manifest
            .license_code()
            .ok_or_else(|| AppError::NoLicense(format!("{} version {}", self.name(), self.version())))
    }

    /// 需要传输的路径：files + icon + documentation
    pub fn entries(&self) -> Vec<ManifestEntry> {
        let mut entries: Vec<ManifestEntry> = self
            .manifest
            .files
            .iter()
            .map(|f| ManifestEntry::new(EntryKind::File, f.as_str()))
            .collect();

        if let Some(icon) = self.manifest.icon() {
            entries.push(ManifestEntry::new(EntryKind::Icon, icon));
        }
        if let Some(doc) = self.manifest.documentation() {
            entries.push(ManifestEntry::new(EntryKind::Documentation, doc));
        }
        entries
    }

    pub fn workflows(&self) -> Vec<ManifestEntry> {
        self.manifest
            .workflows
            .iter()
            .map(|w| ManifestEntry::new(EntryKind::Workflow, w.as_str()))
            .collect()
    }

    pub async fn is_installed(&self, remote: &dyn Remote) -> Result<bool> {
        Ok(remote.installed_app(self.name()).await?.is_some())
    }

    /// 服务器上安装的版本，未标版本时返回 "no version"
    pub async fn installed_version(&self, remote: &dyn Remote) -> Result<String> {
        let installed = remote
            .installed_app(self.name())
            .await?
            .ok_or_else(|| AppError::ApplicationNotInstalled(self.name().to_string()))?;

        Ok(installed
            .version
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| NO_VERSION.to_string()))
    }
}
