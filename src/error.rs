//! 错误类型
//!
//! 每种错误都有固定的错误码（`CFAPPERR0xx`），JSON 输出时原样返回给调用方。

use std::path::PathBuf;
use thiserror::Error;

/// 远程接口（Cloudflow portal API）错误
#[derive(Debug, Error)]
pub enum RemoteError {
    /// 服务端返回非 200 状态码
    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    /// 网络层错误（连接失败、超时等）
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// 接口调用成功但返回了错误消息
    #[error("{method} failed: {message}")]
    Api { method: String, message: String },

    /// 响应无法解析
    #[error("invalid response from {method}: {message}")]
    Decode { method: String, message: String },

    /// 本地文件读写失败（上传源 / 下载目标）
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RemoteError {
    /// 是否值得重试：网络错误或 5xx
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Status { status, .. } => *status >= 500,
            RemoteError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// HTTP 状态码（如果有）
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            RemoteError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// 单个文件的传输失败
#[derive(Debug)]
pub struct FileFailure {
    pub path: String,
    pub error: AppError,
}

impl std::fmt::Display for FileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.error)
    }
}

/// 应用同步过程中的所有错误
#[derive(Debug, Error)]
pub enum AppError {
    #[error("application {0} is not installed")]
    ApplicationNotInstalled(String),

    #[error("error {status} when downloading file {path}")]
    Download { status: u16, path: String },

    #[error("error {status} when uploading file {path}")]
    Upload { status: u16, path: String },

    /// 服务器上已安装应用的版本无法解析（更新检查）
    #[error("invalid version for REMOTE {0}, force to update")]
    InvalidRemoteVersion(String),

    #[error("invalid version on LOCAL {0}, specify a valid version to update")]
    InvalidLocalVersion(String),

    #[error("Application {app} LOCAL version {local} <= REMOTE version {remote}, force to update")]
    OlderOrSameVersion {
        app: String,
        local: String,
        remote: String,
    },

    #[error("syntax error in {path}: {source}")]
    ManifestSyntax {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no project.cfapp found at {0}")]
    MissingManifest(PathBuf),

    #[error("cannot find file {logical} (expected at {local})")]
    CannotFindCFAppFile { logical: String, local: PathBuf },

    #[error("remote file {0} does not exist")]
    RemoteFileDoesNotExist(String),

    #[error("could not check if {path} exists on Cloudflow: {source}")]
    CloudflowExistenceCheckFailed {
        path: String,
        #[source]
        source: RemoteError,
    },

    #[error("invalid version format \"{0}\", expected major.minor.patch")]
    InvalidVersionFormat(String),

    /// 远端服务器自身报告的版本无法解析（`Version::from_server`），
    /// 与已安装应用版本的 `InvalidRemoteVersion` 分开
    #[error("Cloudflow reports an invalid version \"{0}\"")]
    InvalidCloudflowVersion(String),

    #[error("application {app} declares an invalid minimum Cloudflow version \"{value}\"")]
    InvalidMinimumVersion { app: String, value: String },

    #[error("application {app} requires Cloudflow {required} or newer, found {actual}")]
    CloudflowTooOld {
        app: String,
        required: String,
        actual: String,
    },

    #[error("application {0} has no license")]
    NoLicense(String),

    #[error("the Cloudflow license does not allow application {app} (license code \"{code}\")")]
    LicenseInvalid { app: String, code: String },

    #[error("{path} is not inside the application folder {root}")]
    PathOutsideRoot { path: PathBuf, root: PathBuf },

    #[error("{first} and {second} both resolve to {local}")]
    PathCollision {
        first: String,
        second: String,
        local: PathBuf,
    },

    #[error("could not upload file {path}: {message}")]
    CouldNotUploadFile { path: String, message: String },

    #[error("could not download file {path}: {message}")]
    CouldNotDownloadFile { path: String, message: String },

    #[error("could not delete {path} before overwriting: {message}")]
    DeleteFailed { path: String, message: String },

    #[error("{} of the files failed to transfer: {}", .0.len(), format_failures(.0))]
    TransferBatch(Vec<FileFailure>),

    #[error("version {version} is not available for application {app}")]
    NoSuchVersionAvailable { app: String, version: String },

    #[error("could not log in to {host}: {source}")]
    Session {
        host: String,
        #[source]
        source: RemoteError,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

fn format_failures(failures: &[FileFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl AppError {
    /// 对外的错误码
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ApplicationNotInstalled(_) => "CFAPPERR001",
            AppError::Download { .. } => "CFAPPERR005",
            AppError::Upload { .. } => "CFAPPERR006",
            AppError::InvalidRemoteVersion(_) => "CFAPPERR007",
            AppError::InvalidLocalVersion(_) => "CFAPPERR008",
            AppError::OlderOrSameVersion { .. } => "CFAPPERR009",
            AppError::ManifestSyntax { .. } => "CFAPPERR010",
            AppError::MissingManifest(_) => "CFAPPERR011",
            AppError::CannotFindCFAppFile { .. } => "CFAPPERR012",
            AppError::RemoteFileDoesNotExist(_) => "CFAPPERR013",
            AppError::CloudflowExistenceCheckFailed { .. } => "CFAPPERR014",
            AppError::InvalidVersionFormat(_) => "CFAPPERR015",
            AppError::InvalidCloudflowVersion(_) => "CFAPPERR016",
            AppError::InvalidMinimumVersion { .. } => "CFAPPERR017",
            AppError::CloudflowTooOld { .. } => "CFAPPERR018",
            AppError::NoLicense(_) => "CFAPPERR019",
            AppError::LicenseInvalid { .. } => "CFAPPERR020",
            AppError::PathOutsideRoot { .. } => "CFAPPERR021",
            AppError::PathCollision { .. } => "CFAPPERR022",
            AppError::CouldNotUploadFile { .. } => "CFAPPERR023",
            AppError::CouldNotDownloadFile { .. } => "CFAPPERR024",
            AppError::DeleteFailed { .. } => "CFAPPERR025",
            AppError::TransferBatch(_) => "CFAPPERR026",
            AppError::NoSuchVersionAvailable { .. } => "CFAPPERR027",
            AppError::Session { .. } => "CFAPPERR028",
            AppError::Io { .. } => "CFAPPERR029",
            AppError::Remote(_) => "CFAPPERR030",
        }
    }

    /// 批量传输失败时，返回每个失败文件的错误
    pub fn failures(&self) -> &[FileFailure] {
        match self {
            AppError::TransferBatch(failures) => failures,
            _ => &[],
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> AppError {
    AppError::Io {
        path: path.into(),
        source,
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_error_lists_every_failed_path() {
        let err = AppError::TransferBatch(vec![
            FileFailure {
                path: "cloudflow://PP_FILE_STORE/a.txt".to_string(),
                error: AppError::Upload {
                    status: 500,
                    path: "cloudflow://PP_FILE_STORE/a.txt".to_string(),
                },
            },
            FileFailure {
                path: "cloudflow://PP_FILE_STORE/b.txt".to_string(),
                error: AppError::RemoteFileDoesNotExist("cloudflow://PP_FILE_STORE/b.txt".to_string()),
            },
        ]);

        let text = err.to_string();
        assert!(text.starts_with("2 of the files failed"));
        assert!(text.contains("a.txt"));
        assert!(text.contains("b.txt"));
        assert_eq!(err.code(), "CFAPPERR026");
        assert_eq!(err.failures().len(), 2);
    }

    #[test]
    fn only_server_errors_are_transient() {
        let busy = RemoteError::Status {
            status: 503,
            url: "x".to_string(),
        };
        let denied = RemoteError::Status {
            status: 403,
            url: "x".to_string(),
        };
        assert!(busy.is_transient());
        assert!(!denied.is_transient());
        assert_eq!(denied.status(), Some(403));
    }
}
