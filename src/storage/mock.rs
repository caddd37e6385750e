//! 测试用的内存 Cloudflow：记录调用次数，可注入失败

use super::{Connector, ExistsInfo, InstalledApp, License, LocalStorage, Remote};
use crate::config::ConnectionParams;
use crate::error::{AppError, RemoteError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct CallCounts {
    pub exists: AtomicUsize,
    pub list: AtomicUsize,
    pub upload: AtomicUsize,
    pub download: AtomicUsize,
    pub delete: AtomicUsize,
    pub version: AtomicUsize,
    pub license: AtomicUsize,
}

#[derive(Default)]
pub struct MockRemote {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    folders: Mutex<BTreeSet<String>>,
    version: Option<String>,
    license: License,
    installed: Vec<InstalledApp>,
    failing_exists: HashSet<String>,
    failing_uploads: HashMap<String, u16>,
    failing_deletes: HashSet<String>,
    pub calls: CallCounts,
    /// 按顺序记录的变更操作，如 `delete:<path>`、`upload:<path>`
    log: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, content: &[u8]) -> Self {
        lock(&self.files).insert(path.to_string(), content.to_vec());
        self
    }

    pub fn with_folder(self, path: &str) -> Self {
        lock(&self.folders).insert(path.trim_end_matches('/').to_string());
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn with_license(mut self, license: License) -> Self {
        self.license = license;
        self
    }

    pub fn with_installed(mut self, name: &str, version: Option<&str>) -> Self {
        self.installed.push(InstalledApp {
            name: name.to_string(),
            version: version.map(str::to_string),
        });
        self
    }

    pub fn failing_exists(mut self, path: &str) -> Self {
        self.failing_exists.insert(path.to_string());
        self
    }

    pub fn failing_upload(mut self, path: &str, status: u16) -> Self {
        self.failing_uploads.insert(path.to_string(), status);
        self
    }

    pub fn failing_delete(mut self, path: &str) -> Self {
        self.failing_deletes.insert(path.to_string());
        self
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.files).get(path).cloned()
    }

    pub fn log(&self) -> Vec<String> {
        lock(&self.log).clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn is_folder(&self, path: &str) -> bool {
        let trimmed = path.trim_end_matches('/');
        lock(&self.folders).contains(trimmed)
            || lock(&self.files)
                .keys()
                .any(|f| f.starts_with(&format!("{}/", trimmed)))
    }

    async fn busy(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn enclosing_folder(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "",
    }
}

#[async_trait]
impl Remote for MockRemote {
    async fn does_exist(&self, path: &str) -> Result<ExistsInfo, RemoteError> {
        self.calls.exists.fetch_add(1, Ordering::SeqCst);
        if self.failing_exists.contains(path) {
            return Err(RemoteError::Api {
                method: "file.does_exist".to_string(),
                message: "parameter error".to_string(),
            });
        }

        let is_folder = self.is_folder(path);
        let exists = is_folder || lock(&self.files).contains_key(path);
        Ok(ExistsInfo {
            exists,
            is_folder,
            url: path.to_string(),
        })
    }

    async fn list_folder(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.files)
            .keys()
            .filter(|f| enclosing_folder(f).starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn upload_file(&self, path: &str, source: &Path) -> Result<(), RemoteError> {
        self.calls.upload.fetch_add(1, Ordering::SeqCst);
        self.busy().await;
        if let Some(status) = self.failing_uploads.get(path) {
            return Err(RemoteError::Status {
                status: *status,
                url: path.to_string(),
            });
        }

        let data = tokio::fs::read(source).await.map_err(|e| RemoteError::Io {
            path: source.to_path_buf(),
            source: e,
        })?;
        lock(&self.log).push(format!("upload:{}", path));
        lock(&self.files).insert(path.to_string(), data);
        Ok(())
    }

    async fn download_file(&self, path: &str, dest: &Path) -> Result<u64, RemoteError> {
        self.calls.download.fetch_add(1, Ordering::SeqCst);
        self.busy().await;
        let data = self.file(path).ok_or_else(|| RemoteError::Status {
            status: 404,
            url: path.to_string(),
        })?;
        lock(&self.log).push(format!("download:{}", path));
        let stream = futures::stream::iter(vec![Ok(Bytes::from(data))]);
        LocalStorage::write_stream(dest, stream).await
    }

    async fn delete_file(&self, url: &str) -> Result<(), RemoteError> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        if self.failing_deletes.contains(url) {
            return Err(RemoteError::Status {
                status: 500,
                url: url.to_string(),
            });
        }
        lock(&self.log).push(format!("delete:{}", url));
        lock(&self.files).remove(url);
        Ok(())
    }

    async fn server_version(&self) -> Result<String, RemoteError> {
        self.calls.version.fetch_add(1, Ordering::SeqCst);
        self.version.clone().ok_or_else(|| RemoteError::Decode {
            method: "portal.version".to_string(),
            message: "missing version".to_string(),
        })
    }

    async fn license(&self) -> Result<License, RemoteError> {
        self.calls.license.fetch_add(1, Ordering::SeqCst);
        Ok(self.license.clone())
    }

    async fn installed_app(&self, name: &str) -> Result<Option<InstalledApp>, RemoteError> {
        Ok(self.installed.iter().find(|a| a.name == name).cloned())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// 每次连接都返回同一个 MockRemote
pub struct MockConnector {
    pub remote: Arc<MockRemote>,
    pub connections: Mutex<Vec<ConnectionParams>>,
    pub fail: bool,
}

impl MockConnector {
    pub fn new(remote: Arc<MockRemote>) -> Self {
        Self {
            remote,
            connections: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn connections(&self) -> Vec<ConnectionParams> {
        lock(&self.connections).clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn Remote>, AppError> {
        lock(&self.connections).push(params.clone());
        if self.fail {
            return Err(AppError::Session {
                host: params.host.clone(),
                source: RemoteError::Status {
                    status: 401,
                    url: params.host.clone(),
                },
            });
        }
        Ok(self.remote.clone() as Arc<dyn Remote>)
    }
}
