//! 并行传输执行器
//!
//! 每个文件独立完成 存在性检查 → (删除) → 传输，一个文件失败不影响其他文件；
//! 全部结束后只要有失败，整批返回 `TransferBatch`。

use crate::config::SyncSettings;
use crate::core::path::ResolvedPath;
use crate::error::{io_err, AppError, FileFailure, RemoteError, Result};
use crate::output::OutputSink;
use crate::storage::{LocalStorage, Remote};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// 单次重试等待上限
const MAX_RETRY_DELAY_MS: u64 = 60_000;

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

/// 针对单个文件决定的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    /// 目标已存在且不覆盖
    Skip,
    Upload,
    /// 先删除远程文件再上传
    DeleteThenUpload,
    Download,
    /// 先删除本地文件再下载
    DeleteThenDownload,
}

impl Action {
    pub fn is_skip(&self) -> bool {
        matches!(self, Action::Skip)
    }
}

/// 覆盖策略，纯函数，在任何写操作之前决定
pub fn decide(direction: Direction, target_exists: bool, overwrite: bool) -> Action {
    match (direction, target_exists, overwrite) {
        (_, true, false) => Action::Skip,
        (Direction::Upload, true, true) => Action::DeleteThenUpload,
        (Direction::Upload, false, _) => Action::Upload,
        (Direction::Download, true, true) => Action::DeleteThenDownload,
        (Direction::Download, false, _) => Action::Download,
    }
}

/// 传输计划项
#[derive(Debug, Clone)]
pub struct PlanItem {
    pub path: ResolvedPath,
    pub action: Action,
    /// 远程删除使用的规范 url
    pub url: String,
}

/// 单个文件的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub path: String,
    pub action: Action,
}

/// 传输报告
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferReport {
    pub outcomes: Vec<FileOutcome>,
}

impl TransferReport {
    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.action.is_skip()).count()
    }

    pub fn transferred(&self) -> usize {
        self.outcomes.len() - self.skipped()
    }
}

/// 传输配置
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// 最大并发数
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for TransferConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            concurrency: settings.concurrency.max(1),
            max_retries: settings.max_retries,
            retry_base_delay_ms: settings.retry_base_delay_ms,
        }
    }
}

/// 传输执行器
pub struct TransferExecutor {
    remote: Arc<dyn Remote>,
    output: Arc<dyn OutputSink>,
    config: TransferConfig,
}

impl TransferExecutor {
    pub fn new(remote: Arc<dyn Remote>, output: Arc<dyn OutputSink>) -> Self {
        Self {
            remote,
            output,
            config: TransferConfig::default(),
        }
    }

    pub fn with_config(
        remote: Arc<dyn Remote>,
        output: Arc<dyn OutputSink>,
        config: TransferConfig,
    ) -> Self {
        Self {
            remote,
            output,
            config,
        }
    }

    /// 并行传输所有文件，每个文件恰好尝试一次（不含重试）
    pub async fn transfer(
        &self,
        direction: Direction,
        items: Vec<ResolvedPath>,
        overwrite: bool,
    ) -> Result<TransferReport> {
        info!(
            "开始传输 {} 个文件 ({:?}, 并发 {}, 覆盖 {})",
            items.len(),
            direction,
            self.config.concurrency,
            overwrite
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::with_capacity(items.len());

        for path in items {
            let semaphore = semaphore.clone();
            let remote = self.remote.clone();
            let output = self.output.clone();
            let config = self.config.clone();
            let remote_path = path.remote().to_string();

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| failed(direction, path.remote(), e.to_string()))?;
                Self::run_item(
                    remote.as_ref(),
                    output.as_ref(),
                    &config,
                    direction,
                    &path,
                    overwrite,
                )
                .await
            });

            handles.push((remote_path, handle));
        }

        let mut report = TransferReport::default();
        let mut failures = Vec::new();

        // 等待所有任务完成
        for (path, handle) in handles {
            match handle.await {
                Ok(Ok(action)) => report.outcomes.push(FileOutcome { path, action }),
                Ok(Err(error)) => failures.push(FileFailure { path, error }),
                Err(e) => {
                    let error = failed(direction, &path, e.to_string());
                    failures.push(FileFailure { path, error });
                }
            }
        }

        if !failures.is_empty() {
            error!(
                "传输结束: {} 个成功, {} 个失败",
                report.outcomes.len(),
                failures.len()
            );
            return Err(AppError::TransferBatch(failures));
        }

        info!(
            "传输完成: {} 个已传输, {} 个跳过",
            report.transferred(),
            report.skipped()
        );
        Ok(report)
    }

    async fn run_item(
        remote: &dyn Remote,
        output: &dyn OutputSink,
        config: &TransferConfig,
        direction: Direction,
        path: &ResolvedPath,
        overwrite: bool,
    ) -> Result<Action> {
        let result = match Self::plan(remote, direction, path, overwrite).await {
            Ok(item) => Self::execute(remote, output, config, direction, &item).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            error!("文件传输失败 {}: {}", path.remote(), e);
            let verb = match direction {
                Direction::Upload => "upload",
                Direction::Download => "download",
            };
            output.write_line(&format!("could not {} file: {}", verb, path.remote()));
        }
        result
    }

    /// 检查目标是否存在并决定动作
    async fn plan(
        remote: &dyn Remote,
        direction: Direction,
        path: &ResolvedPath,
        overwrite: bool,
    ) -> Result<PlanItem> {
        let (exists, url) = match direction {
            Direction::Upload => {
                let info = remote.does_exist(path.remote()).await.map_err(|source| {
                    AppError::CloudflowExistenceCheckFailed {
                        path: path.remote().to_string(),
                        source,
                    }
                })?;
                (info.exists, info.url)
            }
            Direction::Download => {
                let exists = LocalStorage::exists(path.local())
                    .await
                    .map_err(|e| io_err(path.local(), e))?;
                (exists, path.remote().to_string())
            }
        };

        let action = decide(direction, exists, overwrite);
        debug!("{} -> {:?}", path.remote(), action);
        Ok(PlanItem {
            path: path.clone(),
            action,
            url,
        })
    }

    async fn execute(
        remote: &dyn Remote,
        output: &dyn OutputSink,
        config: &TransferConfig,
        direction: Direction,
        item: &PlanItem,
    ) -> Result<Action> {
        let path = &item.path;
        let remote_path = path.remote();
        let local = path.local();

        match item.action {
            Action::Skip => {
                let side = match direction {
                    Direction::Upload => "file exists",
                    Direction::Download => "file exists locally",
                };
                output.write_line(&format!("skipping file: {} {}", remote_path, side));
            }
            Action::DeleteThenUpload | Action::Upload => {
                if item.action == Action::DeleteThenUpload {
                    remote.delete_file(&item.url).await.map_err(|e| AppError::DeleteFailed {
                        path: remote_path.to_string(),
                        message: e.to_string(),
                    })?;
                }
                output.write_line(&format!("uploading file: {}", remote_path));
                with_retry(config, remote_path, || remote.upload_file(remote_path, local))
                    .await
                    .map_err(|e| transfer_error(Direction::Upload, remote_path, e))?;
            }
            Action::DeleteThenDownload | Action::Download => {
                if item.action == Action::DeleteThenDownload {
                    LocalStorage::delete(local).await.map_err(|e| AppError::DeleteFailed {
                        path: local.display().to_string(),
                        message: e.to_string(),
                    })?;
                }
                output.write_line(&format!("downloading file: {}", remote_path));
                with_retry(config, remote_path, || remote.download_file(remote_path, local))
                    .await
                    .map_err(|e| transfer_error(Direction::Download, remote_path, e))?;
            }
        }

        Ok(item.action)
    }
}

/// `base * 2^attempt`，封顶 `MAX_RETRY_DELAY_MS`
fn retry_delay(config: &TransferConfig, attempt: u32) -> Duration {
    let delay = 2_u64
        .checked_pow(attempt)
        .and_then(|factor| config.retry_base_delay_ms.checked_mul(factor))
        .unwrap_or(u64::MAX)
        .min(MAX_RETRY_DELAY_MS);
    Duration::from_millis(delay)
}

/// 网络错误和 5xx 按指数退避重试
async fn with_retry<T, F, Fut>(
    config: &TransferConfig,
    path: &str,
    mut op: F,
) -> std::result::Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, RemoteError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                let delay = retry_delay(config, attempt);
                attempt += 1;
                warn!(
                    "{} 传输失败，{}ms 后重试 ({}/{}): {}",
                    path,
                    delay.as_millis(),
                    attempt,
                    config.max_retries,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn transfer_error(direction: Direction, path: &str, error: RemoteError) -> AppError {
    match (direction, error.status()) {
        (Direction::Upload, Some(status)) => AppError::Upload {
            status,
            path: path.to_string(),
        },
        (Direction::Download, Some(status)) => AppError::Download {
            status,
            path: path.to_string(),
        },
        (_, None) => failed(direction, path, error.to_string()),
    }
}

fn failed(direction: Direction, path: &str, message: String) -> AppError {
    match direction {
        Direction::Upload => AppError::CouldNotUploadFile {
            path: path.to_string(),
            message,
        },
        Direction::Download => AppError::CouldNotDownloadFile {
            path: path.to_string(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::JsonOutput;
    use crate::storage::mock::MockRemote;
    use std::path::Path;
    use std::sync::atomic::Ordering;

    fn config(concurrency: usize, max_retries: u32) -> TransferConfig {
        TransferConfig {
            concurrency,
            max_retries,
            retry_base_delay_ms: 1,
        }
    }

    fn executor(remote: &Arc<MockRemote>, output: &Arc<JsonOutput>, cfg: TransferConfig) -> TransferExecutor {
        TransferExecutor::with_config(remote.clone(), output.clone(), cfg)
    }

    fn local_files(root: &Path, names: &[String]) -> Vec<ResolvedPath> {
        names
            .iter()
            .map(|name| {
                let path = ResolvedPath::resolve(name, root).unwrap();
                std::fs::create_dir_all(path.local().parent().unwrap()).unwrap();
                std::fs::write(path.local(), name.as_bytes()).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn decision_table() {
        assert_eq!(decide(Direction::Upload, true, false), Action::Skip);
        assert_eq!(decide(Direction::Upload, true, true), Action::DeleteThenUpload);
        assert_eq!(decide(Direction::Upload, false, false), Action::Upload);
        assert_eq!(decide(Direction::Upload, false, true), Action::Upload);
        assert_eq!(decide(Direction::Download, true, false), Action::Skip);
        assert_eq!(decide(Direction::Download, true, true), Action::DeleteThenDownload);
        assert_eq!(decide(Direction::Download, false, true), Action::Download);
    }

    #[tokio::test]
    async fn existing_remote_file_is_skipped_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MockRemote::new().with_file("/a.txt", b"old"));
        let output = Arc::new(JsonOutput::new());
        let items = local_files(dir.path(), &["/a.txt".to_string()]);

        let report = executor(&remote, &output, config(20, 0))
            .transfer(Direction::Upload, items, false)
            .await
            .unwrap();

        assert_eq!(report.outcomes, vec![FileOutcome { path: "/a.txt".to_string(), action: Action::Skip }]);
        assert_eq!(remote.calls.upload.load(Ordering::SeqCst), 0);
        assert_eq!(remote.calls.delete.load(Ordering::SeqCst), 0);
        assert_eq!(remote.file("/a.txt").unwrap(), b"old");
        assert_eq!(output.lines(), vec!["skipping file: /a.txt file exists".to_string()]);
    }

    #[tokio::test]
    async fn overwrite_deletes_once_then_uploads_once() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MockRemote::new().with_file("/a.txt", b"old"));
        let output = Arc::new(JsonOutput::new());
        let items = local_files(dir.path(), &["/a.txt".to_string()]);

        let report = executor(&remote, &output, config(20, 0))
            .transfer(Direction::Upload, items, true)
            .await
            .unwrap();

        assert_eq!(report.outcomes[0].action, Action::DeleteThenUpload);
        assert_eq!(remote.log(), vec!["delete:/a.txt".to_string(), "upload:/a.txt".to_string()]);
        assert_eq!(remote.file("/a.txt").unwrap(), b"/a.txt");
    }

    #[tokio::test]
    async fn one_failing_existence_check_does_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let names: Vec<String> = (0..25).map(|i| format!("/files/f{:02}.txt", i)).collect();
        let items = local_files(dir.path(), &names);

        let mut mock = MockRemote::new().failing_exists("/files/f07.txt");
        for name in &names[20..] {
            mock = mock.with_file(name, b"existing");
        }
        let remote = Arc::new(mock);
        let output = Arc::new(JsonOutput::new());

        let err = executor(&remote, &output, config(20, 0))
            .transfer(Direction::Upload, items, false)
            .await
            .unwrap_err();

        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, "/files/f07.txt");
        assert!(matches!(failures[0].error, AppError::CloudflowExistenceCheckFailed { .. }));

        // 19 个新文件上传，5 个已存在跳过
        assert_eq!(remote.calls.exists.load(Ordering::SeqCst), 25);
        assert_eq!(remote.calls.upload.load(Ordering::SeqCst), 19);
        let lines = output.lines();
        assert_eq!(lines.iter().filter(|l| l.starts_with("skipping")).count(), 5);
        assert_eq!(lines.iter().filter(|l| l.starts_with("uploading")).count(), 19);
        assert!(lines.contains(&"could not upload file: /files/f07.txt".to_string()));
        assert!(remote.max_in_flight() <= 20);
    }

    #[tokio::test]
    async fn concurrency_limit_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let names: Vec<String> = (0..12).map(|i| format!("/f{}.txt", i)).collect();
        let items = local_files(dir.path(), &names);
        let remote = Arc::new(MockRemote::new());
        let output = Arc::new(JsonOutput::new());

        let report = executor(&remote, &output, config(3, 0))
            .transfer(Direction::Upload, items, false)
            .await
            .unwrap();

        assert_eq!(report.transferred(), 12);
        assert!(remote.max_in_flight() <= 3);
    }

    #[tokio::test]
    async fn http_failures_carry_status_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let items = local_files(dir.path(), &["/ok.txt".to_string(), "/denied.txt".to_string()]);
        let remote = Arc::new(MockRemote::new().failing_upload("/denied.txt", 403));
        let output = Arc::new(JsonOutput::new());

        let err = executor(&remote, &output, config(20, 3))
            .transfer(Direction::Upload, items, false)
            .await
            .unwrap_err();

        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            failures[0].error,
            AppError::Upload { status: 403, ref path } if path == "/denied.txt"
        ));
        // 4xx 不重试
        assert_eq!(remote.calls.upload.load(Ordering::SeqCst), 2);
        assert!(remote.file("/ok.txt").is_some());
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_reported() {
        let dir = tempfile::tempdir().unwrap();
        let items = local_files(dir.path(), &["/busy.txt".to_string()]);
        let remote = Arc::new(MockRemote::new().failing_upload("/busy.txt", 503));
        let output = Arc::new(JsonOutput::new());

        let err = executor(&remote, &output, config(20, 2))
            .transfer(Direction::Upload, items, false)
            .await
            .unwrap_err();

        assert_eq!(remote.calls.upload.load(Ordering::SeqCst), 3);
        assert!(matches!(err.failures()[0].error, AppError::Upload { status: 503, .. }));
    }

    #[tokio::test]
    async fn failed_delete_aborts_only_that_file() {
        let dir = tempfile::tempdir().unwrap();
        let items = local_files(dir.path(), &["/a.txt".to_string(), "/b.txt".to_string()]);
        let remote = Arc::new(
            MockRemote::new()
                .with_file("/a.txt", b"old")
                .with_file("/b.txt", b"old")
                .failing_delete("/a.txt"),
        );
        let output = Arc::new(JsonOutput::new());

        let err = executor(&remote, &output, config(20, 0))
            .transfer(Direction::Upload, items, true)
            .await
            .unwrap_err();

        assert!(matches!(err.failures()[0].error, AppError::DeleteFailed { .. }));
        assert_eq!(remote.log(), vec!["delete:/b.txt".to_string(), "upload:/b.txt".to_string()]);
        assert_eq!(remote.file("/a.txt").unwrap(), b"old");
    }

    #[tokio::test]
    async fn downloads_follow_the_same_policy_locally() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(
            MockRemote::new()
                .with_file("cloudflow://S/new.txt", b"new")
                .with_file("cloudflow://S/kept.txt", b"remote"),
        );
        let kept = dir.path().join("S/kept.txt");
        std::fs::create_dir_all(kept.parent().unwrap()).unwrap();
        std::fs::write(&kept, "local").unwrap();

        let items = vec![
            ResolvedPath::resolve("cloudflow://S/new.txt", dir.path()).unwrap(),
            ResolvedPath::resolve("cloudflow://S/kept.txt", dir.path()).unwrap(),
        ];
        let output = Arc::new(JsonOutput::new());

        let report = executor(&remote, &output, config(20, 0))
            .transfer(Direction::Download, items.clone(), false)
            .await
            .unwrap();
        assert_eq!(report.skipped(), 1);
        assert_eq!(remote.calls.download.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_to_string(dir.path().join("S/new.txt")).unwrap(), "new");
        assert_eq!(std::fs::read_to_string(&kept).unwrap(), "local");

        let report = executor(&remote, &output, config(20, 0))
            .transfer(Direction::Download, items, true)
            .await
            .unwrap();
        assert!(report.outcomes.iter().all(|o| o.action == Action::DeleteThenDownload));
        assert_eq!(std::fs::read_to_string(&kept).unwrap(), "remote");
    }

    #[tokio::test]
    async fn missing_remote_file_fails_download_with_status() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MockRemote::new());
        let output = Arc::new(JsonOutput::new());
        let items = vec![ResolvedPath::resolve("cloudflow://S/gone.txt", dir.path()).unwrap()];

        let err = executor(&remote, &output, config(20, 0))
            .transfer(Direction::Download, items, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err.failures()[0].error,
            AppError::Download { status: 404, ref path } if path == "cloudflow://S/gone.txt"
        ));
        assert!(!dir.path().join("S/gone.txt").exists());
    }

    #[tokio::test]
    async fn empty_batch_succeeds() {
        let remote = Arc::new(MockRemote::new());
        let output = Arc::new(JsonOutput::new());
        let report = executor(&remote, &output, config(20, 0))
            .transfer(Direction::Upload, Vec::new(), false)
            .await
            .unwrap();
        assert!(report.outcomes.is_empty());
    }

    #[test]
    fn retry_delay_doubles_and_is_capped() {
        let cfg = TransferConfig {
            concurrency: 1,
            max_retries: 500,
            retry_base_delay_ms: 500,
        };
        assert_eq!(retry_delay(&cfg, 0), Duration::from_millis(500));
        assert_eq!(retry_delay(&cfg, 3), Duration::from_millis(4_000));

        for attempt in [7, 63, 64, 200, u32::MAX] {
            assert_eq!(
                retry_delay(&cfg, attempt),
                Duration::from_millis(MAX_RETRY_DELAY_MS)
            );
        }

        let huge_base = TransferConfig {
            retry_base_delay_ms: u64::MAX,
            ..cfg
        };
        assert_eq!(
            retry_delay(&huge_base, 1),
            Duration::from_millis(MAX_RETRY_DELAY_MS)
        );
    }
}
