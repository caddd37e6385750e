//! 同步引擎：单个应用 检查 → 展开 → 传输，多个应用按顺序执行

use crate::config::{ConnectionParams, SyncOptions, SyncSettings};
use crate::core::discovery::find_applications;
use crate::core::expander::{expand_local, expand_remote, LocalExpansion};
use crate::core::gate::{check_compatibility, require_license, Compatibility};
use crate::core::manifest::Application;
use crate::core::path::ResolvedPath;
use crate::core::transfer::{Direction, TransferConfig, TransferExecutor, TransferReport};
use crate::error::{io_err, AppError, Result};
use crate::output::OutputSink;
use crate::storage::{Connector, LocalStorage, Remote};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// 单个应用的同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Discovered,
    Gated,
    Expanded,
    Transferring,
    Done,
    Failed,
}

/// 单个应用的同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppReport {
    pub name: String,
    pub folder: PathBuf,
    pub direction: Direction,
    pub state: SyncState,
    pub compatibility: Compatibility,
    pub report: TransferReport,
    pub empty_directories: Vec<String>,
    /// 清单中的工作流，只报告不传输
    pub workflows: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// 批量同步报告
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub apps: Vec<AppReport>,
}

impl BatchReport {
    pub fn files_transferred(&self) -> usize {
        self.apps.iter().map(|a| a.report.transferred()).sum()
    }

    pub fn files_skipped(&self) -> usize {
        self.apps.iter().map(|a| a.report.skipped()).sum()
    }
}

/// 记录状态迁移
struct Run<'a> {
    name: &'a str,
    state: SyncState,
}

impl<'a> Run<'a> {
    fn new(name: &'a str) -> Self {
        Self {
            name,
            state: SyncState::Discovered,
        }
    }

    fn advance(&mut self, next: SyncState) {
        debug!("{}: {:?} -> {:?}", self.name, self.state, next);
        self.state = next;
    }

    fn fail(&mut self, e: AppError) -> AppError {
        error!("{} 在 {:?} 阶段失败: {}", self.name, self.state, e);
        self.state = SyncState::Failed;
        e
    }
}

/// 同步引擎
pub struct SyncEngine {
    connector: Arc<dyn Connector>,
    output: Arc<dyn OutputSink>,
    settings: SyncSettings,
}

impl SyncEngine {
    pub fn new(connector: Arc<dyn Connector>, output: Arc<dyn OutputSink>) -> Self {
        Self {
            connector,
            output,
            settings: SyncSettings::default(),
        }
    }

    pub fn with_settings(
        connector: Arc<dyn Connector>,
        output: Arc<dyn OutputSink>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            connector,
            output,
            settings,
        }
    }

    /// 上传目录下的所有应用，第一个失败的应用终止整个批次
    pub async fn upload(&self, dir: &Path, options: &SyncOptions) -> Result<BatchReport> {
        self.run_batch(Direction::Upload, dir, options).await
    }

    /// 下载目录下的所有应用，第一个失败的应用终止整个批次
    pub async fn download(&self, dir: &Path, options: &SyncOptions) -> Result<BatchReport> {
        self.run_batch(Direction::Download, dir, options).await
    }

    pub async fn upload_app(&self, app: &Application, options: &SyncOptions) -> Result<AppReport> {
        self.run_app(Direction::Upload, app, options).await
    }

    pub async fn download_app(&self, app: &Application, options: &SyncOptions) -> Result<AppReport> {
        self.run_app(Direction::Download, app, options).await
    }

    async fn run_batch(
        &self,
        direction: Direction,
        dir: &Path,
        options: &SyncOptions,
    ) -> Result<BatchReport> {
        // 所有清单先加载完，再开始网络请求
        let apps = find_applications(dir)?;
        let mut batch = BatchReport::default();

        for app in &apps {
            let report = self.run_app(direction, app, options).await?;
            batch.apps.push(report);
        }

        info!(
            "批量同步完成: {} 个应用, {} 个文件已传输, {} 个跳过",
            batch.apps.len(),
            batch.files_transferred(),
            batch.files_skipped()
        );
        Ok(batch)
    }

    async fn run_app(
        &self,
        direction: Direction,
        app: &Application,
        options: &SyncOptions,
    ) -> Result<AppReport> {
        let started_at = Utc::now();
        let mut run = Run::new(app.name());
        info!("开始同步应用: {} ({:?})", app.name(), direction);

        let params = ConnectionParams::resolve(&app.manifest, options);
        self.output.write_line(&format!("application: {}", app.name()));
        self.output.write_line(&format!("Cloudflow: {}", params.host));
        self.output.write_line(&format!("user: {}", params.login));

        let remote = self.connector.connect(&params).await.map_err(|e| run.fail(e))?;
        debug!("已连接: {}", remote.name());

        let compatibility = Self::gate(app, remote.as_ref(), options)
            .await
            .map_err(|e| run.fail(e))?;
        run.advance(SyncState::Gated);

        let (files, empty_directories) = match direction {
            Direction::Upload => {
                self.output.write_line(&format!("installing app \"{}\"", app.name()));
                let expansion = Self::expand_upload(app).await.map_err(|e| run.fail(e))?;
                (expansion.files_to_upload, expansion.empty_directories)
            }
            Direction::Download => {
                self.output.write_line(&format!("downloading app \"{}\"", app.name()));
                let files = Self::expand_download(app, remote.as_ref())
                    .await
                    .map_err(|e| run.fail(e))?;
                (files, Vec::new())
            }
        };
        run.advance(SyncState::Expanded);

        let workflows: Vec<String> = app.workflows().into_iter().map(|w| w.logical).collect();
        if !workflows.is_empty() {
            info!("{} 个工作流未传输: {:?}", workflows.len(), workflows);
        }

        run.advance(SyncState::Transferring);
        let executor = TransferExecutor::with_config(
            remote,
            self.output.clone(),
            TransferConfig::from(&self.settings),
        );
        let report = executor
            .transfer(direction, files, options.overwrite)
            .await
            .map_err(|e| run.fail(e))?;
        run.advance(SyncState::Done);

        info!("应用同步完成: {}", app.name());
        Ok(AppReport {
            name: app.name().to_string(),
            folder: app.folder.clone(),
            direction,
            state: run.state,
            compatibility,
            report,
            empty_directories,
            workflows,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn gate(
        app: &Application,
        remote: &dyn Remote,
        options: &SyncOptions,
    ) -> Result<Compatibility> {
        let compatibility = check_compatibility(app, remote, options.force_version).await?;
        require_license(app, remote).await?;
        Ok(compatibility)
    }

    async fn expand_upload(app: &Application) -> Result<LocalExpansion> {
        let owned = app.clone();
        tokio::task::spawn_blocking(move || expand_local(&owned))
            .await
            .map_err(|e| io_err(&app.folder, std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    /// 下载前创建应用目录和 `workflows/`
    async fn expand_download(app: &Application, remote: &dyn Remote) -> Result<Vec<ResolvedPath>> {
        let workflows = app.folder.join("workflows");
        LocalStorage::create_dir(&workflows)
            .await
            .map_err(|e| io_err(&workflows, e))?;
        expand_remote(app, remote).await
    }
}
