//! 将清单展开为具体文件列表（本地用于上传，远程用于下载）

use crate::core::manifest::Application;
use crate::core::path::{PathSet, ResolvedPath};
use crate::error::{io_err, AppError, Result};
use crate::storage::{LocalStorage, Remote};
use tracing::{debug, info};

/// 本地展开结果
#[derive(Debug, Clone, Default)]
pub struct LocalExpansion {
    pub files_to_upload: Vec<ResolvedPath>,
    /// 声明为空文件夹（结尾 `/`）且本地不存在的条目，按声明原样记录
    pub empty_directories: Vec<String>,
}

/// 展开本地文件
///
/// 文件夹递归列出所有文件；本地不存在的条目只有以 `/` 结尾时才视为空文件夹，否则报错。
pub fn expand_local(app: &Application) -> Result<LocalExpansion> {
    let mut files = PathSet::new();
    let mut empty_directories: Vec<String> = Vec::new();

    for entry in app.entries() {
        let resolved = entry.resolve(&app.folder)?;
        let local = resolved.local();

        let metadata = match std::fs::metadata(local) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !entry.is_folder() {
                    return Err(AppError::CannotFindCFAppFile {
                        logical: entry.logical.clone(),
                        local: local.to_path_buf(),
                    });
                }
                debug!("空文件夹: {}", entry.logical);
                if !empty_directories.contains(&entry.logical) {
                    empty_directories.push(entry.logical.clone());
                }
                continue;
            }
            Err(e) => return Err(io_err(local, e)),
        };

        if metadata.is_dir() {
            let children = LocalStorage::list_files(local).map_err(|e| io_err(local, e))?;
            debug!("展开本地文件夹 {}: {} 个文件", entry.logical, children.len());
            for child in children {
                let relative = child.strip_prefix(local).map_err(|_| AppError::PathOutsideRoot {
                    path: child.clone(),
                    root: local.to_path_buf(),
                })?;
                files.insert(resolved.child(relative)?)?;
            }
        } else {
            files.insert(resolved)?;
        }
    }

    info!(
        "本地展开完成: {} 个文件, {} 个空文件夹",
        files.len(),
        empty_directories.len()
    );

    Ok(LocalExpansion {
        files_to_upload: files.into_vec(),
        empty_directories,
    })
}

/// 展开远程文件
///
/// 存在性查询出错与文件不存在是两种不同的错误；没有文件的远程文件夹不算错误。
pub async fn expand_remote(app: &Application, remote: &dyn Remote) -> Result<Vec<ResolvedPath>> {
    let mut files = PathSet::new();

    for entry in app.entries() {
        let info = remote.does_exist(&entry.logical).await.map_err(|source| {
            AppError::CloudflowExistenceCheckFailed {
                path: entry.logical.clone(),
                source,
            }
        })?;

        if !info.exists {
            return Err(AppError::RemoteFileDoesNotExist(entry.logical.clone()));
        }

        if info.is_folder {
            // 带上结尾斜杠，避免 `docs` 匹配到 `docs2/`
            let prefix = if entry.is_folder() {
                entry.logical.clone()
            } else {
                format!("{}/", entry.logical)
            };
            let children = remote.list_folder(&prefix).await?;
            debug!("展开远程文件夹 {}: {} 个文件", entry.logical, children.len());
            for child in children {
                files.insert(ResolvedPath::resolve(&child, &app.folder)?)?;
            }
        } else {
            files.insert(entry.resolve(&app.folder)?)?;
        }
    }

    info!("远程展开完成: {} 个文件", files.len());
    Ok(files.into_vec())
}
