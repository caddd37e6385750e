//! 查找目录下的所有应用（含 `project.cfapp` 的文件夹）

use crate::core::manifest::{Application, PROJECT_FILE};
use crate::error::{AppError, Result};
use std::path::Path;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

/// 不进入的目录
const SKIPPED_DIRS: &[&str] = &["node_modules", "target"];

fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

/// 按路径顺序返回 `dir` 下的所有应用
///
/// 应用文件夹内部不再继续查找。所有清单在任何网络请求之前加载，
/// 一个清单有语法错误则整体失败；一个应用都没有时返回 `MissingManifest`。
pub fn find_applications(dir: &Path) -> Result<Vec<Application>> {
    let mut apps = Vec::new();
    let mut walker = WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_type().is_dir() && !is_skipped(e));

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("跳过无法访问的目录: {}", e);
                continue;
            }
        };

        if entry.path().join(PROJECT_FILE).is_file() {
            debug!("发现应用: {}", entry.path().display());
            apps.push(Application::from_folder(entry.path())?);
            walker.skip_current_dir();
        }
    }

    if apps.is_empty() {
        return Err(AppError::MissingManifest(dir.join(PROJECT_FILE)));
    }

    info!("在 {} 中发现 {} 个应用", dir.display(), apps.len());
    Ok(apps)
}
