//! Cloudflow 逻辑路径与本地路径的映射
//!
//! 逻辑路径有两种写法：`cloudflow://<rel>` 或 `/<rel>`，都映射到 `<应用目录>/<rel>`。
//! 以 `/` 结尾的逻辑路径表示文件夹（可能为空），结尾的 `/` 在所有转换中保留。

use crate::error::{AppError, Result};
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};

pub const CLOUDFLOW_SCHEME: &str = "cloudflow://";

/// 清单条目的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Icon,
    Documentation,
    Workflow,
}

/// 清单中声明的一个路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub kind: EntryKind,
    pub logical: String,
}

impl ManifestEntry {
    pub fn new(kind: EntryKind, logical: impl Into<String>) -> Self {
        Self {
            kind,
            logical: logical.into(),
        }
    }

    /// 是否按文件夹处理（结尾为 `/`）
    pub fn is_folder(&self) -> bool {
        self.logical.ends_with('/')
    }

    pub fn resolve(&self, root: &Path) -> Result<ResolvedPath> {
        ResolvedPath::resolve(&self.logical, root)
    }
}

/// (逻辑路径, 本地路径) 对，相等性只看逻辑路径
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    remote: String,
    local: PathBuf,
}

impl ResolvedPath {
    /// 含 `..` 或绝对路径成分的逻辑路径会落到应用目录之外，返回 `PathOutsideRoot`
    pub fn resolve(logical: &str, root: &Path) -> Result<Self> {
        Ok(Self {
            remote: logical.to_string(),
            local: join_inside(root, Path::new(relative_part(logical)))?,
        })
    }

    /// 由应用目录下的本地路径反推逻辑路径（`cloudflow://` 形式）
    pub fn from_local(local: &Path, root: &Path) -> Result<Self> {
        let relative = local
            .strip_prefix(root)
            .map_err(|_| AppError::PathOutsideRoot {
                path: local.to_path_buf(),
                root: root.to_path_buf(),
            })?;

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(AppError::PathOutsideRoot {
                        path: local.to_path_buf(),
                        root: root.to_path_buf(),
                    })
                }
            }
        }

        Ok(Self {
            remote: format!("{}{}", CLOUDFLOW_SCHEME, parts.join("/")),
            local: local.to_path_buf(),
        })
    }

    /// 文件夹条目下的一个子文件，`relative` 为相对该文件夹的路径
    pub fn child(&self, relative: &Path) -> Result<Self> {
        let local = join_inside(&self.local, relative)?;
        let mut remote = self.remote.clone();
        if !remote.ends_with('/') {
            remote.push('/');
        }
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        remote.push_str(&parts.join("/"));

        Ok(Self { remote, local })
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn local(&self) -> &Path {
        &self.local
    }

    pub fn is_folder(&self) -> bool {
        self.remote.ends_with('/')
    }
}

impl PartialEq for ResolvedPath {
    fn eq(&self, other: &Self) -> bool {
        self.remote == other.remote
    }
}

impl Eq for ResolvedPath {}

impl Hash for ResolvedPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.remote.hash(state);
    }
}

fn join_inside(root: &Path, relative: &Path) -> Result<PathBuf> {
    let mut local = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => local.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::PathOutsideRoot {
                    path: root.join(relative),
                    root: root.to_path_buf(),
                })
            }
        }
    }
    Ok(local)
}

fn relative_part(logical: &str) -> &str {
    logical
        .strip_prefix(CLOUDFLOW_SCHEME)
        .unwrap_or(logical)
        .trim_start_matches('/')
}

/// 去重集合：同一逻辑路径只保留一次，不同逻辑路径落到同一本地路径视为配置错误
#[derive(Debug, Default)]
pub struct PathSet {
    remotes: HashSet<String>,
    locals: HashMap<PathBuf, String>,
    items: Vec<ResolvedPath>,
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回 `true` 表示新加入
    pub fn insert(&mut self, path: ResolvedPath) -> Result<bool> {
        if self.remotes.contains(&path.remote) {
            return Ok(false);
        }

        let key = normalize_local(&path.local);
        if let Some(first) = self.locals.get(&key) {
            return Err(AppError::PathCollision {
                first: first.clone(),
                second: path.remote,
                local: path.local,
            });
        }

        self.remotes.insert(path.remote.clone());
        self.locals.insert(key, path.remote.clone());
        self.items.push(path);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<ResolvedPath> {
        self.items
    }
}

// `a//b`、`a/./b` 与 `a/b` 是同一个本地文件
fn normalize_local(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
