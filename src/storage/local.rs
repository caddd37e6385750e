use crate::error::RemoteError;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

/// 应用目录一侧的文件操作（上传的来源，下载的目标）
pub struct LocalStorage;

impl LocalStorage {
    /// 递归列出目录下的所有文件（不含目录本身），按路径排序
    pub fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    pub async fn exists(path: &Path) -> io::Result<bool> {
        fs::try_exists(path).await
    }

    /// 删除文件或目录，不存在时忽略
    pub async fn delete(path: &Path) -> io::Result<()> {
        let metadata = match fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        if metadata.is_dir() {
            fs::remove_dir_all(path).await
        } else {
            fs::remove_file(path).await
        }
    }

    pub async fn create_dir(path: &Path) -> io::Result<()> {
        fs::create_dir_all(path).await
    }

    /// 流式写入：先写 `<name>.part`，完成后重命名，失败时删除临时文件
    pub async fn write_stream<S>(dest: &Path, stream: S) -> Result<u64, RemoteError>
    where
        S: Stream<Item = Result<Bytes, RemoteError>> + Send,
    {
        let io_error = |source| RemoteError::Io {
            path: dest.to_path_buf(),
            source,
        };

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let temp_path = Self::temp_path(dest);
        let written = match Self::write_chunks(&temp_path, stream).await {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };

        fs::rename(&temp_path, dest).await.map_err(io_error)?;
        Ok(written)
    }

    async fn write_chunks<S>(temp_path: &Path, stream: S) -> Result<u64, RemoteError>
    where
        S: Stream<Item = Result<Bytes, RemoteError>> + Send,
    {
        let io_error = |source| RemoteError::Io {
            path: temp_path.to_path_buf(),
            source,
        };

        let mut file = fs::File::create(temp_path).await.map_err(io_error)?;
        let mut stream = Box::pin(stream);
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_error)?;

        Ok(written)
    }

    fn temp_path(dest: &Path) -> PathBuf {
        let mut name = dest
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".part");
        dest.with_file_name(name)
    }
}
