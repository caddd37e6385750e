//! 日志：config.json 的 `log` 段 + 按大小轮转的日志文件

use crate::config::read_section;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;

const LOG_FILE: &str = "app.log";
const BACKUP_FILE: &str = "app.log.old";

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 单个日志文件上限（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// "error" | "warn" | "info" | "debug" | "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    pub fn load(config_dir: &Path) -> Self {
        read_section(config_dir, "log").unwrap_or_default()
    }

    pub fn tracing_level(&self) -> tracing::Level {
        self.level.parse().unwrap_or(tracing::Level::INFO)
    }
}

struct Inner {
    file: File,
    size: u64,
}

/// 超过上限时把 `app.log` 改名为 `app.log.old` 并重新打开
pub struct SizeRotatingWriter {
    dir: PathBuf,
    max_size: u64,
    inner: Mutex<Inner>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let max_size = u64::from(max_size_mb.max(1)) * 1024 * 1024;
        let path = log_dir.join(LOG_FILE);

        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if size > max_size {
            Self::rotate(log_dir)?;
        }
        let (file, size) = Self::open(log_dir)?;

        Ok(Self {
            dir: log_dir.to_path_buf(),
            max_size,
            inner: Mutex::new(Inner { file, size }),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    fn open(dir: &Path) -> io::Result<(File, u64)> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE))?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    fn rotate(dir: &Path) -> io::Result<()> {
        let backup = dir.join(BACKUP_FILE);
        if backup.exists() {
            fs::remove_file(&backup)?;
        }
        fs::rename(dir.join(LOG_FILE), backup)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_record(&self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.lock();
        if inner.size > 0 && inner.size + buf.len() as u64 > self.max_size {
            inner.file.flush()?;
            Self::rotate(&self.dir)?;
            let (file, size) = Self::open(&self.dir)?;
            inner.file = file;
            inner.size = size;
        }

        inner.file.write_all(buf)?;
        inner.size += buf.len() as u64;
        Ok(buf.len())
    }
}

/// 每条日志记录一个写入器
pub struct LogWriter<'a> {
    target: &'a SizeRotatingWriter,
}

impl Write for LogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.target.write_record(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.target.lock().file.flush()
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter { target: self }
    }
}

/// 日志目录与配置目录相同
pub fn get_log_dir() -> PathBuf {
    crate::config::config_dir()
}
