//! 版本号（major.minor.patch）解析与比较

use crate::error::{AppError, Result};
use crate::storage::Remote;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// 三段式版本号，按 (major, minor, patch) 字典序比较
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || AppError::InvalidVersionFormat(text.to_string());

        let parts: Vec<&str> = text.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(invalid());
        }

        let mut numbers = [0u32; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            // u32::from_str 接受 "+1"，这里只允许纯数字
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }

        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }

    /// 查询 Cloudflow 当前运行的版本
    pub async fn from_server(remote: &dyn Remote) -> Result<Self> {
        let reported = remote.server_version().await?;
        Self::parse(&reported).map_err(|_| AppError::InvalidCloudflowVersion(reported))
    }

    pub fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl FromStr for Version {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// 更新前检查：本地版本必须严格大于服务器上已安装的版本
pub fn check_update(app: &str, local: &str, remote: &str) -> Result<()> {
    let local_version =
        Version::parse(local).map_err(|_| AppError::InvalidLocalVersion(app.to_string()))?;
    let remote_version =
        Version::parse(remote).map_err(|_| AppError::InvalidRemoteVersion(app.to_string()))?;

    if local_version <= remote_version {
        return Err(AppError::OlderOrSameVersion {
            app: app.to_string(),
            local: local_version.to_string(),
            remote: remote_version.to_string(),
        });
    }

    Ok(())
}
