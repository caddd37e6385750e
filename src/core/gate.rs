//! 传输前的兼容性检查：最低 Cloudflow 版本与许可证

use crate::core::manifest::Application;
use crate::core::version::{check_update, Version};
use crate::error::{AppError, Result};
use crate::storage::{License, Remote};
use serde::Serialize;
use tracing::{debug, info};

/// 演示许可证的特殊代码
pub const DEMO_LICENSE_CODE: &str = "demo";
const DEMO_LICENSE_PRODUCT: &str = "Demo License";

/// 兼容性检查结果；不兼容时返回错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compatibility {
    Compatible,
    /// 使用 force 跳过了检查
    Forced,
}

/// 检查服务器版本是否满足应用声明的最低版本
///
/// 未声明最低版本时总是兼容；`force` 时不查询服务器。
pub async fn check_compatibility(
    app: &Application,
    remote: &dyn Remote,
    force: bool,
) -> Result<Compatibility> {
    let Some(minimum) = app.manifest.min_version() else {
        return Ok(Compatibility::Compatible);
    };

    if force {
        info!("跳过 Cloudflow 版本检查: {} (要求 {})", app.name(), minimum);
        return Ok(Compatibility::Forced);
    }

    let current = Version::from_server(remote).await?;
    let required = Version::parse(minimum).map_err(|_| AppError::InvalidMinimumVersion {
        app: app.name().to_string(),
        value: minimum.to_string(),
    })?;

    if current < required {
        return Err(AppError::CloudflowTooOld {
            app: app.name().to_string(),
            required: required.to_string(),
            actual: current.to_string(),
        });
    }

    debug!("Cloudflow {} 满足 {} 的最低版本 {}", current, app.name(), required);
    Ok(Compatibility::Compatible)
}

/// 应用的许可证要求是否被服务器许可证满足
pub async fn validate_license(app: &Application, remote: &dyn Remote) -> Result<bool> {
    let Some(code) = app.manifest.license_code() else {
        return Ok(true);
    };

    let license = remote.license().await?;
    if code == DEMO_LICENSE_CODE {
        return Ok(check_demo_license(&license));
    }
    Ok(check_code(&license, code))
}

/// 同 [`validate_license`]，不满足时返回 `LicenseInvalid`
pub async fn require_license(app: &Application, remote: &dyn Remote) -> Result<()> {
    if validate_license(app, remote).await? {
        return Ok(());
    }
    Err(AppError::LicenseInvalid {
        app: app.name().to_string(),
        code: app.license()?.to_string(),
    })
}

fn check_demo_license(license: &License) -> bool {
    license.products.iter().any(|p| {
        p.name.eq_ignore_ascii_case(DEMO_LICENSE_PRODUCT) || p.code == DEMO_LICENSE_CODE
    })
}

fn check_code(license: &License, code: &str) -> bool {
    license.products.iter().any(|p| p.code == code)
}

/// 更新已安装应用前的检查：本地版本必须比服务器上的新
pub async fn check_update_allowed(app: &Application, remote: &dyn Remote, force: bool) -> Result<()> {
    if force {
        return Ok(());
    }
    let installed = app.installed_version(remote).await?;
    check_update(app.name(), app.version(), &installed)
}
