use super::{
    ExistsInfo, InstalledApp, License, LocalStorage, Remote, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS,
};
use crate::error::RemoteError;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;

/// Cloudflow portal API 客户端（`<host>/portal.cgi`）
pub struct CloudflowApi {
    client: Client,
    address: String,
    session: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session: String,
}

#[derive(Debug, Deserialize)]
struct DoesExistResponse {
    exists: bool,
    #[serde(default)]
    is_folder: bool,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct AssetRecord {
    #[serde(default)]
    cloudflow: Option<AssetLocation>,
}

#[derive(Debug, Deserialize)]
struct AssetLocation {
    file: String,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    description: String,
}

impl CloudflowApi {
    fn build_client(accept_invalid_certs: bool) -> Result<Client, RemoteError> {
        Ok(Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .connect_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .build()?)
    }

    fn portal_address(host: &str) -> String {
        format!("{}/portal.cgi", host.trim_end_matches('/'))
    }

    /// 使用已有会话
    pub fn with_session(
        host: &str,
        session: &str,
        accept_invalid_certs: bool,
    ) -> Result<Self, RemoteError> {
        Ok(Self {
            client: Self::build_client(accept_invalid_certs)?,
            address: Self::portal_address(host),
            session: session.to_string(),
            name: host.to_string(),
        })
    }

    /// 用户名密码登录，创建新会话
    pub async fn login(
        host: &str,
        login: &str,
        password: &str,
        accept_invalid_certs: bool,
    ) -> Result<Self, RemoteError> {
        let mut api = Self::with_session(host, "", accept_invalid_certs)?;
        let response: SessionResponse = api
            .call(
                "auth.create_session",
                json!({ "user_name": login, "user_pw": password }),
            )
            .await?;
        api.session = response.session;
        Ok(api)
    }

    /// JSON RPC 调用
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RemoteError> {
        let mut body = match params {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        body.insert("method".to_string(), Value::from(method));
        if !self.session.is_empty() {
            body.insert("session".to_string(), Value::from(self.session.as_str()));
        }

        let response = self
            .client
            .post(&self.address)
            .timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .json(&body)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(RemoteError::Status {
                status: response.status().as_u16(),
                url: format!("{} ({})", self.address, method),
            });
        }

        let value: Value = response.json().await?;
        if let Some(error) = value.get("error") {
            return Err(RemoteError::Api {
                method: method.to_string(),
                message: Self::error_message(error, value.get("messages")),
            });
        }

        serde_json::from_value(value).map_err(|e| RemoteError::Decode {
            method: method.to_string(),
            message: e.to_string(),
        })
    }

    fn error_message(error: &Value, messages: Option<&Value>) -> String {
        let described: Vec<String> = messages
            .cloned()
            .and_then(|m| serde_json::from_value::<Vec<ApiMessage>>(m).ok())
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.description)
            .filter(|d| !d.is_empty())
            .collect();

        if !described.is_empty() {
            return described.join("\n");
        }
        match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn asset_url(&self, asset: &str, path: &str, extra: &str) -> String {
        format!(
            "{}?asset={}&session={}&url={}{}",
            self.address,
            asset,
            urlencoding::encode(&self.session),
            urlencoding::encode(path),
            extra
        )
    }
}

#[async_trait]
impl Remote for CloudflowApi {
    async fn does_exist(&self, path: &str) -> Result<ExistsInfo, RemoteError> {
        let response: DoesExistResponse = self.call("file.does_exist", json!({ "url": path })).await?;
        Ok(ExistsInfo {
            exists: response.exists,
            is_folder: response.is_folder,
            url: response.url.unwrap_or_else(|| path.to_string()),
        })
    }

    async fn list_folder(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        let response: ListResponse<AssetRecord> = self
            .call(
                "asset.list",
                json!({
                    "query": ["cloudflow.enclosing_folder", "begins with", prefix],
                    "fields": ["cloudflow"],
                }),
            )
            .await?;

        Ok(response
            .results
            .into_iter()
            .filter_map(|record| record.cloudflow.map(|c| c.file))
            .collect())
    }

    async fn upload_file(&self, path: &str, source: &Path) -> Result<(), RemoteError> {
        let file = tokio::fs::File::open(source)
            .await
            .map_err(|e| RemoteError::Io {
                path: source.to_path_buf(),
                source: e,
            })?;
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        // 流式读取，避免大文件整体进内存
        let part = Part::stream(Body::wrap_stream(ReaderStream::new(file))).file_name(file_name);
        let form = Form::new().part("file", part);

        let url = self.asset_url("upload_file", path, "&create_folders=true");
        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(IO_TIMEOUT_SECS))
            .multipart(form)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(RemoteError::Status {
                status: response.status().as_u16(),
                url: path.to_string(),
            });
        }
        Ok(())
    }

    async fn download_file(&self, path: &str, dest: &Path) -> Result<u64, RemoteError> {
        let url = self.asset_url("download_file", path, "");
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(IO_TIMEOUT_SECS))
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(RemoteError::Status {
                status: response.status().as_u16(),
                url: path.to_string(),
            });
        }

        let stream = response.bytes_stream().map_err(RemoteError::from);
        LocalStorage::write_stream(dest, stream).await
    }

    async fn delete_file(&self, url: &str) -> Result<(), RemoteError> {
        let _: Value = self.call("file.delete_file", json!({ "url": url })).await?;
        Ok(())
    }

    async fn server_version(&self) -> Result<String, RemoteError> {
        let response: VersionResponse = self.call("portal.version", json!({})).await?;
        response.version.ok_or_else(|| RemoteError::Decode {
            method: "portal.version".to_string(),
            message: "missing version".to_string(),
        })
    }

    async fn license(&self) -> Result<License, RemoteError> {
        self.call("license.get", json!({})).await
    }

    async fn installed_app(&self, name: &str) -> Result<Option<InstalledApp>, RemoteError> {
        let response: ListResponse<InstalledApp> = self
            .call(
                "registry.cfapp.list",
                json!({ "query": ["name", "equal to", name] }),
            )
            .await?;
        Ok(response.results.into_iter().next())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
