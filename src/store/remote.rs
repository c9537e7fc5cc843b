//! Remote Store - HTTP communication with the cloud tier
//!
//! Handles all REST calls to the remote storage service:
//! - Health checks
//! - Category record upload/download
//! - Backup snapshot upload/download/deletion

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use super::models::{DataCategory, VersionedRecord};
use crate::codec::{decode_base64, encode_base64, CodecError, SealedSnapshot};

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Operations the sync, backup and recovery layers need from the cloud tier
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn ping(&self) -> Result<(), RemoteError>;

    /// `None` when the remote has never received this category
    async fn fetch_record(&self, category: DataCategory) -> Result<Option<VersionedRecord>, RemoteError>;

    async fn push_record(&self, record: &VersionedRecord) -> Result<(), RemoteError>;

    async fn put_snapshot(
        &self,
        backup_id: &str,
        category: DataCategory,
        snapshot: &SealedSnapshot,
    ) -> Result<(), RemoteError>;

    async fn fetch_snapshot(
        &self,
        backup_id: &str,
        category: DataCategory,
    ) -> Result<Option<SealedSnapshot>, RemoteError>;

    async fn delete_snapshots(&self, backup_id: &str) -> Result<(), RemoteError>;
}

/// REST client for the remote store
pub struct HttpRemote {
    client: Client,
    base_url: Url,
    access_token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: &str, access_token: Option<String>) -> Result<Self, RemoteError> {
        let mut base_url = Url::parse(base_url)?;
        // Url::join replaces the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url,
            access_token,
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, RemoteError> {
        let url = self.base_url.join(path)?;
        let builder = self.client.request(method, url);

        Ok(match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn ping(&self) -> Result<(), RemoteError> {
        let response = self.request(Method::GET, "health")?.send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(handle_error(response).await)
        }
    }

    async fn fetch_record(&self, category: DataCategory) -> Result<Option<VersionedRecord>, RemoteError> {
        let response = self
            .request(Method::GET, &format!("records/{}", category.as_str()))?
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        handle_response(response).await.map(Some)
    }

    async fn push_record(&self, record: &VersionedRecord) -> Result<(), RemoteError> {
        let response = self
            .request(Method::PUT, &format!("records/{}", record.category.as_str()))?
            .json(record)
            .send()
            .await?;

        if response.status().is_success() {
            log::info!("Pushed {} v{} to remote", record.category, record.version);
            Ok(())
        } else {
            Err(handle_error(response).await)
        }
    }

    async fn put_snapshot(
        &self,
        backup_id: &str,
        category: DataCategory,
        snapshot: &SealedSnapshot,
    ) -> Result<(), RemoteError> {
        let body = SnapshotBody {
            payload: encode_base64(&snapshot.payload),
            snapshot_hash: snapshot.hash.clone(),
        };

        let response = self
            .request(Method::PUT, &format!("backups/{}/{}", backup_id, category.as_str()))?
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(handle_error(response).await)
        }
    }

    async fn fetch_snapshot(
        &self,
        backup_id: &str,
        category: DataCategory,
    ) -> Result<Option<SealedSnapshot>, RemoteError> {
        let response = self
            .request(Method::GET, &format!("backups/{}/{}", backup_id, category.as_str()))?
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body: SnapshotBody = handle_response(response).await?;
        Ok(Some(SealedSnapshot {
            payload: decode_base64(&body.payload)?,
            hash: body.snapshot_hash,
        }))
    }

    async fn delete_snapshots(&self, backup_id: &str) -> Result<(), RemoteError> {
        let response = self
            .request(Method::DELETE, &format!("backups/{}", backup_id))?
            .send()
            .await?;

        // Already gone counts as deleted
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(handle_error(response).await)
        }
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotBody {
    /// base64 of the gzip payload
    payload: String,
    snapshot_hash: String,
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid remote URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unauthorized - check the remote token")]
    Unauthorized,

    #[error("Access denied")]
    Forbidden,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response from server")]
    InvalidResponse,

    #[error("Invalid snapshot payload: {0}")]
    Codec(#[from] CodecError),
}

/// Handle successful JSON response
async fn handle_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, RemoteError> {
    let status = response.status();

    if status.is_success() {
        response
            .json::<T>()
            .await
            .map_err(|_| RemoteError::InvalidResponse)
    } else {
        Err(handle_error(response).await)
    }
}

/// Convert error response to RemoteError
async fn handle_error(response: reqwest::Response) -> RemoteError {
    let status = response.status();

    match status {
        StatusCode::UNAUTHORIZED => RemoteError::Unauthorized,
        StatusCode::FORBIDDEN => RemoteError::Forbidden,
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimitExceeded,
        s if s.is_server_error() => {
            let msg = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            RemoteError::ServerError(format!("{}: {}", status, msg))
        }
        _ => {
            let msg = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            RemoteError::NetworkError(format!("{}: {}", status, msg))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::seal;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[tokio::test]
    async fn test_invalid_base_url() {
        assert!(matches!(
            HttpRemote::new("not a url", None),
            Err(RemoteError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_missing_record_is_none() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/records/clients")
            .with_status(404)
            .create_async()
            .await;

        let remote = HttpRemote::new(&format!("{}/api", server.url()), None).unwrap();
        let record = remote.fetch_record(DataCategory::Clients).await.unwrap();

        assert!(record.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_record_with_token() {
        let mut server = Server::new_async().await;
        let record = VersionedRecord::new(DataCategory::Invoices, 4, json!([{"id": "INV-9"}]));

        let mock = server
            .mock("GET", "/records/invoices")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(serde_json::to_string(&record).unwrap())
            .create_async()
            .await;

        let remote = HttpRemote::new(&server.url(), Some("secret".to_string())).unwrap();
        let fetched = remote.fetch_record(DataCategory::Invoices).await.unwrap().unwrap();

        assert_eq!(fetched, record);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_push_record_server_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("PUT", "/records/company")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let remote = HttpRemote::new(&server.url(), None).unwrap();
        let record = VersionedRecord::new(DataCategory::Company, 1, json!({"name": "Acme"}));

        let result = remote.push_record(&record).await;
        assert!(matches!(result, Err(RemoteError::ServerError(_))));
    }

    #[tokio::test]
    async fn test_unauthorized_ping() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/health")
            .with_status(401)
            .create_async()
            .await;

        let remote = HttpRemote::new(&server.url(), None).unwrap();
        assert!(matches!(remote.ping().await, Err(RemoteError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_snapshot_upload_and_download() {
        let mut server = Server::new_async().await;
        let snapshot = seal(&json!({"hello": "world"})).unwrap();
        let body = json!({
            "payload": encode_base64(&snapshot.payload),
            "snapshot_hash": snapshot.hash,
        });

        let put = server
            .mock("PUT", "/backups/b1/quotes")
            .match_body(Matcher::Json(body.clone()))
            .with_status(201)
            .create_async()
            .await;
        let get = server
            .mock("GET", "/backups/b1/quotes")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let remote = HttpRemote::new(&server.url(), None).unwrap();
        remote.put_snapshot("b1", DataCategory::Quotes, &snapshot).await.unwrap();
        let fetched = remote.fetch_snapshot("b1", DataCategory::Quotes).await.unwrap().unwrap();

        assert_eq!(fetched, snapshot);
        put.assert_async().await;
        get.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_missing_backup_is_ok() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("DELETE", "/backups/gone")
            .with_status(404)
            .create_async()
            .await;

        let remote = HttpRemote::new(&server.url(), None).unwrap();
        assert!(remote.delete_snapshots("gone").await.is_ok());
    }
}
