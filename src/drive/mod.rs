//! Minimal Google Drive v3 client used for document storage.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::config::DriveSettings;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
// Refresh slightly before Google's one hour expiry.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Metadata returned after a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub web_view_link: String,
}

/// Storage operations the document pipeline depends on.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// Folder every provisioned hierarchy hangs off.
    fn root_folder_id(&self) -> &str;

    /// Exact-name, non-trashed folder lookup scoped to `parent_id`.
    async fn find_folder(&self, name: &str, parent_id: &str) -> Result<Option<String>>;

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String>;

    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        mime_type: &str,
        parent_id: &str,
    ) -> Result<StoredFile>;
}

#[derive(Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileId>,
}

#[derive(Deserialize)]
struct FileId {
    id: String,
}

/// Service-account authenticated Drive client.
#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    root_folder_id: String,
    key: Arc<ServiceAccountKey>,
    encoding_key: Arc<EncodingKey>,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl DriveClient {
    /// Build a client from the service-account JSON in the settings.
    pub fn from_settings(settings: &DriveSettings) -> Result<Self> {
        let key: ServiceAccountKey = serde_json::from_str(&settings.credentials_json)
            .context("GOOGLE_CREDENTIALS is not a valid service account JSON document")?;
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("service account private key is not a valid RSA PEM")?;

        Ok(Self {
            http: Client::new(),
            root_folder_id: settings.root_folder_id.clone(),
            key: Arc::new(key),
            encoding_key: Arc::new(encoding_key),
            token: Arc::new(Mutex::new(None)),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Utc::now() {
                return Ok(cached.value.clone());
            }
        }

        let token_uri = self.key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let now = Utc::now();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: DRIVE_SCOPE,
            aud: token_uri,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .context("failed to sign service account assertion")?;

        let response = self
            .http
            .post(token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .context("failed to reach Google token endpoint")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read token response body")?;
        if !status.is_success() {
            bail!("token exchange failed with status {}: {}", status, preview(&body));
        }

        let token: TokenResponse =
            serde_json::from_str(&body).context("failed to parse token response")?;
        let expires_at =
            Utc::now() + Duration::seconds(token.expires_in - TOKEN_REFRESH_MARGIN_SECS);
        *guard = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at,
        });

        debug!("refreshed Google Drive access token");
        Ok(token.access_token)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        action: &str,
    ) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read response body while trying to {action}"))?;
        if !status.is_success() {
            bail!("failed to {action}: status {}: {}", status, preview(&body));
        }
        serde_json::from_str(&body)
            .with_context(|| format!("failed to {action}: unexpected response {}", preview(&body)))
    }
}

#[async_trait]
impl DriveApi for DriveClient {
    fn root_folder_id(&self) -> &str {
        &self.root_folder_id
    }

    async fn find_folder(&self, name: &str, parent_id: &str) -> Result<Option<String>> {
        let token = self.access_token().await?;
        let query = folder_query(name, parent_id);

        let response = self
            .http
            .get(FILES_URL)
            .bearer_auth(token)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id, name)"),
                ("spaces", "drive"),
            ])
            .send()
            .await
            .context("failed to find folder")?;

        let list: FileList = Self::read_json(response, "find folder").await?;
        Ok(list.files.into_iter().next().map(|file| file.id))
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String> {
        let token = self.access_token().await?;
        let metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });

        let response = self
            .http
            .post(FILES_URL)
            .bearer_auth(token)
            .query(&[("fields", "id")])
            .json(&metadata)
            .send()
            .await
            .context("failed to create folder")?;

        let created: FileId = Self::read_json(response, "create folder").await?;
        Ok(created.id)
    }

    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        mime_type: &str,
        parent_id: &str,
    ) -> Result<StoredFile> {
        let token = self.access_token().await?;
        let metadata = serde_json::json!({
            "name": file_name,
            "parents": [parent_id],
        });
        let boundary = format!("interntrack-{}", Uuid::new_v4().simple());
        let body = multipart_related_body(&boundary, &metadata, mime_type, &bytes);

        let response = self
            .http
            .post(UPLOAD_URL)
            .bearer_auth(token)
            .query(&[
                ("uploadType", "multipart"),
                ("fields", "id, name, webViewLink"),
            ])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await
            .context("failed to upload file")?;

        let stored: StoredFile = Self::read_json(response, "upload file").await?;
        if stored.id.is_empty() {
            return Err(anyhow!("upload response did not include a file id"));
        }
        Ok(stored)
    }
}

/// Drive `q` expression for an exact-name, non-trashed folder under `parent_id`.
pub fn folder_query(name: &str, parent_id: &str) -> String {
    format!(
        "mimeType='{FOLDER_MIME_TYPE}' and name='{}' and '{}' in parents and trashed=false",
        escape_query_value(name),
        escape_query_value(parent_id),
    )
}

fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn multipart_related_body(
    boundary: &str,
    metadata: &serde_json::Value,
    mime_type: &str,
    bytes: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn preview(body: &str) -> String {
    if body.chars().count() > 500 {
        let truncated: String = body.chars().take(500).collect();
        format!("{truncated}...")
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_query_is_scoped_and_excludes_trash() {
        let query = folder_query("2022", "root-id");
        assert_eq!(
            query,
            "mimeType='application/vnd.google-apps.folder' and name='2022' and 'root-id' in parents and trashed=false"
        );
    }

    #[test]
    fn folder_query_escapes_quotes() {
        let query = folder_query("3122225001001_D'Souza", "p");
        assert!(query.contains(r"name='3122225001001_D\'Souza'"));
    }

    #[test]
    fn multipart_body_wraps_metadata_and_media() {
        let metadata = serde_json::json!({ "name": "offerLetter_1.pdf" });
        let body = multipart_related_body("b", &metadata, "application/pdf", b"%PDF-1.4");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--b\r\nContent-Type: application/json"));
        assert!(text.contains(r#"{"name":"offerLetter_1.pdf"}"#));
        assert!(text.contains("Content-Type: application/pdf\r\n\r\n%PDF-1.4"));
        assert!(text.ends_with("\r\n--b--\r\n"));
    }

    #[test]
    fn stored_file_parses_drive_payload() {
        let stored: StoredFile = serde_json::from_str(
            r#"{"id":"abc","name":"offerLetter_3122225001001.pdf","webViewLink":"https://drive.google.com/file/d/abc/view"}"#,
        )
        .unwrap();
        assert_eq!(stored.id, "abc");
        assert_eq!(stored.web_view_link, "https://drive.google.com/file/d/abc/view");
    }

    #[test]
    fn invalid_credentials_are_rejected() {
        let settings = DriveSettings {
            root_folder_id: "root".into(),
            credentials_json: "{not json".into(),
        };
        assert!(DriveClient::from_settings(&settings).is_err());
    }
}
