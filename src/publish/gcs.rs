use anyhow::{Context, Result};
use async_trait::async_trait;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::ObjectStore;

const DEFAULT_BASE_URL: &str = "https://storage.googleapis.com";
const TSV_CONTENT_TYPE: &str = "text/tab-separated-values";
const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

/// How requests to Cloud Storage are authorised
pub enum GcsAuth {
    /// Pre-issued OAuth token, sent as is
    Bearer(String),
    /// Tokens minted from a service account key and refreshed before they expire
    ServiceAccount(CustomServiceAccount),
}

impl GcsAuth {
    pub fn service_account(key_json: &str) -> Result<Self> {
        let account = CustomServiceAccount::from_json(key_json)
            .context("Failed to load Cloud Storage service account key")?;
        Ok(Self::ServiceAccount(account))
    }

    async fn bearer_token(&self) -> Result<String> {
        match self {
            GcsAuth::Bearer(token) => Ok(token.clone()),
            GcsAuth::ServiceAccount(account) => {
                let token = account
                    .token(&[STORAGE_SCOPE])
                    .await
                    .context("Failed to obtain Cloud Storage access token")?;
                Ok(token.as_str().to_string())
            }
        }
    }
}

/// Google Cloud Storage bucket accessed through the JSON API
pub struct GcsObjectStore {
    client: Client,
    bucket: String,
    auth: GcsAuth,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ObjectResource {
    name: String,
    #[serde(default)]
    size: Option<String>,
}

impl GcsObjectStore {
    pub fn new(bucket: impl Into<String>, auth: GcsAuth) -> Self {
        Self {
            client: Client::new(),
            bucket: bucket.into(),
            auth,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the client at another endpoint (emulators, tests)
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/storage/v1/b/{}/o", self.base_url, self.bucket)
    }

    fn bucket_url(&self) -> String {
        format!("{}/storage/v1/b/{}", self.base_url, self.bucket)
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    #[instrument(skip(self, bytes), fields(bucket = %self.bucket, size = bytes.len()))]
    async fn put_object(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
        let token = self.auth.bearer_token().await?;
        let response = self
            .client
            .post(self.upload_url())
            .query(&[("uploadType", "media"), ("name", name)])
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, TSV_CONTENT_TYPE)
            .body(bytes)
            .send()
            .await
            .context("Failed to send upload request to Cloud Storage")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Cloud Storage upload error ({}): {}", status, error_text);
        }

        let object: ObjectResource = response
            .json()
            .await
            .context("Failed to parse Cloud Storage upload response")?;

        debug!(object = %object.name, size = ?object.size, "Object uploaded");

        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        let token = self.auth.bearer_token().await?;
        let response = self
            .client
            .get(self.bucket_url())
            .bearer_auth(&token)
            .send()
            .await
            .context("Failed to reach Cloud Storage")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Cloud Storage bucket {} not accessible ({}): {}", self.bucket, status, error_text);
        }

        Ok(())
    }

    fn describe(&self) -> String {
        format!("gs://{}", self.bucket)
    }
}
