//! Storage integration for the CLI: bridges the core [`Filer`] abstraction
//! to the real object-store gateway over HTTP.
//!
//! - Construct [`HttpFiler`] from environment variables
//!   (`ARTIFACT_STORE_URL`, `ARTIFACT_STORE_TOKEN`).
//! - Objects live at `<base_url>/<key>`; PUT stores, GET fetches, DELETE
//!   removes, and `GET <base_url>/?prefix=..&pattern=..` returns a JSON
//!   array of matching keys.
//! - A 404 maps onto [`FilerError::NotFound`], which the core relies on.

use std::env;
use std::path::Path;

use async_trait::async_trait;
use nightly_tarball_core::contract::{Filer, FilerError};
use reqwest::StatusCode;

pub struct HttpFiler {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpFiler {
    pub fn new_from_env() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        dotenvy::dotenv().ok(); // loads environment variables from .env if present
        match (
            env::var("ARTIFACT_STORE_URL"),
            env::var("ARTIFACT_STORE_TOKEN"),
        ) {
            (Ok(base_url), Ok(token)) => {
                tracing::info!(
                    base_url = %base_url,
                    token_set = !token.is_empty(),
                    "Initialized HttpFiler from environment"
                );
                Ok(HttpFiler {
                    client: reqwest::Client::new(),
                    base_url: base_url.trim_end_matches('/').to_string(),
                    token,
                })
            }
            (Err(e), _) => {
                tracing::error!(error = ?e, "ARTIFACT_STORE_URL missing in environment");
                Err(Box::new(e))
            }
            (_, Err(e)) => {
                tracing::error!(error = ?e, "ARTIFACT_STORE_TOKEN missing in environment");
                Err(Box::new(e))
            }
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    fn backend_err(context: &str, e: reqwest::Error) -> FilerError {
        FilerError::Backend(format!("{context}: {e}"))
    }
}

#[async_trait]
impl Filer for HttpFiler {
    async fn download(&self, key: &str) -> Result<Vec<u8>, FilerError> {
        tracing::debug!(key, "downloading object");
        let response = self
            .client
            .get(self.object_url(key))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Self::backend_err("GET", e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FilerError::NotFound(key.to_string()));
        }
        let response = response
            .error_for_status()
            .map_err(|e| Self::backend_err("GET", e))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::backend_err("GET body", e))?;
        Ok(bytes.to_vec())
    }

    async fn upload<'a>(
        &self,
        key: &str,
        data: &[u8],
        cache_control: Option<&'a str>,
    ) -> Result<(), FilerError> {
        tracing::debug!(key, size = data.len(), "uploading object");
        let mut request = self
            .client
            .put(self.object_url(key))
            .bearer_auth(&self.token)
            .body(data.to_vec());
        if let Some(hint) = cache_control {
            request = request.header(reqwest::header::CACHE_CONTROL, hint);
        }
        request
            .send()
            .await
            .map_err(|e| Self::backend_err("PUT", e))?
            .error_for_status()
            .map_err(|e| Self::backend_err("PUT", e))?;
        Ok(())
    }

    async fn upload_file(&self, local: &Path, key: &str) -> Result<(), FilerError> {
        let data = tokio::fs::read(local).await?;
        self.upload(key, &data, None).await
    }

    async fn delete(&self, key: &str) -> Result<(), FilerError> {
        tracing::debug!(key, "deleting object");
        let response = self
            .client
            .delete(self.object_url(key))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Self::backend_err("DELETE", e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FilerError::NotFound(key.to_string()));
        }
        response
            .error_for_status()
            .map_err(|e| Self::backend_err("DELETE", e))?;
        Ok(())
    }

    async fn search(&self, dirname: &str, pattern: &str) -> Result<Vec<String>, FilerError> {
        tracing::debug!(dirname, pattern, "searching objects");
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&[("prefix", dirname), ("pattern", pattern)])
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Self::backend_err("LIST", e))?
            .error_for_status()
            .map_err(|e| Self::backend_err("LIST", e))?;
        let keys: Vec<String> = response
            .json()
            .await
            .map_err(|e| Self::backend_err("LIST body", e))?;
        Ok(keys)
    }
}
