//! Forwarding captured media to the upload endpoint.

use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use std::path::PathBuf;
use std::time::Duration;

/// Multipart uploader; one part per file (`file0`, `file1`, ...) plus the
/// `capture_id` the server asked for.
#[derive(Clone, Debug)]
pub struct Uploader {
    client: reqwest::Client,
    url: String,
}

impl Uploader {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, url: url.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST the files and return the response body.
    pub async fn upload(&self, capture_id: &str, files: &[PathBuf]) -> Result<String> {
        let mut form = Form::new().text("capture_id", capture_id.to_string());
        for (index, path) in files.iter().enumerate() {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {path:?}"))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("file{index}"));
            form = form.part(format!("file{index}"), Part::bytes(bytes).file_name(name));
        }

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("Upload to {} failed", self.url))?
            .error_for_status()?;

        Ok(response.text().await?)
    }
}
