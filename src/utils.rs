use std::path::Path;

use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use tracing::info;

use crate::config::Config;

async fn download_file(url: &str, path: &Path, token: Option<&str>) -> Result<()> {
    info!(url, path = %path.display(), "downloading artifact");

    let mut header_map = HeaderMap::new();
    if let Some(token) = token {
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .context("ARTIFACT_TOKEN is not a valid header value")?;
        header_map.insert(AUTHORIZATION, auth_value);
    }
    header_map.insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));

    let client = reqwest::Client::new();
    let response = client
        .get(url)
        .headers(header_map)
        .send()
        .await
        .with_context(|| format!("failed to send request to {url}"))?;

    if !response.status().is_success() {
        bail!("failed to download {}: {}", url, response.status());
    }

    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("failed to read body from {url}"))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Makes sure `path` exists, fetching it from `url` when it does not.
pub async fn ensure_file_exists(path: &Path, url: Option<&str>, token: Option<&str>) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    match url {
        Some(url) => download_file(url, path, token).await,
        None => bail!("{} does not exist and no download URL is configured", path.display()),
    }
}

pub async fn ensure_files_exist(config: &Config) -> Result<()> {
    info!("checking model artifacts");
    let token = config.artifact_token.as_deref();
    ensure_file_exists(&config.model_path, config.model_url.as_deref(), token)
        .await
        .context("model file unavailable (set MODEL_PATH or MODEL_URL)")?;
    ensure_file_exists(&config.class_list_path, config.class_list_url.as_deref(), token)
        .await
        .context("class list unavailable (set CLASS_LIST_PATH or CLASS_LIST_URL)")?;
    Ok(())
}
