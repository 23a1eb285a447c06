use std::time::Duration;

use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{ArtifactError, ArtifactSource};

const AGENT: &str = concat!("pvo-ota/", env!("CARGO_PKG_VERSION"));
const MANIFEST_TIMEOUT: Duration = Duration::from_secs(30);
const FIRMWARE_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Deserialize)]
struct ReleaseEntry {
    tag_name: String,
    #[serde(default)]
    draft: bool,
}

/// Release-asset source over HTTP(S).
///
/// Redirects (asset CDN hops) are followed by reqwest's default policy.
#[derive(Debug, Clone)]
pub struct HttpArtifactSource {
    http: reqwest::Client,
    download_base_url: String,
    api_base_url: String,
    owner: String,
    repo: String,
}

impl HttpArtifactSource {
    pub fn new(
        download_base_url: impl Into<String>,
        api_base_url: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            download_base_url: download_base_url.into(),
            api_base_url: api_base_url.into(),
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    fn asset_url(&self, version: &str, file: &str) -> String {
        format!(
            "{}/{}/{}/releases/download/v{}/{}",
            self.download_base_url.trim_end_matches('/'),
            self.owner,
            self.repo,
            version.trim_start_matches('v'),
            file
        )
    }

    fn releases_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases",
            self.api_base_url.trim_end_matches('/'),
            self.owner,
            self.repo
        )
    }

    async fn get_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, ArtifactError> {
        debug!(url = %url, "artifact request");
        let resp = self
            .http
            .get(url)
            .header(USER_AGENT, AGENT)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ArtifactError::Fetch(format!("network error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ArtifactError::Fetch(format!("{url}: http status {}", status.as_u16())));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| ArtifactError::Fetch(format!("{url}: body read failed: {e}")))?;
        Ok(body.to_vec())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ArtifactError> {
        let resp = self
            .http
            .get(url)
            .header(USER_AGENT, AGENT)
            .header(ACCEPT, "application/vnd.github+json")
            .timeout(MANIFEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| ArtifactError::Fetch(format!("network error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ArtifactError::Fetch(format!(
                "release lookup failed: http status {}",
                status.as_u16()
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ArtifactError::Fetch(format!("release lookup json decode failed: {e}")))
    }
}

#[async_trait::async_trait]
impl ArtifactSource for HttpArtifactSource {
    fn source_name(&self) -> &'static str {
        "http_releases"
    }

    /// `stable` reads the latest full release. `beta` and `dev` take the
    /// newest non-draft release, pre-releases included.
    async fn latest_version(&self, channel: &str, hw_family: &str) -> Result<String, ArtifactError> {
        let tag = if channel == "stable" {
            let url = format!("{}/latest", self.releases_url());
            self.get_json::<ReleaseEntry>(&url).await?.tag_name
        } else {
            let url = format!("{}?per_page=20", self.releases_url());
            let entries: Vec<ReleaseEntry> = self.get_json(&url).await?;
            entries
                .into_iter()
                .find(|r| !r.draft)
                .map(|r| r.tag_name)
                .ok_or_else(|| ArtifactError::Fetch(format!("no releases on channel '{channel}'")))?
        };

        let version = tag.trim_start_matches('v').to_string();
        info!(channel = %channel, hw_family = %hw_family, version = %version, "latest firmware version resolved");
        Ok(version)
    }

    async fn fetch_manifest(&self, version: &str) -> Result<Vec<u8>, ArtifactError> {
        self.get_bytes(&self.asset_url(version, "manifest.json"), MANIFEST_TIMEOUT)
            .await
    }

    async fn fetch_firmware(&self, version: &str) -> Result<Vec<u8>, ArtifactError> {
        let bytes = self
            .get_bytes(&self.asset_url(version, "firmware.bin"), FIRMWARE_TIMEOUT)
            .await?;
        info!(version = %version, bytes = bytes.len(), "firmware downloaded");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_url_uses_release_download_layout() {
        let src = HttpArtifactSource::new("https://example.test/", "https://api.example.test", "acme", "fw");
        assert_eq!(
            src.asset_url("v1.0.4", "firmware.bin"),
            "https://example.test/acme/fw/releases/download/v1.0.4/firmware.bin"
        );
        assert_eq!(src.releases_url(), "https://api.example.test/repos/acme/fw/releases");
    }
}
