use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, ErrorKind, Result};
use crate::package::{DownloadInfo, PackageInfo};
use crate::store::{PackageSource, ProgressMeter, SourceFactory, UserState};

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    // Name of an env var holding a bearer token; never the token itself.
    pub token_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token_env: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpStoreFactory {
    cfg: StoreConfig,
}

impl HttpStoreFactory {
    pub fn new(cfg: StoreConfig) -> Self {
        Self { cfg }
    }
}

impl SourceFactory for HttpStoreFactory {
    fn open(&self, store_id: &str, architecture: &str) -> Result<Box<dyn PackageSource + '_>> {
        Ok(Box::new(HttpStore::new(&self.cfg, store_id, architecture)?))
    }
}

pub struct HttpStore {
    base_url: String,
    store_id: String,
    architecture: String,
    token: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpStore {
    pub fn new(cfg: &StoreConfig, store_id: &str, architecture: &str) -> Result<Self> {
        let base_url = cfg.url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::new(ErrorKind::Config, "store url is not configured"));
        }
        let token = cfg
            .token_env
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .and_then(|k| std::env::var(k).ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .user_agent(concat!("bootseed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::msg(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url,
            store_id: store_id.to_string(),
            architecture: architecture.to_string(),
            token,
            client,
        })
    }

    fn request(&self, url: &str, user: Option<&UserState>) -> reqwest::blocking::RequestBuilder {
        let mut req = self.client.get(url);
        if !self.store_id.is_empty() {
            req = req.header("Package-Store", self.store_id.as_str());
        }
        if !self.architecture.is_empty() {
            req = req.header("Package-Architecture", self.architecture.as_str());
        }
        let token = user
            .map(|u| u.token.as_str())
            .filter(|t| !t.is_empty())
            .or(self.token.as_deref());
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        req
    }
}

impl PackageSource for HttpStore {
    fn resolve(
        &self,
        name: &str,
        channel: &str,
        devmode: bool,
        user: Option<&UserState>,
    ) -> Result<PackageInfo> {
        let mut url = format!(
            "{}/v1/packages/{}?channel={}",
            self.base_url,
            encode_component(name),
            encode_component(channel)
        );
        if !self.architecture.is_empty() {
            url.push_str(&format!(
                "&architecture={}",
                encode_component(&self.architecture)
            ));
        }
        if devmode {
            url.push_str("&confinement=devmode");
        }

        let res = self.request(&url, user).send().map_err(|e| {
            Error::new(ErrorKind::Download, format!("store query failed: {e}"))
        })?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("no package '{name}' in channel '{channel}'"),
            ));
        }
        if !res.status().is_success() {
            return Err(Error::new(
                ErrorKind::Download,
                format!("store query failed with status {}", res.status()),
            ));
        }
        let mut info: PackageInfo = res.json().map_err(|e| {
            Error::new(ErrorKind::Decode, format!("invalid store response: {e}"))
        })?;
        info.check_name()
            .map_err(|e| e.context(format!("store response for '{name}'")))?;
        if info.download.as_ref().is_none_or(|d| d.url.trim().is_empty()) {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("store returned no download for '{name}'"),
            ));
        }
        if info.channel.is_empty() {
            info.channel = channel.to_string();
        }
        Ok(info)
    }

    fn download(
        &self,
        name: &str,
        download: &DownloadInfo,
        progress: &mut dyn ProgressMeter,
        user: Option<&UserState>,
    ) -> Result<PathBuf> {
        let dl_err = |msg: String| Error::new(ErrorKind::Download, msg);

        let mut res = self
            .request(&download.url, user)
            .send()
            .map_err(|e| dl_err(format!("HTTP download failed: {e}")))?;
        if !res.status().is_success() {
            return Err(dl_err(format!(
                "HTTP download failed with status {}",
                res.status()
            )));
        }

        // Removed on drop unless persisted below.
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!("{name}-"))
            .suffix(".partial")
            .tempfile()
            .map_err(|e| dl_err(format!("cannot create temp file: {e}")))?;

        let total = res.content_length().unwrap_or(download.size);
        progress.start(name, total);
        let sum = copy_hashed(&mut res, tmp.as_file_mut(), progress)
            .map_err(|e| dl_err(format!("HTTP body read failed: {e}")))?;
        progress.finished();

        let want = download.sha256.trim();
        if !want.is_empty() && !want.eq_ignore_ascii_case(&sum) {
            return Err(dl_err(format!(
                "sha256 mismatch (expected {want}, got {sum})"
            )));
        }

        tmp.into_temp_path()
            .keep()
            .map_err(|e| dl_err(format!("cannot keep downloaded file: {e}")))
    }
}

fn copy_hashed(
    src: &mut dyn Read,
    dst: &mut File,
    progress: &mut dyn ProgressMeter,
) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut written = 0u64;
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        dst.write_all(&buf[..n])?;
        written += n as u64;
        progress.set(written);
    }
    dst.flush()?;
    Ok(hex::encode(hasher.finalize()))
}

fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}
