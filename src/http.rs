//! Blocking HTTP helpers shared by version discovery, checksum lookup and the
//! `download` action.
//!
//! Requests run on a worker thread that streams the body back in chunks. The
//! calling thread waits on that stream and polls its [`CancelToken`], so a
//! cancelled call returns promptly even while the request is stalled. The
//! per-request timeout is capped by the token's remaining deadline.
//!
//! ## GitHub Authentication
//!
//! Set `GITHUB_TOKEN` to send a bearer token with GitHub API requests.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;
use crate::cancel::{CancelToken, POLL_INTERVAL};
use crate::error::{Error, Result};

pub const USER_AGENT: &str = concat!("sth/", env!("CARGO_PKG_VERSION"));
pub const GITHUB_API: &str = "https://api.github.com";
/// Timeout for metadata requests (versions, checksums, indexes).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout for artifact downloads.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

const CHUNK_SIZE: usize = 64 * 1024;
/// Chunks buffered between the worker and the caller.
const CHANNEL_DEPTH: usize = 8;

/// What the request worker hands back to the caller.
enum Chunk {
    Data(Vec<u8>),
    Done,
    Failed(Error),
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    github_api: String,
    github_token: Option<String>,
}

impl HttpClient {
    /// Builds a client that identifies itself as `sth/<version>` and picks up
    /// `GITHUB_TOKEN` from the environment.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::network("<client>", e))?;
        let github_token = std::env::var("GITHUB_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Ok(Self {
            client,
            github_api: GITHUB_API.to_string(),
            github_token,
        })
    }

    pub fn with_github_api(mut self, base: impl Into<String>) -> Self {
        self.github_api = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_github_token(mut self, token: Option<String>) -> Self {
        self.github_token = token;
        self
    }

    /// Sends `request` and copies its body into `sink`, returning the byte
    /// count. Fails with [`Error::Cancelled`] as soon as `cancel` fires.
    fn fetch<W: Write>(
        &self,
        request: RequestBuilder,
        url: &str,
        timeout: Duration,
        cancel: &CancelToken,
        sink: &mut W,
    ) -> Result<u64> {
        cancel.check()?;
        debug!(%url, "GET");
        let request = request.timeout(cancel.bound(timeout));
        let (tx, rx) = bounded(CHANNEL_DEPTH);
        let worker_url = url.to_string();
        let worker_cancel = cancel.clone();
        thread::Builder::new()
            .name("sth-http".into())
            .spawn(move || stream_response(request, &worker_url, &worker_cancel, &tx))
            .map_err(|e| Error::network(url, format!("spawn worker: {e}")))?;

        let mut total = 0u64;
        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Chunk::Data(bytes)) => {
                    cancel.check()?;
                    sink.write_all(&bytes)?;
                    total += bytes.len() as u64;
                }
                Ok(Chunk::Done) => return Ok(total),
                Ok(Chunk::Failed(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => cancel.check()?,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::network(url, "request worker exited"));
                }
            }
        }
    }

    /// Fetches `url` and returns the whole body.
    pub fn get_bytes(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        self.fetch(self.client.get(url), url, REQUEST_TIMEOUT, cancel, &mut body)?;
        Ok(body)
    }

    pub fn get_text(&self, url: &str, cancel: &CancelToken) -> Result<String> {
        let body = self.get_bytes(url, cancel)?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub fn get_json<T: DeserializeOwned>(&self, url: &str, cancel: &CancelToken) -> Result<T> {
        let body = self.get_bytes(url, cancel)?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::network(url, format!("decode: {e}")))
    }

    /// GETs `path` (e.g. `/repos/o/n/tags?per_page=100`) from the GitHub API.
    pub fn github_json<T: DeserializeOwned>(&self, path: &str, cancel: &CancelToken) -> Result<T> {
        let url = format!("{}{}", self.github_api, path);
        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.github_token {
            request = request.bearer_auth(token);
        }
        let mut body = Vec::new();
        self.fetch(request, &url, REQUEST_TIMEOUT, cancel, &mut body)?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::network(&url, format!("decode: {e}")))
    }

    /// Downloads `url` to `dest` through a `.part` sibling that is renamed
    /// into place on success and removed on failure.
    pub fn download(&self, url: &str, dest: &Path, cancel: &CancelToken) -> Result<u64> {
        if url.trim().is_empty() {
            return Err(Error::Config("download: empty url".into()));
        }
        let part = part_path(dest);
        let result = self
            .download_to(url, &part, cancel)
            .and_then(|written| {
                std::fs::rename(&part, dest)
                    .map_err(|e| Error::fs("rename", dest, e))
                    .map(|_| written)
            });
        if result.is_err() {
            let _ = std::fs::remove_file(&part);
        }
        result
    }

    fn download_to(&self, url: &str, part: &Path, cancel: &CancelToken) -> Result<u64> {
        if let Some(parent) = part.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::fs("mkdir", parent, e))?;
        }
        let mut file = File::create(part).map_err(|e| Error::fs("create", part, e))?;
        let written = self.fetch(self.client.get(url), url, DOWNLOAD_TIMEOUT, cancel, &mut file)?;
        file.sync_all().map_err(|e| Error::fs("sync", part, e))?;
        debug!(%url, bytes = written, "downloaded");
        Ok(written)
    }
}

/// `<dest>.part`
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn stream_response(request: RequestBuilder, url: &str, cancel: &CancelToken, tx: &Sender<Chunk>) {
    let last = match read_response(request, url, cancel, tx) {
        Ok(()) => Chunk::Done,
        Err(e) => Chunk::Failed(e),
    };
    // The caller may already have given up.
    let _ = tx.send(last);
}

fn read_response(
    request: RequestBuilder,
    url: &str,
    cancel: &CancelToken,
    tx: &Sender<Chunk>,
) -> Result<()> {
    let network_err = |e: &dyn std::fmt::Display| {
        if cancel.is_cancelled() {
            Error::Cancelled
        } else {
            Error::network(url, e)
        }
    };
    let mut response = request.send().map_err(|e| network_err(&e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::network(url, format!("status {status}")));
    }
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        cancel.check()?;
        let n = response
            .read(&mut buf)
            .map_err(|e| network_err(&format!("read: {e}")))?;
        if n == 0 {
            return Ok(());
        }
        if tx.send(Chunk::Data(buf[..n].to_vec())).is_err() {
            return Ok(());
        }
    }
}
