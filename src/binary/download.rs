//! Streaming archive download with a hard deadline.

use crate::error::{Error, Result};
use futures::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Result of a completed download.
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the body.
    pub sha256: String,
}

/// Stream `url` into `dest`, aborting once `timeout` has elapsed in total.
///
/// The caller owns cleanup of `dest` on error; it normally lives inside a
/// temporary directory that is dropped on the failure path.
pub async fn download_to_file(
    client: &Client,
    url: &str,
    dest: &Path,
    timeout: Duration,
) -> Result<Downloaded> {
    match tokio::time::timeout(timeout, stream_body(client, url, dest)).await {
        Ok(result) => result,
        Err(_) => Err(Error::DownloadTimeout {
            url: url.to_string(),
            seconds: timeout.as_secs(),
        }),
    }
}

async fn stream_body(client: &Client, url: &str, dest: &Path) -> Result<Downloaded> {
    tracing::debug!("GET {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Download(format!("{}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::DownloadHttp {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut hasher = Sha256::new();
    let mut bytes = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::Download(format!("{}: {}", url, e)))?;
        hasher.update(&chunk);
        bytes += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    if bytes == 0 {
        return Err(Error::Download(format!("{}: empty response body", url)));
    }

    Ok(Downloaded {
        bytes,
        sha256: hex::encode(hasher.finalize()),
    })
}

/// Fetch a published `.sha256` file and return the first hex token in it.
pub async fn fetch_checksum(client: &Client, url: &str, timeout: Duration) -> Result<String> {
    let fetch = async {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Download(format!("{}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(Error::DownloadHttp {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let body = response.text().await?;
        body.split_whitespace()
            .next()
            .map(|s| s.to_ascii_lowercase())
            .ok_or_else(|| Error::Download(format!("{}: empty checksum file", url)))
    };
    tokio::time::timeout(timeout, fetch)
        .await
        .map_err(|_| Error::DownloadTimeout {
            url: url.to_string(),
            seconds: timeout.as_secs(),
        })?
}
