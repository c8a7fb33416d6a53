//! Streaming HTTP download of source media.
//!
//! One attempt per call; the pipeline wraps this in its retry policy.
//! Content is streamed to disk and hashed as it arrives, so dedup by
//! content hash needs no second pass over the file.

use crate::backend::{DownloadedMedia, MediaFetcher};
use crate::error::PipelineError;
use async_trait::async_trait;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncWriteExt;

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .map_err(|e| PipelineError::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
    ) -> Result<DownloadedMedia, PipelineError> {
        let filename = url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("media.mp3");
        // Strip query strings so "ep.mp3?token=..." lands as "ep.mp3".
        let filename = filename.split('?').next().unwrap_or(filename);
        let file_path = dest_dir.join(filename);
        // Stream into a uniquely-named partial file so concurrent fetches
        // of same-named media never clobber each other mid-download.
        let partial_path = dest_dir.join(format!("{}.part", uuid::Uuid::new_v4()));

        log::info!("Downloading to: {:?}", file_path);

        match self.try_download(url, &partial_path).await {
            Ok(mut media) => {
                tokio::fs::rename(&partial_path, &file_path)
                    .await
                    .map_err(|e| {
                        PipelineError::Other(format!("Failed to move download into place: {}", e))
                    })?;
                media.path = file_path;
                Ok(media)
            }
            Err(e) => {
                // Clean up partial file
                let _ = tokio::fs::remove_file(&partial_path).await;
                Err(e)
            }
        }
    }
}

impl HttpFetcher {
    async fn try_download(
        &self,
        url: &str,
        file_path: &Path,
    ) -> Result<DownloadedMedia, PipelineError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| {
                PipelineError::TransientNetwork(format!("Failed to start download: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(PipelineError::TransientNetwork(format!(
                "Download failed with status: {}",
                response.status()
            )));
        }

        let content_length = response.content_length();
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(&file_path)
            .await
            .map_err(|e| PipelineError::Other(format!("Failed to create file: {}", e)))?;
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| {
                PipelineError::TransientNetwork(format!("Error reading download stream: {}", e))
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|e| PipelineError::Other(format!("Failed to write chunk: {}", e)))?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| PipelineError::Other(format!("Failed to flush file: {}", e)))?;

        // Validate file size against Content-Length
        if let Some(expected) = content_length {
            if downloaded != expected {
                return Err(PipelineError::TransientNetwork(format!(
                    "Download incomplete: got {} bytes, expected {}",
                    downloaded, expected
                )));
            }
        }

        log::info!("Download complete: {} bytes", downloaded);
        Ok(DownloadedMedia {
            path: file_path.to_path_buf(),
            file_size: downloaded as i64,
            content_hash: format!("{:x}", hasher.finalize()),
            // Plain HTTP cannot determine media duration; feed metadata
            // recorded at episode creation supplies it.
            duration: None,
        })
    }
}
