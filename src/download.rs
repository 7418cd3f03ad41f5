use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use reqwest::{Client, StatusCode};

use crate::error::UploadError;

/// Fetches images from remote URLs.
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }

    /// Starts downloading the given URL, returning the body as a stream.
    ///
    /// Anything other than a `200` or a response that declares an empty
    /// body is rejected before any of the body is read. The configured
    /// timeout covers the whole transfer, including reading the stream.
    pub async fn fetch(
        &self,
        url: &str,
    ) -> Result<impl Stream<Item = reqwest::Result<Bytes>>, UploadError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| UploadError::Download(format!("request to {} failed: {}", url, e)))?;

        if resp.status() != StatusCode::OK {
            return Err(UploadError::Download(format!(
                "{} responded with status {}",
                url,
                resp.status(),
            )));
        }

        if resp.content_length() == Some(0) {
            return Err(UploadError::Download(format!("{} returned an empty body", url)));
        }

        Ok(resp.bytes_stream())
    }
}
