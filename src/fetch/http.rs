//! reqwest-based fetcher

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::traits::{FetchOutcome, MediaFetcher, ProgressReporter};
use super::validate_reference;
use crate::config::DownloadConfig;
use crate::error::{Error, FetchError, Result};
use crate::types::MediaReference;

/// Largest buffer reserved up front from a response's Content-Length
const MAX_PREALLOCATION: u64 = 8 * 1024 * 1024;

/// Fetches media over HTTP(S) with a shared connection pool
///
/// The configured request timeout covers the whole exchange, headers and body.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Build a fetcher from the download configuration
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            client,
            timeout: config.request_timeout,
        })
    }

    /// Wrap an existing client
    ///
    /// `timeout` is only used for error messages; the client's own timeout applies.
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn classify(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                after: self.timeout,
            }
        } else if let Some(status) = error.status() {
            FetchError::from_status(status.as_u16())
        } else {
            FetchError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(
        &self,
        reference: &MediaReference,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> std::result::Result<FetchOutcome, FetchError> {
        let url = validate_reference(reference)?;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(FetchOutcome::Aborted),
            response = self.client.get(url).send() => response.map_err(|e| self.classify(e))?,
        };

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(
                media_id = %reference.id,
                status = status.as_u16(),
                "media request rejected"
            );
            return Err(FetchError::from_status(status.as_u16()));
        }

        let total = response.content_length().filter(|len| *len > 0);
        // Content-Length is server-controlled; only trust it up to a point
        let mut buffer = match total {
            Some(len) => BytesMut::with_capacity(len.min(MAX_PREALLOCATION) as usize),
            None => BytesMut::new(),
        };
        progress.report(0, total);

        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(FetchOutcome::Aborted),
                chunk = stream.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    progress.report(buffer.len() as u64, total);
                }
                Some(Err(e)) => return Err(self.classify(e)),
                None => break,
            }
        }

        Ok(FetchOutcome::Completed(buffer.freeze()))
    }
}
