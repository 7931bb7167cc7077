use thiserror::Error;
use tracing::warn;

use crate::config::NetworkSettings;
use crate::http_client::{self, RetryConfig};

/// Bytes of a fetched image plus the server's declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Errors raised while fetching a remote image.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("Failed to read body of {url}: {source}")]
    Body {
        url: String,
        source: std::io::Error,
    },
}

impl FetchError {
    /// Transport errors, 5xx and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Transport { .. } => true,
            FetchError::Body { .. } => false,
        }
    }
}

/// Source of image bytes for tokens that did not resolve locally.
pub trait RemoteSource {
    fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError>;
}

/// `ureq`-backed source with bounded bodies and retry with backoff.
pub struct HttpRemoteSource {
    agent: ureq::Agent,
    retry: RetryConfig,
    max_bytes: usize,
}

impl HttpRemoteSource {
    pub fn new(settings: &NetworkSettings) -> Self {
        Self {
            agent: http_client::agent_with(settings),
            retry: RetryConfig::from_settings(settings),
            max_bytes: settings.max_bytes,
        }
    }

    fn fetch_once(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let response = match self.agent.get(url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status,
                });
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(FetchError::Transport {
                    url: url.to_string(),
                    message: transport.to_string(),
                });
            }
        };
        let content_type = response
            .header("Content-Type")
            .map(str::to_string)
            .filter(|value| !value.trim().is_empty());
        let bytes = http_client::read_response_bytes(response, self.max_bytes).map_err(
            |source| FetchError::Body {
                url: url.to_string(),
                source,
            },
        )?;
        Ok(FetchedImage {
            bytes,
            content_type,
        })
    }
}

impl RemoteSource for HttpRemoteSource {
    fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        http_client::retry_with_backoff(
            self.retry,
            || self.fetch_once(url),
            |err: &FetchError| {
                let retry = err.is_retryable();
                if retry {
                    warn!(url, error = %err, "Remote fetch failed; retrying");
                }
                retry
            },
        )
    }
}
