use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, RETRY_AFTER},
    Client, StatusCode, Url,
};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{validate_circuit_name, ArtifactBytes, ArtifactKind, ArtifactSource};
use crate::{config::PipelineConfig, errors::ConfigError, errors::FetchCause};

/// Bounded exponential backoff for artifact requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CircuitListing {
    circuits: Vec<String>,
}

/// Reads artifacts from an artifact host over HTTP.
///
/// Artifacts live at `{base_url}/circuit/{name}/{wasm|zkey|vkey}`. Transport
/// errors and 5xx/429 answers are retried under the [`RetryPolicy`]; a 404 or any
/// other client error fails immediately.
#[derive(Clone)]
pub struct HttpArtifactSource {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpArtifactSource {
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Self::with_client(client, base_url, retry)
    }

    pub fn with_client(
        client: Client,
        base_url: &str,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let parsed = Url::parse(base_url)
            .map_err(|err| ConfigError::Invalid(format!("base_url `{base_url}`: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "base_url `{base_url}` must use http or https"
            )));
        }
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry attempts must be at least 1".into()));
        }

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        Self::new(
            &config.base_url,
            config.request_timeout(),
            config.retry.policy(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn artifact_url(&self, circuit: &str, kind: ArtifactKind) -> String {
        format!(
            "{}/circuit/{}/{}",
            self.base_url,
            circuit,
            kind.path_segment()
        )
    }

    /// Names of the circuits the host publishes.
    pub async fn list_circuits(&self) -> Result<Vec<String>, FetchCause> {
        let body = self.get_with_retry(&format!("{}/circuits", self.base_url)).await?;
        let listing: CircuitListing = serde_json::from_slice(&body).map_err(|err| {
            FetchCause::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        })?;
        Ok(listing.circuits)
    }

    async fn get_with_retry(&self, url: &str) -> Result<Vec<u8>, FetchCause> {
        let mut attempt = 1;
        loop {
            let (cause, hint) = match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.bytes().await {
                            Ok(body) => {
                                debug!(url, attempt, bytes = body.len(), "artifact request succeeded");
                                return Ok(body.to_vec());
                            }
                            Err(err) => (FetchCause::Transport(err), None),
                        }
                    } else if status == StatusCode::NOT_FOUND {
                        return Err(FetchCause::NotFound);
                    } else {
                        let hint = retry_after(response.headers());
                        let cause = FetchCause::Status(status.as_u16());
                        if !cause.is_transient() {
                            return Err(cause);
                        }
                        (cause, hint)
                    }
                }
                Err(err) => (FetchCause::Transport(err), None),
            };

            if attempt >= self.retry.max_attempts {
                return Err(cause);
            }

            let delay = hint
                .unwrap_or_else(|| self.retry.backoff(attempt))
                .min(self.retry.max_backoff);
            warn!(
                url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %cause,
                "artifact request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifactSource {
    async fn fetch(&self, circuit: &str, kind: ArtifactKind) -> Result<ArtifactBytes, FetchCause> {
        validate_circuit_name(circuit)?;
        let url = self.artifact_url(circuit, kind);
        self.get_with_retry(&url).await.map(ArtifactBytes::Owned)
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn urls_follow_host_layout() {
        let source = HttpArtifactSource::new(
            "http://localhost:8000/zkproof/",
            Duration::from_secs(1),
            RetryPolicy::none(),
        )
        .unwrap();
        assert_eq!(
            source.artifact_url("multiply", ArtifactKind::ProvingKey),
            "http://localhost:8000/zkproof/circuit/multiply/zkey"
        );
        assert_eq!(source.base_url(), "http://localhost:8000/zkproof");
    }

    #[test]
    fn rejects_unusable_base_urls() {
        for url in ["not a url", "ftp://host/artifacts"] {
            assert!(matches!(
                HttpArtifactSource::new(url, Duration::from_secs(1), RetryPolicy::default()),
                Err(ConfigError::Invalid(_))
            ));
        }
    }

    #[test]
    fn parses_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "2".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));
        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after(&headers), None);
    }
}
