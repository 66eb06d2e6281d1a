use crate::config::ScraperConfig;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

pub struct HttpClient {
    inner: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    /// Fetch a URL as text, retrying 429/503 and transport errors.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let mut last_err = anyhow::anyhow!("No attempts made");
        let attempts = self.max_retries.saturating_add(1);

        for attempt in 1..=attempts {
            let last = attempt == attempts;
            debug!("GET {} (attempt {})", url, attempt);

            match self.inner.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.text().await.context("Failed to read response body");
                    } else if status.as_u16() == 429 || status.as_u16() == 503 {
                        last_err = anyhow::anyhow!("HTTP {}", status);
                        if !last {
                            let backoff = self.backoff(2u32.saturating_pow(attempt));
                            warn!(
                                "Throttled ({}) on attempt {}, sleeping {:?}",
                                status, attempt, backoff
                            );
                            sleep(backoff).await;
                        }
                    } else {
                        last_err = anyhow::anyhow!("HTTP error {}", status);
                        break;
                    }
                }
                Err(e) => {
                    warn!("Request failed on attempt {}: {}", attempt, e);
                    last_err = anyhow::anyhow!("Request error: {}", e);
                    if !last {
                        sleep(self.backoff(attempt)).await;
                    }
                }
            }
        }

        Err(last_err).with_context(|| format!("All retries exhausted for {}", url))
    }

    fn backoff(&self, factor: u32) -> Duration {
        self.retry_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves the given raw HTTP responses, one per connection, in order.
    async fn serve(responses: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        format!("http://{}/", addr)
    }

    fn config(max_retries: u32) -> ScraperConfig {
        ScraperConfig {
            max_retries,
            retry_delay_ms: 1,
            timeout_secs: 5,
            ..ScraperConfig::default()
        }
    }

    #[tokio::test]
    async fn test_retries_after_503() {
        let url = serve(vec![
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        ])
        .await;

        let client = HttpClient::new(&config(2)).unwrap();
        assert_eq!(client.get_text(&url).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_final_throttle_returns_without_sleeping() {
        let url = serve(vec![
            "HTTP/1.1 429 Too Many Requests\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ])
        .await;

        let client = HttpClient::new(&ScraperConfig {
            retry_delay_ms: 60_000,
            ..config(0)
        })
        .unwrap();
        let err = tokio::time::timeout(Duration::from_secs(5), client.get_text(&url))
            .await
            .expect("no backoff after the last attempt")
            .unwrap_err();
        assert!(format!("{:#}", err).contains("429"));
    }

    #[test]
    fn test_backoff_saturates() {
        let client = HttpClient::new(&ScraperConfig {
            retry_delay_ms: u64::MAX,
            ..config(u32::MAX)
        })
        .unwrap();
        assert_eq!(client.backoff(2u32.saturating_pow(40)), MAX_BACKOFF);

        let client = HttpClient::new(&config(3)).unwrap();
        assert_eq!(client.backoff(4), Duration::from_millis(4));
    }

    #[tokio::test]
    async fn test_404_is_not_retried() {
        let url = serve(vec![
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ])
        .await;

        let client = HttpClient::new(&config(3)).unwrap();
        let err = client.get_text(&url).await.unwrap_err();
        assert!(format!("{:#}", err).contains("404"));
    }
}
