//! Background self-probe.
//!
//! Periodically requests the service's own `/ping` through its public URL
//! so hosting platforms that idle quiet instances keep it warm. Probe
//! failures are logged and never stop the loop.

use reqwest::Client;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    BadStatus(u16),
    Failed(String),
}

pub struct HealthProber {
    client: Client,
    url: String,
    interval: Duration,
}

impl HealthProber {
    pub fn new(url: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            url: url.into(),
            interval,
        }
    }

    pub async fn probe_once(&self) -> ProbeOutcome {
        match self.client.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(url = %self.url, "Ping successful");
                ProbeOutcome::Healthy
            }
            Ok(response) => {
                let status = response.status().as_u16();
                tracing::error!(url = %self.url, status, "Ping failed with status code");
                ProbeOutcome::BadStatus(status)
            }
            Err(e) => {
                tracing::error!(url = %self.url, error = %e, "Ping failed");
                ProbeOutcome::Failed(e.to_string())
            }
        }
    }

    /// Probe every interval, first probe one interval after start, until
    /// `token` is cancelled.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                url = %self.url,
                interval_secs = self.interval.as_secs(),
                "Health prober started"
            );
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let _ = self.probe_once().await;
                    }
                }
            }
            tracing::info!("Health prober stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prober(server: &MockServer, interval: Duration) -> HealthProber {
        HealthProber::new(
            format!("{}/ping", server.uri()),
            interval,
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn test_probe_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let outcome = prober(&server, Duration::from_secs(600)).probe_once().await;
        assert_eq!(outcome, ProbeOutcome::Healthy);
    }

    #[tokio::test]
    async fn test_probe_bad_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let outcome = prober(&server, Duration::from_secs(600)).probe_once().await;
        assert_eq!(outcome, ProbeOutcome::BadStatus(503));
    }

    #[tokio::test]
    async fn test_probe_transport_failure() {
        let prober = HealthProber::new(
            "http://127.0.0.1:1/ping",
            Duration::from_secs(600),
            Duration::from_millis(500),
        );
        assert!(matches!(prober.probe_once().await, ProbeOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_loop_survives_failures_and_stops_on_cancel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let handle = prober(&server, Duration::from_millis(30)).spawn(token.clone());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!handle.is_finished());
        let probes = server.received_requests().await.unwrap().len();
        assert!(probes >= 2, "expected repeated probes, got {probes}");

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("prober did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_probe_waits_one_interval() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let handle = prober(&server, Duration::from_secs(600)).spawn(token.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(server.received_requests().await.unwrap().is_empty());

        token.cancel();
        handle.await.unwrap();
    }
}
