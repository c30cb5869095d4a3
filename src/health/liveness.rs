use super::Probe;
use crate::lifecycle::{Actor, ActorError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CHECK_INTERVAL: Duration = Duration::from_secs(5);
const CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// Liveness check against the service's own public listener.
///
/// Any HTTP response counts as alive: the public server answers unknown
/// paths with 404, which still proves the accept loop is running.
pub struct LivenessCheck {
    client: reqwest::Client,
    url: String,
}

impl LivenessCheck {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(CHECK_TIMEOUT)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to create liveness client: {}", e))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Run the check once and record the result on `probe`.
    pub async fn check(&self, probe: &Probe) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => {
                tracing::debug!(url = %self.url, status = response.status().as_u16(), "liveness check passed");
                probe.healthy();
                true
            }
            Err(e) => {
                probe.not_healthy(format!("liveness check against {} failed: {}", self.url, e));
                false
            }
        }
    }
}

/// Actor that repeats `check` until interrupted.
pub fn liveness_actor(check: LivenessCheck, probe: Arc<Probe>) -> Actor {
    let cancel = CancellationToken::new();
    let cancelled = cancel.clone();

    Actor::new(
        "liveness",
        async move {
            let mut interval = tokio::time::interval(CHECK_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => return Ok::<(), ActorError>(()),
                    _ = interval.tick() => {
                        check.check(&probe).await;
                    }
                }
            }
        },
        move |_| {
            cancel.cancel();
            async {}
        },
    )
}
