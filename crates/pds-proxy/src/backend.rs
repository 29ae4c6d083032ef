//! Backend pool with a periodic health poll.
//!
//! Each backend's healthy flag is a bare atomic bool (per the concurrency
//! model: "no lock required"), flipped by a background task that polls
//! every 15 seconds with the same timeout a proxied request gets.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use url::Url;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(15);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(15);

pub struct Backend {
    pub service_did: String,
    pub base_url: Url,
    healthy: AtomicBool,
}

impl Backend {
    pub fn new(service_did: impl Into<String>, base_url: Url) -> Self {
        Self {
            service_did: service_did.into(),
            base_url,
            healthy: AtomicBool::new(true),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

/// A set of backends for one upstream service DID, selected
/// first-healthy-wins.
#[derive(Clone)]
pub struct BackendPool {
    backends: Arc<Vec<Backend>>,
    client: reqwest::Client,
}

impl BackendPool {
    pub fn new(backends: Vec<Backend>, client: reqwest::Client) -> Self {
        Self {
            backends: Arc::new(backends),
            client,
        }
    }

    /// First healthy backend serving `service_did`; if none are healthy,
    /// degrades to the first one declared rather than failing closed.
    pub fn select(&self, service_did: &str) -> Option<&Backend> {
        let mut first = None;
        for backend in self.backends.iter().filter(|b| b.service_did == service_did) {
            if backend.is_healthy() {
                return Some(backend);
            }
            first.get_or_insert(backend);
        }
        first
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Spawn the 15-second health-check loop for every backend. Returns
    /// the task handle so callers can cancel it on shutdown.
    pub fn spawn_health_checks(&self) -> tokio::task::JoinHandle<()> {
        let backends = Arc::clone(&self.backends);
        let client = self.client.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
            loop {
                interval.tick().await;
                for backend in backends.iter() {
                    let healthy = check_once(&client, &backend.base_url).await;
                    backend.set_healthy(healthy);
                }
            }
        })
    }
}

async fn check_once(client: &reqwest::Client, base_url: &Url) -> bool {
    match client
        .get(base_url.clone())
        .timeout(HEALTH_CHECK_TIMEOUT)
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success() || resp.status().is_redirection(),
        Err(_) => false,
    }
}
