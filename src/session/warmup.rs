//! Best-effort wake-up ping for the demo service.
//!
//! The service scales to zero between visitors; a plain GET against its
//! health endpoint starts a cold instance spinning up while the
//! WebSocket dial is still in flight. Failures are logged and otherwise
//! ignored, the connect path has its own retry budget.

use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

const WARMUP_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn ping(service_url: &Url) -> bool {
    let health = match service_url.join("healthz") {
        Ok(url) => url,
        Err(err) => {
            warn!(%service_url, %err, "could not build health url");
            return false;
        }
    };
    let client = match reqwest::Client::builder().timeout(WARMUP_TIMEOUT).build() {
        Ok(client) => client,
        Err(err) => {
            warn!(%err, "could not build warmup client");
            return false;
        }
    };
    match client.get(health.clone()).send().await {
        Ok(response) => {
            debug!(%health, status = %response.status(), "warmup ping answered");
            response.status().is_success()
        }
        Err(err) => {
            debug!(%health, %err, "warmup ping failed; continuing anyway");
            false
        }
    }
}
