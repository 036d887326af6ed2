//! Startup reachability check for configured proxies.

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use super::{ProxyLease, ProxyPool};

/// Default endpoint used to confirm a proxy forwards traffic.
pub const DEFAULT_PROXY_CHECK_URL: &str = "https://httpbin.org/ip";

async fn probe_one(lease: &ProxyLease, check_url: &str) -> Result<(), String> {
    let response = lease
        .client()
        .get(check_url)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(format!("HTTP {}", status.as_u16()))
    }
}

/// Probes every proxy concurrently; failing proxies are marked dead.
pub(super) async fn probe_pool(pool: &ProxyPool, check_url: &str) -> usize {
    let leases = pool.proxy_leases();
    if leases.is_empty() {
        debug!("no proxies configured, skipping probe");
        return 0;
    }

    let results = join_all(
        leases
            .iter()
            .map(|lease| async move { (lease, probe_one(lease, check_url).await) }),
    )
    .await;

    let mut alive = 0;
    for (lease, result) in results {
        match result {
            Ok(()) => {
                alive += 1;
                debug!(proxy = %lease.label(), "proxy probe ok");
            }
            Err(reason) => pool.mark_dead(lease, &format!("probe failed: {reason}")),
        }
    }

    if alive == 0 {
        warn!(total = leases.len(), "no proxy passed the startup probe");
    } else {
        info!(alive, total = leases.len(), "proxy probe complete");
    }
    alive
}
