//! Rotating, failure-aware pool of egress endpoints.
//!
//! Every outbound request leases one slot from the pool and reports the
//! outcome afterwards. A slot that fails `failure_threshold` times in a row
//! is benched for an exponentially growing cooldown; a slot that keeps
//! failing after `max_cooldowns` benchings is retired for the rest of the run.
//!
//! Without a proxy list the pool holds a single virtual "direct" slot that is
//! always available. Its outcomes are counted but never change its health.
//!
//! # Example
//!
//! ```no_run
//! use catalog_core::proxy::{ProxyOutcome, ProxyPool, ProxyPoolConfig};
//! use catalog_core::download::ClientSettings;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = ProxyPool::direct(ProxyPoolConfig::default(), &ClientSettings::default())?;
//! if let Some(lease) = pool.acquire() {
//!     // ... send a request with lease.client() ...
//!     pool.report(&lease, ProxyOutcome::Success);
//! }
//! # Ok(())
//! # }
//! ```

mod list;
mod probe;

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::download::{ClientSettings, build_client};

pub use list::{
    ProxyEndpoint, ProxyListError, ProxyScheme, load_proxy_file, parse_proxy_line,
    parse_proxy_list,
};
pub use probe::DEFAULT_PROXY_CHECK_URL;

/// Consecutive failures before a proxy is benched.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
/// First cooldown duration; doubles with each further benching.
pub const DEFAULT_BASE_COOLDOWN: Duration = Duration::from_secs(60);
/// Upper bound for a single cooldown.
pub const DEFAULT_MAX_COOLDOWN: Duration = Duration::from_secs(15 * 60);
/// Benchings allowed before a proxy is retired.
pub const DEFAULT_MAX_COOLDOWNS: u32 = 3;

const DIRECT_LABEL: &str = "direct";

/// What the caller does when no proxy is currently available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoProxyPolicy {
    /// Report exhaustion; the caller backs off within its retry budget.
    #[default]
    Wait,
    /// Fall back to an un-proxied client.
    Direct,
}

/// Health tuning for the pool.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Consecutive failures that trigger a cooldown.
    pub failure_threshold: u32,
    /// Cooldown for the first benching.
    pub base_cooldown: Duration,
    /// Cap for any single cooldown.
    pub max_cooldown: Duration,
    /// Benchings allowed before the proxy is marked dead.
    pub max_cooldowns: u32,
    /// Behaviour when every proxy is dead or cooling down.
    pub no_proxy_policy: NoProxyPolicy,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            base_cooldown: DEFAULT_BASE_COOLDOWN,
            max_cooldown: DEFAULT_MAX_COOLDOWN,
            max_cooldowns: DEFAULT_MAX_COOLDOWNS,
            no_proxy_policy: NoProxyPolicy::Wait,
        }
    }
}

/// Errors raised while building the pool.
#[derive(Debug, thiserror::Error)]
pub enum ProxyPoolError {
    /// The HTTP client for an endpoint could not be built.
    #[error("cannot build HTTP client for proxy {endpoint}: {source}")]
    Client {
        /// Endpoint label (`direct` for the un-proxied client).
        endpoint: String,
        /// Underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
}

/// Outcome reported back for a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    /// The request completed in a way that says nothing bad about the proxy.
    Success,
    /// The request failed in a way attributable to the proxy.
    Failure,
}

/// Observable health of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyHealth {
    /// Eligible for selection.
    Healthy,
    /// Benched until its cooldown elapses.
    CoolingDown,
    /// Retired for the rest of the run.
    Dead,
}

/// Point-in-time view of one slot, for summaries and tests.
#[derive(Debug, Clone, Serialize)]
pub struct ProxySnapshot {
    /// `host:port`, or `direct`.
    pub endpoint: String,
    /// Current health.
    pub health: ProxyHealth,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Benchings so far.
    pub cooldown_streak: u32,
    /// Lifetime failure count.
    pub total_failures: u64,
    /// Lifetime success count.
    pub total_successes: u64,
    /// Remaining cooldown, when cooling down.
    #[serde(skip)]
    pub cooldown_remaining: Option<Duration>,
    /// Time since the slot was last handed out.
    #[serde(skip)]
    pub idle_for: Option<Duration>,
}

/// A leased slot: the client to send through plus the handle used to report.
#[derive(Debug, Clone)]
pub struct ProxyLease {
    index: usize,
    label: String,
    client: Client,
}

impl ProxyLease {
    /// Client routed through this slot's endpoint.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// `host:port` or `direct`.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Debug)]
struct Slot {
    endpoint: Option<ProxyEndpoint>,
    label: String,
    client: Client,
}

#[derive(Debug, Clone, Default)]
struct SlotState {
    cooling_until: Option<Instant>,
    dead: bool,
    consecutive_failures: u32,
    cooldown_streak: u32,
    total_failures: u64,
    total_successes: u64,
    last_used: Option<Instant>,
}

impl SlotState {
    fn health(&self, now: Instant) -> ProxyHealth {
        if self.dead {
            ProxyHealth::Dead
        } else if self.cooling_until.is_some_and(|until| until > now) {
            ProxyHealth::CoolingDown
        } else {
            ProxyHealth::Healthy
        }
    }
}

#[derive(Debug)]
struct PoolState {
    slots: Vec<SlotState>,
    cursor: usize,
}

/// Shared proxy pool. Wrap in `Arc` and hand to every worker.
#[derive(Debug)]
pub struct ProxyPool {
    slots: Vec<Slot>,
    /// Slots `0..rotating` take part in round-robin; a trailing direct
    /// fallback slot (if any) is only handed out by [`ProxyPool::lease`].
    rotating: usize,
    direct_only: bool,
    config: ProxyPoolConfig,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    /// Builds a pool over `endpoints`, one client per endpoint.
    ///
    /// An empty list yields the single always-healthy direct slot. With
    /// [`NoProxyPolicy::Direct`] a non-rotating direct slot is added as the
    /// fallback.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyPoolError::Client`] if a client cannot be built.
    pub fn new(
        endpoints: Vec<ProxyEndpoint>,
        config: ProxyPoolConfig,
        settings: &ClientSettings,
    ) -> Result<Self, ProxyPoolError> {
        let direct_only = endpoints.is_empty();
        let mut slots = Vec::with_capacity(endpoints.len() + 1);

        for endpoint in endpoints {
            let label = endpoint.to_string();
            let client =
                build_client(Some(&endpoint), settings).map_err(|source| ProxyPoolError::Client {
                    endpoint: label.clone(),
                    source,
                })?;
            slots.push(Slot {
                endpoint: Some(endpoint),
                label,
                client,
            });
        }
        let rotating = if direct_only { 1 } else { slots.len() };
        if direct_only || config.no_proxy_policy == NoProxyPolicy::Direct {
            slots.push(Self::direct_slot(settings)?);
        }

        let state = PoolState {
            slots: vec![SlotState::default(); slots.len()],
            cursor: 0,
        };
        debug!(
            proxies = if direct_only { 0 } else { rotating },
            policy = ?config.no_proxy_policy,
            "proxy pool ready"
        );

        Ok(Self {
            slots,
            rotating,
            direct_only,
            config,
            state: Mutex::new(state),
        })
    }

    /// Pool with only the direct slot.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyPoolError::Client`] if the client cannot be built.
    pub fn direct(
        config: ProxyPoolConfig,
        settings: &ClientSettings,
    ) -> Result<Self, ProxyPoolError> {
        Self::new(Vec::new(), config, settings)
    }

    fn direct_slot(settings: &ClientSettings) -> Result<Slot, ProxyPoolError> {
        let client = build_client(None, settings).map_err(|source| ProxyPoolError::Client {
            endpoint: DIRECT_LABEL.to_string(),
            source,
        })?;
        Ok(Slot {
            endpoint: None,
            label: DIRECT_LABEL.to_string(),
            client,
        })
    }

    /// Number of configured proxies (0 when running direct).
    #[must_use]
    pub fn proxy_count(&self) -> usize {
        if self.direct_only { 0 } else { self.rotating }
    }

    /// Configured no-proxy policy.
    #[must_use]
    pub fn policy(&self) -> NoProxyPolicy {
        self.config.no_proxy_policy
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_direct(&self, index: usize) -> bool {
        self.slots[index].endpoint.is_none()
    }

    /// Next available slot in round-robin order, skipping dead and benched
    /// proxies. `None` when every proxy is dead or cooling down.
    #[must_use]
    pub fn acquire(&self) -> Option<ProxyLease> {
        let now = Instant::now();
        let mut state = self.lock();

        for offset in 0..self.rotating {
            let index = (state.cursor + offset) % self.rotating;
            let slot_state = &mut state.slots[index];
            if slot_state.dead {
                continue;
            }
            match slot_state.cooling_until {
                Some(until) if until > now => continue,
                Some(_) => {
                    slot_state.cooling_until = None;
                    info!(proxy = %self.slots[index].label, "proxy cooldown elapsed, back in rotation");
                }
                None => {}
            }
            slot_state.last_used = Some(now);
            state.cursor = (index + 1) % self.rotating;
            return Some(self.lease_for(index));
        }
        None
    }

    /// [`ProxyPool::acquire`] with the no-proxy policy applied.
    ///
    /// # Errors
    ///
    /// Returns the time until a proxy may become available (`None` if every
    /// proxy is dead) when the policy is [`NoProxyPolicy::Wait`].
    pub fn lease(&self) -> Result<ProxyLease, Option<Duration>> {
        if let Some(lease) = self.acquire() {
            return Ok(lease);
        }
        match self.config.no_proxy_policy {
            NoProxyPolicy::Direct if self.slots.len() > self.rotating => {
                let index = self.slots.len() - 1;
                self.lock().slots[index].last_used = Some(Instant::now());
                debug!("no proxy available, using direct connection");
                Ok(self.lease_for(index))
            }
            _ => Err(self.time_until_available()),
        }
    }

    fn lease_for(&self, index: usize) -> ProxyLease {
        let slot = &self.slots[index];
        ProxyLease {
            index,
            label: slot.label.clone(),
            client: slot.client.clone(),
        }
    }

    /// Records the outcome of a request made through `lease`.
    pub fn report(&self, lease: &ProxyLease, outcome: ProxyOutcome) {
        let now = Instant::now();
        let direct = self.is_direct(lease.index);
        let label = &self.slots[lease.index].label;
        let mut state = self.lock();
        let slot = &mut state.slots[lease.index];

        match outcome {
            ProxyOutcome::Success => {
                slot.total_successes += 1;
                slot.consecutive_failures = 0;
                if slot.cooldown_streak > 0 || slot.cooling_until.is_some() {
                    info!(proxy = %label, "proxy recovered, cooldown history cleared");
                }
                slot.cooldown_streak = 0;
                if !slot.dead {
                    slot.cooling_until = None;
                }
            }
            ProxyOutcome::Failure => {
                slot.total_failures += 1;
                if direct {
                    slot.consecutive_failures += 1;
                    return;
                }
                if slot.dead || slot.health(now) == ProxyHealth::CoolingDown {
                    // Late result from a request leased before the benching.
                    return;
                }
                slot.consecutive_failures += 1;
                if slot.consecutive_failures >= self.config.failure_threshold {
                    self.bench(label, slot, now);
                }
            }
        }
    }

    fn bench(&self, label: &str, slot: &mut SlotState, now: Instant) {
        let failures = slot.consecutive_failures;
        slot.consecutive_failures = 0;

        if slot.cooldown_streak + 1 > self.config.max_cooldowns {
            slot.dead = true;
            slot.cooling_until = None;
            warn!(
                proxy = %label,
                cooldowns = slot.cooldown_streak,
                "proxy marked dead after repeated cooldowns"
            );
            return;
        }

        let cooldown = cooldown_for(
            self.config.base_cooldown,
            self.config.max_cooldown,
            slot.cooldown_streak,
        );
        slot.cooldown_streak += 1;
        slot.cooling_until = Some(now + cooldown);
        warn!(
            proxy = %label,
            failures,
            cooldown_secs = cooldown.as_secs_f64(),
            streak = slot.cooldown_streak,
            "proxy cooling down"
        );
    }

    /// Retires a proxy immediately (used by the startup probe).
    pub fn mark_dead(&self, lease: &ProxyLease, reason: &str) {
        if self.is_direct(lease.index) {
            return;
        }
        let mut state = self.lock();
        let slot = &mut state.slots[lease.index];
        if !slot.dead {
            slot.dead = true;
            slot.cooling_until = None;
            warn!(proxy = %lease.label, reason, "proxy marked dead");
        }
    }

    /// Shortest wait until some rotating slot becomes available.
    ///
    /// `Some(Duration::ZERO)` when one is available now, `None` when every
    /// proxy is dead.
    #[must_use]
    pub fn time_until_available(&self) -> Option<Duration> {
        let now = Instant::now();
        let state = self.lock();
        state.slots[..self.rotating]
            .iter()
            .filter(|slot| !slot.dead)
            .map(|slot| {
                slot.cooling_until
                    .map_or(Duration::ZERO, |until| until.saturating_duration_since(now))
            })
            .min()
    }

    /// Returns `true` once every proxy has been retired.
    #[must_use]
    pub fn all_dead(&self) -> bool {
        self.time_until_available().is_none()
    }

    /// Snapshot of every slot, rotating slots first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ProxySnapshot> {
        let now = Instant::now();
        let state = self.lock();
        self.slots
            .iter()
            .zip(state.slots.iter())
            .map(|(slot, st)| ProxySnapshot {
                endpoint: slot.label.clone(),
                health: st.health(now),
                consecutive_failures: st.consecutive_failures,
                cooldown_streak: st.cooldown_streak,
                total_failures: st.total_failures,
                total_successes: st.total_successes,
                cooldown_remaining: st
                    .cooling_until
                    .filter(|until| *until > now)
                    .map(|until| until - now),
                idle_for: st.last_used.map(|used| now.saturating_duration_since(used)),
            })
            .collect()
    }

    /// Leases for every configured proxy regardless of health, for probing.
    fn proxy_leases(&self) -> Vec<ProxyLease> {
        (0..self.rotating)
            .filter(|&index| !self.is_direct(index))
            .map(|index| self.lease_for(index))
            .collect()
    }

    /// Probes every proxy against `check_url` and retires the ones that fail.
    /// Returns the number of proxies still alive.
    #[instrument(skip(self))]
    pub async fn probe(&self, check_url: &str) -> usize {
        probe::probe_pool(self, check_url).await
    }
}

/// `base * 2^streak`, capped at `max`.
#[must_use]
pub fn cooldown_for(base: Duration, max: Duration, streak: u32) -> Duration {
    let factor = 2u32.saturating_pow(streak);
    base.saturating_mul(factor).min(max)
}
