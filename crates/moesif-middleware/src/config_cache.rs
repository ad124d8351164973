//! Remote configuration cache.
//!
//! Holds the latest `/config` document and governance rule set as a single
//! immutable [`ConfigSnapshot`]. Readers clone an `Arc` under a short read
//! lock; a refresh builds a new snapshot off-lock and swaps it in whole.
//!
//! Refreshes happen on startup, on a fixed poll cadence and when a delivery
//! reports a config ETag different from the cached one. ETag-triggered
//! refreshes are debounced by `refresh_interval`.

use crate::api::CollectorApi;
use crate::app_config::AppConfig;
use crate::governance::GovernanceRules;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Lifecycle of the cached configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigState {
    /// Nothing fetched yet.
    Uninitialized,
    /// A fetch is in flight.
    Loading,
    /// A config has been loaded.
    Ready,
}

/// Everything a request reads from remote configuration, as one unit.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub state: ConfigState,
    pub etag: Option<String>,
    pub config: Option<Arc<AppConfig>>,
    pub governance: Arc<GovernanceRules>,
    pub last_updated: Option<Instant>,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            state: ConfigState::Uninitialized,
            etag: None,
            config: None,
            governance: Arc::new(GovernanceRules::default()),
            last_updated: None,
        }
    }
}

/// Shared, concurrently readable config state.
#[derive(Debug)]
pub struct ConfigCache {
    snapshot: RwLock<Arc<ConfigSnapshot>>,
    refresh_interval: Duration,
    last_triggered: Mutex<Option<Instant>>,
    trigger: mpsc::Sender<()>,
    refreshes: AtomicU64,
    debug: bool,
}

impl ConfigCache {
    /// Create an empty cache.
    ///
    /// The returned receiver yields one message per accepted refresh trigger
    /// and is consumed by the refresher task.
    pub fn new(refresh_interval: Duration, debug: bool) -> (Self, mpsc::Receiver<()>) {
        let (trigger, triggers) = mpsc::channel(1);
        let cache = Self {
            snapshot: RwLock::new(Arc::new(ConfigSnapshot::default())),
            refresh_interval,
            last_triggered: Mutex::new(None),
            trigger,
            refreshes: AtomicU64::new(0),
            debug,
        };
        (cache, triggers)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of refreshes performed so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// React to a config ETag reported by the collector.
    ///
    /// Schedules a refresh when the ETag differs from the cached one and
    /// `refresh_interval` has passed since the last update or trigger.
    /// Returns whether a refresh was scheduled.
    pub fn check_and_update(&self, etag: Option<&str>) -> bool {
        let Some(etag) = etag else {
            return false;
        };

        let snapshot = self.snapshot();
        if snapshot.etag.as_deref() == Some(etag) {
            return false;
        }

        let now = Instant::now();
        let mut last_triggered = self
            .last_triggered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let since = match (snapshot.last_updated, *last_triggered) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if let Some(since) = since {
            if now < since + self.refresh_interval {
                return false;
            }
        }

        *last_triggered = Some(now);
        match self.trigger.try_send(()) {
            Ok(()) => {
                tracing::debug!(%etag, "Config ETag changed, refresh scheduled");
                true
            }
            Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    /// Fetch config and governance rules and swap in a new snapshot.
    ///
    /// A failed fetch keeps the previous value of that half.
    pub async fn refresh(&self, api: &dyn CollectorApi) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        let previous = self.snapshot();
        self.replace(ConfigSnapshot {
            state: ConfigState::Loading,
            ..(*previous).clone()
        });

        let mut next = (*previous).clone();

        match api.get_config().await {
            Ok(response) => {
                let unchanged = response.etag.is_some() && response.etag == previous.etag;
                if !unchanged || previous.config.is_none() {
                    next.config = Some(Arc::new(AppConfig::parse(&response.body)));
                }
                next.etag = response.etag;
                next.last_updated = Some(Instant::now());
            }
            Err(err) => self.log_failure("config", &err),
        }

        match api.get_governance_rules().await {
            Ok(body) => next.governance = Arc::new(GovernanceRules::parse(&body)),
            Err(err) => self.log_failure("governance rules", &err),
        }

        next.state = if next.config.is_some() {
            ConfigState::Ready
        } else {
            ConfigState::Uninitialized
        };
        tracing::debug!(
            etag = ?next.etag,
            rules = next.governance.len(),
            state = ?next.state,
            "Remote configuration refreshed"
        );
        self.replace(next);
    }

    fn replace(&self, snapshot: ConfigSnapshot) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }

    fn log_failure(&self, what: &'static str, err: &crate::error::ApiError) {
        if err.is_unauthorized() || self.debug {
            tracing::warn!(error = %err, "Failed to fetch {what}, keeping cached value");
        } else {
            tracing::debug!(error = %err, "Failed to fetch {what}, keeping cached value");
        }
    }
}

/// Spawn the task that owns config refreshes.
///
/// Fetches once immediately, then on every trigger and every `poll` tick
/// until `stop` flips.
pub(crate) fn spawn_refresher(
    cache: Arc<ConfigCache>,
    api: Arc<dyn CollectorApi>,
    mut triggers: mpsc::Receiver<()>,
    poll: Option<Duration>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        cache.refresh(api.as_ref()).await;

        let period = poll.unwrap_or(Duration::from_secs(3600));
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                Some(()) = triggers.recv() => cache.refresh(api.as_ref()).await,
                _ = ticker.tick(), if poll.is_some() => cache.refresh(api.as_ref()).await,
            }
            if *stop.borrow() {
                break;
            }
        }
        tracing::debug!("Config refresher stopped");
    })
}
