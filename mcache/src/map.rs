use crate::entry::{self, Entry};
use crate::events::{MapEvent, Notifier};
use crate::stats::MapStats;
use parking_lot::Mutex;
use shared::config::MapConfig;
use shared::{Error, Result};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Everything guarded by the map's single lock
struct State<K, V> {
    entries: HashMap<K, Entry<V>>,
    stats: MapStats,
}

impl<K, V> State<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Evicts `key` if its entry has expired. Returns true when a live entry remains.
    fn keep_if_live<Q>(&mut self, key: &Q, now: Instant, notifier: &Notifier<K>) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        match self.entries.get(key).map(|entry| entry.is_live_at(now)) {
            Some(true) => true,
            Some(false) => {
                if let Some((key, _)) = self.entries.remove_entry(key) {
                    self.stats.lazy_evictions += 1;
                    trace!("evicted expired entry on read");
                    notifier.publish(|timestamp| MapEvent::Expired { key, timestamp });
                }
                false
            }
            None => false,
        }
    }

    /// Drops every entry that is no longer live at `now`, returning how many went.
    fn purge_expired(&mut self, now: Instant, notifier: &Notifier<K>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            if entry.is_live_at(now) {
                return true;
            }
            notifier.publish(|timestamp| MapEvent::Expired {
                key: key.clone(),
                timestamp,
            });
            false
        });
        before - self.entries.len()
    }
}

/// State shared between the handle and its sweeper task
struct Shared<K, V> {
    state: Mutex<State<K, V>>,
    notifier: Notifier<K>,
}

impl<K, V> Shared<K, V>
where
    K: Eq + Hash + Clone,
{
    fn new() -> Self {
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                stats: MapStats::default(),
            }),
            notifier: Notifier::new(),
        }
    }

    /// One reclamation pass over the whole store
    fn sweep(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.purge_expired(Instant::now(), &self.notifier);
        state.stats.swept_evictions += removed as u64;
        state.stats.sweeps += 1;
        removed
    }
}

/// Background reclamation loop. Exits as soon as `shutdown` fires, even between ticks.
async fn run_sweeper<K, V>(shared: Arc<Shared<K, V>>, period: Duration, shutdown: CancellationToken)
where
    K: Eq + Hash + Clone,
{
    // Periods past the far-future horizon would overflow the ticker's deadlines
    let period = period.min(entry::FAR_FUTURE);
    // First pass one full period after construction, not immediately
    let mut ticker = time::interval_at(entry::deadline_after(Instant::now(), period), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(?period, "sweeper started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let removed = shared.sweep();
                if removed > 0 {
                    debug!(removed, "sweep pass reclaimed expired entries");
                }
            }
        }
    }

    debug!("sweeper stopped");
}

/// Concurrent key-value map whose entries expire a fixed TTL after they were written.
///
/// Every operation takes one exclusive lock, so each call is atomic with respect
/// to every other call and to the background sweep. A Tokio task spawned at
/// construction removes expired entries every `sweep_interval`; reads also evict
/// any expired entry they touch.
///
/// # Example
///
/// ```rust,no_run
/// use mcache::ExpiringMap;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> mcache::Result<()> {
///     let sessions: ExpiringMap<String, u64> = ExpiringMap::new(Duration::from_secs(30))?;
///     sessions.set("alice".to_string(), 7);
///     assert_eq!(sessions.get("alice"), Some(7));
///     sessions.shutdown().await
/// }
/// ```
pub struct ExpiringMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    shared: Arc<Shared<K, V>>,
    config: MapConfig,
    cancel_token: CancellationToken,
    closed: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> ExpiringMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Creates a map that sweeps once per `ttl`.
    ///
    /// # Errors
    ///
    /// `Error::InvalidConfig` for a zero TTL, `Error::NoRuntime` when called
    /// outside a Tokio runtime.
    pub fn new(ttl: Duration) -> Result<Self> {
        Self::with_config(MapConfig::new(ttl))
    }

    /// Creates a map with a sweep period independent of the TTL.
    pub fn with_sweep_interval(ttl: Duration, sweep_interval: Duration) -> Result<Self> {
        Self::with_config(MapConfig::new(ttl).with_sweep_interval(sweep_interval))
    }

    pub fn with_config(config: MapConfig) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let shared = Arc::new(Shared::new());
        let cancel_token = CancellationToken::new();
        let sweeper = runtime.spawn(run_sweeper(
            Arc::clone(&shared),
            config.sweep_interval,
            cancel_token.clone(),
        ));

        Ok(Self {
            shared,
            config,
            cancel_token,
            closed: AtomicBool::new(false),
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Inserts or overwrites `key`, expiring `ttl` from now.
    pub fn set(&self, key: K, value: V) {
        let mut state = self.shared.state.lock();
        let now = Instant::now();
        let notifier = &self.shared.notifier;
        let event_key = notifier.is_active().then(|| key.clone());

        let previous = state
            .entries
            .insert(key, Entry::new(value, self.config.ttl, now));
        state.stats.writes += 1;

        if let Some(key) = event_key {
            let replaced_live = previous.is_some_and(|entry| entry.is_live_at(now));
            notifier.publish(|timestamp| {
                if replaced_live {
                    MapEvent::Updated { key, timestamp }
                } else {
                    MapEvent::Inserted { key, timestamp }
                }
            });
        }
    }

    /// Returns a copy of the live value for `key`; evicts it if it has expired.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let mut state = self.shared.state.lock();
        let now = Instant::now();

        if !state.keep_if_live(key, now, &self.shared.notifier) {
            state.stats.misses += 1;
            return None;
        }

        state.stats.hits += 1;
        state.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Like [`ExpiringMap::get`] but without copying the value out.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let mut state = self.shared.state.lock();
        let now = Instant::now();

        let live = state.keep_if_live(key, now, &self.shared.notifier);
        if live {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        live
    }

    /// Removes and returns the live value for `key` in one critical section.
    ///
    /// An expired entry is evicted and reported as absent, exactly like `get`.
    pub fn release<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let mut state = self.shared.state.lock();
        let now = Instant::now();
        let notifier = &self.shared.notifier;

        if !state.keep_if_live(key, now, notifier) {
            state.stats.misses += 1;
            return None;
        }

        state.stats.hits += 1;
        let (key, entry) = state.entries.remove_entry(key)?;
        notifier.publish(|timestamp| MapEvent::Released { key, timestamp });
        Some(entry.value)
    }

    /// Removes `key` whether or not it is live. Returns true if something was removed.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let mut state = self.shared.state.lock();
        match state.entries.remove_entry(key) {
            Some((key, _)) => {
                self.shared
                    .notifier
                    .publish(|timestamp| MapEvent::Removed { key, timestamp });
                true
            }
            None => false,
        }
    }

    /// Number of live entries. Expired entries found along the way are evicted.
    pub fn count(&self) -> usize {
        let mut state = self.shared.state.lock();
        let evicted = state.purge_expired(Instant::now(), &self.shared.notifier);
        state.stats.lazy_evictions += evicted as u64;
        state.entries.len()
    }

    /// Independent snapshot of every live entry. Expired entries are evicted.
    pub fn get_all(&self) -> HashMap<K, V> {
        let mut state = self.shared.state.lock();
        let evicted = state.purge_expired(Instant::now(), &self.shared.notifier);
        state.stats.lazy_evictions += evicted as u64;

        state
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    /// Runs one reclamation pass now, on the caller's thread.
    pub fn sweep(&self) -> usize {
        self.shared.sweep()
    }

    /// Raw size of the backing store, including expired entries not yet reclaimed.
    pub fn stored_len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn stats(&self) -> MapStats {
        self.shared.state.lock().stats
    }

    /// Subscribe to change notifications for this map.
    pub fn subscribe(&self) -> broadcast::Receiver<MapEvent<K>> {
        self.shared.notifier.subscribe()
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    pub fn sweep_interval(&self) -> Duration {
        self.config.sweep_interval
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Signals the sweeper to stop and returns without waiting for it.
    ///
    /// The map keeps answering calls afterwards, but nothing reclaims unread
    /// entries anymore.
    ///
    /// # Errors
    ///
    /// `Error::AlreadyClosed` on every call after the first.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            warn!("close called on an already closed cache");
            return Err(Error::AlreadyClosed);
        }

        self.cancel_token.cancel();
        info!("cache closed, sweeper signalled to stop");
        Ok(())
    }

    /// [`ExpiringMap::close`] and then wait until the sweeper task has exited.
    ///
    /// Also works after a plain `close()`: the first caller to get here joins
    /// the task.
    ///
    /// # Errors
    ///
    /// `Error::AlreadyClosed` once the sweeper has already been joined.
    pub async fn shutdown(&self) -> Result<()> {
        let handle = self.sweeper.lock().take();
        let closed = self.close();

        let Some(handle) = handle else {
            return closed;
        };
        handle
            .await
            .map_err(|e| Error::Internal(format!("sweeper task failed: {e}")))
    }
}

impl<K, V> Drop for ExpiringMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn drop(&mut self) {
        // Idempotent; covers handles dropped without an explicit close
        self.cancel_token.cancel();
    }
}

impl<K, V> Debug for ExpiringMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringMap")
            .field("ttl", &self.config.ttl)
            .field("sweep_interval", &self.config.sweep_interval)
            .field("stored_len", &self.stored_len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
