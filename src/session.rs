//! `SessionPool`: a keyed (host, ip, epoch) pool of transport sessions with
//! lease/release and idle-TTL reaping (spec §4.3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One hour, per spec §4.3 `garbageCollect`.
const IDLE_EVICTION_AGE: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    host: String,
    ip: String,
}

struct SessionEntry {
    epoch: u64,
    in_use: bool,
    kill_when_done: bool,
    idle_since: Option<Instant>,
}

/// A leased session handle. Must be returned to the pool via
/// `SessionPool::release`.
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub host: String,
    pub ip: String,
    pub epoch: u64,
}

#[derive(Default)]
pub struct SessionPool {
    entries: Mutex<HashMap<PoolKey, Vec<SessionEntry>>>,
    next_epoch: AtomicU64,
}

impl SessionPool {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            // Zero is forbidden as an epoch value (spec §4.3).
            next_epoch: AtomicU64::new(1),
        }
    }

    /// Lease a session for `(host, ip)`: reuse the first free entry, else
    /// mint a new one with a fresh epoch.
    pub fn lease(&self, host: &str, ip: &str) -> SessionToken {
        let key = PoolKey {
            host: host.to_string(),
            ip: ip.to_string(),
        };
        let mut map = self.entries.lock().unwrap();
        let list = map.entry(key).or_default();
        if let Some(entry) = list.iter_mut().find(|e| !e.in_use) {
            entry.in_use = true;
            entry.idle_since = None;
            return SessionToken {
                host: host.to_string(),
                ip: ip.to_string(),
                epoch: entry.epoch,
            };
        }
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        list.push(SessionEntry {
            epoch,
            in_use: true,
            kill_when_done: false,
            idle_since: None,
        });
        SessionToken {
            host: host.to_string(),
            ip: ip.to_string(),
            epoch,
        }
    }

    /// Release a leased session: destroy it if marked kill-when-done, else
    /// return it to the pool and stamp its idle timestamp.
    pub fn release(&self, token: &SessionToken) {
        let key = PoolKey {
            host: token.host.clone(),
            ip: token.ip.clone(),
        };
        let mut map = self.entries.lock().unwrap();
        if let Some(list) = map.get_mut(&key) {
            if let Some(pos) = list.iter().position(|e| e.epoch == token.epoch) {
                if list[pos].kill_when_done {
                    list.remove(pos);
                } else {
                    list[pos].in_use = false;
                    list[pos].idle_since = Some(Instant::now());
                }
            }
        }
    }

    /// Flag every entry for `host`: in-use entries become kill-when-done;
    /// free entries are destroyed immediately. Called on any change to
    /// host, IPs, port, TLS, proxy, or credentials.
    pub fn invalidate_host(&self, host: &str) {
        let mut map = self.entries.lock().unwrap();
        map.retain(|key, list| {
            if key.host != host {
                return true;
            }
            list.retain_mut(|e| {
                if e.in_use {
                    e.kill_when_done = true;
                    true
                } else {
                    false
                }
            });
            !list.is_empty()
        });
    }

    /// Destroy free entries whose idle timestamp is older than one hour.
    pub fn garbage_collect(&self, now: Instant) {
        let mut map = self.entries.lock().unwrap();
        for list in map.values_mut() {
            list.retain(|e| {
                e.in_use
                    || e.idle_since
                        .map(|t| now.duration_since(t) < IDLE_EVICTION_AGE)
                        .unwrap_or(true)
            });
        }
        map.retain(|_, list| !list.is_empty());
    }

    /// Total number of tracked entries (in-use + idle), across all keys.
    pub fn total_entries(&self) -> usize {
        self.entries.lock().unwrap().values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_reuses_free_entry() {
        let pool = SessionPool::new();
        let t1 = pool.lease("host", "1.2.3.4");
        pool.release(&t1);
        let t2 = pool.lease("host", "1.2.3.4");
        assert_eq!(t1.epoch, t2.epoch);
        assert_eq!(pool.total_entries(), 1);
    }

    #[test]
    fn concurrent_leases_get_distinct_epochs() {
        let pool = SessionPool::new();
        let t1 = pool.lease("host", "1.2.3.4");
        let t2 = pool.lease("host", "1.2.3.4");
        assert_ne!(t1.epoch, t2.epoch);
        assert_eq!(pool.total_entries(), 2);
    }

    #[test]
    fn invalidate_host_marks_in_use_kill_and_drops_free() {
        let pool = SessionPool::new();
        let t1 = pool.lease("host", "1.2.3.4");
        let t2 = pool.lease("host", "1.2.3.4");
        pool.release(&t2);
        pool.invalidate_host("host");
        assert_eq!(pool.total_entries(), 1);
        pool.release(&t1);
        assert_eq!(pool.total_entries(), 0);
    }

    #[test]
    fn garbage_collect_evicts_old_idle_entries() {
        let pool = SessionPool::new();
        let t1 = pool.lease("host", "1.2.3.4");
        pool.release(&t1);
        pool.garbage_collect(Instant::now() + IDLE_EVICTION_AGE + Duration::from_secs(1));
        assert_eq!(pool.total_entries(), 0);
    }

    #[test]
    fn pool_size_bounded_by_concurrent_leases_ever_observed() {
        let pool = SessionPool::new();
        let tokens: Vec<_> = (0..5).map(|_| pool.lease("h", "1.1.1.1")).collect();
        for t in &tokens[..3] {
            pool.release(t);
        }
        assert!(pool.total_entries() <= 5);
    }
}
