//! `IPRoster`: per-host round-robin over candidate IPs, plus a shared
//! "bad IP" map with age-based eviction (spec §4.4).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::TransportErrorKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BadIpKey {
    host: String,
    ip: String,
}

#[derive(Debug, Clone)]
struct BadIpEntry {
    failed_at: Instant,
    kind: TransportErrorKind,
}

/// Shared "bad IP" map (spec §3 `BadIPEntry`): keyed by (host, ip), evicted
/// by age on access.
#[derive(Default)]
pub struct BadIpMap {
    entries: Mutex<HashMap<BadIpKey, BadIpEntry>>,
}

impl BadIpMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_bad(&self, host: &str, ip: &str, kind: TransportErrorKind, now: Instant) {
        let key = BadIpKey {
            host: host.to_string(),
            ip: ip.to_string(),
        };
        self.entries.lock().unwrap().insert(
            key,
            BadIpEntry {
                failed_at: now,
                kind,
            },
        );
    }

    fn evict_expired(&self, ttl: Duration, now: Instant) {
        self.entries
            .lock()
            .unwrap()
            .retain(|_, e| now.duration_since(e.failed_at) < ttl);
    }

    pub fn is_bad(&self, host: &str, ip: &str, ttl: Duration, now: Instant) -> bool {
        self.evict_expired(ttl, now);
        let key = BadIpKey {
            host: host.to_string(),
            ip: ip.to_string(),
        };
        self.entries.lock().unwrap().contains_key(&key)
    }

    pub fn clear_host(&self, host: &str) {
        self.entries.lock().unwrap().retain(|k, _| k.host != host);
    }

    /// If every candidate IP for `host` is currently marked bad, clear them
    /// all (global intermittent-failure recovery).
    pub fn test_all_bad(&self, host: &str, candidate_ips: &[String], ttl: Duration, now: Instant) {
        self.evict_expired(ttl, now);
        let map = self.entries.lock().unwrap();
        let all_bad = !candidate_ips.is_empty()
            && candidate_ips.iter().all(|ip| {
                map.contains_key(&BadIpKey {
                    host: host.to_string(),
                    ip: ip.clone(),
                })
            });
        drop(map);
        if all_bad {
            self.clear_host(host);
        }
    }
}

/// Per-host round-robin state: a process-wide rotating index shared by all
/// callers against a given host label.
#[derive(Default)]
pub struct IpRoster {
    rotating_index: Mutex<HashMap<String, AtomicUsize>>,
}

impl IpRoster {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_index(&self, host: &str, len: usize) -> usize {
        let mut map = self.rotating_index.lock().unwrap();
        let counter = map
            .entry(host.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        counter.fetch_add(1, Ordering::Relaxed) % len.max(1)
    }

    /// Advance the rotating index and return the next candidate IP not
    /// present in the bad-IP map or the per-request `excluding_used` set.
    /// Returns `None` when the list is exhausted.
    pub fn next_ip(
        &self,
        host: &str,
        candidate_ips: &[String],
        excluding_used: &HashSet<String>,
        bad_ips: &BadIpMap,
        bad_ip_ttl: Duration,
        now: Instant,
    ) -> Option<String> {
        if candidate_ips.is_empty() {
            return None;
        }
        for _ in 0..candidate_ips.len() {
            let idx = self.next_index(host, candidate_ips.len());
            let ip = &candidate_ips[idx];
            if excluding_used.contains(ip) {
                continue;
            }
            if candidate_ips.len() > 1 && bad_ips.is_bad(host, ip, bad_ip_ttl, now) {
                continue;
            }
            return Some(ip.clone());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_skips_bad_and_used_ips() {
        let roster = IpRoster::new();
        let bad = BadIpMap::new();
        let ips = vec!["1.1.1.1".to_string(), "2.2.2.2".to_string(), "3.3.3.3".to_string()];
        let now = Instant::now();
        bad.mark_bad("h", "1.1.1.1", TransportErrorKind::ConnectFailed, now);
        let mut used = HashSet::new();
        used.insert("2.2.2.2".to_string());

        let mut seen = HashSet::new();
        for _ in 0..10 {
            if let Some(ip) = roster.next_ip("h", &ips, &used, &bad, Duration::from_secs(60), now) {
                seen.insert(ip);
            }
        }
        assert_eq!(seen.len(), 1);
        assert!(seen.contains("3.3.3.3"));
    }

    #[test]
    fn single_ip_host_never_excluded_for_bad() {
        let roster = IpRoster::new();
        let bad = BadIpMap::new();
        let ips = vec!["only.host".to_string()];
        let now = Instant::now();
        bad.mark_bad("h", "only.host", TransportErrorKind::ConnectFailed, now);
        let used = HashSet::new();
        let ip = roster.next_ip("h", &ips, &used, &bad, Duration::from_secs(60), now);
        assert_eq!(ip, Some("only.host".to_string()));
    }

    #[test]
    fn test_all_bad_clears_when_every_ip_is_bad() {
        let bad = BadIpMap::new();
        let ips = vec!["1.1.1.1".to_string(), "2.2.2.2".to_string()];
        let now = Instant::now();
        bad.mark_bad("h", "1.1.1.1", TransportErrorKind::ConnectFailed, now);
        bad.mark_bad("h", "2.2.2.2", TransportErrorKind::ConnectFailed, now);
        bad.test_all_bad("h", &ips, Duration::from_secs(60), now);
        assert!(!bad.is_bad("h", "1.1.1.1", Duration::from_secs(60), now));
        assert!(!bad.is_bad("h", "2.2.2.2", Duration::from_secs(60), now));
    }

    #[test]
    fn bad_entries_expire_after_ttl() {
        let bad = BadIpMap::new();
        let now = Instant::now();
        bad.mark_bad("h", "1.1.1.1", TransportErrorKind::ConnectFailed, now);
        let later = now + Duration::from_secs(120);
        assert!(!bad.is_bad("h", "1.1.1.1", Duration::from_secs(60), later));
    }
}
