//! `RuntimeContext`: the consolidated holder of process-wide mutable state
//! (spec §2.1) — a session pool, bad-IP map, IP roster, and throttle map,
//! explicitly constructed and threaded through `Arc` rather than reached for
//! as hidden globals.

use std::sync::Arc;

use crate::ip_roster::{BadIpMap, IpRoster};
use crate::session::SessionPool;
use crate::signer::SigningKeyCache;
use crate::throttle::Throttle;

/// Shared state a `Connection` (and every `RequestEngine` built from it)
/// draws on. One `RuntimeContext` is typically shared by every `Connection`
/// in a process, the way the teacher's storage layer shares one
/// connection-pool handle across windows.
pub struct RuntimeContext {
    pub sessions: SessionPool,
    pub bad_ips: BadIpMap,
    pub ip_roster: IpRoster,
    pub throttle: Arc<Throttle>,
    pub signing_keys: SigningKeyCache,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            sessions: SessionPool::new(),
            bad_ips: BadIpMap::new(),
            ip_roster: IpRoster::new(),
            throttle: Throttle::new(),
            signing_keys: SigningKeyCache::new(),
        }
    }
}

impl RuntimeContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Periodic maintenance: session GC and (implicitly, via lazy eviction)
    /// bad-IP aging. Intended to be called from a caller-owned interval, not
    /// spawned automatically — only the throttle's refill timer runs on its
    /// own task (spec §4.5).
    pub fn housekeep(&self) {
        self.sessions.garbage_collect(std::time::Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn housekeeping_does_not_panic_on_empty_state() {
        let ctx = RuntimeContext::new();
        ctx.housekeep();
        assert_eq!(ctx.sessions.total_entries(), 0);
    }
}
