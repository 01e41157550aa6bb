//! `Throttle`: per-host, per-direction token buckets refilled once per
//! second by a single timer task (spec §4.5).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

struct TokenBucket {
    rate_bytes_per_sec: u64,
    balance: i64,
}

impl TokenBucket {
    fn new(rate: u64) -> Self {
        Self {
            rate_bytes_per_sec: rate,
            balance: rate as i64,
        }
    }

    fn refill(&mut self, elapsed: Duration) {
        let add = (self.rate_bytes_per_sec as f64 * elapsed.as_secs_f64()) as i64;
        self.balance = (self.balance + add).min(self.rate_bytes_per_sec as i64);
    }

    fn consume(&mut self, n: u64) {
        self.balance -= n as i64;
    }

    fn is_exhausted(&self) -> bool {
        self.balance < 0
    }
}

struct ThrottleRec {
    upload: Option<TokenBucket>,
    download: Option<TokenBucket>,
    resume_tx: watch::Sender<u64>,
}

/// Per-host bandwidth throttle, backed by one process-wide timer task.
pub struct Throttle {
    hosts: Mutex<HashMap<String, ThrottleRec>>,
    last_tick: Mutex<Instant>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Throttle {
    fn default() -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
            last_tick: Mutex::new(Instant::now()),
            timer_handle: Mutex::new(None),
        }
    }
}

impl Throttle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Configure (or reconfigure) a bucket for `host`/`direction` at `rate`
    /// bytes/sec. Starts the shared timer task on first use.
    pub fn configure(self: &Arc<Self>, host: &str, direction: Direction, rate_bytes_per_sec: u64) {
        {
            let mut hosts = self.hosts.lock().unwrap();
            let rec = hosts.entry(host.to_string()).or_insert_with(|| ThrottleRec {
                upload: None,
                download: None,
                resume_tx: watch::channel(0).0,
            });
            let bucket = TokenBucket::new(rate_bytes_per_sec);
            match direction {
                Direction::Upload => rec.upload = Some(bucket),
                Direction::Download => rec.download = Some(bucket),
            }
        }
        self.ensure_timer_started();
    }

    pub fn remove(&self, host: &str) {
        let mut hosts = self.hosts.lock().unwrap();
        hosts.remove(host);
        // "stopped on last-throttle-removed" is left to the timer's next
        // tick observing an empty map; the JoinHandle is cooperatively
        // stopped by the owner dropping the `Arc<Throttle>`.
    }

    fn ensure_timer_started(self: &Arc<Self>) {
        let mut handle = self.timer_handle.lock().unwrap();
        if handle.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                this.tick(Instant::now());
                if this.hosts.lock().unwrap().is_empty() {
                    break;
                }
            }
            this.timer_handle.lock().unwrap().take();
        }));
    }

    fn tick(&self, now: Instant) {
        let elapsed = {
            let mut last = self.last_tick.lock().unwrap();
            let elapsed = now.duration_since(*last);
            *last = now;
            elapsed
        };
        let mut hosts = self.hosts.lock().unwrap();
        for rec in hosts.values_mut() {
            if let Some(b) = rec.upload.as_mut() {
                b.refill(elapsed);
            }
            if let Some(b) = rec.download.as_mut() {
                b.refill(elapsed);
            }
            let _ = rec.resume_tx.send(rec.resume_tx.borrow().wrapping_add(1));
        }
    }

    /// Decrement the relevant bucket by `n` bytes.
    pub fn consume(&self, host: &str, direction: Direction, n: u64) {
        let mut hosts = self.hosts.lock().unwrap();
        if let Some(rec) = hosts.get_mut(host) {
            let bucket = match direction {
                Direction::Upload => rec.upload.as_mut(),
                Direction::Download => rec.download.as_mut(),
            };
            if let Some(b) = bucket {
                b.consume(n);
            }
        }
    }

    fn is_exhausted(&self, host: &str, direction: Direction) -> bool {
        let hosts = self.hosts.lock().unwrap();
        hosts
            .get(host)
            .and_then(|rec| match direction {
                Direction::Upload => rec.upload.as_ref(),
                Direction::Download => rec.download.as_ref(),
            })
            .map(|b| b.is_exhausted())
            .unwrap_or(false)
    }

    fn resume_receiver(&self, host: &str) -> Option<watch::Receiver<u64>> {
        self.hosts
            .lock()
            .unwrap()
            .get(host)
            .map(|rec| rec.resume_tx.subscribe())
    }

    /// Wait until the bucket for `host`/`direction` is no longer exhausted,
    /// bounded by a re-pollable wait on the host's resume signal.
    pub async fn wait_for_capacity(&self, host: &str, direction: Direction) {
        while self.is_exhausted(host, direction) {
            match self.resume_receiver(host) {
                Some(mut rx) => {
                    let _ = tokio::time::timeout(Duration::from_secs(2), rx.changed()).await;
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_overshoot_is_repaid_next_interval() {
        let mut b = TokenBucket::new(100);
        b.consume(150);
        assert!(b.is_exhausted());
        b.refill(Duration::from_secs(1));
        assert!(!b.is_exhausted());
    }

    #[test]
    fn bucket_balance_clamped_to_rate() {
        let mut b = TokenBucket::new(100);
        b.refill(Duration::from_secs(10));
        assert_eq!(b.balance, 100);
    }

    #[tokio::test]
    async fn configure_and_consume_roundtrip() {
        let throttle = Throttle::new();
        throttle.configure("host", Direction::Upload, 1000);
        throttle.consume("host", Direction::Upload, 500);
        assert!(!throttle.is_exhausted("host", Direction::Upload));
        throttle.consume("host", Direction::Upload, 600);
        assert!(throttle.is_exhausted("host", Direction::Upload));
    }
}
