//! `Connection`: the configuration root for a single S3 endpoint (spec §3).
//!
//! Mirrors the teacher's `VaultConfig` (`vault.rs`) in spirit — a plain,
//! cloneable, caller-assembled struct with no CLI/env loading of its own.

use std::sync::Arc;
use std::time::Duration;

use crate::runtime::RuntimeContext;

/// TLS protocol versions a connection may negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsProtocolMask {
    pub tls12: bool,
    pub tls13: bool,
}

impl Default for TlsProtocolMask {
    fn default() -> Self {
        Self {
            tls12: true,
            tls13: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Timeouts for each phase of a request (spec §4.6, §5).
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub receive_response: Duration,
    pub receive: Duration,
    pub send: Duration,
    pub bad_ip_ttl: Duration,
    pub connect_retries: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            receive_response: Duration::from_secs(60),
            receive: Duration::from_secs(60),
            send: Duration::from_secs(60),
            // badIPAddrAge: 0 -> default 12 minutes (spec §6).
            bad_ip_ttl: Duration::from_secs(12 * 60),
            connect_retries: 3,
        }
    }
}

const MIN_V4_CHUNK_SIZE: usize = 8 * 1024;
const DEFAULT_V4_CHUNK_SIZE: usize = 64 * 1024;

/// Configuration root for a single S3 endpoint. Cheaply `Clone`-able; all
/// internal state (session pool, bad-IP map, signing-key cache) is keyed
/// off the `(host, access_key_id)` identity of a `Connection`, not off this
/// struct's address.
#[derive(Clone)]
pub struct Connection {
    pub host_label: String,
    pub candidate_ips: Vec<String>,
    pub use_tls: bool,
    pub port: u16,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub proxy: Option<ProxyConfig>,
    pub user_agent: String,
    pub tls_protocol_mask: TlsProtocolMask,
    pub timeouts: Timeouts,
    pub max_write_request: usize,
    pub max_retry_count: u32,
    pub pause_between_retries: Duration,
    pub pause_after_500: Duration,
    v4_chunk_size: usize,
    pub use_v4: bool,
    /// Shared process-wide state (session pool, bad-IP map, throttle map).
    pub runtime: Arc<RuntimeContext>,
}

impl Connection {
    pub fn new(
        host_label: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
        runtime: Arc<RuntimeContext>,
    ) -> Self {
        let host_label = host_label.into();
        Self {
            candidate_ips: vec![host_label.clone()],
            host_label,
            use_tls: true,
            port: 443,
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            region: region.into(),
            proxy: None,
            user_agent: "ecs-s3-client".to_string(),
            tls_protocol_mask: TlsProtocolMask::default(),
            timeouts: Timeouts::default(),
            max_write_request: 0,
            // maxRetryCount: 0 -> default 5 (spec §6).
            max_retry_count: 5,
            pause_between_retries: Duration::from_millis(500),
            pause_after_500: Duration::from_secs(1),
            v4_chunk_size: DEFAULT_V4_CHUNK_SIZE,
            use_v4: true,
            runtime,
        }
    }

    pub fn with_candidate_ips(mut self, ips: Vec<String>) -> Self {
        self.candidate_ips = ips;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_max_retry_count(mut self, n: u32) -> Self {
        self.max_retry_count = if n == 0 { 5 } else { n };
        self
    }

    /// v4 streaming chunk size in bytes. Clamped to a minimum of 8 KiB per
    /// the open question in spec §9 ("retain the clamp").
    pub fn v4_chunk_size(&self) -> usize {
        self.v4_chunk_size
    }

    pub fn with_v4_chunk_size(mut self, size: usize) -> Self {
        self.v4_chunk_size = size.max(MIN_V4_CHUNK_SIZE);
        self
    }

    pub fn scheme(&self) -> &'static str {
        if self.use_tls {
            "https"
        } else {
            "http"
        }
    }

    /// Identity used to key process-wide per-connection state (session
    /// pool, signing-key cache): distinct connections to the same host
    /// under different credentials must not share a signing key.
    pub fn identity(&self) -> String {
        format!("{}:{}@{}", self.access_key_id, self.host_label, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        Connection::new("host.example.com", "AKID", "secret", "us-east-1", RuntimeContext::new())
    }

    #[test]
    fn new_defaults_candidate_ips_to_host_label() {
        let c = conn();
        assert_eq!(c.candidate_ips, vec!["host.example.com".to_string()]);
        assert_eq!(c.scheme(), "https");
        assert_eq!(c.max_retry_count, 5);
    }

    #[test]
    fn with_max_retry_count_zero_falls_back_to_default() {
        let c = conn().with_max_retry_count(0);
        assert_eq!(c.max_retry_count, 5);
        let c = conn().with_max_retry_count(10);
        assert_eq!(c.max_retry_count, 10);
    }

    #[test]
    fn v4_chunk_size_clamps_to_8kib_minimum() {
        let c = conn().with_v4_chunk_size(1024);
        assert_eq!(c.v4_chunk_size(), MIN_V4_CHUNK_SIZE);
        let c = conn().with_v4_chunk_size(32 * 1024);
        assert_eq!(c.v4_chunk_size(), 32 * 1024);
    }

    #[test]
    fn identity_keys_on_access_key_host_and_port() {
        let c = conn().with_port(8080);
        assert_eq!(c.identity(), "AKID:host.example.com@8080");
    }
}
