//! Operation-layer entry point for presigned URLs (spec §4.10, §6 scenario
//! F). Thin wrapper over `signer::presign_v2_url`/`presign_v4_url` that
//! reads the scheme/host/port/credentials/region/v4-flag off a
//! `Connection` instead of asking the caller to repeat them.

use chrono::Utc;

use crate::config::Connection;
use crate::signer::{presign_v2_url, presign_v4_url};

/// Build a presigned GET URL for `bucket`/`key`, valid for `expires_secs`
/// (clamped to `[1, MAX_PRESIGN_EXPIRY_SECS]` by the v4 signer; the v2
/// signer takes the caller's `expires_unix` at face value per the spec's
/// v2 scenario, which has no such clamp).
///
/// Picks v2 or v4 framing from `connection.use_v4`, mirroring how ordinary
/// request signing already branches on that flag.
pub fn presign_get_url(connection: &Connection, bucket: &str, key: &str, expires_secs: i64) -> String {
    presign_url(connection, "GET", bucket, key, expires_secs)
}

pub fn presign_url(connection: &Connection, method: &str, bucket: &str, key: &str, expires_secs: i64) -> String {
    let resource_path = format!("/{bucket}/{key}");
    let scheme = if connection.use_tls { "https" } else { "http" };
    let port = match (connection.use_tls, connection.port) {
        (true, 443) | (false, 80) => None,
        (_, p) => Some(p),
    };
    if connection.use_v4 {
        presign_v4_url(
            scheme,
            &connection.host_label,
            port,
            &connection.access_key_id,
            &connection.secret_access_key,
            &connection.region,
            method,
            &resource_path,
            Utc::now(),
            expires_secs,
        )
    } else {
        let expires_unix = Utc::now().timestamp() + expires_secs;
        presign_v2_url(
            scheme,
            &connection.host_label,
            port,
            &connection.access_key_id,
            &connection.secret_access_key,
            method,
            &resource_path,
            expires_unix,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeContext;

    #[test]
    fn v2_presign_url_carries_three_query_params() {
        let runtime = RuntimeContext::new();
        let mut conn = Connection::new("example.com", "AKIDEXAMPLE", "secret", "us-east-1", runtime);
        conn.use_v4 = false;
        let url = presign_get_url(&conn, "bucket", "key", 3600);
        assert!(url.contains("AWSAccessKeyId=AKIDEXAMPLE"));
        assert!(url.contains("Expires="));
        assert!(url.contains("Signature="));
    }

    #[test]
    fn v4_presign_url_carries_amz_query_params() {
        let runtime = RuntimeContext::new();
        let conn = Connection::new("example.com", "AKIDEXAMPLE", "secret", "us-east-1", runtime);
        let url = presign_get_url(&conn, "bucket", "key", 3600);
        assert!(url.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(url.contains("X-Amz-Signature="));
    }
}
