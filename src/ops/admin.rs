//! Admin (ECS management) endpoints: `/login`, `/logout`, `/object/users`,
//! user secret keys. Same request pipeline as the S3 surface but over the
//! admin port, with HTTP authentication instead of request signing, and a
//! captured `X-SDS-AUTH-TOKEN` echoed on every subsequent call (spec
//! §4.10).

use std::sync::{Arc, RwLock};

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};

use crate::canonical::HeaderMap as CanonicalHeaders;
use crate::config::Connection;
use crate::engine::{DownloadSink, RequestEngine, RequestSpec, Transport, UploadBody};
use crate::error::{S3ClientError, TransportErrorKind};
use crate::xml::parsers::parse_admin_error_body;

pub const ADMIN_PORT: u16 = 4443;

/// Admin-mode requests never go through request signing (spec §4.10
/// "Signature calculation is bypassed in admin mode") and authenticate
/// instead over HTTP auth, capturing the server's session token.
pub struct AdminOps {
    connection: Arc<Connection>,
    transport: Arc<dyn Transport>,
    username: String,
    password: String,
    token: RwLock<Option<String>>,
}

impl AdminOps {
    /// Build an `AdminOps` over a `Connection` already pointed at the
    /// admin port (`Connection::with_port(ADMIN_PORT)`).
    pub fn new(connection: Arc<Connection>, transport: Arc<dyn Transport>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            connection,
            transport,
            username: username.into(),
            password: password.into(),
            token: RwLock::new(None),
        }
    }

    fn engine(&self) -> RequestEngine {
        RequestEngine::new(self.connection.clone(), self.transport.clone())
    }

    fn auth_headers(&self) -> CanonicalHeaders {
        let mut headers = CanonicalHeaders::new();
        if let Some(token) = self.token.read().unwrap().clone() {
            headers.insert("x-sds-auth-token", token, true);
        } else {
            let basic = B64.encode(format!("{}:{}", self.username, self.password));
            headers.insert("authorization", format!("Basic {basic}"), true);
        }
        headers
    }

    /// `GET /login`: authenticate with Basic auth, capture the returned
    /// `X-SDS-AUTH-TOKEN` for every subsequent call.
    pub async fn login(&self) -> Result<(), S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::GET,
            resource_path: "/login".to_string(),
            raw_query: String::new(),
            headers: self.auth_headers(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: true,
        };
        let outcome = self.engine().execute(spec).await.map_err(|e| self.classify(e))?;
        let token = outcome
            .headers
            .get("x-sds-auth-token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| S3ClientError::transport(TransportErrorKind::InvalidServerResponse, "login response missing X-SDS-AUTH-TOKEN"))?;
        *self.token.write().unwrap() = Some(token);
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::GET,
            resource_path: "/logout".to_string(),
            raw_query: String::new(),
            headers: self.auth_headers(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: true,
        };
        self.engine().execute(spec).await.map_err(|e| self.classify(e))?;
        *self.token.write().unwrap() = None;
        Ok(())
    }

    pub async fn list_users(&self) -> Result<bytes::Bytes, S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::GET,
            resource_path: "/object/users".to_string(),
            raw_query: String::new(),
            headers: self.auth_headers(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: true,
        };
        let outcome = self.engine().execute(spec).await.map_err(|e| self.classify(e))?;
        Ok(outcome.body.unwrap_or_default())
    }

    pub async fn get_user_secret_keys(&self, user_id: &str) -> Result<bytes::Bytes, S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::GET,
            resource_path: format!("/object/user-secret-keys/{user_id}"),
            raw_query: String::new(),
            headers: self.auth_headers(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: true,
        };
        let outcome = self.engine().execute(spec).await.map_err(|e| self.classify(e))?;
        Ok(outcome.body.unwrap_or_default())
    }

    /// Re-parse an error body against the ECS-admin `//error/*` casing
    /// rather than the S3 `//Error/*` one, since admin responses use a
    /// distinct element-name casing (spec §6).
    fn classify(&self, err: S3ClientError) -> S3ClientError {
        if let S3ClientError::Http { status, ctx, .. } = &err {
            if let Some(details) = &ctx.details {
                if let Ok(body) = parse_admin_error_body(details.as_bytes()) {
                    return S3ClientError::Http {
                        status: *status,
                        code: crate::error::S3ErrorCode::Unknown,
                        message: body.description,
                        ctx: ctx.clone(),
                    };
                }
            }
        }
        err
    }
}
