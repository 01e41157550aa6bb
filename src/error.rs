//! Error taxonomy: transport vs HTTP vs S3-semantic vs TLS, carried together
//! on every operation result (spec §7).

use std::fmt;

/// The closed set of S3 error codes recognized from the `<Code>` element of
/// an `<Error>` response body. Grounded in `ECSUtil/S3Error.h`'s
/// `E_S3_ERROR_TYPE` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum S3ErrorCode {
    Success,
    Unknown,
    AccessDenied,
    AccountProblem,
    AmbiguousGrantByEmailAddress,
    BadDigest,
    BucketAlreadyExists,
    BucketAlreadyOwnedByYou,
    BucketNotEmpty,
    CredentialsNotSupported,
    CrossLocationLoggingProhibited,
    EntityTooSmall,
    EntityTooLarge,
    ExpiredToken,
    IllegalVersioningConfigurationException,
    IncompleteBody,
    IncorrectNumberOfFilesInPostRequest,
    InlineDataTooLarge,
    InternalError,
    InvalidAccessKeyId,
    InvalidAddressingHeader,
    InvalidArgument,
    InvalidBucketName,
    InvalidBucketState,
    InvalidDigest,
    InvalidEncryptionAlgorithmError,
    InvalidLocationConstraint,
    InvalidObjectState,
    InvalidPart,
    InvalidPartOrder,
    InvalidPayer,
    InvalidPolicyDocument,
    InvalidRange,
    InvalidRequest,
    InvalidSecurity,
    InvalidSOAPRequest,
    InvalidStorageClass,
    InvalidTargetBucketForLogging,
    InvalidToken,
    InvalidURI,
    KeyTooLong,
    MalformedACLError,
    MalformedPOSTRequest,
    MalformedXML,
    MaxMessageLengthExceeded,
    MaxPostPreDataLengthExceededError,
    MetadataTooLarge,
    MethodNotAllowed,
    MissingAttachment,
    MissingContentLength,
    MissingRequestBodyError,
    MissingSecurityElement,
    MissingSecurityHeader,
    NoLoggingStatusForKey,
    NoSuchBucket,
    NoSuchKey,
    NoSuchLifecycleConfiguration,
    NoSuchUpload,
    NoSuchVersion,
    NotImplemented,
    NotSignedUp,
    NotSuchBucketPolicy,
    OperationAborted,
    PermanentRedirect,
    PreconditionFailed,
    Redirect,
    RestoreAlreadyInProgress,
    RequestIsNotMultiPartContent,
    RequestTimeout,
    RequestTimeTooSkewed,
    RequestTorrentOfBucketError,
    SignatureDoesNotMatch,
    ServiceUnavailable,
    SlowDown,
    TemporaryRedirect,
    TokenRefreshRequired,
    TooManyBuckets,
    UnexpectedContent,
    UnresolvableGrantByEmailAddress,
    UserKeyMustBeSpecified,
    ObjectUnderRetention,
    MetadataSearchNotEnabled,
}

impl S3ErrorCode {
    /// Case-insensitive lookup against the wire `<Code>` text.
    pub fn from_code_str(code: &str) -> Self {
        match code.to_ascii_lowercase().as_str() {
            "success" => Self::Success,
            "accessdenied" => Self::AccessDenied,
            "accountproblem" => Self::AccountProblem,
            "ambiguousgrantbyemailaddress" => Self::AmbiguousGrantByEmailAddress,
            "baddigest" => Self::BadDigest,
            "bucketalreadyexists" => Self::BucketAlreadyExists,
            "bucketalreadyownedbyyou" => Self::BucketAlreadyOwnedByYou,
            "bucketnotempty" => Self::BucketNotEmpty,
            "credentialsnotsupported" => Self::CredentialsNotSupported,
            "crosslocationloggingprohibited" => Self::CrossLocationLoggingProhibited,
            "entitytoosmall" => Self::EntityTooSmall,
            "entitytoolarge" => Self::EntityTooLarge,
            "expiredtoken" => Self::ExpiredToken,
            "illegalversioningconfigurationexception" => {
                Self::IllegalVersioningConfigurationException
            }
            "incompletebody" => Self::IncompleteBody,
            "incorrectnumberoffilesinpostrequest" => Self::IncorrectNumberOfFilesInPostRequest,
            "inlinedatatoolarge" => Self::InlineDataTooLarge,
            "internalerror" => Self::InternalError,
            "invalidaccesskeyid" => Self::InvalidAccessKeyId,
            "invalidaddressingheader" => Self::InvalidAddressingHeader,
            "invalidargument" => Self::InvalidArgument,
            "invalidbucketname" => Self::InvalidBucketName,
            "invalidbucketstate" => Self::InvalidBucketState,
            "invaliddigest" => Self::InvalidDigest,
            "invalidencryptionalgorithmerror" => Self::InvalidEncryptionAlgorithmError,
            "invalidlocationconstraint" => Self::InvalidLocationConstraint,
            "invalidobjectstate" => Self::InvalidObjectState,
            "invalidpart" => Self::InvalidPart,
            "invalidpartorder" => Self::InvalidPartOrder,
            "invalidpayer" => Self::InvalidPayer,
            "invalidpolicydocument" => Self::InvalidPolicyDocument,
            "invalidrange" => Self::InvalidRange,
            "invalidrequest" => Self::InvalidRequest,
            "invalidsecurity" => Self::InvalidSecurity,
            "invalidsoaprequest" => Self::InvalidSOAPRequest,
            "invalidstorageclass" => Self::InvalidStorageClass,
            "invalidtargetbucketforlogging" => Self::InvalidTargetBucketForLogging,
            "invalidtoken" => Self::InvalidToken,
            "invaliduri" => Self::InvalidURI,
            "keytoolong" => Self::KeyTooLong,
            "malformedaclerror" => Self::MalformedACLError,
            "malformedpostrequest" => Self::MalformedPOSTRequest,
            "malformedxml" => Self::MalformedXML,
            "maxmessagelengthexceeded" => Self::MaxMessageLengthExceeded,
            "maxpostpredatalengthexceedederror" => Self::MaxPostPreDataLengthExceededError,
            "metadatatoolarge" => Self::MetadataTooLarge,
            "methodnotallowed" => Self::MethodNotAllowed,
            "missingattachment" => Self::MissingAttachment,
            "missingcontentlength" => Self::MissingContentLength,
            "missingrequestbodyerror" => Self::MissingRequestBodyError,
            "missingsecurityelement" => Self::MissingSecurityElement,
            "missingsecurityheader" => Self::MissingSecurityHeader,
            "nologgingstatusforkey" => Self::NoLoggingStatusForKey,
            "nosuchbucket" => Self::NoSuchBucket,
            "nosuchkey" => Self::NoSuchKey,
            "nosuchlifecycleconfiguration" => Self::NoSuchLifecycleConfiguration,
            "nosuchupload" => Self::NoSuchUpload,
            "nosuchversion" => Self::NoSuchVersion,
            "notimplemented" => Self::NotImplemented,
            "notsignedup" => Self::NotSignedUp,
            "notsuchbucketpolicy" => Self::NotSuchBucketPolicy,
            "operationaborted" => Self::OperationAborted,
            "permanentredirect" => Self::PermanentRedirect,
            "preconditionfailed" => Self::PreconditionFailed,
            "redirect" => Self::Redirect,
            "restorealreadyinprogress" => Self::RestoreAlreadyInProgress,
            "requestisnotmultipartcontent" => Self::RequestIsNotMultiPartContent,
            "requesttimeout" => Self::RequestTimeout,
            "requesttimetooskewed" => Self::RequestTimeTooSkewed,
            "requesttorrentofbucketerror" => Self::RequestTorrentOfBucketError,
            "signaturedoesnotmatch" => Self::SignatureDoesNotMatch,
            "serviceunavailable" => Self::ServiceUnavailable,
            "slowdown" => Self::SlowDown,
            "temporaryredirect" => Self::TemporaryRedirect,
            "tokenrefreshrequired" => Self::TokenRefreshRequired,
            "toomanybuckets" => Self::TooManyBuckets,
            "unexpectedcontent" => Self::UnexpectedContent,
            "unresolvablegrantbyemailaddress" => Self::UnresolvableGrantByEmailAddress,
            "userkeymustbespecified" => Self::UserKeyMustBeSpecified,
            "objectunderretention" => Self::ObjectUnderRetention,
            "metadatasearchnotenabled" => Self::MetadataSearchNotEnabled,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for S3ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Transport-layer classification, independent of whether the server was
/// ever reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    ConnectFailed,
    TlsHandshakeFailed,
    Timeout,
    OperationCancelled,
    InvalidServerResponse,
    HeaderNotFound,
    InvalidHeader,
    InvalidQuery,
    HeaderAlreadyExists,
    RedirectFailed,
    ProxyAuthFailed,
    Other,
}

impl TransportErrorKind {
    /// Whether this transport error qualifies the originating IP for the
    /// bad-IP map (§4.4): any transport-layer error except "operation
    /// cancelled" and "invalid server response".
    pub fn qualifies_for_bad_ip(self) -> bool {
        !matches!(
            self,
            Self::OperationCancelled | Self::InvalidServerResponse
        )
    }

    /// Whether the transport considers the server to have been reached
    /// (§7): a curated subset of "header/redirect/proxy" style codes.
    pub fn server_was_reached(self) -> bool {
        matches!(
            self,
            Self::HeaderNotFound
                | Self::InvalidHeader
                | Self::InvalidQuery
                | Self::HeaderAlreadyExists
                | Self::RedirectFailed
                | Self::ProxyAuthFailed
        )
    }
}

/// TLS secure-failure bitmask flags (accumulated OR'd across a connection's
/// lifetime, per §4.6 "Secure failures").
pub mod secure_error {
    pub const UNKNOWN_CA: u32 = 1 << 0;
    pub const CERT_EXPIRED: u32 = 1 << 1;
    pub const CN_MISMATCH: u32 = 1 << 2;
    pub const CERT_REVOKED: u32 = 1 << 3;
    pub const INVALID_CA: u32 = 1 << 4;
    pub const CERT_WRONG_USAGE: u32 = 1 << 5;
}

/// Extra context attached to a failed operation result (§7).
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub s3_resource: Option<String>,
    pub s3_request_id: Option<String>,
    pub details: Option<String>,
    pub host_addr: Option<String>,
    pub secure_error: u32,
    pub cert_info: Option<Vec<u8>>,
}

/// The top-level, typed error returned by every public operation.
#[derive(Debug, thiserror::Error)]
pub enum S3ClientError {
    #[error("transport error: {kind:?}: {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
        ctx: ErrorContext,
    },

    #[error("http {status}: {code}{}", message.as_ref().map(|m| format!(" ({m})")).unwrap_or_default())]
    Http {
        status: u16,
        code: S3ErrorCode,
        message: Option<String>,
        ctx: ErrorContext,
    },

    #[error("operation aborted")]
    Aborted,

    #[error("timed out")]
    Timeout,

    #[error("response length mismatch (expected {expected}, got {got})")]
    BadLength { expected: u64, got: u64 },

    #[error("multipart upload failed on part {part}: {source}")]
    MultipartPartFailed {
        part: u32,
        #[source]
        source: Box<S3ClientError>,
    },

    #[error("xml error: {0}")]
    Xml(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl S3ClientError {
    /// Cancellation is modeled as a non-retryable error (§7).
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Aborted | Self::Config(_))
    }

    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
            ctx: ErrorContext::default(),
        }
    }

    pub fn http(status: u16, code: S3ErrorCode, message: Option<String>) -> Self {
        Self::Http {
            status,
            code,
            message,
            ctx: ErrorContext::default(),
        }
    }

    /// The transport-error kind that classifies this failure, if any.
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub type S3Result<T> = Result<T, S3ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_code_str_is_case_insensitive() {
        assert_eq!(S3ErrorCode::from_code_str("NoSuchKey"), S3ErrorCode::NoSuchKey);
        assert_eq!(S3ErrorCode::from_code_str("nosuchkey"), S3ErrorCode::NoSuchKey);
        assert_eq!(S3ErrorCode::from_code_str("NOSUCHKEY"), S3ErrorCode::NoSuchKey);
    }

    #[test]
    fn from_code_str_unrecognized_maps_to_unknown() {
        assert_eq!(S3ErrorCode::from_code_str("TotallyMadeUpCode"), S3ErrorCode::Unknown);
    }

    #[test]
    fn qualifies_for_bad_ip_excludes_cancelled_and_invalid_response() {
        assert!(!TransportErrorKind::OperationCancelled.qualifies_for_bad_ip());
        assert!(!TransportErrorKind::InvalidServerResponse.qualifies_for_bad_ip());
        assert!(TransportErrorKind::ConnectFailed.qualifies_for_bad_ip());
        assert!(TransportErrorKind::TlsHandshakeFailed.qualifies_for_bad_ip());
    }

    #[test]
    fn server_was_reached_matches_curated_subset() {
        assert!(TransportErrorKind::HeaderNotFound.server_was_reached());
        assert!(TransportErrorKind::ProxyAuthFailed.server_was_reached());
        assert!(!TransportErrorKind::ConnectFailed.server_was_reached());
        assert!(!TransportErrorKind::Timeout.server_was_reached());
    }

    #[test]
    fn aborted_and_config_errors_are_not_retryable() {
        assert!(!S3ClientError::Aborted.is_retryable());
        assert!(!S3ClientError::Config("bad".into()).is_retryable());
        assert!(S3ClientError::Timeout.is_retryable());
        assert!(S3ClientError::transport(TransportErrorKind::ConnectFailed, "x").is_retryable());
    }

    #[test]
    fn transport_kind_only_present_on_transport_variant() {
        let err = S3ClientError::transport(TransportErrorKind::Timeout, "slow");
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Timeout));
        let http_err = S3ClientError::http(404, S3ErrorCode::NoSuchKey, None);
        assert_eq!(http_err.transport_kind(), None);
    }
}
