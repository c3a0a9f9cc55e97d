//! Error types.

use trust_dns_proto::error::ProtoError;
use trust_dns_proto::op::ResponseCode;

/// Error enumerates the possible srpd error states.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when a DNS UPDATE message violates the SRP profile: bad
    /// section counts, a malformed record, a missing KEY, or an SRV target
    /// that does not match the host. Answered with `FORMERR`.
    #[error("malformed SRP update: {0}")]
    Parse(&'static str),

    /// Returned when the update's zone section does not name the domain this
    /// server is authoritative for, or when a record falls outside that
    /// domain. Answered with `REFUSED`.
    #[error("update for zone \"{0}\" which this server is not authoritative for")]
    WrongZone(String),

    /// Returned when a message arrives while the server is not running.
    /// Answered with `REFUSED`.
    #[error("server is not running")]
    NotRunning,

    /// Returned when the SIG(0) record is missing, does not cover the
    /// message, or fails ECDSA-P256 verification against the update's KEY.
    /// Answered with `NOTAUTH`.
    #[error("update signature verification failed")]
    SignatureInvalid,

    /// Returned when a staged host or service instance name is already
    /// registered under a different key. Answered with `YXDOMAIN`.
    #[error("name \"{0}\" is registered to another key")]
    NameConflict(String),

    /// Returned when the service-update handler reported a failure for a
    /// staged update. Answered with `SERVFAIL`.
    #[error("service update handler rejected the update")]
    HandlerFailed,

    /// Returned when the service-update handler did not report a result
    /// before the transaction deadline. Answered with `SERVFAIL`.
    #[error("service update handler timed out")]
    ResponseTimeout,

    /// Returned when the server is disabled while a transaction is still
    /// outstanding. No response is sent; the client retransmits.
    #[error("update aborted by server shutdown")]
    Aborted,

    /// Returned when staging an update would exceed a DNS limit (name or
    /// TXT data length). Answered with `SERVFAIL`.
    #[error("update does not fit in registry buffers")]
    NoBufs,

    /// Returned when a configuration call is made in a state that forbids
    /// it, e.g. changing the domain while the server is running.
    #[error("operation not permitted in the current server state")]
    InvalidState,

    /// Returned for configuration values that fail validation, e.g. a lease
    /// range whose minimum exceeds its maximum.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Returned for a name that is empty or not expressible as a fully
    /// qualified domain name.
    #[error("invalid DNS name: \"{0}\"")]
    InvalidName(String),

    /// Returned when a generic IO error occurs.
    #[error("an IO error occurred")]
    Io(#[from] std::io::Error),

    /// Returned when processing JSON (e.g. loading a
    /// [`Config`][crate::config::Config]) fails.
    #[error("invalid JSON")]
    InvalidJson(#[from] serde_json::Error),

    /// Returned when the DNS codec rejects a message or a name.
    #[error("DNS error")]
    Dns(#[from] ProtoError),
}

impl Error {
    /// The DNS response code reported to the client for this error.
    #[must_use]
    pub fn response_code(&self) -> ResponseCode {
        match self {
            Error::Parse(_) | Error::InvalidName(_) | Error::Dns(_) => ResponseCode::FormErr,
            Error::WrongZone(_) | Error::NotRunning => ResponseCode::Refused,
            Error::SignatureInvalid => ResponseCode::NotAuth,
            Error::NameConflict(_) => ResponseCode::YXDomain,
            _ => ResponseCode::ServFail,
        }
    }
}
