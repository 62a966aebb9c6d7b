//! Error types for the ACME lifecycle components

use thiserror::Error;

use certkeeper_store::StoreError;

use super::records::IssueStatus;

/// Errors raised by the protocol adapter
#[derive(Debug, Error)]
pub enum AcmeError {
    /// The ACME server or client library reported a failure
    #[error("ACME protocol error: {0}")]
    Protocol(#[from] instant_acme::Error),

    /// The directory endpoint could not be reached at startup
    #[error("ACME directory unreachable at {url}: {reason}")]
    DirectoryUnreachable { url: String, reason: String },

    /// Registration was attempted without a contact address
    #[error("an ACME account needs at least one contact address")]
    MissingContact,

    /// Stored account credentials could not be decoded
    #[error("invalid stored account credentials: {0}")]
    InvalidCredentials(String),

    /// A per-domain call was made before `load_account`
    #[error("no live ACME session for account {0}")]
    SessionNotLoaded(String),

    /// The new order carried no authorization
    #[error("order for {0} has no authorization")]
    NoAuthorization(String),

    /// The authorization does not offer a DNS-01 challenge
    #[error("no DNS-01 challenge offered for {0}")]
    ChallengeUnavailable(String),

    /// Requested challenge type is not supported
    #[error("unsupported challenge type: {0}")]
    UnsupportedChallenge(String),

    /// Domain name is not acceptable for issuance
    #[error("invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    /// Order cannot be finalized
    #[error("order for {domain} cannot be finalized: {detail}")]
    OrderInvalid { domain: String, detail: String },

    /// An outbound call or polling loop exceeded its budget
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        operation: &'static str,
        timeout_secs: u64,
    },

    /// Key pair or CSR generation failed
    #[error("key or CSR generation failed: {0}")]
    KeyGeneration(#[from] rcgen::Error),

    /// Generated key could not be re-encoded for output
    #[error("key encoding failed: {0}")]
    KeyEncoding(String),

    /// Credentials could not be serialized
    #[error("credential serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the record stores and the artifact writer
#[derive(Debug, Error)]
pub enum StorageError {
    /// Key-value store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Filesystem failure
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded
    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("domain not found: {0}")]
    DomainNotFound(String),

    /// Creation attempted for a domain that already has a record
    #[error("domain already has an issuance record: {0}")]
    DomainExists(String),
}

/// Errors raised by the lifecycle state machine
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Attempted edge is not part of the lifecycle
    #[error("illegal transition for {domain}: {from} -> {to}")]
    IllegalTransition {
        domain: String,
        from: IssueStatus,
        to: IssueStatus,
    },

    /// A `challenging` record lacks its order or challenge snapshot
    #[error("record for {0} is challenging but has no order/challenge data")]
    MissingChallengeState(String),
}
