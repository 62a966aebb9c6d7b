//! ACME certificate lifecycle
//!
//! Drives each requested domain from a pending request to an issued
//! certificate using DNS-01 validation.
//!
//! # Architecture
//!
//! - [`AccountStore`] / [`DomainStore`] - Persistent records in the key-value store
//! - [`ProtocolAdapter`] - Capability trait over the ACME server, implemented
//!   by [`AcmeClient`] on top of `instant-acme`
//! - [`lifecycle`] - Pure transition functions of the issuance state machine
//! - [`IssuanceScheduler`] - Background task that advances due records
//! - [`CertificateStorage`] - Writes issued keys and certificates to disk
//!
//! # Issuance Flow
//!
//! 1. The admin interface creates a `pending` [`DomainRecord`]
//! 2. On the next tick the scheduler loads the owning account and asks the
//!    adapter for a DNS-01 challenge; the record becomes `challenging` and
//!    carries the order and challenge snapshots
//! 3. The TXT value is published at `_acme-challenge.<domain>` outside of
//!    certkeeper
//! 4. On a later tick the adapter finalizes the order with a fresh key; the
//!    key and certificate are written to disk and the record becomes
//!    `available`
//! 5. Any finalization failure rolls the record back to `pending` and the
//!    flow restarts from step 2

mod accounts;
mod client;
mod domains;
pub(crate) mod error;
pub mod lifecycle;
mod records;
mod scheduler;
mod storage;

pub use accounts::{account_key, AccountStore, ACCOUNT_PREFIX};
pub use client::{
    build_csr, challenge_record, decode_credentials, encode_credentials, order_record,
    sec1_key_pem, AcmeClient, ProtocolAdapter,
};
pub use domains::{domain_key, DomainStore, DOMAIN_PREFIX};
pub use error::{AcmeError, LifecycleError, StorageError};
pub use lifecycle::Step;
pub use records::{
    validate_domain, Account, AcquiredChallenge, CertificateArtifact, ChallengeKind,
    ChallengeRecord, DomainRecord, IssueStatus, IssuedCertificate, OrderRecord,
};
pub use scheduler::{delay_until_hour, BatchReport, IssuanceScheduler};
pub use storage::CertificateStorage;
