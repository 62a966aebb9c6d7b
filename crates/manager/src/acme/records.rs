//! Persisted record shapes
//!
//! These types are owned by certkeeper and define the on-disk format. They
//! never embed `instant-acme` types directly; the protocol adapter converts
//! between these records and live protocol objects, so the stored format does
//! not move when the protocol library does.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::AcmeError;

/// Issuance progress of a domain record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    /// Waiting for a challenge to be acquired
    Pending,
    /// Challenge acquired, waiting for validation and finalization
    Challenging,
    /// Certificate issued
    Available,
}

impl IssueStatus {
    /// Wire name of the status
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Challenging => "challenging",
            Self::Available => "available",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    ///
    /// The only edges are `pending -> challenging`,
    /// `challenging -> available` and the rollback `challenging -> pending`.
    pub fn can_transition_to(self, next: IssueStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Challenging)
                | (Self::Challenging, Self::Available)
                | (Self::Challenging, Self::Pending)
        )
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain validation method requested for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    /// DNS-01
    Dns,
}

impl ChallengeKind {
    /// Wire name used by the admin interface
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dns => "dns",
        }
    }
}

impl FromStr for ChallengeKind {
    type Err = AcmeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dns" => Ok(Self::Dns),
            other => Err(AcmeError::UnsupportedChallenge(other.to_string())),
        }
    }
}

/// Registered ACME account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Display name supplied at registration
    pub account_name: String,
    /// Contact mail addresses; the first one keys the account
    pub contacts: Vec<String>,
    /// Account URL assigned by the ACME server
    pub account_url: String,
    /// Encoded account credentials (signing key and directory binding)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_key: String,
    /// When the account was registered
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Primary contact address, used as the store key
    pub fn primary_mail(&self) -> &str {
        self.contacts.first().map(String::as_str).unwrap_or_default()
    }

    /// Copy of the account without key material, for public listings
    pub fn redacted(&self) -> Self {
        Self {
            private_key: String::new(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("account_name", &self.account_name)
            .field("contacts", &self.contacts)
            .field("account_url", &self.account_url)
            .field("has_private_key", &!self.private_key.is_empty())
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Serializable snapshot of a DNS-01 challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    /// Challenge type as named by the ACME server (`dns-01`)
    pub kind: String,
    /// Challenge URL, used to signal readiness
    pub url: String,
    pub token: String,
    /// Challenge status at the time of the snapshot
    pub status: String,
    pub key_authorization: String,
    /// Content of the `_acme-challenge` TXT record
    pub dns_value: String,
}

/// Serializable snapshot of an ACME order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Order URL, used to resume the order
    pub url: String,
    pub status: String,
    pub identifiers: Vec<String>,
}

/// Result of a successful challenge acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredChallenge {
    pub order: OrderRecord,
    pub challenge: ChallengeRecord,
    /// Challenge token
    pub token: String,
}

/// Key and certificate returned by a successful finalization
#[derive(Clone)]
pub struct IssuedCertificate {
    /// PEM-encoded private key
    pub key_pem: String,
    /// PEM-encoded certificate chain
    pub cert_pem: String,
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("cert_pem_len", &self.cert_pem.len())
            .finish_non_exhaustive()
    }
}

/// Files written for one issuance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateArtifact {
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
}

/// Per-domain issuance record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub domain: String,
    /// Primary contact of the owning account
    pub account_mail: String,
    pub challenge_type: ChallengeKind,
    pub status: IssueStatus,
    pub created_at: DateTime<Utc>,
    /// Set once, on the transition into `available`
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
    /// In-flight challenge; present only while `challenging`
    #[serde(default)]
    pub challenge_data: Option<ChallengeRecord>,
    /// In-flight order; present only while `challenging`
    #[serde(default)]
    pub order_data: Option<OrderRecord>,
    /// Files written on issuance
    #[serde(default)]
    pub certificate: Option<CertificateArtifact>,
    /// Failure that caused the most recent rollback
    #[serde(default)]
    pub last_error: Option<String>,
}

impl DomainRecord {
    /// New `pending` record
    pub fn new(
        domain: impl Into<String>,
        account_mail: impl Into<String>,
        challenge_type: ChallengeKind,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            domain: domain.into(),
            account_mail: account_mail.into(),
            challenge_type,
            status: IssueStatus::Pending,
            created_at,
            issued_at: None,
            challenge_data: None,
            order_data: None,
            certificate: None,
            last_error: None,
        }
    }
}

/// Check that `name` is a plain DNS name certkeeper can issue for
///
/// Wildcards are rejected. The name is also used in artifact file names, so
/// path separators never pass.
pub fn validate_domain(name: &str) -> Result<(), AcmeError> {
    let invalid = |reason: &str| AcmeError::InvalidDomain {
        domain: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() || name.len() > 253 {
        return Err(invalid("length must be between 1 and 253"));
    }

    for label in name.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(invalid("label length must be between 1 and 63"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("labels must not start or end with '-'"));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return Err(invalid("only letters, digits and '-' are allowed"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(contacts: &[&str]) -> Account {
        Account {
            account_name: "ops".to_string(),
            contacts: contacts.iter().map(|c| c.to_string()).collect(),
            account_url: "https://acme.test/acct/1".to_string(),
            private_key: "c2VjcmV0".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_transition_edges() {
        use IssueStatus::*;

        assert!(Pending.can_transition_to(Challenging));
        assert!(Challenging.can_transition_to(Available));
        assert!(Challenging.can_transition_to(Pending));

        assert!(!Pending.can_transition_to(Available));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Available.can_transition_to(Pending));
        assert!(!Available.can_transition_to(Challenging));
        assert!(!Challenging.can_transition_to(Challenging));
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&IssueStatus::Challenging).unwrap(),
            "\"challenging\""
        );
        assert_eq!(IssueStatus::Available.to_string(), "available");
    }

    #[test]
    fn test_challenge_kind_parse() {
        assert_eq!("dns".parse::<ChallengeKind>().unwrap(), ChallengeKind::Dns);
        assert!(matches!(
            "http".parse::<ChallengeKind>(),
            Err(AcmeError::UnsupportedChallenge(kind)) if kind == "http"
        ));
    }

    #[test]
    fn test_redacted_account_hides_key() {
        let account = account(&["a@x.com"]);
        let redacted = account.redacted();

        assert!(redacted.private_key.is_empty());
        assert_eq!(redacted.account_url, account.account_url);

        let json = serde_json::to_string(&redacted).unwrap();
        assert!(!json.contains("private_key"));
        assert!(!format!("{account:?}").contains("c2VjcmV0"));
    }

    #[test]
    fn test_primary_mail_is_first_contact() {
        let a = account(&["a@x.com", "b@x.com"]);
        let b = account(&["b@x.com", "a@x.com"]);
        let none = account(&[]);

        assert_eq!(a.primary_mail(), "a@x.com");
        assert_eq!(b.primary_mail(), "b@x.com");
        assert_eq!(none.primary_mail(), "");
    }

    #[test]
    fn test_domain_record_json_roundtrip_keeps_optional_fields_absent() {
        let record = DomainRecord::new("foo.com", "a@x.com", ChallengeKind::Dns, Utc::now());
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["status"], "pending");
        assert_eq!(json["challenge_type"], "dns");
        assert!(json["issued_at"].is_null());

        let decoded: DomainRecord = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_validate_domain() {
        assert!(validate_domain("foo.com").is_ok());
        assert!(validate_domain("a-b.sub.example.org").is_ok());

        assert!(validate_domain("").is_err());
        assert!(validate_domain("*.foo.com").is_err());
        assert!(validate_domain("foo..com").is_err());
        assert!(validate_domain("-foo.com").is_err());
        assert!(validate_domain("../etc/passwd").is_err());
        assert!(validate_domain(&"a".repeat(64)).is_err());
    }
}
