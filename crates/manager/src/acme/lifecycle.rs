//! Issuance state machine
//!
//! Pure transition functions over [`DomainRecord`]. Nothing here talks to the
//! network or the store; the scheduler calls the protocol adapter, feeds the
//! result into one of these functions, and commits whatever comes back.
//!
//! ```text
//!            acquire ok              finalize ok
//! pending ────────────────▶ challenging ────────────▶ available
//!    ▲                          │
//!    └──────── rollback ────────┘
//! ```

use chrono::{DateTime, Utc};

use super::error::LifecycleError;
use super::records::{
    AcquiredChallenge, CertificateArtifact, ChallengeRecord, DomainRecord, IssueStatus,
    OrderRecord,
};

/// Work the scheduler should do for a record on this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Open an order and fetch its DNS-01 challenge
    AcquireChallenge,
    /// Validate the stored challenge and download the certificate
    FinalizeChallenge,
    /// Nothing to do; renewal of issued certificates is not performed
    Idle,
}

/// Decide the next step for `record`
pub fn next_step(record: &DomainRecord) -> Step {
    match record.status {
        IssueStatus::Pending => Step::AcquireChallenge,
        IssueStatus::Challenging => Step::FinalizeChallenge,
        IssueStatus::Available => Step::Idle,
    }
}

fn check(record: &DomainRecord, to: IssueStatus) -> Result<(), LifecycleError> {
    if record.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(LifecycleError::IllegalTransition {
            domain: record.domain.clone(),
            from: record.status,
            to,
        })
    }
}

/// In-flight order and challenge of a `challenging` record
pub fn challenge_state(
    record: &DomainRecord,
) -> Result<(&OrderRecord, &ChallengeRecord), LifecycleError> {
    match (&record.order_data, &record.challenge_data) {
        (Some(order), Some(challenge)) => Ok((order, challenge)),
        _ => Err(LifecycleError::MissingChallengeState(record.domain.clone())),
    }
}

/// `pending -> challenging` with the acquired order and challenge attached
pub fn challenge_acquired(
    record: &DomainRecord,
    acquired: AcquiredChallenge,
) -> Result<DomainRecord, LifecycleError> {
    check(record, IssueStatus::Challenging)?;
    Ok(DomainRecord {
        status: IssueStatus::Challenging,
        order_data: Some(acquired.order),
        challenge_data: Some(acquired.challenge),
        last_error: None,
        ..record.clone()
    })
}

/// `challenging -> available`
///
/// `issued_at` is stamped with `now` unless the record already carries one.
pub fn issued(
    record: &DomainRecord,
    artifact: CertificateArtifact,
    now: DateTime<Utc>,
) -> Result<DomainRecord, LifecycleError> {
    check(record, IssueStatus::Available)?;
    Ok(DomainRecord {
        status: IssueStatus::Available,
        issued_at: record.issued_at.or(Some(now)),
        order_data: None,
        challenge_data: None,
        certificate: Some(artifact),
        last_error: None,
        ..record.clone()
    })
}

/// `challenging -> pending`, discarding the in-flight order
pub fn rolled_back(record: &DomainRecord, error: &str) -> Result<DomainRecord, LifecycleError> {
    check(record, IssueStatus::Pending)?;
    Ok(DomainRecord {
        status: IssueStatus::Pending,
        order_data: None,
        challenge_data: None,
        last_error: Some(error.to_string()),
        ..record.clone()
    })
}

/// Failed acquisition: the record stays `pending` and only remembers the error
pub fn acquire_failed(record: &DomainRecord, error: &str) -> Result<DomainRecord, LifecycleError> {
    if record.status != IssueStatus::Pending {
        return Err(LifecycleError::IllegalTransition {
            domain: record.domain.clone(),
            from: record.status,
            to: IssueStatus::Pending,
        });
    }
    Ok(DomainRecord {
        last_error: Some(error.to_string()),
        ..record.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::records::ChallengeKind;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn pending() -> DomainRecord {
        DomainRecord::new(
            "foo.com",
            "a@x.com",
            ChallengeKind::Dns,
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    fn acquired() -> AcquiredChallenge {
        AcquiredChallenge {
            order: OrderRecord {
                url: "https://acme.test/order/1".to_string(),
                status: "pending".to_string(),
                identifiers: vec!["foo.com".to_string()],
            },
            challenge: ChallengeRecord {
                kind: "dns-01".to_string(),
                url: "https://acme.test/chall/1".to_string(),
                token: "tok".to_string(),
                status: "pending".to_string(),
                key_authorization: "tok.thumb".to_string(),
                dns_value: "dnsvalue".to_string(),
            },
            token: "tok".to_string(),
        }
    }

    fn artifact() -> CertificateArtifact {
        CertificateArtifact {
            key_path: PathBuf::from("/certs/foo.com-20260101T000000Z.key.pem"),
            cert_path: PathBuf::from("/certs/foo.com-20260101T000000Z.cert.pem"),
        }
    }

    #[test]
    fn test_next_step_follows_status() {
        let mut record = pending();
        assert_eq!(next_step(&record), Step::AcquireChallenge);
        record.status = IssueStatus::Challenging;
        assert_eq!(next_step(&record), Step::FinalizeChallenge);
        record.status = IssueStatus::Available;
        assert_eq!(next_step(&record), Step::Idle);
    }

    #[test]
    fn test_full_issuance_path() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap();

        let challenging = challenge_acquired(&pending(), acquired()).unwrap();
        assert_eq!(challenging.status, IssueStatus::Challenging);
        let (order, challenge) = challenge_state(&challenging).unwrap();
        assert_eq!(order.url, "https://acme.test/order/1");
        assert_eq!(challenge.token, "tok");

        let available = issued(&challenging, artifact(), now).unwrap();
        assert_eq!(available.status, IssueStatus::Available);
        assert_eq!(available.issued_at, Some(now));
        assert!(available.order_data.is_none());
        assert!(available.challenge_data.is_none());
        assert_eq!(available.certificate, Some(artifact()));
        assert_eq!(available.created_at, pending().created_at);
    }

    #[test]
    fn test_rollback_clears_in_flight_state() {
        let challenging = challenge_acquired(&pending(), acquired()).unwrap();

        let rolled = rolled_back(&challenging, "validation failed").unwrap();

        assert_eq!(rolled.status, IssueStatus::Pending);
        assert!(rolled.order_data.is_none());
        assert!(rolled.challenge_data.is_none());
        assert_eq!(rolled.last_error.as_deref(), Some("validation failed"));
        assert!(challenge_state(&rolled).is_err());
    }

    #[test]
    fn test_acquire_failed_keeps_pending() {
        let record = acquire_failed(&pending(), "no dns-01").unwrap();
        assert_eq!(record.status, IssueStatus::Pending);
        assert_eq!(record.last_error.as_deref(), Some("no dns-01"));

        let challenging = challenge_acquired(&pending(), acquired()).unwrap();
        assert!(acquire_failed(&challenging, "x").is_err());
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        assert!(matches!(
            issued(&pending(), artifact(), Utc::now()),
            Err(LifecycleError::IllegalTransition {
                from: IssueStatus::Pending,
                to: IssueStatus::Available,
                ..
            })
        ));
        assert!(rolled_back(&pending(), "x").is_err());

        let challenging = challenge_acquired(&pending(), acquired()).unwrap();
        assert!(challenge_acquired(&challenging, acquired()).is_err());

        let available = issued(&challenging, artifact(), Utc::now()).unwrap();
        assert!(challenge_acquired(&available, acquired()).is_err());
        assert!(rolled_back(&available, "x").is_err());
        assert!(issued(&available, artifact(), Utc::now()).is_err());
    }

    #[test]
    fn test_missing_challenge_state() {
        let mut record = pending();
        record.status = IssueStatus::Challenging;
        assert!(matches!(
            challenge_state(&record),
            Err(LifecycleError::MissingChallengeState(domain)) if domain == "foo.com"
        ));
    }

    #[derive(Debug, Clone, Copy)]
    enum Event {
        Acquire,
        AcquireFail,
        Issue,
        Rollback,
    }

    fn arb_event() -> impl Strategy<Value = Event> {
        prop_oneof![
            Just(Event::Acquire),
            Just(Event::AcquireFail),
            Just(Event::Issue),
            Just(Event::Rollback),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Any sequence of outcomes only ever walks legal edges, and
        /// `issued_at` never moves once set.
        #[test]
        fn prop_only_legal_edges(events in prop::collection::vec(arb_event(), 0..40)) {
            let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
            let mut record = pending();

            for (i, event) in events.into_iter().enumerate() {
                let now = start + Duration::minutes(i as i64);
                let result = match event {
                    Event::Acquire => challenge_acquired(&record, acquired()),
                    Event::AcquireFail => acquire_failed(&record, "acquire"),
                    Event::Issue => issued(&record, artifact(), now),
                    Event::Rollback => rolled_back(&record, "finalize"),
                };

                if let Ok(next) = result {
                    prop_assert!(
                        next.status == record.status
                            || record.status.can_transition_to(next.status)
                    );
                    if let Some(stamp) = record.issued_at {
                        prop_assert_eq!(next.issued_at, Some(stamp));
                    }
                    if next.status == IssueStatus::Available {
                        prop_assert!(next.issued_at.is_some());
                    }
                    if next.status != IssueStatus::Challenging {
                        prop_assert!(next.challenge_data.is_none());
                        prop_assert!(next.order_data.is_none());
                    }
                    record = next;
                }
            }
        }
    }
}
