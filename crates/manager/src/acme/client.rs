//! ACME protocol adapter
//!
//! [`ProtocolAdapter`] is the capability the lifecycle needs from an ACME
//! server. [`AcmeClient`] implements it on top of `instant-acme`, keeping one
//! live session per account and converting live protocol objects into the
//! owned [`OrderRecord`] / [`ChallengeRecord`] snapshots stored on domain
//! records.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use dashmap::DashMap;
use instant_acme::{
    Account as LiveAccount, AccountCredentials, Challenge, ChallengeType, Identifier,
    KeyAuthorization, NewAccount, NewOrder, Order, OrderStatus,
};
use p256::pkcs8::{DecodePrivateKey, LineEnding};
use p256::SecretKey;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P256_SHA256};
use tracing::{debug, info, warn};

use certkeeper_config::AcmeConfig;

use super::error::AcmeError;
use super::records::{
    Account, AcquiredChallenge, ChallengeRecord, IssuedCertificate, OrderRecord,
};

/// Interval between order and certificate polls
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Operations the lifecycle performs against an ACME server
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Create a new account with a fresh key for `contacts`
    async fn register(&self, account_name: &str, contacts: &[String])
        -> Result<Account, AcmeError>;

    /// Re-establish a live session for a stored account
    ///
    /// Must be called before any per-domain operation. Returns the account
    /// with its URL refreshed from the server.
    async fn load_account(&self, account: &Account) -> Result<Account, AcmeError>;

    /// Open an order for `domain` and select its DNS-01 challenge
    async fn acquire_challenge(
        &self,
        account: &Account,
        domain: &str,
    ) -> Result<AcquiredChallenge, AcmeError>;

    /// Complete a previously acquired challenge and download the certificate
    ///
    /// Generates a fresh key for every attempt. Nothing is persisted here.
    async fn finalize_challenge(
        &self,
        account: &Account,
        order: &OrderRecord,
        challenge: &ChallengeRecord,
        domain: &str,
    ) -> Result<IssuedCertificate, AcmeError>;
}

/// `instant-acme` backed protocol adapter
pub struct AcmeClient {
    directory_url: String,
    request_timeout: Duration,
    validation_timeout: Duration,
    /// Live sessions keyed by primary contact
    sessions: DashMap<String, Arc<LiveAccount>>,
}

impl std::fmt::Debug for AcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeClient")
            .field("directory_url", &self.directory_url)
            .field("request_timeout", &self.request_timeout)
            .field("validation_timeout", &self.validation_timeout)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl AcmeClient {
    /// Create a client for the configured directory without contacting it
    pub fn new(config: &AcmeConfig) -> Self {
        Self {
            directory_url: config.directory().to_string(),
            request_timeout: config.request_timeout(),
            validation_timeout: config.validation_timeout(),
            sessions: DashMap::new(),
        }
    }

    /// Create a client and check that the directory endpoint answers
    ///
    /// # Errors
    ///
    /// Returns [`AcmeError::DirectoryUnreachable`] if the directory cannot be
    /// fetched within the request timeout.
    pub async fn connect(config: &AcmeConfig) -> Result<Self, AcmeError> {
        let client = Self::new(config);
        let unreachable = |reason: String| AcmeError::DirectoryUnreachable {
            url: client.directory_url.clone(),
            reason,
        };

        let http = reqwest::Client::builder()
            .timeout(client.request_timeout)
            .build()
            .map_err(|e| unreachable(e.to_string()))?;

        http.get(&client.directory_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| unreachable(e.to_string()))?;

        info!(directory = %client.directory_url, "ACME directory reachable");
        Ok(client)
    }

    /// Directory URL this client talks to
    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    fn session(&self, account: &Account) -> Result<Arc<LiveAccount>, AcmeError> {
        let mail = account.primary_mail();
        self.sessions
            .get(mail)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AcmeError::SessionNotLoaded(mail.to_string()))
    }

    /// Run one outbound call under the request timeout
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, instant_acme::Error>>,
    ) -> Result<T, AcmeError> {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(AcmeError::Timeout {
                operation,
                timeout_secs: self.request_timeout.as_secs(),
            }),
        }
    }

    /// Poll until the order leaves `pending`/`processing`
    async fn wait_until_ready(&self, order: &mut Order, domain: &str) -> Result<(), AcmeError> {
        loop {
            self.bounded("order refresh", order.refresh()).await?;
            let state = order.state();
            debug!(domain = %domain, status = ?state.status, "Order status");

            match state.status {
                OrderStatus::Ready => return Ok(()),
                OrderStatus::Invalid => {
                    return Err(AcmeError::OrderInvalid {
                        domain: domain.to_string(),
                        detail: state
                            .error
                            .as_ref()
                            .map(|problem| format!("{problem:?}"))
                            .unwrap_or_else(|| "order became invalid".to_string()),
                    })
                }
                OrderStatus::Valid => {
                    // Already finalized with a key we no longer hold
                    return Err(AcmeError::OrderInvalid {
                        domain: domain.to_string(),
                        detail: "order was already finalized".to_string(),
                    });
                }
                OrderStatus::Pending | OrderStatus::Processing => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Poll until the issued chain can be downloaded
    async fn wait_for_certificate(
        &self,
        order: &mut Order,
        domain: &str,
    ) -> Result<String, AcmeError> {
        loop {
            match self.bounded("certificate download", order.certificate()).await? {
                Some(chain) => return Ok(chain),
                None => {
                    debug!(domain = %domain, "Certificate not yet available");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Run a polling loop under the validation timeout
    async fn within_validation<T>(
        &self,
        operation: &'static str,
        poll: impl Future<Output = Result<T, AcmeError>>,
    ) -> Result<T, AcmeError> {
        tokio::time::timeout(self.validation_timeout, poll)
            .await
            .unwrap_or(Err(AcmeError::Timeout {
                operation,
                timeout_secs: self.validation_timeout.as_secs(),
            }))
    }
}

#[async_trait]
impl ProtocolAdapter for AcmeClient {
    async fn register(
        &self,
        account_name: &str,
        contacts: &[String],
    ) -> Result<Account, AcmeError> {
        if contacts.is_empty() {
            return Err(AcmeError::MissingContact);
        }

        let uris: Vec<String> = contacts.iter().map(|mail| format!("mailto:{mail}")).collect();
        let contact: Vec<&str> = uris.iter().map(String::as_str).collect();
        let new_account = NewAccount {
            contact: &contact,
            terms_of_service_agreed: true,
            only_return_existing: false,
        };

        let (session, credentials) = self
            .bounded(
                "account registration",
                LiveAccount::create(&new_account, &self.directory_url, None),
            )
            .await?;

        let account = Account {
            account_name: account_name.to_string(),
            contacts: contacts.to_vec(),
            account_url: session.id().to_string(),
            private_key: encode_credentials(&credentials)?,
            created_at: Utc::now(),
        };

        self.sessions
            .insert(account.primary_mail().to_string(), Arc::new(session));

        info!(
            mail = %account.primary_mail(),
            account_url = %account.account_url,
            "Registered ACME account"
        );
        Ok(account)
    }

    async fn load_account(&self, account: &Account) -> Result<Account, AcmeError> {
        let credentials = decode_credentials(&account.private_key)?;
        let session = self
            .bounded("account load", LiveAccount::from_credentials(credentials))
            .await?;

        let mut refreshed = account.clone();
        let url = session.id().to_string();
        if url != account.account_url {
            warn!(
                mail = %account.primary_mail(),
                stored = %account.account_url,
                current = %url,
                "ACME account URL changed"
            );
            refreshed.account_url = url;
        }

        self.sessions
            .insert(account.primary_mail().to_string(), Arc::new(session));
        debug!(mail = %account.primary_mail(), "Loaded ACME session");
        Ok(refreshed)
    }

    async fn acquire_challenge(
        &self,
        account: &Account,
        domain: &str,
    ) -> Result<AcquiredChallenge, AcmeError> {
        let session = self.session(account)?;

        let identifiers = [Identifier::Dns(domain.to_string())];
        let mut order = self
            .bounded(
                "order creation",
                session.new_order(&NewOrder {
                    identifiers: &identifiers,
                }),
            )
            .await?;

        let authorizations = self
            .bounded("authorization fetch", order.authorizations())
            .await?;
        let authorization = authorizations
            .first()
            .ok_or_else(|| AcmeError::NoAuthorization(domain.to_string()))?;

        let challenge = authorization
            .challenges
            .iter()
            .find(|c| c.r#type == ChallengeType::Dns01)
            .ok_or_else(|| AcmeError::ChallengeUnavailable(domain.to_string()))?;

        let key_authorization = order.key_authorization(challenge);
        let challenge = challenge_record(challenge, &key_authorization);
        let order = order_record(&mut order, domain);

        info!(
            domain = %domain,
            order_url = %order.url,
            txt_record = %format!("_acme-challenge.{domain}"),
            txt_value = %challenge.dns_value,
            "Acquired DNS-01 challenge"
        );

        Ok(AcquiredChallenge {
            token: challenge.token.clone(),
            order,
            challenge,
        })
    }

    async fn finalize_challenge(
        &self,
        account: &Account,
        order: &OrderRecord,
        challenge: &ChallengeRecord,
        domain: &str,
    ) -> Result<IssuedCertificate, AcmeError> {
        let session = self.session(account)?;
        let mut live = self
            .bounded("order resume", session.order(order.url.clone()))
            .await?;

        if live.state().status == OrderStatus::Pending {
            self.bounded("challenge ready", live.set_challenge_ready(&challenge.url))
                .await?;
            debug!(domain = %domain, challenge_url = %challenge.url, "Challenge marked ready");
        }

        self.within_validation("challenge validation", self.wait_until_ready(&mut live, domain))
            .await?;

        let (key_pair, csr_der) = build_csr(domain)?;
        self.bounded("order finalization", live.finalize(&csr_der))
            .await?;
        info!(domain = %domain, "Order finalized, waiting for certificate");

        let cert_pem = self
            .within_validation(
                "certificate retrieval",
                self.wait_for_certificate(&mut live, domain),
            )
            .await?;

        Ok(IssuedCertificate {
            key_pem: sec1_key_pem(&key_pair)?,
            cert_pem,
        })
    }
}

/// Snapshot a live DNS-01 challenge
pub fn challenge_record(challenge: &Challenge, key_authorization: &KeyAuthorization) -> ChallengeRecord {
    ChallengeRecord {
        kind: "dns-01".to_string(),
        url: challenge.url.clone(),
        token: challenge.token.clone(),
        status: format!("{:?}", challenge.status).to_lowercase(),
        key_authorization: key_authorization.as_str().to_string(),
        dns_value: key_authorization.dns_value(),
    }
}

/// Snapshot a live order for `domain`
pub fn order_record(order: &mut Order, domain: &str) -> OrderRecord {
    OrderRecord {
        url: order.url().to_string(),
        status: format!("{:?}", order.state().status).to_lowercase(),
        identifiers: vec![domain.to_string()],
    }
}

/// Encode account credentials for storage on an [`Account`]
pub fn encode_credentials(credentials: &AccountCredentials) -> Result<String, AcmeError> {
    Ok(STANDARD.encode(serde_json::to_vec(credentials)?))
}

/// Decode credentials stored by [`encode_credentials`]
pub fn decode_credentials(encoded: &str) -> Result<AccountCredentials, AcmeError> {
    if encoded.is_empty() {
        return Err(AcmeError::InvalidCredentials("no key material".to_string()));
    }
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| AcmeError::InvalidCredentials(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| AcmeError::InvalidCredentials(e.to_string()))
}

/// Re-encode a generated P-256 key as an `EC PRIVATE KEY` PEM block
pub fn sec1_key_pem(key_pair: &KeyPair) -> Result<String, AcmeError> {
    let secret = SecretKey::from_pkcs8_der(key_pair.serialized_der())
        .map_err(|e| AcmeError::KeyEncoding(e.to_string()))?;
    let pem = secret
        .to_sec1_pem(LineEnding::LF)
        .map_err(|e| AcmeError::KeyEncoding(e.to_string()))?;
    Ok(pem.to_string())
}

/// Fresh P-256 key and a DER CSR with `CN = domain`
pub fn build_csr(domain: &str) -> Result<(KeyPair, Vec<u8>), AcmeError> {
    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;

    let mut params = CertificateParams::new(Vec::<String>::new())?;
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, domain);
    params.distinguished_name = name;

    let csr = params.serialize_request(&key_pair)?;
    Ok((key_pair, csr.der().to_vec()))
}
