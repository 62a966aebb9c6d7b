//! Admin HTTP interface
//!
//! All parameters are passed as query strings. Every failure collapses to
//! `500 error occurs.`; the cause is only logged.
//!
//! | Endpoint | Params | Success |
//! |----------|--------|---------|
//! | `POST /register` | `mail`, `name` | `ok.` |
//! | `GET /list_account` | – | JSON accounts, keys redacted |
//! | `POST /new_issue` | `mail`, `challenge`, `domain` | `submit.` |
//! | `GET /list_issue` | – | JSON domain records |
//! | `GET /get_issue` | `domain` | JSON domain record |
//! | `POST /trigger_job` | – | `ok.` |
//! | `POST /delete_issue` | `domain` | `submit.` |
//! | `GET /metrics` | – | Prometheus text |

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::acme::{validate_domain, Account, ChallengeKind, DomainRecord};
use crate::app::AppState;
use crate::error::ManagerError;

const FAILURE_BODY: &str = "error occurs.";

/// Build the admin router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/list_account", get(list_account))
        .route("/new_issue", post(new_issue))
        .route("/list_issue", get(list_issue))
        .route("/get_issue", get(get_issue))
        .route("/trigger_job", post(trigger_job))
        .route("/delete_issue", post(delete_issue))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Handler failure; rendered as a bare 500
#[derive(Debug)]
pub struct AdminError(ManagerError);

impl<E: Into<ManagerError>> From<E> for AdminError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "Admin request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, FAILURE_BODY).into_response()
    }
}

type AdminResult<T> = Result<T, AdminError>;

fn required(value: Option<String>, name: &str) -> Result<String, ManagerError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ManagerError::invalid(format!("missing parameter '{name}'")))
}

#[derive(Debug, Deserialize)]
struct RegisterParams {
    mail: Option<String>,
    name: Option<String>,
}

async fn register(
    State(state): State<AppState>,
    Query(params): Query<RegisterParams>,
) -> AdminResult<&'static str> {
    let mail = required(params.mail, "mail")?;
    let name = required(params.name, "name")?;

    let account = state.adapter.register(&name, &[mail]).await?;
    if state.accounts.get(account.primary_mail()).is_ok() {
        warn!(mail = %account.primary_mail(), "Replacing existing account");
    }
    state.accounts.put(&account)?;

    info!(mail = %account.primary_mail(), name = %name, "Account registered");
    Ok("ok.")
}

async fn list_account(State(state): State<AppState>) -> AdminResult<Json<Vec<Account>>> {
    Ok(Json(state.accounts.list_redacted()?))
}

#[derive(Debug, Deserialize)]
struct NewIssueParams {
    mail: Option<String>,
    challenge: Option<String>,
    domain: Option<String>,
}

async fn new_issue(
    State(state): State<AppState>,
    Query(params): Query<NewIssueParams>,
) -> AdminResult<&'static str> {
    let mail = required(params.mail, "mail")?;
    let challenge: ChallengeKind = required(params.challenge, "challenge")?.parse()?;
    let domain = required(params.domain, "domain")?.to_ascii_lowercase();
    validate_domain(&domain)?;

    // The owning account must exist
    state.accounts.get(&mail)?;

    let record = DomainRecord::new(domain, mail, challenge, Utc::now());
    state.domains.create(&record)?;

    info!(
        domain = %record.domain,
        account = %record.account_mail,
        challenge = %challenge.as_str(),
        "Issuance requested"
    );
    Ok("submit.")
}

async fn list_issue(State(state): State<AppState>) -> AdminResult<Json<Vec<DomainRecord>>> {
    Ok(Json(state.domains.list()?))
}

#[derive(Debug, Deserialize)]
struct DomainParams {
    domain: Option<String>,
}

async fn get_issue(
    State(state): State<AppState>,
    Query(params): Query<DomainParams>,
) -> AdminResult<Json<DomainRecord>> {
    let domain = required(params.domain, "domain")?.to_ascii_lowercase();
    Ok(Json(state.domains.get(&domain)?))
}

async fn trigger_job(State(state): State<AppState>) -> &'static str {
    if state.scheduler.trigger().await.is_none() {
        warn!("Triggered batch did not complete");
    }
    "ok."
}

async fn delete_issue(
    State(state): State<AppState>,
    Query(params): Query<DomainParams>,
) -> AdminResult<&'static str> {
    let domain = required(params.domain, "domain")?.to_ascii_lowercase();
    state.domains.delete(&domain)?;
    Ok("submit.")
}

async fn metrics(State(state): State<AppState>) -> AdminResult<Response> {
    let body = state.metrics.encode()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::StorageError;

    #[test]
    fn test_required_trims_and_rejects_empty() {
        assert_eq!(
            required(Some(" a@x.com ".to_string()), "mail").unwrap(),
            "a@x.com"
        );
        assert!(required(Some("   ".to_string()), "mail").is_err());
        assert!(required(None, "mail").is_err());
    }

    #[test]
    fn test_error_response_hides_details() {
        let response =
            AdminError::from(StorageError::DomainExists("foo.com".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
