//! API client for communicating with the school pickup REST API.
//!
//! This module provides the `ApiClient` struct for making authenticated
//! requests to list directory records, submit scans and edit authorizations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{ApiError, PickupApi};
use crate::error::{Error, Result};
use crate::models::{
    Agent, Child, EntityKind, EntityRecord, ListQuery, Page, Parent, ProposedScan, Recuperator,
    ScanEvent, ScanReceipt, ScanWarning,
};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// Scanner stations sit on school Wi-Fi; 15s fails fast enough to retry a scan by hand.
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Rejection reason the backend uses for exits by a non-authorized recuperator
const UNAUTHORIZED_PICKUP_REASON: &str = "UnauthorizedPickup";

// ============================================================================
// Wire types (internal only)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SubmitScanResponse {
    Accepted {
        accepted: ScanEvent,
        #[serde(default)]
        warnings: Vec<String>,
    },
    Rejected {
        rejected: ScanRejection,
    },
}

#[derive(Debug, Deserialize)]
struct ScanRejection {
    reason: String,
    #[serde(rename = "childCode")]
    child_code: Option<String>,
    #[serde(rename = "recuperatorCode")]
    recuperator_code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssignChildrenRequest<'a> {
    #[serde(rename = "childCodes")]
    child_codes: &'a [String],
}

/// 422 body returned when an assignment references children of another family
#[derive(Debug, Deserialize)]
struct ReferentialViolationBody {
    #[serde(rename = "parentCode")]
    parent_code: Option<String>,
    #[serde(rename = "invalidChildren", default)]
    invalid_children: Vec<String>,
}

fn parse_warnings(raw: Vec<String>) -> Vec<ScanWarning> {
    raw.into_iter()
        .filter_map(|w| match serde_json::from_value::<ScanWarning>(serde_json::Value::String(w.clone())) {
            Ok(warning) => Some(warning),
            Err(_) => {
                debug!(warning = %w, "Ignoring unknown scan warning");
                None
            }
        })
        .collect()
}

/// Map a backend refusal to the typed scan error.
fn scan_rejection(rejected: ScanRejection, scan: &ProposedScan) -> Error {
    if rejected.reason != UNAUTHORIZED_PICKUP_REASON {
        warn!(reason = %rejected.reason, "Scan rejected");
        return Error::Validation(rejected.message.unwrap_or(rejected.reason));
    }
    let child = rejected.child_code.unwrap_or_else(|| scan.child_code.clone());
    let recuperator = rejected
        .recuperator_code
        .or_else(|| scan.recuperator_code.clone())
        .unwrap_or_default();
    warn!(child = %child, recuperator = %recuperator, "Scan rejected: unauthorized pickup");
    Error::UnauthorizedPickup { child, recuperator }
}

/// The backend may send its `rejected` body with a 403 or 422 instead of a 200.
/// A refusal must surface as the typed rejection whatever the status.
fn refused_scan(err: ApiError, scan: &ProposedScan) -> Error {
    let rejected = err
        .rejection_body()
        .and_then(|body| serde_json::from_str::<SubmitScanResponse>(body).ok());
    match rejected {
        Some(SubmitScanResponse::Rejected { rejected }) => scan_rejection(rejected, scan),
        _ => err.into(),
    }
}

/// API client for the pickup backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    token: Option<Arc<String>>,
    page_size: Option<u32>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(ApiError::from)?;

        let base_url = Url::parse(base_url.trim())
            .map_err(|e| Error::Validation(format!("invalid API base URL {:?}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Validation(format!("API base URL {} cannot carry a path", base_url)));
        }

        Ok(Self {
            client,
            base_url,
            token: None,
            page_size: None,
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: Arc<String>) {
        self.token = Some(token);
    }

    /// Ask list endpoints for this many rows per page instead of the backend default.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Join path segments onto the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> std::result::Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidResponse(format!("base URL {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn auth_headers(&self) -> std::result::Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(ref token) = self.token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::Unauthorized)?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> std::result::Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send a request, retrying rate-limited responses with exponential backoff.
    async fn send(
        &self,
        build: impl Fn() -> RequestBuilder,
    ) -> std::result::Result<reqwest::Response, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = build().headers(self.auth_headers()?).send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    async fn request_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &[&str],
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> std::result::Result<T, ApiError> {
        let url = self.url(path)?;
        let response = self
            .send(|| {
                let mut req = self.client.request(method.clone(), url.clone()).query(query);
                if let Some(body) = body {
                    req = req.json(body);
                }
                req
            })
            .await?;

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("{} ({} bytes from {})", e, text.len(), url)))
    }

    async fn request_empty<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &[&str],
        body: Option<&B>,
    ) -> std::result::Result<(), ApiError> {
        let url = self.url(path)?;
        self.send(|| {
            let req = self.client.request(method.clone(), url.clone());
            match body {
                Some(body) => req.json(body),
                None => req,
            }
        })
        .await?;
        Ok(())
    }

    async fn list_page<T: DeserializeOwned>(
        &self,
        query: &ListQuery,
    ) -> std::result::Result<Page<T>, ApiError> {
        let mut params = vec![
            ("page", query.page.to_string()),
            ("status", query.status.as_param().to_string()),
        ];
        if !query.search.is_empty() {
            params.push(("search", query.search.clone()));
        }
        if let Some(page_size) = self.page_size {
            params.push(("per_page", page_size.to_string()));
        }
        self.request_json::<Page<T>, ()>(Method::GET, &[query.kind.collection()], &params, None)
            .await
    }

    async fn by_code<T: DeserializeOwned>(
        &self,
        kind: EntityKind,
        code: &str,
    ) -> Result<T> {
        self.request_json::<T, ()>(Method::GET, &[kind.collection(), "code", code], &[], None)
            .await
            .map_err(|e| match e {
                ApiError::NotFound(_) => Error::not_found(kind, code),
                other => other.into(),
            })
    }
}

#[async_trait]
impl PickupApi for ApiClient {
    async fn list_entities(&self, query: &ListQuery) -> Result<Page<EntityRecord>> {
        debug!(kind = %query.kind, page = query.page, search = %query.search, "Listing entities");
        let page = match query.kind {
            EntityKind::Parent => self.list_page::<Parent>(query).await?.map(EntityRecord::Parent),
            EntityKind::Child => self.list_page::<Child>(query).await?.map(EntityRecord::Child),
            EntityKind::Recuperator => self
                .list_page::<Recuperator>(query)
                .await?
                .map(EntityRecord::Recuperator),
            EntityKind::Agent => self.list_page::<Agent>(query).await?.map(EntityRecord::Agent),
        };
        Ok(page)
    }

    async fn get_entity_by_code(&self, kind: EntityKind, code: &str) -> Result<EntityRecord> {
        if code.trim().is_empty() {
            return Err(Error::Validation(format!("empty {} code", kind)));
        }
        let record = match kind {
            EntityKind::Parent => EntityRecord::Parent(self.by_code(kind, code).await?),
            EntityKind::Child => EntityRecord::Child(self.by_code(kind, code).await?),
            EntityKind::Recuperator => EntityRecord::Recuperator(self.by_code(kind, code).await?),
            EntityKind::Agent => EntityRecord::Agent(self.by_code(kind, code).await?),
        };
        Ok(record)
    }

    async fn submit_scan(&self, scan: &ProposedScan) -> Result<ScanReceipt> {
        let response: SubmitScanResponse = self
            .request_json(Method::POST, &["scans"], &[], Some(scan))
            .await
            .map_err(|e| refused_scan(e, scan))?;

        match response {
            SubmitScanResponse::Accepted { accepted, warnings } => {
                let warnings = parse_warnings(warnings);
                info!(
                    id = accepted.id,
                    child = %accepted.child_code,
                    scan_type = %accepted.scan_type,
                    warnings = warnings.len(),
                    "Scan accepted"
                );
                Ok(ScanReceipt {
                    event: accepted,
                    warnings,
                })
            }
            SubmitScanResponse::Rejected { rejected } => Err(scan_rejection(rejected, scan)),
        }
    }

    async fn list_scans_for_child(&self, child_code: &str, page: u32) -> Result<Page<ScanEvent>> {
        let path = ["children", child_code, "scans"];
        self.request_json::<Page<ScanEvent>, ()>(Method::GET, &path, &[("page", page.max(1).to_string())], None)
            .await
            .map_err(|e| match e {
                ApiError::NotFound(_) => Error::not_found(EntityKind::Child, child_code),
                other => other.into(),
            })
    }

    async fn assign_authorized_children(
        &self,
        recuperator_code: &str,
        child_codes: &[String],
    ) -> Result<()> {
        let path = ["recuperators", recuperator_code, "children"];
        let body = AssignChildrenRequest { child_codes };
        match self.request_empty(Method::PUT, &path, Some(&body)).await {
            Ok(()) => Ok(()),
            Err(ApiError::NotFound(_)) => Err(Error::not_found(EntityKind::Recuperator, recuperator_code)),
            Err(ApiError::Validation(body)) => {
                // Referential failures carry the offending codes; anything else stays a plain validation error
                match serde_json::from_str::<ReferentialViolationBody>(&body) {
                    Ok(v) if !v.invalid_children.is_empty() => {
                        warn!(recuperator = %recuperator_code, invalid = ?v.invalid_children, "Assignment rejected");
                        Err(Error::ReferentialViolation {
                            recuperator: recuperator_code.to_string(),
                            parent: v.parent_code.unwrap_or_default(),
                            children: v.invalid_children,
                        })
                    }
                    _ => Err(ApiError::Validation(body).into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save_parent(&self, parent: &Parent) -> Result<Parent> {
        Ok(self
            .request_json(Method::PUT, &["parents", parent.code.as_str()], &[], Some(parent))
            .await?)
    }

    async fn remove_child(&self, child_code: &str) -> Result<()> {
        self.request_empty::<()>(Method::DELETE, &["children", child_code], None)
            .await
            .map_err(|e| match e {
                ApiError::NotFound(_) => Error::not_found(EntityKind::Child, child_code),
                other => other.into(),
            })
    }

    async fn restore_child(&self, child_code: &str) -> Result<()> {
        self.request_empty::<()>(Method::POST, &["children", child_code, "restore"], None)
            .await
            .map_err(|e| match e {
                ApiError::NotFound(_) => Error::not_found(EntityKind::Child, child_code),
                other => other.into(),
            })
    }
}
