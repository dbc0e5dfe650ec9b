//! HTTP gateway to the external spreadsheet/form/folder providers
//!
//! **[RCS-SRC-040]** One bounded network call per method. Transient failures
//! are retried with exponential backoff; a response indicating malformed or
//! absent data is never retried (it becomes an event-level failure upstream).

use super::{FolderEntry, FormResponse, Question, RawTable, SourceError, SourceGateway};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const DEFAULT_SHEETS_BASE: &str = "https://docs.google.com";
const DEFAULT_FORMS_BASE: &str = "https://forms.googleapis.com";
const DEFAULT_DRIVE_BASE: &str = "https://www.googleapis.com";
const RATE_LIMIT_MS: u64 = 200;
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 250;

/// Rate limiter spacing provider requests
pub struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    /// Wait if necessary to comply with the rate limit
    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Production gateway backed by reqwest
pub struct HttpSourceGateway {
    http_client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    sheets_base: String,
    forms_base: String,
    drive_base: String,
}

impl HttpSourceGateway {
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("Rollcall/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;

        Ok(Self {
            http_client,
            rate_limiter: Arc::new(RateLimiter::new(RATE_LIMIT_MS)),
            sheets_base: DEFAULT_SHEETS_BASE.to_string(),
            forms_base: DEFAULT_FORMS_BASE.to_string(),
            drive_base: DEFAULT_DRIVE_BASE.to_string(),
        })
    }

    /// Point the gateway at alternate provider bases (mirrors, test servers)
    pub fn with_bases(
        mut self,
        sheets_base: impl Into<String>,
        forms_base: impl Into<String>,
        drive_base: impl Into<String>,
    ) -> Self {
        self.sheets_base = sheets_base.into();
        self.forms_base = forms_base.into();
        self.drive_base = drive_base.into();
        self
    }

    /// GET with backoff on transient failures
    ///
    /// 4xx means the source is gone or not exportable: malformed, no retry.
    /// Network errors and 5xx are retried RETRY_ATTEMPTS times.
    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response, SourceError> {
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=RETRY_ATTEMPTS {
            self.rate_limiter.wait().await;

            match self.http_client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status.is_client_error() {
                        return Err(SourceError::Malformed(format!(
                            "{} answered {}",
                            url, status
                        )));
                    }
                    tracing::warn!(url, %status, attempt, "Provider error, backing off");
                }
                Err(e) if attempt == RETRY_ATTEMPTS => {
                    return Err(SourceError::Unreachable(e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(url, attempt, "Request failed, backing off: {}", e);
                }
            }

            tokio::time::sleep(delay).await;
            delay *= 2;
        }

        Err(SourceError::Unreachable(format!(
            "{} still failing after {} attempts",
            url, RETRY_ATTEMPTS
        )))
    }
}

#[derive(Debug, Deserialize)]
struct FormSchemaPayload {
    questions: Vec<Question>,
}

#[derive(Debug, Deserialize)]
struct FormResponsesPayload {
    responses: Vec<FormResponse>,
}

#[derive(Debug, Deserialize)]
struct FolderListingPayload {
    entries: Vec<FolderEntry>,
}

#[async_trait]
impl SourceGateway for HttpSourceGateway {
    async fn fetch_table(&self, provider_id: &str) -> Result<RawTable, SourceError> {
        let url = format!(
            "{}/spreadsheets/d/{}/export?format=csv",
            self.sheets_base, provider_id
        );
        let body = self
            .get_with_retry(&url)
            .await?
            .text()
            .await
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;

        parse_delimited(&body)
    }

    async fn fetch_form_schema(&self, provider_id: &str) -> Result<Vec<Question>, SourceError> {
        let url = format!("{}/v1/forms/{}", self.forms_base, provider_id);
        let payload: FormSchemaPayload = self
            .get_with_retry(&url)
            .await?
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        Ok(payload.questions)
    }

    async fn fetch_form_responses(
        &self,
        provider_id: &str,
    ) -> Result<Vec<FormResponse>, SourceError> {
        let url = format!("{}/v1/forms/{}/responses", self.forms_base, provider_id);
        let payload: FormResponsesPayload = self
            .get_with_retry(&url)
            .await?
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        Ok(payload.responses)
    }

    async fn list_folder(&self, folder_uri: &str) -> Result<Vec<FolderEntry>, SourceError> {
        let folder_id = resolve_folder_uri(folder_uri).ok_or_else(|| {
            SourceError::Malformed(format!("unresolvable folder uri: {}", folder_uri))
        })?;
        let url = format!(
            "{}/drive/v3/files?q='{}'+in+parents",
            self.drive_base, folder_id
        );
        let payload: FolderListingPayload = self
            .get_with_retry(&url)
            .await?
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        Ok(payload.entries)
    }
}

/// Resolve a folder URI to its provider id (fixed URL-pattern match)
pub fn resolve_folder_uri(uri: &str) -> Option<String> {
    let path = uri
        .strip_prefix("https://")
        .or_else(|| uri.strip_prefix("http://"))?;
    let mut segments = path.split('/');
    if segments.next()? != "drive.google.com" {
        return None;
    }
    match (segments.next(), segments.next(), segments.next()) {
        (Some("drive"), Some("folders"), Some(id)) if !id.is_empty() => {
            // Trailing query parameters are not part of the id
            Some(id.split('?').next().unwrap_or(id).to_string())
        }
        _ => None,
    }
}

/// Parse a comma-delimited export: row 1 labels, subsequent rows data
///
/// Handles quoted cells with embedded commas and doubled quotes; anything
/// structurally unrecoverable is a malformed-source error.
fn parse_delimited(body: &str) -> Result<RawTable, SourceError> {
    let mut records: Vec<Vec<String>> = Vec::new();

    for line in body.lines() {
        if line.is_empty() && records.is_empty() {
            continue;
        }
        records.push(split_record(line)?);
    }

    let mut records = records.into_iter();
    let headers = records
        .next()
        .ok_or_else(|| SourceError::Malformed("empty export".into()))?;

    Ok(RawTable {
        headers,
        rows: records.collect(),
    })
}

fn split_record(line: &str) -> Result<Vec<String>, SourceError> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    cell.push('"');
                } else {
                    quoted = false;
                }
            }
            '"' if cell.is_empty() => quoted = true,
            ',' if !quoted => {
                cells.push(std::mem::take(&mut cell));
            }
            c => cell.push(c),
        }
    }

    if quoted {
        return Err(SourceError::Malformed(format!(
            "unterminated quote in record: {}",
            line
        )));
    }

    cells.push(cell);
    Ok(cells)
}
