//! PostgREST-style HTTP gateway.
//!
//! Rows are written to `<base_url>/rest/v1/<table>`. The HTTP client is
//! blocking, so every request runs on the blocking pool.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{RemoteError, RemoteGateway, RemoteReceipt};
use crate::record::{CaptureRecord, RecordFilter, GUEST_NAME};

const REST_PATH: &str = "rest/v1";

/// HTTP client for a PostgREST endpoint.
#[derive(Clone)]
pub struct RestGateway {
    base_url: String,
    table: String,
    api_key: Option<String>,
    access_token: Option<String>,
    timeout: Duration,
    agent: ureq::Agent,
}

impl std::fmt::Debug for RestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestGateway")
            .field("base_url", &self.base_url)
            .field("table", &self.table)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RestGateway {
    /// Create a gateway for `table` under `base_url`.
    #[must_use]
    pub fn new(base_url: &str, table: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            table: table.to_string(),
            api_key: None,
            access_token: None,
            timeout,
            agent,
        }
    }

    /// Set the project API key sent as `apikey`.
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Set the user's access token sent as the bearer token.
    #[must_use]
    pub fn with_access_token(mut self, access_token: Option<String>) -> Self {
        self.access_token = access_token;
        self
    }

    fn table_url(&self) -> String {
        format!("{}/{REST_PATH}/{}", self.base_url, self.table)
    }

    fn authorize(&self, request: ureq::Request) -> Result<ureq::Request, RemoteError> {
        let bearer = self
            .access_token
            .as_deref()
            .or(self.api_key.as_deref())
            .ok_or(RemoteError::NoSession)?;
        let mut request = request
            .set("Accept", "application/json")
            .set("Authorization", &format!("Bearer {}", bearer.trim()));
        if let Some(api_key) = &self.api_key {
            request = request.set("apikey", api_key.trim());
        }
        Ok(request)
    }

    fn timeout_millis(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

#[async_trait::async_trait]
impl RemoteGateway for RestGateway {
    async fn insert(&self, record: &CaptureRecord) -> Result<RemoteReceipt, RemoteError> {
        let request = self
            .authorize(self.agent.post(&self.table_url()))?
            .set("Content-Type", "application/json")
            .set("Prefer", "return=representation");
        let row = InsertRow::from(record);
        let timeout_millis = self.timeout_millis();

        let rows: Vec<RemoteRow> = run_blocking(move || {
            let response = request
                .send_json(&row)
                .map_err(|e| map_ureq_error(e, timeout_millis))?;
            response
                .into_json()
                .map_err(|e| RemoteError::InvalidResponse(e.to_string()))
        })
        .await?;

        let receipt = rows.into_iter().next().map_or_else(RemoteReceipt::default, |row| {
            RemoteReceipt {
                remote_id: row.id.map(|id| match id {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                }),
                created_at: row.created_at,
            }
        });
        debug!(remote_id = ?receipt.remote_id, "Remote insert accepted");
        Ok(receipt)
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<CaptureRecord>, RemoteError> {
        let mut request = self
            .authorize(self.agent.get(&self.table_url()))?
            .query("select", "*")
            .query("order", "created_at.desc");
        if let Some(unit) = &filter.unit {
            request = request.query("unit", &format!("eq.{unit}"));
        }
        if let Some(equipment) = &filter.equipment {
            request = request.query("equipment", &format!("eq.{equipment}"));
        }
        if let Some(date) = filter.date {
            request = request.query("date", &format!("eq.{date}"));
        }
        if let Some((from, to)) = filter.range() {
            request = request
                .query("date", &format!("gte.{from}"))
                .query("date", &format!("lte.{to}"));
        }
        let timeout_millis = self.timeout_millis();

        let rows: Vec<RemoteRow> = run_blocking(move || {
            let response = request
                .call()
                .map_err(|e| map_ureq_error(e, timeout_millis))?;
            response
                .into_json()
                .map_err(|e| RemoteError::InvalidResponse(e.to_string()))
        })
        .await?;

        Ok(rows.into_iter().map(RemoteRow::into_record).collect())
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, RemoteError>
where
    F: FnOnce() -> Result<T, RemoteError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RemoteError::Transport(format!("request task failed: {e}")))?
}

fn map_ureq_error(err: ureq::Error, timeout_millis: u64) -> RemoteError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            map_status_error(code, body, timeout_millis)
        }
        ureq::Error::Transport(transport) => {
            let message = transport.to_string();
            if message.contains("timed out") {
                RemoteError::Timeout {
                    millis: timeout_millis,
                }
            } else {
                RemoteError::Transport(message)
            }
        }
    }
}

fn map_status_error(code: u16, body: String, timeout_millis: u64) -> RemoteError {
    match code {
        401 | 403 => RemoteError::Unauthorized,
        408 | 504 => RemoteError::Timeout {
            millis: timeout_millis,
        },
        400 | 404 | 409 | 422 => RemoteError::Rejected(format!("HTTP {code}: {body}")),
        500..=599 => RemoteError::Server(format!("HTTP {code}: {body}")),
        _ => RemoteError::Transport(format!("HTTP {code}: {body}")),
    }
}

/// Row body for an insert.
#[derive(Debug, Serialize)]
struct InsertRow {
    unit: String,
    equipment: String,
    date: NaiveDate,
    parameters: BTreeMap<String, f64>,
    notes: Option<String>,
    user_id: Option<String>,
    user_name: String,
    timestamp: DateTime<Utc>,
    client_ref: String,
}

impl From<&CaptureRecord> for InsertRow {
    fn from(record: &CaptureRecord) -> Self {
        Self {
            unit: record.unit.clone(),
            equipment: record.equipment.clone(),
            date: record.date,
            parameters: record.parameters.clone(),
            notes: record.notes.clone(),
            user_id: record.author_id.clone(),
            user_name: record.author_name.clone(),
            timestamp: record.captured_at,
            client_ref: record.fingerprint.clone(),
        }
    }
}

/// Row as returned by the store.
#[derive(Debug, Deserialize)]
struct RemoteRow {
    #[serde(default)]
    id: Option<serde_json::Value>,
    unit: String,
    equipment: String,
    date: NaiveDate,
    #[serde(default)]
    parameters: BTreeMap<String, f64>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    client_ref: Option<String>,
}

impl RemoteRow {
    fn into_record(self) -> CaptureRecord {
        CaptureRecord {
            local_id: None,
            unit: self.unit,
            equipment: self.equipment,
            date: self.date,
            parameters: self.parameters,
            notes: self.notes,
            author_id: self.user_id,
            author_name: self.user_name.unwrap_or_else(|| GUEST_NAME.to_string()),
            captured_at: self.timestamp.or(self.created_at).unwrap_or_default(),
            synced: true,
            fingerprint: self.client_ref.unwrap_or_default(),
        }
    }
}
