//! Record store client — cursor-paginated scans and partial payload patches.
//!
//! The store is treated purely as a scan/patch interface over a Qdrant-style
//! HTTP API: `scroll` yields `(records, next_cursor)` pages until the cursor
//! comes back `None`, and `set_payload` patches named fields on one record
//! without touching the rest. The client never reads vectors and never
//! issues full record overwrites.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use tagrail_shared::{Result, TagrailError, clip};

/// User-Agent string for store requests.
const USER_AGENT: &str = concat!("tagrail/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A record identifier — the store allows numeric and string ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Num(u64),
    Str(String),
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

/// One record as returned by a scroll page: opaque id plus its field map.
#[derive(Debug, Clone, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Record {
    /// The record's `tags` field as owned strings; empty when absent or
    /// not an array.
    pub fn tags(&self) -> Vec<String> {
        self.payload
            .get("tags")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Opaque scroll cursor. `None` from [`StoreClient::scroll`] means the
/// collection is exhausted.
pub type Cursor = Value;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ScrollRequest<'a> {
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<&'a Cursor>,
    with_payload: bool,
    with_vectors: bool,
}

#[derive(Debug, Deserialize)]
struct ScrollResponse {
    result: ScrollResult,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    points: Vec<Record>,
    #[serde(default)]
    next_page_offset: Option<Cursor>,
}

#[derive(Debug, Deserialize)]
struct CollectionsResponse {
    result: CollectionsResult,
}

#[derive(Debug, Deserialize)]
struct CollectionsResult {
    collections: Vec<CollectionEntry>,
}

#[derive(Debug, Deserialize)]
struct CollectionEntry {
    name: String,
}

#[derive(Debug, Serialize)]
struct SetPayloadRequest<'a> {
    payload: &'a Map<String, Value>,
    points: [&'a RecordId; 1],
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for the record store.
#[derive(Debug, Clone)]
pub struct StoreClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl StoreClient {
    /// Create a client for the given endpoint. The API key is optional —
    /// local instances run without auth.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| TagrailError::Network(format!("failed to build HTTP client: {e}")))?;

        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let mut req = self.http.request(method, url);
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }
        req
    }

    /// List all collection names, sorted.
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let resp = self
            .request(reqwest::Method::GET, "/collections")
            .send()
            .await
            .map_err(|e| TagrailError::Network(format!("list collections: {e}")))?;

        let resp = check_status(resp).await?;
        let body: CollectionsResponse = resp
            .json()
            .await
            .map_err(|e| TagrailError::Store(format!("collections response: {e}")))?;

        let mut names: Vec<String> = body
            .result
            .collections
            .into_iter()
            .map(|c| c.name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Fetch one page of records. Returns the page and the cursor for the
    /// next one; a `None` cursor signals exhaustion. Read-only.
    pub async fn scroll(
        &self,
        collection: &str,
        limit: u32,
        offset: Option<&Cursor>,
    ) -> Result<(Vec<Record>, Option<Cursor>)> {
        let body = ScrollRequest {
            limit,
            offset,
            with_payload: true,
            with_vectors: false,
        };

        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{collection}/points/scroll"),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| TagrailError::Network(format!("scroll {collection}: {e}")))?;

        let resp = check_status(resp).await?;
        let body: ScrollResponse = resp
            .json()
            .await
            .map_err(|e| TagrailError::Store(format!("scroll response: {e}")))?;

        debug!(
            collection,
            page_len = body.result.points.len(),
            has_next = body.result.next_page_offset.is_some(),
            "scroll page"
        );

        Ok((body.result.points, body.result.next_page_offset))
    }

    /// Patch named payload fields on a single record. Fields not present in
    /// `payload` are left untouched by the store.
    pub async fn set_payload(
        &self,
        collection: &str,
        record_id: &RecordId,
        payload: &Map<String, Value>,
    ) -> Result<()> {
        let body = SetPayloadRequest {
            payload,
            points: [record_id],
        };

        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{collection}/points/payload?wait=true"),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| TagrailError::Network(format!("set_payload {collection}: {e}")))?;

        check_status(resp).await?;
        Ok(())
    }
}

/// Map non-2xx responses to store errors, keeping the body for diagnostics.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    let body = resp.text().await.unwrap_or_default();
    Err(TagrailError::Store(format!(
        "{url}: HTTP {status}: {}",
        clip(&body, 200)
    )))
}
