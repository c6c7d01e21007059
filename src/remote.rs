#![doc = "HTTP implementation of the engine's RemoteStore contract against a Notion-style document API."]
//
//! # Remote store over HTTP
//!
//! [`NotionClient`] translates each [`RemoteStore`] primitive into one or
//! more requests against the document API and maps HTTP failures onto
//! [`RemoteError`] so the engine can tell "gone" from "archived" from "try
//! again".
//!
//! ## Client Usage
//! - Construct with [`NotionClient::new`] from a [`NotionConfig`] (the CLI
//!   fills the token from `NOTION_API_KEY`).
//! - Wrap it in `tree_sync_core::client::RemoteClient` for throttling and
//!   retries; this type performs every request exactly once.
//!
//! ## Status mapping
//! | status                     | error              |
//! |----------------------------|--------------------|
//! | 404                        | `NotFound`         |
//! | 400 mentioning "archived"  | `ArchivedAncestor` |
//! | other 400                  | `Validation`       |
//! | 401, 403                   | `Unauthorized`     |
//! | 429                        | `RateLimited`      |
//! | 409, 5xx, network, timeout | `Transient`        |

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

use tree_sync_core::contract::{
    ChildKind, DatasetRef, RemoteChild, RemoteDataset, RemoteRef, RemoteRow, RemoteStore,
};
use tree_sync_core::error::RemoteError;
use tree_sync_core::node::{Block, Row, Schema};

use crate::render::{
    icon, page_title, parse_schema, render_blocks, row_properties, schema_properties,
    APPEND_BATCH,
};

const PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct NotionConfig {
    pub api_base_url: String,
    pub api_version: String,
    pub token: String,
    pub timeout: Duration,
}

impl Default for NotionConfig {
    fn default() -> Self {
        NotionConfig {
            api_base_url: "https://api.notion.com/v1".to_string(),
            api_version: "2025-09-03".to_string(),
            token: String::new(),
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct NotionClient {
    http: Client,
    base_url: String,
    api_version: String,
    token: String,
}

/// One page of a paginated list or query.
#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DataSourceStub {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Database {
    id: String,
    #[serde(default)]
    data_sources: Vec<DataSourceStub>,
}

#[derive(Debug, Deserialize)]
struct DataSource {
    #[serde(default)]
    properties: Value,
}

/// Map a failed response onto the engine's error taxonomy.
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> RemoteError {
    let detail = format!("{status}: {body}");
    match status.as_u16() {
        404 => RemoteError::NotFound(detail),
        400 if body.to_lowercase().contains("archived") => RemoteError::ArchivedAncestor(detail),
        400 => RemoteError::Validation(detail),
        401 | 403 => RemoteError::Unauthorized(detail),
        429 => RemoteError::RateLimited { retry_after },
        409 => RemoteError::Transient(detail),
        s if (500..600).contains(&s) => RemoteError::Transient(detail),
        _ => RemoteError::Other(detail),
    }
}

fn parse<T: for<'de> Deserialize<'de>>(value: Value, what: &str) -> Result<T, RemoteError> {
    serde_json::from_value(value)
        .map_err(|e| RemoteError::Other(format!("unexpected {what} response: {e}")))
}

fn text(content: &str) -> Value {
    json!([{ "type": "text", "text": { "content": content } }])
}

impl NotionClient {
    pub fn new(config: NotionConfig) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Other(format!("failed to build HTTP client: {e}")))?;
        info!(base_url = %config.api_base_url, api_version = %config.api_version, "[REMOTE] Initialised HTTP client");
        Ok(NotionClient {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version,
            token: config.token,
        })
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, RemoteError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%method, %url, "[REMOTE] request");
        let mut request = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(&self.token)
            .header("Notion-Version", &self.api_version);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            error!(%method, %url, error = %e, "[REMOTE] Request failed");
            RemoteError::Transient(format!("{method} {url}: {e}"))
        })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| RemoteError::Transient(format!("failed to read response from {url}: {e}")));
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .map(Duration::from_secs_f64);
        let body = response.text().await.unwrap_or_default();
        debug!(%method, %url, %status, %body, "[REMOTE] Error response");
        Err(classify_status(status, retry_after, &body))
    }

    /// Every child block of `id`, following pagination.
    async fn list_children(&self, id: &RemoteRef) -> Result<Vec<Value>, RemoteError> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut path = format!("blocks/{id}/children?page_size={PAGE_SIZE}");
            if let Some(cursor) = &cursor {
                path.push_str(&format!("&start_cursor={cursor}"));
            }
            let page: Page = parse(self.send(Method::GET, &path, None).await?, "block list")?;
            all.extend(page.results);
            match page.next_cursor {
                Some(next) if page.has_more => cursor = Some(next),
                _ => break,
            }
        }
        Ok(all)
    }

    /// Delete every body block of `id`, leaving child pages and datasets.
    async fn clear_body(&self, id: &RemoteRef) -> Result<(), RemoteError> {
        let children = self.list_children(id).await?;
        let mut removed = 0;
        for child in children {
            let kind = child.get("type").and_then(Value::as_str).unwrap_or_default();
            if kind == "child_page" || kind == "child_database" {
                continue;
            }
            let Some(block_id) = child.get("id").and_then(Value::as_str) else {
                continue;
            };
            match self.send(Method::DELETE, &format!("blocks/{block_id}"), None).await {
                Ok(_) => removed += 1,
                // already gone
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        debug!(page = %id, removed, "[REMOTE] Cleared body");
        Ok(())
    }

    async fn append_rendered(&self, id: &RemoteRef, blocks: &[Value]) -> Result<(), RemoteError> {
        for chunk in blocks.chunks(APPEND_BATCH) {
            self.send(
                Method::PATCH,
                &format!("blocks/{id}/children"),
                Some(json!({ "children": chunk })),
            )
            .await?;
        }
        Ok(())
    }

    async fn create_page(&self, payload: Value) -> Result<RemoteRef, RemoteError> {
        let created: Created = parse(self.send(Method::POST, "pages", Some(payload)).await?, "page")?;
        Ok(RemoteRef::new(created.id))
    }
}

#[async_trait]
impl RemoteStore for NotionClient {
    async fn find_children(
        &self,
        parent: &RemoteRef,
        title: &str,
    ) -> Result<Vec<RemoteChild>, RemoteError> {
        let children = self.list_children(parent).await?;
        let found = children
            .into_iter()
            .filter_map(|child| {
                let (kind, key) = match child.get("type").and_then(Value::as_str)? {
                    "child_page" => (ChildKind::Page, "child_page"),
                    "child_database" => (ChildKind::Dataset, "child_database"),
                    _ => return None,
                };
                let child_title = child.get(key)?.get("title")?.as_str()?;
                if child_title != title {
                    return None;
                }
                Some(RemoteChild {
                    id: RemoteRef::new(child.get("id")?.as_str()?),
                    title: child_title.to_string(),
                    kind,
                })
            })
            .collect();
        Ok(found)
    }

    async fn create_container(
        &self,
        parent: &RemoteRef,
        title: &str,
    ) -> Result<RemoteRef, RemoteError> {
        self.create_page(json!({
            "parent": { "page_id": parent.as_str() },
            "properties": { "title": { "title": text(title) } },
        }))
        .await
    }

    async fn create_document(
        &self,
        parent: &RemoteRef,
        title: &str,
        body: &[Block],
    ) -> Result<RemoteRef, RemoteError> {
        let rendered = render_blocks(body);
        let split = rendered.len().min(APPEND_BATCH);
        let id = self
            .create_page(json!({
                "parent": { "page_id": parent.as_str() },
                "properties": { "title": { "title": text(title) } },
                "children": &rendered[..split],
            }))
            .await?;
        self.append_rendered(&id, &rendered[split..]).await?;
        Ok(id)
    }

    async fn overwrite_document(&self, id: &RemoteRef, body: &[Block]) -> Result<(), RemoteError> {
        self.clear_body(id).await?;
        self.append_rendered(id, &render_blocks(body)).await
    }

    async fn append_body(&self, id: &RemoteRef, body: &[Block]) -> Result<(), RemoteError> {
        self.append_rendered(id, &render_blocks(body)).await
    }

    async fn archive(&self, id: &RemoteRef) -> Result<(), RemoteError> {
        self.send(
            Method::PATCH,
            &format!("pages/{id}"),
            Some(json!({ "archived": true })),
        )
        .await?;
        Ok(())
    }

    async fn create_dataset(
        &self,
        parent: &RemoteRef,
        title: &str,
        schema: &Schema,
    ) -> Result<DatasetRef, RemoteError> {
        let payload = json!({
            "parent": { "type": "page_id", "page_id": parent.as_str() },
            "title": text(title),
            "is_inline": true,
            "initial_data_source": {
                "title": text(title),
                "properties": schema_properties(schema),
            },
        });
        let database: Database =
            parse(self.send(Method::POST, "databases", Some(payload)).await?, "database")?;
        let rows = database
            .data_sources
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Other(format!("database {} has no data source", database.id)))?;
        Ok(DatasetRef {
            dataset: RemoteRef::new(database.id),
            rows: RemoteRef::new(rows.id),
        })
    }

    async fn overwrite_dataset(
        &self,
        dataset: &DatasetRef,
        title: &str,
        schema: &Schema,
    ) -> Result<(), RemoteError> {
        self.send(
            Method::PATCH,
            &format!("data_sources/{}", dataset.rows),
            Some(json!({
                "title": text(title),
                "properties": schema_properties(schema),
            })),
        )
        .await?;
        Ok(())
    }

    async fn retrieve_dataset(&self, id: &RemoteRef) -> Result<RemoteDataset, RemoteError> {
        let database: Database = parse(
            self.send(Method::GET, &format!("databases/{id}"), None).await?,
            "database",
        )?;
        let rows = database
            .data_sources
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Other(format!("database {id} has no data source")))?;
        let source: DataSource = parse(
            self.send(Method::GET, &format!("data_sources/{}", rows.id), None)
                .await?,
            "data source",
        )?;
        Ok(RemoteDataset {
            reference: DatasetRef {
                dataset: RemoteRef::new(database.id),
                rows: RemoteRef::new(rows.id),
            },
            schema: parse_schema(&source.properties),
        })
    }

    async fn query_rows(&self, dataset: &DatasetRef) -> Result<Vec<RemoteRow>, RemoteError> {
        let path = format!("data_sources/{}/query", dataset.rows);
        let mut rows = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = json!({ "page_size": PAGE_SIZE });
            if let Some(cursor) = &cursor {
                body["start_cursor"] = json!(cursor);
            }
            let page: Page = parse(self.send(Method::POST, &path, Some(body)).await?, "query")?;
            for result in page.results {
                let Some(id) = result.get("id").and_then(Value::as_str) else {
                    continue;
                };
                let title = result
                    .get("properties")
                    .map(page_title)
                    .unwrap_or_default();
                rows.push(RemoteRow {
                    id: RemoteRef::new(id),
                    title,
                });
            }
            match page.next_cursor {
                Some(next) if page.has_more => cursor = Some(next),
                _ => break,
            }
        }
        debug!(dataset = %dataset.dataset, rows = rows.len(), "[REMOTE] Queried rows");
        Ok(rows)
    }

    async fn create_row(
        &self,
        dataset: &DatasetRef,
        schema: &Schema,
        row: &Row,
    ) -> Result<RemoteRef, RemoteError> {
        let mut payload = json!({
            "parent": { "data_source_id": dataset.rows.as_str() },
            "properties": row_properties(schema, row),
        });
        if let Some(icon) = icon(row) {
            payload["icon"] = icon;
        }
        self.create_page(payload).await
    }

    async fn overwrite_row(
        &self,
        id: &RemoteRef,
        schema: &Schema,
        row: &Row,
    ) -> Result<(), RemoteError> {
        let mut payload = json!({ "properties": row_properties(schema, row) });
        if let Some(icon) = icon(row) {
            payload["icon"] = icon;
        }
        self.send(Method::PATCH, &format!("pages/{id}"), Some(payload))
            .await?;
        Ok(())
    }
}
