//! HTTP implementation of the gateway, speaking PostgREST conventions.
//!
//! Table endpoints `/files` and `/file_contents` take upserts via
//! `POST ... ?on_conflict=<key>` with `Prefer: resolution=merge-duplicates`
//! and filtered updates via `PATCH` with query operators (`eq.`, `lt.`,
//! `is.null`, `like.`). Queue transitions go through `/rpc/*` functions so
//! the claim-and-flip stays atomic inside the database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use casmir_core::types::{FileRecord, PendingUpload};
use casmir_core::{CasmirError, CasmirResult};

use crate::gateway::{truncate_error, MetadataGateway};

/// Remote calls may hold large result pages; generous timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Page size for the path-map fetch; ordering by id keeps pages stable
const PATH_MAP_PAGE_SIZE: usize = 2000;

pub struct RestGateway {
    client: reqwest::Client,
    base_url: String,
}

impl RestGateway {
    /// Build a gateway for `base_url`, authenticating every request with
    /// the shared secret in `X-API-Key`.
    pub fn new(base_url: &str, api_key: &str) -> CasmirResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-API-Key",
            HeaderValue::from_str(api_key)
                .map_err(|e| CasmirError::Config(format!("METADATA_API_KEY is not a valid header value: {e}")))?,
        );
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        let client = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| CasmirError::Db(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Map a non-2xx response to a `Db` error carrying the (clamped) body,
    /// which is where PostgREST puts its diagnostics.
    async fn ensure_success(op: &str, response: reqwest::Response) -> CasmirResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(CasmirError::Db(format!(
            "{op}: HTTP {status}: {}",
            truncate_error(&body)
        )))
    }

    async fn rpc(&self, name: &str, body: serde_json::Value) -> CasmirResult<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint(&format!("rpc/{name}")))
            .json(&body)
            .send()
            .await
            .map_err(|e| CasmirError::Db(format!("rpc {name}: {e}")))?;
        Self::ensure_success(name, response).await
    }
}

#[derive(Debug, Deserialize)]
struct PathRow {
    full_path: String,
    content_hash: Option<String>,
}

#[async_trait]
impl MetadataGateway for RestGateway {
    async fn fetch_path_map(&self) -> CasmirResult<HashMap<String, String>> {
        let mut path_map = HashMap::new();
        let mut offset = 0usize;

        loop {
            let response = self
                .client
                .get(self.endpoint("files"))
                .query(&[
                    ("select", "full_path,content_hash".to_string()),
                    ("deleted_at", "is.null".to_string()),
                    ("order", "id".to_string()),
                    ("offset", offset.to_string()),
                    ("limit", PATH_MAP_PAGE_SIZE.to_string()),
                ])
                .send()
                .await
                .map_err(|e| CasmirError::Db(format!("fetch_path_map (offset={offset}): {e}")))?;

            let rows: Vec<PathRow> = Self::ensure_success("fetch_path_map", response)
                .await?
                .json()
                .await
                .map_err(|e| CasmirError::Db(format!("fetch_path_map decode: {e}")))?;

            let page_len = rows.len();
            for row in rows {
                if let Some(hash) = row.content_hash {
                    path_map.insert(row.full_path, hash);
                }
            }
            if page_len < PATH_MAP_PAGE_SIZE {
                break;
            }
            offset += PATH_MAP_PAGE_SIZE;
        }

        debug!(paths = path_map.len(), "path map loaded");
        Ok(path_map)
    }

    async fn upsert_content(
        &self,
        content_hash: &str,
        size_bytes: u64,
        mime_type: Option<&str>,
    ) -> CasmirResult<()> {
        let response = self
            .client
            .post(self.endpoint("file_contents"))
            .query(&[("on_conflict", "content_hash")])
            .header("Prefer", "resolution=merge-duplicates")
            .json(&json!({
                "content_hash": content_hash,
                "size_bytes": size_bytes,
                "mime_type": mime_type,
                "db_updated_at": Utc::now(),
            }))
            .send()
            .await
            .map_err(|e| CasmirError::Db(format!("upsert_content {content_hash}: {e}")))?;
        Self::ensure_success("upsert_content", response).await?;
        Ok(())
    }

    async fn upsert_file(&self, record: &FileRecord) -> CasmirResult<()> {
        let response = self
            .client
            .post(self.endpoint("files"))
            .query(&[("on_conflict", "full_path")])
            .header("Prefer", "resolution=merge-duplicates")
            .json(record)
            .send()
            .await
            .map_err(|e| CasmirError::Db(format!("upsert_file {}: {e}", record.full_path)))?;
        Self::ensure_success("upsert_file", response).await?;
        Ok(())
    }

    async fn touch_file(&self, full_path: &str) -> CasmirResult<()> {
        let response = self
            .client
            .patch(self.endpoint("files"))
            .query(&[("full_path", format!("eq.{full_path}"))])
            .json(&json!({ "last_seen_at": Utc::now() }))
            .send()
            .await
            .map_err(|e| CasmirError::Db(format!("touch_file {full_path}: {e}")))?;
        Self::ensure_success("touch_file", response).await?;
        Ok(())
    }

    async fn mark_deleted(&self, path_prefix: &str, before: DateTime<Utc>) -> CasmirResult<u64> {
        let response = self
            .client
            .patch(self.endpoint("files"))
            .query(&[
                ("last_seen_at", format!("lt.{}", before.to_rfc3339())),
                ("deleted_at", "is.null".to_string()),
                ("full_path", format!("like.{path_prefix}*")),
            ])
            .json(&json!({ "deleted_at": Utc::now() }))
            .send()
            .await
            .map_err(|e| CasmirError::Db(format!("mark_deleted {path_prefix}: {e}")))?;

        let rows: Vec<serde_json::Value> = Self::ensure_success("mark_deleted", response)
            .await?
            .json()
            .await
            .map_err(|e| CasmirError::Db(format!("mark_deleted decode: {e}")))?;
        Ok(rows.len() as u64)
    }

    async fn dequeue_upload_batch(
        &self,
        batch_size: u32,
        path_prefixes: &[String],
    ) -> CasmirResult<Vec<PendingUpload>> {
        let response = self
            .rpc(
                "dequeue_upload_batch",
                json!({
                    "p_batch_size": batch_size,
                    "p_path_prefixes": path_prefixes,
                }),
            )
            .await?;
        response
            .json()
            .await
            .map_err(|e| CasmirError::Db(format!("dequeue_upload_batch decode: {e}")))
    }

    async fn mark_upload_complete(
        &self,
        content_hash: &str,
        storage_path: &str,
        mime_type: &str,
    ) -> CasmirResult<()> {
        self.rpc(
            "mark_upload_complete",
            json!({
                "p_hash": content_hash,
                "p_storage_path": storage_path,
                "p_mime_type": mime_type,
            }),
        )
        .await?;
        Ok(())
    }

    async fn mark_upload_failed(&self, content_hash: &str, error: &str) -> CasmirResult<()> {
        self.rpc(
            "mark_upload_failed",
            json!({
                "p_hash": content_hash,
                "p_error": truncate_error(error),
            }),
        )
        .await?;
        Ok(())
    }

    async fn mark_upload_skipped(&self, content_hash: &str, reason: &str) -> CasmirResult<()> {
        self.rpc(
            "mark_upload_skipped",
            json!({
                "p_hash": content_hash,
                "p_reason": truncate_error(reason),
            }),
        )
        .await?;
        Ok(())
    }

    async fn reset_stuck_uploads(&self) -> CasmirResult<u64> {
        let response = self.rpc("reset_stuck_uploads", json!({})).await?;
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CasmirError::Db(format!("reset_stuck_uploads decode: {e}")))?;
        Ok(value.as_u64().unwrap_or(0))
    }
}
