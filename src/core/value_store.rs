// src/core/value_store.rs

//! Applies the failover→server→snapshot read precedence and publishes/removes/lists
//! config values against the remote service.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::has_no_namespace;
use crate::core::blob_store::BlobStore;
use crate::core::codec;
use crate::core::executor::RequestExecutor;
use crate::core::key::CompositeKey;
use crate::error::{AcmError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
struct ConfigPage {
    #[serde(rename = "pageItems")]
    page_items: Vec<ConfigItem>,
    #[serde(rename = "pagesAvailable")]
    pages_available: u32,
    #[serde(rename = "totalCount")]
    total_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigItem {
    #[serde(rename = "dataId")]
    pub data_id: String,
    pub group: String,
}

/// One page of [`ValueStore::list`], plus the total number of entries across all pages.
#[derive(Debug, Clone)]
pub struct ConfigListing {
    pub items: Vec<ConfigItem>,
    pub pages_available: u32,
    pub total_count: u32,
}

/// Coordinates the local failover override, the remote service, and the snapshot mirror.
pub struct ValueStore {
    executor: Arc<RequestExecutor>,
    failover: Arc<BlobStore>,
    snapshot: Arc<BlobStore>,
    /// Already normalized: `"" or "[default]"` collapse to `""` at construction, so every
    /// subsequent use (tenant params, key identity) sees one consistent "no tenant" value.
    namespace: String,
}

impl ValueStore {
    pub fn new(
        executor: Arc<RequestExecutor>,
        failover: Arc<BlobStore>,
        snapshot: Arc<BlobStore>,
        namespace: impl Into<String>,
    ) -> Self {
        let namespace = namespace.into();
        let namespace = if has_no_namespace(&namespace) { String::new() } else { namespace };
        Self {
            executor,
            failover,
            snapshot,
            namespace,
        }
    }

    pub async fn get(
        &self,
        data_id: &str,
        group: &str,
        timeout: Option<Duration>,
        no_snapshot: bool,
    ) -> Result<Option<String>> {
        let key = CompositeKey::new(data_id, group, &self.namespace)?;
        if let Some(bytes) = self.failover.read(&key.encode()).await {
            return Ok(Some(codec::decode_gbk(&bytes)));
        }

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let tenant = self.namespace.clone();
        let query = [
            ("dataId", data_id),
            ("group", group),
            ("tenant", tenant.as_str()),
        ];
        match self.executor.execute("/diamond-server/config.co", &query, &[], None, timeout).await {
            Ok(resp) => match resp.status {
                StatusCode::OK => {
                    if !no_snapshot {
                        self.snapshot.write(&key.encode(), resp.body.to_vec()).await;
                    }
                    Ok(Some(codec::decode_gbk(&resp.body)))
                }
                StatusCode::NOT_FOUND => {
                    self.snapshot.delete(&key.encode()).await;
                    Ok(None)
                }
                StatusCode::CONFLICT => {
                    warn!("get-config: concurrent modification for {key}");
                    self.read_snapshot(&key).await
                }
                StatusCode::FORBIDDEN => Err(AcmError::PermissionDenied),
                other => {
                    warn!("get-config: unexpected status {other} for {key}");
                    self.read_snapshot(&key).await
                }
            },
            Err(e) => {
                warn!("get-config: transport failure for {key}: {e}");
                self.read_snapshot(&key).await
            }
        }
    }

    async fn read_snapshot(&self, key: &CompositeKey) -> Result<Option<String>> {
        Ok(self.snapshot.read(&key.encode()).await.map(|b| codec::decode_gbk(&b)))
    }

    pub async fn publish(
        &self,
        data_id: &str,
        group: &str,
        content: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let content = content.ok_or_else(|| AcmError::InvalidArgument("content must not be nil".into()))?;
        let _key = CompositeKey::new(data_id, group, &self.namespace)?;
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let gbk = codec::encode_gbk(content);
        let tenant = self.namespace.clone();
        let form: [(&str, &[u8]); 4] = [
            ("dataId", data_id.as_bytes()),
            ("group", group.as_bytes()),
            ("tenant", tenant.as_bytes()),
            ("content", &gbk),
        ];
        let resp = self
            .executor
            .execute(
                "/diamond-server/basestone.do?method=syncUpdateAll",
                &[],
                &[],
                Some(&form),
                timeout,
            )
            .await?;
        match resp.status {
            StatusCode::OK => {
                info!("publish: {data_id}+{group} updated");
                Ok(())
            }
            StatusCode::FORBIDDEN => Err(AcmError::PermissionDenied),
            other => Err(AcmError::HttpClientError(format!("publish failed with status {other}"))),
        }
    }

    pub async fn remove(&self, data_id: &str, group: &str, timeout: Option<Duration>) -> Result<()> {
        let _key = CompositeKey::new(data_id, group, &self.namespace)?;
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let tenant = self.namespace.clone();
        let query = [
            ("dataId", data_id),
            ("group", group),
            ("tenant", tenant.as_str()),
        ];
        let resp = self
            .executor
            .execute(
                "/diamond-server/datum.do?method=deleteAllDatums",
                &query,
                &[],
                None,
                timeout,
            )
            .await?;
        match resp.status {
            StatusCode::OK => Ok(()),
            StatusCode::FORBIDDEN => Err(AcmError::PermissionDenied),
            other => Err(AcmError::HttpClientError(format!("remove failed with status {other}"))),
        }
    }

    pub async fn list(&self, page: u32, size: u32) -> Result<ConfigListing> {
        let page_str = page.to_string();
        let size_str = size.to_string();
        let tenant = self.namespace.clone();
        let query = [
            ("pageNo", page_str.as_str()),
            ("pageSize", size_str.as_str()),
            ("tenant", tenant.as_str()),
        ];
        let resp = self
            .executor
            .execute(
                "/diamond-server/basestone.do?method=getAllConfigInfoByTenant",
                &query,
                &[],
                None,
                DEFAULT_TIMEOUT,
            )
            .await?;
        if resp.status != StatusCode::OK {
            return Err(AcmError::HttpClientError(format!("list failed with status {}", resp.status)));
        }
        let page: ConfigPage = serde_json::from_slice(&resp.body)
            .map_err(|e| AcmError::HttpClientError(format!("malformed list response: {e}")))?;
        Ok(ConfigListing {
            items: page.page_items,
            pages_available: page.pages_available,
            total_count: page.total_count,
        })
    }

    pub async fn list_all(&self, group: Option<&str>, prefix: Option<&str>) -> Result<Vec<ConfigItem>> {
        let first = self.list(1, 200).await?;
        let mut items = first.items;
        for page_no in 2..=first.pages_available {
            items.extend(self.list(page_no, 200).await?.items);
        }
        Ok(items
            .into_iter()
            .filter(|item| group.is_none_or(|g| item.group == g))
            .filter(|item| prefix.is_none_or(|p| item.data_id.starts_with(p)))
            .collect())
    }
}
