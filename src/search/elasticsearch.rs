//! Production [`SearchIndex`] adapter backed by Elasticsearch: bulk API,
//! index templates, `IndicesExistsParts`/`IndicesCreateParts`.

use async_trait::async_trait;
use elasticsearch::http::request::JsonBody;
use elasticsearch::indices::{IndicesCreateParts, IndicesExistsAliasParts, IndicesExistsParts};
use elasticsearch::{BulkParts, Elasticsearch};
use serde_json::{json, Value};

use crate::error::{SearchError, StoreResult};

use super::{IndexMapping, SearchIndex, SearchOp};

/// Elasticsearch-backed search index. One client is shared across every
/// resource type's alias (`Store::new` constructs it once, per SPEC_FULL §5).
pub struct ElasticsearchIndex {
    client: Elasticsearch,
}

impl ElasticsearchIndex {
    /// Wraps an already-configured client.
    pub fn new(client: Elasticsearch) -> Self {
        Self { client }
    }

    fn mapping_body(mapping: &IndexMapping) -> Value {
        let properties: serde_json::Map<String, Value> = mapping
            .keyword_fields
            .iter()
            .map(|field| ((*field).to_string(), json!({"type": "keyword"})))
            .collect();
        json!({ "mappings": { "properties": properties } })
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn alias_exists(&self, alias: &str) -> StoreResult<bool> {
        let response = self
            .client
            .indices()
            .exists_alias(IndicesExistsAliasParts::Name(&[alias]))
            .send()
            .await
            .map_err(|e| SearchError::Backend {
                message: e.to_string(),
            })?;
        Ok(response.status_code().as_u16() == 200)
    }

    async fn index_exists(&self, index: &str) -> StoreResult<bool> {
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| SearchError::Backend {
                message: e.to_string(),
            })?;
        Ok(response.status_code().as_u16() == 200)
    }

    async fn create_index(&self, index: &str, mapping: &IndexMapping) -> StoreResult<()> {
        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(Self::mapping_body(mapping))
            .send()
            .await
            .map_err(|e| SearchError::Backend {
                message: e.to_string(),
            })?;

        if !response.status_code().is_success() {
            return Err(SearchError::Backend {
                message: format!("create_index {index} failed: {}", response.status_code()),
            }
            .into());
        }
        Ok(())
    }

    async fn create_alias(&self, alias: &str, index: &str) -> StoreResult<()> {
        let response = self
            .client
            .indices()
            .put_alias(elasticsearch::indices::IndicesPutAliasParts::IndexAlias(
                &[index],
                alias,
            ))
            .send()
            .await
            .map_err(|e| SearchError::Backend {
                message: e.to_string(),
            })?;

        if !response.status_code().is_success() {
            return Err(SearchError::Backend {
                message: format!("create_alias {alias}->{index} failed"),
            }
            .into());
        }
        Ok(())
    }

    async fn remove_alias(&self, alias: &str, index: &str) -> StoreResult<()> {
        let response = self
            .client
            .indices()
            .delete_alias(elasticsearch::indices::IndicesDeleteAliasParts::IndexName(
                &[index],
                &[alias],
            ))
            .send()
            .await
            .map_err(|e| SearchError::Backend {
                message: e.to_string(),
            })?;

        // A missing alias on delete is not an error for our purposes.
        if !response.status_code().is_success() && response.status_code().as_u16() != 404 {
            return Err(SearchError::Backend {
                message: format!("remove_alias {alias}->{index} failed"),
            }
            .into());
        }
        Ok(())
    }

    async fn bulk(&self, alias: &str, ops: Vec<SearchOp>) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let total = ops.len();
        let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(total * 2);
        for op in ops {
            match op {
                SearchOp::Upsert { id, document } => {
                    body.push(json!({"index": {"_id": id}}).into());
                    body.push(document.into());
                }
                SearchOp::Delete { id } => {
                    body.push(json!({"delete": {"_id": id}}).into());
                }
            }
        }

        let response = self
            .client
            .bulk(BulkParts::Index(alias))
            .body(body)
            .send()
            .await
            .map_err(|e| SearchError::Backend {
                message: e.to_string(),
            })?;

        let response_body: Value = response.json().await.map_err(|e| SearchError::Backend {
            message: e.to_string(),
        })?;

        let failed = response_body["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter(|item| {
                        item.values()
                            .next()
                            .and_then(|v| v["error"].as_object())
                            .is_some()
                    })
                    .count()
            })
            .unwrap_or(0);

        if failed > 0 {
            return Err(SearchError::BulkFailed {
                total,
                failed,
                message: format!("bulk operation against alias '{alias}' reported failures"),
            }
            .into());
        }
        Ok(())
    }
}
