//! Production [`KvStore`] adapter backed by DynamoDB (feature `dynamodb`).
//!
//! Follows the same AWS-SDK client idiom used for the blob store (explicit
//! error classification via SDK error metadata) rather than introducing an
//! unrelated client ecosystem. The guarded status-transition condition (§4.2)
//! is expressed as a single
//! DynamoDB `ConditionExpression`; [`crate::params::transition_is_legal`]
//! stays the one place that logic is *specified*, this module only
//! transliterates it into DynamoDB's expression language.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, Put, TransactWriteItem, Update};
use aws_sdk_dynamodb::Client;
use parking_lot::Mutex;

use crate::error::{KvError, StoreResult};
use crate::item::{DocumentStatus, Item, ResourceMeta};
use crate::params::{KvWriteOp, MostRecentQuery, PointGet};
use crate::tenant::TenantId;

use super::{ChangeRecord, KvStore};

const STORAGE_ID: &str = "storageId";
const VID: &str = "vid";
const RESOURCE_TYPE: &str = "resourceType";
const DOCUMENT_STATUS: &str = "documentStatus";
const LOCK_END_TS: &str = "lockEndTs";
const TENANT_ID: &str = "tenantId";
const REFERENCES: &str = "_references";
const VERSION_ID: &str = "versionId";
const LAST_UPDATED: &str = "lastUpdated";
const BULK_DATA_LINK: &str = "bulkDataLink";
const CONTENT: &str = "content";

/// DynamoDB-backed primary table client.
///
/// `table` must have partition key `storageId` (string) and sort key `vid`
/// (number), per §6's persisted layout. Sequence numbers for the change
/// feed are tracked locally (a real deployment would poll DynamoDB Streams
/// via `aws-sdk-dynamodbstreams`; this in-process sequence stands in for
/// that shard-iterator bookkeeping, which the core treats as opaque).
pub struct DynamoDbKvStore {
    client: Client,
    table: String,
    feed_cursor: AtomicU64,
    feed: Mutex<Vec<ChangeRecord>>,
}

impl DynamoDbKvStore {
    /// Builds a client against `table` using an already-resolved AWS SDK
    /// client, shared across components per SPEC_FULL §5.
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
            feed_cursor: AtomicU64::new(0),
            feed: Mutex::new(Vec::new()),
        }
    }

    fn key(storage_id: &str, vid: u64) -> HashMap<String, AttributeValue> {
        HashMap::from([
            (STORAGE_ID.to_string(), AttributeValue::S(storage_id.to_string())),
            (VID.to_string(), AttributeValue::N(vid.to_string())),
        ])
    }

    fn item_to_attrs(item: &Item) -> HashMap<String, AttributeValue> {
        let mut attrs = Self::key(&item.storage_id, item.vid);
        attrs.insert(
            RESOURCE_TYPE.to_string(),
            AttributeValue::S(item.resource_type.clone()),
        );
        attrs.insert(
            DOCUMENT_STATUS.to_string(),
            AttributeValue::S(item.document_status.as_str().to_string()),
        );
        attrs.insert(
            LOCK_END_TS.to_string(),
            AttributeValue::N(item.lock_end_ts.timestamp_millis().to_string()),
        );
        if let Some(tenant_id) = &item.tenant_id {
            attrs.insert(
                TENANT_ID.to_string(),
                AttributeValue::S(tenant_id.as_str().to_string()),
            );
        }
        attrs.insert(
            REFERENCES.to_string(),
            AttributeValue::Ss(item.references.iter().cloned().collect())
                .into_empty_ss_safe(),
        );
        attrs.insert(
            VERSION_ID.to_string(),
            AttributeValue::S(item.meta.version_id.clone()),
        );
        attrs.insert(
            LAST_UPDATED.to_string(),
            AttributeValue::N(item.meta.last_updated.timestamp_millis().to_string()),
        );
        if let Some(link) = &item.bulk_data_link {
            attrs.insert(BULK_DATA_LINK.to_string(), AttributeValue::S(link.clone()));
        }
        attrs.insert(
            CONTENT.to_string(),
            AttributeValue::S(item.content.to_string()),
        );
        attrs
    }

    fn attrs_to_item(attrs: &HashMap<String, AttributeValue>) -> Result<Item, KvError> {
        let get_s = |k: &str| -> Result<String, KvError> {
            attrs
                .get(k)
                .and_then(|v| v.as_s().ok())
                .cloned()
                .ok_or_else(|| KvError::Backend {
                    message: format!("missing or non-string attribute '{k}'"),
                })
        };
        let get_n = |k: &str| -> Result<i64, KvError> {
            attrs
                .get(k)
                .and_then(|v| v.as_n().ok())
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| KvError::Backend {
                    message: format!("missing or non-numeric attribute '{k}'"),
                })
        };

        let storage_id = get_s(STORAGE_ID)?;
        let vid: u64 = get_n(VID)?.try_into().map_err(|_| KvError::Backend {
            message: "negative vid".to_string(),
        })?;
        let resource_type = get_s(RESOURCE_TYPE)?;
        let status_str = get_s(DOCUMENT_STATUS)?;
        let document_status = match status_str.as_str() {
            "PENDING" => DocumentStatus::Pending,
            "LOCKED" => DocumentStatus::Locked,
            "AVAILABLE" => DocumentStatus::Available,
            "PENDING_DELETE" => DocumentStatus::PendingDelete,
            "DELETED" => DocumentStatus::Deleted,
            other => {
                return Err(KvError::Backend {
                    message: format!("unknown documentStatus '{other}'"),
                })
            }
        };
        let lock_end_ts = chrono::DateTime::from_timestamp_millis(get_n(LOCK_END_TS)?)
            .ok_or_else(|| KvError::Backend {
                message: "invalid lockEndTs".to_string(),
            })?;
        let tenant_id = attrs.get(TENANT_ID).and_then(|v| v.as_s().ok()).map(|s| TenantId::new(s.clone()));
        let references = attrs
            .get(REFERENCES)
            .and_then(|v| v.as_ss().ok())
            .map(|ss| ss.iter().cloned().collect())
            .unwrap_or_default();
        let version_id = get_s(VERSION_ID)?;
        let last_updated = chrono::DateTime::from_timestamp_millis(get_n(LAST_UPDATED)?)
            .ok_or_else(|| KvError::Backend {
                message: "invalid lastUpdated".to_string(),
            })?;
        let bulk_data_link = attrs.get(BULK_DATA_LINK).and_then(|v| v.as_s().ok()).cloned();
        let content: serde_json::Value =
            serde_json::from_str(&get_s(CONTENT)?).map_err(|e| KvError::Backend {
                message: format!("invalid content JSON: {e}"),
            })?;

        Ok(Item {
            storage_id,
            vid,
            resource_type,
            document_status,
            lock_end_ts,
            tenant_id,
            references,
            meta: ResourceMeta {
                version_id,
                last_updated,
            },
            bulk_data_link,
            content,
        })
    }

    /// Transliterates §4.2's guarded condition into a DynamoDB
    /// `ConditionExpression`: `(resourceType = :rt) AND (documentStatus =
    /// :from OR (lockEndTs < :lock_deadline AND documentStatus IN
    /// (transient set)))`.
    fn transition_condition(
        from: DocumentStatus,
        lock_duration: std::time::Duration,
    ) -> (String, HashMap<String, AttributeValue>) {
        let deadline_ms = chrono::Utc::now().timestamp_millis() - lock_duration.as_millis() as i64;
        let expr = format!(
            "{RESOURCE_TYPE} = :rt AND ({DOCUMENT_STATUS} = :from OR \
             ({LOCK_END_TS} < :deadline AND {DOCUMENT_STATUS} IN (:pending, :locked, :pending_delete)))"
        );
        let values = HashMap::from([
            (":from".to_string(), AttributeValue::S(from.as_str().to_string())),
            (":deadline".to_string(), AttributeValue::N(deadline_ms.to_string())),
            (":pending".to_string(), AttributeValue::S(DocumentStatus::Pending.as_str().to_string())),
            (":locked".to_string(), AttributeValue::S(DocumentStatus::Locked.as_str().to_string())),
            (
                ":pending_delete".to_string(),
                AttributeValue::S(DocumentStatus::PendingDelete.as_str().to_string()),
            ),
        ]);
        (expr, values)
    }
}

#[async_trait]
impl KvStore for DynamoDbKvStore {
    async fn get_item(&self, point: &PointGet) -> StoreResult<Option<Item>> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table)
            .set_key(Some(Self::key(&point.storage_id, point.vid)))
            .send()
            .await
            .map_err(|e| KvError::Backend {
                message: e.to_string(),
            })?;

        match response.item {
            Some(attrs) => Ok(Some(Self::attrs_to_item(&attrs)?)),
            None => Ok(None),
        }
    }

    async fn query_most_recent(&self, query: &MostRecentQuery) -> StoreResult<Vec<Item>> {
        let response = self
            .client
            .query()
            .table_name(&self.table)
            .key_condition_expression(format!("{STORAGE_ID} = :sid"))
            .expression_attribute_values(
                ":sid",
                AttributeValue::S(query.storage_id.clone()),
            )
            .scan_index_forward(false)
            .limit(query.limit as i32)
            .send()
            .await
            .map_err(|e| KvError::Backend {
                message: e.to_string(),
            })?;

        response
            .items
            .unwrap_or_default()
            .iter()
            .map(|attrs| Self::attrs_to_item(attrs).map_err(Into::into))
            .collect()
    }

    async fn transact_write(&self, ops: Vec<KvWriteOp>) -> StoreResult<()> {
        const TRANSACTION_ITEM_LIMIT: usize = 100;
        if ops.len() > TRANSACTION_ITEM_LIMIT {
            return Err(KvError::TransactionTooLarge {
                size: ops.len(),
                limit: TRANSACTION_ITEM_LIMIT,
            }
            .into());
        }

        let mut items = Vec::with_capacity(ops.len());
        let mut applied_inserts = Vec::new();
        let mut transitioned_keys = Vec::new();

        for op in &ops {
            let write_item = match op {
                KvWriteOp::Insert {
                    item,
                    allow_overwrite,
                } => {
                    let mut put = Put::builder()
                        .table_name(&self.table)
                        .set_item(Some(Self::item_to_attrs(item)));
                    if !allow_overwrite {
                        put = put.condition_expression(format!(
                            "attribute_not_exists({STORAGE_ID})"
                        ));
                    }
                    applied_inserts.push(item.clone());
                    TransactWriteItem::builder()
                        .put(put.build().map_err(|e| KvError::Backend {
                            message: e.to_string(),
                        })?)
                        .build()
                }
                KvWriteOp::Transition {
                    storage_id,
                    vid,
                    resource_type,
                    from,
                    to,
                    lock_duration,
                } => {
                    transitioned_keys.push((storage_id.clone(), *vid));
                    let (condition, mut values) = Self::transition_condition(*from, *lock_duration);
                    values.insert(":rt".to_string(), AttributeValue::S(resource_type.clone()));
                    values.insert(":to".to_string(), AttributeValue::S(to.as_str().to_string()));
                    let update = Update::builder()
                        .table_name(&self.table)
                        .set_key(Some(Self::key(storage_id, *vid)))
                        .update_expression(format!("SET {DOCUMENT_STATUS} = :to, {LOCK_END_TS} = :now"))
                        .condition_expression(condition)
                        .set_expression_attribute_values(Some({
                            let mut values = values;
                            values.insert(
                                ":now".to_string(),
                                AttributeValue::N(chrono::Utc::now().timestamp_millis().to_string()),
                            );
                            values
                        }))
                        .build()
                        .map_err(|e| KvError::Backend {
                            message: e.to_string(),
                        })?;
                    TransactWriteItem::builder().update(update).build()
                }
                KvWriteOp::Delete { storage_id, vid } => TransactWriteItem::builder()
                    .delete(
                        aws_sdk_dynamodb::types::Delete::builder()
                            .table_name(&self.table)
                            .set_key(Some(Self::key(storage_id, *vid)))
                            .build()
                            .map_err(|e| KvError::Backend {
                                message: e.to_string(),
                            })?,
                    )
                    .build(),
            };
            items.push(write_item);
        }

        self.client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .map(|se| se.is_transaction_canceled_exception())
                    .unwrap_or(false)
                {
                    KvError::ConditionalCheckFailed {
                        table: self.table.clone(),
                        key: "one or more transaction items".to_string(),
                    }
                } else {
                    KvError::Backend {
                        message: e.to_string(),
                    }
                }
            })?;

        // A real deployment learns of the post-transition image from
        // DynamoDB Streams' MODIFY record; since this adapter fakes the feed
        // in-process, re-fetch each transitioned key's now-committed state so
        // the Change Propagator observes the AVAILABLE/DELETED image rather
        // than only ever seeing INSERT-shaped records.
        let mut transitioned_items = Vec::with_capacity(transitioned_keys.len());
        for (storage_id, vid) in &transitioned_keys {
            if let Some(item) = self.get_item(&PointGet {
                storage_id: storage_id.clone(),
                vid: *vid,
            }).await? {
                transitioned_items.push(item);
            }
        }

        let mut feed = self.feed.lock();
        for item in applied_inserts {
            feed.push(ChangeRecord { item });
        }
        for item in transitioned_items {
            feed.push(ChangeRecord { item });
        }
        Ok(())
    }

    async fn poll_changes(&self, max: usize) -> StoreResult<Vec<ChangeRecord>> {
        // A production deployment polls DynamoDB Streams shard iterators via
        // `aws-sdk-dynamodbstreams`; this adapter's in-process feed buffer
        // (populated by `transact_write`) stands in for that shard-iterator
        // bookkeeping, which the rest of the core treats as opaque.
        let mut feed = self.feed.lock();
        let take = max.min(feed.len());
        self.feed_cursor.fetch_add(take as u64, Ordering::SeqCst);
        Ok(feed.drain(..take).collect())
    }
}

trait EmptySsSafe {
    fn into_empty_ss_safe(self) -> AttributeValue;
}

impl EmptySsSafe for AttributeValue {
    fn into_empty_ss_safe(self) -> AttributeValue {
        match &self {
            AttributeValue::Ss(values) if values.is_empty() => AttributeValue::Null(true),
            _ => self,
        }
    }
}
