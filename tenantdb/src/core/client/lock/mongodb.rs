use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, DateTime as BsonDateTime, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, UpdateOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::constant::{HASHES_COLLECTION, LOCKS_COLLECTION};
use super::{CoordinationStore, LockError};
use crate::types::params::coordination::MongoArgs;

const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, Serialize, Deserialize)]
struct LockDocument {
    #[serde(rename = "_id")]
    key: String,
    value: String,
    expires_at: BsonDateTime,
}

#[derive(Debug, Serialize, Deserialize)]
struct HashFieldDocument {
    #[serde(rename = "_id")]
    id: String,
    hash: String,
    field: String,
    value: String,
}

fn hash_field_id(hash: &str, field: &str) -> String {
    format!("{}\u{1f}{}", hash, field)
}

fn now() -> BsonDateTime {
    BsonDateTime::from_millis(Utc::now().timestamp_millis())
}

fn prefix_regex(prefix: &str) -> Document {
    doc! { "$regex": format!("^{}", regex::escape(prefix)) }
}

/// MongoDB backed coordination store.
///
/// Expiring keys are documents in `locks` with a TTL index on `expires_at`. The TTL monitor only
/// runs periodically, so every read and write also filters on `expires_at` itself.
pub struct MongoCoordinationStore {
    client: Client,
    database: Database,
}

impl MongoCoordinationStore {
    pub async fn new(args: &MongoArgs) -> Result<Self, LockError> {
        let client = Client::with_uri_str(&args.connection_uri).await?;
        let database = client.database(&args.database_name);
        let store = Self { client, database };
        store.ensure_indexes().await?;
        Ok(store)
    }

    /// Mongodb client uses Arc internally, reducing the cost of clone.
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn locks(&self) -> Collection<LockDocument> {
        self.database.collection(LOCKS_COLLECTION)
    }

    fn hashes(&self) -> Collection<HashFieldDocument> {
        self.database.collection(HASHES_COLLECTION)
    }

    async fn ensure_indexes(&self) -> Result<(), LockError> {
        let ttl_index = IndexModel::builder()
            .keys(doc! { "expires_at": 1 })
            .options(IndexOptions::builder().expire_after(Duration::from_secs(0)).build())
            .build();
        self.locks().create_index(ttl_index, None).await?;

        let hash_index = IndexModel::builder().keys(doc! { "hash": 1 }).build();
        self.hashes().create_index(hash_index, None).await?;
        debug!("Coordination store indexes ensured");
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for MongoCoordinationStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, LockError> {
        // Clear an expired holder the TTL monitor has not reaped yet. _id uniqueness makes the insert the
        // actual admission gate, so two callers racing through here still produce one winner.
        self.locks().delete_one(doc! { "_id": key, "expires_at": { "$lte": now() } }, None).await?;

        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| LockError::Store(format!("lock ttl of {}s is out of range", ttl.as_secs())))?;
        let document = LockDocument {
            key: key.to_string(),
            value: value.to_string(),
            expires_at: BsonDateTime::from_millis(expires_at.timestamp_millis()),
        };

        match self.locks().insert_one(document, None).await {
            Ok(_) => Ok(true),
            Err(e) => match e.kind.as_ref() {
                ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY_CODE => {
                    Ok(false)
                }
                _ => Err(e.into()),
            },
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, LockError> {
        let result = self
            .locks()
            .delete_one(doc! { "_id": key, "value": expected, "expires_at": { "$gt": now() } }, None)
            .await?;
        Ok(result.deleted_count == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, LockError> {
        let document = self.locks().find_one(doc! { "_id": key, "expires_at": { "$gt": now() } }, None).await?;
        Ok(document.map(|d| d.value))
    }

    async fn hash_get(&self, hash: &str, field: &str) -> Result<Option<String>, LockError> {
        let document = self.hashes().find_one(doc! { "_id": hash_field_id(hash, field) }, None).await?;
        Ok(document.map(|d| d.value))
    }

    async fn hash_get_all(&self, hash: &str) -> Result<HashMap<String, String>, LockError> {
        let cursor = self.hashes().find(doc! { "hash": hash }, None).await?;
        let documents: Vec<HashFieldDocument> = cursor.try_collect().await?;
        Ok(documents.into_iter().map(|d| (d.field, d.value)).collect())
    }

    async fn hash_set(&self, hash: &str, field: &str, value: &str) -> Result<(), LockError> {
        let options = UpdateOptions::builder().upsert(true).build();
        self.hashes()
            .update_one(
                doc! { "_id": hash_field_id(hash, field) },
                doc! { "$set": { "hash": hash, "field": field, "value": value } },
                options,
            )
            .await?;
        Ok(())
    }

    async fn hash_delete(&self, hash: &str, field: &str) -> Result<bool, LockError> {
        let result = self.hashes().delete_one(doc! { "_id": hash_field_id(hash, field) }, None).await?;
        Ok(result.deleted_count == 1)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, LockError> {
        let cursor = self.locks().find(doc! { "_id": prefix_regex(prefix), "expires_at": { "$gt": now() } }, None).await?;
        let locks: Vec<LockDocument> = cursor.try_collect().await?;

        let hash_names = self.hashes().distinct("hash", doc! { "hash": prefix_regex(prefix) }, None).await?;

        let mut keys: BTreeSet<String> = locks.into_iter().map(|d| d.key).collect();
        keys.extend(hash_names.into_iter().filter_map(|name| name.as_str().map(str::to_string)));
        Ok(keys.into_iter().collect())
    }
}
