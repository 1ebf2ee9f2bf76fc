use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document as BsonDocument};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, Database, IndexModel};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use super::{doc_id, Collection, Document, DocumentStore, SortBy, StoreError, StoreResult};

const DUPLICATE_KEY_CODE: i32 = 11000;
/// Kept as BSON dates, the way mongoose `timestamps` writes them.
const TIMESTAMP_FIELDS: [&str; 2] = ["createdAt", "updatedAt"];

#[derive(Debug, Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .context("Invalid MONGODB_URI")?;
        options.app_name = Some(format!("moviedb/{}", env!("CARGO_PKG_VERSION")));
        options.server_selection_timeout = Some(Duration::from_secs(5));
        let client = Client::with_options(options).context("Failed to build MongoDB client")?;
        let store = Self {
            db: client.database(db_name),
        };
        store.ensure_indexes().await?;
        info!("Connected to MongoDB database '{}'", db_name);
        Ok(store)
    }

    fn collection(&self, collection: Collection) -> mongodb::Collection<BsonDocument> {
        self.db.collection(collection.name())
    }

    async fn ensure_indexes(&self) -> Result<()> {
        for collection in Collection::ALL {
            let index = IndexModel::builder()
                .keys(doc! { "id": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build();
            self.collection(collection)
                .create_index(index)
                .await
                .with_context(|| format!("Failed to create id index on {}", collection.name()))?;
            debug!("Unique id index ready on {}", collection.name());
        }
        Ok(())
    }
}

fn filter(field: &str, value: &str) -> BsonDocument {
    let mut filter = BsonDocument::new();
    filter.insert(field, value);
    filter
}

fn to_bson(doc: Document) -> StoreResult<BsonDocument> {
    let mut encoded = bson::to_document(&doc).context("Failed to encode document")?;
    for field in TIMESTAMP_FIELDS {
        if let Some(Bson::String(raw)) = encoded.get(field) {
            let ts = DateTime::parse_from_rfc3339(raw)
                .with_context(|| format!("Invalid {} '{}'", field, raw))?;
            encoded.insert(field, bson::DateTime::from_millis(ts.timestamp_millis()));
        }
    }
    Ok(encoded)
}

fn from_bson(mut doc: BsonDocument) -> Document {
    doc.remove("_id");
    for field in TIMESTAMP_FIELDS {
        if let Some(Bson::DateTime(ts)) = doc.get(field) {
            if let Some(ts) = DateTime::<Utc>::from_timestamp_millis(ts.timestamp_millis()) {
                doc.insert(field, ts.to_rfc3339_opts(SecondsFormat::Millis, true));
            }
        }
    }
    match Bson::Document(doc).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

fn backend(err: mongodb::error::Error, action: &str, collection: Collection) -> StoreError {
    StoreError::Backend(anyhow::Error::new(err).context(format!(
        "MongoDB {} on {} failed",
        action,
        collection.name()
    )))
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY_CODE
    )
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn find_all(&self, collection: Collection, sort: SortBy) -> StoreResult<Vec<Document>> {
        let mut order = BsonDocument::new();
        order.insert(sort.field, if sort.descending { -1 } else { 1 });
        let cursor = self
            .collection(collection)
            .find(doc! {})
            .sort(order)
            .await
            .map_err(|e| backend(e, "find", collection))?;
        let docs: Vec<BsonDocument> = cursor
            .try_collect()
            .await
            .map_err(|e| backend(e, "find", collection))?;
        Ok(docs.into_iter().map(from_bson).collect())
    }

    async fn find_one(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> StoreResult<Option<Document>> {
        let found = self
            .collection(collection)
            .find_one(filter(field, value))
            .await
            .map_err(|e| backend(e, "findOne", collection))?;
        Ok(found.map(from_bson))
    }

    async fn find_many(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> StoreResult<Vec<Document>> {
        let cursor = self
            .collection(collection)
            .find(filter(field, value))
            .await
            .map_err(|e| backend(e, "find", collection))?;
        let docs: Vec<BsonDocument> = cursor
            .try_collect()
            .await
            .map_err(|e| backend(e, "find", collection))?;
        Ok(docs.into_iter().map(from_bson).collect())
    }

    async fn insert_one(&self, collection: Collection, doc: Document) -> StoreResult<()> {
        let id = doc_id(&doc).unwrap_or_default().to_string();
        let encoded = to_bson(doc)?;
        match self.collection(collection).insert_one(encoded).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::Duplicate {
                collection: collection.name(),
                id,
            }),
            Err(e) => Err(backend(e, "insertOne", collection)),
        }
    }

    async fn update_one(
        &self,
        collection: Collection,
        id: &str,
        set: Document,
    ) -> StoreResult<Option<Document>> {
        let set = to_bson(set)?;
        let updated = self
            .collection(collection)
            .find_one_and_update(filter("id", id), doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| backend(e, "findOneAndUpdate", collection))?;
        Ok(updated.map(from_bson))
    }

    async fn delete_one(&self, collection: Collection, id: &str) -> StoreResult<Option<Document>> {
        let removed = self
            .collection(collection)
            .find_one_and_delete(filter("id", id))
            .await
            .map_err(|e| backend(e, "findOneAndDelete", collection))?;
        Ok(removed.map(from_bson))
    }

    async fn replace_all(&self, collection: Collection, docs: Vec<Document>) -> StoreResult<usize> {
        let coll = self.collection(collection);
        coll.delete_many(doc! {})
            .await
            .map_err(|e| backend(e, "deleteMany", collection))?;
        if docs.is_empty() {
            return Ok(0);
        }
        let encoded = docs
            .into_iter()
            .map(to_bson)
            .collect::<StoreResult<Vec<_>>>()?;
        let result = coll
            .insert_many(encoded)
            .await
            .map_err(|e| backend(e, "insertMany", collection))?;
        Ok(result.inserted_ids.len())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .context("MongoDB ping failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Movie;
    use crate::store::from_document;
    use mongodb::bson::oid::ObjectId;

    #[test]
    fn strips_object_id_and_keeps_plain_values() {
        let raw = doc! {
            "_id": ObjectId::new(),
            "id": "m1",
            "releaseYear": 1999,
            "rating": 8.7,
            "movies": ["A", "B"],
        };
        let doc = from_bson(raw);
        assert!(doc.get("_id").is_none());
        assert_eq!(doc["id"], Value::from("m1"));
        assert_eq!(doc["releaseYear"].as_i64(), Some(1999));
        assert_eq!(doc["rating"].as_f64(), Some(8.7));
        assert_eq!(doc["movies"].as_array().map(|a| a.len()), Some(2));
    }

    #[test]
    fn timestamps_round_trip_as_bson_dates() {
        let mut doc = Document::new();
        doc.insert("id".into(), Value::from("g1"));
        doc.insert("createdAt".into(), Value::from("2024-03-01T08:15:30.250Z"));
        let encoded = to_bson(doc).unwrap();
        assert_eq!(
            encoded.get("createdAt"),
            Some(&Bson::DateTime(bson::DateTime::from_millis(1_709_280_930_250)))
        );
        let decoded = from_bson(encoded);
        assert_eq!(decoded["createdAt"], Value::from("2024-03-01T08:15:30.250Z"));
    }

    #[test]
    fn decodes_records_written_with_bson_dates() {
        let raw = doc! {
            "_id": ObjectId::new(),
            "id": "1",
            "title": "Inception",
            "description": "Dreams within dreams",
            "releaseYear": 2010,
            "rating": 8.8,
            "genreId": "g1",
            "directorId": "d1",
            "createdAt": bson::DateTime::now(),
            "updatedAt": bson::DateTime::from_millis(1_700_000_000_000),
            "__v": 0,
        };
        let movie: Movie = from_document(from_bson(raw)).unwrap();
        assert!(movie.created_at.is_some());
        assert_eq!(
            movie.updated_at.map(|ts| ts.timestamp_millis()),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn builds_exact_match_filter() {
        assert_eq!(filter("genreId", "g1"), doc! { "genreId": "g1" });
    }
}
