//! Document-store access. Records travel as JSON documents keyed by their
//! string `id`; lookups are exact-match filters on a single field.
use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

pub type Document = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Movies,
    Genres,
    Directors,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Movies, Collection::Genres, Collection::Directors];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Movies => "movies",
            Collection::Genres => "genres",
            Collection::Directors => "directors",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortBy {
    pub field: &'static str,
    pub descending: bool,
}

impl SortBy {
    pub const fn asc(field: &'static str) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    pub const fn desc(field: &'static str) -> Self {
        Self {
            field,
            descending: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} record '{id}' already exists")]
    Duplicate { collection: &'static str, id: String },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_all(&self, collection: Collection, sort: SortBy) -> StoreResult<Vec<Document>>;
    async fn find_one(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> StoreResult<Option<Document>>;
    async fn find_many(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> StoreResult<Vec<Document>>;
    async fn insert_one(&self, collection: Collection, doc: Document) -> StoreResult<()>;
    /// Sets the given fields on the record with `id`. Returns the updated record.
    async fn update_one(
        &self,
        collection: Collection,
        id: &str,
        set: Document,
    ) -> StoreResult<Option<Document>>;
    async fn delete_one(&self, collection: Collection, id: &str) -> StoreResult<Option<Document>>;
    /// Clears the collection, then inserts `docs`. Returns the number inserted.
    async fn replace_all(&self, collection: Collection, docs: Vec<Document>) -> StoreResult<usize>;
    async fn ping(&self) -> StoreResult<()>;
}

pub(crate) fn doc_id(doc: &Document) -> Option<&str> {
    doc.get("id").and_then(|v| v.as_str())
}

pub fn to_document<T: serde::Serialize>(record: &T) -> anyhow::Result<Document> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("Expected a JSON object, got {}", other),
    }
}

pub fn from_document<T: serde::de::DeserializeOwned>(doc: Document) -> anyhow::Result<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}
