use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{doc_id, Collection, Document, DocumentStore, SortBy, StoreError, StoreResult};

/// In-process store with the same semantics as the MongoDB backend.
/// Documents keep insertion order, which breaks sort ties.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn field_matches(doc: &Document, field: &str, value: &str) -> bool {
    match doc.get(field) {
        Some(Value::String(s)) => s == value,
        Some(other) => other.to_string() == value,
        None => false,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_all(&self, collection: Collection, sort: SortBy) -> StoreResult<Vec<Document>> {
        let guard = self.collections.read().await;
        let mut docs = guard.get(&collection).cloned().unwrap_or_default();
        docs.sort_by(|a, b| {
            let ord = compare_values(a.get(sort.field), b.get(sort.field));
            if sort.descending {
                ord.reverse()
            } else {
                ord
            }
        });
        Ok(docs)
    }

    async fn find_one(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> StoreResult<Option<Document>> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(&collection)
            .and_then(|docs| docs.iter().find(|d| field_matches(d, field, value)))
            .cloned())
    }

    async fn find_many(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> StoreResult<Vec<Document>> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| field_matches(d, field, value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert_one(&self, collection: Collection, doc: Document) -> StoreResult<()> {
        let mut guard = self.collections.write().await;
        let docs = guard.entry(collection).or_default();
        let id = doc_id(&doc).unwrap_or_default().to_string();
        if docs.iter().any(|d| doc_id(d) == Some(id.as_str())) {
            return Err(StoreError::Duplicate {
                collection: collection.name(),
                id,
            });
        }
        docs.push(doc);
        Ok(())
    }

    async fn update_one(
        &self,
        collection: Collection,
        id: &str,
        set: Document,
    ) -> StoreResult<Option<Document>> {
        let mut guard = self.collections.write().await;
        let Some(doc) = guard
            .get_mut(&collection)
            .and_then(|docs| docs.iter_mut().find(|d| doc_id(d) == Some(id)))
        else {
            return Ok(None);
        };
        for (key, value) in set {
            doc.insert(key, value);
        }
        Ok(Some(doc.clone()))
    }

    async fn delete_one(&self, collection: Collection, id: &str) -> StoreResult<Option<Document>> {
        let mut guard = self.collections.write().await;
        let Some(docs) = guard.get_mut(&collection) else {
            return Ok(None);
        };
        let pos = docs.iter().position(|d| doc_id(d) == Some(id));
        Ok(pos.map(|i| docs.remove(i)))
    }

    async fn replace_all(&self, collection: Collection, docs: Vec<Document>) -> StoreResult<usize> {
        let mut guard = self.collections.write().await;
        let count = docs.len();
        guard.insert(collection, docs);
        Ok(count)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn rejects_duplicate_ids() {
        let store = MemoryStore::new();
        store
            .insert_one(Collection::Genres, doc(json!({"id": "g1", "name": "Drama"})))
            .await
            .unwrap();
        let err = store
            .insert_one(Collection::Genres, doc(json!({"id": "g1", "name": "Other"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { id, .. } if id == "g1"));
    }

    #[tokio::test]
    async fn sorts_by_field_and_keeps_insertion_order_on_ties() {
        let store = MemoryStore::new();
        for (id, name) in [("a", "Nolan"), ("b", "Bigelow"), ("c", "Nolan")] {
            store
                .insert_one(Collection::Directors, doc(json!({"id": id, "name": name})))
                .await
                .unwrap();
        }
        let asc = store
            .find_all(Collection::Directors, SortBy::asc("name"))
            .await
            .unwrap();
        let ids: Vec<_> = asc.iter().filter_map(doc_id).collect();
        assert_eq!(ids, ["b", "a", "c"]);

        let desc = store
            .find_all(Collection::Directors, SortBy::desc("name"))
            .await
            .unwrap();
        let ids: Vec<_> = desc.iter().filter_map(doc_id).collect();
        assert_eq!(ids, ["a", "c", "b"]);
    }

    #[tokio::test]
    async fn update_sets_fields_and_delete_returns_removed() {
        let store = MemoryStore::new();
        store
            .insert_one(Collection::Movies, doc(json!({"id": "m1", "rating": 7.0})))
            .await
            .unwrap();
        let updated = store
            .update_one(Collection::Movies, "m1", doc(json!({"rating": 9.5})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["rating"], json!(9.5));
        assert!(store
            .update_one(Collection::Movies, "nope", Document::new())
            .await
            .unwrap()
            .is_none());

        let removed = store.delete_one(Collection::Movies, "m1").await.unwrap();
        assert!(removed.is_some());
        assert!(store
            .find_one(Collection::Movies, "id", "m1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn find_many_is_exact_match() {
        let store = MemoryStore::new();
        store
            .replace_all(
                Collection::Movies,
                vec![
                    doc(json!({"id": "1", "genreId": "g1"})),
                    doc(json!({"id": "2", "genreId": "g10"})),
                    doc(json!({"id": "3", "genreId": "g1"})),
                ],
            )
            .await
            .unwrap();
        let found = store
            .find_many(Collection::Movies, "genreId", "g1")
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }
}
