// src/store/memory.rs
//
// BTreeMap-backed store used by the workflow tests and as a dev backend.
// `batch` stages every op on a copy of the data under one lock, so a
// failing op leaves the store untouched.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};

use super::{DataStore, Order, Predicate, WriteOp};
use crate::error::AppError;

type Collections = HashMap<String, BTreeMap<String, Document>>;

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn matches(doc: &Document, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Eq(field, value) => match doc.get(*field) {
            Some(Bson::Array(items)) => items.contains(value),
            Some(actual) => actual == value,
            None => false,
        },
        Predicate::TextContains(field, needle) => match doc.get_str(*field) {
            Ok(actual) => actual.to_lowercase().contains(&needle.to_lowercase()),
            Err(_) => false,
        },
    }
}

fn matches_all(doc: &Document, predicates: &[Predicate]) -> bool {
    predicates.iter().all(|p| matches(doc, p))
}

fn bson_cmp(a: &Bson, b: &Bson) -> Ordering {
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Int32(x), Bson::Int32(y)) => x.cmp(y),
        (Bson::Int64(x), Bson::Int64(y)) => x.cmp(y),
        (Bson::Double(x), Bson::Double(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn apply(data: &mut Collections, op: &WriteOp) -> Result<(), AppError> {
    match op {
        WriteOp::Create { collection, id, doc } => {
            let coll = data.entry(collection.to_string()).or_default();
            if coll.contains_key(id) {
                return Err(AppError::conflict("document already exists"));
            }
            let mut doc = doc.clone();
            doc.insert("_id", id.as_str());
            coll.insert(id.clone(), doc);
        }
        WriteOp::Update { collection, id, patch } => {
            let doc = fetch_mut(data, collection, id)?;
            for (key, value) in patch {
                doc.insert(key.as_str(), value.clone());
            }
        }
        WriteOp::UpdateIf { collection, id, expect, patch } => {
            let doc = fetch_mut(data, collection, id)?;
            if !matches_all(doc, expect) {
                return Err(AppError::conflict("precondition no longer holds"));
            }
            for (key, value) in patch {
                doc.insert(key.as_str(), value.clone());
            }
        }
        WriteOp::SetUnion { collection, id, field, value } => {
            let doc = fetch_mut(data, collection, id)?;
            let items = array_mut(doc, field);
            if !items.contains(value) {
                items.push(value.clone());
            }
        }
        WriteOp::SetRemove { collection, id, field, value } => {
            let doc = fetch_mut(data, collection, id)?;
            array_mut(doc, field).retain(|item| item != value);
        }
        WriteOp::Increment { collection, id, field, by } => {
            let doc = fetch_mut(data, collection, id)?;
            let current = match doc.get(*field) {
                Some(Bson::Int64(n)) => *n,
                Some(Bson::Int32(n)) => i64::from(*n),
                _ => 0,
            };
            doc.insert(*field, Bson::Int64(current + by));
        }
        WriteOp::Delete { collection, id } => {
            let coll = data.entry(collection.to_string()).or_default();
            if coll.remove(id).is_none() {
                return Err(AppError::not_found("document"));
            }
        }
        WriteOp::DeleteMany { collection, predicates } => {
            let coll = data.entry(collection.to_string()).or_default();
            coll.retain(|_, doc| !matches_all(doc, predicates));
        }
    }
    Ok(())
}

fn fetch_mut<'a>(
    data: &'a mut Collections,
    collection: &str,
    id: &str,
) -> Result<&'a mut Document, AppError> {
    data.entry(collection.to_string())
        .or_default()
        .get_mut(id)
        .ok_or_else(|| AppError::not_found("document"))
}

fn array_mut<'a>(doc: &'a mut Document, field: &str) -> &'a mut Vec<Bson> {
    if !matches!(doc.get(field), Some(Bson::Array(_))) {
        doc.insert(field, Bson::Array(Vec::new()));
    }
    match doc.get_mut(field) {
        Some(Bson::Array(items)) => items,
        _ => unreachable!("field was just set to an array"),
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Document, AppError> {
        self.lock()
            .get(collection)
            .and_then(|coll| coll.get(id))
            .cloned()
            .ok_or_else(|| AppError::not_found("document"))
    }

    async fn find(
        &self,
        collection: &str,
        predicates: &[Predicate],
        order: Option<Order>,
    ) -> Result<Vec<Document>, AppError> {
        let data = self.lock();
        let mut results: Vec<Document> = data
            .get(collection)
            .map(|coll| {
                coll.values()
                    .filter(|doc| matches_all(doc, predicates))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(order) = order {
            let (field, reverse) = match order {
                Order::Asc(field) => (field, false),
                Order::Desc(field) => (field, true),
            };
            results.sort_by(|a, b| {
                let lhs = a.get(field).cloned().unwrap_or(Bson::Null);
                let rhs = b.get(field).cloned().unwrap_or(Bson::Null);
                let ord = bson_cmp(&lhs, &rhs);
                if reverse {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        Ok(results)
    }

    async fn create(&self, collection: &str, id: &str, doc: Document) -> Result<(), AppError> {
        let mut data = self.lock();
        let coll = data.entry(collection.to_string()).or_default();
        if coll.contains_key(id) {
            return Err(AppError::conflict("document already exists"));
        }
        let mut doc = doc;
        doc.insert("_id", id);
        coll.insert(id.to_string(), doc);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Document) -> Result<(), AppError> {
        let mut data = self.lock();
        let doc = fetch_mut(&mut data, collection, id)?;
        for (key, value) in &patch {
            doc.insert(key.as_str(), value.clone());
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), AppError> {
        let mut data = self.lock();
        let coll = data.entry(collection.to_string()).or_default();
        if coll.remove(id).is_none() {
            return Err(AppError::not_found("document"));
        }
        Ok(())
    }

    async fn delete_many(
        &self,
        collection: &str,
        predicates: &[Predicate],
    ) -> Result<u64, AppError> {
        let mut data = self.lock();
        let coll = data.entry(collection.to_string()).or_default();
        let before = coll.len() as u64;
        coll.retain(|_, doc| !matches_all(doc, predicates));
        Ok(before - coll.len() as u64)
    }

    async fn batch(&self, ops: Vec<WriteOp>) -> Result<(), AppError> {
        let mut data = self.lock();
        let mut staged = data.clone();
        for op in &ops {
            apply(&mut staged, op)?;
        }
        *data = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PROJECTS;
    use mongodb::bson::doc;

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let store = MemoryStore::new();
        store
            .create(PROJECTS, "p1", doc! { "title": "one" })
            .await
            .unwrap();
        let err = store
            .create(PROJECTS, "p1", doc! { "title": "two" })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn failed_batch_leaves_store_untouched() {
        let store = MemoryStore::new();
        store
            .create(PROJECTS, "p1", doc! { "views": 0_i64 })
            .await
            .unwrap();
        let err = store
            .batch(vec![
                WriteOp::Increment {
                    collection: PROJECTS,
                    id: "p1".into(),
                    field: "views",
                    by: 1,
                },
                WriteOp::Delete {
                    collection: PROJECTS,
                    id: "missing".into(),
                },
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let doc = store.get(PROJECTS, "p1").await.unwrap();
        assert_eq!(doc.get_i64("views").unwrap(), 0);
    }

    // Batch writes addressing an absent document abort the whole batch;
    // both backends share this behavior.
    #[tokio::test]
    async fn batch_ops_against_missing_documents_fail() {
        let store = MemoryStore::new();
        store
            .create(PROJECTS, "p1", doc! { "members": ["a"] })
            .await
            .unwrap();
        let ops = [
            WriteOp::SetUnion {
                collection: PROJECTS,
                id: "ghost".into(),
                field: "members",
                value: Bson::String("b".into()),
            },
            WriteOp::SetRemove {
                collection: PROJECTS,
                id: "ghost".into(),
                field: "members",
                value: Bson::String("a".into()),
            },
            WriteOp::Increment {
                collection: PROJECTS,
                id: "ghost".into(),
                field: "views",
                by: 1,
            },
            WriteOp::Delete {
                collection: PROJECTS,
                id: "ghost".into(),
            },
        ];
        for op in ops {
            let err = store.batch(vec![op]).await.unwrap_err();
            assert!(matches!(err, AppError::NotFound(_)));
        }
    }

    #[tokio::test]
    async fn set_union_is_idempotent() {
        let store = MemoryStore::new();
        store
            .create(PROJECTS, "p1", doc! { "admins": ["a"] })
            .await
            .unwrap();
        for _ in 0..2 {
            store
                .batch(vec![WriteOp::SetUnion {
                    collection: PROJECTS,
                    id: "p1".into(),
                    field: "admins",
                    value: Bson::String("b".into()),
                }])
                .await
                .unwrap();
        }
        let doc = store.get(PROJECTS, "p1").await.unwrap();
        let admins = doc.get_array("admins").unwrap();
        assert_eq!(admins.len(), 2);
    }

    #[tokio::test]
    async fn find_orders_by_datetime_field() {
        let store = MemoryStore::new();
        let t1 = mongodb::bson::DateTime::from_millis(1_000);
        let t2 = mongodb::bson::DateTime::from_millis(2_000);
        store
            .create("messages", "m2", doc! { "room_id": "r", "created_at": t2 })
            .await
            .unwrap();
        store
            .create("messages", "m1", doc! { "room_id": "r", "created_at": t1 })
            .await
            .unwrap();
        let results = store
            .find(
                "messages",
                &[Predicate::Eq("room_id", Bson::String("r".into()))],
                Some(Order::Asc("created_at")),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|d| d.get_str("_id").unwrap()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn eq_predicate_matches_array_membership() {
        let store = MemoryStore::new();
        store
            .create(PROJECTS, "p1", doc! { "members": ["a", "b"] })
            .await
            .unwrap();
        let hits = store
            .find(
                PROJECTS,
                &[Predicate::Eq("members", Bson::String("b".into()))],
                None,
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }
}
