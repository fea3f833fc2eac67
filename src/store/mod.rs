// src/store/mod.rs
//
// The data access layer: generic document CRUD plus an atomic batch,
// organized into named collections. Workflow code talks to this trait
// only, so the same logic runs against MongoDB in production and the
// in-memory store in tests.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use mongodb::bson::{Bson, DateTime as BsonDateTime, Document};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub enum Predicate {
    /// Field equals value. On array fields this matches membership,
    /// mirroring MongoDB's equality semantics.
    Eq(&'static str, Bson),
    /// Case-insensitive substring match on a string field.
    TextContains(&'static str, String),
}

#[derive(Debug, Clone, Copy)]
pub enum Order {
    Asc(&'static str),
    Desc(&'static str),
}

/// One write inside an atomic batch. A batch either fully applies or
/// leaves the store untouched.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Fails the batch with `Conflict` when the id already exists.
    Create {
        collection: &'static str,
        id: String,
        doc: Document,
    },
    Update {
        collection: &'static str,
        id: String,
        patch: Document,
    },
    /// Conditional update: the patch applies only while every `expect`
    /// predicate still holds, otherwise the batch fails with `Conflict`.
    UpdateIf {
        collection: &'static str,
        id: String,
        expect: Vec<Predicate>,
        patch: Document,
    },
    /// Add to an array field with set semantics (no duplicates).
    SetUnion {
        collection: &'static str,
        id: String,
        field: &'static str,
        value: Bson,
    },
    /// Remove every occurrence of the value from an array field.
    SetRemove {
        collection: &'static str,
        id: String,
        field: &'static str,
        value: Bson,
    },
    Increment {
        collection: &'static str,
        id: String,
        field: &'static str,
        by: i64,
    },
    Delete {
        collection: &'static str,
        id: String,
    },
    DeleteMany {
        collection: &'static str,
        predicates: Vec<Predicate>,
    },
}

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Document, AppError>;

    async fn find(
        &self,
        collection: &str,
        predicates: &[Predicate],
        order: Option<Order>,
    ) -> Result<Vec<Document>, AppError>;

    /// Fails with `Conflict` when a document with this id already exists.
    async fn create(&self, collection: &str, id: &str, doc: Document) -> Result<(), AppError>;

    async fn update(&self, collection: &str, id: &str, patch: Document) -> Result<(), AppError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), AppError>;

    async fn delete_many(
        &self,
        collection: &str,
        predicates: &[Predicate],
    ) -> Result<u64, AppError>;

    /// Atomic-or-nothing application of every op.
    async fn batch(&self, ops: Vec<WriteOp>) -> Result<(), AppError>;

    /// Commit-time wall clock, used for message ordering.
    fn server_timestamp(&self) -> BsonDateTime {
        BsonDateTime::now()
    }
}

pub fn to_doc<T: Serialize>(value: &T) -> Result<Document, AppError> {
    Ok(mongodb::bson::to_document(value)?)
}

pub fn from_doc<T: DeserializeOwned>(doc: Document) -> Result<T, AppError> {
    Ok(mongodb::bson::from_document(doc)?)
}

/// Typed `get`.
pub async fn get_as<T: DeserializeOwned>(
    store: &dyn DataStore,
    collection: &str,
    id: &str,
) -> Result<T, AppError> {
    from_doc(store.get(collection, id).await?)
}

/// Typed `find`.
pub async fn find_as<T: DeserializeOwned>(
    store: &dyn DataStore,
    collection: &str,
    predicates: &[Predicate],
    order: Option<Order>,
) -> Result<Vec<T>, AppError> {
    store
        .find(collection, predicates, order)
        .await?
        .into_iter()
        .map(from_doc)
        .collect()
}
