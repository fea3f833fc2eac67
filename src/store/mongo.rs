// src/store/mongo.rs

use mongodb::bson::{doc, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::ClientOptions;
use mongodb::{Client, ClientSession, Collection, Database};

use async_trait::async_trait;
use futures_util::StreamExt;
use log::error;

use super::{DataStore, Order, Predicate, WriteOp};
use crate::error::AppError;

pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    pub async fn init(uri: &str, db_name: &str) -> Result<Self, AppError> {
        let options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(options)?;
        let db = client.database(db_name);
        Ok(MongoStore { client, db })
    }

    fn coll(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }

    fn filter_for(predicates: &[Predicate]) -> Document {
        let mut filter = doc! {};
        for predicate in predicates {
            match predicate {
                Predicate::Eq(field, value) => {
                    filter.insert(*field, value.clone());
                }
                Predicate::TextContains(field, needle) => {
                    filter.insert(
                        *field,
                        doc! { "$regex": regex::escape(needle), "$options": "i" },
                    );
                }
            }
        }
        filter
    }

    async fn apply_op(&self, session: &mut ClientSession, op: &WriteOp) -> Result<(), AppError> {
        match op {
            WriteOp::Create { collection, id, doc } => {
                let mut doc = doc.clone();
                doc.insert("_id", id.as_str());
                self.coll(collection)
                    .insert_one(doc)
                    .session(&mut *session)
                    .await
                    .map_err(|e| {
                        if is_duplicate_key(&e) {
                            AppError::conflict("document already exists")
                        } else {
                            e.into()
                        }
                    })?;
            }
            WriteOp::Update { collection, id, patch } => {
                let result = self
                    .coll(collection)
                    .update_one(doc! { "_id": id }, doc! { "$set": patch.clone() })
                    .session(&mut *session)
                    .await?;
                if result.matched_count == 0 {
                    return Err(AppError::not_found("document"));
                }
            }
            WriteOp::UpdateIf { collection, id, expect, patch } => {
                let mut filter = Self::filter_for(expect);
                filter.insert("_id", id.as_str());
                let result = self
                    .coll(collection)
                    .update_one(filter, doc! { "$set": patch.clone() })
                    .session(&mut *session)
                    .await?;
                if result.matched_count == 0 {
                    return Err(AppError::conflict("precondition no longer holds"));
                }
            }
            WriteOp::SetUnion { collection, id, field, value } => {
                let result = self
                    .coll(collection)
                    .update_one(doc! { "_id": id }, doc! { "$addToSet": { *field: value.clone() } })
                    .session(&mut *session)
                    .await?;
                if result.matched_count == 0 {
                    return Err(AppError::not_found("document"));
                }
            }
            WriteOp::SetRemove { collection, id, field, value } => {
                let result = self
                    .coll(collection)
                    .update_one(doc! { "_id": id }, doc! { "$pull": { *field: value.clone() } })
                    .session(&mut *session)
                    .await?;
                if result.matched_count == 0 {
                    return Err(AppError::not_found("document"));
                }
            }
            WriteOp::Increment { collection, id, field, by } => {
                let result = self
                    .coll(collection)
                    .update_one(doc! { "_id": id }, doc! { "$inc": { *field: by } })
                    .session(&mut *session)
                    .await?;
                if result.matched_count == 0 {
                    return Err(AppError::not_found("document"));
                }
            }
            WriteOp::Delete { collection, id } => {
                let result = self
                    .coll(collection)
                    .delete_one(doc! { "_id": id })
                    .session(&mut *session)
                    .await?;
                if result.deleted_count == 0 {
                    return Err(AppError::not_found("document"));
                }
            }
            WriteOp::DeleteMany { collection, predicates } => {
                self.coll(collection)
                    .delete_many(Self::filter_for(predicates))
                    .session(&mut *session)
                    .await?;
            }
        }
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref write_err)) if write_err.code == 11000
    )
}

#[async_trait]
impl DataStore for MongoStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Document, AppError> {
        match self.coll(collection).find_one(doc! { "_id": id }).await? {
            Some(doc) => Ok(doc),
            None => Err(AppError::not_found("document")),
        }
    }

    async fn find(
        &self,
        collection: &str,
        predicates: &[Predicate],
        order: Option<Order>,
    ) -> Result<Vec<Document>, AppError> {
        let coll = self.coll(collection);
        let mut find = coll.find(Self::filter_for(predicates));
        if let Some(order) = order {
            find = match order {
                Order::Asc(field) => find.sort(doc! { field: 1 }),
                Order::Desc(field) => find.sort(doc! { field: -1 }),
            };
        }
        let mut cursor = find.await?;
        let mut documents = Vec::new();
        while let Some(result) = cursor.next().await {
            documents.push(result?);
        }
        Ok(documents)
    }

    async fn create(&self, collection: &str, id: &str, doc: Document) -> Result<(), AppError> {
        let mut doc = doc;
        doc.insert("_id", id);
        self.coll(collection).insert_one(doc).await.map_err(|e| {
            if is_duplicate_key(&e) {
                AppError::conflict("document already exists")
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Document) -> Result<(), AppError> {
        let result = self
            .coll(collection)
            .update_one(doc! { "_id": id }, doc! { "$set": patch })
            .await?;
        if result.matched_count == 0 {
            return Err(AppError::not_found("document"));
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), AppError> {
        let result = self.coll(collection).delete_one(doc! { "_id": id }).await?;
        if result.deleted_count == 0 {
            return Err(AppError::not_found("document"));
        }
        Ok(())
    }

    async fn delete_many(
        &self,
        collection: &str,
        predicates: &[Predicate],
    ) -> Result<u64, AppError> {
        let result = self
            .coll(collection)
            .delete_many(Self::filter_for(predicates))
            .await?;
        Ok(result.deleted_count)
    }

    async fn batch(&self, ops: Vec<WriteOp>) -> Result<(), AppError> {
        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;
        for op in &ops {
            if let Err(err) = self.apply_op(&mut session, op).await {
                if let Err(abort_err) = session.abort_transaction().await {
                    error!("failed to abort transaction: {}", abort_err);
                }
                return Err(err);
            }
        }
        session.commit_transaction().await?;
        Ok(())
    }
}
