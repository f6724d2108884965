use crate::models::{
    Document, DocumentClass, LineItem, Lot, Project, ReturnTransaction, Subtask, Task,
};
use crate::services::error::BookkeepingError;
use crate::services::store::{Store, StoreResult};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, Bson},
    options::{
        FindOneAndUpdateOptions, FindOneOptions, FindOptions, IndexOptions, ReturnDocument,
    },
    Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;
use std::time::Duration;

#[derive(Clone)]
pub struct MongoStore {
    client: MongoClient,
    db: Database,
}

impl MongoStore {
    /// Connect and wait until the server answers a ping, retrying with
    /// exponential backoff for up to `max_wait`.
    pub async fn connect(uri: &str, database: &str, max_wait: Duration) -> Result<Self, AppError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to parse MongoDB connection string: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })?;
        let db = client.database(database);
        let store = Self { client, db };

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(max_wait),
            ..Default::default()
        };
        retry(policy, || async {
            store.ping().await.map_err(|e| {
                tracing::warn!(error = %e, "MongoDB not reachable yet, retrying");
                backoff::Error::transient(e)
            })
        })
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })?;

        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(store)
    }

    async fn ping(&self) -> Result<(), mongodb::error::Error> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map(|_| ())
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for bookkeeping-service");

        let indexes = [
            ("line_items", doc! { "document_id": 1 }, "line_document_idx"),
            ("line_items", doc! { "lot_id": 1 }, "line_lot_idx"),
            ("lots", doc! { "document_id": 1 }, "lot_document_idx"),
            ("returns", doc! { "original_code": 1 }, "return_original_idx"),
            ("returns", doc! { "products.lot_id": 1 }, "return_lot_idx"),
            ("tasks", doc! { "project_id": 1 }, "task_project_idx"),
            ("subtasks", doc! { "task_id": 1 }, "subtask_task_idx"),
        ];

        for (collection, keys, name) in indexes {
            let index = IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().name(name.to_string()).build())
                .build();

            self.db
                .collection::<bson::Document>(collection)
                .create_index(index, None)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to create index {} on {}: {}", name, collection, e);
                    AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
                })?;
            tracing::info!(collection = collection, index = name, "Created index");
        }

        Ok(())
    }

    fn sequences(&self) -> Collection<bson::Document> {
        self.db.collection("sequences")
    }

    fn documents(&self) -> Collection<Document> {
        self.db.collection("documents")
    }

    fn line_items(&self) -> Collection<LineItem> {
        self.db.collection("line_items")
    }

    fn lots(&self) -> Collection<Lot> {
        self.db.collection("lots")
    }

    fn returns(&self) -> Collection<ReturnTransaction> {
        self.db.collection("returns")
    }

    fn projects(&self) -> Collection<Project> {
        self.db.collection("projects")
    }

    fn tasks(&self) -> Collection<Task> {
        self.db.collection("tasks")
    }

    fn subtasks(&self) -> Collection<Subtask> {
        self.db.collection("subtasks")
    }

    fn after_update() -> FindOneAndUpdateOptions {
        FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build()
    }
}

/// Counters may come back as Int32 or Int64 depending on how the
/// pipeline resolved `$max`.
fn counter_value(record: &bson::Document) -> StoreResult<u64> {
    match record.get("counter") {
        Some(Bson::Int32(n)) if *n >= 0 => Ok(*n as u64),
        Some(Bson::Int64(n)) if *n >= 0 => Ok(*n as u64),
        Some(Bson::Double(n)) if *n >= 0.0 => Ok(*n as u64),
        other => Err(BookkeepingError::StorageUnavailable(anyhow::anyhow!(
            "unexpected counter value: {:?}",
            other
        ))),
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn health_check(&self) -> StoreResult<()> {
        self.ping().await.map_err(|e| {
            tracing::error!("MongoDB health check failed: {}", e);
            BookkeepingError::from(e)
        })
    }

    async fn counter_exists(&self, key: &str) -> StoreResult<bool> {
        let found = self.sequences().find_one(doc! { "_id": key }, None).await?;
        Ok(found.is_some())
    }

    async fn increment_counter(&self, key: &str, floor: u64) -> StoreResult<u64> {
        let floor = i64::try_from(floor)
            .map_err(|_| BookkeepingError::InvalidQuantity(format!("counter floor {}", floor)))?;
        let pipeline = vec![doc! {
            "$set": {
                "counter": {
                    "$add": [
                        { "$max": [ { "$ifNull": ["$counter", 0_i64] }, floor ] },
                        1_i64
                    ]
                }
            }
        }];
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        let record = self
            .sequences()
            .find_one_and_update(doc! { "_id": key }, pipeline, options)
            .await?
            .ok_or_else(|| {
                BookkeepingError::StorageUnavailable(anyhow::anyhow!(
                    "counter upsert for {} returned no document",
                    key
                ))
            })?;
        counter_value(&record)
    }

    async fn latest_id_with_prefix(
        &self,
        class: DocumentClass,
        prefix: &str,
    ) -> StoreResult<Option<String>> {
        let filter = doc! { "_id": { "$regex": format!("^{}", prefix) } };
        let options = FindOneOptions::builder()
            .sort(doc! { "_id": -1 })
            .projection(doc! { "_id": 1 })
            .build();

        let collection = if class == DocumentClass::Return {
            "returns"
        } else {
            "documents"
        };
        let latest = self
            .db
            .collection::<bson::Document>(collection)
            .find_one(filter, options)
            .await?;
        Ok(latest.and_then(|d| d.get_str("_id").ok().map(str::to_string)))
    }

    async fn insert_document(&self, document: &Document) -> StoreResult<()> {
        self.documents().insert_one(document, None).await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> StoreResult<Option<Document>> {
        Ok(self.documents().find_one(doc! { "_id": id }, None).await?)
    }

    async fn delete_document(&self, id: &str) -> StoreResult<bool> {
        let result = self.documents().delete_one(doc! { "_id": id }, None).await?;
        Ok(result.deleted_count > 0)
    }

    async fn insert_line_items(&self, lines: &[LineItem]) -> StoreResult<()> {
        if lines.is_empty() {
            return Ok(());
        }
        self.line_items().insert_many(lines, None).await?;
        Ok(())
    }

    async fn get_line_item(&self, id: &str) -> StoreResult<Option<LineItem>> {
        Ok(self.line_items().find_one(doc! { "_id": id }, None).await?)
    }

    async fn list_line_items(&self, document_id: &str) -> StoreResult<Vec<LineItem>> {
        let options = FindOptions::builder()
            .sort(doc! { "_id": 1 })
            .build();
        let cursor = self
            .line_items()
            .find(doc! { "document_id": document_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn delete_line_items(&self, document_id: &str) -> StoreResult<u64> {
        let result = self
            .line_items()
            .delete_many(doc! { "document_id": document_id }, None)
            .await?;
        Ok(result.deleted_count)
    }

    async fn debit_line(&self, line_id: &str, qty: i64) -> StoreResult<Option<LineItem>> {
        let filter = doc! {
            "_id": line_id,
            "$expr": { "$lte": [ { "$add": ["$returned_quantity", qty] }, "$quantity" ] },
        };
        Ok(self
            .line_items()
            .find_one_and_update(
                filter,
                doc! { "$inc": { "returned_quantity": qty } },
                Self::after_update(),
            )
            .await?)
    }

    async fn credit_line(&self, line_id: &str, qty: i64) -> StoreResult<Option<LineItem>> {
        let filter = doc! { "_id": line_id, "returned_quantity": { "$gte": qty } };
        Ok(self
            .line_items()
            .find_one_and_update(
                filter,
                doc! { "$inc": { "returned_quantity": -qty } },
                Self::after_update(),
            )
            .await?)
    }

    async fn insert_lots(&self, lots: &[Lot]) -> StoreResult<()> {
        if lots.is_empty() {
            return Ok(());
        }
        self.lots().insert_many(lots, None).await?;
        Ok(())
    }

    async fn get_lot(&self, id: &str) -> StoreResult<Option<Lot>> {
        Ok(self.lots().find_one(doc! { "_id": id }, None).await?)
    }

    async fn reserve_lot(&self, lot_id: &str, qty: i64) -> StoreResult<Option<Lot>> {
        let filter = doc! {
            "_id": lot_id,
            "active": true,
            "remaining_quantity": { "$gte": qty },
        };
        Ok(self
            .lots()
            .find_one_and_update(
                filter,
                doc! { "$inc": { "remaining_quantity": -qty } },
                Self::after_update(),
            )
            .await?)
    }

    async fn release_lot(&self, lot_id: &str, qty: i64) -> StoreResult<Option<Lot>> {
        let filter = doc! {
            "_id": lot_id,
            "$expr": {
                "$lte": [ { "$add": ["$remaining_quantity", qty] }, "$original_quantity" ]
            },
        };
        Ok(self
            .lots()
            .find_one_and_update(
                filter,
                doc! { "$inc": { "remaining_quantity": qty } },
                Self::after_update(),
            )
            .await?)
    }

    async fn set_lot_active(&self, lot_id: &str, active: bool) -> StoreResult<Option<Lot>> {
        Ok(self
            .lots()
            .find_one_and_update(
                doc! { "_id": lot_id },
                doc! { "$set": { "active": active } },
                Self::after_update(),
            )
            .await?)
    }

    async fn delete_lot(&self, lot_id: &str) -> StoreResult<bool> {
        let result = self.lots().delete_one(doc! { "_id": lot_id }, None).await?;
        Ok(result.deleted_count > 0)
    }

    async fn count_lot_references(&self, lot_id: &str) -> StoreResult<u64> {
        let lines = self
            .line_items()
            .count_documents(doc! { "lot_id": lot_id }, None)
            .await?;
        let returns = self
            .returns()
            .count_documents(doc! { "products.lot_id": lot_id }, None)
            .await?;
        Ok(lines + returns)
    }

    async fn list_lots_of_document(&self, document_id: &str) -> StoreResult<Vec<Lot>> {
        let cursor = self
            .lots()
            .find(doc! { "document_id": document_id }, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn delete_lots_of_document(&self, document_id: &str) -> StoreResult<u64> {
        let result = self
            .lots()
            .delete_many(doc! { "document_id": document_id }, None)
            .await?;
        Ok(result.deleted_count)
    }

    async fn insert_return(&self, transaction: &ReturnTransaction) -> StoreResult<()> {
        self.returns().insert_one(transaction, None).await?;
        Ok(())
    }

    async fn get_return(&self, id: &str) -> StoreResult<Option<ReturnTransaction>> {
        Ok(self.returns().find_one(doc! { "_id": id }, None).await?)
    }

    async fn count_returns_for(&self, original_code: &str) -> StoreResult<u64> {
        Ok(self
            .returns()
            .count_documents(doc! { "original_code": original_code }, None)
            .await?)
    }

    async fn insert_project(&self, project: &Project) -> StoreResult<()> {
        self.projects().insert_one(project, None).await?;
        Ok(())
    }

    async fn get_project(&self, id: &str) -> StoreResult<Option<Project>> {
        Ok(self.projects().find_one(doc! { "_id": id }, None).await?)
    }

    async fn delete_project(&self, id: &str) -> StoreResult<bool> {
        let result = self.projects().delete_one(doc! { "_id": id }, None).await?;
        Ok(result.deleted_count > 0)
    }

    async fn link_task(&self, project_id: &str, task_id: &str) -> StoreResult<bool> {
        let result = self
            .projects()
            .update_one(
                doc! { "_id": project_id },
                doc! { "$addToSet": { "task_ids": task_id } },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn unlink_task(&self, project_id: &str, task_id: &str) -> StoreResult<bool> {
        let result = self
            .projects()
            .update_one(
                doc! { "_id": project_id },
                doc! { "$pull": { "task_ids": task_id } },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn set_project_tasks(&self, project_id: &str, task_ids: &[String]) -> StoreResult<bool> {
        let result = self
            .projects()
            .update_one(
                doc! { "_id": project_id },
                doc! { "$set": { "task_ids": task_ids } },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn insert_task(&self, task: &Task) -> StoreResult<()> {
        self.tasks().insert_one(task, None).await?;
        Ok(())
    }

    async fn get_task(&self, id: &str) -> StoreResult<Option<Task>> {
        Ok(self.tasks().find_one(doc! { "_id": id }, None).await?)
    }

    async fn list_tasks(&self, project_id: &str) -> StoreResult<Vec<Task>> {
        let options = FindOptions::builder()
            .sort(doc! { "created_utc": 1, "_id": 1 })
            .build();
        let cursor = self
            .tasks()
            .find(doc! { "project_id": project_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn delete_task(&self, id: &str) -> StoreResult<bool> {
        let result = self.tasks().delete_one(doc! { "_id": id }, None).await?;
        Ok(result.deleted_count > 0)
    }

    async fn link_subtask(&self, task_id: &str, subtask_id: &str) -> StoreResult<bool> {
        let result = self
            .tasks()
            .update_one(
                doc! { "_id": task_id },
                doc! { "$addToSet": { "subtask_ids": subtask_id } },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn unlink_subtask(&self, task_id: &str, subtask_id: &str) -> StoreResult<bool> {
        let result = self
            .tasks()
            .update_one(
                doc! { "_id": task_id },
                doc! { "$pull": { "subtask_ids": subtask_id } },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn set_task_subtasks(
        &self,
        task_id: &str,
        subtask_ids: &[String],
    ) -> StoreResult<bool> {
        let result = self
            .tasks()
            .update_one(
                doc! { "_id": task_id },
                doc! { "$set": { "subtask_ids": subtask_ids } },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn insert_subtask(&self, subtask: &Subtask) -> StoreResult<()> {
        self.subtasks().insert_one(subtask, None).await?;
        Ok(())
    }

    async fn get_subtask(&self, id: &str) -> StoreResult<Option<Subtask>> {
        Ok(self.subtasks().find_one(doc! { "_id": id }, None).await?)
    }

    async fn list_subtasks(&self, task_id: &str) -> StoreResult<Vec<Subtask>> {
        let options = FindOptions::builder()
            .sort(doc! { "created_utc": 1, "_id": 1 })
            .build();
        let cursor = self
            .subtasks()
            .find(doc! { "task_id": task_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn delete_subtask(&self, id: &str) -> StoreResult<bool> {
        let result = self.subtasks().delete_one(doc! { "_id": id }, None).await?;
        Ok(result.deleted_count > 0)
    }

    async fn delete_subtasks_of_task(&self, task_id: &str) -> StoreResult<u64> {
        let result = self
            .subtasks()
            .delete_many(doc! { "task_id": task_id }, None)
            .await?;
        Ok(result.deleted_count)
    }
}
