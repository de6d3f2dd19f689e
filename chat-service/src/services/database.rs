use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, DateTime as BsonDateTime},
    error::{ErrorKind, WriteFailure},
    options::{FindOptions, IndexOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;

use super::store::ChatStore;
use crate::models::{pair_key, ChatMessage, Conversation};

const DUPLICATE_KEY: i32 = 11000;

#[derive(Clone)]
pub struct ChatDb {
    client: MongoClient,
    db: Database,
}

fn db_error(action: &'static str) -> impl FnOnce(mongodb::error::Error) -> AppError {
    move |e| {
        tracing::error!("Failed to {}: {}", action, e);
        AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

impl ChatDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!(uri = %uri, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB at {}: {}", uri, e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for chat-service");

        let conversation_index = IndexModel::builder()
            .keys(doc! { "conversation_id": 1, "created_utc": 1 })
            .options(
                IndexOptions::builder()
                    .name("conversation_created_idx".to_string())
                    .build(),
            )
            .build();
        self.messages_collection()
            .create_index(conversation_index, None)
            .await
            .map_err(db_error("create message index"))?;

        let participants_index = IndexModel::builder()
            .keys(doc! { "participants": 1 })
            .options(
                IndexOptions::builder()
                    .name("participants_idx".to_string())
                    .build(),
            )
            .build();
        self.conversations()
            .create_index(participants_index, None)
            .await
            .map_err(db_error("create conversation index"))?;

        tracing::info!("Successfully created all MongoDB indexes");
        Ok(())
    }

    pub fn conversations(&self) -> Collection<Conversation> {
        self.db.collection("conversations")
    }

    pub fn messages_collection(&self) -> Collection<ChatMessage> {
        self.db.collection("messages")
    }
}

#[async_trait]
impl ChatStore for ChatDb {
    async fn create_conversation_if_absent(&self, conversation: &Conversation) -> Result<bool, AppError> {
        match self.conversations().insert_one(conversation, None).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(db_error("insert conversation")(e)),
        }
    }

    async fn find_conversation(&self, a: &str, b: &str) -> Result<Option<Conversation>, AppError> {
        self.conversations()
            .find_one(doc! { "_id": pair_key(a, b) }, None)
            .await
            .map_err(db_error("find conversation"))
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<bool, AppError> {
        match self.messages_collection().insert_one(message, None).await {
            Ok(_) => {}
            Err(e) if is_duplicate_key(&e) => return Ok(false),
            Err(e) => return Err(db_error("insert message")(e)),
        }

        let at = BsonDateTime::from_chrono(message.created_utc);
        self.conversations()
            .update_one(
                doc! { "_id": &message.conversation_id, "updated_utc": { "$lt": at } },
                doc! { "$set": { "updated_utc": at } },
                None,
            )
            .await
            .map_err(db_error("touch conversation"))?;
        Ok(true)
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, AppError> {
        let find_options = FindOptions::builder().sort(doc! { "created_utc": 1 }).build();
        let cursor = self
            .messages_collection()
            .find(doc! { "conversation_id": conversation_id }, find_options)
            .await
            .map_err(db_error("list messages"))?;
        cursor.try_collect().await.map_err(db_error("collect messages"))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;
        Ok(())
    }
}
