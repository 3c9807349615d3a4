use async_trait::async_trait;

pub mod error;
pub mod ids;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{AttachmentId, ChatId, MessageId};
pub use sqlite::SqliteStorage;
pub use types::{
    AttachmentKind, AttachmentRecord, CachedModelRecord, ChatPatch, ChatRecord,
    DEFAULT_CHAT_MODEL, DEFAULT_CHAT_TITLE, MessageRecord, MessageRole, ModelConfig,
    NewAttachment, NewChat, NewMessage, SettingsRecord,
};

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Mints the id and both timestamps; empty title/model fall back to defaults.
    async fn create_chat(&self, input: NewChat) -> StorageResult<ChatRecord>;
    /// Most recently active first.
    async fn list_chats(&self) -> StorageResult<Vec<ChatRecord>>;
    async fn get_chat(&self, chat_id: ChatId) -> StorageResult<Option<ChatRecord>>;
    /// Partial update; bumps `updated_at`.
    async fn update_chat(&self, chat_id: ChatId, patch: ChatPatch) -> StorageResult<ChatRecord>;
    /// Bumps `updated_at` only (the append-side activity bump).
    async fn touch_chat(&self, chat_id: ChatId) -> StorageResult<ChatRecord>;
    /// Deletes the chat and all of its messages in one transaction.
    async fn delete_chat(&self, chat_id: ChatId) -> StorageResult<()>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_message(&self, input: NewMessage) -> StorageResult<MessageRecord>;
    /// Ordered oldest first. A chat id with no rows yields an empty list,
    /// whether or not the chat exists.
    async fn list_messages(&self, chat_id: ChatId) -> StorageResult<Vec<MessageRecord>>;
    async fn delete_message(&self, message_id: MessageId) -> StorageResult<()>;
}

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Bulk insert in one transaction; returned records preserve input order.
    async fn add_attachments(
        &self,
        inputs: Vec<NewAttachment>,
    ) -> StorageResult<Vec<AttachmentRecord>>;
    async fn get_attachment(
        &self,
        attachment_id: AttachmentId,
    ) -> StorageResult<Option<AttachmentRecord>>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load_settings(&self) -> StorageResult<Option<SettingsRecord>>;
    async fn save_settings(&self, record: SettingsRecord) -> StorageResult<()>;
}

#[async_trait]
pub trait ModelCacheStore: Send + Sync {
    async fn list_cached_models(&self) -> StorageResult<Vec<CachedModelRecord>>;
    /// Clear-then-bulk-insert in one transaction; the cache is never merged.
    async fn replace_cached_models(&self, models: &[CachedModelRecord]) -> StorageResult<()>;
}

pub trait Storage:
    ChatStore + MessageStore + AttachmentStore + SettingsStore + ModelCacheStore
{
}

impl<T> Storage for T where
    T: ChatStore + MessageStore + AttachmentStore + SettingsStore + ModelCacheStore
{
}
