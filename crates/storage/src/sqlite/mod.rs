use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use async_trait::async_trait;

use super::error::{
    CreateSqliteDirectorySnafu, DecodeColumnSnafu, EncodeColumnSnafu, InvariantViolationSnafu,
    NotFoundSnafu, SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqliteMigrateSnafu,
    SqlitePragmaSnafu, SqliteQuerySnafu, StorageResult,
};
use super::ids::{AttachmentId, ChatId, MessageId};
use super::types::{
    AttachmentKind, AttachmentRecord, CachedModelRecord, ChatPatch, ChatRecord,
    DEFAULT_CHAT_MODEL, DEFAULT_CHAT_TITLE, MessageRecord, MessageRole, ModelConfig,
    NewAttachment, NewChat, NewMessage, SettingsRecord,
};
use super::{AttachmentStore, ChatStore, MessageStore, ModelCacheStore, SettingsStore};

const SETTINGS_ROW_ID: i64 = 1;

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        // A single pooled connection keeps `:memory:` databases alive and
        // serializes writers, matching sqlite's own concurrency model.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-foreign-keys",
                pragma: "foreign_keys",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::info!(database_url = %database_url, "opened chat database");
        Ok(Self { pool })
    }

    async fn load_chat_row(
        &self,
        chat_id: ChatId,
        stage: &'static str,
    ) -> StorageResult<Option<ChatRow>> {
        sqlx::query_as::<_, ChatRow>(
            "SELECT id, title, model, temperature, top_p, max_tokens, created_at, updated_at FROM chats WHERE id = ?",
        )
        .bind(chat_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context(SqliteQuerySnafu { stage })
    }

    async fn chat_exists(&self, chat_id: ChatId) -> StorageResult<bool> {
        let existing = sqlx::query_scalar::<_, i64>("SELECT 1 FROM chats WHERE id = ? LIMIT 1")
            .bind(chat_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "chat-exists-query",
            })?;

        Ok(existing.is_some())
    }
}

#[async_trait]
impl ChatStore for SqliteStorage {
    async fn create_chat(&self, input: NewChat) -> StorageResult<ChatRecord> {
        let mut title = input.title;
        if title.trim().is_empty() {
            title = DEFAULT_CHAT_TITLE.to_string();
        }
        let mut model = input.model;
        if model.trim().is_empty() {
            model = DEFAULT_CHAT_MODEL.to_string();
        }

        let chat_id = ChatId::new_v7();
        let now = unix_timestamp_millis();

        sqlx::query(
            "INSERT INTO chats (id, title, model, temperature, top_p, max_tokens, created_at, updated_at) VALUES (?, ?, ?, NULL, NULL, NULL, ?, ?)",
        )
        .bind(chat_id.to_string())
        .bind(title.clone())
        .bind(model.clone())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "chat-create-insert",
        })?;

        Ok(ChatRecord {
            id: chat_id,
            title,
            model_config: ModelConfig::new(model),
            created_at_unix_ms: now,
            updated_at_unix_ms: now,
        })
    }

    async fn list_chats(&self) -> StorageResult<Vec<ChatRecord>> {
        let rows = sqlx::query_as::<_, ChatRow>(
            "SELECT id, title, model, temperature, top_p, max_tokens, created_at, updated_at FROM chats ORDER BY updated_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "chat-list-query",
        })?;

        rows.into_iter().map(chat_row_to_record).collect()
    }

    async fn get_chat(&self, chat_id: ChatId) -> StorageResult<Option<ChatRecord>> {
        let row = self.load_chat_row(chat_id, "chat-get-query").await?;
        row.map(chat_row_to_record).transpose()
    }

    async fn update_chat(&self, chat_id: ChatId, patch: ChatPatch) -> StorageResult<ChatRecord> {
        let now = unix_timestamp_millis();
        let update_result = sqlx::query(
            "UPDATE chats SET title = COALESCE(?, title), model = COALESCE(?, model), updated_at = ? WHERE id = ?",
        )
        .bind(patch.title)
        .bind(patch.model)
        .bind(now)
        .bind(chat_id.to_string())
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "chat-update-apply",
        })?;

        if update_result.rows_affected() == 0 {
            return NotFoundSnafu {
                stage: "chat-update-missing",
                entity: "chat",
                id: chat_id.to_string(),
            }
            .fail();
        }

        let row = self.load_chat_row(chat_id, "chat-update-load").await?;
        match row {
            Some(row) => chat_row_to_record(row),
            None => NotFoundSnafu {
                stage: "chat-update-load-missing",
                entity: "chat",
                id: chat_id.to_string(),
            }
            .fail(),
        }
    }

    async fn touch_chat(&self, chat_id: ChatId) -> StorageResult<ChatRecord> {
        let now = unix_timestamp_millis();
        let update_result = sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(chat_id.to_string())
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "chat-touch-apply",
            })?;

        if update_result.rows_affected() == 0 {
            return NotFoundSnafu {
                stage: "chat-touch-missing",
                entity: "chat",
                id: chat_id.to_string(),
            }
            .fail();
        }

        let row = self.load_chat_row(chat_id, "chat-touch-load").await?;
        match row {
            Some(row) => chat_row_to_record(row),
            None => NotFoundSnafu {
                stage: "chat-touch-load-missing",
                entity: "chat",
                id: chat_id.to_string(),
            }
            .fail(),
        }
    }

    async fn delete_chat(&self, chat_id: ChatId) -> StorageResult<()> {
        // Both deletes commit together so a chat can never outlive its
        // messages or vice versa.
        let mut tx = self.pool.begin().await.context(SqliteQuerySnafu {
            stage: "chat-delete-begin",
        })?;

        sqlx::query("DELETE FROM messages WHERE chat_id = ?")
            .bind(chat_id.to_string())
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "chat-delete-messages",
            })?;

        let chat_result = sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(chat_id.to_string())
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "chat-delete-chat",
            })?;

        if chat_result.rows_affected() == 0 {
            return NotFoundSnafu {
                stage: "chat-delete-missing",
                entity: "chat",
                id: chat_id.to_string(),
            }
            .fail();
        }

        tx.commit().await.context(SqliteQuerySnafu {
            stage: "chat-delete-commit",
        })?;

        tracing::info!(chat_id = %chat_id, "deleted chat and its messages");
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteStorage {
    async fn append_message(&self, input: NewMessage) -> StorageResult<MessageRecord> {
        if !self.chat_exists(input.chat_id).await? {
            return NotFoundSnafu {
                stage: "message-append-missing-chat",
                entity: "chat",
                id: input.chat_id.to_string(),
            }
            .fail();
        }

        let message_id = MessageId::new_v7();
        let now = unix_timestamp_millis();
        let attachment_ids_json =
            encode_attachment_ids(&input.attachment_ids, "message-append-encode-attachments")?;

        sqlx::query(
            "INSERT INTO messages (id, chat_id, role, content, timestamp, attachment_ids, model) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message_id.to_string())
        .bind(input.chat_id.to_string())
        .bind(role_to_sql(input.role))
        .bind(input.content.clone())
        .bind(now)
        .bind(attachment_ids_json)
        .bind(input.model.clone())
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "message-append-insert",
        })?;

        Ok(MessageRecord {
            id: message_id,
            chat_id: input.chat_id,
            role: input.role,
            content: input.content,
            timestamp_unix_ms: now,
            attachment_ids: input.attachment_ids,
            model: input.model,
        })
    }

    async fn list_messages(&self, chat_id: ChatId) -> StorageResult<Vec<MessageRecord>> {
        // rowid breaks ties within one millisecond, reproducing insertion order.
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, chat_id, role, content, timestamp, attachment_ids, model FROM messages WHERE chat_id = ? ORDER BY timestamp ASC, rowid ASC",
        )
        .bind(chat_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "message-list-query",
        })?;

        rows.into_iter().map(message_row_to_record).collect()
    }

    async fn delete_message(&self, message_id: MessageId) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(message_id.to_string())
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-delete-apply",
            })?;

        if result.rows_affected() == 0 {
            return NotFoundSnafu {
                stage: "message-delete-missing",
                entity: "message",
                id: message_id.to_string(),
            }
            .fail();
        }

        Ok(())
    }
}

#[async_trait]
impl AttachmentStore for SqliteStorage {
    async fn add_attachments(
        &self,
        inputs: Vec<NewAttachment>,
    ) -> StorageResult<Vec<AttachmentRecord>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await.context(SqliteQuerySnafu {
            stage: "attachment-bulk-begin",
        })?;

        let mut records = Vec::with_capacity(inputs.len());
        for input in inputs {
            let attachment_id = AttachmentId::new_v7();
            sqlx::query("INSERT INTO attachments (id, kind, data, name) VALUES (?, ?, ?, ?)")
                .bind(attachment_id.to_string())
                .bind(kind_to_sql(input.kind))
                .bind(input.data.clone())
                .bind(input.name.clone())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "attachment-bulk-insert",
                })?;

            records.push(AttachmentRecord {
                id: attachment_id,
                kind: input.kind,
                data: input.data,
                name: input.name,
            });
        }

        tx.commit().await.context(SqliteQuerySnafu {
            stage: "attachment-bulk-commit",
        })?;

        Ok(records)
    }

    async fn get_attachment(
        &self,
        attachment_id: AttachmentId,
    ) -> StorageResult<Option<AttachmentRecord>> {
        let row = sqlx::query_as::<_, AttachmentRow>(
            "SELECT id, kind, data, name FROM attachments WHERE id = ?",
        )
        .bind(attachment_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "attachment-get-query",
        })?;

        row.map(attachment_row_to_record).transpose()
    }
}

#[async_trait]
impl SettingsStore for SqliteStorage {
    async fn load_settings(&self) -> StorageResult<Option<SettingsRecord>> {
        let row = sqlx::query_as::<_, SettingsRow>(
            "SELECT api_key, base_url, theme FROM settings WHERE id = ?",
        )
        .bind(SETTINGS_ROW_ID)
        .fetch_optional(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "settings-load-query",
        })?;

        Ok(row.map(|row| SettingsRecord {
            api_key: row.api_key,
            base_url: row.base_url,
            theme: row.theme,
        }))
    }

    async fn save_settings(&self, record: SettingsRecord) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO settings (id, api_key, base_url, theme) VALUES (?, ?, ?, ?) ON CONFLICT (id) DO UPDATE SET api_key = excluded.api_key, base_url = excluded.base_url, theme = excluded.theme",
        )
        .bind(SETTINGS_ROW_ID)
        .bind(record.api_key)
        .bind(record.base_url)
        .bind(record.theme)
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "settings-save-upsert",
        })?;

        Ok(())
    }
}

#[async_trait]
impl ModelCacheStore for SqliteStorage {
    async fn list_cached_models(&self) -> StorageResult<Vec<CachedModelRecord>> {
        let rows = sqlx::query_as::<_, CachedModelRow>(
            "SELECT id, name, description, context_length, pricing_prompt, pricing_completion FROM models_cache ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "models-cache-list-query",
        })?;

        rows.into_iter().map(cached_model_row_to_record).collect()
    }

    async fn replace_cached_models(&self, models: &[CachedModelRecord]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await.context(SqliteQuerySnafu {
            stage: "models-cache-replace-begin",
        })?;

        sqlx::query("DELETE FROM models_cache")
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "models-cache-replace-clear",
            })?;

        for model in models {
            sqlx::query(
                "INSERT INTO models_cache (id, name, description, context_length, pricing_prompt, pricing_completion) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(model.id.clone())
            .bind(model.name.clone())
            .bind(model.description.clone())
            .bind(model.context_length.map(i64::from))
            .bind(model.pricing_prompt.clone())
            .bind(model.pricing_completion.clone())
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "models-cache-replace-insert",
            })?;
        }

        tx.commit().await.context(SqliteQuerySnafu {
            stage: "models-cache-replace-commit",
        })
    }
}

#[derive(Debug, FromRow)]
struct ChatRow {
    id: String,
    title: String,
    model: String,
    temperature: Option<f64>,
    top_p: Option<f64>,
    max_tokens: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    chat_id: String,
    role: String,
    content: String,
    timestamp: i64,
    attachment_ids: String,
    model: Option<String>,
}

#[derive(Debug, FromRow)]
struct AttachmentRow {
    id: String,
    kind: String,
    data: String,
    name: Option<String>,
}

#[derive(Debug, FromRow)]
struct SettingsRow {
    api_key: String,
    base_url: Option<String>,
    theme: Option<String>,
}

#[derive(Debug, FromRow)]
struct CachedModelRow {
    id: String,
    name: String,
    description: Option<String>,
    context_length: Option<i64>,
    pricing_prompt: Option<String>,
    pricing_completion: Option<String>,
}

fn chat_row_to_record(row: ChatRow) -> StorageResult<ChatRecord> {
    Ok(ChatRecord {
        id: ChatId::parse(&row.id)?,
        title: row.title,
        model_config: ModelConfig {
            model: row.model,
            temperature: row.temperature,
            top_p: row.top_p,
            max_tokens: row
                .max_tokens
                .map(|value| i64_to_u32(value, "chat-row-max-tokens"))
                .transpose()?,
        },
        created_at_unix_ms: row.created_at,
        updated_at_unix_ms: row.updated_at,
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        chat_id: ChatId::parse(&row.chat_id)?,
        role: role_from_sql(&row.role)?,
        content: row.content,
        timestamp_unix_ms: row.timestamp,
        attachment_ids: decode_attachment_ids(&row.attachment_ids, "message-row-attachments")?,
        model: row.model,
    })
}

fn attachment_row_to_record(row: AttachmentRow) -> StorageResult<AttachmentRecord> {
    Ok(AttachmentRecord {
        id: AttachmentId::parse(&row.id)?,
        kind: kind_from_sql(&row.kind)?,
        data: row.data,
        name: row.name,
    })
}

fn cached_model_row_to_record(row: CachedModelRow) -> StorageResult<CachedModelRecord> {
    Ok(CachedModelRecord {
        id: row.id,
        name: row.name,
        description: row.description,
        context_length: row
            .context_length
            .map(|value| i64_to_u32(value, "cached-model-row-context-length"))
            .transpose()?,
        pricing_prompt: row.pricing_prompt,
        pricing_completion: row.pricing_completion,
    })
}

fn role_to_sql(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

fn role_from_sql(raw: &str) -> StorageResult<MessageRole> {
    match raw {
        "system" => Ok(MessageRole::System),
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        _ => InvariantViolationSnafu {
            stage: "message-role-from-sql",
            details: format!("unknown message role '{raw}'"),
        }
        .fail(),
    }
}

fn kind_to_sql(kind: AttachmentKind) -> &'static str {
    match kind {
        AttachmentKind::Image => "image",
    }
}

fn kind_from_sql(raw: &str) -> StorageResult<AttachmentKind> {
    match raw {
        "image" => Ok(AttachmentKind::Image),
        _ => InvariantViolationSnafu {
            stage: "attachment-kind-from-sql",
            details: format!("unknown attachment kind '{raw}'"),
        }
        .fail(),
    }
}

fn encode_attachment_ids(ids: &[AttachmentId], stage: &'static str) -> StorageResult<String> {
    let raw: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    serde_json::to_string(&raw).context(EncodeColumnSnafu {
        stage,
        column: "attachment_ids",
    })
}

fn decode_attachment_ids(raw: &str, stage: &'static str) -> StorageResult<Vec<AttachmentId>> {
    let decoded: Vec<String> = serde_json::from_str(raw).context(DecodeColumnSnafu {
        stage,
        column: "attachment_ids",
    })?;

    decoded
        .iter()
        .map(|value| AttachmentId::parse(value))
        .collect()
}

fn unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_millis() as i64)
}

fn i64_to_u32(value: i64, stage: &'static str) -> StorageResult<u32> {
    value
        .try_into()
        .map_err(|_| super::error::StorageError::InvariantViolation {
            stage,
            details: format!("sqlite integer '{value}' cannot map to u32"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}
