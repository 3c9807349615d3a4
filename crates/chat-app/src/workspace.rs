use std::sync::Arc;

use quill_llm::{
    CompletionApi, CompletionRequest, ContentPart, OutboundMessage, Role as WireRole,
};
use quill_storage::{
    AttachmentId, AttachmentKind, AttachmentRecord, ChatId, ChatPatch, ChatRecord,
    DEFAULT_CHAT_MODEL, MessageRecord, MessageRole, ModelConfig, NewAttachment, NewChat,
    NewMessage, Storage, StorageResult,
};

use crate::settings::SettingsState;

/// Why a send or regenerate request finished without contacting the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoActiveChat,
    MissingApiKey,
    /// A generation is already in flight; overlapping requests are
    /// rejected rather than raced (see DESIGN.md).
    GenerationInFlight,
    /// The transcript tail is not an assistant-over-user pair.
    NothingToRegenerate,
}

/// Result of a send or regenerate workflow. Precondition gaps are typed
/// sentinels rather than errors, preserving the soft-fail contract.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The assistant reply that was appended.
    Completed(MessageRecord),
    /// The completion failed; this system-role notice was appended so the
    /// failure is visible in the transcript instead of thrown.
    Errored(MessageRecord),
    Skipped(SkipReason),
}

/// Change notification emitted after each mirror mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceEvent {
    ChatsChanged,
    ActiveChatChanged,
    MessagesChanged,
    GenerationStateChanged,
}

type Listener = Box<dyn Fn(WorkspaceEvent) + Send + Sync>;

/// The chat orchestrator. Owns the in-memory mirrors of the chat list and
/// the active chat's messages, and mediates every mutation between
/// callers, the local store, and the completion service.
///
/// Methods take `&mut self`; callers drive the workspace from a single
/// event loop and wrap it in their own synchronization if they need more.
pub struct ChatWorkspace {
    storage: Arc<dyn Storage>,
    api: Arc<dyn CompletionApi>,
    settings: Arc<SettingsState>,
    chats: Vec<ChatRecord>,
    active_chat_id: Option<ChatId>,
    messages: Vec<MessageRecord>,
    is_generating: bool,
    listeners: Vec<Listener>,
}

impl ChatWorkspace {
    pub fn new(
        storage: Arc<dyn Storage>,
        api: Arc<dyn CompletionApi>,
        settings: Arc<SettingsState>,
    ) -> Self {
        Self {
            storage,
            api,
            settings,
            chats: Vec::new(),
            active_chat_id: None,
            messages: Vec::new(),
            is_generating: false,
            listeners: Vec::new(),
        }
    }

    /// Ordered most recently active first.
    pub fn chats(&self) -> &[ChatRecord] {
        &self.chats
    }

    /// Messages of the active chat, oldest first.
    pub fn messages(&self) -> &[MessageRecord] {
        &self.messages
    }

    pub fn active_chat_id(&self) -> Option<ChatId> {
        self.active_chat_id
    }

    pub fn active_chat(&self) -> Option<&ChatRecord> {
        let active_chat_id = self.active_chat_id?;
        self.chats.iter().find(|chat| chat.id == active_chat_id)
    }

    pub fn is_generating(&self) -> bool {
        self.is_generating
    }

    /// Registers a change listener. Listeners run synchronously after each
    /// mirror mutation.
    pub fn subscribe(&mut self, listener: impl Fn(WorkspaceEvent) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Fills the chat mirror from the store.
    pub async fn load_chats(&mut self) -> StorageResult<()> {
        self.chats = self.storage.list_chats().await?;
        self.emit(WorkspaceEvent::ChatsChanged);
        Ok(())
    }

    /// Creates a chat, prepends it to the mirror, and makes it active with
    /// an empty message list.
    pub async fn create_chat(
        &mut self,
        title: impl Into<String>,
        model: impl Into<String>,
    ) -> StorageResult<ChatRecord> {
        let created = self
            .storage
            .create_chat(NewChat {
                title: title.into(),
                model: model.into(),
            })
            .await?;

        self.chats.insert(0, created.clone());
        self.emit(WorkspaceEvent::ChatsChanged);
        self.select_chat(created.id).await?;

        tracing::info!(chat_id = %created.id, "created chat");
        Ok(created)
    }

    /// Makes `chat_id` the active chat and loads its messages. A dangling
    /// id is not an error: the selection is set and the view loads empty.
    pub async fn select_chat(&mut self, chat_id: ChatId) -> StorageResult<()> {
        self.active_chat_id = Some(chat_id);
        self.emit(WorkspaceEvent::ActiveChatChanged);

        self.messages = self.storage.list_messages(chat_id).await?;
        self.emit(WorkspaceEvent::MessagesChanged);
        Ok(())
    }

    /// Removes the chat and all of its messages (atomic in the store). If
    /// it was active, the selection and message list are cleared.
    pub async fn delete_chat(&mut self, chat_id: ChatId) -> StorageResult<()> {
        self.storage.delete_chat(chat_id).await?;

        self.chats.retain(|chat| chat.id != chat_id);
        self.emit(WorkspaceEvent::ChatsChanged);

        if self.active_chat_id == Some(chat_id) {
            self.active_chat_id = None;
            self.messages.clear();
            self.emit(WorkspaceEvent::ActiveChatChanged);
            self.emit(WorkspaceEvent::MessagesChanged);
        }

        Ok(())
    }

    pub async fn update_chat_title(
        &mut self,
        chat_id: ChatId,
        title: impl Into<String>,
    ) -> StorageResult<()> {
        let updated = self
            .storage
            .update_chat(
                chat_id,
                ChatPatch {
                    title: Some(title.into()),
                    model: None,
                },
            )
            .await?;

        let mut mirrored = false;
        if let Some(chat) = self.chats.iter_mut().find(|chat| chat.id == chat_id) {
            chat.title = updated.title;
            chat.updated_at_unix_ms = updated.updated_at_unix_ms;
            mirrored = true;
        }
        if mirrored {
            self.emit(WorkspaceEvent::ChatsChanged);
        }

        Ok(())
    }

    pub async fn update_chat_model(
        &mut self,
        chat_id: ChatId,
        model: impl Into<String>,
    ) -> StorageResult<()> {
        let updated = self
            .storage
            .update_chat(
                chat_id,
                ChatPatch {
                    title: None,
                    model: Some(model.into()),
                },
            )
            .await?;

        let mut mirrored = false;
        if let Some(chat) = self.chats.iter_mut().find(|chat| chat.id == chat_id) {
            chat.model_config.model = updated.model_config.model;
            chat.updated_at_unix_ms = updated.updated_at_unix_ms;
            mirrored = true;
        }
        if mirrored {
            self.emit(WorkspaceEvent::ChatsChanged);
        }

        Ok(())
    }

    /// Appends a message to the active chat, bumps the chat's activity
    /// timestamp, and moves it to the front of the chat mirror. Returns
    /// `None` when no chat is active.
    pub async fn add_message(
        &mut self,
        role: MessageRole,
        content: impl Into<String>,
        attachment_ids: Vec<AttachmentId>,
        model: Option<String>,
    ) -> StorageResult<Option<MessageRecord>> {
        let Some(chat_id) = self.active_chat_id else {
            return Ok(None);
        };

        let message = self
            .storage
            .append_message(NewMessage {
                chat_id,
                role,
                content: content.into(),
                attachment_ids,
                model,
            })
            .await?;
        self.messages.push(message.clone());
        self.emit(WorkspaceEvent::MessagesChanged);

        // Deliberately a second store call, not one transaction with the
        // insert: a crash between the two leaves updated_at stale, which
        // the design accepts.
        let touched = self.storage.touch_chat(chat_id).await?;
        if let Some(position) = self.chats.iter().position(|chat| chat.id == chat_id) {
            let mut chat = self.chats.remove(position);
            chat.updated_at_unix_ms = touched.updated_at_unix_ms;
            self.chats.insert(0, chat);
            self.emit(WorkspaceEvent::ChatsChanged);
        }

        Ok(Some(message))
    }

    /// The send workflow: persist attachments, append the user turn, call
    /// the completion service with the full history (the new turn in
    /// multimodal form), and append the reply. A completion failure
    /// appends exactly one system-role notice instead of propagating;
    /// store failures are fatal. The busy flag is released on every exit
    /// path that reached generation.
    pub async fn send_message(
        &mut self,
        content: impl Into<String>,
        attachments: Vec<NewAttachment>,
    ) -> StorageResult<SendOutcome> {
        if self.is_generating {
            return Ok(SendOutcome::Skipped(SkipReason::GenerationInFlight));
        }
        let Some(chat_id) = self.active_chat_id else {
            return Ok(SendOutcome::Skipped(SkipReason::NoActiveChat));
        };
        if !self.settings.current().has_api_key() {
            return Ok(SendOutcome::Skipped(SkipReason::MissingApiKey));
        }

        let content = content.into();

        let persisted = self.storage.add_attachments(attachments).await?;
        let attachment_ids: Vec<AttachmentId> =
            persisted.iter().map(|attachment| attachment.id).collect();

        if self
            .add_message(MessageRole::User, content.clone(), attachment_ids, None)
            .await?
            .is_none()
        {
            return Ok(SendOutcome::Skipped(SkipReason::NoActiveChat));
        }

        self.set_generating(true);
        let request = self.build_send_request(chat_id, &content, &persisted);
        let outcome = self.run_completion(request, "Error").await;
        self.set_generating(false);
        outcome
    }

    /// Drops the trailing assistant turn and asks the service to answer
    /// the preceding user turn again. The resubmitted history is plain
    /// text only: attachments on the original user turn are not
    /// reconstructed, so multimodal regeneration is unsupported.
    pub async fn regenerate_last_message(&mut self) -> StorageResult<SendOutcome> {
        if self.is_generating {
            return Ok(SendOutcome::Skipped(SkipReason::GenerationInFlight));
        }
        let Some(chat_id) = self.active_chat_id else {
            return Ok(SendOutcome::Skipped(SkipReason::NoActiveChat));
        };

        let Some(last) = self.messages.last() else {
            return Ok(SendOutcome::Skipped(SkipReason::NothingToRegenerate));
        };
        if last.role != MessageRole::Assistant {
            return Ok(SendOutcome::Skipped(SkipReason::NothingToRegenerate));
        }

        let last_id = last.id;
        self.storage.delete_message(last_id).await?;
        self.messages.pop();
        self.emit(WorkspaceEvent::MessagesChanged);

        let tail_is_user = self
            .messages
            .last()
            .is_some_and(|message| message.role == MessageRole::User);
        if !tail_is_user {
            return Ok(SendOutcome::Skipped(SkipReason::NothingToRegenerate));
        }

        let outbound = self
            .messages
            .iter()
            .map(message_to_outbound)
            .collect::<Vec<_>>();
        // The regenerate path sends the model only; generation parameters
        // are not reapplied.
        let request = CompletionRequest::new(self.active_model(chat_id), outbound);

        self.set_generating(true);
        let outcome = self.run_completion(request, "Error regenerating").await;
        self.set_generating(false);
        outcome
    }

    async fn run_completion(
        &mut self,
        request: CompletionRequest,
        error_prefix: &str,
    ) -> StorageResult<SendOutcome> {
        let settings = self.settings.current();
        let response = self
            .api
            .create_completion(&settings.api_key, request, settings.resolved_base_url())
            .await;

        match response {
            Ok(response) => {
                let reply = response.primary_text().unwrap_or_default().to_string();
                let reply_model = Some(response.model);
                match self
                    .add_message(MessageRole::Assistant, reply, Vec::new(), reply_model)
                    .await?
                {
                    Some(message) => Ok(SendOutcome::Completed(message)),
                    None => Ok(SendOutcome::Skipped(SkipReason::NoActiveChat)),
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "completion failed; recording transcript notice");
                let notice = format!("{error_prefix}: {error}");
                match self
                    .add_message(MessageRole::System, notice, Vec::new(), None)
                    .await?
                {
                    Some(message) => Ok(SendOutcome::Errored(message)),
                    None => Ok(SendOutcome::Skipped(SkipReason::NoActiveChat)),
                }
            }
        }
    }

    fn build_send_request(
        &self,
        chat_id: ChatId,
        content: &str,
        attachments: &[AttachmentRecord],
    ) -> CompletionRequest {
        // Every prior turn goes out as plain text; the just-added user
        // turn is replaced by its multimodal form.
        let prior = &self.messages[..self.messages.len().saturating_sub(1)];
        let mut outbound: Vec<OutboundMessage> =
            prior.iter().map(message_to_outbound).collect();

        let mut parts = vec![ContentPart::text(content)];
        for attachment in attachments {
            if attachment.kind == AttachmentKind::Image {
                parts.push(ContentPart::image_url(attachment.data.clone()));
            }
        }
        outbound.push(OutboundMessage::multimodal(WireRole::User, parts));

        let config = self.model_config(chat_id);
        let mut request = CompletionRequest::new(config.model, outbound);
        request.temperature = config.temperature;
        request.top_p = config.top_p;
        request.max_tokens = config.max_tokens;
        request
    }

    fn model_config(&self, chat_id: ChatId) -> ModelConfig {
        self.chats
            .iter()
            .find(|chat| chat.id == chat_id)
            .map(|chat| chat.model_config.clone())
            .unwrap_or_else(|| ModelConfig::new(DEFAULT_CHAT_MODEL))
    }

    fn active_model(&self, chat_id: ChatId) -> String {
        self.model_config(chat_id).model
    }

    fn set_generating(&mut self, value: bool) {
        if self.is_generating != value {
            self.is_generating = value;
            self.emit(WorkspaceEvent::GenerationStateChanged);
        }
    }

    fn emit(&self, event: WorkspaceEvent) {
        for listener in &self.listeners {
            listener(event);
        }
    }

    #[cfg(test)]
    pub(crate) fn force_generating_for_tests(&mut self, value: bool) {
        self.set_generating(value);
    }
}

fn message_to_outbound(message: &MessageRecord) -> OutboundMessage {
    OutboundMessage::text(wire_role(message.role), message.content.clone())
}

fn wire_role(role: MessageRole) -> WireRole {
    match role {
        MessageRole::System => WireRole::System,
        MessageRole::User => WireRole::User,
        MessageRole::Assistant => WireRole::Assistant,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use quill_llm::OutboundContent;
    use quill_storage::{AttachmentStore, MessageStore, SqliteStorage};

    use crate::settings::{SettingsPatch, SettingsState};
    use crate::test_support::{FakeCompletionApi, assistant_reply, completion_failure};

    struct Harness {
        workspace: ChatWorkspace,
        api: Arc<FakeCompletionApi>,
        storage: Arc<SqliteStorage>,
    }

    async fn harness(with_api_key: bool) -> Harness {
        let storage = Arc::new(
            SqliteStorage::open(":memory:")
                .await
                .expect("in-memory database should open"),
        );
        let settings = Arc::new(SettingsState::new(storage.clone()));
        if with_api_key {
            settings
                .save(SettingsPatch::api_key("sk-test"))
                .await
                .expect("api key should save");
        }

        let api = Arc::new(FakeCompletionApi::default());
        let workspace = ChatWorkspace::new(storage.clone(), api.clone(), settings);
        Harness {
            workspace,
            api,
            storage,
        }
    }

    #[tokio::test]
    async fn add_message_bumps_chat_and_moves_it_to_front() {
        let mut harness = harness(false).await;
        let first = harness
            .workspace
            .create_chat("first", "m1")
            .await
            .expect("first chat");
        let second = harness
            .workspace
            .create_chat("second", "m1")
            .await
            .expect("second chat");
        assert_eq!(harness.workspace.chats()[0].id, second.id);

        harness
            .workspace
            .select_chat(first.id)
            .await
            .expect("select first");
        std::thread::sleep(Duration::from_millis(5));
        harness
            .workspace
            .add_message(MessageRole::User, "hello", Vec::new(), None)
            .await
            .expect("append")
            .expect("active chat set");

        let chats = harness.workspace.chats();
        assert_eq!(chats[0].id, first.id);
        assert_eq!(chats[1].id, second.id);
        assert!(chats[0].updated_at_unix_ms > first.updated_at_unix_ms);
    }

    #[tokio::test]
    async fn add_message_without_active_chat_is_a_noop() {
        let mut harness = harness(false).await;
        let appended = harness
            .workspace
            .add_message(MessageRole::User, "into the void", Vec::new(), None)
            .await
            .expect("no-op append");
        assert_eq!(appended, None);
        assert!(harness.workspace.messages().is_empty());
    }

    #[tokio::test]
    async fn delete_active_chat_clears_selection_and_messages() {
        let mut harness = harness(false).await;
        let kept = harness
            .workspace
            .create_chat("kept", "m1")
            .await
            .expect("kept chat");
        let doomed = harness
            .workspace
            .create_chat("doomed", "m1")
            .await
            .expect("doomed chat");
        harness
            .workspace
            .add_message(MessageRole::User, "to be removed", Vec::new(), None)
            .await
            .expect("append")
            .expect("active chat set");

        harness
            .workspace
            .delete_chat(doomed.id)
            .await
            .expect("delete");

        assert_eq!(harness.workspace.active_chat_id(), None);
        assert!(harness.workspace.messages().is_empty());
        let remaining: Vec<ChatId> = harness
            .workspace
            .chats()
            .iter()
            .map(|chat| chat.id)
            .collect();
        assert_eq!(remaining, vec![kept.id]);
        assert!(harness
            .storage
            .list_messages(doomed.id)
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn update_chat_title_syncs_the_mirror() {
        let mut harness = harness(false).await;
        let chat = harness
            .workspace
            .create_chat("draft", "m1")
            .await
            .expect("chat");

        harness
            .workspace
            .update_chat_title(chat.id, "final title")
            .await
            .expect("rename");

        let mirrored = &harness.workspace.chats()[0];
        assert_eq!(mirrored.title, "final title");
        assert!(mirrored.updated_at_unix_ms >= chat.updated_at_unix_ms);

        harness
            .workspace
            .update_chat_model(chat.id, "openai/gpt-4o")
            .await
            .expect("model change");
        assert_eq!(
            harness.workspace.chats()[0].model_config.model,
            "openai/gpt-4o"
        );
    }

    #[tokio::test]
    async fn select_chat_with_dangling_id_yields_empty_view() {
        let mut harness = harness(false).await;
        let dangling = ChatId::new_v7();
        harness
            .workspace
            .select_chat(dangling)
            .await
            .expect("selection is not an error");
        assert_eq!(harness.workspace.active_chat_id(), Some(dangling));
        assert!(harness.workspace.messages().is_empty());
        assert!(harness.workspace.active_chat().is_none());
    }

    #[tokio::test]
    async fn send_without_api_key_is_a_silent_noop() {
        let mut harness = harness(false).await;
        harness
            .workspace
            .create_chat("Demo", "m1")
            .await
            .expect("chat");

        let outcome = harness
            .workspace
            .send_message("hello", Vec::new())
            .await
            .expect("send");

        assert_eq!(outcome, SendOutcome::Skipped(SkipReason::MissingApiKey));
        assert!(harness.workspace.messages().is_empty());
        assert_eq!(harness.workspace.chats().len(), 1);
        assert!(harness.api.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn send_without_active_chat_is_a_silent_noop() {
        let mut harness = harness(true).await;
        let outcome = harness
            .workspace
            .send_message("hello", Vec::new())
            .await
            .expect("send");
        assert_eq!(outcome, SendOutcome::Skipped(SkipReason::NoActiveChat));
        assert!(harness.api.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn successful_send_appends_assistant_with_responding_model() {
        let mut harness = harness(true).await;
        harness
            .workspace
            .create_chat("chat", "openai/gpt-3.5-turbo")
            .await
            .expect("chat");
        harness
            .api
            .queue_completion(Ok(assistant_reply("openrouter/auto-resolved", "hello there")));

        let outcome = harness
            .workspace
            .send_message("hi", Vec::new())
            .await
            .expect("send");

        let messages = harness.workspace.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "hello there");
        assert_eq!(
            messages[1].model.as_deref(),
            Some("openrouter/auto-resolved")
        );
        assert!(matches!(outcome, SendOutcome::Completed(_)));
        assert!(!harness.workspace.is_generating());
    }

    #[tokio::test]
    async fn send_persists_attachments_and_references_them_in_order() {
        let mut harness = harness(true).await;
        let chat = harness
            .workspace
            .create_chat("chat", "m1")
            .await
            .expect("chat");
        harness
            .api
            .queue_completion(Ok(assistant_reply("m1", "nice picture")));

        harness
            .workspace
            .send_message(
                "look",
                vec![
                    NewAttachment::image("data:image/png;base64,AAAA").with_name("a.png"),
                    NewAttachment::image("data:image/png;base64,BBBB"),
                ],
            )
            .await
            .expect("send");

        let user_message = &harness.workspace.messages()[0];
        assert_eq!(user_message.attachment_ids.len(), 2);
        let first = harness
            .storage
            .get_attachment(user_message.attachment_ids[0])
            .await
            .expect("get first")
            .expect("first persisted");
        let second = harness
            .storage
            .get_attachment(user_message.attachment_ids[1])
            .await
            .expect("get second")
            .expect("second persisted");
        assert_eq!(first.data, "data:image/png;base64,AAAA");
        assert_eq!(second.data, "data:image/png;base64,BBBB");

        let requests = harness.api.recorded_requests();
        assert_eq!(requests.len(), 1);
        let sent = requests[0]
            .messages
            .last()
            .expect("request carries the user turn");
        match &sent.content {
            OutboundContent::Parts(parts) => {
                assert_eq!(
                    parts[0],
                    quill_llm::ContentPart::text("look"),
                );
                assert_eq!(
                    parts[1],
                    quill_llm::ContentPart::image_url("data:image/png;base64,AAAA"),
                );
                assert_eq!(
                    parts[2],
                    quill_llm::ContentPart::image_url("data:image/png;base64,BBBB"),
                );
            }
            OutboundContent::Text(_) => panic!("user turn should be multimodal"),
        }
        assert_eq!(requests[0].model, chat.model_config.model);
    }

    #[tokio::test]
    async fn completion_failure_appends_one_system_notice_and_clears_busy() {
        let mut harness = harness(true).await;
        harness
            .workspace
            .create_chat("chat", "m1")
            .await
            .expect("chat");
        harness
            .api
            .queue_completion(Err(completion_failure(500, "boom")));

        let outcome = harness
            .workspace
            .send_message("hi", Vec::new())
            .await
            .expect("send");

        let messages = harness.workspace.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, MessageRole::System);
        assert_eq!(messages[1].content, "Error: API Error: 500 - boom");
        assert!(matches!(outcome, SendOutcome::Errored(_)));
        assert!(!harness.workspace.is_generating());
    }

    #[tokio::test]
    async fn regenerate_replaces_the_trailing_assistant_turn() {
        let mut harness = harness(true).await;
        harness
            .workspace
            .create_chat("chat", "m1")
            .await
            .expect("chat");
        harness
            .api
            .queue_completion(Ok(assistant_reply("m1", "hello")));
        harness
            .workspace
            .send_message("hi", Vec::new())
            .await
            .expect("send");

        harness
            .api
            .queue_completion(Ok(assistant_reply("m1", "hello again")));
        let outcome = harness
            .workspace
            .regenerate_last_message()
            .await
            .expect("regenerate");

        let requests = harness.api.recorded_requests();
        assert_eq!(requests.len(), 2);
        let resubmitted = &requests[1].messages;
        assert_eq!(resubmitted.len(), 1);
        assert_eq!(resubmitted[0].role, quill_llm::Role::User);
        assert_eq!(
            resubmitted[0].content,
            OutboundContent::Text("hi".to_string())
        );
        // The regenerate path resubmits the model only.
        assert_eq!(requests[1].temperature, None);

        let messages = harness.workspace.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "hello again");
        assert!(matches!(outcome, SendOutcome::Completed(_)));

        let chat_id = harness.workspace.active_chat_id().expect("active chat");
        let persisted = harness
            .storage
            .list_messages(chat_id)
            .await
            .expect("persisted messages");
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[1].content, "hello again");
    }

    #[tokio::test]
    async fn regenerate_without_assistant_tail_is_a_noop() {
        let mut harness = harness(true).await;
        harness
            .workspace
            .create_chat("chat", "m1")
            .await
            .expect("chat");

        let empty = harness
            .workspace
            .regenerate_last_message()
            .await
            .expect("regenerate empty");
        assert_eq!(empty, SendOutcome::Skipped(SkipReason::NothingToRegenerate));

        harness
            .workspace
            .add_message(MessageRole::User, "hi", Vec::new(), None)
            .await
            .expect("append")
            .expect("active chat set");
        let user_tail = harness
            .workspace
            .regenerate_last_message()
            .await
            .expect("regenerate user tail");
        assert_eq!(
            user_tail,
            SendOutcome::Skipped(SkipReason::NothingToRegenerate)
        );
        assert!(harness.api.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn overlapping_requests_are_rejected_while_generating() {
        let mut harness = harness(true).await;
        harness
            .workspace
            .create_chat("chat", "m1")
            .await
            .expect("chat");
        harness.workspace.force_generating_for_tests(true);

        let send = harness
            .workspace
            .send_message("hi", Vec::new())
            .await
            .expect("send");
        let regenerate = harness
            .workspace
            .regenerate_last_message()
            .await
            .expect("regenerate");

        assert_eq!(send, SendOutcome::Skipped(SkipReason::GenerationInFlight));
        assert_eq!(
            regenerate,
            SendOutcome::Skipped(SkipReason::GenerationInFlight)
        );
        assert!(harness.workspace.messages().is_empty());
        assert!(harness.api.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn listeners_observe_mirror_mutations() {
        let mut harness = harness(false).await;
        let seen: Arc<Mutex<Vec<WorkspaceEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        harness.workspace.subscribe(move |event| {
            sink.lock().expect("event sink lock").push(event);
        });

        harness
            .workspace
            .create_chat("chat", "m1")
            .await
            .expect("chat");

        let events = seen.lock().expect("event sink lock").clone();
        assert!(events.contains(&WorkspaceEvent::ChatsChanged));
        assert!(events.contains(&WorkspaceEvent::ActiveChatChanged));
        assert!(events.contains(&WorkspaceEvent::MessagesChanged));
    }

    #[tokio::test]
    async fn load_chats_fills_the_mirror_from_the_store() {
        let mut harness = harness(false).await;
        harness
            .workspace
            .create_chat("older", "m1")
            .await
            .expect("older chat");
        std::thread::sleep(Duration::from_millis(5));
        let newer = harness
            .workspace
            .create_chat("newer", "m1")
            .await
            .expect("newer chat");

        let settings = Arc::new(SettingsState::new(harness.storage.clone()));
        let mut fresh = ChatWorkspace::new(
            harness.storage.clone(),
            harness.api.clone(),
            settings,
        );
        fresh.load_chats().await.expect("load");

        assert_eq!(fresh.chats().len(), 2);
        assert_eq!(fresh.chats()[0].id, newer.id);
    }
}
