use std::sync::Arc;

use quill_llm::{CompletionApi, ModelInfo};
use quill_storage::{CachedModelRecord, ModelCacheStore};

use crate::settings::SettingsState;

/// Cached list of remote completion models. The persisted cache has no
/// expiry: once populated it is adopted until a forced refresh replaces
/// it wholesale.
pub struct ModelCatalog {
    store: Arc<dyn ModelCacheStore>,
    api: Arc<dyn CompletionApi>,
    settings: Arc<SettingsState>,
    models: Vec<ModelInfo>,
    is_loading: bool,
    error: Option<String>,
}

impl ModelCatalog {
    pub fn new(
        store: Arc<dyn ModelCacheStore>,
        api: Arc<dyn CompletionApi>,
        settings: Arc<SettingsState>,
    ) -> Self {
        Self {
            store,
            api,
            settings,
            models: Vec::new(),
            is_loading: false,
            error: None,
        }
    }

    pub fn models(&self) -> &[ModelInfo] {
        &self.models
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Populates the model list: in-memory first, then the persisted
    /// cache, then the network. Failures of any step land in `error`
    /// and never propagate; the loading flag clears on every exit path.
    pub async fn load_models(&mut self, force: bool) {
        if !force && !self.models.is_empty() {
            return;
        }

        self.is_loading = true;
        self.error = None;

        if let Err(message) = self.refresh(force).await {
            tracing::warn!(error = %message, "failed to load models");
            self.error = Some(message);
        }

        self.is_loading = false;
    }

    async fn refresh(&mut self, force: bool) -> Result<(), String> {
        let cached = self
            .store
            .list_cached_models()
            .await
            .map_err(|error| error.to_string())?;
        if !cached.is_empty() && !force {
            self.models = cached.iter().map(cached_to_model).collect();
            return Ok(());
        }

        let settings = self.settings.current();
        if !settings.has_api_key() {
            // Nothing to fetch with; not an error.
            return Ok(());
        }

        let fetched = self
            .api
            .list_models(&settings.api_key, settings.resolved_base_url())
            .await
            .map_err(|error| error.to_string())?;

        self.models = fetched;

        let records: Vec<CachedModelRecord> = self.models.iter().map(model_to_cached).collect();
        self.store
            .replace_cached_models(&records)
            .await
            .map_err(|error| error.to_string())
    }

    /// Case-insensitive substring match over model name or id. An empty
    /// query returns the full list.
    pub fn filter_models(&self, query: &str) -> Vec<ModelInfo> {
        if query.is_empty() {
            return self.models.clone();
        }

        let needle = query.to_lowercase();
        self.models
            .iter()
            .filter(|model| {
                model.name.to_lowercase().contains(&needle)
                    || model.id.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }
}

fn cached_to_model(record: &CachedModelRecord) -> ModelInfo {
    ModelInfo {
        id: record.id.clone(),
        name: record.name.clone(),
        description: record.description.clone(),
        context_length: record.context_length,
        pricing: match (&record.pricing_prompt, &record.pricing_completion) {
            (Some(prompt), Some(completion)) => Some(quill_llm::ModelPricing {
                prompt: prompt.clone(),
                completion: completion.clone(),
            }),
            _ => None,
        },
    }
}

fn model_to_cached(model: &ModelInfo) -> CachedModelRecord {
    CachedModelRecord {
        id: model.id.clone(),
        name: model.name.clone(),
        description: model.description.clone(),
        context_length: model.context_length,
        pricing_prompt: model
            .pricing
            .as_ref()
            .map(|pricing| pricing.prompt.clone()),
        pricing_completion: model
            .pricing
            .as_ref()
            .map(|pricing| pricing.completion.clone()),
    }
}
